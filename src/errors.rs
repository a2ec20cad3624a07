// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the Notification Broker
//!
//! `AmqpError` covers every failure that touches the broker: connecting,
//! declaring topology, publishing and consuming. Business failures raised while
//! processing a notification are expressed separately by `HandlerError`, which
//! never crosses the wire and never stops a consumer.

use crate::notification::{NotificationStatus, NotificationType};
use thiserror::Error;

/// Represents errors that can occur during AMQP/RabbitMQ operations.
///
/// Startup failures (`ConnectionError`, `ChannelError`, `TopologyError`) are fatal
/// to the owning process. Per-message failures (`SerializationError`,
/// `PublishError`, `DeserializationError`) are contained to a single message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmqpError {
    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect: {0}")]
    ConnectionError(String),

    /// Error creating a channel from an established connection
    #[error("failure to create a channel: {0}")]
    ChannelError(String),

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error binding an exchange to a queue
    #[error("failure to binding exchange `{0}` to queue `{1}`")]
    BindingExchangeToQueueError(String, String),

    /// One or more declarations failed while installing the topology
    #[error("failure to install topology, {} declaration(s) failed", .0.len())]
    TopologyError(Vec<AmqpError>),

    /// Error encoding a notification before publishing
    #[error("failure to serialize payload: {0}")]
    SerializationError(String),

    /// Error publishing a message
    #[error("failure to publish: {0}")]
    PublishError(String),

    /// Error parsing a delivered payload
    #[error("failure to parse payload: {0}")]
    DeserializationError(String),

    /// Error acknowledging a message
    #[error("failure to ack message")]
    AckMessageError,

    /// Error rejecting a message
    #[error("failure to reject message")]
    RejectMessageError,

    /// Error configuring Quality of Service parameters
    #[error("failure to configure qos `{0}`")]
    QoSDeclarationError(String),

    /// Error declaring a consumer on a queue
    #[error("failure to declare consumer on queue `{0}`")]
    ConsumerDeclarationError(String),

    /// Error raised by an active subscription
    #[error("failure to consume message `{0}`")]
    ConsumerError(String),

    /// Error closing the channel or the connection
    #[error("failure to close: {0}")]
    CloseError(String),
}

/// Failure reported by a delivery integration (email, sms, push).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct SendError(pub String);

impl SendError {
    pub fn new(msg: impl Into<String>) -> Self {
        SendError(msg.into())
    }
}

/// Attempted status change that would move a notification backwards or skip a state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("notification `{id}` cannot move from `{from}` to `{to}`")]
pub struct TransitionError {
    pub id: String,
    pub from: NotificationStatus,
    pub to: NotificationStatus,
}

/// Failure returned by a [`MessageHandler`](crate::handler::MessageHandler).
///
/// Any variant makes the consumer reject the delivery without requeue.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    #[error("failed to send {kind} notification `{id}`: {source}")]
    Delivery {
        id: String,
        kind: NotificationType,
        #[source]
        source: SendError,
    },

    #[error("{0}")]
    Rejected(String),
}
