// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Notification Publisher
//!
//! This module publishes notifications to RabbitMQ exchanges. Every message is
//! JSON, persistent, timestamped and carries the notification id as its
//! message id. The payload is encoded before the broker is touched, so an
//! encoding failure never results in a partial publish. There is no retry.

use crate::{errors::AmqpError, notification::Notification, otel};
use async_trait::async_trait;
use lapin::{
    options::BasicPublishOptions,
    types::{FieldTable, ShortString},
    BasicProperties, Channel,
};
use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};
use tracing::{debug, error};

/// Default content type for JSON messages
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// AMQP delivery mode for messages that survive a broker restart.
pub const DELIVERY_MODE_PERSISTENT: u8 = 2;

/// Publishing capability used by the producer side.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publishes `notification` to `exchange` with `routing_key`.
    ///
    /// # Returns
    /// Ok(()) on success, `SerializationError` if the payload could not be
    /// encoded, or `PublishError` if the broker refused it
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        notification: &Notification,
    ) -> Result<(), AmqpError>;
}

/// RabbitMQ implementation of the Publisher trait.
///
/// Owns its channel; use a channel dedicated to publishing when the same
/// connection also consumes.
pub struct RabbitMQPublisher {
    channel: Arc<Channel>,
}

impl RabbitMQPublisher {
    /// Creates a new RabbitMQ publisher.
    ///
    /// # Parameters
    /// * `channel` - A channel to the RabbitMQ server
    ///
    /// # Returns
    /// An Arc-wrapped RabbitMQPublisher instance for thread-safe sharing
    pub fn new(channel: Arc<Channel>) -> Arc<RabbitMQPublisher> {
        Arc::new(RabbitMQPublisher { channel })
    }
}

#[async_trait]
impl Publisher for RabbitMQPublisher {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        notification: &Notification,
    ) -> Result<(), AmqpError> {
        let payload = encode(notification)?;
        let properties = properties(notification, otel::context_headers());

        match self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions {
                    immediate: false,
                    mandatory: false,
                },
                &payload,
                properties,
            )
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    exchange,
                    routing_key,
                    id = %notification.id(),
                    "error publishing message"
                );
                Err(AmqpError::PublishError(err.to_string()))
            }
            _ => {
                debug!(id = %notification.id(), exchange, routing_key, "published notification");
                Ok(())
            }
        }
    }
}

/// Encodes a notification into its JSON wire form.
pub fn encode(notification: &Notification) -> Result<Vec<u8>, AmqpError> {
    serde_json::to_vec(notification).map_err(|err| {
        error!(error = err.to_string(), id = %notification.id(), "error serializing notification");
        AmqpError::SerializationError(err.to_string())
    })
}

/// Message properties for a notification publish.
pub(crate) fn properties(notification: &Notification, headers: FieldTable) -> BasicProperties {
    BasicProperties::default()
        .with_content_type(ShortString::from(JSON_CONTENT_TYPE))
        .with_delivery_mode(DELIVERY_MODE_PERSISTENT)
        .with_timestamp(unix_now())
        .with_message_id(ShortString::from(notification.id().to_owned()))
        .with_headers(headers)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::NotificationType;

    #[test]
    fn properties_are_persistent_json_with_timestamp() {
        let n = Notification::new(NotificationType::Email, "a@b.com", "T", "M");
        let before = unix_now();

        let props = properties(&n, FieldTable::default());

        assert_eq!(props.delivery_mode(), &Some(DELIVERY_MODE_PERSISTENT));
        assert_eq!(
            props.content_type(),
            &Some(ShortString::from(JSON_CONTENT_TYPE))
        );
        assert_eq!(props.message_id(), &Some(ShortString::from(n.id().to_owned())));
        assert!(matches!(props.timestamp(), Some(ts) if *ts >= before));
    }

    #[test]
    fn encode_produces_the_wire_payload() {
        let n = Notification::new(NotificationType::Sms, "+100", "T", "M");

        let bytes = encode(&n).unwrap();
        let back: Notification = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(back, n);
    }
}
