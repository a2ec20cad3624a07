// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Handlers
//!
//! A subscription calls exactly one handler per delivery; `Ok` leads to an ack
//! and any `Err` to a reject without requeue. Two kinds exist:
//! - `MessageHandler`: receives the delivery decoded as a `Notification`; a
//!   body that does not decode is rejected before the handler is called
//! - `PayloadHandler`: receives the raw body, whatever its format

use crate::{errors::HandlerError, notification::Notification};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Processes one notification, mutating its status in place.
    async fn handle(&self, notification: &mut Notification) -> Result<(), HandlerError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PayloadHandler: Send + Sync {
    /// Processes the raw body of one delivery.
    async fn handle_payload(&self, payload: &[u8]) -> Result<(), HandlerError>;
}

/// The handler a subscription feeds its deliveries to.
#[derive(Clone)]
pub enum SubscriptionHandler {
    Notification(Arc<dyn MessageHandler>),
    Payload(Arc<dyn PayloadHandler>),
}

impl SubscriptionHandler {
    pub fn notification(handler: impl MessageHandler + 'static) -> Self {
        SubscriptionHandler::Notification(Arc::new(handler))
    }

    pub fn payload(handler: impl PayloadHandler + 'static) -> Self {
        SubscriptionHandler::Payload(Arc::new(handler))
    }
}

/// Handler for the log fan-out queue: writes every body to the log and succeeds.
#[derive(Debug, Default, Clone)]
pub struct LogHandler;

#[async_trait]
impl PayloadHandler for LogHandler {
    async fn handle_payload(&self, payload: &[u8]) -> Result<(), HandlerError> {
        info!(
            body = %String::from_utf8_lossy(payload),
            "log message received"
        );
        Ok(())
    }
}
