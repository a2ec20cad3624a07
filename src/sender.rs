// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Delivery Senders
//!
//! One `Sender` per notification type. Real integrations (SMTP, SMS gateway,
//! push provider) live outside this crate and plug in through the trait; the
//! `LogSender` stub only writes a log line.

use crate::{
    errors::SendError,
    notification::{Notification, NotificationType},
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Sender: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), SendError>;
}

/// Dispatch table from notification type to its sender.
///
/// The lookup is an exhaustive match, so adding a `NotificationType` variant
/// does not compile until a sender is wired for it.
#[derive(Clone)]
pub struct Senders {
    email: Arc<dyn Sender>,
    sms: Arc<dyn Sender>,
    push: Arc<dyn Sender>,
}

impl Senders {
    pub fn new(email: Arc<dyn Sender>, sms: Arc<dyn Sender>, push: Arc<dyn Sender>) -> Self {
        Senders { email, sms, push }
    }

    /// Log-only senders for every type.
    pub fn logging() -> Self {
        Senders::new(
            Arc::new(LogSender::new(NotificationType::Email)),
            Arc::new(LogSender::new(NotificationType::Sms)),
            Arc::new(LogSender::new(NotificationType::Push)),
        )
    }

    pub fn get(&self, kind: NotificationType) -> &dyn Sender {
        match kind {
            NotificationType::Email => self.email.as_ref(),
            NotificationType::Sms => self.sms.as_ref(),
            NotificationType::Push => self.push.as_ref(),
        }
    }
}

/// Sender that logs the notification instead of delivering it.
#[derive(Debug, Clone)]
pub struct LogSender {
    kind: NotificationType,
}

impl LogSender {
    pub fn new(kind: NotificationType) -> Self {
        LogSender { kind }
    }
}

#[async_trait]
impl Sender for LogSender {
    async fn send(&self, notification: &Notification) -> Result<(), SendError> {
        info!(
            channel = %self.kind,
            recipient = %notification.recipient,
            message = %notification.message,
            "sending notification"
        );
        Ok(())
    }
}
