// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Notification Model
//!
//! The notification is the unit of work carried on the broker. It is created as
//! `pending` by the producer, travels as JSON, and is moved forward in place by
//! the consumer: `pending -> processing -> {sent, failed}`. The transition
//! methods below are the only way to change the status and they refuse to move
//! backwards, so `sent_at` and `error` can never both be set.

use crate::errors::TransitionError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Delivery channel of a notification. Immutable once created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    Email,
    Sms,
    Push,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::Email => "email",
            NotificationType::Sms => "sms",
            NotificationType::Push => "push",
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Processing status. `Sent` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    #[default]
    Pending,
    Processing,
    Sent,
    Failed,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Pending => "pending",
            NotificationStatus::Processing => "processing",
            NotificationStatus::Sent => "sent",
            NotificationStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, NotificationStatus::Sent | NotificationStatus::Failed)
    }
}

impl fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A notification as it is published to and consumed from the broker.
///
/// The serialized form uses the keys `id`, `type`, `recipient`, `title`,
/// `message`, `meta_data`, `status`, `sent_at` and `error`; the optional ones
/// are omitted when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    id: String,
    #[serde(rename = "type")]
    kind: NotificationType,
    pub recipient: String,
    pub title: String,
    pub message: String,
    #[serde(rename = "meta_data", default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    status: NotificationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sent_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Notification {
    /// Creates a pending notification with a fresh UUID v4 identifier.
    pub fn new(
        kind: NotificationType,
        recipient: impl Into<String>,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Notification {
            id: Uuid::new_v4().to_string(),
            kind,
            recipient: recipient.into(),
            title: title.into(),
            message: message.into(),
            metadata: None,
            status: NotificationStatus::Pending,
            sent_at: None,
            error: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> NotificationType {
        self.kind
    }

    pub fn status(&self) -> NotificationStatus {
        self.status
    }

    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        self.sent_at
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Moves a pending notification into `processing`.
    pub fn begin_processing(&mut self) -> Result<(), TransitionError> {
        self.advance(NotificationStatus::Pending, NotificationStatus::Processing)
    }

    /// Marks the notification as delivered at `at`.
    pub fn mark_sent(&mut self, at: DateTime<Utc>) -> Result<(), TransitionError> {
        self.advance(NotificationStatus::Processing, NotificationStatus::Sent)?;
        self.sent_at = Some(at);
        Ok(())
    }

    /// Marks the notification as failed, recording the failure message.
    pub fn mark_failed(&mut self, reason: impl Into<String>) -> Result<(), TransitionError> {
        self.advance(NotificationStatus::Processing, NotificationStatus::Failed)?;
        self.error = Some(reason.into());
        Ok(())
    }

    fn advance(
        &mut self,
        expected: NotificationStatus,
        next: NotificationStatus,
    ) -> Result<(), TransitionError> {
        if self.status != expected {
            return Err(TransitionError {
                id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }

        self.status = next;
        Ok(())
    }
}

/// Ingress shape accepted from a producer before an id and status are assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRequest {
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub recipient: String,
    pub title: String,
    pub message: String,
    #[serde(rename = "meta_data", default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl From<NotificationRequest> for Notification {
    fn from(req: NotificationRequest) -> Self {
        let notification = Notification::new(req.kind, req.recipient, req.title, req.message);
        match req.metadata {
            Some(metadata) => notification.with_metadata(metadata),
            None => notification,
        }
    }
}
