// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Notification Service
//!
//! The worker-side handler that drives a notification through
//! `pending -> processing -> {sent, failed}` and picks the sender by type.

use crate::{
    errors::HandlerError,
    handler::MessageHandler,
    notification::Notification,
    sender::Senders,
};
use async_trait::async_trait;
use chrono::Utc;
use tracing::{error, info};

pub struct NotificationService {
    senders: Senders,
}

impl NotificationService {
    pub fn new(senders: Senders) -> Self {
        NotificationService { senders }
    }
}

#[async_trait]
impl MessageHandler for NotificationService {
    /// Processes a single notification.
    ///
    /// On a sender failure the notification is marked `failed` with the sender's
    /// message, and the returned error names the notification id so the consumer
    /// log can be traced back to it.
    async fn handle(&self, notification: &mut Notification) -> Result<(), HandlerError> {
        notification.begin_processing()?;

        info!(
            id = %notification.id(),
            kind = %notification.kind(),
            recipient = %notification.recipient,
            "processing notification"
        );

        let sender = self.senders.get(notification.kind());
        match sender.send(notification).await {
            Ok(()) => {
                notification.mark_sent(Utc::now())?;
                info!(
                    id = %notification.id(),
                    kind = %notification.kind(),
                    recipient = %notification.recipient,
                    "notification sent successfully"
                );
                Ok(())
            }
            Err(err) => {
                notification.mark_failed(err.to_string())?;
                error!(
                    id = %notification.id(),
                    kind = %notification.kind(),
                    error = %err,
                    "notification delivery failed"
                );
                Err(HandlerError::Delivery {
                    id: notification.id().to_owned(),
                    kind: notification.kind(),
                    source: err,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        errors::SendError,
        notification::{NotificationStatus, NotificationType},
        sender::{LogSender, MockSender},
    };
    use std::sync::Arc;

    fn senders_with_sms(sms: MockSender) -> Senders {
        Senders::new(
            Arc::new(LogSender::new(NotificationType::Email)),
            Arc::new(sms),
            Arc::new(LogSender::new(NotificationType::Push)),
        )
    }

    #[tokio::test]
    async fn email_goes_from_pending_to_sent() {
        let service = NotificationService::new(Senders::logging());
        let mut n = Notification::new(NotificationType::Email, "a@b.com", "T", "M");

        let before = Utc::now();
        service.handle(&mut n).await.unwrap();

        assert_eq!(n.status(), NotificationStatus::Sent);
        assert!(n.sent_at().unwrap() >= before);
        assert!(n.error().is_none());

        let wire = serde_json::to_value(&n).unwrap();
        assert!(wire.get("sent_at").is_some());
        assert!(wire.get("error").is_none());
    }

    #[tokio::test]
    async fn failing_sms_sender_marks_failed_and_wraps_the_id() {
        let mut sms = MockSender::new();
        sms.expect_send()
            .times(1)
            .returning(|_| Err(SendError::new("gateway timeout")));
        let service = NotificationService::new(senders_with_sms(sms));
        let mut n = Notification::new(NotificationType::Sms, "+100", "T", "M");

        let err = service.handle(&mut n).await.unwrap_err();

        assert_eq!(n.status(), NotificationStatus::Failed);
        assert_eq!(n.error(), Some("gateway timeout"));
        assert!(n.sent_at().is_none());
        assert_eq!(
            err,
            HandlerError::Delivery {
                id: n.id().to_owned(),
                kind: NotificationType::Sms,
                source: SendError::new("gateway timeout"),
            }
        );
    }

    #[tokio::test]
    async fn sender_sees_processing_status() {
        let mut sms = MockSender::new();
        sms.expect_send()
            .times(1)
            .withf(|n: &Notification| n.status() == NotificationStatus::Processing)
            .returning(|_| Ok(()));
        let service = NotificationService::new(senders_with_sms(sms));
        let mut n = Notification::new(NotificationType::Sms, "+100", "T", "M");

        service.handle(&mut n).await.unwrap();
        assert_eq!(n.status(), NotificationStatus::Sent);
    }

    #[tokio::test]
    async fn already_processed_notification_is_refused_without_sending() {
        let mut sms = MockSender::new();
        sms.expect_send().times(0);
        let service = NotificationService::new(senders_with_sms(sms));

        let mut n = Notification::new(NotificationType::Sms, "+100", "T", "M");
        n.begin_processing().unwrap();
        n.mark_sent(Utc::now()).unwrap();

        let err = service.handle(&mut n).await.unwrap_err();
        assert!(matches!(err, HandlerError::InvalidTransition(_)));
        assert_eq!(n.status(), NotificationStatus::Sent);
    }
}
