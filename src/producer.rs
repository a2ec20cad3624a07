// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Notification Producer
//!
//! Producer-side entry point: turns an incoming request into a pending
//! notification with a fresh id and publishes it to the configured exchange.
//! An HTTP layer calls `submit` once per request and maps an error to a 5xx.

use crate::{
    config::TopologyConfig,
    errors::AmqpError,
    notification::{Notification, NotificationRequest},
    publisher::Publisher,
};
use std::sync::Arc;
use tracing::info;

pub struct NotificationProducer {
    publisher: Arc<dyn Publisher>,
    exchange: String,
    routing_key: String,
}

impl NotificationProducer {
    pub fn new(publisher: Arc<dyn Publisher>, cfg: &TopologyConfig) -> Self {
        NotificationProducer {
            publisher,
            exchange: cfg.notification_exchange.clone(),
            routing_key: cfg.notification_routing_key.clone(),
        }
    }

    /// Publishes a new pending notification built from `request`.
    ///
    /// # Returns
    /// The published notification, so the caller can report its id and status
    pub async fn submit(&self, request: NotificationRequest) -> Result<Notification, AmqpError> {
        let notification = Notification::from(request);

        self.publisher
            .publish(&self.exchange, &self.routing_key, &notification)
            .await?;

        info!(
            id = %notification.id(),
            kind = %notification.kind(),
            exchange = %self.exchange,
            "notification submitted"
        );

        Ok(notification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        notification::{NotificationStatus, NotificationType},
        publisher::MockPublisher,
    };

    fn request() -> NotificationRequest {
        NotificationRequest {
            kind: NotificationType::Email,
            recipient: "a@b.com".to_owned(),
            title: "T".to_owned(),
            message: "M".to_owned(),
            metadata: None,
        }
    }

    #[tokio::test]
    async fn submit_publishes_pending_notification_to_configured_route() {
        let mut publisher = MockPublisher::new();
        publisher
            .expect_publish()
            .times(1)
            .withf(|exchange: &str, routing_key: &str, n: &Notification| {
                exchange == "notification_exchange"
                    && routing_key == "notification"
                    && n.status() == NotificationStatus::Pending
                    && n.recipient == "a@b.com"
            })
            .returning(|_, _, _| Ok(()));

        let producer = NotificationProducer::new(Arc::new(publisher), &TopologyConfig::default());
        let notification = producer.submit(request()).await.unwrap();

        assert_eq!(notification.status(), NotificationStatus::Pending);
        assert_eq!(notification.kind(), NotificationType::Email);
        assert!(!notification.id().is_empty());
    }

    #[tokio::test]
    async fn each_submit_gets_a_fresh_id() {
        let mut publisher = MockPublisher::new();
        publisher.expect_publish().times(2).returning(|_, _, _| Ok(()));

        let producer = NotificationProducer::new(Arc::new(publisher), &TopologyConfig::default());
        let a = producer.submit(request()).await.unwrap();
        let b = producer.submit(request()).await.unwrap();

        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn publish_failure_is_surfaced() {
        let mut publisher = MockPublisher::new();
        publisher
            .expect_publish()
            .times(1)
            .returning(|_, _, _| Err(AmqpError::PublishError("channel closed".to_owned())));

        let producer = NotificationProducer::new(Arc::new(publisher), &TopologyConfig::default());
        let err = producer.submit(request()).await.unwrap_err();

        assert_eq!(err, AmqpError::PublishError("channel closed".to_owned()));
    }
}
