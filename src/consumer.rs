// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Notification Consumer
//!
//! This module holds the consumer loop of a single queue subscription. For a
//! notification subscription every delivery goes through the same steps:
//! 1. Decode the JSON payload into a `Notification`
//! 2. Reject without requeue if it cannot be decoded (poison message)
//! 3. Hand the notification to the `MessageHandler`
//! 4. Ack on success, reject without requeue on failure
//!
//! A payload subscription skips the decoding and hands the raw body to its
//! `PayloadHandler`, settling the same way.
//!
//! Each delivery is settled exactly once and per-message failures never end the
//! loop. The loop runs until its cancellation token fires or the broker closes
//! the subscription. A consumer span is opened for each delivery, parented on
//! the trace context carried in the message headers.

use crate::{
    errors::{AmqpError, HandlerError},
    handler::{MessageHandler, SubscriptionHandler},
    notification::Notification,
    otel,
};
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use lapin::{
    message::Delivery,
    options::{
        BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicQosOptions,
        BasicRejectOptions,
    },
    types::FieldTable,
    BasicProperties, Channel,
};
use opentelemetry::{
    global::{self, BoxedTracer},
    trace::{Span, Status},
};
use std::{borrow::Cow, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// A delivered message as seen by the consumer loop.
#[async_trait]
pub trait InboundDelivery: Send + Sync {
    fn payload(&self) -> &[u8];

    fn properties(&self) -> &BasicProperties;

    /// Removes the message from the queue.
    async fn ack(&self) -> Result<(), AmqpError>;

    /// Drops the message without requeue; a dead-letter exchange, if the queue
    /// has one, receives it.
    async fn reject(&self) -> Result<(), AmqpError>;
}

#[async_trait]
impl InboundDelivery for Delivery {
    fn payload(&self) -> &[u8] {
        &self.data
    }

    fn properties(&self) -> &BasicProperties {
        &self.properties
    }

    async fn ack(&self) -> Result<(), AmqpError> {
        self.acker
            .ack(BasicAckOptions { multiple: false })
            .await
            .map(|_| ())
            .map_err(|err| {
                error!(error = err.to_string(), "error whiling ack msg");
                AmqpError::AckMessageError
            })
    }

    async fn reject(&self) -> Result<(), AmqpError> {
        self.acker
            .reject(BasicRejectOptions { requeue: false })
            .await
            .map(|_| ())
            .map_err(|err| {
                error!(error = err.to_string(), "error whiling reject msg");
                AmqpError::RejectMessageError
            })
    }
}

/// Why a delivery was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Malformed,
    HandlerFailed,
}

/// How a delivery was settled with the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Acked,
    Rejected(RejectReason),
}

/// Why a delivery could not be handled.
enum Unhandled {
    Malformed(AmqpError),
    Failed(HandlerError),
}

/// Decodes, handles and settles one delivery.
///
/// # Returns
/// The outcome, or the broker error raised while acking/rejecting. In the
/// latter case the message stays unacked and the broker redelivers it once the
/// channel closes.
pub(crate) async fn consume<D>(
    tracer: &BoxedTracer,
    queue: &str,
    delivery: &D,
    handler: &SubscriptionHandler,
) -> Result<DeliveryOutcome, AmqpError>
where
    D: InboundDelivery + ?Sized,
{
    let (_ctx, mut span) = otel::new_span(delivery.properties(), tracer, queue);

    let handled = match handler {
        SubscriptionHandler::Notification(handler) => {
            handle_notification(queue, delivery.payload(), handler.as_ref()).await
        }
        SubscriptionHandler::Payload(handler) => handler
            .handle_payload(delivery.payload())
            .await
            .map_err(|err| {
                warn!(queue, error = %err, "error whiling handling msg, rejecting without requeue");
                Unhandled::Failed(err)
            }),
    };

    match handled {
        Ok(()) => {
            if let Err(err) = delivery.ack().await {
                span.record_error(&err);
                span.set_status(Status::Error {
                    description: Cow::from("error to ack msg"),
                });
                return Err(err);
            }

            span.set_status(Status::Ok);
            Ok(DeliveryOutcome::Acked)
        }
        Err(Unhandled::Malformed(err)) => {
            span.record_error(&err);
            span.set_status(Status::Error {
                description: Cow::from("malformed payload"),
            });

            delivery.reject().await?;
            Ok(DeliveryOutcome::Rejected(RejectReason::Malformed))
        }
        Err(Unhandled::Failed(err)) => {
            span.record_error(&err);
            span.set_status(Status::Error {
                description: Cow::from("handler failure"),
            });

            delivery.reject().await?;
            Ok(DeliveryOutcome::Rejected(RejectReason::HandlerFailed))
        }
    }
}

async fn handle_notification(
    queue: &str,
    payload: &[u8],
    handler: &dyn MessageHandler,
) -> Result<(), Unhandled> {
    let mut notification = match serde_json::from_slice::<Notification>(payload) {
        Ok(n) => n,
        Err(err) => {
            let err = AmqpError::DeserializationError(err.to_string());
            error!(
                queue,
                error = %err,
                "removing message from queue - reason: malformed payload"
            );
            return Err(Unhandled::Malformed(err));
        }
    };

    debug!(queue, id = %notification.id(), kind = %notification.kind(), "received notification");

    match handler.handle(&mut notification).await {
        Ok(()) => {
            debug!(
                queue,
                id = %notification.id(),
                status = %notification.status(),
                "message successfully processed"
            );
            Ok(())
        }
        Err(err) => {
            warn!(
                queue,
                id = %notification.id(),
                status = %notification.status(),
                error = %err,
                "error whiling handling msg, rejecting without requeue"
            );
            Err(Unhandled::Failed(err))
        }
    }
}

/// Runs the consumer loop over a stream of deliveries.
///
/// Deliveries are processed one at a time in arrival order; a handler that
/// blocks holds up this subscription only. Cancellation is observed between
/// deliveries, never in the middle of one.
pub(crate) async fn drive<S, D>(
    deliveries: S,
    queue: &str,
    handler: &SubscriptionHandler,
    token: &CancellationToken,
) -> Result<(), AmqpError>
where
    S: Stream<Item = Result<D, AmqpError>>,
    D: InboundDelivery,
{
    let tracer = global::tracer(otel::CONSUMER_TRACER);
    let mut deliveries = std::pin::pin!(deliveries);

    loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => {
                info!(queue, "consumer cancelled");
                return Ok(());
            }
            next = deliveries.next() => next,
        };

        match next {
            Some(Ok(delivery)) => match consume(&tracer, queue, &delivery, handler).await {
                Ok(outcome) => debug!(queue, ?outcome, "delivery settled"),
                Err(err) => error!(queue, error = %err, "error consume msg"),
            },
            Some(Err(err)) => {
                error!(queue, error = %err, "subscription failed");
                return Err(err);
            }
            None => {
                info!(queue, "subscription closed by the broker");
                return Ok(());
            }
        }
    }
}

/// Consumer of a single queue on its own channel.
pub struct NotificationConsumer {
    channel: Arc<Channel>,
    handler: SubscriptionHandler,
    prefetch_count: u16,
}

impl NotificationConsumer {
    /// Creates a consumer.
    ///
    /// # Parameters
    /// * `channel` - A channel reserved for this subscription
    /// * `handler` - Called once per delivery
    /// * `prefetch_count` - Maximum unacked deliveries the broker pushes to this subscription
    pub fn new(channel: Arc<Channel>, handler: SubscriptionHandler, prefetch_count: u16) -> Self {
        NotificationConsumer {
            channel,
            handler,
            prefetch_count,
        }
    }

    /// Subscribes to `queue` with manual acknowledgement and processes deliveries
    /// until `token` is cancelled or the subscription ends.
    ///
    /// # Returns
    /// Ok(()) on cancellation or a clean broker-side close; an error if the
    /// subscription could not be set up or failed while running
    pub async fn consume(&self, queue: &str, token: CancellationToken) -> Result<(), AmqpError> {
        if let Err(err) = self
            .channel
            .basic_qos(self.prefetch_count, BasicQosOptions { global: false })
            .await
        {
            error!(error = err.to_string(), queue, "error to configure qos");
            return Err(AmqpError::QoSDeclarationError(queue.to_owned()));
        }

        let consumer_tag = format!("{}-{}", queue, Uuid::new_v4());

        let consumer = match self
            .channel
            .basic_consume(
                queue,
                &consumer_tag,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: false,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), queue, "error to create the consumer");
                Err(AmqpError::ConsumerDeclarationError(queue.to_owned()))
            }
            Ok(c) => Ok(c),
        }?;

        info!(queue, consumer_tag = %consumer_tag, "consumer registered");

        let deliveries =
            consumer.map(|result| result.map_err(|err| AmqpError::ConsumerError(err.to_string())));
        let result = drive(deliveries, queue, &self.handler, &token).await;

        if token.is_cancelled() && self.channel.status().connected() {
            if let Err(err) = self
                .channel
                .basic_cancel(&consumer_tag, BasicCancelOptions { nowait: false })
                .await
            {
                warn!(error = err.to_string(), queue, "error cancelling consumer");
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        errors::{HandlerError, SendError},
        handler::{LogHandler, MockMessageHandler, MockPayloadHandler},
        notification::{NotificationStatus, NotificationType},
        publisher::encode,
        sender::{LogSender, MockSender, Senders},
        service::NotificationService,
    };
    use futures_util::stream;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Settled {
        Ack(u64),
        Reject(u64),
    }

    type Ledger = Arc<Mutex<Vec<Settled>>>;

    struct FakeDelivery {
        tag: u64,
        payload: Vec<u8>,
        properties: BasicProperties,
        ledger: Ledger,
        fail_ack: bool,
    }

    impl FakeDelivery {
        fn new(tag: u64, payload: Vec<u8>, ledger: &Ledger) -> Self {
            FakeDelivery {
                tag,
                payload,
                properties: BasicProperties::default(),
                ledger: ledger.clone(),
                fail_ack: false,
            }
        }
    }

    #[async_trait]
    impl InboundDelivery for FakeDelivery {
        fn payload(&self) -> &[u8] {
            &self.payload
        }

        fn properties(&self) -> &BasicProperties {
            &self.properties
        }

        async fn ack(&self) -> Result<(), AmqpError> {
            if self.fail_ack {
                return Err(AmqpError::AckMessageError);
            }
            self.ledger.lock().unwrap().push(Settled::Ack(self.tag));
            Ok(())
        }

        async fn reject(&self) -> Result<(), AmqpError> {
            self.ledger.lock().unwrap().push(Settled::Reject(self.tag));
            Ok(())
        }
    }

    /// Runs the real service and keeps the notifications it processed.
    struct RecordingHandler {
        inner: NotificationService,
        seen: Mutex<Vec<Notification>>,
    }

    #[async_trait]
    impl MessageHandler for RecordingHandler {
        async fn handle(&self, notification: &mut Notification) -> Result<(), HandlerError> {
            let result = self.inner.handle(notification).await;
            self.seen.lock().unwrap().push(notification.clone());
            result
        }
    }

    fn tracer() -> BoxedTracer {
        global::tracer(otel::CONSUMER_TRACER)
    }

    fn payload(kind: NotificationType) -> Vec<u8> {
        encode(&Notification::new(kind, "a@b.com", "T", "M")).unwrap()
    }

    fn truncated(kind: NotificationType) -> Vec<u8> {
        let mut bytes = payload(kind);
        bytes.truncate(bytes.len() / 2);
        bytes
    }

    #[tokio::test]
    async fn successful_handler_acks_once() {
        let ledger = Ledger::default();
        let delivery = FakeDelivery::new(1, payload(NotificationType::Email), &ledger);
        let mut handler = MockMessageHandler::new();
        handler.expect_handle().times(1).returning(|_| Ok(()));

        let handler = SubscriptionHandler::notification(handler);
        let outcome = consume(&tracer(), "q", &delivery, &handler).await.unwrap();

        assert_eq!(outcome, DeliveryOutcome::Acked);
        assert_eq!(*ledger.lock().unwrap(), vec![Settled::Ack(1)]);
    }

    #[tokio::test]
    async fn failing_handler_rejects_once() {
        let ledger = Ledger::default();
        let delivery = FakeDelivery::new(7, payload(NotificationType::Sms), &ledger);
        let mut handler = MockMessageHandler::new();
        handler
            .expect_handle()
            .times(1)
            .returning(|_| Err(HandlerError::Rejected("nope".to_owned())));

        let handler = SubscriptionHandler::notification(handler);
        let outcome = consume(&tracer(), "q", &delivery, &handler).await.unwrap();

        assert_eq!(outcome, DeliveryOutcome::Rejected(RejectReason::HandlerFailed));
        assert_eq!(*ledger.lock().unwrap(), vec![Settled::Reject(7)]);
    }

    #[tokio::test]
    async fn truncated_payload_is_rejected_without_calling_the_handler() {
        let ledger = Ledger::default();
        let delivery = FakeDelivery::new(3, truncated(NotificationType::Email), &ledger);
        let mut handler = MockMessageHandler::new();
        handler.expect_handle().times(0);

        let handler = SubscriptionHandler::notification(handler);
        let outcome = consume(&tracer(), "q", &delivery, &handler).await.unwrap();

        assert_eq!(outcome, DeliveryOutcome::Rejected(RejectReason::Malformed));
        assert_eq!(*ledger.lock().unwrap(), vec![Settled::Reject(3)]);
    }

    #[tokio::test]
    async fn ack_failure_is_reported_and_not_turned_into_a_reject() {
        let ledger = Ledger::default();
        let mut delivery = FakeDelivery::new(1, payload(NotificationType::Push), &ledger);
        delivery.fail_ack = true;
        let mut handler = MockMessageHandler::new();
        handler.expect_handle().times(1).returning(|_| Ok(()));

        let handler = SubscriptionHandler::notification(handler);
        let err = consume(&tracer(), "q", &delivery, &handler).await.unwrap_err();

        assert_eq!(err, AmqpError::AckMessageError);
        assert!(ledger.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn loop_survives_bad_messages_and_keeps_delivery_order() {
        let ledger = Ledger::default();
        let deliveries = vec![
            Ok(FakeDelivery::new(1, payload(NotificationType::Email), &ledger)),
            Ok(FakeDelivery::new(2, truncated(NotificationType::Email), &ledger)),
            Ok(FakeDelivery::new(3, b"not json".to_vec(), &ledger)),
            Ok(FakeDelivery::new(4, payload(NotificationType::Sms), &ledger)),
            Ok(FakeDelivery::new(5, payload(NotificationType::Push), &ledger)),
        ];

        let mut sms = MockSender::new();
        sms.expect_send()
            .times(1)
            .returning(|_| Err(SendError::new("gateway down")));
        let recorder = Arc::new(RecordingHandler {
            inner: NotificationService::new(Senders::new(
                Arc::new(LogSender::new(NotificationType::Email)),
                Arc::new(sms),
                Arc::new(LogSender::new(NotificationType::Push)),
            )),
            seen: Mutex::new(vec![]),
        });

        drive(
            stream::iter(deliveries),
            "notification_queue",
            &SubscriptionHandler::Notification(recorder.clone()),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(
            *ledger.lock().unwrap(),
            vec![
                Settled::Ack(1),
                Settled::Reject(2),
                Settled::Reject(3),
                Settled::Reject(4),
                Settled::Ack(5),
            ]
        );

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen.len(), 3);

        let email = &seen[0];
        assert_eq!(email.status(), NotificationStatus::Sent);
        assert!(email.sent_at().is_some());
        assert!(email.error().is_none());

        let sms = &seen[1];
        assert_eq!(sms.kind(), NotificationType::Sms);
        assert_eq!(sms.status(), NotificationStatus::Failed);
        assert_eq!(sms.error(), Some("gateway down"));
        assert!(sms.sent_at().is_none());

        assert_eq!(seen[2].status(), NotificationStatus::Sent);
    }

    #[tokio::test]
    async fn loop_continues_after_an_ack_failure() {
        let ledger = Ledger::default();
        let mut broken = FakeDelivery::new(1, payload(NotificationType::Email), &ledger);
        broken.fail_ack = true;
        let deliveries = vec![
            Ok(broken),
            Ok(FakeDelivery::new(2, payload(NotificationType::Email), &ledger)),
        ];
        let mut handler = MockMessageHandler::new();
        handler.expect_handle().times(2).returning(|_| Ok(()));

        let handler = SubscriptionHandler::notification(handler);
        drive(stream::iter(deliveries), "q", &handler, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(*ledger.lock().unwrap(), vec![Settled::Ack(2)]);
    }

    #[tokio::test]
    async fn cancelled_token_stops_an_idle_subscription() {
        let token = CancellationToken::new();
        let handler = SubscriptionHandler::notification(MockMessageHandler::new());
        let idle = stream::pending::<Result<FakeDelivery, AmqpError>>();

        let canceller = token.clone();
        tokio::spawn(async move { canceller.cancel() });

        drive(idle, "q", &handler, &token).await.unwrap();
    }

    #[tokio::test]
    async fn subscription_error_ends_the_loop() {
        let ledger = Ledger::default();
        let deliveries = vec![
            Ok(FakeDelivery::new(1, payload(NotificationType::Email), &ledger)),
            Err(AmqpError::ConsumerError("channel closed".to_owned())),
            Ok(FakeDelivery::new(2, payload(NotificationType::Email), &ledger)),
        ];
        let mut handler = MockMessageHandler::new();
        handler.expect_handle().times(1).returning(|_| Ok(()));

        let handler = SubscriptionHandler::notification(handler);
        let err = drive(stream::iter(deliveries), "q", &handler, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err, AmqpError::ConsumerError("channel closed".to_owned()));
        assert_eq!(*ledger.lock().unwrap(), vec![Settled::Ack(1)]);
    }

    #[tokio::test]
    async fn log_subscription_acks_bodies_that_are_not_notifications() {
        let ledger = Ledger::default();
        let delivery = FakeDelivery::new(
            9,
            br#"{"level":"info","msg":"user logged in"}"#.to_vec(),
            &ledger,
        );

        let outcome = consume(
            &tracer(),
            "queue_log",
            &delivery,
            &SubscriptionHandler::payload(LogHandler),
        )
        .await
        .unwrap();

        assert_eq!(outcome, DeliveryOutcome::Acked);
        assert_eq!(*ledger.lock().unwrap(), vec![Settled::Ack(9)]);
    }

    #[tokio::test]
    async fn payload_handler_gets_the_raw_body_and_its_failure_rejects() {
        let ledger = Ledger::default();
        let delivery = FakeDelivery::new(4, b"not json".to_vec(), &ledger);
        let mut handler = MockPayloadHandler::new();
        handler
            .expect_handle_payload()
            .withf(|payload: &[u8]| payload == b"not json")
            .times(1)
            .returning(|_| Err(HandlerError::Rejected("full".to_owned())));

        let outcome = consume(
            &tracer(),
            "q",
            &delivery,
            &SubscriptionHandler::payload(handler),
        )
        .await
        .unwrap();

        assert_eq!(outcome, DeliveryOutcome::Rejected(RejectReason::HandlerFailed));
        assert_eq!(*ledger.lock().unwrap(), vec![Settled::Reject(4)]);
    }
}
