// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Notification Dispatcher
//!
//! Runs several queue subscriptions side by side. Each registered queue gets its
//! own channel and its own task, so one slow handler never blocks another queue.
//! All subscriptions stop together: on cancellation of the caller's token, or as
//! soon as any one of them fails.

use crate::{
    connection::AmqpConnection, consumer::NotificationConsumer, errors::AmqpError,
    handler::SubscriptionHandler,
};
use futures_util::{
    future::BoxFuture,
    stream::{FuturesUnordered, StreamExt},
    FutureExt,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// A queue paired with the handler for its deliveries.
#[derive(Clone)]
pub struct Subscription {
    pub(crate) queue: String,
    pub(crate) handler: SubscriptionHandler,
}

/// Multi-queue consumer built on one connection.
pub struct NotificationDispatcher {
    connection: Arc<AmqpConnection>,
    prefetch_count: u16,
    pub(crate) subscriptions: Vec<Subscription>,
}

impl NotificationDispatcher {
    /// Creates a new dispatcher.
    ///
    /// # Parameters
    /// * `connection` - Open connection; a channel is created per subscription
    /// * `prefetch_count` - Prefetch applied to every subscription channel
    pub fn new(connection: Arc<AmqpConnection>, prefetch_count: u16) -> Self {
        NotificationDispatcher {
            connection,
            prefetch_count,
            subscriptions: vec![],
        }
    }

    /// Registers `handler` for the deliveries of `queue`.
    pub fn register(mut self, queue: &str, handler: SubscriptionHandler) -> Self {
        self.subscriptions.push(Subscription {
            queue: queue.to_owned(),
            handler,
        });
        self
    }

    /// Starts every registered subscription and waits for all of them to end.
    ///
    /// Channels are opened up front, so a failure to set up any subscription is
    /// returned before anything is consumed. Once running, the call returns when
    /// `token` is cancelled, when every subscription has closed, or when one
    /// subscription fails; in the last case the others are stopped and the
    /// error is returned.
    pub async fn consume_blocking(&self, token: CancellationToken) -> Result<(), AmqpError> {
        let mut consumers = Vec::with_capacity(self.subscriptions.len());
        for sub in &self.subscriptions {
            let channel = self.connection.create_channel().await?;
            consumers.push((
                sub.queue.clone(),
                NotificationConsumer::new(channel, sub.handler.clone(), self.prefetch_count),
            ));
        }

        let token = token.child_token();
        let mut tasks = Vec::with_capacity(consumers.len());
        for (queue, consumer) in consumers {
            let token = token.clone();
            let task_queue = queue.clone();
            tasks.push((
                queue,
                async move { consumer.consume(&task_queue, token).await }.boxed(),
            ));
        }

        supervise(tasks, &token).await
    }
}

/// Spawns every subscription task and waits for all of them.
///
/// `token` must be the token the tasks observe; it is cancelled when the first
/// task fails so the remaining ones wind down.
///
/// # Returns
/// The first error in completion order, or Ok(()) when every task ended cleanly
pub(crate) async fn supervise(
    tasks: Vec<(String, BoxFuture<'static, Result<(), AmqpError>>)>,
    token: &CancellationToken,
) -> Result<(), AmqpError> {
    let mut running = tasks
        .into_iter()
        .map(|(queue, task)| {
            tokio::spawn(task).map(move |joined| {
                let result = match joined {
                    Ok(result) => result,
                    Err(err) => {
                        error!(error = err.to_string(), "tokio process error");
                        Err(AmqpError::ConsumerError(err.to_string()))
                    }
                };
                (queue, result)
            })
        })
        .collect::<FuturesUnordered<_>>();

    info!(subscriptions = running.len(), "dispatcher running");

    let mut first_err = None;
    while let Some((queue, result)) = running.next().await {
        if let Err(err) = result {
            error!(queue = %queue, error = %err, "subscription ended with error");
            if first_err.is_none() {
                token.cancel();
                first_err = Some(err);
            }
        }
    }

    match first_err {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
