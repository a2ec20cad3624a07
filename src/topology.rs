// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Topology Management
//!
//! This module declares the exchanges, queues and bindings both services rely on.
//! Declarations are idempotent broker operations, so the same topology is
//! installed by every process at startup.
//!
//! The main components are:
//! - `TopologyChannel` trait: the three declaration calls, implemented for `lapin::Channel`
//! - `Topology` trait: Interface for topology management
//! - `AmqpTopology`: ordered, best-effort installer that fails if anything failed

use crate::{
    config::TopologyConfig,
    errors::AmqpError,
    exchange::ExchangeDefinition,
    queue::{QueueBinding, QueueDefinition},
};
use async_trait::async_trait;
use lapin::{
    options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions},
    types::FieldTable,
    Channel,
};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Declaration primitives used by [`AmqpTopology`].
#[async_trait]
pub trait TopologyChannel: Send + Sync {
    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), AmqpError>;

    async fn declare_queue(&self, def: &QueueDefinition) -> Result<(), AmqpError>;

    async fn bind_queue(&self, binding: &QueueBinding) -> Result<(), AmqpError>;
}

#[async_trait]
impl TopologyChannel for Channel {
    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), AmqpError> {
        self.exchange_declare(
            &def.name,
            def.kind.into(),
            ExchangeDeclareOptions {
                passive: false,
                durable: def.durable,
                auto_delete: def.delete,
                internal: def.internal,
                nowait: false,
            },
            FieldTable::default(),
        )
        .await
        .map_err(|err| {
            error!(error = err.to_string(), name = %def.name, "error to declare the exchange");
            AmqpError::DeclareExchangeError(def.name.clone())
        })
    }

    async fn declare_queue(&self, def: &QueueDefinition) -> Result<(), AmqpError> {
        self.queue_declare(
            &def.name,
            QueueDeclareOptions {
                passive: false,
                durable: def.durable,
                exclusive: def.exclusive,
                auto_delete: def.delete,
                nowait: false,
            },
            def.arguments(),
        )
        .await
        .map(|_| ())
        .map_err(|err| {
            error!(error = err.to_string(), name = %def.name, "error to declare the queue");
            AmqpError::DeclareQueueError(def.name.clone())
        })
    }

    async fn bind_queue(&self, binding: &QueueBinding) -> Result<(), AmqpError> {
        self.queue_bind(
            &binding.queue_name,
            &binding.exchange_name,
            &binding.routing_key,
            QueueBindOptions { nowait: false },
            FieldTable::default(),
        )
        .await
        .map_err(|err| {
            error!(
                error = err.to_string(),
                queue = %binding.queue_name,
                exchange = %binding.exchange_name,
                "error to bind queue to exchange"
            );
            AmqpError::BindingExchangeToQueueError(
                binding.exchange_name.clone(),
                binding.queue_name.clone(),
            )
        })
    }
}

/// Trait defining the interface for topology management.
///
/// This trait provides methods for registering exchanges, queues, and bindings,
/// as well as installing the topology to the RabbitMQ server.
#[async_trait]
pub trait Topology {
    /// Adds an exchange definition to the topology.
    fn exchange(self, def: ExchangeDefinition) -> Self;

    /// Adds a queue definition to the topology.
    fn queue(self, def: QueueDefinition) -> Self;

    /// Adds a queue-to-exchange binding to the topology.
    fn queue_binding(self, binding: QueueBinding) -> Self;

    /// Installs the topology to the RabbitMQ server.
    async fn install(&self) -> Result<(), AmqpError>;
}

/// RabbitMQ implementation of the Topology trait.
///
/// Definitions are kept in registration order and declared as
/// exchanges, then queues, then bindings.
pub struct AmqpTopology {
    channel: Arc<dyn TopologyChannel>,
    pub(crate) exchanges: Vec<ExchangeDefinition>,
    pub(crate) queues: Vec<QueueDefinition>,
    pub(crate) queues_binding: Vec<QueueBinding>,
}

impl AmqpTopology {
    /// Creates an empty topology bound to `channel`.
    pub fn new(channel: Arc<dyn TopologyChannel>) -> AmqpTopology {
        AmqpTopology {
            channel,
            exchanges: vec![],
            queues: vec![],
            queues_binding: vec![],
        }
    }

    /// The topology shared by the producer and the worker.
    ///
    /// A durable direct exchange and queue bound with the notification routing
    /// key, plus the durable fanout log pair when it is configured. With a
    /// dead-letter target the notification queue routes rejected messages to a
    /// durable direct exchange, bound to its own queue.
    pub fn notifications(channel: Arc<dyn TopologyChannel>, cfg: &TopologyConfig) -> AmqpTopology {
        let mut queue = QueueDefinition::new(&cfg.notification_queue).durable();
        if let Some(ttl) = cfg.notification_ttl_ms {
            queue = queue.ttl(ttl);
        }
        if let Some(max) = cfg.notification_max_length {
            queue = queue.max_length(max);
        }
        if let Some(dlx) = &cfg.dead_letter {
            queue = queue.dead_letter(&dlx.exchange, dlx.routing_key.as_deref());
        }

        let mut topology = AmqpTopology::new(channel)
            .exchange(
                ExchangeDefinition::new(&cfg.notification_exchange)
                    .direct()
                    .durable(),
            )
            .queue(queue)
            .queue_binding(
                QueueBinding::new(&cfg.notification_queue)
                    .exchange(&cfg.notification_exchange)
                    .routing_key(&cfg.notification_routing_key),
            );

        if let Some(log) = &cfg.log_fanout {
            topology = topology
                .exchange(ExchangeDefinition::new(&log.exchange).fanout().durable())
                .queue(QueueDefinition::new(&log.queue).durable())
                .queue_binding(QueueBinding::new(&log.queue).exchange(&log.exchange));
        }

        if let Some(dlx) = &cfg.dead_letter {
            let key = dlx
                .routing_key
                .as_deref()
                .unwrap_or(&cfg.notification_routing_key);

            topology = topology
                .exchange(ExchangeDefinition::new(&dlx.exchange).direct().durable())
                .queue(QueueDefinition::new(&dlx.queue).durable())
                .queue_binding(
                    QueueBinding::new(&dlx.queue)
                        .exchange(&dlx.exchange)
                        .routing_key(key),
                );
        }

        topology
    }
}

#[async_trait]
impl Topology for AmqpTopology {
    fn exchange(mut self, def: ExchangeDefinition) -> Self {
        self.exchanges.push(def);
        self
    }

    fn queue(mut self, def: QueueDefinition) -> Self {
        self.queues.push(def);
        self
    }

    fn queue_binding(mut self, binding: QueueBinding) -> Self {
        self.queues_binding.push(binding);
        self
    }

    /// Installs the topology to the RabbitMQ server.
    ///
    /// Every declaration is attempted even when an earlier one failed, and each
    /// failure is logged with the resource name. If anything failed the result
    /// is `AmqpError::TopologyError` listing every failure, which callers treat
    /// as fatal.
    async fn install(&self) -> Result<(), AmqpError> {
        let mut failures = vec![];

        failures.extend(self.install_exchanges().await);
        failures.extend(self.install_queues().await);
        failures.extend(self.binding_queues().await);

        if failures.is_empty() {
            info!(
                exchanges = self.exchanges.len(),
                queues = self.queues.len(),
                bindings = self.queues_binding.len(),
                "topology installed"
            );
            Ok(())
        } else {
            error!(failed = failures.len(), "topology installation failed");
            Err(AmqpError::TopologyError(failures))
        }
    }
}

impl AmqpTopology {
    async fn install_exchanges(&self) -> Vec<AmqpError> {
        let mut failures = vec![];

        for exch in &self.exchanges {
            debug!("creating exchange: {}", exch.name);

            match self.channel.declare_exchange(exch).await {
                Ok(()) => debug!("exchange: {} was created", exch.name),
                Err(err) => {
                    error!(exchange = %exch.name, error = err.to_string(), "failed to declare exchange");
                    failures.push(err);
                }
            }
        }

        failures
    }

    async fn install_queues(&self) -> Vec<AmqpError> {
        let mut failures = vec![];

        for def in &self.queues {
            debug!("creating queue: {}", def.name);

            match self.channel.declare_queue(def).await {
                Ok(()) => debug!("queue: {} was created", def.name),
                Err(err) => {
                    error!(queue = %def.name, error = err.to_string(), "failed to declare queue");
                    failures.push(err);
                }
            }
        }

        failures
    }

    async fn binding_queues(&self) -> Vec<AmqpError> {
        let mut failures = vec![];

        for binding in &self.queues_binding {
            debug!(
                "binding queue: {} to the exchange: {} with the key: {}",
                binding.queue_name, binding.exchange_name, binding.routing_key
            );

            if let Err(err) = self.channel.bind_queue(binding).await {
                error!(
                    queue = %binding.queue_name,
                    exchange = %binding.exchange_name,
                    error = err.to_string(),
                    "failed to bind queue"
                );
                failures.push(err);
            }
        }

        failures
    }
}
