// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Notification worker: consumes the notification queue (and the log queue
//! when the fan-out is enabled) until SIGINT or SIGTERM.

use notification_broker::{
    config::{BrokerConfig, Environment, FromEnv},
    connection::AmqpConnection,
    dispatcher::NotificationDispatcher,
    errors::AmqpError,
    handler::{LogHandler, SubscriptionHandler},
    logging,
    sender::Senders,
    service::NotificationService,
    topology::{AmqpTopology, Topology},
};
use std::{process::ExitCode, sync::Arc};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    logging::init_tracing(&Environment::from_env());

    let cfg = match BrokerConfig::from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    info!(connection = %cfg.connection_name, "connecting to rabbitmq");
    let connection = match AmqpConnection::open(&cfg).await {
        Ok(conn) => Arc::new(conn),
        Err(err) => {
            error!(error = %err, "failed to connect to rabbitmq");
            return ExitCode::FAILURE;
        }
    };

    let result = run(&cfg, connection.clone()).await;

    if let Err(err) = connection.close().await {
        warn!(error = %err, "error closing rabbitmq connection");
    }

    match result {
        Ok(()) => {
            info!("worker stopped");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = %err, "worker stopped with error");
            ExitCode::FAILURE
        }
    }
}

async fn run(cfg: &BrokerConfig, connection: Arc<AmqpConnection>) -> Result<(), AmqpError> {
    AmqpTopology::notifications(connection.channel(), &cfg.topology)
        .install()
        .await?;

    let mut dispatcher = NotificationDispatcher::new(connection, cfg.prefetch_count).register(
        &cfg.topology.notification_queue,
        SubscriptionHandler::notification(NotificationService::new(Senders::logging())),
    );

    if let Some(log) = &cfg.topology.log_fanout {
        dispatcher = dispatcher.register(&log.queue, SubscriptionHandler::payload(LogHandler));
    }

    let token = CancellationToken::new();
    tokio::spawn(shutdown_signal(token.clone()));

    info!("starting rabbitmq consumers...");
    dispatcher.consume_blocking(token).await
}

/// Cancels `token` on SIGINT or SIGTERM.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for sigterm");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutting down gracefully...");
    token.cancel();
}
