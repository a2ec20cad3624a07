// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Connection Lifecycle
//!
//! This module owns the connection to the RabbitMQ server and the default
//! channel used for topology and publishing. Extra channels can be opened on the
//! same connection for each consumer subscription. Closing is scoped: the
//! channel is closed before the connection, and repeated calls are harmless.

use crate::{config::BrokerConfig, errors::AmqpError};
use lapin::{types::LongString, Channel, Connection, ConnectionProperties};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::{debug, error, warn};

/// AMQP reply code for a normal close.
pub const REPLY_SUCCESS: u16 = 200;

/// A single logical connection plus its default channel.
pub struct AmqpConnection {
    connection: Connection,
    channel: Arc<Channel>,
    closed: AtomicBool,
}

impl AmqpConnection {
    /// Connects to the broker and creates the default channel.
    ///
    /// Failure here is fatal to startup. Nothing is retried; a supervisor is
    /// expected to restart the process.
    ///
    /// # Parameters
    /// * `cfg` - Broker configuration holding the AMQP URL and connection name
    ///
    /// # Returns
    /// * `Result<AmqpConnection, AmqpError>` - the open connection, or
    ///   `ConnectionError` / `ChannelError`
    pub async fn open(cfg: &BrokerConfig) -> Result<AmqpConnection, AmqpError> {
        debug!("creating amqp connection...");
        let options = ConnectionProperties::default()
            .with_connection_name(LongString::from(cfg.connection_name.clone()));

        let connection = match Connection::connect(&cfg.url, options).await {
            Ok(c) => Ok(c),
            Err(err) => {
                error!(error = err.to_string(), "failure to connect");
                Err(AmqpError::ConnectionError(err.to_string()))
            }
        }?;
        debug!("amqp connected");

        debug!("creating amqp channel...");
        let channel = match connection.create_channel().await {
            Ok(c) => {
                debug!("channel created");
                c
            }
            Err(err) => {
                error!(error = err.to_string(), "error to create the channel");
                if let Err(close_err) = connection.close(REPLY_SUCCESS, "OK").await {
                    warn!(error = close_err.to_string(), "error closing connection");
                }
                return Err(AmqpError::ChannelError(err.to_string()));
            }
        };

        Ok(AmqpConnection {
            connection,
            channel: Arc::new(channel),
            closed: AtomicBool::new(false),
        })
    }

    /// The default channel, used for topology declaration and publishing.
    pub fn channel(&self) -> Arc<Channel> {
        self.channel.clone()
    }

    /// Opens an additional channel on this connection.
    ///
    /// Each consumer subscription gets its own channel so a slow queue cannot
    /// hold up another one.
    pub async fn create_channel(&self) -> Result<Arc<Channel>, AmqpError> {
        match self.connection.create_channel().await {
            Ok(c) => Ok(Arc::new(c)),
            Err(err) => {
                error!(error = err.to_string(), "error to create the channel");
                Err(AmqpError::ChannelError(err.to_string()))
            }
        }
    }

    /// Closes the default channel, then the connection.
    ///
    /// Both steps are attempted and the first error is returned. Only the first
    /// call does any work; later calls return `Ok(())`.
    pub async fn close(&self) -> Result<(), AmqpError> {
        if !first_close(&self.closed) {
            debug!("amqp connection already closed");
            return Ok(());
        }

        debug!("closing amqp channel...");
        let channel = if self.channel.status().connected() {
            self.channel
                .close(REPLY_SUCCESS, "OK")
                .await
                .map_err(|err| {
                    error!(error = err.to_string(), "error closing channel");
                    AmqpError::CloseError(err.to_string())
                })
        } else {
            Ok(())
        };

        debug!("closing amqp connection...");
        let connection = if self.connection.status().connected() {
            self.connection
                .close(REPLY_SUCCESS, "OK")
                .await
                .map_err(|err| {
                    error!(error = err.to_string(), "error closing connection");
                    AmqpError::CloseError(err.to_string())
                })
        } else {
            Ok(())
        };

        channel.and(connection)
    }
}

/// Flips `closed` and reports whether this caller was the first to do so.
fn first_close(closed: &AtomicBool) -> bool {
    !closed.swap(true, Ordering::SeqCst)
}
