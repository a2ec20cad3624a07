// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Logging Setup
//!
//! Installs the global `tracing` subscriber for the binaries in this crate.

use crate::config::Environment;
use tracing::debug;
use tracing_subscriber::{prelude::*, EnvFilter};

/// Initialize tracing with an environment-aware format.
///
/// - **Production**: JSON lines, `info` by default, module targets hidden.
/// - **Local / Development**: compact human-readable lines, `debug` by default.
///
/// `RUST_LOG` overrides the default filter. Calling this more than once is a
/// no-op, which keeps tests that share a process quiet.
pub fn init_tracing(environment: &Environment) {
    let is_production = environment.is_production();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if is_production {
            EnvFilter::new("info,lapin=warn")
        } else {
            EnvFilter::new("debug,lapin=info")
        }
    });

    let result = if is_production {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_target(false))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().compact().with_target(true))
            .try_init()
    };

    if result.is_ok() {
        debug!(?environment, "tracing initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_twice_does_not_panic() {
        init_tracing(&Environment::Local);
        init_tracing(&Environment::Production);
    }
}
