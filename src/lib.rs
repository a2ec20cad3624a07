// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

mod otel;

pub mod config;
pub mod connection;
pub mod consumer;
pub mod dispatcher;
pub mod errors;
pub mod exchange;
pub mod handler;
pub mod logging;
pub mod notification;
pub mod producer;
pub mod publisher;
pub mod queue;
pub mod sender;
pub mod service;
pub mod topology;
