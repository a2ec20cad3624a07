// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # OpenTelemetry Context over AMQP Headers
//!
//! The publisher writes the current trace context into the message headers and
//! the consumer reads it back to parent the span it opens for each delivery.
//! With no global propagator installed both directions are no-ops.

use lapin::{
    protocol::basic::AMQPProperties,
    types::{AMQPValue, FieldTable, ShortString},
};
use opentelemetry::{
    global::{self, BoxedSpan, BoxedTracer},
    propagation::{Extractor, Injector},
    trace::{SpanKind, Tracer},
    Context,
};
use std::{borrow::Cow, collections::BTreeMap};
use tracing::error;

/// Tracer name used for consumer spans.
pub(crate) const CONSUMER_TRACER: &str = "amqp consumer";

/// Adapter that lets OpenTelemetry propagators read and write AMQP headers.
///
/// Implements both `Injector` (publish side) and `Extractor` (consume side)
/// over the header table of a message.
pub(crate) struct RabbitMQTracePropagator<'a> {
    headers: &'a mut BTreeMap<ShortString, AMQPValue>,
}

impl<'a> RabbitMQTracePropagator<'a> {
    /// Creates a propagator over `headers`.
    ///
    /// # Parameters
    /// * `headers` - The AMQP header table to read from or write into
    pub(crate) fn new(headers: &'a mut BTreeMap<ShortString, AMQPValue>) -> Self {
        Self { headers }
    }
}

impl Injector for RabbitMQTracePropagator<'_> {
    /// Writes a trace context entry as a long-string header.
    ///
    /// Keys are lowercased so extraction does not depend on the casing the
    /// propagator used.
    fn set(&mut self, key: &str, value: String) {
        self.headers.insert(
            key.to_lowercase().into(),
            AMQPValue::LongString(value.into()),
        );
    }
}

impl Extractor for RabbitMQTracePropagator<'_> {
    /// Reads a trace context entry.
    ///
    /// # Returns
    /// The header value when it is a UTF-8 long string, `None` otherwise
    fn get(&self, key: &str) -> Option<&str> {
        self.headers.get(key).and_then(|header_value| {
            if let AMQPValue::LongString(header_value) = header_value {
                std::str::from_utf8(header_value.as_bytes())
                    .map_err(|e| error!("Error decoding header value {:?}", e))
                    .ok()
            } else {
                None
            }
        })
    }

    /// All header keys present on the message.
    fn keys(&self) -> Vec<&str> {
        self.headers.keys().map(|header| header.as_str()).collect()
    }
}

/// Headers carrying the current trace context, ready to publish.
pub(crate) fn context_headers() -> FieldTable {
    let mut headers = BTreeMap::<ShortString, AMQPValue>::default();

    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(
            &Context::current(),
            &mut RabbitMQTracePropagator::new(&mut headers),
        )
    });

    FieldTable::from(headers)
}

/// Opens a consumer span for a delivery.
///
/// # Parameters
/// * `props` - Properties of the delivery; its headers may carry a trace context
/// * `tracer` - Tracer used to start the span
/// * `name` - Span name, the queue being consumed
///
/// # Returns
/// The extracted parent context and the started span
pub(crate) fn new_span(
    props: &AMQPProperties,
    tracer: &BoxedTracer,
    name: &str,
) -> (Context, BoxedSpan) {
    let mut headers = props
        .headers()
        .clone()
        .unwrap_or_default()
        .inner()
        .clone();

    let ctx = global::get_text_map_propagator(|propagator| {
        propagator.extract(&RabbitMQTracePropagator::new(&mut headers))
    });

    let span = tracer
        .span_builder(Cow::from(name.to_owned()))
        .with_kind(SpanKind::Consumer)
        .start_with_context(tracer, &ctx);

    (ctx, span)
}
