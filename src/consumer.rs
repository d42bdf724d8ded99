// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Delivery Processing
//!
//! This module runs one delivery through its handler inside a consumer span
//! and settles it:
//!
//! - handler success is acked
//! - `HandlerError::Failed` is nacked with requeue, leaving the redelivery
//!   budget to decide between another attempt and dead-lettering
//! - `HandlerError::Malformed` is nacked without requeue

use crate::{
    delivery::Delivery,
    dispatcher::{AckMode, ConsumerHandler},
    errors::{BrokerError, HandlerError},
    otel,
    transport::Transport,
};
use opentelemetry::{
    global::BoxedTracer,
    trace::{Span, Status},
};
use std::borrow::Cow;
use tracing::{debug, error, warn};

pub(crate) async fn consume(
    tracer: &BoxedTracer,
    delivery: &Delivery,
    handler: &dyn ConsumerHandler,
    ack_mode: AckMode,
    transport: &dyn Transport,
) -> Result<(), BrokerError> {
    let name = delivery
        .message
        .kind()
        .unwrap_or(delivery.routing_key.as_str());
    let (ctx, mut span) = otel::new_span(delivery.message.headers(), tracer, name);

    debug!(
        "received: {} - exchange: {} - redelivered: {}",
        delivery.routing_key, delivery.exchange, delivery.redelivered,
    );

    let result = handler.exec(&ctx, delivery).await;

    if ack_mode == AckMode::Manual {
        match &result {
            Ok(()) => span.set_status(Status::Ok),
            Err(err) => {
                span.record_error(err);
                span.set_status(Status::error(err.to_string()));
            }
        }
        return Ok(());
    }

    let settled = match &result {
        Ok(()) => {
            debug!("message successfully processed");
            transport.ack(delivery.tag).await
        }
        Err(HandlerError::Failed(reason)) => {
            warn!(reason = reason, "error whiling handling msg, requeuing for latter");
            transport.nack(delivery.tag, true).await
        }
        Err(HandlerError::Malformed(reason)) => {
            warn!(reason = reason, "removing message from queue - reason: malformed payload");
            transport.nack(delivery.tag, false).await
        }
    };

    if let Err(err) = &result {
        span.record_error(err);
        span.set_status(Status::error(err.to_string()));
    }

    match settled {
        Ok(()) => {
            if result.is_ok() {
                span.set_status(Status::Ok);
            }
            Ok(())
        }
        Err(err) => {
            error!(error = err.to_string(), "error whiling settling msg");
            span.record_error(&err);
            span.set_status(Status::Error {
                description: Cow::from("error to settle msg"),
            });
            Err(err)
        }
    }
}
