// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Publisher
//!
//! This module provides a publisher that stamps the caller's OpenTelemetry
//! context into message headers before handing the message to a transport.

use crate::{errors::BrokerError, message::MessageBuilder, otel, transport::Transport};
use opentelemetry::Context;
use std::sync::Arc;
use tracing::{debug, error};

/// Publishes messages on any `Transport` with trace context propagation.
pub struct Publisher {
    transport: Arc<dyn Transport>,
}

impl Publisher {
    /// Creates a new publisher.
    ///
    /// # Returns
    /// An Arc-wrapped Publisher instance for thread-safe sharing
    pub fn new(transport: Arc<dyn Transport>) -> Arc<Publisher> {
        Arc::new(Publisher { transport })
    }

    /// Publishes a message to `exchange` with `routing_key`.
    ///
    /// Trace context from `ctx` is added to the message headers; headers
    /// already set on `message` win over propagated ones.
    pub async fn publish(
        &self,
        ctx: &Context,
        exchange: &str,
        routing_key: &str,
        mut message: MessageBuilder,
    ) -> Result<(), BrokerError> {
        let mut headers = Default::default();
        otel::inject(ctx, &mut headers);
        for (key, value) in headers {
            message.headers_mut().entry(key).or_insert(value);
        }

        let message = message.build();
        debug!(
            exchange = exchange,
            routing_key = routing_key,
            message_id = message.message_id(),
            "publishing message"
        );

        self.transport
            .publish(exchange, routing_key, message)
            .await
            .inspect_err(|err| error!(error = err.to_string(), "error publishing message"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{message::Message, transport::MockTransport};

    #[tokio::test]
    async fn forwards_to_transport() {
        let mut transport = MockTransport::new();
        transport
            .expect_publish()
            .withf(|exchange, key, message| {
                exchange == "tasks" && key == "task.email" && message.payload() == b"hi"
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let publisher = Publisher::new(Arc::new(transport));
        publisher
            .publish(&Context::new(), "tasks", "task.email", Message::builder("hi"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn transport_failures_surface() {
        let mut transport = MockTransport::new();
        transport
            .expect_publish()
            .returning(|_, _, _| Err(BrokerError::TransportError("closed".to_owned())));

        let publisher = Publisher::new(Arc::new(transport));
        let result = publisher
            .publish(&Context::new(), "tasks", "k", Message::builder("hi"))
            .await;
        assert_eq!(result, Err(BrokerError::TransportError("closed".to_owned())));
    }
}
