// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Definitions
//!
//! This module provides types for defining queues and their bindings. A queue
//! definition carries the options the delivery tracker honours (bounded
//! length, dead-lettering, redelivery limit) together with the declaration
//! flags the AMQP transport forwards to the server.

/// Behaviour of a bounded queue once `max_length` ready messages are waiting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Overflow {
    /// Publishing fails with `QueueFull`.
    #[default]
    RejectPublish,
    /// The oldest ready message is dead-lettered to make room.
    DropHead,
}

/// Definition of a queue with its configuration parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueDefinition {
    pub(crate) name: String,
    pub(crate) durable: bool,
    pub(crate) delete: bool,
    pub(crate) exclusive: bool,
    pub(crate) max_length: Option<usize>,
    pub(crate) overflow: Overflow,
    pub(crate) dead_letter_exchange: Option<String>,
    pub(crate) dead_letter_routing_key: Option<String>,
    pub(crate) dlq_name: Option<String>,
    pub(crate) max_redeliveries: Option<u32>,
}

impl QueueDefinition {
    /// Creates a new queue definition with the given name and default
    /// settings (non-durable, non-exclusive, unbounded).
    pub fn new(name: &str) -> QueueDefinition {
        QueueDefinition {
            name: name.to_owned(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Makes the queue durable, persisting across broker restarts.
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Sets the queue to auto-delete when no longer used. Only the AMQP
    /// transport acts on it; the in-memory broker keeps the queue declared.
    pub fn delete(mut self) -> Self {
        self.delete = true;
        self
    }

    /// Makes the queue exclusive to the connection.
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    /// Bounds the number of ready messages the queue holds.
    pub fn max_length(mut self, max: usize) -> Self {
        self.max_length = Some(max);
        self
    }

    /// Chooses what happens when a bounded queue is full.
    pub fn overflow(mut self, overflow: Overflow) -> Self {
        self.overflow = overflow;
        self
    }

    /// Republishes dead-lettered messages to `exchange`. Without a routing
    /// key the message keeps the key it was originally published with.
    pub fn dead_letter_exchange(mut self, exchange: &str, routing_key: Option<&str>) -> Self {
        self.dead_letter_exchange = Some(exchange.to_owned());
        self.dead_letter_routing_key = routing_key.map(str::to_owned);
        self
    }

    /// Adds a Dead Letter Queue named after this queue with a "-dlq" suffix.
    ///
    /// Dead-lettered messages are routed to it through the default exchange.
    /// Installing the queue through a `Topology` also declares the DLQ.
    pub fn with_dlq(mut self) -> Self {
        let dlq = format!("{}-dlq", self.name);
        self.dead_letter_exchange = Some(String::new());
        self.dead_letter_routing_key = Some(dlq.clone());
        self.dlq_name = Some(dlq);
        self
    }

    /// Overrides how many times a nacked message is redelivered before it is
    /// dead-lettered.
    pub fn max_redeliveries(mut self, retries: u32) -> Self {
        self.max_redeliveries = Some(retries);
        self
    }
}

/// Configuration for binding a queue to an exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueBinding {
    pub(crate) queue_name: String,
    pub(crate) exchange_name: String,
    pub(crate) routing_key: String,
}

impl QueueBinding {
    /// Creates a new binding for the given queue. The exchange name and
    /// routing key default to empty strings.
    pub fn new(queue: &str) -> QueueBinding {
        QueueBinding {
            queue_name: queue.to_owned(),
            ..Default::default()
        }
    }

    /// Sets the exchange to bind the queue to.
    pub fn exchange(mut self, exchange: &str) -> Self {
        self.exchange_name = exchange.to_owned();
        self
    }

    /// Sets the binding pattern.
    pub fn routing_key(mut self, key: &str) -> Self {
        self.routing_key = key.to_owned();
        self
    }
}
