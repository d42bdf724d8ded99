// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Routing & Correlation Engine
//!
//! An in-memory message broker core: exchanges route published messages to
//! queues (direct, topic and fanout), a delivery tracker enforces
//! at-least-once delivery with prefetch, acknowledgement and dead-lettering,
//! and an RPC layer pairs requests with replies by correlation id.
//!
//! Everything above the engine talks to a `Transport`, so the same
//! subscriptions, publishers and RPC endpoints run on the in-memory `Broker`
//! or on RabbitMQ through `AmqpTransport`.

mod consumer;
mod otel;

pub mod broker;
pub mod config;
pub mod delivery;
pub mod dispatcher;
pub mod errors;
pub mod exchange;
pub mod message;
pub mod publisher;
pub mod queue;
pub mod router;
pub mod rpc;
pub mod topology;
pub mod transport;

pub use broker::Broker;
pub use errors::{BrokerError, HandlerError};
pub use message::Message;
