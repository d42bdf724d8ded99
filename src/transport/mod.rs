// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Transport
//!
//! The `Transport` trait is the seam between the routing engine's clients
//! (subscriptions, publishers, RPC) and whatever actually moves messages.
//! The in-memory `Broker` implements it directly; `AmqpTransport` speaks
//! AMQP 0-9-1 through `lapin`.

pub mod amqp;

use crate::{
    delivery::{ConsumerTag, Delivery, DeliveryTag},
    errors::BrokerError,
    exchange::ExchangeDefinition,
    message::Message,
    queue::QueueDefinition,
};
use async_trait::async_trait;
use futures_util::stream::BoxStream;

pub use amqp::AmqpTransport;

/// Stream of deliveries for one consumer.
pub type DeliveryStream = BoxStream<'static, Delivery>;

/// A consumer attached to a queue.
pub struct Consumer {
    pub tag: ConsumerTag,
    pub stream: DeliveryStream,
}

/// Request/response primitives a broker offers.
///
/// Every declaration must be idempotent so that topology can be replayed on
/// a reconnected transport.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), BrokerError>;

    async fn declare_queue(&self, def: &QueueDefinition) -> Result<(), BrokerError>;

    async fn bind(&self, exchange: &str, queue: &str, pattern: &str) -> Result<(), BrokerError>;

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: Message,
    ) -> Result<(), BrokerError>;

    /// Attaches a consumer that holds at most `prefetch` unsettled
    /// deliveries (`0` for no limit).
    async fn consume(&self, queue: &str, prefetch: u16) -> Result<Consumer, BrokerError>;

    async fn ack(&self, tag: DeliveryTag) -> Result<(), BrokerError>;

    /// Settles a delivery negatively. Whether `requeue` is honoured depends
    /// on the delivery's redelivery budget.
    async fn nack(&self, tag: DeliveryTag, requeue: bool) -> Result<(), BrokerError>;

    async fn cancel(&self, consumer: &ConsumerTag) -> Result<(), BrokerError>;
}
