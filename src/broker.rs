// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # In-Memory Broker
//!
//! `Broker` ties the topology registry, the router and the delivery tracker
//! together behind one cheaply cloneable handle. It offers a synchronous
//! producer API (declare, bind, publish, settle) and implements `Transport`
//! so that subscriptions, publishers and RPC run on it unchanged.
//!
//! Dead letters are announced on a broadcast channel. When the queue they
//! came from names a dead-letter exchange they are also republished there.

use crate::{
    config::DeliveryConfig,
    delivery::{ConsumerTag, DeadLetter, DeliveryTag, DeliveryTracker, Envelope},
    dispatcher::{self, ConsumerHandler, SubscribeOptions, SubscriptionHandle},
    errors::BrokerError,
    exchange::{ExchangeDefinition, ExchangeKind},
    message::Message,
    queue::QueueDefinition,
    router::Router,
    topology::TopologyRegistry,
    transport::{Consumer, Transport},
};
use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use std::{collections::VecDeque, sync::Arc};
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

const DEAD_LETTER_CAPACITY: usize = 1024;

struct Inner {
    topology: Arc<TopologyRegistry>,
    router: Router,
    tracker: DeliveryTracker,
    dead_letters: broadcast::Sender<DeadLetter>,
    config: DeliveryConfig,
}

/// Handle to an in-memory routing engine. Clones share the same state.
#[derive(Clone)]
pub struct Broker {
    inner: Arc<Inner>,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

impl Broker {
    pub fn new() -> Self {
        Self::with_config(DeliveryConfig::default())
    }

    pub fn with_config(config: DeliveryConfig) -> Self {
        let topology = Arc::new(TopologyRegistry::new());
        let (dead_letters, _) = broadcast::channel(DEAD_LETTER_CAPACITY);

        Broker {
            inner: Arc::new(Inner {
                router: Router::new(topology.clone()),
                tracker: DeliveryTracker::new(config.max_redeliveries, config.requeue_position),
                topology,
                dead_letters,
                config,
            }),
        }
    }

    pub fn topology(&self) -> &Arc<TopologyRegistry> {
        &self.inner.topology
    }

    pub fn router(&self) -> &Router {
        &self.inner.router
    }

    /// Subscription options built from the configured defaults.
    pub fn subscribe_options(&self) -> SubscribeOptions {
        SubscribeOptions::new(self.inner.config.prefetch)
    }

    pub fn declare_exchange(&self, name: &str, kind: ExchangeKind) -> Result<(), BrokerError> {
        self.inner.topology.declare_exchange(name, kind)
    }

    /// Declares a queue, and its dead-letter queue first when it has one.
    ///
    /// The auto-delete flag is not honoured here: the registry only grows,
    /// so a queue stays declared after its last consumer detaches.
    pub fn declare_queue(&self, def: &QueueDefinition) -> Result<(), BrokerError> {
        if let Some(dlq) = &def.dlq_name {
            let dlq_def = QueueDefinition {
                name: dlq.clone(),
                durable: def.durable,
                delete: def.delete,
                ..Default::default()
            };
            self.declare_queue(&dlq_def)?;
        }

        if self.inner.topology.queue_definition(&def.name).is_some() {
            return Ok(());
        }
        // tracker first, so a route to the queue always finds its state
        let def = self.inner.tracker.add_queue(def);
        self.inner.topology.declare_queue(&def)
    }

    pub fn bind(&self, exchange: &str, queue: &str, pattern: &str) -> Result<(), BrokerError> {
        self.inner.topology.bind(exchange, queue, pattern)
    }

    /// Routes `message` and enqueues a copy on every target queue.
    ///
    /// Returns the number of queues the message reached. A message that
    /// matches no binding is dropped and `Ok(0)` is returned.
    pub fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: Message,
    ) -> Result<usize, BrokerError> {
        let targets = self.inner.router.route(exchange, routing_key)?;
        if targets.is_empty() {
            debug!(
                exchange = exchange,
                routing_key = routing_key,
                "message matched no binding, dropping"
            );
            return Ok(0);
        }

        let dropped = self
            .inner
            .tracker
            .enqueue(&targets, Envelope::new(exchange, routing_key, message))
            .inspect_err(|err| {
                warn!(
                    error = err.to_string(),
                    exchange = exchange,
                    routing_key = routing_key,
                    "publish rejected"
                )
            })?;
        self.dead_letter(dropped);

        Ok(targets.len())
    }

    /// Attaches a consumer to `queue` and returns its delivery stream.
    pub fn consume(&self, queue: &str, prefetch: u16) -> Result<Consumer, BrokerError> {
        let (tag, receiver) = self.inner.tracker.attach(queue, prefetch)?;
        let stream = stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|delivery| (delivery, receiver))
        })
        .boxed();

        Ok(Consumer { tag, stream })
    }

    /// Detaches a consumer. Returns `false` when it was not attached.
    pub fn cancel(&self, consumer: &ConsumerTag) -> bool {
        self.inner.tracker.detach(consumer)
    }

    /// Runs `handler` for every delivery from `queue`.
    pub async fn subscribe(
        &self,
        queue: &str,
        handler: Arc<dyn ConsumerHandler>,
        options: SubscribeOptions,
    ) -> Result<SubscriptionHandle, BrokerError> {
        dispatcher::subscribe(Arc::new(self.clone()), queue, handler, options).await
    }

    pub fn ack(&self, tag: DeliveryTag) -> Result<(), BrokerError> {
        self.inner.tracker.ack(tag)
    }

    pub fn nack(&self, tag: DeliveryTag, requeue: bool) -> Result<(), BrokerError> {
        if let Some(dead) = self.inner.tracker.nack(tag, requeue)? {
            self.dead_letter(vec![dead]);
        }
        Ok(())
    }

    /// Receives every dead letter produced after this call.
    pub fn dead_letters(&self) -> broadcast::Receiver<DeadLetter> {
        self.inner.dead_letters.subscribe()
    }

    /// Ready messages waiting in `queue`, `None` for an unknown queue.
    pub fn queue_depth(&self, queue: &str) -> Option<usize> {
        self.inner.tracker.depth(queue)
    }

    pub fn in_flight(&self, queue: &str) -> usize {
        self.inner.tracker.in_flight(queue)
    }

    pub fn consumer_count(&self, queue: &str) -> usize {
        self.inner.tracker.consumer_count(queue)
    }

    fn dead_letter(&self, letters: Vec<DeadLetter>) {
        let mut pending = VecDeque::from(letters);

        while let Some(letter) = pending.pop_front() {
            warn!(
                queue = letter.queue,
                routing_key = letter.routing_key,
                reason = ?letter.reason,
                "message dead-lettered"
            );
            // no receivers is fine
            let _ = self.inner.dead_letters.send(letter.clone());

            let Some(def) = self.inner.topology.queue_definition(&letter.queue) else {
                continue;
            };
            let Some(exchange) = def.dead_letter_exchange else {
                continue;
            };
            let routing_key = def
                .dead_letter_routing_key
                .unwrap_or_else(|| letter.routing_key.clone());

            let mut targets = match self.inner.router.route(&exchange, &routing_key) {
                Ok(targets) => targets,
                Err(err) => {
                    error!(
                        error = err.to_string(),
                        queue = letter.queue,
                        "failure to route dead letter"
                    );
                    continue;
                }
            };
            if targets.remove(&letter.queue) {
                warn!(queue = letter.queue, "dead-letter cycle, skipping source queue");
            }
            if targets.is_empty() {
                debug!(queue = letter.queue, "dead letter matched no binding");
                continue;
            }

            match self
                .inner
                .tracker
                .enqueue(&targets, Envelope::new(&exchange, &routing_key, letter.message))
            {
                Ok(dropped) => pending.extend(dropped),
                Err(err) => error!(
                    error = err.to_string(),
                    queue = letter.queue,
                    "failure to republish dead letter"
                ),
            }
        }
    }
}

#[async_trait]
impl Transport for Broker {
    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), BrokerError> {
        Broker::declare_exchange(self, def.name(), def.exchange_kind())
    }

    async fn declare_queue(&self, def: &QueueDefinition) -> Result<(), BrokerError> {
        Broker::declare_queue(self, def)
    }

    async fn bind(&self, exchange: &str, queue: &str, pattern: &str) -> Result<(), BrokerError> {
        Broker::bind(self, exchange, queue, pattern)
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: Message,
    ) -> Result<(), BrokerError> {
        Broker::publish(self, exchange, routing_key, message).map(|_| ())
    }

    async fn consume(&self, queue: &str, prefetch: u16) -> Result<Consumer, BrokerError> {
        Broker::consume(self, queue, prefetch)
    }

    async fn ack(&self, tag: DeliveryTag) -> Result<(), BrokerError> {
        Broker::ack(self, tag)
    }

    async fn nack(&self, tag: DeliveryTag, requeue: bool) -> Result<(), BrokerError> {
        Broker::nack(self, tag, requeue)
    }

    async fn cancel(&self, consumer: &ConsumerTag) -> Result<(), BrokerError> {
        Broker::cancel(self, consumer);
        Ok(())
    }
}
