// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Delivery Tracking
//!
//! This module owns the per-queue ready lists and every unsettled delivery.
//! It hands messages to attached consumers up to each consumer's prefetch
//! limit and settles deliveries on ack/nack:
//!
//! - `ack` removes the delivery for good
//! - `nack` with requeue puts the message back with `redelivered = true`
//!   while its redelivery budget lasts, otherwise it is dead-lettered
//! - `nack` without requeue dead-letters immediately
//!
//! Deliveries are at-least-once. A requeued message may overtake or trail
//! newer arrivals depending on `RequeuePosition`; ordering is FIFO only
//! between messages that were never requeued.

use crate::{
    errors::{BrokerError, HandlerError},
    message::Message,
    queue::{Overflow, QueueDefinition},
    router::MessageCategory,
};
use serde::{de::DeserializeOwned, Deserialize};
use std::{
    collections::{BTreeSet, HashMap, VecDeque},
    fmt,
    sync::{Mutex, MutexGuard, PoisonError},
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub type DeliveryTag = u64;

/// Identifies one consumer attached to a queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConsumerTag(pub String);

impl fmt::Display for ConsumerTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One in-flight handoff of a message to a consumer.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub tag: DeliveryTag,
    pub consumer_tag: ConsumerTag,
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
    pub category: MessageCategory,
    pub message: Message,
}

impl Delivery {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, HandlerError> {
        self.message.decode()
    }
}

/// Where a requeued message is put back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequeuePosition {
    #[default]
    Head,
    Tail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadLetterReason {
    /// Nacked without requeue
    Rejected,
    /// Nacked after the redelivery budget was spent
    RetriesExhausted,
    /// Pushed out of a full drop-head queue
    Overflow,
}

/// A message removed from normal flow.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
    pub reason: DeadLetterReason,
    pub message: Message,
}

#[derive(Debug, Clone)]
pub(crate) struct Envelope {
    pub(crate) message: Message,
    pub(crate) exchange: String,
    pub(crate) routing_key: String,
    pub(crate) category: MessageCategory,
    pub(crate) redelivered: bool,
    pub(crate) redeliveries: u32,
}

impl Envelope {
    pub(crate) fn new(exchange: &str, routing_key: &str, message: Message) -> Self {
        Envelope {
            category: MessageCategory::resolve(routing_key),
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
            message,
            redelivered: false,
            redeliveries: 0,
        }
    }

    fn delivery(&self, tag: DeliveryTag, consumer_tag: &ConsumerTag, queue: &str) -> Delivery {
        Delivery {
            tag,
            consumer_tag: consumer_tag.clone(),
            queue: queue.to_owned(),
            exchange: self.exchange.clone(),
            routing_key: self.routing_key.clone(),
            redelivered: self.redelivered,
            category: self.category.clone(),
            message: self.message.clone(),
        }
    }

    fn dead_letter(self, queue: &str, reason: DeadLetterReason) -> DeadLetter {
        DeadLetter {
            queue: queue.to_owned(),
            exchange: self.exchange,
            routing_key: self.routing_key,
            reason,
            message: self.message,
        }
    }
}

#[derive(Debug)]
struct ConsumerSlot {
    tag: ConsumerTag,
    prefetch: u16,
    unsettled: usize,
    sender: mpsc::UnboundedSender<Delivery>,
}

impl ConsumerSlot {
    fn has_capacity(&self) -> bool {
        self.prefetch == 0 || self.unsettled < usize::from(self.prefetch)
    }
}

#[derive(Debug)]
struct QueueState {
    def: QueueDefinition,
    ready: VecDeque<Envelope>,
    consumers: Vec<ConsumerSlot>,
    next: usize,
}

impl QueueState {
    /// Round-robin pick of a consumer with spare prefetch.
    fn next_consumer(&mut self) -> Option<usize> {
        let n = self.consumers.len();
        for offset in 0..n {
            let idx = (self.next + offset) % n;
            if self.consumers[idx].has_capacity() {
                self.next = (idx + 1) % n;
                return Some(idx);
            }
        }
        None
    }
}

#[derive(Debug)]
struct InFlight {
    queue: String,
    consumer: ConsumerTag,
    envelope: Envelope,
}

#[derive(Debug, Default)]
struct TrackerState {
    queues: HashMap<String, QueueState>,
    in_flight: HashMap<DeliveryTag, InFlight>,
    next_tag: DeliveryTag,
    next_consumer: u64,
}

impl TrackerState {
    fn pump(&mut self, queue: &str) {
        loop {
            let Some(q) = self.queues.get_mut(queue) else {
                return;
            };
            if q.ready.is_empty() {
                return;
            }
            let Some(idx) = q.next_consumer() else {
                return;
            };
            let Some(envelope) = q.ready.pop_front() else {
                return;
            };

            self.next_tag += 1;
            let tag = self.next_tag;
            let slot = &mut q.consumers[idx];

            if slot.sender.send(envelope.delivery(tag, &slot.tag, queue)).is_err() {
                let gone = slot.tag.clone();
                q.ready.push_front(envelope);
                warn!(consumer = %gone, queue = queue, "consumer went away, detaching");
                self.remove_consumer(queue, &gone);
                continue;
            }

            slot.unsettled += 1;
            let consumer = slot.tag.clone();
            self.in_flight.insert(
                tag,
                InFlight {
                    queue: queue.to_owned(),
                    consumer,
                    envelope,
                },
            );
        }
    }

    /// Detaches a consumer and returns its unsettled deliveries to the head
    /// of the queue, oldest first. Each returned delivery spends one unit of
    /// its redelivery budget but is never dead-lettered here.
    fn remove_consumer(&mut self, queue: &str, consumer: &ConsumerTag) -> bool {
        let Some(q) = self.queues.get_mut(queue) else {
            return false;
        };
        let before = q.consumers.len();
        q.consumers.retain(|c| &c.tag != consumer);
        if q.consumers.len() == before {
            return false;
        }
        if q.next >= q.consumers.len() {
            q.next = 0;
        }

        let mut tags: Vec<DeliveryTag> = self
            .in_flight
            .iter()
            .filter(|(_, f)| &f.consumer == consumer)
            .map(|(tag, _)| *tag)
            .collect();
        tags.sort_unstable();

        for tag in tags.into_iter().rev() {
            if let Some(mut flight) = self.in_flight.remove(&tag) {
                flight.envelope.redelivered = true;
                flight.envelope.redeliveries = flight.envelope.redeliveries.saturating_add(1);
                q.ready.push_front(flight.envelope);
            }
        }
        true
    }

    fn take(&mut self, tag: DeliveryTag) -> Result<InFlight, BrokerError> {
        let flight = self
            .in_flight
            .remove(&tag)
            .ok_or(BrokerError::UnknownDeliveryTag(tag))?;

        if let Some(slot) = self
            .queues
            .get_mut(&flight.queue)
            .and_then(|q| q.consumers.iter_mut().find(|c| c.tag == flight.consumer))
        {
            slot.unsettled = slot.unsettled.saturating_sub(1);
        }
        Ok(flight)
    }
}

/// Queue contents and unsettled deliveries for one broker.
#[derive(Debug)]
pub struct DeliveryTracker {
    state: Mutex<TrackerState>,
    max_redeliveries: u32,
    requeue_position: RequeuePosition,
}

impl DeliveryTracker {
    pub fn new(max_redeliveries: u32, requeue_position: RequeuePosition) -> Self {
        DeliveryTracker {
            state: Mutex::new(TrackerState::default()),
            max_redeliveries,
            requeue_position,
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a queue and returns the definition in effect. Existing
    /// queues keep their state and their first definition.
    pub fn add_queue(&self, def: &QueueDefinition) -> QueueDefinition {
        self.lock()
            .queues
            .entry(def.name.clone())
            .or_insert_with(|| QueueState {
                def: def.clone(),
                ready: VecDeque::new(),
                consumers: vec![],
                next: 0,
            })
            .def
            .clone()
    }

    /// Appends a copy of `envelope` to every target queue.
    ///
    /// Either every target accepts the message or none does: a full
    /// reject-publish queue fails the whole publish with `QueueFull`. Full
    /// drop-head queues make room by dead-lettering their oldest message,
    /// which is returned to the caller.
    pub(crate) fn enqueue(
        &self,
        targets: &BTreeSet<String>,
        envelope: Envelope,
    ) -> Result<Vec<DeadLetter>, BrokerError> {
        let mut state = self.lock();

        for name in targets {
            let q = state
                .queues
                .get(name)
                .ok_or_else(|| BrokerError::UnknownQueue(name.clone()))?;
            if let (Some(max), Overflow::RejectPublish) = (q.def.max_length, q.def.overflow) {
                if q.ready.len() >= max {
                    debug!(queue = name, "rejecting publish, queue is full");
                    return Err(BrokerError::QueueFull(name.clone()));
                }
            }
        }

        let mut dropped = vec![];
        for name in targets {
            if let Some(q) = state.queues.get_mut(name) {
                q.ready.push_back(envelope.clone());
                if let (Some(max), Overflow::DropHead) = (q.def.max_length, q.def.overflow) {
                    while q.ready.len() > max {
                        if let Some(oldest) = q.ready.pop_front() {
                            dropped.push(oldest.dead_letter(name, DeadLetterReason::Overflow));
                        }
                    }
                }
            }
            state.pump(name);
        }

        Ok(dropped)
    }

    /// Attaches a consumer to `queue` and starts handing it messages.
    pub fn attach(
        &self,
        queue: &str,
        prefetch: u16,
    ) -> Result<(ConsumerTag, mpsc::UnboundedReceiver<Delivery>), BrokerError> {
        let mut state = self.lock();
        state.next_consumer += 1;
        let tag = ConsumerTag(format!("ctag-{}", state.next_consumer));

        let (sender, receiver) = mpsc::unbounded_channel();
        let q = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::UnknownQueue(queue.to_owned()))?;
        q.consumers.push(ConsumerSlot {
            tag: tag.clone(),
            prefetch,
            unsettled: 0,
            sender,
        });
        debug!(consumer = %tag, queue = queue, prefetch = prefetch, "consumer attached");

        state.pump(queue);
        Ok((tag, receiver))
    }

    /// Detaches a consumer. Its unsettled deliveries go back to the head of
    /// the queue marked as redelivered.
    pub fn detach(&self, consumer: &ConsumerTag) -> bool {
        let mut state = self.lock();
        let queue = state
            .queues
            .iter()
            .find(|(_, q)| q.consumers.iter().any(|c| &c.tag == consumer))
            .map(|(name, _)| name.clone());

        match queue {
            Some(queue) => {
                state.remove_consumer(&queue, consumer);
                state.pump(&queue);
                debug!(consumer = %consumer, queue = queue, "consumer detached");
                true
            }
            None => false,
        }
    }

    /// Settles a delivery positively.
    pub fn ack(&self, tag: DeliveryTag) -> Result<(), BrokerError> {
        let mut state = self.lock();
        let flight = state.take(tag)?;
        state.pump(&flight.queue);
        Ok(())
    }

    /// Settles a delivery negatively. Returns the dead letter when the
    /// message left normal flow.
    pub fn nack(&self, tag: DeliveryTag, requeue: bool) -> Result<Option<DeadLetter>, BrokerError> {
        let mut state = self.lock();
        let InFlight {
            queue,
            mut envelope,
            ..
        } = state.take(tag)?;

        let Some(q) = state.queues.get_mut(&queue) else {
            return Err(BrokerError::UnknownQueue(queue));
        };
        let limit = q.def.max_redeliveries.unwrap_or(self.max_redeliveries);

        let dead = if !requeue {
            Some(envelope.dead_letter(&queue, DeadLetterReason::Rejected))
        } else if envelope.redeliveries < limit {
            envelope.redelivered = true;
            envelope.redeliveries += 1;
            debug!(queue = queue, tag = tag, "requeuing message");
            match self.requeue_position {
                RequeuePosition::Head => q.ready.push_front(envelope),
                RequeuePosition::Tail => q.ready.push_back(envelope),
            }
            None
        } else {
            warn!(queue = queue, tag = tag, "redelivery budget spent, dead-lettering");
            Some(envelope.dead_letter(&queue, DeadLetterReason::RetriesExhausted))
        };

        state.pump(&queue);
        Ok(dead)
    }

    /// Number of messages waiting in `queue`, not counting unsettled ones.
    pub fn depth(&self, queue: &str) -> Option<usize> {
        self.lock().queues.get(queue).map(|q| q.ready.len())
    }

    /// Number of unsettled deliveries taken from `queue`.
    pub fn in_flight(&self, queue: &str) -> usize {
        self.lock()
            .in_flight
            .values()
            .filter(|f| f.queue == queue)
            .count()
    }

    pub fn consumer_count(&self, queue: &str) -> usize {
        self.lock()
            .queues
            .get(queue)
            .map(|q| q.consumers.len())
            .unwrap_or_default()
    }
}
