// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Topology Management
//!
//! This module holds the declared exchanges, queues and bindings.
//!
//! The main components are:
//! - `TopologyRegistry`: the in-memory, append-only registry consulted by the router
//! - `Topology`: a collection of definitions that can be installed on any transport,
//!   and re-installed on a reconnected one without duplicating bindings

use crate::{
    errors::BrokerError,
    exchange::{ExchangeDefinition, ExchangeKind, DEFAULT_EXCHANGE},
    queue::{QueueBinding, QueueDefinition},
    transport::Transport,
};
use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock, RwLockReadGuard},
};
use tracing::{debug, error};

/// A (queue, pattern) rule attached to an exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub queue: String,
    pub pattern: String,
}

#[derive(Debug, Clone)]
pub(crate) struct ExchangeEntry {
    pub(crate) kind: ExchangeKind,
    pub(crate) bindings: Vec<Binding>,
}

#[derive(Debug, Default)]
pub(crate) struct Registry {
    pub(crate) exchanges: HashMap<String, ExchangeEntry>,
    pub(crate) queues: HashMap<String, QueueDefinition>,
}

/// Declared exchanges, queues and bindings.
///
/// Every operation is idempotent and the registry only grows. Reads take a
/// shared lock so routing never waits on other routing.
#[derive(Debug, Default)]
pub struct TopologyRegistry {
    inner: RwLock<Registry>,
}

impl TopologyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Declares an exchange. Redeclaring with the same kind is a no-op,
    /// redeclaring with another kind fails with `TopologyConflict`.
    pub fn declare_exchange(&self, name: &str, kind: ExchangeKind) -> Result<(), BrokerError> {
        if name == DEFAULT_EXCHANGE {
            return match kind {
                ExchangeKind::Direct => Ok(()),
                other => Err(conflict(name, ExchangeKind::Direct, other)),
            };
        }

        let mut reg = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        match reg.exchanges.get(name) {
            Some(existing) if existing.kind == kind => Ok(()),
            Some(existing) => {
                error!(
                    name = name,
                    existing = existing.kind.to_string(),
                    requested = kind.to_string(),
                    "exchange redeclared with a different kind"
                );
                Err(conflict(name, existing.kind, kind))
            }
            None => {
                debug!("exchange: {} ({}) was created", name, kind);
                reg.exchanges.insert(
                    name.to_owned(),
                    ExchangeEntry {
                        kind,
                        bindings: vec![],
                    },
                );
                Ok(())
            }
        }
    }

    /// Declares a queue. The first definition wins; later declarations of
    /// the same name are no-ops.
    pub fn declare_queue(&self, def: &QueueDefinition) -> Result<(), BrokerError> {
        let mut reg = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if !reg.queues.contains_key(&def.name) {
            debug!("queue: {} was created", def.name);
            reg.queues.insert(def.name.clone(), def.clone());
        }
        Ok(())
    }

    /// Binds `queue` to `exchange` with `pattern`. Re-binding an identical
    /// triple is a no-op. The default exchange cannot be bound to.
    pub fn bind(&self, exchange: &str, queue: &str, pattern: &str) -> Result<(), BrokerError> {
        if exchange == DEFAULT_EXCHANGE {
            return Err(BrokerError::TopologyConflict {
                name: exchange.to_owned(),
                existing: "default".to_owned(),
                requested: "binding".to_owned(),
            });
        }

        let mut reg = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if !reg.queues.contains_key(queue) {
            return Err(BrokerError::UnknownQueue(queue.to_owned()));
        }

        let entry = reg
            .exchanges
            .get_mut(exchange)
            .ok_or_else(|| BrokerError::UnknownExchange(exchange.to_owned()))?;

        let binding = Binding {
            queue: queue.to_owned(),
            pattern: pattern.to_owned(),
        };
        if !entry.bindings.contains(&binding) {
            debug!(
                "binding queue: {} to the exchange: {} with the key: {}",
                queue, exchange, pattern
            );
            entry.bindings.push(binding);
        }
        Ok(())
    }

    pub fn exchange_kind(&self, name: &str) -> Option<ExchangeKind> {
        if name == DEFAULT_EXCHANGE {
            return Some(ExchangeKind::Direct);
        }
        self.read().exchanges.get(name).map(|e| e.kind)
    }

    pub fn bindings(&self, exchange: &str) -> Vec<Binding> {
        self.read()
            .exchanges
            .get(exchange)
            .map(|e| e.bindings.clone())
            .unwrap_or_default()
    }

    pub fn has_queue(&self, name: &str) -> bool {
        self.read().queues.contains_key(name)
    }

    pub fn queue_definition(&self, name: &str) -> Option<QueueDefinition> {
        self.read().queues.get(name).cloned()
    }
}

fn conflict(name: &str, existing: ExchangeKind, requested: ExchangeKind) -> BrokerError {
    BrokerError::TopologyConflict {
        name: name.to_owned(),
        existing: existing.to_string(),
        requested: requested.to_string(),
    }
}

/// A set of exchange, queue and binding definitions installed in one go.
///
/// Because every declaration is idempotent, the same `Topology` can be
/// installed again on a freshly reconnected transport.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    pub(crate) exchanges: Vec<ExchangeDefinition>,
    pub(crate) queues: Vec<QueueDefinition>,
    pub(crate) queues_binding: Vec<QueueBinding>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an exchange definition to the topology.
    pub fn exchange(mut self, def: ExchangeDefinition) -> Self {
        self.exchanges.push(def);
        self
    }

    /// Adds a queue definition to the topology.
    pub fn queue(mut self, def: QueueDefinition) -> Self {
        self.queues.push(def);
        self
    }

    /// Adds a queue-to-exchange binding to the topology.
    pub fn queue_binding(mut self, binding: QueueBinding) -> Self {
        self.queues_binding.push(binding);
        self
    }

    /// Installs the topology on `transport`.
    ///
    /// Exchanges are declared first, then queues (with their DLQs), then the
    /// bindings.
    pub async fn install(&self, transport: &dyn Transport) -> Result<(), BrokerError> {
        self.install_exchange(transport).await?;
        self.install_queue(transport).await?;
        self.binding_queues(transport).await
    }

    async fn install_exchange(&self, transport: &dyn Transport) -> Result<(), BrokerError> {
        for exch in &self.exchanges {
            debug!("creating exchange: {}", exch.name);
            transport.declare_exchange(exch).await.inspect_err(|err| {
                error!(
                    error = err.to_string(),
                    name = exch.name,
                    "error to declare the exchange"
                )
            })?;
        }
        Ok(())
    }

    async fn install_queue(&self, transport: &dyn Transport) -> Result<(), BrokerError> {
        for def in &self.queues {
            if let Some(dlq) = &def.dlq_name {
                debug!("creating dlq: {}", dlq);
                let dlq_def = QueueDefinition {
                    name: dlq.clone(),
                    durable: def.durable,
                    delete: def.delete,
                    ..Default::default()
                };
                transport.declare_queue(&dlq_def).await?;
            }

            debug!("creating queue: {}", def.name);
            transport.declare_queue(def).await.inspect_err(|err| {
                error!(
                    error = err.to_string(),
                    name = def.name,
                    "error to declare the queue"
                )
            })?;
        }
        Ok(())
    }

    async fn binding_queues(&self, transport: &dyn Transport) -> Result<(), BrokerError> {
        for binding in &self.queues_binding {
            transport
                .bind(
                    &binding.exchange_name,
                    &binding.queue_name,
                    &binding.routing_key,
                )
                .await
                .inspect_err(|err| {
                    error!(error = err.to_string(), "error to bind queue to exchange")
                })?;
        }

        debug!("queues were bound");
        Ok(())
    }
}
