// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Exchange Definitions
//!
//! Exchanges are the routing entities that map published messages to zero or
//! more queues. This module defines the supported exchange kinds and a
//! builder for exchange definitions that can be declared on any transport.

use std::fmt;

/// Name of the default exchange. It routes a message to the queue whose
/// name equals the routing key.
pub const DEFAULT_EXCHANGE: &str = "";

/// Represents the routing discipline of an exchange.
///
/// - Direct: routes to bindings whose pattern equals the routing key
/// - Fanout: broadcasts to every bound queue regardless of routing key
/// - Topic: routes by wildcard pattern matching over dot-delimited words
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ExchangeKind {
    #[default]
    Direct,
    Fanout,
    Topic,
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExchangeKind::Direct => "direct",
            ExchangeKind::Fanout => "fanout",
            ExchangeKind::Topic => "topic",
        };
        f.write_str(name)
    }
}

impl From<ExchangeKind> for lapin::ExchangeKind {
    fn from(kind: ExchangeKind) -> Self {
        match kind {
            ExchangeKind::Direct => lapin::ExchangeKind::Direct,
            ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
            ExchangeKind::Topic => lapin::ExchangeKind::Topic,
        }
    }
}

/// Definition of an exchange with its declaration flags.
///
/// The in-memory broker only looks at the name and kind; the flags are
/// forwarded as-is by the AMQP transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeDefinition {
    pub(crate) name: String,
    pub(crate) kind: ExchangeKind,
    pub(crate) delete: bool,
    pub(crate) durable: bool,
    pub(crate) internal: bool,
}

impl ExchangeDefinition {
    /// Creates a new direct exchange definition with the given name.
    pub fn new(name: &str) -> ExchangeDefinition {
        ExchangeDefinition {
            name: name.to_owned(),
            kind: ExchangeKind::Direct,
            delete: false,
            durable: false,
            internal: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn exchange_kind(&self) -> ExchangeKind {
        self.kind
    }

    /// Sets the exchange type.
    pub fn kind(mut self, kind: ExchangeKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn direct(self) -> Self {
        self.kind(ExchangeKind::Direct)
    }

    pub fn fanout(self) -> Self {
        self.kind(ExchangeKind::Fanout)
    }

    pub fn topic(self) -> Self {
        self.kind(ExchangeKind::Topic)
    }

    /// Sets the exchange to auto-delete when no longer used.
    pub fn delete(mut self) -> Self {
        self.delete = true;
        self
    }

    /// Makes the exchange durable, persisting across broker restarts.
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Makes the exchange internal, preventing direct publishing.
    pub fn internal(mut self) -> Self {
        self.internal = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_direct() {
        let def = ExchangeDefinition::new("orders");
        assert_eq!(def.exchange_kind(), ExchangeKind::Direct);
        assert!(!def.durable);
    }

    #[test]
    fn builder_sets_kind_and_flags() {
        let def = ExchangeDefinition::new("logs").topic().durable();
        assert_eq!(def.exchange_kind(), ExchangeKind::Topic);
        assert!(def.durable);
        assert_eq!(ExchangeKind::Topic.to_string(), "topic");
    }
}
