// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Routing
//!
//! Resolves the set of queues a published message is delivered to. Direct
//! exchanges compare the routing key for exact equality, fanout exchanges
//! ignore it, and topic exchanges align the key's dot-delimited words against
//! each binding pattern, where `*` consumes exactly one word and `#` consumes
//! zero or more.
//!
//! The default exchange (`""`) routes straight to the queue named by the key.

use crate::{
    errors::BrokerError,
    exchange::{ExchangeKind, DEFAULT_EXCHANGE},
    topology::TopologyRegistry,
};
use std::{collections::BTreeSet, sync::Arc};

/// Coarse category of a message, derived from the first word of its routing
/// key when it is published.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageCategory {
    Analytics,
    Notification,
    Task,
    /// Resource events keyed as `<resource>.<action>...`
    Event(String),
    Uncategorized,
}

impl MessageCategory {
    pub fn resolve(routing_key: &str) -> Self {
        match routing_key.split_once('.') {
            Some(("analytics", _)) => MessageCategory::Analytics,
            Some(("notification", _)) => MessageCategory::Notification,
            Some(("task", _)) => MessageCategory::Task,
            Some((resource, _)) if !resource.is_empty() => {
                MessageCategory::Event(resource.to_owned())
            }
            _ => MessageCategory::Uncategorized,
        }
    }
}

/// Computes target queues against a shared topology.
#[derive(Debug, Clone)]
pub struct Router {
    topology: Arc<TopologyRegistry>,
}

impl Router {
    pub fn new(topology: Arc<TopologyRegistry>) -> Self {
        Router { topology }
    }

    /// Returns the names of every queue `routing_key` reaches through
    /// `exchange`. An empty set means the message is dropped.
    pub fn route(&self, exchange: &str, routing_key: &str) -> Result<BTreeSet<String>, BrokerError> {
        let reg = self.topology.read();

        if exchange == DEFAULT_EXCHANGE {
            let mut targets = BTreeSet::new();
            if reg.queues.contains_key(routing_key) {
                targets.insert(routing_key.to_owned());
            }
            return Ok(targets);
        }

        let entry = reg
            .exchanges
            .get(exchange)
            .ok_or_else(|| BrokerError::UnknownExchange(exchange.to_owned()))?;

        let targets = entry
            .bindings
            .iter()
            .filter(|b| match entry.kind {
                ExchangeKind::Direct => b.pattern == routing_key,
                ExchangeKind::Fanout => true,
                ExchangeKind::Topic => topic_matches(&b.pattern, routing_key),
            })
            .map(|b| b.queue.clone())
            .collect();

        Ok(targets)
    }
}

fn words(s: &str) -> Vec<&str> {
    if s.is_empty() {
        vec![]
    } else {
        s.split('.').collect()
    }
}

/// Reports whether a topic binding `pattern` matches `routing_key`.
///
/// `matched[i][j]` holds whether `pattern[i..]` aligns with `key[j..]`; the
/// table is filled from the end so `#` can either stop (zero words) or
/// swallow one more key word.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern = words(pattern);
    let key = words(routing_key);

    let mut matched = vec![vec![false; key.len() + 1]; pattern.len() + 1];
    matched[pattern.len()][key.len()] = true;

    for i in (0..pattern.len()).rev() {
        for j in (0..=key.len()).rev() {
            let has_word = j < key.len();
            matched[i][j] = match pattern[i] {
                "#" => matched[i + 1][j] || (has_word && matched[i][j + 1]),
                "*" => has_word && matched[i + 1][j + 1],
                word => has_word && key[j] == word && matched[i + 1][j + 1],
            };
        }
    }

    matched[0][0]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QueueDefinition;

    fn router_with(kind: ExchangeKind, bindings: &[(&str, &str)]) -> Router {
        let topology = Arc::new(TopologyRegistry::new());
        topology.declare_exchange("x", kind).unwrap();
        for (queue, pattern) in bindings {
            topology.declare_queue(&QueueDefinition::new(queue)).unwrap();
            topology.bind("x", queue, pattern).unwrap();
        }
        Router::new(topology)
    }

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn direct_requires_exact_case_sensitive_match() {
        let router = router_with(
            ExchangeKind::Direct,
            &[("emails", "task.email"), ("sms", "task.sms")],
        );

        assert_eq!(router.route("x", "task.email").unwrap(), set(&["emails"]));
        assert!(router.route("x", "Task.Email").unwrap().is_empty());
        assert!(router.route("x", "task").unwrap().is_empty());
        assert!(router.route("x", "task.email.extra").unwrap().is_empty());
    }

    #[test]
    fn direct_key_reaches_every_queue_bound_with_it() {
        let router = router_with(
            ExchangeKind::Direct,
            &[("a", "error"), ("b", "error"), ("c", "info")],
        );
        assert_eq!(router.route("x", "error").unwrap(), set(&["a", "b"]));
    }

    #[test]
    fn fanout_ignores_key() {
        let router = router_with(
            ExchangeKind::Fanout,
            &[("a", ""), ("b", "whatever"), ("c", "x.y")],
        );
        assert_eq!(router.route("x", "").unwrap(), set(&["a", "b", "c"]));
        assert_eq!(router.route("x", "anything").unwrap(), set(&["a", "b", "c"]));
    }

    #[test]
    fn topic_routes_by_pattern() {
        let router = router_with(
            ExchangeKind::Topic,
            &[
                ("logins", "analytics.*.login"),
                ("analytics", "analytics.#"),
                ("all", "#"),
            ],
        );

        assert_eq!(
            router.route("x", "analytics.user.login").unwrap(),
            set(&["all", "analytics", "logins"])
        );
        assert_eq!(router.route("x", "analytics").unwrap(), set(&["all", "analytics"]));
        assert_eq!(router.route("x", "user.create").unwrap(), set(&["all"]));
    }

    #[test]
    fn unmatched_publish_is_an_empty_set() {
        let router = router_with(ExchangeKind::Topic, &[("q", "a.b")]);
        assert!(router.route("x", "c.d").unwrap().is_empty());
    }

    #[test]
    fn unknown_exchange_fails() {
        let router = router_with(ExchangeKind::Direct, &[]);
        assert_eq!(
            router.route("missing", "k"),
            Err(BrokerError::UnknownExchange("missing".to_owned()))
        );
    }

    #[test]
    fn default_exchange_routes_by_queue_name() {
        let topology = Arc::new(TopologyRegistry::new());
        topology.declare_queue(&QueueDefinition::new("jobs")).unwrap();
        let router = Router::new(topology);

        assert_eq!(router.route("", "jobs").unwrap(), set(&["jobs"]));
        assert!(router.route("", "nobody").unwrap().is_empty());
    }

    #[test]
    fn star_consumes_exactly_one_word() {
        assert!(topic_matches("analytics.*.*", "analytics.user.login"));
        assert!(!topic_matches("analytics.*.*", "analytics.user"));
        assert!(topic_matches("*.error.*", "user.error.login"));
        assert!(!topic_matches("*.error.*", "error.user"));
        assert!(!topic_matches("*", ""));
        assert!(topic_matches("*", "one"));
    }

    #[test]
    fn hash_matches_any_run_of_words() {
        assert!(topic_matches("#", ""));
        assert!(topic_matches("#", "a"));
        assert!(topic_matches("#", "a.b.c"));
        assert!(topic_matches("a.#", "a"));
        assert!(topic_matches("a.#.b", "a.b"));
        assert!(topic_matches("a.#.b", "a.x.y.b"));
        assert!(!topic_matches("a.#.b", "a.x.y"));
        assert!(topic_matches("#.b", "b"));
    }

    #[test]
    fn adjacent_wildcards() {
        assert!(topic_matches("#.*", "a"));
        assert!(!topic_matches("#.*", ""));
        assert!(topic_matches("*.#", "a.b.c"));
        assert!(topic_matches("#.#", ""));
        assert!(topic_matches("a.#.#.c", "a.c"));
        assert!(topic_matches("#.*.#", "x.y"));
        assert!(!topic_matches("*.*.#", "x"));
    }

    #[test]
    fn literal_words_and_empty_words() {
        assert!(topic_matches("", ""));
        assert!(!topic_matches("", "a"));
        assert!(topic_matches("a..b", "a..b"));
        assert!(topic_matches("a.*.b", "a..b"));
        assert!(!topic_matches("a.b", "a.bc"));
    }

    #[test]
    fn category_from_first_word() {
        assert_eq!(
            MessageCategory::resolve("analytics.user.login"),
            MessageCategory::Analytics
        );
        assert_eq!(
            MessageCategory::resolve("notification.high.email"),
            MessageCategory::Notification
        );
        assert_eq!(MessageCategory::resolve("task.email"), MessageCategory::Task);
        assert_eq!(
            MessageCategory::resolve("user.create.account"),
            MessageCategory::Event("user".to_owned())
        );
        assert_eq!(MessageCategory::resolve("jobs"), MessageCategory::Uncategorized);
        assert_eq!(MessageCategory::resolve(""), MessageCategory::Uncategorized);
    }
}
