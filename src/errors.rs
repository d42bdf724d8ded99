// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the Routing Engine
//!
//! This module provides the error taxonomy shared by every layer of the crate.
//! The `BrokerError` enum covers topology mistakes, delivery-tag misuse, RPC
//! outcomes and failures reported by the underlying transport.
//! `HandlerError` is what consumer and RPC handlers return to tell the
//! subscription loop how a delivery should be settled.

use std::time::Duration;
use thiserror::Error;

/// Represents errors that can occur while declaring topology, routing,
/// settling deliveries or performing RPC calls.
///
/// Topology and delivery-tag errors are programmer errors and are surfaced
/// immediately. RPC timeouts are ordinary outcomes callers are expected to
/// branch on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// Publishing or binding to an exchange that was never declared
    #[error("unknown exchange `{0}`")]
    UnknownExchange(String),

    /// Binding or consuming a queue that was never declared
    #[error("unknown queue `{0}`")]
    UnknownQueue(String),

    /// Redeclaring an exchange with a different kind
    #[error("exchange `{name}` already declared as `{existing}`, not `{requested}`")]
    TopologyConflict {
        name: String,
        existing: String,
        requested: String,
    },

    /// Settling a delivery tag that is not currently outstanding
    #[error("unknown delivery tag `{0}`")]
    UnknownDeliveryTag(u64),

    /// A bounded queue rejected the publish
    #[error("queue `{0}` is full")]
    QueueFull(String),

    /// No RPC response arrived before the deadline
    #[error("rpc call timed out after {0:?}")]
    RpcTimeout(Duration),

    /// The callee ran and reported a failure
    #[error("rpc remote error: {0}")]
    RpcRemoteError(String),

    /// The RPC client was closed while the call was outstanding
    #[error("rpc client closed")]
    RpcClientClosed,

    /// Any failure reported by the broker transport
    #[error("transport error: {0}")]
    TransportError(String),

    /// Failure to encode or decode a payload
    #[error("failure to (de)serialize payload: {0}")]
    SerializationError(String),

    /// Failure to load configuration
    #[error("failure to load configs: {0}")]
    ConfigError(String),
}

impl From<serde_json::Error> for BrokerError {
    fn from(err: serde_json::Error) -> Self {
        BrokerError::SerializationError(err.to_string())
    }
}

impl From<::config::ConfigError> for BrokerError {
    fn from(err: ::config::ConfigError) -> Self {
        BrokerError::ConfigError(err.to_string())
    }
}

impl From<lapin::Error> for BrokerError {
    fn from(err: lapin::Error) -> Self {
        BrokerError::TransportError(err.to_string())
    }
}

/// Outcome reported by a handler that could not process a delivery.
///
/// The subscription loop nacks `Failed` deliveries with requeue so the
/// redelivery policy can give them another attempt. `Malformed` deliveries
/// can never succeed and are nacked without requeue.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error("handler failed: {0}")]
    Failed(String),

    #[error("malformed payload: {0}")]
    Malformed(String),
}

impl HandlerError {
    pub fn failed(msg: impl Into<String>) -> Self {
        HandlerError::Failed(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        HandlerError::Malformed(msg.into())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        HandlerError::Malformed(err.to_string())
    }
}
