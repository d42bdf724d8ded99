// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Request/Response over Messages
//!
//! `RpcClient` publishes requests carrying a fresh correlation id and the
//! client's private reply queue, then waits for the matching reply with a
//! deadline. `RpcServer` consumes a request queue, dispatches each request
//! to the handler registered for its procedure and publishes exactly one
//! reply.
//!
//! Requests are JSON objects `{"procedure": ..., "params": ...}`. Replies
//! are `{"status": "ok", "result": ...}` or
//! `{"status": "error", "message": ...}`.

pub mod client;
mod pending;
pub mod server;

pub use client::RpcClient;
pub use server::{rpc_fn, RpcHandler, RpcServer};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Prefix of every client reply queue name.
pub const REPLY_QUEUE_PREFIX: &str = "rpc.reply.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub procedure: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RpcReply {
    Ok { result: Value },
    Error { message: String },
}
