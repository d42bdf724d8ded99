// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Messages
//!
//! A `Message` is an opaque byte payload plus the properties a broker carries
//! alongside it. Messages are assembled with `MessageBuilder` and never change
//! afterwards; the routing key travels out-of-band as a publish argument.

use crate::errors::{BrokerError, HandlerError};
use serde::{de::DeserializeOwned, Serialize};
use std::{
    collections::BTreeMap,
    time::{SystemTime, UNIX_EPOCH},
};
use uuid::Uuid;

/// Default content type for JSON messages
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Scalar value stored in a message header.
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl HeaderValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeaderValue::Str(v) => Some(v),
            _ => None,
        }
    }
}

impl From<&str> for HeaderValue {
    fn from(v: &str) -> Self {
        HeaderValue::Str(v.to_owned())
    }
}

impl From<String> for HeaderValue {
    fn from(v: String) -> Self {
        HeaderValue::Str(v)
    }
}

impl From<i64> for HeaderValue {
    fn from(v: i64) -> Self {
        HeaderValue::Int(v)
    }
}

impl From<f64> for HeaderValue {
    fn from(v: f64) -> Self {
        HeaderValue::Float(v)
    }
}

impl From<bool> for HeaderValue {
    fn from(v: bool) -> Self {
        HeaderValue::Bool(v)
    }
}

pub type Headers = BTreeMap<String, HeaderValue>;

/// Immutable message payload and properties.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    payload: Vec<u8>,
    message_id: String,
    correlation_id: Option<String>,
    reply_to: Option<String>,
    timestamp: u64,
    priority: u8,
    persistent: bool,
    content_type: Option<String>,
    kind: Option<String>,
    headers: Headers,
}

impl Message {
    /// Starts building a message around a raw payload.
    pub fn builder(payload: impl Into<Vec<u8>>) -> MessageBuilder {
        MessageBuilder::new(payload.into())
    }

    /// Starts building a message whose payload is `value` encoded as JSON.
    pub fn json<T: Serialize>(value: &T) -> Result<MessageBuilder, BrokerError> {
        let payload = serde_json::to_vec(value)?;
        Ok(MessageBuilder::new(payload).content_type(JSON_CONTENT_TYPE))
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn reply_to(&self) -> Option<&str> {
        self.reply_to.as_deref()
    }

    /// Milliseconds since the Unix epoch at which the message was built.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn persistent(&self) -> bool {
        self.persistent
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Application-level message type.
    pub fn kind(&self) -> Option<&str> {
        self.kind.as_deref()
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn header(&self, key: &str) -> Option<&HeaderValue> {
        self.headers.get(key)
    }

    /// Decodes the JSON payload. Decoding failures are reported as
    /// `HandlerError::Malformed` so a handler can `?` them straight out.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, HandlerError> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// Builder for `Message`.
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    payload: Vec<u8>,
    message_id: Option<String>,
    correlation_id: Option<String>,
    reply_to: Option<String>,
    timestamp: Option<u64>,
    priority: u8,
    persistent: bool,
    content_type: Option<String>,
    kind: Option<String>,
    headers: Headers,
}

impl MessageBuilder {
    fn new(payload: Vec<u8>) -> Self {
        MessageBuilder {
            payload,
            message_id: None,
            correlation_id: None,
            reply_to: None,
            timestamp: None,
            priority: 0,
            persistent: false,
            content_type: None,
            kind: None,
            headers: Headers::default(),
        }
    }

    pub fn message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn reply_to(mut self, queue: impl Into<String>) -> Self {
        self.reply_to = Some(queue.into());
        self
    }

    pub fn timestamp(mut self, millis: u64) -> Self {
        self.timestamp = Some(millis);
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<HeaderValue>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers.extend(headers);
        self
    }

    pub(crate) fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Freezes the message, generating a message id and timestamp when none
    /// were supplied.
    pub fn build(self) -> Message {
        Message {
            payload: self.payload,
            message_id: self
                .message_id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            correlation_id: self.correlation_id,
            reply_to: self.reply_to,
            timestamp: self.timestamp.unwrap_or_else(now_millis),
            priority: self.priority,
            persistent: self.persistent,
            content_type: self.content_type,
            kind: self.kind,
            headers: self.headers,
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Email {
        to: String,
    }

    #[test]
    fn build_fills_id_and_timestamp() {
        let msg = Message::builder("hi").build();
        assert!(Uuid::parse_str(msg.message_id()).is_ok());
        assert!(msg.timestamp() > 0);
        assert_eq!(msg.priority(), 0);
        assert!(!msg.persistent());
    }

    #[test]
    fn explicit_properties_are_kept() {
        let msg = Message::builder(vec![1, 2, 3])
            .message_id("m-1")
            .correlation_id("c-1")
            .reply_to("replies")
            .priority(7)
            .persistent()
            .header("attempt", 2i64)
            .build();

        assert_eq!(msg.message_id(), "m-1");
        assert_eq!(msg.correlation_id(), Some("c-1"));
        assert_eq!(msg.reply_to(), Some("replies"));
        assert_eq!(msg.priority(), 7);
        assert!(msg.persistent());
        assert_eq!(msg.header("attempt"), Some(&HeaderValue::Int(2)));
    }

    #[test]
    fn json_payload_decodes() {
        let msg = Message::json(&Email {
            to: "user@example.com".to_owned(),
        })
        .unwrap()
        .build();

        assert_eq!(msg.content_type(), Some(JSON_CONTENT_TYPE));
        let decoded: Email = msg.decode().unwrap();
        assert_eq!(decoded.to, "user@example.com");
    }

    #[test]
    fn garbage_payload_is_malformed() {
        let msg = Message::builder("{oops").build();
        let err = msg.decode::<Email>().unwrap_err();
        assert!(matches!(err, HandlerError::Malformed(_)));
    }
}
