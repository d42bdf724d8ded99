// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RPC Client
//!
//! Each client owns one exclusive, auto-delete reply queue and a background
//! task draining it. A reply completes the call whose correlation id it
//! carries; every other reply is acked and discarded.

use super::{
    pending::{PendingCalls, PendingGuard},
    RpcReply, RpcRequest, REPLY_QUEUE_PREFIX,
};
use crate::{
    config::RpcConfig,
    delivery::ConsumerTag,
    errors::BrokerError,
    exchange::DEFAULT_EXCHANGE,
    message::Message,
    publisher::Publisher,
    queue::QueueDefinition,
    transport::{DeliveryStream, Transport},
};
use futures_util::StreamExt;
use opentelemetry::Context;
use serde::{de::DeserializeOwned, Serialize};
use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;

pub struct RpcClient {
    transport: Arc<dyn Transport>,
    publisher: Arc<Publisher>,
    exchange: String,
    routing_key: String,
    reply_queue: String,
    consumer_tag: ConsumerTag,
    default_timeout: Duration,
    pending: Arc<PendingCalls>,
    reply_task: Mutex<Option<JoinHandle<()>>>,
}

impl RpcClient {
    /// Creates a client that sends requests to `exchange` with `routing_key`.
    ///
    /// Declares the client's reply queue and starts consuming it.
    pub async fn connect(
        transport: Arc<dyn Transport>,
        exchange: &str,
        routing_key: &str,
        default_timeout: Duration,
    ) -> Result<Self, BrokerError> {
        let reply_queue = format!("{}{}", REPLY_QUEUE_PREFIX, Uuid::new_v4());
        transport
            .declare_queue(&QueueDefinition::new(&reply_queue).exclusive().delete())
            .await
            .inspect_err(|err| error!(error = err.to_string(), "error to declare the reply queue"))?;

        let consumer = transport.consume(&reply_queue, 0).await?;
        let pending = Arc::new(PendingCalls::default());
        let reply_task = tokio::spawn(reply_loop(
            consumer.stream,
            pending.clone(),
            transport.clone(),
        ));
        debug!(reply_queue = reply_queue, "rpc client ready");

        Ok(RpcClient {
            publisher: Publisher::new(transport.clone()),
            transport,
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
            reply_queue,
            consumer_tag: consumer.tag,
            default_timeout,
            pending,
            reply_task: Mutex::new(Some(reply_task)),
        })
    }

    /// Creates a client for the request queue named in `cfg`, reached
    /// through the default exchange.
    pub async fn from_config(
        transport: Arc<dyn Transport>,
        cfg: &RpcConfig,
    ) -> Result<Self, BrokerError> {
        Self::connect(transport, DEFAULT_EXCHANGE, &cfg.request_queue, cfg.timeout()).await
    }

    pub fn reply_queue(&self) -> &str {
        &self.reply_queue
    }

    /// Number of calls waiting for a reply.
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    /// Calls `procedure` and waits at most `timeout` for the reply. The
    /// deadline is set before the request is published, so a slow publish
    /// counts against it.
    ///
    /// Dropping the returned future abandons the call; a reply that arrives
    /// afterwards is discarded.
    pub async fn call<P, R>(
        &self,
        procedure: &str,
        params: &P,
        timeout: Duration,
    ) -> Result<R, BrokerError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let request = RpcRequest {
            procedure: procedure.to_owned(),
            params: serde_json::to_value(params)?,
        };
        let correlation_id = Uuid::new_v4().to_string();

        let (reply, deadline) = self.pending.register(&correlation_id, timeout)?;
        let _guard = PendingGuard::new(&self.pending, &correlation_id);

        let message = Message::json(&request)?
            .correlation_id(correlation_id.as_str())
            .reply_to(self.reply_queue.as_str())
            .kind(procedure);
        self.publisher
            .publish(&Context::current(), &self.exchange, &self.routing_key, message)
            .await?;

        let payload = match tokio::time::timeout_at(deadline, reply).await {
            Ok(Ok(reply)) => reply?,
            Ok(Err(_)) => return Err(BrokerError::RpcClientClosed),
            Err(_) => {
                warn!(
                    procedure = procedure,
                    correlation_id = correlation_id,
                    "rpc call timed out"
                );
                return Err(BrokerError::RpcTimeout(timeout));
            }
        };

        match serde_json::from_slice(&payload)? {
            RpcReply::Ok { result } => Ok(serde_json::from_value(result)?),
            RpcReply::Error { message } => Err(BrokerError::RpcRemoteError(message)),
        }
    }

    /// `call` with the client's default timeout.
    pub async fn invoke<P, R>(&self, procedure: &str, params: &P) -> Result<R, BrokerError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.call(procedure, params, self.default_timeout).await
    }

    /// Fails every outstanding call with `RpcClientClosed`, refuses new
    /// calls and stops consuming the reply queue.
    pub async fn close(&self) {
        self.pending.close();

        let task = self
            .reply_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(task) = task else {
            return;
        };
        task.abort();

        if let Err(err) = self.transport.cancel(&self.consumer_tag).await {
            error!(error = err.to_string(), "error to cancel the reply consumer");
        }
        debug!(reply_queue = self.reply_queue, "rpc client closed");
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.pending.close();
        if let Some(task) = self
            .reply_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

async fn reply_loop(
    mut stream: DeliveryStream,
    pending: Arc<PendingCalls>,
    transport: Arc<dyn Transport>,
) {
    while let Some(delivery) = stream.next().await {
        let matched = delivery
            .message
            .correlation_id()
            .is_some_and(|id| pending.complete(id, delivery.message.payload().to_vec()));

        if !matched {
            debug!(
                correlation_id = delivery.message.correlation_id(),
                "discarding unmatched reply"
            );
        }

        if let Err(err) = transport.ack(delivery.tag).await {
            error!(error = err.to_string(), "error whiling ack reply");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Consumer, MockTransport};
    use serde_json::{json, Value};

    fn transport_failing_publish() -> MockTransport {
        let mut transport = MockTransport::new();
        transport.expect_declare_queue().returning(|_| Ok(()));
        transport.expect_consume().returning(|_, _| {
            Ok(Consumer {
                tag: ConsumerTag("ctag-reply".to_owned()),
                stream: futures_util::stream::pending().boxed(),
            })
        });
        transport
            .expect_publish()
            .returning(|_, _, _| Err(BrokerError::TransportError("connection reset".to_owned())));
        transport.expect_cancel().returning(|_| Ok(()));
        transport
    }

    #[tokio::test]
    async fn publish_failure_surfaces_and_clears_the_call() {
        let client = RpcClient::connect(
            Arc::new(transport_failing_publish()),
            "",
            "rpc_queue",
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        assert!(client.reply_queue().starts_with(REPLY_QUEUE_PREFIX));

        let result: Result<Value, _> = client.invoke("echo", &json!({"a": 1})).await;
        assert_eq!(
            result,
            Err(BrokerError::TransportError("connection reset".to_owned()))
        );
        assert_eq!(client.pending_calls(), 0);
    }

    #[tokio::test]
    async fn closed_client_refuses_calls() {
        let client = RpcClient::connect(
            Arc::new(transport_failing_publish()),
            "",
            "rpc_queue",
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        client.close().await;

        let result: Result<Value, _> = client.invoke("echo", &json!(null)).await;
        assert_eq!(result, Err(BrokerError::RpcClientClosed));
    }
}
