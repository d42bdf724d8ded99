// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RPC Server
//!
//! Serves procedures registered by name from one request queue. Every
//! request that carries `reply_to` gets exactly one reply, carrying the
//! request's correlation id.

use super::{RpcReply, RpcRequest};
use crate::{
    delivery::Delivery,
    dispatcher::{self, ConsumerHandler, SubscribeOptions, SubscriptionHandle},
    errors::{BrokerError, HandlerError},
    exchange::DEFAULT_EXCHANGE,
    message::Message,
    publisher::Publisher,
    queue::QueueDefinition,
    transport::Transport,
};
use async_trait::async_trait;
use opentelemetry::Context;
use serde_json::Value;
use std::{collections::HashMap, future::Future, marker::PhantomData, sync::Arc};
use tracing::{debug, error, warn};

/// Implements one remote procedure.
#[async_trait]
pub trait RpcHandler: Send + Sync {
    async fn call(&self, params: Value) -> Result<Value, HandlerError>;
}

pub struct RpcFn<F, Fut> {
    f: F,
    _fut: PhantomData<fn() -> Fut>,
}

/// Wraps an async closure as an `RpcHandler`.
pub fn rpc_fn<F, Fut>(f: F) -> Arc<RpcFn<F, Fut>>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    Arc::new(RpcFn {
        f,
        _fut: PhantomData,
    })
}

#[async_trait]
impl<F, Fut> RpcHandler for RpcFn<F, Fut>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    async fn call(&self, params: Value) -> Result<Value, HandlerError> {
        (self.f)(params).await
    }
}

pub struct RpcServer {
    transport: Arc<dyn Transport>,
    queue: String,
    prefetch: u16,
    handlers: HashMap<String, Arc<dyn RpcHandler>>,
}

impl RpcServer {
    pub fn new(transport: Arc<dyn Transport>, queue: &str) -> Self {
        RpcServer {
            transport,
            queue: queue.to_owned(),
            prefetch: 1,
            handlers: HashMap::default(),
        }
    }

    /// Registers `handler` for `procedure`, replacing any earlier one.
    pub fn register(mut self, procedure: &str, handler: Arc<dyn RpcHandler>) -> Self {
        self.handlers.insert(procedure.to_owned(), handler);
        self
    }

    pub fn prefetch(mut self, prefetch: u16) -> Self {
        self.prefetch = prefetch;
        self
    }

    /// Declares the request queue and starts serving it.
    pub async fn serve(self) -> Result<SubscriptionHandle, BrokerError> {
        self.transport
            .declare_queue(&QueueDefinition::new(&self.queue))
            .await?;

        let handler = Arc::new(RequestHandler {
            publisher: Publisher::new(self.transport.clone()),
            handlers: self.handlers,
        });
        debug!(queue = self.queue, "rpc server started");

        dispatcher::subscribe(
            self.transport,
            &self.queue,
            handler,
            SubscribeOptions::new(self.prefetch),
        )
        .await
    }
}

struct RequestHandler {
    publisher: Arc<Publisher>,
    handlers: HashMap<String, Arc<dyn RpcHandler>>,
}

impl RequestHandler {
    async fn reply(
        &self,
        ctx: &Context,
        delivery: &Delivery,
        reply_to: &str,
        reply: RpcReply,
    ) -> Result<(), HandlerError> {
        let mut message = Message::json(&reply).map_err(|err| HandlerError::failed(err.to_string()))?;
        if let Some(id) = delivery.message.correlation_id() {
            message = message.correlation_id(id);
        }

        self.publisher
            .publish(ctx, DEFAULT_EXCHANGE, reply_to, message)
            .await
            .map_err(|err| {
                error!(error = err.to_string(), reply_to = reply_to, "error publishing reply");
                HandlerError::failed(err.to_string())
            })
    }
}

#[async_trait]
impl ConsumerHandler for RequestHandler {
    async fn exec(&self, ctx: &Context, delivery: &Delivery) -> Result<(), HandlerError> {
        let reply_to = delivery.message.reply_to();

        let request = match delivery.decode::<RpcRequest>() {
            Ok(request) => request,
            Err(err) => {
                warn!(error = err.to_string(), "malformed rpc request");
                if let Some(reply_to) = reply_to {
                    let reply = RpcReply::Error {
                        message: err.to_string(),
                    };
                    self.reply(ctx, delivery, reply_to, reply).await?;
                }
                return Err(err);
            }
        };

        let Some(reply_to) = reply_to else {
            warn!(
                procedure = request.procedure,
                "dropping rpc request without reply_to"
            );
            return Ok(());
        };

        let reply = match self.handlers.get(&request.procedure) {
            Some(handler) => match handler.call(request.params).await {
                Ok(result) => RpcReply::Ok { result },
                Err(HandlerError::Failed(message) | HandlerError::Malformed(message)) => {
                    RpcReply::Error { message }
                }
            },
            None => {
                warn!(procedure = request.procedure, "unknown procedure");
                RpcReply::Error {
                    message: format!("unknown procedure `{}`", request.procedure),
                }
            }
        };

        self.reply(ctx, delivery, reply_to, reply).await
    }
}
