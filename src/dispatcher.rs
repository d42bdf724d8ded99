// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Subscription Dispatcher
//!
//! This module runs subscriptions: it attaches a consumer to a queue on any
//! `Transport`, feeds each delivery to a `ConsumerHandler` one at a time and
//! settles it from the handler's outcome. A subscription runs until its
//! `SubscriptionHandle` is cancelled or the delivery stream ends.

use crate::{
    consumer::consume,
    delivery::{ConsumerTag, Delivery},
    errors::{BrokerError, HandlerError},
    transport::Transport,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use opentelemetry::{global, Context};
use std::{future::Future, marker::PhantomData, sync::Arc};
use tokio::{sync::Notify, task::JoinHandle};
use tracing::{debug, error};

/// Processes deliveries for a subscription.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConsumerHandler: Send + Sync {
    /// Handles one delivery. `ctx` carries the trace context extracted from
    /// the message headers.
    async fn exec(&self, ctx: &Context, delivery: &Delivery) -> Result<(), HandlerError>;
}

/// Adapter turning an async closure into a `ConsumerHandler`.
pub struct HandlerFn<F, Fut> {
    f: F,
    _fut: PhantomData<fn() -> Fut>,
}

/// Wraps `f` as a handler. The closure receives its own copy of each delivery.
pub fn handler_fn<F, Fut>(f: F) -> Arc<HandlerFn<F, Fut>>
where
    F: Fn(Delivery) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(HandlerFn {
        f,
        _fut: PhantomData,
    })
}

#[async_trait]
impl<F, Fut> ConsumerHandler for HandlerFn<F, Fut>
where
    F: Fn(Delivery) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn exec(&self, _ctx: &Context, delivery: &Delivery) -> Result<(), HandlerError> {
        (self.f)(delivery.clone()).await
    }
}

/// How deliveries are settled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AckMode {
    /// The dispatcher settles every delivery from the handler outcome.
    #[default]
    Auto,
    /// The handler settles deliveries itself through the transport.
    Manual,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Maximum unsettled deliveries, `0` for unbounded
    pub prefetch: u16,
    pub ack_mode: AckMode,
}

impl SubscribeOptions {
    pub fn new(prefetch: u16) -> Self {
        SubscribeOptions {
            prefetch,
            ack_mode: AckMode::Auto,
        }
    }

    pub fn manual(mut self) -> Self {
        self.ack_mode = AckMode::Manual;
        self
    }
}

/// A running subscription.
///
/// Dropping the handle leaves the subscription running; call `cancel` to
/// stop it.
#[derive(Debug)]
pub struct SubscriptionHandle {
    consumer_tag: ConsumerTag,
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    pub fn consumer_tag(&self) -> &ConsumerTag {
        &self.consumer_tag
    }

    /// Stops the subscription after the in-progress handler call, if any,
    /// and detaches its consumer. Unsettled deliveries are returned to the
    /// queue by the transport.
    pub async fn cancel(self) {
        self.shutdown.notify_one();
        if let Err(err) = self.task.await {
            error!(error = err.to_string(), "subscription task failed");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Attaches `handler` to `queue` on `transport` and spawns the delivery loop.
pub async fn subscribe(
    transport: Arc<dyn Transport>,
    queue: &str,
    handler: Arc<dyn ConsumerHandler>,
    options: SubscribeOptions,
) -> Result<SubscriptionHandle, BrokerError> {
    let consumer = transport
        .consume(queue, options.prefetch)
        .await
        .inspect_err(|err| error!(error = err.to_string(), "error to create the consumer"))?;

    let consumer_tag = consumer.tag.clone();
    let shutdown = Arc::new(Notify::new());
    let mut stream = consumer.stream;

    let task = tokio::spawn({
        let shutdown = shutdown.clone();
        let tag = consumer_tag.clone();
        let queue = queue.to_owned();
        async move {
            let tracer = global::tracer("broker consumer");
            loop {
                let delivery = tokio::select! {
                    _ = shutdown.notified() => break,
                    next = stream.next() => match next {
                        Some(delivery) => delivery,
                        None => {
                            debug!(consumer = %tag, queue = queue, "delivery stream ended");
                            break;
                        }
                    },
                };

                if let Err(err) = consume(
                    &tracer,
                    &delivery,
                    handler.as_ref(),
                    options.ack_mode,
                    transport.as_ref(),
                )
                .await
                {
                    error!(error = err.to_string(), "error consume msg");
                }
            }

            drop(stream);
            if let Err(err) = transport.cancel(&tag).await {
                error!(error = err.to_string(), "error to cancel the consumer");
            }
            debug!(consumer = %tag, queue = queue, "subscription stopped");
        }
    });

    Ok(SubscriptionHandle {
        consumer_tag,
        shutdown,
        task,
    })
}
