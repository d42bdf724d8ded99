// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

use crate::errors::BrokerError;
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use tokio::{sync::oneshot, time::Instant};
use tracing::debug;

pub(crate) type ReplySlot = oneshot::Receiver<Result<Vec<u8>, BrokerError>>;

struct PendingCall {
    deadline: Instant,
    timeout: Duration,
    slot: oneshot::Sender<Result<Vec<u8>, BrokerError>>,
}

#[derive(Default)]
struct State {
    calls: HashMap<String, PendingCall>,
    closed: bool,
}

/// Outstanding calls of one client, keyed by correlation id.
#[derive(Default)]
pub(crate) struct PendingCalls {
    state: Mutex<State>,
}

impl PendingCalls {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a call and returns its reply slot together with the
    /// deadline the caller must wait on.
    pub(crate) fn register(
        &self,
        id: &str,
        timeout: Duration,
    ) -> Result<(ReplySlot, Instant), BrokerError> {
        let mut state = self.lock();
        if state.closed {
            return Err(BrokerError::RpcClientClosed);
        }

        let (slot, receiver) = oneshot::channel();
        let deadline = Instant::now() + timeout;
        state.calls.insert(
            id.to_owned(),
            PendingCall {
                deadline,
                timeout,
                slot,
            },
        );
        Ok((receiver, deadline))
    }

    /// Hands `payload` to the call waiting on `id`. Returns `false` when no
    /// live call matches; such replies are stale or foreign. A reply past
    /// the deadline fails the call with `RpcTimeout`.
    pub(crate) fn complete(&self, id: &str, payload: Vec<u8>) -> bool {
        let Some(call) = self.lock().calls.remove(id) else {
            return false;
        };
        if Instant::now() >= call.deadline {
            debug!(correlation_id = id, "reply arrived after the deadline");
            let _ = call.slot.send(Err(BrokerError::RpcTimeout(call.timeout)));
            return false;
        }
        call.slot.send(Ok(payload)).is_ok()
    }

    pub(crate) fn remove(&self, id: &str) -> bool {
        self.lock().calls.remove(id).is_some()
    }

    /// Fails every outstanding call and refuses new ones.
    pub(crate) fn close(&self) {
        let calls = {
            let mut state = self.lock();
            state.closed = true;
            std::mem::take(&mut state.calls)
        };
        for (_, call) in calls {
            let _ = call.slot.send(Err(BrokerError::RpcClientClosed));
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().calls.len()
    }
}

/// Removes a pending call when the waiting future goes away.
pub(crate) struct PendingGuard<'a> {
    calls: &'a PendingCalls,
    id: &'a str,
}

impl<'a> PendingGuard<'a> {
    pub(crate) fn new(calls: &'a PendingCalls, id: &'a str) -> Self {
        PendingGuard { calls, id }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.calls.remove(self.id);
    }
}
