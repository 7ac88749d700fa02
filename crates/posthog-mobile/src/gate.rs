//! Readiness gate that holds calls back until the client is set up.

use crate::error::ErrorHandlers;
use crate::transport::Transport;
use crate::Result;
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info};

/// Deferred transport invocation.
pub(crate) type Invoker = Box<dyn FnOnce(Arc<dyn Transport>) -> BoxFuture<'static, Result<()>> + Send>;

/// A call made before the client became ready.
struct PendingCall {
    operation: &'static str,
    invoker: Invoker,
}

/// Buffers fire-and-forget calls until [`ReadinessGate::ready`] and replays
/// them in submission order.
///
/// Transport failures never reach the caller of [`ReadinessGate::run`]; they
/// go to the client's error handlers.
pub(crate) struct ReadinessGate {
    transport: Arc<dyn Transport>,
    errors: Arc<ErrorHandlers>,
    // Also held for the whole drain, so calls racing it run afterwards.
    pending: Mutex<Vec<PendingCall>>,
    ready: watch::Sender<bool>,
}

impl ReadinessGate {
    pub(crate) fn new(transport: Arc<dyn Transport>, errors: Arc<ErrorHandlers>) -> Self {
        Self {
            transport,
            errors,
            pending: Mutex::new(Vec::new()),
            ready: watch::Sender::new(false),
        }
    }

    pub(crate) fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Number of calls waiting for readiness.
    pub(crate) async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Invoke now when ready, otherwise queue the call.
    pub(crate) async fn run(&self, operation: &'static str, invoker: Invoker) {
        {
            let mut pending = self.pending.lock().await;
            if !self.is_ready() {
                pending.push(PendingCall { operation, invoker });
                debug!(operation, queued = pending.len(), "client not ready, queueing call");
                return;
            }
        }

        self.invoke(operation, invoker).await;
    }

    /// Mark the gate ready and replay queued calls in order.
    ///
    /// Only the first call has any effect.
    pub(crate) async fn ready(&self) {
        let mut pending = self.pending.lock().await;
        if self.is_ready() {
            debug!("client already ready");
            return;
        }

        let calls = std::mem::take(&mut *pending);
        info!(queued = calls.len(), "client ready, replaying queued calls");

        for call in calls {
            self.invoke(call.operation, call.invoker).await;
        }

        self.ready.send_replace(true);
    }

    /// Resolve once the gate is ready and the queue has been replayed.
    pub(crate) async fn wait(&self) {
        let mut ready = self.ready.subscribe();
        while !*ready.borrow_and_update() {
            // The sender lives as long as `self`.
            if ready.changed().await.is_err() {
                return;
            }
        }
    }

    async fn invoke(&self, operation: &'static str, invoker: Invoker) {
        if let Err(err) = invoker(self.transport.clone()).await {
            debug!(operation, error = %err, "transport call failed");
            self.errors.handle(err);
        }
    }
}

impl std::fmt::Debug for ReadinessGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadinessGate")
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}
