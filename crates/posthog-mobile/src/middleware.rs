//! Middleware pipeline applied to capture, screen, identify and alias calls.
//!
//! Middleware run in registration order. Each one receives the payload and a
//! single-use [`Next`] continuation; calling it hands the (possibly rewritten)
//! payload to the following middleware. A middleware that never calls it
//! holds that call back forever.
//!
//! ```rust,ignore
//! client.middleware(|payload: MiddlewarePayload| async move {
//!     let mut context = payload.context.clone();
//!     context.insert("integrations", json!({ "Mixpanel": false }));
//!     payload.next.call_with(Some(context), None)
//! });
//! ```

use crate::gate::{Invoker, ReadinessGate};
use crate::transport::Transport;
use crate::types::{Context, JsonMap};
use crate::{Error, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::oneshot;
use tracing::debug;

/// Kind of call travelling through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    Capture,
    Screen,
    Identify,
    Alias,
}

impl CallKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallKind::Capture => "capture",
            CallKind::Screen => "screen",
            CallKind::Identify => "identify",
            CallKind::Alias => "alias",
        }
    }
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific data of a call.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadData {
    Capture { event: String, properties: JsonMap },
    Screen { screen: String, properties: JsonMap },
    Identify { distinct_id: String, properties: JsonMap },
    Alias { alias: String },
}

impl PayloadData {
    pub fn kind(&self) -> CallKind {
        match self {
            PayloadData::Capture { .. } => CallKind::Capture,
            PayloadData::Screen { .. } => CallKind::Screen,
            PayloadData::Identify { .. } => CallKind::Identify,
            PayloadData::Alias { .. } => CallKind::Alias,
        }
    }

    /// Properties of the call, if its kind has any.
    pub fn properties(&self) -> Option<&JsonMap> {
        match self {
            PayloadData::Capture { properties, .. }
            | PayloadData::Screen { properties, .. }
            | PayloadData::Identify { properties, .. } => Some(properties),
            PayloadData::Alias { .. } => None,
        }
    }

    pub fn properties_mut(&mut self) -> Option<&mut JsonMap> {
        match self {
            PayloadData::Capture { properties, .. }
            | PayloadData::Screen { properties, .. }
            | PayloadData::Identify { properties, .. } => Some(properties),
            PayloadData::Alias { .. } => None,
        }
    }
}

/// A call after every middleware has run.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    pub context: Context,
    pub data: PayloadData,
}

impl Payload {
    pub fn kind(&self) -> CallKind {
        self.data.kind()
    }
}

/// What a middleware receives.
pub struct MiddlewarePayload {
    pub kind: CallKind,
    pub context: Context,
    pub data: PayloadData,
    pub next: Next,
}

impl fmt::Debug for MiddlewarePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewarePayload")
            .field("kind", &self.kind)
            .field("context", &self.context)
            .field("data", &self.data)
            .finish_non_exhaustive()
    }
}

struct Advance {
    context: Option<Context>,
    data: Option<PayloadData>,
}

struct NextState {
    called: AtomicBool,
    called_twice: AtomicBool,
    advance: Mutex<Option<oneshot::Sender<Result<Advance>>>>,
}

impl NextState {
    fn called_twice(&self) -> bool {
        self.called_twice.load(Ordering::SeqCst)
    }

    fn send(&self, outcome: Result<Advance>) {
        let sender = match self.advance.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(sender) = sender {
            let _ = sender.send(outcome);
        }
    }
}

/// Single-use continuation handed to a middleware.
///
/// It can be called from the middleware body or from work the middleware
/// spawned. A second call fails with
/// [`Error::MiddlewareNextCalledTwice`] and rejects the whole call.
pub struct Next {
    kind: CallKind,
    state: Arc<NextState>,
}

impl Next {
    fn new(kind: CallKind) -> (Self, oneshot::Receiver<Result<Advance>>) {
        let (tx, rx) = oneshot::channel();
        let state = Arc::new(NextState {
            called: AtomicBool::new(false),
            called_twice: AtomicBool::new(false),
            advance: Mutex::new(Some(tx)),
        });
        (Self { kind, state }, rx)
    }

    /// Continue with the payload unchanged.
    pub fn call(&self) -> Result<()> {
        self.call_with(None, None)
    }

    /// Continue, merging `context` into the current context and replacing
    /// the data with `data` when given.
    ///
    /// Replacement data must be of the same kind as the call.
    pub fn call_with(&self, context: Option<Context>, data: Option<PayloadData>) -> Result<()> {
        if self.state.called.swap(true, Ordering::SeqCst) {
            self.state.called_twice.store(true, Ordering::SeqCst);
            return Err(Error::MiddlewareNextCalledTwice);
        }

        if let Some(found) = data.as_ref().map(PayloadData::kind) {
            if found != self.kind {
                let mismatch = || Error::PayloadKindMismatch {
                    expected: self.kind,
                    found,
                };
                self.state.send(Err(mismatch()));
                return Err(mismatch());
            }
        }

        self.state.send(Ok(Advance { context, data }));
        Ok(())
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("kind", &self.kind)
            .field("called", &self.state.called.load(Ordering::SeqCst))
            .finish()
    }
}

/// Interceptor for outgoing calls.
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    /// Inspect the payload and advance the chain through `payload.next`.
    async fn handle(&self, payload: MiddlewarePayload) -> Result<()>;
}

#[async_trait]
impl<F, Fut> Middleware for F
where
    F: Fn(MiddlewarePayload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn handle(&self, payload: MiddlewarePayload) -> Result<()> {
        (self)(payload).await
    }
}

type Chain = Arc<[Arc<dyn Middleware>]>;

/// Ordered middleware list feeding the readiness gate.
pub(crate) struct MiddlewareChain {
    middlewares: RwLock<Vec<Arc<dyn Middleware>>>,
    gate: Arc<ReadinessGate>,
}

impl MiddlewareChain {
    pub(crate) fn new(gate: Arc<ReadinessGate>) -> Self {
        Self {
            middlewares: RwLock::new(Vec::new()),
            gate,
        }
    }

    pub(crate) fn add(&self, middleware: Arc<dyn Middleware>) {
        match self.middlewares.write() {
            Ok(mut middlewares) => middlewares.push(middleware),
            Err(poisoned) => poisoned.into_inner().push(middleware),
        }
    }

    pub(crate) fn len(&self) -> usize {
        match self.middlewares.read() {
            Ok(middlewares) => middlewares.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Run every middleware and return the final payload.
    pub(crate) async fn resolve(&self, context: Context, data: PayloadData) -> Result<Payload> {
        let chain: Chain = match self.middlewares.read() {
            Ok(middlewares) => middlewares.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        };
        debug!(kind = %data.kind(), middlewares = chain.len(), "running middleware chain");
        exec(chain, 0, context, data).await
    }

    /// Resolve the payload and hand it to the gate.
    pub(crate) async fn run(&self, context: Context, data: PayloadData) -> Result<()> {
        let payload = self.resolve(context, data).await?;
        let (operation, invoker) = dispatch(payload.data);
        self.gate.run(operation, invoker).await;
        Ok(())
    }
}

fn exec(chain: Chain, index: usize, context: Context, data: PayloadData) -> BoxFuture<'static, Result<Payload>> {
    async move {
        let Some(middleware) = chain.get(index).cloned() else {
            return Ok(Payload { context, data });
        };

        let kind = data.kind();
        let (next, advanced) = Next::new(kind);
        let state = next.state.clone();
        let payload = MiddlewarePayload {
            kind,
            context: context.clone(),
            data: data.clone(),
            next,
        };

        let outcome = middleware.handle(payload).await;
        if state.called_twice() {
            return Err(Error::MiddlewareNextCalledTwice);
        }
        outcome?;

        // `state` keeps the sender alive, so a middleware that never calls
        // `next` leaves this call pending.
        let Advance {
            context: context_override,
            data: data_override,
        } = match advanced.await {
            Ok(advance) => advance?,
            Err(_) => return std::future::pending().await,
        };

        let mut context = context;
        if let Some(overrides) = context_override {
            context.merge(overrides);
        }
        let data = data_override.unwrap_or(data);

        exec(chain, index + 1, context, data).await
    }
    .boxed()
}

/// Bind the final payload to its transport operation.
fn dispatch(data: PayloadData) -> (&'static str, Invoker) {
    match data {
        PayloadData::Capture { event, properties } => (
            "capture",
            Box::new(move |transport: Arc<dyn Transport>| async move { transport.capture(&event, &properties).await }.boxed()),
        ),
        PayloadData::Screen { screen, properties } => (
            "screen",
            Box::new(move |transport: Arc<dyn Transport>| async move { transport.screen(&screen, &properties).await }.boxed()),
        ),
        PayloadData::Identify {
            distinct_id,
            properties,
        } => (
            "identify",
            Box::new(move |transport: Arc<dyn Transport>| {
                async move { transport.identify(&distinct_id, &properties).await }.boxed()
            }),
        ),
        PayloadData::Alias { alias } => (
            "alias",
            Box::new(move |transport: Arc<dyn Transport>| async move { transport.alias(&alias).await }.boxed()),
        ),
    }
}
