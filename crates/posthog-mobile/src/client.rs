//! PostHog client implementation.

use crate::config::{configure, Configuration, Options};
use crate::error::{ErrorHandler, ErrorHandlers};
use crate::gate::{Invoker, ReadinessGate};
use crate::middleware::{Middleware, MiddlewareChain, PayloadData};
use crate::transport::Transport;
use crate::types::{Context, JsonMap};
use crate::{Error, Result};
use futures::FutureExt;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, instrument};

/// PostHog analytics client.
///
/// Every call made before [`setup`](Self::setup) succeeds is queued and
/// replayed, in order, once the client is ready. Capture, screen, identify
/// and alias calls first pass through the registered middleware.
///
/// Fire-and-forget operations never return transport or middleware
/// failures; register a handler with [`catch`](Self::catch) to observe
/// them.
///
/// # Example
///
/// ```rust,no_run
/// use posthog_mobile::{HttpTransport, Options, PostHog};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), posthog_mobile::Error> {
///     let client = PostHog::new(Arc::new(HttpTransport::new()?));
///     client.catch(|err| eprintln!("analytics failure: {err}"));
///
///     // Queued until setup succeeds
///     client.capture("App Started", Default::default()).await;
///
///     client.setup("phc_xxx", Options::new().flush_at(1)).await?;
///     Ok(())
/// }
/// ```
pub struct PostHog {
    transport: Arc<dyn Transport>,
    gate: Arc<ReadinessGate>,
    middlewares: MiddlewareChain,
    handlers: Arc<ErrorHandlers>,
    configuration: RwLock<Option<Configuration>>,
}

impl PostHog {
    /// Create a client forwarding to `transport`.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let handlers = Arc::new(ErrorHandlers::default());
        let gate = Arc::new(ReadinessGate::new(transport.clone(), handlers.clone()));

        Self {
            transport,
            middlewares: MiddlewareChain::new(gate.clone()),
            gate,
            handlers,
            configuration: RwLock::new(None),
        }
    }

    /// Create a new builder.
    pub fn builder() -> PostHogBuilder {
        PostHogBuilder::default()
    }

    /// Whether setup has completed and queued calls were replayed.
    pub fn is_ready(&self) -> bool {
        self.gate.is_ready()
    }

    /// Configuration applied by the last successful [`setup`](Self::setup).
    pub fn configuration(&self) -> Option<Configuration> {
        match self.configuration.read() {
            Ok(configuration) => configuration.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Number of calls waiting for setup.
    pub async fn pending_call_count(&self) -> usize {
        self.gate.pending_len().await
    }

    // ============================================
    // REGISTRATION
    // ============================================

    /// Register a handler for failures of fire-and-forget calls.
    ///
    /// Handlers run in registration order. With no handler registered a
    /// failure is logged as `Uncaught PostHog error`.
    /// [`get_anonymous_id`](Self::get_anonymous_id) returns its failures
    /// directly instead.
    pub fn catch<F>(&self, handler: F) -> &Self
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        let handler: ErrorHandler = Arc::new(handler);
        self.handlers.push(handler);
        self
    }

    /// Append a middleware to the chain.
    pub fn middleware<M: Middleware>(&self, middleware: M) -> &Self {
        self.middlewares.add(Arc::new(middleware));
        self
    }

    // ============================================
    // LIFECYCLE
    // ============================================

    /// Configure the transport and replay every queued call.
    ///
    /// Unset options fall back to their defaults. The transport's failure is
    /// returned and queued calls stay queued.
    #[instrument(skip(self, api_key, options))]
    pub async fn setup(&self, api_key: impl Into<String>, options: Options) -> Result<()> {
        let config = configure(api_key, &options)?;

        debug!(host = %config.host, flush_at = config.flush_at, "configuring transport");
        self.transport.setup(&config).await?;

        match self.configuration.write() {
            Ok(mut configuration) => *configuration = Some(config),
            Err(poisoned) => *poisoned.into_inner() = Some(config),
        }

        self.gate.ready().await;
        info!("PostHog client ready");

        Ok(())
    }

    /// Mark the client ready when the transport was configured natively.
    ///
    /// Fails with [`Error::AlreadyConfigured`] once the client is ready.
    #[instrument(skip(self))]
    pub async fn use_native_configuration(&self) -> Result<&Self> {
        if self.is_ready() {
            return Err(Error::AlreadyConfigured);
        }

        self.gate.ready().await;
        Ok(self)
    }

    // ============================================
    // CALLS
    // ============================================

    /// Record an action the user performed.
    pub async fn capture(&self, event: impl Into<String>, properties: JsonMap) {
        self.run_middlewares(PayloadData::Capture {
            event: event.into(),
            properties,
        })
        .await;
    }

    /// Record a screen the user viewed.
    pub async fn screen(&self, screen: impl Into<String>, properties: JsonMap) {
        self.run_middlewares(PayloadData::Screen {
            screen: screen.into(),
            properties,
        })
        .await;
    }

    /// Associate the user with `distinct_id` and record traits about them.
    pub async fn identify(&self, distinct_id: impl Into<String>, properties: JsonMap) {
        self.run_middlewares(PayloadData::Identify {
            distinct_id: distinct_id.into(),
            properties,
        })
        .await;
    }

    /// Link `alias` to the current distinct id.
    pub async fn alias(&self, alias: impl Into<String>) {
        self.run_middlewares(PayloadData::Alias {
            alias: alias.into(),
        })
        .await;
    }

    /// Clear the identified user cached by the transport.
    pub async fn reset(&self) {
        self.gate
            .run("reset", invoker(|transport| async move { transport.reset().await }))
            .await;
    }

    /// Ask the transport to upload everything it has queued.
    pub async fn flush(&self) {
        self.gate
            .run("flush", invoker(|transport| async move { transport.flush().await }))
            .await;
    }

    /// Resume sending data.
    pub async fn enable(&self) {
        self.gate
            .run("enable", invoker(|transport| async move { transport.enable().await }))
            .await;
    }

    /// Stop sending any data.
    pub async fn disable(&self) {
        self.gate
            .run("disable", invoker(|transport| async move { transport.disable().await }))
            .await;
    }

    /// Retrieve the anonymous id.
    ///
    /// Waits for the client to become ready. Failures are returned.
    pub async fn get_anonymous_id(&self) -> Result<String> {
        self.gate.wait().await;
        self.transport.get_anonymous_id().await
    }

    // ============================================
    // INTERNAL
    // ============================================

    fn context(&self) -> Context {
        let context = match self.configuration.read() {
            Ok(configuration) => configuration.as_ref().map(|c| c.context.clone()),
            Err(poisoned) => poisoned.into_inner().as_ref().map(|c| c.context.clone()),
        };
        context.unwrap_or_default()
    }

    async fn run_middlewares(&self, data: PayloadData) {
        let kind = data.kind();
        if let Err(err) = self.middlewares.run(self.context(), data).await {
            debug!(%kind, error = %err, "middleware chain rejected call");
            self.handlers.handle(err);
        }
    }
}

fn invoker<F, Fut>(call: F) -> Invoker
where
    F: FnOnce(Arc<dyn Transport>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<()>> + Send + 'static,
{
    Box::new(move |transport: Arc<dyn Transport>| call(transport).boxed())
}

impl std::fmt::Debug for PostHog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostHog")
            .field("ready", &self.is_ready())
            .field("middlewares", &self.middlewares.len())
            .field("handlers", &self.handlers)
            .finish_non_exhaustive()
    }
}

/// Builder for [`PostHog`].
#[derive(Default)]
pub struct PostHogBuilder {
    transport: Option<Arc<dyn Transport>>,
}

impl PostHogBuilder {
    /// Set the transport calls are forwarded to.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Build the client.
    ///
    /// Fails with [`Error::NotLinked`] when no transport was set.
    pub fn build(self) -> Result<PostHog> {
        let transport = self.transport.ok_or(Error::NotLinked)?;
        Ok(PostHog::new(transport))
    }
}

impl std::fmt::Debug for PostHogBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostHogBuilder")
            .field("transport", &self.transport.is_some())
            .finish()
    }
}
