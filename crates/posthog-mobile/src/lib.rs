//! PostHog analytics client with call queueing and middleware.
//!
//! Calls made before [`PostHog::setup`] completes are queued and replayed in
//! order once the transport is configured. Capture, screen, identify and
//! alias calls pass through the registered [`Middleware`] chain before they
//! reach the [`Transport`].
//!
//! # Example
//!
//! ```rust,ignore
//! use posthog_mobile::{HttpTransport, MiddlewarePayload, Options, PostHog};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), posthog_mobile::Error> {
//!     let client = PostHog::builder()
//!         .transport(Arc::new(HttpTransport::new()?))
//!         .build()?;
//!
//!     client
//!         .catch(|err| eprintln!("analytics failure: {err}"))
//!         .middleware(|payload: MiddlewarePayload| async move {
//!             let mut context = payload.context.clone();
//!             context.insert("app", "demo");
//!             payload.next.call_with(Some(context), None)
//!         });
//!
//!     client.capture("App Started", Default::default()).await;
//!     client.setup("phc_xxx", Options::new()).await?;
//!     client.flush().await;
//!     Ok(())
//! }
//! ```

mod client;
mod config;
mod error;
mod gate;
mod http;
mod middleware;
mod queue;
mod transport;
mod types;

pub use client::{PostHog, PostHogBuilder};
pub use config::{
    configure, AndroidConfiguration, AndroidOptions, Configuration, IosConfiguration, IosOptions,
    Options, DEFAULT_FLUSH_AT, DEFAULT_FLUSH_INTERVAL, DEFAULT_HOST, DEFAULT_MAX_QUEUE_SIZE,
};
pub use error::{Error, ErrorHandler, Result};
pub use http::{HttpTransport, DEFAULT_TIMEOUT};
pub use middleware::{CallKind, Middleware, MiddlewarePayload, Next, Payload, PayloadData};
pub use transport::Transport;
pub use types::{Context, JsonMap, LIB_NAME, LIB_VERSION};
