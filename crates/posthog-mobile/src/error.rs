//! Error types for the PostHog client.

use crate::middleware::CallKind;
use std::sync::{Arc, RwLock};
use tracing::error;

/// Errors that can occur when using the PostHog client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No transport was supplied to the client.
    #[error("PostHog transport is not linked")]
    NotLinked,

    /// The client was already configured through `setup`.
    #[error("PostHog has already been configured")]
    AlreadyConfigured,

    /// A middleware advanced the chain more than once.
    #[error("middleware payload next() can only be called one time")]
    MiddlewareNextCalledTwice,

    /// A middleware replaced the payload data with data of another kind.
    #[error("middleware replaced {expected} data with {found} data")]
    PayloadKindMismatch { expected: CallKind, found: CallKind },

    /// A middleware failed before advancing the chain.
    #[error("middleware failed: {0}")]
    Middleware(Box<dyn std::error::Error + Send + Sync>),

    /// The transport rejected a call.
    #[error("transport error: {0}")]
    Transport(String),

    /// The transport was used before its own setup.
    #[error("transport is not configured")]
    NotConfigured,

    /// The transport has been shut down.
    #[error("transport has been shut down")]
    Shutdown,

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Api { status: u16, body: String },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Wrap an arbitrary failure raised inside a middleware.
    pub fn middleware(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Error::Middleware(err.into())
    }

    /// Build a transport rejection from a message.
    pub fn transport(message: impl Into<String>) -> Self {
        Error::Transport(message.into())
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Callback invoked for failures of fire-and-forget calls.
pub type ErrorHandler = Arc<dyn Fn(&Error) + Send + Sync>;

/// Registered error handlers, in registration order.
#[derive(Default)]
pub(crate) struct ErrorHandlers {
    handlers: RwLock<Vec<ErrorHandler>>,
}

impl ErrorHandlers {
    pub(crate) fn push(&self, handler: ErrorHandler) {
        match self.handlers.write() {
            Ok(mut handlers) => handlers.push(handler),
            Err(poisoned) => poisoned.into_inner().push(handler),
        }
    }

    pub(crate) fn len(&self) -> usize {
        match self.handlers.read() {
            Ok(handlers) => handlers.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Hand an error to every handler, or log it when nobody listens.
    pub(crate) fn handle(&self, err: Error) {
        // Snapshot so a handler may register another handler.
        let handlers: Vec<ErrorHandler> = match self.handlers.read() {
            Ok(handlers) => handlers.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };

        if handlers.is_empty() {
            error!(error = %err, "Uncaught PostHog error");
            return;
        }

        for handler in &handlers {
            handler(&err);
        }
    }
}

impl std::fmt::Debug for ErrorHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorHandlers")
            .field("count", &self.len())
            .finish()
    }
}
