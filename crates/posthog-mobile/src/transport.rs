//! The transport the client forwards calls to.

use crate::config::Configuration;
use crate::types::JsonMap;
use crate::Result;
use async_trait::async_trait;

/// Delivers analytics calls to PostHog.
///
/// Implementations own persistence, batching and retries. Every operation
/// resolves on success or fails with an error; the client decides whether
/// that error reaches the caller or the registered error handlers.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Apply a resolved configuration.
    ///
    /// A repeated setup carrying the same `json` should succeed, a
    /// conflicting one should fail.
    async fn setup(&self, config: &Configuration) -> Result<()>;

    async fn capture(&self, event: &str, properties: &JsonMap) -> Result<()>;

    async fn identify(&self, distinct_id: &str, properties: &JsonMap) -> Result<()>;

    async fn screen(&self, screen: &str, properties: &JsonMap) -> Result<()>;

    async fn alias(&self, alias: &str) -> Result<()>;

    /// Forget the identified user.
    async fn reset(&self) -> Result<()>;

    /// Upload everything queued.
    async fn flush(&self) -> Result<()>;

    async fn enable(&self) -> Result<()>;

    async fn disable(&self) -> Result<()>;

    async fn get_anonymous_id(&self) -> Result<String>;
}
