//! HTTP transport that uploads events to the PostHog batch API.

use crate::config::Configuration;
use crate::queue::EventQueue;
use crate::transport::Transport;
use crate::types::{BatchEvent, BatchPayload, JsonMap};
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::interval;
use tracing::{debug, error, info, instrument, warn};

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Transport that batches events in memory and posts them to
/// `{host}/batch/`.
///
/// Events are uploaded when the queue reaches `flushAt`, every
/// `flushInterval`, on [`Transport::flush`] and on [`shutdown`](Self::shutdown).
/// A failed upload puts the events back at the front of the queue.
#[derive(Debug)]
pub struct HttpTransport {
    inner: Arc<Inner>,
    flush_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

#[derive(Debug)]
struct Inner {
    client: reqwest::Client,
    session: Mutex<Session>,
    queue: EventQueue,
    is_shutdown: AtomicBool,
}

#[derive(Debug)]
struct Session {
    config: Option<Configuration>,
    endpoint: String,
    distinct_id: Option<String>,
    anonymous_id: String,
    enabled: bool,
}

impl Session {
    fn config(&self) -> Result<&Configuration> {
        self.config.as_ref().ok_or(Error::NotConfigured)
    }

    fn distinct_id(&self) -> String {
        self.distinct_id
            .clone()
            .unwrap_or_else(|| self.anonymous_id.clone())
    }
}

fn new_anonymous_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn batch_endpoint(host: &str) -> String {
    format!("{}/batch/", host.trim_end_matches('/'))
}

impl HttpTransport {
    /// Create a transport with the default request timeout.
    pub fn new() -> Result<Self> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    /// Create a transport with a custom request timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            inner: Arc::new(Inner {
                client,
                session: Mutex::new(Session {
                    config: None,
                    endpoint: String::new(),
                    distinct_id: None,
                    anonymous_id: new_anonymous_id(),
                    enabled: true,
                }),
                queue: EventQueue::new(
                    crate::config::DEFAULT_FLUSH_AT as usize,
                    crate::config::DEFAULT_MAX_QUEUE_SIZE as usize,
                ),
                is_shutdown: AtomicBool::new(false),
            }),
            flush_handle: Mutex::new(None),
        })
    }

    /// Get the number of events waiting for upload.
    pub async fn pending_event_count(&self) -> usize {
        self.inner.queue.len().await
    }

    /// Stop the flush timer and upload what is left.
    ///
    /// Every later call fails with [`Error::Shutdown`].
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<()> {
        if self.inner.is_shutdown.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        info!("shutting down transport");

        if let Some(handle) = self.flush_handle.lock().await.take() {
            handle.abort();
        }

        if self.inner.session.lock().await.config.is_none() {
            return Ok(());
        }

        self.inner.upload().await
    }

    async fn start_flush_timer(&self, flush_interval: Duration) {
        if flush_interval.is_zero() {
            debug!("flush interval is zero, periodic flush disabled");
            return;
        }

        let inner = self.inner.clone();

        let handle = tokio::spawn(async move {
            let mut timer = interval(flush_interval);
            // The first tick fires immediately.
            timer.tick().await;

            loop {
                timer.tick().await;

                if inner.is_shutdown.load(Ordering::SeqCst) {
                    break;
                }

                if inner.queue.is_empty().await {
                    continue;
                }

                debug!("periodic flush");
                if let Err(e) = inner.upload().await {
                    error!(error = %e, "periodic flush failed");
                }
            }
        });

        if let Some(previous) = self.flush_handle.lock().await.replace(handle) {
            previous.abort();
        }
    }
}

impl Inner {
    fn ensure_not_shutdown(&self) -> Result<()> {
        if self.is_shutdown.load(Ordering::SeqCst) {
            return Err(Error::Shutdown);
        }
        Ok(())
    }

    /// Queue an event for the current user and flush when the threshold is hit.
    async fn record(&self, event: &str, mut properties: JsonMap) -> Result<()> {
        self.ensure_not_shutdown()?;

        let event = {
            let session = self.session.lock().await;
            let config = session.config()?;

            if !session.enabled {
                debug!(event, "transport disabled, dropping event");
                return Ok(());
            }

            let distinct_id = session.distinct_id();
            for (key, value) in config.context.as_map() {
                properties
                    .entry(key.clone())
                    .or_insert_with(|| value.clone());
            }
            properties.insert("distinct_id".into(), Value::from(distinct_id.clone()));

            BatchEvent {
                event: event.to_string(),
                distinct_id,
                properties,
                timestamp: chrono::Utc::now(),
            }
        };

        self.queue.enqueue(event).await;

        if self.queue.should_flush().await {
            self.upload().await?;
        }

        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        self.ensure_not_shutdown()?;
        self.upload().await
    }

    /// Send everything queued as one batch, requeuing it on failure.
    async fn upload(&self) -> Result<()> {
        let (api_key, endpoint) = {
            let session = self.session.lock().await;
            (session.config()?.api_key.clone(), session.endpoint.clone())
        };

        let events = self.queue.drain().await;
        if events.is_empty() {
            return Ok(());
        }

        info!(event_count = events.len(), "flushing events");

        if let Err(e) = self.send(&api_key, &endpoint, &events).await {
            error!(error = %e, "flush failed, requeuing events");
            self.queue.requeue(events).await;
            return Err(e);
        }

        Ok(())
    }

    async fn send(&self, api_key: &str, endpoint: &str, events: &[BatchEvent]) -> Result<()> {
        debug!(endpoint, event_count = events.len(), "sending events");

        let payload = BatchPayload {
            api_key,
            batch: events,
        };

        let response = self
            .client
            .post(endpoint)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_else(|_| "Unknown error".into());
            warn!(status = %status, body = %body, "API request failed");
            return Err(Error::Api {
                status: status.as_u16(),
                body,
            });
        }

        debug!("events sent successfully");
        Ok(())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn setup(&self, config: &Configuration) -> Result<()> {
        self.inner.ensure_not_shutdown()?;

        {
            let mut session = self.inner.session.lock().await;

            if let Some(existing) = &session.config {
                if existing.json == config.json {
                    debug!("transport already configured with identical settings");
                    return Ok(());
                }
                return Err(Error::transport(
                    "PostHog client was configured multiple times with different settings",
                ));
            }

            session.endpoint = batch_endpoint(&config.host);
            session.config = Some(config.clone());
        }

        self.inner
            .queue
            .resize(config.flush_at as usize, config.ios.max_queue_size as usize);
        self.start_flush_timer(config.flush_interval()).await;

        info!(host = %config.host, "transport configured");
        Ok(())
    }

    async fn capture(&self, event: &str, properties: &JsonMap) -> Result<()> {
        self.inner.record(event, properties.clone()).await
    }

    async fn identify(&self, distinct_id: &str, properties: &JsonMap) -> Result<()> {
        self.inner.ensure_not_shutdown()?;

        let anonymous_id = {
            let mut session = self.inner.session.lock().await;
            session.config()?;
            session.distinct_id = Some(distinct_id.to_string());
            session.anonymous_id.clone()
        };

        let mut event_properties = JsonMap::new();
        event_properties.insert("$set".into(), Value::Object(properties.clone()));
        event_properties.insert("$anon_distinct_id".into(), Value::from(anonymous_id));

        self.inner.record("$identify", event_properties).await
    }

    async fn screen(&self, screen: &str, properties: &JsonMap) -> Result<()> {
        let mut event_properties = properties.clone();
        event_properties.insert("$screen_name".into(), Value::from(screen));

        self.inner.record("$screen", event_properties).await
    }

    async fn alias(&self, alias: &str) -> Result<()> {
        let mut event_properties = JsonMap::new();
        event_properties.insert("alias".into(), Value::from(alias));

        self.inner.record("$create_alias", event_properties).await
    }

    async fn reset(&self) -> Result<()> {
        let mut session = self.inner.session.lock().await;
        session.config()?;
        session.distinct_id = None;
        session.anonymous_id = new_anonymous_id();
        debug!("session reset");
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        self.inner.flush().await
    }

    async fn enable(&self) -> Result<()> {
        let mut session = self.inner.session.lock().await;
        session.config()?;
        session.enabled = true;
        Ok(())
    }

    async fn disable(&self) -> Result<()> {
        let mut session = self.inner.session.lock().await;
        session.config()?;
        session.enabled = false;
        Ok(())
    }

    async fn get_anonymous_id(&self) -> Result<String> {
        let session = self.inner.session.lock().await;
        session.config()?;
        Ok(session.anonymous_id.clone())
    }
}

impl Drop for HttpTransport {
    fn drop(&mut self) {
        if let Some(handle) = self.flush_handle.get_mut().take() {
            handle.abort();
        }
    }
}
