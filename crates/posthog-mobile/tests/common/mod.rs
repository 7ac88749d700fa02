//! Shared test doubles.

#![allow(dead_code)]

use async_trait::async_trait;
use posthog_mobile::{Configuration, Error, JsonMap, Result, Transport};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

/// A call observed by [`RecordingTransport`].
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Setup(String),
    Capture(String, JsonMap),
    Identify(String, JsonMap),
    Screen(String, JsonMap),
    Alias(String),
    Reset,
    Flush,
    Enable,
    Disable,
    GetAnonymousId,
}

/// Transport that records every call and fails on demand.
pub struct RecordingTransport {
    calls: Mutex<Vec<Call>>,
    failures: Mutex<HashMap<&'static str, VecDeque<String>>>,
    capture_delay: Option<Duration>,
    anonymous_id: String,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::build(None))
    }

    /// Every capture sleeps for `delay` before it is recorded.
    pub fn with_capture_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self::build(Some(delay)))
    }

    fn build(capture_delay: Option<Duration>) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            capture_delay,
            anonymous_id: "anon-1234".into(),
        }
    }

    pub fn anonymous_id(&self) -> &str {
        &self.anonymous_id
    }

    /// Make the next call of `operation` fail with `message`.
    pub fn fail_next(&self, operation: &'static str, message: &str) {
        self.failures
            .lock()
            .unwrap()
            .entry(operation)
            .or_default()
            .push_back(message.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Event names of every capture, in order.
    pub fn captured_events(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Capture(event, _) => Some(event),
                _ => None,
            })
            .collect()
    }

    fn record(&self, operation: &'static str, call: Call) -> Result<()> {
        self.calls.lock().unwrap().push(call);

        let failure = self
            .failures
            .lock()
            .unwrap()
            .get_mut(operation)
            .and_then(|queue| queue.pop_front());

        match failure {
            Some(message) => Err(Error::transport(message)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn setup(&self, config: &Configuration) -> Result<()> {
        self.record("setup", Call::Setup(config.json.clone()))
    }

    async fn capture(&self, event: &str, properties: &JsonMap) -> Result<()> {
        if let Some(delay) = self.capture_delay {
            tokio::time::sleep(delay).await;
        }
        self.record("capture", Call::Capture(event.into(), properties.clone()))
    }

    async fn identify(&self, distinct_id: &str, properties: &JsonMap) -> Result<()> {
        self.record("identify", Call::Identify(distinct_id.into(), properties.clone()))
    }

    async fn screen(&self, screen: &str, properties: &JsonMap) -> Result<()> {
        self.record("screen", Call::Screen(screen.into(), properties.clone()))
    }

    async fn alias(&self, alias: &str) -> Result<()> {
        self.record("alias", Call::Alias(alias.into()))
    }

    async fn reset(&self) -> Result<()> {
        self.record("reset", Call::Reset)
    }

    async fn flush(&self) -> Result<()> {
        self.record("flush", Call::Flush)
    }

    async fn enable(&self) -> Result<()> {
        self.record("enable", Call::Enable)
    }

    async fn disable(&self) -> Result<()> {
        self.record("disable", Call::Disable)
    }

    async fn get_anonymous_id(&self) -> Result<String> {
        self.record("get_anonymous_id", Call::GetAnonymousId)?;
        Ok(self.anonymous_id.clone())
    }
}

/// Build a property map from a JSON object literal.
pub fn props(value: Value) -> JsonMap {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {}", other),
    }
}

/// Collects log events so tests can assert on them.
#[derive(Clone, Default)]
pub struct LogCapture {
    events: Arc<Mutex<Vec<(Level, String)>>>,
}

impl LogCapture {
    pub fn events(&self) -> Vec<(Level, String)> {
        self.events.lock().unwrap().clone()
    }

    pub fn contains(&self, level: Level, message: &str) -> bool {
        self.events()
            .iter()
            .any(|(l, m)| *l == level && m.starts_with(message))
    }
}

struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{:?}", value);
        }
    }
}

impl<S: Subscriber> Layer<S> for LogCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor(String::new());
        event.record(&mut visitor);
        self.events
            .lock()
            .unwrap()
            .push((*event.metadata().level(), visitor.0));
    }
}
