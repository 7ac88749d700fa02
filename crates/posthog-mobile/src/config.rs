//! Client configuration.

use crate::types::Context;
use serde::Serialize;
use std::time::Duration;

/// Default PostHog host.
pub const DEFAULT_HOST: &str = "https://app.posthog.com";

/// Default number of queued events that triggers a flush.
pub const DEFAULT_FLUSH_AT: u32 = 20;

/// Default flush interval.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(30);

/// Default maximum number of queued events.
pub const DEFAULT_MAX_QUEUE_SIZE: u32 = 1000;

/// Options passed to [`PostHog::setup`](crate::PostHog::setup).
///
/// Every field left unset falls back to its documented default.
#[derive(Debug, Clone, Default)]
pub struct Options {
    host: Option<String>,
    record_screen_views: Option<bool>,
    capture_application_lifecycle_events: Option<bool>,
    capture_deep_links: Option<bool>,
    debug: Option<bool>,
    flush_at: Option<u32>,
    flush_interval: Option<Duration>,
    android: AndroidOptions,
    ios: IosOptions,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the PostHog host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Record a screen call whenever a view appears.
    pub fn record_screen_views(mut self, enabled: bool) -> Self {
        self.record_screen_views = Some(enabled);
        self
    }

    /// Capture "Application Installed", "Application Updated" and
    /// "Application Opened".
    pub fn capture_application_lifecycle_events(mut self, enabled: bool) -> Self {
        self.capture_application_lifecycle_events = Some(enabled);
        self
    }

    /// Capture deep links.
    pub fn capture_deep_links(mut self, enabled: bool) -> Self {
        self.capture_deep_links = Some(enabled);
        self
    }

    pub fn debug(mut self, enabled: bool) -> Self {
        self.debug = Some(enabled);
        self
    }

    /// Set the number of queued events that triggers a flush.
    pub fn flush_at(mut self, count: u32) -> Self {
        self.flush_at = Some(count);
        self
    }

    /// Set the flush interval. Sub-second precision is dropped.
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = Some(interval);
        self
    }

    /// Android specific options.
    pub fn android(mut self, android: AndroidOptions) -> Self {
        self.android = android;
        self
    }

    /// iOS specific options.
    pub fn ios(mut self, ios: IosOptions) -> Self {
        self.ios = ios;
        self
    }
}

/// Android specific options.
#[derive(Debug, Clone, Default)]
pub struct AndroidOptions {
    collect_device_id: Option<bool>,
}

impl AndroidOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect the device identifier. Enabled by default.
    pub fn collect_device_id(mut self, enabled: bool) -> Self {
        self.collect_device_id = Some(enabled);
        self
    }
}

/// iOS specific options.
#[derive(Debug, Clone, Default)]
pub struct IosOptions {
    capture_in_app_purchases: Option<bool>,
    capture_push_notifications: Option<bool>,
    max_queue_size: Option<u32>,
    should_use_bluetooth: Option<bool>,
    should_use_location_services: Option<bool>,
}

impl IosOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn capture_in_app_purchases(mut self, enabled: bool) -> Self {
        self.capture_in_app_purchases = Some(enabled);
        self
    }

    pub fn capture_push_notifications(mut self, enabled: bool) -> Self {
        self.capture_push_notifications = Some(enabled);
        self
    }

    /// Maximum number of queued events before the oldest are dropped.
    pub fn max_queue_size(mut self, size: u32) -> Self {
        self.max_queue_size = Some(size);
        self
    }

    pub fn should_use_bluetooth(mut self, enabled: bool) -> Self {
        self.should_use_bluetooth = Some(enabled);
        self
    }

    pub fn should_use_location_services(mut self, enabled: bool) -> Self {
        self.should_use_location_services = Some(enabled);
        self
    }
}

/// Resolved configuration handed to the transport.
///
/// Serializes with camelCase keys. `json` holds the canonical serialization
/// of every other field so a transport can tell a repeated setup from a
/// conflicting one.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    pub api_key: String,
    pub capture_application_lifecycle_events: bool,
    pub capture_deep_links: bool,
    pub debug: bool,
    pub flush_at: u32,
    /// Seconds.
    pub flush_interval: u64,
    pub host: String,
    pub record_screen_views: bool,
    pub context: Context,
    pub android: AndroidConfiguration,
    pub ios: IosConfiguration,
    #[serde(skip)]
    pub json: String,
}

impl Configuration {
    /// Flush interval as a duration.
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval)
    }
}

/// Resolved Android settings.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AndroidConfiguration {
    pub collect_device_id: bool,
}

/// Resolved iOS settings.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IosConfiguration {
    pub capture_in_app_purchases: bool,
    pub capture_push_notifications: bool,
    pub max_queue_size: u32,
    pub should_use_bluetooth: bool,
    pub should_use_location_services: bool,
}

/// Merge `options` with the defaults and compute the canonical `json` form.
pub fn configure(api_key: impl Into<String>, options: &Options) -> Result<Configuration, crate::Error> {
    let api_key = api_key.into();
    if api_key.is_empty() {
        return Err(crate::Error::Config("api_key cannot be empty".into()));
    }

    let flush_at = options.flush_at.unwrap_or(DEFAULT_FLUSH_AT);
    if flush_at == 0 {
        return Err(crate::Error::Config("flush_at must be greater than zero".into()));
    }

    let max_queue_size = options.ios.max_queue_size.unwrap_or(DEFAULT_MAX_QUEUE_SIZE);
    if max_queue_size == 0 {
        return Err(crate::Error::Config("max_queue_size must be greater than zero".into()));
    }

    let flush_interval = options.flush_interval.unwrap_or(DEFAULT_FLUSH_INTERVAL);
    if flush_interval < Duration::from_secs(1) {
        return Err(crate::Error::Config(
            "flush_interval must be at least one second".into(),
        ));
    }

    let mut config = Configuration {
        api_key,
        capture_application_lifecycle_events: options
            .capture_application_lifecycle_events
            .unwrap_or(false),
        capture_deep_links: options.capture_deep_links.unwrap_or(false),
        debug: options.debug.unwrap_or(false),
        flush_at,
        flush_interval: flush_interval.as_secs(),
        host: options.host.clone().unwrap_or_else(|| DEFAULT_HOST.into()),
        record_screen_views: options.record_screen_views.unwrap_or(false),
        context: Context::library(),
        android: AndroidConfiguration {
            collect_device_id: options.android.collect_device_id.unwrap_or(true),
        },
        ios: IosConfiguration {
            capture_in_app_purchases: options.ios.capture_in_app_purchases.unwrap_or(false),
            capture_push_notifications: options.ios.capture_push_notifications.unwrap_or(false),
            max_queue_size,
            should_use_bluetooth: options.ios.should_use_bluetooth.unwrap_or(false),
            should_use_location_services: options
                .ios
                .should_use_location_services
                .unwrap_or(false),
        },
        json: String::new(),
    };
    config.json = serde_json::to_string(&config)?;

    Ok(config)
}
