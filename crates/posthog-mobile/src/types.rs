//! JSON property bags, call context and wire types.

use serde::Serialize;
use serde_json::Value;

/// A mapping of string keys to arbitrary JSON values.
pub type JsonMap = serde_json::Map<String, Value>;

/// Library name reported in every call context.
pub const LIB_NAME: &str = env!("CARGO_PKG_NAME");

/// Library version reported in every call context.
pub const LIB_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Context snapshot attached to a call while it travels through middleware.
///
/// Always carries `$lib` and `$lib_version`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Context(JsonMap);

impl Context {
    /// Context describing this library.
    pub fn library() -> Self {
        let mut map = JsonMap::new();
        map.insert("$lib".into(), Value::from(LIB_NAME));
        map.insert("$lib_version".into(), Value::from(LIB_VERSION));
        Self(map)
    }

    /// Get a context entry.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Set a context entry.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Overlay entries from `other`. Existing keys are replaced.
    pub fn merge(&mut self, other: Context) {
        for (key, value) in other.0 {
            self.0.insert(key, value);
        }
    }

    /// Borrow the underlying map.
    pub fn as_map(&self) -> &JsonMap {
        &self.0
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::library()
    }
}

impl From<JsonMap> for Context {
    /// Entries are laid over the library context, so `$lib` is kept
    /// unless the map overrides it.
    fn from(map: JsonMap) -> Self {
        let mut context = Self::library();
        context.merge(Self(map));
        context
    }
}

/// One event in a batch upload.
#[derive(Debug, Clone, Serialize)]
pub struct BatchEvent {
    pub event: String,
    pub distinct_id: String,
    pub properties: JsonMap,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Body of `POST /batch/`.
#[derive(Debug, Clone, Serialize)]
pub struct BatchPayload<'a> {
    pub api_key: &'a str,
    pub batch: &'a [BatchEvent],
}
