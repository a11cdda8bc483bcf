//! Cached entries and their opaque payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::key::CacheKey;

/// Opaque cached value. The cache never interprets it beyond counting rows
/// for list panels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Value);

impl Payload {
    /// Wrap a JSON value.
    #[must_use]
    pub const fn new(value: Value) -> Self {
        Self(value)
    }

    /// Borrow the JSON value.
    #[must_use]
    pub const fn value(&self) -> &Value {
        &self.0
    }

    /// Unwrap into the JSON value.
    #[must_use]
    pub fn into_value(self) -> Value {
        self.0
    }

    /// Number of rows a list panel scrolls over for this payload.
    ///
    /// Arrays count their elements, objects their entries, `null` is empty,
    /// and any scalar is a single row.
    #[must_use]
    pub fn item_count(&self) -> usize {
        match &self.0 {
            Value::Null => 0,
            Value::Array(items) => items.len(),
            Value::Object(map) => map.len(),
            _ => 1,
        }
    }

    /// Rows `[start, end)` rendered as compact one-line strings.
    #[must_use]
    pub fn rows(&self, start: usize, end: usize) -> Vec<String> {
        let end = end.min(self.item_count());
        if start >= end {
            return Vec::new();
        }
        match &self.0 {
            Value::Array(items) => items[start..end].iter().map(compact).collect(),
            Value::Object(map) => map
                .iter()
                .skip(start)
                .take(end - start)
                .map(|(k, v)| format!("{k}: {}", compact(v)))
                .collect(),
            Value::Null => Vec::new(),
            other => vec![compact(other)],
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

fn compact(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// One cached value for one key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// Key the payload was fetched for.
    pub key: CacheKey,
    /// The cached data.
    pub payload: Payload,
    /// When the payload was fetched, not when it was stored.
    pub cached_at: DateTime<Utc>,
}

impl Entry {
    /// Entry fetched at `cached_at`.
    #[must_use]
    pub fn new(key: CacheKey, payload: Payload, cached_at: DateTime<Utc>) -> Self {
        Self {
            key,
            payload,
            cached_at,
        }
    }

    /// Age of the entry relative to `now`; zero if `cached_at` is in the future.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> std::time::Duration {
        (now - self.cached_at).to_std().unwrap_or_default()
    }
}
