//! Boundary between raw log records and the normalized [`Event`] model.
//!
//! Parsing of files, webhooks and vendor formats happens elsewhere; this
//! module only turns an already-decoded record into an `Event`, or rejects it.

pub mod timestamp;

pub use self::timestamp::{parse_timestamp, TimestampCache};

use crate::event::{Event, EventId, Level};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq)]
pub enum IngestError {
    #[error("event is missing required field `{field}`")]
    MissingField { field: &'static str },
}

/// A decoded but not yet validated log record.
///
/// Accepts the common aliases `component` for `service`, `severity` for
/// `level` and `metadata` for `tags`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawEvent {
    #[serde(default)]
    pub id: Option<String>,
    /// RFC 3339 / naive date-time string, or epoch number.
    #[serde(default)]
    pub timestamp: Option<Value>,
    #[serde(default, alias = "component")]
    pub service: Option<String>,
    #[serde(default, alias = "severity")]
    pub level: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, alias = "metadata")]
    pub tags: BTreeMap<String, Value>,
}

/// Turns [`RawEvent`]s into [`Event`]s.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    cache: TimestampCache,
}

impl Normalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache(cache: TimestampCache) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &TimestampCache {
        &self.cache
    }

    /// Validate and normalize one record.
    ///
    /// Only a missing or blank `message` is fatal. An unparseable timestamp
    /// yields an event without one; a missing level defaults to `INFO`.
    pub fn normalize(&mut self, raw: RawEvent) -> Result<Event, IngestError> {
        let message = match raw.message {
            Some(m) if !m.trim().is_empty() => m,
            _ => return Err(IngestError::MissingField { field: "message" }),
        };

        let id = match raw.id {
            Some(id) if !id.trim().is_empty() => EventId::new(id),
            _ => EventId::from(uuid::Uuid::new_v4()),
        };

        let timestamp = match raw.timestamp {
            Some(Value::String(s)) => self.cache.parse(&s),
            Some(Value::Number(n)) => n.as_f64().and_then(timestamp::from_epoch),
            _ => None,
        };
        if timestamp.is_none() {
            debug!(event_id = %id, "event has no usable timestamp");
        }

        let service = raw
            .service
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let level = raw
            .level
            .as_deref()
            .map(|l| Level::parse(&l.to_ascii_uppercase()))
            .unwrap_or_default();

        let tags = raw
            .tags
            .into_iter()
            .filter_map(|(k, v)| match v {
                Value::Null => None,
                Value::String(s) => Some((k, s)),
                other => Some((k, other.to_string())),
            })
            .collect();

        Ok(Event {
            id,
            timestamp,
            service,
            level,
            message,
            tags,
        })
    }
}
