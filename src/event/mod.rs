//! Normalized event records -- the unit every analysis stage consumes.

mod level;

pub use self::level::Level;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Stable identifier assigned to an event at ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EventId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<uuid::Uuid> for EventId {
    fn from(id: uuid::Uuid) -> Self {
        Self(id.to_string())
    }
}

/// A normalized log/event record.
///
/// Events are immutable once built. An event without a timestamp is still
/// analysed for frequency patterns but never placed in the causal graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub timestamp: Option<DateTime<Utc>>,
    pub service: Option<String>,
    pub level: Level,
    pub message: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl Event {
    /// Create an `INFO` event with no timestamp, service or tags.
    pub fn new(id: impl Into<EventId>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            timestamp: None,
            service: None,
            level: Level::Info,
            message: message.into(),
            tags: BTreeMap::new(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Service name or `"unknown"` for display purposes.
    pub fn service_or_unknown(&self) -> &str {
        self.service.as_deref().unwrap_or("unknown")
    }

    pub fn is_error(&self) -> bool {
        self.level.at_least(&Level::Error).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_builder_sets_fields() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let e = Event::new("e1", "disk full")
            .with_timestamp(ts)
            .with_service("storage")
            .with_level(Level::Critical)
            .with_tag("host", "node-3");

        assert_eq!(e.id.as_str(), "e1");
        assert_eq!(e.timestamp, Some(ts));
        assert_eq!(e.service.as_deref(), Some("storage"));
        assert_eq!(e.tags.get("host").map(String::as_str), Some("node-3"));
        assert!(e.is_error());
    }

    #[test]
    fn test_unknown_service_label() {
        let e = Event::new("e1", "x");
        assert_eq!(e.service_or_unknown(), "unknown");
        assert!(!e.is_error());
    }

    #[test]
    fn test_raw_level_is_not_error() {
        let e = Event::new("e1", "x").with_level(Level::parse("NOTICE"));
        assert!(!e.is_error());
    }
}
