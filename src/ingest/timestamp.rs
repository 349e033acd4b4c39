use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use std::collections::{HashMap, VecDeque};

/// Values at or above this magnitude are taken as epoch milliseconds.
const EPOCH_MILLIS_THRESHOLD: f64 = 1e11;

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Parse a timestamp string.
///
/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS[.fff]` and the same with a `T`
/// separator (both read as UTC), and numeric epoch seconds or milliseconds.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    s.parse::<f64>().ok().and_then(from_epoch)
}

/// Interpret a number as epoch seconds, or milliseconds when it is too large
/// to be a plausible seconds value.
pub fn from_epoch(value: f64) -> Option<DateTime<Utc>> {
    if !value.is_finite() {
        return None;
    }
    if value.abs() >= EPOCH_MILLIS_THRESHOLD {
        if value.abs() > i64::MAX as f64 {
            return None;
        }
        return Utc.timestamp_millis_opt(value as i64).single();
    }
    let secs = value.floor();
    let nanos = ((value - secs) * 1e9).round().min(999_999_999.0) as u32;
    Utc.timestamp_opt(secs as i64, nanos).single()
}

/// Bounded memo of timestamp-string parses with first-in-first-out eviction.
///
/// Failed parses are cached too, so a stream repeating a bad value pays for
/// it once.
#[derive(Debug, Clone)]
pub struct TimestampCache {
    capacity: usize,
    entries: HashMap<String, Option<DateTime<Utc>>>,
    order: VecDeque<String>,
    hits: u64,
    misses: u64,
}

impl Default for TimestampCache {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl TimestampCache {
    /// A capacity of zero disables caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity.min(4096)),
            order: VecDeque::with_capacity(capacity.min(4096)),
            hits: 0,
            misses: 0,
        }
    }

    pub fn parse(&mut self, s: &str) -> Option<DateTime<Utc>> {
        if let Some(cached) = self.entries.get(s) {
            self.hits += 1;
            return *cached;
        }
        self.misses += 1;
        let parsed = parse_timestamp(s);
        if self.capacity == 0 {
            return parsed;
        }
        while self.entries.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
        self.entries.insert(s.to_string(), parsed);
        self.order.push_back(s.to_string());
        parsed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// (hits, misses)
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}
