use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Ordered event severity.
///
/// `CRITICAL` and `FATAL` share the top rank. Unrecognised level strings are
/// kept verbatim as [`Level::Raw`] and carry no rank.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Critical,
    Fatal,
    Raw(String),
}

impl Level {
    /// Parse a level name, case-insensitively.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "TRACE" => Level::Trace,
            "DEBUG" => Level::Debug,
            "INFO" => Level::Info,
            "WARN" | "WARNING" => Level::Warn,
            "ERROR" | "ERR" => Level::Error,
            "CRITICAL" | "CRIT" => Level::Critical,
            "FATAL" => Level::Fatal,
            _ => Level::Raw(s.trim().to_string()),
        }
    }

    pub fn rank(&self) -> Option<u8> {
        match self {
            Level::Trace => Some(0),
            Level::Debug => Some(1),
            Level::Info => Some(2),
            Level::Warn => Some(3),
            Level::Error => Some(4),
            Level::Critical | Level::Fatal => Some(5),
            Level::Raw(_) => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Level::Trace => "TRACE",
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
            Level::Critical => "CRITICAL",
            Level::Fatal => "FATAL",
            Level::Raw(s) => s,
        }
    }

    /// Compare two levels by rank. `None` when either side is unranked.
    pub fn at_least(&self, other: &Level) -> Option<bool> {
        Some(self.rank()? >= other.rank()?)
    }
}

impl Default for Level {
    fn default() -> Self {
        Level::Info
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Level {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Level {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Level::parse(&s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_aliases() {
        assert_eq!(Level::parse("warning"), Level::Warn);
        assert_eq!(Level::parse(" Error "), Level::Error);
        assert_eq!(Level::parse("FATAL"), Level::Fatal);
        assert_eq!(Level::parse("notice"), Level::Raw("notice".to_string()));
    }

    #[test]
    fn test_rank_ordering() {
        assert!(Level::Trace.rank() < Level::Info.rank());
        assert!(Level::Warn.rank() < Level::Error.rank());
        assert_eq!(Level::Critical.rank(), Level::Fatal.rank());
        assert_eq!(Level::Raw("x".into()).rank(), None);
    }

    #[test]
    fn test_at_least() {
        assert_eq!(Level::Error.at_least(&Level::Warn), Some(true));
        assert_eq!(Level::Info.at_least(&Level::Error), Some(false));
        assert_eq!(Level::Raw("x".into()).at_least(&Level::Info), None);
    }

    #[test]
    fn test_serde_uses_names() {
        let json = serde_json::to_string(&Level::Critical).unwrap();
        assert_eq!(json, "\"CRITICAL\"");
        let back: Level = serde_json::from_str("\"warning\"").unwrap();
        assert_eq!(back, Level::Warn);
    }
}
