//! TOML configuration for the analysis engine.
//!
//! Every section has compiled-in defaults, so an empty file (or no file at
//! all) yields a usable configuration. A handful of `FAULTMEDIC_*`
//! environment variables override individual keys after loading.

use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::analysis::model::FusionWeights;
use crate::detect::{AnomalyMethod, GroupingStrategy};

/// Longest grouping window accepted (one week).
const MAX_WINDOW_MINUTES: u64 = 7 * 24 * 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {}", errors.join("; "))]
    Invalid { errors: Vec<String> },

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration, shared read-only by every analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RcaConfig {
    #[serde(default)]
    pub grouping: GroupingConfig,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub anomaly: AnomalyConfig,
    #[serde(default)]
    pub ranking: RankingConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RcaConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "loaded analysis configuration");
        Ok(config)
    }

    /// Load `path`, then apply `FAULTMEDIC_*` overrides read through `lookup`.
    pub fn load_with_overrides<F>(path: &Path, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::load(path)?;
        config.apply_env_overrides(lookup);
        Ok(config)
    }

    /// Try to load configuration from, in order:
    /// 1. The path in the `FAULTMEDIC_CONFIG` environment variable.
    /// 2. `./faultmedic.toml`.
    /// 3. `/etc/faultmedic/faultmedic.toml`.
    /// 4. Compiled-in defaults.
    ///
    /// Environment overrides are applied to whichever source wins.
    pub fn load_or_default() -> Self {
        let mut candidates: Vec<PathBuf> = Vec::new();
        if let Ok(env_path) = std::env::var("FAULTMEDIC_CONFIG") {
            candidates.push(PathBuf::from(env_path));
        }
        candidates.push(PathBuf::from("faultmedic.toml"));
        candidates.push(PathBuf::from("/etc/faultmedic/faultmedic.toml"));

        let mut config = None;
        for path in candidates {
            if !path.exists() {
                continue;
            }
            match Self::load(&path) {
                Ok(cfg) => {
                    config = Some(cfg);
                    break;
                }
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "config file exists but could not be loaded, trying fallback"
                    );
                }
            }
        }

        let mut config = config.unwrap_or_else(|| {
            debug!("no config file found, using compiled-in defaults");
            Self::default()
        });
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Apply `FAULTMEDIC_*` overrides read through `lookup`.
    ///
    /// Values that do not parse are ignored with a warning.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("FAULTMEDIC_MAX_EVENTS") {
            match v.trim().parse::<usize>() {
                Ok(n) => self.limits.max_events = n,
                Err(_) => warn!(value = %v, "ignoring invalid FAULTMEDIC_MAX_EVENTS"),
            }
        }
        if let Some(v) = lookup("FAULTMEDIC_TIME_WINDOW") {
            match v.trim().parse::<u64>() {
                Ok(n) => self.grouping.time_window_minutes = n,
                Err(_) => warn!(value = %v, "ignoring invalid FAULTMEDIC_TIME_WINDOW"),
            }
        }
        if let Some(v) = lookup("FAULTMEDIC_CONFIDENCE_THRESHOLD") {
            match v.trim().parse::<f64>() {
                Ok(n) => self.ranking.confidence_threshold = n,
                Err(_) => warn!(value = %v, "ignoring invalid FAULTMEDIC_CONFIDENCE_THRESHOLD"),
            }
        }
        if let Some(v) = lookup("FAULTMEDIC_LOG_LEVEL") {
            if v.trim().is_empty() {
                warn!("ignoring empty FAULTMEDIC_LOG_LEVEL");
            } else {
                self.logging.level = v.trim().to_ascii_lowercase();
            }
        }
    }

    /// Check every rule and report all violations together.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        let g = &self.grouping;
        if g.time_window_minutes == 0 {
            errors.push("grouping.time_window_minutes must be > 0".to_string());
        } else if g.time_window_minutes > MAX_WINDOW_MINUTES {
            errors.push(format!(
                "grouping.time_window_minutes must be <= {}",
                MAX_WINDOW_MINUTES
            ));
        }

        let gr = &self.graph;
        if gr.max_time_window_secs == 0 {
            errors.push("graph.max_time_window_secs must be > 0".to_string());
        } else if gr.max_time_window_secs > g.time_window_minutes.saturating_mul(60) {
            errors.push(format!(
                "graph.max_time_window_secs ({}) must not exceed the grouping window ({}s)",
                gr.max_time_window_secs,
                g.time_window_minutes.saturating_mul(60)
            ));
        }
        if !(gr.escalation_boost.is_finite() && gr.escalation_boost >= 1.0) {
            errors.push("graph.escalation_boost must be >= 1.0".to_string());
        }
        if !(gr.propagation_boost.is_finite() && gr.propagation_boost >= 1.0) {
            errors.push("graph.propagation_boost must be >= 1.0".to_string());
        }

        let a = &self.anomaly;
        for (name, value) in [
            ("zscore_sensitivity", a.zscore_sensitivity),
            ("iqr_sensitivity", a.iqr_sensitivity),
            ("moving_average_sensitivity", a.moving_average_sensitivity),
        ] {
            if !(value.is_finite() && value > 0.0) {
                errors.push(format!("anomaly.{} must be > 0", name));
            }
        }
        if a.moving_average_window == Some(0) {
            errors.push("anomaly.moving_average_window must be > 0 when set".to_string());
        }

        let r = &self.ranking;
        if !(0.0..=1.0).contains(&r.confidence_threshold) {
            errors.push("ranking.confidence_threshold must be within [0, 1]".to_string());
        }
        if !(r.frequency_min_share > 0.0 && r.frequency_min_share <= 1.0) {
            errors.push("ranking.frequency_min_share must be within (0, 1]".to_string());
        }
        if let Err(e) = r.weights.check() {
            errors.push(format!("ranking.weights: {}", e));
        }

        if self.limits.max_events == 0 {
            errors.push("limits.max_events must be > 0".to_string());
        }
        if self.limits.workers == 0 {
            errors.push("limits.workers must be > 0".to_string());
        }

        if self.enrichment.enabled && self.enrichment.timeout_secs == 0 {
            errors.push(
                "enrichment.timeout_secs must be > 0 when enrichment is enabled".to_string(),
            );
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid { errors })
        }
    }
}

// ---------------------------------------------------------------------------
// Grouping
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupingConfig {
    /// Gap (time-window mode) or span cap (service mode) of one incident.
    pub time_window_minutes: u64,
    pub strategy: GroupingStrategy,
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            time_window_minutes: 15,
            strategy: GroupingStrategy::TimeWindow,
        }
    }
}

impl GroupingConfig {
    pub fn window(&self) -> Duration {
        Duration::minutes(self.time_window_minutes.min(MAX_WINDOW_MINUTES) as i64)
    }
}

// ---------------------------------------------------------------------------
// Causal graph
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Largest time delta that may be bridged by an edge.
    pub max_time_window_secs: u64,
    /// Cross-service edges closer than this get the propagation boost.
    pub propagation_window_secs: u64,
    /// Weight applied when an error-or-worse event precedes an event of
    /// equal or lower severity.
    pub escalation_boost: f64,
    pub propagation_boost: f64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_time_window_secs: 300,
            propagation_window_secs: 30,
            escalation_boost: 1.2,
            propagation_boost: 1.1,
        }
    }
}

impl GraphConfig {
    pub fn max_time_window(&self) -> Duration {
        Duration::seconds(self.max_time_window_secs.min(MAX_WINDOW_MINUTES * 60) as i64)
    }

    pub fn propagation_window(&self) -> Duration {
        Duration::seconds(self.propagation_window_secs.min(MAX_WINDOW_MINUTES * 60) as i64)
    }
}

// ---------------------------------------------------------------------------
// Anomaly detection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    pub default_method: AnomalyMethod,
    /// Standard deviations from the mean.
    pub zscore_sensitivity: f64,
    /// IQR multiplier for the fences.
    pub iqr_sensitivity: f64,
    /// Allowed fractional deviation from the moving average.
    pub moving_average_sensitivity: f64,
    /// Number of most recent points in the moving average; all when unset.
    pub moving_average_window: Option<usize>,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            default_method: AnomalyMethod::Zscore,
            zscore_sensitivity: 2.0,
            iqr_sensitivity: 1.5,
            moving_average_sensitivity: 0.5,
            moving_average_window: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Ranking
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    /// Minimum share of the incident a message cluster needs to become a candidate.
    pub frequency_min_share: f64,
    /// Callers use this to filter low-confidence root causes; ranking ignores it.
    pub confidence_threshold: f64,
    pub weights: FusionWeights,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            frequency_min_share: 0.3,
            confidence_threshold: 0.6,
            weights: FusionWeights::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Groups larger than this are truncated, keeping the earliest events.
    pub max_events: usize,
    /// Incident groups analysed concurrently.
    pub workers: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_events: 5000,
            workers: 4,
        }
    }
}

// ---------------------------------------------------------------------------
// Enrichment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    pub enabled: bool,
    pub timeout_secs: u64,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_secs: 30,
        }
    }
}

impl EnrichmentConfig {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`).
    pub level: String,
    /// Emit JSON lines instead of the human-readable format.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn invalid_messages(cfg: &RcaConfig) -> Vec<String> {
        match cfg.validate() {
            Err(ConfigError::Invalid { errors }) => errors,
            other => panic!("expected Invalid, got {:?}", other),
        }
    }

    #[test]
    fn test_defaults_are_sane() {
        let cfg = RcaConfig::default();

        assert_eq!(cfg.grouping.time_window_minutes, 15);
        assert_eq!(cfg.grouping.strategy, GroupingStrategy::TimeWindow);
        assert_eq!(cfg.graph.max_time_window_secs, 300);
        assert_eq!(cfg.graph.escalation_boost, 1.2);
        assert_eq!(cfg.anomaly.default_method, AnomalyMethod::Zscore);
        assert_eq!(cfg.anomaly.zscore_sensitivity, 2.0);
        assert_eq!(cfg.anomaly.iqr_sensitivity, 1.5);
        assert_eq!(cfg.anomaly.moving_average_sensitivity, 0.5);
        assert_eq!(cfg.ranking.frequency_min_share, 0.3);
        assert_eq!(cfg.ranking.confidence_threshold, 0.6);
        assert_eq!(cfg.ranking.weights, FusionWeights::new(0.5, 0.3, 0.2));
        assert_eq!(cfg.limits.max_events, 5000);
        assert!(!cfg.enrichment.enabled);
        assert_eq!(cfg.logging.level, "info");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_parse_example_toml() {
        let toml_str = r#"
[grouping]
time_window_minutes = 10
strategy = "service"

[graph]
max_time_window_secs = 5
propagation_window_secs = 2

[anomaly]
default_method = "iqr"
iqr_sensitivity = 3.0
moving_average_window = 6

[ranking]
frequency_min_share = 0.25

[ranking.weights]
graph = 0.6
frequency = 0.2
anomaly = 0.2

[limits]
max_events = 100
workers = 2

[enrichment]
enabled = true
timeout_secs = 5

[logging]
level = "debug"
json = true
"#;

        let cfg: RcaConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(cfg.grouping.strategy, GroupingStrategy::Service);
        assert_eq!(cfg.graph.max_time_window(), Duration::seconds(5));
        assert_eq!(cfg.anomaly.default_method, AnomalyMethod::Iqr);
        assert_eq!(cfg.anomaly.moving_average_window, Some(6));
        assert_eq!(cfg.ranking.weights.graph, 0.6);
        assert_eq!(cfg.limits.workers, 2);
        assert_eq!(cfg.enrichment.timeout(), std::time::Duration::from_secs(5));
        assert!(cfg.logging.json);
        // Untouched keys keep their defaults.
        assert_eq!(cfg.graph.escalation_boost, 1.2);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_empty_toml_uses_all_defaults() {
        let cfg: RcaConfig = toml::from_str("").unwrap();
        assert_eq!(cfg, RcaConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[limits]\nmax_events = 42").unwrap();
        let cfg = RcaConfig::load(file.path()).unwrap();
        assert_eq!(cfg.limits.max_events, 42);
    }

    #[test]
    fn test_overrides_apply_to_explicit_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[limits]\nmax_events = 42\n\n[grouping]\ntime_window_minutes = 7").unwrap();
        let cfg = RcaConfig::load_with_overrides(file.path(), |k| {
            (k == "FAULTMEDIC_MAX_EVENTS").then(|| "10".to_string())
        })
        .unwrap();
        assert_eq!(cfg.limits.max_events, 10);
        assert_eq!(cfg.grouping.time_window_minutes, 7);
    }

    #[test]
    fn test_load_reports_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[limits\nmax_events = ").unwrap();
        let err = RcaConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = RcaConfig::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_validate_collects_every_violation() {
        let mut cfg = RcaConfig::default();
        cfg.grouping.time_window_minutes = 1;
        cfg.graph.max_time_window_secs = 120;
        cfg.limits.max_events = 0;
        cfg.ranking.confidence_threshold = 1.5;
        cfg.ranking.weights = FusionWeights::new(0.0, 0.0, 0.0);
        cfg.anomaly.zscore_sensitivity = -1.0;

        let errors = invalid_messages(&cfg);
        assert_eq!(errors.len(), 5, "{:?}", errors);
        assert!(errors.iter().any(|e| e.contains("max_time_window_secs")));
        assert!(errors.iter().any(|e| e.contains("max_events")));
        assert!(errors.iter().any(|e| e.contains("confidence_threshold")));
        assert!(errors.iter().any(|e| e.contains("weights")));
        assert!(errors.iter().any(|e| e.contains("zscore_sensitivity")));
    }

    #[test]
    fn test_validate_zero_windows() {
        let mut cfg = RcaConfig::default();
        cfg.grouping.time_window_minutes = 0;
        cfg.graph.max_time_window_secs = 0;
        let errors = invalid_messages(&cfg);
        assert!(errors.iter().any(|e| e.contains("time_window_minutes")));
        assert!(errors.iter().any(|e| e.contains("max_time_window_secs")));
    }

    #[test]
    fn test_enrichment_timeout_required_when_enabled() {
        let mut cfg = RcaConfig::default();
        cfg.enrichment.timeout_secs = 0;
        assert!(cfg.validate().is_ok());
        cfg.enrichment.enabled = true;
        assert_eq!(invalid_messages(&cfg).len(), 1);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("FAULTMEDIC_MAX_EVENTS", "250"),
            ("FAULTMEDIC_TIME_WINDOW", "not-a-number"),
            ("FAULTMEDIC_CONFIDENCE_THRESHOLD", "0.8"),
            ("FAULTMEDIC_LOG_LEVEL", "DEBUG"),
        ]
        .into_iter()
        .collect();

        let mut cfg = RcaConfig::default();
        cfg.apply_env_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.limits.max_events, 250);
        assert_eq!(cfg.grouping.time_window_minutes, 15);
        assert_eq!(cfg.ranking.confidence_threshold, 0.8);
        assert_eq!(cfg.logging.level, "debug");
    }
}
