//! Anomaly detection and incident grouping.

pub mod anomaly;
pub mod engine;
pub mod incident;

pub use self::anomaly::{detect, AnomalyDetector, TimeSeries};
pub use self::engine::{AnomalyEngine, BaselineSource, InMemoryBaselines};
pub use self::incident::{group_events, GroupingStrategy, IncidentGroup};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum DetectError {
    #[error("insufficient baseline data: need {needed} samples, have {have}")]
    InsufficientBaseline { needed: usize, have: usize },
}

/// Statistical method used to score a value against its history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyMethod {
    Zscore,
    Iqr,
    MovingAverage,
}

impl AnomalyMethod {
    /// Minimum number of historical points the method needs.
    pub fn min_history(self) -> usize {
        match self {
            AnomalyMethod::Zscore => 2,
            AnomalyMethod::Iqr => 4,
            AnomalyMethod::MovingAverage => 1,
        }
    }
}

impl std::fmt::Display for AnomalyMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnomalyMethod::Zscore => write!(f, "zscore"),
            AnomalyMethod::Iqr => write!(f, "iqr"),
            AnomalyMethod::MovingAverage => write!(f, "moving_average"),
        }
    }
}

/// Key set in [`AnomalyResult::details`] when the history was too short to evaluate.
pub const INSUFFICIENT_DATA: &str = "insufficient_data";

/// Key set in [`AnomalyResult::details`] when the current value is NaN or infinite.
pub const NON_FINITE_CURRENT: &str = "non_finite_current";

/// Outcome of scoring one value against a historical series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyResult {
    pub is_anomaly: bool,
    /// Method-specific signed score (z-score, IQR distance, deviation ratio).
    pub score: f64,
    pub confidence: f64,
    pub baseline_value: f64,
    pub method: AnomalyMethod,
    pub details: BTreeMap<String, serde_json::Value>,
}

impl AnomalyResult {
    pub(crate) fn insufficient(method: AnomalyMethod, err: DetectError) -> Self {
        let mut details = BTreeMap::new();
        details.insert(INSUFFICIENT_DATA.to_string(), serde_json::Value::Bool(true));
        let DetectError::InsufficientBaseline { needed, have } = err;
        details.insert("needed".to_string(), needed.into());
        details.insert("have".to_string(), have.into());
        Self {
            is_anomaly: false,
            score: 0.0,
            confidence: 0.0,
            baseline_value: 0.0,
            method,
            details,
        }
    }

    pub(crate) fn non_finite(method: AnomalyMethod) -> Self {
        let mut details = BTreeMap::new();
        details.insert(NON_FINITE_CURRENT.to_string(), serde_json::Value::Bool(true));
        Self {
            is_anomaly: false,
            score: 0.0,
            confidence: 0.0,
            baseline_value: 0.0,
            method,
            details,
        }
    }

    /// True when the method could not be evaluated ("could not evaluate" as
    /// opposed to "no anomaly"): too little history or a non-finite value.
    pub fn is_insufficient(&self) -> bool {
        self.details.contains_key(INSUFFICIENT_DATA)
            || self.details.contains_key(NON_FINITE_CURRENT)
    }

    /// Contribution of this result to root-cause confidence: the detection
    /// confidence when anomalous, zero when evaluated and normal, `None` when
    /// it could not be evaluated.
    pub fn evidence_confidence(&self) -> Option<f64> {
        if self.is_insufficient() {
            None
        } else if self.is_anomaly {
            Some(self.confidence)
        } else {
            Some(0.0)
        }
    }
}

/// Anomaly evidence for one incident group, as consumed by the ranker.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnomalyEvidence {
    /// Per-service results.
    pub by_service: BTreeMap<String, AnomalyResult>,
    /// Incident-wide result applied to candidates with no per-service entry.
    pub incident: Option<AnomalyResult>,
    /// Per-level event-count results, keyed by upper-case level name.
    /// Reported only; the ranker does not read them.
    pub by_level: BTreeMap<String, AnomalyResult>,
}

impl AnomalyEvidence {
    pub fn incident_wide(result: AnomalyResult) -> Self {
        Self {
            by_service: BTreeMap::new(),
            incident: Some(result),
            by_level: BTreeMap::new(),
        }
    }

    pub fn for_service(&self, service: Option<&str>) -> Option<&AnomalyResult> {
        service
            .and_then(|s| self.by_service.get(s))
            .or(self.incident.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.by_service.is_empty() && self.incident.is_none() && self.by_level.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_result_flags_details() {
        let r = AnomalyResult::insufficient(
            AnomalyMethod::Iqr,
            DetectError::InsufficientBaseline { needed: 4, have: 2 },
        );
        assert!(r.is_insufficient());
        assert!(!r.is_anomaly);
        assert_eq!(r.confidence, 0.0);
        assert_eq!(r.evidence_confidence(), None);
        assert_eq!(r.details["needed"], serde_json::json!(4));
    }

    #[test]
    fn test_service_lookup_falls_back_to_incident() {
        let wide = AnomalyResult::insufficient(
            AnomalyMethod::Zscore,
            DetectError::InsufficientBaseline { needed: 2, have: 0 },
        );
        let mut ev = AnomalyEvidence::incident_wide(wide.clone());
        let mut svc = wide.clone();
        svc.method = AnomalyMethod::MovingAverage;
        ev.by_service.insert("db".to_string(), svc);

        assert_eq!(ev.for_service(Some("db")).unwrap().method, AnomalyMethod::MovingAverage);
        assert_eq!(ev.for_service(Some("api")).unwrap().method, AnomalyMethod::Zscore);
        assert_eq!(ev.for_service(None).unwrap().method, AnomalyMethod::Zscore);
    }
}
