use crate::event::EventId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Relative weight of each evidence signal in a root cause's confidence.
///
/// Only the signals available for a candidate take part, and their weights
/// are renormalised, so missing anomaly history does not drag a strong
/// graph candidate down.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionWeights {
    pub graph: f64,
    pub frequency: f64,
    pub anomaly: f64,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            graph: 0.5,
            frequency: 0.3,
            anomaly: 0.2,
        }
    }
}

impl FusionWeights {
    pub fn new(graph: f64, frequency: f64, anomaly: f64) -> Self {
        Self {
            graph,
            frequency,
            anomaly,
        }
    }

    /// Weights must be finite, non-negative and not all zero.
    pub fn check(&self) -> Result<(), String> {
        let all = [self.graph, self.frequency, self.anomaly];
        if all.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err("weights must be finite and non-negative".to_string());
        }
        if all.iter().sum::<f64>() <= 0.0 {
            return Err("weights must have a positive sum".to_string());
        }
        Ok(())
    }

    /// Weighted mean of the available signals, in `[0, 1]`.
    pub fn fuse(&self, signals: &Signals) -> f64 {
        let parts = [
            (self.graph, signals.graph),
            (self.frequency, signals.frequency),
            (self.anomaly, signals.anomaly),
        ];
        let (num, den) = parts
            .iter()
            .filter_map(|(w, c)| c.map(|c| (*w, c)))
            .fold((0.0, 0.0), |(num, den), (w, c)| (num + w * c, den + w));
        if den <= 0.0 {
            return 0.0;
        }
        (num / den).clamp(0.0, 1.0)
    }
}

/// Per-signal confidences behind a root cause; `None` means the signal was
/// not available for it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Signals {
    pub graph: Option<f64>,
    pub frequency: Option<f64>,
    pub anomaly: Option<f64>,
}

/// A ranked explanation for an incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootCause {
    pub description: String,
    pub confidence: f64,
    /// Supporting messages and statistics, most important first.
    pub evidence: Vec<String>,
    pub originating_service: Option<String>,
    #[serde(default)]
    pub event_ids: Vec<EventId>,
    /// Earliest timestamp among the supporting events.
    #[serde(default)]
    pub first_seen: Option<DateTime<Utc>>,
    #[serde(default)]
    pub signals: Signals,
}

impl RootCause {
    /// Usable as a ranked result: non-empty description and a finite
    /// confidence in `[0, 1]`.
    pub fn is_well_formed(&self) -> bool {
        !self.description.trim().is_empty()
            && self.confidence.is_finite()
            && (0.0..=1.0).contains(&self.confidence)
    }
}

/// Descending confidence; ties go to the earliest `first_seen`, with
/// undated causes last.
pub fn rank_order(a: &RootCause, b: &RootCause) -> Ordering {
    b.confidence
        .total_cmp(&a.confidence)
        .then_with(|| match (a.first_seen, b.first_seen) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.description.cmp(&b.description))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn cause(desc: &str, confidence: f64, secs: Option<i64>) -> RootCause {
        RootCause {
            description: desc.to_string(),
            confidence,
            evidence: vec![],
            originating_service: None,
            event_ids: vec![],
            first_seen: secs.map(|s| Utc.timestamp_opt(s, 0).unwrap()),
            signals: Signals::default(),
        }
    }

    #[test]
    fn test_fuse_all_signals() {
        let w = FusionWeights::default();
        let s = Signals {
            graph: Some(1.0),
            frequency: Some(0.5),
            anomaly: Some(0.0),
        };
        assert!((w.fuse(&s) - 0.65).abs() < 1e-12);
    }

    #[test]
    fn test_fuse_renormalises_missing_signals() {
        let w = FusionWeights::default();
        let s = Signals {
            graph: Some(0.72),
            frequency: Some(1.0 / 3.0),
            anomaly: None,
        };
        // (0.5 * 0.72 + 0.3 / 3) / 0.8
        assert!((w.fuse(&s) - 0.575).abs() < 1e-12);
        assert_eq!(w.fuse(&Signals::default()), 0.0);
    }

    #[test]
    fn test_zero_weight_signal_is_ignored() {
        let w = FusionWeights::new(1.0, 0.0, 0.0);
        let s = Signals {
            graph: None,
            frequency: Some(0.9),
            anomaly: None,
        };
        assert_eq!(w.fuse(&s), 0.0);
    }

    #[test]
    fn test_check_weights() {
        assert!(FusionWeights::default().check().is_ok());
        assert!(FusionWeights::new(-0.1, 0.5, 0.5).check().is_err());
        assert!(FusionWeights::new(0.0, 0.0, 0.0).check().is_err());
        assert!(FusionWeights::new(f64::NAN, 1.0, 0.0).check().is_err());
    }

    #[test]
    fn test_rank_order_ties_by_first_seen() {
        let mut causes = vec![
            cause("undated", 0.5, None),
            cause("late", 0.5, Some(20)),
            cause("top", 0.9, Some(30)),
            cause("early", 0.5, Some(10)),
        ];
        causes.sort_by(rank_order);
        let order: Vec<&str> = causes.iter().map(|c| c.description.as_str()).collect();
        assert_eq!(order, vec!["top", "early", "late", "undated"]);
    }

    #[test]
    fn test_well_formed() {
        assert!(cause("x", 0.3, None).is_well_formed());
        assert!(!cause(" ", 0.3, None).is_well_formed());
        assert!(!cause("x", 1.3, None).is_well_formed());
        assert!(!cause("x", f64::NAN, None).is_well_formed());
    }
}
