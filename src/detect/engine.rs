use crate::detect::anomaly::AnomalyDetector;
use crate::detect::incident::IncidentGroup;
use crate::detect::{AnomalyEvidence, AnomalyResult};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

/// Read-only supplier of historical baselines.
///
/// Every call returns an owned snapshot, so one detection never observes a
/// series changing underneath it.
pub trait BaselineSource: Send + Sync {
    /// Historical error counts per analysis window for `service`.
    fn history(&self, service: &str) -> Option<Vec<f64>>;

    /// Historical error counts for the whole system, used when a candidate has
    /// no per-service baseline.
    fn incident_history(&self) -> Option<Vec<f64>> {
        None
    }

    /// Historical event counts at `level` (e.g. `"ERROR"`).
    fn level_history(&self, _level: &str) -> Option<Vec<f64>> {
        None
    }
}

/// Baselines held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBaselines {
    services: HashMap<String, Vec<f64>>,
    incident: Option<Vec<f64>>,
    levels: HashMap<String, Vec<f64>>,
}

impl InMemoryBaselines {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service(mut self, service: impl Into<String>, history: Vec<f64>) -> Self {
        self.services.insert(service.into(), history);
        self
    }

    pub fn with_incident(mut self, history: Vec<f64>) -> Self {
        self.incident = Some(history);
        self
    }

    pub fn with_level(mut self, level: impl Into<String>, history: Vec<f64>) -> Self {
        self.levels.insert(level.into().to_ascii_uppercase(), history);
        self
    }
}

impl BaselineSource for InMemoryBaselines {
    fn history(&self, service: &str) -> Option<Vec<f64>> {
        self.services.get(service).cloned()
    }

    fn incident_history(&self) -> Option<Vec<f64>> {
        self.incident.clone()
    }

    fn level_history(&self, level: &str) -> Option<Vec<f64>> {
        self.levels.get(&level.to_ascii_uppercase()).cloned()
    }
}

/// Turns an incident group plus historical baselines into anomaly evidence.
#[derive(Clone)]
pub struct AnomalyEngine {
    detector: AnomalyDetector,
    source: Arc<dyn BaselineSource>,
}

impl std::fmt::Debug for AnomalyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnomalyEngine")
            .field("detector", &self.detector)
            .finish_non_exhaustive()
    }
}

impl AnomalyEngine {
    pub fn new(detector: AnomalyDetector, source: Arc<dyn BaselineSource>) -> Self {
        Self { detector, source }
    }

    /// Compare each service's error count in `group` with its history.
    ///
    /// Services without a baseline are left out; the ranker treats them as
    /// having no anomaly signal unless an incident-wide baseline exists.
    pub fn evaluate(&self, group: &IncidentGroup) -> AnomalyEvidence {
        let mut errors_by_service: BTreeMap<&str, f64> = BTreeMap::new();
        for service in group.services() {
            errors_by_service.insert(service.as_str(), 0.0);
        }
        let mut total_errors = 0.0;
        for e in group.events().iter().filter(|e| e.is_error()) {
            total_errors += 1.0;
            if let Some(s) = e.service.as_deref() {
                *errors_by_service.entry(s).or_insert(0.0) += 1.0;
            }
        }

        let mut evidence = AnomalyEvidence::default();
        for (service, count) in errors_by_service {
            let Some(history) = self.source.history(service) else {
                debug!(service, "No baseline for service");
                continue;
            };
            let result = self.detector.detect_default(count, &history);
            debug!(
                service,
                errors = count,
                is_anomaly = result.is_anomaly,
                confidence = result.confidence,
                "Service error-count check"
            );
            evidence.by_service.insert(service.to_string(), result);
        }

        if let Some(history) = self.source.incident_history() {
            evidence.incident = Some(self.detector.detect_default(total_errors, &history));
        }
        evidence.by_level = self.detect_distribution(group);

        let anomalous = evidence
            .by_service
            .values()
            .chain(evidence.incident.iter())
            .filter(|r| r.is_anomaly)
            .count();
        if anomalous > 0 {
            info!(anomalous, "Anomalous error volume detected");
        }
        evidence
    }

    /// Compare the per-level event counts in `group` with their histories.
    ///
    /// Keyed by level name; levels without a baseline are omitted.
    pub fn detect_distribution(&self, group: &IncidentGroup) -> BTreeMap<String, AnomalyResult> {
        let mut counts: BTreeMap<String, f64> = BTreeMap::new();
        for e in group.events() {
            *counts.entry(e.level.as_str().to_ascii_uppercase()).or_insert(0.0) += 1.0;
        }

        counts
            .into_iter()
            .filter_map(|(level, count)| {
                let history = self.source.level_history(&level)?;
                Some((level, self.detector.detect_default(count, &history)))
            })
            .collect()
    }
}
