//! Root-cause ranking and the analysis orchestrator.

pub mod actions;
pub mod aggregator;
pub mod correlation;
pub mod model;
pub mod runner;

pub use self::actions::{recommend, ActionCategory, RecommendedAction};
pub use self::correlation::Ranker;
pub use self::model::{FusionWeights, RootCause, Signals};
pub use self::runner::{Analyzer, Stage};

use crate::config::ConfigError;
use crate::detect::{AnomalyEvidence, IncidentGroup};
use crate::event::{EventId, Level};
use crate::graph::{CausalGraph, GraphError};
use crate::ingest::IngestError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Errors a caller of the orchestrator can observe. Sparse data and failed
/// enrichment never surface here; they are reported on the result.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("malformed event: {0}")]
    MalformedEvent(#[from] IngestError),

    #[error("duplicate event id {0}")]
    DuplicateEventId(EventId),

    #[error("graph construction failed: {0}")]
    Graph(#[from] GraphError),

    #[error("analysis cancelled")]
    Cancelled,

    #[error("analysis worker failed: {0}")]
    Worker(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Non-fatal conditions met while analysing a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnalysisNote {
    /// Fewer than two timestamped events; the graph has no edges.
    GraphSkipped { timed_events: usize },
    /// The group exceeded `max_events`; the latest events were dropped.
    Truncated { dropped: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EnrichmentStatus {
    #[default]
    NotRequested,
    Applied {
        revised: bool,
    },
    /// The collaborator failed; the result is the heuristic one.
    Degraded {
        reason: String,
    },
}

impl EnrichmentStatus {
    pub fn is_degraded(&self) -> bool {
        matches!(self, EnrichmentStatus::Degraded { .. })
    }
}

/// Everything known about one incident group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    pub incident_summary: String,
    pub event_count: usize,
    pub affected_services: Vec<String>,
    pub time_range: Option<TimeRange>,
    pub severity: Option<Level>,
    pub causal_graph: CausalGraph,
    pub root_causes: Vec<RootCause>,
    pub recommended_actions: Vec<RecommendedAction>,
    /// Confidence of the top root cause, 0 when there is none.
    pub confidence: f64,
    pub anomaly: AnomalyEvidence,
    pub notes: Vec<AnalysisNote>,
    pub enrichment: EnrichmentStatus,
}

impl AnalysisResult {
    /// Root causes at or above `threshold`, e.g. the configured
    /// `ranking.confidence_threshold` before alerting.
    pub fn confident_root_causes(&self, threshold: f64) -> impl Iterator<Item = &RootCause> {
        self.root_causes
            .iter()
            .filter(move |rc| rc.confidence >= threshold)
    }

    /// Recompute everything derived from `root_causes`.
    pub(crate) fn refresh(&mut self, group: &IncidentGroup) {
        self.confidence = self.root_causes.first().map_or(0.0, |rc| rc.confidence);
        self.recommended_actions = recommend(group, &self.root_causes);
        self.incident_summary = summarize(group, &self.root_causes);
    }
}

/// Services named in the summary before the rest are counted.
const SUMMARY_SERVICES: usize = 3;

/// One-paragraph human-readable description of the incident.
pub fn summarize(group: &IncidentGroup, root_causes: &[RootCause]) -> String {
    if group.is_empty() {
        return "No events to analyze".to_string();
    }

    let services = group.services();
    let mut parts = vec![format!(
        "Incident involving {} events across {} service(s).",
        group.len(),
        services.len()
    )];

    if !services.is_empty() {
        let shown: Vec<&str> = services
            .iter()
            .take(SUMMARY_SERVICES)
            .map(String::as_str)
            .collect();
        let mut line = format!("Affected services: {}", shown.join(", "));
        if services.len() > SUMMARY_SERVICES {
            line.push_str(&format!(", and {} more", services.len() - SUMMARY_SERVICES));
        }
        line.push('.');
        parts.push(line);
    }

    let mut origins: Vec<&str> = Vec::new();
    for s in root_causes.iter().filter_map(|rc| rc.originating_service.as_deref()) {
        if !origins.contains(&s) {
            origins.push(s);
        }
    }
    if !origins.is_empty() {
        parts.push(format!("Likely originated in: {}.", origins.join(", ")));
    }

    if let Some(level) = group.severity() {
        parts.push(format!("Highest severity: {}.", level));
    }

    parts.join(" ")
}
