use crate::analysis::aggregator::cluster_messages;
use crate::analysis::model::{rank_order, FusionWeights, RootCause, Signals};
use crate::config::RankingConfig;
use crate::detect::{AnomalyEvidence, IncidentGroup};
use crate::event::{Event, EventId};
use crate::graph::CausalGraph;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::debug;

/// Longest message excerpt quoted in a description.
const MAX_MESSAGE_LEN: usize = 200;

/// Fuses graph topology, message frequency and anomaly evidence into a
/// confidence-ordered list of root causes.
#[derive(Debug, Clone)]
pub struct Ranker {
    weights: FusionWeights,
    min_share: f64,
}

impl Default for Ranker {
    fn default() -> Self {
        Self::from_config(&RankingConfig::default())
    }
}

/// Candidates are merged by originating service, or by event when the
/// service is unknown.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum CandidateKey {
    Service(String),
    Event(EventId),
}

#[derive(Debug, Default)]
struct Candidate {
    service: Option<String>,
    graph_description: Option<String>,
    frequency_description: Option<String>,
    graph: Option<f64>,
    frequency: Option<f64>,
    evidence: Vec<String>,
    event_ids: Vec<EventId>,
    first_seen: Option<DateTime<Utc>>,
}

impl Candidate {
    fn support(&mut self, e: &Event) {
        if !self.event_ids.contains(&e.id) {
            self.event_ids.push(e.id.clone());
        }
        if let Some(ts) = e.timestamp {
            self.first_seen = Some(self.first_seen.map_or(ts, |f| f.min(ts)));
        }
    }
}

impl Ranker {
    pub fn new(weights: FusionWeights, min_share: f64) -> Self {
        Self { weights, min_share }
    }

    pub fn from_config(cfg: &RankingConfig) -> Self {
        Self::new(cfg.weights, cfg.frequency_min_share)
    }

    pub fn weights(&self) -> &FusionWeights {
        &self.weights
    }

    /// Rank root causes for `group`.
    ///
    /// An empty group yields an empty list.
    pub fn rank(
        &self,
        group: &IncidentGroup,
        graph: &CausalGraph,
        anomalies: &AnomalyEvidence,
    ) -> Vec<RootCause> {
        if group.is_empty() {
            return Vec::new();
        }

        let mut candidates: BTreeMap<CandidateKey, Candidate> = BTreeMap::new();
        self.graph_candidates(graph, &mut candidates);
        self.frequency_candidates(group, &mut candidates);

        let mut causes: Vec<RootCause> = candidates
            .into_iter()
            .map(|(_, c)| self.finish(c, anomalies))
            .collect();
        causes.sort_by(rank_order);

        debug!(
            candidates = causes.len(),
            top = causes.first().map(|c| c.confidence).unwrap_or(0.0),
            "Ranked root causes"
        );
        causes
    }

    fn graph_candidates(&self, graph: &CausalGraph, out: &mut BTreeMap<CandidateKey, Candidate>) {
        for id in graph.root_candidates() {
            let Some(event) = graph.node(id) else { continue };
            let confidence = graph.max_outgoing_confidence(id);
            let c = out.entry(key_for(event)).or_default();

            c.service = event.service.clone();
            c.graph = Some(c.graph.map_or(confidence, |g| g.max(confidence)));
            if c.graph_description.is_none() {
                c.graph_description = Some(match &event.service {
                    Some(s) => format!("{} service failure or degradation", s),
                    None => format!("Failure originating at: {}", excerpt(&event.message)),
                });
            }
            c.evidence.push(format!("{}: {}", event.service_or_unknown(), event.message));
            if let Some(ts) = event.timestamp {
                c.evidence.push(format!("Errors started at {}", ts.to_rfc3339()));
            }
            let downstream = graph.downstream_services(id);
            if !downstream.is_empty() {
                let names: Vec<&str> = downstream.iter().map(String::as_str).collect();
                c.evidence
                    .push(format!("Likely caused errors in: {}", names.join(", ")));
            }
            c.support(event);
        }
    }

    fn frequency_candidates(
        &self,
        group: &IncidentGroup,
        out: &mut BTreeMap<CandidateKey, Candidate>,
    ) {
        for cluster in cluster_messages(group) {
            if cluster.share < self.min_share {
                continue;
            }
            let first = cluster.first;
            let c = out.entry(key_for(first)).or_default();

            if c.service.is_none() {
                c.service = first.service.clone();
            }
            c.frequency = Some(c.frequency.map_or(cluster.share, |f| f.max(cluster.share)));
            if c.frequency_description.is_none() {
                c.frequency_description =
                    Some(format!("Repeated error: {}", excerpt(&first.message)));
            }
            if c.graph.is_none() {
                c.evidence.push(first.message.clone());
            }
            c.evidence.push(format!("Occurred {} times", cluster.len()));
            c.evidence.push(format!(
                "Represents {:.1}% of all events in this incident.",
                cluster.share * 100.0
            ));
            for e in &cluster.events {
                c.support(e);
            }
        }
    }

    fn finish(&self, c: Candidate, anomalies: &AnomalyEvidence) -> RootCause {
        let mut evidence = c.evidence;
        let anomaly = anomalies.for_service(c.service.as_deref());
        if let Some(r) = anomaly.filter(|r| !r.is_insufficient()) {
            if r.is_anomaly {
                evidence.push(format!(
                    "Anomaly ({}): score {:.2}, confidence {:.2}, baseline {:.2}",
                    r.method, r.score, r.confidence, r.baseline_value
                ));
            } else {
                evidence.push(format!("No anomaly in error volume ({})", r.method));
            }
        }

        let signals = Signals {
            graph: c.graph,
            frequency: c.frequency,
            anomaly: anomaly.and_then(|r| r.evidence_confidence()),
        };
        let description = c
            .graph_description
            .or(c.frequency_description)
            .unwrap_or_else(|| "Unexplained failure".to_string());

        RootCause {
            description,
            confidence: self.weights.fuse(&signals),
            evidence,
            originating_service: c.service,
            event_ids: c.event_ids,
            first_seen: c.first_seen,
            signals,
        }
    }
}

fn key_for(e: &Event) -> CandidateKey {
    match &e.service {
        Some(s) => CandidateKey::Service(s.clone()),
        None => CandidateKey::Event(e.id.clone()),
    }
}

fn excerpt(message: &str) -> String {
    match message.char_indices().nth(MAX_MESSAGE_LEN) {
        Some((i, _)) => format!("{}...", &message[..i]),
        None => message.to_string(),
    }
}
