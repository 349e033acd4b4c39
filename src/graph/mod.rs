//! Temporal causal graph over the events of one incident.

pub mod builder;

pub use self::builder::GraphBuilder;

use crate::event::{Event, EventId};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum GraphError {
    #[error("edge endpoint {0} is not a node of the graph")]
    UnknownNode(EventId),

    #[error("edge confidence {0} is outside [0, 1]")]
    ConfidenceOutOfRange(f64),
}

/// Directed edge: `from` probably contributed to `to`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CausalEdge {
    pub from: EventId,
    pub to: EventId,
    pub confidence: f64,
    pub evidence: String,
    pub time_delta_secs: f64,
}

/// Nodes are events keyed by id; at most one edge per ordered pair.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CausalGraph {
    nodes: BTreeMap<EventId, Event>,
    edges: Vec<CausalEdge>,
    #[serde(skip)]
    index: HashMap<(EventId, EventId), usize>,
}

impl PartialEq for CausalGraph {
    fn eq(&self, other: &Self) -> bool {
        self.nodes == other.nodes && self.edges == other.edges
    }
}

impl CausalGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, event: Event) {
        self.nodes.insert(event.id.clone(), event);
    }

    /// Insert an edge, or strengthen the existing one for the same pair.
    ///
    /// A re-observed pair keeps whichever observation has the higher
    /// confidence. Returns `true` if the graph changed.
    pub fn add_edge(
        &mut self,
        from: &EventId,
        to: &EventId,
        confidence: f64,
        evidence: String,
        time_delta_secs: f64,
    ) -> Result<bool, GraphError> {
        for id in [from, to] {
            if !self.nodes.contains_key(id) {
                return Err(GraphError::UnknownNode(id.clone()));
            }
        }
        if !(0.0..=1.0).contains(&confidence) {
            return Err(GraphError::ConfidenceOutOfRange(confidence));
        }

        let key = (from.clone(), to.clone());
        if let Some(&i) = self.index.get(&key) {
            let existing = &mut self.edges[i];
            if existing.confidence >= confidence {
                return Ok(false);
            }
            existing.confidence = confidence;
            existing.evidence = evidence;
            existing.time_delta_secs = time_delta_secs;
            return Ok(true);
        }

        self.index.insert(key, self.edges.len());
        self.edges.push(CausalEdge {
            from: from.clone(),
            to: to.clone(),
            confidence,
            evidence,
            time_delta_secs,
        });
        Ok(true)
    }

    pub fn nodes(&self) -> &BTreeMap<EventId, Event> {
        &self.nodes
    }

    pub fn node(&self, id: &EventId) -> Option<&Event> {
        self.nodes.get(id)
    }

    pub fn edges(&self) -> &[CausalEdge] {
        &self.edges
    }

    pub fn edge(&self, from: &EventId, to: &EventId) -> Option<&CausalEdge> {
        self.index
            .get(&(from.clone(), to.clone()))
            .map(|&i| &self.edges[i])
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn outgoing<'a>(&'a self, id: &'a EventId) -> impl Iterator<Item = &'a CausalEdge> + 'a {
        self.edges.iter().filter(move |e| &e.from == id)
    }

    /// Highest confidence among the edges leaving `id`; `0.0` when none do.
    pub fn max_outgoing_confidence(&self, id: &EventId) -> f64 {
        self.outgoing(id).map(|e| e.confidence).fold(0.0, f64::max)
    }

    /// Services of the direct successors of `id`, other than its own.
    pub fn downstream_services(&self, id: &EventId) -> BTreeSet<String> {
        let own = self.nodes.get(id).and_then(|e| e.service.as_deref());
        self.outgoing(id)
            .filter_map(|e| self.nodes.get(&e.to))
            .filter_map(|e| e.service.clone())
            .filter(|s| Some(s.as_str()) != own)
            .collect()
    }

    /// Likely origins: nodes with no incoming edge and at least one outgoing
    /// edge, earliest first.
    ///
    /// When no node qualifies (a cycle, or no edges at all) the earliest
    /// node is returned alone.
    pub fn root_candidates(&self) -> Vec<&EventId> {
        let mut in_degree: HashMap<&EventId, usize> = HashMap::new();
        let mut out_degree: HashMap<&EventId, usize> = HashMap::new();
        for e in &self.edges {
            *in_degree.entry(&e.to).or_default() += 1;
            *out_degree.entry(&e.from).or_default() += 1;
        }

        let mut roots: Vec<&Event> = self
            .nodes
            .values()
            .filter(|n| !in_degree.contains_key(&n.id) && out_degree.contains_key(&n.id))
            .collect();

        if roots.is_empty() {
            roots.extend(self.earliest());
        }
        roots.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        roots.into_iter().map(|e| &e.id).collect()
    }

    fn earliest(&self) -> Option<&Event> {
        self.nodes
            .values()
            .filter(|e| e.timestamp.is_some())
            .min_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)))
    }
}
