use crate::config::GraphConfig;
use crate::detect::IncidentGroup;
use crate::event::Event;
use crate::graph::{CausalGraph, GraphError};
use chrono::Duration;
use std::collections::VecDeque;
use tracing::debug;

/// Builds a [`CausalGraph`] with a single sliding-window pass.
///
/// Only events closer than `max_time_window` are compared, so the cost is
/// O(n·k) for `k` events active in any one window.
#[derive(Debug, Clone)]
pub struct GraphBuilder {
    max_time_window: Duration,
    propagation_window: Duration,
    escalation_boost: f64,
    propagation_boost: f64,
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::from_config(&GraphConfig::default())
    }
}

impl GraphBuilder {
    pub fn from_config(cfg: &GraphConfig) -> Self {
        Self {
            max_time_window: cfg.max_time_window(),
            propagation_window: cfg.propagation_window(),
            escalation_boost: cfg.escalation_boost,
            propagation_boost: cfg.propagation_boost,
        }
    }

    pub fn with_max_time_window(mut self, window: Duration) -> Self {
        self.max_time_window = window;
        self
    }

    pub fn max_time_window(&self) -> Duration {
        self.max_time_window
    }

    /// Build the graph for `group`.
    ///
    /// Events without a timestamp are not placed. With fewer than two timed
    /// events the result has nodes but no edges.
    pub fn build(&self, group: &IncidentGroup) -> Result<CausalGraph, GraphError> {
        let mut graph = CausalGraph::new();
        for e in group.timed_events() {
            graph.add_node(e.clone());
        }
        if graph.node_count() < 2 || self.max_time_window <= Duration::zero() {
            return Ok(graph);
        }

        let window_secs = as_secs_f64(self.max_time_window);
        let mut active: VecDeque<&Event> = VecDeque::new();

        // IncidentGroup keeps timed events in ascending order.
        for current in group.timed_events() {
            let Some(now) = current.timestamp else { continue };

            while let Some(ts) = active.front().and_then(|e| e.timestamp) {
                if now - ts <= self.max_time_window {
                    break;
                }
                active.pop_front();
            }

            for prior in &active {
                if prior.id == current.id {
                    continue;
                }
                let Some(then) = prior.timestamp else { continue };
                let delta = now - then;
                let delta_secs = as_secs_f64(delta);
                let decay = 1.0 - delta_secs / window_secs;
                if decay <= 0.0 {
                    continue;
                }
                let (weight, evidence) = self.pattern(prior, current, delta);
                let confidence = (decay * weight).clamp(0.0, 1.0);
                graph.add_edge(
                    &prior.id,
                    &current.id,
                    confidence,
                    evidence,
                    delta_secs,
                )?;
            }

            active.push_back(current);
        }

        debug!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            window_secs = self.max_time_window.num_seconds(),
            "Built causal graph"
        );
        Ok(graph)
    }

    /// Pattern weight and evidence text for a candidate edge.
    fn pattern(&self, prior: &Event, current: &Event, delta: Duration) -> (f64, String) {
        let dt = format!("Δt={:.1}s", as_secs_f64(delta));
        let mut weight = 1.0;

        let mut evidence = match (prior.service.as_deref(), current.service.as_deref()) {
            (Some(a), Some(b)) if a == b => format!("same-service follow-up, {}", dt),
            (Some(a), Some(b)) if delta <= self.propagation_window => {
                weight *= self.propagation_boost;
                format!("cross-service propagation {} → {}, {}", a, b, dt)
            }
            (Some(a), Some(b)) => format!("cross-service follow-up {} → {}, {}", a, b, dt),
            _ => format!("temporal follow-up, {}", dt),
        };

        let escalates = prior.is_error() && prior.level.at_least(&current.level).unwrap_or(false);
        if escalates {
            weight *= self.escalation_boost;
            evidence.push_str(&format!(
                "; severity escalation {} → {}",
                prior.level, current.level
            ));
        }

        (weight, evidence)
    }
}

/// Seconds with sub-millisecond precision; nanosecond overflow falls back
/// to milliseconds.
fn as_secs_f64(d: Duration) -> f64 {
    match d.num_nanoseconds() {
        Some(ns) => ns as f64 / 1e9,
        None => d.num_milliseconds() as f64 / 1e3,
    }
}
