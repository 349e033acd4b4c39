use crate::analysis::model::rank_order;
use crate::analysis::{
    AnalysisError, AnalysisNote, AnalysisResult, EnrichmentStatus, Ranker, RootCause, TimeRange,
};
use crate::config::RcaConfig;
use crate::detect::{group_events, AnomalyDetector, AnomalyEngine, BaselineSource, IncidentGroup};
use crate::enrich::{validate_revision, Enricher, EnrichmentError, EnrichmentRequest};
use crate::event::Event;
use crate::graph::GraphBuilder;
use futures::{stream, StreamExt, TryStreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn};

/// Per-group analysis state. Failures before `Enriched` abort the group;
/// failures while enriching only degrade it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Grouped,
    GraphBuilt,
    Ranked,
    Enriched,
    Done,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Received => write!(f, "RECEIVED"),
            Stage::Grouped => write!(f, "GROUPED"),
            Stage::GraphBuilt => write!(f, "GRAPH_BUILT"),
            Stage::Ranked => write!(f, "RANKED"),
            Stage::Enriched => write!(f, "ENRICHED"),
            Stage::Done => write!(f, "DONE"),
        }
    }
}

/// Drives grouping, graph construction, ranking and optional enrichment.
///
/// Cloning is cheap; every clone shares the same configuration, baselines
/// and enricher.
#[derive(Clone)]
pub struct Analyzer {
    config: Arc<RcaConfig>,
    builder: GraphBuilder,
    ranker: Ranker,
    anomaly: Option<AnomalyEngine>,
    enricher: Option<Arc<dyn Enricher>>,
}

impl std::fmt::Debug for Analyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Analyzer")
            .field("config", &self.config)
            .field("anomaly", &self.anomaly)
            .field("enricher", &self.enricher.as_ref().map(|e| e.name().to_string()))
            .finish_non_exhaustive()
    }
}

impl Analyzer {
    /// Validate `config` and build an analyzer from it.
    pub fn new(config: RcaConfig) -> Result<Self, AnalysisError> {
        config.validate()?;
        Ok(Self {
            builder: GraphBuilder::from_config(&config.graph),
            ranker: Ranker::from_config(&config.ranking),
            config: Arc::new(config),
            anomaly: None,
            enricher: None,
        })
    }

    /// Used only while `enrichment.enabled` is set.
    pub fn with_enricher<E: Enricher + 'static>(mut self, enricher: E) -> Self {
        self.enricher = Some(Arc::new(enricher));
        self
    }

    pub fn with_baselines<B: BaselineSource + 'static>(mut self, source: B) -> Self {
        let detector = AnomalyDetector::from_config(&self.config.anomaly);
        self.anomaly = Some(AnomalyEngine::new(detector, Arc::new(source)));
        self
    }

    pub fn config(&self) -> &RcaConfig {
        &self.config
    }

    /// Group `events` into incidents and analyse every group, at most
    /// `limits.workers` at a time. Results come back in group order.
    pub async fn analyze(
        &self,
        events: Vec<Event>,
        cancel: &CancellationToken,
    ) -> Result<Vec<AnalysisResult>, AnalysisError> {
        if cancel.is_cancelled() {
            return Err(AnalysisError::Cancelled);
        }

        let mut seen = HashSet::with_capacity(events.len());
        for e in &events {
            if !seen.insert(&e.id) {
                return Err(AnalysisError::DuplicateEventId(e.id.clone()));
            }
        }

        let groups = group_events(
            events,
            self.config.grouping.window(),
            self.config.grouping.strategy,
        );

        stream::iter(groups)
            .map(|group| self.analyze_group(group, cancel))
            .buffered(self.config.limits.workers.max(1))
            .try_collect()
            .await
    }

    /// Analyse one incident group, enriching it if configured.
    pub async fn analyze_group(
        &self,
        group: IncidentGroup,
        cancel: &CancellationToken,
    ) -> Result<AnalysisResult, AnalysisError> {
        if cancel.is_cancelled() {
            return Err(AnalysisError::Cancelled);
        }
        debug!(stage = %Stage::Received, events = group.len(), "Stage transition");

        let (group, notes) = self.limit(&group);
        let group = Arc::new(group);

        let this = self.clone();
        let shared = Arc::clone(&group);
        let mut result = tokio::task::spawn_blocking(move || this.heuristic(&shared, notes))
            .await
            .map_err(|e| AnalysisError::Worker(e.to_string()))??;

        let enricher = self
            .enricher
            .as_ref()
            .filter(|_| self.config.enrichment.enabled);
        if let Some(enricher) = enricher {
            let request = EnrichmentRequest {
                group: Arc::clone(&group),
                graph: Arc::new(result.causal_graph.clone()),
                root_causes: result.root_causes.clone(),
            };
            match self.call_enricher(enricher, request, cancel).await {
                Ok(Some(mut revised)) => {
                    revised.sort_by(rank_order);
                    result.root_causes = revised;
                    result.refresh(&group);
                    result.enrichment = EnrichmentStatus::Applied { revised: true };
                }
                Ok(None) => result.enrichment = EnrichmentStatus::Applied { revised: false },
                Err(e) => {
                    warn!(
                        enricher = enricher.name(),
                        error = %e,
                        "Enrichment unavailable, keeping heuristic result"
                    );
                    result.enrichment = EnrichmentStatus::Degraded {
                        reason: e.to_string(),
                    };
                }
            }
            debug!(stage = %Stage::Enriched, status = ?result.enrichment, "Stage transition");
        }

        debug!(
            stage = %Stage::Done,
            root_causes = result.root_causes.len(),
            confidence = result.confidence,
            "Stage transition"
        );
        Ok(result)
    }

    /// Stages up to `RANKED`, synchronously and without enrichment.
    pub fn analyze_group_heuristic(
        &self,
        group: &IncidentGroup,
    ) -> Result<AnalysisResult, AnalysisError> {
        let (group, notes) = self.limit(group);
        self.heuristic(&group, notes)
    }

    fn limit(&self, group: &IncidentGroup) -> (IncidentGroup, Vec<AnalysisNote>) {
        let max = self.config.limits.max_events;
        let (kept, dropped) = group.truncated(max);
        if dropped == 0 {
            return (kept, Vec::new());
        }
        warn!(
            events = group.len(),
            max_events = max,
            dropped,
            "Incident exceeds max_events, truncating"
        );
        (kept, vec![AnalysisNote::Truncated { dropped }])
    }

    fn heuristic(
        &self,
        group: &IncidentGroup,
        mut notes: Vec<AnalysisNote>,
    ) -> Result<AnalysisResult, AnalysisError> {
        let span = info_span!("analysis", events = group.len(), start = ?group.start_time());
        let _guard = span.enter();
        debug!(stage = %Stage::Grouped, services = group.services().len(), "Stage transition");

        let timed_events = group.timed_events().count();
        if timed_events < 2 {
            warn!(timed_events, "Too few timestamped events, skipping graph construction");
            notes.push(AnalysisNote::GraphSkipped { timed_events });
        }
        let graph = self.builder.build(group)?;
        debug!(
            stage = %Stage::GraphBuilt,
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "Stage transition"
        );

        let anomaly = self
            .anomaly
            .as_ref()
            .map(|engine| engine.evaluate(group))
            .unwrap_or_default();
        let root_causes: Vec<RootCause> = self.ranker.rank(group, &graph, &anomaly);
        debug!(stage = %Stage::Ranked, root_causes = root_causes.len(), "Stage transition");

        let time_range = match (group.start_time(), group.end_time()) {
            (Some(start), Some(end)) => Some(TimeRange { start, end }),
            _ => None,
        };
        let mut result = AnalysisResult {
            incident_summary: String::new(),
            event_count: group.len(),
            affected_services: group.services().iter().cloned().collect(),
            time_range,
            severity: group.severity(),
            causal_graph: graph,
            root_causes,
            recommended_actions: Vec::new(),
            confidence: 0.0,
            anomaly,
            notes,
            enrichment: EnrichmentStatus::NotRequested,
        };
        result.refresh(group);
        Ok(result)
    }

    /// Run the enricher on its own task under the configured timeout.
    async fn call_enricher(
        &self,
        enricher: &Arc<dyn Enricher>,
        request: EnrichmentRequest,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<RootCause>>, EnrichmentError> {
        let task = Arc::clone(enricher);
        let mut handle = tokio::spawn(async move { task.enrich(request).await });

        let outcome = tokio::select! {
            _ = cancel.cancelled() => None,
            joined = tokio::time::timeout(self.config.enrichment.timeout(), &mut handle) => {
                Some(joined)
            }
        };
        let joined = match outcome {
            None => {
                handle.abort();
                return Err(EnrichmentError::Cancelled);
            }
            Some(Err(_elapsed)) => {
                handle.abort();
                return Err(EnrichmentError::Timeout {
                    secs: self.config.enrichment.timeout_secs,
                });
            }
            Some(Ok(joined)) => joined,
        };

        let revised = match joined {
            Ok(revised) => revised?,
            Err(e) if e.is_panic() => return Err(EnrichmentError::Panicked),
            Err(e) => return Err(EnrichmentError::Failed(e.to_string())),
        };
        if let Some(revised) = &revised {
            validate_revision(revised)?;
        }
        Ok(revised)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Level;
    use chrono::{Duration, TimeZone, Utc};

    fn ev(id: usize, secs: i64) -> Event {
        Event::new(format!("e{}", id), "worker crashed")
            .with_timestamp(
                Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap() + Duration::seconds(secs),
            )
            .with_service("worker")
            .with_level(Level::Error)
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut cfg = RcaConfig::default();
        cfg.limits.max_events = 0;
        assert!(matches!(Analyzer::new(cfg), Err(AnalysisError::Config(_))));
    }

    #[test]
    fn test_truncation_is_noted() {
        let mut cfg = RcaConfig::default();
        cfg.limits.max_events = 3;
        let analyzer = Analyzer::new(cfg).unwrap();

        let group = IncidentGroup::from_events((0..5).map(|i| ev(i, i as i64)).collect());
        let result = analyzer.analyze_group_heuristic(&group).unwrap();
        assert_eq!(result.event_count, 3);
        assert_eq!(result.notes, vec![AnalysisNote::Truncated { dropped: 2 }]);
        assert_eq!(result.causal_graph.node_count(), 3);
    }

    #[test]
    fn test_single_event_skips_graph() {
        let analyzer = Analyzer::new(RcaConfig::default()).unwrap();
        let group = IncidentGroup::from_events(vec![ev(0, 0)]);
        let result = analyzer.analyze_group_heuristic(&group).unwrap();

        assert_eq!(result.notes, vec![AnalysisNote::GraphSkipped { timed_events: 1 }]);
        assert_eq!(result.causal_graph.edge_count(), 0);
        assert_eq!(result.root_causes.len(), 1);
        assert_eq!(result.confidence, result.root_causes[0].confidence);
        assert_eq!(result.enrichment, EnrichmentStatus::NotRequested);
    }

    #[derive(Clone, Default)]
    struct Capture(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_grouping_is_logged_once() {
        let captured = Capture::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let analyzer = Analyzer::new(RcaConfig::default()).unwrap();
        tracing::subscriber::with_default(subscriber, || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let events = vec![ev(0, 0), ev(1, 1)];
            rt.block_on(analyzer.analyze(events, &CancellationToken::new()))
                .unwrap();
        });

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert_eq!(output.matches("Grouped events into incidents").count(), 1);
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::GraphBuilt.to_string(), "GRAPH_BUILT");
        assert_eq!(Stage::Done.to_string(), "DONE");
    }
}
