//! faultmedic -- automated root-cause analysis for operational incidents.
//!
//! Normalized events are grouped into incidents, a temporal causal graph is
//! built per incident with a sliding window, and candidate root causes are
//! ranked by fusing graph topology, message frequency and statistical
//! anomaly evidence.

pub mod analysis;
pub mod config;
pub mod detect;
pub mod enrich;
pub mod event;
pub mod graph;
pub mod ingest;
pub mod logging;

pub use analysis::{AnalysisError, AnalysisResult, Analyzer, RootCause};
pub use config::RcaConfig;
pub use event::{Event, EventId, Level};

use anyhow::{Context, Result};
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Load configuration, normalize `raw` and analyse every incident in it.
///
/// Without `config_path` the usual search applies (see
/// [`RcaConfig::load_or_default`]). `FAULTMEDIC_*` overrides apply either way.
pub async fn run(
    config_path: Option<&Path>,
    raw: Vec<ingest::RawEvent>,
    cancel: &CancellationToken,
) -> Result<Vec<AnalysisResult>> {
    let config = match config_path {
        Some(path) => RcaConfig::load_with_overrides(path, |key| std::env::var(key).ok())
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => RcaConfig::load_or_default(),
    };
    logging::init(&config.logging);

    let mut normalizer = ingest::Normalizer::new();
    let events = raw
        .into_iter()
        .enumerate()
        .map(|(i, r)| {
            normalizer
                .normalize(r)
                .with_context(|| format!("Rejected event #{}", i))
        })
        .collect::<Result<Vec<_>>>()?;

    let analyzer = Analyzer::new(config).context("Invalid configuration")?;
    let results = analyzer.analyze(events, cancel).await?;
    tracing::info!(incidents = results.len(), "Analysis complete");
    Ok(results)
}
