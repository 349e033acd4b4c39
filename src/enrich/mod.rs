//! Boundary to an optional narrative-enrichment collaborator.
//!
//! The collaborator (typically an LLM service) sees the incident, its graph
//! and the heuristic ranking, and may return a revised ranking. It is not
//! trusted: the orchestrator runs it under a timeout on its own task and
//! validates whatever comes back.

use crate::analysis::RootCause;
use crate::detect::IncidentGroup;
use crate::graph::CausalGraph;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EnrichmentError {
    #[error("enrichment timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("enrichment failed: {0}")]
    Failed(String),

    #[error("malformed enrichment response: {0}")]
    Malformed(String),

    #[error("enrichment task panicked")]
    Panicked,

    #[error("enrichment cancelled")]
    Cancelled,
}

/// Input handed to an [`Enricher`]. Shared, read-only.
#[derive(Debug, Clone)]
pub struct EnrichmentRequest {
    pub group: Arc<IncidentGroup>,
    pub graph: Arc<CausalGraph>,
    pub root_causes: Vec<RootCause>,
}

/// External capability that may revise a ranked root-cause list.
#[async_trait::async_trait]
pub trait Enricher: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str {
        "enricher"
    }

    /// `Ok(None)` keeps the heuristic ranking unchanged.
    ///
    /// Retries, if any, are the implementation's business.
    async fn enrich(
        &self,
        request: EnrichmentRequest,
    ) -> Result<Option<Vec<RootCause>>, EnrichmentError>;
}

/// Check a revised ranking before it replaces the heuristic one.
pub fn validate_revision(revised: &[RootCause]) -> Result<(), EnrichmentError> {
    if revised.is_empty() {
        return Err(EnrichmentError::Malformed(
            "revised root-cause list is empty".to_string(),
        ));
    }
    if let Some((i, _)) = revised
        .iter()
        .enumerate()
        .find(|(_, rc)| !rc.is_well_formed())
    {
        return Err(EnrichmentError::Malformed(format!(
            "root cause #{} has an empty description or a confidence outside [0, 1]",
            i
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Signals;

    fn cause(confidence: f64) -> RootCause {
        RootCause {
            description: "db saturation".to_string(),
            confidence,
            evidence: vec![],
            originating_service: Some("db".to_string()),
            event_ids: vec![],
            first_seen: None,
            signals: Signals::default(),
        }
    }

    #[test]
    fn test_validate_revision() {
        assert!(validate_revision(&[cause(0.9), cause(0.1)]).is_ok());
        assert!(matches!(
            validate_revision(&[]),
            Err(EnrichmentError::Malformed(_))
        ));
        assert!(matches!(
            validate_revision(&[cause(0.9), cause(f64::INFINITY)]),
            Err(EnrichmentError::Malformed(msg)) if msg.contains("#1")
        ));
    }
}
