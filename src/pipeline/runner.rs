//! Stage orchestration. Each stage is independently invocable and
//! idempotent: extraction can be re-run without network calls (cache),
//! normalization overwrites its own output, validation only reads.
//!
//! Extraction runs sources concurrently and isolates failures: one
//! source's outage never blocks the others. A shared cancel flag is checked
//! before each source starts; in-flight cache writes are atomic, so
//! cancelling never leaves a torn window entry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::cache::FetchCache;
use crate::common::error::{PipelineError, Result};
use crate::connectors::factory::connector_for;
use crate::connectors::http::HttpFetch;
use crate::connectors::retry::RetryPolicy;
use crate::connectors::SourceConnector;
use crate::domain::TimeWindow;
use crate::registry::SourceRegistry;

use super::normalize::Normalizer;
use super::storage::{CanonicalStore, RawStore};
use super::validate::{ValidationReport, Validator};

#[derive(Debug, Default)]
pub struct ExtractSummary {
    /// (source_id, record count) for each successful fetch.
    pub fetched: Vec<(String, usize)>,
    /// (source_id, error message) for each source that failed or was
    /// skipped by cancellation.
    pub failed: Vec<(String, String)>,
}

pub async fn run_extract(
    registry: &SourceRegistry,
    window: TimeWindow,
    cache: Arc<FetchCache>,
    raw_store: &RawStore,
    http: Arc<dyn HttpFetch>,
    retry: RetryPolicy,
    cancel: Arc<AtomicBool>,
) -> ExtractSummary {
    let mut tasks: JoinSet<(String, Result<usize>)> = JoinSet::new();
    for descriptor in registry.enabled() {
        let connector = connector_for(
            descriptor.clone(),
            Arc::clone(&http),
            Arc::clone(&cache),
            retry.clone(),
        );
        let store = raw_store.clone();
        let cancel = Arc::clone(&cancel);
        let source_id = descriptor.source_id.clone();
        tasks.spawn(async move {
            if cancel.load(Ordering::SeqCst) {
                return (source_id.clone(), Err(PipelineError::Cancelled));
            }
            let result = async {
                let records = connector.fetch(&window).await?;
                store.append(&source_id, &window, &records)?;
                Ok(records.len())
            }
            .await;
            (source_id, result)
        });
    }

    let mut summary = ExtractSummary::default();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((source_id, Ok(count))) => {
                info!(source_id, records = count, "source extracted");
                summary.fetched.push((source_id, count));
            }
            Ok((source_id, Err(e))) => {
                warn!(source_id, error = %e, "source failed, continuing with others");
                summary.failed.push((source_id, e.to_string()));
            }
            Err(join_err) => {
                error!(error = %join_err, "extract task panicked");
                summary.failed.push(("<unknown>".into(), join_err.to_string()));
            }
        }
    }
    summary.fetched.sort();
    summary.failed.sort();
    summary
}

#[derive(Debug, Default)]
pub struct NormalizeSummary {
    pub produced: usize,
    pub discarded: usize,
}

/// Normalize every bronze fetch into the silver layer. `reference_now`
/// bounds the future-timestamp check; callers pass `Utc::now()`.
pub fn run_normalize(
    registry: &SourceRegistry,
    raw_store: &RawStore,
    canonical_store: &CanonicalStore,
    reference_now: DateTime<Utc>,
) -> Result<NormalizeSummary> {
    let mut summary = NormalizeSummary::default();
    for (source_id, window) in raw_store.list()? {
        let descriptor = match registry.get(&source_id) {
            Some(d) => d,
            None => {
                warn!(source_id, "bronze data for a source missing from the registry, skipping");
                continue;
            }
        };
        let raws = raw_store.load(&source_id, &window)?;
        let outcome = Normalizer::new(descriptor, reference_now).normalize_batch(&raws);
        canonical_store.replace(&source_id, &window, &outcome.records)?;
        summary.produced += outcome.records.len();
        summary.discarded += outcome.discards.len();
    }
    Ok(summary)
}

/// Validate every silver file. Reports are returned in full so operators see
/// every problem in one pass.
pub fn run_validate(
    registry: &SourceRegistry,
    canonical_store: &CanonicalStore,
) -> Result<Vec<(std::path::PathBuf, ValidationReport)>> {
    let mut reports = Vec::new();
    for path in canonical_store.list()? {
        let records = canonical_store.load(&path)?;
        let expected_bounds = records
            .first()
            .and_then(|r| registry.get(&r.source_id))
            .and_then(|d| d.expected_bounds);
        let report = Validator::new(expected_bounds).validate(&records);
        reports.push((path, report));
    }
    Ok(reports)
}
