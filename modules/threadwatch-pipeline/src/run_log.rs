//! Job run log: one `job_runs` row per batch job with its final counts.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use threadwatch_common::{JobKind, JobRun};

use crate::traits::ItemStore;

/// Build the run record for a finished job.
pub fn job_run<S: Serialize>(
    job: JobKind,
    started_at: DateTime<Utc>,
    stats: &S,
    error: Option<&anyhow::Error>,
) -> JobRun {
    let stats = serde_json::to_value(stats).unwrap_or_else(|e| {
        warn!(error = %e, "Could not serialize job stats");
        serde_json::Value::Null
    });
    JobRun::new(job, started_at, stats, error.map(|e| format!("{e:#}")))
}

/// Persist the run record. A failed write is logged; it never fails the job.
pub async fn record<S: Serialize>(
    store: &dyn ItemStore,
    job: JobKind,
    started_at: DateTime<Utc>,
    stats: &S,
    error: Option<&anyhow::Error>,
) {
    let run = job_run(job, started_at, stats, error);
    match store.record_run(&run).await {
        Ok(()) => info!(run_id = %run.id, job = job.as_str(), failed = run.error.is_some(), "Job run recorded"),
        Err(e) => warn!(job = job.as_str(), error = %e, "Failed to record job run"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::IngestStats;

    #[test]
    fn job_run_carries_stats_and_error_chain() {
        let stats = IngestStats {
            posts_stored: 4,
            ..Default::default()
        };
        let err = anyhow::anyhow!("listing failed").context("fetching page 1");
        let run = job_run(JobKind::Ingest, Utc::now(), &stats, Some(&err));

        assert_eq!(run.job, JobKind::Ingest);
        assert_eq!(run.stats["posts_stored"], 4);
        let message = run.error.unwrap();
        assert!(message.contains("fetching page 1"));
        assert!(message.contains("listing failed"));
        assert!(run.finished_at >= run.started_at);
    }
}
