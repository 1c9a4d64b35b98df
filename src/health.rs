//! Freshness and health surface
//!
//! Derived reads over runs, the queue, the audit log and the rate store.
//! Nothing here mutates state; the report is cheap enough to serve on every
//! poll from a dashboard.

use crate::store::TariffStore;
use anyhow::Result;
use chrono::Utc;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct SourceFreshness {
    pub source: String,
    pub last_success_at: i64,
    pub age_secs: i64,
}

#[derive(Debug, Serialize)]
pub struct InvariantProbes {
    pub window_overlaps: usize,
    pub broken_chains: usize,
    pub missing_evidence: usize,
    pub pass: bool,
}

#[derive(Debug, Serialize)]
pub struct FreshnessReport {
    pub sources: Vec<SourceFreshness>,
    pub queue_depth: Vec<(String, i64)>,
    pub stuck_jobs: Vec<String>,
    pub invariants: InvariantProbes,
    pub program_row_counts: Vec<(String, i64)>,
    pub review_overdue: i64,
    pub generated_at: i64,
}

pub fn freshness_report(
    store: &TariffStore,
    stuck_job_bound_secs: i64,
    review_sla_hours: i64,
) -> Result<FreshnessReport> {
    let now = Utc::now().timestamp();

    let sources = store
        .last_success_by_source()?
        .into_iter()
        .map(|(source, ts)| SourceFreshness {
            source,
            last_success_at: ts,
            age_secs: now - ts,
        })
        .collect();

    let overlaps = store.no_window_overlap()?;
    let chains = store.supersession_chain_consistent()?;
    let evidence = store.every_row_has_evidence()?;
    let invariants = InvariantProbes {
        window_overlaps: overlaps.len(),
        broken_chains: chains.len(),
        missing_evidence: evidence.len(),
        pass: overlaps.is_empty() && chains.is_empty() && evidence.is_empty(),
    };

    let stuck_jobs = store
        .stuck_jobs(stuck_job_bound_secs)?
        .into_iter()
        .map(|j| j.id)
        .collect();

    Ok(FreshnessReport {
        sources,
        queue_depth: store.queue_depth()?,
        stuck_jobs,
        invariants,
        program_row_counts: store.rate_row_counts()?,
        review_overdue: store.overdue_candidates(review_sla_hours)?,
        generated_at: now,
    })
}

/// Cheap readiness probe for the load balancer: the store answers.
pub fn ready(store: &TariffStore) -> bool {
    store.get_metadata("bootstrap_done").is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobStatus;

    #[test]
    fn test_report_on_empty_store_passes_invariants() {
        let store = TariffStore::open_in_memory().unwrap();
        let report = freshness_report(&store, 1800, 72).unwrap();
        assert!(report.invariants.pass);
        assert!(report.sources.is_empty());
        assert!(report.stuck_jobs.is_empty());
        assert!(ready(&store));
    }

    #[test]
    fn test_report_surfaces_queue_and_stuck_jobs() {
        let store = TariffStore::open_in_memory().unwrap();
        store
            .enqueue_job("federal_register", "a", "https://x/a", None)
            .unwrap();
        let job = store.claim_next_job().unwrap().unwrap();

        // A job claimed in the past beyond the bound counts as stuck.
        {
            let conn = store.conn();
            conn.execute(
                "UPDATE ingest_jobs SET updated_at = updated_at - 7200 WHERE id = ?1",
                [&job.id],
            )
            .unwrap();
        }

        let report = freshness_report(&store, 1800, 72).unwrap();
        assert_eq!(report.stuck_jobs, vec![job.id.clone()]);
        assert!(report
            .queue_depth
            .contains(&(JobStatus::Fetching.as_str().to_string(), 1)));
    }
}
