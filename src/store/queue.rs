//! Ingest work queue
//!
//! At-most-one-owner claiming uses the portable select-then-update pattern:
//! a worker stamps a unique claim token onto one queued row and then reads
//! back only the row carrying its token. SQLite serializes the update, so
//! two workers can never own the same job.

use super::TariffStore;
use crate::models::{IngestJob, JobStatus};
use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Row};
use uuid::Uuid;

fn job_from_sql(row: &Row) -> rusqlite::Result<IngestJob> {
    let status: String = row.get("status")?;
    Ok(IngestJob {
        id: row.get("id")?,
        source: row.get("source")?,
        external_id: row.get("external_id")?,
        url: row.get("url")?,
        status: JobStatus::from_str(&status).unwrap_or(JobStatus::Failed),
        attempts: row.get("attempts")?,
        claim_token: row.get("claim_token")?,
        last_error: row.get("last_error")?,
        document_id: row.get("document_id")?,
        run_id: row.get("run_id")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

impl TariffStore {
    /// Enqueue a discovered document. Duplicate (source, external_id) pairs
    /// are ignored; returns the job id when a new row was created.
    pub fn enqueue_job(
        &self,
        source: &str,
        external_id: &str,
        url: &str,
        run_id: Option<&str>,
    ) -> Result<Option<String>> {
        let conn = self.conn();
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO ingest_jobs \
             (id, source, external_id, url, status, attempts, run_id, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, 'queued', 0, ?5, ?6, ?6)",
            params![id, source, external_id, url, run_id, now],
        )?;
        Ok(if inserted > 0 { Some(id) } else { None })
    }

    /// Claim the oldest queued job for this worker. Returns None when the
    /// queue is empty.
    pub fn claim_next_job(&self) -> Result<Option<IngestJob>> {
        let conn = self.conn();
        let token = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp();
        let claimed = conn.execute(
            "UPDATE ingest_jobs SET status = 'fetching', claim_token = ?1, \
             attempts = attempts + 1, updated_at = ?2 \
             WHERE id = (SELECT id FROM ingest_jobs WHERE status = 'queued' \
                         ORDER BY created_at ASC LIMIT 1)",
            params![token, now],
        )?;
        if claimed == 0 {
            return Ok(None);
        }
        let mut stmt =
            conn.prepare_cached("SELECT * FROM ingest_jobs WHERE claim_token = ?1")?;
        let job = stmt.query_row([&token], job_from_sql)?;
        Ok(Some(job))
    }

    /// Advance a claimed job to its next processing stage. The claim token
    /// must still match; a mismatch means ownership was lost.
    pub fn advance_job(&self, job_id: &str, token: &str, status: JobStatus) -> Result<()> {
        let conn = self.conn();
        let n = conn.execute(
            "UPDATE ingest_jobs SET status = ?3, updated_at = ?4 \
             WHERE id = ?1 AND claim_token = ?2",
            params![job_id, token, status.as_str(), Utc::now().timestamp()],
        )?;
        if n == 0 {
            anyhow::bail!("job {} not owned by this worker", job_id);
        }
        Ok(())
    }

    pub fn attach_job_document(&self, job_id: &str, token: &str, document_id: &str) -> Result<()> {
        let conn = self.conn();
        let n = conn.execute(
            "UPDATE ingest_jobs SET document_id = ?3, updated_at = ?4 \
             WHERE id = ?1 AND claim_token = ?2",
            params![job_id, token, document_id, Utc::now().timestamp()],
        )?;
        if n == 0 {
            anyhow::bail!("job {} not owned by this worker", job_id);
        }
        Ok(())
    }

    /// Return a job to the queue for another attempt, releasing ownership.
    pub fn requeue_job(&self, job_id: &str, error: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE ingest_jobs SET status = 'queued', claim_token = NULL, \
             last_error = ?2, updated_at = ?3 WHERE id = ?1",
            params![job_id, error, Utc::now().timestamp()],
        )
        .context("Failed to requeue job")?;
        Ok(())
    }

    /// Terminal transitions release the claim token as well.
    pub fn finish_job(&self, job_id: &str, status: JobStatus, error: Option<&str>) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE ingest_jobs SET status = ?2, claim_token = NULL, \
             last_error = COALESCE(?3, last_error), updated_at = ?4 WHERE id = ?1",
            params![job_id, status.as_str(), error, Utc::now().timestamp()],
        )
        .context("Failed to finish job")?;
        Ok(())
    }

    pub fn job_by_id(&self, id: &str) -> Result<Option<IngestJob>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached("SELECT * FROM ingest_jobs WHERE id = ?1")?;
        let found = stmt
            .query_row([id], job_from_sql)
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(found)
    }

    pub fn queue_depth(&self) -> Result<Vec<(String, i64)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT status, COUNT(*) FROM ingest_jobs GROUP BY status ORDER BY status",
        )?;
        let depth = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(depth)
    }

    /// Jobs sitting in a processing state longer than `bound_secs`.
    pub fn stuck_jobs(&self, bound_secs: i64) -> Result<Vec<IngestJob>> {
        let conn = self.conn();
        let cutoff = Utc::now().timestamp() - bound_secs;
        let mut stmt = conn.prepare_cached(
            "SELECT * FROM ingest_jobs \
             WHERE status IN ('fetching','rendering','chunking','extracting','validating','committing') \
               AND updated_at < ?1 \
             ORDER BY updated_at ASC",
        )?;
        let jobs = stmt
            .query_map([cutoff], job_from_sql)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enqueue_dedups_by_source_and_external_id() {
        let store = TariffStore::open_in_memory().unwrap();
        let first = store
            .enqueue_job("federal_register", "2025-12345", "https://x/1", None)
            .unwrap();
        assert!(first.is_some());

        let dup = store
            .enqueue_job("federal_register", "2025-12345", "https://x/1", None)
            .unwrap();
        assert!(dup.is_none());

        // Same external id under a different source is a distinct job.
        let other = store
            .enqueue_job("cbp_csms", "2025-12345", "https://y/1", None)
            .unwrap();
        assert!(other.is_some());
    }

    #[test]
    fn test_claim_is_exclusive_and_ordered() {
        let store = TariffStore::open_in_memory().unwrap();
        store
            .enqueue_job("federal_register", "a", "https://x/a", None)
            .unwrap();
        store
            .enqueue_job("federal_register", "b", "https://x/b", None)
            .unwrap();

        let first = store.claim_next_job().unwrap().unwrap();
        assert_eq!(first.external_id, "a");
        assert_eq!(first.status, JobStatus::Fetching);
        assert_eq!(first.attempts, 1);

        let second = store.claim_next_job().unwrap().unwrap();
        assert_eq!(second.external_id, "b");
        assert_ne!(first.claim_token, second.claim_token);

        assert!(store.claim_next_job().unwrap().is_none());
    }

    #[test]
    fn test_advance_requires_ownership() {
        let store = TariffStore::open_in_memory().unwrap();
        store
            .enqueue_job("federal_register", "a", "https://x/a", None)
            .unwrap();
        let job = store.claim_next_job().unwrap().unwrap();
        let token = job.claim_token.clone().unwrap();

        store
            .advance_job(&job.id, &token, JobStatus::Rendering)
            .unwrap();
        assert!(store
            .advance_job(&job.id, "someone-elses-token", JobStatus::Chunking)
            .is_err());
    }

    #[test]
    fn test_requeue_releases_claim_for_retry() {
        let store = TariffStore::open_in_memory().unwrap();
        store
            .enqueue_job("federal_register", "a", "https://x/a", None)
            .unwrap();
        let job = store.claim_next_job().unwrap().unwrap();
        store.requeue_job(&job.id, "timeout").unwrap();

        let again = store.claim_next_job().unwrap().unwrap();
        assert_eq!(again.id, job.id);
        assert_eq!(again.attempts, 2);
        assert_eq!(again.last_error.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_queue_depth_by_status() {
        let store = TariffStore::open_in_memory().unwrap();
        store.enqueue_job("s", "1", "https://x/1", None).unwrap();
        store.enqueue_job("s", "2", "https://x/2", None).unwrap();
        let job = store.claim_next_job().unwrap().unwrap();
        store
            .finish_job(&job.id, JobStatus::NeedsReview, Some("gate failed"))
            .unwrap();

        let depth = store.queue_depth().unwrap();
        assert!(depth.contains(&("queued".to_string(), 1)));
        assert!(depth.contains(&("needs_review".to_string(), 1)));
    }
}
