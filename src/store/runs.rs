//! Regulatory runs, run attribution and the audit log

use super::TariffStore;
use crate::models::{AuditLogEntry, RegulatoryRun, RunChange, RunDocument};
use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, Row};
use serde_json::json;
use std::fs;
use std::path::Path;
use uuid::Uuid;

fn run_from_sql(row: &Row) -> rusqlite::Result<RegulatoryRun> {
    Ok(RegulatoryRun {
        id: row.get("id")?,
        source: row.get("source")?,
        started_at: row.get("started_at")?,
        finished_at: row.get("finished_at")?,
        status: row.get("status")?,
        documents_discovered: row.get("documents_discovered")?,
        jobs_enqueued: row.get("jobs_enqueued")?,
        error: row.get("error")?,
    })
}

/// Append an audit entry on an existing connection, for use inside commit
/// transactions.
pub(crate) fn append_audit_on(
    conn: &Connection,
    entity: &str,
    entity_id: &str,
    action: &str,
    before_json: Option<&str>,
    after_json: Option<&str>,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO audit_log (entity, entity_id, action, before_json, after_json, at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            entity,
            entity_id,
            action,
            before_json,
            after_json,
            Utc::now().timestamp()
        ],
    )?;
    Ok(())
}

pub(crate) fn append_run_change_on(
    conn: &Connection,
    run_id: &str,
    rate_row_id: &str,
    candidate_id: Option<&str>,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO run_changes (run_id, rate_row_id, candidate_id, committed_at) \
         VALUES (?1, ?2, ?3, ?4)",
        params![run_id, rate_row_id, candidate_id, Utc::now().timestamp()],
    )?;
    Ok(())
}

impl TariffStore {
    /// Open a polling-cycle record. Everything the cycle discovers or
    /// changes is attributed back to this id.
    pub fn open_run(&self, source: &str) -> Result<String> {
        let conn = self.conn();
        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO regulatory_runs (id, source, started_at, status) \
             VALUES (?1, ?2, ?3, 'running')",
            params![id, source, Utc::now().timestamp()],
        )
        .context("Failed to open regulatory run")?;
        Ok(id)
    }

    pub fn close_run(
        &self,
        run_id: &str,
        documents_discovered: i64,
        jobs_enqueued: i64,
        error: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn();
        let status = if error.is_some() { "failed" } else { "completed" };
        conn.execute(
            "UPDATE regulatory_runs SET finished_at = ?2, status = ?3, \
             documents_discovered = ?4, jobs_enqueued = ?5, error = ?6 WHERE id = ?1",
            params![
                run_id,
                Utc::now().timestamp(),
                status,
                documents_discovered,
                jobs_enqueued,
                error
            ],
        )?;
        Ok(())
    }

    pub fn record_run_document(&self, d: &RunDocument) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT OR IGNORE INTO run_documents \
             (run_id, document_external_id, source, url, discovered_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                d.run_id,
                d.document_external_id,
                d.source,
                d.url,
                d.discovered_at
            ],
        )?;
        Ok(())
    }

    pub fn run_by_id(&self, id: &str) -> Result<Option<RegulatoryRun>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached("SELECT * FROM regulatory_runs WHERE id = ?1")?;
        let found = stmt
            .query_row([id], run_from_sql)
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(found)
    }

    pub fn recent_runs(&self, limit: usize) -> Result<Vec<RegulatoryRun>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT * FROM regulatory_runs ORDER BY started_at DESC LIMIT ?1",
        )?;
        let runs = stmt
            .query_map([limit as i64], run_from_sql)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(runs)
    }

    /// Last successfully completed run per source.
    pub fn last_success_by_source(&self) -> Result<Vec<(String, i64)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT source, MAX(finished_at) FROM regulatory_runs \
             WHERE status = 'completed' GROUP BY source",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn run_documents(&self, run_id: &str) -> Result<Vec<RunDocument>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT run_id, document_external_id, source, url, discovered_at \
             FROM run_documents WHERE run_id = ?1 ORDER BY discovered_at ASC",
        )?;
        let docs = stmt
            .query_map([run_id], |row| {
                Ok(RunDocument {
                    run_id: row.get(0)?,
                    document_external_id: row.get(1)?,
                    source: row.get(2)?,
                    url: row.get(3)?,
                    discovered_at: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(docs)
    }

    pub fn run_changes(&self, run_id: &str) -> Result<Vec<RunChange>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT run_id, rate_row_id, candidate_id, committed_at \
             FROM run_changes WHERE run_id = ?1 ORDER BY committed_at ASC",
        )?;
        let changes = stmt
            .query_map([run_id], |row| {
                Ok(RunChange {
                    run_id: row.get(0)?,
                    rate_row_id: row.get(1)?,
                    candidate_id: row.get(2)?,
                    committed_at: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(changes)
    }

    pub fn append_audit(
        &self,
        entity: &str,
        entity_id: &str,
        action: &str,
        before_json: Option<&str>,
        after_json: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn();
        append_audit_on(&conn, entity, entity_id, action, before_json, after_json)
            .context("Failed to append audit entry")?;
        Ok(())
    }

    pub fn audit_entries(&self, limit: usize) -> Result<Vec<AuditLogEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT id, entity, entity_id, action, before_json, after_json, at \
             FROM audit_log ORDER BY id DESC LIMIT ?1",
        )?;
        let entries = stmt
            .query_map([limit as i64], |row| {
                Ok(AuditLogEntry {
                    id: row.get(0)?,
                    entity: row.get(1)?,
                    entity_id: row.get(2)?,
                    action: row.get(3)?,
                    before_json: row.get(4)?,
                    after_json: row.get(5)?,
                    at: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    /// Summarize a run into a JSON manifest suitable for archival
    /// off-system. Returns the written path.
    pub fn write_run_manifest(&self, run_id: &str, manifest_dir: &str) -> Result<String> {
        let run = self
            .run_by_id(run_id)?
            .with_context(|| format!("run {} not found", run_id))?;
        let documents = self.run_documents(run_id)?;
        let changes = self.run_changes(run_id)?;

        let manifest = json!({
            "run": run,
            "documents": documents,
            "changes": changes,
        });

        fs::create_dir_all(manifest_dir)
            .with_context(|| format!("Failed to create manifest dir {}", manifest_dir))?;
        let path = Path::new(manifest_dir).join(format!("run-{}.json", run_id));
        fs::write(&path, serde_json::to_vec_pretty(&manifest)?)
            .with_context(|| format!("Failed to write manifest for run {}", run_id))?;
        Ok(path.to_string_lossy().into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_lifecycle_and_attribution() {
        let store = TariffStore::open_in_memory().unwrap();
        let run_id = store.open_run("federal_register").unwrap();

        store
            .record_run_document(&RunDocument {
                run_id: run_id.clone(),
                document_external_id: "2025-12345".into(),
                source: "federal_register".into(),
                url: "https://www.federalregister.gov/d/2025-12345".into(),
                discovered_at: Utc::now().timestamp(),
            })
            .unwrap();

        store.close_run(&run_id, 1, 1, None).unwrap();

        let run = store.run_by_id(&run_id).unwrap().unwrap();
        assert_eq!(run.status, "completed");
        assert_eq!(run.documents_discovered, 1);
        assert_eq!(store.run_documents(&run_id).unwrap().len(), 1);

        let last = store.last_success_by_source().unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].0, "federal_register");
    }

    #[test]
    fn test_audit_log_is_append_only_reads_newest_first() {
        let store = TariffStore::open_in_memory().unwrap();
        store
            .append_audit("rate_row", "r1", "INSERT", None, Some("{}"))
            .unwrap();
        store
            .append_audit("rate_row", "r1", "SUPERSEDE", Some("{}"), Some("{}"))
            .unwrap();

        let entries = store.audit_entries(10).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, "SUPERSEDE");
        assert_eq!(entries[1].action, "INSERT");
    }

    #[test]
    fn test_manifest_written_to_disk() {
        let store = TariffStore::open_in_memory().unwrap();
        let run_id = store.open_run("usitc").unwrap();
        store.close_run(&run_id, 0, 0, None).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = store
            .write_run_manifest(&run_id, dir.path().to_str().unwrap())
            .unwrap();
        let contents = std::fs::read_to_string(path).unwrap();
        assert!(contents.contains(&run_id));
        assert!(contents.contains("usitc"));
    }
}
