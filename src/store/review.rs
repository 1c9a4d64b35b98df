//! Candidate changes and the review queue
//!
//! Candidates that clear every gate are auto-approved by the pipeline;
//! everything else waits here for an operator. Rejections are kept for
//! audit, never deleted.

use super::rates::{date_from_sql, date_to_sql, opt_date_to_sql};
use super::TariffStore;
use crate::models::{CandidateChange, CandidateStatus, RateRole, RateSubject};
use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use rusqlite::{params, Row};

fn candidate_from_sql(row: &Row) -> rusqlite::Result<CandidateChange> {
    let status: String = row.get("status")?;
    let role: String = row.get("role")?;
    let start: String = row.get("effective_start")?;
    let end: Option<String> = row.get("effective_end")?;
    let parse = |s: &str| {
        date_from_sql(s).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, e.into())
        })
    };
    Ok(CandidateChange {
        id: row.get("id")?,
        program_id: row.get("program_id")?,
        subject: RateSubject {
            hts8: row.get("hts8")?,
            hts10: row.get("hts10")?,
            country: row.get("country")?,
            country_group: row.get("country_group")?,
            material: row.get("material")?,
            variant: row.get("variant")?,
        },
        role: RateRole::from_str(&role).unwrap_or(RateRole::Impose),
        chapter99_code: row.get("chapter99_code")?,
        duty_rate: row.get("duty_rate")?,
        formula: row.get("formula")?,
        effective_start: parse(&start)?,
        effective_end: end.as_deref().map(parse).transpose()?,
        evidence_id: row.get("evidence_id")?,
        source_document_id: row.get("source_document_id")?,
        run_id: row.get("run_id")?,
        dataset_tag: row.get("dataset_tag")?,
        status: CandidateStatus::from_str(&status).unwrap_or(CandidateStatus::Pending),
        block_reason: row.get("block_reason")?,
        priority: row.get("priority")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

impl TariffStore {
    pub fn insert_candidate(&self, c: &CandidateChange) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO candidate_changes (id, program_id, hts8, hts10, country, country_group, \
             material, variant, role, chapter99_code, duty_rate, formula, effective_start, \
             effective_end, evidence_id, source_document_id, run_id, dataset_tag, status, \
             block_reason, priority, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, \
                     ?17, ?18, ?19, ?20, ?21, ?22, ?23)",
            params![
                c.id,
                c.program_id,
                c.subject.hts8,
                c.subject.hts10,
                c.subject.country,
                c.subject.country_group,
                c.subject.material,
                c.subject.variant,
                c.role.as_str(),
                c.chapter99_code,
                c.duty_rate,
                c.formula,
                date_to_sql(c.effective_start),
                opt_date_to_sql(c.effective_end),
                c.evidence_id,
                c.source_document_id,
                c.run_id,
                c.dataset_tag,
                c.status.as_str(),
                c.block_reason,
                c.priority,
                c.created_at,
                c.updated_at,
            ],
        )
        .context("Failed to insert candidate change")?;
        Ok(())
    }

    pub fn candidate_by_id(&self, id: &str) -> Result<Option<CandidateChange>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached("SELECT * FROM candidate_changes WHERE id = ?1")?;
        let found = stmt
            .query_row([id], candidate_from_sql)
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(found)
    }

    pub fn candidates_by_status(
        &self,
        status: Option<CandidateStatus>,
        limit: usize,
    ) -> Result<Vec<CandidateChange>> {
        let conn = self.conn();
        let rows = match status {
            Some(s) => {
                let mut stmt = conn.prepare_cached(
                    "SELECT * FROM candidate_changes WHERE status = ?1 \
                     ORDER BY priority DESC, created_at ASC LIMIT ?2",
                )?;
                stmt.query_map(params![s.as_str(), limit as i64], candidate_from_sql)?
                    .collect::<rusqlite::Result<Vec<_>>>()?
            }
            None => {
                let mut stmt = conn.prepare_cached(
                    "SELECT * FROM candidate_changes \
                     ORDER BY priority DESC, created_at ASC LIMIT ?1",
                )?;
                stmt.query_map(params![limit as i64], candidate_from_sql)?
                    .collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        Ok(rows)
    }

    /// Monotonic status transition; refuses to move a candidate backwards or
    /// out of a terminal state.
    pub fn transition_candidate(
        &self,
        id: &str,
        to: CandidateStatus,
        block_reason: Option<&str>,
    ) -> Result<CandidateChange> {
        let current = self
            .candidate_by_id(id)?
            .with_context(|| format!("candidate {} not found", id))?;

        let allowed = matches!(
            (current.status, to),
            (CandidateStatus::Pending, CandidateStatus::Approved)
                | (CandidateStatus::Pending, CandidateStatus::Rejected)
                | (CandidateStatus::Pending, CandidateStatus::Committed)
                | (CandidateStatus::Approved, CandidateStatus::Committed)
                | (CandidateStatus::Approved, CandidateStatus::Rejected)
        );
        if !allowed {
            anyhow::bail!(
                "invalid candidate transition {} -> {}",
                current.status.as_str(),
                to.as_str()
            );
        }

        let conn = self.conn();
        conn.execute(
            "UPDATE candidate_changes SET status = ?2, block_reason = ?3, updated_at = ?4 \
             WHERE id = ?1",
            params![id, to.as_str(), block_reason, Utc::now().timestamp()],
        )?;
        drop(conn);
        self.candidate_by_id(id)?
            .with_context(|| format!("candidate {} vanished mid-update", id))
    }

    /// Record why a candidate is held without changing its status.
    pub fn set_candidate_block(&self, id: &str, reason: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE candidate_changes SET block_reason = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, reason, Utc::now().timestamp()],
        )?;
        Ok(())
    }

    /// Operator approval with optional field overrides.
    pub fn approve_candidate(
        &self,
        id: &str,
        rate_override: Option<f64>,
        start_override: Option<NaiveDate>,
    ) -> Result<CandidateChange> {
        if rate_override.is_some() || start_override.is_some() {
            let conn = self.conn();
            conn.execute(
                "UPDATE candidate_changes SET \
                 duty_rate = COALESCE(?2, duty_rate), \
                 effective_start = COALESCE(?3, effective_start), \
                 updated_at = ?4 \
                 WHERE id = ?1",
                params![
                    id,
                    rate_override,
                    start_override.map(date_to_sql),
                    Utc::now().timestamp()
                ],
            )?;
        }
        self.transition_candidate(id, CandidateStatus::Approved, None)
    }

    pub fn reject_candidate(&self, id: &str, reason: &str) -> Result<CandidateChange> {
        self.transition_candidate(id, CandidateStatus::Rejected, Some(reason))
    }

    /// Pending candidates older than the review SLA, for the health surface.
    pub fn overdue_candidates(&self, sla_hours: i64) -> Result<i64> {
        let conn = self.conn();
        let cutoff = Utc::now().timestamp() - sla_hours * 3600;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM candidate_changes WHERE status = 'pending' AND created_at < ?1",
            [cutoff],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str) -> CandidateChange {
        let now = Utc::now().timestamp();
        CandidateChange {
            id: id.to_string(),
            program_id: "section_301".into(),
            subject: RateSubject::for_hts("85444290"),
            role: RateRole::Impose,
            chapter99_code: "9903.88.03".into(),
            duty_rate: Some(0.25),
            formula: None,
            effective_start: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            effective_end: None,
            evidence_id: Some("ev-1".into()),
            source_document_id: Some("doc-1".into()),
            run_id: None,
            dataset_tag: None,
            status: CandidateStatus::Pending,
            block_reason: None,
            priority: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_candidate_round_trip() {
        let store = TariffStore::open_in_memory().unwrap();
        store.insert_candidate(&candidate("c1")).unwrap();
        let found = store.candidate_by_id("c1").unwrap().unwrap();
        assert_eq!(found.chapter99_code, "9903.88.03");
        assert_eq!(found.status, CandidateStatus::Pending);
    }

    #[test]
    fn test_transitions_are_monotonic() {
        let store = TariffStore::open_in_memory().unwrap();
        store.insert_candidate(&candidate("c1")).unwrap();

        let approved = store.approve_candidate("c1", None, None).unwrap();
        assert_eq!(approved.status, CandidateStatus::Approved);

        let committed = store
            .transition_candidate("c1", CandidateStatus::Committed, None)
            .unwrap();
        assert_eq!(committed.status, CandidateStatus::Committed);

        // Terminal: no further transitions.
        assert!(store
            .transition_candidate("c1", CandidateStatus::Rejected, None)
            .is_err());
    }

    #[test]
    fn test_reject_keeps_reason_for_audit() {
        let store = TariffStore::open_in_memory().unwrap();
        store.insert_candidate(&candidate("c1")).unwrap();
        let rejected = store.reject_candidate("c1", "rate not in document").unwrap();
        assert_eq!(rejected.status, CandidateStatus::Rejected);
        assert_eq!(rejected.block_reason.as_deref(), Some("rate not in document"));

        let listed = store
            .candidates_by_status(Some(CandidateStatus::Rejected), 10)
            .unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[test]
    fn test_approval_overrides_fields() {
        let store = TariffStore::open_in_memory().unwrap();
        store.insert_candidate(&candidate("c1")).unwrap();
        let approved = store
            .approve_candidate(
                "c1",
                Some(0.30),
                Some(NaiveDate::from_ymd_opt(2026, 2, 1).unwrap()),
            )
            .unwrap();
        assert_eq!(approved.duty_rate, Some(0.30));
        assert_eq!(
            approved.effective_start,
            NaiveDate::from_ymd_opt(2026, 2, 1).unwrap()
        );
    }
}
