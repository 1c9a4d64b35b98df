//! Commit engine
//!
//! The only write path into the temporal rate tables. Every commit runs in
//! one transaction: overlapping predecessors are closed at the new row's
//! start, the new row is inserted with its supersession link, and audit and
//! run attribution are appended. Any write that would break a store
//! invariant aborts and leaves the candidate pending with a block reason.

use crate::models::{CandidateChange, CandidateStatus, RateRow, RateSubject};
use crate::store::rates::{date_to_sql, insert_rate_row_on, opt_date_to_sql, rate_row_from_sql};
use crate::store::runs::{append_audit_on, append_run_change_on};
use crate::store::TariffStore;
use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection};
use tracing::{info, warn};
use uuid::Uuid;

pub struct CommitEngine<'a> {
    store: &'a TariffStore,
}

/// One link of a schedule commit.
#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    pub effective_start: NaiveDate,
    pub chapter99_code: String,
    pub duty_rate: Option<f64>,
    pub formula: Option<String>,
}

impl<'a> CommitEngine<'a> {
    pub fn new(store: &'a TariffStore) -> Self {
        Self { store }
    }

    /// Apply one approved candidate. Returns the committed rate row id.
    ///
    /// Supersession keys on exact subject equality within (program, role);
    /// the family differences (301 by HTS+code, 232 by HTS+material, IEEPA
    /// by country+variant) fall out of which subject columns are populated.
    pub fn apply(&self, candidate: &CandidateChange) -> Result<String> {
        if candidate.status != CandidateStatus::Approved {
            bail!(
                "candidate {} is {}, not approved",
                candidate.id,
                candidate.status.as_str()
            );
        }
        if candidate.source_document_id.is_none() || candidate.evidence_id.is_none() {
            self.block(candidate, "missing provenance: document or evidence id")?;
            bail!("candidate {} lacks provenance", candidate.id);
        }

        let conn = self.store.conn();
        conn.execute("BEGIN IMMEDIATE", [])?;
        let result = self.apply_locked(&conn, candidate);
        match result {
            Ok(row_id) => {
                conn.execute("COMMIT", [])?;
                info!(
                    candidate = %candidate.id,
                    rate_row = %row_id,
                    program = %candidate.program_id,
                    "✅ Committed rate change"
                );
                Ok(row_id)
            }
            Err(e) => {
                let _ = conn.execute("ROLLBACK", []);
                drop(conn);
                warn!(candidate = %candidate.id, error = %e, "Commit aborted");
                self.block(candidate, &e.to_string())?;
                Err(e)
            }
        }
    }

    fn apply_locked(&self, conn: &Connection, candidate: &CandidateChange) -> Result<String> {
        let predecessors = overlapping_active_rows(
            conn,
            &candidate.program_id,
            candidate.role.as_str(),
            &candidate.subject,
            candidate.effective_start,
            candidate.effective_end,
        )?;

        // A predecessor starting at or after the new start cannot be closed
        // without an empty or inverted window; this also catches a second
        // apply of the same candidate.
        if let Some(p) = predecessors
            .iter()
            .find(|p| p.effective_start >= candidate.effective_start)
        {
            bail!(
                "window overlap with {} (effective {}) cannot be superseded",
                p.id,
                p.effective_start
            );
        }

        let new_id = Uuid::new_v4().to_string();
        let supersedes_id = predecessors
            .iter()
            .max_by_key(|p| p.effective_start)
            .map(|p| p.id.clone());

        for p in &predecessors {
            let before = serde_json::to_string(p).unwrap_or_default();
            conn.execute(
                "UPDATE rate_rows SET effective_end = ?2, superseded_by_id = ?3 WHERE id = ?1",
                params![p.id, date_to_sql(candidate.effective_start), new_id],
            )?;
            let mut after = p.clone();
            after.effective_end = Some(candidate.effective_start);
            after.superseded_by_id = Some(new_id.clone());
            append_audit_on(
                conn,
                "rate_row",
                &p.id,
                "SUPERSEDE",
                Some(&before),
                Some(&serde_json::to_string(&after).unwrap_or_default()),
            )?;
        }

        let row = RateRow {
            id: new_id.clone(),
            program_id: candidate.program_id.clone(),
            subject: candidate.subject.clone(),
            chapter99_code: candidate.chapter99_code.clone(),
            duty_rate: candidate.duty_rate,
            formula: candidate.formula.clone(),
            effective_start: candidate.effective_start,
            effective_end: candidate.effective_end,
            role: candidate.role,
            source_document_id: candidate.source_document_id.clone(),
            evidence_id: candidate.evidence_id.clone(),
            supersedes_id,
            superseded_by_id: None,
            dataset_tag: candidate.dataset_tag.clone(),
            is_archived: false,
        };
        insert_rate_row_on(conn, &row).context("Failed to insert committed row")?;
        append_audit_on(
            conn,
            "rate_row",
            &row.id,
            "INSERT",
            None,
            Some(&serde_json::to_string(&row).unwrap_or_default()),
        )?;

        if let Some(run_id) = &candidate.run_id {
            append_run_change_on(conn, run_id, &row.id, Some(&candidate.id))?;
        }

        conn.execute(
            "UPDATE candidate_changes SET status = 'committed', updated_at = ?2 WHERE id = ?1",
            params![candidate.id, Utc::now().timestamp()],
        )?;

        Ok(new_id)
    }

    /// Commit an ordered chain in one transaction: each row's end is the
    /// next row's start; the final row stays open.
    pub fn commit_schedule(
        &self,
        program_id: &str,
        subject: &RateSubject,
        role: crate::models::RateRole,
        entries: &[ScheduleEntry],
        source_document_id: &str,
        evidence_id: &str,
        dataset_tag: Option<&str>,
    ) -> Result<Vec<String>> {
        if entries.is_empty() {
            bail!("empty schedule");
        }
        let mut sorted = entries.to_vec();
        sorted.sort_by_key(|e| e.effective_start);
        for pair in sorted.windows(2) {
            if pair[0].effective_start == pair[1].effective_start {
                bail!("schedule has duplicate start {}", pair[0].effective_start);
            }
        }

        let span_start = sorted[0].effective_start;
        let conn = self.store.conn();
        conn.execute("BEGIN IMMEDIATE", [])?;
        let result = (|| -> Result<Vec<String>> {
            let existing = overlapping_active_rows(
                &conn,
                program_id,
                role.as_str(),
                subject,
                span_start,
                None,
            )?;
            if let Some(p) = existing
                .iter()
                .find(|p| p.effective_start >= span_start)
            {
                bail!(
                    "schedule overlaps existing row {} (effective {})",
                    p.id,
                    p.effective_start
                );
            }

            let mut ids = Vec::with_capacity(sorted.len());
            let mut previous_id: Option<String> = existing
                .iter()
                .max_by_key(|p| p.effective_start)
                .map(|p| p.id.clone());

            // Close any live predecessor at the head of the chain.
            for p in &existing {
                let before = serde_json::to_string(p).unwrap_or_default();
                conn.execute(
                    "UPDATE rate_rows SET effective_end = ?2 WHERE id = ?1",
                    params![p.id, date_to_sql(span_start)],
                )?;
                append_audit_on(&conn, "rate_row", &p.id, "SUPERSEDE", Some(&before), None)?;
            }

            for (i, entry) in sorted.iter().enumerate() {
                let id = Uuid::new_v4().to_string();
                let end = sorted.get(i + 1).map(|next| next.effective_start);
                let row = RateRow {
                    id: id.clone(),
                    program_id: program_id.to_string(),
                    subject: subject.clone(),
                    chapter99_code: entry.chapter99_code.clone(),
                    duty_rate: entry.duty_rate,
                    formula: entry.formula.clone(),
                    effective_start: entry.effective_start,
                    effective_end: end,
                    role,
                    source_document_id: Some(source_document_id.to_string()),
                    evidence_id: Some(evidence_id.to_string()),
                    supersedes_id: previous_id.clone(),
                    superseded_by_id: None,
                    dataset_tag: dataset_tag.map(|s| s.to_string()),
                    is_archived: false,
                };
                insert_rate_row_on(&conn, &row)?;
                append_audit_on(
                    &conn,
                    "rate_row",
                    &row.id,
                    "INSERT",
                    None,
                    Some(&serde_json::to_string(&row).unwrap_or_default()),
                )?;
                if let Some(prev) = &previous_id {
                    conn.execute(
                        "UPDATE rate_rows SET superseded_by_id = ?2 WHERE id = ?1",
                        params![prev, id],
                    )?;
                }
                previous_id = Some(id.clone());
                ids.push(id);
            }
            Ok(ids)
        })();

        match result {
            Ok(ids) => {
                conn.execute("COMMIT", [])?;
                info!(
                    program = program_id,
                    rows = ids.len(),
                    "✅ Committed rate schedule"
                );
                Ok(ids)
            }
            Err(e) => {
                let _ = conn.execute("ROLLBACK", []);
                Err(e)
            }
        }
    }

    fn block(&self, candidate: &CandidateChange, reason: &str) -> Result<()> {
        let conn = self.store.conn();
        conn.execute(
            "UPDATE candidate_changes SET block_reason = ?2, updated_at = ?3 \
             WHERE id = ?1 AND status != 'committed'",
            params![candidate.id, reason, Utc::now().timestamp()],
        )?;
        Ok(())
    }
}

/// Active (non-archived, non-superseded) rows for the exact subject whose
/// windows intersect the new window.
fn overlapping_active_rows(
    conn: &Connection,
    program_id: &str,
    role: &str,
    subject: &RateSubject,
    new_start: NaiveDate,
    new_end: Option<NaiveDate>,
) -> Result<Vec<RateRow>> {
    let mut stmt = conn.prepare_cached(
        "SELECT * FROM rate_rows \
         WHERE program_id = ?1 AND role = ?2 \
           AND COALESCE(hts8,'') = COALESCE(?3,'') \
           AND COALESCE(hts10,'') = COALESCE(?4,'') \
           AND COALESCE(country,'') = COALESCE(?5,'') \
           AND COALESCE(country_group,'') = COALESCE(?6,'') \
           AND COALESCE(material,'') = COALESCE(?7,'') \
           AND COALESCE(variant,'') = COALESCE(?8,'') \
           AND is_archived = 0 AND superseded_by_id IS NULL \
           AND effective_start < COALESCE(?10, '9999-12-31') \
           AND COALESCE(effective_end, '9999-12-31') > ?9",
    )?;
    let rows = stmt
        .query_map(
            params![
                program_id,
                role,
                subject.hts8,
                subject.hts10,
                subject.country,
                subject.country_group,
                subject.material,
                subject.variant,
                date_to_sql(new_start),
                opt_date_to_sql(new_end),
            ],
            rate_row_from_sql,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RateRole;
    use crate::store::rates::invariants_hold;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn candidate(
        id: &str,
        hts8: &str,
        rate: f64,
        start: NaiveDate,
        status: CandidateStatus,
    ) -> CandidateChange {
        let now = Utc::now().timestamp();
        CandidateChange {
            id: id.to_string(),
            program_id: "section_301".into(),
            subject: RateSubject::for_hts(hts8),
            role: RateRole::Impose,
            chapter99_code: "9903.88.03".into(),
            duty_rate: Some(rate),
            formula: None,
            effective_start: start,
            effective_end: None,
            evidence_id: Some("ev-1".into()),
            source_document_id: Some("doc-1".into()),
            run_id: None,
            dataset_tag: Some("test".into()),
            status,
            block_reason: None,
            priority: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_commit_supersedes_overlapping_predecessor() {
        let store = TariffStore::open_in_memory().unwrap();
        let engine = CommitEngine::new(&store);

        let first = candidate("c1", "85444290", 0.10, date(2025, 1, 1), CandidateStatus::Approved);
        store.insert_candidate(&first).unwrap();
        let first_row = engine.apply(&first).unwrap();

        let second = candidate("c2", "85444290", 0.25, date(2026, 1, 1), CandidateStatus::Approved);
        store.insert_candidate(&second).unwrap();
        let second_row = engine.apply(&second).unwrap();

        // Predecessor closed exactly at the successor's start.
        let old = store.rate_row_by_id(&first_row).unwrap().unwrap();
        assert_eq!(old.effective_end, Some(date(2026, 1, 1)));
        assert_eq!(old.superseded_by_id.as_deref(), Some(second_row.as_str()));

        let new = store.rate_row_by_id(&second_row).unwrap().unwrap();
        assert_eq!(new.supersedes_id.as_deref(), Some(first_row.as_str()));

        // as_of resolves each era to the right row.
        let subject = RateSubject::for_hts("85444290");
        let mid_2025 = store
            .as_of("section_301", &subject, date(2025, 6, 1))
            .unwrap()
            .unwrap();
        assert_eq!(mid_2025.duty_rate, Some(0.10));
        let mid_2026 = store
            .as_of("section_301", &subject, date(2026, 6, 1))
            .unwrap()
            .unwrap();
        assert_eq!(mid_2026.duty_rate, Some(0.25));

        assert!(invariants_hold(&store).unwrap());

        // Both candidates marked committed.
        assert_eq!(
            store.candidate_by_id("c1").unwrap().unwrap().status,
            CandidateStatus::Committed
        );
    }

    #[test]
    fn test_double_apply_aborts_and_blocks() {
        let store = TariffStore::open_in_memory().unwrap();
        let engine = CommitEngine::new(&store);

        let c = candidate("c1", "85444290", 0.10, date(2025, 1, 1), CandidateStatus::Approved);
        store.insert_candidate(&c).unwrap();
        engine.apply(&c).unwrap();

        // Second application would duplicate the window.
        let again = candidate("c2", "85444290", 0.10, date(2025, 1, 1), CandidateStatus::Approved);
        store.insert_candidate(&again).unwrap();
        assert!(engine.apply(&again).is_err());

        let blocked = store.candidate_by_id("c2").unwrap().unwrap();
        assert!(blocked.block_reason.is_some());
        assert_eq!(blocked.status, CandidateStatus::Approved);
        assert!(invariants_hold(&store).unwrap());
    }

    #[test]
    fn test_unapproved_candidate_is_refused() {
        let store = TariffStore::open_in_memory().unwrap();
        let engine = CommitEngine::new(&store);
        let c = candidate("c1", "85444290", 0.10, date(2025, 1, 1), CandidateStatus::Pending);
        store.insert_candidate(&c).unwrap();
        assert!(engine.apply(&c).is_err());
    }

    #[test]
    fn test_missing_provenance_is_refused() {
        let store = TariffStore::open_in_memory().unwrap();
        let engine = CommitEngine::new(&store);
        let mut c = candidate("c1", "85444290", 0.10, date(2025, 1, 1), CandidateStatus::Approved);
        c.evidence_id = None;
        store.insert_candidate(&c).unwrap();
        assert!(engine.apply(&c).is_err());
        let blocked = store.candidate_by_id("c1").unwrap().unwrap();
        assert!(blocked.block_reason.unwrap().contains("provenance"));
    }

    #[test]
    fn test_schedule_commit_builds_linear_chain() {
        let store = TariffStore::open_in_memory().unwrap();
        let engine = CommitEngine::new(&store);
        let subject = RateSubject::for_hts("72081000");

        let entries = vec![
            ScheduleEntry {
                effective_start: date(2025, 1, 1),
                chapter99_code: "9903.81.87".into(),
                duty_rate: Some(0.25),
                formula: None,
            },
            ScheduleEntry {
                effective_start: date(2025, 6, 4),
                chapter99_code: "9903.81.87".into(),
                duty_rate: Some(0.50),
                formula: None,
            },
            ScheduleEntry {
                effective_start: date(2026, 1, 1),
                chapter99_code: "9903.81.87".into(),
                duty_rate: Some(0.50),
                formula: None,
            },
        ];
        let ids = engine
            .commit_schedule(
                "section_232_steel",
                &subject,
                RateRole::Impose,
                &entries,
                "doc-1",
                "ev-1",
                Some("test"),
            )
            .unwrap();
        assert_eq!(ids.len(), 3);

        // Interior anchors hit the right row; the day before hits the
        // neighbor.
        let at = |d| {
            store
                .as_of("section_232_steel", &subject, d)
                .unwrap()
                .unwrap()
        };
        assert_eq!(at(date(2025, 6, 4)).id, ids[1]);
        assert_eq!(at(date(2025, 6, 3)).id, ids[0]);
        assert_eq!(at(date(2026, 1, 1)).id, ids[2]);

        let schedule = store
            .rate_schedule("section_232_steel", &subject)
            .unwrap();
        assert_eq!(schedule[0].effective_end, Some(date(2025, 6, 4)));
        assert_eq!(schedule[1].supersedes_id.as_deref(), Some(ids[0].as_str()));
        assert_eq!(schedule[2].effective_end, None);

        assert!(invariants_hold(&store).unwrap());
    }
}
