//! Temporal rate tables
//!
//! Every row is a dated assertion with an end-exclusive window. `as_of` is
//! the only read the evaluator needs; precedence is archived-last, exclude
//! before impose, most specific subject key, then latest effective start.

use super::TariffStore;
use crate::models::{
    ContentBasis, RateRole, RateRow, RateSubject, Section232Material, SplitPolicy,
};
use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use rusqlite::{params, Connection, Row};

pub(crate) fn date_to_sql(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

pub(crate) fn opt_date_to_sql(d: Option<NaiveDate>) -> Option<String> {
    d.map(date_to_sql)
}

pub(crate) fn date_from_sql(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| format!("bad stored date: {}", s))
}

pub(crate) fn rate_row_from_sql(row: &Row) -> rusqlite::Result<RateRow> {
    let start: String = row.get("effective_start")?;
    let end: Option<String> = row.get("effective_end")?;
    let role: String = row.get("role")?;
    Ok(RateRow {
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
        chapter99_code: row.get("chapter99_code")?,
        duty_rate: row.get("duty_rate")?,
        formula: row.get("formula")?,
        effective_start: NaiveDate::parse_from_str(&start, "%Y-%m-%d").map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?,
        effective_end: match end {
            Some(s) => Some(NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?),
            None => None,
        },
        role: RateRole::from_str(&role).unwrap_or(RateRole::Impose),
        source_document_id: row.get("source_document_id")?,
        evidence_id: row.get("evidence_id")?,
        supersedes_id: row.get("supersedes_id")?,
        superseded_by_id: row.get("superseded_by_id")?,
        dataset_tag: row.get("dataset_tag")?,
        is_archived: row.get::<_, i64>("is_archived")? != 0,
    })
}

/// Insert a rate row on an existing connection (used inside commit
/// transactions as well as by tests).
pub(crate) fn insert_rate_row_on(conn: &Connection, r: &RateRow) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO rate_rows (id, program_id, hts8, hts10, country, country_group, material, \
         variant, chapter99_code, duty_rate, formula, effective_start, effective_end, role, \
         source_document_id, evidence_id, supersedes_id, superseded_by_id, dataset_tag, is_archived) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)",
        params![
            r.id,
            r.program_id,
            r.subject.hts8,
            r.subject.hts10,
            r.subject.country,
            r.subject.country_group,
            r.subject.material,
            r.subject.variant,
            r.chapter99_code,
            r.duty_rate,
            r.formula,
            date_to_sql(r.effective_start),
            opt_date_to_sql(r.effective_end),
            r.role.as_str(),
            r.source_document_id,
            r.evidence_id,
            r.supersedes_id,
            r.superseded_by_id,
            r.dataset_tag,
            r.is_archived as i64,
        ],
    )?;
    Ok(())
}

const SUBJECT_WHERE: &str = "program_id = ?1 \
     AND (hts8 IS NULL OR hts8 = ?2) \
     AND (hts10 IS NULL OR hts10 = ?3) \
     AND (country IS NULL OR country = ?4) \
     AND (country_group IS NULL OR country_group = ?5) \
     AND (material IS NULL OR material = ?6) \
     AND (variant IS NULL OR variant = ?7)";

impl TariffStore {
    /// Direct insert, bypassing supersession. The commit engine is the
    /// normal write path; this exists for fixtures and bootstrap chains
    /// assembled elsewhere.
    pub fn insert_rate_row(&self, row: &RateRow) -> Result<()> {
        let conn = self.conn();
        insert_rate_row_on(&conn, row).context("Failed to insert rate row")?;
        Ok(())
    }

    pub fn rate_row_by_id(&self, id: &str) -> Result<Option<RateRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached("SELECT * FROM rate_rows WHERE id = ?1")?;
        let found = stmt
            .query_row([id], rate_row_from_sql)
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(found)
    }

    /// The temporal point query. Returns the single best row covering `date`
    /// for the subject, or None.
    pub fn as_of(
        &self,
        program_id: &str,
        subject: &RateSubject,
        date: NaiveDate,
    ) -> Result<Option<RateRow>> {
        let conn = self.conn();
        let sql = format!(
            "SELECT * FROM rate_rows WHERE {} \
             AND effective_start <= ?8 \
             AND (effective_end IS NULL OR effective_end > ?8) \
             ORDER BY is_archived ASC, \
                      CASE role WHEN 'exclude' THEN 0 ELSE 1 END, \
                      CASE WHEN hts10 IS NOT NULL THEN 0 ELSE 1 END, \
                      CASE WHEN country IS NOT NULL THEN 0 \
                           WHEN country_group IS NOT NULL THEN 1 \
                           ELSE 2 END, \
                      effective_start DESC \
             LIMIT 1",
            SUBJECT_WHERE
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let found = stmt
            .query_row(
                params![
                    program_id,
                    subject.hts8,
                    subject.hts10,
                    subject.country,
                    subject.country_group,
                    subject.material,
                    subject.variant,
                    date_to_sql(date),
                ],
                rate_row_from_sql,
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(found)
    }

    /// Full chained history for a subject, oldest first. Callers project
    /// past or future answers from this without extra logic.
    pub fn rate_schedule(&self, program_id: &str, subject: &RateSubject) -> Result<Vec<RateRow>> {
        let conn = self.conn();
        let sql = format!(
            "SELECT * FROM rate_rows WHERE {} ORDER BY effective_start ASC",
            SUBJECT_WHERE
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt
            .query_map(
                params![
                    program_id,
                    subject.hts8,
                    subject.hts10,
                    subject.country,
                    subject.country_group,
                    subject.material,
                    subject.variant,
                ],
                rate_row_from_sql,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// MFN base rate for an HTS line, for formula evaluation.
    pub fn mfn_rate(&self, hts8: &str, date: NaiveDate) -> Result<Option<f64>> {
        let row = self.as_of("mfn", &RateSubject::for_hts(hts8), date)?;
        Ok(row.and_then(|r| r.duty_rate))
    }

    // ------------------------------------------------------------------
    // Invariant probes. Each returns violation descriptions; empty = pass.
    // ------------------------------------------------------------------

    /// Invariant: for any (subject, program, role), active windows never
    /// overlap.
    pub fn no_window_overlap(&self) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT a.id, b.id FROM rate_rows a \
             JOIN rate_rows b ON a.id < b.id \
              AND a.program_id = b.program_id AND a.role = b.role \
              AND COALESCE(a.hts8,'') = COALESCE(b.hts8,'') \
              AND COALESCE(a.hts10,'') = COALESCE(b.hts10,'') \
              AND COALESCE(a.country,'') = COALESCE(b.country,'') \
              AND COALESCE(a.country_group,'') = COALESCE(b.country_group,'') \
              AND COALESCE(a.material,'') = COALESCE(b.material,'') \
              AND COALESCE(a.variant,'') = COALESCE(b.variant,'') \
             WHERE a.is_archived = 0 AND b.is_archived = 0 \
               AND a.effective_start < COALESCE(b.effective_end, '9999-12-31') \
               AND b.effective_start < COALESCE(a.effective_end, '9999-12-31')",
        )?;
        let pairs = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(pairs
            .into_iter()
            .map(|(a, b)| format!("windows overlap: {} and {}", a, b))
            .collect())
    }

    /// Invariant: `supersedes_id` implies the predecessor closes exactly at
    /// this row's start.
    pub fn supersession_chain_consistent(&self) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT child.id FROM rate_rows child \
             LEFT JOIN rate_rows parent ON parent.id = child.supersedes_id \
             WHERE child.supersedes_id IS NOT NULL \
               AND (parent.id IS NULL \
                    OR parent.effective_end IS NULL \
                    OR parent.effective_end != child.effective_start)",
        )?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids
            .into_iter()
            .map(|id| format!("broken supersession chain at {}", id))
            .collect())
    }

    /// Invariant: every committed row carries both provenance ids.
    pub fn every_row_has_evidence(&self) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT id FROM rate_rows \
             WHERE source_document_id IS NULL OR evidence_id IS NULL",
        )?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids
            .into_iter()
            .map(|id| format!("missing provenance on {}", id))
            .collect())
    }

    /// Per-program live row counts for the health surface.
    pub fn rate_row_counts(&self) -> Result<Vec<(String, i64)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT program_id, COUNT(*) FROM rate_rows \
             WHERE is_archived = 0 GROUP BY program_id ORDER BY program_id",
        )?;
        let counts = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(counts)
    }

    // ------------------------------------------------------------------
    // Section 232 material table
    // ------------------------------------------------------------------

    pub fn insert_section232_material(&self, m: &Section232Material) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO section232_materials (id, hts8, hts10, material, claim_code, \
             disclaim_code, duty_rate, min_percent, split_policy, split_threshold_percent, \
             content_basis, quantity_unit, effective_start, effective_end) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                m.id,
                m.hts8,
                m.hts10,
                m.material,
                m.claim_code,
                m.disclaim_code,
                m.duty_rate,
                m.min_percent,
                m.split_policy.as_str(),
                m.split_threshold_percent,
                m.content_basis.as_str(),
                m.quantity_unit,
                date_to_sql(m.effective_start),
                opt_date_to_sql(m.effective_end),
            ],
        )
        .context("Failed to insert section 232 material")?;
        Ok(())
    }

    /// Material rows covering an HTS at a date. Rows matching the full
    /// 10-digit code shadow plain 8-digit rows for the same material.
    pub fn materials_for_hts(
        &self,
        hts8: &str,
        hts10: Option<&str>,
        date: NaiveDate,
    ) -> Result<Vec<Section232Material>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT * FROM section232_materials \
             WHERE hts8 = ?1 \
               AND effective_start <= ?2 \
               AND (effective_end IS NULL OR effective_end > ?2) \
             ORDER BY material ASC, CASE WHEN hts10 IS NOT NULL THEN 0 ELSE 1 END",
        )?;
        let all = stmt
            .query_map(params![hts8, date_to_sql(date)], material_from_sql)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut picked: Vec<Section232Material> = Vec::new();
        for m in all {
            match &m.hts10 {
                Some(ten) if Some(ten.as_str()) != hts10 => continue,
                _ => {}
            }
            // Rows come 10-digit first per material; keep only the first.
            if picked.iter().any(|p| p.material == m.material) {
                continue;
            }
            picked.push(m);
        }
        Ok(picked)
    }

    // ------------------------------------------------------------------
    // Exclusion claims (advisory)
    // ------------------------------------------------------------------

    pub fn insert_exclusion_claim(&self, c: &crate::models::ExclusionClaim) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO exclusion_claims (id, hts8, description, claim_code, effective_start, \
             effective_end, status) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                c.id,
                c.hts8,
                c.description,
                c.claim_code,
                date_to_sql(c.effective_start),
                opt_date_to_sql(c.effective_end),
                c.status,
            ],
        )
        .context("Failed to insert exclusion claim")?;
        Ok(())
    }

    pub fn exclusion_claims_for(
        &self,
        hts8: &str,
        date: NaiveDate,
    ) -> Result<Vec<crate::models::ExclusionClaim>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT id, hts8, description, claim_code, effective_start, effective_end, status \
             FROM exclusion_claims \
             WHERE hts8 = ?1 AND effective_start <= ?2 \
               AND (effective_end IS NULL OR effective_end > ?2)",
        )?;
        let claims = stmt
            .query_map(params![hts8, date_to_sql(date)], |row| {
                let start: String = row.get(4)?;
                let end: Option<String> = row.get(5)?;
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    start,
                    end,
                    row.get::<_, String>(6)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        claims
            .into_iter()
            .map(|(id, hts8, description, claim_code, start, end, status)| {
                Ok(crate::models::ExclusionClaim {
                    id,
                    hts8,
                    description,
                    claim_code,
                    effective_start: date_from_sql(&start)?,
                    effective_end: end.as_deref().map(date_from_sql).transpose()?,
                    status,
                })
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Country groups
    // ------------------------------------------------------------------

    pub fn add_country_group_member(&self, group: &str, country: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT OR IGNORE INTO country_group_members (group_name, country) VALUES (?1, ?2)",
            params![group, country],
        )?;
        Ok(())
    }

    pub fn group_for_country(&self, country: &str) -> Result<Option<String>> {
        let conn = self.conn();
        let found = conn
            .query_row(
                "SELECT group_name FROM country_group_members WHERE country = ?1 LIMIT 1",
                [country],
                |row| row.get::<_, String>(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(found)
    }
}

fn material_from_sql(row: &Row) -> rusqlite::Result<Section232Material> {
    let start: String = row.get("effective_start")?;
    let end: Option<String> = row.get("effective_end")?;
    let policy: String = row.get("split_policy")?;
    let basis: String = row.get("content_basis")?;
    let parse = |s: &str| {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
    };
    Ok(Section232Material {
        id: row.get("id")?,
        hts8: row.get("hts8")?,
        hts10: row.get("hts10")?,
        material: row.get("material")?,
        claim_code: row.get("claim_code")?,
        disclaim_code: row.get("disclaim_code")?,
        duty_rate: row.get("duty_rate")?,
        min_percent: row.get("min_percent")?,
        split_policy: SplitPolicy::from_str(&policy).unwrap_or(SplitPolicy::Never),
        split_threshold_percent: row.get("split_threshold_percent")?,
        content_basis: ContentBasis::from_str(&basis).unwrap_or(ContentBasis::Value),
        quantity_unit: row.get("quantity_unit")?,
        effective_start: parse(&start)?,
        effective_end: end.as_deref().map(parse).transpose()?,
    })
}

/// Convenience check used by tests and monitoring: all three probes clean.
pub fn invariants_hold(store: &TariffStore) -> Result<bool> {
    Ok(store.no_window_overlap()?.is_empty()
        && store.supersession_chain_consistent()?.is_empty()
        && store.every_row_has_evidence()?.is_empty())
}

/// Build an error from probe output, for callers that want to fail loudly.
pub fn check_invariants(store: &TariffStore) -> Result<()> {
    let mut violations = store.no_window_overlap()?;
    violations.extend(store.supersession_chain_consistent()?);
    violations.extend(store.every_row_has_evidence()?);
    if violations.is_empty() {
        Ok(())
    } else {
        Err(anyhow!("rate store invariants violated: {}", violations.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RateRole;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn row(id: &str, hts8: &str, start: NaiveDate, end: Option<NaiveDate>, rate: f64) -> RateRow {
        RateRow {
            id: id.to_string(),
            program_id: "section_301".into(),
            subject: RateSubject::for_hts(hts8),
            chapter99_code: "9903.88.03".into(),
            duty_rate: Some(rate),
            formula: None,
            effective_start: start,
            effective_end: end,
            role: RateRole::Impose,
            source_document_id: Some("doc-1".into()),
            evidence_id: Some("ev-1".into()),
            supersedes_id: None,
            superseded_by_id: None,
            dataset_tag: Some("test".into()),
            is_archived: false,
        }
    }

    #[test]
    fn test_as_of_boundary_dates() {
        let store = TariffStore::open_in_memory().unwrap();
        store
            .insert_rate_row(&row(
                "r1",
                "85444290",
                date(2025, 1, 1),
                Some(date(2026, 1, 1)),
                0.10,
            ))
            .unwrap();

        let subject = RateSubject::for_hts("85444290");
        // Start date is in scope.
        assert!(store
            .as_of("section_301", &subject, date(2025, 1, 1))
            .unwrap()
            .is_some());
        // End date is out of scope (end-exclusive).
        assert!(store
            .as_of("section_301", &subject, date(2026, 1, 1))
            .unwrap()
            .is_none());
        // Before any known row.
        assert!(store
            .as_of("section_301", &subject, date(2024, 12, 31))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_as_of_prefers_exclude_role() {
        let store = TariffStore::open_in_memory().unwrap();
        store
            .insert_rate_row(&row("imp", "84733051", date(2025, 1, 1), None, 0.25))
            .unwrap();
        let mut excl = row(
            "exc",
            "84733051",
            date(2025, 1, 1),
            Some(date(2026, 1, 1)),
            0.0,
        );
        excl.role = RateRole::Exclude;
        excl.chapter99_code = "9903.88.69".into();
        store.insert_rate_row(&excl).unwrap();

        let subject = RateSubject::for_hts("84733051");
        let hit = store
            .as_of("section_301", &subject, date(2025, 6, 1))
            .unwrap()
            .unwrap();
        assert_eq!(hit.role, RateRole::Exclude);
        assert_eq!(hit.chapter99_code, "9903.88.69");

        // After the exclusion window lapses the impose row wins again.
        let hit = store
            .as_of("section_301", &subject, date(2026, 1, 15))
            .unwrap()
            .unwrap();
        assert_eq!(hit.role, RateRole::Impose);
    }

    #[test]
    fn test_as_of_prefers_specific_subject_keys() {
        let store = TariffStore::open_in_memory().unwrap();
        let mut eight = row("h8", "85444290", date(2025, 1, 1), None, 0.10);
        eight.id = "h8".into();
        store.insert_rate_row(&eight).unwrap();

        let mut ten = row("h10", "85444290", date(2025, 1, 1), None, 0.20);
        ten.subject.hts10 = Some("8544429090".into());
        store.insert_rate_row(&ten).unwrap();

        let subject = RateSubject::for_hts_full("85444290", Some("8544429090"));
        let hit = store
            .as_of("section_301", &subject, date(2025, 6, 1))
            .unwrap()
            .unwrap();
        assert_eq!(hit.id, "h10");

        // Without the 10-digit key the 10-digit row is not eligible.
        let hit = store
            .as_of("section_301", &RateSubject::for_hts("85444290"), date(2025, 6, 1))
            .unwrap()
            .unwrap();
        assert_eq!(hit.id, "h8");
    }

    #[test]
    fn test_archived_rows_only_returned_as_fallback() {
        let store = TariffStore::open_in_memory().unwrap();
        let mut legacy = row("legacy", "85444290", date(2024, 1, 1), None, 0.10);
        legacy.is_archived = true;
        store.insert_rate_row(&legacy).unwrap();

        let subject = RateSubject::for_hts("85444290");
        // Only an archived row exists: it is returned.
        let hit = store
            .as_of("section_301", &subject, date(2025, 6, 1))
            .unwrap()
            .unwrap();
        assert!(hit.is_archived);

        // A live row within the window shadows it.
        store
            .insert_rate_row(&row("live", "85444290", date(2025, 1, 1), None, 0.25))
            .unwrap();
        let hit = store
            .as_of("section_301", &subject, date(2025, 6, 1))
            .unwrap()
            .unwrap();
        assert_eq!(hit.id, "live");
    }

    #[test]
    fn test_schedule_round_trip_returns_neighbors() {
        let store = TariffStore::open_in_memory().unwrap();
        store
            .insert_rate_row(&row(
                "r1",
                "99887766",
                date(2024, 1, 1),
                Some(date(2025, 1, 1)),
                0.05,
            ))
            .unwrap();
        store
            .insert_rate_row(&row(
                "r2",
                "99887766",
                date(2025, 1, 1),
                Some(date(2026, 1, 1)),
                0.10,
            ))
            .unwrap();
        store
            .insert_rate_row(&row("r3", "99887766", date(2026, 1, 1), None, 0.25))
            .unwrap();

        let subject = RateSubject::for_hts("99887766");
        let schedule = store.rate_schedule("section_301", &subject).unwrap();
        assert_eq!(schedule.len(), 3);
        assert_eq!(schedule[0].id, "r1");
        assert_eq!(schedule[2].id, "r3");

        // Interior anchors land on the right row; the day before lands on
        // the neighbor.
        for (anchor, expect, before_expect) in [
            (date(2025, 1, 1), "r2", "r1"),
            (date(2026, 1, 1), "r3", "r2"),
        ] {
            let hit = store.as_of("section_301", &subject, anchor).unwrap().unwrap();
            assert_eq!(hit.id, expect);
            let prev = store
                .as_of("section_301", &subject, anchor.pred_opt().unwrap())
                .unwrap()
                .unwrap();
            assert_eq!(prev.id, before_expect);
        }
    }

    #[test]
    fn test_overlap_probe_flags_bad_windows() {
        let store = TariffStore::open_in_memory().unwrap();
        store
            .insert_rate_row(&row("a", "85444290", date(2025, 1, 1), None, 0.10))
            .unwrap();
        store
            .insert_rate_row(&row("b", "85444290", date(2025, 6, 1), None, 0.25))
            .unwrap();

        let violations = store.no_window_overlap().unwrap();
        assert_eq!(violations.len(), 1);
        assert!(!invariants_hold(&store).unwrap());
    }

    #[test]
    fn test_materials_prefer_ten_digit_rows() {
        let store = TariffStore::open_in_memory().unwrap();
        let base = Section232Material {
            id: "m8".into(),
            hts8: "85444290".into(),
            hts10: None,
            material: "copper".into(),
            claim_code: "9903.78.01".into(),
            disclaim_code: "9903.78.02".into(),
            duty_rate: 0.50,
            min_percent: 0.0,
            split_policy: SplitPolicy::IfAnyContent,
            split_threshold_percent: 0.0,
            content_basis: ContentBasis::Value,
            quantity_unit: Some("kg".into()),
            effective_start: date(2025, 1, 1),
            effective_end: None,
        };
        store.insert_section232_material(&base).unwrap();

        let mut ten = base.clone();
        ten.id = "m10".into();
        ten.hts10 = Some("8544429090".into());
        ten.duty_rate = 0.30;
        store.insert_section232_material(&ten).unwrap();

        // With the full code, the 10-digit row shadows the 8-digit row.
        let picked = store
            .materials_for_hts("85444290", Some("8544429090"), date(2025, 6, 1))
            .unwrap();
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].id, "m10");

        // A different 10-digit suffix falls back to the 8-digit row.
        let picked = store
            .materials_for_hts("85444290", Some("8544429011"), date(2025, 6, 1))
            .unwrap();
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].id, "m8");
    }

    #[test]
    fn test_exclusion_claims_are_window_scoped() {
        let store = TariffStore::open_in_memory().unwrap();
        store
            .insert_exclusion_claim(&crate::models::ExclusionClaim {
                id: "x1".into(),
                hts8: "84733051".into(),
                description: "memory module carriers of plastic".into(),
                claim_code: "9903.88.69".into(),
                effective_start: date(2023, 10, 2),
                effective_end: Some(date(2025, 9, 1)),
                status: "unverified".into(),
            })
            .unwrap();

        let inside = store
            .exclusion_claims_for("84733051", date(2024, 10, 1))
            .unwrap();
        assert_eq!(inside.len(), 1);
        assert_eq!(inside[0].claim_code, "9903.88.69");

        let after = store
            .exclusion_claims_for("84733051", date(2025, 9, 1))
            .unwrap();
        assert!(after.is_empty());
    }

    #[test]
    fn test_country_group_lookup() {
        let store = TariffStore::open_in_memory().unwrap();
        store.add_country_group_member("eu", "germany").unwrap();
        store.add_country_group_member("eu", "france").unwrap();
        assert_eq!(store.group_for_country("germany").unwrap().as_deref(), Some("eu"));
        assert!(store.group_for_country("brazil").unwrap().is_none());
    }
}
