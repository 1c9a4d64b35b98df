//! Evidence store: official documents, chunks and evidence packets
//!
//! Documents are immutable once stored; chunks and packets are append-only.

use super::rates::{date_from_sql, opt_date_to_sql};
use super::TariffStore;
use crate::models::{DocumentChunk, EvidencePacket, OfficialDocument, SourceTier};
use anyhow::{Context, Result};
use rusqlite::{params, Row};

fn document_from_sql(row: &Row) -> rusqlite::Result<OfficialDocument> {
    let tier: String = row.get("tier")?;
    let pub_date: Option<String> = row.get("publication_date")?;
    Ok(OfficialDocument {
        id: row.get("id")?,
        source: row.get("source")?,
        external_id: row.get("external_id")?,
        tier: SourceTier::from_str(&tier).unwrap_or(SourceTier::C),
        url: row.get("url")?,
        title: row.get("title")?,
        publication_date: pub_date
            .as_deref()
            .map(|s| {
                date_from_sql(s).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        0,
                        rusqlite::types::Type::Text,
                        e.into(),
                    )
                })
            })
            .transpose()?,
        fetched_at: row.get("fetched_at")?,
        sha256: row.get("sha256")?,
        raw_bytes: row.get("raw_bytes")?,
        canonical_text: row.get("canonical_text")?,
    })
}

impl TariffStore {
    pub fn insert_document(&self, doc: &OfficialDocument) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO documents (id, source, external_id, tier, url, title, \
             publication_date, fetched_at, sha256, raw_bytes, canonical_text) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                doc.id,
                doc.source,
                doc.external_id,
                doc.tier.as_str(),
                doc.url,
                doc.title,
                opt_date_to_sql(doc.publication_date),
                doc.fetched_at,
                doc.sha256,
                doc.raw_bytes,
                doc.canonical_text,
            ],
        )
        .context("Failed to insert document")?;
        Ok(())
    }

    /// Documents never change after storage; only the rendered text may be
    /// attached once by the render stage.
    pub fn set_document_text(&self, document_id: &str, text: &str) -> Result<()> {
        let conn = self.conn();
        let n = conn.execute(
            "UPDATE documents SET canonical_text = ?2 \
             WHERE id = ?1 AND canonical_text IS NULL",
            params![document_id, text],
        )?;
        if n == 0 {
            anyhow::bail!("document {} missing or already rendered", document_id);
        }
        Ok(())
    }

    pub fn document_by_id(&self, id: &str) -> Result<Option<OfficialDocument>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached("SELECT * FROM documents WHERE id = ?1")?;
        let found = stmt
            .query_row([id], document_from_sql)
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(found)
    }

    pub fn document_by_source(
        &self,
        source: &str,
        external_id: &str,
    ) -> Result<Option<OfficialDocument>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare_cached("SELECT * FROM documents WHERE source = ?1 AND external_id = ?2")?;
        let found = stmt
            .query_row(params![source, external_id], document_from_sql)
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(found)
    }

    pub fn insert_chunks(&self, chunks: &[DocumentChunk]) -> Result<()> {
        let conn = self.conn();
        conn.execute("BEGIN IMMEDIATE", [])?;
        let result = (|| -> Result<()> {
            for c in chunks {
                conn.execute(
                    "INSERT INTO document_chunks (id, document_id, seq, char_start, char_end, \
                     text, chunk_type, embedding_key) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        c.id,
                        c.document_id,
                        c.seq,
                        c.char_start,
                        c.char_end,
                        c.text,
                        c.chunk_type,
                        c.embedding_key,
                    ],
                )?;
            }
            Ok(())
        })();
        match result {
            Ok(()) => {
                conn.execute("COMMIT", [])?;
                Ok(())
            }
            Err(e) => {
                let _ = conn.execute("ROLLBACK", []);
                Err(e).context("Failed to insert document chunks")
            }
        }
    }

    pub fn chunks_for_document(&self, document_id: &str) -> Result<Vec<DocumentChunk>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT id, document_id, seq, char_start, char_end, text, chunk_type, embedding_key \
             FROM document_chunks WHERE document_id = ?1 ORDER BY seq ASC",
        )?;
        let chunks = stmt
            .query_map([document_id], |row| {
                Ok(DocumentChunk {
                    id: row.get(0)?,
                    document_id: row.get(1)?,
                    seq: row.get(2)?,
                    char_start: row.get(3)?,
                    char_end: row.get(4)?,
                    text: row.get(5)?,
                    chunk_type: row.get(6)?,
                    embedding_key: row.get(7)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(chunks)
    }

    pub fn chunk_by_id(&self, id: &str) -> Result<Option<DocumentChunk>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT id, document_id, seq, char_start, char_end, text, chunk_type, embedding_key \
             FROM document_chunks WHERE id = ?1",
        )?;
        let found = stmt
            .query_row([id], |row| {
                Ok(DocumentChunk {
                    id: row.get(0)?,
                    document_id: row.get(1)?,
                    seq: row.get(2)?,
                    char_start: row.get(3)?,
                    char_end: row.get(4)?,
                    text: row.get(5)?,
                    chunk_type: row.get(6)?,
                    embedding_key: row.get(7)?,
                })
            })
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(found)
    }

    pub fn insert_evidence(&self, e: &EvidencePacket) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO evidence_packets (id, document_id, chunk_id, quote, quote_sha256, \
             extractor_output, validator_output, write_gate_passed, gate_failures, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                e.id,
                e.document_id,
                e.chunk_id,
                e.quote,
                e.quote_sha256,
                e.extractor_output,
                e.validator_output,
                e.write_gate_passed as i64,
                serde_json::to_string(&e.gate_failures).unwrap_or_else(|_| "[]".into()),
                e.created_at,
            ],
        )
        .context("Failed to insert evidence packet")?;
        Ok(())
    }

    pub fn update_evidence_gate(
        &self,
        evidence_id: &str,
        passed: bool,
        failures: &[String],
    ) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE evidence_packets SET write_gate_passed = ?2, gate_failures = ?3 \
             WHERE id = ?1",
            params![
                evidence_id,
                passed as i64,
                serde_json::to_string(failures).unwrap_or_else(|_| "[]".into()),
            ],
        )?;
        Ok(())
    }

    pub fn evidence_by_id(&self, id: &str) -> Result<Option<EvidencePacket>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT id, document_id, chunk_id, quote, quote_sha256, extractor_output, \
             validator_output, write_gate_passed, gate_failures, created_at \
             FROM evidence_packets WHERE id = ?1",
        )?;
        let found = stmt
            .query_row([id], |row| {
                let failures: String = row.get(8)?;
                Ok(EvidencePacket {
                    id: row.get(0)?,
                    document_id: row.get(1)?,
                    chunk_id: row.get(2)?,
                    quote: row.get(3)?,
                    quote_sha256: row.get(4)?,
                    extractor_output: row.get(5)?,
                    validator_output: row.get(6)?,
                    write_gate_passed: row.get::<_, i64>(7)? != 0,
                    gate_failures: serde_json::from_str(&failures).unwrap_or_default(),
                    created_at: row.get(9)?,
                })
            })
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(found)
    }

    /// Distinct other documents whose canonical text mentions `needle`.
    /// Used by the write gate's corroboration check.
    pub fn count_documents_mentioning(
        &self,
        needle: &str,
        exclude_document_id: &str,
    ) -> Result<i64> {
        let conn = self.conn();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM documents \
             WHERE id != ?1 AND canonical_text IS NOT NULL \
               AND instr(canonical_text, ?2) > 0",
            params![exclude_document_id, needle],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Provenance probe used by tests: the quote on an evidence packet must
    /// be an exact substring of its chunk's text.
    pub fn evidence_quote_verbatim(&self, evidence_id: &str) -> Result<bool> {
        let Some(ev) = self.evidence_by_id(evidence_id)? else {
            return Ok(false);
        };
        let Some(chunk) = self.chunk_by_id(&ev.chunk_id)? else {
            return Ok(false);
        };
        Ok(chunk.text.contains(&ev.quote))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn doc(id: &str, text: &str) -> OfficialDocument {
        OfficialDocument {
            id: id.to_string(),
            source: "federal_register".into(),
            external_id: format!("fr-{}", id),
            tier: SourceTier::A,
            url: "https://www.federalregister.gov/d/test".into(),
            title: Some("Notice of Action".into()),
            publication_date: None,
            fetched_at: Utc::now().timestamp(),
            sha256: "ab".repeat(32),
            raw_bytes: text.as_bytes().to_vec(),
            canonical_text: None,
        }
    }

    #[test]
    fn test_document_round_trip_and_dedup_key() {
        let store = TariffStore::open_in_memory().unwrap();
        store.insert_document(&doc("d1", "hello")).unwrap();

        let found = store
            .document_by_source("federal_register", "fr-d1")
            .unwrap()
            .unwrap();
        assert_eq!(found.id, "d1");
        assert_eq!(found.tier, SourceTier::A);

        // Same (source, external_id) is rejected.
        assert!(store.insert_document(&doc("d1-dup", "hello")).is_err());
    }

    #[test]
    fn test_document_text_set_once() {
        let store = TariffStore::open_in_memory().unwrap();
        store.insert_document(&doc("d1", "raw")).unwrap();
        store.set_document_text("d1", "line one\nline two").unwrap();
        assert!(store.set_document_text("d1", "other").is_err());

        let found = store.document_by_id("d1").unwrap().unwrap();
        assert_eq!(found.canonical_text.as_deref(), Some("line one\nline two"));
    }

    #[test]
    fn test_evidence_quote_must_match_chunk() {
        let store = TariffStore::open_in_memory().unwrap();
        store.insert_document(&doc("d1", "raw")).unwrap();
        store
            .insert_chunks(&[DocumentChunk {
                id: "c1".into(),
                document_id: "d1".into(),
                seq: 0,
                char_start: 0,
                char_end: 40,
                text: "duty of 25 percent applies to 8544.42.90".into(),
                chunk_type: "paragraph".into(),
                embedding_key: None,
            }])
            .unwrap();

        let good = EvidencePacket {
            id: "e1".into(),
            document_id: "d1".into(),
            chunk_id: "c1".into(),
            quote: "25 percent applies".into(),
            quote_sha256: String::new(),
            extractor_output: None,
            validator_output: None,
            write_gate_passed: false,
            gate_failures: vec![],
            created_at: Utc::now().timestamp(),
        };
        store.insert_evidence(&good).unwrap();
        assert!(store.evidence_quote_verbatim("e1").unwrap());

        let bad = EvidencePacket {
            id: "e2".into(),
            quote: "fifty percent".into(),
            ..good
        };
        store.insert_evidence(&bad).unwrap();
        assert!(!store.evidence_quote_verbatim("e2").unwrap());
    }
}
