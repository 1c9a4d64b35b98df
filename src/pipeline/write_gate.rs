//! Write gate
//!
//! Mechanical checks independent of any reasoning step, run immediately
//! before commit. Any failure routes the candidate to the review queue.

use crate::models::{CandidateChange, SourceTier};
use crate::store::TariffStore;
use anyhow::Result;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct GateReport {
    pub passed: bool,
    pub failures: Vec<String>,
}

pub fn run_write_gate(
    store: &TariffStore,
    candidate: &CandidateChange,
    corroboration_required: bool,
) -> Result<GateReport> {
    let mut failures = Vec::new();

    // 1. Source document exists and is tier A.
    let doc = match candidate.source_document_id.as_deref() {
        Some(id) => match store.document_by_id(id)? {
            Some(doc) => {
                if doc.tier != SourceTier::A {
                    failures.push(format!(
                        "source document {} is tier {}, not tier A",
                        doc.id,
                        doc.tier.as_str()
                    ));
                }
                Some(doc)
            }
            None => {
                failures.push(format!("source document {} does not exist", id));
                None
            }
        },
        None => {
            failures.push("candidate has no source document".to_string());
            None
        }
    };

    // 2-4. Evidence exists, its chunk exists, the quote is verbatim, and
    // the validator verdict on it is a pass.
    match candidate.evidence_id.as_deref() {
        Some(id) => match store.evidence_by_id(id)? {
            Some(evidence) => {
                match store.chunk_by_id(&evidence.chunk_id)? {
                    Some(chunk) => {
                        if !chunk.text.contains(&evidence.quote) {
                            failures.push(
                                "quote is not an exact substring of its chunk".to_string(),
                            );
                        }
                    }
                    None => {
                        failures.push(format!("cited chunk {} does not exist", evidence.chunk_id))
                    }
                }
                let verdict_pass = evidence
                    .validator_output
                    .as_deref()
                    .and_then(|v| serde_json::from_str::<Value>(v).ok())
                    .and_then(|v| v.get("passed").and_then(Value::as_bool))
                    .unwrap_or(false);
                if !verdict_pass {
                    failures.push("validator verdict is not a pass".to_string());
                }
            }
            None => failures.push(format!("evidence packet {} does not exist", id)),
        },
        None => failures.push("candidate has no evidence packet".to_string()),
    }

    // 5. Corroboration when the warning flag is set: at least one other
    // rendered document must mention the same Chapter-99 code.
    if corroboration_required {
        let exclude = doc.as_ref().map(|d| d.id.as_str()).unwrap_or("");
        let corroborating =
            store.count_documents_mentioning(&candidate.chapter99_code, exclude)?;
        if corroborating == 0 {
            failures.push(format!(
                "no corroborating source mentions {}",
                candidate.chapter99_code
            ));
        }
    }

    Ok(GateReport {
        passed: failures.is_empty(),
        failures,
    })
}
