//! Baseline dataset bootstrap
//!
//! Seeds an empty store with the reference dataset through the commit
//! engine, under a synthetic tier-A seed-manifest document, so every
//! committed row carries provenance like any pipeline-produced row.
//! Re-running against a seeded store is a no-op.

use crate::catalog;
use crate::commit::CommitEngine;
use crate::models::{
    CandidateChange, CandidateStatus, ContentBasis, DocumentChunk, EvidencePacket,
    OfficialDocument, RateRole, RateSubject, Section232Material, SourceTier, SplitPolicy,
};
use crate::store::TariffStore;
use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use sha2::{Digest, Sha256};
use tracing::info;
use uuid::Uuid;

const DATASET_TAG: &str = "seed_baseline_2025";
const BOOTSTRAP_KEY: &str = "bootstrap_done";

const SEED_TEXT: &str = "\
Baseline tariff dataset (seed manifest)\n\
Section 301 rates, IEEPA rates and Section 232 material coverage\n\
consolidated from Federal Register notices in force as of 2025-08-01.\n";

struct SeedRate {
    program_id: &'static str,
    hts8: Option<&'static str>,
    country: Option<&'static str>,
    country_group: Option<&'static str>,
    variant: Option<&'static str>,
    chapter99_code: &'static str,
    duty_rate: Option<f64>,
    formula: Option<&'static str>,
    role: RateRole,
    start: (i32, u32, u32),
    end: Option<(i32, u32, u32)>,
}

fn seed_rates() -> Vec<SeedRate> {
    use RateRole::{Exclude, Impose};
    vec![
        // Section 301 list 3 coverage.
        SeedRate {
            program_id: catalog::SECTION_301,
            hts8: Some("85444290"),
            country: None,
            country_group: None,
            variant: None,
            chapter99_code: "9903.88.03",
            duty_rate: Some(0.25),
            formula: None,
            role: Impose,
            start: (2018, 9, 24),
            end: None,
        },
        SeedRate {
            program_id: catalog::SECTION_301,
            hts8: Some("84733051"),
            country: None,
            country_group: None,
            variant: None,
            chapter99_code: "9903.88.03",
            duty_rate: Some(0.25),
            formula: None,
            role: Impose,
            start: (2018, 9, 24),
            end: None,
        },
        // Granted exclusion, bounded window.
        SeedRate {
            program_id: catalog::SECTION_301,
            hts8: Some("84733051"),
            country: None,
            country_group: None,
            variant: None,
            chapter99_code: "9903.88.69",
            duty_rate: Some(0.0),
            formula: None,
            role: Exclude,
            start: (2023, 10, 2),
            end: Some((2025, 9, 1)),
        },
        // IEEPA Fentanyl by origin country.
        SeedRate {
            program_id: catalog::IEEPA_FENTANYL,
            hts8: None,
            country: Some("china"),
            country_group: None,
            variant: Some("standard"),
            chapter99_code: "9903.01.24",
            duty_rate: Some(0.10),
            formula: None,
            role: Impose,
            start: (2025, 2, 4),
            end: None,
        },
        SeedRate {
            program_id: catalog::IEEPA_FENTANYL,
            hts8: None,
            country: Some("hong kong"),
            country_group: None,
            variant: Some("standard"),
            chapter99_code: "9903.01.24",
            duty_rate: Some(0.10),
            formula: None,
            role: Impose,
            start: (2025, 2, 4),
            end: None,
        },
        // IEEPA Reciprocal standard rates per origin group.
        SeedRate {
            program_id: catalog::IEEPA_RECIPROCAL,
            hts8: None,
            country: None,
            country_group: Some("cn"),
            variant: Some("standard"),
            chapter99_code: "9903.01.33",
            duty_rate: Some(0.10),
            formula: None,
            role: Impose,
            start: (2025, 4, 5),
            end: None,
        },
        SeedRate {
            program_id: catalog::IEEPA_RECIPROCAL,
            hts8: None,
            country: None,
            country_group: Some("eu"),
            variant: Some("standard"),
            chapter99_code: "9903.01.25",
            duty_rate: None,
            formula: Some("15% - MFN"),
            role: Impose,
            start: (2025, 8, 7),
            end: None,
        },
        SeedRate {
            program_id: catalog::IEEPA_RECIPROCAL,
            hts8: None,
            country: None,
            country_group: Some("uk"),
            variant: Some("standard"),
            chapter99_code: "9903.01.25",
            duty_rate: Some(0.10),
            formula: None,
            role: Impose,
            start: (2025, 4, 5),
            end: None,
        },
        // Annex II exemptions.
        SeedRate {
            program_id: catalog::IEEPA_RECIPROCAL,
            hts8: Some("84733051"),
            country: None,
            country_group: None,
            variant: Some("annex_ii_exempt"),
            chapter99_code: "9903.01.32",
            duty_rate: Some(0.0),
            formula: None,
            role: Exclude,
            start: (2025, 4, 5),
            end: None,
        },
        SeedRate {
            program_id: catalog::IEEPA_RECIPROCAL,
            hts8: Some("30049092"),
            country: None,
            country_group: None,
            variant: Some("annex_ii_exempt"),
            chapter99_code: "9903.01.32",
            duty_rate: Some(0.0),
            formula: None,
            role: Exclude,
            start: (2025, 4, 5),
            end: None,
        },
        // MFN base rates used by formula evaluation.
        SeedRate {
            program_id: catalog::MFN,
            hts8: Some("85444290"),
            country: None,
            country_group: None,
            variant: None,
            chapter99_code: "mfn",
            duty_rate: Some(0.026),
            formula: None,
            role: Impose,
            start: (2020, 1, 1),
            end: None,
        },
        SeedRate {
            program_id: catalog::MFN,
            hts8: Some("84733051"),
            country: None,
            country_group: None,
            variant: None,
            chapter99_code: "mfn",
            duty_rate: Some(0.0),
            formula: None,
            role: Impose,
            start: (2020, 1, 1),
            end: None,
        },
        SeedRate {
            program_id: catalog::MFN,
            hts8: Some("90189000"),
            country: None,
            country_group: None,
            variant: None,
            chapter99_code: "mfn",
            duty_rate: Some(0.05),
            formula: None,
            role: Impose,
            start: (2020, 1, 1),
            end: None,
        },
    ]
}

const COUNTRY_GROUPS: &[(&str, &[&str])] = &[
    ("cn", &["china"]),
    ("uk", &["united kingdom"]),
    (
        "eu",
        &[
            "germany",
            "france",
            "italy",
            "spain",
            "netherlands",
            "belgium",
            "poland",
            "sweden",
            "ireland",
            "austria",
        ],
    ),
];

fn seed_materials() -> Vec<Section232Material> {
    let start = NaiveDate::from_ymd_opt(2025, 3, 12).unwrap();
    let mk = |hts8: &str, material: &str, claim: &str, disclaim: &str, rate: f64| {
        Section232Material {
            id: Uuid::new_v4().to_string(),
            hts8: hts8.to_string(),
            hts10: None,
            material: material.to_string(),
            claim_code: claim.to_string(),
            disclaim_code: disclaim.to_string(),
            duty_rate: rate,
            min_percent: 0.0,
            split_policy: SplitPolicy::IfAnyContent,
            split_threshold_percent: 0.0,
            content_basis: ContentBasis::Value,
            quantity_unit: Some("kg".to_string()),
            effective_start: start,
            effective_end: None,
        }
    };
    vec![
        mk("85444290", "copper", "9903.78.01", "9903.78.02", 0.50),
        mk("85444290", "steel", "9903.80.01", "9903.80.02", 0.50),
        mk("85444290", "aluminum", "9903.85.08", "9903.85.09", 0.25),
        mk("84733051", "aluminum", "9903.85.08", "9903.85.09", 0.25),
        mk("74081100", "copper", "9903.78.01", "9903.78.02", 0.50),
        mk("72081000", "steel", "9903.81.87", "9903.81.88", 0.50),
    ]
}

/// Seed the baseline dataset. Returns the number of rate rows committed
/// (zero when the store was already seeded).
pub fn seed_baseline(store: &TariffStore) -> Result<usize> {
    if store.get_metadata(BOOTSTRAP_KEY)?.is_some() {
        return Ok(0);
    }

    let now = Utc::now().timestamp();
    let doc_id = Uuid::new_v4().to_string();
    let chunk_id = Uuid::new_v4().to_string();
    let evidence_id = Uuid::new_v4().to_string();

    let sha = hex::encode(Sha256::digest(SEED_TEXT.as_bytes()));
    store
        .insert_document(&OfficialDocument {
            id: doc_id.clone(),
            source: "seed_manifest".into(),
            external_id: DATASET_TAG.into(),
            tier: SourceTier::A,
            url: "file://seed/baseline".into(),
            title: Some("Baseline tariff dataset".into()),
            publication_date: NaiveDate::from_ymd_opt(2025, 8, 1),
            fetched_at: now,
            sha256: sha,
            raw_bytes: SEED_TEXT.as_bytes().to_vec(),
            canonical_text: Some(SEED_TEXT.to_string()),
        })
        .context("Failed to store seed document")?;

    let quote = "consolidated from Federal Register notices";
    store.insert_chunks(&[DocumentChunk {
        id: chunk_id.clone(),
        document_id: doc_id.clone(),
        seq: 0,
        char_start: 0,
        char_end: SEED_TEXT.len() as i64,
        text: SEED_TEXT.to_string(),
        chunk_type: "paragraph".into(),
        embedding_key: None,
    }])?;
    store.insert_evidence(&EvidencePacket {
        id: evidence_id.clone(),
        document_id: doc_id.clone(),
        chunk_id,
        quote: quote.to_string(),
        quote_sha256: hex::encode(Sha256::digest(quote.as_bytes())),
        extractor_output: None,
        validator_output: None,
        write_gate_passed: true,
        gate_failures: vec![],
        created_at: now,
    })?;

    for (group, members) in COUNTRY_GROUPS {
        for member in *members {
            store.add_country_group_member(group, member)?;
        }
    }

    for m in seed_materials() {
        store.insert_section232_material(&m)?;
    }

    let engine = CommitEngine::new(store);
    let mut committed = 0usize;
    for seed in seed_rates() {
        let candidate = CandidateChange {
            id: Uuid::new_v4().to_string(),
            program_id: seed.program_id.to_string(),
            subject: RateSubject {
                hts8: seed.hts8.map(str::to_string),
                hts10: None,
                country: seed.country.map(str::to_string),
                country_group: seed.country_group.map(str::to_string),
                material: None,
                variant: seed.variant.map(str::to_string),
            },
            role: seed.role,
            chapter99_code: seed.chapter99_code.to_string(),
            duty_rate: seed.duty_rate,
            formula: seed.formula.map(str::to_string),
            effective_start: NaiveDate::from_ymd_opt(seed.start.0, seed.start.1, seed.start.2)
                .context("bad seed start date")?,
            effective_end: seed
                .end
                .map(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d).context("bad seed end date"))
                .transpose()?,
            evidence_id: Some(evidence_id.clone()),
            source_document_id: Some(doc_id.clone()),
            run_id: None,
            dataset_tag: Some(DATASET_TAG.to_string()),
            status: CandidateStatus::Approved,
            block_reason: None,
            priority: 0,
            created_at: now,
            updated_at: now,
        };
        store.insert_candidate(&candidate)?;
        engine.apply(&candidate)?;
        committed += 1;
    }

    store.set_metadata(BOOTSTRAP_KEY, DATASET_TAG)?;
    info!("🌱 Seeded baseline dataset: {} rate rows", committed);
    Ok(committed)
}
