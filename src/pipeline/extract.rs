//! Extract stage
//!
//! Deterministic parsing of tabular rate structures into candidate changes.
//! Two shapes are handled: pipe-delimited rate lines in the canonical text
//! and JSON rate-action documents. Narrative inputs without tables go
//! through the `NarrativeExtractor` seam, which an external reasoning
//! service implements; the default implementation extracts nothing.

use crate::catalog;
use crate::chapter99;
use crate::models::{RateRole, RateSubject};
use anyhow::Result;
use chrono::NaiveDate;
use serde::Deserialize;

/// A rate mutation read out of a document, before evidence linking.
#[derive(Debug, Clone)]
pub struct ExtractedChange {
    pub program_id: String,
    pub subject: RateSubject,
    pub role: RateRole,
    pub chapter99_code: String,
    pub duty_rate: Option<f64>,
    pub formula: Option<String>,
    pub effective_start: NaiveDate,
    pub effective_end: Option<NaiveDate>,
    /// Verbatim line the change was read from; becomes the evidence quote.
    pub quote: String,
    /// Set when the reading needs a second source before auto-commit.
    pub corroboration_required: bool,
}

/// Seam for non-tabular documents. Implementations return the same shape as
/// the deterministic extractor, with verbatim quotes.
pub trait NarrativeExtractor: Send + Sync {
    fn extract(&self, canonical_text: &str) -> Result<Vec<ExtractedChange>>;
}

/// Default: narrative documents produce no candidates and fall through to
/// review when tabular extraction also finds nothing of interest.
pub struct NoopNarrativeExtractor;

impl NarrativeExtractor for NoopNarrativeExtractor {
    fn extract(&self, _canonical_text: &str) -> Result<Vec<ExtractedChange>> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Deserialize)]
struct JsonRateDoc {
    rate_actions: Vec<JsonRateAction>,
}

#[derive(Debug, Deserialize)]
struct JsonRateAction {
    #[serde(default)]
    hts: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    country_group: Option<String>,
    chapter99: String,
    #[serde(default)]
    rate_percent: Option<f64>,
    #[serde(default)]
    formula: Option<String>,
    effective: String,
    #[serde(default)]
    through: Option<String>,
}

/// Deterministically parse every rate assertion in the canonical text.
pub fn extract_tabular(text: &str) -> Vec<ExtractedChange> {
    if let Ok(doc) = serde_json::from_str::<JsonRateDoc>(text.trim()) {
        return doc
            .rate_actions
            .iter()
            .filter_map(|a| {
                build_change(
                    a.hts.as_deref(),
                    a.country.as_deref(),
                    a.country_group.as_deref(),
                    &a.chapter99,
                    a.rate_percent.map(|p| p / 100.0),
                    a.formula.clone(),
                    &a.effective,
                    a.through.as_deref(),
                    // JSON field order does not round-trip verbatim; the
                    // code itself is the only safe exact quote.
                    a.chapter99.clone(),
                    a.rate_percent.is_none() && a.formula.is_none(),
                )
            })
            .collect();
    }

    text.lines().filter_map(parse_rate_line).collect()
}

/// One pipe-delimited rate line:
/// `HTS 8544.42.90 | 9903.88.03 | 25% | effective 2026-01-01 | through 2027-01-01`
/// The first field may instead be `COUNTRY <name>` or `GROUP <name>`.
fn parse_rate_line(line: &str) -> Option<ExtractedChange> {
    let trimmed = line.trim();
    let fields: Vec<&str> = trimmed.split('|').map(str::trim).collect();
    if fields.len() < 4 {
        return None;
    }

    let (mut hts, mut country, mut group) = (None, None, None);
    let key = fields[0];
    let lower = key.to_ascii_lowercase();
    if lower.starts_with("hts ") {
        hts = Some(key[4..].trim().to_string());
    } else if lower.starts_with("country ") {
        country = Some(key[8..].trim().to_lowercase());
    } else if lower.starts_with("group ") {
        group = Some(key[6..].trim().to_lowercase());
    } else {
        return None;
    }

    let (rate, formula, pending) = parse_rate_field(fields[2])?;
    let effective = fields[3]
        .to_ascii_lowercase()
        .strip_prefix("effective")
        .map(|s| s.trim().to_string())?;
    let through = fields.get(4).and_then(|f| {
        f.to_ascii_lowercase()
            .strip_prefix("through")
            .map(|s| s.trim().to_string())
    });

    build_change(
        hts.as_deref(),
        country.as_deref(),
        group.as_deref(),
        fields[1],
        rate,
        formula,
        &effective,
        through.as_deref(),
        trimmed.to_string(),
        pending,
    )
}

/// `25%` → rate, `15% - MFN` → formula, `pending` → neither (flagged).
fn parse_rate_field(field: &str) -> Option<(Option<f64>, Option<String>, bool)> {
    let f = field.trim();
    if f.eq_ignore_ascii_case("pending") {
        return Some((None, None, true));
    }
    if f.to_ascii_uppercase().contains("MFN") {
        return Some((None, Some(f.to_string()), false));
    }
    let pct: f64 = f.strip_suffix('%')?.trim().parse().ok()?;
    Some((Some(pct / 100.0), None, false))
}

#[allow(clippy::too_many_arguments)]
fn build_change(
    hts: Option<&str>,
    country: Option<&str>,
    group: Option<&str>,
    code_field: &str,
    rate: Option<f64>,
    formula: Option<String>,
    effective: &str,
    through: Option<&str>,
    quote: String,
    corroboration_required: bool,
) -> Option<ExtractedChange> {
    let code = chapter99::extract_code(code_field)?;
    let info = chapter99::resolve(&code)?;

    let effective_start = NaiveDate::parse_from_str(effective, "%Y-%m-%d").ok()?;
    let effective_end = through.and_then(|t| NaiveDate::parse_from_str(t, "%Y-%m-%d").ok());

    let (hts8, hts10) = match hts {
        Some(h) => {
            let (eight, full) = crate::models::normalize_hts(h)?;
            let ten = if full.len() >= 10 {
                Some(full[..10].to_string())
            } else {
                None
            };
            (Some(eight), ten)
        }
        None => (None, None),
    };

    let material = catalog::material_for_program(info.program_id).map(str::to_string);
    let is_exclusion = matches!(info.subprogram, "exclusion" | "annex_ii_exempt");
    let variant = if info.program_id == catalog::IEEPA_RECIPROCAL
        || info.program_id == catalog::IEEPA_FENTANYL
    {
        Some(info.subprogram.to_string())
    } else {
        None
    };

    Some(ExtractedChange {
        program_id: info.program_id.to_string(),
        subject: RateSubject {
            hts8,
            hts10,
            country: country.map(str::to_string),
            country_group: group.map(str::to_string),
            material,
            variant,
        },
        role: if is_exclusion {
            RateRole::Exclude
        } else {
            RateRole::Impose
        },
        chapter99_code: code,
        duty_rate: rate,
        formula,
        effective_start,
        effective_end,
        quote,
        corroboration_required,
    })
}
