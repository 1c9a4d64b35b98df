//! Validate stage
//!
//! Confirms a candidate against the document text it claims to come from:
//! the cited subject and rate must appear in the text, the effective date
//! must be parseable, and the Chapter-99 code must resolve. Failures become
//! block reasons; they never abort the job.

use super::extract::ExtractedChange;
use crate::chapter99;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ValidationVerdict {
    pub passed: bool,
    pub failures: Vec<String>,
}

pub fn validate_candidate(doc_text: &str, change: &ExtractedChange) -> ValidationVerdict {
    let mut failures = Vec::new();

    // (a) the cited subject appears in the document text.
    if let Some(hts8) = &change.subject.hts8 {
        let dotted = format!("{}.{}.{}", &hts8[..4], &hts8[4..6], &hts8[6..8]);
        if !doc_text.contains(hts8.as_str()) && !doc_text.contains(&dotted) {
            failures.push(format!("cited HTS {} not found in document", hts8));
        }
    } else if let Some(country) = &change.subject.country {
        if !doc_text.to_lowercase().contains(country) {
            failures.push(format!("cited country {} not found in document", country));
        }
    } else if let Some(group) = &change.subject.country_group {
        if !doc_text.to_lowercase().contains(group) {
            failures.push(format!("cited group {} not found in document", group));
        }
    } else {
        failures.push("candidate names no subject key".to_string());
    }

    // (a, continued) the cited rate appears in the document text.
    match (&change.duty_rate, &change.formula) {
        (Some(rate), _) => {
            let pct = rate * 100.0;
            let rendered = if (pct - pct.round()).abs() < 1e-9 {
                format!("{}%", pct.round() as i64)
            } else {
                format!("{}%", pct)
            };
            if !doc_text.contains(&rendered) {
                failures.push(format!("cited rate {} not found in document", rendered));
            }
        }
        (None, Some(formula)) => {
            if !doc_text.contains(formula.as_str()) {
                failures.push(format!("cited formula {} not found in document", formula));
            }
        }
        // Pending rates have nothing to corroborate yet.
        (None, None) => {}
    }

    // (b) effective date is stated in the document.
    let iso = change.effective_start.format("%Y-%m-%d").to_string();
    if !doc_text.contains(&iso) {
        failures.push(format!("effective date {} not found in document", iso));
    }

    // (c) the Chapter-99 code resolves.
    if chapter99::resolve(&change.chapter99_code).is_none() {
        failures.push(format!(
            "chapter 99 code {} does not resolve",
            change.chapter99_code
        ));
    }

    ValidationVerdict {
        passed: failures.is_empty(),
        failures,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::extract::extract_tabular;

    const DOC: &str = "Notice of Modification\n\
        HTS 8544.42.90 | 9903.88.03 | 25% | effective 2026-01-01\n";

    #[test]
    fn test_valid_candidate_passes() {
        let changes = extract_tabular(DOC);
        let verdict = validate_candidate(DOC, &changes[0]);
        assert!(verdict.passed, "failures: {:?}", verdict.failures);
    }

    #[test]
    fn test_rate_absent_from_text_fails() {
        let changes = extract_tabular(DOC);
        let mut tampered = changes[0].clone();
        tampered.duty_rate = Some(0.50);
        let verdict = validate_candidate(DOC, &tampered);
        assert!(!verdict.passed);
        assert!(verdict.failures[0].contains("50%"));
    }

    #[test]
    fn test_hts_absent_from_text_fails() {
        let changes = extract_tabular(DOC);
        let mut tampered = changes[0].clone();
        tampered.subject.hts8 = Some("99887766".into());
        let verdict = validate_candidate(DOC, &tampered);
        assert!(!verdict.passed);
        assert!(verdict.failures.iter().any(|f| f.contains("99887766")));
    }

    #[test]
    fn test_date_absent_from_text_fails() {
        let changes = extract_tabular(DOC);
        let mut tampered = changes[0].clone();
        tampered.effective_start = chrono::NaiveDate::from_ymd_opt(2030, 5, 5).unwrap();
        let verdict = validate_candidate(DOC, &tampered);
        assert!(!verdict.passed);
    }
}
