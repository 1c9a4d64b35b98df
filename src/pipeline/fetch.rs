//! Fetch stage
//!
//! Downloads raw bytes from a trusted domain, hashes them and stores the
//! immutable document. A refetch with an unchanged SHA short-circuits the
//! rest of the pipeline; a changed SHA on an existing document routes to
//! review, because stored documents never mutate.

use super::ReviewRouted;
use crate::models::{IngestJob, OfficialDocument, SourceTier};
use crate::store::TariffStore;
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use reqwest::Client;
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use uuid::Uuid;

/// Hard-coded trust anchors per source. A URL outside its source's list is
/// refused outright.
const ALLOWLISTS: &[(&str, &[&str])] = &[
    ("federal_register", &["www.federalregister.gov", "federalregister.gov"]),
    ("cbp_csms", &["content.govdelivery.com"]),
    ("usitc", &["hts.usitc.gov"]),
];

pub fn tier_for_source(source: &str) -> SourceTier {
    match source {
        "federal_register" | "usitc" | "seed_manifest" => SourceTier::A,
        "cbp_csms" => SourceTier::B,
        _ => SourceTier::C,
    }
}

/// Host portion of a URL, without a full URL parser.
fn host_of(url: &str) -> Option<&str> {
    let rest = url.split("://").nth(1)?;
    let host = rest.split(['/', '?', '#']).next()?;
    Some(host.split('@').last()?.split(':').next()?)
}

pub fn domain_allowed(source: &str, url: &str) -> bool {
    let Some(host) = host_of(url) else {
        return false;
    };
    ALLOWLISTS
        .iter()
        .find(|(s, _)| *s == source)
        .map(|(_, domains)| domains.iter().any(|d| host.eq_ignore_ascii_case(d)))
        .unwrap_or(false)
}

pub struct FetchOutcome {
    pub document_id: String,
    /// True when the document was already stored with the same SHA.
    pub unchanged: bool,
}

pub async fn fetch_document(
    store: &TariffStore,
    client: &Client,
    job: &IngestJob,
) -> Result<FetchOutcome> {
    if !domain_allowed(&job.source, &job.url) {
        return Err(anyhow!(ReviewRouted(format!(
            "non-trusted domain for source {}: {}",
            job.source, job.url
        ))));
    }

    debug!(url = %job.url, "Fetching document bytes");
    let bytes = client
        .get(&job.url)
        .send()
        .await
        .context("document request failed")?
        .error_for_status()
        .context("document request returned an error status")?
        .bytes()
        .await
        .context("document body was not readable")?
        .to_vec();

    let sha256 = hex::encode(Sha256::digest(&bytes));

    if let Some(existing) = store.document_by_source(&job.source, &job.external_id)? {
        if existing.sha256 == sha256 {
            info!(doc = %existing.id, "Document unchanged since last fetch");
            return Ok(FetchOutcome {
                document_id: existing.id,
                unchanged: true,
            });
        }
        return Err(anyhow!(ReviewRouted(format!(
            "SHA mismatch on refetch of {}: stored {} fetched {}",
            existing.id, existing.sha256, sha256
        ))));
    }

    let doc = OfficialDocument {
        id: Uuid::new_v4().to_string(),
        source: job.source.clone(),
        external_id: job.external_id.clone(),
        tier: tier_for_source(&job.source),
        url: job.url.clone(),
        title: None,
        publication_date: None,
        fetched_at: Utc::now().timestamp(),
        sha256,
        raw_bytes: bytes,
        canonical_text: None,
    };
    store.insert_document(&doc)?;
    info!(doc = %doc.id, source = %doc.source, bytes = doc.raw_bytes.len(), "📄 Document stored");
    Ok(FetchOutcome {
        document_id: doc.id,
        unchanged: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowlist_is_per_source() {
        assert!(domain_allowed(
            "federal_register",
            "https://www.federalregister.gov/documents/full_text/xml/2025-1.xml"
        ));
        // Right domain, wrong source.
        assert!(!domain_allowed(
            "cbp_csms",
            "https://www.federalregister.gov/d/2025-1"
        ));
        assert!(!domain_allowed(
            "federal_register",
            "https://evil.example.com/2025-1.xml"
        ));
        // Unknown source trusts nothing.
        assert!(!domain_allowed("mystery", "https://www.federalregister.gov/d/1"));
    }

    #[test]
    fn test_host_extraction_handles_ports_and_userinfo() {
        assert_eq!(host_of("https://hts.usitc.gov:443/reststop"), Some("hts.usitc.gov"));
        assert_eq!(host_of("https://u:p@hts.usitc.gov/x"), Some("hts.usitc.gov"));
        assert_eq!(host_of("not a url"), None);
    }

    #[test]
    fn test_tiers_by_source() {
        assert_eq!(tier_for_source("federal_register"), SourceTier::A);
        assert_eq!(tier_for_source("cbp_csms"), SourceTier::B);
        assert_eq!(tier_for_source("somewhere"), SourceTier::C);
    }
}
