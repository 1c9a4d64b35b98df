//! CBP CSMS bulletin watcher
//!
//! Scans the monthly HTML archive for bulletin links. CSMS messages are
//! operational guidance, tier B: they signal changes but cannot back a
//! committed rate row on their own.

use super::Watcher;
use crate::models::{DiscoveredDocument, SourceTier};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use tracing::info;

const ARCHIVE_URL: &str = "https://content.govdelivery.com/accounts/USDHSCBP/bulletins";

pub struct CbpCsmsWatcher {
    client: Client,
}

impl CbpCsmsWatcher {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");
        Self { client }
    }
}

impl Default for CbpCsmsWatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Watcher for CbpCsmsWatcher {
    fn source(&self) -> &'static str {
        "cbp_csms"
    }

    async fn poll(&self, since: NaiveDate) -> Result<Vec<DiscoveredDocument>> {
        info!(since = %since, "Polling CBP CSMS bulletin archive");

        let html = self
            .client
            .get(ARCHIVE_URL)
            .send()
            .await
            .context("CSMS archive request failed")?
            .error_for_status()
            .context("CSMS archive returned an error status")?
            .text()
            .await
            .context("CSMS archive body was not readable")?;

        Ok(parse_bulletin_links(&html))
    }
}

/// Pull `/bulletins/<id>` anchors out of the archive page. The page shape is
/// plain enough that a scan beats a full HTML parser.
fn parse_bulletin_links(html: &str) -> Vec<DiscoveredDocument> {
    let mut docs = Vec::new();
    let mut rest = html;
    while let Some(pos) = rest.find("/bulletins/") {
        rest = &rest[pos + "/bulletins/".len()..];
        let id: String = rest
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .collect();
        if id.is_empty() || docs.iter().any(|d: &DiscoveredDocument| d.external_id == id) {
            continue;
        }
        docs.push(DiscoveredDocument {
            source: "cbp_csms".into(),
            external_id: id.clone(),
            url: format!("{}/{}", ARCHIVE_URL, id),
            title: None,
            publication_date: None,
            tier: SourceTier::B,
        });
    }
    docs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bulletin_links_extracted_and_deduped() {
        let html = r#"
            <a href="/accounts/USDHSCBP/bulletins/3a1b2c3">CSMS #65936570</a>
            <a href="/accounts/USDHSCBP/bulletins/3a1b2c3">duplicate</a>
            <a href="/accounts/USDHSCBP/bulletins/4d5e6f7">CSMS #65936571</a>
        "#;
        let docs = parse_bulletin_links(html);
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].external_id, "3a1b2c3");
        assert_eq!(docs[1].external_id, "4d5e6f7");
        assert_eq!(docs[0].tier, SourceTier::B);
    }

    #[test]
    fn test_no_links_yields_empty() {
        assert!(parse_bulletin_links("<html><body>nothing here</body></html>").is_empty());
    }
}
