//! Federal Register watcher
//!
//! Polls the documents API daily for tariff actions. Federal Register
//! documents are tier A: they may back committed rate rows.

use super::Watcher;
use crate::models::{DiscoveredDocument, SourceTier};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;
use tracing::info;

const API_BASE: &str = "https://www.federalregister.gov/api/v1";
const SEARCH_TERMS: &str = "tariff duties section 301 232";
const PAGE_SIZE: usize = 100;

pub struct FederalRegisterWatcher {
    client: Client,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    results: Option<Vec<SearchResult>>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    document_number: String,
    title: Option<String>,
    publication_date: Option<String>,
    /// Full-text XML when available, else the HTML page.
    full_text_xml_url: Option<String>,
    html_url: Option<String>,
}

impl FederalRegisterWatcher {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");
        Self { client }
    }
}

impl Default for FederalRegisterWatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Watcher for FederalRegisterWatcher {
    fn source(&self) -> &'static str {
        "federal_register"
    }

    async fn poll(&self, since: NaiveDate) -> Result<Vec<DiscoveredDocument>> {
        info!(since = %since, "Polling Federal Register documents API");

        let url = format!(
            "{}/documents.json?per_page={}&order=newest\
             &conditions[term]={}\
             &conditions[publication_date][gte]={}",
            API_BASE,
            PAGE_SIZE,
            urlencode(SEARCH_TERMS),
            since.format("%Y-%m-%d"),
        );

        let response: SearchResponse = self
            .client
            .get(&url)
            .send()
            .await
            .context("Federal Register request failed")?
            .error_for_status()
            .context("Federal Register returned an error status")?
            .json()
            .await
            .context("Federal Register response was not valid JSON")?;

        let docs = response
            .results
            .unwrap_or_default()
            .into_iter()
            .filter_map(|r| {
                let url = r.full_text_xml_url.or(r.html_url)?;
                Some(DiscoveredDocument {
                    source: "federal_register".into(),
                    external_id: r.document_number,
                    url,
                    title: r.title,
                    publication_date: r
                        .publication_date
                        .as_deref()
                        .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()),
                    tier: SourceTier::A,
                })
            })
            .collect();
        Ok(docs)
    }
}

fn urlencode(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            ' ' => "%20".to_string(),
            c if c.is_ascii_alphanumeric() => c.to_string(),
            c => format!("%{:02X}", c as u32),
        })
        .collect()
}
