//! USITC HTS revision watcher
//!
//! Annual (plus ad hoc) revisions of the Harmonized Tariff Schedule via the
//! USITC REST surface. Revisions are tier A.

use super::Watcher;
use crate::models::{DiscoveredDocument, SourceTier};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use reqwest::Client;
use serde::Deserialize;
use tracing::info;

const API_BASE: &str = "https://hts.usitc.gov/reststop";

pub struct UsitcWatcher {
    client: Client,
}

#[derive(Debug, Deserialize)]
struct Revision {
    name: String,
    #[serde(default)]
    description: Option<String>,
}

impl UsitcWatcher {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");
        Self { client }
    }
}

impl Default for UsitcWatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Watcher for UsitcWatcher {
    fn source(&self) -> &'static str {
        "usitc"
    }

    async fn poll(&self, since: NaiveDate) -> Result<Vec<DiscoveredDocument>> {
        info!(since = %since, "Polling USITC HTS revisions");

        let revisions: Vec<Revision> = self
            .client
            .get(format!("{}/releases", API_BASE))
            .send()
            .await
            .context("USITC request failed")?
            .error_for_status()
            .context("USITC returned an error status")?
            .json()
            .await
            .context("USITC response was not valid JSON")?;

        // Revision names carry the edition year; only editions at or after
        // the resume year are of interest.
        let docs = revisions
            .into_iter()
            .filter(|r| revision_year(&r.name).map_or(true, |y| y >= since.year()))
            .map(|r| DiscoveredDocument {
                source: "usitc".into(),
                external_id: r.name.clone(),
                url: format!("{}/exportList?release={}&format=JSON", API_BASE, r.name),
                title: r.description,
                publication_date: None,
                tier: SourceTier::A,
            })
            .collect();
        Ok(docs)
    }
}

fn revision_year(name: &str) -> Option<i32> {
    let digits: String = name.chars().filter(|c| c.is_ascii_digit()).take(4).collect();
    if digits.len() == 4 {
        digits.parse().ok()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revision_year_parses_edition_names() {
        assert_eq!(revision_year("2025HTSRev19"), Some(2025));
        assert_eq!(revision_year("rev-2024-basic"), Some(2024));
        assert_eq!(revision_year("basic"), None);
    }
}
