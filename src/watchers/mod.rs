//! Official-source watchers
//!
//! Each watcher polls one upstream and reports discovered documents. A
//! polling cycle opens a RegulatoryRun, records every discovery against it
//! and enqueues ingest jobs deduplicated by (source, external_id). Watchers
//! never touch the rate tables.

pub mod cbp_csms;
pub mod federal_register;
pub mod usitc;

pub use cbp_csms::CbpCsmsWatcher;
pub use federal_register::FederalRegisterWatcher;
pub use usitc::UsitcWatcher;

use crate::models::{DiscoveredDocument, RunDocument};
use crate::store::TariffStore;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use tracing::{info, warn};

#[async_trait]
pub trait Watcher: Send + Sync {
    fn source(&self) -> &'static str;

    /// Documents published since `since`, most recent last.
    async fn poll(&self, since: NaiveDate) -> Result<Vec<DiscoveredDocument>>;
}

#[derive(Debug, Clone)]
pub struct WatcherCycleSummary {
    pub run_id: String,
    pub discovered: usize,
    pub enqueued: usize,
}

/// Default lookback when a source has never completed a run.
const FIRST_RUN_LOOKBACK_DAYS: i64 = 30;

/// Resume from the last completed run for this source, with a bounded
/// first-run lookback.
pub fn poll_since(store: &TariffStore, source: &str) -> Result<NaiveDate> {
    let last = store
        .last_success_by_source()?
        .into_iter()
        .find(|(s, _)| s == source)
        .map(|(_, ts)| ts);
    let since = match last {
        Some(ts) => chrono::DateTime::from_timestamp(ts, 0)
            .map(|dt| dt.date_naive())
            .unwrap_or_else(|| Utc::now().date_naive()),
        None => Utc::now().date_naive() - Duration::days(FIRST_RUN_LOOKBACK_DAYS),
    };
    Ok(since)
}

/// One full polling cycle for a watcher: run record, discovery, dedup,
/// enqueue, manifest.
pub async fn run_watcher_cycle(
    store: &TariffStore,
    watcher: &dyn Watcher,
    manifest_dir: Option<&str>,
) -> Result<WatcherCycleSummary> {
    let source = watcher.source();
    let since = poll_since(store, source)?;
    let run_id = store.open_run(source)?;
    info!(source, run = %run_id, since = %since, "🛰️  Watcher cycle started");

    let discovered = match watcher.poll(since).await {
        Ok(docs) => docs,
        Err(e) => {
            warn!(source, error = %e, "Watcher poll failed");
            store.close_run(&run_id, 0, 0, Some(&e.to_string()))?;
            return Err(e);
        }
    };

    let now = Utc::now().timestamp();
    let mut enqueued = 0usize;
    for doc in &discovered {
        store.record_run_document(&RunDocument {
            run_id: run_id.clone(),
            document_external_id: doc.external_id.clone(),
            source: doc.source.clone(),
            url: doc.url.clone(),
            discovered_at: now,
        })?;
        if store
            .enqueue_job(&doc.source, &doc.external_id, &doc.url, Some(&run_id))?
            .is_some()
        {
            enqueued += 1;
        }
    }

    store.close_run(&run_id, discovered.len() as i64, enqueued as i64, None)?;
    if let Some(dir) = manifest_dir {
        if let Err(e) = store.write_run_manifest(&run_id, dir) {
            warn!(run = %run_id, error = %e, "Manifest write failed");
        }
    }

    info!(
        source,
        run = %run_id,
        discovered = discovered.len(),
        enqueued,
        "🛰️  Watcher cycle finished"
    );
    Ok(WatcherCycleSummary {
        run_id,
        discovered: discovered.len(),
        enqueued,
    })
}

pub fn watcher_by_name(name: &str) -> Option<Box<dyn Watcher>> {
    match name {
        "federal_register" => Some(Box::new(FederalRegisterWatcher::new())),
        "cbp_csms" => Some(Box::new(CbpCsmsWatcher::new())),
        "usitc" => Some(Box::new(UsitcWatcher::new())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceTier;

    struct FakeWatcher {
        docs: Vec<DiscoveredDocument>,
    }

    #[async_trait]
    impl Watcher for FakeWatcher {
        fn source(&self) -> &'static str {
            "federal_register"
        }

        async fn poll(&self, _since: NaiveDate) -> Result<Vec<DiscoveredDocument>> {
            Ok(self.docs.clone())
        }
    }

    fn doc(external_id: &str) -> DiscoveredDocument {
        DiscoveredDocument {
            source: "federal_register".into(),
            external_id: external_id.into(),
            url: format!("https://www.federalregister.gov/d/{}", external_id),
            title: Some("Notice".into()),
            publication_date: None,
            tier: SourceTier::A,
        }
    }

    #[tokio::test]
    async fn test_cycle_records_run_and_enqueues_with_dedup() {
        let store = TariffStore::open_in_memory().unwrap();
        let watcher = FakeWatcher {
            docs: vec![doc("2025-1"), doc("2025-2")],
        };

        let summary = run_watcher_cycle(&store, &watcher, None).await.unwrap();
        assert_eq!(summary.discovered, 2);
        assert_eq!(summary.enqueued, 2);

        let run = store.run_by_id(&summary.run_id).unwrap().unwrap();
        assert_eq!(run.status, "completed");
        assert_eq!(store.run_documents(&summary.run_id).unwrap().len(), 2);

        // A second cycle rediscovers the same documents but enqueues nothing.
        let summary = run_watcher_cycle(&store, &watcher, None).await.unwrap();
        assert_eq!(summary.discovered, 2);
        assert_eq!(summary.enqueued, 0);
    }
}
