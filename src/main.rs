//! Tariffline - Tariff Stacking Evaluator & Regulatory Data Pipeline
//!
//! One process runs the evaluation API, the source watchers and the ingest
//! workers against a shared tariff store.

mod api;
mod bootstrap;
mod catalog;
mod chapter99;
mod commit;
mod evaluator;
mod health;
mod models;
mod pipeline;
mod store;
mod watchers;

use crate::api::{admin_router, AppState};
use crate::models::Config;
use crate::pipeline::{run_worker_loop, NoopNarrativeExtractor, PipelineContext};
use crate::store::TariffStore;
use crate::watchers::{run_watcher_cycle, watcher_by_name};
use anyhow::{Context, Result};
use dotenv::dotenv;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::{sync::Arc, time::Duration};
use tokio::{net::TcpListener, time::interval};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();

    info!("🚀 Tariffline starting");
    let config = Config::from_env();

    let store = Arc::new(TariffStore::new(&config.database_path)?);
    let seeded = bootstrap::seed_baseline(&store)?;
    if seeded > 0 {
        info!("🌱 Baseline dataset committed ({} rows)", seeded);
    }

    let prometheus = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("Failed to install metrics recorder: {e}");
            None
        }
    };

    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .context("Failed to build HTTP client")?;

    let pipeline = Arc::new(PipelineContext {
        store: store.clone(),
        client: http_client,
        stage_timeout: Duration::from_secs(config.stage_timeout_secs),
        max_attempts: config.max_attempts,
        narrative: Arc::new(NoopNarrativeExtractor),
    });

    // Watcher schedulers, one task per source.
    for (source, period_secs) in [
        ("federal_register", config.federal_register_poll_secs),
        ("cbp_csms", config.cbp_csms_poll_secs),
        ("usitc", config.usitc_poll_secs),
    ] {
        let store = store.clone();
        let manifest_dir = config.manifest_dir.clone();
        tokio::spawn(async move {
            watcher_polling(store, source, period_secs, manifest_dir).await;
        });
    }

    // Ingest workers.
    for worker_id in 0..config.worker_count {
        let ctx = pipeline.clone();
        let poll = Duration::from_secs(config.worker_poll_secs);
        tokio::spawn(async move {
            run_worker_loop(ctx, worker_id, poll).await;
        });
    }
    info!("⚙️  {} pipeline workers started", config.worker_count);

    let app_state = AppState {
        store: store.clone(),
        pipeline,
        prometheus,
        manifest_dir: config.manifest_dir.clone(),
        stuck_job_bound_secs: config.stuck_job_bound_secs,
        review_sla_hours: config.review_sla_hours,
        annex_ii_from_db: config.annex_ii_from_db,
    };

    let app = admin_router()
        .with_state(app_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(&config.listen_addr).await?;
    info!("🎯 API server listening on {}", config.listen_addr);
    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

async fn watcher_polling(
    store: Arc<TariffStore>,
    source: &'static str,
    period_secs: u64,
    manifest_dir: String,
) {
    let Some(watcher) = watcher_by_name(source) else {
        warn!(source, "Unknown watcher; scheduler not started");
        return;
    };
    let mut ticker = interval(Duration::from_secs(period_secs.max(60)));
    loop {
        ticker.tick().await;
        if let Err(e) = run_watcher_cycle(&store, watcher.as_ref(), Some(&manifest_dir)).await {
            warn!(source, error = %e, "Watcher cycle failed");
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tariffline_backend=debug,tariffline=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
