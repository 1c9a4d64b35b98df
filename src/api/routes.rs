//! Admin and evaluation API
//!
//! Transport framing only: handlers parse inputs, call into the stores,
//! the evaluator, the watchers or the pipeline, and wrap results. Errors
//! carry the `{error: {code, message}}` envelope.

use crate::commit::CommitEngine;
use crate::evaluator::{Evaluator, InputError};
use crate::health;
use crate::models::{CandidateStatus, EvaluationRequest};
use crate::pipeline::{process_queue_once, PipelineContext};
use crate::store::TariffStore;
use crate::watchers::{run_watcher_cycle, watcher_by_name};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::error;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<TariffStore>,
    pub pipeline: Arc<PipelineContext>,
    pub prometheus: Option<PrometheusHandle>,
    pub manifest_dir: String,
    pub stuck_job_bound_secs: i64,
    pub review_sla_hours: i64,
    pub annex_ii_from_db: bool,
}

#[derive(Debug, Clone, Copy)]
pub enum ErrorCode {
    MissingInput,
    NotFound,
    InvalidState,
    InternalError,
}

impl ErrorCode {
    fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::MissingInput => "MISSING_INPUT",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::InvalidState => "INVALID_STATE",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ErrorCode::MissingInput => StatusCode::BAD_REQUEST,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::InvalidState => StatusCode::CONFLICT,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug)]
pub struct ApiError {
    code: ErrorCode,
    message: String,
}

impl ApiError {
    pub fn missing_input(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::MissingInput,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::NotFound,
            message: message.into(),
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::InvalidState,
            message: message.into(),
        }
    }

    pub fn internal(err: anyhow::Error) -> Self {
        error!(error = %err, "Internal API error");
        Self {
            code: ErrorCode::InternalError,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": { "code": self.code.as_str(), "message": self.message }
        });
        (self.code.status(), Json(body)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<InputError>() {
            Some(input) => ApiError::missing_input(input.to_string()),
            None => ApiError::internal(err),
        }
    }
}

pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(get_health))
        .route("/metrics", get(get_metrics))
        .route("/freshness", get(get_freshness))
        .route("/runs", get(get_runs))
        .route("/runs/:id", get(get_run))
        .route("/needs-review", get(get_needs_review))
        .route("/needs-review/:id", get(get_needs_review_item))
        .route("/needs-review/:id/approve", post(post_approve))
        .route("/needs-review/:id/reject", post(post_reject))
        .route("/audit-log", get(get_audit_log))
        .route("/pipeline/trigger-watcher", post(post_trigger_watcher))
        .route("/pipeline/process-queue", post(post_process_queue))
        .route("/api/evaluate", post(post_evaluate))
}

async fn get_health(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    if health::ready(&state.store) {
        Ok(Json(json!({ "status": "ok" })))
    } else {
        Err(ApiError::invalid_state("store not ready"))
    }
}

async fn get_metrics(State(state): State<AppState>) -> Result<String, ApiError> {
    match &state.prometheus {
        Some(handle) => Ok(handle.render()),
        None => Err(ApiError::invalid_state("metrics recorder not installed")),
    }
}

async fn get_freshness(
    State(state): State<AppState>,
) -> Result<Json<health::FreshnessReport>, ApiError> {
    let report = health::freshness_report(
        &state.store,
        state.stuck_job_bound_secs,
        state.review_sla_hours,
    )?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
struct RunsQuery {
    limit: Option<usize>,
}

async fn get_runs(
    State(state): State<AppState>,
    Query(params): Query<RunsQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let runs = state.store.recent_runs(params.limit.unwrap_or(50))?;
    Ok(Json(json!({ "runs": runs })))
}

async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let run = state
        .store
        .run_by_id(&id)?
        .ok_or_else(|| ApiError::not_found(format!("run {} not found", id)))?;
    let documents = state.store.run_documents(&id)?;
    let changes = state.store.run_changes(&id)?;
    Ok(Json(json!({
        "run": run,
        "documents": documents,
        "changes": changes,
    })))
}

#[derive(Debug, Deserialize)]
struct ReviewQuery {
    status: Option<String>,
    limit: Option<usize>,
}

async fn get_needs_review(
    State(state): State<AppState>,
    Query(params): Query<ReviewQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let status = match params.status.as_deref() {
        None => Some(CandidateStatus::Pending),
        Some("all") => None,
        Some(s) => Some(
            CandidateStatus::from_str(s)
                .ok_or_else(|| ApiError::missing_input(format!("unknown status: {}", s)))?,
        ),
    };
    let candidates = state
        .store
        .candidates_by_status(status, params.limit.unwrap_or(100))?;
    Ok(Json(json!({ "candidates": candidates })))
}

async fn get_needs_review_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let candidate = state
        .store
        .candidate_by_id(&id)?
        .ok_or_else(|| ApiError::not_found(format!("candidate {} not found", id)))?;
    let evidence = match candidate.evidence_id.as_deref() {
        Some(ev) => state.store.evidence_by_id(ev)?,
        None => None,
    };
    Ok(Json(json!({ "candidate": candidate, "evidence": evidence })))
}

#[derive(Debug, Deserialize, Default)]
struct ApproveBody {
    duty_rate: Option<f64>,
    effective_start: Option<NaiveDate>,
}

async fn post_approve(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<ApproveBody>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(body) = body.unwrap_or_default();
    if state.store.candidate_by_id(&id)?.is_none() {
        return Err(ApiError::not_found(format!("candidate {} not found", id)));
    }

    let approved = state
        .store
        .approve_candidate(&id, body.duty_rate, body.effective_start)
        .map_err(|e| ApiError::invalid_state(e.to_string()))?;

    let engine = CommitEngine::new(&state.store);
    match engine.apply(&approved) {
        Ok(rate_row_id) => Ok(Json(json!({
            "candidate_id": id,
            "status": "committed",
            "rate_row_id": rate_row_id,
        }))),
        Err(e) => Err(ApiError::invalid_state(format!(
            "approved but commit refused: {}",
            e
        ))),
    }
}

#[derive(Debug, Deserialize)]
struct RejectBody {
    reason: String,
}

async fn post_reject(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<RejectBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if body.reason.trim().is_empty() {
        return Err(ApiError::missing_input("reason is required"));
    }
    if state.store.candidate_by_id(&id)?.is_none() {
        return Err(ApiError::not_found(format!("candidate {} not found", id)));
    }
    let rejected = state
        .store
        .reject_candidate(&id, &body.reason)
        .map_err(|e| ApiError::invalid_state(e.to_string()))?;
    Ok(Json(json!({
        "candidate_id": rejected.id,
        "status": rejected.status,
    })))
}

#[derive(Debug, Deserialize)]
struct AuditQuery {
    limit: Option<usize>,
}

async fn get_audit_log(
    State(state): State<AppState>,
    Query(params): Query<AuditQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let entries = state.store.audit_entries(params.limit.unwrap_or(200))?;
    Ok(Json(json!({ "entries": entries })))
}

#[derive(Debug, Deserialize)]
struct TriggerWatcherBody {
    source: String,
}

async fn post_trigger_watcher(
    State(state): State<AppState>,
    Json(body): Json<TriggerWatcherBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let watcher = watcher_by_name(&body.source)
        .ok_or_else(|| ApiError::not_found(format!("unknown watcher: {}", body.source)))?;
    let summary =
        run_watcher_cycle(&state.store, watcher.as_ref(), Some(&state.manifest_dir)).await?;
    Ok(Json(json!({
        "run_id": summary.run_id,
        "discovered": summary.discovered,
        "enqueued": summary.enqueued,
    })))
}

async fn post_process_queue(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let processed = process_queue_once(&state.pipeline).await?;
    Ok(Json(json!({ "processed": processed })))
}

async fn post_evaluate(
    State(state): State<AppState>,
    Json(request): Json<EvaluationRequest>,
) -> Result<Json<crate::models::EvaluationResult>, ApiError> {
    if request.hts_code.trim().is_empty() {
        return Err(ApiError::missing_input("hts_code is required"));
    }
    let evaluator = Evaluator::with_annex_ii_from_db(&state.store, state.annex_ii_from_db);
    let result = evaluator.evaluate(&request)?;
    Ok(Json(result))
}
