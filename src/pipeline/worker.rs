//! Pipeline worker
//!
//! Claims jobs from the ingest queue and walks them through the stages.
//! Transient trouble requeues with backoff up to an attempt ceiling;
//! anything a retry cannot fix routes to the review queue.

use super::chunk::chunk_text;
use super::extract::{extract_tabular, ExtractedChange, NarrativeExtractor};
use super::fetch::fetch_document;
use super::render::render_text;
use super::validate::validate_candidate;
use super::write_gate::run_write_gate;
use super::ReviewRouted;
use crate::commit::CommitEngine;
use crate::models::{CandidateChange, CandidateStatus, EvidencePacket, IngestJob, JobStatus};
use crate::store::TariffStore;
use anyhow::{Context, Result};
use chrono::Utc;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{info, warn};
use uuid::Uuid;

pub struct PipelineContext {
    pub store: Arc<TariffStore>,
    pub client: reqwest::Client,
    pub stage_timeout: Duration,
    pub max_attempts: i64,
    pub narrative: Arc<dyn NarrativeExtractor>,
}

/// Long-running consumer loop for one worker.
pub async fn run_worker_loop(ctx: Arc<PipelineContext>, worker_id: usize, poll_interval: Duration) {
    info!(worker = worker_id, "⚙️  Pipeline worker started");
    loop {
        match ctx.store.claim_next_job() {
            Ok(Some(job)) => {
                let attempts = job.attempts;
                if let Err(e) = drive_job(&ctx, job).await {
                    // Transient failure: stay off the queue briefly so a
                    // flapping upstream is not hammered.
                    warn!(worker = worker_id, error = %e, "Job attempt failed");
                    sleep(backoff_delay(attempts)).await;
                }
            }
            Ok(None) => sleep(poll_interval).await,
            Err(e) => {
                warn!(worker = worker_id, error = %e, "Queue claim failed");
                sleep(poll_interval).await;
            }
        }
    }
}

/// Drain the queue once, for the admin trigger endpoint. Returns processed
/// job count.
pub async fn process_queue_once(ctx: &PipelineContext) -> Result<usize> {
    let mut processed = 0usize;
    while let Some(job) = ctx.store.claim_next_job()? {
        let _ = drive_job(ctx, job).await;
        processed += 1;
    }
    Ok(processed)
}

/// Run one claimed job to a terminal or requeued state. Errors returned
/// here are transient-only; review routing is terminal and returns Ok.
async fn drive_job(ctx: &PipelineContext, job: IngestJob) -> Result<()> {
    let job_id = job.id.clone();
    let attempts = job.attempts;

    match process_job(ctx, &job).await {
        Ok(status) => {
            metrics::increment_counter!("pipeline_jobs_total", "status" => status.as_str());
            Ok(())
        }
        Err(e) => {
            if let Some(routed) = e.downcast_ref::<ReviewRouted>() {
                info!(job = %job_id, reason = %routed.0, "Job routed to review");
                ctx.store
                    .finish_job(&job_id, JobStatus::NeedsReview, Some(&routed.0))?;
                metrics::increment_counter!("pipeline_jobs_total", "status" => "needs_review");
                return Ok(());
            }
            if attempts >= ctx.max_attempts {
                warn!(job = %job_id, attempts, "Attempt ceiling reached; job failed");
                ctx.store
                    .finish_job(&job_id, JobStatus::Failed, Some(&e.to_string()))?;
                metrics::increment_counter!("pipeline_jobs_total", "status" => "failed");
                return Ok(());
            }
            ctx.store.requeue_job(&job_id, &e.to_string())?;
            Err(e)
        }
    }
}

/// The staged body. Every stage transition checks claim ownership.
pub async fn process_job(ctx: &PipelineContext, job: &IngestJob) -> Result<JobStatus> {
    let store = ctx.store.as_ref();
    let token = job
        .claim_token
        .clone()
        .context("job has no claim token")?;

    // Fetch (the job was claimed directly into this status).
    let outcome = timeout(ctx.stage_timeout, fetch_document(store, &ctx.client, job))
        .await
        .map_err(|_| anyhow::anyhow!("fetch stage timed out"))??;
    store.attach_job_document(&job.id, &token, &outcome.document_id)?;

    if outcome.unchanged {
        // Idempotence: an unchanged document produces zero new candidates.
        store.finish_job(&job.id, JobStatus::Committed, None)?;
        return Ok(JobStatus::Committed);
    }

    // Render.
    store.advance_job(&job.id, &token, JobStatus::Rendering)?;
    let doc = store
        .document_by_id(&outcome.document_id)?
        .context("fetched document vanished")?;
    let text = render_text(&doc.raw_bytes)?;
    store.set_document_text(&doc.id, &text)?;

    // Chunk.
    store.advance_job(&job.id, &token, JobStatus::Chunking)?;
    let chunks = chunk_text(&doc.id, &text);
    store.insert_chunks(&chunks)?;

    // Extract: deterministic tabular first, then the narrative seam.
    store.advance_job(&job.id, &token, JobStatus::Extracting)?;
    let mut changes = extract_tabular(&text);
    if changes.is_empty() {
        changes = timeout(ctx.stage_timeout, async {
            ctx.narrative.extract(&text)
        })
        .await
        .map_err(|_| anyhow::anyhow!("narrative extraction timed out"))??;
    }
    if changes.is_empty() {
        info!(job = %job.id, doc = %doc.id, "No rate assertions found; nothing to commit");
        store.finish_job(&job.id, JobStatus::Committed, None)?;
        return Ok(JobStatus::Committed);
    }

    // Validate.
    store.advance_job(&job.id, &token, JobStatus::Validating)?;
    let verdicts: Vec<_> = changes
        .iter()
        .map(|c| validate_candidate(&text, c))
        .collect();

    // WriteGate + commit per candidate.
    store.advance_job(&job.id, &token, JobStatus::Committing)?;
    let engine = CommitEngine::new(store);
    let mut held = 0usize;

    for (change, verdict) in changes.iter().zip(&verdicts) {
        let candidate = persist_candidate(store, job, &doc.id, &chunks, change, verdict)?;
        let gate = run_write_gate(store, &candidate, change.corroboration_required)?;

        if let Some(ev) = candidate.evidence_id.as_deref() {
            store.update_evidence_gate(ev, gate.passed, &gate.failures)?;
        }

        if !gate.passed {
            held += 1;
            store
                .set_candidate_block(&candidate.id, &gate.failures.join("; "))?;
            continue;
        }

        let approved = store.approve_candidate(&candidate.id, None, None)?;
        if engine.apply(&approved).is_err() {
            // Invariant refusal: the candidate keeps its block reason and
            // waits for an operator.
            held += 1;
        }
    }

    let status = if held > 0 {
        JobStatus::NeedsReview
    } else {
        JobStatus::Committed
    };
    store.finish_job(
        &job.id,
        status,
        (held > 0).then(|| format!("{} candidate(s) held for review", held)).as_deref(),
    )?;
    info!(
        job = %job.id,
        candidates = changes.len(),
        held,
        status = status.as_str(),
        "📦 Ingest job finished"
    );
    Ok(status)
}

/// Store the evidence packet and pending candidate for one extracted change.
fn persist_candidate(
    store: &TariffStore,
    job: &IngestJob,
    document_id: &str,
    chunks: &[crate::models::DocumentChunk],
    change: &ExtractedChange,
    verdict: &super::validate::ValidationVerdict,
) -> Result<CandidateChange> {
    let now = Utc::now().timestamp();

    // The chunk whose text carries the quote verbatim. A missing carrier is
    // recorded as-is and fails the gate's substring check.
    let chunk_id = chunks
        .iter()
        .find(|c| c.text.contains(&change.quote))
        .map(|c| c.id.clone())
        .or_else(|| chunks.first().map(|c| c.id.clone()))
        .unwrap_or_default();

    let evidence = EvidencePacket {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        chunk_id,
        quote: change.quote.clone(),
        quote_sha256: hex::encode(Sha256::digest(change.quote.as_bytes())),
        extractor_output: Some(serde_json::json!({
            "program_id": change.program_id,
            "chapter99_code": change.chapter99_code,
        }).to_string()),
        validator_output: Some(serde_json::to_string(verdict)?),
        write_gate_passed: false,
        gate_failures: vec![],
        created_at: now,
    };
    store.insert_evidence(&evidence)?;

    let candidate = CandidateChange {
        id: Uuid::new_v4().to_string(),
        program_id: change.program_id.clone(),
        subject: change.subject.clone(),
        role: change.role,
        chapter99_code: change.chapter99_code.clone(),
        duty_rate: change.duty_rate,
        formula: change.formula.clone(),
        effective_start: change.effective_start,
        effective_end: change.effective_end,
        evidence_id: Some(evidence.id),
        source_document_id: Some(document_id.to_string()),
        run_id: job.run_id.clone(),
        dataset_tag: None,
        status: CandidateStatus::Pending,
        block_reason: None,
        priority: 0,
        created_at: now,
        updated_at: now,
    };
    store.insert_candidate(&candidate)?;
    Ok(candidate)
}

fn backoff_delay(attempts: i64) -> Duration {
    let base = 2u64.saturating_pow(attempts.clamp(0, 6) as u32);
    let jitter = rand::thread_rng().gen_range(0..500);
    Duration::from_millis(base * 1000 + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_with_attempts() {
        let first = backoff_delay(1);
        let fourth = backoff_delay(4);
        assert!(fourth > first);
        // Ceiling keeps the delay bounded.
        assert!(backoff_delay(60) < Duration::from_secs(70));
    }
}
