//! Ingest pipeline
//!
//! Fetch → Render → Chunk → Extract → Validate → WriteGate, driven by the
//! work queue. Stages are strict and per-job sequential; the worker owns a
//! job from claim to terminal status.

pub mod chunk;
pub mod extract;
pub mod fetch;
pub mod render;
pub mod validate;
pub mod worker;
pub mod write_gate;

pub use extract::{ExtractedChange, NarrativeExtractor, NoopNarrativeExtractor};
pub use worker::{process_job, process_queue_once, run_worker_loop, PipelineContext};

use std::fmt;

/// Error routed to the review queue rather than retried. Everything else a
/// stage raises is treated as transient infrastructure trouble.
#[derive(Debug)]
pub struct ReviewRouted(pub String);

impl fmt::Display for ReviewRouted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ReviewRouted {}
