//! Structured observability hooks for triage run lifecycle events.
//!
//! - Run-scoped tracing spans: [`run_span`] for async code, [`RunSpan`] RAII
//!   guard for synchronous callers
//! - Emission functions for stage boundaries, retries and failures
//!
//! Events are emitted at `info!` level unless noted (filter with `RUST_LOG`).
//! Pass `--json` to the CLI for newline-delimited JSON.

use tracing::{info, warn, Span};

use crate::domain::Stage;

/// RAII guard that enters a run-scoped tracing span for the duration of a run.
///
/// # Example
///
/// ```ignore
/// let _span = RunSpan::enter("1f0c...", "debug-pod");
/// // every event below is tagged with run_id and tool
/// ```
pub struct RunSpan {
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    /// Create and enter a span tagged with the run id and tool name.
    pub fn enter(run_id: &str, tool: &str) -> Self {
        Self {
            _span: run_span(run_id, tool).entered(),
        }
    }
}

/// The `triage.run` span, for use with `Instrument::instrument`.
pub fn run_span(run_id: &str, tool: &str) -> Span {
    tracing::info_span!("triage.run", run_id = %run_id, tool = %tool)
}

/// Emit event: run started against a subject with a given model.
pub fn emit_run_started(run_id: &str, profile: &str, model: &str) {
    info!(event = "run.started", run_id = %run_id, profile = %profile, model = %model);
}

/// Emit event: one pipeline stage completed.
pub fn emit_stage_finished(stage: Stage, elapsed_ms: u64) {
    info!(event = "stage.finished", stage = %stage, elapsed_ms = elapsed_ms);
}

/// Emit event: evidence bounded for prompting.
pub fn emit_evidence_normalized(kept: usize, omitted: usize, duplicates: usize) {
    info!(
        event = "evidence.normalized",
        kept = kept,
        omitted = omitted,
        duplicates = duplicates,
    );
}

/// Emit event: an inference attempt timed out and will be retried (warning level).
pub fn emit_inference_retry(attempt: u32, timeout_secs: u64) {
    warn!(event = "inference.retry", attempt = attempt, timeout_secs = timeout_secs);
}

/// Emit event: run finished with total duration.
pub fn emit_run_finished(run_id: &str, duration_ms: u64, outcome_kind: &str) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        outcome = %outcome_kind,
    );
}

/// Emit event: run aborted in a stage (warning level).
pub fn emit_run_failed(stage: Stage, error: &dyn std::fmt::Display) {
    warn!(event = "run.failed", stage = %stage, error = %error);
}
