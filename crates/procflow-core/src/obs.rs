//! Structured observability hooks for procflow run lifecycle events.
//!
//! This module provides:
//! - Run-scoped tracing spans via `RunSpan`
//! - Emission functions for key lifecycle events: run start/finish, phase
//!   transitions, task completion and breakpoints
//!
//! Events are emitted at `info!` level (configurable via `RUST_LOG`).
//! For JSON output, pass `--json` to the CLI or `json = true` to
//! [`crate::telemetry::init_tracing`].

use tracing::{info, warn, Span};

/// Run-scoped tracing span.
///
/// Async code attaches it with `tracing::Instrument::instrument(span.span())`;
/// synchronous code may hold [`RunSpan::enter`]'s guard instead.
///
/// # Example
///
/// ```ignore
/// let span = RunSpan::new("run-12345", "pentest");
/// pipeline_future.instrument(span.span()).await;
/// // every event inside carries run_id = "run-12345"
/// ```
#[derive(Debug, Clone)]
pub struct RunSpan {
    span: Span,
}

impl RunSpan {
    pub fn new(run_id: &str, workflow: &str) -> Self {
        Self {
            span: tracing::info_span!("procflow.run", run_id = %run_id, workflow = %workflow),
        }
    }

    pub fn span(&self) -> Span {
        self.span.clone()
    }

    /// Enter the span for the lifetime of the returned guard (sync code only).
    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

/// Emit event: run started (or resumed) for a workflow.
pub fn emit_run_started(run_id: &str, workflow: &str, resumed: bool) {
    info!(event = "run.started", run_id = %run_id, workflow = %workflow, resumed = resumed);
}

/// Emit event: run finished with duration, phase count and outcome.
pub fn emit_run_finished(run_id: &str, duration_ms: u64, phases_completed: usize, status: &str) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        phases_completed = phases_completed,
        status = %status,
    );
}

pub fn emit_phase_started(run_id: &str, phase: &str, index: usize) {
    info!(event = "phase.started", run_id = %run_id, phase = %phase, index = index);
}

pub fn emit_phase_skipped(run_id: &str, phase: &str, index: usize, restored: bool) {
    info!(
        event = "phase.skipped",
        run_id = %run_id,
        phase = %phase,
        index = index,
        restored = restored,
    );
}

pub fn emit_phase_completed(run_id: &str, phase: &str, index: usize, artifact_count: usize) {
    info!(
        event = "phase.completed",
        run_id = %run_id,
        phase = %phase,
        index = index,
        artifact_count = artifact_count,
    );
}

/// Emit event: task returned a schema-valid result.
pub fn emit_task_completed(run_id: &str, task: &str, effect_id: &str, duration_ms: u64) {
    info!(
        event = "task.completed",
        run_id = %run_id,
        task = %task,
        effect_id = %effect_id,
        duration_ms = duration_ms,
    );
}

/// Emit event: task attempt failed (warning level).
pub fn emit_task_failed(run_id: &str, task: &str, effect_id: &str, error: &dyn std::fmt::Display) {
    warn!(
        event = "task.failed",
        run_id = %run_id,
        task = %task,
        effect_id = %effect_id,
        error = %error,
    );
}

pub fn emit_breakpoint_requested(run_id: &str, breakpoint_id: &str, title: &str) {
    info!(
        event = "breakpoint.requested",
        run_id = %run_id,
        breakpoint_id = %breakpoint_id,
        title = %title,
    );
}

pub fn emit_breakpoint_resolved(run_id: &str, breakpoint_id: &str, status: &str) {
    info!(
        event = "breakpoint.resolved",
        run_id = %run_id,
        breakpoint_id = %breakpoint_id,
        status = %status,
    );
}

/// Emit event: the ledger refused a write (warning level).
pub fn emit_ledger_error(run_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "run.ledger_error", run_id = %run_id, error = %error);
}
