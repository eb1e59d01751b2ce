//! Run events recorded into the ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classification of an event in a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    RunStarted { workflow: String },
    RunResumed { workflow: String },
    PhaseStarted { phase: String, index: usize },
    PhaseSkipped { phase: String, index: usize },
    PhaseRestored { phase: String, index: usize },
    PhaseCompleted {
        phase: String,
        index: usize,
        artifact_count: usize,
    },
    TaskStarted {
        task: String,
        effect_id: String,
        attempt: u32,
    },
    TaskCompleted {
        task: String,
        effect_id: String,
        duration_ms: u64,
    },
    TaskFailed {
        task: String,
        effect_id: String,
        error: String,
    },
    BreakpointRequested {
        breakpoint_id: String,
        title: String,
    },
    BreakpointResolved {
        breakpoint_id: String,
        status: String,
    },
    Log { level: String, message: String },
    RunCompleted,
    RunFailed { error: String },
    RunCancelled,
}

impl EventKind {
    /// The snake_case tag used as the ledger event kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run_started",
            Self::RunResumed { .. } => "run_resumed",
            Self::PhaseStarted { .. } => "phase_started",
            Self::PhaseSkipped { .. } => "phase_skipped",
            Self::PhaseRestored { .. } => "phase_restored",
            Self::PhaseCompleted { .. } => "phase_completed",
            Self::TaskStarted { .. } => "task_started",
            Self::TaskCompleted { .. } => "task_completed",
            Self::TaskFailed { .. } => "task_failed",
            Self::BreakpointRequested { .. } => "breakpoint_requested",
            Self::BreakpointResolved { .. } => "breakpoint_resolved",
            Self::Log { .. } => "log",
            Self::RunCompleted => "run_completed",
            Self::RunFailed { .. } => "run_failed",
            Self::RunCancelled => "run_cancelled",
        }
    }
}

/// A single event in a run's trace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub seq: u64,
    pub kind: EventKind,
    /// Extra structured data beyond what the kind carries.
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}
