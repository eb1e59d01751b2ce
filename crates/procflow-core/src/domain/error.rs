//! Domain-level error taxonomy for procflow.

use std::fmt;

use procflow_state::StorageError;

use crate::breakpoint::BreakpointError;

/// One mismatch between an agent result and its declared output schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    /// JSON path of the offending value, e.g. `$.findings[2].severity`.
    pub path: String,
    /// Shape the schema asked for.
    pub expected: String,
    /// Shape (or value) actually found.
    pub actual: String,
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: expected {}, got {}",
            self.path, self.expected, self.actual
        )
    }
}

fn join_violations(violations: &[SchemaViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// procflow domain errors.
#[derive(Debug, thiserror::Error)]
pub enum ProcflowError {
    #[error("task {task} failed: {reason}")]
    TaskExecution { task: String, reason: String },

    #[error("task {task} returned a result violating its output schema: {}", join_violations(.violations))]
    SchemaValidation {
        task: String,
        violations: Vec<SchemaViolation>,
    },

    #[error("task {task} timed out after {timeout_ms}ms")]
    Timeout { task: String, timeout_ms: u64 },

    #[error("breakpoint '{title}' was not resolved within {timeout_secs}s")]
    BreakpointTimeout { title: String, timeout_secs: u64 },

    #[error("breakpoint '{title}' rejected by {reviewer}: {reason}")]
    BreakpointRejected {
        title: String,
        reviewer: String,
        reason: String,
    },

    #[error("run suspended awaiting breakpoint {breakpoint_id}")]
    Suspended { breakpoint_id: String },

    #[error("run cancelled")]
    Cancelled,

    #[error("parallel branch {index} failed: {source}")]
    ParallelBranch {
        index: usize,
        #[source]
        source: Box<ProcflowError>,
    },

    #[error("task graph node {node} failed: {source}")]
    GraphNode {
        node: String,
        #[source]
        source: Box<ProcflowError>,
    },

    #[error("invalid task graph: {0}")]
    InvalidGraph(String),

    #[error("task already registered: {0}")]
    DuplicateTask(String),

    #[error("unknown task: {0}")]
    UnknownTask(String),

    #[error("invalid pipeline: {0}")]
    InvalidPipeline(String),

    #[error("persisted phase {index} is '{found}', pipeline declares '{expected}'")]
    ResumeMismatch {
        index: usize,
        expected: String,
        found: String,
    },

    #[error("run {run_id} already completed")]
    RunCompleted { run_id: String },

    #[error("invalid manifest: {0}")]
    Manifest(String),

    #[error("template error: {0}")]
    Template(String),

    #[error("invalid run state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("breakpoint error: {0}")]
    Breakpoint(#[from] BreakpointError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProcflowError {
    /// Whether a task-level retry may succeed where this attempt failed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TaskExecution { .. } | Self::SchemaValidation { .. } | Self::Timeout { .. }
        )
    }

    /// Whether this error came from operator cancellation, directly or
    /// through a parallel branch.
    pub fn is_cancellation(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::ParallelBranch { source, .. } | Self::GraphNode { source, .. } => {
                source.is_cancellation()
            }
            _ => false,
        }
    }

    /// Breakpoint id if this error parked the run on an unresolved breakpoint.
    pub fn suspended_on(&self) -> Option<&str> {
        match self {
            Self::Suspended { breakpoint_id } => Some(breakpoint_id),
            Self::ParallelBranch { source, .. } | Self::GraphNode { source, .. } => {
                source.suspended_on()
            }
            _ => None,
        }
    }
}

/// Result type for procflow domain operations.
pub type Result<T> = std::result::Result<T, ProcflowError>;
