//! Error types for procflow-state

use thiserror::Error;

/// Errors that can occur in the run persistence layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// No run with this id exists
    #[error("run not found: {run_id}")]
    RunNotFound { run_id: String },

    /// Run id cannot be used as a directory name
    #[error("invalid run id: {run_id}")]
    InvalidRunId { run_id: String },

    /// A run with this id was already created
    #[error("run already exists: {run_id}")]
    RunExists { run_id: String },

    /// The requested transition is not legal from the run's current status
    #[error("run {run_id} is {status}, expected {expected}")]
    InvalidRunState {
        run_id: String,
        status: String,
        expected: String,
    },

    /// A finalized phase was saved again with different content
    #[error("phase {phase_index} of run {run_id} already recorded with digest {existing}")]
    PhaseConflict {
        run_id: String,
        phase_index: usize,
        existing: String,
    },

    /// Digest string is not 64 hex chars
    #[error("invalid digest: {digest}")]
    InvalidDigest { digest: String },

    /// Serialization error
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
