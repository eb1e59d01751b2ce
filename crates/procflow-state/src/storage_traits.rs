//! Storage trait definitions for procflow
//!
//! These traits define the persistence seams of the orchestrator:
//! - `RunLedger`: run lifecycle and the ordered event trail of a run
//! - `PhaseStore`: incrementally persisted phase results, keyed by
//!   run id + phase index, used to resume a run without redoing work
//!
//! All traits are async and backend-agnostic. In-memory fakes live in the
//! `fakes` module; a filesystem backend lives in `fs_store`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::StorageError;
use crate::schema::PhaseRecord;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// ContentDigest
// ---------------------------------------------------------------------------

/// Content digest (SHA-256 hex string).
///
/// The inner field is private so the string is always lowercase hex produced
/// by `from_bytes` or validated via `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentDigest(hex::encode(hasher.finalize()))
    }

    /// Digest of the canonical JSON encoding of `value`.
    pub fn of_json<T: Serialize>(value: &T) -> StorageResult<Self> {
        Ok(Self::from_bytes(&serde_json::to_vec(value)?))
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidDigest { digest: s });
        }
        Ok(ContentDigest(s.to_ascii_lowercase()))
    }
}

impl From<ContentDigest> for String {
    fn from(d: ContentDigest) -> Self {
        d.0
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// RunLedger: run lifecycle and event trail
// ---------------------------------------------------------------------------

/// Unique identifier for a pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    /// Generate a new random RunId
    pub fn new() -> Self {
        RunId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        RunId(s.to_string())
    }
}

impl From<String> for RunId {
    fn from(s: String) -> Self {
        RunId(s)
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Metadata attached to a run at creation time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    /// Workflow name
    pub workflow: String,
    /// Arbitrary key-value tags
    pub tags: serde_json::Value,
}

/// A single event in a pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    /// Monotonic sequence number within the run
    pub seq: u64,
    /// Event kind (e.g. "phase_completed", "task_started")
    pub kind: String,
    /// Event payload
    pub payload: serde_json::Value,
    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

/// Summary produced when a run reaches a terminal status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Phases that completed or were skipped
    pub phases_completed: usize,
    /// Artifacts accumulated so far
    pub artifact_count: usize,
    /// Digest of the final report (if one was produced)
    pub report_digest: Option<ContentDigest>,
    /// Duration in milliseconds
    pub duration_ms: u64,
    /// Whether the run succeeded
    pub success: bool,
}

/// Status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Running,
    Suspended,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// Whether the ledger accepts a move from `self` to `next`.
    ///
    /// `Running -> Running` is the crash-recovery resume of a run whose
    /// process died without recording a terminal status.
    pub fn allows(self, next: RunStatus) -> bool {
        use RunStatus::*;
        match (self, next) {
            (Completed, _) => false,
            (Running, _) => true,
            (Suspended, Running | Failed | Cancelled) => true,
            (Failed | Cancelled, Running) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Full run record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub metadata: RunMetadata,
    pub status: RunStatus,
    pub summary: Option<RunSummary>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunRecord {
    pub fn new(run_id: RunId, metadata: RunMetadata, now: DateTime<Utc>) -> Self {
        Self {
            run_id,
            metadata,
            status: RunStatus::Running,
            summary: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Move the record to `next`, checking the transition table.
    pub fn transition(
        &mut self,
        next: RunStatus,
        summary: Option<RunSummary>,
        now: DateTime<Utc>,
    ) -> StorageResult<()> {
        if !self.status.allows(next) {
            return Err(StorageError::InvalidRunState {
                run_id: self.run_id.0.clone(),
                status: self.status.to_string(),
                expected: format!("a status that may become {next}"),
            });
        }
        self.status = next;
        self.updated_at = now;
        if summary.is_some() {
            self.summary = summary;
        }
        self.completed_at = if next.is_terminal() { Some(now) } else { None };
        Ok(())
    }
}

/// Pipeline run ledger.
///
/// Guarantees:
/// - Events are ordered by monotonic `seq` within a run.
/// - Events can only be appended while the run is `Running`.
/// - Completed runs are immutable; failed, cancelled and suspended runs can
///   be resumed.
#[async_trait]
pub trait RunLedger: Send + Sync {
    /// Create a new run under a caller-chosen id.
    async fn create_run(&self, run_id: &RunId, metadata: RunMetadata)
        -> StorageResult<RunRecord>;

    /// Move an existing, non-completed run back to `Running`.
    async fn resume_run(&self, run_id: &RunId) -> StorageResult<RunRecord>;

    /// Mark a run as waiting on external input.
    async fn suspend_run(&self, run_id: &RunId) -> StorageResult<()>;

    /// Append an event to a running run.
    async fn append_event(&self, run_id: &RunId, event: RunEvent) -> StorageResult<()>;

    /// Mark a run as completed with a summary.
    async fn complete_run(&self, run_id: &RunId, summary: RunSummary) -> StorageResult<()>;

    /// Mark a run as failed with a summary.
    async fn fail_run(&self, run_id: &RunId, summary: RunSummary) -> StorageResult<()>;

    /// Mark a run as cancelled.
    async fn cancel_run(&self, run_id: &RunId, summary: RunSummary) -> StorageResult<()>;

    /// Retrieve a run record by ID.
    async fn get_run(&self, run_id: &RunId) -> StorageResult<RunRecord>;

    /// Retrieve all events for a run, ordered by seq.
    async fn get_events(&self, run_id: &RunId) -> StorageResult<Vec<RunEvent>>;

    /// List runs, optionally filtered by workflow name.
    async fn list_runs(&self, workflow: Option<&str>) -> StorageResult<Vec<RunRecord>>;
}

// ---------------------------------------------------------------------------
// PhaseStore: durable phase results
// ---------------------------------------------------------------------------

/// Incremental phase persistence.
///
/// Guarantees:
/// - `load_phases` returns records ordered by `phase_index`.
/// - Saving the same finalized record twice is a no-op.
/// - A finalized (`completed` / `skipped`) record is never replaced by one
///   with a different output digest.
#[async_trait]
pub trait PhaseStore: Send + Sync {
    /// Insert or update the record for `record.phase_index`.
    async fn save_phase(&self, run_id: &RunId, record: PhaseRecord) -> StorageResult<()>;

    /// All phase records of a run, ordered by index. Empty if none.
    async fn load_phases(&self, run_id: &RunId) -> StorageResult<Vec<PhaseRecord>>;
}

/// Shared upsert rule for `PhaseStore` implementations.
pub(crate) fn check_phase_overwrite(
    run_id: &RunId,
    existing: &PhaseRecord,
    incoming: &PhaseRecord,
) -> StorageResult<()> {
    if existing.status.is_final() && existing.output_digest != incoming.output_digest {
        return Err(StorageError::PhaseConflict {
            run_id: run_id.0.clone(),
            phase_index: existing.phase_index,
            existing: existing.output_digest.short().to_string(),
        });
    }
    Ok(())
}
