//! Persisted record shapes shared by the storage backends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage_traits::{ContentDigest, StorageResult};

/// Reference to a file generated by a phase (report, config, script, ...).
///
/// Purely bookkeeping: nothing checks that `path` exists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Artifact {
    pub path: String,
    pub format: String,
    pub label: String,
}

impl Artifact {
    pub fn new(
        path: impl Into<String>,
        format: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            format: format.into(),
            label: label.into(),
        }
    }
}

/// Lifecycle of a persisted phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    /// Phase ran and its output is final.
    Completed,
    /// Phase condition was false; output is null.
    Skipped,
    /// Phase ran; its gate breakpoint has not been resolved yet.
    AwaitingApproval,
}

impl PhaseStatus {
    /// Whether the record can no longer change content.
    pub fn is_final(self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }
}

/// Durable result of one pipeline phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseRecord {
    /// 0-indexed position of the phase in the pipeline.
    pub phase_index: usize,
    pub name: String,
    pub status: PhaseStatus,
    pub output: serde_json::Value,
    pub artifacts: Vec<Artifact>,
    /// SHA-256 of the serialized `output`.
    pub output_digest: ContentDigest,
    pub recorded_at: DateTime<Utc>,
}

impl PhaseRecord {
    /// Build a record, computing the output digest.
    pub fn new(
        phase_index: usize,
        name: impl Into<String>,
        status: PhaseStatus,
        output: serde_json::Value,
        artifacts: Vec<Artifact>,
        recorded_at: DateTime<Utc>,
    ) -> StorageResult<Self> {
        let output_digest = ContentDigest::of_json(&output)?;
        Ok(Self {
            phase_index,
            name: name.into(),
            status,
            output,
            artifacts,
            output_digest,
            recorded_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_record_digest_tracks_output() {
        let now = Utc::now();
        let a = PhaseRecord::new(
            0,
            "scan",
            PhaseStatus::Completed,
            serde_json::json!({"count": 3}),
            vec![],
            now,
        )
        .unwrap();
        let b = PhaseRecord::new(
            0,
            "scan",
            PhaseStatus::Completed,
            serde_json::json!({"count": 4}),
            vec![],
            now,
        )
        .unwrap();
        assert_ne!(a.output_digest, b.output_digest);
    }

    #[test]
    fn test_phase_status_serializes_snake_case() {
        let json = serde_json::to_string(&PhaseStatus::AwaitingApproval).unwrap();
        assert_eq!(json, "\"awaiting_approval\"");
        assert!(!PhaseStatus::AwaitingApproval.is_final());
        assert!(PhaseStatus::Skipped.is_final());
    }
}
