//! The final result object of a pipeline run.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use procflow_state::{ContentDigest, PhaseStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::state::RunState;
use crate::domain::{Artifact, ProcflowError, Result};

/// One line of the report per declared phase that was reached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseSummary {
    pub index: usize,
    pub name: String,
    pub status: PhaseStatus,
    pub artifact_count: usize,
    /// Taken from an earlier attempt of the same run instead of executed.
    #[serde(default)]
    pub restored: bool,
    /// Outcome of the phase gate, if one was raised.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate: Option<String>,
}

/// JSON report of a run. Maps are sorted, so serialization is stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub run_id: String,
    pub workflow: String,
    pub status: RunState,
    pub phases: Vec<PhaseSummary>,
    /// Phase name -> phase output, for completed phases.
    pub results: BTreeMap<String, Value>,
    pub artifacts: Vec<Artifact>,
    pub artifact_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub metadata: BTreeMap<String, Value>,
}

impl PipelineReport {
    /// SHA-256 over the serialized report.
    pub fn digest(&self) -> Result<ContentDigest> {
        Ok(ContentDigest::of_json(self)?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn phases_completed(&self) -> usize {
        self.phases
            .iter()
            .filter(|p| p.status == PhaseStatus::Completed)
            .count()
    }

    pub fn is_success(&self) -> bool {
        self.status == RunState::Completed
    }
}

/// A run that did not complete: the error plus everything accumulated
/// before it.
#[derive(Debug, thiserror::Error)]
#[error("workflow {} stopped ({}): {error}", report.workflow, report.status)]
pub struct PipelineFailure {
    pub error: ProcflowError,
    pub report: Box<PipelineReport>,
}

impl PipelineFailure {
    /// Breakpoint id if the run is parked rather than failed.
    pub fn suspended_on(&self) -> Option<&str> {
        self.error.suspended_on()
    }
}
