//! In-memory fakes for storage traits (testing and embedding)
//!
//! Provides `MemoryRunLedger` and `MemoryPhaseStore` that satisfy the trait
//! contracts without touching the filesystem.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StorageError;
use crate::schema::PhaseRecord;
use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// MemoryRunLedger
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct RunState {
    record: RunRecord,
    events: Vec<RunEvent>,
}

/// In-memory run ledger backed by a `HashMap<RunId, RunState>`.
#[derive(Debug, Default)]
pub struct MemoryRunLedger {
    runs: Mutex<HashMap<String, RunState>>,
}

impl MemoryRunLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn transition(
        &self,
        run_id: &RunId,
        next: RunStatus,
        summary: Option<RunSummary>,
    ) -> StorageResult<RunRecord> {
        let mut runs = self.runs.lock().unwrap();
        let state = runs
            .get_mut(&run_id.0)
            .ok_or_else(|| StorageError::RunNotFound {
                run_id: run_id.0.clone(),
            })?;
        state.record.transition(next, summary, Utc::now())?;
        Ok(state.record.clone())
    }
}

#[async_trait]
impl RunLedger for MemoryRunLedger {
    async fn create_run(
        &self,
        run_id: &RunId,
        metadata: RunMetadata,
    ) -> StorageResult<RunRecord> {
        let mut runs = self.runs.lock().unwrap();
        if runs.contains_key(&run_id.0) {
            return Err(StorageError::RunExists {
                run_id: run_id.0.clone(),
            });
        }
        let record = RunRecord::new(run_id.clone(), metadata, Utc::now());
        runs.insert(
            run_id.0.clone(),
            RunState {
                record: record.clone(),
                events: Vec::new(),
            },
        );
        Ok(record)
    }

    async fn resume_run(&self, run_id: &RunId) -> StorageResult<RunRecord> {
        self.transition(run_id, RunStatus::Running, None)
    }

    async fn suspend_run(&self, run_id: &RunId) -> StorageResult<()> {
        self.transition(run_id, RunStatus::Suspended, None)
            .map(|_| ())
    }

    async fn append_event(&self, run_id: &RunId, event: RunEvent) -> StorageResult<()> {
        let mut runs = self.runs.lock().unwrap();
        let state = runs
            .get_mut(&run_id.0)
            .ok_or_else(|| StorageError::RunNotFound {
                run_id: run_id.0.clone(),
            })?;
        if state.record.status != RunStatus::Running {
            return Err(StorageError::InvalidRunState {
                run_id: run_id.0.clone(),
                status: state.record.status.to_string(),
                expected: RunStatus::Running.to_string(),
            });
        }
        state.events.push(event);
        Ok(())
    }

    async fn complete_run(&self, run_id: &RunId, summary: RunSummary) -> StorageResult<()> {
        self.transition(run_id, RunStatus::Completed, Some(summary))
            .map(|_| ())
    }

    async fn fail_run(&self, run_id: &RunId, summary: RunSummary) -> StorageResult<()> {
        self.transition(run_id, RunStatus::Failed, Some(summary))
            .map(|_| ())
    }

    async fn cancel_run(&self, run_id: &RunId, summary: RunSummary) -> StorageResult<()> {
        self.transition(run_id, RunStatus::Cancelled, Some(summary))
            .map(|_| ())
    }

    async fn get_run(&self, run_id: &RunId) -> StorageResult<RunRecord> {
        let runs = self.runs.lock().unwrap();
        runs.get(&run_id.0)
            .map(|s| s.record.clone())
            .ok_or_else(|| StorageError::RunNotFound {
                run_id: run_id.0.clone(),
            })
    }

    async fn get_events(&self, run_id: &RunId) -> StorageResult<Vec<RunEvent>> {
        let runs = self.runs.lock().unwrap();
        let state = runs
            .get(&run_id.0)
            .ok_or_else(|| StorageError::RunNotFound {
                run_id: run_id.0.clone(),
            })?;
        let mut events = state.events.clone();
        events.sort_by_key(|e| e.seq);
        Ok(events)
    }

    async fn list_runs(&self, workflow: Option<&str>) -> StorageResult<Vec<RunRecord>> {
        let runs = self.runs.lock().unwrap();
        let mut records: Vec<RunRecord> = runs
            .values()
            .filter(|s| workflow.map(|w| s.record.metadata.workflow == w).unwrap_or(true))
            .map(|s| s.record.clone())
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }
}

// ---------------------------------------------------------------------------
// MemoryPhaseStore
// ---------------------------------------------------------------------------

/// In-memory phase store keyed by run id, then phase index.
#[derive(Debug, Default)]
pub struct MemoryPhaseStore {
    phases: Mutex<HashMap<String, BTreeMap<usize, PhaseRecord>>>,
}

impl MemoryPhaseStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PhaseStore for MemoryPhaseStore {
    async fn save_phase(&self, run_id: &RunId, record: PhaseRecord) -> StorageResult<()> {
        let mut phases = self.phases.lock().unwrap();
        let run = phases.entry(run_id.0.clone()).or_default();
        if let Some(existing) = run.get(&record.phase_index) {
            check_phase_overwrite(run_id, existing, &record)?;
        }
        run.insert(record.phase_index, record);
        Ok(())
    }

    async fn load_phases(&self, run_id: &RunId) -> StorageResult<Vec<PhaseRecord>> {
        let phases = self.phases.lock().unwrap();
        Ok(phases
            .get(&run_id.0)
            .map(|run| run.values().cloned().collect())
            .unwrap_or_default())
    }
}
