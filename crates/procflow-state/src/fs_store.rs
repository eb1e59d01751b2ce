//! Filesystem-backed run ledger and phase store.
//!
//! Layout under `<root>/runs/<run_id>/`:
//!
//! - `run.json`: the [`RunRecord`]
//! - `events.jsonl`: one [`RunEvent`] per line, append-only
//! - `phases/<index>.json`: one [`PhaseRecord`] per phase
//!
//! Whole-file writes go through a temp file in the same directory followed by
//! a rename, so a crash never leaves a half-written record behind.

use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::StorageError;
use crate::schema::PhaseRecord;
use crate::storage_traits::*;

const RUN_FILE: &str = "run.json";
const EVENTS_FILE: &str = "events.jsonl";
const PHASES_DIR: &str = "phases";

/// JSON-file store implementing both [`RunLedger`] and [`PhaseStore`].
pub struct FsRunStore {
    runs_dir: PathBuf,
    // Serializes read-modify-write cycles on run.json.
    write_lock: Mutex<()>,
}

impl FsRunStore {
    /// Create a store rooted at `root`. Creates `root/runs/` if needed.
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let runs_dir = root.as_ref().join("runs");
        fs::create_dir_all(&runs_dir)?;
        Ok(Self {
            runs_dir,
            write_lock: Mutex::new(()),
        })
    }

    /// Directory holding everything recorded for `run_id`.
    pub fn run_dir(&self, run_id: &RunId) -> StorageResult<PathBuf> {
        let id = run_id.as_str();
        let valid = !id.is_empty()
            && id != "."
            && id != ".."
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(StorageError::InvalidRunId {
                run_id: id.to_string(),
            });
        }
        Ok(self.runs_dir.join(id))
    }

    fn read_record(&self, run_id: &RunId) -> StorageResult<RunRecord> {
        let path = self.run_dir(run_id)?.join(RUN_FILE);
        let bytes = fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::RunNotFound {
                    run_id: run_id.0.clone(),
                }
            } else {
                StorageError::Io(e)
            }
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn write_record(&self, record: &RunRecord) -> StorageResult<()> {
        let path = self.run_dir(&record.run_id)?.join(RUN_FILE);
        write_atomic(&path, &serde_json::to_vec_pretty(record)?)
    }

    fn transition(
        &self,
        run_id: &RunId,
        next: RunStatus,
        summary: Option<RunSummary>,
    ) -> StorageResult<RunRecord> {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut record = self.read_record(run_id)?;
        record.transition(next, summary, Utc::now())?;
        self.write_record(&record)?;
        debug!(run_id = %run_id, status = %next, "run status updated");
        Ok(record)
    }

    fn phase_path(&self, run_id: &RunId, phase_index: usize) -> StorageResult<PathBuf> {
        Ok(self
            .run_dir(run_id)?
            .join(PHASES_DIR)
            .join(format!("{phase_index:04}.json")))
    }
}

/// Write `data` to `path` through a temp file + rename.
fn write_atomic(path: &Path, data: &[u8]) -> StorageResult<()> {
    let dir = path.parent().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("path has no parent: {}", path.display()),
        )
    })?;
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl RunLedger for FsRunStore {
    async fn create_run(
        &self,
        run_id: &RunId,
        metadata: RunMetadata,
    ) -> StorageResult<RunRecord> {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        let dir = self.run_dir(run_id)?;
        if dir.join(RUN_FILE).exists() {
            return Err(StorageError::RunExists {
                run_id: run_id.0.clone(),
            });
        }
        let record = RunRecord::new(run_id.clone(), metadata, Utc::now());
        self.write_record(&record)?;
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
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        let record = self.read_record(run_id)?;
        if record.status != RunStatus::Running {
            return Err(StorageError::InvalidRunState {
                run_id: run_id.0.clone(),
                status: record.status.to_string(),
                expected: RunStatus::Running.to_string(),
            });
        }
        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.run_dir(run_id)?.join(EVENTS_FILE))?;
        file.write_all(&line)?;
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
        self.read_record(run_id)
    }

    async fn get_events(&self, run_id: &RunId) -> StorageResult<Vec<RunEvent>> {
        // Existence check doubles as the RunNotFound path.
        self.read_record(run_id)?;
        let path = self.run_dir(run_id)?.join(EVENTS_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(fs::File::open(&path)?);
        let mut events = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            events.push(serde_json::from_str::<RunEvent>(&line)?);
        }
        events.sort_by_key(|e| e.seq);
        Ok(events)
    }

    async fn list_runs(&self, workflow: Option<&str>) -> StorageResult<Vec<RunRecord>> {
        let mut records = Vec::new();
        for entry in fs::read_dir(&self.runs_dir)? {
            let path = entry?.path().join(RUN_FILE);
            if !path.exists() {
                continue;
            }
            let record: RunRecord = serde_json::from_slice(&fs::read(&path)?)?;
            if workflow.map(|w| record.metadata.workflow == w).unwrap_or(true) {
                records.push(record);
            }
        }
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }
}

#[async_trait]
impl PhaseStore for FsRunStore {
    async fn save_phase(&self, run_id: &RunId, record: PhaseRecord) -> StorageResult<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        let path = self.phase_path(run_id, record.phase_index)?;
        if path.exists() {
            let existing: PhaseRecord = serde_json::from_slice(&fs::read(&path)?)?;
            check_phase_overwrite(run_id, &existing, &record)?;
        }
        write_atomic(&path, &serde_json::to_vec_pretty(&record)?)
    }

    async fn load_phases(&self, run_id: &RunId) -> StorageResult<Vec<PhaseRecord>> {
        let dir = self.run_dir(run_id)?.join(PHASES_DIR);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut records = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            records.push(serde_json::from_slice::<PhaseRecord>(&fs::read(&path)?)?);
        }
        records.sort_by_key(|r| r.phase_index);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_store() -> (tempfile::TempDir, FsRunStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsRunStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn test_run_dir_rejects_path_escapes() {
        let (_dir, store) = make_store();
        assert!(store.run_dir(&RunId::from("../etc")).is_err());
        assert!(store.run_dir(&RunId::from("a/b")).is_err());
        assert!(store.run_dir(&RunId::from("..")).is_err());
        assert!(store.run_dir(&RunId::from("")).is_err());
        assert!(store.run_dir(&RunId::new()).is_ok());
    }

    #[test]
    fn test_write_atomic_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("file.json");
        write_atomic(&path, b"{}").unwrap();
        write_atomic(&path, b"{\"a\":1}").unwrap();
        let entries: Vec<_> = fs::read_dir(path.parent().unwrap()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(fs::read(&path).unwrap(), b"{\"a\":1}");
    }

    #[tokio::test]
    async fn test_phase_files_are_zero_padded() {
        let (dir, store) = make_store();
        let run_id = RunId::from("run-pad");
        let rec = PhaseRecord::new(
            7,
            "p7",
            crate::schema::PhaseStatus::Completed,
            serde_json::json!(null),
            vec![],
            Utc::now(),
        )
        .unwrap();
        store.save_phase(&run_id, rec).await.unwrap();
        assert!(dir
            .path()
            .join("runs/run-pad/phases/0007.json")
            .exists());
    }
}
