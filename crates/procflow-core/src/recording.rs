//! Run lifecycle adapter: bridges domain [`Event`]s to `RunLedger` persistence.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use procflow_state::{
    RunEvent, RunId, RunLedger, RunMetadata, RunStatus, RunSummary, StorageError,
};
use serde_json::Value;

use crate::breakpoint::BreakpointRecord;
use crate::domain::{Event, EventKind, ProcflowError, Result};

/// How [`RunRecorder::begin`] found the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStart {
    Created,
    /// The run existed (suspended, failed, cancelled or interrupted).
    Resumed,
}

/// Terminal outcome handed to [`RunRecorder::finish`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Failed,
    Cancelled,
}

/// Records run lifecycle [`Event`]s into an optional [`RunLedger`].
///
/// Usage:
/// 1. Call [`RunRecorder::begin`] to create or resume the run.
/// 2. Call [`RunRecorder::record`] for each domain event.
/// 3. Call [`RunRecorder::suspend`] or [`RunRecorder::finish`].
///
/// Without a ledger every call is a no-op, so in-memory runs pay nothing.
/// Event appends are best effort: a refused append is logged, not raised.
pub struct RunRecorder {
    ledger: Option<Arc<dyn RunLedger>>,
    run_id: RunId,
    seq: AtomicU64,
}

impl RunRecorder {
    pub fn new(ledger: Option<Arc<dyn RunLedger>>, run_id: RunId) -> Self {
        Self {
            ledger,
            run_id,
            seq: AtomicU64::new(0),
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Create the run, or resume it if the ledger already knows it.
    ///
    /// A completed run cannot be started again.
    pub async fn begin(&self, workflow: &str, tags: Value) -> Result<RunStart> {
        let Some(ledger) = &self.ledger else {
            return Ok(RunStart::Created);
        };
        match ledger.get_run(&self.run_id).await {
            Ok(record) if record.status == RunStatus::Completed => {
                Err(ProcflowError::RunCompleted {
                    run_id: self.run_id.to_string(),
                })
            }
            Ok(_) => {
                ledger.resume_run(&self.run_id).await?;
                let next_seq = ledger
                    .get_events(&self.run_id)
                    .await?
                    .last()
                    .map(|e| e.seq + 1)
                    .unwrap_or(0);
                self.seq.store(next_seq, Ordering::SeqCst);
                Ok(RunStart::Resumed)
            }
            Err(StorageError::RunNotFound { .. }) => {
                let metadata = RunMetadata {
                    workflow: workflow.to_string(),
                    tags,
                };
                ledger.create_run(&self.run_id, metadata).await?;
                Ok(RunStart::Created)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Record a single domain event.
    pub async fn record(&self, kind: EventKind, payload: Value, timestamp: DateTime<Utc>) {
        let event = Event {
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
            kind,
            payload,
            timestamp,
        };
        let Some(ledger) = &self.ledger else {
            return;
        };
        let run_event = RunEvent {
            seq: event.seq,
            kind: event.kind.as_str().to_string(),
            payload: serde_json::json!({
                "kind": event.kind,
                "data": event.payload,
            }),
            timestamp: event.timestamp,
        };
        if let Err(e) = ledger.append_event(&self.run_id, run_event).await {
            crate::obs::emit_ledger_error(self.run_id.as_str(), &e);
        }
    }

    /// Store a resolved breakpoint's audit record in the event trail.
    pub async fn record_breakpoint(&self, record: &BreakpointRecord) {
        let payload = serde_json::to_value(record).unwrap_or(Value::Null);
        self.record(
            EventKind::BreakpointResolved {
                breakpoint_id: record.breakpoint.breakpoint_id.clone(),
                status: record.breakpoint.status.to_string(),
            },
            payload,
            record.resolved_at,
        )
        .await;
    }

    /// Park the run until it is resumed.
    pub async fn suspend(&self) -> Result<()> {
        if let Some(ledger) = &self.ledger {
            ledger.suspend_run(&self.run_id).await?;
        }
        Ok(())
    }

    /// Finalize the run.
    pub async fn finish(&self, outcome: RunOutcome, summary: RunSummary) -> Result<()> {
        let Some(ledger) = &self.ledger else {
            return Ok(());
        };
        match outcome {
            RunOutcome::Completed => ledger.complete_run(&self.run_id, summary).await?,
            RunOutcome::Failed => ledger.fail_run(&self.run_id, summary).await?,
            RunOutcome::Cancelled => ledger.cancel_run(&self.run_id, summary).await?,
        }
        Ok(())
    }

    /// Number of events handed out so far (including resumed history).
    pub fn events_recorded(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use procflow_state::fakes::MemoryRunLedger;

    fn summary(success: bool) -> RunSummary {
        RunSummary {
            phases_completed: 1,
            artifact_count: 0,
            report_digest: None,
            duration_ms: 5,
            success,
        }
    }

    #[tokio::test]
    async fn test_begin_create_then_resume_continues_seq() {
        let ledger = Arc::new(MemoryRunLedger::new());
        let run_id = RunId::from("run-a");

        let rec = RunRecorder::new(Some(ledger.clone()), run_id.clone());
        assert_eq!(rec.begin("wf", Value::Null).await.unwrap(), RunStart::Created);
        rec.record(EventKind::RunCompleted, Value::Null, Utc::now()).await;
        rec.record(EventKind::RunCompleted, Value::Null, Utc::now()).await;
        rec.suspend().await.unwrap();

        let rec = RunRecorder::new(Some(ledger.clone()), run_id.clone());
        assert_eq!(rec.begin("wf", Value::Null).await.unwrap(), RunStart::Resumed);
        assert_eq!(rec.events_recorded(), 2);
        rec.record(EventKind::RunCancelled, Value::Null, Utc::now()).await;
        rec.finish(RunOutcome::Completed, summary(true)).await.unwrap();

        let events = ledger.get_events(&run_id).await.unwrap();
        let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        assert_eq!(events[2].kind, "run_cancelled");
    }

    #[tokio::test]
    async fn test_completed_run_cannot_begin_again() {
        let ledger = Arc::new(MemoryRunLedger::new());
        let run_id = RunId::from("run-b");
        let rec = RunRecorder::new(Some(ledger.clone()), run_id.clone());
        rec.begin("wf", Value::Null).await.unwrap();
        rec.finish(RunOutcome::Completed, summary(true)).await.unwrap();

        let err = RunRecorder::new(Some(ledger), run_id)
            .begin("wf", Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, ProcflowError::RunCompleted { .. }));
    }

    #[tokio::test]
    async fn test_detached_recorder_is_noop() {
        let rec = RunRecorder::new(None, RunId::from("x"));
        assert_eq!(rec.begin("wf", Value::Null).await.unwrap(), RunStart::Created);
        rec.record(EventKind::RunCompleted, Value::Null, Utc::now()).await;
        rec.finish(RunOutcome::Failed, summary(false)).await.unwrap();
        assert_eq!(rec.events_recorded(), 1);
    }
}
