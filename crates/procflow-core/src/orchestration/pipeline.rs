//! Pipelines: an ordered list of phases folded over an explicit state.
//!
//! Each phase sees the immutable [`PipelineState`] built from the pipeline
//! inputs and the outputs of earlier phases, and returns a [`PhaseOutput`].
//! The pipeline concatenates outputs and artifacts into the next state,
//! persists every phase result as soon as it is final, and on a resumed run
//! restores those results instead of executing the phases again.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use procflow_state::{PhaseRecord, PhaseStatus, RunSummary};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn, Instrument};

use super::context::RunContext;
use super::report::{PhaseSummary, PipelineFailure, PipelineReport};
use super::state::RunState;
use crate::breakpoint::BreakpointSpec;
use crate::domain::{artifacts_in, Artifact, EventKind, ProcflowError, Result};
use crate::obs::{self, RunSpan};
use crate::recording::{RunOutcome, RunStart};

/// What a phase hands back: its output value and the artifacts it produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseOutput {
    pub output: Value,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
}

impl PhaseOutput {
    pub fn new(output: Value) -> Self {
        Self {
            output,
            artifacts: Vec::new(),
        }
    }

    pub fn with_artifacts(mut self, artifacts: Vec<Artifact>) -> Self {
        self.artifacts = artifacts;
        self
    }

    /// Use a task result as output and take its `artifacts` list.
    pub fn from_result(task: &str, result: Value) -> Result<Self> {
        let artifacts = artifacts_in(task, &result)?;
        Ok(Self {
            output: result,
            artifacts,
        })
    }
}

/// Accumulated state threaded from phase to phase.
///
/// Never mutated in place: [`PipelineState::with_phase`] consumes the state
/// and returns the next one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineState {
    inputs: Value,
    results: BTreeMap<String, Value>,
    artifacts: Vec<Artifact>,
}

impl PipelineState {
    pub fn new(inputs: Value) -> Self {
        Self {
            inputs,
            results: BTreeMap::new(),
            artifacts: Vec::new(),
        }
    }

    pub fn inputs(&self) -> &Value {
        &self.inputs
    }

    /// Output of a completed phase.
    pub fn result(&self, phase: &str) -> Option<&Value> {
        self.results.get(phase)
    }

    pub fn results(&self) -> &BTreeMap<String, Value> {
        &self.results
    }

    pub fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }

    /// Fold one completed phase into the state.
    pub fn with_phase(mut self, phase: &str, output: PhaseOutput) -> Self {
        self.results.insert(phase.to_string(), output.output);
        self.artifacts.extend(output.artifacts);
        self
    }

    /// `{inputs, results}` view used by templates and conditions.
    pub fn scope(&self) -> Value {
        json!({
            "inputs": self.inputs,
            "results": self.results,
        })
    }
}

/// One step of a pipeline.
#[async_trait]
pub trait Phase: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the phase runs at all. Skipped phases contribute nothing.
    fn should_run(&self, _state: &PipelineState) -> Result<bool> {
        Ok(true)
    }

    async fn run(&self, ctx: &RunContext, state: &PipelineState) -> Result<PhaseOutput>;

    /// Approval gate raised after the phase produced `output`.
    ///
    /// Must be a pure function of its arguments: a resumed run calls it
    /// again to re-raise a gate that was never answered.
    ///
    /// An `Edit` answer replaces the phase output with the reviewer's
    /// payload as given; no task schema applies to it. The artifacts the
    /// phase produced stay attached.
    fn gate(&self, _state: &PipelineState, _output: &PhaseOutput) -> Result<Option<BreakpointSpec>> {
        Ok(None)
    }
}

type SummaryFn = dyn Fn(&PipelineState) -> Result<Value> + Send + Sync;

/// Builder for [`Pipeline`].
pub struct PipelineBuilder {
    workflow: String,
    phases: Vec<Arc<dyn Phase>>,
    summary: Option<Arc<SummaryFn>>,
}

impl PipelineBuilder {
    pub fn phase(self, phase: impl Phase + 'static) -> Self {
        self.phase_arc(Arc::new(phase))
    }

    pub fn phase_arc(mut self, phase: Arc<dyn Phase>) -> Self {
        self.phases.push(phase);
        self
    }

    /// Compute the report `summary` from the final state.
    pub fn summary<F>(mut self, f: F) -> Self
    where
        F: Fn(&PipelineState) -> Result<Value> + Send + Sync + 'static,
    {
        self.summary = Some(Arc::new(f));
        self
    }

    /// Phase names must be unique and there must be at least one phase.
    pub fn build(self) -> Result<Pipeline> {
        if self.phases.is_empty() {
            return Err(ProcflowError::InvalidPipeline(format!(
                "workflow '{}' has no phases",
                self.workflow
            )));
        }
        let mut seen = HashSet::new();
        for phase in &self.phases {
            if !seen.insert(phase.name().to_string()) {
                return Err(ProcflowError::InvalidPipeline(format!(
                    "duplicate phase name '{}'",
                    phase.name()
                )));
            }
        }
        Ok(Pipeline {
            workflow: self.workflow,
            phases: self.phases,
            summary: self.summary,
        })
    }
}

/// An ordered, validated list of phases.
pub struct Pipeline {
    workflow: String,
    phases: Vec<Arc<dyn Phase>>,
    summary: Option<Arc<SummaryFn>>,
}

/// Bookkeeping carried across phases, kept when a phase fails.
#[derive(Default)]
struct Progress {
    state: PipelineState,
    phases: Vec<PhaseSummary>,
    restored: usize,
    /// The ledger accepted the run, so terminal writes apply to it.
    began: bool,
}

impl Pipeline {
    pub fn builder(workflow: impl Into<String>) -> PipelineBuilder {
        PipelineBuilder {
            workflow: workflow.into(),
            phases: Vec::new(),
            summary: None,
        }
    }

    pub fn workflow(&self) -> &str {
        &self.workflow
    }

    pub fn phase_names(&self) -> Vec<&str> {
        self.phases.iter().map(|p| p.name()).collect()
    }

    /// Run (or resume) the pipeline under `ctx`.
    ///
    /// A fatal error stops the remaining phases; the returned
    /// [`PipelineFailure`] carries the report of everything completed so far.
    pub async fn run(
        &self,
        ctx: &RunContext,
        inputs: Value,
    ) -> std::result::Result<PipelineReport, PipelineFailure> {
        let span = RunSpan::new(ctx.run_id().as_str(), &self.workflow);
        self.run_inner(ctx, inputs).instrument(span.span()).await
    }

    async fn run_inner(
        &self,
        ctx: &RunContext,
        inputs: Value,
    ) -> std::result::Result<PipelineReport, PipelineFailure> {
        let started_at = ctx.now();
        let mut progress = Progress {
            state: PipelineState::new(inputs),
            ..Progress::default()
        };

        let outcome = match self.begin(ctx).await {
            Ok(()) => {
                progress.began = true;
                self.run_phases(ctx, &mut progress).await
            }
            Err(e) => Err(e),
        };

        let (status, error, summary) = match outcome {
            Ok(()) => match self.summary.as_ref().map(|f| f(&progress.state)).transpose() {
                Ok(summary) => (RunState::Completed, None, summary),
                Err(e) => (RunState::Failed, Some(e), None),
            },
            Err(e) if e.suspended_on().is_some() => (RunState::Suspended, Some(e), None),
            Err(e) if e.is_cancellation() => (RunState::Cancelled, Some(e), None),
            Err(e) => (RunState::Failed, Some(e), None),
        };

        let report = self.report(ctx, &progress, status, error.as_ref(), summary, started_at);
        if progress.began {
            self.finish(ctx, &report, error.as_ref()).await;
        } else if let Err(e) = ctx.state_machine().transition(RunState::Failed) {
            warn!(error = %e, "run state not updated");
        }

        match error {
            None => Ok(report),
            Some(error) => Err(PipelineFailure {
                error,
                report: Box::new(report),
            }),
        }
    }

    async fn begin(&self, ctx: &RunContext) -> Result<()> {
        match ctx.state() {
            RunState::Started => ctx.state_machine().transition(RunState::Running)?,
            RunState::Running => {}
            other => {
                return Err(ProcflowError::InvalidTransition {
                    from: other.to_string(),
                    to: RunState::Running.to_string(),
                })
            }
        }
        let tags = json!({ "phases": self.phase_names() });
        let start = ctx.recorder().begin(&self.workflow, tags).await?;
        let resumed = start == RunStart::Resumed;
        let kind = if resumed {
            EventKind::RunResumed {
                workflow: self.workflow.clone(),
            }
        } else {
            EventKind::RunStarted {
                workflow: self.workflow.clone(),
            }
        };
        ctx.recorder().record(kind, Value::Null, ctx.now()).await;
        obs::emit_run_started(ctx.run_id().as_str(), &self.workflow, resumed);
        Ok(())
    }

    async fn load_persisted(&self, ctx: &RunContext) -> Result<HashMap<usize, PhaseRecord>> {
        let Some(store) = ctx.phase_store() else {
            return Ok(HashMap::new());
        };
        Ok(store
            .load_phases(ctx.run_id())
            .await?
            .into_iter()
            .map(|record| (record.phase_index, record))
            .collect())
    }

    async fn save(&self, ctx: &RunContext, record: PhaseRecord) -> Result<()> {
        if let Some(store) = ctx.phase_store() {
            store.save_phase(ctx.run_id(), record).await?;
        }
        Ok(())
    }

    async fn run_phases(&self, ctx: &RunContext, progress: &mut Progress) -> Result<()> {
        let mut persisted = self.load_persisted(ctx).await?;
        let run_id = ctx.run_id().as_str();

        for (index, phase) in self.phases.iter().enumerate() {
            ctx.cancel_token().check()?;
            let name = phase.name();

            let pending_gate = match persisted.remove(&index) {
                Some(record) if record.name != name => {
                    return Err(ProcflowError::ResumeMismatch {
                        index,
                        expected: name.to_string(),
                        found: record.name,
                    });
                }
                Some(record) if record.status.is_final() => {
                    self.restore(ctx, progress, index, record).await;
                    continue;
                }
                Some(record) => Some(PhaseOutput {
                    output: record.output,
                    artifacts: record.artifacts,
                }),
                None => None,
            };

            let output = match pending_gate {
                Some(output) => {
                    info!(phase = %name, index, "re-raising unresolved phase gate");
                    output
                }
                None => {
                    if !phase.should_run(&progress.state)? {
                        self.skip(ctx, progress, index, name).await?;
                        continue;
                    }
                    ctx.recorder()
                        .record(
                            EventKind::PhaseStarted {
                                phase: name.to_string(),
                                index,
                            },
                            Value::Null,
                            ctx.now(),
                        )
                        .await;
                    obs::emit_phase_started(run_id, name, index);
                    phase.run(ctx, &progress.state).await?
                }
            };

            let (output, gate) = self.pass_gate(ctx, phase.as_ref(), progress, index, output).await?;

            let record = PhaseRecord::new(
                index,
                name,
                PhaseStatus::Completed,
                output.output.clone(),
                output.artifacts.clone(),
                ctx.now(),
            )?;
            self.save(ctx, record).await?;

            let artifact_count = output.artifacts.len();
            ctx.recorder()
                .record(
                    EventKind::PhaseCompleted {
                        phase: name.to_string(),
                        index,
                        artifact_count,
                    },
                    Value::Null,
                    ctx.now(),
                )
                .await;
            obs::emit_phase_completed(run_id, name, index, artifact_count);

            progress.phases.push(PhaseSummary {
                index,
                name: name.to_string(),
                status: PhaseStatus::Completed,
                artifact_count,
                restored: false,
                gate,
            });
            progress.state = std::mem::take(&mut progress.state).with_phase(name, output);
        }
        Ok(())
    }

    /// Raise the phase gate, if any. The phase result is persisted as
    /// awaiting approval first, so a restart re-raises instead of re-running.
    async fn pass_gate(
        &self,
        ctx: &RunContext,
        phase: &dyn Phase,
        progress: &Progress,
        index: usize,
        mut output: PhaseOutput,
    ) -> Result<(PhaseOutput, Option<String>)> {
        let Some(mut spec) = phase.gate(&progress.state, &output)? else {
            return Ok((output, None));
        };
        if spec.id.is_none() {
            spec.id = Some(format!("{}-phase-{index}", ctx.run_id()));
        }
        let record = PhaseRecord::new(
            index,
            phase.name(),
            PhaseStatus::AwaitingApproval,
            output.output.clone(),
            output.artifacts.clone(),
            ctx.now(),
        )?;
        self.save(ctx, record).await?;

        let resolution = ctx.breakpoint(spec).await?;
        // Output only; the files behind `output.artifacts` already exist.
        if let Some(payload) = resolution.edited_payload() {
            output.output = payload.clone();
        }
        Ok((output, Some(resolution.status().to_string())))
    }

    async fn restore(
        &self,
        ctx: &RunContext,
        progress: &mut Progress,
        index: usize,
        record: PhaseRecord,
    ) {
        ctx.recorder()
            .record(
                EventKind::PhaseRestored {
                    phase: record.name.clone(),
                    index,
                },
                Value::Null,
                ctx.now(),
            )
            .await;
        obs::emit_phase_skipped(ctx.run_id().as_str(), &record.name, index, true);
        progress.restored += 1;
        progress.phases.push(PhaseSummary {
            index,
            name: record.name.clone(),
            status: record.status,
            artifact_count: record.artifacts.len(),
            restored: true,
            gate: None,
        });
        if record.status == PhaseStatus::Completed {
            let output = PhaseOutput {
                output: record.output,
                artifacts: record.artifacts,
            };
            progress.state = std::mem::take(&mut progress.state).with_phase(&record.name, output);
        }
    }

    async fn skip(
        &self,
        ctx: &RunContext,
        progress: &mut Progress,
        index: usize,
        name: &str,
    ) -> Result<()> {
        let record = PhaseRecord::new(
            index,
            name,
            PhaseStatus::Skipped,
            Value::Null,
            Vec::new(),
            ctx.now(),
        )?;
        self.save(ctx, record).await?;
        ctx.recorder()
            .record(
                EventKind::PhaseSkipped {
                    phase: name.to_string(),
                    index,
                },
                Value::Null,
                ctx.now(),
            )
            .await;
        obs::emit_phase_skipped(ctx.run_id().as_str(), name, index, false);
        progress.phases.push(PhaseSummary {
            index,
            name: name.to_string(),
            status: PhaseStatus::Skipped,
            artifact_count: 0,
            restored: false,
            gate: None,
        });
        Ok(())
    }

    fn report(
        &self,
        ctx: &RunContext,
        progress: &Progress,
        status: RunState,
        error: Option<&ProcflowError>,
        summary: Option<Value>,
        started_at: chrono::DateTime<chrono::Utc>,
    ) -> PipelineReport {
        let finished_at = ctx.now();
        let artifacts = progress.state.artifacts().to_vec();
        let skipped = progress
            .phases
            .iter()
            .filter(|p| p.status == PhaseStatus::Skipped)
            .count();
        let metadata = BTreeMap::from([
            ("phase_count".to_string(), json!(self.phases.len())),
            ("phases_skipped".to_string(), json!(skipped)),
            ("phases_restored".to_string(), json!(progress.restored)),
            ("engine".to_string(), json!(concat!("procflow/", env!("CARGO_PKG_VERSION")))),
        ]);
        PipelineReport {
            run_id: ctx.run_id().to_string(),
            workflow: self.workflow.clone(),
            status,
            phases: progress.phases.clone(),
            results: progress.state.results().clone(),
            artifact_count: artifacts.len(),
            artifacts,
            summary,
            error: error.map(ToString::to_string),
            started_at,
            finished_at,
            duration_ms: (finished_at - started_at).num_milliseconds().max(0) as u64,
            metadata,
        }
    }

    /// Move the run to its terminal (or suspended) state everywhere.
    async fn finish(&self, ctx: &RunContext, report: &PipelineReport, error: Option<&ProcflowError>) {
        let run_id = ctx.run_id().as_str();
        let now = ctx.now();
        let recorder = ctx.recorder();

        let (kind, outcome) = match report.status {
            RunState::Completed => (EventKind::RunCompleted, Some(RunOutcome::Completed)),
            RunState::Cancelled => (EventKind::RunCancelled, Some(RunOutcome::Cancelled)),
            RunState::Suspended => (
                EventKind::Log {
                    level: "info".to_string(),
                    message: error.map(ToString::to_string).unwrap_or_default(),
                },
                None,
            ),
            _ => (
                EventKind::RunFailed {
                    error: error.map(ToString::to_string).unwrap_or_default(),
                },
                Some(RunOutcome::Failed),
            ),
        };
        recorder.record(kind, Value::Null, now).await;

        let machine = ctx.state_machine();
        if report.status != RunState::Suspended && machine.state() != report.status {
            if let Err(e) = machine.transition(report.status) {
                warn!(error = %e, "run state not updated");
            }
        }

        let ledger_result = match outcome {
            None => recorder.suspend().await,
            Some(outcome) => {
                let summary = RunSummary {
                    phases_completed: report.phases_completed(),
                    artifact_count: report.artifact_count,
                    report_digest: report.digest().ok(),
                    duration_ms: report.duration_ms,
                    success: report.is_success(),
                };
                recorder.finish(outcome, summary).await
            }
        };
        if let Err(e) = ledger_result {
            obs::emit_ledger_error(run_id, &e);
        }
        obs::emit_run_finished(
            run_id,
            report.duration_ms,
            report.phases_completed(),
            &report.status.to_string(),
        );
    }
}
