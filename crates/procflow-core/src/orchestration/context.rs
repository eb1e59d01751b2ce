//! The run context: everything a pipeline phase can do during one run.
//!
//! Every `task()` and `breakpoint()` call is a suspension point. Each one
//! honours the run's [`CancelToken`], records lifecycle events and goes
//! through the configured timeout, retry and breakpoint policies.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use procflow_state::{PhaseStore, RunId, RunLedger};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, instrument, Level};

use super::cancel::CancelToken;
use super::clock::{Clock, MonotonicClock, SystemClock};
use super::graph::{execute_graph, GraphOutcome, JoinPolicy, TaskGraph};
use super::parallel::{join_ordered, join_settled};
use super::state::{RunState, RunStateMachine};
use crate::breakpoint::{
    await_resolution, ApprovalChannel, AutoApprove, Breakpoint, BreakpointPolicy,
    BreakpointRecord, BreakpointSpec, Resolution,
};
use crate::domain::{
    EventKind, ProcflowError, Result, SchemaViolation, TaskContext, TaskDefinition, TaskRegistry,
};
use crate::executor::{AgentExecutor, RetryPolicy};
use crate::obs;
use crate::recording::RunRecorder;

pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// Per-run tunables.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    /// Upper bound for one task attempt. `None` waits forever.
    pub task_timeout: Option<Duration>,
    pub retry: RetryPolicy,
    pub breakpoints: BreakpointPolicy,
    /// Branches of one fan-out running at the same time.
    pub max_concurrency: usize,
    /// Default join policy for task graphs.
    pub join: JoinPolicy,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            task_timeout: None,
            retry: RetryPolicy::default(),
            breakpoints: BreakpointPolicy::default(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            join: JoinPolicy::default(),
        }
    }
}

impl RunConfig {
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = Some(timeout);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_breakpoints(mut self, policy: BreakpointPolicy) -> Self {
        self.breakpoints = policy;
        self
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    pub fn with_join(mut self, join: JoinPolicy) -> Self {
        self.join = join;
        self
    }
}

/// Builder for [`RunContext`].
pub struct RunContextBuilder {
    registry: Arc<TaskRegistry>,
    executor: Arc<dyn AgentExecutor>,
    run_id: Option<RunId>,
    approvals: Arc<dyn ApprovalChannel>,
    ledger: Option<Arc<dyn RunLedger>>,
    phases: Option<Arc<dyn PhaseStore>>,
    clock: Arc<dyn Clock>,
    cancel: CancelToken,
    config: RunConfig,
}

impl RunContextBuilder {
    /// Fixed run id. Reusing the id of an unfinished run resumes it.
    pub fn run_id(mut self, run_id: impl Into<RunId>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Where breakpoints are surfaced. Defaults to [`AutoApprove`].
    pub fn approvals(mut self, channel: Arc<dyn ApprovalChannel>) -> Self {
        self.approvals = channel;
        self
    }

    pub fn ledger(mut self, ledger: Arc<dyn RunLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn phase_store(mut self, store: Arc<dyn PhaseStore>) -> Self {
        self.phases = Some(store);
        self
    }

    /// Use one backend as both ledger and phase store.
    pub fn store<S>(self, store: Arc<S>) -> Self
    where
        S: RunLedger + PhaseStore + 'static,
    {
        self.ledger(store.clone()).phase_store(store)
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(mut self, config: RunConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> RunContext {
        let run_id = self.run_id.unwrap_or_default();
        RunContext {
            recorder: RunRecorder::new(self.ledger, run_id.clone()),
            run_id,
            registry: self.registry,
            executor: self.executor,
            approvals: self.approvals,
            phases: self.phases,
            clock: MonotonicClock::new(self.clock),
            cancel: self.cancel,
            state: RunStateMachine::new(),
            breakpoint_seq: Mutex::new(HashMap::new()),
            config: self.config,
        }
    }
}

/// Execution context of one pipeline run.
pub struct RunContext {
    run_id: RunId,
    registry: Arc<TaskRegistry>,
    executor: Arc<dyn AgentExecutor>,
    approvals: Arc<dyn ApprovalChannel>,
    phases: Option<Arc<dyn PhaseStore>>,
    recorder: RunRecorder,
    clock: MonotonicClock,
    cancel: CancelToken,
    state: RunStateMachine,
    /// Breakpoints raised so far per title slug, for default ids.
    breakpoint_seq: Mutex<HashMap<String, u32>>,
    config: RunConfig,
}

impl RunContext {
    pub fn builder(
        registry: impl Into<Arc<TaskRegistry>>,
        executor: Arc<dyn AgentExecutor>,
    ) -> RunContextBuilder {
        RunContextBuilder {
            registry: registry.into(),
            executor,
            run_id: None,
            approvals: Arc::new(AutoApprove::default()),
            ledger: None,
            phases: None,
            clock: Arc::new(SystemClock),
            cancel: CancelToken::new(),
            config: RunConfig::default(),
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn state(&self) -> RunState {
        self.state.state()
    }

    /// Wall-clock time, never earlier than any previous reading in this run.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(crate) fn recorder(&self) -> &RunRecorder {
        &self.recorder
    }

    pub(crate) fn state_machine(&self) -> &RunStateMachine {
        &self.state
    }

    pub(crate) fn phase_store(&self) -> Option<&Arc<dyn PhaseStore>> {
        self.phases.as_ref()
    }

    /// The first operation of a bare context moves it to `Running`.
    fn ensure_running(&self) -> Result<()> {
        if self.state.state() == RunState::Started {
            self.state.transition(RunState::Running)?;
        }
        Ok(())
    }

    /// Log a message to tracing and the run's event trail.
    pub async fn log(&self, level: Level, message: impl Into<String>) {
        let message = message.into();
        match level {
            Level::ERROR => tracing::error!(run_id = %self.run_id, "{message}"),
            Level::WARN => tracing::warn!(run_id = %self.run_id, "{message}"),
            Level::INFO => tracing::info!(run_id = %self.run_id, "{message}"),
            Level::DEBUG => tracing::debug!(run_id = %self.run_id, "{message}"),
            _ => tracing::trace!(run_id = %self.run_id, "{message}"),
        }
        self.recorder
            .record(
                EventKind::Log {
                    level: level.to_string().to_lowercase(),
                    message,
                },
                Value::Null,
                self.now(),
            )
            .await;
    }

    // -----------------------------------------------------------------------
    // Tasks
    // -----------------------------------------------------------------------

    /// Run a task and return its schema-valid result.
    ///
    /// Retries follow `config.retry`; each attempt gets a fresh effect id.
    #[instrument(skip(self, definition, args), fields(run_id = %self.run_id, task = %definition.key()))]
    pub async fn task(&self, definition: &TaskDefinition, args: &Value) -> Result<Value> {
        self.ensure_running()?;
        let mut attempt = 1;
        loop {
            self.cancel.check()?;
            match self.attempt_task(definition, args, attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if self.config.retry.should_retry(attempt, &err) => {
                    let backoff = self.config.retry.backoff_after(attempt);
                    debug!(attempt, backoff_ms = backoff.as_millis() as u64, error = %err, "retrying task");
                    self.cancel
                        .run(async {
                            tokio::time::sleep(backoff).await;
                            Ok(())
                        })
                        .await?;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Look the task up in the registry, then [`RunContext::task`].
    pub async fn task_by_key(&self, key: &str, args: &Value) -> Result<Value> {
        let definition = self.registry.get(key)?;
        self.task(definition, args).await
    }

    /// Run a task and deserialize its validated result.
    ///
    /// A result that passes the schema but does not fit `T` is reported as
    /// a schema violation at `$`.
    pub async fn task_typed<T: DeserializeOwned>(
        &self,
        definition: &TaskDefinition,
        args: &Value,
    ) -> Result<T> {
        let value = self.task(definition, args).await?;
        serde_json::from_value(value).map_err(|e| ProcflowError::SchemaValidation {
            task: definition.key().to_string(),
            violations: vec![SchemaViolation {
                path: "$".to_string(),
                expected: std::any::type_name::<T>().to_string(),
                actual: e.to_string(),
            }],
        })
    }

    async fn attempt_task(
        &self,
        definition: &TaskDefinition,
        args: &Value,
        attempt: u32,
    ) -> Result<Value> {
        let task_ctx = TaskContext::new(self.run_id.as_str(), attempt);
        let spec = definition.materialize(args, &task_ctx)?;
        let task = definition.key();
        self.recorder
            .record(
                EventKind::TaskStarted {
                    task: task.to_string(),
                    effect_id: spec.effect_id.clone(),
                    attempt,
                },
                json!({ "title": spec.title }),
                self.now(),
            )
            .await;

        let started = Instant::now();
        let outcome = self
            .cancel
            .run(async {
                let value = match self.config.task_timeout {
                    Some(limit) => tokio::time::timeout(limit, self.executor.execute(&spec))
                        .await
                        .map_err(|_| ProcflowError::Timeout {
                            task: task.to_string(),
                            timeout_ms: limit.as_millis() as u64,
                        })??,
                    None => self.executor.execute(&spec).await?,
                };
                definition.output_schema().check(task, &value)?;
                Ok(value)
            })
            .await;

        let duration_ms = started.elapsed().as_millis() as u64;
        let kind = match &outcome {
            Ok(_) => {
                obs::emit_task_completed(self.run_id.as_str(), task, &spec.effect_id, duration_ms);
                EventKind::TaskCompleted {
                    task: task.to_string(),
                    effect_id: spec.effect_id.clone(),
                    duration_ms,
                }
            }
            Err(e) => {
                obs::emit_task_failed(self.run_id.as_str(), task, &spec.effect_id, e);
                EventKind::TaskFailed {
                    task: task.to_string(),
                    effect_id: spec.effect_id.clone(),
                    error: e.to_string(),
                }
            }
        };
        self.recorder.record(kind, Value::Null, self.now()).await;
        outcome
    }

    // -----------------------------------------------------------------------
    // Fan-out
    // -----------------------------------------------------------------------

    /// Run branches concurrently; output `i` belongs to branch `i`.
    ///
    /// The first failure fails the batch and drops the other branches.
    pub async fn parallel_all<T, F>(&self, branches: Vec<F>) -> Result<Vec<T>>
    where
        F: Future<Output = Result<T>>,
    {
        self.ensure_running()?;
        self.cancel
            .run(join_ordered(branches, self.config.max_concurrency))
            .await
    }

    /// Run branches concurrently and return every branch's own result.
    pub async fn parallel_settled<T, F>(&self, branches: Vec<F>) -> Result<Vec<Result<T>>>
    where
        F: Future<Output = Result<T>>,
    {
        self.ensure_running()?;
        self.cancel
            .run(async { Ok(join_settled(branches, self.config.max_concurrency).await) })
            .await
    }

    /// Execute a task graph; `None` uses the configured join policy.
    pub async fn run_graph(
        &self,
        graph: &TaskGraph,
        scope: &Value,
        join: Option<JoinPolicy>,
    ) -> Result<GraphOutcome> {
        self.ensure_running()?;
        graph.validate_tasks(&self.registry)?;
        execute_graph(self, graph, scope, join.unwrap_or(self.config.join)).await
    }

    // -----------------------------------------------------------------------
    // Breakpoints
    // -----------------------------------------------------------------------

    /// `{run_id}-{title slug}-{n}`, where `n` counts earlier breakpoints
    /// with the same slug in this context.
    fn default_breakpoint_id(&self, title: &str) -> String {
        let slug: String = title
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_lowercase()
                } else {
                    '-'
                }
            })
            .collect();
        let mut seq = self
            .breakpoint_seq
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        let n = seq.entry(slug.clone()).or_insert(0);
        let id = format!("{}-{slug}-{n}", self.run_id);
        *n += 1;
        id
    }

    /// Suspend until the breakpoint is resolved.
    ///
    /// Approve and Edit return the resolution. Reject fails with
    /// `BreakpointRejected`. An approval channel that defers parks the run
    /// with `Suspended`.
    ///
    /// A spec without an id gets one derived from the run id, the title and
    /// how many breakpoints with that title this context raised before. A
    /// resumed run that raises its breakpoints in the same order therefore
    /// finds answers recorded while it was parked.
    #[instrument(skip(self, spec), fields(run_id = %self.run_id, title = %spec.title))]
    pub async fn breakpoint(&self, mut spec: BreakpointSpec) -> Result<Resolution> {
        self.ensure_running()?;
        self.cancel.check()?;
        if spec.id.is_none() {
            spec.id = Some(self.default_breakpoint_id(&spec.title));
        }
        let (timeout_secs, on_timeout) = self.config.breakpoints.resolve(&spec.title);
        let mut breakpoint = Breakpoint::new(spec, self.run_id.as_str(), timeout_secs, self.now());

        self.recorder
            .record(
                EventKind::BreakpointRequested {
                    breakpoint_id: breakpoint.breakpoint_id.clone(),
                    title: breakpoint.title.clone(),
                },
                json!({ "question": breakpoint.question, "context": breakpoint.context }),
                breakpoint.created_at,
            )
            .await;
        obs::emit_breakpoint_requested(
            self.run_id.as_str(),
            &breakpoint.breakpoint_id,
            &breakpoint.title,
        );

        self.state.suspend()?;
        let outcome = await_resolution(
            self.approvals.as_ref(),
            &mut breakpoint,
            timeout_secs,
            on_timeout,
            &self.cancel,
        )
        .await;

        if matches!(
            outcome,
            Err(ProcflowError::Suspended { .. }) | Err(ProcflowError::Cancelled)
        ) {
            return outcome;
        }
        self.state.resume()?;

        if breakpoint.status.is_terminal() {
            let record =
                BreakpointRecord::finalize(breakpoint.clone(), outcome.as_ref().ok().cloned(), self.now())?;
            self.recorder.record_breakpoint(&record).await;
            obs::emit_breakpoint_resolved(
                self.run_id.as_str(),
                &breakpoint.breakpoint_id,
                &breakpoint.status.to_string(),
            );
        }

        match outcome? {
            Resolution::Reject { reviewer, reason } => Err(ProcflowError::BreakpointRejected {
                title: breakpoint.title,
                reviewer,
                reason,
            }),
            resolution => Ok(resolution),
        }
    }
}
