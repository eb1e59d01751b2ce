//! Durable run tests: resume after failure, deferred approval gates,
//! cancellation, timeouts and the ledger event trail.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use procflow_core::breakpoint::fakes::RecordingApprovals;
use procflow_core::executor::fakes::ScriptedExecutor;
use procflow_core::{
    AgentPrompt, BreakpointPolicy, BreakpointSpec, CancelToken, FileApprovals, OutputSchema,
    Phase, PhaseOutput, Pipeline, PipelineState, ProcflowError, Resolution, RetryPolicy,
    RunConfig, RunContext, RunId, RunLedger, RunState, TaskDefinition, TaskPrompt, TaskRegistry,
    TimeoutAction,
};
use procflow_state::fakes::MemoryRunLedger;
use procflow_state::{FsRunStore, PhaseStatus, PhaseStore, RunStatus};
use serde_json::{json, Value};

fn registry() -> TaskRegistry {
    let mut registry = TaskRegistry::new();
    for key in ["scan", "analyze", "report"] {
        registry
            .register(TaskDefinition::new(key, OutputSchema::object(), move |args, _| {
                Ok(TaskPrompt::new(
                    format!("Run {key}"),
                    AgentPrompt::new("analyst", key).with_context(args.clone()),
                ))
            }))
            .expect("register");
    }
    registry
}

/// Calls one task; raises a gate when `count` exceeds `inputs.threshold`.
struct Step {
    name: &'static str,
    gated: bool,
}

#[async_trait]
impl Phase for Step {
    fn name(&self) -> &str {
        self.name
    }

    async fn run(
        &self,
        ctx: &RunContext,
        state: &PipelineState,
    ) -> procflow_core::Result<PhaseOutput> {
        let value = ctx.task_by_key(self.name, &json!({ "prior": state.results() })).await?;
        PhaseOutput::from_result(self.name, value)
    }

    fn gate(
        &self,
        state: &PipelineState,
        output: &PhaseOutput,
    ) -> procflow_core::Result<Option<BreakpointSpec>> {
        if !self.gated {
            return Ok(None);
        }
        let count = output.output["count"].as_i64().unwrap_or(0);
        let threshold = state.inputs()["threshold"].as_i64().unwrap_or(i64::MAX);
        Ok((count > threshold).then(|| {
            BreakpointSpec::new("Scope Review", format!("{count} findings. Continue?"))
                .with_context(json!({ "count": count }))
        }))
    }
}

fn pipeline() -> Pipeline {
    Pipeline::builder("assessment")
        .phase(Step {
            name: "scan",
            gated: true,
        })
        .phase(Step {
            name: "analyze",
            gated: false,
        })
        .phase(Step {
            name: "report",
            gated: false,
        })
        .build()
        .expect("pipeline")
}

fn scan_result(count: i64) -> Value {
    json!({
        "count": count,
        "artifacts": [{"path": "scan.md", "format": "markdown", "label": "Scan"}]
    })
}

fn kinds(events: &[procflow_state::RunEvent]) -> Vec<&str> {
    events.iter().map(|e| e.kind.as_str()).collect()
}

#[tokio::test]
async fn resume_after_failure_skips_completed_phases() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(FsRunStore::new(dir.path()).expect("store"));
    let registry = Arc::new(registry());

    let first = ScriptedExecutor::new()
        .respond("scan", scan_result(1))
        .fail("analyze", "model overloaded");
    let ctx = RunContext::builder(registry.clone(), Arc::new(first))
        .run_id("run-resume")
        .store(store.clone())
        .build();
    let failure = pipeline()
        .run(&ctx, json!({"threshold": 3}))
        .await
        .unwrap_err();
    assert_eq!(failure.report.status, RunState::Failed);
    let run_id = RunId::from("run-resume");
    assert_eq!(
        store.get_run(&run_id).await.expect("run").status,
        RunStatus::Failed
    );

    let second = Arc::new(
        ScriptedExecutor::new()
            .respond("analyze", json!({"risk": "low"}))
            .respond("report", json!({"done": true})),
    );
    let ctx = RunContext::builder(registry, second.clone())
        .run_id("run-resume")
        .store(store.clone())
        .build();
    let report = pipeline()
        .run(&ctx, json!({"threshold": 3}))
        .await
        .expect("resumed run");

    assert_eq!(second.call_count("scan"), 0);
    assert!(report.phases[0].restored);
    assert!(!report.phases[1].restored);
    assert_eq!(report.results["scan"]["count"], 1);
    assert_eq!(report.artifact_count, 1);
    assert_eq!(report.metadata["phases_restored"], json!(1));
    // The restored scan output flows into the next phase.
    let analyze = &second.calls()[0];
    assert_eq!(analyze.agent.prompt.context["prior"]["scan"]["count"], 1);

    let record = store.get_run(&run_id).await.expect("run");
    assert_eq!(record.status, RunStatus::Completed);
    let summary = record.summary.expect("summary");
    assert!(summary.success);
    assert_eq!(summary.phases_completed, 3);
    assert_eq!(summary.report_digest, Some(report.digest().expect("digest")));

    let events = store.get_events(&run_id).await.expect("events");
    let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
    assert!(seqs.windows(2).all(|w| w[1] == w[0] + 1));
    let kinds = kinds(&events);
    assert_eq!(kinds[0], "run_started");
    assert!(kinds.contains(&"run_failed"));
    assert!(kinds.contains(&"run_resumed"));
    assert!(kinds.contains(&"phase_restored"));
    assert_eq!(kinds.last(), Some(&"run_completed"));
}

#[tokio::test]
async fn completed_run_cannot_start_again() {
    let ledger = Arc::new(MemoryRunLedger::new());
    let executor = || {
        Arc::new(
            ScriptedExecutor::new()
                .respond("scan", scan_result(0))
                .respond("analyze", json!({}))
                .respond("report", json!({})),
        )
    };
    let ctx = RunContext::builder(registry(), executor())
        .run_id("run-once")
        .ledger(ledger.clone())
        .build();
    pipeline().run(&ctx, json!({})).await.expect("first run");

    let ctx = RunContext::builder(registry(), executor())
        .run_id("run-once")
        .ledger(ledger)
        .build();
    let failure = pipeline().run(&ctx, json!({})).await.unwrap_err();
    assert!(matches!(failure.error, ProcflowError::RunCompleted { .. }));
    assert!(failure.report.phases.is_empty());
}

#[tokio::test]
async fn renamed_phase_is_a_resume_mismatch() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(FsRunStore::new(dir.path()).expect("store"));
    let ctx = RunContext::builder(
        registry(),
        Arc::new(ScriptedExecutor::new().respond("scan", scan_result(0)).fail("analyze", "x")),
    )
    .run_id("run-mismatch")
    .store(store.clone())
    .build();
    pipeline().run(&ctx, json!({})).await.unwrap_err();

    let renamed = Pipeline::builder("assessment")
        .phase(Step {
            name: "analyze",
            gated: false,
        })
        .build()
        .expect("pipeline");
    let ctx = RunContext::builder(registry(), Arc::new(ScriptedExecutor::new()))
        .run_id("run-mismatch")
        .store(store)
        .build();
    let failure = renamed.run(&ctx, json!({})).await.unwrap_err();
    match failure.error {
        ProcflowError::ResumeMismatch {
            index,
            expected,
            found,
        } => {
            assert_eq!(index, 0);
            assert_eq!(expected, "analyze");
            assert_eq!(found, "scan");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn deferred_gate_parks_run_until_answered() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(FsRunStore::new(dir.path().join("runs")).expect("store"));
    let approvals_root = dir.path().join("approvals");

    let first = ScriptedExecutor::new().respond("scan", scan_result(5));
    let ctx = RunContext::builder(registry(), Arc::new(first))
        .run_id("run-gate")
        .store(store.clone())
        .approvals(Arc::new(FileApprovals::new(&approvals_root).detached()))
        .build();
    let failure = pipeline()
        .run(&ctx, json!({"threshold": 3}))
        .await
        .unwrap_err();

    assert_eq!(failure.suspended_on(), Some("run-gate-phase-0"));
    assert_eq!(failure.report.status, RunState::Suspended);
    let run_id = RunId::from("run-gate");
    assert_eq!(
        store.get_run(&run_id).await.expect("run").status,
        RunStatus::Suspended
    );
    let phases = store.load_phases(&run_id).await.expect("phases");
    assert_eq!(phases.len(), 1);
    assert_eq!(phases[0].status, PhaseStatus::AwaitingApproval);

    let pending = FileApprovals::pending(&approvals_root).await.expect("pending");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].context["count"], 5);
    FileApprovals::respond(
        &approvals_root,
        "run-gate-phase-0",
        &Resolution::approve("lead"),
    )
    .await
    .expect("respond");

    let second = Arc::new(
        ScriptedExecutor::new()
            .respond("analyze", json!({"risk": "high"}))
            .respond("report", json!({"done": true})),
    );
    let ctx = RunContext::builder(registry(), second.clone())
        .run_id("run-gate")
        .store(store.clone())
        .approvals(Arc::new(FileApprovals::new(&approvals_root).detached()))
        .build();
    let report = pipeline()
        .run(&ctx, json!({"threshold": 3}))
        .await
        .expect("resumed run");

    assert_eq!(second.call_count("scan"), 0);
    assert_eq!(report.phases[0].gate.as_deref(), Some("approved"));
    assert_eq!(report.results["scan"]["count"], 5);
    assert!(FileApprovals::pending(&approvals_root)
        .await
        .expect("pending")
        .is_empty());

    let events = store.get_events(&run_id).await.expect("events");
    let resolved = events
        .iter()
        .find(|e| e.kind == "breakpoint_resolved")
        .expect("audit record");
    assert_eq!(resolved.payload["data"]["resolution"]["reviewer"], "lead");
    assert!(resolved.payload["data"]["content_digest"].is_string());
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_in_flight_task() {
    let ledger = Arc::new(MemoryRunLedger::new());
    let executor = ScriptedExecutor::new().respond_after("scan", Duration::from_secs(60), scan_result(0));
    let cancel = CancelToken::new();
    let ctx = RunContext::builder(registry(), Arc::new(executor))
        .run_id("run-cancel")
        .ledger(ledger.clone())
        .cancel_token(cancel.clone())
        .build();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
    });
    let failure = pipeline().run(&ctx, json!({})).await.unwrap_err();

    assert!(failure.error.is_cancellation());
    assert_eq!(failure.report.status, RunState::Cancelled);
    assert_eq!(ctx.state(), RunState::Cancelled);
    let run_id = RunId::from("run-cancel");
    assert_eq!(
        ledger.get_run(&run_id).await.expect("run").status,
        RunStatus::Cancelled
    );
    let events = ledger.get_events(&run_id).await.expect("events");
    assert_eq!(kinds(&events).last(), Some(&"run_cancelled"));
}

#[tokio::test(start_paused = true)]
async fn cancellation_while_waiting_on_gate() {
    let cancel = CancelToken::new();
    let ctx = RunContext::builder(
        registry(),
        Arc::new(ScriptedExecutor::new().respond("scan", scan_result(9))),
    )
    .approvals(Arc::new(RecordingApprovals::never_resolving()))
    .cancel_token(cancel.clone())
    .build();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(30)).await;
        cancel.cancel();
    });
    let failure = pipeline()
        .run(&ctx, json!({"threshold": 3}))
        .await
        .unwrap_err();
    assert!(matches!(failure.error, ProcflowError::Cancelled));
    assert_eq!(failure.report.status, RunState::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn gate_timeout_applies_policy_action() {
    let run = |action: TimeoutAction| async move {
        let config = RunConfig::default()
            .with_breakpoints(BreakpointPolicy::blocking().with_default_timeout(5, action));
        let ctx = RunContext::builder(
            registry(),
            Arc::new(
                ScriptedExecutor::new()
                    .respond("scan", scan_result(9))
                    .respond("analyze", json!({}))
                    .respond("report", json!({})),
            ),
        )
        .approvals(Arc::new(RecordingApprovals::never_resolving()))
        .config(config)
        .build();
        pipeline().run(&ctx, json!({"threshold": 3})).await
    };

    let report = run(TimeoutAction::AutoApprove).await.expect("auto-approved");
    assert_eq!(report.phases[0].gate.as_deref(), Some("approved"));
    assert_eq!(report.status, RunState::Completed);

    let failure = run(TimeoutAction::AutoReject).await.unwrap_err();
    assert!(matches!(failure.error, ProcflowError::BreakpointRejected { .. }));

    let failure = run(TimeoutAction::Fail).await.unwrap_err();
    match failure.error {
        ProcflowError::BreakpointTimeout { timeout_secs, .. } => assert_eq!(timeout_secs, 5),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn timed_out_attempts_are_retried_with_fresh_effect_ids() {
    let executor = Arc::new(
        ScriptedExecutor::new()
            .respond_after("scan", Duration::from_secs(10), scan_result(0))
            .respond_after("scan", Duration::from_secs(10), scan_result(0))
            .respond("scan", scan_result(2)),
    );
    let config = RunConfig::default()
        .with_task_timeout(Duration::from_secs(1))
        .with_retry(RetryPolicy::fixed(3, Duration::from_millis(100)));
    let ctx = RunContext::builder(registry(), executor.clone())
        .config(config)
        .build();

    let value = ctx.task_by_key("scan", &json!({})).await.expect("third attempt");
    assert_eq!(value["count"], 2);
    let effect_ids: HashSet<String> = executor.calls().into_iter().map(|c| c.effect_id).collect();
    assert_eq!(effect_ids.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_surface_timeout() {
    let executor = ScriptedExecutor::new()
        .respond_after("scan", Duration::from_secs(10), json!({}))
        .respond_after("scan", Duration::from_secs(10), json!({}));
    let config = RunConfig::default()
        .with_task_timeout(Duration::from_millis(500))
        .with_retry(RetryPolicy::fixed(2, Duration::ZERO));
    let ctx = RunContext::builder(registry(), Arc::new(executor))
        .config(config)
        .build();

    let err = ctx.task_by_key("scan", &json!({})).await.unwrap_err();
    match err {
        ProcflowError::Timeout { task, timeout_ms } => {
            assert_eq!(task, "scan");
            assert_eq!(timeout_ms, 500);
        }
        other => panic!("unexpected error: {other}"),
    }
}
