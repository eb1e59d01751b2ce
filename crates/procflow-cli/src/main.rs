//! procflow - agent process workflow runner
//!
//! The `procflow` command runs JSON workflow manifests with durable phases
//! and file-based approval gates.
//!
//! ## Commands
//!
//! - `validate`: Parse and check a manifest
//! - `run`: Start a new run and print its report
//! - `resume`: Continue a failed, cancelled or suspended run
//! - `approve` / `reject` / `edit`: Answer a pending breakpoint
//! - `status`: Show a run's record, phases and pending breakpoints
//! - `list`: List recorded runs

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use procflow_core::{
    AgentExecutor, ApprovalChannel, AutoApprove, BreakpointPolicy, CancelToken, CommandExecutor,
    FileApprovals, FileExchangeExecutor, PipelineFailure, PipelineReport, Resolution,
    RetryPolicy, RunConfig, RunContext, RunId, RunState, TimeoutAction, WorkflowManifest,
};
use procflow_state::{FsRunStore, PhaseStore, RunLedger};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn, Level};

const EXIT_OK: u8 = 0;
const EXIT_FAILED: u8 = 1;
const EXIT_SUSPENDED: u8 = 3;
const EXIT_CANCELLED: u8 = 130;

/// Saved next to each run so `resume` needs only the run id.
const INVOCATION_FILE: &str = "invocation.json";

#[derive(Parser)]
#[command(name = "procflow")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Durable agent process workflows", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// State directory for runs, approvals and agent exchange files
    #[arg(long, global = true, env = "PROCFLOW_WORKDIR", default_value = ".procflow")]
    workdir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and validate a workflow manifest
    Validate {
        /// Manifest JSON file
        #[arg(short, long)]
        manifest: PathBuf,
    },

    /// Start a new run of a manifest
    Run {
        /// Manifest JSON file
        #[arg(short, long)]
        manifest: PathBuf,

        /// Inputs JSON file (default: empty object)
        #[arg(short, long)]
        inputs: Option<PathBuf>,

        /// Extra input `key=value`; the value is parsed as JSON when possible
        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,

        /// Run id (default: random)
        #[arg(long)]
        run_id: Option<String>,

        #[command(flatten)]
        options: RunOptions,
    },

    /// Resume a run from its last durable phase
    Resume {
        /// Run to resume
        #[arg(long)]
        run_id: String,

        #[command(flatten)]
        options: RunOptions,
    },

    /// Approve a pending breakpoint
    Approve {
        #[command(flatten)]
        target: BreakpointTarget,

        /// Optional note stored with the approval
        #[arg(long)]
        comment: Option<String>,
    },

    /// Reject a pending breakpoint
    Reject {
        #[command(flatten)]
        target: BreakpointTarget,

        /// Why the run should stop
        #[arg(long)]
        reason: String,
    },

    /// Approve a pending breakpoint with a replacement payload
    Edit {
        #[command(flatten)]
        target: BreakpointTarget,

        /// JSON file replacing the gated phase output
        #[arg(long)]
        payload: PathBuf,
    },

    /// Show a run's record, phases and pending breakpoints
    Status {
        /// Run to inspect
        #[arg(long)]
        run_id: String,
    },

    /// List recorded runs
    List {
        /// Only runs of this workflow
        #[arg(long)]
        workflow: Option<String>,
    },
}

/// Execution settings shared by `run` and `resume`.
#[derive(Args, Debug, Clone)]
struct RunOptions {
    /// Agent command receiving each task spec on stdin (default: file exchange)
    #[arg(long, env = "PROCFLOW_AGENT_CMD")]
    agent_cmd: Option<String>,

    /// Approve every breakpoint immediately
    #[arg(long)]
    auto_approve: bool,

    /// Do not wait on breakpoints; park the run until it is answered
    #[arg(long)]
    detach: bool,

    /// Upper bound for one agent call
    #[arg(long, env = "PROCFLOW_TASK_TIMEOUT_SECS")]
    task_timeout_secs: Option<u64>,

    /// Attempts per task, including the first
    #[arg(long, env = "PROCFLOW_MAX_ATTEMPTS", default_value = "1")]
    max_attempts: u32,

    /// Branches of one fan-out running at the same time
    #[arg(long)]
    max_concurrency: Option<usize>,

    /// Seconds before an unanswered breakpoint times out
    #[arg(long, env = "PROCFLOW_BREAKPOINT_TIMEOUT_SECS")]
    breakpoint_timeout_secs: Option<u64>,

    /// What a timed-out breakpoint does: approve, reject or fail
    #[arg(long, default_value = "fail")]
    on_timeout: TimeoutAction,
}

#[derive(Args, Debug, Clone)]
struct BreakpointTarget {
    /// Breakpoint id (default: the run's only pending breakpoint)
    #[arg(short, long)]
    breakpoint: Option<String>,

    /// Run owning the breakpoint
    #[arg(long)]
    run_id: Option<String>,

    /// Who answers
    #[arg(long, env = "PROCFLOW_REVIEWER", default_value = "operator")]
    reviewer: String,
}

/// What a run was started with.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Invocation {
    manifest: WorkflowManifest,
    inputs: Value,
}

/// Directory layout under `--workdir`.
struct Workdir {
    root: PathBuf,
}

impl Workdir {
    fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    fn store(&self) -> Result<FsRunStore> {
        FsRunStore::new(&self.root)
            .with_context(|| format!("Failed to open run store at {}", self.root.display()))
    }

    fn approvals(&self) -> PathBuf {
        self.root.join("approvals")
    }

    fn exchange(&self) -> PathBuf {
        self.root.join("exchange")
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    procflow_core::telemetry::init_tracing(cli.json, level);

    let workdir = Workdir::new(&cli.workdir);
    let code = match cli.command {
        Commands::Validate { manifest } => cmd_validate(&manifest).map(|_| EXIT_OK),
        Commands::Run {
            manifest,
            inputs,
            set,
            run_id,
            options,
        } => {
            cmd_run(
                &workdir,
                &manifest,
                inputs.as_deref(),
                &set,
                run_id.as_deref(),
                &options,
            )
            .await
        }
        Commands::Resume { run_id, options } => cmd_resume(&workdir, &run_id, &options).await,
        Commands::Approve { target, comment } => {
            let resolution = Resolution::Approve {
                reviewer: target.reviewer.clone(),
                comment,
            };
            cmd_respond(&workdir, &target, resolution).await
        }
        Commands::Reject { target, reason } => {
            let resolution = Resolution::reject(target.reviewer.clone(), reason);
            cmd_respond(&workdir, &target, resolution).await
        }
        Commands::Edit { target, payload } => {
            let payload: Value = read_json_file(&payload)?;
            let resolution = Resolution::edit(target.reviewer.clone(), payload);
            cmd_respond(&workdir, &target, resolution).await
        }
        Commands::Status { run_id } => cmd_status(&workdir, &run_id).await,
        Commands::List { workflow } => cmd_list(&workdir, workflow.as_deref()).await,
    }?;
    Ok(ExitCode::from(code))
}

fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content =
        std::fs::read_to_string(path).context(format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).context(format!("Failed to parse {} as JSON", path.display()))
}

fn load_manifest(path: &Path) -> Result<WorkflowManifest> {
    let manifest = WorkflowManifest::from_path(path)
        .with_context(|| format!("Failed to load manifest {}", path.display()))?;
    manifest
        .validate()
        .with_context(|| format!("Manifest {} is invalid", path.display()))?;
    Ok(manifest)
}

/// Merge `--inputs` and `--set` into one inputs object.
fn build_inputs(inputs: Option<&Path>, set: &[String]) -> Result<Value> {
    let mut value = match inputs {
        Some(path) => read_json_file(path)?,
        None => json!({}),
    };
    let Some(map) = value.as_object_mut() else {
        bail!("Inputs must be a JSON object");
    };
    for pair in set {
        let Some((key, raw)) = pair.split_once('=') else {
            bail!("Invalid --set '{pair}': expected KEY=VALUE");
        };
        let parsed = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        map.insert(key.trim().to_string(), parsed);
    }
    Ok(value)
}

fn run_config(options: &RunOptions) -> RunConfig {
    let mut config = RunConfig::default();
    if let Some(secs) = options.task_timeout_secs {
        config = config.with_task_timeout(Duration::from_secs(secs));
    }
    if options.max_attempts > 1 {
        config = config.with_retry(RetryPolicy::exponential(
            options.max_attempts,
            Duration::from_secs(1),
            Duration::from_secs(30),
        ));
    }
    if let Some(max) = options.max_concurrency {
        config = config.with_max_concurrency(max);
    }
    if let Some(secs) = options.breakpoint_timeout_secs {
        config = config.with_breakpoints(
            BreakpointPolicy::blocking().with_default_timeout(secs, options.on_timeout),
        );
    }
    config
}

fn executor(workdir: &Workdir, options: &RunOptions) -> Result<Arc<dyn AgentExecutor>> {
    Ok(match options.agent_cmd.as_deref() {
        Some(command) => Arc::new(
            CommandExecutor::from_command_line(command, workdir.exchange())
                .context("Invalid agent command")?,
        ),
        None => Arc::new(FileExchangeExecutor::new(workdir.exchange())),
    })
}

fn approvals(workdir: &Workdir, options: &RunOptions) -> Arc<dyn ApprovalChannel> {
    if options.auto_approve {
        return Arc::new(AutoApprove::new("procflow-cli"));
    }
    let channel = FileApprovals::new(workdir.approvals());
    if options.detach {
        Arc::new(channel.detached())
    } else {
        Arc::new(channel)
    }
}

/// Validate a manifest and print its phase layout
fn cmd_validate(path: &Path) -> Result<()> {
    let manifest = load_manifest(path)?;
    let (registry, pipeline) = manifest.compile()?;
    println!("Manifest OK: {}", manifest.name);
    println!("  tasks:  {}", registry.len());
    for (i, phase) in manifest.phases.iter().enumerate() {
        let gate = if phase.breakpoint.is_some() { " [gate]" } else { "" };
        let when = if phase.when.is_some() { " [conditional]" } else { "" };
        println!(
            "  {:>2}. {} ({} nodes){}{}",
            i + 1,
            phase.name,
            phase.nodes.len(),
            when,
            gate
        );
    }
    info!(workflow = %pipeline.workflow(), phases = pipeline.phase_names().len(), "manifest validated");
    Ok(())
}

/// Start a new run
async fn cmd_run(
    workdir: &Workdir,
    manifest_path: &Path,
    inputs: Option<&Path>,
    set: &[String],
    run_id: Option<&str>,
    options: &RunOptions,
) -> Result<u8> {
    let invocation = Invocation {
        manifest: load_manifest(manifest_path)?,
        inputs: build_inputs(inputs, set)?,
    };
    let run_id = run_id.map(RunId::from).unwrap_or_default();
    let store = workdir.store()?;
    if store.get_run(&run_id).await.is_ok() {
        bail!("Run {run_id} already exists; use `procflow resume --run-id {run_id}`");
    }

    let dir = store.run_dir(&run_id)?;
    std::fs::create_dir_all(&dir).context(format!("Failed to create {}", dir.display()))?;
    std::fs::write(
        dir.join(INVOCATION_FILE),
        serde_json::to_vec_pretty(&invocation)?,
    )
    .context("Failed to save run invocation")?;

    let outcome = drive(workdir, store, &run_id, &invocation, options).await?;
    Ok(report_outcome(&run_id, outcome))
}

/// Resume a run from its saved invocation
async fn cmd_resume(workdir: &Workdir, run_id: &str, options: &RunOptions) -> Result<u8> {
    let run_id = RunId::from(run_id);
    let store = workdir.store()?;
    store
        .get_run(&run_id)
        .await
        .with_context(|| format!("Unknown run {run_id}"))?;
    let invocation: Invocation = read_json_file(&store.run_dir(&run_id)?.join(INVOCATION_FILE))?;

    let outcome = drive(workdir, store, &run_id, &invocation, options).await?;
    Ok(report_outcome(&run_id, outcome))
}

async fn drive(
    workdir: &Workdir,
    store: FsRunStore,
    run_id: &RunId,
    invocation: &Invocation,
    options: &RunOptions,
) -> Result<std::result::Result<PipelineReport, PipelineFailure>> {
    let (registry, pipeline) = invocation.manifest.compile()?;

    let cancel = CancelToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            on_interrupt.cancel();
        }
    });

    let ctx = RunContext::builder(registry, executor(workdir, options)?)
        .run_id(run_id.clone())
        .store(Arc::new(store))
        .approvals(approvals(workdir, options))
        .cancel_token(cancel)
        .config(run_config(options))
        .build();

    info!(run_id = %run_id, workflow = %pipeline.workflow(), "starting run");
    Ok(pipeline.run(&ctx, invocation.inputs.clone()).await)
}

/// Print the report and map the run status to an exit code.
fn report_outcome(
    run_id: &RunId,
    outcome: std::result::Result<PipelineReport, PipelineFailure>,
) -> u8 {
    let (report, failure) = match outcome {
        Ok(report) => (report, None),
        Err(PipelineFailure { error, report }) => (*report, Some(error)),
    };
    match report.to_json_pretty() {
        Ok(text) => println!("{text}"),
        Err(e) => eprintln!("Failed to render report: {e}"),
    }

    let Some(error) = failure else {
        return EXIT_OK;
    };
    match report.status {
        RunState::Suspended => {
            let breakpoint = error.suspended_on().unwrap_or_default();
            eprintln!("Run {run_id} is waiting on breakpoint {breakpoint}.");
            eprintln!(
                "Answer it with `procflow approve --breakpoint {breakpoint}` (or reject/edit), then `procflow resume --run-id {run_id}`."
            );
            EXIT_SUSPENDED
        }
        RunState::Cancelled => {
            eprintln!("Run {run_id} cancelled. Resume with `procflow resume --run-id {run_id}`.");
            EXIT_CANCELLED
        }
        _ => {
            eprintln!("Run {run_id} failed: {error}");
            EXIT_FAILED
        }
    }
}

/// Pick the breakpoint a response is meant for.
async fn resolve_breakpoint(workdir: &Workdir, target: &BreakpointTarget) -> Result<String> {
    if let Some(id) = &target.breakpoint {
        return Ok(id.clone());
    }
    let Some(run_id) = &target.run_id else {
        bail!("Pass --breakpoint <id> or --run-id <id>");
    };
    let pending: Vec<_> = FileApprovals::pending(&workdir.approvals())
        .await?
        .into_iter()
        .filter(|bp| &bp.run_id == run_id)
        .collect();
    match pending.as_slice() {
        [only] => Ok(only.breakpoint_id.clone()),
        [] => bail!("Run {run_id} has no pending breakpoint"),
        many => {
            let ids: Vec<&str> = many.iter().map(|bp| bp.breakpoint_id.as_str()).collect();
            bail!(
                "Run {run_id} has {} pending breakpoints ({}); pass --breakpoint",
                many.len(),
                ids.join(", ")
            )
        }
    }
}

/// Write a breakpoint response file
async fn cmd_respond(
    workdir: &Workdir,
    target: &BreakpointTarget,
    resolution: Resolution,
) -> Result<u8> {
    let id = resolve_breakpoint(workdir, target).await?;
    let root = workdir.approvals();
    let breakpoint = FileApprovals::read_request(&root, &id)
        .await
        .with_context(|| format!("Breakpoint {id} not found"))?;
    if let Some(run_id) = &target.run_id {
        if &breakpoint.run_id != run_id {
            bail!("Breakpoint {id} belongs to run {}, not {run_id}", breakpoint.run_id);
        }
    }
    FileApprovals::respond(&root, &id, &resolution).await?;

    println!(
        "Breakpoint {id} {} by {} ({})",
        resolution.status(),
        resolution.reviewer(),
        breakpoint.title
    );
    Ok(EXIT_OK)
}

/// Show one run
async fn cmd_status(workdir: &Workdir, run_id: &str) -> Result<u8> {
    let run_id = RunId::from(run_id);
    let store = workdir.store()?;
    let record = store
        .get_run(&run_id)
        .await
        .with_context(|| format!("Unknown run {run_id}"))?;
    let phases = store.load_phases(&run_id).await?;
    let events = store.get_events(&run_id).await?;
    let pending: Vec<_> = FileApprovals::pending(&workdir.approvals())
        .await?
        .into_iter()
        .filter(|bp| bp.run_id == run_id.as_str())
        .collect();

    let status = json!({
        "run": record,
        "phases": phases
            .iter()
            .map(|p| json!({
                "index": p.phase_index,
                "name": p.name,
                "status": p.status,
                "artifacts": p.artifacts.len(),
                "output_digest": p.output_digest,
                "recorded_at": p.recorded_at,
            }))
            .collect::<Vec<_>>(),
        "events": events.len(),
        "last_event": events.last().map(|e| e.kind.clone()),
        "pending_breakpoints": pending,
    });
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(EXIT_OK)
}

/// List runs, newest first
async fn cmd_list(workdir: &Workdir, workflow: Option<&str>) -> Result<u8> {
    let store = workdir.store()?;
    let mut runs = store.list_runs(workflow).await?;
    runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    if runs.is_empty() {
        println!("No runs recorded.");
        return Ok(EXIT_OK);
    }
    for run in runs {
        println!(
            "{:<40} {:<20} {:<10} {}",
            run.run_id.to_string(),
            run.metadata.workflow,
            run.status.to_string(),
            run.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(EXIT_OK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use procflow_state::{PhaseStatus, RunStatus};

    const MANIFEST: &str = r#"{
        "name": "triage",
        "tasks": {
            "count": {
                "title": "Count {{args.target}}",
                "role": "analyst",
                "task": "count findings",
                "outputSchema": {"type": "object", "required": ["count"]}
            }
        },
        "phases": [
            {
                "name": "count",
                "nodes": [{"id": "c", "task": "count", "args": {"target": "{{inputs.target}}"}}],
                "breakpoint": {
                    "title": "Review",
                    "question": "{{output.c.count}} findings. Continue?",
                    "when": {"path": "output.c.count", "op": "gt", "value": "{{inputs.threshold}}"}
                }
            },
            {"name": "wrap", "nodes": [{"id": "w", "task": "count", "args": {"target": "summary"}}]}
        ]
    }"#;

    /// Workdir with a manifest and a shell agent that always reports 4.
    fn fixture() -> (tempfile::TempDir, PathBuf, RunOptions) {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("manifest.json");
        std::fs::write(&manifest, MANIFEST).unwrap();
        let agent = dir.path().join("agent.sh");
        std::fs::write(&agent, "cat > /dev/null\necho '{\"count\": 4}'\n").unwrap();
        let options = RunOptions {
            agent_cmd: Some(format!("sh {}", agent.display())),
            auto_approve: false,
            detach: true,
            task_timeout_secs: Some(30),
            max_attempts: 1,
            max_concurrency: None,
            breakpoint_timeout_secs: None,
            on_timeout: TimeoutAction::Fail,
        };
        (dir, manifest, options)
    }

    fn target(run_id: &str) -> BreakpointTarget {
        BreakpointTarget {
            breakpoint: None,
            run_id: Some(run_id.to_string()),
            reviewer: "alice".to_string(),
        }
    }

    #[test]
    fn test_cli_parses_run_flags() {
        let cli = Cli::try_parse_from([
            "procflow",
            "--workdir",
            "/tmp/pf",
            "run",
            "--manifest",
            "m.json",
            "--set",
            "threshold=3",
            "--on-timeout",
            "approve",
            "--breakpoint-timeout-secs",
            "60",
            "--detach",
        ])
        .unwrap();
        assert_eq!(cli.workdir, PathBuf::from("/tmp/pf"));
        match cli.command {
            Commands::Run { set, options, .. } => {
                assert_eq!(set, vec!["threshold=3"]);
                assert_eq!(options.on_timeout, TimeoutAction::AutoApprove);
                assert_eq!(options.breakpoint_timeout_secs, Some(60));
                assert!(options.detach);
            }
            _ => panic!("expected run"),
        }
        assert!(Cli::try_parse_from(["procflow", "run", "--manifest", "m", "--on-timeout", "later"]).is_err());
    }

    #[test]
    fn test_build_inputs_merges_set_pairs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inputs.json");
        std::fs::write(&path, r#"{"target": "api", "threshold": 1}"#).unwrap();
        let inputs = build_inputs(
            Some(&path),
            &["threshold=3".to_string(), "env=prod".to_string(), "tags=[\"a\"]".to_string()],
        )
        .unwrap();
        assert_eq!(
            inputs,
            json!({"target": "api", "threshold": 3, "env": "prod", "tags": ["a"]})
        );
        assert!(build_inputs(None, &["novalue".to_string()]).is_err());

        std::fs::write(&path, "[1, 2]").unwrap();
        assert!(build_inputs(Some(&path), &[]).is_err());
    }

    #[test]
    fn test_run_config_from_options() {
        let (_dir, _manifest, mut options) = fixture();
        options.max_attempts = 3;
        options.breakpoint_timeout_secs = Some(10);
        options.on_timeout = TimeoutAction::AutoReject;
        let config = run_config(&options);
        assert_eq!(config.task_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.retry.attempts(), 3);
        assert_eq!(
            config.breakpoints.resolve("anything"),
            (Some(10), TimeoutAction::AutoReject)
        );
    }

    #[test]
    fn test_validate_rejects_broken_manifest() {
        let (dir, manifest, _) = fixture();
        assert!(cmd_validate(&manifest).is_ok());
        let broken = dir.path().join("broken.json");
        std::fs::write(&broken, MANIFEST.replace("\"id\": \"w\", \"task\": \"count\"", "\"id\": \"w\", \"task\": \"ghost\"")).unwrap();
        assert!(cmd_validate(&broken).is_err());
    }

    #[tokio::test]
    async fn test_run_without_gate_completes() {
        let (dir, manifest, options) = fixture();
        let workdir = Workdir::new(&dir.path().join("state"));
        let code = cmd_run(
            &workdir,
            &manifest,
            None,
            &["target=api".to_string(), "threshold=10".to_string()],
            Some("run-plain"),
            &options,
        )
        .await
        .unwrap();
        assert_eq!(code, EXIT_OK);

        let store = workdir.store().unwrap();
        let run_id = RunId::from("run-plain");
        let record = store.get_run(&run_id).await.unwrap();
        assert_eq!(record.status, RunStatus::Completed);
        let phases = store.load_phases(&run_id).await.unwrap();
        assert_eq!(phases.len(), 2);
        assert!(phases.iter().all(|p| p.status == PhaseStatus::Completed));

        // A second `run` with the same id is refused.
        let again = cmd_run(&workdir, &manifest, None, &[], Some("run-plain"), &options).await;
        assert!(again.is_err());
    }

    #[tokio::test]
    async fn test_detached_gate_then_approve_and_resume() {
        let (dir, manifest, options) = fixture();
        let workdir = Workdir::new(&dir.path().join("state"));
        let code = cmd_run(
            &workdir,
            &manifest,
            None,
            &["target=api".to_string(), "threshold=2".to_string()],
            Some("run-gated"),
            &options,
        )
        .await
        .unwrap();
        assert_eq!(code, EXIT_SUSPENDED);

        let store = workdir.store().unwrap();
        let run_id = RunId::from("run-gated");
        assert_eq!(
            store.get_run(&run_id).await.unwrap().status,
            RunStatus::Suspended
        );

        let code = cmd_respond(&workdir, &target("run-gated"), Resolution::approve("alice"))
            .await
            .unwrap();
        assert_eq!(code, EXIT_OK);
        // Nothing left to answer.
        assert!(cmd_respond(&workdir, &target("run-gated"), Resolution::approve("alice"))
            .await
            .is_err());

        let code = cmd_resume(&workdir, "run-gated", &options).await.unwrap();
        assert_eq!(code, EXIT_OK);
        assert_eq!(
            store.get_run(&run_id).await.unwrap().status,
            RunStatus::Completed
        );
        assert_eq!(cmd_status(&workdir, "run-gated").await.unwrap(), EXIT_OK);
    }

    #[tokio::test]
    async fn test_rejected_gate_fails_run() {
        let (dir, manifest, options) = fixture();
        let workdir = Workdir::new(&dir.path().join("state"));
        cmd_run(
            &workdir,
            &manifest,
            None,
            &["target=api".to_string(), "threshold=0".to_string()],
            Some("run-rejected"),
            &options,
        )
        .await
        .unwrap();
        cmd_respond(
            &workdir,
            &target("run-rejected"),
            Resolution::reject("alice", "out of scope"),
        )
        .await
        .unwrap();

        let code = cmd_resume(&workdir, "run-rejected", &options).await.unwrap();
        assert_eq!(code, EXIT_FAILED);
        let record = workdir
            .store()
            .unwrap()
            .get_run(&RunId::from("run-rejected"))
            .await
            .unwrap();
        assert_eq!(record.status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn test_respond_requires_a_target() {
        let dir = tempfile::tempdir().unwrap();
        let workdir = Workdir::new(dir.path());
        let target = BreakpointTarget {
            breakpoint: None,
            run_id: None,
            reviewer: "bob".to_string(),
        };
        assert!(cmd_respond(&workdir, &target, Resolution::approve("bob"))
            .await
            .is_err());
    }
}
