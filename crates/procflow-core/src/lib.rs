//! procflow Core Library
//!
//! Orchestration engine for long agent "process" workflows: schema-checked
//! agent task calls, ordered fan-out, task graphs, human-approval
//! breakpoints and durable, resumable pipelines.
//!
//! ## Layer 1 - Orchestration
//!
//! Agent execution and breakpoint surfaces are reached through the
//! [`AgentExecutor`] and [`ApprovalChannel`] traits; persistence goes through
//! `procflow-state`.

pub mod breakpoint;
pub mod domain;
pub mod executor;
pub mod manifest;
pub mod obs;
pub mod orchestration;
pub mod recording;
pub mod telemetry;
pub mod template;

pub use domain::{
    artifacts_in, concat_artifacts, AgentPrompt, AgentRequest, Artifact, Event, EventKind,
    OutputSchema, ProcflowError, Result, SchemaType, SchemaViolation, TaskContext, TaskDefinition,
    TaskIo, TaskPrompt, TaskRegistry, TaskSpec,
};

pub use breakpoint::{
    ApprovalChannel, AutoApprove, Breakpoint, BreakpointError, BreakpointPolicy,
    BreakpointRecord, BreakpointRule, BreakpointSpec, BreakpointStatus, FileApprovals,
    InProcessApprovals, Resolution, TimeoutAction,
};

pub use executor::{AgentExecutor, CommandExecutor, FileExchangeExecutor, RetryPolicy};

pub use orchestration::{
    CancelToken, Clock, JoinPolicy, ManualClock, Phase, PhaseOutput, Pipeline, PipelineFailure,
    PipelineReport, PipelineState, RunConfig, RunContext, RunState, SystemClock, TaskGraph,
    TaskNode,
};

pub use manifest::WorkflowManifest;

pub use procflow_state::{PhaseStore, RunId, RunLedger};
