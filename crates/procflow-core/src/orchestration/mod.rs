//! Run orchestration: run context, fan-out, task graphs and pipelines.

pub mod cancel;
pub mod clock;
pub mod context;
pub mod graph;
pub mod parallel;
pub mod pipeline;
pub mod report;
pub mod state;

pub use cancel::CancelToken;
pub use clock::{Clock, ManualClock, MonotonicClock, SystemClock};
pub use context::{RunConfig, RunContext, RunContextBuilder, DEFAULT_MAX_CONCURRENCY};
pub use graph::{execute_graph, GraphOutcome, JoinPolicy, TaskGraph, TaskNode};
pub use parallel::{join_ordered, join_settled};
pub use pipeline::{Phase, PhaseOutput, Pipeline, PipelineBuilder, PipelineState};
pub use report::{PhaseSummary, PipelineFailure, PipelineReport};
pub use state::{Edge, RunState, RunStateMachine};
