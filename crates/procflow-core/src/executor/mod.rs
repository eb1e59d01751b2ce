//! Agent executors: the boundary between the orchestrator and whatever runs
//! the agent call.
//!
//! The orchestrator never talks to a model directly. It hands a
//! [`TaskSpec`] to an [`AgentExecutor`] and awaits a JSON value. Timeouts,
//! retries, cancellation and schema validation are applied by the run
//! context around this seam, not by the executors.

pub mod command;
pub mod fakes;
pub mod file_exchange;
pub mod retry;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::{Result, TaskSpec};

pub use command::CommandExecutor;
pub use file_exchange::FileExchangeExecutor;
pub use retry::RetryPolicy;

/// Executes one materialized task spec and returns the raw agent result.
///
/// Implementations fail with `ProcflowError::TaskExecution` when the agent
/// cannot be reached or answers with something that is not JSON.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    async fn execute(&self, spec: &TaskSpec) -> Result<Value>;
}

/// Parse an agent answer, mapping malformed JSON to `TaskExecution`.
pub(crate) fn parse_result(spec: &TaskSpec, bytes: &[u8]) -> Result<Value> {
    serde_json::from_slice(bytes).map_err(|e| crate::domain::ProcflowError::TaskExecution {
        task: spec.task_key.clone(),
        reason: format!("malformed JSON result: {e}"),
    })
}
