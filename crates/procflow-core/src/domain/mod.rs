//! Domain types: tasks, output schemas, artifacts, run events and errors.

pub mod artifact;
pub mod error;
pub mod event;
pub mod schema;
pub mod task;

pub use artifact::{artifacts_in, concat_artifacts, Artifact};
pub use error::{ProcflowError, Result, SchemaViolation};
pub use event::{Event, EventKind};
pub use schema::{OutputSchema, SchemaType};
pub use task::{
    AgentPrompt, AgentRequest, TaskContext, TaskDefinition, TaskIo, TaskPrompt, TaskRegistry,
    TaskSpec, AGENT_TASK_KIND,
};
