//! Task definitions, materialized task specs and the task registry.
//!
//! A [`TaskDefinition`] is immutable once built: a unique key, a declared
//! [`OutputSchema`], and a factory turning run-time arguments into the prompt
//! for one invocation. Materializing a definition against a [`TaskContext`]
//! yields a fresh [`TaskSpec`] whose `io` paths are namespaced by the
//! invocation's effect id.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::error::{ProcflowError, Result};
use super::schema::OutputSchema;

/// `kind` of every spec produced by this crate.
pub const AGENT_TASK_KIND: &str = "agent";

/// Prompt handed to the external agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentPrompt {
    /// Persona the agent should adopt.
    pub role: String,
    /// One-line statement of the job.
    pub task: String,
    /// Structured input data.
    #[serde(default)]
    pub context: Value,
    /// Ordered natural-language instructions.
    #[serde(default)]
    pub instructions: Vec<String>,
    /// Expected shape of the answer, in prose.
    pub output_format: String,
}

impl AgentPrompt {
    pub fn new(role: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            task: task.into(),
            context: Value::Null,
            instructions: Vec::new(),
            output_format: "JSON".to_string(),
        }
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instructions.push(instruction.into());
        self
    }

    pub fn with_output_format(mut self, format: impl Into<String>) -> Self {
        self.output_format = format.into();
        self
    }
}

/// What a task factory returns: a title plus the prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskPrompt {
    pub title: String,
    pub prompt: AgentPrompt,
}

impl TaskPrompt {
    pub fn new(title: impl Into<String>, prompt: AgentPrompt) -> Self {
        Self {
            title: title.into(),
            prompt,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRequest {
    pub prompt: AgentPrompt,
    pub output_schema: OutputSchema,
}

/// File paths exchanged with whatever executes the agent call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskIo {
    pub input_json_path: String,
    pub output_json_path: String,
}

impl TaskIo {
    /// `tasks/<effect_id>/input.json` and `tasks/<effect_id>/result.json`.
    pub fn for_effect(effect_id: &str) -> Self {
        Self {
            input_json_path: format!("tasks/{effect_id}/input.json"),
            output_json_path: format!("tasks/{effect_id}/result.json"),
        }
    }
}

/// Materialized request for one task execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    pub kind: String,
    pub title: String,
    pub task_key: String,
    pub effect_id: String,
    pub agent: AgentRequest,
    pub io: TaskIo,
}

/// Per-invocation context handed to a task factory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskContext {
    /// Unique id of this invocation attempt.
    pub effect_id: String,
    pub run_id: String,
    /// 1-based attempt number under the retry policy.
    pub attempt: u32,
}

impl TaskContext {
    /// Fresh context with a random effect id.
    pub fn new(run_id: impl Into<String>, attempt: u32) -> Self {
        Self {
            effect_id: Uuid::new_v4().to_string(),
            run_id: run_id.into(),
            attempt,
        }
    }

    pub fn io(&self) -> TaskIo {
        TaskIo::for_effect(&self.effect_id)
    }
}

type TaskFactory = dyn Fn(&Value, &TaskContext) -> Result<TaskPrompt> + Send + Sync;

/// A named unit of work with a declared output contract.
#[derive(Clone)]
pub struct TaskDefinition {
    key: String,
    output_schema: OutputSchema,
    factory: Arc<TaskFactory>,
}

impl TaskDefinition {
    pub fn new<F>(key: impl Into<String>, output_schema: OutputSchema, factory: F) -> Self
    where
        F: Fn(&Value, &TaskContext) -> Result<TaskPrompt> + Send + Sync + 'static,
    {
        Self {
            key: key.into(),
            output_schema,
            factory: Arc::new(factory),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn output_schema(&self) -> &OutputSchema {
        &self.output_schema
    }

    /// Build the spec for one invocation.
    ///
    /// No side effects: nothing is written until an executor runs the spec.
    pub fn materialize(&self, args: &Value, ctx: &TaskContext) -> Result<TaskSpec> {
        let TaskPrompt { title, prompt } = (self.factory)(args, ctx)?;
        Ok(TaskSpec {
            kind: AGENT_TASK_KIND.to_string(),
            title,
            task_key: self.key.clone(),
            effect_id: ctx.effect_id.clone(),
            agent: AgentRequest {
                prompt,
                output_schema: self.output_schema.clone(),
            },
            io: ctx.io(),
        })
    }
}

impl fmt::Debug for TaskDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDefinition")
            .field("key", &self.key)
            .field("output_schema", &self.output_schema)
            .finish_non_exhaustive()
    }
}

/// Registry of task definitions keyed by unique name.
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    tasks: BTreeMap<String, TaskDefinition>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition. Keys are unique.
    pub fn register(&mut self, definition: TaskDefinition) -> Result<()> {
        if self.tasks.contains_key(definition.key()) {
            return Err(ProcflowError::DuplicateTask(definition.key().to_string()));
        }
        self.tasks.insert(definition.key().to_string(), definition);
        Ok(())
    }

    /// Register a definition (builder pattern).
    pub fn with(mut self, definition: TaskDefinition) -> Result<Self> {
        self.register(definition)?;
        Ok(self)
    }

    pub fn get(&self, key: &str) -> Result<&TaskDefinition> {
        self.tasks
            .get(key)
            .ok_or_else(|| ProcflowError::UnknownTask(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.tasks.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    fn scan_task() -> TaskDefinition {
        TaskDefinition::new(
            "scan",
            OutputSchema::object().required_property("count", OutputSchema::integer()),
            |args, _ctx| {
                let target = args["target"].as_str().unwrap_or("unknown");
                Ok(TaskPrompt::new(
                    format!("Scan {target}"),
                    AgentPrompt::new("security analyst", "enumerate findings")
                        .with_context(args.clone())
                        .with_instruction("list every finding")
                        .with_instruction("count them"),
                ))
            },
        )
    }

    #[test]
    fn test_materialize_fills_contract_fields() {
        let def = scan_task();
        let ctx = TaskContext::new("run-1", 1);
        let spec = def.materialize(&json!({"target": "api"}), &ctx).unwrap();

        assert_eq!(spec.kind, "agent");
        assert_eq!(spec.title, "Scan api");
        assert_eq!(spec.task_key, "scan");
        assert_eq!(spec.agent.prompt.instructions.len(), 2);
        assert_eq!(spec.agent.output_schema.required, vec!["count"]);
        assert_eq!(
            spec.io.input_json_path,
            format!("tasks/{}/input.json", ctx.effect_id)
        );
        assert_eq!(
            spec.io.output_json_path,
            format!("tasks/{}/result.json", ctx.effect_id)
        );
    }

    #[test]
    fn test_io_paths_unique_per_invocation() {
        let def = scan_task();
        let mut seen = HashSet::new();
        for _ in 0..200 {
            let ctx = TaskContext::new("run-1", 1);
            let spec = def.materialize(&json!({}), &ctx).unwrap();
            assert!(seen.insert(spec.io.input_json_path.clone()));
            assert!(seen.insert(spec.io.output_json_path.clone()));
        }
    }

    #[test]
    fn test_spec_wire_format_is_camel_case() {
        let spec = scan_task()
            .materialize(&json!({"target": "web"}), &TaskContext::new("r", 1))
            .unwrap();
        let v = serde_json::to_value(&spec).unwrap();
        assert_eq!(v["kind"], "agent");
        assert!(v["agent"]["prompt"]["outputFormat"].is_string());
        assert!(v["agent"]["outputSchema"].is_object());
        assert!(v["io"]["inputJsonPath"].is_string());
        assert!(v["io"]["outputJsonPath"].is_string());
        assert_eq!(v["taskKey"], "scan");
    }

    #[test]
    fn test_registry_rejects_duplicate_keys() {
        let mut registry = TaskRegistry::new();
        registry.register(scan_task()).unwrap();
        let err = registry.register(scan_task()).unwrap_err();
        assert!(matches!(err, ProcflowError::DuplicateTask(k) if k == "scan"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registry_unknown_task() {
        let registry = TaskRegistry::new();
        assert!(matches!(
            registry.get("nope").unwrap_err(),
            ProcflowError::UnknownTask(_)
        ));
    }
}
