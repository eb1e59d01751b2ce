//! Declarative workflow manifests.
//!
//! A manifest is JSON describing the task catalogue and the phases of a
//! workflow. Each phase is a small task graph, optionally guarded by a
//! `when` condition and followed by an approval gate. Manifests compile into
//! a [`TaskRegistry`] plus a [`Pipeline`] of [`ManifestPhase`]s.
//!
//! ```json
//! {
//!   "name": "pentest",
//!   "tasks": {
//!     "recon": {
//!       "title": "Recon {{args.target}}",
//!       "role": "penetration tester",
//!       "task": "enumerate exposed services",
//!       "outputSchema": {"type": "object", "required": ["count"]}
//!     }
//!   },
//!   "phases": [{
//!     "name": "recon",
//!     "nodes": [{"id": "scan", "task": "recon", "args": {"target": "{{inputs.target}}"}}],
//!     "breakpoint": {
//!       "title": "Scope Review",
//!       "question": "{{output.scan.count}} services found. Continue?",
//!       "when": {"path": "output.scan.count", "op": "gt", "value": "{{inputs.threshold}}"},
//!       "context": {"count": "{{output.scan.count}}"}
//!     }
//!   }],
//!   "summary": {"services": "{{results.recon.scan.count}}", "artifacts": "{{artifact_count}}"}
//! }
//! ```

pub mod condition;
pub mod phase;

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::domain::{
    AgentPrompt, OutputSchema, ProcflowError, Result, TaskDefinition, TaskPrompt, TaskRegistry,
};
use crate::orchestration::{JoinPolicy, Pipeline, PipelineState, TaskGraph, TaskNode};
use crate::template;

pub use condition::{Condition, ConditionOp};
pub use phase::ManifestPhase;

fn default_output_format() -> String {
    "JSON".to_string()
}

/// A task template. Strings may reference `{{args.*}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestTask {
    pub title: String,
    pub role: String,
    pub task: String,
    #[serde(default)]
    pub instructions: Vec<String>,
    #[serde(default = "default_output_format")]
    pub output_format: String,
    #[serde(default)]
    pub output_schema: OutputSchema,
}

impl ManifestTask {
    fn definition(&self, key: &str) -> TaskDefinition {
        let task = self.clone();
        TaskDefinition::new(key, self.output_schema.clone(), move |args, _ctx| {
            let scope = json!({ "args": args });
            let mut prompt = AgentPrompt::new(
                template::render_text(&task.role, &scope)?,
                template::render_text(&task.task, &scope)?,
            )
            .with_context(args.clone())
            .with_output_format(task.output_format.clone());
            for instruction in &task.instructions {
                prompt = prompt.with_instruction(template::render_text(instruction, &scope)?);
            }
            Ok(TaskPrompt::new(
                template::render_text(&task.title, &scope)?,
                prompt,
            ))
        })
    }
}

/// Approval gate raised after a phase.
///
/// Templates see `{inputs, results, output}` where `output` is the phase's
/// own output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestBreakpoint {
    /// Stable id template; defaults to `<run_id>-phase-<index>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub title: String,
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<Condition>,
    #[serde(default)]
    pub context: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestPhaseSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<Condition>,
    pub nodes: Vec<TaskNode>,
    /// Overrides the run's default join policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join: Option<JoinPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breakpoint: Option<ManifestBreakpoint>,
}

/// A complete workflow description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowManifest {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub tasks: BTreeMap<String, ManifestTask>,
    pub phases: Vec<ManifestPhaseSpec>,
    /// Report summary template over `{inputs, results, artifacts, artifact_count}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<Value>,
}

impl WorkflowManifest {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| ProcflowError::Manifest(e.to_string()))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| ProcflowError::Manifest(format!("{}: {e}", path.display())))
    }

    /// Structural checks: names, graph shape and task references.
    pub fn validate(&self) -> Result<()> {
        self.graphs().map(|_| ())
    }

    fn graphs(&self) -> Result<Vec<TaskGraph>> {
        if self.name.trim().is_empty() {
            return Err(ProcflowError::Manifest("workflow name is empty".into()));
        }
        if self.phases.is_empty() {
            return Err(ProcflowError::Manifest(format!(
                "workflow '{}' has no phases",
                self.name
            )));
        }
        let mut names = HashSet::new();
        let mut graphs = Vec::with_capacity(self.phases.len());
        for phase in &self.phases {
            if !names.insert(phase.name.as_str()) {
                return Err(ProcflowError::Manifest(format!(
                    "duplicate phase name '{}'",
                    phase.name
                )));
            }
            if phase.nodes.is_empty() {
                return Err(ProcflowError::Manifest(format!(
                    "phase '{}' has no nodes",
                    phase.name
                )));
            }
            if let Some(node) = phase.nodes.iter().find(|n| !self.tasks.contains_key(&n.task)) {
                return Err(ProcflowError::Manifest(format!(
                    "phase '{}' node '{}' references unknown task '{}'",
                    phase.name, node.id, node.task
                )));
            }
            let graph = TaskGraph::new(phase.nodes.clone()).map_err(|e| {
                ProcflowError::Manifest(format!("phase '{}': {e}", phase.name))
            })?;
            graphs.push(graph);
        }
        Ok(graphs)
    }

    /// Task definitions declared by the manifest.
    pub fn registry(&self) -> Result<TaskRegistry> {
        let mut registry = TaskRegistry::new();
        for (key, task) in &self.tasks {
            registry.register(task.definition(key))?;
        }
        Ok(registry)
    }

    /// Build the registry and the pipeline.
    pub fn compile(&self) -> Result<(TaskRegistry, Pipeline)> {
        let graphs = self.graphs()?;
        let registry = self.registry()?;

        let mut builder = Pipeline::builder(self.name.clone());
        for (spec, graph) in self.phases.iter().zip(graphs) {
            builder = builder.phase(ManifestPhase::new(
                spec.name.clone(),
                spec.when.clone(),
                graph,
                spec.join,
                spec.breakpoint.clone(),
            ));
        }
        if let Some(summary) = self.summary.clone() {
            builder = builder.summary(move |state| template::render(&summary, &summary_scope(state)));
        }
        Ok((registry, builder.build()?))
    }
}

fn summary_scope(state: &PipelineState) -> Value {
    json!({
        "inputs": state.inputs(),
        "results": state.results(),
        "artifacts": state.artifacts(),
        "artifact_count": state.artifacts().len(),
    })
}
