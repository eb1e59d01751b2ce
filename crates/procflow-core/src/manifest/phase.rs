//! A pipeline phase compiled from a manifest entry.

use async_trait::async_trait;
use serde_json::Value;

use super::condition::Condition;
use super::ManifestBreakpoint;
use crate::breakpoint::BreakpointSpec;
use crate::domain::{artifacts_in, Result};
use crate::orchestration::{JoinPolicy, Phase, PhaseOutput, PipelineState, RunContext, TaskGraph};
use crate::template;

/// Runs a task graph; output is `{node_id: result}`.
#[derive(Debug, Clone)]
pub struct ManifestPhase {
    name: String,
    when: Option<Condition>,
    graph: TaskGraph,
    join: Option<JoinPolicy>,
    breakpoint: Option<ManifestBreakpoint>,
}

impl ManifestPhase {
    pub fn new(
        name: impl Into<String>,
        when: Option<Condition>,
        graph: TaskGraph,
        join: Option<JoinPolicy>,
        breakpoint: Option<ManifestBreakpoint>,
    ) -> Self {
        Self {
            name: name.into(),
            when,
            graph,
            join,
            breakpoint,
        }
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }
}

fn gate_scope(state: &PipelineState, output: &PhaseOutput) -> Value {
    let mut scope = state.scope();
    if let Value::Object(map) = &mut scope {
        map.insert("output".to_string(), output.output.clone());
    }
    scope
}

#[async_trait]
impl Phase for ManifestPhase {
    fn name(&self) -> &str {
        &self.name
    }

    fn should_run(&self, state: &PipelineState) -> Result<bool> {
        match &self.when {
            Some(condition) => condition.evaluate(&state.scope()),
            None => Ok(true),
        }
    }

    async fn run(&self, ctx: &RunContext, state: &PipelineState) -> Result<PhaseOutput> {
        let outcome = ctx.run_graph(&self.graph, &state.scope(), self.join).await?;
        let mut artifacts = Vec::new();
        for node in self.graph.nodes() {
            if let Some(result) = outcome.results.get(&node.id) {
                artifacts.extend(artifacts_in(&node.task, result)?);
            }
        }
        Ok(PhaseOutput {
            output: outcome.to_output(),
            artifacts,
        })
    }

    fn gate(&self, state: &PipelineState, output: &PhaseOutput) -> Result<Option<BreakpointSpec>> {
        let Some(bp) = &self.breakpoint else {
            return Ok(None);
        };
        let scope = gate_scope(state, output);
        if let Some(condition) = &bp.when {
            if !condition.evaluate(&scope)? {
                return Ok(None);
            }
        }
        let mut spec = BreakpointSpec::new(
            template::render_text(&bp.title, &scope)?,
            template::render_text(&bp.question, &scope)?,
        )
        .with_context(template::render(&bp.context, &scope)?);
        if let Some(id) = &bp.id {
            spec = spec.with_id(template::render_text(id, &scope)?);
        }
        Ok(Some(spec))
    }
}
