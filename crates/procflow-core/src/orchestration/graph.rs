//! Task-graph execution: nodes are tasks, edges are declared dependencies.
//!
//! The graph is split into stable topological layers. Each layer runs
//! concurrently; later layers see earlier results under `nodes.<id>`.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::context::RunContext;
use super::parallel::{join_ordered, join_settled};
use crate::domain::{ProcflowError, Result, TaskRegistry};
use crate::template;

/// How a layer reacts to a failing node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinPolicy {
    /// The first failure aborts the graph.
    #[default]
    FailFast,
    /// Record failures, skip their dependants, keep going.
    BestEffort,
}

/// One task invocation in a graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskNode {
    pub id: String,
    /// Registry key of the task to run.
    pub task: String,
    /// Argument template rendered against `{inputs, results, nodes}`.
    #[serde(default)]
    pub args: Value,
    #[serde(default, alias = "dependsOn", skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

impl TaskNode {
    pub fn new(id: impl Into<String>, task: impl Into<String>, args: Value) -> Self {
        Self {
            id: id.into(),
            task: task.into(),
            args,
            depends_on: Vec::new(),
        }
    }

    pub fn after(mut self, dependency: impl Into<String>) -> Self {
        self.depends_on.push(dependency.into());
        self
    }
}

/// A validated, acyclic set of task nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskGraph {
    nodes: Vec<TaskNode>,
    layers: Vec<Vec<usize>>,
}

impl TaskGraph {
    /// Validate ids and dependencies and compute the layering.
    pub fn new(nodes: Vec<TaskNode>) -> Result<Self> {
        let mut index = HashMap::new();
        for (i, node) in nodes.iter().enumerate() {
            if index.insert(node.id.as_str(), i).is_some() {
                return Err(ProcflowError::InvalidGraph(format!(
                    "duplicate node id '{}'",
                    node.id
                )));
            }
        }
        for node in &nodes {
            for dep in &node.depends_on {
                if !index.contains_key(dep.as_str()) {
                    return Err(ProcflowError::InvalidGraph(format!(
                        "node '{}' depends on unknown node '{dep}'",
                        node.id
                    )));
                }
            }
        }

        // Repeated passes in declaration order keep layers stable.
        let mut depth: Vec<Option<usize>> = vec![None; nodes.len()];
        let mut placed = 0;
        while placed < nodes.len() {
            let mut progressed = false;
            for (i, node) in nodes.iter().enumerate() {
                if depth[i].is_some() {
                    continue;
                }
                let deps: Option<Vec<usize>> = node
                    .depends_on
                    .iter()
                    .map(|d| depth[index[d.as_str()]])
                    .collect();
                if let Some(deps) = deps {
                    depth[i] = Some(deps.into_iter().max().map_or(0, |d| d + 1));
                    placed += 1;
                    progressed = true;
                }
            }
            if !progressed {
                let stuck: Vec<&str> = nodes
                    .iter()
                    .zip(&depth)
                    .filter(|(_, d)| d.is_none())
                    .map(|(n, _)| n.id.as_str())
                    .collect();
                return Err(ProcflowError::InvalidGraph(format!(
                    "dependency cycle among: {}",
                    stuck.join(", ")
                )));
            }
        }

        let layer_count = depth.iter().flatten().max().map_or(0, |d| d + 1);
        let mut layers = vec![Vec::new(); layer_count];
        for (i, d) in depth.iter().enumerate() {
            if let Some(d) = d {
                layers[*d].push(i);
            }
        }
        Ok(Self { nodes, layers })
    }

    /// Fail if any node names a task the registry does not know.
    pub fn validate_tasks(&self, registry: &TaskRegistry) -> Result<()> {
        match self.nodes.iter().find(|n| !registry.contains(&n.task)) {
            Some(node) => Err(ProcflowError::InvalidGraph(format!(
                "node '{}' references unknown task '{}'",
                node.id, node.task
            ))),
            None => Ok(()),
        }
    }

    pub fn nodes(&self) -> &[TaskNode] {
        &self.nodes
    }

    /// Node ids per layer, declaration order within a layer.
    pub fn layers(&self) -> Vec<Vec<&str>> {
        self.layers
            .iter()
            .map(|layer| layer.iter().map(|&i| self.nodes[i].id.as_str()).collect())
            .collect()
    }
}

/// Results of executing a graph.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphOutcome {
    pub results: BTreeMap<String, Value>,
    /// Failed node id -> error message (best-effort only).
    pub failures: BTreeMap<String, String>,
    /// Nodes not run because a dependency failed or was skipped.
    pub skipped: BTreeSet<String>,
}

impl GraphOutcome {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.skipped.is_empty()
    }

    /// `{node_id: result}`, with `{"error": ..}` / `{"skipped": true}`
    /// standing in for nodes that produced nothing.
    pub fn to_output(&self) -> Value {
        let mut out: serde_json::Map<String, Value> = self
            .results
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (id, error) in &self.failures {
            out.insert(id.clone(), serde_json::json!({ "error": error }));
        }
        for id in &self.skipped {
            out.insert(id.clone(), serde_json::json!({ "skipped": true }));
        }
        Value::Object(out)
    }
}

fn scope_with_nodes(scope: &Value, results: &BTreeMap<String, Value>) -> Value {
    let mut scoped = match scope {
        Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };
    scoped.insert(
        "nodes".to_string(),
        Value::Object(results.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
    );
    Value::Object(scoped)
}

/// Run `graph` layer by layer under `ctx`.
pub async fn execute_graph(
    ctx: &RunContext,
    graph: &TaskGraph,
    scope: &Value,
    join: JoinPolicy,
) -> Result<GraphOutcome> {
    let mut outcome = GraphOutcome::default();
    let limit = ctx.config().max_concurrency;

    for (depth, layer) in graph.layers.iter().enumerate() {
        ctx.cancel_token().check()?;
        let mut runnable = Vec::new();
        for &i in layer {
            let node = &graph.nodes[i];
            let blocked = node
                .depends_on
                .iter()
                .any(|d| outcome.failures.contains_key(d) || outcome.skipped.contains(d));
            if blocked {
                debug!(node = %node.id, "skipping node with failed dependency");
                outcome.skipped.insert(node.id.clone());
            } else {
                runnable.push(node);
            }
        }
        debug!(layer = depth, nodes = runnable.len(), "executing graph layer");

        let node_scope = scope_with_nodes(scope, &outcome.results);
        let branches: Vec<_> = runnable
            .iter()
            .map(|node| {
                let node_scope = &node_scope;
                async move {
                    let args = template::render(&node.args, node_scope)?;
                    ctx.task_by_key(&node.task, &args).await
                }
            })
            .collect();

        match join {
            JoinPolicy::FailFast => {
                let values = join_ordered(branches, limit).await.map_err(|e| match e {
                    ProcflowError::ParallelBranch { index, source } => ProcflowError::GraphNode {
                        node: runnable[index].id.clone(),
                        source,
                    },
                    other => other,
                })?;
                for (node, value) in runnable.iter().zip(values) {
                    outcome.results.insert(node.id.clone(), value);
                }
            }
            JoinPolicy::BestEffort => {
                let settled = join_settled(branches, limit).await;
                for (node, result) in runnable.iter().zip(settled) {
                    match result {
                        Ok(value) => {
                            outcome.results.insert(node.id.clone(), value);
                        }
                        Err(e) if e.is_cancellation() || e.suspended_on().is_some() => {
                            return Err(ProcflowError::GraphNode {
                                node: node.id.clone(),
                                source: Box::new(e),
                            })
                        }
                        Err(e) => {
                            warn!(node = %node.id, error = %e, "graph node failed");
                            outcome.failures.insert(node.id.clone(), e.to_string());
                        }
                    }
                }
            }
        }
    }
    Ok(outcome)
}
