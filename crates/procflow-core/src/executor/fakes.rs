//! Scripted executor for tests and dry runs.
//!
//! Responses are queued per task key and consumed in order. A key may also
//! carry a fallback (fixed value or closure over the spec) used once its
//! queue is empty. Every invocation is recorded.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::{ProcflowError, Result, TaskSpec};

use super::AgentExecutor;

type Responder = Arc<dyn Fn(&TaskSpec) -> std::result::Result<Value, String> + Send + Sync>;

#[derive(Clone)]
struct Scripted {
    outcome: std::result::Result<Value, String>,
    delay: Option<Duration>,
}

#[derive(Default)]
struct Script {
    queues: HashMap<String, VecDeque<Scripted>>,
    fallbacks: HashMap<String, Responder>,
    calls: Vec<TaskSpec>,
}

/// In-memory [`AgentExecutor`] driven by canned responses.
#[derive(Default)]
pub struct ScriptedExecutor {
    script: Mutex<Script>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, key: &str, scripted: Scripted) {
        self.script
            .lock()
            .unwrap()
            .queues
            .entry(key.to_string())
            .or_default()
            .push_back(scripted);
    }

    /// Queue a successful result for `key`.
    pub fn respond(self, key: &str, value: Value) -> Self {
        self.push(
            key,
            Scripted {
                outcome: Ok(value),
                delay: None,
            },
        );
        self
    }

    /// Queue a successful result delivered after `delay`.
    pub fn respond_after(self, key: &str, delay: Duration, value: Value) -> Self {
        self.push(
            key,
            Scripted {
                outcome: Ok(value),
                delay: Some(delay),
            },
        );
        self
    }

    /// Queue an agent failure for `key`.
    pub fn fail(self, key: &str, reason: &str) -> Self {
        self.push(
            key,
            Scripted {
                outcome: Err(reason.to_string()),
                delay: None,
            },
        );
        self
    }

    /// Queue an agent failure delivered after `delay`.
    pub fn fail_after(self, key: &str, delay: Duration, reason: &str) -> Self {
        self.push(
            key,
            Scripted {
                outcome: Err(reason.to_string()),
                delay: Some(delay),
            },
        );
        self
    }

    /// Answer every call to `key` (once its queue is drained) with `value`.
    pub fn always(self, key: &str, value: Value) -> Self {
        self.respond_with(key, move |_| Ok(value.clone()))
    }

    /// Answer calls to `key` by computing a result from the spec.
    pub fn respond_with<F>(self, key: &str, f: F) -> Self
    where
        F: Fn(&TaskSpec) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        self.script
            .lock()
            .unwrap()
            .fallbacks
            .insert(key.to_string(), Arc::new(f));
        self
    }

    /// Every spec executed so far, in call order.
    pub fn calls(&self) -> Vec<TaskSpec> {
        self.script.lock().unwrap().calls.clone()
    }

    pub fn call_count(&self, key: &str) -> usize {
        self.script
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|s| s.task_key == key)
            .count()
    }
}

#[async_trait]
impl AgentExecutor for ScriptedExecutor {
    async fn execute(&self, spec: &TaskSpec) -> Result<Value> {
        let next = {
            let mut script = self.script.lock().unwrap();
            script.calls.push(spec.clone());
            match script
                .queues
                .get_mut(&spec.task_key)
                .and_then(VecDeque::pop_front)
            {
                Some(scripted) => Some(scripted),
                None => script.fallbacks.get(&spec.task_key).map(|f| Scripted {
                    outcome: (f.as_ref())(spec),
                    delay: None,
                }),
            }
        };

        let Some(scripted) = next else {
            return Err(ProcflowError::TaskExecution {
                task: spec.task_key.clone(),
                reason: "no scripted response".to_string(),
            });
        };

        if let Some(delay) = scripted.delay {
            tokio::time::sleep(delay).await;
        }
        scripted
            .outcome
            .map_err(|reason| ProcflowError::TaskExecution {
                task: spec.task_key.clone(),
                reason,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AgentPrompt, OutputSchema, TaskContext, TaskDefinition, TaskPrompt};
    use serde_json::json;

    fn spec(key: &str) -> TaskSpec {
        TaskDefinition::new(key, OutputSchema::any(), |_, _| {
            Ok(TaskPrompt::new("t", AgentPrompt::new("r", "t")))
        })
        .materialize(&json!({}), &TaskContext::new("run", 1))
        .unwrap()
    }

    #[tokio::test]
    async fn test_queue_then_fallback_then_error() {
        let exec = ScriptedExecutor::new()
            .respond("a", json!(1))
            .fail("a", "boom")
            .always("b", json!("b"));

        assert_eq!(exec.execute(&spec("a")).await.unwrap(), json!(1));
        assert!(exec.execute(&spec("a")).await.is_err());
        assert!(exec.execute(&spec("a")).await.is_err());
        assert_eq!(exec.execute(&spec("b")).await.unwrap(), json!("b"));
        assert_eq!(exec.execute(&spec("b")).await.unwrap(), json!("b"));
        assert_eq!(exec.call_count("a"), 3);
        assert_eq!(exec.calls().len(), 5);
    }
}
