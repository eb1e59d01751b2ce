//! Command executor: runs an external agent program per task.
//!
//! The spec JSON is written both to `<workdir>/<inputJsonPath>` and to the
//! child's stdin. The child answers with a JSON document on stdout, or by
//! writing `<workdir>/<outputJsonPath>` and printing nothing. The child
//! inherits the orchestrator's working directory and is killed if the
//! invocation is dropped (timeout or cancellation).

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::domain::{ProcflowError, Result, TaskSpec};

use super::file_exchange::write_file_atomic;
use super::{parse_result, AgentExecutor};

/// Environment variable carrying the input path.
pub const ENV_TASK_INPUT: &str = "PROCFLOW_TASK_INPUT";
/// Environment variable carrying the expected result path.
pub const ENV_TASK_RESULT: &str = "PROCFLOW_TASK_RESULT";

/// Longest stderr excerpt carried in an error.
const STDERR_EXCERPT: usize = 2000;

#[derive(Debug, Clone)]
pub struct CommandExecutor {
    program: String,
    args: Vec<String>,
    workdir: PathBuf,
}

impl CommandExecutor {
    pub fn new(program: impl Into<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            workdir: workdir.into(),
        }
    }

    /// Build from a whitespace-separated command line
    /// (first element is the executable).
    pub fn from_command_line(command: &str, workdir: impl Into<PathBuf>) -> Result<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or_else(|| ProcflowError::TaskExecution {
            task: "agent-command".to_string(),
            reason: "agent command is empty".to_string(),
        })?;
        Ok(Self {
            program,
            args: parts.collect(),
            workdir: workdir.into(),
        })
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

fn excerpt(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    match text.char_indices().nth(STDERR_EXCERPT) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[async_trait]
impl AgentExecutor for CommandExecutor {
    #[instrument(skip(self, spec), fields(task = %spec.task_key, effect_id = %spec.effect_id, program = %self.program))]
    async fn execute(&self, spec: &TaskSpec) -> Result<Value> {
        let start = Instant::now();
        let payload = serde_json::to_vec_pretty(spec)?;
        let input_path = self.workdir.join(&spec.io.input_json_path);
        let result_path = self.workdir.join(&spec.io.output_json_path);
        write_file_atomic(&input_path, &payload).await?;

        let task_err = |reason: String| ProcflowError::TaskExecution {
            task: spec.task_key.clone(),
            reason,
        };

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env(ENV_TASK_INPUT, &input_path)
            .env(ENV_TASK_RESULT, &result_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| task_err(format!("failed to spawn {}: {e}", self.program)))?;

        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                // A child that never reads stdin closes the pipe early; that is fine.
                let _ = stdin.write_all(&payload).await;
            }
        };
        let (_, output) = tokio::join!(feed, child.wait_with_output());
        let output =
            output.map_err(|e| task_err(format!("failed to wait for {}: {e}", self.program)))?;

        debug!(
            exit_code = output.status.code().unwrap_or(-1),
            duration_ms = start.elapsed().as_millis() as u64,
            "agent command finished"
        );

        if !output.status.success() {
            return Err(task_err(format!(
                "agent command exited with {}: {}",
                output.status,
                excerpt(&output.stderr)
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            let value = parse_result(spec, stdout.trim().as_bytes())?;
            write_file_atomic(&result_path, &serde_json::to_vec_pretty(&value)?).await?;
            return Ok(value);
        }

        match tokio::fs::read(&result_path).await {
            Ok(bytes) => parse_result(spec, &bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(task_err(
                "agent command produced no stdout and no result file".to_string(),
            )),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::domain::{AgentPrompt, OutputSchema, TaskContext, TaskDefinition, TaskPrompt};
    use serde_json::json;

    fn spec() -> TaskSpec {
        TaskDefinition::new("probe", OutputSchema::any(), |_, _| {
            Ok(TaskPrompt::new("Probe", AgentPrompt::new("tester", "probe")))
        })
        .materialize(&json!({}), &TaskContext::new("run", 1))
        .unwrap()
    }

    #[tokio::test]
    async fn test_stdout_json_is_result() {
        let dir = tempfile::tempdir().unwrap();
        let exec = CommandExecutor::new("sh", dir.path())
            .arg("-c")
            .arg("cat > /dev/null; echo '{\"status\": \"ok\"}'");
        let spec = spec();
        let out = exec.execute(&spec).await.unwrap();
        assert_eq!(out, json!({"status": "ok"}));
        assert!(dir.path().join(&spec.io.input_json_path).exists());
        assert!(dir.path().join(&spec.io.output_json_path).exists());
    }

    #[tokio::test]
    async fn test_result_file_is_used_when_stdout_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let exec = CommandExecutor::new("sh", dir.path())
            .arg("-c")
            .arg("echo '{\"from\": \"file\"}' > \"$PROCFLOW_TASK_RESULT\"");
        let out = exec.execute(&spec()).await.unwrap();
        assert_eq!(out, json!({"from": "file"}));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_task_execution_error() {
        let dir = tempfile::tempdir().unwrap();
        let exec = CommandExecutor::new("sh", dir.path())
            .arg("-c")
            .arg("echo 'model overloaded' >&2; exit 3");
        let err = exec.execute(&spec()).await.unwrap_err();
        match err {
            ProcflowError::TaskExecution { task, reason } => {
                assert_eq!(task, "probe");
                assert!(reason.contains("model overloaded"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_from_command_line_rejects_empty() {
        assert!(CommandExecutor::from_command_line("   ", ".").is_err());
        let exec = CommandExecutor::from_command_line("agent --model fast", ".").unwrap();
        assert_eq!(exec.program, "agent");
        assert_eq!(exec.args, vec!["--model", "fast"]);
    }
}
