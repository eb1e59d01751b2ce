//! File-exchange executor.
//!
//! Writes each spec to `<root>/tasks/<effect_id>/input.json` and waits for
//! an external worker to drop `<root>/tasks/<effect_id>/result.json`. Result
//! writers are expected to write a temp file and rename it into place.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, instrument};

use crate::domain::{Result, TaskSpec};

use super::{parse_result, AgentExecutor};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct FileExchangeExecutor {
    root: PathBuf,
    poll_interval: Duration,
}

impl FileExchangeExecutor {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn input_path(&self, spec: &TaskSpec) -> PathBuf {
        self.root.join(&spec.io.input_json_path)
    }

    pub fn result_path(&self, spec: &TaskSpec) -> PathBuf {
        self.root.join(&spec.io.output_json_path)
    }
}

/// Write `data` to a uniquely named temp file beside `path`, then rename it
/// into place. Concurrent writers to one path never share a temp file.
pub(crate) async fn write_file_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    tokio::fs::create_dir_all(&dir).await?;
    let path = path.to_path_buf();
    let data = data.to_vec();
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(&data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    })
    .await
    .map_err(std::io::Error::other)?
}

#[async_trait]
impl AgentExecutor for FileExchangeExecutor {
    #[instrument(skip(self, spec), fields(task = %spec.task_key, effect_id = %spec.effect_id))]
    async fn execute(&self, spec: &TaskSpec) -> Result<Value> {
        let input = self.input_path(spec);
        write_file_atomic(&input, &serde_json::to_vec_pretty(spec)?).await?;
        debug!(path = %input.display(), "task input written");

        let result = self.result_path(spec);
        loop {
            match tokio::fs::read(&result).await {
                Ok(bytes) => {
                    debug!(path = %result.display(), "task result picked up");
                    return parse_result(spec, &bytes);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tokio::time::sleep(self.poll_interval).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AgentPrompt, OutputSchema, TaskContext, TaskDefinition, TaskPrompt};
    use crate::domain::ProcflowError;
    use serde_json::json;

    fn spec() -> TaskSpec {
        TaskDefinition::new("echo", OutputSchema::any(), |args, _| {
            Ok(TaskPrompt::new(
                "Echo",
                AgentPrompt::new("echo", "repeat").with_context(args.clone()),
            ))
        })
        .materialize(&json!({"x": 1}), &TaskContext::new("run", 1))
        .unwrap()
    }

    #[tokio::test]
    async fn test_writes_input_and_reads_result() {
        let dir = tempfile::tempdir().unwrap();
        let exec = FileExchangeExecutor::new(dir.path())
            .with_poll_interval(Duration::from_millis(10));
        let spec = spec();
        let result_path = exec.result_path(&spec);
        let input_path = exec.input_path(&spec);

        let worker = tokio::spawn(async move {
            while !input_path.exists() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            let written: TaskSpec =
                serde_json::from_slice(&std::fs::read(&input_path).unwrap()).unwrap();
            assert_eq!(written.task_key, "echo");
            write_file_atomic(&result_path, br#"{"ok": true}"#)
                .await
                .unwrap();
        });

        let out = exec.execute(&spec).await.unwrap();
        worker.await.unwrap();
        assert_eq!(out, json!({"ok": true}));
    }

    #[tokio::test]
    async fn test_concurrent_atomic_writes_to_one_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("breakpoints").join("bp-1").join("response.json");
        let payloads: Vec<Vec<u8>> = (0..16)
            .map(|i| format!("{{\"writer\": {i}}}").into_bytes())
            .collect();

        let writes = payloads.iter().map(|p| write_file_atomic(&path, p));
        for result in futures::future::join_all(writes).await {
            result.unwrap();
        }

        let written = std::fs::read(&path).unwrap();
        assert!(payloads.contains(&written));
        let entries: Vec<_> = std::fs::read_dir(path.parent().unwrap()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_result_is_task_execution_error() {
        let dir = tempfile::tempdir().unwrap();
        let exec = FileExchangeExecutor::new(dir.path());
        let spec = spec();
        let result_path = exec.result_path(&spec);
        std::fs::create_dir_all(result_path.parent().unwrap()).unwrap();
        std::fs::write(&result_path, b"not json").unwrap();

        let err = exec.execute(&spec).await.unwrap_err();
        assert!(matches!(err, ProcflowError::TaskExecution { .. }));
    }
}
