//! Artifact bookkeeping helpers.

use serde_json::Value;

pub use procflow_state::Artifact;

use super::error::{ProcflowError, Result};

/// Read the optional `artifacts` array of a task result.
///
/// Absent or null means no artifacts. Anything else must deserialize as a
/// list of `{path, format, label}`.
pub fn artifacts_in(task: &str, result: &Value) -> Result<Vec<Artifact>> {
    match result.get("artifacts") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(list) => serde_json::from_value(list.clone()).map_err(|e| {
            ProcflowError::TaskExecution {
                task: task.to_string(),
                reason: format!("malformed artifacts list: {e}"),
            }
        }),
    }
}

/// Concatenate per-phase artifact lists in order. No dedup.
pub fn concat_artifacts<I>(phases: I) -> Vec<Artifact>
where
    I: IntoIterator<Item = Vec<Artifact>>,
{
    phases.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_artifacts_in_reads_optional_list() {
        let v = json!({
            "count": 1,
            "artifacts": [{"path": "out/report.md", "format": "markdown", "label": "Report"}]
        });
        let artifacts = artifacts_in("report", &v).unwrap();
        assert_eq!(
            artifacts,
            vec![Artifact::new("out/report.md", "markdown", "Report")]
        );
        assert!(artifacts_in("report", &json!({"count": 1})).unwrap().is_empty());
        assert!(artifacts_in("report", &json!({"artifacts": null})).unwrap().is_empty());
    }

    #[test]
    fn test_artifacts_in_rejects_malformed_list() {
        assert!(artifacts_in("report", &json!({"artifacts": [{"path": 3}]})).is_err());
    }

    #[test]
    fn test_concat_preserves_order_and_duplicates() {
        let a = Artifact::new("a", "md", "A");
        let b = Artifact::new("b", "json", "B");
        let all = concat_artifacts(vec![vec![a.clone()], vec![], vec![b.clone(), a.clone()]]);
        assert_eq!(all, vec![a.clone(), b, a]);
    }
}
