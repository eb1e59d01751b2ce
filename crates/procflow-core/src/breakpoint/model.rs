//! Breakpoints: human-approval checkpoints raised during a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// What a pipeline asks the reviewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakpointSpec {
    /// Stable id. Raising the same id again (after a restart) finds an
    /// earlier response instead of asking twice.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub title: String,
    pub question: String,
    /// Free-form summary of pipeline state for the reviewer.
    #[serde(default)]
    pub context: Value,
}

impl BreakpointSpec {
    pub fn new(title: impl Into<String>, question: impl Into<String>) -> Self {
        Self {
            id: None,
            title: title.into(),
            question: question.into(),
            context: Value::Null,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }
}

/// Status of a breakpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakpointStatus {
    Pending,
    Approved,
    Rejected,
    Edited,
    Expired,
}

impl BreakpointStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for BreakpointStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Edited => "edited",
            Self::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// A raised breakpoint as seen by approval channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breakpoint {
    pub breakpoint_id: String,
    pub run_id: String,
    pub title: String,
    pub question: String,
    pub context: Value,
    pub created_at: DateTime<Utc>,
    /// Deadline after which the timeout action applies.
    pub expires_at: Option<DateTime<Utc>>,
    pub status: BreakpointStatus,
}

impl Breakpoint {
    /// Create a pending breakpoint from a spec.
    ///
    /// A timeout too large to express as a date leaves `expires_at` unset.
    pub fn new(
        spec: BreakpointSpec,
        run_id: impl Into<String>,
        timeout_secs: Option<u64>,
        now: DateTime<Utc>,
    ) -> Self {
        let expires_at = timeout_secs.and_then(|s| {
            i64::try_from(s)
                .ok()
                .and_then(chrono::Duration::try_seconds)
                .and_then(|d| now.checked_add_signed(d))
        });
        Self {
            breakpoint_id: spec.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            run_id: run_id.into(),
            title: spec.title,
            question: spec.question,
            context: spec.context,
            created_at: now,
            expires_at,
            status: BreakpointStatus::Pending,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }
}

/// A reviewer's answer to a breakpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Resolution {
    Approve {
        reviewer: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        comment: Option<String>,
    },
    Reject { reviewer: String, reason: String },
    /// Approve with a replacement payload.
    Edit { reviewer: String, payload: Value },
}

impl Resolution {
    pub fn approve(reviewer: impl Into<String>) -> Self {
        Self::Approve {
            reviewer: reviewer.into(),
            comment: None,
        }
    }

    pub fn reject(reviewer: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Reject {
            reviewer: reviewer.into(),
            reason: reason.into(),
        }
    }

    pub fn edit(reviewer: impl Into<String>, payload: Value) -> Self {
        Self::Edit {
            reviewer: reviewer.into(),
            payload,
        }
    }

    pub fn reviewer(&self) -> &str {
        match self {
            Self::Approve { reviewer, .. }
            | Self::Reject { reviewer, .. }
            | Self::Edit { reviewer, .. } => reviewer,
        }
    }

    /// Status a breakpoint takes when resolved this way.
    pub fn status(&self) -> BreakpointStatus {
        match self {
            Self::Approve { .. } => BreakpointStatus::Approved,
            Self::Reject { .. } => BreakpointStatus::Rejected,
            Self::Edit { .. } => BreakpointStatus::Edited,
        }
    }

    /// Whether execution may continue past the breakpoint.
    pub fn allows_proceed(&self) -> bool {
        !matches!(self, Self::Reject { .. })
    }

    /// Replacement payload, if the reviewer edited.
    pub fn edited_payload(&self) -> Option<&Value> {
        match self {
            Self::Edit { payload, .. } => Some(payload),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_breakpoint_uses_spec_id_or_uuid() {
        let now = Utc::now();
        let bp = Breakpoint::new(
            BreakpointSpec::new("Review", "Proceed?").with_id("phase-1-gate"),
            "run-1",
            None,
            now,
        );
        assert_eq!(bp.breakpoint_id, "phase-1-gate");
        assert_eq!(bp.status, BreakpointStatus::Pending);
        assert!(bp.expires_at.is_none());

        let bp = Breakpoint::new(BreakpointSpec::new("Review", "Proceed?"), "run-1", None, now);
        assert_eq!(bp.breakpoint_id.len(), 36);
    }

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        let bp = Breakpoint::new(BreakpointSpec::new("t", "q"), "r", Some(60), now);
        assert!(!bp.is_expired_at(now));
        assert!(bp.is_expired_at(now + chrono::Duration::seconds(60)));
    }

    #[test]
    fn test_out_of_range_timeout_has_no_deadline() {
        let now = Utc::now();
        for secs in [100_000_000_000_000_000, u64::MAX] {
            let bp = Breakpoint::new(BreakpointSpec::new("t", "q"), "r", Some(secs), now);
            assert!(bp.expires_at.is_none());
            assert!(!bp.is_expired_at(now));
        }
    }

    #[test]
    fn test_resolution_wire_format() {
        let v = serde_json::to_value(Resolution::reject("alice", "scope too broad")).unwrap();
        assert_eq!(
            v,
            json!({"decision": "reject", "reviewer": "alice", "reason": "scope too broad"})
        );

        let parsed: Resolution =
            serde_json::from_value(json!({"decision": "approve", "reviewer": "bob"})).unwrap();
        assert_eq!(parsed, Resolution::approve("bob"));
        assert!(parsed.allows_proceed());

        let edit = Resolution::edit("carol", json!({"count": 1}));
        assert_eq!(edit.status(), BreakpointStatus::Edited);
        assert_eq!(edit.edited_payload(), Some(&json!({"count": 1})));
    }
}
