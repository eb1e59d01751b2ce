//! Breakpoint timeout rules.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// What happens when nobody answers a breakpoint in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutAction {
    AutoApprove,
    AutoReject,
    /// Abort the run with `BreakpointTimeout`.
    Fail,
}

impl FromStr for TimeoutAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approve" | "auto_approve" => Ok(Self::AutoApprove),
            "reject" | "auto_reject" => Ok(Self::AutoReject),
            "fail" => Ok(Self::Fail),
            other => Err(format!(
                "unknown timeout action '{other}' (expected approve, reject or fail)"
            )),
        }
    }
}

/// Maps a title pattern to a timeout and timeout action.
///
/// Rules are evaluated first-match-wins against breakpoint titles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakpointRule {
    /// Substring matched against the breakpoint title.
    pub title_pattern: String,
    /// `None` means wait indefinitely.
    pub timeout_secs: Option<u64>,
    pub on_timeout: TimeoutAction,
}

impl BreakpointRule {
    pub fn new(
        title_pattern: impl Into<String>,
        timeout_secs: Option<u64>,
        on_timeout: TimeoutAction,
    ) -> Self {
        Self {
            title_pattern: title_pattern.into(),
            timeout_secs,
            on_timeout,
        }
    }

    pub fn matches(&self, title: &str) -> bool {
        title.contains(&self.title_pattern)
    }
}

/// Ordered rules plus a default for unmatched titles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakpointPolicy {
    pub rules: Vec<BreakpointRule>,
    pub default_timeout_secs: Option<u64>,
    pub default_action: TimeoutAction,
}

impl Default for BreakpointPolicy {
    fn default() -> Self {
        Self::blocking()
    }
}

impl BreakpointPolicy {
    /// Wait for every breakpoint until it is resolved or the run is cancelled.
    pub fn blocking() -> Self {
        Self {
            rules: Vec::new(),
            default_timeout_secs: None,
            default_action: TimeoutAction::Fail,
        }
    }

    /// Apply `action` to any breakpoint left unanswered for `secs`.
    pub fn with_default_timeout(mut self, secs: u64, action: TimeoutAction) -> Self {
        self.default_timeout_secs = Some(secs);
        self.default_action = action;
        self
    }

    /// Append a rule (builder pattern).
    pub fn with_rule(mut self, rule: BreakpointRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Timeout and action for a breakpoint title.
    pub fn resolve(&self, title: &str) -> (Option<u64>, TimeoutAction) {
        self.rules
            .iter()
            .find(|rule| rule.matches(title))
            .map(|rule| (rule.timeout_secs, rule.on_timeout))
            .unwrap_or((self.default_timeout_secs, self.default_action))
    }
}
