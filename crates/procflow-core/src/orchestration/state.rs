//! In-process state machine of one pipeline run.

use std::fmt;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::domain::{ProcflowError, Result};

/// Lifecycle state of a run inside this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Started,
    Running,
    Suspended,
    Completed,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn can_transition_to(self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Started, Running)
                | (Started, Failed)
                | (Started, Cancelled)
                | (Running, Suspended)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Suspended, Running)
                | (Suspended, Failed)
                | (Suspended, Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Started => "started",
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Thread-safe holder enforcing [`RunState::can_transition_to`].
///
/// Concurrent breakpoints (raised from parallel branches) share one
/// `Suspended` state: the run suspends on the first and resumes after the
/// last one resolves.
#[derive(Debug)]
pub struct RunStateMachine {
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    state: RunState,
    open_breakpoints: usize,
}

/// What `suspend` / `resume` actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    /// The state changed.
    Moved,
    /// Another breakpoint still holds the run suspended.
    Unchanged,
}

impl Default for RunStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStateMachine {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: RunState::Started,
                open_breakpoints: 0,
            }),
        }
    }

    pub fn state(&self) -> RunState {
        self.lock().state
    }

    /// Move to `next`, rejecting illegal transitions.
    pub fn transition(&self, next: RunState) -> Result<()> {
        let mut inner = self.lock();
        Self::step(&mut inner, next)
    }

    /// Enter `Suspended` for one more open breakpoint.
    pub fn suspend(&self) -> Result<Edge> {
        let mut inner = self.lock();
        if inner.open_breakpoints > 0 {
            inner.open_breakpoints += 1;
            return Ok(Edge::Unchanged);
        }
        Self::step(&mut inner, RunState::Suspended)?;
        inner.open_breakpoints = 1;
        Ok(Edge::Moved)
    }

    /// Close one breakpoint; back to `Running` once none remain open.
    pub fn resume(&self) -> Result<Edge> {
        let mut inner = self.lock();
        if inner.open_breakpoints > 1 {
            inner.open_breakpoints -= 1;
            return Ok(Edge::Unchanged);
        }
        Self::step(&mut inner, RunState::Running)?;
        inner.open_breakpoints = 0;
        Ok(Edge::Moved)
    }

    fn step(inner: &mut Inner, next: RunState) -> Result<()> {
        if !inner.state.can_transition_to(next) {
            return Err(ProcflowError::InvalidTransition {
                from: inner.state.to_string(),
                to: next.to_string(),
            });
        }
        inner.state = next;
        if next.is_terminal() {
            inner.open_breakpoints = 0;
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}
