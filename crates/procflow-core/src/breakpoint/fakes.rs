//! Recording approval channel for tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use super::channel::ApprovalChannel;
use super::error::{BreakpointError, BreakpointResult};
use super::model::{Breakpoint, Resolution};

#[derive(Debug, Default)]
struct Inner {
    scripted: VecDeque<Resolution>,
    requests: Vec<Breakpoint>,
}

/// Answers breakpoints from a queue and records every request.
///
/// Once the queue is empty the fallback applies: a fixed resolution, or
/// (for [`RecordingApprovals::never_resolving`]) a wait that never ends.
#[derive(Debug)]
pub struct RecordingApprovals {
    inner: Mutex<Inner>,
    fallback: Option<Resolution>,
}

impl Default for RecordingApprovals {
    fn default() -> Self {
        Self::approving()
    }
}

impl RecordingApprovals {
    /// Approve everything as reviewer `"test"`.
    pub fn approving() -> Self {
        Self::with_fallback(Some(Resolution::approve("test")))
    }

    /// Never answer; the caller's timeout or cancellation decides.
    pub fn never_resolving() -> Self {
        Self::with_fallback(None)
    }

    fn with_fallback(fallback: Option<Resolution>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            fallback,
        }
    }

    /// Queue the next answer (builder pattern).
    pub fn then(self, resolution: Resolution) -> Self {
        self.inner.lock().unwrap().scripted.push_back(resolution);
        self
    }

    /// Every breakpoint surfaced so far, in request order.
    pub fn requests(&self) -> Vec<Breakpoint> {
        self.inner.lock().unwrap().requests.clone()
    }

    pub fn count(&self) -> usize {
        self.inner.lock().unwrap().requests.len()
    }
}

#[async_trait]
impl ApprovalChannel for RecordingApprovals {
    async fn request(&self, breakpoint: &Breakpoint) -> BreakpointResult<Resolution> {
        let next = {
            let mut inner = self.inner.lock().unwrap();
            inner.requests.push(breakpoint.clone());
            inner.scripted.pop_front()
        };
        match next.or_else(|| self.fallback.clone()) {
            Some(resolution) => Ok(resolution),
            None => {
                std::future::pending::<()>().await;
                Err(BreakpointError::ChannelClosed {
                    breakpoint_id: breakpoint.breakpoint_id.clone(),
                })
            }
        }
    }
}
