//! Approval channels: where breakpoints are surfaced and answered.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::error::{BreakpointError, BreakpointResult};
use super::model::{Breakpoint, Resolution};
use crate::executor::file_exchange::write_file_atomic;

/// External approval system.
///
/// `request` surfaces the breakpoint and returns once a reviewer has answered.
/// Timeouts and cancellation are applied by the caller.
#[async_trait]
pub trait ApprovalChannel: Send + Sync {
    async fn request(&self, breakpoint: &Breakpoint) -> BreakpointResult<Resolution>;
}

// ---------------------------------------------------------------------------
// AutoApprove
// ---------------------------------------------------------------------------

/// Approves everything immediately. For unattended runs.
#[derive(Debug, Clone)]
pub struct AutoApprove {
    reviewer: String,
}

impl Default for AutoApprove {
    fn default() -> Self {
        Self::new("auto")
    }
}

impl AutoApprove {
    pub fn new(reviewer: impl Into<String>) -> Self {
        Self {
            reviewer: reviewer.into(),
        }
    }
}

#[async_trait]
impl ApprovalChannel for AutoApprove {
    async fn request(&self, breakpoint: &Breakpoint) -> BreakpointResult<Resolution> {
        debug!(breakpoint_id = %breakpoint.breakpoint_id, "auto-approving breakpoint");
        Ok(Resolution::approve(self.reviewer.clone()))
    }
}

// ---------------------------------------------------------------------------
// InProcessApprovals
// ---------------------------------------------------------------------------

/// A breakpoint waiting for an answer from an embedding application.
#[derive(Debug)]
pub struct PendingApproval {
    pub breakpoint: Breakpoint,
    reply: oneshot::Sender<Resolution>,
}

impl PendingApproval {
    /// Answer the breakpoint. Returns `false` if the run stopped waiting.
    pub fn resolve(self, resolution: Resolution) -> bool {
        self.reply.send(resolution).is_ok()
    }

    pub fn approve(self, reviewer: &str) -> bool {
        self.resolve(Resolution::approve(reviewer))
    }

    pub fn reject(self, reviewer: &str, reason: &str) -> bool {
        self.resolve(Resolution::reject(reviewer, reason))
    }

    pub fn edit(self, reviewer: &str, payload: serde_json::Value) -> bool {
        self.resolve(Resolution::edit(reviewer, payload))
    }
}

/// Receiving half of [`InProcessApprovals`].
#[derive(Debug)]
pub struct ApprovalInbox {
    rx: mpsc::Receiver<PendingApproval>,
}

impl ApprovalInbox {
    /// Next breakpoint to answer; `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<PendingApproval> {
        self.rx.recv().await
    }
}

/// Queue of breakpoints answered by code in the same process (UI, bot, test).
#[derive(Debug, Clone)]
pub struct InProcessApprovals {
    tx: mpsc::Sender<PendingApproval>,
}

impl InProcessApprovals {
    pub fn channel(buffer: usize) -> (Self, ApprovalInbox) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, ApprovalInbox { rx })
    }
}

#[async_trait]
impl ApprovalChannel for InProcessApprovals {
    async fn request(&self, breakpoint: &Breakpoint) -> BreakpointResult<Resolution> {
        let closed = || BreakpointError::ChannelClosed {
            breakpoint_id: breakpoint.breakpoint_id.clone(),
        };
        let (reply, answer) = oneshot::channel();
        self.tx
            .send(PendingApproval {
                breakpoint: breakpoint.clone(),
                reply,
            })
            .await
            .map_err(|_| closed())?;
        answer.await.map_err(|_| closed())
    }
}

// ---------------------------------------------------------------------------
// FileApprovals
// ---------------------------------------------------------------------------

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
const REQUEST_FILE: &str = "request.json";
const RESPONSE_FILE: &str = "response.json";

/// Request/response files under `<root>/breakpoints/<id>/`.
///
/// The run writes `request.json`; a reviewer (or `procflow approve`) writes
/// `response.json`. A response written while no process was waiting is
/// picked up when the run is resumed and raises the same breakpoint id.
#[derive(Debug, Clone)]
pub struct FileApprovals {
    root: PathBuf,
    poll_interval: Duration,
    wait: bool,
}

impl FileApprovals {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            wait: true,
        }
    }

    /// Do not wait for a response: an unanswered breakpoint parks the run
    /// (`BreakpointError::Deferred`) so it can be resumed later.
    pub fn detached(mut self) -> Self {
        self.wait = false;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn breakpoint_dir(root: &Path, breakpoint_id: &str) -> BreakpointResult<PathBuf> {
        let valid = !breakpoint_id.is_empty()
            && breakpoint_id != "."
            && breakpoint_id != ".."
            && breakpoint_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(BreakpointError::InvalidId(breakpoint_id.to_string()));
        }
        Ok(root.join("breakpoints").join(breakpoint_id))
    }

    pub fn request_path(root: &Path, breakpoint_id: &str) -> BreakpointResult<PathBuf> {
        Ok(Self::breakpoint_dir(root, breakpoint_id)?.join(REQUEST_FILE))
    }

    pub fn response_path(root: &Path, breakpoint_id: &str) -> BreakpointResult<PathBuf> {
        Ok(Self::breakpoint_dir(root, breakpoint_id)?.join(RESPONSE_FILE))
    }

    /// Read a raised breakpoint.
    pub async fn read_request(root: &Path, breakpoint_id: &str) -> BreakpointResult<Breakpoint> {
        let path = Self::request_path(root, breakpoint_id)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BreakpointError::NotFound(breakpoint_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Answer a raised breakpoint.
    pub async fn respond(
        root: &Path,
        breakpoint_id: &str,
        resolution: &Resolution,
    ) -> BreakpointResult<()> {
        Self::read_request(root, breakpoint_id).await?;
        let path = Self::response_path(root, breakpoint_id)?;
        write_file_atomic(&path, &serde_json::to_vec_pretty(resolution)?).await?;
        Ok(())
    }

    /// Breakpoints that have a request but no response, oldest first.
    pub async fn pending(root: &Path) -> BreakpointResult<Vec<Breakpoint>> {
        let dir = root.join("breakpoints");
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut pending = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.join(RESPONSE_FILE).exists() || !path.join(REQUEST_FILE).exists() {
                continue;
            }
            let bytes = tokio::fs::read(path.join(REQUEST_FILE)).await?;
            pending.push(serde_json::from_slice::<Breakpoint>(&bytes)?);
        }
        pending.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.breakpoint_id.cmp(&b.breakpoint_id))
        });
        Ok(pending)
    }

    async fn read_response(&self, breakpoint_id: &str) -> BreakpointResult<Option<Resolution>> {
        let path = Self::response_path(&self.root, breakpoint_id)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                BreakpointError::MalformedResponse {
                    breakpoint_id: breakpoint_id.to_string(),
                    reason: e.to_string(),
                }
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ApprovalChannel for FileApprovals {
    async fn request(&self, breakpoint: &Breakpoint) -> BreakpointResult<Resolution> {
        let id = &breakpoint.breakpoint_id;
        let request = Self::request_path(&self.root, id)?;
        write_file_atomic(&request, &serde_json::to_vec_pretty(breakpoint)?).await?;
        debug!(breakpoint_id = %id, path = %request.display(), "breakpoint request written");

        loop {
            if let Some(resolution) = self.read_response(id).await? {
                return Ok(resolution);
            }
            if !self.wait {
                return Err(BreakpointError::Deferred {
                    breakpoint_id: id.clone(),
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
