//! Cooperative cancellation shared by every suspension point of a run.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

use crate::domain::{ProcflowError, Result};

/// Cloneable cancellation signal.
///
/// Cancelling is sticky: once set, every current and future waiter observes
/// it.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only returns on cancel.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Fail fast if already cancelled.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(ProcflowError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Run `fut` unless the token fires first.
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(ProcflowError::Cancelled),
            out = fut => out,
        }
    }
}
