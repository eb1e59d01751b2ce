//! Ordered fan-out joins with bounded concurrency.
//!
//! Both joins return results in branch order, whatever order the branches
//! finish in. Each call gets its own limiter, so nested fan-outs cannot
//! starve each other of permits.

use std::future::Future;

use futures::future::{join_all, try_join_all};
use tokio::sync::Semaphore;

use crate::domain::{ProcflowError, Result};

/// Run every branch; the first failure fails the batch and drops the rest.
///
/// Errors are wrapped in `ProcflowError::ParallelBranch` carrying the index
/// of the failing branch.
pub async fn join_ordered<T, F>(branches: Vec<F>, limit: usize) -> Result<Vec<T>>
where
    F: Future<Output = Result<T>>,
{
    let limiter = Semaphore::new(limit.max(1));
    let limiter = &limiter;
    try_join_all(
        branches
            .into_iter()
            .enumerate()
            .map(|(index, branch)| async move {
                let _permit = limiter.acquire().await.ok();
                branch.await.map_err(|e| ProcflowError::ParallelBranch {
                    index,
                    source: Box::new(e),
                })
            }),
    )
    .await
}

/// Run every branch to completion and return each branch's own result.
pub async fn join_settled<T, F>(branches: Vec<F>, limit: usize) -> Vec<Result<T>>
where
    F: Future<Output = Result<T>>,
{
    let limiter = Semaphore::new(limit.max(1));
    let limiter = &limiter;
    join_all(branches.into_iter().map(|branch| async move {
        let _permit = limiter.acquire().await.ok();
        branch.await
    }))
    .await
}
