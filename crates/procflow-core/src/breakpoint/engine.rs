//! Waiting on a breakpoint: channel answer, timeout policy and cancellation.

use std::time::Duration;

use tracing::warn;

use super::channel::ApprovalChannel;
use super::error::BreakpointError;
use super::model::{Breakpoint, BreakpointStatus, Resolution};
use super::policy::TimeoutAction;
use crate::domain::{ProcflowError, Result};
use crate::orchestration::cancel::CancelToken;

/// Reviewer name recorded for resolutions produced by the timeout policy.
pub const TIMEOUT_REVIEWER: &str = "policy:timeout";

/// Surface `breakpoint` on `channel` and wait for its resolution.
///
/// Updates `breakpoint.status`. On timeout the status becomes `Expired` and
/// `on_timeout` decides between a synthetic approval, a synthetic rejection
/// or `BreakpointTimeout`. A channel that defers maps to
/// `ProcflowError::Suspended`.
pub async fn await_resolution(
    channel: &dyn ApprovalChannel,
    breakpoint: &mut Breakpoint,
    timeout_secs: Option<u64>,
    on_timeout: TimeoutAction,
    cancel: &CancelToken,
) -> Result<Resolution> {
    let snapshot = breakpoint.clone();
    let answered = cancel
        .run(async {
            let wait = channel.request(&snapshot);
            Ok(match timeout_secs {
                Some(secs) => tokio::time::timeout(Duration::from_secs(secs), wait)
                    .await
                    .ok(),
                None => Some(wait.await),
            })
        })
        .await?;

    match answered {
        Some(Ok(resolution)) => {
            breakpoint.status = resolution.status();
            Ok(resolution)
        }
        Some(Err(BreakpointError::Deferred { breakpoint_id })) => {
            Err(ProcflowError::Suspended { breakpoint_id })
        }
        Some(Err(e)) => Err(e.into()),
        None => {
            let secs = timeout_secs.unwrap_or(0);
            breakpoint.status = BreakpointStatus::Expired;
            warn!(
                breakpoint_id = %breakpoint.breakpoint_id,
                title = %breakpoint.title,
                timeout_secs = secs,
                action = ?on_timeout,
                "breakpoint expired"
            );
            match on_timeout {
                TimeoutAction::AutoApprove => Ok(Resolution::Approve {
                    reviewer: TIMEOUT_REVIEWER.to_string(),
                    comment: Some(format!("auto-approved after {secs}s without response")),
                }),
                TimeoutAction::AutoReject => Ok(Resolution::Reject {
                    reviewer: TIMEOUT_REVIEWER.to_string(),
                    reason: format!("no response within {secs}s"),
                }),
                TimeoutAction::Fail => Err(ProcflowError::BreakpointTimeout {
                    title: breakpoint.title.clone(),
                    timeout_secs: secs,
                }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breakpoint::fakes::RecordingApprovals;
    use crate::breakpoint::model::BreakpointSpec;
    use crate::breakpoint::channel::AutoApprove;
    use chrono::Utc;

    fn bp() -> Breakpoint {
        Breakpoint::new(BreakpointSpec::new("Review", "ok?"), "run", Some(30), Utc::now())
    }

    #[tokio::test]
    async fn test_resolution_sets_status() {
        let mut b = bp();
        let res = await_resolution(
            &AutoApprove::default(),
            &mut b,
            None,
            TimeoutAction::Fail,
            &CancelToken::new(),
        )
        .await
        .unwrap();
        assert!(res.allows_proceed());
        assert_eq!(b.status, BreakpointStatus::Approved);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_actions() {
        let silent = RecordingApprovals::never_resolving();

        let mut b = bp();
        let res = await_resolution(
            &silent,
            &mut b,
            Some(30),
            TimeoutAction::AutoApprove,
            &CancelToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(res.reviewer(), TIMEOUT_REVIEWER);
        assert!(res.allows_proceed());
        assert_eq!(b.status, BreakpointStatus::Expired);

        let mut b = bp();
        let res = await_resolution(
            &silent,
            &mut b,
            Some(30),
            TimeoutAction::AutoReject,
            &CancelToken::new(),
        )
        .await
        .unwrap();
        assert!(!res.allows_proceed());

        let mut b = bp();
        let err = await_resolution(&silent, &mut b, Some(30), TimeoutAction::Fail, &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProcflowError::BreakpointTimeout { timeout_secs: 30, .. }
        ));
        assert_eq!(silent.requests().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_blocking_wait() {
        let silent = RecordingApprovals::never_resolving();
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            trigger.cancel();
        });
        let mut b = bp();
        let err = await_resolution(&silent, &mut b, None, TimeoutAction::Fail, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ProcflowError::Cancelled));
        assert_eq!(b.status, BreakpointStatus::Pending);
    }
}
