//! Audit record for a resolved breakpoint.

use chrono::{DateTime, Utc};
use procflow_state::ContentDigest;
use serde::{Deserialize, Serialize};

use super::model::Breakpoint;
use super::model::Resolution;
use crate::domain::Result;

/// Immutable audit entry written to the run ledger for every breakpoint
/// that reached a decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakpointRecord {
    pub breakpoint: Breakpoint,
    /// `None` when the breakpoint expired with `TimeoutAction::Fail`.
    pub resolution: Option<Resolution>,
    pub resolved_at: DateTime<Utc>,
    /// SHA-256 over breakpoint, resolution and timestamp.
    pub content_digest: ContentDigest,
}

impl BreakpointRecord {
    pub fn finalize(
        breakpoint: Breakpoint,
        resolution: Option<Resolution>,
        resolved_at: DateTime<Utc>,
    ) -> Result<Self> {
        let content_digest = Self::compute_digest(&breakpoint, resolution.as_ref(), resolved_at)?;
        Ok(Self {
            breakpoint,
            resolution,
            resolved_at,
            content_digest,
        })
    }

    fn compute_digest(
        breakpoint: &Breakpoint,
        resolution: Option<&Resolution>,
        resolved_at: DateTime<Utc>,
    ) -> Result<ContentDigest> {
        let payload = serde_json::json!({
            "breakpoint": breakpoint,
            "resolution": resolution,
            "resolved_at": resolved_at.to_rfc3339(),
        });
        Ok(ContentDigest::of_json(&payload)?)
    }

    /// Recompute the digest and compare.
    pub fn verify_integrity(&self) -> bool {
        Self::compute_digest(&self.breakpoint, self.resolution.as_ref(), self.resolved_at)
            .map(|d| d == self.content_digest)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breakpoint::model::{BreakpointSpec, BreakpointStatus};

    fn resolved() -> BreakpointRecord {
        let mut bp = Breakpoint::new(
            BreakpointSpec::new("Deploy", "Ship it?").with_id("bp-1"),
            "run-9",
            None,
            Utc::now(),
        );
        bp.status = BreakpointStatus::Approved;
        BreakpointRecord::finalize(bp, Some(Resolution::approve("alice")), Utc::now()).unwrap()
    }

    #[test]
    fn test_record_verifies() {
        assert!(resolved().verify_integrity());
    }

    #[test]
    fn test_tampering_breaks_integrity() {
        let mut record = resolved();
        record.resolution = Some(Resolution::reject("mallory", "no"));
        assert!(!record.verify_integrity());
    }

    #[test]
    fn test_record_serde_round_trip_keeps_digest_valid() {
        let record = resolved();
        let json = serde_json::to_string(&record).unwrap();
        let back: BreakpointRecord = serde_json::from_str(&json).unwrap();
        assert!(back.verify_integrity());
        assert_eq!(back.content_digest, record.content_digest);
    }
}
