//! Human-approval breakpoints.
//!
//! A breakpoint suspends a run until an external reviewer approves, rejects
//! or edits it. Channels decide where the question is surfaced; the
//! [`BreakpointPolicy`] decides how long to wait and what an unanswered
//! breakpoint turns into. Every decision is kept as a digest-sealed
//! [`BreakpointRecord`].

pub mod channel;
pub mod engine;
mod error;
pub mod fakes;
mod model;
pub mod policy;
mod record;

pub use channel::{
    ApprovalChannel, ApprovalInbox, AutoApprove, FileApprovals, InProcessApprovals,
    PendingApproval,
};
pub use engine::{await_resolution, TIMEOUT_REVIEWER};
pub use error::{BreakpointError, BreakpointResult};
pub use model::{Breakpoint, BreakpointSpec, BreakpointStatus, Resolution};
pub use policy::{BreakpointPolicy, BreakpointRule, TimeoutAction};
pub use record::BreakpointRecord;
