//! Error types for approval channels.

/// Errors produced while waiting on an approval channel.
#[derive(Debug, thiserror::Error)]
pub enum BreakpointError {
    #[error("approval channel closed before breakpoint {breakpoint_id} was resolved")]
    ChannelClosed { breakpoint_id: String },

    #[error("breakpoint {breakpoint_id} is not resolved yet")]
    Deferred { breakpoint_id: String },

    #[error("malformed response for breakpoint {breakpoint_id}: {reason}")]
    MalformedResponse {
        breakpoint_id: String,
        reason: String,
    },

    #[error("breakpoint not found: {0}")]
    NotFound(String),

    #[error("invalid breakpoint id: {0}")]
    InvalidId(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for approval channel operations.
pub type BreakpointResult<T> = std::result::Result<T, BreakpointError>;
