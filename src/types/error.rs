use anyhow::Error;
use http::StatusCode;
use thiserror::Error;

/// Error kinds surfaced by the Riak client and the deletion pipeline.
///
/// Store-level outcomes (unknown key, precondition failed, ...) are distinct
/// variants so callers can branch on them after an `anyhow` round trip via
/// `downcast_ref`.
///
/// ## Exit Codes
///
/// Each variant maps to an exit code (via `exit_code()`):
/// - 0: Non-error conditions (Cancelled)
/// - 1: General errors (transport, protocol, store errors)
/// - 2: Configuration errors (InvalidConfig, UnsupportedScheme)
/// - 3: Partial failure (some keys deleted, some failed)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RiakError {
    /// Dial or I/O failure. Never retried by the dispatcher itself.
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed multipart or JSON stream.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// 404 from a key operation.
    #[error("Unknown key")]
    UnknownKey,

    /// 412 from a conditional write.
    #[error("Precondition failed")]
    PreconditionFailed,

    /// 400.
    #[error("Bad request")]
    BadRequest,

    /// 406: the requested representation cannot be produced.
    #[error("Unacceptable representation requested")]
    Unacceptable,

    /// 503.
    #[error("Service unavailable")]
    ServiceUnavailable,

    /// Status code absent from the outcome table.
    #[error("unhandled response ({context}): status {status}")]
    UnhandledResponse { status: u16, context: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Operation cancelled by user")]
    Cancelled,

    #[error("Partial failure: {deleted} deleted, {failed} failed")]
    PartialFailure { deleted: u64, failed: u64 },
}

impl RiakError {
    /// Build an unhandled-response error for the given status.
    pub fn unhandled(status: StatusCode, context: impl Into<String>) -> Self {
        RiakError::UnhandledResponse {
            status: status.as_u16(),
            context: context.into(),
        }
    }

    /// Get the appropriate process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            RiakError::Cancelled => 0,
            RiakError::InvalidConfig(_) | RiakError::UnsupportedScheme(_) => 2,
            RiakError::PartialFailure { .. } => 3,
            _ => 1,
        }
    }

    /// Transport failures and 503 may succeed on a later attempt.
    /// 4xx outcomes never do.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RiakError::Transport(_) | RiakError::ServiceUnavailable
        )
    }
}

/// Check if an anyhow::Error wraps a cancellation error.
pub fn is_cancelled_error(e: &Error) -> bool {
    if let Some(err) = e.downcast_ref::<RiakError>() {
        return *err == RiakError::Cancelled;
    }
    false
}

/// Check if an anyhow::Error wraps an unknown-key (404) outcome.
pub fn is_unknown_key_error(e: &Error) -> bool {
    if let Some(err) = e.downcast_ref::<RiakError>() {
        return *err == RiakError::UnknownKey;
    }
    false
}

/// Check if an anyhow::Error wraps a retryable [`RiakError`].
pub fn is_retryable_error(e: &Error) -> bool {
    e.downcast_ref::<RiakError>()
        .is_some_and(RiakError::is_retryable)
}

/// Extract the exit code from an anyhow::Error, defaulting to 1.
pub fn exit_code_from_error(e: &Error) -> i32 {
    if let Some(err) = e.downcast_ref::<RiakError>() {
        return err.exit_code();
    }
    1
}
