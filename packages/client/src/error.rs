//! Caller-visible error types.

use std::time::Duration;

use shutter::{ActionKind, SignError};

use crate::transport::TransportError;

/// Why a logical call did not produce a successful body.
///
/// Every variant except [`CallError::Transport`] corresponds to one outcome
/// category of the response classifier or to a local decision of the retry
/// controller. Nothing here is retried by the caller automatically.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CallError {
    /// The descriptor could not be signed. Programmer error.
    #[error("malformed descriptor: {0}")]
    MalformedDescriptor(#[from] SignError),

    /// The session expired and re-authentication failed or was not possible.
    #[error("session expired and re-authentication failed")]
    AuthExpired,

    /// Still rate limited after the configured attempts.
    #[error("rate limited after {attempts} attempts")]
    RateLimited {
        attempts: u32,
        retry_after: Option<Duration>,
    },

    /// Needs out-of-band human action (checkpoint, challenge, action block).
    #[error("soft failure: {0}")]
    SoftFailure(String),

    /// The server rejected this request deterministically.
    #[error("hard failure: {0}")]
    HardFailure(String),

    /// Attempt or wall-clock ceiling reached without a classifiable response.
    #[error("timed out after {attempts} attempts")]
    Timeout { attempts: u32 },

    /// A transport failure that is not worth retrying.
    #[error("transport error: {0}")]
    Transport(TransportError),

    /// Cancelled by the caller.
    #[error("cancelled")]
    Cancelled,

    /// The session was logged out while the call was in flight.
    #[error("session is no longer active")]
    SessionExpired,

    /// The action throttle refused a write.
    #[error("{kind} throttled, retry in {wait:?}")]
    Throttled { kind: ActionKind, wait: Duration },

    /// A caller-held permit was offered for a call of another action kind.
    /// The permit is released and nothing is sent.
    #[error("{permit} permit cannot be spent on a {action:?} call")]
    PermitMismatch {
        permit: ActionKind,
        action: Option<ActionKind>,
    },
}

impl CallError {
    /// Stable snake_case name, used in logs.
    pub fn category(&self) -> &'static str {
        match self {
            CallError::MalformedDescriptor(_) => "malformed_descriptor",
            CallError::AuthExpired => "auth_expired",
            CallError::RateLimited { .. } => "rate_limited",
            CallError::SoftFailure(_) => "soft_failure",
            CallError::HardFailure(_) => "hard_failure",
            CallError::Timeout { .. } => "timeout",
            CallError::Transport(_) => "transport",
            CallError::Cancelled => "cancelled",
            CallError::SessionExpired => "session_expired",
            CallError::Throttled { .. } => "throttled",
            CallError::PermitMismatch { .. } => "permit_mismatch",
        }
    }
}

/// Errors from login, logout and refresh.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AuthError {
    /// The server refused the credentials.
    #[error("login rejected: {0}")]
    Rejected(String),

    /// The server demands a challenge or checkpoint before login.
    #[error("login requires verification: {0}")]
    Challenge(String),

    /// The server throttled the login attempt.
    #[error("login rate limited")]
    RateLimited,

    /// Login succeeded but the response lacked the logged-in user.
    #[error("login response missing {0}")]
    MalformedResponse(&'static str),

    /// The credential store has no credential for this (re-)login.
    #[error("no credentials available")]
    NoCredentials,

    /// Re-login produced a session for a different account.
    #[error("re-login returned identity {got}, expected {expected}")]
    IdentityMismatch { expected: String, got: String },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Sign(#[from] SignError),
}

impl From<crate::throttle::Denied> for CallError {
    fn from(denied: crate::throttle::Denied) -> Self {
        CallError::Throttled {
            kind: denied.kind,
            wait: denied.wait,
        }
    }
}
