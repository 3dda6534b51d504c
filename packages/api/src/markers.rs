//! Marker strings the remote API places in `message` or `error_type`.

pub const STATUS_OK: &str = "ok";
pub const STATUS_FAIL: &str = "fail";

/// The session cookie is no longer valid; a fresh login is required.
pub const LOGIN_REQUIRED: &str = "login_required";

/// The account must pass a checkpoint in the official app.
pub const CHECKPOINT_REQUIRED: &str = "checkpoint_required";
pub const CHALLENGE_REQUIRED: &str = "challenge_required";

/// The action was blocked as spam ("Action Blocked").
pub const FEEDBACK_REQUIRED: &str = "feedback_required";
pub const SENTRY_BLOCK: &str = "sentry_block";

pub const RATE_LIMIT_ERROR: &str = "rate_limit_error";

/// Prefix of the free-text message sent with throttled responses.
pub const PLEASE_WAIT: &str = "Please wait a few minutes";

/// Markers that need a human to act in the official app before the account
/// can continue.
pub const SOFT_FAILURES: [&str; 4] = [
    CHECKPOINT_REQUIRED,
    CHALLENGE_REQUIRED,
    FEEDBACK_REQUIRED,
    SENTRY_BLOCK,
];
