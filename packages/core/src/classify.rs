//! Response classification.
//!
//! The remote API reports most outcomes with HTTP 200 and a `status` field,
//! but rate limiting and expired sessions arrive as 4xx. [`classify`] folds
//! both into one closed set of outcomes. Rules apply in order:
//!
//! 1. non-2xx carrying a rate-limit marker (or HTTP 429) → [`Classification::RateLimited`]
//! 2. 4xx carrying a login-required marker → [`Classification::AuthExpired`]
//! 3. `status == "ok"` → [`Classification::Success`]
//! 4. `status == "fail"` with a checkpoint / challenge / feedback marker →
//!    [`Classification::SoftFailure`]
//! 5. anything else → [`Classification::HardFailure`]

use std::time::Duration;

use serde_json::Value;
use shutter_api::{markers, Envelope, EnvelopeStatus};

/// Outcome category of one HTTP exchange.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    /// The decoded body of a successful call.
    Success(Value),

    /// Needs out-of-band human action (checkpoint, challenge, action block).
    SoftFailure(String),

    /// Deterministic rejection of this request.
    HardFailure(String),

    /// Throttled by the server. The hint, when known, is how long to wait.
    RateLimited { retry_after: Option<Duration> },

    /// The session is no longer valid.
    AuthExpired,
}

impl Classification {
    pub fn category(&self) -> &'static str {
        match self {
            Classification::Success(_) => "success",
            Classification::SoftFailure(_) => "soft_failure",
            Classification::HardFailure(_) => "hard_failure",
            Classification::RateLimited { .. } => "rate_limited",
            Classification::AuthExpired => "auth_expired",
        }
    }
}

/// Decode a raw response body. Bodies that are not JSON decode to `null`,
/// which classifies as a failure.
pub fn decode_body(raw: &[u8]) -> Value {
    serde_json::from_slice(raw).unwrap_or(Value::Null)
}

/// Classify an HTTP status and decoded body. Pure and deterministic.
pub fn classify(status: u16, body: Value) -> Classification {
    let envelope = Envelope::from_body(&body);
    let is_2xx = (200..300).contains(&status);

    if !is_2xx && is_rate_limited(status, &envelope) {
        return Classification::RateLimited { retry_after: None };
    }

    if (400..500).contains(&status) && is_login_required(&envelope) {
        return Classification::AuthExpired;
    }

    match envelope.status() {
        EnvelopeStatus::Ok => Classification::Success(body),
        EnvelopeStatus::Fail => match soft_marker(&envelope) {
            Some(marker) => Classification::SoftFailure(marker),
            None => Classification::HardFailure(
                envelope.reason().unwrap_or_else(|| format!("http {status}")),
            ),
        },
    }
}

fn is_rate_limited(status: u16, envelope: &Envelope) -> bool {
    status == 429
        || envelope.has_marker(markers::RATE_LIMIT_ERROR)
        || envelope
            .message
            .as_deref()
            .is_some_and(|m| m.starts_with(markers::PLEASE_WAIT))
}

fn is_login_required(envelope: &Envelope) -> bool {
    envelope.has_marker(markers::LOGIN_REQUIRED) || envelope.logout_reason.is_some()
}

/// The marker that makes this failure soft, if any.
fn soft_marker(envelope: &Envelope) -> Option<String> {
    if let Some(marker) = markers::SOFT_FAILURES
        .iter()
        .find(|marker| envelope.has_marker(marker))
    {
        return Some((*marker).to_string());
    }
    if envelope.challenge.is_some() {
        return Some(markers::CHALLENGE_REQUIRED.to_string());
    }
    if envelope.checkpoint_url.is_some() {
        return Some(markers::CHECKPOINT_REQUIRED.to_string());
    }
    if envelope.spam {
        return Some(markers::FEEDBACK_REQUIRED.to_string());
    }
    None
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
