//! The status envelope shared by every response body.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::markers;

/// Logical outcome carried in the `status` field.
///
/// A missing or unrecognised `status` is treated as [`EnvelopeStatus::Fail`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeStatus {
    Ok,
    Fail,
}

/// The outcome-bearing fields of a response body.
///
/// ```json
/// { "status": "fail", "message": "challenge_required", "challenge": { "url": "..." } }
/// ```
///
/// Endpoint payloads (`items`, `users`, `next_max_id`, ...) are not part of
/// the envelope; they stay in the raw body.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,

    /// Set together with `feedback_required` when an action was blocked.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub spam: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenge: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logout_reason: Option<Value>,
}

impl Envelope {
    /// An envelope with `status: "ok"`.
    pub fn ok() -> Self {
        Self {
            status: Some(markers::STATUS_OK.into()),
            ..Default::default()
        }
    }

    /// An envelope with `status: "fail"` and the given message.
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            status: Some(markers::STATUS_FAIL.into()),
            message: Some(message.into()),
            ..Default::default()
        }
    }

    /// Extract the envelope from an arbitrary decoded body.
    ///
    /// Lenient: fields with an unexpected JSON type are ignored rather than
    /// failing the whole extraction, and a non-object body yields an empty
    /// envelope (which reads as `fail`).
    pub fn from_body(body: &Value) -> Self {
        let text = |key: &str| body.get(key).and_then(Value::as_str).map(str::to_owned);
        let present = |key: &str| body.get(key).filter(|v| !v.is_null()).cloned();

        Self {
            status: text("status"),
            message: text("message"),
            error_type: text("error_type"),
            spam: body.get("spam").and_then(Value::as_bool).unwrap_or(false),
            challenge: present("challenge"),
            checkpoint_url: text("checkpoint_url"),
            logout_reason: present("logout_reason"),
        }
    }

    pub fn status(&self) -> EnvelopeStatus {
        match self.status.as_deref() {
            Some(markers::STATUS_OK) => EnvelopeStatus::Ok,
            _ => EnvelopeStatus::Fail,
        }
    }

    /// True if `marker` appears as the `message` or the `error_type`.
    pub fn has_marker(&self, marker: &str) -> bool {
        self.message.as_deref() == Some(marker) || self.error_type.as_deref() == Some(marker)
    }

    /// Best human-readable reason for a failed envelope.
    pub fn reason(&self) -> Option<String> {
        self.message
            .clone()
            .filter(|m| !m.is_empty())
            .or_else(|| self.error_type.clone())
    }
}
