//! Request signing.
//!
//! Write calls carry their fields as a JSON payload authenticated with
//! HMAC-SHA256 under the published signature key, sent as a form body:
//!
//! ```text
//! ig_sig_key_version=4&signed_body=<hex hmac>.<url-encoded json payload>
//! ```
//!
//! Read calls are not signed, but ranked endpoints need the session's
//! ranking token and some need the key version in the query string. All
//! parameters are emitted in sorted key order so that equal descriptors
//! produce byte-identical query strings and bodies.
//!
//! Signing is a pure function of the descriptor and the ranking token; it
//! never sees the session's transport credentials.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use hmac::{Hmac, Mac};
use regex::{Captures, Regex};
use serde_json::Value;
use sha2::Sha256;
use thiserror::Error;
use urlencoding::encode;

use crate::descriptor::{Method, RequestDescriptor};

type HmacSha256 = Hmac<Sha256>;

pub const DEFAULT_SIG_KEY_VERSION: &str = "4";
pub const SIG_KEY_VERSION_PARAM: &str = "ig_sig_key_version";
pub const SIGNED_BODY_PARAM: &str = "signed_body";
pub const RANK_TOKEN_PARAM: &str = "rank_token";

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("invalid placeholder regex")
});

/// Errors returned by [`Signer::sign`]. All of them mean the descriptor is
/// malformed; none is worth retrying.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SignError {
    #[error("missing path parameter {name:?} for endpoint {endpoint:?}")]
    MissingPathParam { endpoint: String, name: String },

    #[error("endpoint {0:?} is ranked but no ranking token was supplied")]
    MissingRankToken(String),

    #[error("body serialization failed: {0}")]
    Serialization(String),
}

/// A request ready to hand to a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest {
    pub method: Method,

    /// Rendered endpoint path, relative to the API base.
    pub path: String,

    /// Canonical query string without the leading `?`; empty if none.
    pub query: String,

    /// Form-encoded signed body, for writes.
    pub body: Option<String>,

    /// The raw JSON payload that `body` signs, for writes.
    pub payload: Option<String>,
}

impl SignedRequest {
    /// Absolute URL under `api_base`.
    pub fn url(&self, api_base: &str) -> String {
        let base = api_base.trim_end_matches('/');
        let path = self.path.trim_start_matches('/');
        if self.query.is_empty() {
            format!("{base}/{path}")
        } else {
            format!("{base}/{path}?{}", self.query)
        }
    }
}

/// Holds the signature key and its published version.
#[derive(Clone)]
pub struct Signer {
    key: String,
    key_version: String,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("key", &"<redacted>")
            .field("key_version", &self.key_version)
            .finish()
    }
}

impl Signer {
    pub fn new(key: impl Into<String>, key_version: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            key_version: key_version.into(),
        }
    }

    pub fn key_version(&self) -> &str {
        &self.key_version
    }

    /// Derive the transport-ready request for `descriptor`.
    ///
    /// # Errors
    ///
    /// - [`SignError::MissingPathParam`]: a `{placeholder}` in the endpoint
    ///   has no matching path parameter.
    /// - [`SignError::MissingRankToken`]: the descriptor is ranked and
    ///   `rank_token` is `None` or empty.
    /// - [`SignError::Serialization`]: the body could not be encoded.
    pub fn sign(
        &self,
        descriptor: &RequestDescriptor,
        rank_token: Option<&str>,
    ) -> Result<SignedRequest, SignError> {
        let path = render_path(descriptor.endpoint(), descriptor.path_params())?;

        let mut query = descriptor.query().clone();
        if descriptor.is_ranked() {
            let token = rank_token
                .filter(|t| !t.is_empty())
                .ok_or_else(|| SignError::MissingRankToken(descriptor.endpoint().to_string()))?;
            query.insert(RANK_TOKEN_PARAM.into(), token.into());
        }

        let (body, payload) = match descriptor.method() {
            Method::Read => {
                if descriptor.includes_sig_key_version() {
                    query.insert(SIG_KEY_VERSION_PARAM.into(), self.key_version.clone());
                }
                (None, None)
            }
            Method::Write => {
                let fields = descriptor.body().cloned().unwrap_or_default();
                let payload = serde_json::to_string(&fields)
                    .map_err(|e| SignError::Serialization(e.to_string()))?;
                (Some(self.signed_body(&payload)), Some(payload))
            }
        };

        Ok(SignedRequest {
            method: descriptor.method(),
            path,
            query: canonical_query(&query),
            body,
            payload,
        })
    }

    /// Lowercase hex HMAC-SHA256 of `payload` under the signature key.
    pub fn signature(&self, payload: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.key.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Check a `signed_body` value (`<hex>.<payload>`) against the key.
    /// Returns the payload if the signature matches.
    pub fn verify<'a>(&self, signed_body: &'a str) -> Option<&'a str> {
        let (signature, payload) = signed_body.split_once('.')?;
        (self.signature(payload) == signature).then_some(payload)
    }

    fn signed_body(&self, payload: &str) -> String {
        let mut form = BTreeMap::new();
        form.insert(SIG_KEY_VERSION_PARAM, self.key_version.clone());
        form.insert(
            SIGNED_BODY_PARAM,
            format!("{}.{}", self.signature(payload), payload),
        );
        canonical_query(&form)
    }
}

/// Percent-encode `params` as `k=v` pairs joined by `&`, in key order.
pub fn canonical_query<K: AsRef<str>, V: AsRef<str>>(params: &BTreeMap<K, V>) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", encode(k.as_ref()), encode(v.as_ref())))
        .collect::<Vec<_>>()
        .join("&")
}

/// Substitute `{name}` placeholders in `template` from `params`.
pub fn render_path(
    template: &str,
    params: &BTreeMap<String, String>,
) -> Result<String, SignError> {
    let mut missing: Option<String> = None;
    let rendered = PLACEHOLDER_RE.replace_all(template, |caps: &Captures<'_>| {
        match params.get(&caps[1]) {
            Some(value) => encode(value).into_owned(),
            None => {
                missing.get_or_insert_with(|| caps[1].to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(name) => Err(SignError::MissingPathParam {
            endpoint: template.to_string(),
            name,
        }),
        None => Ok(rendered.into_owned()),
    }
}

/// Decode the JSON payload back out of a form-encoded signed body.
/// Used by fixtures and mock servers that need to inspect what was sent.
pub fn payload_fields(payload: &str) -> Option<BTreeMap<String, Value>> {
    serde_json::from_str(payload).ok()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
