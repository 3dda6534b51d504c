//! Request descriptors: what to call, independent of who is calling.
//!
//! A [`RequestDescriptor`] is built once with the consuming builder methods
//! and is never mutated afterwards. Derived descriptors (a page cursor, the
//! session-bound write fields) are produced as new values by
//! [`RequestDescriptor::with_cursor`] and
//! [`RequestDescriptor::with_session_fields`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Read calls go out as `GET` with a query string; write calls go out as a
/// signed form `POST`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    Read,
    Write,
}

impl Method {
    pub fn http_verb(self) -> &'static str {
        match self {
            Method::Read => "GET",
            Method::Write => "POST",
        }
    }
}

/// A category of state-changing call with its own throttle budget.
///
/// Serialises as a snake_case string (e.g. `"direct_message"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Like,
    Unlike,
    Follow,
    Unfollow,
    Comment,
    Block,
    Unblock,
    DirectMessage,
}

impl ActionKind {
    pub const ALL: [ActionKind; 8] = [
        ActionKind::Like,
        ActionKind::Unlike,
        ActionKind::Follow,
        ActionKind::Unfollow,
        ActionKind::Comment,
        ActionKind::Block,
        ActionKind::Unblock,
        ActionKind::DirectMessage,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Like => "like",
            ActionKind::Unlike => "unlike",
            ActionKind::Follow => "follow",
            ActionKind::Unfollow => "unfollow",
            ActionKind::Comment => "comment",
            ActionKind::Block => "block",
            ActionKind::Unblock => "unblock",
            ActionKind::DirectMessage => "direct_message",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActionKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| {
                format!(
                    "unknown action kind {:?}; expected one of: like, unlike, follow, \
                     unfollow, comment, block, unblock, direct_message",
                    s
                )
            })
    }
}

/// An immutable description of one logical API call.
///
/// `endpoint` is a path template relative to the API base, e.g.
/// `"media/{media_id}/like/"`. Query parameters and body fields are kept in
/// sorted maps so that two descriptors with the same logical content always
/// sign to byte-identical requests, whatever order they were built in.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    method: Method,
    endpoint: String,
    path_params: BTreeMap<String, String>,
    query: BTreeMap<String, String>,
    body: Option<BTreeMap<String, Value>>,
    ranked: bool,
    sig_key_version: bool,
    action: Option<ActionKind>,
}

impl RequestDescriptor {
    fn new(method: Method, endpoint: impl Into<String>) -> Self {
        Self {
            method,
            endpoint: endpoint.into(),
            path_params: BTreeMap::new(),
            query: BTreeMap::new(),
            body: match method {
                Method::Read => None,
                Method::Write => Some(BTreeMap::new()),
            },
            ranked: false,
            sig_key_version: false,
            action: None,
        }
    }

    /// A `GET` call to `endpoint`.
    pub fn read(endpoint: impl Into<String>) -> Self {
        Self::new(Method::Read, endpoint)
    }

    /// A signed `POST` call to `endpoint`.
    pub fn write(endpoint: impl Into<String>) -> Self {
        Self::new(Method::Write, endpoint)
    }

    /// Fill the `{name}` placeholder in the endpoint template.
    pub fn path_param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.path_params.insert(name.into(), value.to_string());
        self
    }

    pub fn query_param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.query.insert(name.into(), value.to_string());
        self
    }

    /// Add a field to the signed body. A read descriptor gains a body, which
    /// is ignored by the signer.
    pub fn body_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.body
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), value.into());
        self
    }

    /// Append the session's ranking token as `rank_token` when signed.
    pub fn ranked(mut self) -> Self {
        self.ranked = true;
        self
    }

    /// Append `ig_sig_key_version` to the query string of a read call.
    /// Write calls always carry it in the signed body.
    pub fn with_sig_key_version(mut self) -> Self {
        self.sig_key_version = true;
        self
    }

    /// Mark this write as an action subject to the throttle.
    pub fn action(mut self, kind: ActionKind) -> Self {
        self.action = Some(kind);
        self
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn path_params(&self) -> &BTreeMap<String, String> {
        &self.path_params
    }

    pub fn query(&self) -> &BTreeMap<String, String> {
        &self.query
    }

    pub fn body(&self) -> Option<&BTreeMap<String, Value>> {
        self.body.as_ref()
    }

    pub fn is_ranked(&self) -> bool {
        self.ranked
    }

    pub fn includes_sig_key_version(&self) -> bool {
        self.sig_key_version
    }

    pub fn action_kind(&self) -> Option<ActionKind> {
        self.action
    }

    /// A copy of this descriptor carrying `cursor` under `param`: in the
    /// query string for reads, in the body for writes.
    pub fn with_cursor(&self, param: &str, cursor: &str) -> Self {
        let copy = self.clone();
        match self.method {
            Method::Read => copy.query_param(param, cursor),
            Method::Write => copy.body_field(param, cursor),
        }
    }

    /// A copy of this write descriptor stamped with the `_uid` and `_uuid`
    /// fields the server expects on authenticated writes. Fields already set
    /// by the caller are kept. Reads are returned unchanged.
    pub fn with_session_fields(&self, identity_id: &str, device_guid: &str) -> Self {
        let mut copy = self.clone();
        if let (Method::Write, Some(body)) = (copy.method, copy.body.as_mut()) {
            body.entry("_uid".into())
                .or_insert_with(|| Value::from(identity_id));
            body.entry("_uuid".into())
                .or_insert_with(|| Value::from(device_guid));
        }
        copy
    }
}
