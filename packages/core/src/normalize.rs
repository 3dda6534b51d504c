//! Entity normalisation.
//!
//! The remote API is inconsistent about identifier types: the same user id
//! arrives as a number from one endpoint and a string from another. These
//! functions reduce raw media, user and comment objects to a
//! [`NormalizedItem`] whose ids are always strings, so ids from different
//! endpoints compare equal.
//!
//! Missing optional fields (text, counts) are simply left out. An item with
//! no recoverable id or owner yields `None`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which normaliser applies to the items of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Media,
    User,
    Comment,
}

/// The minimal typed view of a remote object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedItem {
    pub id: String,

    /// The owning user. For a user item, the user itself.
    pub owner_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Caption for media, body for comments, full name for users.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub counts: BTreeMap<String, u64>,
}

const COUNT_KEYS: [&str; 9] = [
    "like_count",
    "comment_count",
    "view_count",
    "play_count",
    "follower_count",
    "following_count",
    "media_count",
    "comment_like_count",
    "child_comment_count",
];

/// Normalise `raw` according to `kind`.
pub fn normalize(kind: ItemKind, raw: &Value) -> Option<NormalizedItem> {
    match kind {
        ItemKind::Media => normalize_media(raw),
        ItemKind::User => normalize_user(raw),
        ItemKind::Comment => normalize_comment(raw),
    }
}

/// A media item. Timeline entries wrapped as `{"media_or_ad": {...}}` are
/// unwrapped first.
pub fn normalize_media(raw: &Value) -> Option<NormalizedItem> {
    let raw = raw.get("media_or_ad").unwrap_or(raw);

    let id = raw
        .get("pk")
        .and_then(id_string)
        .or_else(|| raw.get("id").and_then(id_string).map(|id| media_pk(&id)))?;
    let owner = raw.get("user").or_else(|| raw.get("owner"));
    let owner_id = owner
        .and_then(|u| u.get("pk"))
        .and_then(id_string)
        .or_else(|| raw.get("user_id").and_then(id_string))?;

    Some(NormalizedItem {
        id,
        owner_id,
        username: owner.and_then(|u| text_field(u, "username")),
        text: raw.get("caption").and_then(|c| text_field(c, "text")),
        counts: counts(raw),
    })
}

pub fn normalize_user(raw: &Value) -> Option<NormalizedItem> {
    // Some list endpoints wrap each entry as {"user": {...}}.
    let raw = match raw.get("user") {
        Some(inner) if raw.get("pk").is_none() => inner,
        _ => raw,
    };
    let id = raw
        .get("pk")
        .and_then(id_string)
        .or_else(|| raw.get("id").and_then(id_string))?;

    Some(NormalizedItem {
        owner_id: id.clone(),
        id,
        username: text_field(raw, "username"),
        text: text_field(raw, "full_name"),
        counts: counts(raw),
    })
}

pub fn normalize_comment(raw: &Value) -> Option<NormalizedItem> {
    let id = raw.get("pk").and_then(id_string)?;
    let user = raw.get("user");
    let owner_id = user
        .and_then(|u| u.get("pk"))
        .and_then(id_string)
        .or_else(|| raw.get("user_id").and_then(id_string))?;

    Some(NormalizedItem {
        id,
        owner_id,
        username: user.and_then(|u| text_field(u, "username")),
        text: text_field(raw, "text"),
        counts: counts(raw),
    })
}

/// String form of a numeric or string identifier.
pub fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// `"<media pk>_<owner pk>"` → `"<media pk>"`.
fn media_pk(id: &str) -> String {
    id.split_once('_').map_or(id, |(pk, _)| pk).to_string()
}

fn text_field(raw: &Value, key: &str) -> Option<String> {
    raw.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

fn counts(raw: &Value) -> BTreeMap<String, u64> {
    COUNT_KEYS
        .iter()
        .filter_map(|key| raw.get(*key).and_then(Value::as_u64).map(|n| (key.to_string(), n)))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
