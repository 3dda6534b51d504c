//! Cursor-bearing endpoints.
//!
//! An [`EndpointSpec`] tells the paginator how to ask for the next page and
//! where to find the items, the next cursor and the more-available flag in
//! each response. Endpoints disagree on all three:
//!
//! | Endpoint family | items | cursor | more flag |
//! |---|---|---|---|
//! | feeds (`feed/timeline/`, `feed/user/{id}/`) | `items` | `next_max_id` | `more_available` |
//! | user lists (`friendships/{id}/followers/`) | `users` | `next_max_id` | `big_list` |
//! | user search (`users/search/`) | `users` | `next_max_id` | `has_more` |
//! | comments (`media/{id}/comments/`) | `comments` | `next_max_id` | `has_more_comments` |

use serde_json::Value;

use crate::descriptor::RequestDescriptor;
use crate::normalize::{id_string, ItemKind};

/// How to page through one endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointSpec {
    descriptor: RequestDescriptor,
    kind: ItemKind,
    cursor_param: String,
    items_key: String,
    cursor_key: String,
    more_key: String,
}

/// What one response contributes to the sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct PageParts {
    pub items: Vec<Value>,
    pub next_cursor: Option<String>,
    pub more_available: bool,
}

impl EndpointSpec {
    /// A spec with feed-style keys: `items`, `max_id` / `next_max_id`,
    /// `more_available`.
    pub fn new(descriptor: RequestDescriptor, kind: ItemKind) -> Self {
        Self {
            descriptor,
            kind,
            cursor_param: "max_id".into(),
            items_key: "items".into(),
            cursor_key: "next_max_id".into(),
            more_key: "more_available".into(),
        }
    }

    pub fn media_feed(descriptor: RequestDescriptor) -> Self {
        Self::new(descriptor, ItemKind::Media)
    }

    /// Followers / following lists.
    pub fn user_list(descriptor: RequestDescriptor) -> Self {
        Self::new(descriptor, ItemKind::User)
            .items_key("users")
            .more_key("big_list")
    }

    pub fn user_search(descriptor: RequestDescriptor) -> Self {
        Self::new(descriptor, ItemKind::User)
            .items_key("users")
            .more_key("has_more")
    }

    pub fn comments(descriptor: RequestDescriptor) -> Self {
        Self::new(descriptor, ItemKind::Comment)
            .items_key("comments")
            .more_key("has_more_comments")
    }

    /// Name of the request parameter that carries the cursor.
    pub fn cursor_param(mut self, name: impl Into<String>) -> Self {
        self.cursor_param = name.into();
        self
    }

    pub fn items_key(mut self, key: impl Into<String>) -> Self {
        self.items_key = key.into();
        self
    }

    /// Response key holding the next cursor.
    pub fn cursor_key(mut self, key: impl Into<String>) -> Self {
        self.cursor_key = key.into();
        self
    }

    pub fn more_key(mut self, key: impl Into<String>) -> Self {
        self.more_key = key.into();
        self
    }

    pub fn descriptor(&self) -> &RequestDescriptor {
        &self.descriptor
    }

    pub fn kind(&self) -> ItemKind {
        self.kind
    }

    /// The descriptor for the page after `cursor`; the first page when
    /// `cursor` is `None`.
    pub fn descriptor_for(&self, cursor: Option<&str>) -> RequestDescriptor {
        match cursor {
            Some(cursor) => self.descriptor.with_cursor(&self.cursor_param, cursor),
            None => self.descriptor.clone(),
        }
    }

    /// Pull items, cursor and more flag out of a successful body.
    ///
    /// A missing item list reads as empty, a missing or empty cursor as
    /// `None`, and a missing more flag as `false`.
    pub fn extract_page(&self, body: &Value) -> PageParts {
        let items = body
            .get(&self.items_key)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let next_cursor = body.get(&self.cursor_key).and_then(id_string);
        let more_available = body
            .get(&self.more_key)
            .and_then(Value::as_bool)
            .unwrap_or(false);

        PageParts {
            items,
            next_cursor,
            more_available,
        }
    }
}
