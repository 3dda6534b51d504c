//! Cursor-driven pagination.
//!
//! A [`Paginator`] walks one [`EndpointSpec`] page by page, strictly in
//! cursor order, each page going through the client's retry controller. It
//! stops when the server reports no more pages or no next cursor, when a
//! caller cap is reached, or on the first failed page. A failure after at
//! least one page is not an error for [`Paginator::collect_raw`]: the items
//! already fetched are returned with [`Completion::Failed`].

use serde_json::Value;
use shutter::{normalize, EndpointSpec, NormalizedItem};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::Client;
use crate::error::CallError;
use crate::session::Session;

/// Optional caps on a pagination run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageLimits {
    pub max_pages: Option<usize>,

    /// The page that crosses this cap is truncated, and a run that cut
    /// items from a page has no resume cursor.
    pub max_items: Option<usize>,
}

/// One fetched page.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub items: Vec<Value>,
    pub next_cursor: Option<String>,
    pub more_available: bool,
}

/// Why a pagination run stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    /// The server reported no further pages.
    Exhausted,

    /// A page or item cap was reached.
    CapReached,

    /// A page failed. Items from earlier pages are kept.
    Failed(CallError),
}

/// The result of draining a [`Paginator`].
#[derive(Debug, Clone, PartialEq)]
pub struct Collected<T> {
    pub items: Vec<T>,

    /// Where a later run should resume; `None` once exhausted, or when the
    /// item cap cut the last page short. After a failure this is the cursor
    /// of the page that failed.
    pub next_cursor: Option<String>,

    /// Pages fetched successfully.
    pub pages: usize,

    pub completion: Completion,
}

impl<T> Collected<T> {
    pub fn error(&self) -> Option<&CallError> {
        match &self.completion {
            Completion::Failed(e) => Some(e),
            _ => None,
        }
    }

    /// `true` if the first page already failed, so there is nothing partial
    /// to show for the run.
    pub fn failed_on_first_page(&self) -> bool {
        self.pages == 0 && self.error().is_some()
    }
}

pub struct Paginator<'c> {
    client: &'c Client,
    session: &'c Session,
    spec: EndpointSpec,
    limits: PageLimits,
    cancel: CancellationToken,
    cursor: Option<String>,
    pages: usize,
    items: usize,
    done: Option<Completion>,
}

impl<'c> Paginator<'c> {
    pub fn new(client: &'c Client, session: &'c Session, spec: EndpointSpec) -> Self {
        Self {
            client,
            session,
            spec,
            limits: PageLimits::default(),
            cancel: CancellationToken::new(),
            cursor: None,
            pages: 0,
            items: 0,
            done: None,
        }
    }

    pub fn max_pages(mut self, pages: usize) -> Self {
        self.limits.max_pages = Some(pages);
        self
    }

    pub fn max_items(mut self, items: usize) -> Self {
        self.limits.max_items = Some(items);
        self
    }

    pub fn with_limits(mut self, limits: PageLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Start from a cursor persisted by an earlier run instead of the first
    /// page.
    pub fn resume_from(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Cursor the next page will be requested with.
    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages
    }

    /// Set once the run has stopped.
    pub fn completion(&self) -> Option<&Completion> {
        self.done.as_ref()
    }

    /// Fetch the next page, or `None` once the run has stopped. A failed
    /// page is returned once as `Err`; after that the run is over.
    pub async fn next_page(&mut self) -> Option<Result<Page, CallError>> {
        if self.done.is_some() {
            return None;
        }
        if self.cap_reached() {
            self.finish(Completion::CapReached);
            return None;
        }

        let descriptor = self.spec.descriptor_for(self.cursor.as_deref());
        debug!(
            "paginate: {} page {} (cursor {:?})",
            descriptor.endpoint(),
            self.pages + 1,
            self.cursor
        );

        let body = match self
            .client
            .call_with_cancel(&descriptor, self.session, &self.cancel)
            .await
        {
            Ok(body) => body,
            Err(e) => {
                warn!(
                    "paginate: {} page {} failed: {e}",
                    descriptor.endpoint(),
                    self.pages + 1
                );
                self.finish(Completion::Failed(e.clone()));
                return Some(Err(e));
            }
        };

        let parts = self.spec.extract_page(&body);
        let more = parts.more_available && parts.next_cursor.is_some();
        let mut items = parts.items;
        let mut dropped = 0;
        let mut capped = false;
        if let Some(max) = self.limits.max_items {
            let room = max.saturating_sub(self.items);
            if items.len() >= room {
                dropped = items.len() - room;
                capped = dropped > 0 || more;
                items.truncate(room);
            }
        }
        self.pages += 1;
        self.items += items.len();

        // The server's cursor skips whatever was cut from this page.
        let next_cursor = if more && dropped == 0 {
            parts.next_cursor
        } else {
            None
        };
        self.cursor = next_cursor.clone();

        if capped {
            if dropped > 0 {
                debug!("paginate: cut {dropped} items past the cap, run is not resumable");
            }
            self.finish(Completion::CapReached);
        } else if !more {
            self.finish(Completion::Exhausted);
        }

        Some(Ok(Page {
            items,
            next_cursor,
            more_available: more,
        }))
    }

    /// Drain the run into raw item mappings.
    pub async fn collect_raw(mut self) -> Collected<Value> {
        let mut items = Vec::new();
        while let Some(page) = self.next_page().await {
            if let Ok(page) = page {
                items.extend(page.items);
            }
        }
        Collected {
            items,
            next_cursor: self.cursor,
            pages: self.pages,
            completion: self.done.unwrap_or(Completion::Exhausted),
        }
    }

    /// Drain the run into normalised items. Items the normaliser cannot
    /// identify are skipped.
    pub async fn collect_normalized(self) -> Collected<NormalizedItem> {
        let kind = self.spec.kind();
        let raw = self.collect_raw().await;
        let total = raw.items.len();
        let items: Vec<NormalizedItem> = raw
            .items
            .iter()
            .filter_map(|item| normalize(kind, item))
            .collect();
        if items.len() < total {
            debug!("paginate: skipped {} items without an id", total - items.len());
        }
        Collected {
            items,
            next_cursor: raw.next_cursor,
            pages: raw.pages,
            completion: raw.completion,
        }
    }

    fn cap_reached(&self) -> bool {
        self.limits.max_pages.is_some_and(|max| self.pages >= max)
            || self.limits.max_items.is_some_and(|max| self.items >= max)
    }

    fn finish(&mut self, completion: Completion) {
        let reason = match &completion {
            Completion::Exhausted => "exhausted".to_string(),
            Completion::CapReached => "cap reached".to_string(),
            Completion::Failed(e) => format!("failed: {}", e.category()),
        };
        info!(
            "paginate: {} stopped after {} pages, {} items ({reason})",
            self.spec.descriptor().endpoint(),
            self.pages,
            self.items
        );
        self.done = Some(completion);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use shutter::RequestDescriptor;

    use super::*;
    use crate::config::ClientConfig;
    use crate::session::{DeviceIds, TransportCredentials};
    use crate::transport::scripted::ScriptedTransport;
    use crate::transport::{HttpResponse, TransportError};

    fn media(range: std::ops::Range<u64>) -> Vec<Value> {
        range
            .map(|pk| json!({"pk": pk, "user": {"pk": 5678, "username": "owner"}}))
            .collect()
    }

    fn page1() -> Result<HttpResponse, TransportError> {
        ScriptedTransport::json(
            200,
            json!({"status": "ok", "items": media(0..8), "next_max_id": "A", "more_available": true}),
        )
    }

    fn page2() -> Result<HttpResponse, TransportError> {
        ScriptedTransport::json(
            200,
            json!({"status": "ok", "items": media(8..11), "more_available": false}),
        )
    }

    fn client(script: Vec<Result<HttpResponse, TransportError>>) -> (Client, Arc<ScriptedTransport>) {
        let transport = Arc::new(ScriptedTransport::new(script));
        let config = ClientConfig {
            api_url: "http://api.test/api/v1/".into(),
            ..Default::default()
        };
        (Client::new(&config, transport.clone(), None), transport)
    }

    fn session() -> Session {
        Session::new(
            "5678",
            "alice",
            DeviceIds::for_username("alice"),
            TransportCredentials::default(),
        )
    }

    fn timeline() -> EndpointSpec {
        EndpointSpec::media_feed(RequestDescriptor::read("feed/timeline/"))
    }

    #[tokio::test(start_paused = true)]
    async fn yields_all_items_in_request_order() {
        let (client, transport) = client(vec![page1(), page2()]);
        let session = session();
        let collected = client.paginate(&session, timeline()).collect_raw().await;

        assert_eq!(collected.items.len(), 11);
        let ids: Vec<u64> = collected.items.iter().map(|i| i["pk"].as_u64().unwrap()).collect();
        assert_eq!(ids, (0..11).collect::<Vec<_>>());
        assert_eq!(collected.pages, 2);
        assert_eq!(collected.completion, Completion::Exhausted);
        assert_eq!(collected.next_cursor, None);

        let urls = transport.urls();
        assert_eq!(urls.len(), 2);
        assert_eq!(urls[0], "http://api.test/api/v1/feed/timeline/");
        assert_eq!(urls[1], "http://api.test/api/v1/feed/timeline/?max_id=A");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_second_page_keeps_first_page_items() {
        let (client, _) = client(vec![
            page1(),
            ScriptedTransport::json(400, json!({"status": "fail", "message": "Invalid cursor"})),
        ]);
        let session = session();
        let collected = client.paginate(&session, timeline()).collect_raw().await;

        assert_eq!(collected.items.len(), 8);
        assert_eq!(
            collected.completion,
            Completion::Failed(CallError::HardFailure("Invalid cursor".into()))
        );
        assert_eq!(collected.next_cursor.as_deref(), Some("A"));
        assert!(!collected.failed_on_first_page());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_first_page_is_distinguishable() {
        let (client, _) = client(vec![ScriptedTransport::json(
            400,
            json!({"status": "fail", "message": "Not authorized to view user"}),
        )]);
        let session = session();
        let collected = client.paginate(&session, timeline()).collect_raw().await;

        assert!(collected.items.is_empty());
        assert!(collected.failed_on_first_page());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_more_flag_stops_after_first_page() {
        let (client, transport) = client(vec![ScriptedTransport::json(
            200,
            json!({"status": "ok", "items": media(0..3), "next_max_id": "A"}),
        )]);
        let session = session();
        let collected = client.paginate(&session, timeline()).collect_raw().await;

        assert_eq!(collected.items.len(), 3);
        assert_eq!(collected.completion, Completion::Exhausted);
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn page_cap_stops_with_resumable_cursor() {
        let (client, transport) = client(vec![page1(), page2()]);
        let session = session();
        let collected = client
            .paginate(&session, timeline())
            .max_pages(1)
            .collect_raw()
            .await;

        assert_eq!(collected.items.len(), 8);
        assert_eq!(collected.completion, Completion::CapReached);
        assert_eq!(collected.next_cursor.as_deref(), Some("A"));
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn item_cap_truncates_the_final_page() {
        let (client, transport) = client(vec![page1(), page2()]);
        let session = session();
        let collected = client
            .paginate(&session, timeline())
            .max_items(5)
            .collect_raw()
            .await;

        assert_eq!(collected.items.len(), 5);
        assert_eq!(collected.completion, Completion::CapReached);
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn item_cap_that_cuts_a_page_leaves_no_resume_cursor() {
        let (client, _) = client(vec![page1(), page2()]);
        let session = session();
        let first = client
            .paginate(&session, timeline())
            .max_items(5)
            .collect_raw()
            .await;
        assert_eq!(first.items.len(), 5);
        assert_eq!(first.completion, Completion::CapReached);
        assert_eq!(first.next_cursor, None);
    }

    #[tokio::test(start_paused = true)]
    async fn item_cap_on_a_page_boundary_resumes_without_loss() {
        let (client, transport) = client(vec![page1(), page2()]);
        let session = session();
        let first = client
            .paginate(&session, timeline())
            .max_items(8)
            .collect_raw()
            .await;
        assert_eq!(first.completion, Completion::CapReached);
        let cursor = first.next_cursor.unwrap();
        let rest = client
            .paginate(&session, timeline())
            .resume_from(cursor)
            .collect_raw()
            .await;
        assert_eq!(first.items.len() + rest.items.len(), 11);
        assert_eq!(transport.request_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn exact_fill_without_a_cursor_is_exhausted() {
        let (client, _) = client(vec![ScriptedTransport::json(
            200,
            json!({"status": "ok", "items": media(0..5), "more_available": true}),
        )]);
        let session = session();
        let collected = client
            .paginate(&session, timeline())
            .max_items(5)
            .collect_raw()
            .await;

        assert_eq!(collected.items.len(), 5);
        assert_eq!(collected.completion, Completion::Exhausted);
        assert_eq!(collected.next_cursor, None);
    }

    #[tokio::test(start_paused = true)]
    async fn resumes_from_a_persisted_cursor() {
        let (client, transport) = client(vec![page2()]);
        let session = session();
        let collected = client
            .paginate(&session, timeline())
            .resume_from("A")
            .collect_raw()
            .await;

        assert_eq!(collected.items.len(), 3);
        assert_eq!(transport.urls()[0], "http://api.test/api/v1/feed/timeline/?max_id=A");
    }

    #[tokio::test(start_paused = true)]
    async fn next_page_is_lazy_and_ends_with_none() {
        let (client, transport) = client(vec![page1(), page2()]);
        let session = session();
        let mut pages = client.paginate(&session, timeline());

        let first = pages.next_page().await.unwrap().unwrap();
        assert_eq!(first.items.len(), 8);
        assert_eq!(first.next_cursor.as_deref(), Some("A"));
        assert_eq!(transport.request_count(), 1);

        assert_eq!(pages.next_page().await.unwrap().unwrap().items.len(), 3);
        assert!(pages.next_page().await.is_none());
        assert_eq!(pages.completion(), Some(&Completion::Exhausted));
    }

    #[tokio::test(start_paused = true)]
    async fn normalized_items_have_string_ids() {
        let (client, _) = client(vec![page1(), page2()]);
        let session = session();
        let collected = client
            .paginate(&session, timeline())
            .collect_normalized()
            .await;

        assert_eq!(collected.items.len(), 11);
        assert_eq!(collected.items[0].id, "0");
        assert_eq!(collected.items[10].id, "10");
        assert!(collected.items.iter().all(|i| i.owner_id == "5678"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_ends_the_run() {
        let (client, transport) = client(vec![page1(), page2()]);
        let session = session();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let collected = client
            .paginate(&session, timeline())
            .with_cancellation(cancel)
            .collect_raw()
            .await;

        assert_eq!(collected.completion, Completion::Failed(CallError::Cancelled));
        assert_eq!(transport.request_count(), 0);
    }
}
