//! Shared helpers for the shutter conformance test suite.
//!
//! Provides [`spawn_api`], which binds an in-process mock of the remote API
//! on an ephemeral port. The mock checks request signatures with
//! [`SIG_KEY`], issues a fresh `sessionid` cookie per login, and exposes
//! counters through [`MockState`] so tests can assert on what the server
//! actually saw.
//!
//! | Route | Behaviour |
//! |-------|-----------|
//! | `POST accounts/login/` | signed login, `Set-Cookie: sessionid=...` |
//! | `POST accounts/logout/` | invalidates the session |
//! | `GET feed/timeline/` | 8 items + cursor `A`, then 3 items |
//! | `GET feed/broken/` | 8 items + cursor `B`, then HTTP 500 |
//! | `GET feed/flaky/` | 429 with `Retry-After` while `flaky_remaining > 0` |
//! | `GET feed/checkpoint/` | `checkpoint_required` |
//! | `GET users/search/` | needs `rank_token` and `ig_sig_key_version` |
//! | `POST media/{id}/like/` | signed, needs `_uid`; counts likes |

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{AppendHeaders, IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde_json::{json, Value};
use shutter::signing::{payload_fields, SIGNED_BODY_PARAM};
use shutter::Signer;
use shutter_api::markers;
use shutter_client::{ClientConfig, RetryPolicy, ThrottleLimit};

pub const SIG_KEY: &str = "conformance-sig-key";
pub const USERNAME: &str = "alice";
pub const PASSWORD: &str = "correct horse";
pub const USER_PK: u64 = 5678;

/// Server-side state of the mock, shared with the test.
#[derive(Default)]
pub struct MockState {
    valid_session: Mutex<Option<String>>,
    pub logins: AtomicU32,
    pub logouts: AtomicU32,
    pub likes: AtomicU32,
    pub flaky_hits: AtomicU32,
    pub flaky_remaining: AtomicU32,
    pub rank_tokens: Mutex<Vec<String>>,
}

impl MockState {
    /// Forget the current session so the next call gets `login_required`.
    pub fn expire_sessions(&self) {
        *self.valid_session.lock().unwrap_or_else(|p| p.into_inner()) = None;
    }

    fn is_valid(&self, headers: &HeaderMap) -> bool {
        let Some(cookie) = headers.get(header::COOKIE).and_then(|v| v.to_str().ok()) else {
            return false;
        };
        let presented = cookie
            .split(';')
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == "sessionid")
            .map(|(_, value)| value.to_string());
        let valid = self.valid_session.lock().unwrap_or_else(|p| p.into_inner());
        presented.is_some() && *valid == presented
    }
}

pub struct MockApi {
    /// API base URL, e.g. `http://127.0.0.1:51234/api/v1/`.
    pub base_url: String,
    pub state: Arc<MockState>,
}

impl MockApi {
    /// A client config pointed at this mock with fast backoff.
    pub fn config(&self) -> ClientConfig {
        client_config(&self.base_url)
    }
}

/// Config for tests: the mock's key, three attempts, millisecond backoff,
/// and two likes per hour.
pub fn client_config(api_url: &str) -> ClientConfig {
    ClientConfig {
        api_url: api_url.to_string(),
        sig_key: SIG_KEY.into(),
        request_timeout: Duration::from_secs(5),
        retry: RetryPolicy {
            max_attempts: 3,
            max_elapsed: Duration::from_secs(10),
            backoff_base: Duration::from_millis(10),
            backoff_cap: Duration::from_millis(100),
        },
        throttle: HashMap::from([(
            shutter::ActionKind::Like,
            ThrottleLimit::new(2, Duration::from_secs(3600)),
        )]),
        ..Default::default()
    }
}

/// Start the mock API in a background task on `127.0.0.1`.
///
/// # Panics
///
/// Panics if the TCP listener cannot be bound.
pub async fn spawn_api() -> MockApi {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("get local addr");

    let state = Arc::new(MockState::default());
    let router = build_router(Arc::clone(&state));

    tokio::spawn(async move {
        axum::serve(listener, router)
            .await
            .expect("mock api error");
    });

    MockApi {
        base_url: format!("http://{addr}/api/v1/"),
        state,
    }
}

pub fn build_router(state: Arc<MockState>) -> Router {
    let api = Router::new()
        .route("/accounts/login/", post(login))
        .route("/accounts/logout/", post(logout))
        .route("/feed/timeline/", get(timeline))
        .route("/feed/broken/", get(broken))
        .route("/feed/flaky/", get(flaky))
        .route("/feed/checkpoint/", get(checkpoint))
        .route("/users/search/", get(search))
        .route("/media/{id}/like/", post(like))
        .with_state(state);
    Router::new().nest("/api/v1", api)
}

// ---------------------------------------------------------------------------
// Envelopes
// ---------------------------------------------------------------------------

fn fail(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "status": "fail", "message": message }))).into_response()
}

fn login_required() -> Response {
    fail(StatusCode::FORBIDDEN, markers::LOGIN_REQUIRED)
}

fn media(range: std::ops::Range<u64>) -> Vec<Value> {
    range
        .map(|pk| {
            json!({
                "pk": pk,
                "id": format!("{pk}_{USER_PK}"),
                "user": { "pk": USER_PK, "username": USERNAME },
                "caption": { "text": format!("post {pk}") },
                "like_count": pk * 10,
            })
        })
        .collect()
}

/// Verify the signed form body and return its payload fields.
fn signed_fields(form: &HashMap<String, String>) -> Option<BTreeMap<String, Value>> {
    let signed = form.get(SIGNED_BODY_PARAM)?;
    let payload = Signer::new(SIG_KEY, "4").verify(signed)?;
    payload_fields(payload)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn login(
    State(state): State<Arc<MockState>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let Some(fields) = signed_fields(&form) else {
        return fail(StatusCode::BAD_REQUEST, "Invalid signature");
    };
    let field = |name: &str| fields.get(name).and_then(Value::as_str).unwrap_or_default();
    if !field("device_id").starts_with("android-") || field("guid").is_empty() {
        return fail(StatusCode::BAD_REQUEST, "Missing device identifiers");
    }
    if field("username") != USERNAME || field("password") != PASSWORD {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "status": "fail",
                "message": "The password you entered is incorrect.",
                "error_type": "bad_password",
            })),
        )
            .into_response();
    }

    let n = state.logins.fetch_add(1, Ordering::SeqCst) + 1;
    let sessionid = format!("session-{n}");
    *state.valid_session.lock().unwrap_or_else(|p| p.into_inner()) = Some(sessionid.clone());

    (
        AppendHeaders([
            (header::SET_COOKIE, format!("sessionid={sessionid}; Path=/; HttpOnly")),
            (header::SET_COOKIE, "csrftoken=conformance; Path=/".to_string()),
        ]),
        Json(json!({
            "status": "ok",
            "logged_in_user": { "pk": USER_PK, "username": USERNAME },
        })),
    )
        .into_response()
}

async fn logout(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    if !state.is_valid(&headers) {
        return login_required();
    }
    state.logouts.fetch_add(1, Ordering::SeqCst);
    state.expire_sessions();
    Json(json!({ "status": "ok" })).into_response()
}

async fn timeline(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if !state.is_valid(&headers) {
        return login_required();
    }
    match query.get("max_id").map(String::as_str) {
        None => Json(json!({
            "status": "ok",
            "items": media(0..8),
            "next_max_id": "A",
            "more_available": true,
        }))
        .into_response(),
        Some("A") => Json(json!({
            "status": "ok",
            "items": media(8..11),
            "more_available": false,
        }))
        .into_response(),
        Some(_) => fail(StatusCode::BAD_REQUEST, "Invalid max_id"),
    }
}

async fn broken(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if !state.is_valid(&headers) {
        return login_required();
    }
    if query.contains_key("max_id") {
        return (StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded").into_response();
    }
    Json(json!({
        "status": "ok",
        "items": media(0..8),
        "next_max_id": "B",
        "more_available": true,
    }))
    .into_response()
}

async fn flaky(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    if !state.is_valid(&headers) {
        return login_required();
    }
    state.flaky_hits.fetch_add(1, Ordering::SeqCst);
    let throttled = state
        .flaky_remaining
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if throttled {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, "1")],
            Json(json!({
                "status": "fail",
                "message": "Please wait a few minutes before you try again.",
            })),
        )
            .into_response();
    }
    Json(json!({ "status": "ok", "items": media(0..1), "more_available": false })).into_response()
}

async fn checkpoint(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    if !state.is_valid(&headers) {
        return login_required();
    }
    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "status": "fail",
            "message": markers::CHECKPOINT_REQUIRED,
            "checkpoint_url": "https://example.invalid/challenge/",
        })),
    )
        .into_response()
}

async fn search(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if !state.is_valid(&headers) {
        return login_required();
    }
    let Some(rank_token) = query.get("rank_token") else {
        return fail(StatusCode::BAD_REQUEST, "rank_token required");
    };
    if query.get("ig_sig_key_version").map(String::as_str) != Some("4") {
        return fail(StatusCode::BAD_REQUEST, "ig_sig_key_version required");
    }
    state
        .rank_tokens
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .push(rank_token.clone());

    let q = query.get("query").cloned().unwrap_or_default();
    Json(json!({
        "status": "ok",
        "users": [
            { "pk": 1, "username": format!("{q}_one"), "follower_count": 10 },
            { "pk": "2", "username": format!("{q}_two") },
        ],
        "has_more": false,
    }))
    .into_response()
}

async fn like(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    if !state.is_valid(&headers) {
        return login_required();
    }
    let Some(fields) = signed_fields(&form) else {
        return fail(StatusCode::BAD_REQUEST, "Invalid signature");
    };
    if fields.get("_uid").and_then(Value::as_str) != Some(USER_PK.to_string().as_str()) {
        return fail(StatusCode::BAD_REQUEST, "_uid mismatch");
    }
    if fields.get("media_id").and_then(Value::as_str) != Some(id.as_str()) {
        return fail(StatusCode::BAD_REQUEST, "media_id mismatch");
    }
    state.likes.fetch_add(1, Ordering::SeqCst);
    Json(json!({ "status": "ok" })).into_response()
}
