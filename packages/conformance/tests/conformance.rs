//! End-to-end conformance tests for the shutter client.
//!
//! Each test spawns an ephemeral in-process mock API (real TCP, real HTTP)
//! via [`shutter_conformance::spawn_api`] and drives a [`Client`] through the
//! reqwest transport, so signing, cookies, retries and pagination are all
//! exercised on the wire.
//!
//! # Coverage
//!
//! | Test | Behaviour |
//! |------|-----------|
//! | `login_and_paginate_timeline` | login, cookies, two-page pagination |
//! | `wrong_password_is_rejected` | login hard failure |
//! | `wrong_signature_key_is_rejected` | HMAC signing |
//! | `ranked_search_sends_rank_token` | ranked reads, key version query param |
//! | `like_is_signed_and_stamped` | signed writes with `_uid`/`_uuid` |
//! | `likes_beyond_budget_are_throttled` | action throttle |
//! | `rate_limit_recovers_with_backoff` | 429 + `Retry-After` retry |
//! | `rate_limit_exhaustion_surfaces` | attempt ceiling on rate limits |
//! | `expired_session_logs_in_again` | transparent re-login |
//! | `concurrent_calls_share_one_relogin` | re-login is single-flight per session |
//! | `failed_second_page_keeps_partial_results` | early stop |
//! | `checkpoint_is_a_soft_failure` | soft failures are not retried |
//! | `logout_ends_the_session` | logout |
//! | `unreachable_server_times_out` | transport retries and `Timeout` |

use std::sync::atomic::Ordering;
use std::sync::Arc;

use shutter::{ActionKind, EndpointSpec, RequestDescriptor};
use shutter_client::{
    AuthError, CallError, Client, Completion, Credentials, StaticCredentials,
};
use shutter_conformance::{client_config, spawn_api, MockApi, PASSWORD, USERNAME};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn credentials() -> Credentials {
    Credentials::new(USERNAME, PASSWORD)
}

fn client(api: &MockApi) -> Client {
    let store = Arc::new(StaticCredentials::new(credentials()));
    Client::from_config(&api.config(), Some(store)).expect("build client")
}

fn feed(endpoint: &str) -> EndpointSpec {
    EndpointSpec::media_feed(RequestDescriptor::read(endpoint))
}

fn like(media_id: u64) -> RequestDescriptor {
    RequestDescriptor::write("media/{media_id}/like/")
        .path_param("media_id", media_id)
        .body_field("media_id", media_id.to_string())
        .action(ActionKind::Like)
}

// ---------------------------------------------------------------------------
// Login and pagination
// ---------------------------------------------------------------------------

#[tokio::test]
async fn login_and_paginate_timeline() {
    let api = spawn_api().await;
    let client = client(&api);

    let session = client.login(&credentials()).await.expect("login");
    assert_eq!(session.identity_id(), "5678");
    assert_eq!(session.credentials().cookie("sessionid"), Some("session-1"));

    let collected = client
        .paginate(&session, feed("feed/timeline/"))
        .collect_normalized()
        .await;

    assert_eq!(collected.completion, Completion::Exhausted);
    assert_eq!(collected.pages, 2);
    let ids: Vec<String> = collected.items.iter().map(|i| i.id.clone()).collect();
    let expected: Vec<String> = (0..11).map(|n: u64| n.to_string()).collect();
    assert_eq!(ids, expected);
    assert!(collected.items.iter().all(|i| i.owner_id == "5678"));
    assert_eq!(collected.items[3].text.as_deref(), Some("post 3"));
    assert_eq!(collected.items[3].counts.get("like_count"), Some(&30));
}

#[tokio::test]
async fn wrong_password_is_rejected() {
    let api = spawn_api().await;
    let client = client(&api);

    let err = client
        .login(&Credentials::new(USERNAME, "nope"))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        AuthError::Rejected("The password you entered is incorrect.".into())
    );
    assert_eq!(api.state.logins.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn wrong_signature_key_is_rejected() {
    let api = spawn_api().await;
    let mut config = api.config();
    config.sig_key = "some-other-key".into();
    let client = Client::from_config(&config, None).expect("build client");

    let err = client.login(&credentials()).await.unwrap_err();
    assert_eq!(err, AuthError::Rejected("Invalid signature".into()));
}

// ---------------------------------------------------------------------------
// Signing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ranked_search_sends_rank_token() {
    let api = spawn_api().await;
    let client = client(&api);
    let session = client.login(&credentials()).await.expect("login");

    let search = EndpointSpec::user_search(
        RequestDescriptor::read("users/search/")
            .query_param("query", "test")
            .query_param("is_typeahead", true)
            .ranked()
            .with_sig_key_version(),
    );
    let collected = client.paginate(&session, search).collect_normalized().await;

    assert_eq!(collected.completion, Completion::Exhausted);
    let ids: Vec<&str> = collected.items.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, ["1", "2"]);
    assert_eq!(collected.items[0].username.as_deref(), Some("test_one"));

    let tokens = api.state.rank_tokens.lock().unwrap();
    assert_eq!(tokens.as_slice(), [session.rank_token().to_string()]);
    assert!(tokens[0].starts_with("5678_"));
}

#[tokio::test]
async fn like_is_signed_and_stamped() {
    let api = spawn_api().await;
    let client = client(&api);
    let session = client.login(&credentials()).await.expect("login");

    let body = client.call(&like(1234), &session).await.expect("like");
    assert_eq!(body["status"], "ok");
    assert_eq!(api.state.likes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn likes_beyond_budget_are_throttled() {
    let api = spawn_api().await;
    let client = client(&api);
    let session = client.login(&credentials()).await.expect("login");

    client.call(&like(1), &session).await.expect("first like");
    client.call(&like(2), &session).await.expect("second like");
    let err = client.call(&like(3), &session).await.unwrap_err();

    assert!(matches!(err, CallError::Throttled { kind: ActionKind::Like, .. }));
    assert_eq!(api.state.likes.load(Ordering::SeqCst), 2);
    assert!(client.permit_action(ActionKind::Follow).is_ok());
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rate_limit_recovers_with_backoff() {
    let api = spawn_api().await;
    api.state.flaky_remaining.store(2, Ordering::SeqCst);
    let client = client(&api);
    let session = client.login(&credentials()).await.expect("login");

    let body = client
        .call(&RequestDescriptor::read("feed/flaky/"), &session)
        .await
        .expect("third attempt succeeds");
    assert_eq!(body["status"], "ok");
    assert_eq!(api.state.flaky_hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn rate_limit_exhaustion_surfaces() {
    let api = spawn_api().await;
    api.state.flaky_remaining.store(10, Ordering::SeqCst);
    let client = client(&api);
    let session = client.login(&credentials()).await.expect("login");

    let err = client
        .call(&RequestDescriptor::read("feed/flaky/"), &session)
        .await
        .unwrap_err();
    assert!(matches!(err, CallError::RateLimited { attempts: 3, .. }));
    assert_eq!(api.state.flaky_hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn expired_session_logs_in_again() {
    let api = spawn_api().await;
    let client = client(&api);
    let session = client.login(&credentials()).await.expect("login");
    let rank_token = session.rank_token().to_string();

    api.state.expire_sessions();
    let collected = client
        .paginate(&session, feed("feed/timeline/"))
        .collect_raw()
        .await;

    assert_eq!(collected.items.len(), 11);
    assert_eq!(api.state.logins.load(Ordering::SeqCst), 2);
    assert_eq!(session.credentials().cookie("sessionid"), Some("session-2"));
    assert_eq!(session.rank_token(), rank_token);
}

#[tokio::test]
async fn concurrent_calls_share_one_relogin() {
    let api = spawn_api().await;
    let client = client(&api);
    let session = client.login(&credentials()).await.expect("login");

    api.state.expire_sessions();
    let timeline = RequestDescriptor::read("feed/timeline/");
    let (a, b, c, d) = tokio::join!(
        client.call(&timeline, &session),
        client.call(&timeline, &session),
        client.call(&timeline, &session),
        client.call(&timeline, &session),
    );

    for result in [a, b, c, d] {
        assert!(result.is_ok(), "{result:?}");
    }
    assert_eq!(api.state.logins.load(Ordering::SeqCst), 2);
    assert_eq!(session.credentials().cookie("sessionid"), Some("session-2"));
}

#[tokio::test]
async fn failed_second_page_keeps_partial_results() {
    let api = spawn_api().await;
    let client = client(&api);
    let session = client.login(&credentials()).await.expect("login");

    let collected = client
        .paginate(&session, feed("feed/broken/"))
        .collect_raw()
        .await;

    assert_eq!(collected.items.len(), 8);
    assert_eq!(collected.pages, 1);
    assert_eq!(
        collected.completion,
        Completion::Failed(CallError::HardFailure("http 500".into()))
    );
    assert_eq!(collected.next_cursor.as_deref(), Some("B"));
}

#[tokio::test]
async fn checkpoint_is_a_soft_failure() {
    let api = spawn_api().await;
    let client = client(&api);
    let session = client.login(&credentials()).await.expect("login");

    let err = client
        .call(&RequestDescriptor::read("feed/checkpoint/"), &session)
        .await
        .unwrap_err();
    assert_eq!(err, CallError::SoftFailure("checkpoint_required".into()));
}

// ---------------------------------------------------------------------------
// Session lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn logout_ends_the_session() {
    let api = spawn_api().await;
    let client = client(&api);
    let session = client.login(&credentials()).await.expect("login");

    client.logout(&session).await;
    assert_eq!(api.state.logouts.load(Ordering::SeqCst), 1);
    assert!(!session.is_active());

    let err = client
        .call(&RequestDescriptor::read("feed/timeline/"), &session)
        .await
        .unwrap_err();
    assert_eq!(err, CallError::SessionExpired);
}

#[tokio::test]
async fn unreachable_server_times_out() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("get local addr");
    drop(listener);

    let config = client_config(&format!("http://{addr}/api/v1/"));
    let client = Client::from_config(&config, None).expect("build client");
    let session = shutter_client::Session::new(
        "5678",
        USERNAME,
        shutter_client::DeviceIds::for_username(USERNAME),
        Default::default(),
    );

    let err = client
        .call(&RequestDescriptor::read("feed/timeline/"), &session)
        .await
        .unwrap_err();
    assert_eq!(err, CallError::Timeout { attempts: 3 });
}
