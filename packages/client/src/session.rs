//! Session state and login.
//!
//! A [`Session`] is the explicit authenticated context threaded through every
//! call. Its identity id and ranking token are fixed for its lifetime; only
//! the transport credentials (cookies and authorization header) can change,
//! via [`Session::refresh`]. Requests snapshot the credentials when they are
//! built, so a refresh never rewrites a request already in flight.
//!
//! [`SessionManager`] performs the login exchange, logout, and the single
//! transparent re-login the retry controller asks for on an expired session.
//! Re-login is serialised per session: every refresh bumps a credentials
//! generation, and a caller holding an older generation re-sends with the
//! new credentials instead of logging in again.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use shutter::{classify, decode_body, Classification, RequestDescriptor, Signer};
use shutter_api::LoginResponse;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{info, warn};

use crate::config::ConfigError;
use crate::error::AuthError;
use crate::transport::{HttpRequest, HttpResponse, Transport};

pub const LOGIN_ENDPOINT: &str = "accounts/login/";
pub const LOGOUT_ENDPOINT: &str = "accounts/logout/";

const AUTHORIZATION_HEADER: &str = "ig-set-authorization";

// ---------------------------------------------------------------------------
// TransportCredentials
// ---------------------------------------------------------------------------

/// Cookies and authorization token issued by the server. Opaque to
/// everything except header rendering.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct TransportCredentials {
    cookies: BTreeMap<String, String>,
    authorization: Option<String>,
}

impl TransportCredentials {
    pub fn new(cookies: BTreeMap<String, String>, authorization: Option<String>) -> Self {
        Self {
            cookies,
            authorization,
        }
    }

    /// Capture `Set-Cookie` and `ig-set-authorization` headers. Cookies the
    /// server clears (empty value) are skipped.
    pub fn from_response(resp: &HttpResponse) -> Self {
        let cookies = resp
            .headers_named("set-cookie")
            .filter_map(|header| {
                let pair = header.split(';').next()?;
                let (name, value) = pair.split_once('=')?;
                let (name, value) = (name.trim(), value.trim().trim_matches('"'));
                (!name.is_empty() && !value.is_empty())
                    .then(|| (name.to_string(), value.to_string()))
            })
            .collect();
        let authorization = resp
            .header(AUTHORIZATION_HEADER)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        Self::new(cookies, authorization)
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn authorization(&self) -> Option<&str> {
        self.authorization.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty() && self.authorization.is_none()
    }

    /// `Cookie` and `Authorization` request headers.
    pub fn headers(&self) -> Vec<(String, String)> {
        let mut headers = Vec::new();
        if !self.cookies.is_empty() {
            let cookie = self
                .cookies
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; ");
            headers.push(("Cookie".into(), cookie));
        }
        if let Some(auth) = &self.authorization {
            headers.push(("Authorization".into(), auth.clone()));
        }
        headers
    }
}

impl std::fmt::Debug for TransportCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportCredentials")
            .field("cookies", &self.cookies.keys().collect::<Vec<_>>())
            .field("authorization", &self.authorization.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// DeviceIds
// ---------------------------------------------------------------------------

/// Device identifiers sent at login and on every write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIds {
    /// `android-` followed by 16 hex chars derived from the username.
    pub device_id: String,
    pub guid: String,
    pub phone_id: String,
}

impl DeviceIds {
    /// Stable device id for `username`, fresh guid and phone id.
    pub fn for_username(username: &str) -> Self {
        let digest = hex::encode(Sha256::digest(username.as_bytes()));
        Self {
            device_id: format!("android-{}", &digest[..16]),
            guid: uuid::Uuid::new_v4().to_string(),
            phone_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

pub struct Session {
    identity_id: String,
    username: String,
    rank_token: String,
    device: DeviceIds,
    credentials: RwLock<Arc<TransportCredentials>>,
    generation: AtomicU64,
    relogin: tokio::sync::Mutex<()>,
    logged_out: CancellationToken,
}

impl Session {
    /// Assemble a session. The ranking token is generated here, once.
    pub fn new(
        identity_id: impl Into<String>,
        username: impl Into<String>,
        device: DeviceIds,
        credentials: TransportCredentials,
    ) -> Self {
        let identity_id = identity_id.into();
        let rank_token = format!("{identity_id}_{}", uuid::Uuid::new_v4());
        Self {
            identity_id,
            username: username.into(),
            rank_token,
            device,
            credentials: RwLock::new(Arc::new(credentials)),
            generation: AtomicU64::new(0),
            relogin: tokio::sync::Mutex::new(()),
            logged_out: CancellationToken::new(),
        }
    }

    pub fn identity_id(&self) -> &str {
        &self.identity_id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn rank_token(&self) -> &str {
        &self.rank_token
    }

    pub fn device(&self) -> &DeviceIds {
        &self.device
    }

    /// The current credentials. The snapshot stays valid after a refresh.
    pub fn credentials(&self) -> Arc<TransportCredentials> {
        let guard = self.credentials.read().unwrap_or_else(|p| p.into_inner());
        Arc::clone(&guard)
    }

    /// Replace the transport credentials and bump the generation. Identity
    /// and ranking token are unchanged.
    pub fn refresh(&self, credentials: TransportCredentials) {
        let mut guard = self.credentials.write().unwrap_or_else(|p| p.into_inner());
        *guard = Arc::new(credentials);
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Number of refreshes so far. Read it before [`Session::credentials`]
    /// to tag a snapshot.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Held for the duration of one re-login.
    pub async fn relogin_lock(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.relogin.lock().await
    }

    pub fn is_active(&self) -> bool {
        !self.logged_out.is_cancelled()
    }

    /// Mark the session logged out. Pending calls and backoff waits on it
    /// resolve as `SessionExpired`.
    pub fn invalidate(&self) {
        self.logged_out.cancel();
    }

    /// Completes when the session is invalidated.
    pub fn expired(&self) -> WaitForCancellationFuture<'_> {
        self.logged_out.cancelled()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("identity_id", &self.identity_id)
            .field("username", &self.username)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Supplies login credentials. The engine never persists them.
pub trait CredentialStore: Send + Sync {
    /// Credentials for the initial login.
    fn credentials(&self) -> Option<Credentials>;

    /// Credentials for a transparent re-login after the session expires.
    /// `None` means expired sessions surface to the caller.
    fn refresh_credentials(&self) -> Option<Credentials> {
        None
    }
}

/// A fixed username and password.
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    credentials: Credentials,
    allow_relogin: bool,
}

impl StaticCredentials {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            allow_relogin: true,
        }
    }

    pub fn allow_relogin(mut self, allow: bool) -> Self {
        self.allow_relogin = allow;
        self
    }

    /// Read `SHUTTER_USERNAME`, `SHUTTER_PASSWORD` and the optional
    /// `SHUTTER_ALLOW_RELOGIN` (default `true`).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let username = lookup("SHUTTER_USERNAME")
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::Missing("SHUTTER_USERNAME"))?;
        let password = lookup("SHUTTER_PASSWORD").ok_or(ConfigError::Missing("SHUTTER_PASSWORD"))?;
        let allow_relogin = match lookup("SHUTTER_ALLOW_RELOGIN").as_deref().map(str::trim) {
            None | Some("") | Some("1") | Some("true") | Some("yes") => true,
            Some("0") | Some("false") | Some("no") => false,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "SHUTTER_ALLOW_RELOGIN".into(),
                    expected: "true or false",
                    value: other.to_string(),
                })
            }
        };
        Ok(Self::new(Credentials::new(username, password)).allow_relogin(allow_relogin))
    }
}

impl CredentialStore for StaticCredentials {
    fn credentials(&self) -> Option<Credentials> {
        Some(self.credentials.clone())
    }

    fn refresh_credentials(&self) -> Option<Credentials> {
        self.allow_relogin.then(|| self.credentials.clone())
    }
}

// ---------------------------------------------------------------------------
// Reauthenticate
// ---------------------------------------------------------------------------

/// Restores transport credentials on an expired session in place.
#[async_trait]
pub trait Reauthenticate: Send + Sync {
    async fn reauthenticate(&self, session: &Session) -> Result<(), AuthError>;
}

// ---------------------------------------------------------------------------
// SessionManager
// ---------------------------------------------------------------------------

pub struct SessionManager {
    transport: Arc<dyn Transport>,
    signer: Signer,
    api_url: String,
    headers: Vec<(String, String)>,
    store: Option<Arc<dyn CredentialStore>>,
}

impl SessionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        signer: Signer,
        api_url: impl Into<String>,
        headers: Vec<(String, String)>,
    ) -> Self {
        Self {
            transport,
            signer,
            api_url: api_url.into(),
            headers,
            store: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Log in with the credential store's initial credentials.
    pub async fn authenticate(&self) -> Result<Session, AuthError> {
        let credentials = self
            .store
            .as_ref()
            .and_then(|s| s.credentials())
            .ok_or(AuthError::NoCredentials)?;
        self.login(&credentials).await
    }

    /// Run the login exchange. Either a complete session is returned or
    /// nothing is.
    pub async fn login(&self, credentials: &Credentials) -> Result<Session, AuthError> {
        let device = DeviceIds::for_username(&credentials.username);
        let (identity_id, transport_credentials) = self.exchange(credentials, &device).await?;
        info!(
            "session: logged in as {} (identity {identity_id})",
            credentials.username
        );
        Ok(Session::new(
            identity_id,
            credentials.username.clone(),
            device,
            transport_credentials,
        ))
    }

    /// Swap in new transport credentials.
    pub fn refresh(&self, session: &Session, credentials: TransportCredentials) {
        session.refresh(credentials);
        info!("session: credentials refreshed for {}", session.username());
    }

    /// Invalidate `session` and tell the server. Server-side failure is
    /// logged and otherwise ignored.
    pub async fn logout(&self, session: &Session) {
        session.invalidate();

        let descriptor = RequestDescriptor::write(LOGOUT_ENDPOINT)
            .with_session_fields(session.identity_id(), &session.device().guid);
        let signed = match self.signer.sign(&descriptor, None) {
            Ok(signed) => signed,
            Err(e) => {
                warn!("session: logout request could not be signed: {e}");
                return;
            }
        };
        let mut headers = self.headers.clone();
        headers.extend(session.credentials().headers());
        let request = HttpRequest::from_signed(&signed, &self.api_url, headers);

        match self.transport.send(request).await {
            Ok(resp) if (200..300).contains(&resp.status) => {
                info!("session: logged out {}", session.username());
            }
            Ok(resp) => warn!(
                "session: logout of {} returned status {}",
                session.username(),
                resp.status
            ),
            Err(e) => warn!("session: logout of {} failed: {e}", session.username()),
        }
    }

    async fn exchange(
        &self,
        credentials: &Credentials,
        device: &DeviceIds,
    ) -> Result<(String, TransportCredentials), AuthError> {
        let descriptor = RequestDescriptor::write(LOGIN_ENDPOINT)
            .body_field("username", credentials.username.as_str())
            .body_field("password", credentials.password.as_str())
            .body_field("device_id", device.device_id.as_str())
            .body_field("guid", device.guid.as_str())
            .body_field("phone_id", device.phone_id.as_str())
            .body_field("login_attempt_count", "0");
        let signed = self.signer.sign(&descriptor, None)?;
        let request = HttpRequest::from_signed(&signed, &self.api_url, self.headers.clone());

        let resp = self.transport.send(request).await?;
        match classify(resp.status, decode_body(&resp.body)) {
            Classification::Success(body) => {
                let login: LoginResponse = serde_json::from_value(body)
                    .map_err(|_| AuthError::MalformedResponse("logged_in_user"))?;
                let identity_id = login
                    .logged_in_user
                    .as_ref()
                    .and_then(|u| u.pk_string())
                    .ok_or(AuthError::MalformedResponse("logged_in_user.pk"))?;
                Ok((identity_id, TransportCredentials::from_response(&resp)))
            }
            Classification::SoftFailure(reason) => {
                warn!("session: login for {} needs verification", credentials.username);
                Err(AuthError::Challenge(reason))
            }
            Classification::HardFailure(reason) => Err(AuthError::Rejected(reason)),
            Classification::RateLimited { .. } => Err(AuthError::RateLimited),
            Classification::AuthExpired => Err(AuthError::Rejected("login_required".into())),
        }
    }
}

#[async_trait]
impl Reauthenticate for SessionManager {
    /// Log in again with the store's refresh credentials, check the account
    /// is the same, and replace the session's transport credentials. The
    /// identity id, device ids and ranking token are kept.
    async fn reauthenticate(&self, session: &Session) -> Result<(), AuthError> {
        let credentials = self
            .store
            .as_ref()
            .and_then(|s| s.refresh_credentials())
            .ok_or(AuthError::NoCredentials)?;

        let (identity_id, transport_credentials) =
            self.exchange(&credentials, session.device()).await?;
        if identity_id != session.identity_id() {
            return Err(AuthError::IdentityMismatch {
                expected: session.identity_id().to_string(),
                got: identity_id,
            });
        }
        self.refresh(session, transport_credentials);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::transport::scripted::ScriptedTransport;
    use crate::transport::TransportError;

    const KEY: &str = "test-key";

    fn manager(transport: Arc<ScriptedTransport>) -> SessionManager {
        SessionManager::new(
            transport,
            Signer::new(KEY, "4"),
            "http://api.test/api/v1/",
            vec![("User-Agent".into(), "test".into())],
        )
    }

    fn login_ok(pk: serde_json::Value, sessionid: &str) -> Result<HttpResponse, TransportError> {
        Ok(HttpResponse::new(
            200,
            json!({"status": "ok", "logged_in_user": {"pk": pk, "username": "alice"}}).to_string(),
        )
        .with_header("Set-Cookie", format!("sessionid={sessionid}; Path=/; HttpOnly"))
        .with_header("Set-Cookie", "csrftoken=tok; Path=/")
        .with_header("ig-set-authorization", "Bearer IGT:2:abc"))
    }

    #[test]
    fn device_id_is_stable_per_username() {
        let a = DeviceIds::for_username("alice");
        let b = DeviceIds::for_username("alice");
        assert_eq!(a.device_id, b.device_id);
        assert!(a.device_id.starts_with("android-"));
        assert_eq!(a.device_id.len(), "android-".len() + 16);
        assert_ne!(a.guid, b.guid);
        assert_ne!(DeviceIds::for_username("bob").device_id, a.device_id);
    }

    #[test]
    fn credentials_capture_cookies_and_authorization() {
        let resp = login_ok(json!(1), "s1")
            .unwrap()
            .with_header("Set-Cookie", "ds_user=\"\"; expires=Thu, 01-Jan-1970 00:00:00 GMT");
        let creds = TransportCredentials::from_response(&resp);
        assert_eq!(creds.cookie("sessionid"), Some("s1"));
        assert_eq!(creds.cookie("ds_user"), None);
        assert_eq!(
            creds.headers(),
            vec![
                ("Cookie".to_string(), "csrftoken=tok; sessionid=s1".to_string()),
                ("Authorization".to_string(), "Bearer IGT:2:abc".to_string()),
            ]
        );
        assert!(!format!("{creds:?}").contains("s1"));
    }

    #[test]
    fn refresh_keeps_identity_and_rank_token_and_old_snapshots() {
        let session = Session::new("5678", "alice", DeviceIds::for_username("alice"), Default::default());
        let rank = session.rank_token().to_string();
        assert!(rank.starts_with("5678_"));

        let before = session.credentials();
        assert_eq!(session.generation(), 0);
        let mut cookies = BTreeMap::new();
        cookies.insert("sessionid".to_string(), "new".to_string());
        session.refresh(TransportCredentials::new(cookies, None));

        assert!(before.is_empty());
        assert_eq!(session.generation(), 1);
        assert_eq!(session.credentials().cookie("sessionid"), Some("new"));
        assert_eq!(session.identity_id(), "5678");
        assert_eq!(session.rank_token(), rank);
    }

    #[tokio::test]
    async fn login_builds_a_complete_session() {
        let transport = Arc::new(ScriptedTransport::new(vec![login_ok(json!(5678), "s1")]));
        let session = manager(Arc::clone(&transport))
            .login(&Credentials::new("alice", "hunter2"))
            .await
            .unwrap();

        assert_eq!(session.identity_id(), "5678");
        assert_eq!(session.credentials().cookie("sessionid"), Some("s1"));
        assert!(session.is_active());

        let requests = transport.requests.lock().unwrap();
        assert_eq!(requests[0].url, "http://api.test/api/v1/accounts/login/");
        let body = requests[0].body.as_deref().unwrap();
        assert!(body.starts_with("ig_sig_key_version=4&signed_body="));
    }

    #[tokio::test]
    async fn login_failures_produce_no_session() {
        let cases = vec![
            (
                ScriptedTransport::json(400, json!({"status": "fail", "message": "The password you entered is incorrect."})),
                AuthError::Rejected("The password you entered is incorrect.".into()),
            ),
            (
                ScriptedTransport::json(200, json!({"status": "ok"})),
                AuthError::MalformedResponse("logged_in_user.pk"),
            ),
            (
                Err(TransportError::Timeout),
                AuthError::Transport(TransportError::Timeout),
            ),
        ];
        for (response, expected) in cases {
            let transport = Arc::new(ScriptedTransport::new(vec![response]));
            let err = manager(transport)
                .login(&Credentials::new("alice", "pw"))
                .await
                .unwrap_err();
            assert_eq!(err, expected);
        }
    }

    #[tokio::test]
    async fn challenge_at_login_is_reported() {
        let transport = Arc::new(ScriptedTransport::new(vec![ScriptedTransport::json(
            400,
            json!({"status": "fail", "message": "challenge_required", "challenge": {"url": "x"}}),
        )]));
        let err = manager(transport)
            .login(&Credentials::new("alice", "pw"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Challenge(_)));
    }

    #[tokio::test]
    async fn reauthenticate_refreshes_in_place() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            login_ok(json!(5678), "s1"),
            login_ok(json!("5678"), "s2"),
        ]));
        let store = Arc::new(StaticCredentials::new(Credentials::new("alice", "pw")));
        let manager = manager(transport).with_store(store);

        let session = manager.authenticate().await.unwrap();
        let rank = session.rank_token().to_string();
        manager.reauthenticate(&session).await.unwrap();

        assert_eq!(session.credentials().cookie("sessionid"), Some("s2"));
        assert_eq!(session.rank_token(), rank);
    }

    #[tokio::test]
    async fn reauthenticate_rejects_a_different_account() {
        let transport = Arc::new(ScriptedTransport::new(vec![login_ok(json!(9999), "s2")]));
        let store = Arc::new(StaticCredentials::new(Credentials::new("alice", "pw")));
        let manager = manager(transport).with_store(store);
        let session = Session::new("5678", "alice", DeviceIds::for_username("alice"), Default::default());

        let err = manager.reauthenticate(&session).await.unwrap_err();
        assert!(matches!(err, AuthError::IdentityMismatch { .. }));
    }

    #[tokio::test]
    async fn reauthenticate_without_refresh_credentials() {
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let store = Arc::new(
            StaticCredentials::new(Credentials::new("alice", "pw")).allow_relogin(false),
        );
        let manager = manager(Arc::clone(&transport)).with_store(store);
        let session = Session::new("5678", "alice", DeviceIds::for_username("alice"), Default::default());

        assert_eq!(
            manager.reauthenticate(&session).await.unwrap_err(),
            AuthError::NoCredentials
        );
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn logout_invalidates_even_if_the_server_fails() {
        let transport = Arc::new(ScriptedTransport::new(vec![Err(TransportError::Timeout)]));
        let manager = manager(Arc::clone(&transport));
        let session = Session::new("5678", "alice", DeviceIds::for_username("alice"), Default::default());

        manager.logout(&session).await;
        assert!(!session.is_active());
        session.expired().await;
        assert!(transport.urls()[0].ends_with("accounts/logout/"));
    }

    #[test]
    fn static_credentials_from_environment() {
        let store = StaticCredentials::from_lookup(|var| match var {
            "SHUTTER_USERNAME" => Some("alice".into()),
            "SHUTTER_PASSWORD" => Some("pw".into()),
            "SHUTTER_ALLOW_RELOGIN" => Some("false".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(store.credentials().unwrap().username, "alice");
        assert!(store.refresh_credentials().is_none());

        assert_eq!(
            StaticCredentials::from_lookup(|_| None).unwrap_err(),
            ConfigError::Missing("SHUTTER_USERNAME")
        );
    }
}
