//! The caller-facing engine.

use std::sync::Arc;

use serde_json::Value;
use shutter::{ActionKind, EndpointSpec, Method, RequestDescriptor};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::ClientConfig;
use crate::error::{AuthError, CallError};
use crate::paginate::Paginator;
use crate::retry::RetryController;
use crate::session::{CredentialStore, Credentials, Session, SessionManager, TransportCredentials};
use crate::throttle::{ActionThrottle, Denied, Permit};
use crate::transport::{ReqwestTransport, Transport, TransportError};

/// Signs, sends, classifies, retries, throttles and paginates calls against
/// the remote API on behalf of an explicit [`Session`].
///
/// One `Client` can serve many sessions and many concurrent calls; the only
/// state shared between calls is the action throttle.
pub struct Client {
    controller: RetryController,
    sessions: Arc<SessionManager>,
    throttle: ActionThrottle,
}

impl Client {
    pub fn new(
        config: &ClientConfig,
        transport: Arc<dyn Transport>,
        store: Option<Arc<dyn CredentialStore>>,
    ) -> Self {
        let headers = config.base_headers();
        let mut sessions = SessionManager::new(
            Arc::clone(&transport),
            config.signer(),
            config.api_url.clone(),
            headers.clone(),
        );
        if let Some(store) = store {
            sessions = sessions.with_store(store);
        }
        let sessions = Arc::new(sessions);

        let controller = RetryController::new(
            transport,
            config.signer(),
            config.api_url.clone(),
            headers,
            config.retry.clone(),
            sessions.clone(),
        );

        Self {
            controller,
            sessions,
            throttle: ActionThrottle::new(config.throttle.clone()),
        }
    }

    /// A client over [`ReqwestTransport`] with the configured request timeout.
    pub fn from_config(
        config: &ClientConfig,
        store: Option<Arc<dyn CredentialStore>>,
    ) -> Result<Self, TransportError> {
        let transport = ReqwestTransport::with_timeout(config.request_timeout)?;
        Ok(Self::new(config, Arc::new(transport), store))
    }

    // ── Sessions ────────────────────────────────────────────────────────────

    pub async fn login(&self, credentials: &Credentials) -> Result<Arc<Session>, AuthError> {
        self.sessions.login(credentials).await.map(Arc::new)
    }

    /// Log in with the credential store's credentials.
    pub async fn authenticate(&self) -> Result<Arc<Session>, AuthError> {
        self.sessions.authenticate().await.map(Arc::new)
    }

    pub async fn logout(&self, session: &Session) {
        self.sessions.logout(session).await;
    }

    pub fn refresh(&self, session: &Session, credentials: TransportCredentials) {
        self.sessions.refresh(session, credentials);
    }

    // ── Calls ───────────────────────────────────────────────────────────────

    /// Reserve a throttle slot for a `kind` write. The slot is counted once
    /// the write is dispatched through [`Client::call_with_permit`].
    pub fn permit_action(&self, kind: ActionKind) -> Result<Permit, Denied> {
        self.throttle.permit(kind)
    }

    pub fn throttle(&self) -> &ActionThrottle {
        &self.throttle
    }

    /// Run one logical call. Writes tagged with an action kind pass through
    /// the throttle first.
    pub async fn call(
        &self,
        descriptor: &RequestDescriptor,
        session: &Session,
    ) -> Result<Value, CallError> {
        self.call_with_cancel(descriptor, session, &CancellationToken::new())
            .await
    }

    pub async fn call_with_cancel(
        &self,
        descriptor: &RequestDescriptor,
        session: &Session,
        cancel: &CancellationToken,
    ) -> Result<Value, CallError> {
        let permit = match (descriptor.method(), descriptor.action_kind()) {
            (Method::Write, Some(kind)) => Some(self.throttle.permit(kind)?),
            _ => None,
        };
        self.controller
            .execute(descriptor, session, cancel, permit)
            .await
    }

    /// Run a write with a permit obtained earlier from
    /// [`Client::permit_action`]. The permit must be for the descriptor's
    /// action kind; otherwise it is released and the call is refused.
    pub async fn call_with_permit(
        &self,
        descriptor: &RequestDescriptor,
        session: &Session,
        permit: Permit,
        cancel: &CancellationToken,
    ) -> Result<Value, CallError> {
        let action = descriptor.action_kind();
        if action != Some(permit.kind()) {
            warn!(
                "throttle: {} permit offered for {}",
                permit.kind(),
                descriptor.endpoint()
            );
            return Err(CallError::PermitMismatch {
                permit: permit.kind(),
                action,
            });
        }
        self.controller
            .execute(descriptor, session, cancel, Some(permit))
            .await
    }

    pub fn paginate<'c>(&'c self, session: &'c Session, spec: EndpointSpec) -> Paginator<'c> {
        Paginator::new(self, session, spec)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
