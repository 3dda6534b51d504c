//! The retry/backoff controller.
//!
//! [`RetryController::execute`] turns one logical call into as many HTTP
//! attempts as policy allows:
//!
//! - `RateLimited` and retryable transport errors back off and retry, up to
//!   `max_attempts`. The server's `Retry-After` hint wins over the
//!   exponential curve but is still capped.
//! - `AuthExpired` triggers one re-login, then the call is re-sent once.
//!   Concurrent calls on one session share a single re-login: whoever gets
//!   the session's re-login lock second sees the credentials have moved on
//!   and just re-sends.
//! - `SoftFailure` and `HardFailure` are returned immediately.
//! - The whole call, sleeps and re-login included, is bounded by
//!   `max_elapsed`.
//!
//! Both the in-flight request and backoff sleeps race the caller's
//! cancellation token and the session's logout signal.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use shutter::{classify, decode_body, Classification, RequestDescriptor, SignError, Signer};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RetryPolicy;
use crate::error::CallError;
use crate::session::{Reauthenticate, Session};
use crate::throttle::Permit;
use crate::transport::{HttpRequest, Transport, TransportError};

/// Why an attempt is being retried.
enum Retry {
    RateLimited(Option<Duration>),
    Transport(TransportError),
}

impl Retry {
    fn exhausted(self, attempts: u32) -> CallError {
        match self {
            Retry::RateLimited(retry_after) => CallError::RateLimited {
                attempts,
                retry_after,
            },
            Retry::Transport(last) => {
                debug!("call: last transport error was {last}");
                CallError::Timeout { attempts }
            }
        }
    }
}

pub struct RetryController {
    transport: Arc<dyn Transport>,
    signer: Signer,
    api_url: String,
    headers: Vec<(String, String)>,
    policy: RetryPolicy,
    reauth: Arc<dyn Reauthenticate>,
}

impl RetryController {
    pub fn new(
        transport: Arc<dyn Transport>,
        signer: Signer,
        api_url: impl Into<String>,
        headers: Vec<(String, String)>,
        policy: RetryPolicy,
        reauth: Arc<dyn Reauthenticate>,
    ) -> Self {
        Self {
            transport,
            signer,
            api_url: api_url.into(),
            headers,
            policy,
            reauth,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Sign `descriptor` for `session` and build the wire request, with a
    /// snapshot of the session's current credentials.
    pub fn prepare(
        &self,
        descriptor: &RequestDescriptor,
        session: &Session,
    ) -> Result<HttpRequest, SignError> {
        let stamped =
            descriptor.with_session_fields(session.identity_id(), &session.device().guid);
        let signed = self.signer.sign(&stamped, Some(session.rank_token()))?;
        let mut headers = self.headers.clone();
        headers.extend(session.credentials().headers());
        Ok(HttpRequest::from_signed(&signed, &self.api_url, headers))
    }

    /// Run one logical call to completion. Returns the decoded body on
    /// `Success`; every other outcome maps to a [`CallError`].
    ///
    /// `permit`, if given, is committed when the first attempt is
    /// dispatched. If the call fails before that it is released.
    pub async fn execute(
        &self,
        descriptor: &RequestDescriptor,
        session: &Session,
        cancel: &CancellationToken,
        mut permit: Option<Permit>,
    ) -> Result<Value, CallError> {
        let verb = descriptor.method().http_verb();
        let endpoint = descriptor.endpoint();
        let deadline = Instant::now() + self.policy.max_elapsed;
        let mut attempts = 0u32;
        let mut reauthenticated = false;

        loop {
            if cancel.is_cancelled() {
                return Err(CallError::Cancelled);
            }
            if !session.is_active() {
                return Err(CallError::SessionExpired);
            }

            let generation = session.generation();
            let request = self.prepare(descriptor, session)?;
            attempts += 1;
            if let Some(permit) = permit.take() {
                permit.commit();
            }
            debug!("call: {verb} {endpoint} attempt {attempts}");

            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(CallError::Cancelled),
                _ = session.expired() => return Err(CallError::SessionExpired),
                sent = tokio::time::timeout_at(deadline, self.transport.send(request)) => sent,
            };

            let retry = match sent {
                Err(_) => {
                    warn!("call: {verb} {endpoint} ran out of time on attempt {attempts}");
                    return Err(CallError::Timeout { attempts });
                }
                Ok(Err(e)) if e.is_retryable() => {
                    warn!("call: {verb} {endpoint} transport error on attempt {attempts}: {e}");
                    Retry::Transport(e)
                }
                Ok(Err(e)) => return Err(CallError::Transport(e)),
                Ok(Ok(resp)) => {
                    if !session.is_active() {
                        return Err(CallError::SessionExpired);
                    }
                    let header_hint = resp.retry_after();
                    let outcome = classify(resp.status, decode_body(&resp.body));
                    debug!(
                        "call: {verb} {endpoint} -> {} (http {})",
                        outcome.category(),
                        resp.status
                    );
                    match outcome {
                        Classification::Success(body) => return Ok(body),
                        Classification::SoftFailure(reason) => {
                            warn!("call: {verb} {endpoint} needs attention: {reason}");
                            return Err(CallError::SoftFailure(reason));
                        }
                        Classification::HardFailure(reason) => {
                            return Err(CallError::HardFailure(reason))
                        }
                        Classification::AuthExpired => {
                            if reauthenticated {
                                return Err(CallError::AuthExpired);
                            }
                            reauthenticated = true;
                            self.reauthenticate(session, generation, cancel, deadline, attempts)
                                .await?;
                            continue;
                        }
                        Classification::RateLimited { retry_after } => {
                            Retry::RateLimited(retry_after.or(header_hint))
                        }
                    }
                }
            };

            if attempts >= self.policy.max_attempts {
                warn!("call: {verb} {endpoint} giving up after {attempts} attempts");
                return Err(retry.exhausted(attempts));
            }

            let delay = match &retry {
                Retry::RateLimited(Some(hint)) => (*hint).min(self.policy.backoff_cap),
                _ => self.policy.backoff_delay(attempts),
            };
            if Instant::now() + delay >= deadline {
                warn!("call: {verb} {endpoint} backoff would pass the retry deadline");
                return Err(CallError::Timeout { attempts });
            }

            info!("call: {verb} {endpoint} backing off {delay:?} after attempt {attempts}");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(CallError::Cancelled),
                _ = session.expired() => return Err(CallError::SessionExpired),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Restore `session` after an attempt sent with credentials of
    /// `generation` came back expired.
    async fn reauthenticate(
        &self,
        session: &Session,
        generation: u64,
        cancel: &CancellationToken,
        deadline: Instant,
        attempts: u32,
    ) -> Result<(), CallError> {
        let relogin = async {
            let _guard = session.relogin_lock().await;
            if session.generation() != generation {
                debug!("session: {} already refreshed, re-sending", session.username());
                return Ok(());
            }
            info!("session: {} expired, re-authenticating", session.username());
            self.reauth.reauthenticate(session).await
        };
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CallError::Cancelled),
            _ = session.expired() => return Err(CallError::SessionExpired),
            result = tokio::time::timeout_at(deadline, relogin) => result,
        };
        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                warn!("session: re-authentication of {} failed: {e}", session.username());
                Err(CallError::AuthExpired)
            }
            Err(_) => {
                warn!("session: re-authentication of {} ran out of time", session.username());
                Err(CallError::Timeout { attempts })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
