//! Client configuration, populated from environment variables.

use std::collections::HashMap;
use std::time::Duration;

use shutter::signing::DEFAULT_SIG_KEY_VERSION;
use shutter::{ActionKind, Signer};

pub const DEFAULT_API_URL: &str = "https://i.instagram.com/api/v1/";

/// The signature key published with the Android app build that
/// [`DEFAULT_USER_AGENT`] impersonates.
pub const DEFAULT_SIG_KEY: &str =
    "4f8732eb9ba7d1c8e8897a75d6474d4eb3f5279137431b2aafb71fafe2abe178";

pub const DEFAULT_USER_AGENT: &str =
    "Instagram 10.26.0 Android (18/4.3; 320dpi; 720x1280; Xiaomi; HM 1SW; armani; qcom; en_US)";

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Errors from [`ClientConfig::from_env`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be {expected}, got {value:?}")]
    Invalid {
        var: String,
        expected: &'static str,
        value: String,
    },

    #[error("{0} must be set")]
    Missing(&'static str),
}

/// `count` actions per rolling `window`. A count of `0` disables the limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleLimit {
    pub count: u32,
    pub window: Duration,
}

impl ThrottleLimit {
    pub fn new(count: u32, window: Duration) -> Self {
        Self { count, window }
    }

    pub fn per_day(count: u32) -> Self {
        Self::new(count, DAY)
    }

    pub fn is_unlimited(&self) -> bool {
        self.count == 0 || self.window.is_zero()
    }
}

/// Parses `"<count>/<window-secs>"`, e.g. `"60/3600"`.
impl std::str::FromStr for ThrottleLimit {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (count, secs) = s
            .split_once('/')
            .ok_or_else(|| format!("expected <count>/<window-secs>, got {s:?}"))?;
        let count = count
            .trim()
            .parse::<u32>()
            .map_err(|e| format!("invalid count {count:?}: {e}"))?;
        let secs = secs
            .trim()
            .parse::<u64>()
            .map_err(|e| format!("invalid window {secs:?}: {e}"))?;
        Ok(Self::new(count, Duration::from_secs(secs)))
    }
}

/// Retry ceiling and backoff curve for one logical call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,

    /// Wall-clock budget for all attempts and backoff sleeps together.
    pub max_elapsed: Duration,

    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            max_elapsed: Duration::from_secs(300),
            backoff_base: Duration::from_secs(2),
            backoff_cap: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`,
    /// capped at `backoff_cap`.
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let shift = retry.saturating_sub(1).min(16);
        self.backoff_base
            .saturating_mul(1u32 << shift)
            .min(self.backoff_cap)
    }
}

/// Default per-kind budgets, per rolling 24 hours.
pub fn default_throttle_limits() -> HashMap<ActionKind, ThrottleLimit> {
    HashMap::from([
        (ActionKind::Like, ThrottleLimit::per_day(1000)),
        (ActionKind::Unlike, ThrottleLimit::per_day(1000)),
        (ActionKind::Follow, ThrottleLimit::per_day(350)),
        (ActionKind::Unfollow, ThrottleLimit::per_day(350)),
        (ActionKind::Comment, ThrottleLimit::per_day(100)),
        (ActionKind::Block, ThrottleLimit::per_day(100)),
        (ActionKind::Unblock, ThrottleLimit::per_day(100)),
        (ActionKind::DirectMessage, ThrottleLimit::per_day(300)),
    ])
}

/// Runtime configuration for a [`Client`](crate::Client).
///
/// | Variable | Default | Description |
/// |----------|---------|-------------|
/// | `SHUTTER_API_URL` | `https://i.instagram.com/api/v1/` | API base URL |
/// | `SHUTTER_SIG_KEY` | published key | HMAC signature key |
/// | `SHUTTER_SIG_KEY_VERSION` | `4` | Signature key version |
/// | `SHUTTER_USER_AGENT` | Android app UA | `User-Agent` header |
/// | `SHUTTER_REQUEST_TIMEOUT_SECS` | `30` | Per-request transport timeout |
/// | `SHUTTER_MAX_ATTEMPTS` | `5` | Attempts per logical call |
/// | `SHUTTER_MAX_RETRY_SECS` | `300` | Wall-clock ceiling per logical call |
/// | `SHUTTER_BACKOFF_BASE_MS` | `2000` | First backoff delay |
/// | `SHUTTER_BACKOFF_CAP_MS` | `60000` | Largest backoff delay |
/// | `SHUTTER_THROTTLE_<KIND>` | see [`default_throttle_limits`] | `<count>/<window-secs>` |
///
/// `<KIND>` is the uppercase action kind, e.g. `SHUTTER_THROTTLE_LIKE` or
/// `SHUTTER_THROTTLE_DIRECT_MESSAGE`.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_url: String,
    pub sig_key: String,
    pub sig_key_version: String,
    pub user_agent: String,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub throttle: HashMap<ActionKind, ThrottleLimit>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.into(),
            sig_key: DEFAULT_SIG_KEY.into(),
            sig_key_version: DEFAULT_SIG_KEY_VERSION.into(),
            user_agent: DEFAULT_USER_AGENT.into(),
            request_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            throttle: default_throttle_limits(),
        }
    }
}

impl ClientConfig {
    /// Populate config from the process environment, applying defaults where absent.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Populate config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("SHUTTER_API_URL") {
            config.api_url = url;
        }
        if let Some(key) = lookup("SHUTTER_SIG_KEY") {
            config.sig_key = key;
        }
        if let Some(version) = lookup("SHUTTER_SIG_KEY_VERSION") {
            config.sig_key_version = version;
        }
        if let Some(ua) = lookup("SHUTTER_USER_AGENT") {
            config.user_agent = ua;
        }

        let number = |var: &str| -> Result<Option<u64>, ConfigError> {
            lookup(var)
                .map(|v| {
                    v.trim().parse::<u64>().map_err(|_| ConfigError::Invalid {
                        var: var.to_string(),
                        expected: "a non-negative integer",
                        value: v.clone(),
                    })
                })
                .transpose()
        };

        if let Some(secs) = number("SHUTTER_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(n) = number("SHUTTER_MAX_ATTEMPTS")? {
            config.retry.max_attempts = u32::try_from(n).unwrap_or(u32::MAX).max(1);
        }
        if let Some(secs) = number("SHUTTER_MAX_RETRY_SECS")? {
            config.retry.max_elapsed = Duration::from_secs(secs);
        }
        if let Some(ms) = number("SHUTTER_BACKOFF_BASE_MS")? {
            config.retry.backoff_base = Duration::from_millis(ms);
        }
        if let Some(ms) = number("SHUTTER_BACKOFF_CAP_MS")? {
            config.retry.backoff_cap = Duration::from_millis(ms);
        }

        for kind in ActionKind::ALL {
            let var = format!("SHUTTER_THROTTLE_{}", kind.as_str().to_uppercase());
            if let Some(raw) = lookup(&var) {
                let limit = raw.parse::<ThrottleLimit>().map_err(|_| ConfigError::Invalid {
                    var: var.clone(),
                    expected: "<count>/<window-secs>",
                    value: raw.clone(),
                })?;
                config.throttle.insert(kind, limit);
            }
        }

        Ok(config)
    }

    pub fn signer(&self) -> Signer {
        Signer::new(self.sig_key.clone(), self.sig_key_version.clone())
    }

    /// Headers sent on every request, before session credentials.
    pub fn base_headers(&self) -> Vec<(String, String)> {
        vec![
            ("User-Agent".into(), self.user_agent.clone()),
            ("Accept".into(), "*/*".into()),
            ("Accept-Language".into(), "en-US".into()),
            ("X-IG-Capabilities".into(), "3brTBw==".into()),
            ("X-IG-Connection-Type".into(), "WIFI".into()),
        ]
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
