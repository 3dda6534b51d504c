//! Async request engine for the private mobile API.
//!
//! Built on the pure logic in the `shutter` crate, this crate adds the parts
//! that do I/O or keep state:
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`config`] | `ClientConfig` from environment variables |
//! | [`transport`] | `Transport` trait and the reqwest implementation |
//! | [`session`] | `Session`, login, logout, re-login, credential stores |
//! | [`retry`] | Retry/backoff controller around one logical call |
//! | [`throttle`] | Rolling-window budgets per action kind |
//! | [`paginate`] | Cursor-driven `Paginator` |
//! | [`client`] | `Client`, the caller-facing surface |
//!
//! ```no_run
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! use shutter::{EndpointSpec, RequestDescriptor};
//! use shutter_client::{Client, ClientConfig, Credentials};
//!
//! let client = Client::from_config(&ClientConfig::from_env()?, None)?;
//! let session = client.login(&Credentials::new("alice", "secret")).await?;
//!
//! let feed = EndpointSpec::media_feed(RequestDescriptor::read("feed/timeline/"));
//! let collected = client.paginate(&session, feed).max_pages(3).collect_normalized().await;
//! for item in &collected.items {
//!     println!("{} by {}", item.id, item.owner_id);
//! }
//!
//! client.logout(&session).await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod paginate;
pub mod retry;
pub mod session;
pub mod throttle;
pub mod transport;

pub use client::Client;
pub use config::{ClientConfig, ConfigError, RetryPolicy, ThrottleLimit};
pub use error::{AuthError, CallError};
pub use paginate::{Collected, Completion, Page, PageLimits, Paginator};
pub use retry::RetryController;
pub use session::{
    CredentialStore, Credentials, DeviceIds, Reauthenticate, Session, SessionManager,
    StaticCredentials, TransportCredentials,
};
pub use throttle::{ActionThrottle, Denied, Permit};
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport, TransportError};
