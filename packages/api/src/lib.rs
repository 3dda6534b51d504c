//! Wire types for the private mobile API.
//!
//! Every response from the remote API is a JSON object carrying a `status`
//! field (`"ok"` or `"fail"`) next to an endpoint-specific payload. HTTP 200
//! does not imply success, so the envelope is the only source of truth for
//! the outcome of a call. This crate models the envelope fields the engine
//! inspects and the well-known marker strings the server uses to signal
//! rate limiting, expired sessions and challenges.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`envelope`] | [`Envelope`] and [`EnvelopeStatus`] |
//! | [`login`] | `accounts/login/` response: [`LoginResponse`], [`LoggedInUser`] |
//! | [`markers`] | Marker strings found in `message` / `error_type` |

pub mod envelope;
pub mod login;
pub mod markers;

pub use envelope::{Envelope, EnvelopeStatus};
pub use login::{LoggedInUser, LoginResponse};
