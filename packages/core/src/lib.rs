//! Request/response engine core for the private mobile API.
//!
//! This crate is the pure half of the engine: it has **no I/O** and no
//! async runtime. It turns call descriptions into signed, transport-ready
//! requests, classifies decoded responses into a closed set of outcomes,
//! and reduces raw items to a small normalised shape. The `shutter-client`
//! crate wraps it with transport, sessions, retries, throttling and
//! pagination.
//!
//! # Crate layout
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`descriptor`] | [`RequestDescriptor`], [`Method`], [`ActionKind`] |
//! | [`signing`] | [`Signer`]: HMAC body signing and canonical query strings |
//! | [`classify`] | [`classify`](classify::classify) → [`Classification`] |
//! | [`endpoint`] | [`EndpointSpec`]: where cursors and items live per endpoint |
//! | [`normalize`] | [`NormalizedItem`] from media, user and comment objects |
//! | [`shortcode`] | Media shortcode ↔ media id |
//!
//! # Quick start
//!
//! ```rust,ignore
//! use shutter::{classify, decode_body, RequestDescriptor, Signer};
//!
//! let signer = Signer::new(sig_key, "4");
//! let like = RequestDescriptor::write("media/{media_id}/like/")
//!     .path_param("media_id", 1234)
//!     .body_field("media_id", "1234");
//! let signed = signer.sign(&like, None)?;
//! // ... hand signed.url(api_base) and signed.body to a transport ...
//! let outcome = classify(status, decode_body(&bytes));
//! ```

pub mod classify;
pub mod descriptor;
pub mod endpoint;
pub mod normalize;
pub mod shortcode;
pub mod signing;

pub use classify::{classify, decode_body, Classification};
pub use descriptor::{ActionKind, Method, RequestDescriptor};
pub use endpoint::{EndpointSpec, PageParts};
pub use normalize::{normalize, ItemKind, NormalizedItem};
pub use shortcode::{code_from_media_id, media_id_from_code, media_id_from_link, ShortcodeError};
pub use signing::{SignError, SignedRequest, Signer};
