//! # Tower Block
//!
//! `tower-block` puts a [`block_limit::Decider`] in front of any HTTP
//! [Tower](https://github.com/tower-rs/tower) service.
//!
//! ## The Block Stack
//! For every request the [`BlockLayer`]:
//!
//! 1. **Identifies** the caller: the `API_KEY` header when present, otherwise
//!    the client IP address (see [`identify`]).
//! 2. **Decides** admission through the shared counting store. Quotas are
//!    counted per one-second window and overflowing a window blocks the
//!    identifier for the configured duration.
//! 3. **Rejects** denied requests with [`BlockError::Denied`] without ever
//!    calling the inner service. Store failures are denials too.
//!
//! ## Feature Flags
//!
//! - `axum`: Enables `IntoResponse` for [`BlockError`] (429 with `Retry-After`),
//!   and reads the client address from axum's `ConnectInfo`.
//! - `gateway`: Builds the `block-gateway` binary, a complete HTTP server
//!   backed by Redis.

mod error;
mod identify;
mod layer;
mod service;
mod utils;


pub use error::BlockError;
#[cfg(feature = "axum")]
pub use error::handle_block_error;
pub use identify::API_KEY;
pub use identify::UNKNOWN_IDENTIFIER;
pub use identify::identify;
pub use layer::BlockLayer;
pub use service::BlockService;
pub use utils::ServiceBuilderExt;
