//! # block-limit
//!
//! `block-limit` decides, per request identifier, whether a request is admitted
//! under a quota enforced across a shared counting store.
//!
//! ## Core Philosophy
//!
//! The [`Decider`] holds no mutable state of its own. Every request counter and
//! block marker lives in a [`CountingStore`], so any number of gateway
//! processes can share one quota by pointing at the same store.
//!
//! ## Key Concepts
//!
//! * **Fixed Window**: Each identifier gets a counter that expires one second
//!   after its first increment. Bursts spanning a window boundary are possible.
//! * **Block Penalty**: The first request that pushes a window over its limit is
//!   denied and sets a block marker for the configured duration. While the
//!   marker is live, requests are denied without touching the counter.
//! * **Fail Closed**: Any store failure denies the request.
//!
//! ## Example
//!
//! ```rust
//! use std::num::NonZeroU64;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use block_limit::Decider;
//! use block_limit::MemoryStore;
//! use block_limit::Quota;
//! use block_limit::Quotas;
//!
//! # tokio_test();
//! # fn tokio_test() {
//! # let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
//! # rt.block_on(async {
//! let limit = NonZeroU64::new(5).unwrap();
//! let quotas = Quotas::new(Quota::new(limit, Duration::from_secs(60)));
//! let decider = Decider::new(quotas, Arc::new(MemoryStore::new()));
//!
//! if decider.allow("192.168.1.2").await {
//!     // Request allowed
//! }
//! # });
//! # }
//! ```

mod config;
mod decider;
mod memory;
mod quota;
mod store;

pub use config::ConfigError;
pub use config::TOKEN_LIMIT_PREFIX;
pub use decider::Decider;
pub use decider::Denial;
pub use memory::MemoryStore;
pub use quota::Quota;
pub use quota::Quotas;
pub use store::BLOCK_PREFIX;
pub use store::CountingStore;
pub use store::StoreError;
pub use store::WINDOW;
pub use store::block_key;
