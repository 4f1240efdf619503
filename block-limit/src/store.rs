use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

/// Lifetime of a window counter, measured from its first increment.
pub const WINDOW: Duration = Duration::from_secs(1);

/// Namespace for block markers, keeping them apart from window counters.
pub const BLOCK_PREFIX: &str = "block:";

/// The store key of the block marker for `identifier`.
pub fn block_key(identifier: &str) -> String {
    format!("{BLOCK_PREFIX}{identifier}")
}

/// Failure to reach or use the backing store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached, or did not answer in time.
    #[error("counting store unavailable: {source}")]
    Unavailable {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl StoreError {
    pub fn unavailable(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Unavailable {
            source: source.into(),
        }
    }
}

/// The storage contract the [`crate::Decider`] depends on.
///
/// Counters and block markers live in disjoint keyspaces. An expired or reset
/// counter never clears an active block, and a block may exist for an
/// identifier that has never been counted.
#[async_trait]
pub trait CountingStore: Send + Sync {
    /// Atomically increments the window counter for `identifier` and returns
    /// the new count.
    ///
    /// An absent or expired counter is recreated with a value of 1 and a
    /// lifetime of [`WINDOW`]. Concurrent callers never observe the same count.
    async fn increment(&self, identifier: &str) -> Result<u64, StoreError>;

    /// Sets the block marker for `identifier` for `duration`, replacing any
    /// existing marker. A zero duration leaves no live marker.
    async fn block(&self, identifier: &str, duration: Duration) -> Result<(), StoreError>;

    /// Returns the remaining block time if an unexpired marker exists.
    ///
    /// Absent and expired markers are both reported as `None`.
    async fn is_blocked(&self, identifier: &str) -> Result<Option<Duration>, StoreError>;
}

#[async_trait]
impl<S> CountingStore for Arc<S>
where
    S: CountingStore + ?Sized,
{
    async fn increment(&self, identifier: &str) -> Result<u64, StoreError> {
        (**self).increment(identifier).await
    }

    async fn block(&self, identifier: &str, duration: Duration) -> Result<(), StoreError> {
        (**self).block(identifier, duration).await
    }

    async fn is_blocked(&self, identifier: &str) -> Result<Option<Duration>, StoreError> {
        (**self).is_blocked(identifier).await
    }
}

#[async_trait]
impl<S> CountingStore for Box<S>
where
    S: CountingStore + ?Sized,
{
    async fn increment(&self, identifier: &str) -> Result<u64, StoreError> {
        (**self).increment(identifier).await
    }

    async fn block(&self, identifier: &str, duration: Duration) -> Result<(), StoreError> {
        (**self).block(identifier, duration).await
    }

    async fn is_blocked(&self, identifier: &str) -> Result<Option<Duration>, StoreError> {
        (**self).is_blocked(identifier).await
    }
}
