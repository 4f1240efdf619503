use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use quanta::Clock;
use quanta::Instant;

use crate::store::CountingStore;
use crate::store::StoreError;
use crate::store::WINDOW;

#[derive(Debug)]
struct Window {
    count: u64,
    expires: Instant,
}

/// An in-process [`CountingStore`].
///
/// Suitable for tests and single-instance deployments. Entries are kept until
/// they are overwritten or purged, so expiry is always checked against the
/// clock rather than assumed from the entry being present.
#[derive(Debug)]
pub struct MemoryStore {
    counters: DashMap<String, Window>,
    // `None` marks a block whose expiry lies beyond the clock's range.
    blocks: DashMap<String, Option<Instant>>,
    clock: Clock,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Clock::new())
    }

    pub fn with_clock(clock: Clock) -> Self {
        Self {
            counters: DashMap::new(),
            blocks: DashMap::new(),
            clock,
        }
    }

    /// Drop the window counter for `identifier`, as if it had expired.
    ///
    /// Block markers are left untouched.
    pub fn reset_window(&self, identifier: &str) {
        self.counters.remove(identifier);
    }

    /// Remove every expired counter and block marker.
    ///
    /// Returns the number of entries removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut removed = 0;
        self.counters.retain(|_, window| {
            let live = window.expires > now;
            removed += usize::from(!live);
            live
        });
        self.blocks.retain(|_, expires| {
            let live = expires.is_none_or(|expires| expires > now);
            removed += usize::from(!live);
            live
        });
        removed
    }

    /// Number of identifiers with a live window.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.counters
            .iter()
            .filter(|window| window.expires > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CountingStore for MemoryStore {
    async fn increment(&self, identifier: &str) -> Result<u64, StoreError> {
        let now = self.clock.now();
        // The entry guard holds the shard lock, so the read-modify-write is atomic.
        let mut window = self
            .counters
            .entry(identifier.to_owned())
            .or_insert_with(|| Window {
                count: 0,
                expires: now + WINDOW,
            });

        if window.expires <= now {
            window.count = 0;
            window.expires = now + WINDOW;
        }
        window.count += 1;
        Ok(window.count)
    }

    async fn block(&self, identifier: &str, duration: Duration) -> Result<(), StoreError> {
        if duration.is_zero() {
            self.blocks.remove(identifier);
        } else {
            let expires = self.clock.now().checked_add(duration);
            self.blocks.insert(identifier.to_owned(), expires);
        }
        Ok(())
    }

    async fn is_blocked(&self, identifier: &str) -> Result<Option<Duration>, StoreError> {
        let now = self.clock.now();
        // Copy out so the read guard is released before any removal.
        let expires = match self.blocks.get(identifier).map(|expires| *expires) {
            None => return Ok(None),
            Some(None) => return Ok(Some(Duration::MAX)),
            Some(Some(expires)) => expires,
        };

        if expires > now {
            return Ok(Some(expires.duration_since(now)));
        }

        self.blocks
            .remove_if(identifier, |_, expires| expires.is_some_and(|e| e <= now));
        Ok(None)
    }
}
