use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use crate::quota::Quota;
use crate::quota::Quotas;
use crate::store::CountingStore;

/// Why a request was denied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Denial {
    /// A block marker is active for the identifier.
    Blocked { remaining: Duration },
    /// This request pushed the window count over the limit. A block of
    /// `block` has been requested from the store.
    QuotaExceeded { count: u64, limit: u64, block: Duration },
    /// The store could not be consulted, so the request is denied.
    StoreUnavailable,
}

impl Denial {
    /// How long the caller should wait before retrying, if known.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Blocked { remaining } => Some(*remaining),
            Self::QuotaExceeded { block, .. } if !block.is_zero() => Some(*block),
            Self::QuotaExceeded { .. } | Self::StoreUnavailable => None,
        }
    }
}

/// Makes the admission decision for each identifier.
///
/// The quota table is fixed at construction. All mutable state lives in the
/// store, so a `Decider` can be cloned freely and shared across tasks.
#[derive(Debug)]
pub struct Decider<S>
where
    S: ?Sized,
{
    quotas: Arc<Quotas>,
    store: Arc<S>,
}

impl<S> Clone for Decider<S>
where
    S: ?Sized,
{
    fn clone(&self) -> Self {
        Self {
            quotas: Arc::clone(&self.quotas),
            store: Arc::clone(&self.store),
        }
    }
}

impl<S> Decider<S>
where
    S: CountingStore + ?Sized,
{
    pub fn new(quotas: Quotas, store: Arc<S>) -> Self {
        Self {
            quotas: Arc::new(quotas),
            store,
        }
    }

    pub fn quotas(&self) -> &Quotas {
        &self.quotas
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The quota in force for `identifier`.
    pub fn quota_for(&self, identifier: &str) -> Quota {
        *self.quotas.resolve(identifier)
    }

    /// Decides whether a request from `identifier` is admitted.
    ///
    /// A blocked identifier is denied without touching its counter. Otherwise
    /// the counter is incremented, and the request that takes it past the limit
    /// is itself denied and sets the block. Store failures deny.
    pub async fn check(&self, identifier: &str) -> ControlFlow<Denial> {
        match self.store.is_blocked(identifier).await {
            Ok(Some(remaining)) => return ControlFlow::Break(Denial::Blocked { remaining }),
            Ok(None) => {}
            Err(error) => {
                tracing::error!(%error, "failed to read block state");
                return ControlFlow::Break(Denial::StoreUnavailable);
            }
        }

        let quota = self.quota_for(identifier);

        let count = match self.store.increment(identifier).await {
            Ok(count) => count,
            Err(error) => {
                tracing::error!(%error, "failed to increment window counter");
                return ControlFlow::Break(Denial::StoreUnavailable);
            }
        };

        if count <= quota.limit() {
            return ControlFlow::Continue(());
        }

        // Identifiers may be API tokens, so they are only logged at debug.
        tracing::debug!(identifier, count, "quota exceeded");

        // Later requests in the same window also exceed the limit, so a failed
        // block write is retried by them until the window expires.
        match self.store.block(identifier, quota.block()).await {
            Ok(()) => tracing::info!(
                count,
                limit = quota.limit(),
                block = ?quota.block(),
                "quota exceeded, blocking"
            ),
            Err(error) => tracing::warn!(
                count,
                %error,
                "quota exceeded, failed to set block"
            ),
        }

        ControlFlow::Break(Denial::QuotaExceeded {
            count,
            limit: quota.limit(),
            block: quota.block(),
        })
    }

    /// `true` if a request from `identifier` is admitted.
    pub async fn allow(&self, identifier: &str) -> bool {
        self.check(identifier).await.is_continue()
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU64;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicBool;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use async_trait::async_trait;
    use quanta::Clock;

    use super::*;
    use crate::memory::MemoryStore;
    use crate::store::StoreError;

    fn quota(limit: u64, block: Duration) -> Quota {
        Quota::new(NonZeroU64::new(limit).unwrap(), block)
    }

    fn base_quotas() -> Quotas {
        Quotas::new(quota(5, Duration::from_secs(60)))
            .with_override("good-token", quota(10, Duration::from_secs(60)))
    }

    async fn count_allowed<S: CountingStore + ?Sized>(
        decider: &Decider<S>,
        identifier: &str,
        requests: usize,
    ) -> (usize, bool) {
        let mut allowed = 0;
        let mut last = false;
        for _ in 0..requests {
            last = decider.allow(identifier).await;
            allowed += usize::from(last);
        }
        (allowed, last)
    }

    #[tokio::test]
    async fn it_enforces_limits() {
        let cases = [
            ("ip within limit", "192.168.1.1", 5, 5, true),
            ("ip exceeding limit", "192.168.1.2", 6, 5, false),
            ("token within limit", "good-token", 10, 10, true),
            ("token exceeding limit", "good-token", 11, 10, false),
        ];

        for (name, identifier, requests, expected_allowed, last_allowed) in cases {
            let decider = Decider::new(base_quotas(), Arc::new(MemoryStore::new()));
            let (allowed, last) = count_allowed(&decider, identifier, requests).await;
            assert_eq!(allowed, expected_allowed, "{name}");
            assert_eq!(last, last_allowed, "{name}");
        }
    }

    #[tokio::test]
    async fn test_overflow_sets_block() {
        let store = Arc::new(MemoryStore::new());
        let decider = Decider::new(base_quotas(), Arc::clone(&store));

        for _ in 0..5 {
            assert!(decider.check("192.168.1.2").await.is_continue());
        }
        assert_eq!(
            decider.check("192.168.1.2").await,
            ControlFlow::Break(Denial::QuotaExceeded {
                count: 6,
                limit: 5,
                block: Duration::from_secs(60),
            })
        );
        assert!(store.is_blocked("192.168.1.2").await.unwrap().is_some());

        // Still blocked on the next immediate call.
        assert!(matches!(
            decider.check("192.168.1.2").await,
            ControlFlow::Break(Denial::Blocked { .. })
        ));
    }

    #[tokio::test]
    async fn test_blocked_requests_are_not_counted() {
        let (clock, _mock) = Clock::mock();
        let store = Arc::new(MemoryStore::with_clock(clock));
        let decider = Decider::new(base_quotas(), Arc::clone(&store));

        store.block("10.0.0.9", Duration::from_secs(60)).await.unwrap();
        for _ in 0..20 {
            assert!(!decider.allow("10.0.0.9").await);
        }
        assert_eq!(store.increment("10.0.0.9").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_block_expiry_restores_access() {
        let (clock, mock) = Clock::mock();
        let store = Arc::new(MemoryStore::with_clock(clock));
        let quotas = Quotas::new(quota(2, Duration::from_millis(500)));
        let decider = Decider::new(quotas, Arc::clone(&store));
        let identifier = "10.0.0.1";

        assert!(decider.allow(identifier).await, "Request 1 should be allowed");
        assert!(decider.allow(identifier).await, "Request 2 should be allowed");
        assert!(!decider.allow(identifier).await, "Request 3 should be denied");

        mock.increment(Duration::from_millis(700));
        // The counter would expire on its own at 1s.
        store.reset_window(identifier);

        assert!(
            decider.allow(identifier).await,
            "Request should be allowed after the block duration has passed"
        );
    }

    #[tokio::test]
    async fn test_block_and_window_expire_independently() {
        let (clock, mock) = Clock::mock();
        let store = Arc::new(MemoryStore::with_clock(clock));
        let quotas = Quotas::new(quota(2, Duration::from_secs(5)));
        let decider = Decider::new(quotas, Arc::clone(&store));

        for _ in 0..3 {
            decider.allow("a").await;
        }

        // Window has expired, block has not.
        mock.increment(Duration::from_secs(2));
        assert!(!decider.allow("a").await);

        mock.increment(Duration::from_secs(3));
        assert!(decider.allow("a").await);
    }

    #[tokio::test]
    async fn test_token_override_ignores_default() {
        let (clock, mock) = Clock::mock();
        let store = Arc::new(MemoryStore::with_clock(clock));
        let quotas = Quotas::new(quota(1, Duration::from_secs(600)))
            .with_override("fast-token", quota(3, Duration::from_millis(100)));
        let decider = Decider::new(quotas, Arc::clone(&store));

        let (allowed, _) = count_allowed(&decider, "fast-token", 4).await;
        assert_eq!(allowed, 3);
        assert_eq!(
            store.is_blocked("fast-token").await.unwrap(),
            Some(Duration::from_millis(100))
        );

        mock.increment(Duration::from_secs(1));
        assert!(decider.allow("fast-token").await);
    }

    #[tokio::test]
    async fn test_zero_block_denies_for_rest_of_window() {
        let (clock, mock) = Clock::mock();
        let store = Arc::new(MemoryStore::with_clock(clock));
        let decider = Decider::new(Quotas::new(quota(1, Duration::ZERO)), store);

        assert!(decider.allow("a").await);
        assert_eq!(decider.check("a").await.break_value().unwrap().retry_after(), None);
        assert!(!decider.allow("a").await);

        mock.increment(Duration::from_secs(1));
        assert!(decider.allow("a").await);
    }

    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_reads: AtomicBool,
        fail_increments: AtomicBool,
        fail_blocks: AtomicBool,
        block_attempts: AtomicUsize,
    }

    #[async_trait]
    impl CountingStore for FlakyStore {
        async fn increment(&self, identifier: &str) -> Result<u64, StoreError> {
            if self.fail_increments.load(Ordering::SeqCst) {
                return Err(StoreError::unavailable("increment refused"));
            }
            self.inner.increment(identifier).await
        }

        async fn block(&self, identifier: &str, duration: Duration) -> Result<(), StoreError> {
            self.block_attempts.fetch_add(1, Ordering::SeqCst);
            if self.fail_blocks.load(Ordering::SeqCst) {
                return Err(StoreError::unavailable("block refused"));
            }
            self.inner.block(identifier, duration).await
        }

        async fn is_blocked(&self, identifier: &str) -> Result<Option<Duration>, StoreError> {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(StoreError::unavailable("read refused"));
            }
            self.inner.is_blocked(identifier).await
        }
    }

    #[tokio::test]
    async fn test_fails_closed_on_read_error() {
        let store = Arc::new(FlakyStore::default());
        store.fail_reads.store(true, Ordering::SeqCst);
        let decider = Decider::new(base_quotas(), Arc::clone(&store));

        assert_eq!(
            decider.check("a").await,
            ControlFlow::Break(Denial::StoreUnavailable)
        );
        // Nothing was counted.
        assert_eq!(store.inner.increment("a").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_fails_closed_on_increment_error() {
        let store = Arc::new(FlakyStore::default());
        store.fail_increments.store(true, Ordering::SeqCst);
        let decider = Decider::new(base_quotas(), Arc::clone(&store));

        assert!(!decider.allow("a").await);

        store.fail_increments.store(false, Ordering::SeqCst);
        assert!(decider.allow("a").await);
    }

    #[tokio::test]
    async fn test_failed_block_write_keeps_denying() {
        let store = Arc::new(FlakyStore::default());
        store.fail_blocks.store(true, Ordering::SeqCst);
        let decider = Decider::new(base_quotas(), Arc::clone(&store));

        let (allowed, _) = count_allowed(&decider, "a", 5).await;
        assert_eq!(allowed, 5);

        // Each overflow request is denied and retries the block write.
        assert!(!decider.allow("a").await);
        assert!(!decider.allow("a").await);
        assert_eq!(store.block_attempts.load(Ordering::SeqCst), 2);
        assert_eq!(store.inner.is_blocked("a").await.unwrap(), None);

        store.fail_blocks.store(false, Ordering::SeqCst);
        assert!(!decider.allow("a").await);
        assert!(store.inner.is_blocked("a").await.unwrap().is_some());
        assert!(matches!(
            decider.check("a").await,
            ControlFlow::Break(Denial::Blocked { .. })
        ));
        assert_eq!(store.block_attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_dyn_store() {
        let store: Arc<dyn CountingStore> = Arc::new(MemoryStore::new());
        let decider = Decider::new(base_quotas(), store);

        let (allowed, last) = count_allowed(&decider, "192.168.1.2", 6).await;
        assert_eq!(allowed, 5);
        assert!(!last);
    }

    #[tokio::test]
    async fn test_block_longer_than_the_clock_can_represent() {
        let quotas = Quotas::from_vars([
            ("IP_REQUESTS_PER_SECOND", "1"),
            ("IP_BLOCK_DURATION_MINUTES", "400000000"),
        ])
        .unwrap();
        let decider = Decider::new(quotas, Arc::new(MemoryStore::new()));

        assert!(decider.allow("a").await);
        assert!(!decider.allow("a").await);
        assert!(matches!(
            decider.check("a").await,
            ControlFlow::Break(Denial::Blocked { .. })
        ));
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_identifiers_stay_out_of_info_logs() {
        let logs = Captured::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let store = Arc::new(FlakyStore::default());
        let decider = Decider::new(
            Quotas::new(quota(1, Duration::from_secs(60))),
            Arc::clone(&store),
        );

        // info: block set
        assert!(decider.allow("secret-token-1").await);
        assert!(!decider.allow("secret-token-1").await);

        // warn: block write failed
        store.fail_blocks.store(true, Ordering::SeqCst);
        assert!(decider.allow("secret-token-2").await);
        assert!(!decider.allow("secret-token-2").await);

        // error: store unreachable
        store.fail_reads.store(true, Ordering::SeqCst);
        assert!(!decider.allow("secret-token-3").await);

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("quota exceeded, blocking"), "{output}");
        assert!(output.contains("failed to set block"), "{output}");
        assert!(output.contains("failed to read block state"), "{output}");
        assert!(!output.contains("secret-token"), "{output}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_never_over_admit() {
        let decider = Decider::new(base_quotas(), Arc::new(MemoryStore::new()));

        let mut handles = vec![];
        for _ in 0..50 {
            let decider = decider.clone();
            handles.push(tokio::spawn(async move { decider.allow("shared").await }));
        }

        let admitted = futures::future::join_all(handles)
            .await
            .into_iter()
            .filter(|r| matches!(r, Ok(true)))
            .count();

        assert_eq!(admitted, 5);
    }
}
