//! # block-limit-redis
//!
//! A [`CountingStore`] backed by Redis, so that every gateway instance pointed
//! at the same server shares one set of counters and block markers.
//!
//! Counters are stored under the raw identifier and block markers under
//! `block:<identifier>`. Both carry their own Redis expiry.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use block_limit::CountingStore;
use block_limit::StoreError;
use block_limit::WINDOW;
use block_limit::block_key;
use redis::RedisResult;
use redis::aio::ConnectionManager;

const DEFAULT_ADDR: &str = "127.0.0.1:6379";

/// Build a `redis://` connection URL from an address, optional password and
/// database index.
///
/// An empty address falls back to `127.0.0.1:6379`.
pub fn redis_url(addr: &str, password: Option<&str>, db: i64) -> String {
    let addr = if addr.is_empty() { DEFAULT_ADDR } else { addr };
    match password.filter(|p| !p.is_empty()) {
        Some(password) => format!("redis://:{password}@{addr}/{db}"),
        None => format!("redis://{addr}/{db}"),
    }
}

/// Redis implementation of [`CountingStore`].
///
/// Cloning is cheap; clones share the underlying multiplexed connection, which
/// reconnects on its own after a failure.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    timeout: Option<Duration>,
}

impl RedisStore {
    /// Connect to the server at `url`.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(StoreError::unavailable)?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(StoreError::unavailable)?;
        Ok(Self::new(conn))
    }

    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            timeout: None,
        }
    }

    /// Bound every store command by `timeout`.
    ///
    /// A command that does not complete in time fails as unavailable.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    async fn run<T, F>(&self, command: F) -> Result<T, StoreError>
    where
        F: Future<Output = RedisResult<T>>,
    {
        with_deadline(self.timeout, command).await
    }
}

/// Await `command`, failing as unavailable if it errors or outlives `timeout`.
async fn with_deadline<T, F>(timeout: Option<Duration>, command: F) -> Result<T, StoreError>
where
    F: Future<Output = RedisResult<T>>,
{
    let result = match timeout {
        Some(timeout) => tokio::time::timeout(timeout, command)
            .await
            .map_err(StoreError::unavailable)?,
        None => command.await,
    };
    result.map_err(StoreError::unavailable)
}

/// Interpret a `PTTL` reply for a block marker.
///
/// -2 (no marker), -1 (marker without expiry) and 0 all mean not blocked.
fn remaining_block(ttl: i64) -> Option<Duration> {
    u64::try_from(ttl)
        .ok()
        .filter(|&ms| ms > 0)
        .map(Duration::from_millis)
}

fn as_millis(duration: Duration) -> u64 {
    // Redis rejects a zero expiry, so round sub-millisecond durations up.
    u64::try_from(duration.as_millis())
        .unwrap_or(u64::MAX)
        .clamp(1, i64::MAX as u64)
}

#[async_trait]
impl CountingStore for RedisStore {
    async fn increment(&self, identifier: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        // Creating the counter with its expiry and incrementing it run as one
        // transaction, so a counter can never be left without an expiry.
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("SET")
            .arg(identifier)
            .arg(0)
            .arg("NX")
            .arg("PX")
            .arg(as_millis(WINDOW))
            .ignore()
            .cmd("INCR")
            .arg(identifier);

        let (count,): (u64,) = self.run(pipe.query_async(&mut conn)).await?;
        Ok(count)
    }

    async fn block(&self, identifier: &str, duration: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let key = block_key(identifier);

        if duration.is_zero() {
            let mut cmd = redis::cmd("DEL");
            cmd.arg(&key);
            let _: u64 = self.run(cmd.query_async(&mut conn)).await?;
            return Ok(());
        }

        let mut cmd = redis::cmd("SET");
        cmd.arg(&key).arg("blocked").arg("PX").arg(as_millis(duration));
        self.run(cmd.query_async::<()>(&mut conn)).await
    }

    async fn is_blocked(&self, identifier: &str) -> Result<Option<Duration>, StoreError> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("PTTL");
        cmd.arg(block_key(identifier));

        let ttl: i64 = self.run(cmd.query_async(&mut conn)).await?;
        if ttl == -1 {
            tracing::warn!("ignoring block marker without expiry");
        }
        Ok(remaining_block(ttl))
    }
}
