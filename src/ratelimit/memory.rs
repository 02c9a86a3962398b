//! In-process token bucket.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, trace};

use super::backend::RateLimiterBackend;
use super::bucket::{Bucket, TokenBucketConfig};
use super::key::LimiterKey;
use crate::clock::{Clock, SystemClock};
use crate::error::Result;

/// How often, in clock time, a write sweeps out expired buckets.
const SWEEP_INTERVAL_MS: u64 = 60_000;

#[derive(Debug, Clone, Copy)]
struct StoredBucket {
    bucket: Bucket,
    /// Epoch milliseconds at which the bucket would be full again
    expires_at: u64,
}

/// Process-local bucket storage.
///
/// Per-key mutation is serialized by the map's shard locks. Nothing is
/// coordinated across processes, so this store is only correct for a single
/// instance, or as a coarse pre-filter in front of a shared limiter.
///
/// A bucket expires once it would have refilled to `max`, matching the TTL
/// the shared store sets. Expired buckets are dropped by a sweep that runs
/// at most once per [`SWEEP_INTERVAL_MS`] of clock time.
#[derive(Debug, Default)]
pub struct MemoryBucketStore {
    buckets: DashMap<String, StoredBucket>,
    next_sweep_at: AtomicU64,
}

impl MemoryBucketStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the bucket stored under `storage_key`, expired or not.
    pub fn get(&self, storage_key: &str) -> Option<Bucket> {
        self.buckets.get(storage_key).map(|b| b.bucket)
    }

    pub fn remove(&self, storage_key: &str) {
        self.buckets.remove(storage_key);
    }

    /// Number of buckets held, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Clear all buckets.
    pub fn clear(&self) {
        self.buckets.clear();
    }

    /// Drop every bucket expired at `now`. Returns how many were removed.
    pub fn sweep(&self, now: u64) -> usize {
        let before = self.buckets.len();
        self.buckets.retain(|_, stored| stored.expires_at > now);
        let removed = before.saturating_sub(self.buckets.len());
        if removed > 0 {
            debug!(removed = removed, "Swept expired token buckets");
        }
        removed
    }

    /// Sweep if the interval has passed; only one caller wins each round.
    fn sweep_if_due(&self, now: u64) {
        let due = self.next_sweep_at.load(Ordering::Relaxed);
        if now < due {
            return;
        }
        if self
            .next_sweep_at
            .compare_exchange(due, now + SWEEP_INTERVAL_MS, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            self.sweep(now);
        }
    }
}

/// Token bucket limiter holding its buckets in process memory.
pub struct TokenBucketMemory {
    name: String,
    prefix: String,
    config: TokenBucketConfig,
    store: Arc<MemoryBucketStore>,
    clock: Arc<dyn Clock>,
}

impl TokenBucketMemory {
    /// Create a limiter on the system clock with its own store.
    pub fn new(name: &str, config: TokenBucketConfig) -> Self {
        Self::with_store(
            name,
            "",
            config,
            Arc::new(MemoryBucketStore::new()),
            Arc::new(SystemClock),
        )
    }

    /// Create a limiter over an injected store and clock.
    pub fn with_store(
        name: &str,
        prefix: &str,
        config: TokenBucketConfig,
        store: Arc<MemoryBucketStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name: name.to_string(),
            prefix: prefix.to_string(),
            config,
            store,
            clock,
        }
    }

    pub fn config(&self) -> &TokenBucketConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<MemoryBucketStore> {
        &self.store
    }

    /// Bucket currently held for `key`, if any.
    pub fn bucket(&self, key: &str) -> Option<Bucket> {
        self.store.get(&self.storage_key(key))
    }

    fn storage_key(&self, key: &str) -> String {
        LimiterKey::new(&self.prefix, &self.name, key).to_storage_key()
    }

    /// Spend `cost` tokens for `key`.
    pub fn consume_now(&self, key: &str, cost: u32) -> bool {
        let now = self.clock.now_millis();
        let storage_key = self.storage_key(key);
        let max = self.config.max;
        let interval = self.config.interval_millis();

        // must run before taking an entry lock below
        self.store.sweep_if_due(now);

        let (allowed, count) = match self.store.buckets.entry(storage_key) {
            Entry::Occupied(mut slot) if slot.get().expires_at > now => {
                let stored = slot.get_mut();
                let allowed = stored.bucket.consume(&self.config, cost, now);
                stored.expires_at = now + stored.bucket.ttl_millis(max, interval);
                (allowed, stored.bucket.count)
            }
            entry => {
                let bucket = Bucket::first_touch(max, cost, now);
                debug!(
                    limiter = %self.name,
                    key = %key,
                    max = max,
                    "Creating new token bucket"
                );
                entry.insert(StoredBucket {
                    bucket,
                    expires_at: now + bucket.ttl_millis(max, interval),
                });
                (true, bucket.count)
            }
        };

        trace!(
            limiter = %self.name,
            key = %key,
            cost = cost,
            remaining = count,
            allowed = allowed,
            "Token bucket consume"
        );
        allowed
    }
}

#[async_trait]
impl RateLimiterBackend for TokenBucketMemory {
    async fn consume(&self, key: &str, cost: u32) -> Result<bool> {
        Ok(self.consume_now(key, cost))
    }

    async fn reset(&self, key: &str) -> Result<()> {
        self.store.remove(&self.storage_key(key));
        Ok(())
    }

    fn strategy(&self) -> &'static str {
        "token_bucket_memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::time::Duration;

    fn limiter(max: u32, refill_secs: u64) -> (TokenBucketMemory, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let limiter = TokenBucketMemory::with_store(
            "test",
            "rl",
            TokenBucketConfig::new(max, Duration::from_secs(refill_secs)).unwrap(),
            Arc::new(MemoryBucketStore::new()),
            clock.clone(),
        );
        (limiter, clock)
    }

    #[tokio::test]
    async fn test_consume_creates_bucket() {
        let (limiter, _) = limiter(5, 1);
        assert!(limiter.store().is_empty());

        assert!(limiter.consume("k", 1).await.unwrap());
        assert_eq!(limiter.store().len(), 1);
        assert_eq!(limiter.bucket("k").unwrap().count, 4);
    }

    #[tokio::test]
    async fn test_drain_deny_then_refill() {
        let (limiter, clock) = limiter(5, 1);

        assert!(limiter.consume("k", 5).await.unwrap());
        assert!(!limiter.consume("k", 1).await.unwrap());

        clock.advance(Duration::from_secs(1));
        assert!(limiter.consume("k", 1).await.unwrap());
        assert!(!limiter.consume("k", 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_first_touch_allows_oversized_cost() {
        let (limiter, _) = limiter(3, 1);

        assert!(limiter.consume("k", 10).await.unwrap());
        assert_eq!(limiter.bucket("k").unwrap().count, 0);
        assert!(!limiter.consume("k", 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_keys_have_separate_buckets() {
        let (limiter, _) = limiter(2, 60);

        assert!(limiter.consume("a", 2).await.unwrap());
        assert!(limiter.consume("b", 2).await.unwrap());
        assert!(!limiter.consume("a", 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_limiters_sharing_a_store_stay_isolated() {
        let clock = Arc::new(ManualClock::new(0));
        let store = Arc::new(MemoryBucketStore::new());
        let config = TokenBucketConfig::new(1, Duration::from_secs(60)).unwrap();
        let login = TokenBucketMemory::with_store("login", "rl", config, store.clone(), clock.clone());
        let api = TokenBucketMemory::with_store("api", "rl", config, store.clone(), clock);

        assert!(login.consume("k", 1).await.unwrap());
        assert!(api.consume("k", 1).await.unwrap());
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_reset_restores_capacity() {
        let (limiter, _) = limiter(1, 3600);

        assert!(limiter.consume("k", 1).await.unwrap());
        assert!(!limiter.consume("k", 1).await.unwrap());

        limiter.reset("k").await.unwrap();
        assert!(limiter.consume("k", 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_buckets_are_swept() {
        let (limiter, clock) = limiter(5, 1);

        for i in 0..10_000 {
            assert!(limiter.consume(&format!("client-{}", i), 1).await.unwrap());
        }
        assert_eq!(limiter.store().len(), 10_000);

        // every bucket is full again long before this
        clock.advance(Duration::from_secs(3600));
        assert!(limiter.consume("fresh", 1).await.unwrap());

        assert_eq!(limiter.store().len(), 1);
        assert!(limiter.bucket("client-0").is_none());
    }

    #[tokio::test]
    async fn test_expired_bucket_starts_fresh() {
        let (limiter, clock) = limiter(2, 1);

        assert!(limiter.consume("k", 2).await.unwrap());
        // full after 2s; expired slot is treated as a first touch
        clock.advance(Duration::from_secs(2));
        assert!(limiter.consume("k", 2).await.unwrap());
        assert_eq!(limiter.bucket("k").unwrap().count, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_consumers_share_the_last_token() {
        let (limiter, _) = limiter(3, 3600);
        let limiter = Arc::new(limiter);

        // leave exactly one token
        assert!(limiter.consume("k", 2).await.unwrap());

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.consume("k", 1).await.unwrap() })
            })
            .collect();

        let results = futures::future::join_all(handles).await;
        let allowed = results.into_iter().filter(|r| *r.as_ref().unwrap()).count();
        assert_eq!(allowed, 1);
    }
}
