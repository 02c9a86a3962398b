//! Registry of named rate limiters built from rules.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use tracing::{debug, info};

use super::backend::RateLimiterBackend;
use super::bucket::TokenBucketConfig;
use super::memory::{MemoryBucketStore, TokenBucketMemory};
use super::rules::{BucketStore, LimiterRule, RateLimitRules};
use super::throttle::{ThrottleConfig, Throttler};
use super::token_bucket::TokenBucketShared;
use crate::cache::CacheClient;
use crate::clock::Clock;
use crate::error::{Result, WardenError};

/// Named limiters, shareable across request handlers.
#[derive(Default, Clone)]
pub struct RateLimiters {
    limiters: HashMap<String, Arc<dyn RateLimiterBackend>>,
}

impl RateLimiters {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every limiter declared in `rules`.
    ///
    /// Memory-backed token buckets share one process-local store; records are
    /// namespaced by limiter name so they never collide.
    pub fn from_rules(
        rules: &RateLimitRules,
        cache: Arc<dyn CacheClient>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let local_store = Arc::new(MemoryBucketStore::new());
        let mut registry = Self::new();

        for (name, rule) in &rules.limiters {
            let backend: Arc<dyn RateLimiterBackend> = match rule {
                LimiterRule::TokenBucket {
                    max,
                    refill_interval_secs,
                    store,
                } => {
                    let config =
                        TokenBucketConfig::new(*max, Duration::from_secs(*refill_interval_secs))?;
                    match store {
                        BucketStore::Shared => Arc::new(TokenBucketShared::with_clock(
                            name,
                            &rules.key_prefix,
                            config,
                            cache.clone(),
                            clock.clone(),
                        )),
                        BucketStore::Memory => Arc::new(TokenBucketMemory::with_store(
                            name,
                            &rules.key_prefix,
                            config,
                            local_store.clone(),
                            clock.clone(),
                        )),
                    }
                }
                LimiterRule::Throttle {
                    timeouts_secs,
                    idle_reset_secs,
                } => {
                    let config = ThrottleConfig::from_secs(timeouts_secs, *idle_reset_secs)?;
                    Arc::new(Throttler::with_clock(
                        name,
                        &rules.key_prefix,
                        config,
                        cache.clone(),
                        clock.clone(),
                    ))
                }
            };

            info!(limiter = %name, strategy = backend.strategy(), "Rate limiter initialized");
            registry.insert(name, backend);
        }

        Ok(registry)
    }

    pub fn insert(&mut self, name: &str, backend: Arc<dyn RateLimiterBackend>) {
        self.limiters.insert(name.to_string(), backend);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn RateLimiterBackend>> {
        self.limiters.get(name).cloned()
    }

    fn require(&self, name: &str) -> Result<&Arc<dyn RateLimiterBackend>> {
        self.limiters
            .get(name)
            .ok_or_else(|| WardenError::NotFound(format!("Rate limiter '{}'", name)))
    }

    /// Spend `cost` on the named limiter.
    pub async fn consume(&self, limiter: &str, key: &str, cost: u32) -> Result<bool> {
        self.require(limiter)?.consume(key, cost).await
    }

    /// Clear `key` on the named limiter.
    pub async fn reset(&self, limiter: &str, key: &str) -> Result<()> {
        debug!(limiter = %limiter, key = %key, "Resetting rate limit");
        self.require(limiter)?.reset(key).await
    }

    /// Clear `key` on every limiter, e.g. after a successful login.
    pub async fn reset_all(&self, key: &str) -> Result<()> {
        try_join_all(self.limiters.values().map(|l| l.reset(key))).await?;
        Ok(())
    }

    /// Get the number of configured limiters.
    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }

    /// Limiter names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.limiters.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::clock::ManualClock;

    fn registry() -> RateLimiters {
        let yaml = r#"
limiters:
  login:
    strategy: throttle
  api:
    strategy: token_bucket
    max: 2
    refill_interval_secs: 60
  local:
    strategy: token_bucket
    max: 1
    refill_interval_secs: 60
    store: memory
"#;
        let rules = RateLimitRules::from_yaml(yaml).unwrap();
        let clock = Arc::new(ManualClock::new(0));
        let cache = Arc::new(MemoryCache::with_clock(clock.clone()));
        RateLimiters::from_rules(&rules, cache, clock).unwrap()
    }

    #[test]
    fn test_registry_creation() {
        let limiters = registry();
        assert_eq!(limiters.len(), 3);
        assert_eq!(limiters.names(), vec!["api", "local", "login"]);
        assert_eq!(limiters.get("login").unwrap().strategy(), "throttle");
        assert_eq!(limiters.get("api").unwrap().strategy(), "token_bucket");
        assert_eq!(limiters.get("local").unwrap().strategy(), "token_bucket_memory");
    }

    #[tokio::test]
    async fn test_unknown_limiter_is_not_found() {
        let limiters = registry();
        let err = limiters.consume("missing", "k", 1).await.unwrap_err();
        assert!(matches!(err, WardenError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_limiters_are_independent() {
        let limiters = registry();

        assert!(limiters.consume("api", "k", 2).await.unwrap());
        assert!(!limiters.consume("api", "k", 1).await.unwrap());

        assert!(limiters.consume("login", "k", 1).await.unwrap());
        assert!(limiters.consume("local", "k", 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_reset_all_clears_every_limiter() {
        let limiters = registry();

        limiters.consume("api", "k", 2).await.unwrap();
        limiters.consume("login", "k", 1).await.unwrap();
        limiters.consume("local", "k", 1).await.unwrap();

        limiters.reset_all("k").await.unwrap();

        assert!(limiters.consume("api", "k", 2).await.unwrap());
        assert!(limiters.consume("login", "k", 1).await.unwrap());
        assert!(limiters.consume("local", "k", 1).await.unwrap());
    }
}
