//! Token bucket backed by the shared cache.
//!
//! The refill-and-charge sequence runs as one atomic script inside the cache,
//! so any number of service instances can share a bucket without racing.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, trace};

use super::backend::RateLimiterBackend;
use super::bucket::{TokenBucketConfig, TOKEN_BUCKET_SCRIPT};
use super::key::LimiterKey;
use crate::cache::CacheClient;
use crate::clock::{Clock, SystemClock};
use crate::error::Result;

/// A distributed token bucket limiter.
pub struct TokenBucketShared {
    name: String,
    prefix: String,
    config: TokenBucketConfig,
    cache: Arc<dyn CacheClient>,
    clock: Arc<dyn Clock>,
}

impl TokenBucketShared {
    /// Create a new shared token bucket on the system clock.
    pub fn new(
        name: &str,
        prefix: &str,
        config: TokenBucketConfig,
        cache: Arc<dyn CacheClient>,
    ) -> Self {
        Self::with_clock(name, prefix, config, cache, Arc::new(SystemClock))
    }

    pub fn with_clock(
        name: &str,
        prefix: &str,
        config: TokenBucketConfig,
        cache: Arc<dyn CacheClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name: name.to_string(),
            prefix: prefix.to_string(),
            config,
            cache,
            clock,
        }
    }

    pub fn config(&self) -> &TokenBucketConfig {
        &self.config
    }

    fn storage_key(&self, key: &str) -> String {
        LimiterKey::new(&self.prefix, &self.name, key).to_storage_key()
    }
}

#[async_trait]
impl RateLimiterBackend for TokenBucketShared {
    async fn consume(&self, key: &str, cost: u32) -> Result<bool> {
        let storage_key = self.storage_key(key);
        let args = [
            i64::from(self.config.max),
            self.config.interval_millis() as i64,
            i64::from(cost),
            self.clock.now_millis() as i64,
        ];

        let reply = self
            .cache
            .eval(&TOKEN_BUCKET_SCRIPT, &storage_key, &args)
            .await?;
        let allowed = reply.first().copied().unwrap_or(0) == 1;

        trace!(
            limiter = %self.name,
            key = %storage_key,
            cost = cost,
            remaining = ?reply.get(1),
            backend = self.cache.backend_name(),
            "Shared token bucket consume"
        );
        if !allowed {
            debug!(limiter = %self.name, key = %key, "Rate limit exceeded");
        }

        Ok(allowed)
    }

    async fn reset(&self, key: &str) -> Result<()> {
        self.cache.del(&self.storage_key(key)).await
    }

    fn strategy(&self) -> &'static str {
        "token_bucket"
    }
}
