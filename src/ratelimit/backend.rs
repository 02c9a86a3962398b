//! Rate limiter trait for abstracting the in-process and shared strategies.

use async_trait::async_trait;

use crate::error::Result;

/// Trait for rate limiter implementations.
///
/// `consume` is the only mutating call besides `reset`. A denial is the
/// `Ok(false)` result, not an error, so callers can compose it freely.
#[async_trait]
pub trait RateLimiterBackend: Send + Sync {
    /// Try to spend `cost` units for `key`. Returns whether the action is allowed.
    async fn consume(&self, key: &str, cost: u32) -> Result<bool>;

    /// Drop all limiter state for `key`.
    async fn reset(&self, key: &str) -> Result<()>;

    /// Strategy name for logs.
    fn strategy(&self) -> &'static str;
}
