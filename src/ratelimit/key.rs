//! Storage key generation for limiter records.

use crate::error::{Result, WardenError};

/// A key that uniquely identifies a limiter record in a store.
///
/// Composed of the global prefix, the limiter name and the caller's key, so
/// independently configured limiters never share records.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LimiterKey {
    /// Prefix shared by every limiter record (e.g. `ratelimit`)
    pub prefix: String,
    /// The limiter this record belongs to
    pub limiter: String,
    /// Caller-supplied key (IP address, user id, ...)
    pub key: String,
}

impl LimiterKey {
    pub fn new(prefix: &str, limiter: &str, key: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            limiter: limiter.to_string(),
            key: key.to_string(),
        }
    }

    /// Check that `name` can be used as a limiter name.
    ///
    /// Names may not be empty or contain the `:` separator, so that no two
    /// limiters can produce the same storage key.
    pub fn check_limiter_name(name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(WardenError::Config("limiter name must not be empty".to_string()));
        }
        if name.contains(':') {
            return Err(WardenError::Config(format!(
                "limiter name '{}' must not contain ':'",
                name
            )));
        }
        Ok(())
    }

    /// Convert the key to its store representation.
    pub fn to_storage_key(&self) -> String {
        if self.prefix.is_empty() {
            format!("{}:{}", self.limiter, self.key)
        } else {
            format!("{}:{}:{}", self.prefix, self.limiter, self.key)
        }
    }
}

impl std::fmt::Display for LimiterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_storage_key())
    }
}
