//! Cache-backed session records keyed by hashed session id.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use super::Session;
use crate::cache::CacheClient;
use crate::error::Result;

/// Map from session id (the hash of a session token) to [`Session`].
#[derive(Clone)]
pub struct SessionStore {
    cache: Arc<dyn CacheClient>,
    key_prefix: String,
}

impl SessionStore {
    pub fn new(cache: Arc<dyn CacheClient>, key_prefix: &str) -> Self {
        Self {
            cache,
            key_prefix: key_prefix.to_string(),
        }
    }

    fn build_key(&self, session_id: &str) -> String {
        format!("{}{}", self.key_prefix, session_id)
    }

    /// Look up a session. Missing, expired and unparseable entries all read as `None`.
    pub async fn get(&self, session_id: &str) -> Result<Option<Session>> {
        let Some(value) = self.cache.get(&self.build_key(session_id)).await? else {
            trace!("Session not found");
            return Ok(None);
        };

        match serde_json::from_str::<Session>(&value) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                debug!(error = %e, "Discarding malformed session entry");
                Ok(None)
            }
        }
    }

    /// Upsert a session, replacing any prior value and TTL.
    pub async fn set(&self, session_id: &str, session: &Session, ttl: Duration) -> Result<()> {
        let value = serde_json::to_string(session)?;
        self.cache.set(&self.build_key(session_id), &value, ttl).await
    }

    /// Remove a session. Idempotent.
    pub async fn delete(&self, session_id: &str) -> Result<()> {
        self.cache.del(&self.build_key(session_id)).await
    }
}
