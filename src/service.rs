//! Composition root: one cache, one config, all three subsystems.

use std::sync::Arc;

use cookie::CookieJar;
use tracing::info;

use crate::cache::{CacheClient, MemoryCache, RedisCache};
use crate::clock::{Clock, SystemClock};
use crate::config::{CacheBackend, SessionConfig, WardenConfig};
use crate::crypto::session_token_to_id;
use crate::error::Result;
use crate::oauth::{LoginFlow, OAuthClient};
use crate::ratelimit::RateLimiters;
use crate::session::{RequestSession, SessionStore};

/// Login flow, sessions and rate limiters sharing one cache.
#[derive(Clone)]
pub struct AuthService {
    flow: LoginFlow,
    sessions: SessionStore,
    session_config: Arc<SessionConfig>,
    limiters: RateLimiters,
}

impl AuthService {
    /// Build the service over an existing cache.
    pub fn new(config: &WardenConfig, cache: Arc<dyn CacheClient>, clock: Arc<dyn Clock>) -> Result<Self> {
        let client = OAuthClient::new(&config.oauth)?;
        let flow = LoginFlow::new(client, Arc::new(config.login.clone()));
        let sessions = SessionStore::new(cache.clone(), &config.session.key_prefix);
        let rules = config.rate_limiting.load_rules()?;
        let limiters = RateLimiters::from_rules(&rules, cache.clone(), clock)?;

        info!(
            cache = cache.backend_name(),
            limiters = limiters.len(),
            "Auth service initialized"
        );

        Ok(Self {
            flow,
            sessions,
            session_config: Arc::new(config.session.clone()),
            limiters,
        })
    }

    /// Open the configured cache and build the service on the system clock.
    pub async fn connect(config: &WardenConfig) -> Result<Self> {
        let cache: Arc<dyn CacheClient> = match config.cache.backend {
            CacheBackend::Redis => Arc::new(RedisCache::connect(&config.cache.url).await?),
            CacheBackend::Memory => Arc::new(MemoryCache::new()),
        };
        Self::new(config, cache, Arc::new(SystemClock))
    }

    /// Wrap an incoming request's cookies.
    pub fn request_session(&self, jar: CookieJar) -> RequestSession {
        RequestSession::new(jar, self.sessions.clone(), self.session_config.clone())
    }

    pub fn flow(&self) -> &LoginFlow {
        &self.flow
    }

    pub fn limiters(&self) -> &RateLimiters {
        &self.limiters
    }

    /// Delete the session a raw cookie token points at.
    pub async fn revoke_session(&self, token: &str) -> Result<()> {
        self.sessions.delete(&session_token_to_id(token)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::session::Session;
    use cookie::Cookie;

    fn service() -> AuthService {
        let config = WardenConfig::from_yaml(
            r#"
cache:
  backend: memory
oauth:
  base_url: https://auth.example.com
  client_id: warden-web
  redirect_uri: https://app.example.com/api/v1/auth/oauth/callback
rate_limiting:
  limiters:
    login:
      strategy: throttle
"#,
        )
        .unwrap();
        let clock = Arc::new(ManualClock::new(0));
        let cache = Arc::new(MemoryCache::with_clock(clock.clone()));
        AuthService::new(&config, cache, clock).unwrap()
    }

    #[tokio::test]
    async fn test_revoke_session_by_token() {
        let service = service();

        let mut request = service.request_session(CookieJar::new());
        request
            .set(Session {
                user_id: "u1".to_string(),
            })
            .await
            .unwrap();
        let token = request.token().unwrap().to_string();

        service.revoke_session(&token).await.unwrap();

        let mut jar = CookieJar::new();
        jar.add_original(Cookie::new("session_id", token));
        let mut next = service.request_session(jar);
        assert_eq!(next.get().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_limiters_built_from_config() {
        let service = service();

        assert_eq!(service.limiters().names(), vec!["login"]);
        assert!(service.limiters().consume("login", "1.2.3.4", 1).await.unwrap());
        assert!(!service.limiters().consume("login", "1.2.3.4", 1).await.unwrap());
    }
}
