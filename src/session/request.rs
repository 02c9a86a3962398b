//! Per-request view of the session cookie and its stored record.

use std::sync::Arc;

use cookie::CookieJar;
use tracing::{debug, instrument};

use super::{Session, SessionStore};
use crate::config::SessionConfig;
use crate::crypto::{generate_session_token, session_token_to_id};
use crate::error::{Result, WardenError};

/// One request's session: the cookie jar it arrived with, plus the store.
///
/// Lookups are cached for the life of the value, so a handler can call
/// [`RequestSession::get`] repeatedly at the cost of one store read.
pub struct RequestSession {
    jar: CookieJar,
    store: SessionStore,
    config: Arc<SessionConfig>,
    cached: Option<Session>,
}

impl RequestSession {
    pub fn new(jar: CookieJar, store: SessionStore, config: Arc<SessionConfig>) -> Self {
        Self {
            jar,
            store,
            config,
            cached: None,
        }
    }

    /// Raw token carried in the session cookie.
    pub fn token(&self) -> Option<&str> {
        self.jar
            .get(&self.config.cookie_name)
            .map(|c| c.value())
            .filter(|v| !v.is_empty())
    }

    fn clear_cookie(&mut self) {
        let removal = self.config.cookie.removal(&self.config.cookie_name);
        self.jar.remove(removal);
    }

    #[instrument(skip(self))]
    pub async fn get(&mut self) -> Result<Option<Session>> {
        if let Some(session) = &self.cached {
            return Ok(Some(session.clone()));
        }

        let Some(token) = self.token() else {
            return Ok(None);
        };

        let session_id = session_token_to_id(token);
        let session = self.store.get(&session_id).await?;

        if session.is_none() {
            debug!("Clearing stale session cookie");
            self.clear_cookie();
        }

        self.cached = session.clone();
        Ok(session)
    }

    /// Like [`RequestSession::get`], but a missing session is `Unauthorized`.
    pub async fn validate(&mut self) -> Result<Session> {
        self.get().await?.ok_or(WardenError::Unauthorized)
    }

    /// Store `session` under the current token, issuing a new token if the
    /// request carries none.
    #[instrument(skip(self, session))]
    pub async fn set(&mut self, session: Session) -> Result<()> {
        let token = match self.token().map(str::to_string) {
            Some(token) => token,
            None => {
                let token = generate_session_token();
                let cookie = self.config.cookie.build(
                    &self.config.cookie_name,
                    token.clone(),
                    Some(self.config.max_age()),
                );
                self.jar.add(cookie);
                debug!("Issued new session token");
                token
            }
        };

        let session_id = session_token_to_id(&token);
        self.store
            .set(&session_id, &session, self.config.max_age())
            .await?;
        self.cached = Some(session);
        Ok(())
    }

    /// Delete the stored session and clear the cookie. No-op without a token.
    #[instrument(skip(self))]
    pub async fn delete(&mut self) -> Result<()> {
        let Some(token) = self.token() else {
            return Ok(());
        };

        let session_id = session_token_to_id(token);
        self.store.delete(&session_id).await?;
        self.clear_cookie();
        self.cached = None;
        Ok(())
    }

    pub fn cookies(&self) -> &CookieJar {
        &self.jar
    }

    pub fn cookies_mut(&mut self) -> &mut CookieJar {
        &mut self.jar
    }

    /// Hand the jar back so its delta can be written as `Set-Cookie` headers.
    pub fn into_cookies(self) -> CookieJar {
        self.jar
    }
}
