//! Browser login flow: sign-in redirect, provider callback, logout.
//!
//! The in-flight `state`, code verifier and success redirect live in
//! short-lived cookies scoped to the callback path. The callback reads and
//! removes all three before doing anything else, so a failed or abandoned
//! attempt never leaves usable secrets behind.
//!
//! The success redirect must be a path on this site. Anything else, such as
//! `https://evil.example` or `//evil.example`, is replaced with `/` both when
//! the flow starts and when it completes.

use std::sync::Arc;

use cookie::CookieJar;
use tracing::{error, info, instrument, warn};
use url::Url;

use super::client::OAuthClient;
use crate::config::LoginConfig;
use crate::error::{Result, WardenError};
use crate::session::{CookieOptions, RequestSession, Session};

pub const STATE_COOKIE: &str = "auth_state";
pub const CODE_VERIFIER_COOKIE: &str = "auth_code_verifier";
pub const REDIRECT_COOKIE: &str = "success_redirect_uri";

/// Where the browser lands when no usable success redirect was given.
pub const DEFAULT_SUCCESS_REDIRECT: &str = "/";

/// Drives sign-in and callback for one provider.
#[derive(Clone)]
pub struct LoginFlow {
    client: OAuthClient,
    config: Arc<LoginConfig>,
}

fn take_cookie(jar: &mut CookieJar, options: &CookieOptions, name: &str) -> Option<String> {
    let value = jar.get(name).map(|c| c.value().to_string())?;
    jar.remove(options.removal(name));
    Some(value).filter(|v| !v.is_empty())
}

/// Whether `target` is a path on this site rather than another origin.
///
/// Browsers treat `//host` and `/\host` as scheme-relative and drop tabs and
/// newlines from URLs, so those are rejected as well.
pub fn is_local_redirect(target: &str) -> bool {
    target.starts_with('/')
        && !target.starts_with("//")
        && !target.contains('\\')
        && !target.chars().any(char::is_control)
}

fn local_redirect(target: &str) -> &str {
    if is_local_redirect(target) {
        target
    } else {
        warn!(redirect = %target, "Ignoring non-local success redirect");
        DEFAULT_SUCCESS_REDIRECT
    }
}

impl LoginFlow {
    pub fn new(client: OAuthClient, config: Arc<LoginConfig>) -> Self {
        Self { client, config }
    }

    pub fn client(&self) -> &OAuthClient {
        &self.client
    }

    /// Start a login. Writes the flow cookies to `jar` and returns the
    /// provider URL to redirect the browser to.
    ///
    /// A `success_redirect` that is not a local path is replaced with
    /// [`DEFAULT_SUCCESS_REDIRECT`].
    pub fn signin(&self, jar: &mut CookieJar, success_redirect: &str) -> Url {
        let request = self.client.begin_authorization(local_redirect(success_redirect));
        let options = &self.config.cookie;
        let max_age = Some(self.config.max_age());

        jar.add(options.build(STATE_COOKIE, request.state, max_age));
        jar.add(options.build(CODE_VERIFIER_COOKIE, request.code_verifier, max_age));
        jar.add(options.build(REDIRECT_COOKIE, request.success_redirect, max_age));

        request.url
    }

    /// Finish a login from the provider's `code` and `state`.
    ///
    /// On success the session is stored and the success redirect is
    /// returned. Every failure is logged here once and comes back as
    /// [`WardenError::LoginFailed`].
    #[instrument(skip_all)]
    pub async fn callback(&self, session: &mut RequestSession, code: &str, state: &str) -> Result<String> {
        match self.complete(session, code, state).await {
            Ok(redirect) => Ok(redirect),
            Err(e) => {
                error!(error = %e, "OAuth callback failed");
                Err(WardenError::LoginFailed(Box::new(e)))
            }
        }
    }

    async fn complete(&self, session: &mut RequestSession, code: &str, state: &str) -> Result<String> {
        let options = &self.config.cookie;
        let jar = session.cookies_mut();
        let stored_state = take_cookie(jar, options, STATE_COOKIE);
        let code_verifier = take_cookie(jar, options, CODE_VERIFIER_COOKIE);
        let redirect = take_cookie(jar, options, REDIRECT_COOKIE);

        let (Some(stored_state), Some(code_verifier), Some(redirect)) =
            (stored_state, code_verifier, redirect)
        else {
            return Err(WardenError::StateMismatch);
        };
        if stored_state != state {
            return Err(WardenError::StateMismatch);
        }

        let tokens = self.client.complete_authorization(code, &code_verifier).await?;
        let identity = self.client.fetch_identity(&tokens.access_token).await?;

        info!(user_id = %identity.id, "User logged in");
        session.set(Session { user_id: identity.id }).await?;

        Ok(local_redirect(&redirect).to_string())
    }

    /// End the current session, if any.
    pub async fn logout(&self, session: &mut RequestSession) -> Result<()> {
        session.delete().await
    }
}
