//! Authorization Code + PKCE client for the identity provider.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use url::Url;

use super::pkce;
use crate::config::OAuthConfig;
use crate::error::{Result, WardenError};

/// Everything the caller must hold on to between sign-in and callback.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    /// Provider URL to send the browser to
    pub url: Url,
    pub state: String,
    pub code_verifier: String,
    /// Where to send the browser after a successful login
    pub success_redirect: String,
}

/// Tokens returned by the token endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenSet {
    pub access_token: String,
    pub token_type: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub id_token: Option<String>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    id_token: Option<String>,
}

/// Provider identity of the logged-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// The provider's `sub` claim
    pub id: String,
    pub username: Option<String>,
    pub firstname: Option<String>,
    pub lastname: Option<String>,
    pub name: Option<String>,
    pub locale: Option<String>,
}

#[derive(Deserialize)]
struct UserInfo {
    sub: String,
    #[serde(default)]
    preferred_username: Option<String>,
    #[serde(default)]
    given_name: Option<String>,
    #[serde(default)]
    family_name: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    locale: Option<String>,
}

impl From<UserInfo> for Identity {
    fn from(info: UserInfo) -> Self {
        Self {
            id: info.sub,
            username: info.preferred_username,
            firstname: info.given_name,
            lastname: info.family_name,
            name: info.name,
            locale: info.locale,
        }
    }
}

/// Client for one identity provider registration.
#[derive(Clone)]
pub struct OAuthClient {
    client_id: String,
    redirect_uri: String,
    scope: String,
    authorize_url: Url,
    token_url: Url,
    userinfo_url: Url,
    http: reqwest::Client,
}

impl OAuthClient {
    pub fn new(config: &OAuthConfig) -> Result<Self> {
        let mut scopes: Vec<&str> = Vec::with_capacity(config.scopes.len());
        for scope in &config.scopes {
            if !scopes.contains(&scope.as_str()) {
                scopes.push(scope);
            }
        }

        Ok(Self {
            client_id: config.client_id.clone(),
            redirect_uri: config.redirect_uri.clone(),
            scope: scopes.join(" "),
            authorize_url: config.authorize_endpoint()?,
            token_url: config.token_endpoint()?,
            userinfo_url: config.userinfo_endpoint()?,
            http: reqwest::Client::new(),
        })
    }

    /// Use a preconfigured HTTP client, e.g. one with timeouts.
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Deduplicated, space-joined scopes sent to the provider.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Generate fresh `state` and verifier and build the provider URL.
    ///
    /// Nothing is persisted here; the caller stores the returned secrets.
    pub fn begin_authorization(&self, success_redirect: &str) -> AuthorizationRequest {
        let state = pkce::generate_state();
        let code_verifier = pkce::generate_code_verifier();
        let challenge = pkce::code_challenge(&code_verifier);

        let mut url = self.authorize_url.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("state", &state)
            .append_pair("scope", &self.scope)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("code_challenge", &challenge)
            .append_pair("code_challenge_method", "S256");

        AuthorizationRequest {
            url,
            state,
            code_verifier,
            success_redirect: success_redirect.to_string(),
        }
    }

    /// Exchange an authorization code for tokens.
    #[instrument(skip_all)]
    pub async fn complete_authorization(&self, code: &str, code_verifier: &str) -> Result<TokenSet> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.client_id.as_str()),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("code_verifier", code_verifier),
        ];

        let response = self
            .http
            .post(self.token_url.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&params)
            .send()
            .await
            .map_err(|e| WardenError::TokenExchange(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| WardenError::TokenExchange(e.to_string()))?;

        let json: serde_json::Value = serde_json::from_str(&body)
            .map_err(|e| WardenError::TokenExchange(format!("malformed response ({}): {}", status, e)))?;

        // providers may report errors with a 2xx status
        if let Some(code) = json.get("error") {
            let code = code.as_str().unwrap_or("unknown_error");
            return Err(WardenError::TokenExchange(format!("provider error {} ({})", code, status)));
        }
        if !status.is_success() {
            return Err(WardenError::TokenExchange(format!("unexpected status {}", status)));
        }

        let token: TokenResponse = serde_json::from_value(json)
            .map_err(|e| WardenError::TokenExchange(format!("malformed response: {}", e)))?;

        debug!(expires_in = ?token.expires_in, "Token exchange succeeded");

        Ok(TokenSet {
            access_token: token.access_token,
            token_type: token.token_type.unwrap_or_else(|| "Bearer".to_string()),
            expires_at: token
                .expires_in
                .map(|secs| Utc::now() + chrono::Duration::seconds(secs)),
            id_token: token.id_token,
        })
    }

    /// Fetch the user-info document for an access token.
    #[instrument(skip_all)]
    pub async fn fetch_identity(&self, access_token: &str) -> Result<Identity> {
        let response = self
            .http
            .get(self.userinfo_url.clone())
            .bearer_auth(access_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| WardenError::IdentityFetch(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(WardenError::IdentityFetch(format!("unexpected status {}", status)));
        }

        let info: UserInfo = response
            .json()
            .await
            .map_err(|e| WardenError::IdentityFetch(format!("malformed response: {}", e)))?;

        Ok(info.into())
    }
}
