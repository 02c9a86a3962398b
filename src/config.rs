//! Configuration management for Warden.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;
use url::Url;

use crate::error::{Result, WardenError};
use crate::ratelimit::RateLimitRules;
use crate::session::{CookieOptions, SameSitePolicy};

/// Main configuration for the Warden service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WardenConfig {
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,

    /// Shared cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Identity provider configuration
    #[serde(default)]
    pub oauth: OAuthConfig,

    /// Session cookie and store configuration
    #[serde(default)]
    pub session: SessionConfig,

    /// Login flow cookie configuration
    #[serde(default)]
    pub login: LoginConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Which cache implementation backs sessions and shared limiters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Redis,
    /// Process-local; for tests and single-instance development
    Memory,
}

/// Shared cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackend,

    /// Redis connection URL
    #[serde(default = "default_cache_url")]
    pub url: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::default(),
            url: default_cache_url(),
        }
    }
}

fn default_cache_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

/// Identity provider configuration.
///
/// Endpoints default to the well-known paths under `base_url`; each one can be
/// overridden on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    /// Provider base URL, e.g. `https://auth.example.com`
    #[serde(default)]
    pub base_url: String,

    #[serde(default)]
    pub client_id: String,

    /// Where the provider sends the browser back to
    #[serde(default)]
    pub redirect_uri: String,

    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,

    #[serde(default)]
    pub authorize_url: Option<String>,

    #[serde(default)]
    pub token_url: Option<String>,

    #[serde(default)]
    pub userinfo_url: Option<String>,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            client_id: String::new(),
            redirect_uri: String::new(),
            scopes: default_scopes(),
            authorize_url: None,
            token_url: None,
            userinfo_url: None,
        }
    }
}

fn default_scopes() -> Vec<String> {
    vec!["openid".to_string(), "profile".to_string()]
}

impl OAuthConfig {
    fn endpoint(&self, explicit: &Option<String>, path: &str) -> Result<Url> {
        let parsed = match explicit {
            Some(url) => Url::parse(url),
            None => Url::parse(&self.base_url).and_then(|base| base.join(path)),
        };
        parsed.map_err(|e| WardenError::Config(format!("invalid OAuth endpoint for {}: {}", path, e)))
    }

    pub fn authorize_endpoint(&self) -> Result<Url> {
        self.endpoint(&self.authorize_url, "/oauth/v2/authorize")
    }

    pub fn token_endpoint(&self) -> Result<Url> {
        self.endpoint(&self.token_url, "/oauth/v2/token")
    }

    pub fn userinfo_endpoint(&self) -> Result<Url> {
        self.endpoint(&self.userinfo_url, "/oidc/v1/userinfo")
    }
}

/// Session cookie and store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Prefix for session records in the cache
    #[serde(default = "default_session_prefix")]
    pub key_prefix: String,

    /// Session lifetime, used for both the cache TTL and the cookie max-age
    #[serde(default = "default_session_max_age")]
    pub max_age_secs: u64,

    #[serde(default = "default_session_cookie")]
    pub cookie_name: String,

    #[serde(default)]
    pub cookie: CookieOptions,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_session_prefix(),
            max_age_secs: default_session_max_age(),
            cookie_name: default_session_cookie(),
            cookie: CookieOptions::default(),
        }
    }
}

fn default_session_prefix() -> String {
    "session:".to_string()
}

fn default_session_max_age() -> u64 {
    7 * 24 * 60 * 60
}

fn default_session_cookie() -> String {
    "session_id".to_string()
}

impl SessionConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }
}

/// Cookies that carry the in-flight authorization state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginConfig {
    /// Lifetime of the flow cookies
    #[serde(default = "default_flow_max_age")]
    pub max_age_secs: u64,

    #[serde(default = "default_flow_cookie")]
    pub cookie: CookieOptions,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            max_age_secs: default_flow_max_age(),
            cookie: default_flow_cookie(),
        }
    }
}

fn default_flow_max_age() -> u64 {
    600
}

fn default_flow_cookie() -> CookieOptions {
    CookieOptions {
        path: "/api/v1/auth/oauth/callback".to_string(),
        same_site: SameSitePolicy::Strict,
        ..CookieOptions::default()
    }
}

impl LoginConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Extra rules file merged over the inline limiters
    #[serde(default)]
    pub rules_path: Option<String>,

    #[serde(flatten)]
    pub rules: RateLimitRules,
}

impl RateLimitingConfig {
    /// Inline rules merged with the rules file, if one is configured.
    pub fn load_rules(&self) -> Result<RateLimitRules> {
        let mut rules = self.rules.clone();
        if let Some(path) = &self.rules_path {
            rules.merge(RateLimitRules::from_file(path)?);
        }
        rules.validate()?;
        Ok(rules)
    }
}

impl WardenConfig {
    /// Load configuration from a YAML file, with `WARDEN__*` environment
    /// variables layered on top (e.g. `WARDEN__OAUTH__CLIENT_ID`).
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        // The file is parsed with serde_yaml so map keys such as limiter
        // names keep their case; the config crate lowercases every key.
        let contents = std::fs::read_to_string(path)?;
        let mut document: serde_yaml::Value =
            serde_yaml::from_str(&contents).map_err(|e| WardenError::Config(e.to_string()))?;
        if document.is_null() {
            document = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());
        }

        let overrides: serde_yaml::Value = config::Config::builder()
            .add_source(
                config::Environment::with_prefix("WARDEN")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| WardenError::Config(e.to_string()))?;
        merge_yaml(&mut document, overrides);

        let config: WardenConfig =
            serde_yaml::from_value(document).map_err(|e| WardenError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: WardenConfig =
            serde_yaml::from_str(yaml).map_err(|e| WardenError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field invariants.
    pub fn validate(&self) -> Result<()> {
        if self.oauth.client_id.is_empty() {
            return Err(WardenError::Config("oauth.client_id is required".to_string()));
        }
        Url::parse(&self.oauth.redirect_uri)
            .map_err(|e| WardenError::Config(format!("oauth.redirect_uri: {}", e)))?;
        self.oauth.authorize_endpoint()?;
        self.oauth.token_endpoint()?;
        self.oauth.userinfo_endpoint()?;

        if self.session.max_age_secs == 0 {
            return Err(WardenError::Config("session.max_age_secs must be positive".to_string()));
        }
        if self.session.cookie_name.is_empty() {
            return Err(WardenError::Config("session.cookie_name is required".to_string()));
        }
        if self.login.max_age_secs == 0 {
            return Err(WardenError::Config("login.max_age_secs must be positive".to_string()));
        }
        // browsers drop SameSite=None cookies without Secure
        for (section, cookie) in [("session", &self.session.cookie), ("login", &self.login.cookie)] {
            if cookie.same_site == SameSitePolicy::None && !cookie.secure {
                return Err(WardenError::Config(format!(
                    "{}.cookie: same_site none requires secure",
                    section
                )));
            }
        }

        self.rate_limiting.rules.validate()
    }
}

/// Overlay `overlay` onto `base`, recursing into mappings present in both.
fn merge_yaml(base: &mut serde_yaml::Value, overlay: serde_yaml::Value) {
    match (base, overlay) {
        (serde_yaml::Value::Mapping(base), serde_yaml::Value::Mapping(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_yaml(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
oauth:
  base_url: https://auth.example.com
  client_id: warden-web
  redirect_uri: https://app.example.com/api/v1/auth/oauth/callback
"#;

    #[test]
    fn test_defaults() {
        let config = WardenConfig::from_yaml(MINIMAL).unwrap();

        assert_eq!(config.log.level, "info");
        assert_eq!(config.log.format, LogFormat::Text);
        assert_eq!(config.cache.backend, CacheBackend::Redis);
        assert_eq!(config.oauth.scopes, vec!["openid", "profile"]);
        assert_eq!(config.session.key_prefix, "session:");
        assert_eq!(config.session.cookie_name, "session_id");
        assert_eq!(config.session.cookie.path, "/");
        assert_eq!(config.session.cookie.same_site, SameSitePolicy::Lax);
        assert_eq!(config.login.cookie.path, "/api/v1/auth/oauth/callback");
        assert_eq!(config.login.cookie.same_site, SameSitePolicy::Strict);
        assert!(config.login.cookie.http_only);
        assert_eq!(config.rate_limiting.rules.key_prefix, "ratelimit");
    }

    #[test]
    fn test_endpoints_derive_from_base_url() {
        let mut config = WardenConfig::from_yaml(MINIMAL).unwrap();

        assert_eq!(
            config.oauth.authorize_endpoint().unwrap().as_str(),
            "https://auth.example.com/oauth/v2/authorize"
        );
        assert_eq!(
            config.oauth.token_endpoint().unwrap().as_str(),
            "https://auth.example.com/oauth/v2/token"
        );
        assert_eq!(
            config.oauth.userinfo_endpoint().unwrap().as_str(),
            "https://auth.example.com/oidc/v1/userinfo"
        );

        config.oauth.token_url = Some("https://other.example.com/token".to_string());
        assert_eq!(
            config.oauth.token_endpoint().unwrap().as_str(),
            "https://other.example.com/token"
        );
    }

    #[test]
    fn test_missing_client_id_is_rejected() {
        let yaml = "oauth:\n  base_url: https://auth.example.com\n  redirect_uri: https://app.example.com/cb\n";
        let err = WardenConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("client_id"));
    }

    #[test]
    fn test_same_site_none_requires_secure() {
        let yaml = format!("{}session:\n  cookie:\n    same_site: none\n", MINIMAL);
        assert!(WardenConfig::from_yaml(&yaml).is_err());

        let yaml = format!(
            "{}session:\n  cookie:\n    same_site: none\n    secure: true\n",
            MINIMAL
        );
        assert!(WardenConfig::from_yaml(&yaml).is_ok());
    }

    #[test]
    fn test_inline_rate_limit_rules() {
        let yaml = format!(
            "{}rate_limiting:\n  key_prefix: rl\n  limiters:\n    login:\n      strategy: throttle\n",
            MINIMAL
        );
        let config = WardenConfig::from_yaml(&yaml).unwrap();
        let rules = config.rate_limiting.load_rules().unwrap();
        assert_eq!(rules.key_prefix, "rl");
        assert!(rules.get("login").is_some());
    }

    #[test]
    fn test_from_file_with_rules_file() {
        let mut rules_file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            rules_file,
            "limiters:\n  api:\n    strategy: token_bucket\n    max: 5\n    refill_interval_secs: 1\n"
        )
        .unwrap();

        let mut config_file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        write!(
            config_file,
            "{}rate_limiting:\n  rules_path: {}\n",
            MINIMAL,
            rules_file.path().display()
        )
        .unwrap();

        let config = WardenConfig::from_file(config_file.path()).unwrap();
        assert_eq!(config.oauth.client_id, "warden-web");

        let rules = config.rate_limiting.load_rules().unwrap();
        assert!(rules.get("api").is_some());
    }

    #[test]
    fn test_from_file_keeps_limiter_name_case() {
        let mut config_file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        write!(
            config_file,
            "{}rate_limiting:\n  limiters:\n    loginLimiter:\n      strategy: throttle\n    api:\n      strategy: token_bucket\n      max: 5\n      refill_interval_secs: 1\n",
            MINIMAL
        )
        .unwrap();

        let config = WardenConfig::from_file(config_file.path()).unwrap();
        let rules = config.rate_limiting.load_rules().unwrap();

        let mut names: Vec<&str> = rules.limiters.keys().map(String::as_str).collect();
        names.sort();
        assert_eq!(names, vec!["api", "loginLimiter"]);
        assert!(rules.get("loginlimiter").is_none());
    }

    #[test]
    fn test_environment_overrides_file() {
        let mut config_file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        write!(config_file, "{}log:\n  level: info\n", MINIMAL).unwrap();

        std::env::set_var("WARDEN__LOG__LEVEL", "debug");
        let config = WardenConfig::from_file(config_file.path());
        std::env::remove_var("WARDEN__LOG__LEVEL");

        let config = config.unwrap();
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.oauth.client_id, "warden-web");
    }

    #[test]
    fn test_merge_yaml_recurses_into_mappings() {
        let mut base: serde_yaml::Value =
            serde_yaml::from_str("oauth:\n  client_id: a\n  base_url: https://x\n").unwrap();
        let overlay: serde_yaml::Value = serde_yaml::from_str("oauth:\n  client_id: b\n").unwrap();

        merge_yaml(&mut base, overlay);

        assert_eq!(base["oauth"]["client_id"].as_str(), Some("b"));
        assert_eq!(base["oauth"]["base_url"].as_str(), Some("https://x"));
    }

    #[test]
    fn test_from_file_missing() {
        assert!(WardenConfig::from_file("/nonexistent/warden.yaml").is_err());
    }
}
