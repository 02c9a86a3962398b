//! Cookie attribute settings shared by the session and login-flow cookies.

use std::time::Duration;

use cookie::{Cookie, SameSite};
use serde::{Deserialize, Serialize};

/// `SameSite` policy as written in configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SameSitePolicy {
    Strict,
    #[default]
    Lax,
    None,
}

impl From<SameSitePolicy> for SameSite {
    fn from(policy: SameSitePolicy) -> Self {
        match policy {
            SameSitePolicy::Strict => SameSite::Strict,
            SameSitePolicy::Lax => SameSite::Lax,
            SameSitePolicy::None => SameSite::None,
        }
    }
}

/// Attributes applied to every cookie written with these options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieOptions {
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub secure: bool,
    #[serde(default = "default_http_only")]
    pub http_only: bool,
    #[serde(default)]
    pub same_site: SameSitePolicy,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            path: default_path(),
            domain: None,
            secure: false,
            http_only: default_http_only(),
            same_site: SameSitePolicy::default(),
        }
    }
}

fn default_path() -> String {
    "/".to_string()
}

fn default_http_only() -> bool {
    true
}

impl CookieOptions {
    /// Build a cookie carrying `value` with these attributes.
    pub fn build(&self, name: &str, value: String, max_age: Option<Duration>) -> Cookie<'static> {
        let mut builder = Cookie::build((name.to_string(), value))
            .path(self.path.clone())
            .secure(self.secure)
            .http_only(self.http_only)
            .same_site(self.same_site.into());
        if let Some(domain) = &self.domain {
            builder = builder.domain(domain.clone());
        }
        if let Some(max_age) = max_age {
            builder = builder.max_age(time::Duration::seconds(max_age.as_secs() as i64));
        }
        builder.build()
    }

    /// A cookie that matches `name` under these attributes, for removal from a jar.
    pub fn removal(&self, name: &str) -> Cookie<'static> {
        let mut builder = Cookie::build(name.to_string()).path(self.path.clone());
        if let Some(domain) = &self.domain {
            builder = builder.domain(domain.clone());
        }
        builder.build()
    }
}
