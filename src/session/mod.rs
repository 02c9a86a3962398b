//! Cookie-carried sessions over a hashed-token cache.
//!
//! The browser holds a random token; the cache holds the session under the
//! SHA-256 of that token, so reading the cache never yields a usable cookie.

mod cookie;
mod request;
mod store;

use serde::{Deserialize, Serialize};

pub use self::cookie::{CookieOptions, SameSitePolicy};
pub use request::RequestSession;
pub use store::SessionStore;

/// Data persisted for a logged-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user_id: String,
}
