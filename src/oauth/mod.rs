//! OAuth2 Authorization Code login with PKCE.

mod client;
mod flow;
pub mod pkce;

pub use client::{AuthorizationRequest, Identity, OAuthClient, TokenSet};
pub use flow::{
    is_local_redirect, LoginFlow, CODE_VERIFIER_COOKIE, DEFAULT_SUCCESS_REDIRECT, REDIRECT_COOKIE,
    STATE_COOKIE,
};
