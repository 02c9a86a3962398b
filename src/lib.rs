//! Warden - OAuth2 login, cookie sessions and rate limiting
//!
//! This crate drives an OAuth2 Authorization Code + PKCE login against an
//! external identity provider, keeps the resulting sessions in a shared cache
//! under hashed cookie tokens, and enforces token-bucket and escalating
//! throttle limits whose read-modify-write runs atomically in the cache.

pub mod cache;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod error;
pub mod oauth;
pub mod ratelimit;
pub mod service;
pub mod session;
