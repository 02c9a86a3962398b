//! Error types for the Warden service.

use reqwest::StatusCode;
use thiserror::Error;

/// Main error type for Warden operations.
#[derive(Error, Debug)]
pub enum WardenError {
    /// The `state` returned by the provider does not match the stored one
    #[error("OAuth state mismatch")]
    StateMismatch,

    /// The token endpoint rejected the code or answered with garbage
    #[error("Token exchange failed: {0}")]
    TokenExchange(String),

    /// The user-info endpoint failed
    #[error("Identity fetch failed: {0}")]
    IdentityFetch(String),

    /// Generic login failure handed back to clients; the cause stays in `source`
    #[error("Authentication failed")]
    LoginFailed(#[source] Box<WardenError>),

    /// No valid session where one is required
    #[error("Unauthorized")]
    Unauthorized,

    /// A referenced record does not exist
    #[error("{0} not found")]
    NotFound(String),

    /// Shared cache errors
    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),

    /// JSON encoding errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WardenError {
    /// HTTP status the route layer should answer with.
    pub fn status(&self) -> StatusCode {
        match self {
            WardenError::StateMismatch
            | WardenError::TokenExchange(_)
            | WardenError::IdentityFetch(_)
            | WardenError::LoginFailed(_) => StatusCode::BAD_REQUEST,
            WardenError::Unauthorized => StatusCode::UNAUTHORIZED,
            WardenError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message that is safe to show to untrusted clients.
    pub fn public_message(&self) -> String {
        match self {
            WardenError::StateMismatch
            | WardenError::TokenExchange(_)
            | WardenError::IdentityFetch(_)
            | WardenError::LoginFailed(_) => "Authentication failed".to_string(),
            WardenError::Unauthorized => "Unauthorized".to_string(),
            WardenError::NotFound(entity) => format!("{entity} not found"),
            _ => "Internal server error".to_string(),
        }
    }
}

/// Result type alias for Warden operations.
pub type Result<T> = std::result::Result<T, WardenError>;
