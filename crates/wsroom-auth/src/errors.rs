//! Auth error types.

/// Errors that can occur while authenticating a connection.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No usable token was presented (absent, empty or a placeholder).
    #[error("missing token")]
    MissingToken,

    /// The token failed signature, expiry or shape validation.
    #[error("invalid token: {0}")]
    Invalid(String),

    /// The token verified but carries no identity claim.
    #[error("token has no identity")]
    MissingIdentity,

    /// No verifier is configured, so tokens cannot be checked.
    #[error("token verification is not configured")]
    NotConfigured,

    /// Signing a new token failed.
    #[error("failed to encode token: {0}")]
    Encode(String),
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Self::Invalid(err.to_string())
    }
}

/// Result type for auth operations.
pub type Result<T> = std::result::Result<T, AuthError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
