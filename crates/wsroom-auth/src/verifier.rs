//! The verification seam used at upgrade time.

use crate::errors::{AuthError, Result};

/// Values some clients send when they have no token to send.
const PLACEHOLDER_TOKENS: &[&str] = &["undefined", "null"];

/// Checks a bearer token and yields the identity it was issued to.
#[cfg_attr(test, mockall::automock)]
pub trait TokenVerifier: Send + Sync {
    /// Verify `token`, returning the principal name on success.
    fn verify(&self, token: &str) -> Result<String>;
}

/// Whether a presented token value counts as absent.
pub fn is_placeholder(token: &str) -> bool {
    let token = token.trim();
    token.is_empty() || PLACEHOLDER_TOKENS.contains(&token)
}

/// Authenticate an optional raw token.
///
/// Missing, empty and placeholder tokens are rejected with
/// [`AuthError::MissingToken`] before `verifier` runs. A verifier returning
/// an empty identity is treated as [`AuthError::MissingIdentity`].
pub fn authenticate(verifier: &dyn TokenVerifier, token: Option<&str>) -> Result<String> {
    let token = match token {
        Some(t) if !is_placeholder(t) => t.trim(),
        _ => return Err(AuthError::MissingToken),
    };
    let identity = verifier.verify(token)?;
    if identity.is_empty() {
        return Err(AuthError::MissingIdentity);
    }
    Ok(identity)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
