//! # wsroom-auth
//!
//! Bearer token handling for WebSocket upgrades.
//!
//! - [`TokenVerifier`]: the seam the server calls with the presented token
//! - [`JwtVerifier`]: HS256 implementation keyed by a shared secret
//! - [`authenticate`]: rejects absent/placeholder tokens, then verifies
//! - [`issue_token`]: mints tokens for clients, tests and tooling

#![deny(unsafe_code)]

pub mod errors;
pub mod jwt;
pub mod verifier;

pub use errors::{AuthError, Result};
pub use jwt::{Claims, DEFAULT_TOKEN_TTL, JwtVerifier, decode_unverified, issue_token};
pub use verifier::{TokenVerifier, authenticate, is_placeholder};

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_then_authenticate() {
        let token = issue_token("alice", "k", DEFAULT_TOKEN_TTL).unwrap();
        let verifier = JwtVerifier::new("k");
        assert_eq!(authenticate(&verifier, Some(&token)).unwrap(), "alice");
    }
}
