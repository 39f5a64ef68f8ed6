//! HS256 JSON Web Tokens.
//!
//! Tokens carry the principal in an `id` claim (`username` is accepted as an
//! alias) and an optional `exp`. Expired tokens are rejected; tokens without
//! `exp` never expire.

use std::time::Duration;

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{AuthError, Result};
use crate::verifier::TokenVerifier;

const JWT_ALGORITHM: Algorithm = Algorithm::HS256;

/// Default lifetime for tokens minted by [`issue_token`].
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(60 * 60);

/// Claims read from and written to tokens.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// Principal name.
    #[serde(alias = "username", default)]
    pub id: String,
    /// Expiry as a Unix timestamp in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}

/// Verifies HS256 tokens against a shared secret.
#[derive(Clone)]
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    /// Create a verifier for tokens signed with `secret`.
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(JWT_ALGORITHM);
        validation.required_spec_claims.clear();
        validation.leeway = 0;
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Decode and validate `token`, returning its claims.
    pub fn decode(&self, token: &str) -> Result<Claims> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.key, &self.validation)?;
        if data.claims.id.is_empty() {
            tracing::debug!("token verified without identity claim");
            return Err(AuthError::MissingIdentity);
        }
        Ok(data.claims)
    }
}

impl std::fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtVerifier")
            .field("algorithm", &JWT_ALGORITHM)
            .finish_non_exhaustive()
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<String> {
        self.decode(token).map(|claims| claims.id)
    }
}

/// Mint an HS256 token for `identity` that expires after `ttl`.
pub fn issue_token(identity: &str, secret: &str, ttl: Duration) -> Result<String> {
    let ttl = i64::try_from(ttl.as_secs()).map_err(|e| AuthError::Encode(e.to_string()))?;
    let claims = Claims {
        id: identity.to_string(),
        exp: Some(chrono::Utc::now().timestamp() + ttl),
    };
    jsonwebtoken::encode(
        &Header::new(JWT_ALGORITHM),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AuthError::Encode(e.to_string()))
}

/// Read a token's claims without checking its signature or expiry.
///
/// Only for display (e.g. a client showing who it is logged in as); never
/// use the result for access decisions.
pub fn decode_unverified(token: &str) -> Result<Map<String, Value>> {
    let mut validation = Validation::new(JWT_ALGORITHM);
    validation.insecure_disable_signature_validation();
    validation.required_spec_claims.clear();
    validation.validate_exp = false;
    let data = jsonwebtoken::decode::<Map<String, Value>>(
        token,
        &DecodingKey::from_secret(&[]),
        &validation,
    )?;
    Ok(data.claims)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const SECRET: &str = "test-secret";

    fn sign(claims: &Value, secret: &str) -> String {
        jsonwebtoken::encode(
            &Header::new(JWT_ALGORITHM),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn issued_token_verifies() {
        let token = issue_token("alice", SECRET, DEFAULT_TOKEN_TTL).unwrap();
        let verifier = JwtVerifier::new(SECRET);
        assert_eq!(verifier.verify(&token).unwrap(), "alice");
    }

    #[test]
    fn wrong_secret_is_invalid() {
        let token = issue_token("alice", SECRET, DEFAULT_TOKEN_TTL).unwrap();
        let verifier = JwtVerifier::new("other-secret");
        assert_matches!(verifier.verify(&token), Err(AuthError::Invalid(_)));
    }

    #[test]
    fn expired_token_is_invalid() {
        let exp = chrono::Utc::now().timestamp() - 10;
        let token = sign(&serde_json::json!({"id": "alice", "exp": exp}), SECRET);
        let verifier = JwtVerifier::new(SECRET);
        assert_matches!(verifier.verify(&token), Err(AuthError::Invalid(_)));
    }

    #[test]
    fn token_without_exp_verifies() {
        let token = sign(&serde_json::json!({"id": "bob"}), SECRET);
        assert_eq!(JwtVerifier::new(SECRET).verify(&token).unwrap(), "bob");
    }

    #[test]
    fn username_claim_is_accepted() {
        let token = sign(&serde_json::json!({"username": "carol"}), SECRET);
        assert_eq!(JwtVerifier::new(SECRET).verify(&token).unwrap(), "carol");
    }

    #[test]
    fn missing_identity_claim() {
        let token = sign(&serde_json::json!({"role": "admin"}), SECRET);
        assert_matches!(
            JwtVerifier::new(SECRET).verify(&token),
            Err(AuthError::MissingIdentity)
        );
    }

    #[test]
    fn garbage_is_invalid() {
        assert_matches!(
            JwtVerifier::new(SECRET).verify("not.a.token"),
            Err(AuthError::Invalid(_))
        );
    }

    #[test]
    fn unverified_decode_reads_claims() {
        let token = issue_token("dave", SECRET, DEFAULT_TOKEN_TTL).unwrap();
        let claims = decode_unverified(&token).unwrap();
        assert_eq!(claims["id"], "dave");
        assert!(claims["exp"].is_i64());
    }

    #[test]
    fn debug_hides_key() {
        let rendered = format!("{:?}", JwtVerifier::new(SECRET));
        assert!(!rendered.contains(SECRET));
    }
}
