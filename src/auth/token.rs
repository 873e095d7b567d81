//! Identity token issuance and verification.
//!
//! Tokens are HS256 JWTs carrying the user's claims. The signing secret is
//! loaded once at startup and held here; it never appears in the token
//! itself. Verification separates the failure shades so callers and tests
//! can distinguish a lapsed token from garbage, while the HTTP boundary
//! collapses them into one rejection.

use anyhow::{Context, Result};
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Decoded, trusted fields carried by a verified token. Immutable once
/// issued; a refreshed identity means a re-issued token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub sub: Uuid,
    pub email: String,
    pub username: String,
    #[serde(default)]
    pub admin: bool,
    pub iat: i64,
    pub exp: i64,
}

/// Outcome of decoding and validating a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    Valid(Claims),
    Expired,
    Malformed,
    SignatureMismatch,
}

/// Signing and verification keys derived from the process-wide secret.
pub struct TokenKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl TokenKeys {
    #[must_use]
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl,
        }
    }

    /// Issue a signed token for the given identity, expiring after the
    /// configured validity window.
    ///
    /// # Errors
    /// Returns an error if signing fails.
    pub fn issue(
        &self,
        user_id: Uuid,
        email: &str,
        username: &str,
        admin: bool,
    ) -> Result<(String, Claims)> {
        let iat = unix_now();
        let ttl = i64::try_from(self.ttl.as_secs()).context("Token TTL out of range")?;
        let claims = Claims {
            sub: user_id,
            email: email.to_string(),
            username: username.to_string(),
            admin,
            iat,
            exp: iat + ttl,
        };

        let token = encode(&Header::default(), &claims, &self.encoding)
            .context("Failed to sign identity token")?;

        Ok((token, claims))
    }

    /// Decode and validate a token.
    ///
    /// The signature is checked before expiry, so a token signed with a
    /// foreign key reports `SignatureMismatch` even when it is also past its
    /// expiry. Expiry is exclusive with zero leeway: a token is invalid at
    /// and after its `exp` instant.
    #[must_use]
    pub fn verify(&self, token: &str) -> Verification {
        let mut validation = Validation::default();
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        let data = match decode::<Claims>(token, &self.decoding, &validation) {
            Ok(data) => data,
            Err(err) => {
                return match err.kind() {
                    ErrorKind::InvalidSignature => Verification::SignatureMismatch,
                    _ => Verification::Malformed,
                }
            }
        };

        if unix_now() >= data.claims.exp {
            return Verification::Expired;
        }

        Verification::Valid(data.claims)
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> TokenKeys {
        TokenKeys::new(b"test-signing-secret", Duration::from_secs(3600))
    }

    #[test]
    fn issue_then_verify_returns_claims() {
        let keys = keys();
        let user_id = Uuid::new_v4();
        let (token, issued) = keys
            .issue(user_id, "alice@example.com", "alice", false)
            .unwrap();

        match keys.verify(&token) {
            Verification::Valid(claims) => {
                assert_eq!(claims, issued);
                assert_eq!(claims.sub, user_id);
                assert_eq!(claims.email, "alice@example.com");
                assert_eq!(claims.username, "alice");
                assert!(!claims.admin);
                assert_eq!(claims.exp, claims.iat + 3600);
            }
            other => panic!("expected Valid, got {other:?}"),
        }
    }

    #[test]
    fn secret_is_not_embedded_in_token() {
        let keys = keys();
        let (token, _) = keys.issue(Uuid::new_v4(), "a@b.c", "a", false).unwrap();
        assert!(!token.contains("test-signing-secret"));
    }

    #[test]
    fn expired_token_is_reported_as_expired() {
        let keys = TokenKeys::new(b"test-signing-secret", Duration::from_secs(0));
        let (token, _) = keys.issue(Uuid::new_v4(), "a@b.c", "a", false).unwrap();
        // ttl = 0 means exp == iat, and expiry is exclusive at the instant.
        assert_eq!(keys.verify(&token), Verification::Expired);
    }

    #[test]
    fn foreign_key_is_a_signature_mismatch() {
        let ours = keys();
        let theirs = TokenKeys::new(b"some-other-secret", Duration::from_secs(3600));
        let (token, _) = theirs.issue(Uuid::new_v4(), "a@b.c", "a", true).unwrap();
        assert_eq!(ours.verify(&token), Verification::SignatureMismatch);
    }

    #[test]
    fn foreign_key_wins_over_expiry() {
        let ours = keys();
        let theirs = TokenKeys::new(b"some-other-secret", Duration::from_secs(0));
        let (token, _) = theirs.issue(Uuid::new_v4(), "a@b.c", "a", false).unwrap();
        // Expired and wrongly signed; the signature verdict comes first.
        assert_eq!(ours.verify(&token), Verification::SignatureMismatch);
    }

    #[test]
    fn garbage_is_malformed() {
        let keys = keys();
        assert_eq!(keys.verify(""), Verification::Malformed);
        assert_eq!(keys.verify("not-a-token"), Verification::Malformed);
        assert_eq!(keys.verify("a.b.c"), Verification::Malformed);
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let keys = keys();
        let (token, _) = keys.issue(Uuid::new_v4(), "a@b.c", "a", false).unwrap();
        let mut parts = token.splitn(3, '.');
        let header = parts.next().unwrap();
        let signature = parts.nth(1).unwrap();
        // Swap in a different payload under the original signature.
        let tampered = format!("{header}.eyJhZG1pbiI6dHJ1ZX0.{signature}");
        assert!(matches!(
            keys.verify(&tampered),
            Verification::SignatureMismatch | Verification::Malformed
        ));
    }
}
