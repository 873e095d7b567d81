pub mod groups;
pub mod health;
pub mod invites;
pub mod login;

#[cfg(test)]
pub(crate) mod testutil;

// common functions for the handlers
use regex::Regex;

/// Invite tokens are 32 random bytes encoded base64url without padding,
/// always 43 characters. Anything else is rejected before touching the store.
pub fn valid_invite_token(token: &str) -> bool {
    Regex::new(r"^[A-Za-z0-9_-]{43}$").is_ok_and(|re| re.is_match(token))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_invite_token() {
        assert!(valid_invite_token(
            "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA"
        ));
        assert!(valid_invite_token(
            "a1B2c3D4e5F6g7H8i9J0k1L2m3N4o5P6q7R8s9T0u1V"
        ));

        assert!(!valid_invite_token(""));
        assert!(!valid_invite_token("short"));
        // 44 chars (padded length) is not a valid token.
        assert!(!valid_invite_token(
            "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA"
        ));
        // Reject characters outside the base64url alphabet.
        assert!(!valid_invite_token(
            "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA+"
        ));
        assert!(!valid_invite_token(
            "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA="
        ));
    }
}
