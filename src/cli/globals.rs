use secrecy::SecretString;

/// Process-wide immutable configuration, built once at startup and passed
/// explicitly into the components that need it.
#[derive(Debug, Clone)]
pub struct GlobalArgs {
    pub token_secret: SecretString,
    pub token_ttl_seconds: u64,
    pub invite_ttl_seconds: u64,
}

impl GlobalArgs {
    #[must_use]
    pub fn new(token_secret: SecretString, token_ttl_seconds: u64, invite_ttl_seconds: u64) -> Self {
        Self {
            token_secret,
            token_ttl_seconds,
            invite_ttl_seconds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_global_args() {
        let secret = SecretString::from("super-secret".to_string());
        let args = GlobalArgs::new(secret, 3600, 86400);
        assert_eq!(args.token_secret.expose_secret(), "super-secret");
        assert_eq!(args.token_ttl_seconds, 3600);
        assert_eq!(args.invite_ttl_seconds, 86400);
    }

    #[test]
    fn test_global_args_debug_redacts_secret() {
        let args = GlobalArgs::new(SecretString::from("hunter2".to_string()), 60, 60);
        let debug = format!("{args:?}");
        assert!(!debug.contains("hunter2"));
    }
}
