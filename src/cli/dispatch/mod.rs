use crate::cli::{
    actions::Action,
    commands::{DEFAULT_INVITE_TTL_SECONDS, DEFAULT_TOKEN_TTL_SECONDS},
};
use anyhow::Result;
use secrecy::SecretString;

pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    Ok(Action::Server {
        port: matches.get_one::<u16>("port").copied().unwrap_or(8080),
        dsn: matches
            .get_one("dsn")
            .map(|s: &String| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("missing required argument: --dsn"))?,
        token_secret: matches
            .get_one("token-secret")
            .map(|s: &String| SecretString::from(s.to_string()))
            .ok_or_else(|| anyhow::anyhow!("missing required argument: --token-secret"))?,
        token_ttl_seconds: matches
            .get_one::<u64>("token-ttl")
            .copied()
            .unwrap_or(DEFAULT_TOKEN_TTL_SECONDS),
        invite_ttl_seconds: matches
            .get_one::<u64>("invite-ttl")
            .copied()
            .unwrap_or(DEFAULT_INVITE_TTL_SECONDS),
    })
}
