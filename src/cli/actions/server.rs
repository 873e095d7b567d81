use crate::{
    api,
    cli::{actions::Action, globals::GlobalArgs},
};
use anyhow::{anyhow, Result};
use url::Url;

/// Handle the server action
pub async fn handle(action: Action) -> Result<()> {
    match action {
        Action::Server {
            port,
            dsn,
            token_secret,
            token_ttl_seconds,
            invite_ttl_seconds,
        } => {
            let parsed = Url::parse(&dsn)?;
            match parsed.scheme() {
                "postgres" | "postgresql" => (),
                scheme => return Err(anyhow!("Unsupported DSN scheme: {scheme}")),
            }

            let globals = GlobalArgs::new(token_secret, token_ttl_seconds, invite_ttl_seconds);

            api::new(port, dsn, &globals).await?;
        }
    }

    Ok(())
}
