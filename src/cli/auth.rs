use anyhow::Result;
use tracing::warn;

use super::credential_provider;
use crate::auth::ClientSecrets;
use crate::config::AppConfig;

/// Browser login; the credential lands in the token file.
pub async fn run_login(app: &AppConfig) -> Result<()> {
    if let Some(key) = &app.service_account_key {
        warn!(
            key = %key.display(),
            "login: a service account key is configured and will be used instead of this token"
        );
    }
    let secrets = ClientSecrets::load(&app.client_secrets)?;
    let provider = credential_provider(app)?;
    let credential = provider.authenticate_interactively(&secrets).await?;
    match credential.expiry {
        Some(expiry) => println!(
            "logged in; token saved to {} (expires {})",
            app.token_file.display(),
            expiry.to_rfc3339()
        ),
        None => println!("logged in; token saved to {}", app.token_file.display()),
    }
    Ok(())
}

pub fn run_logout(app: &AppConfig) -> Result<()> {
    let provider = credential_provider(app)?;
    if provider.clear()? {
        println!("removed cached token {}", app.token_file.display());
    } else {
        println!("no cached token at {}", app.token_file.display());
    }
    Ok(())
}
