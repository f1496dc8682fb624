use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{info, warn};

use super::credential::Credential;
use super::oauth::{AuthError, ClientSecrets, OAuthClient};
use super::service_account::ServiceAccountKey;
use super::store::CredentialStore;

/// Where access tokens come from.
#[derive(Debug, Clone)]
pub enum AuthMode {
    /// Cached user token, refreshed when expired. `client_secrets` is only
    /// read when an interactive login is needed.
    User {
        client_secrets: PathBuf,
        allow_interactive: bool,
    },
    ServiceAccount { key_path: PathBuf },
}

/// Obtains a usable access token before any catalog call.
///
/// Refresh policy for user credentials: load the cached credential once; use
/// it while valid; if expired and refreshable, refresh and persist; otherwise
/// log in interactively when allowed, else fail with
/// [`AuthError::LoginRequired`].
pub struct CredentialProvider {
    store: Box<dyn CredentialStore>,
    oauth: OAuthClient,
    scopes: Vec<String>,
}

impl CredentialProvider {
    pub fn new(store: Box<dyn CredentialStore>, oauth: OAuthClient, scopes: Vec<String>) -> Self {
        Self {
            store,
            oauth,
            scopes,
        }
    }

    pub fn load_cached(&self) -> Result<Option<Credential>> {
        self.store.load()
    }

    pub fn is_valid(&self, credential: &Credential) -> bool {
        credential.is_valid()
    }

    pub async fn refresh(&self, credential: Credential) -> Result<Credential> {
        let refreshed = self.oauth.refresh(&credential).await?;
        self.store.save(&refreshed)?;
        Ok(refreshed)
    }

    pub async fn authenticate_interactively(&self, secrets: &ClientSecrets) -> Result<Credential> {
        let credential = self
            .oauth
            .authenticate_interactively(secrets, &self.scopes)
            .await?;
        if credential.refresh_token.is_none() {
            warn!("oauth: no refresh token granted; the next run will need to log in again");
        }
        self.store.save(&credential)?;
        Ok(credential)
    }

    /// Remove the cached credential. Returns whether one existed.
    pub fn clear(&self) -> Result<bool> {
        self.store.clear()
    }

    pub async fn credential(&self, mode: &AuthMode) -> Result<Credential> {
        match mode {
            AuthMode::ServiceAccount { key_path } => {
                let key = ServiceAccountKey::load(key_path)?;
                self.oauth.service_account_token(&key, &self.scopes).await
            }
            AuthMode::User {
                client_secrets,
                allow_interactive,
            } => {
                self.user_credential(client_secrets, *allow_interactive)
                    .await
            }
        }
    }

    async fn user_credential(
        &self,
        client_secrets: &Path,
        allow_interactive: bool,
    ) -> Result<Credential> {
        let cached = match self.load_cached() {
            Ok(cached) => cached,
            Err(e) if allow_interactive => {
                warn!(error = %format!("{e:#}"), "auth: ignoring unreadable cached credential");
                None
            }
            Err(e) => return Err(e),
        };

        if let Some(credential) = cached {
            let missing_scope = self.scopes.iter().find(|s| !credential.has_scope(s));
            if let Some(scope) = missing_scope {
                warn!(%scope, "auth: cached credential lacks a required scope");
            } else if self.is_valid(&credential) {
                info!(store = %self.store.describe(), "auth: using cached credential");
                return Ok(credential);
            } else if credential.can_refresh() {
                match self.refresh(credential).await {
                    Ok(refreshed) => return Ok(refreshed),
                    Err(e) if allow_interactive => {
                        warn!(error = %format!("{e:#}"), "auth: refresh failed; falling back to login");
                    }
                    Err(e) => return Err(e),
                }
            } else {
                info!("auth: cached credential expired and cannot be refreshed");
            }
        }

        if !allow_interactive {
            return Err(AuthError::LoginRequired {
                store: self.store.describe(),
            }
            .into());
        }
        let secrets = ClientSecrets::load(client_secrets)?;
        self.authenticate_interactively(&secrets).await
    }
}
