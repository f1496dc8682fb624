//! Service-account authentication (OAuth 2.0 JWT bearer grant, RFC 7523).
//!
//! The key file's RSA key signs a short-lived assertion which the token
//! endpoint exchanges for an access token. Nothing is cached on disk; a run
//! signs a fresh assertion.
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::credential::{Credential, GOOGLE_TOKEN_URI};
use super::oauth::OAuthClient;

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_MINUTES: i64 = 60;

fn default_token_uri() -> String {
    GOOGLE_TOKEN_URI.to_string()
}

/// Fields used from a Google service-account key file.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    pub private_key_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    iss: String,
    scope: String,
    aud: String,
    iat: i64,
    exp: i64,
}

impl ServiceAccountKey {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading service account key {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("parsing service account key {}", path.display()))
    }

    /// Signed RS256 assertion for `scopes`, valid for one hour from now.
    pub fn assertion(&self, scopes: &[String]) -> Result<String> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.private_key_id.clone();

        let now = Utc::now();
        let claims = Claims {
            iss: self.client_email.clone(),
            scope: scopes.join(" "),
            aud: self.token_uri.clone(),
            iat: now.timestamp(),
            exp: (now + Duration::minutes(ASSERTION_LIFETIME_MINUTES)).timestamp(),
        };
        let key = EncodingKey::from_rsa_pem(self.private_key.as_bytes())
            .context("service account private_key is not an RSA PEM key")?;
        encode(&header, &claims, &key).context("signing service account assertion")
    }
}

impl OAuthClient {
    /// Exchange a signed assertion for an access token. The credential has no
    /// refresh token; callers sign a new assertion when it expires.
    pub async fn service_account_token(
        &self,
        key: &ServiceAccountKey,
        scopes: &[String],
    ) -> Result<Credential> {
        let assertion = key.assertion(scopes)?;
        let resp = self
            .exchange(
                &key.token_uri,
                &[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())],
            )
            .await?;
        info!(
            client_email = %key.client_email,
            expires_in = ?resp.expires_in,
            "service account: access token acquired"
        );
        Ok(Credential {
            expiry: resp.expiry_from(Utc::now()),
            scopes: resp.granted_scopes().unwrap_or_else(|| scopes.to_vec()),
            token: resp.access_token,
            refresh_token: None,
            token_uri: key.token_uri.clone(),
            client_id: None,
            client_secret: None,
        })
    }
}
