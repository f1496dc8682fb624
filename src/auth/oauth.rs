//! OAuth 2.0 for installed applications: refresh-token renewal and the
//! loopback authorization-code flow with PKCE.
//!
//! Interactive flow:
//! 1. Bind an ephemeral port on 127.0.0.1 and use it as the redirect URI.
//! 2. Print the consent URL; the operator opens it in a browser.
//! 3. Accept the redirect, check `state`, exchange `code` + PKCE verifier.
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::Utc;
use rand::RngCore;
use reqwest::Client;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tracing::{debug, info};
use url::Url;

use super::credential::{Credential, TokenErrorResponse, TokenResponse, GOOGLE_TOKEN_URI};
use crate::util::text::truncate_for_log;

const GOOGLE_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
/// How long the loopback listener waits for the browser redirect.
const CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no usable cached credential in {store}; run `iap-catalog login` first")]
    LoginRequired { store: String },
    #[error("cached credential has no refresh token or client id and cannot be refreshed")]
    NotRefreshable,
    #[error("token endpoint returned HTTP {status}: {error}{}", description_suffix(.description))]
    TokenEndpoint {
        status: u16,
        error: String,
        description: Option<String>,
    },
    #[error("authorization was denied: {0}")]
    Denied(String),
    #[error("authorization callback state did not match; aborting")]
    StateMismatch,
    #[error("timed out waiting for the browser to complete authorization")]
    CallbackTimeout,
}

fn description_suffix(description: &Option<String>) -> String {
    description
        .as_deref()
        .map(|d| format!(" ({d})"))
        .unwrap_or_default()
}

/// The `installed` (or `web`) section of a Google OAuth client file
/// (`credentials.json` downloaded from the Cloud Console).
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: Option<String>,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_auth_uri() -> String {
    GOOGLE_AUTH_URI.to_string()
}

fn default_token_uri() -> String {
    GOOGLE_TOKEN_URI.to_string()
}

#[derive(Debug, Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

impl ClientSecrets {
    pub fn parse(raw: &str) -> Result<Self> {
        let file: ClientSecretsFile =
            serde_json::from_str(raw).context("client secrets file is not valid JSON")?;
        file.installed
            .or(file.web)
            .context("client secrets file has neither an `installed` nor a `web` section")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).with_context(|| {
            format!(
                "reading OAuth client secrets {} (create a Desktop OAuth client in the Cloud Console and download its JSON)",
                path.display()
            )
        })?;
        Self::parse(&raw).with_context(|| format!("loading {}", path.display()))
    }
}

/// PKCE verifier/challenge pair (RFC 7636, S256).
#[derive(Debug, Clone)]
pub struct Pkce {
    pub verifier: String,
    pub challenge: String,
}

impl Pkce {
    pub fn generate() -> Self {
        let verifier = random_urlsafe(32);
        let challenge = challenge_for(&verifier);
        Self {
            verifier,
            challenge,
        }
    }
}

fn challenge_for(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

fn random_urlsafe(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Talks to the OAuth token endpoint.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    http: Client,
}

impl OAuthClient {
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self { http })
    }

    pub(crate) async fn exchange(
        &self,
        token_uri: &str,
        form: &[(&str, &str)],
    ) -> Result<TokenResponse> {
        let resp = self
            .http
            .post(token_uri)
            .form(form)
            .send()
            .await
            .with_context(|| format!("sending token request to {token_uri}"))?;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            let parsed: TokenErrorResponse = serde_json::from_str(&body).unwrap_or_default();
            return Err(AuthError::TokenEndpoint {
                status: status.as_u16(),
                error: parsed
                    .error
                    .unwrap_or_else(|| truncate_for_log(body, 300)),
                description: parsed.error_description,
            }
            .into());
        }
        serde_json::from_str(&body).context("parsing token endpoint response")
    }

    /// Exchange the refresh token for a new access token. The returned
    /// credential keeps the old refresh token unless the server rotated it.
    pub async fn refresh(&self, credential: &Credential) -> Result<Credential> {
        let (Some(refresh_token), Some(client_id)) = (
            credential.refresh_token.as_deref(),
            credential.client_id.as_deref(),
        ) else {
            return Err(AuthError::NotRefreshable.into());
        };
        let mut form = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", client_id),
        ];
        if let Some(secret) = credential.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }
        debug!(token_uri = %credential.token_uri, "oauth: refreshing access token");
        let resp = self.exchange(&credential.token_uri, &form).await?;

        let mut refreshed = credential.clone();
        refreshed.expiry = resp.expiry_from(Utc::now());
        if let Some(scopes) = resp.granted_scopes() {
            refreshed.scopes = scopes;
        }
        if let Some(rotated) = resp.refresh_token.filter(|t| !t.is_empty()) {
            refreshed.refresh_token = Some(rotated);
        }
        refreshed.token = resp.access_token;
        info!(expiry = ?refreshed.expiry, "oauth: access token refreshed");
        Ok(refreshed)
    }

    /// Consent URL for the loopback flow.
    pub fn authorization_url(
        secrets: &ClientSecrets,
        redirect_uri: &str,
        scopes: &[String],
        state: &str,
        pkce: &Pkce,
    ) -> Result<Url> {
        let mut url = Url::parse(&secrets.auth_uri)
            .with_context(|| format!("invalid auth_uri {}", secrets.auth_uri))?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &secrets.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("scope", &scopes.join(" "))
            .append_pair("state", state)
            .append_pair("code_challenge", &pkce.challenge)
            .append_pair("code_challenge_method", "S256")
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent");
        Ok(url)
    }

    /// Run the browser consent flow and return the new credential.
    pub async fn authenticate_interactively(
        &self,
        secrets: &ClientSecrets,
        scopes: &[String],
    ) -> Result<Credential> {
        let listener = TcpListener::bind(("127.0.0.1", 0))
            .await
            .context("binding loopback listener for OAuth redirect")?;
        let redirect_uri = format!("http://127.0.0.1:{}/", listener.local_addr()?.port());
        let state = random_urlsafe(16);
        let pkce = Pkce::generate();
        let auth_url = Self::authorization_url(secrets, &redirect_uri, scopes, &state, &pkce)?;

        println!("\nOpen this URL in a browser to authorize access:\n\n  {auth_url}\n");
        info!(redirect_uri = %redirect_uri, "oauth: waiting for authorization redirect");

        let code = tokio::time::timeout(CALLBACK_TIMEOUT, wait_for_code(&listener, &state))
            .await
            .map_err(|_| AuthError::CallbackTimeout)??;

        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("client_id", secrets.client_id.as_str()),
            ("redirect_uri", redirect_uri.as_str()),
            ("code_verifier", pkce.verifier.as_str()),
        ];
        if let Some(secret) = secrets.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }
        let resp = self.exchange(&secrets.token_uri, &form).await?;
        info!("oauth: authorization code exchanged");

        Ok(Credential {
            expiry: resp.expiry_from(Utc::now()),
            scopes: resp.granted_scopes().unwrap_or_else(|| scopes.to_vec()),
            token: resp.access_token,
            refresh_token: resp.refresh_token,
            token_uri: secrets.token_uri.clone(),
            client_id: Some(secrets.client_id.clone()),
            client_secret: secrets.client_secret.clone(),
        })
    }
}

/// What the browser sent to the redirect URI.
#[derive(Debug, PartialEq, Eq)]
enum Callback {
    Code { code: String, state: String },
    Denied(String),
    /// Favicon and other requests that are not the redirect.
    Ignored,
}

fn parse_callback(request_line: &str) -> Callback {
    // "GET /?code=...&state=... HTTP/1.1"
    let Some(target) = request_line.split_whitespace().nth(1) else {
        return Callback::Ignored;
    };
    let Ok(url) = Url::parse(&format!("http://127.0.0.1{target}")) else {
        return Callback::Ignored;
    };
    let mut code = None;
    let mut state = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => return Callback::Denied(value.into_owned()),
            _ => {}
        }
    }
    match code {
        Some(code) => Callback::Code {
            code,
            state: state.unwrap_or_default(),
        },
        None => Callback::Ignored,
    }
}

async fn wait_for_code(listener: &TcpListener, expected_state: &str) -> Result<String> {
    loop {
        let (mut stream, peer) = listener.accept().await?;
        debug!(%peer, "oauth: redirect connection");
        let (read_half, mut write_half) = stream.split();
        let mut request_line = String::new();
        BufReader::new(read_half).read_line(&mut request_line).await?;

        let callback = parse_callback(&request_line);
        let page = match &callback {
            Callback::Code { .. } => "Authorization complete. You can close this window.",
            Callback::Denied(_) => "Authorization was denied. You can close this window.",
            Callback::Ignored => "",
        };
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{page}",
            page.len()
        );
        write_half.write_all(response.as_bytes()).await?;
        write_half.flush().await?;

        match callback {
            Callback::Code { code, state } => {
                if state != expected_state {
                    return Err(AuthError::StateMismatch.into());
                }
                return Ok(code);
            }
            Callback::Denied(reason) => return Err(AuthError::Denied(reason).into()),
            Callback::Ignored => continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::credential::ANDROID_PUBLISHER_SCOPE;
    use mockito::Matcher;

    #[test]
    fn parses_installed_client_file() {
        let secrets = ClientSecrets::parse(
            r#"{"installed":{"client_id":"123.apps.googleusercontent.com","project_id":"p",
                "auth_uri":"https://accounts.google.com/o/oauth2/auth",
                "token_uri":"https://oauth2.googleapis.com/token",
                "client_secret":"shh","redirect_uris":["http://localhost"]}}"#,
        )
        .unwrap();
        assert_eq!(secrets.client_id, "123.apps.googleusercontent.com");
        assert_eq!(secrets.client_secret.as_deref(), Some("shh"));

        assert!(ClientSecrets::parse(r#"{"other":{}}"#).is_err());
    }

    #[test]
    fn pkce_challenge_matches_rfc_example() {
        // RFC 7636 appendix B.
        assert_eq!(
            challenge_for("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
        let pkce = Pkce::generate();
        assert_eq!(pkce.verifier.len(), 43);
        assert_eq!(pkce.challenge, challenge_for(&pkce.verifier));
    }

    #[test]
    fn authorization_url_carries_pkce_and_offline_access() {
        let secrets = ClientSecrets::parse(r#"{"installed":{"client_id":"cid"}}"#).unwrap();
        let pkce = Pkce::generate();
        let url = OAuthClient::authorization_url(
            &secrets,
            "http://127.0.0.1:4000/",
            &[ANDROID_PUBLISHER_SCOPE.to_string()],
            "st",
            &pkce,
        )
        .unwrap();
        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["client_id"], "cid");
        assert_eq!(pairs["scope"], ANDROID_PUBLISHER_SCOPE);
        assert_eq!(pairs["code_challenge"], pkce.challenge);
        assert_eq!(pairs["access_type"], "offline");
        assert_eq!(pairs["state"], "st");
    }

    #[test]
    fn callback_parsing() {
        assert_eq!(
            parse_callback("GET /?state=abc&code=4%2F0Ad HTTP/1.1\r\n"),
            Callback::Code {
                code: "4/0Ad".into(),
                state: "abc".into()
            }
        );
        assert_eq!(
            parse_callback("GET /?error=access_denied&state=abc HTTP/1.1"),
            Callback::Denied("access_denied".into())
        );
        assert_eq!(parse_callback("GET /favicon.ico HTTP/1.1"), Callback::Ignored);
        assert_eq!(parse_callback(""), Callback::Ignored);
    }

    fn refreshable(token_uri: String) -> Credential {
        Credential {
            token: "old".into(),
            refresh_token: Some("1//refresh".into()),
            token_uri,
            client_id: Some("cid".into()),
            client_secret: Some("shh".into()),
            scopes: vec![ANDROID_PUBLISHER_SCOPE.into()],
            expiry: None,
        }
    }

    #[tokio::test]
    async fn refresh_posts_refresh_grant_and_keeps_refresh_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
                Matcher::UrlEncoded("refresh_token".into(), "1//refresh".into()),
                Matcher::UrlEncoded("client_id".into(), "cid".into()),
                Matcher::UrlEncoded("client_secret".into(), "shh".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"access_token":"new","expires_in":3599,"token_type":"Bearer"}"#)
            .create_async()
            .await;

        let client = OAuthClient::new(5).unwrap();
        let before = Utc::now();
        let refreshed = client
            .refresh(&refreshable(format!("{}/token", server.url())))
            .await
            .unwrap();
        assert_eq!(refreshed.token, "new");
        assert_eq!(refreshed.refresh_token.as_deref(), Some("1//refresh"));
        assert!(refreshed.expiry.unwrap() > before + chrono::Duration::seconds(3500));
        assert!(refreshed.is_valid());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn revoked_refresh_token_surfaces_oauth_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant","error_description":"Token has been expired or revoked."}"#)
            .create_async()
            .await;

        let client = OAuthClient::new(5).unwrap();
        let err = client
            .refresh(&refreshable(format!("{}/token", server.url())))
            .await
            .unwrap_err();
        match err.downcast_ref::<AuthError>() {
            Some(AuthError::TokenEndpoint { status, error, .. }) => {
                assert_eq!(*status, 400);
                assert_eq!(error, "invalid_grant");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn refresh_without_refresh_token_is_rejected_locally() {
        let client = OAuthClient::new(5).unwrap();
        let mut credential = refreshable("http://127.0.0.1:9/token".into());
        credential.refresh_token = None;
        let err = client.refresh(&credential).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AuthError>(),
            Some(AuthError::NotRefreshable)
        ));
    }
}
