//! Command implementations behind the `iap-catalog` binary. Each command
//! takes a `*CommandConfig` built by `main` from flags and [`AppConfig`].
pub mod auth;
pub mod catalog;

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::auth::{CredentialProvider, FileCredentialStore, OAuthClient, ANDROID_PUBLISHER_SCOPE};
use crate::catalog::{CatalogApi, InMemoryCatalog, PlayCatalogClient};
use crate::config::AppConfig;

pub(crate) fn credential_provider(app: &AppConfig) -> Result<CredentialProvider> {
    Ok(CredentialProvider::new(
        Box::new(FileCredentialStore::new(&app.token_file)),
        OAuthClient::new(app.http_timeout_secs)?,
        vec![ANDROID_PUBLISHER_SCOPE.to_string()],
    ))
}

/// The catalog to talk to. Dry runs get an empty in-memory catalog and never
/// touch credentials.
pub(crate) async fn catalog_api(
    app: &AppConfig,
    dry_run: bool,
    interactive: bool,
) -> Result<Box<dyn CatalogApi>> {
    if dry_run {
        info!("dry run: using an empty in-memory catalog");
        return Ok(Box::new(InMemoryCatalog::new()));
    }
    let provider = credential_provider(app)?;
    let credential = provider
        .credential(&app.auth_mode(interactive))
        .await
        .context("authenticating with the Android Publisher API")?;
    let client = PlayCatalogClient::new(
        app.api_base_url.as_deref(),
        Some(app.http_timeout_secs),
        credential.token,
    )?;
    Ok(Box::new(client))
}

/// Write `value` as pretty JSON to `path`, or to stdout when `path` is `-`.
pub fn write_report<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    if path.as_os_str() == "-" {
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{json}")?;
        return Ok(());
    }
    std::fs::write(path, json + "\n")
        .with_context(|| format!("writing report {}", path.display()))?;
    info!(path = %path.display(), "report written");
    Ok(())
}

/// Pad or cut `s` to exactly `width` chars for table columns.
pub(crate) fn column(s: &str, width: usize) -> String {
    let count = s.chars().count();
    if count > width {
        let mut cut: String = s.chars().take(width.saturating_sub(1)).collect();
        cut.push('…');
        cut
    } else {
        format!("{s}{}", " ".repeat(width - count))
    }
}
