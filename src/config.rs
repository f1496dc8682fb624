//! Runtime configuration: defaults, then `IAP_*` env vars (and `.env`), then
//! CLI flags.
use std::path::PathBuf;

use anyhow::{bail, Result};

use crate::auth::{AuthMode, TOKEN_FILE_DEFAULT};
use crate::catalog::client::DEFAULT_TIMEOUT_SECS;
use crate::util::env;

pub const ENV_PACKAGE_NAME: &str = "IAP_PACKAGE_NAME";
pub const ENV_CATALOG_FILE: &str = "IAP_CATALOG_FILE";
pub const ENV_TOKEN_FILE: &str = "IAP_TOKEN_FILE";
pub const ENV_CLIENT_SECRETS: &str = "IAP_CLIENT_SECRETS";
pub const ENV_SERVICE_ACCOUNT_KEY: &str = "IAP_SERVICE_ACCOUNT_KEY";
pub const ENV_API_BASE_URL: &str = "IAP_API_BASE_URL";
pub const ENV_HTTP_TIMEOUT_SECS: &str = "IAP_HTTP_TIMEOUT_SECS";

const ALL_KEYS: &[&str] = &[
    ENV_PACKAGE_NAME,
    ENV_CATALOG_FILE,
    ENV_TOKEN_FILE,
    ENV_CLIENT_SECRETS,
    ENV_SERVICE_ACCOUNT_KEY,
    ENV_API_BASE_URL,
    ENV_HTTP_TIMEOUT_SECS,
];

pub const CATALOG_FILE_DEFAULT: &str = "products.json";
pub const CLIENT_SECRETS_DEFAULT: &str = "credentials.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub package_name: Option<String>,
    pub catalog_file: PathBuf,
    pub token_file: PathBuf,
    pub client_secrets: PathBuf,
    pub service_account_key: Option<PathBuf>,
    pub api_base_url: Option<String>,
    pub http_timeout_secs: u64,
}

/// Values supplied on the command line. `None` keeps the env/default value.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub package_name: Option<String>,
    pub catalog_file: Option<PathBuf>,
    pub token_file: Option<PathBuf>,
    pub client_secrets: Option<PathBuf>,
    pub service_account_key: Option<PathBuf>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(env::env_opt)
    }

    /// Build from any key lookup; blank values must already map to `None`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let path_or = |key: &str, default: &str| {
            PathBuf::from(lookup(key).unwrap_or_else(|| default.to_string()))
        };
        Self {
            package_name: lookup(ENV_PACKAGE_NAME),
            catalog_file: path_or(ENV_CATALOG_FILE, CATALOG_FILE_DEFAULT),
            token_file: path_or(ENV_TOKEN_FILE, TOKEN_FILE_DEFAULT),
            client_secrets: path_or(ENV_CLIENT_SECRETS, CLIENT_SECRETS_DEFAULT),
            service_account_key: lookup(ENV_SERVICE_ACCOUNT_KEY).map(PathBuf::from),
            api_base_url: lookup(ENV_API_BASE_URL),
            http_timeout_secs: match env::parse_or(
                lookup(ENV_HTTP_TIMEOUT_SECS).as_deref(),
                DEFAULT_TIMEOUT_SECS,
            ) {
                0 => DEFAULT_TIMEOUT_SECS,
                secs => secs,
            },
        }
    }

    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Self {
        if let Some(pkg) = overrides.package_name.filter(|p| !p.trim().is_empty()) {
            self.package_name = Some(pkg.trim().to_string());
        }
        if let Some(path) = overrides.catalog_file {
            self.catalog_file = path;
        }
        if let Some(path) = overrides.token_file {
            self.token_file = path;
        }
        if let Some(path) = overrides.client_secrets {
            self.client_secrets = path;
        }
        if overrides.service_account_key.is_some() {
            self.service_account_key = overrides.service_account_key;
        }
        self
    }

    /// Package to operate on: CLI/env value first, then the document's.
    pub fn resolve_package(&self, document_package: Option<&str>) -> Result<String> {
        match self.package_name.as_deref().or(document_package) {
            Some(pkg) if !pkg.trim().is_empty() => Ok(pkg.trim().to_string()),
            _ => bail!(
                "no package name: pass --package, set {ENV_PACKAGE_NAME}, or add \"package_name\" to the catalog document"
            ),
        }
    }

    /// A configured service-account key takes precedence over user tokens.
    pub fn auth_mode(&self, allow_interactive: bool) -> AuthMode {
        match &self.service_account_key {
            Some(key_path) => AuthMode::ServiceAccount {
                key_path: key_path.clone(),
            },
            None => AuthMode::User {
                client_secrets: self.client_secrets.clone(),
                allow_interactive,
            },
        }
    }

    /// Log a redacted snapshot of the `IAP_*` environment.
    pub fn log_snapshot(title: &str) -> Result<()> {
        env::preflight_check(title, &[], ALL_KEYS)
    }
}
