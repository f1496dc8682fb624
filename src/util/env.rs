//! Environment helpers: one-time dotenv loading and getters.
//! `env_opt` calls `init_env()` first, so callers never have to.
use std::str::FromStr;
use std::sync::Once;
use tracing::info;

static INIT: Once = Once::new();

/// Load `.env` from the working directory, falling back to the crate root.
/// Safe to call many times.
pub fn init_env() {
    INIT.call_once(|| {
        if dotenv::dotenv().is_err() {
            let candidate = format!("{}/.env", env!("CARGO_MANIFEST_DIR"));
            let _ = dotenv::from_filename(candidate);
        }
    });
}

/// Get optional env var (None if unset or empty).
pub fn env_opt(key: &str) -> Option<String> {
    init_env();
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
        _ => None,
    }
}

/// Parse an optional raw value, falling back to `default` when it is absent
/// or does not parse.
pub fn parse_or<T>(raw: Option<&str>, default: T) -> T
where
    T: FromStr,
{
    raw.and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

pub(crate) fn redact_value(key: &str, val: &str) -> String {
    let k = key.to_ascii_uppercase();
    // Suffix match only: IAP_TOKEN_FILE and IAP_CLIENT_SECRETS hold paths.
    if ["_SECRET", "_TOKEN", "_PASSWORD"]
        .iter()
        .any(|suffix| k.ends_with(suffix))
    {
        return "***".to_string();
    }
    let val = val.trim();
    // Keep URLs readable but never their userinfo.
    if let Ok(mut u) = url::Url::parse(val) {
        if !u.username().is_empty() || u.password().is_some() {
            let _ = u.set_username("***");
            let _ = u.set_password(None);
            return u.to_string();
        }
    }
    val.to_string()
}

/// Validate required keys and log one redacted snapshot of the configuration.
pub fn preflight_check(title: &str, required: &[&str], also_log: &[&str]) -> anyhow::Result<()> {
    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|k| env_opt(k).is_none())
        .collect();
    let snapshot: Vec<(String, String)> = also_log
        .iter()
        .map(|&k| {
            let v = env_opt(k).unwrap_or_default();
            (k.to_string(), redact_value(k, &v))
        })
        .collect();
    info!(target = "preflight", title, snapshot = ?snapshot, "configuration snapshot");
    if !missing.is_empty() {
        anyhow::bail!("missing required env: {missing:?}");
    }
    Ok(())
}
