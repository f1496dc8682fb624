use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing::info;

use iap_catalog::cli::catalog::{run_list, run_sync, run_validate, ListCommandConfig, SyncCommandConfig};
use iap_catalog::cli::auth::{run_login, run_logout};
use iap_catalog::config::{AppConfig, ConfigOverrides};
use iap_catalog::util::env;

#[derive(Parser, Debug)]
#[command(
    name = "iap-catalog",
    version,
    about = "Sync a declared in-app product catalog to Google Play"
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// Application package name (overrides IAP_PACKAGE_NAME and the document)
    #[arg(long, global = true)]
    package: Option<String>,
    /// Catalog document path (default: products.json)
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,
    /// Cached OAuth token path (default: token.json)
    #[arg(long, global = true)]
    token_file: Option<PathBuf>,
    /// OAuth client secrets downloaded from the Cloud Console (default: credentials.json)
    #[arg(long, global = true)]
    client_secrets: Option<PathBuf>,
    /// Authenticate with this service-account key instead of a user token
    #[arg(long, global = true)]
    service_account: Option<PathBuf>,
    /// Run against an empty in-memory catalog; no credentials or network
    #[arg(long, global = true, default_value_t = false)]
    dry_run: bool,
    /// Write the sync report or listing as JSON to this path (`-` for stdout)
    #[arg(long, global = true)]
    report: Option<PathBuf>,
    /// Allow a browser login when no usable token is cached
    #[arg(long, global = true, default_value_t = false)]
    interactive: bool,
    /// Include targets and source locations in log lines
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Create or update every product in the catalog document, one at a time
    Sync,
    /// Upsert the catalog in one batch call, falling back to `sync` on failure
    BatchSync,
    /// List the products currently in the remote catalog
    List,
    /// Load and validate the catalog document without network access
    Validate,
    /// Log in through the browser and cache the token
    Login,
    /// Remove the cached token
    Logout,
}

#[tokio::main]
async fn main() -> Result<()> {
    env::init_env();
    let cli = Cli::parse();
    let default_filter = if cli.global.verbose { "debug" } else { "info" };
    iap_catalog::tracing::init_tracing(default_filter, cli.global.verbose)?;

    let g = cli.global;
    let app = AppConfig::from_env().with_overrides(ConfigOverrides {
        package_name: g.package,
        catalog_file: g.catalog,
        token_file: g.token_file,
        client_secrets: g.client_secrets,
        service_account_key: g.service_account,
    });
    AppConfig::log_snapshot("iap-catalog")?;

    match cli.command {
        Commands::Sync | Commands::BatchSync => {
            let batch = matches!(cli.command, Commands::BatchSync);
            let report = run_sync(SyncCommandConfig {
                app,
                batch,
                dry_run: g.dry_run,
                interactive: g.interactive,
                report: g.report,
            })
            .await?;
            info!(total = report.len(), "sync finished");
        }
        Commands::List => {
            run_list(ListCommandConfig {
                app,
                dry_run: g.dry_run,
                interactive: g.interactive,
                report: g.report,
            })
            .await?;
        }
        Commands::Validate => {
            run_validate(&app)?;
        }
        Commands::Login => run_login(&app).await?,
        Commands::Logout => run_logout(&app)?,
    }
    Ok(())
}
