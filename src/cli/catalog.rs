use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::{bail, Result};
use tracing::{info, warn};

use super::{catalog_api, column, write_report};
use crate::catalog::product::format_micros;
use crate::catalog::{CatalogApi, CatalogDocument, CatalogSynchronizer, RemoteProduct, SyncOutcome, SyncReport};
use crate::config::AppConfig;

#[derive(Debug, Clone)]
pub struct SyncCommandConfig {
    pub app: AppConfig,
    /// One `batchUpdate` call instead of a create/update per product.
    pub batch: bool,
    pub dry_run: bool,
    pub interactive: bool,
    pub report: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ListCommandConfig {
    pub app: AppConfig,
    pub dry_run: bool,
    pub interactive: bool,
    pub report: Option<PathBuf>,
}

/// Sync the catalog document. Fails after printing and writing the report
/// when any product failed, so the process exits non-zero.
pub async fn run_sync(cfg: SyncCommandConfig) -> Result<SyncReport> {
    let doc = CatalogDocument::load(&cfg.app.catalog_file)?;
    let package = cfg.app.resolve_package(doc.package_name.as_deref())?;
    info!(
        package = %package,
        products = doc.products.len(),
        batch = cfg.batch,
        dry_run = cfg.dry_run,
        "sync: starting"
    );

    let api = catalog_api(&cfg.app, cfg.dry_run, cfg.interactive).await?;
    let report = sync_document(api.as_ref(), &package, &doc, &cfg).await?;
    require_success(&report)?;
    Ok(report)
}

async fn sync_document(
    api: &dyn CatalogApi,
    package: &str,
    doc: &CatalogDocument,
    cfg: &SyncCommandConfig,
) -> Result<SyncReport> {
    let synchronizer = CatalogSynchronizer::new(api, package)?;
    let report = if cfg.batch {
        synchronizer.sync_batch(&doc.products).await?
    } else {
        synchronizer.sync(&doc.products).await?
    };

    print!("{}", render_sync_report(package, &report));
    if let Some(path) = &cfg.report {
        write_report(path, &report)?;
    }
    Ok(report)
}

/// Any failed product makes the whole sync an error.
pub fn require_success(report: &SyncReport) -> Result<()> {
    if report.is_success() {
        return Ok(());
    }
    let skus: Vec<&str> = report
        .outcomes
        .iter()
        .filter(|o| matches!(o.outcome, SyncOutcome::Failed { .. }))
        .map(|o| o.sku.as_str())
        .collect();
    bail!(
        "{} of {} product(s) failed: {}",
        report.failed,
        report.len(),
        skus.join(", ")
    )
}

pub async fn run_list(cfg: ListCommandConfig) -> Result<Vec<RemoteProduct>> {
    let package = cfg.app.resolve_package(None).or_else(|_| {
        // Fall back to the document's package when it is around.
        let doc = CatalogDocument::load(&cfg.app.catalog_file)?;
        cfg.app.resolve_package(doc.package_name.as_deref())
    })?;

    let api = catalog_api(&cfg.app, cfg.dry_run, cfg.interactive).await?;
    let synchronizer = CatalogSynchronizer::new(api.as_ref(), &package)?;
    let products = synchronizer.list().await?;

    print!("{}", render_listing(&package, &products));
    if let Some(path) = &cfg.report {
        write_report(path, &products)?;
    }
    Ok(products)
}

/// Load and validate the catalog document without touching the network.
pub fn run_validate(app: &AppConfig) -> Result<CatalogDocument> {
    let doc = CatalogDocument::load(&app.catalog_file)?;
    let mut out = String::new();
    match app.resolve_package(doc.package_name.as_deref()) {
        Ok(pkg) => writeln!(out, "package: {pkg}").ok(),
        Err(e) => {
            warn!(error = %e, "validate: package name unresolved");
            writeln!(out, "package: (unset)").ok()
        }
    };
    writeln!(
        out,
        "{} {} {} {} title",
        column("sku", 28),
        column("status", 8),
        column("type", 15),
        column("price", 14)
    )
    .ok();
    for p in &doc.products {
        writeln!(
            out,
            "{} {} {} {} {}",
            column(p.sku(), 28),
            column(p.status().as_str(), 8),
            column(p.purchase_type().as_str(), 15),
            column(&p.price().to_string(), 14),
            p.title()
        )
        .ok();
    }
    writeln!(
        out,
        "{}: {} product(s) valid",
        app.catalog_file.display(),
        doc.products.len()
    )
    .ok();
    print!("{out}");
    Ok(doc)
}

fn render_sync_report(package: &str, report: &SyncReport) -> String {
    let mut out = String::new();
    writeln!(out, "CATALOG SYNC: {package}").ok();
    if report.fell_back {
        writeln!(out, "(batch update failed; fell back to per-product sync)").ok();
    }
    for o in &report.outcomes {
        let (label, detail) = match &o.outcome {
            SyncOutcome::Created => ("created", ""),
            SyncOutcome::Updated => ("updated", ""),
            SyncOutcome::Upserted => ("upserted", ""),
            SyncOutcome::Failed { error } => ("FAILED", error.as_str()),
        };
        writeln!(out, "{} {} {}", column(&o.sku, 28), column(label, 9), detail)
            .ok();
    }
    writeln!(
        out,
        "created: {}  updated: {}  upserted: {}  failed: {}",
        report.created, report.updated, report.upserted, report.failed
    )
    .ok();
    out
}

fn render_listing(package: &str, products: &[RemoteProduct]) -> String {
    let mut out = String::new();
    writeln!(out, "REMOTE CATALOG: {package} ({} products)", products.len()).ok();
    writeln!(
        out,
        "{} {} {} price",
        column("sku", 28),
        column("status", 10),
        column("title", 32)
    )
    .ok();
    for p in products {
        let price = match (p.price_micros(), p.default_price.as_ref()) {
            (Some(micros), Some(dp)) => format!("{} {}", format_micros(micros), dp.currency),
            _ => "-".to_string(),
        };
        writeln!(
            out,
            "{} {} {} {}",
            column(&p.sku, 28),
            column(p.status.as_deref().unwrap_or("-"), 10),
            column(p.title().unwrap_or("-"), 32),
            price
        )
        .ok();
    }
    out
}
