use std::collections::HashSet;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::api::{ApiError, BatchUpdateEntry, CatalogApi};
use super::product::{ProductDefinition, ProductPatch, RemoteProduct};
use crate::util::text::truncate_for_log;

const LOG_ERROR_MAX_LEN: usize = 300;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("package name must not be empty")]
    EmptyPackage,
    #[error("sku {0:?} appears more than once in the input")]
    DuplicateSku(String),
}

/// Reject inputs that declare the same SKU twice.
pub fn ensure_unique_skus(products: &[ProductDefinition]) -> Result<(), SyncError> {
    let mut seen = HashSet::with_capacity(products.len());
    for product in products {
        if !seen.insert(product.sku()) {
            return Err(SyncError::DuplicateSku(product.sku().to_string()));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    Created,
    Updated,
    /// Written by a batch upsert; the API does not say whether it was new.
    Upserted,
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkuOutcome {
    pub sku: String,
    #[serde(flatten)]
    pub outcome: SyncOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
    pub upserted: usize,
    pub failed: usize,
    /// Set when a batch run fell back to per-product calls.
    pub fell_back: bool,
    pub outcomes: Vec<SkuOutcome>,
}

impl SyncReport {
    fn record(&mut self, sku: &str, outcome: SyncOutcome) {
        match &outcome {
            SyncOutcome::Created => self.created += 1,
            SyncOutcome::Updated => self.updated += 1,
            SyncOutcome::Upserted => self.upserted += 1,
            SyncOutcome::Failed { .. } => self.failed += 1,
        }
        self.outcomes.push(SkuOutcome {
            sku: sku.to_string(),
            outcome,
        });
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    pub fn outcome_for(&self, sku: &str) -> Option<&SyncOutcome> {
        self.outcomes
            .iter()
            .find(|o| o.sku == sku)
            .map(|o| &o.outcome)
    }
}

/// Reconciles declared products against the remote catalog of one package.
///
/// Every product is attempted regardless of earlier failures, one request at
/// a time. Existence is discovered by attempting the create, never by
/// listing first.
pub struct CatalogSynchronizer<'a> {
    api: &'a dyn CatalogApi,
    package_name: String,
}

impl<'a> CatalogSynchronizer<'a> {
    pub fn new(api: &'a dyn CatalogApi, package_name: &str) -> Result<Self, SyncError> {
        let package_name = package_name.trim();
        if package_name.is_empty() {
            return Err(SyncError::EmptyPackage);
        }
        Ok(Self {
            api,
            package_name: package_name.to_string(),
        })
    }

    /// Create each product, updating it instead when the create is refused
    /// because the SKU already exists.
    pub async fn sync(&self, products: &[ProductDefinition]) -> Result<SyncReport, SyncError> {
        ensure_unique_skus(products)?;
        info!(
            package = %self.package_name,
            products = products.len(),
            "catalog sync: starting per-product sync"
        );
        let mut report = SyncReport::default();
        for product in products {
            let outcome = self.sync_one(product).await;
            report.record(product.sku(), outcome);
        }
        log_summary(&report);
        Ok(report)
    }

    async fn sync_one(&self, product: &ProductDefinition) -> SyncOutcome {
        let sku = product.sku();
        match self.api.insert(&self.package_name, product).await {
            Ok(_) => {
                info!(sku, price = %product.price(), "catalog sync: created");
                SyncOutcome::Created
            }
            Err(err) if err.is_already_exists() => {
                debug!(sku, "catalog sync: sku exists, updating");
                let patch = ProductPatch::from(product);
                match self.api.update(&self.package_name, sku, &patch).await {
                    Ok(_) => {
                        info!(sku, price = %product.price(), "catalog sync: updated");
                        SyncOutcome::Updated
                    }
                    Err(err) => failed(sku, "update", err),
                }
            }
            Err(err) => failed(sku, "create", err),
        }
    }

    /// Upsert all products in one batch request. If that request fails the
    /// whole input goes through [`CatalogSynchronizer::sync`] instead.
    pub async fn sync_batch(
        &self,
        products: &[ProductDefinition],
    ) -> Result<SyncReport, SyncError> {
        ensure_unique_skus(products)?;
        if products.is_empty() {
            return Ok(SyncReport::default());
        }
        let entries: Vec<BatchUpdateEntry<'_>> =
            products.iter().map(BatchUpdateEntry::upsert).collect();
        info!(
            package = %self.package_name,
            products = entries.len(),
            "catalog sync: submitting batch upsert"
        );
        match self.api.batch_update(&self.package_name, &entries).await {
            Ok(remote) => {
                let returned: HashSet<&str> = remote.iter().map(|p| p.sku.as_str()).collect();
                let mut report = SyncReport::default();
                for product in products {
                    let outcome = if returned.contains(product.sku()) {
                        SyncOutcome::Upserted
                    } else {
                        warn!(sku = product.sku(), "catalog sync: sku missing from batch response");
                        SyncOutcome::Failed {
                            error: "missing from batch response".to_string(),
                        }
                    };
                    report.record(product.sku(), outcome);
                }
                log_summary(&report);
                Ok(report)
            }
            Err(err) => {
                warn!(
                    error = %truncate_for_log(err.to_string(), LOG_ERROR_MAX_LEN),
                    "catalog sync: batch upsert failed; falling back to per-product sync"
                );
                let mut report = self.sync(products).await?;
                report.fell_back = true;
                Ok(report)
            }
        }
    }

    /// Every product currently registered for the package.
    pub async fn list(&self) -> Result<Vec<RemoteProduct>, ApiError> {
        self.api.list(&self.package_name).await
    }
}

fn failed(sku: &str, action: &str, err: ApiError) -> SyncOutcome {
    let error = err.to_string();
    warn!(
        sku,
        action,
        error = %truncate_for_log(error.clone(), LOG_ERROR_MAX_LEN),
        "catalog sync: failed"
    );
    SyncOutcome::Failed { error }
}

fn log_summary(report: &SyncReport) {
    info!(
        created = report.created,
        updated = report.updated,
        upserted = report.upserted,
        failed = report.failed,
        "catalog sync: complete"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::memory::{CatalogCall, InMemoryCatalog};
    use crate::catalog::product::sample_product;

    const PKG: &str = "com.example.app";

    fn coins(micros: i64) -> Vec<ProductDefinition> {
        vec![sample_product("coins_250", micros, "250 Coins")]
    }

    fn card_set() -> Vec<ProductDefinition> {
        vec![
            sample_product("shield_card", 1_990_000, "Shield Card"),
            sample_product("eraser_card", 3_990_000, "Eraser Card"),
            sample_product("mulligan_card", 1_990_000, "Mulligan Card"),
            sample_product("wildcard_card", 9_990_000, "Wildcard"),
        ]
    }

    #[tokio::test]
    async fn create_then_update_on_price_change() {
        let catalog = InMemoryCatalog::new();
        let sync = CatalogSynchronizer::new(&catalog, PKG).unwrap();

        let first = sync.sync(&coins(5_000_000)).await.unwrap();
        assert_eq!((first.created, first.updated, first.failed), (1, 0, 0));

        let second = sync.sync(&coins(6_000_000)).await.unwrap();
        assert_eq!((second.created, second.updated, second.failed), (0, 1, 0));

        let listed = sync.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].sku, "coins_250");
        assert_eq!(listed[0].price_micros(), Some(6_000_000));
    }

    #[tokio::test]
    async fn second_run_is_all_updates_and_same_state() {
        let catalog = InMemoryCatalog::new();
        let sync = CatalogSynchronizer::new(&catalog, PKG).unwrap();
        let products = card_set();

        sync.sync(&products).await.unwrap();
        let after_first = sync.list().await.unwrap();

        let again = sync.sync(&products).await.unwrap();
        assert_eq!(again.created, 0);
        assert_eq!(again.updated, products.len());
        assert_eq!(sync.list().await.unwrap(), after_first);
    }

    #[tokio::test]
    async fn failure_does_not_stop_later_products() {
        let catalog = InMemoryCatalog::new();
        catalog.fail_inserts_for("eraser_card");
        let sync = CatalogSynchronizer::new(&catalog, PKG).unwrap();
        let products = card_set();

        let report = sync.sync(&products).await.unwrap();
        assert_eq!(report.len(), products.len());
        assert_eq!((report.created, report.failed), (3, 1));
        assert!(matches!(
            report.outcome_for("eraser_card"),
            Some(SyncOutcome::Failed { error }) if error.contains("PERMISSION_DENIED")
        ));
        assert!(catalog.get(PKG, "wildcard_card").is_some());
        // A non-duplicate failure is not retried as an update.
        assert!(!catalog.calls().contains(&CatalogCall::Update("eraser_card".into())));
    }

    #[tokio::test]
    async fn failed_update_is_reported_with_error() {
        let catalog = InMemoryCatalog::new();
        let sync = CatalogSynchronizer::new(&catalog, PKG).unwrap();
        sync.sync(&coins(5_000_000)).await.unwrap();

        catalog.fail_updates_for("coins_250");
        let report = sync.sync(&coins(6_000_000)).await.unwrap();
        assert_eq!((report.created, report.updated, report.failed), (0, 0, 1));
        assert!(!report.is_success());
        assert_eq!(catalog.get(PKG, "coins_250").unwrap().price_micros(), Some(5_000_000));
    }

    #[tokio::test]
    async fn duplicate_skus_rejected_before_any_call() {
        let catalog = InMemoryCatalog::new();
        let sync = CatalogSynchronizer::new(&catalog, PKG).unwrap();
        let mut products = card_set();
        products.push(sample_product("shield_card", 2_990_000, "Shield Card"));

        assert_eq!(
            sync.sync(&products).await.unwrap_err(),
            SyncError::DuplicateSku("shield_card".into())
        );
        assert_eq!(
            sync.sync_batch(&products).await.unwrap_err(),
            SyncError::DuplicateSku("shield_card".into())
        );
        assert!(catalog.calls().is_empty());
    }

    #[tokio::test]
    async fn batch_upserts_in_one_call() {
        let catalog = InMemoryCatalog::new();
        let sync = CatalogSynchronizer::new(&catalog, PKG).unwrap();
        let products = card_set();

        let report = sync.sync_batch(&products).await.unwrap();
        assert_eq!(report.upserted, products.len());
        assert!(!report.fell_back);
        assert_eq!(catalog.calls(), vec![CatalogCall::BatchUpdate(products.len())]);
        assert_eq!(catalog.len(), products.len());
    }

    #[tokio::test]
    async fn batch_failure_falls_back_to_per_product() {
        let products = card_set();

        let baseline_catalog = InMemoryCatalog::new();
        baseline_catalog
            .insert(PKG, &products[1])
            .await
            .unwrap();
        baseline_catalog.fail_inserts_for("mulligan_card");
        let baseline = CatalogSynchronizer::new(&baseline_catalog, PKG)
            .unwrap()
            .sync(&products)
            .await
            .unwrap();

        let catalog = InMemoryCatalog::new();
        catalog.insert(PKG, &products[1]).await.unwrap();
        catalog.fail_inserts_for("mulligan_card");
        catalog.fail_batch_updates();
        let report = CatalogSynchronizer::new(&catalog, PKG)
            .unwrap()
            .sync_batch(&products)
            .await
            .unwrap();

        assert!(report.fell_back);
        assert_eq!(
            (report.created, report.updated, report.failed),
            (baseline.created, baseline.updated, baseline.failed)
        );
        assert_eq!(report.outcomes, baseline.outcomes);
        for product in &products {
            assert!(catalog
                .calls()
                .contains(&CatalogCall::Insert(product.sku().to_string())));
        }
    }

    #[tokio::test]
    async fn empty_package_rejected() {
        let catalog = InMemoryCatalog::new();
        assert!(matches!(
            CatalogSynchronizer::new(&catalog, "  "),
            Err(SyncError::EmptyPackage)
        ));
    }

    #[test]
    fn report_serializes_flat_outcomes() {
        let mut report = SyncReport::default();
        report.record("coins_250", SyncOutcome::Created);
        report.record(
            "coins_500",
            SyncOutcome::Failed {
                error: "HTTP 403".into(),
            },
        );
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["created"], 1);
        assert_eq!(value["outcomes"][0]["outcome"], "created");
        assert_eq!(value["outcomes"][1]["sku"], "coins_500");
        assert_eq!(value["outcomes"][1]["error"], "HTTP 403");
    }
}
