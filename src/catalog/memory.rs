use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use super::api::{ApiError, BatchUpdateEntry, CatalogApi};
use super::product::{ProductDefinition, ProductPatch, RemoteProduct};

/// A call observed by [`InMemoryCatalog`], in issue order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogCall {
    Insert(String),
    Update(String),
    BatchUpdate(usize),
    List,
}

#[derive(Debug, Default)]
struct State {
    /// (package, sku) -> product
    products: BTreeMap<(String, String), RemoteProduct>,
    failing_inserts: HashSet<String>,
    failing_updates: HashSet<String>,
    batch_unavailable: bool,
    calls: Vec<CatalogCall>,
}

/// Catalog held in process memory with the store API's create/update
/// semantics. Backs `--dry-run` and the synchronizer tests; failures can be
/// injected per SKU.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    state: Mutex<State>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock leaves the map itself consistent.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make every insert of `sku` fail with a permission error.
    pub fn fail_inserts_for(&self, sku: &str) {
        self.state().failing_inserts.insert(sku.to_string());
    }

    /// Make every update of `sku` fail with a validation error.
    pub fn fail_updates_for(&self, sku: &str) {
        self.state().failing_updates.insert(sku.to_string());
    }

    /// Make the batch endpoint fail as if the service were unreachable.
    pub fn fail_batch_updates(&self) {
        self.state().batch_unavailable = true;
    }

    pub fn calls(&self) -> Vec<CatalogCall> {
        self.state().calls.clone()
    }

    pub fn get(&self, package_name: &str, sku: &str) -> Option<RemoteProduct> {
        self.state()
            .products
            .get(&(package_name.to_string(), sku.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.state().products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn status_error(status: u16, kind: &str, message: String) -> ApiError {
    ApiError::Status {
        status,
        kind: Some(kind.to_string()),
        reason: None,
        message,
    }
}

fn apply_patch(existing: &mut RemoteProduct, patch: RemoteProduct) {
    existing.status = patch.status;
    existing.default_price = patch.default_price;
    existing.listings = patch.listings;
}

#[async_trait::async_trait]
impl CatalogApi for InMemoryCatalog {
    async fn insert(
        &self,
        package_name: &str,
        product: &ProductDefinition,
    ) -> Result<RemoteProduct, ApiError> {
        let mut state = self.state();
        state.calls.push(CatalogCall::Insert(product.sku().to_string()));
        if state.failing_inserts.contains(product.sku()) {
            return Err(status_error(
                403,
                "PERMISSION_DENIED",
                format!("caller may not create {}", product.sku()),
            ));
        }
        let key = (package_name.to_string(), product.sku().to_string());
        if state.products.contains_key(&key) {
            return Err(ApiError::Status {
                status: 409,
                kind: Some("ALREADY_EXISTS".into()),
                reason: Some("duplicate".into()),
                message: format!("Product id {} already exists.", product.sku()),
            });
        }
        let remote = product.to_remote(package_name);
        state.products.insert(key, remote.clone());
        Ok(remote)
    }

    async fn update(
        &self,
        package_name: &str,
        sku: &str,
        patch: &ProductPatch,
    ) -> Result<RemoteProduct, ApiError> {
        let mut state = self.state();
        state.calls.push(CatalogCall::Update(sku.to_string()));
        if state.failing_updates.contains(sku) {
            return Err(status_error(
                400,
                "INVALID_ARGUMENT",
                format!("rejected update for {sku}"),
            ));
        }
        let key = (package_name.to_string(), sku.to_string());
        let Some(existing) = state.products.get_mut(&key) else {
            return Err(status_error(
                404,
                "NOT_FOUND",
                format!("No product with id {sku}."),
            ));
        };
        apply_patch(existing, patch.to_remote(package_name, sku));
        Ok(existing.clone())
    }

    async fn batch_update(
        &self,
        package_name: &str,
        entries: &[BatchUpdateEntry<'_>],
    ) -> Result<Vec<RemoteProduct>, ApiError> {
        let mut guard = self.state();
        let state = &mut *guard;
        state.calls.push(CatalogCall::BatchUpdate(entries.len()));
        if state.batch_unavailable {
            return Err(status_error(
                503,
                "UNAVAILABLE",
                "The service is currently unavailable.".into(),
            ));
        }
        // All-or-nothing, like the remote endpoint: check before mutating.
        for entry in entries {
            let key = (package_name.to_string(), entry.product.sku().to_string());
            if !entry.allow_missing && !state.products.contains_key(&key) {
                return Err(status_error(
                    404,
                    "NOT_FOUND",
                    format!("No product with id {}.", entry.product.sku()),
                ));
            }
        }
        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            let key = (package_name.to_string(), entry.product.sku().to_string());
            let stored = match state.products.get_mut(&key) {
                Some(existing) => {
                    let patch = ProductPatch::from(entry.product);
                    apply_patch(existing, patch.to_remote(package_name, entry.product.sku()));
                    existing.clone()
                }
                None => {
                    let remote = entry.product.to_remote(package_name);
                    state.products.insert(key, remote.clone());
                    remote
                }
            };
            out.push(stored);
        }
        Ok(out)
    }

    async fn list(&self, package_name: &str) -> Result<Vec<RemoteProduct>, ApiError> {
        let mut state = self.state();
        state.calls.push(CatalogCall::List);
        Ok(state
            .products
            .iter()
            .filter(|((pkg, _), _)| pkg == package_name)
            .map(|(_, product)| product.clone())
            .collect())
    }
}
