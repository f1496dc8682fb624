//! Product catalog document: the JSON file that declares what the remote
//! catalog should contain.
//!
//! ```json
//! {
//!   "package_name": "com.example.app",
//!   "defaults": { "purchase_type": "managedUser", "currency": "USD" },
//!   "products": [
//!     { "sku": "coins_250", "price_micros": 5000000,
//!       "listings": { "en-US": { "title": "250 Coins", "description": "…" } } },
//!     { "sku": "shield_card", "price_micros": "1990000",
//!       "title": "Shield Card", "description": "Block one attack card" }
//!   ]
//! }
//! ```
//!
//! A product's `title`/`description` pair is shorthand for a single listing
//! in its default language.
use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use thiserror::Error;

use super::product::{
    Listing, ProductDefinition, ProductDraft, ProductError, ProductStatus, PurchaseType,
    DEFAULT_CURRENCY, DEFAULT_LANGUAGE,
};
use super::sync::{ensure_unique_skus, SyncError};

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("catalog document is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("product #{index} ({sku}): {source}")]
    InvalidProduct {
        index: usize,
        sku: String,
        #[source]
        source: ProductError,
    },
    #[error("product #{index} ({sku}): purchase_type missing and no default set")]
    MissingPurchaseType { index: usize, sku: String },
    #[error("product #{index} ({sku}): price_micros {raw:?} is not an integer")]
    InvalidMicros {
        index: usize,
        sku: String,
        raw: String,
    },
    #[error("product #{index} ({sku}): title given and listings already has {language:?}")]
    AmbiguousListing {
        index: usize,
        sku: String,
        language: String,
    },
    #[error("product #{index} ({sku}): description given without a title")]
    DescriptionWithoutTitle { index: usize, sku: String },
    #[error(transparent)]
    Duplicate(#[from] SyncError),
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProductDefaults {
    pub status: Option<ProductStatus>,
    pub purchase_type: Option<PurchaseType>,
    pub currency: Option<String>,
    pub default_language: Option<String>,
}

/// Integer micros, or the decimal string the store API itself uses.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Micros {
    Number(i64),
    Text(String),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProductEntry {
    sku: String,
    status: Option<ProductStatus>,
    purchase_type: Option<PurchaseType>,
    price_micros: Micros,
    currency: Option<String>,
    #[serde(default)]
    listings: BTreeMap<String, Listing>,
    title: Option<String>,
    description: Option<String>,
    default_language: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDocument {
    package_name: Option<String>,
    #[serde(default)]
    defaults: ProductDefaults,
    products: Vec<ProductEntry>,
}

/// A parsed and fully validated catalog document.
#[derive(Debug, Clone)]
pub struct CatalogDocument {
    pub package_name: Option<String>,
    pub products: Vec<ProductDefinition>,
}

impl CatalogDocument {
    pub fn parse(raw: &str) -> Result<Self, DocumentError> {
        let doc: RawDocument = serde_json::from_str(raw)?;
        let defaults = doc.defaults;
        let products = doc
            .products
            .into_iter()
            .enumerate()
            .map(|(index, entry)| entry.into_definition(index, &defaults))
            .collect::<Result<Vec<_>, _>>()?;
        ensure_unique_skus(&products)?;
        Ok(Self {
            package_name: doc
                .package_name
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty()),
            products,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading catalog document {}", path.display()))?;
        let doc = Self::parse(&raw)
            .with_context(|| format!("loading catalog document {}", path.display()))?;
        tracing::debug!(
            path = %path.display(),
            products = doc.products.len(),
            "catalog document loaded"
        );
        Ok(doc)
    }
}

impl ProductEntry {
    fn into_definition(
        self,
        index: usize,
        defaults: &ProductDefaults,
    ) -> Result<ProductDefinition, DocumentError> {
        let sku = self.sku.trim().to_string();
        let price_micros = match self.price_micros {
            Micros::Number(n) => n,
            Micros::Text(raw) => {
                raw.trim()
                    .parse::<i64>()
                    .map_err(|_| DocumentError::InvalidMicros {
                        index,
                        sku: sku.clone(),
                        raw,
                    })?
            }
        };
        let Some(purchase_type) = self
            .purchase_type
            .or_else(|| defaults.purchase_type.clone())
        else {
            return Err(DocumentError::MissingPurchaseType { index, sku });
        };
        let default_language = self
            .default_language
            .or_else(|| defaults.default_language.clone())
            .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());

        if self.title.is_none() && self.description.is_some() {
            return Err(DocumentError::DescriptionWithoutTitle { index, sku });
        }
        let mut listings = self.listings;
        if let Some(title) = self.title {
            if listings.contains_key(&default_language) {
                return Err(DocumentError::AmbiguousListing {
                    index,
                    sku,
                    language: default_language,
                });
            }
            listings.insert(
                default_language.clone(),
                Listing {
                    title,
                    description: self.description.unwrap_or_default(),
                },
            );
        }

        ProductDraft {
            sku: sku.clone(),
            status: self
                .status
                .or(defaults.status)
                .unwrap_or(ProductStatus::Active),
            purchase_type,
            price_micros,
            currency: self
                .currency
                .or_else(|| defaults.currency.clone())
                .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
            listings,
            default_language,
        }
        .validate()
        .map_err(|source| DocumentError::InvalidProduct { index, sku, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_compact_listing() {
        let doc = CatalogDocument::parse(
            r#"{
                "package_name": "com.example.app",
                "defaults": { "purchase_type": "managedUser", "currency": "usd" },
                "products": [
                    { "sku": "coins_250", "price_micros": 5000000,
                      "listings": { "en-US": { "title": "250 Coins", "description": "Get 250 coins" } } },
                    { "sku": "shield_card", "price_micros": "1990000", "status": "inactive",
                      "title": "Shield Card", "description": "Block one attack card" }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(doc.package_name.as_deref(), Some("com.example.app"));
        assert_eq!(doc.products.len(), 2);
        let shield = &doc.products[1];
        assert_eq!(shield.sku(), "shield_card");
        assert_eq!(shield.status(), ProductStatus::Inactive);
        assert_eq!(shield.price().micros(), 1_990_000);
        assert_eq!(shield.price().currency(), "USD");
        assert_eq!(shield.purchase_type(), &PurchaseType::ManagedUser);
        assert_eq!(shield.default_language(), "en-US");
        assert_eq!(shield.title(), "Shield Card");
    }

    #[test]
    fn purchase_type_has_no_builtin_default() {
        let err = CatalogDocument::parse(
            r#"{ "products": [ { "sku": "coins_250", "price_micros": 1, "title": "x" } ] }"#,
        )
        .unwrap_err();
        assert!(matches!(err, DocumentError::MissingPurchaseType { index: 0, .. }));
    }

    #[test]
    fn default_language_without_listing_is_rejected() {
        let err = CatalogDocument::parse(
            r#"{ "defaults": { "purchase_type": "consumable", "default_language": "de-DE" },
                 "products": [ { "sku": "coins_250", "price_micros": 1,
                   "listings": { "en-US": { "title": "250 Coins" } } } ] }"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            DocumentError::InvalidProduct {
                source: ProductError::MissingDefaultListing { .. },
                ..
            }
        ));
    }

    #[test]
    fn duplicate_skus_rejected() {
        let err = CatalogDocument::parse(
            r#"{ "defaults": { "purchase_type": "consumable" },
                 "products": [
                   { "sku": "coins_250", "price_micros": 1, "title": "a" },
                   { "sku": "coins_250", "price_micros": 2, "title": "b" } ] }"#,
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "sku \"coins_250\" appears more than once in the input");
    }

    #[test]
    fn bad_micros_and_unknown_fields() {
        let err = CatalogDocument::parse(
            r#"{ "defaults": { "purchase_type": "consumable" },
                 "products": [ { "sku": "coins_250", "price_micros": "4.99", "title": "a" } ] }"#,
        )
        .unwrap_err();
        assert!(matches!(err, DocumentError::InvalidMicros { .. }));

        let err = CatalogDocument::parse(
            r#"{ "products": [ { "sku": "coins_250", "price": 1 } ] }"#,
        )
        .unwrap_err();
        assert!(matches!(err, DocumentError::Parse(_)));
    }

    #[test]
    fn title_conflicting_with_listing() {
        let err = CatalogDocument::parse(
            r#"{ "defaults": { "purchase_type": "consumable" },
                 "products": [ { "sku": "coins_250", "price_micros": 1, "title": "a",
                   "listings": { "en-US": { "title": "b" } } } ] }"#,
        )
        .unwrap_err();
        assert!(matches!(err, DocumentError::AmbiguousListing { .. }));
    }

    #[test]
    fn description_without_title_is_rejected() {
        let err = CatalogDocument::parse(
            r#"{ "defaults": { "purchase_type": "managedUser" },
                 "products": [ { "sku": "coins_250", "price_micros": 1,
                   "description": "new description",
                   "listings": { "en-US": { "title": "250 Coins", "description": "old" } } } ] }"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            DocumentError::DescriptionWithoutTitle { index: 0, ref sku } if sku == "coins_250"
        ));
    }

    #[test]
    fn load_reports_path() {
        let err = CatalogDocument::load(Path::new("/nonexistent/products.json")).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/products.json"));
    }
}
