use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_LANGUAGE: &str = "en-US";
pub const DEFAULT_CURRENCY: &str = "USD";

/// Google rejects longer product ids.
const SKU_MAX_LEN: usize = 139;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProductError {
    #[error("sku must not be empty")]
    EmptySku,
    #[error("sku {sku:?} must start with a lowercase letter or digit and contain only [a-z0-9_.] (max 139 chars)")]
    InvalidSku { sku: String },
    #[error("{sku}: price must be non-negative, got {micros} micros")]
    NegativePrice { sku: String, micros: i64 },
    #[error("{sku}: currency {currency:?} is not a three-letter ISO code")]
    InvalidCurrency { sku: String, currency: String },
    #[error("{sku}: at least one listing is required")]
    NoListings { sku: String },
    #[error("{sku}: default language {language:?} has no listing")]
    MissingDefaultListing { sku: String, language: String },
    #[error("{sku}: listing {locale:?} has an empty title")]
    EmptyTitle { sku: String, locale: String },
    #[error("unknown product status {0:?} (expected active or inactive)")]
    UnknownStatus(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductStatus {
    Active,
    Inactive,
}

impl ProductStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductStatus::Active => "active",
            ProductStatus::Inactive => "inactive",
        }
    }
}

impl FromStr for ProductStatus {
    type Err = ProductError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(ProductStatus::Active),
            "inactive" => Ok(ProductStatus::Inactive),
            other => Err(ProductError::UnknownStatus(other.to_string())),
        }
    }
}

/// Purchase type as the store API spells it.
///
/// The accepted set differs between API revisions, so anything outside the
/// known values is carried through verbatim and left for the remote side to
/// validate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PurchaseType {
    ManagedUser,
    ManagedProduct,
    Consumable,
    Subscription,
    Other(String),
}

impl PurchaseType {
    pub fn as_str(&self) -> &str {
        match self {
            PurchaseType::ManagedUser => "managedUser",
            PurchaseType::ManagedProduct => "managedProduct",
            PurchaseType::Consumable => "consumable",
            PurchaseType::Subscription => "subscription",
            PurchaseType::Other(raw) => raw.as_str(),
        }
    }
}

impl From<String> for PurchaseType {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "managedUser" => PurchaseType::ManagedUser,
            "managedProduct" => PurchaseType::ManagedProduct,
            "consumable" => PurchaseType::Consumable,
            "subscription" => PurchaseType::Subscription,
            _ => PurchaseType::Other(raw),
        }
    }
}

impl From<PurchaseType> for String {
    fn from(value: PurchaseType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for PurchaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Price in micros of `currency` (1 USD = 1_000_000 micros).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Price {
    micros: u64,
    currency: String,
}

impl Price {
    pub fn new(sku: &str, micros: i64, currency: &str) -> Result<Self, ProductError> {
        let micros = u64::try_from(micros).map_err(|_| ProductError::NegativePrice {
            sku: sku.to_string(),
            micros,
        })?;
        let currency = currency.trim().to_ascii_uppercase();
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(ProductError::InvalidCurrency {
                sku: sku.to_string(),
                currency,
            });
        }
        Ok(Self { micros, currency })
    }

    pub fn micros(&self) -> u64 {
        self.micros
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn to_remote(&self) -> RemotePrice {
        RemotePrice {
            price_micros: self.micros.to_string(),
            currency: self.currency.clone(),
        }
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", format_micros(self.micros), self.currency)
    }
}

/// `5_990_000` -> `"5.99"`. Sub-cent precision is dropped.
pub fn format_micros(micros: u64) -> String {
    format!("{}.{:02}", micros / 1_000_000, (micros % 1_000_000) / 10_000)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub title: String,
    #[serde(default)]
    pub description: String,
}

/// Unvalidated product fields; turned into a [`ProductDefinition`] by
/// [`ProductDraft::validate`].
#[derive(Debug, Clone)]
pub struct ProductDraft {
    pub sku: String,
    pub status: ProductStatus,
    pub purchase_type: PurchaseType,
    pub price_micros: i64,
    pub currency: String,
    pub listings: BTreeMap<String, Listing>,
    pub default_language: String,
}

impl ProductDraft {
    pub fn validate(self) -> Result<ProductDefinition, ProductError> {
        let sku = self.sku.trim().to_string();
        validate_sku(&sku)?;
        let price = Price::new(&sku, self.price_micros, &self.currency)?;
        if self.listings.is_empty() {
            return Err(ProductError::NoListings { sku });
        }
        if let Some((locale, _)) = self
            .listings
            .iter()
            .find(|(_, listing)| listing.title.trim().is_empty())
        {
            return Err(ProductError::EmptyTitle {
                sku,
                locale: locale.clone(),
            });
        }
        if !self.listings.contains_key(&self.default_language) {
            return Err(ProductError::MissingDefaultListing {
                sku,
                language: self.default_language,
            });
        }
        Ok(ProductDefinition {
            sku,
            status: self.status,
            purchase_type: self.purchase_type,
            price,
            listings: self.listings,
            default_language: self.default_language,
        })
    }
}

fn validate_sku(sku: &str) -> Result<(), ProductError> {
    let Some(first) = sku.chars().next() else {
        return Err(ProductError::EmptySku);
    };
    let valid = sku.len() <= SKU_MAX_LEN
        && (first.is_ascii_lowercase() || first.is_ascii_digit())
        && sku
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(ProductError::InvalidSku {
            sku: sku.to_string(),
        })
    }
}

/// A validated in-app product. Only constructible through
/// [`ProductDraft::validate`], so every instance has a listing for its
/// default language and a non-negative price.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductDefinition {
    sku: String,
    status: ProductStatus,
    purchase_type: PurchaseType,
    price: Price,
    listings: BTreeMap<String, Listing>,
    default_language: String,
}

impl ProductDefinition {
    pub fn sku(&self) -> &str {
        &self.sku
    }

    pub fn status(&self) -> ProductStatus {
        self.status
    }

    pub fn purchase_type(&self) -> &PurchaseType {
        &self.purchase_type
    }

    pub fn price(&self) -> &Price {
        &self.price
    }

    pub fn listings(&self) -> &BTreeMap<String, Listing> {
        &self.listings
    }

    pub fn default_language(&self) -> &str {
        &self.default_language
    }

    pub fn title(&self) -> &str {
        self.listings
            .get(&self.default_language)
            .map(|l| l.title.as_str())
            .unwrap_or_default()
    }

    /// Full insert body.
    pub fn to_remote(&self, package_name: &str) -> RemoteProduct {
        RemoteProduct {
            package_name: Some(package_name.to_string()),
            sku: self.sku.clone(),
            status: Some(self.status.as_str().to_string()),
            purchase_type: Some(self.purchase_type.as_str().to_string()),
            default_price: Some(self.price.to_remote()),
            listings: self.listings.clone(),
            default_language: Some(self.default_language.clone()),
        }
    }
}

/// The mutable subset of a product sent on update. `sku`, purchase type and
/// default language are fixed once the product exists remotely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductPatch {
    pub status: ProductStatus,
    pub price: Price,
    pub listings: BTreeMap<String, Listing>,
}

impl From<&ProductDefinition> for ProductPatch {
    fn from(product: &ProductDefinition) -> Self {
        Self {
            status: product.status,
            price: product.price.clone(),
            listings: product.listings.clone(),
        }
    }
}

impl ProductPatch {
    pub fn to_remote(&self, package_name: &str, sku: &str) -> RemoteProduct {
        RemoteProduct {
            package_name: Some(package_name.to_string()),
            sku: sku.to_string(),
            status: Some(self.status.as_str().to_string()),
            purchase_type: None,
            default_price: Some(self.price.to_remote()),
            listings: self.listings.clone(),
            default_language: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemotePrice {
    pub price_micros: String,
    pub currency: String,
}

/// `InAppProduct` resource as exchanged with the store API.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteProduct {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_name: Option<String>,
    pub sku: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purchase_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_price: Option<RemotePrice>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub listings: BTreeMap<String, Listing>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_language: Option<String>,
}

impl RemoteProduct {
    pub fn price_micros(&self) -> Option<u64> {
        self.default_price
            .as_ref()
            .and_then(|p| p.price_micros.trim().parse().ok())
    }

    /// Title in the product's default language, else in `en-US`, else any.
    pub fn title(&self) -> Option<&str> {
        self.default_language
            .as_deref()
            .and_then(|lang| self.listings.get(lang))
            .or_else(|| self.listings.get(DEFAULT_LANGUAGE))
            .or_else(|| self.listings.values().next())
            .map(|l| l.title.as_str())
    }
}

#[cfg(test)]
pub(crate) fn sample_product(sku: &str, micros: i64, title: &str) -> ProductDefinition {
    let mut listings = BTreeMap::new();
    listings.insert(
        DEFAULT_LANGUAGE.to_string(),
        Listing {
            title: title.to_string(),
            description: format!("{title} for your account"),
        },
    );
    ProductDraft {
        sku: sku.to_string(),
        status: ProductStatus::Active,
        purchase_type: PurchaseType::ManagedUser,
        price_micros: micros,
        currency: DEFAULT_CURRENCY.to_string(),
        listings,
        default_language: DEFAULT_LANGUAGE.to_string(),
    }
    .validate()
    .expect("sample product is valid")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn draft(sku: &str) -> ProductDraft {
        let mut listings = BTreeMap::new();
        listings.insert(
            "en-US".to_string(),
            Listing {
                title: "250 Coins".into(),
                description: "Get 250 coins".into(),
            },
        );
        ProductDraft {
            sku: sku.to_string(),
            status: ProductStatus::Active,
            purchase_type: PurchaseType::Consumable,
            price_micros: 5_000_000,
            currency: "usd".into(),
            listings,
            default_language: "en-US".into(),
        }
    }

    #[test]
    fn default_language_must_have_listing() {
        let mut d = draft("coins_250");
        d.default_language = "de-DE".into();
        assert_eq!(
            d.validate().unwrap_err(),
            ProductError::MissingDefaultListing {
                sku: "coins_250".into(),
                language: "de-DE".into()
            }
        );
    }

    #[test]
    fn rejects_negative_price_and_bad_currency() {
        let mut d = draft("coins_250");
        d.price_micros = -1;
        assert!(matches!(
            d.validate(),
            Err(ProductError::NegativePrice { micros: -1, .. })
        ));

        let mut d = draft("coins_250");
        d.currency = "DOLLARS".into();
        assert!(matches!(
            d.validate(),
            Err(ProductError::InvalidCurrency { .. })
        ));
    }

    #[test]
    fn sku_rules() {
        assert_eq!(draft("").validate().unwrap_err(), ProductError::EmptySku);
        for bad in ["Coins", "_coins", "coins-250", "coins 250"] {
            assert!(
                matches!(draft(bad).validate(), Err(ProductError::InvalidSku { .. })),
                "{bad} should be rejected"
            );
        }
        assert!(draft("br.coins_250").validate().is_ok());
        assert!(draft(&"a".repeat(140)).validate().is_err());
    }

    #[test]
    fn empty_listings_and_titles_rejected() {
        let mut d = draft("coins_250");
        d.listings.clear();
        assert!(matches!(d.validate(), Err(ProductError::NoListings { .. })));

        let mut d = draft("coins_250");
        d.listings.get_mut("en-US").unwrap().title = "  ".into();
        assert!(matches!(d.validate(), Err(ProductError::EmptyTitle { .. })));
    }

    #[test]
    fn insert_body_matches_api_shape() {
        let product = draft("coins_250").validate().unwrap();
        let body = serde_json::to_value(product.to_remote("com.example.app")).unwrap();
        assert_eq!(
            body,
            json!({
                "packageName": "com.example.app",
                "sku": "coins_250",
                "status": "active",
                "purchaseType": "consumable",
                "defaultPrice": { "priceMicros": "5000000", "currency": "USD" },
                "listings": { "en-US": { "title": "250 Coins", "description": "Get 250 coins" } },
                "defaultLanguage": "en-US"
            })
        );
    }

    #[test]
    fn patch_body_omits_immutable_fields() {
        let product = draft("coins_250").validate().unwrap();
        let body =
            serde_json::to_value(ProductPatch::from(&product).to_remote("com.example.app", "coins_250"))
                .unwrap();
        assert!(body.get("purchaseType").is_none());
        assert!(body.get("defaultLanguage").is_none());
        assert_eq!(body["defaultPrice"]["priceMicros"], "5000000");
    }

    #[test]
    fn purchase_type_passes_unknown_values_through() {
        let parsed: PurchaseType = serde_json::from_value(json!("managedUser")).unwrap();
        assert_eq!(parsed, PurchaseType::ManagedUser);
        let other: PurchaseType = serde_json::from_value(json!("oneTime")).unwrap();
        assert_eq!(other, PurchaseType::Other("oneTime".into()));
        assert_eq!(serde_json::to_value(&other).unwrap(), json!("oneTime"));
    }

    #[test]
    fn remote_product_tolerates_unknown_fields() {
        let remote: RemoteProduct = serde_json::from_value(json!({
            "packageName": "com.example.app",
            "sku": "coins_250",
            "status": "active",
            "defaultPrice": { "priceMicros": "6000000", "currency": "USD" },
            "listings": { "en-US": { "title": "250 Coins", "benefits": [] } },
            "prices": { "DE": { "priceMicros": "5990000", "currency": "EUR" } }
        }))
        .unwrap();
        assert_eq!(remote.price_micros(), Some(6_000_000));
        assert_eq!(remote.title(), Some("250 Coins"));
    }

    #[test]
    fn price_display() {
        let price = Price::new("x", 5_990_000, "usd").unwrap();
        assert_eq!(price.to_string(), "5.99 USD");
        assert_eq!(format_micros(990_000), "0.99");
        assert_eq!("Inactive".parse::<ProductStatus>().unwrap(), ProductStatus::Inactive);
    }
}
