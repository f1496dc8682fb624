use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::api::{ApiError, BatchUpdateEntry, CatalogApi};
use super::product::{ProductDefinition, ProductPatch, RemoteProduct};
use crate::util::text::truncate_for_log;

pub const DEFAULT_BASE_URL: &str = "https://androidpublisher.googleapis.com/androidpublisher/v3";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Google Play Developer API client for the `inappproducts` resource.
///
/// Endpoints (relative to the v3 base):
/// - POST `applications/{pkg}/inappproducts` - create
/// - PUT `applications/{pkg}/inappproducts/{sku}` - update
/// - POST `applications/{pkg}/inappproducts:batchUpdate` - bulk upsert
/// - GET `applications/{pkg}/inappproducts` - list (paged via `token`)
#[derive(Debug, Clone)]
pub struct PlayCatalogClient {
    base_url: String,
    http: Client,
    access_token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchUpdateRequest<'a> {
    inappproduct: RemoteProduct,
    package_name: &'a str,
    sku: &'a str,
    update_mask: &'a str,
    allow_missing: bool,
}

#[derive(Debug, Serialize)]
struct BatchUpdateBody<'a> {
    requests: Vec<BatchUpdateRequest<'a>>,
}

#[derive(Debug, Default, Deserialize)]
struct BatchUpdateResponse {
    #[serde(default)]
    inappproducts: Vec<RemoteProduct>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenPagination {
    next_page_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    inappproduct: Vec<RemoteProduct>,
    token_pagination: Option<TokenPagination>,
}

impl PlayCatalogClient {
    pub fn new(
        base_url: Option<&str>,
        timeout_secs: Option<u64>,
        access_token: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let base_url = base_url
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string();
        let http = Client::builder()
            .user_agent(concat!("iap-catalog/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(
                timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
            ))
            .build()?;
        Ok(Self {
            base_url,
            http,
            access_token: access_token.into(),
        })
    }

    fn products_url(&self, package_name: &str) -> String {
        format!(
            "{}/applications/{}/inappproducts",
            self.base_url,
            urlencoding::encode(package_name)
        )
    }

    fn product_url(&self, package_name: &str, sku: &str) -> String {
        format!(
            "{}/{}",
            self.products_url(package_name),
            urlencoding::encode(sku)
        )
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, ApiError> {
        let resp = req
            .bearer_auth(&self.access_token)
            .header("Accept", "application/json")
            .send()
            .await?;
        let status = resp.status();
        let url = resp.url().to_string();
        let body = resp.text().await?;
        if !status.is_success() {
            debug!(
                status = status.as_u16(),
                url = %url,
                body = %truncate_for_log(body.clone(), 2000),
                "play catalog: request failed"
            );
            return Err(ApiError::from_response(status.as_u16(), &body));
        }
        // Empty 2xx bodies decode as `{}` so list/batch see empty collections.
        let body = if body.trim().is_empty() { "{}" } else { body.as_str() };
        serde_json::from_str(body).map_err(|e| {
            ApiError::Decode(format!(
                "{e}; url={url} body={}",
                truncate_for_log(body.to_string(), 500)
            ))
        })
    }
}

#[async_trait::async_trait]
impl CatalogApi for PlayCatalogClient {
    async fn insert(
        &self,
        package_name: &str,
        product: &ProductDefinition,
    ) -> Result<RemoteProduct, ApiError> {
        let req = self
            .http
            .post(self.products_url(package_name))
            .json(&product.to_remote(package_name));
        self.send(req).await
    }

    async fn update(
        &self,
        package_name: &str,
        sku: &str,
        patch: &ProductPatch,
    ) -> Result<RemoteProduct, ApiError> {
        let req = self
            .http
            .put(self.product_url(package_name, sku))
            .json(&patch.to_remote(package_name, sku));
        self.send(req).await
    }

    async fn batch_update(
        &self,
        package_name: &str,
        entries: &[BatchUpdateEntry<'_>],
    ) -> Result<Vec<RemoteProduct>, ApiError> {
        let body = BatchUpdateBody {
            requests: entries
                .iter()
                .map(|entry| BatchUpdateRequest {
                    inappproduct: entry.product.to_remote(package_name),
                    package_name,
                    sku: entry.product.sku(),
                    update_mask: entry.update_mask,
                    allow_missing: entry.allow_missing,
                })
                .collect(),
        };
        let url = format!("{}:batchUpdate", self.products_url(package_name));
        let resp: BatchUpdateResponse = self.send(self.http.post(url).json(&body)).await?;
        Ok(resp.inappproducts)
    }

    async fn list(&self, package_name: &str) -> Result<Vec<RemoteProduct>, ApiError> {
        let url = self.products_url(package_name);
        let mut out = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut req = self.http.get(&url);
            if let Some(token) = page_token.as_deref() {
                req = req.query(&[("token", token)]);
            }
            let page: ListResponse = self.send(req).await?;
            debug!(
                package = package_name,
                items = page.inappproduct.len(),
                "play catalog: list page"
            );
            out.extend(page.inappproduct);
            let next = page
                .token_pagination
                .and_then(|p| p.next_page_token)
                .filter(|t| !t.is_empty());
            match next {
                // A server echoing the same token would otherwise loop forever.
                Some(token) if page_token.as_deref() != Some(token.as_str()) => {
                    page_token = Some(token)
                }
                _ => break,
            }
        }
        Ok(out)
    }
}
