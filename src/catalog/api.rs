use serde::Deserialize;
use thiserror::Error;

use super::product::{ProductDefinition, ProductPatch, RemoteProduct};

/// Fields a batch upsert overwrites on products that already exist.
pub const UPSERT_UPDATE_MASK: &str = "status,defaultPrice,listings";

/// Error returned by a [`CatalogApi`] call.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// Non-2xx response, with the structured fields of the Google error
    /// envelope when the body carried one.
    #[error("HTTP {status}{}: {message}", kind_suffix(.kind))]
    Status {
        status: u16,
        kind: Option<String>,
        reason: Option<String>,
        message: String,
    },
    #[error("could not decode response: {0}")]
    Decode(String),
}

fn kind_suffix(kind: &Option<String>) -> String {
    kind.as_deref().map(|k| format!(" {k}")).unwrap_or_default()
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    status: Option<String>,
    #[serde(default)]
    errors: Vec<ErrorItem>,
}

#[derive(Debug, Deserialize)]
struct ErrorItem {
    reason: Option<String>,
}

impl ApiError {
    /// Build a [`ApiError::Status`] from a failed response.
    ///
    /// Google APIs answer with
    /// `{"error": {"code", "message", "status", "errors": [{"reason"}]}}`;
    /// bodies in any other shape are kept verbatim as the message.
    pub fn from_response(status: u16, body: &str) -> Self {
        match serde_json::from_str::<ErrorEnvelope>(body) {
            Ok(envelope) => ApiError::Status {
                status,
                kind: envelope.error.status,
                reason: envelope.error.errors.into_iter().find_map(|e| e.reason),
                message: envelope.error.message,
            },
            Err(_) => ApiError::Status {
                status,
                kind: None,
                reason: None,
                message: body.trim().to_string(),
            },
        }
    }

    /// True when the remote side refused a create because the SKU is taken.
    ///
    /// Decided on the structured status/reason only. A 409 without a status
    /// is treated as a duplicate; a 409 carrying another status (`ABORTED`)
    /// is not.
    pub fn is_already_exists(&self) -> bool {
        let ApiError::Status {
            status,
            kind,
            reason,
            ..
        } = self
        else {
            return false;
        };
        if matches!(reason.as_deref(), Some("duplicate" | "alreadyExists")) {
            return true;
        }
        match kind.as_deref() {
            Some(kind) => kind == "ALREADY_EXISTS",
            None => *status == 409,
        }
    }
}

/// One element of a batch upsert.
#[derive(Debug, Clone, Copy)]
pub struct BatchUpdateEntry<'a> {
    pub product: &'a ProductDefinition,
    pub update_mask: &'a str,
    /// Create the product when the SKU is absent.
    pub allow_missing: bool,
}

impl<'a> BatchUpdateEntry<'a> {
    pub fn upsert(product: &'a ProductDefinition) -> Self {
        Self {
            product,
            update_mask: UPSERT_UPDATE_MASK,
            allow_missing: true,
        }
    }
}

/// The in-app product endpoints of the store publishing API, scoped per
/// package.
#[async_trait::async_trait]
pub trait CatalogApi: Send + Sync {
    async fn insert(
        &self,
        package_name: &str,
        product: &ProductDefinition,
    ) -> Result<RemoteProduct, ApiError>;

    async fn update(
        &self,
        package_name: &str,
        sku: &str,
        patch: &ProductPatch,
    ) -> Result<RemoteProduct, ApiError>;

    async fn batch_update(
        &self,
        package_name: &str,
        entries: &[BatchUpdateEntry<'_>],
    ) -> Result<Vec<RemoteProduct>, ApiError>;

    async fn list(&self, package_name: &str) -> Result<Vec<RemoteProduct>, ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_google_error_envelope() {
        let body = r#"{"error":{"code":409,"message":"Product id coins_250 already exists.","status":"ALREADY_EXISTS","errors":[{"message":"dup","domain":"androidpublisher","reason":"duplicate"}]}}"#;
        let err = ApiError::from_response(409, body);
        assert!(err.is_already_exists());
        assert_eq!(
            err.to_string(),
            "HTTP 409 ALREADY_EXISTS: Product id coins_250 already exists."
        );
    }

    #[test]
    fn duplicate_detection_does_not_read_the_message() {
        let err = ApiError::from_response(
            400,
            r#"{"error":{"code":400,"message":"sku already exists somewhere","status":"INVALID_ARGUMENT"}}"#,
        );
        assert!(!err.is_already_exists());

        let aborted = ApiError::from_response(
            409,
            r#"{"error":{"code":409,"message":"edit conflict","status":"ABORTED"}}"#,
        );
        assert!(!aborted.is_already_exists());
    }

    #[test]
    fn reason_alone_marks_duplicate() {
        let err = ApiError::from_response(
            400,
            r#"{"error":{"code":400,"message":"x","errors":[{"reason":"alreadyExists"}]}}"#,
        );
        assert!(err.is_already_exists());
    }

    #[test]
    fn plain_body_kept_as_message() {
        let err = ApiError::from_response(502, "<html>bad gateway</html>\n");
        assert_eq!(err.to_string(), "HTTP 502: <html>bad gateway</html>");
        assert!(!err.is_already_exists());

        let bare_conflict = ApiError::from_response(409, "conflict");
        assert!(bare_conflict.is_already_exists());
    }
}
