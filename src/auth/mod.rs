//! Credentials for the Android Publisher API: cached user tokens, the OAuth
//! flows that mint them, and service-account assertions.
pub mod credential;
pub mod oauth;
pub mod provider;
pub mod service_account;
pub mod store;

pub use credential::{Credential, ANDROID_PUBLISHER_SCOPE};
pub use oauth::{AuthError, ClientSecrets, OAuthClient};
pub use provider::{AuthMode, CredentialProvider};
pub use store::{CredentialStore, FileCredentialStore, TOKEN_FILE_DEFAULT};
