pub mod api;
pub mod client;
pub mod document;
pub mod memory;
pub mod product;
pub mod sync;

pub use api::{ApiError, CatalogApi};
pub use client::PlayCatalogClient;
pub use document::CatalogDocument;
pub use memory::InMemoryCatalog;
pub use product::{ProductDefinition, RemoteProduct};
pub use sync::{CatalogSynchronizer, SyncOutcome, SyncReport};
