//! Content-Addressed Object Storage
//!
//! The orchestrator uploads evidence through [`ObjectStore`]. Pinata (IPFS)
//! is the remote backend; [`LocalStore`] is the on-disk fallback.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::config::VaultConfig;
use crate::error::EvidenceError;

pub mod local;
pub mod pinata;

pub use local::LocalStore;
pub use pinata::PinataStore;

/// Where an uploaded object can be fetched again
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentReference {
    /// Backend name, e.g. `ipfs` or `local`
    pub store: String,
    /// Content identifier within that backend (IPFS CID, SHA-256 hex)
    pub id: String,
    pub url: Option<String>,
}

impl fmt::Display for ContentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.store, self.id)
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn name(&self) -> &str;

    async fn upload(&self, bytes: &[u8], name: &str) -> Result<ContentReference, EvidenceError>;

    async fn download(&self, reference: &ContentReference) -> Result<Vec<u8>, EvidenceError>;
}

/// The remote store described by the configuration, if any
pub fn remote_store_from_config(
    config: &VaultConfig,
) -> Result<Option<Arc<dyn ObjectStore>>, EvidenceError> {
    Ok(PinataStore::from_config(&config.ipfs, config.upload_timeout())?
        .map(|store| Arc::new(store) as Arc<dyn ObjectStore>))
}
