//! On-disk store keyed by the SHA-256 of the stored bytes.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::EvidenceError;
use crate::hashing::{is_valid_hash, HashManager};
use crate::storage::{ContentReference, ObjectStore};

pub const LOCAL_STORE: &str = "local";

#[derive(Debug, Clone)]
pub struct LocalStore {
    dir: PathBuf,
}

impl LocalStore {
    pub fn new(dir: &Path) -> Result<Self, EvidenceError> {
        std::fs::create_dir_all(dir)
            .map_err(|e| EvidenceError::io_context("Failed to create local store directory", e))?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<dir>/<sha256>.json`
    pub fn path_for(&self, hash: &str) -> PathBuf {
        self.dir.join(format!("{}.json", hash))
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    fn name(&self) -> &str {
        LOCAL_STORE
    }

    async fn upload(&self, bytes: &[u8], name: &str) -> Result<ContentReference, EvidenceError> {
        let hasher = HashManager::new();
        let hash = hasher.hash_bytes(bytes);
        let path = self.path_for(&hash);

        let intact = match tokio::fs::read(&path).await {
            Ok(existing) => {
                let intact = hasher.verify_bytes(&existing, &hash);
                if !intact {
                    warn!("Replacing corrupted local copy {:?}", path);
                }
                intact
            }
            Err(_) => false,
        };
        if !intact {
            let tmp_path = path.with_extension("json.tmp");
            tokio::fs::write(&tmp_path, bytes)
                .await
                .map_err(|e| EvidenceError::io_context(&format!("Failed to write {:?}", tmp_path), e))?;
            tokio::fs::rename(&tmp_path, &path)
                .await
                .map_err(|e| EvidenceError::io_context(&format!("Failed to persist {:?}", path), e))?;
        }
        debug!("Stored {} ({} bytes) at {:?}", name, bytes.len(), path);

        Ok(ContentReference {
            store: LOCAL_STORE.to_string(),
            id: hash,
            url: Some(path.display().to_string()),
        })
    }

    async fn download(&self, reference: &ContentReference) -> Result<Vec<u8>, EvidenceError> {
        if reference.store != LOCAL_STORE || !is_valid_hash(&reference.id) {
            return Err(EvidenceError::Storage(format!(
                "Not a local content reference: {}",
                reference
            )));
        }

        let path = self.path_for(&reference.id.to_ascii_lowercase());
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(EvidenceError::EvidenceNotFound(reference.to_string()))
            }
            Err(e) => return Err(EvidenceError::io_context(&format!("Failed to read {:?}", path), e)),
        };

        if !HashManager::new().verify_bytes(&bytes, &reference.id) {
            return Err(EvidenceError::Storage(format!(
                "Content of {:?} does not match its address",
                path
            )));
        }
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_upload_and_download() {
        let dir = tempdir().unwrap();
        let store = LocalStore::new(dir.path()).unwrap();

        let bytes = br#"{"record_id":"LAND_001"}"#;
        let reference = store.upload(bytes, "LAND_001.json").await.unwrap();
        assert_eq!(reference.store, "local");
        assert_eq!(reference.id, HashManager::new().hash_bytes(bytes));
        assert!(store.path_for(&reference.id).exists());

        assert_eq!(store.download(&reference).await.unwrap(), bytes.to_vec());
    }

    #[tokio::test]
    async fn test_detects_modified_content() {
        let dir = tempdir().unwrap();
        let store = LocalStore::new(dir.path()).unwrap();
        let reference = store.upload(b"original", "a").await.unwrap();

        std::fs::write(store.path_for(&reference.id), b"modified").unwrap();
        assert!(matches!(
            store.download(&reference).await,
            Err(EvidenceError::Storage(_))
        ));
    }

    #[tokio::test]
    async fn test_reupload_repairs_corrupted_copy() {
        let dir = tempdir().unwrap();
        let store = LocalStore::new(dir.path()).unwrap();
        let reference = store.upload(b"original", "a").await.unwrap();

        std::fs::write(store.path_for(&reference.id), b"modified").unwrap();
        let again = store.upload(b"original", "a").await.unwrap();
        assert_eq!(again, reference);
        assert_eq!(store.download(&again).await.unwrap(), b"original".to_vec());
    }

    #[tokio::test]
    async fn test_missing_object() {
        let dir = tempdir().unwrap();
        let store = LocalStore::new(dir.path()).unwrap();
        let reference = ContentReference {
            store: LOCAL_STORE.to_string(),
            id: "a".repeat(64),
            url: None,
        };
        assert!(matches!(
            store.download(&reference).await,
            Err(EvidenceError::EvidenceNotFound(_))
        ));

        let foreign = ContentReference {
            store: "ipfs".to_string(),
            id: "QmTest".to_string(),
            url: None,
        };
        assert!(store.download(&foreign).await.is_err());
    }
}
