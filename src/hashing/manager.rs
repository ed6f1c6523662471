//! Hash Manager
//!
//! SHA-256 content hashing over canonical JSON, streamed file hashing,
//! and hash chains over ordered evidence lists.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::debug;

use crate::error::EvidenceError;
use crate::hashing::canonical::to_canonical_bytes;

/// Previous-hash value for the first link of any chain.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

const FILE_CHUNK_SIZE: usize = 8192;

/// One link of a hash chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainLink {
    pub index: usize,
    pub evidence_hash: String,
    pub previous_hash: String,
    pub link_hash: String,
}

/// Hash chain over an ordered evidence list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashChain {
    pub links: Vec<ChainLink>,
    pub root_hash: String,
}

impl HashChain {
    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HashManager;

impl HashManager {
    pub fn new() -> Self {
        Self
    }

    /// Hash the canonical serialization of `data`.
    pub fn hash<T: Serialize + ?Sized>(&self, data: &T) -> Result<String, EvidenceError> {
        let bytes = to_canonical_bytes(data)?;
        Ok(self.hash_bytes(&bytes))
    }

    pub fn hash_bytes(&self, bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }

    /// Stream a file through SHA-256 without loading it into memory.
    pub fn hash_file(&self, path: &Path) -> Result<String, EvidenceError> {
        let mut file = File::open(path)
            .map_err(|e| EvidenceError::io_context(&format!("Failed to open {:?}", path), e))?;
        let mut hasher = Sha256::new();
        let mut buffer = [0u8; FILE_CHUNK_SIZE];
        let mut total = 0u64;

        loop {
            let read = file
                .read(&mut buffer)
                .map_err(|e| EvidenceError::io_context(&format!("Failed to read {:?}", path), e))?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
            total += read as u64;
        }

        debug!("Hashed {} bytes from {:?}", total, path);
        Ok(hex::encode(hasher.finalize()))
    }

    /// Recompute the hash of `data` and compare with `expected_hash`.
    pub fn verify<T: Serialize + ?Sized>(
        &self,
        data: &T,
        expected_hash: &str,
    ) -> Result<bool, EvidenceError> {
        let actual = self.hash(data)?;
        Ok(actual.eq_ignore_ascii_case(expected_hash.trim()))
    }

    pub fn verify_bytes(&self, bytes: &[u8], expected_hash: &str) -> bool {
        self.hash_bytes(bytes).eq_ignore_ascii_case(expected_hash.trim())
    }

    /// Fold the list left to right; each link covers (evidence hash, previous link hash).
    pub fn build_chain<T: Serialize>(&self, evidence_list: &[T]) -> Result<HashChain, EvidenceError> {
        let mut links = Vec::with_capacity(evidence_list.len());
        let mut previous_hash = GENESIS_HASH.to_string();

        for (index, evidence) in evidence_list.iter().enumerate() {
            let evidence_hash = self.hash(evidence)?;
            let link_hash = self.link_hash(&evidence_hash, &previous_hash);
            links.push(ChainLink {
                index,
                evidence_hash,
                previous_hash: previous_hash.clone(),
                link_hash: link_hash.clone(),
            });
            previous_hash = link_hash;
        }

        debug!("Built hash chain with {} links", links.len());
        Ok(HashChain {
            links,
            root_hash: previous_hash,
        })
    }

    /// Walk the chain from the last link back to genesis, recomputing every link.
    pub fn verify_chain(&self, chain: &HashChain) -> bool {
        let mut expected = chain.root_hash.as_str();

        for (position, link) in chain.links.iter().enumerate().rev() {
            if link.index != position || link.link_hash != expected {
                return false;
            }
            if self.link_hash(&link.evidence_hash, &link.previous_hash) != link.link_hash {
                return false;
            }
            expected = link.previous_hash.as_str();
        }

        expected == GENESIS_HASH
    }

    fn link_hash(&self, evidence_hash: &str, previous_hash: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(evidence_hash.as_bytes());
        hasher.update(previous_hash.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Basic shape check for a hex SHA-256 digest.
pub fn is_valid_hash(hash: &str) -> bool {
    hash.len() == 64 && hash.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_hash_is_deterministic() {
        let manager = HashManager::new();
        let evidence = json!({"record_id": "LAND_001", "risk_score": 87.5});

        let first = manager.hash(&evidence).unwrap();
        let second = manager.hash(&evidence).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
        assert!(is_valid_hash(&first));
    }

    #[test]
    fn test_field_order_does_not_matter() {
        let manager = HashManager::new();
        let a = json!({"record_id": "LAND_001", "risk_score": 87.5});
        let b: serde_json::Value =
            serde_json::from_str(r#"{"risk_score": 87.5, "record_id": "LAND_001"}"#).unwrap();
        assert_eq!(manager.hash(&a).unwrap(), manager.hash(&b).unwrap());
    }

    #[test]
    fn test_verify() {
        let manager = HashManager::new();
        let evidence = json!({"record_id": "LAND_002"});
        let hash = manager.hash(&evidence).unwrap();

        assert!(manager.verify(&evidence, &hash).unwrap());
        assert!(manager.verify(&evidence, &hash.to_uppercase()).unwrap());
        assert!(!manager.verify(&json!({"record_id": "LAND_003"}), &hash).unwrap());
    }

    #[test]
    fn test_hash_file_matches_bytes() {
        let manager = HashManager::new();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        // larger than one chunk
        let content = vec![0xabu8; FILE_CHUNK_SIZE * 3 + 17];
        file.write_all(&content).unwrap();

        let from_file = manager.hash_file(file.path()).unwrap();
        assert_eq!(from_file, manager.hash_bytes(&content));
    }

    #[test]
    fn test_hash_file_missing() {
        let manager = HashManager::new();
        let result = manager.hash_file(Path::new("/nonexistent/deed.pdf"));
        assert!(matches!(result, Err(EvidenceError::Io(_))));
    }

    #[test]
    fn test_build_and_verify_chain() {
        let manager = HashManager::new();
        let items = vec![
            json!({"record_id": "LAND_001"}),
            json!({"record_id": "LAND_002"}),
            json!({"record_id": "LAND_003"}),
        ];

        let chain = manager.build_chain(&items).unwrap();
        assert_eq!(chain.len(), 3);
        assert_eq!(chain.links[0].previous_hash, GENESIS_HASH);
        assert_eq!(chain.links[1].previous_hash, chain.links[0].link_hash);
        assert_eq!(chain.root_hash, chain.links[2].link_hash);
        assert!(manager.verify_chain(&chain));
    }

    #[test]
    fn test_tampered_chain_fails() {
        let manager = HashManager::new();
        let items = vec![json!({"a": 1}), json!({"b": 2}), json!({"c": 3})];
        let mut chain = manager.build_chain(&items).unwrap();

        chain.links[1].evidence_hash = manager.hash(&json!({"b": 3})).unwrap();
        assert!(!manager.verify_chain(&chain));
    }

    #[test]
    fn test_empty_chain_roots_at_genesis() {
        let manager = HashManager::new();
        let chain = manager.build_chain::<serde_json::Value>(&[]).unwrap();
        assert!(chain.is_empty());
        assert_eq!(chain.root_hash, GENESIS_HASH);
        assert!(manager.verify_chain(&chain));
    }
}
