//! Evidence Batches
//!
//! Persists Merkle batches as three JSON files per batch:
//! `<id>_metadata.json`, `<id>_evidence.json` and `<id>_proofs.json`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{ensure_safe_id, EvidenceError};
use crate::merkle::tree::{InclusionProof, MerkleTree, TreeInfo};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchInfo {
    pub batch_id: String,
    pub root_hash: String,
    pub item_count: usize,
    pub created_at: DateTime<Utc>,
    pub tree_info: TreeInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredProof {
    pub index: usize,
    pub proof: InclusionProof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchProofStatus {
    Verified,
    Invalid,
    NotInBatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchVerification {
    pub is_valid: bool,
    pub batch_id: String,
    pub record_id: String,
    pub root_hash: String,
    pub proof_steps: usize,
    pub verified_at: DateTime<Utc>,
    pub status: BatchProofStatus,
}

/// Creates and checks Merkle batches stored under one directory
#[derive(Debug, Clone)]
pub struct EvidenceBatchManager {
    batches_dir: PathBuf,
}

impl EvidenceBatchManager {
    pub fn new(batches_dir: &Path) -> Result<Self, EvidenceError> {
        fs::create_dir_all(batches_dir)
            .map_err(|e| EvidenceError::io_context("Failed to create batches directory", e))?;
        Ok(Self {
            batches_dir: batches_dir.to_path_buf(),
        })
    }

    fn path(&self, batch_id: &str, suffix: &str) -> PathBuf {
        self.batches_dir.join(format!("{}_{}.json", batch_id, suffix))
    }

    pub fn exists(&self, batch_id: &str) -> bool {
        self.path(batch_id, "metadata").exists()
    }

    /// Commit `items` to a new batch.
    ///
    /// Without an explicit id the batch is named `BATCH_<YYYYmmdd_HHMMSS>`,
    /// suffixed with a counter if that name is taken. An explicit id that is
    /// already in use is refused.
    pub fn create_batch<T: Serialize>(
        &self,
        items: &[T],
        batch_id: Option<&str>,
    ) -> Result<BatchInfo, EvidenceError> {
        let batch_id = match batch_id {
            Some(id) => {
                ensure_safe_id("batch", id)?;
                if self.exists(id) {
                    return Err(EvidenceError::BatchExists(id.to_string()));
                }
                id.to_string()
            }
            None => self.next_batch_id(),
        };

        let items = items
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        let tree = MerkleTree::build(&items)?;

        let mut proofs = BTreeMap::new();
        for (index, item) in items.iter().enumerate() {
            let key = match item.get("record_id").and_then(Value::as_str) {
                Some(record_id) if !proofs.contains_key(record_id) => record_id.to_string(),
                Some(record_id) => {
                    warn!("Duplicate record {} in batch {}, keyed by position", record_id, batch_id);
                    format!("item_{}", index)
                }
                None => format!("item_{}", index),
            };
            proofs.insert(
                key,
                StoredProof {
                    index,
                    proof: tree.get_proof(index)?,
                },
            );
        }

        let info = BatchInfo {
            batch_id: batch_id.clone(),
            root_hash: tree.root().to_string(),
            item_count: items.len(),
            created_at: Utc::now(),
            tree_info: tree.tree_info(),
        };

        // metadata last: its presence marks the batch complete
        self.write_json(&self.path(&batch_id, "evidence"), &items)?;
        self.write_json(&self.path(&batch_id, "proofs"), &proofs)?;
        self.write_json(&self.path(&batch_id, "metadata"), &info)?;

        info!(
            "Batch {} created: {} items, root {}",
            batch_id, info.item_count, info.root_hash
        );
        Ok(info)
    }

    /// Check that `evidence` is the item committed for `record_id` in the batch
    pub fn verify_evidence_in_batch<T: Serialize + ?Sized>(
        &self,
        batch_id: &str,
        record_id: &str,
        evidence: &T,
    ) -> Result<BatchVerification, EvidenceError> {
        let info = self.get_batch_summary(batch_id)?;
        let proofs: BTreeMap<String, StoredProof> = self.read_json(&self.path(batch_id, "proofs"))?;

        let (is_valid, proof_steps, status) = match proofs.get(record_id) {
            Some(stored) => {
                let valid = MerkleTree::verify_proof(evidence, &stored.proof, &info.root_hash);
                let status = if valid {
                    BatchProofStatus::Verified
                } else {
                    BatchProofStatus::Invalid
                };
                (valid, stored.proof.len(), status)
            }
            None => (false, 0, BatchProofStatus::NotInBatch),
        };

        if !is_valid {
            warn!("Record {} failed verification in batch {}: {:?}", record_id, batch_id, status);
        }

        Ok(BatchVerification {
            is_valid,
            batch_id: batch_id.to_string(),
            record_id: record_id.to_string(),
            root_hash: info.root_hash,
            proof_steps,
            verified_at: Utc::now(),
            status,
        })
    }

    pub fn get_batch_summary(&self, batch_id: &str) -> Result<BatchInfo, EvidenceError> {
        ensure_safe_id("batch", batch_id)?;
        if !self.exists(batch_id) {
            return Err(EvidenceError::BatchNotFound(batch_id.to_string()));
        }
        self.read_json(&self.path(batch_id, "metadata"))
    }

    /// Items exactly as committed
    pub fn get_batch_items(&self, batch_id: &str) -> Result<Vec<Value>, EvidenceError> {
        self.get_batch_summary(batch_id)?;
        self.read_json(&self.path(batch_id, "evidence"))
    }

    /// Ids of all complete batches, sorted
    pub fn list_batches(&self) -> Result<Vec<String>, EvidenceError> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.batches_dir)? {
            let name = entry?.file_name();
            if let Some(id) = name.to_str().and_then(|n| n.strip_suffix("_metadata.json")) {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn next_batch_id(&self) -> String {
        let base = format!("BATCH_{}", Utc::now().format("%Y%m%d_%H%M%S"));
        let mut candidate = base.clone();
        let mut counter = 2;
        while self.exists(&candidate) {
            candidate = format!("{}_{}", base, counter);
            counter += 1;
        }
        candidate
    }

    fn write_json<T: Serialize + ?Sized>(&self, path: &Path, value: &T) -> Result<(), EvidenceError> {
        fs::write(path, serde_json::to_string_pretty(value)?)
            .map_err(|e| EvidenceError::io_context(&format!("Failed to write {:?}", path), e))
    }

    fn read_json<T: serde::de::DeserializeOwned>(&self, path: &Path) -> Result<T, EvidenceError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EvidenceError::io_context(&format!("Failed to read {:?}", path), e))?;
        Ok(serde_json::from_str(&contents)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn evidence_batch() -> Vec<Value> {
        vec![
            json!({"record_id": "LAND_001", "fraud_score": 85, "status": "fraud"}),
            json!({"record_id": "LAND_002", "fraud_score": 12, "status": "normal"}),
            json!({"record_id": "LAND_003", "fraud_score": 67, "status": "suspicious"}),
            json!({"record_id": "LAND_004", "fraud_score": 5, "status": "normal"}),
            json!({"record_id": "LAND_005", "fraud_score": 92, "status": "fraud"}),
        ]
    }

    #[test]
    fn test_create_and_verify_batch() {
        let dir = tempdir().unwrap();
        let manager = EvidenceBatchManager::new(dir.path()).unwrap();
        let items = evidence_batch();

        let info = manager.create_batch(&items, Some("DEMO_BATCH_001")).unwrap();
        assert_eq!(info.item_count, 5);
        assert_eq!(info.root_hash, MerkleTree::build(&items).unwrap().root());
        for suffix in ["metadata", "evidence", "proofs"] {
            assert!(dir.path().join(format!("DEMO_BATCH_001_{}.json", suffix)).exists());
        }

        let result = manager
            .verify_evidence_in_batch("DEMO_BATCH_001", "LAND_003", &items[2])
            .unwrap();
        assert!(result.is_valid);
        assert_eq!(result.status, BatchProofStatus::Verified);
        assert_eq!(result.proof_steps, 3);
    }

    #[test]
    fn test_tampered_evidence_in_batch() {
        let dir = tempdir().unwrap();
        let manager = EvidenceBatchManager::new(dir.path()).unwrap();
        let items = evidence_batch();
        manager.create_batch(&items, Some("B1")).unwrap();

        let mut tampered = items[2].clone();
        tampered["fraud_score"] = json!(99);
        let result = manager.verify_evidence_in_batch("B1", "LAND_003", &tampered).unwrap();
        assert!(!result.is_valid);
        assert_eq!(result.status, BatchProofStatus::Invalid);

        let missing = manager.verify_evidence_in_batch("B1", "LAND_999", &items[0]).unwrap();
        assert_eq!(missing.status, BatchProofStatus::NotInBatch);
    }

    #[test]
    fn test_items_without_record_id_are_keyed_by_position() {
        let dir = tempdir().unwrap();
        let manager = EvidenceBatchManager::new(dir.path()).unwrap();
        let items = vec![json!({"note": "a"}), json!({"note": "b"})];
        manager.create_batch(&items, Some("ANON")).unwrap();

        let result = manager.verify_evidence_in_batch("ANON", "item_1", &items[1]).unwrap();
        assert!(result.is_valid);
    }

    #[test]
    fn test_generated_ids_do_not_collide() {
        let dir = tempdir().unwrap();
        let manager = EvidenceBatchManager::new(dir.path()).unwrap();
        let first = manager.create_batch(&evidence_batch(), None).unwrap();
        let second = manager.create_batch(&evidence_batch(), None).unwrap();

        assert!(first.batch_id.starts_with("BATCH_"));
        assert_ne!(first.batch_id, second.batch_id);
        assert_eq!(manager.list_batches().unwrap().len(), 2);
    }

    #[test]
    fn test_explicit_id_is_not_overwritten() {
        let dir = tempdir().unwrap();
        let manager = EvidenceBatchManager::new(dir.path()).unwrap();
        manager.create_batch(&evidence_batch(), Some("B1")).unwrap();
        assert!(matches!(
            manager.create_batch(&evidence_batch(), Some("B1")),
            Err(EvidenceError::BatchExists(_))
        ));
    }

    #[test]
    fn test_missing_batch() {
        let dir = tempdir().unwrap();
        let manager = EvidenceBatchManager::new(dir.path()).unwrap();
        assert!(matches!(
            manager.get_batch_summary("NOPE"),
            Err(EvidenceError::BatchNotFound(_))
        ));
        assert!(matches!(
            manager.create_batch::<Value>(&[], Some("EMPTY")),
            Err(EvidenceError::EmptyBatch)
        ));
        assert!(!manager.exists("EMPTY"));
    }
}
