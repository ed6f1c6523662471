#![allow(dead_code)]

use chrono::Utc;
use evidence_vault::crypto::keys::{generate_private_key, MIN_KEY_BITS};
use evidence_vault::crypto::KeyPair;
use evidence_vault::storage::ObjectStore;
use evidence_vault::{EvidenceVault, VaultConfig};
use rsa::RsaPublicKey;
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tempfile::TempDir;

/// One small signing key per test binary
pub fn shared_key_pair() -> KeyPair {
    static KEY: OnceLock<KeyPair> = OnceLock::new();
    KEY.get_or_init(|| {
        let private_key = generate_private_key(MIN_KEY_BITS).expect("Failed to generate test key");
        KeyPair {
            key_id: "integration_test".to_string(),
            public_key: RsaPublicKey::from(&private_key),
            private_key,
            created_at: Utc::now(),
        }
    })
    .clone()
}

pub fn test_config(dir: &Path) -> VaultConfig {
    VaultConfig {
        storage_dir: dir.to_path_buf(),
        key_size: MIN_KEY_BITS,
        upload_timeout_secs: 2,
        ..VaultConfig::default()
    }
}

/// A vault in a fresh temporary directory
pub fn setup_test_vault(remote_store: Option<Arc<dyn ObjectStore>>) -> (TempDir, EvidenceVault) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let vault = EvidenceVault::with_key_pair(test_config(dir.path()), shared_key_pair(), remote_store)
        .expect("Failed to open vault");
    (dir, vault)
}

pub fn fraud_analysis() -> Value {
    json!({
        "is_fraudulent": true,
        "risk_score": 87.5,
        "issues": ["Duplicate title deed", "Signature mismatch"],
    })
}

pub fn sample_batch() -> Vec<Value> {
    vec![
        json!({"record_id": "LAND_001", "fraud_score": 85, "status": "fraud"}),
        json!({"record_id": "LAND_002", "fraud_score": 12, "status": "normal"}),
        json!({"record_id": "LAND_003", "fraud_score": 67, "status": "suspicious"}),
        json!({"record_id": "LAND_004", "fraud_score": 5, "status": "normal"}),
        json!({"record_id": "LAND_005", "fraud_score": 92, "status": "fraud"}),
    ]
}

/// Rewrite one field of the audit line at `sequence` (1-based)
pub fn corrupt_audit_line(log_path: &Path, sequence: usize, field: &str, value: Value) {
    let contents = fs::read_to_string(log_path).expect("Failed to read audit log");
    let mut lines: Vec<String> = contents.lines().map(str::to_string).collect();
    let mut entry: Value = serde_json::from_str(&lines[sequence - 1]).expect("Invalid audit line");
    entry[field] = value;
    lines[sequence - 1] = serde_json::to_string(&entry).expect("Failed to serialize audit line");
    fs::write(log_path, lines.join("\n") + "\n").expect("Failed to write audit log");
}
