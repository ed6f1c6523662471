//! Evidence Vault
//!
//! Composes hashing, object storage, signing and the audit trail into one
//! evidence package per fraud case. Only the remote upload may fail without
//! aborting the operation; it degrades to the local store instead.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::audit::{AuditEventType, AuditStatistics, AuditTrail};
use crate::config::VaultConfig;
use crate::crypto::{KeyPair, KeyStore, SignatureManager};
use crate::error::{ensure_safe_id, EvidenceError};
use crate::evidence::package::{
    CheckOutcome, Evidence, EvidencePackage, EvidenceVerification, StepStatus, StorageOutcome,
    VerificationChecks,
};
use crate::hashing::{to_canonical_bytes, HashManager};
use crate::merkle::{BatchInfo, EvidenceBatchManager};
use crate::storage::{ContentReference, LocalStore, ObjectStore};

const PACKAGE_SUFFIX: &str = "_complete.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaultStatistics {
    pub audit_trail: AuditStatistics,
    pub storage_dir: PathBuf,
    pub key_id: String,
    pub key_fingerprint: String,
    pub remote_store: Option<String>,
    pub stored_packages: usize,
    pub batches: usize,
}

pub struct EvidenceVault {
    config: VaultConfig,
    hasher: HashManager,
    audit: AuditTrail,
    signer: SignatureManager,
    batches: EvidenceBatchManager,
    local_store: LocalStore,
    remote_store: Option<Arc<dyn ObjectStore>>,
    in_flight: Mutex<HashSet<String>>,
}

/// Exclusive claim on a record id while its package is being built
struct RecordClaim<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    record_id: String,
}

impl Drop for RecordClaim<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        in_flight.remove(&self.record_id);
    }
}

impl EvidenceVault {
    /// Open the vault, loading the configured signing key or creating it on first use
    pub fn open(
        config: VaultConfig,
        remote_store: Option<Arc<dyn ObjectStore>>,
    ) -> Result<Self, EvidenceError> {
        config.validate()?;
        let keys = KeyStore::new(&config.keys_dir())?;
        let key_pair = keys.load_or_generate(&config.key_id, config.key_size)?;
        Self::with_key_pair(config, key_pair, remote_store)
    }

    /// Open the vault with an already-loaded signing identity
    pub fn with_key_pair(
        config: VaultConfig,
        key_pair: KeyPair,
        remote_store: Option<Arc<dyn ObjectStore>>,
    ) -> Result<Self, EvidenceError> {
        config.validate()?;
        let audit = AuditTrail::open(&config.audit_dir())?;
        let signer = SignatureManager::new(key_pair)?;
        let batches = EvidenceBatchManager::new(&config.batches_dir())?;
        let local_store = LocalStore::new(&config.local_store_dir())?;
        fs::create_dir_all(config.evidence_dir())
            .map_err(|e| EvidenceError::io_context("Failed to create evidence directory", e))?;

        info!(
            "Evidence vault ready at {:?} (key {}, remote store {})",
            config.storage_dir,
            signer.key_id(),
            remote_store.as_ref().map(|s| s.name()).unwrap_or("disabled")
        );

        Ok(Self {
            config,
            hasher: HashManager::new(),
            audit,
            signer,
            batches,
            local_store,
            remote_store,
            in_flight: Mutex::new(HashSet::new()),
        })
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn audit_trail(&self) -> &AuditTrail {
        &self.audit
    }

    pub fn signature_manager(&self) -> &SignatureManager {
        &self.signer
    }

    pub fn batch_manager(&self) -> &EvidenceBatchManager {
        &self.batches
    }

    pub fn package_path(&self, record_id: &str) -> PathBuf {
        self.config
            .evidence_dir()
            .join(format!("{}{}", record_id, PACKAGE_SUFFIX))
    }

    /// Hash, upload, sign and audit one fraud case.
    ///
    /// The upload degrades to the local store on error, timeout or when no
    /// remote store is configured. Every other failure is logged to the trail
    /// and returned; entries already appended stay in place.
    pub async fn store_evidence(
        &self,
        record_id: &str,
        analysis_result: Value,
        ml_predictions: Option<Value>,
        documents: Option<Vec<String>>,
        actor_id: &str,
    ) -> Result<EvidencePackage, EvidenceError> {
        ensure_safe_id("record", record_id)?;
        let _claim = self.claim_record(record_id)?;

        let started = Instant::now();
        info!("Storing evidence for record {}", record_id);
        self.audit
            .log_analysis_started(record_id, "fraud_analysis", Some(actor_id))
            .await?;

        let evidence = Evidence::new(record_id, analysis_result, ml_predictions, documents, actor_id);
        match self.seal(evidence, actor_id, started).await {
            Ok(package) => {
                info!("{}", package.summary());
                Ok(package)
            }
            Err(e) => {
                if let Err(log_err) = self
                    .audit
                    .log_error(record_id, "evidence_storage_failed", &e.to_string(), Some(actor_id))
                    .await
                {
                    warn!("Could not record failure for {}: {}", record_id, log_err);
                }
                Err(e)
            }
        }
    }

    /// Reserve `record_id` for this call; fails if it is stored or being stored
    fn claim_record(&self, record_id: &str) -> Result<RecordClaim<'_>, EvidenceError> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if in_flight.contains(record_id) || self.package_path(record_id).exists() {
            return Err(EvidenceError::EvidenceExists(record_id.to_string()));
        }
        in_flight.insert(record_id.to_string());
        Ok(RecordClaim {
            in_flight: &self.in_flight,
            record_id: record_id.to_string(),
        })
    }

    async fn seal(
        &self,
        evidence: Evidence,
        actor_id: &str,
        started: Instant,
    ) -> Result<EvidencePackage, EvidenceError> {
        let record_id = evidence.record_id.clone();
        let mut steps = StepStatus::default();

        // same digest as HashManager::hash, and the exact bytes that get uploaded
        let bytes = to_canonical_bytes(&evidence)?;
        let evidence_hash = self.hasher.hash_bytes(&bytes);
        steps.hashed = true;
        debug!("Evidence hash for {}: {}", record_id, evidence_hash);

        let storage = self.upload(&record_id, &bytes).await?;
        steps.uploaded = storage.is_remote();
        steps.stored_locally = !storage.is_remote();

        let signed_package =
            self.signer
                .sign(&evidence, &self.config.signer_name, &self.config.signer_role)?;
        steps.signed = true;

        let reference = storage.reference().to_string();
        let stored_entry = self
            .audit
            .log_evidence_stored(
                &record_id,
                &evidence_hash,
                Some(&reference),
                storage.location(),
                Some(actor_id),
            )
            .await?;

        if evidence.is_fraudulent() {
            self.audit
                .log_fraud_detected(&record_id, evidence.risk_score(), &evidence_hash, Some(actor_id))
                .await?;
        }
        self.audit
            .log_analysis_completed(
                &record_id,
                &evidence.analysis_result,
                started.elapsed().as_secs_f64(),
                Some(actor_id),
            )
            .await?;
        steps.audit_logged = true;

        let package = EvidencePackage {
            record_id,
            evidence,
            evidence_hash,
            storage,
            signed_package,
            audit_sequence: stored_entry.sequence,
            steps,
            stored_at: chrono::Utc::now(),
            duration_ms: started.elapsed().as_millis() as u64,
        };
        self.write_package(&package)?;
        Ok(package)
    }

    async fn upload(&self, record_id: &str, bytes: &[u8]) -> Result<StorageOutcome, EvidenceError> {
        let name = format!("{}_evidence.json", record_id);

        let reason = match &self.remote_store {
            Some(store) => match timeout(self.config.upload_timeout(), store.upload(bytes, &name)).await {
                Ok(Ok(reference)) => {
                    info!("Evidence for {} uploaded as {}", record_id, reference);
                    return Ok(StorageOutcome::Remote { reference });
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => EvidenceError::StorageTimeout(self.config.upload_timeout_secs).to_string(),
            },
            None => "no remote object store configured".to_string(),
        };

        warn!("Remote upload unavailable for {} ({}), storing locally", record_id, reason);
        let reference = self.local_store.upload(bytes, &name).await?;
        let path = self.local_store.path_for(&reference.id);
        Ok(StorageOutcome::LocalFallback {
            reference,
            path,
            reason,
        })
    }

    fn write_package(&self, package: &EvidencePackage) -> Result<(), EvidenceError> {
        let path = self.package_path(&package.record_id);
        let tmp_path = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        fs::write(&tmp_path, serde_json::to_string_pretty(package)?)
            .map_err(|e| EvidenceError::io_context("Failed to write evidence package", e))?;
        fs::rename(&tmp_path, &path)
            .map_err(|e| EvidenceError::io_context("Failed to persist evidence package", e))?;
        debug!("Evidence package written to {:?}", path);
        Ok(())
    }

    /// Read a persisted package
    pub fn load_package(&self, record_id: &str) -> Result<EvidencePackage, EvidenceError> {
        ensure_safe_id("record", record_id)?;
        let path = self.package_path(record_id);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(EvidenceError::EvidenceNotFound(record_id.to_string()))
            }
            Err(e) => return Err(EvidenceError::io_context("Failed to read evidence package", e)),
        };
        serde_json::from_str(&contents)
            .map_err(|e| EvidenceError::MalformedPackage(format!("{:?}: {}", path, e)))
    }

    /// Re-check hash, signature and audit trail for a stored case
    pub async fn verify_evidence(
        &self,
        record_id: &str,
        expected_hash: &str,
    ) -> Result<EvidenceVerification, EvidenceError> {
        info!("Verifying evidence for record {}", record_id);
        let package = self.load_package(record_id)?;
        let expected_hash = expected_hash.trim();

        let actual_hash = self.hasher.hash(&package.evidence)?;
        let hash = if actual_hash.eq_ignore_ascii_case(expected_hash) {
            CheckOutcome::pass("evidence hash matches")
        } else {
            CheckOutcome::fail(format!(
                "expected {}, computed {}",
                expected_hash, actual_hash
            ))
        };

        let signature_result = self.signer.verify(&package.signed_package)?;
        let signature = if !signature_result.is_valid {
            CheckOutcome::fail(format!("signature invalid: {:?}", signature_result.reason))
        } else if package.signed_package.report != serde_json::to_value(&package.evidence)? {
            CheckOutcome::fail("signed report differs from stored evidence")
        } else {
            CheckOutcome::pass(format!(
                "{} signature by {}",
                signature_result.algorithm, signature_result.signer_name
            ))
        };

        let history = self.audit.get_history(record_id).await?;
        let stored_entry = history.iter().find(|entry| {
            entry.event_type == AuditEventType::EvidenceStored
                && entry
                    .detail_str("evidence_hash")
                    .map_or(false, |hash| hash.eq_ignore_ascii_case(expected_hash))
        });
        let audit_history = match stored_entry {
            Some(entry) => CheckOutcome::pass(format!(
                "{} entries, evidence_stored at #{}",
                history.len(),
                entry.sequence
            )),
            None => CheckOutcome::fail(format!(
                "{} entries, none records evidence_stored with this hash",
                history.len()
            )),
        };

        let report = self.audit.verify_integrity().await?;
        let audit_integrity = if report.is_valid {
            CheckOutcome::pass(format!("{} entries verified", report.total_entries))
        } else {
            let record_events: BTreeSet<&str> =
                history.iter().map(|entry| entry.event_id.as_str()).collect();
            let affecting = report
                .corrupted_entries
                .iter()
                .filter(|c| c.event_id.as_deref().map_or(true, |id| record_events.contains(id)))
                .count();
            CheckOutcome::fail(format!(
                "corrupted sequences {:?}, {} possibly for this record",
                report.corrupted_sequences(),
                affecting
            ))
        };

        let verification = EvidenceVerification::new(
            record_id,
            expected_hash,
            actual_hash,
            VerificationChecks {
                hash,
                signature,
                audit_history,
                audit_integrity,
            },
            package.guarantee(),
        );

        if verification.is_valid {
            info!("Evidence for {} verified", record_id);
        } else {
            warn!("Evidence for {} failed verification: {:?}", record_id, verification.checks);
        }
        Ok(verification)
    }

    /// Fetch evidence back from whichever store holds it and check its hash
    pub async fn retrieve_evidence(
        &self,
        reference: &ContentReference,
        expected_hash: &str,
        actor_id: &str,
    ) -> Result<Evidence, EvidenceError> {
        let bytes = if reference.store == self.local_store.name() {
            self.local_store.download(reference).await?
        } else {
            match &self.remote_store {
                Some(store) if store.name() == reference.store => {
                    timeout(self.config.upload_timeout(), store.download(reference))
                        .await
                        .map_err(|_| EvidenceError::StorageTimeout(self.config.upload_timeout_secs))??
                }
                _ => {
                    return Err(EvidenceError::Storage(format!(
                        "No object store available for {}",
                        reference
                    )))
                }
            }
        };

        let evidence: Evidence = serde_json::from_slice(&bytes).map_err(|e| {
            EvidenceError::Serialization(format!("{} is not an evidence document: {}", reference, e))
        })?;
        let actual_hash = self.hasher.hash(&evidence)?;
        if !actual_hash.eq_ignore_ascii_case(expected_hash.trim()) {
            return Err(EvidenceError::HashMismatch {
                expected: expected_hash.to_string(),
                actual: actual_hash,
            });
        }

        self.audit
            .log_evidence_retrieved(
                &evidence.record_id,
                &actual_hash,
                &reference.to_string(),
                Some(actor_id),
            )
            .await?;
        Ok(evidence)
    }

    /// Commit several evidence items to one Merkle batch and audit it
    pub async fn create_evidence_batch<T: Serialize>(
        &self,
        items: &[T],
        batch_id: Option<&str>,
    ) -> Result<BatchInfo, EvidenceError> {
        let info = self.batches.create_batch(items, batch_id)?;
        self.audit
            .append(
                AuditEventType::SystemEvent,
                &info.batch_id,
                json!({
                    "action": "Evidence batch created",
                    "item_count": info.item_count,
                    "root_hash": info.root_hash,
                }),
                Some("system"),
            )
            .await?;
        Ok(info)
    }

    pub async fn statistics(&self) -> Result<VaultStatistics, EvidenceError> {
        Ok(VaultStatistics {
            audit_trail: self.audit.statistics().await?,
            storage_dir: self.config.storage_dir.clone(),
            key_id: self.signer.key_id().to_string(),
            key_fingerprint: self.signer.key_pair().fingerprint()?,
            remote_store: self.remote_store.as_ref().map(|s| s.name().to_string()),
            stored_packages: count_packages(&self.config.evidence_dir())?,
            batches: self.batches.list_batches()?.len(),
        })
    }
}

fn count_packages(dir: &Path) -> Result<usize, EvidenceError> {
    let mut count = 0;
    for entry in fs::read_dir(dir)? {
        if entry?
            .file_name()
            .to_str()
            .map_or(false, |name| name.ends_with(PACKAGE_SUFFIX))
        {
            count += 1;
        }
    }
    Ok(count)
}
