//! Evidence Package Types
//!
//! The evidence value that gets hashed, the per-case package persisted as
//! `<record_id>_complete.json`, and the result of verifying one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

use crate::crypto::SignedPackage;
use crate::storage::ContentReference;

pub const EVIDENCE_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceMetadata {
    pub version: String,
    pub actor_id: String,
}

/// The fraud-analysis payload being protected
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub record_id: String,
    pub timestamp: DateTime<Utc>,
    pub analysis_result: Value,
    #[serde(default = "empty_object")]
    pub ml_predictions: Value,
    #[serde(default)]
    pub documents: Vec<String>,
    pub metadata: EvidenceMetadata,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl Evidence {
    pub fn new(
        record_id: &str,
        analysis_result: Value,
        ml_predictions: Option<Value>,
        documents: Option<Vec<String>>,
        actor_id: &str,
    ) -> Self {
        Self {
            record_id: record_id.to_string(),
            timestamp: Utc::now(),
            analysis_result,
            ml_predictions: ml_predictions.unwrap_or_else(empty_object),
            documents: documents.unwrap_or_default(),
            metadata: EvidenceMetadata {
                version: EVIDENCE_VERSION.to_string(),
                actor_id: actor_id.to_string(),
            },
        }
    }

    pub fn is_fraudulent(&self) -> bool {
        self.analysis_result
            .get("is_fraudulent")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn risk_score(&self) -> f64 {
        self.analysis_result
            .get("risk_score")
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
    }
}

/// Where the evidence bytes ended up
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StorageOutcome {
    /// Accepted by the remote content-addressed store
    Remote { reference: ContentReference },
    /// Remote upload unavailable; written to the local store instead
    LocalFallback {
        reference: ContentReference,
        path: PathBuf,
        reason: String,
    },
}

impl StorageOutcome {
    pub fn reference(&self) -> &ContentReference {
        match self {
            StorageOutcome::Remote { reference } => reference,
            StorageOutcome::LocalFallback { reference, .. } => reference,
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, StorageOutcome::Remote { .. })
    }

    /// Value recorded as `storage_location` in the audit trail
    pub fn location(&self) -> &str {
        &self.reference().store
    }
}

/// Which sub-steps of `store_evidence` succeeded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepStatus {
    pub hashed: bool,
    pub uploaded: bool,
    pub stored_locally: bool,
    pub signed: bool,
    pub audit_logged: bool,
}

/// Distinguishes full storage from storage without a remote copy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "level", rename_all = "snake_case")]
pub enum Guarantee {
    Full,
    Degraded { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidencePackage {
    pub record_id: String,
    pub evidence: Evidence,
    pub evidence_hash: String,
    pub storage: StorageOutcome,
    pub signed_package: SignedPackage,
    /// Sequence of the `evidence_stored` audit entry
    pub audit_sequence: u64,
    pub steps: StepStatus,
    pub stored_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl EvidencePackage {
    pub fn guarantee(&self) -> Guarantee {
        match &self.storage {
            StorageOutcome::Remote { .. } => Guarantee::Full,
            StorageOutcome::LocalFallback { reason, .. } => Guarantee::Degraded {
                reason: reason.clone(),
            },
        }
    }

    pub fn summary(&self) -> String {
        let guarantee = match self.guarantee() {
            Guarantee::Full => "full".to_string(),
            Guarantee::Degraded { reason } => format!("degraded ({})", reason),
        };
        format!(
            "{}: hash {}, stored at {}, audit #{}, guarantee {}",
            self.record_id,
            self.evidence_hash,
            self.storage.reference(),
            self.audit_sequence,
            guarantee
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub passed: bool,
    pub detail: String,
}

impl CheckOutcome {
    pub fn pass(detail: impl Into<String>) -> Self {
        Self {
            passed: true,
            detail: detail.into(),
        }
    }

    pub fn fail(detail: impl Into<String>) -> Self {
        Self {
            passed: false,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationChecks {
    pub hash: CheckOutcome,
    pub signature: CheckOutcome,
    pub audit_history: CheckOutcome,
    pub audit_integrity: CheckOutcome,
}

impl VerificationChecks {
    pub fn all_passed(&self) -> bool {
        self.hash.passed
            && self.signature.passed
            && self.audit_history.passed
            && self.audit_integrity.passed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationStatus {
    Verified,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceVerification {
    pub record_id: String,
    pub expected_hash: String,
    pub actual_hash: String,
    pub checks: VerificationChecks,
    pub guarantee: Guarantee,
    pub is_valid: bool,
    pub status: VerificationStatus,
    pub verified_at: DateTime<Utc>,
}

impl EvidenceVerification {
    pub fn new(
        record_id: &str,
        expected_hash: &str,
        actual_hash: String,
        checks: VerificationChecks,
        guarantee: Guarantee,
    ) -> Self {
        let is_valid = checks.all_passed();
        Self {
            record_id: record_id.to_string(),
            expected_hash: expected_hash.to_string(),
            actual_hash,
            checks,
            guarantee,
            is_valid,
            status: if is_valid {
                VerificationStatus::Verified
            } else {
                VerificationStatus::Failed
            },
            verified_at: Utc::now(),
        }
    }
}
