//! Audit Trail Entry
//!
//! Defines the structure for tamper-evident audit entries
//! linked into a hash chain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::error::EvidenceError;
use crate::hashing::{HashManager, GENESIS_HASH};

/// Kind of event recorded in the trail
///
/// Serialized as its bare snake_case name; unknown names round-trip as `Custom`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum AuditEventType {
    AnalysisStarted,
    AnalysisCompleted,
    FraudDetected,
    EvidenceStored,
    EvidenceRetrieved,
    ReportGenerated,
    UserAction,
    SystemEvent,
    Error,
    Custom(String),
}

impl AuditEventType {
    pub fn as_str(&self) -> &str {
        match self {
            AuditEventType::AnalysisStarted => "analysis_started",
            AuditEventType::AnalysisCompleted => "analysis_completed",
            AuditEventType::FraudDetected => "fraud_detected",
            AuditEventType::EvidenceStored => "evidence_stored",
            AuditEventType::EvidenceRetrieved => "evidence_retrieved",
            AuditEventType::ReportGenerated => "report_generated",
            AuditEventType::UserAction => "user_action",
            AuditEventType::SystemEvent => "system_event",
            AuditEventType::Error => "error",
            AuditEventType::Custom(name) => name,
        }
    }
}

impl From<String> for AuditEventType {
    fn from(name: String) -> Self {
        match name.as_str() {
            "analysis_started" => AuditEventType::AnalysisStarted,
            "analysis_completed" => AuditEventType::AnalysisCompleted,
            "fraud_detected" => AuditEventType::FraudDetected,
            "evidence_stored" => AuditEventType::EvidenceStored,
            "evidence_retrieved" => AuditEventType::EvidenceRetrieved,
            "report_generated" => AuditEventType::ReportGenerated,
            "user_action" => AuditEventType::UserAction,
            "system_event" => AuditEventType::SystemEvent,
            "error" | "error_occurred" => AuditEventType::Error,
            _ => AuditEventType::Custom(name),
        }
    }
}

impl From<AuditEventType> for String {
    fn from(event_type: AuditEventType) -> Self {
        event_type.as_str().to_string()
    }
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit entry with cryptographic hash chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub sequence: u64,
    pub event_id: String,
    pub event_type: AuditEventType,
    pub record_id: String,
    pub timestamp: DateTime<Utc>,
    pub actor_id: Option<String>,
    pub details: Map<String, Value>,
    pub previous_hash: String,
    pub event_hash: String,
}

/// Every field except `event_hash`, in the shape that gets hashed.
#[derive(Serialize)]
struct HashedFields<'a> {
    sequence: u64,
    event_id: &'a str,
    event_type: &'a AuditEventType,
    record_id: &'a str,
    timestamp: &'a DateTime<Utc>,
    actor_id: &'a Option<String>,
    details: &'a Map<String, Value>,
    previous_hash: &'a str,
}

impl AuditEntry {
    /// Create a new entry and seal it with its hash
    pub fn new(
        sequence: u64,
        event_type: AuditEventType,
        record_id: String,
        details: Map<String, Value>,
        actor_id: Option<String>,
        previous_hash: String,
    ) -> Result<Self, EvidenceError> {
        let mut entry = Self {
            sequence,
            event_id: uuid::Uuid::new_v4().to_string(),
            event_type,
            record_id,
            timestamp: Utc::now(),
            actor_id,
            details,
            previous_hash,
            event_hash: String::new(), // Will be calculated
        };

        entry.event_hash = entry.calculate_hash()?;
        Ok(entry)
    }

    /// SHA-256 over the canonical form of every field but `event_hash`
    pub fn calculate_hash(&self) -> Result<String, EvidenceError> {
        HashManager::new().hash(&HashedFields {
            sequence: self.sequence,
            event_id: &self.event_id,
            event_type: &self.event_type,
            record_id: &self.record_id,
            timestamp: &self.timestamp,
            actor_id: &self.actor_id,
            details: &self.details,
            previous_hash: &self.previous_hash,
        })
    }

    pub fn verify_hash(&self) -> bool {
        self.calculate_hash()
            .map(|hash| hash == self.event_hash)
            .unwrap_or(false)
    }

    pub fn is_first(&self) -> bool {
        self.previous_hash == GENESIS_HASH
    }

    /// Look up a string detail such as `evidence_hash`.
    pub fn detail_str(&self, key: &str) -> Option<&str> {
        self.details.get(key).and_then(Value::as_str)
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "#{} {}: {} by {}",
            self.sequence,
            self.event_type,
            self.record_id,
            self.actor_id.as_deref().unwrap_or("system")
        )
    }
}

/// Normalize caller-supplied details into a JSON object.
pub fn details_object(details: Value) -> Map<String, Value> {
    match details {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}
