//! Audit Trail
//!
//! Append-only JSONL log of audit entries. Appends are serialized behind a
//! single mutex so sequence numbers and hash links are assigned exactly once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::audit::entry::{details_object, AuditEntry, AuditEventType};
use crate::audit::verify::{verify_log_file, IntegrityReport};
use crate::error::EvidenceError;
use crate::hashing::GENESIS_HASH;

pub const AUDIT_LOG_FILE: &str = "audit_trail.jsonl";

/// Risk score at which a fraud detection is logged as critical.
const CRITICAL_RISK_SCORE: f64 = 75.0;

struct TrailState {
    file: File,
    next_sequence: u64,
    head_hash: String,
}

/// Hash-chained audit trail backed by an append-only file
#[derive(Clone)]
pub struct AuditTrail {
    log_path: PathBuf,
    state: Arc<Mutex<TrailState>>,
}

/// Filters for [`AuditTrail::events`]
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub record_id: Option<String>,
    pub event_type: Option<AuditEventType>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl EventFilter {
    pub fn for_record(record_id: &str) -> Self {
        Self {
            record_id: Some(record_id.to_string()),
            ..Self::default()
        }
    }

    fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(record_id) = &self.record_id {
            if &entry.record_id != record_id {
                return false;
            }
        }
        if let Some(event_type) = &self.event_type {
            if &entry.event_type != event_type {
                return false;
            }
        }
        if let Some(start) = self.start {
            if entry.timestamp < start {
                return false;
            }
        }
        if let Some(end) = self.end {
            if entry.timestamp > end {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditStatistics {
    pub total_entries: usize,
    pub event_type_counts: BTreeMap<String, usize>,
    pub actor_counts: BTreeMap<String, usize>,
    pub unique_records: usize,
    pub first_event_at: Option<DateTime<Utc>>,
    pub last_event_at: Option<DateTime<Utc>>,
}

impl AuditTrail {
    /// Open (or create) the trail stored under `storage_dir`.
    ///
    /// A log whose last line is unterminated is refused with
    /// [`EvidenceError::AuditLog`]; appending after it would glue the next
    /// entry onto the partial line.
    pub fn open(storage_dir: &Path) -> Result<Self, EvidenceError> {
        std::fs::create_dir_all(storage_dir).map_err(|e| {
            EvidenceError::io_context("Failed to create audit log directory", e)
        })?;

        let log_path = storage_dir.join(AUDIT_LOG_FILE);
        if has_partial_tail(&log_path)? {
            warn!("Audit log {:?} ends in a partial line", log_path);
            return Err(EvidenceError::AuditLog(format!(
                "{:?} ends in an unterminated line; inspect it with verify-audit before appending",
                log_path
            )));
        }
        let (last_sequence, head_hash) = scan_head(&log_path)?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|e| EvidenceError::io_context("Failed to open audit log file", e))?;

        info!(
            "Opened audit trail {:?} with {} existing entries",
            log_path, last_sequence
        );

        Ok(Self {
            log_path,
            state: Arc::new(Mutex::new(TrailState {
                file,
                next_sequence: last_sequence + 1,
                head_hash,
            })),
        })
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Append a new entry, linking it to the current head
    pub async fn append(
        &self,
        event_type: AuditEventType,
        record_id: &str,
        details: Value,
        actor_id: Option<&str>,
    ) -> Result<AuditEntry, EvidenceError> {
        let mut state = self.state.lock().await;

        let entry = AuditEntry::new(
            state.next_sequence,
            event_type,
            record_id.to_string(),
            details_object(details),
            actor_id.map(str::to_string),
            state.head_hash.clone(),
        )?;

        let line = serde_json::to_string(&entry)?;
        writeln!(state.file, "{}", line)
            .map_err(|e| EvidenceError::io_context("Failed to write to audit log", e))?;
        state
            .file
            .flush()
            .map_err(|e| EvidenceError::io_context("Failed to flush audit log", e))?;
        state
            .file
            .sync_data()
            .map_err(|e| EvidenceError::io_context("Failed to sync audit log", e))?;

        state.next_sequence += 1;
        state.head_hash = entry.event_hash.clone();

        debug!("Appended audit entry: {}", entry.summary());
        Ok(entry)
    }

    pub async fn log_analysis_started(
        &self,
        record_id: &str,
        input_file: &str,
        actor_id: Option<&str>,
    ) -> Result<AuditEntry, EvidenceError> {
        self.append(
            AuditEventType::AnalysisStarted,
            record_id,
            json!({
                "input_file": input_file,
                "action": "Analysis initiated",
            }),
            actor_id,
        )
        .await
    }

    pub async fn log_analysis_completed(
        &self,
        record_id: &str,
        result: &Value,
        duration_seconds: f64,
        actor_id: Option<&str>,
    ) -> Result<AuditEntry, EvidenceError> {
        self.append(
            AuditEventType::AnalysisCompleted,
            record_id,
            json!({
                "is_fraudulent": result.get("is_fraudulent"),
                "risk_score": result.get("risk_score"),
                "duration_seconds": duration_seconds,
                "ml_used": result.get("ml_predictions").is_some(),
                "action": "Analysis completed",
            }),
            actor_id,
        )
        .await
    }

    pub async fn log_fraud_detected(
        &self,
        record_id: &str,
        risk_score: f64,
        evidence_hash: &str,
        actor_id: Option<&str>,
    ) -> Result<AuditEntry, EvidenceError> {
        let severity = if risk_score >= CRITICAL_RISK_SCORE {
            "CRITICAL"
        } else {
            "HIGH"
        };

        self.append(
            AuditEventType::FraudDetected,
            record_id,
            json!({
                "risk_score": risk_score,
                "evidence_hash": evidence_hash,
                "severity": severity,
                "action": "Fraud detected - evidence preserved",
            }),
            actor_id,
        )
        .await
    }

    pub async fn log_evidence_stored(
        &self,
        record_id: &str,
        evidence_hash: &str,
        content_reference: Option<&str>,
        storage_location: &str,
        actor_id: Option<&str>,
    ) -> Result<AuditEntry, EvidenceError> {
        self.append(
            AuditEventType::EvidenceStored,
            record_id,
            json!({
                "evidence_hash": evidence_hash,
                "content_reference": content_reference,
                "storage_location": storage_location,
                "action": "Evidence stored immutably",
            }),
            actor_id,
        )
        .await
    }

    pub async fn log_evidence_retrieved(
        &self,
        record_id: &str,
        evidence_hash: &str,
        retrieval_source: &str,
        actor_id: Option<&str>,
    ) -> Result<AuditEntry, EvidenceError> {
        self.append(
            AuditEventType::EvidenceRetrieved,
            record_id,
            json!({
                "evidence_hash": evidence_hash,
                "retrieval_source": retrieval_source,
                "action": "Evidence retrieved",
            }),
            actor_id,
        )
        .await
    }

    pub async fn log_error(
        &self,
        record_id: &str,
        error_type: &str,
        error_message: &str,
        actor_id: Option<&str>,
    ) -> Result<AuditEntry, EvidenceError> {
        self.append(
            AuditEventType::Error,
            record_id,
            json!({
                "error_type": error_type,
                "error_message": error_message,
                "action": "Error logged",
            }),
            actor_id,
        )
        .await
    }

    /// Sequence number the next append will receive
    pub async fn next_sequence(&self) -> u64 {
        self.state.lock().await.next_sequence
    }

    pub async fn head_hash(&self) -> String {
        self.state.lock().await.head_hash.clone()
    }

    /// All parseable entries, oldest first
    pub async fn entries(&self) -> Result<Vec<AuditEntry>, EvidenceError> {
        // Hold the lock so a concurrent append is never observed half-written.
        let _state = self.state.lock().await;
        read_entries(&self.log_path)
    }

    pub async fn events(&self, filter: &EventFilter) -> Result<Vec<AuditEntry>, EvidenceError> {
        let limit = filter.limit.unwrap_or(usize::MAX);
        Ok(self
            .entries()
            .await?
            .into_iter()
            .filter(|entry| filter.matches(entry))
            .take(limit)
            .collect())
    }

    /// Complete history of one record, oldest first
    pub async fn get_history(&self, record_id: &str) -> Result<Vec<AuditEntry>, EvidenceError> {
        self.events(&EventFilter::for_record(record_id)).await
    }

    /// Recompute every link; anomalies are reported, never repaired
    pub async fn verify_integrity(&self) -> Result<IntegrityReport, EvidenceError> {
        let _state = self.state.lock().await;
        let report = verify_log_file(&self.log_path)?;
        if !report.is_valid {
            warn!(
                "Audit trail integrity check found {} corrupted entries",
                report.corrupted_entries.len()
            );
        }
        Ok(report)
    }

    pub async fn statistics(&self) -> Result<AuditStatistics, EvidenceError> {
        let entries = self.entries().await?;

        let mut event_type_counts = BTreeMap::new();
        let mut actor_counts = BTreeMap::new();
        let mut records = BTreeSet::new();

        for entry in &entries {
            *event_type_counts
                .entry(entry.event_type.to_string())
                .or_insert(0) += 1;
            *actor_counts
                .entry(entry.actor_id.clone().unwrap_or_else(|| "system".to_string()))
                .or_insert(0) += 1;
            records.insert(entry.record_id.as_str());
        }

        Ok(AuditStatistics {
            total_entries: entries.len(),
            event_type_counts,
            actor_counts,
            unique_records: records.len(),
            first_event_at: entries.first().map(|e| e.timestamp),
            last_event_at: entries.last().map(|e| e.timestamp),
        })
    }

    /// Write matching entries to `output_path` as a JSON array
    pub async fn export_json(
        &self,
        output_path: &Path,
        record_id: Option<&str>,
    ) -> Result<usize, EvidenceError> {
        let filter = EventFilter {
            record_id: record_id.map(str::to_string),
            ..EventFilter::default()
        };
        let events = self.events(&filter).await?;

        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&events)?;
        std::fs::write(output_path, json)
            .map_err(|e| EvidenceError::io_context("Failed to write audit export", e))?;

        info!("Exported {} audit entries to {:?}", events.len(), output_path);
        Ok(events.len())
    }
}

/// Read all parseable entries, skipping (and logging) corrupt lines
pub fn read_entries(path: &Path) -> Result<Vec<AuditEntry>, EvidenceError> {
    if !path.exists() {
        return Ok(vec![]);
    }

    let file = File::open(path)
        .map_err(|e| EvidenceError::io_context("Failed to open audit log file", e))?;
    let reader = BufReader::new(file);
    let mut entries = Vec::new();

    for (line_num, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| {
            EvidenceError::io_context(&format!("Failed to read line {}", line_num + 1), e)
        })?;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<AuditEntry>(&line) {
            Ok(entry) => entries.push(entry),
            Err(e) => warn!("Skipping unparsable audit line {}: {}", line_num + 1, e),
        }
    }

    Ok(entries)
}

/// True when the log is non-empty and its final byte is not a newline
fn has_partial_tail(path: &Path) -> Result<bool, EvidenceError> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(EvidenceError::io_context("Failed to open audit log file", e)),
    };
    let len = file
        .metadata()
        .map_err(|e| EvidenceError::io_context("Failed to stat audit log file", e))?
        .len();
    if len == 0 {
        return Ok(false);
    }

    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))
        .and_then(|_| file.read_exact(&mut last))
        .map_err(|e| EvidenceError::io_context("Failed to read audit log tail", e))?;
    Ok(last[0] != b'\n')
}

/// Last sequence number and head hash of an existing log
fn scan_head(path: &Path) -> Result<(u64, String), EvidenceError> {
    let entries = read_entries(path)?;
    match entries.last() {
        Some(last) => Ok((last.sequence, last.event_hash.clone())),
        None => Ok((0, GENESIS_HASH.to_string())),
    }
}
