//! Audit Trail Verification
//!
//! Recomputes every entry hash and hash link of a JSONL audit log and
//! reports the entries that do not match.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, info};

use crate::audit::entry::AuditEntry;
use crate::error::EvidenceError;
use crate::hashing::GENESIS_HASH;

/// Why an entry failed verification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityIssue {
    InvalidJson,
    SequenceMismatch,
    PreviousHashMismatch,
    EventHashMismatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorruptedEntry {
    /// Position in the log (1-based), i.e. the sequence the entry should carry
    pub sequence: u64,
    pub event_id: Option<String>,
    pub reasons: Vec<IntegrityIssue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntegrityStatus {
    Verified,
    Corrupted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub is_valid: bool,
    pub total_entries: usize,
    pub corrupted_entries: Vec<CorruptedEntry>,
    pub verified_at: DateTime<Utc>,
    pub status: IntegrityStatus,
}

impl IntegrityReport {
    fn from_corrupted(total_entries: usize, corrupted_entries: Vec<CorruptedEntry>) -> Self {
        let is_valid = corrupted_entries.is_empty();
        Self {
            is_valid,
            total_entries,
            corrupted_entries,
            verified_at: Utc::now(),
            status: if is_valid {
                IntegrityStatus::Verified
            } else {
                IntegrityStatus::Corrupted
            },
        }
    }

    pub fn corrupted_sequences(&self) -> Vec<u64> {
        self.corrupted_entries.iter().map(|c| c.sequence).collect()
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        if self.is_valid {
            format!("Audit trail is valid ({} entries)", self.total_entries)
        } else {
            format!(
                "Audit trail is corrupted ({} entries, {} corrupted: {:?})",
                self.total_entries,
                self.corrupted_entries.len(),
                self.corrupted_sequences()
            )
        }
    }
}

/// Verify raw JSONL lines.
///
/// An entry's `previous_hash` is accepted when it matches either the stored or
/// the recomputed hash of its predecessor, so one tampered entry is reported
/// once instead of also flagging its successor.
pub fn verify_lines<I, S>(lines: I) -> IntegrityReport
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut corrupted = Vec::new();
    let mut total = 0usize;
    // None while the predecessor could not be parsed.
    let mut predecessor: Option<Vec<String>> = Some(vec![GENESIS_HASH.to_string()]);

    for line in lines {
        let line = line.as_ref().trim();
        if line.is_empty() {
            continue;
        }
        total += 1;
        let position = total as u64;

        let entry: AuditEntry = match serde_json::from_str(line) {
            Ok(entry) => entry,
            Err(e) => {
                debug!("Entry {} is not valid JSON: {}", position, e);
                corrupted.push(CorruptedEntry {
                    sequence: position,
                    event_id: None,
                    reasons: vec![IntegrityIssue::InvalidJson],
                });
                predecessor = None;
                continue;
            }
        };

        let mut reasons = Vec::new();

        if entry.sequence != position {
            reasons.push(IntegrityIssue::SequenceMismatch);
        }

        if let Some(accepted) = &predecessor {
            if !accepted.iter().any(|hash| hash == &entry.previous_hash) {
                reasons.push(IntegrityIssue::PreviousHashMismatch);
            }
        }

        let recomputed = entry.calculate_hash().ok();
        if recomputed.as_deref() != Some(entry.event_hash.as_str()) {
            reasons.push(IntegrityIssue::EventHashMismatch);
        }

        if !reasons.is_empty() {
            corrupted.push(CorruptedEntry {
                sequence: position,
                event_id: Some(entry.event_id.clone()),
                reasons,
            });
        }

        let mut accepted = vec![entry.event_hash];
        if let Some(hash) = recomputed {
            if hash != accepted[0] {
                accepted.push(hash);
            }
        }
        predecessor = Some(accepted);
    }

    IntegrityReport::from_corrupted(total, corrupted)
}

/// Verify already-parsed entries
pub fn verify_entries(entries: &[AuditEntry]) -> Result<IntegrityReport, EvidenceError> {
    let lines = entries
        .iter()
        .map(serde_json::to_string)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(verify_lines(lines))
}

/// Verify the audit log at `path`; a missing log is an empty, valid trail
pub fn verify_log_file(path: &Path) -> Result<IntegrityReport, EvidenceError> {
    if !path.exists() {
        return Ok(IntegrityReport::from_corrupted(0, vec![]));
    }

    let file = File::open(path)
        .map_err(|e| EvidenceError::io_context("Failed to open audit log file", e))?;
    let lines = BufReader::new(file)
        .lines()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| EvidenceError::io_context("Failed to read audit log", e))?;

    let report = verify_lines(lines);
    info!("{}", report.summary());
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::entry::{details_object, AuditEventType};
    use serde_json::json;

    fn build_chain(count: u64) -> Vec<AuditEntry> {
        let mut entries: Vec<AuditEntry> = Vec::new();
        for sequence in 1..=count {
            let previous_hash = entries
                .last()
                .map(|e| e.event_hash.clone())
                .unwrap_or_else(|| GENESIS_HASH.to_string());
            entries.push(
                AuditEntry::new(
                    sequence,
                    AuditEventType::SystemEvent,
                    "LAND_001".to_string(),
                    details_object(json!({"step": sequence})),
                    None,
                    previous_hash,
                )
                .unwrap(),
            );
        }
        entries
    }

    fn lines(entries: &[AuditEntry]) -> Vec<String> {
        entries
            .iter()
            .map(|e| serde_json::to_string(e).unwrap())
            .collect()
    }

    #[test]
    fn test_valid_chain() {
        let report = verify_entries(&build_chain(5)).unwrap();
        assert!(report.is_valid);
        assert_eq!(report.total_entries, 5);
        assert_eq!(report.status, IntegrityStatus::Verified);
    }

    #[test]
    fn test_tampered_details_flags_only_that_entry() {
        let mut entries = build_chain(4);
        entries[2].details.insert("step".to_string(), json!(99));

        let report = verify_entries(&entries).unwrap();
        assert!(!report.is_valid);
        assert_eq!(report.corrupted_sequences(), vec![3]);
        assert_eq!(
            report.corrupted_entries[0].reasons,
            vec![IntegrityIssue::EventHashMismatch]
        );
    }

    #[test]
    fn test_tampered_event_hash_flags_only_that_entry() {
        let mut entries = build_chain(3);
        entries[1].event_hash = "0".repeat(63) + "1";

        let report = verify_entries(&entries).unwrap();
        assert_eq!(report.corrupted_sequences(), vec![2]);
        assert_eq!(report.status, IntegrityStatus::Corrupted);
    }

    #[test]
    fn test_removed_entry_breaks_link() {
        let mut entries = build_chain(4);
        entries.remove(1);

        let report = verify_entries(&entries).unwrap();
        assert!(!report.is_valid);
        // every entry after the gap sits at the wrong position
        assert_eq!(report.corrupted_sequences(), vec![2, 3]);
        assert!(report.corrupted_entries[0]
            .reasons
            .contains(&IntegrityIssue::PreviousHashMismatch));
    }

    #[test]
    fn test_invalid_json_line() {
        let mut raw = lines(&build_chain(3));
        raw[1] = "{not json".to_string();

        let report = verify_lines(&raw);
        assert_eq!(report.total_entries, 3);
        assert_eq!(report.corrupted_sequences(), vec![2]);
        assert_eq!(
            report.corrupted_entries[0].reasons,
            vec![IntegrityIssue::InvalidJson]
        );
    }

    #[test]
    fn test_missing_file_is_valid() {
        let report = verify_log_file(Path::new("/nonexistent/audit_trail.jsonl")).unwrap();
        assert!(report.is_valid);
        assert_eq!(report.total_entries, 0);
    }
}
