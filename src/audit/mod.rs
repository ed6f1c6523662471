//! Audit Trail System
//!
//! Provides tamper-evident logging for all evidence operations
//! with cryptographic hash chains.

pub mod entry;
pub mod trail;
pub mod verify;

pub use entry::{AuditEntry, AuditEventType};
pub use trail::{AuditStatistics, AuditTrail, EventFilter};
pub use verify::{
    verify_entries, verify_log_file, CorruptedEntry, IntegrityIssue, IntegrityReport,
    IntegrityStatus,
};
