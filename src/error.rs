use thiserror::Error;

impl From<serde_json::Error> for EvidenceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(format!("JSON serialization error: {}", err))
    }
}

impl From<std::io::Error> for EvidenceError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum EvidenceError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Key pair already exists: {0}")]
    KeyExists(String),

    #[error("Key pair not found: {0}")]
    KeyNotFound(String),

    #[error("Unusable key material: {0}")]
    KeyMaterial(String),

    #[error("Cryptographic error: {0}")]
    Crypto(String),

    #[error("Malformed signed package: {0}")]
    MalformedPackage(String),

    #[error("Cannot build a Merkle tree from an empty batch")]
    EmptyBatch,

    #[error("Proof index {index} out of range for {leaf_count} leaves")]
    ProofIndexOutOfRange { index: usize, leaf_count: usize },

    #[error("Object storage error: {0}")]
    Storage(String),

    #[error("Object storage timed out after {0}s")]
    StorageTimeout(u64),

    #[error("Evidence not found: {0}")]
    EvidenceNotFound(String),

    #[error("Evidence package already exists for record {0}")]
    EvidenceExists(String),

    #[error("Evidence hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("Batch not found: {0}")]
    BatchNotFound(String),

    #[error("Batch already exists: {0}")]
    BatchExists(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Audit log error: {0}")]
    AuditLog(String),
}

impl EvidenceError {
    /// Whether the orchestrator may continue after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::StorageTimeout(_))
    }

    pub fn io_context(context: &str, err: std::io::Error) -> Self {
        Self::Io(format!("{}: {}", context, err))
    }
}

/// Identifiers end up in file names, so only `[A-Za-z0-9_.-]` is allowed
/// and a leading dot is rejected.
pub fn ensure_safe_id(kind: &str, id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(EvidenceError::InvalidIdentifier(format!("{} {:?}", kind, id)))
    }
}

pub type Result<T, E = EvidenceError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_ids() {
        assert!(ensure_safe_id("record", "LAND_001").is_ok());
        assert!(ensure_safe_id("batch", "BATCH_20250101_120000").is_ok());
        assert!(ensure_safe_id("record", "../etc/passwd").is_err());
        assert!(ensure_safe_id("record", ".hidden").is_err());
        assert!(ensure_safe_id("record", "").is_err());
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(EvidenceError::StorageTimeout(30).is_recoverable());
        assert!(EvidenceError::Storage("503".to_string()).is_recoverable());
        assert!(!EvidenceError::KeyNotFound("main".to_string()).is_recoverable());
    }
}
