//! Evidence Packages
//!
//! One sealed, signed and audited package per fraud case.

pub mod package;
pub mod vault;

pub use package::{
    CheckOutcome, Evidence, EvidenceMetadata, EvidencePackage, EvidenceVerification, Guarantee,
    StepStatus, StorageOutcome, VerificationChecks, VerificationStatus,
};
pub use vault::{EvidenceVault, VaultStatistics};
