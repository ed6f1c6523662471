pub mod audit;
pub mod config;
pub mod crypto;
pub mod error;
pub mod evidence;
pub mod hashing;
pub mod merkle;
pub mod storage;

pub use config::VaultConfig;
pub use error::{EvidenceError, Result};
pub use evidence::{EvidencePackage, EvidenceVault, EvidenceVerification};
