//! Vault configuration
//!
//! Defaults, then an optional TOML file, then `EVIDENCE_VAULT__*`
//! environment overrides (e.g. `EVIDENCE_VAULT__IPFS__ENABLED=true`).

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::crypto::keys::{MAX_KEY_BITS, MIN_KEY_BITS};
use crate::error::{ensure_safe_id, EvidenceError};

pub const ENV_PREFIX: &str = "EVIDENCE_VAULT";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub storage_dir: PathBuf,
    pub key_id: String,
    pub key_size: usize,
    pub signer_name: String,
    pub signer_role: String,
    pub upload_timeout_secs: u64,
    pub ipfs: IpfsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IpfsConfig {
    pub enabled: bool,
    pub api_url: String,
    pub gateway_url: String,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("blockchain/storage"),
            key_id: "landguard_main".to_string(),
            key_size: 2048,
            signer_name: "LandGuard System".to_string(),
            signer_role: "Automated Fraud Detector".to_string(),
            upload_timeout_secs: 30,
            ipfs: IpfsConfig::default(),
        }
    }
}

impl Default for IpfsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_url: "https://api.pinata.cloud".to_string(),
            gateway_url: "https://gateway.pinata.cloud/ipfs".to_string(),
            api_key: None,
            api_secret: None,
        }
    }
}

impl VaultConfig {
    /// Load configuration, optionally layering a TOML file under the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, EvidenceError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            info!("Loading vault configuration from {:?}", path);
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let mut config: VaultConfig = builder
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| EvidenceError::Config(format!("Failed to load configuration: {}", e)))?;

        // Pinata credentials are usually provisioned as plain env vars.
        if config.ipfs.api_key.is_none() {
            config.ipfs.api_key = env::var("PINATA_API_KEY").ok();
        }
        if config.ipfs.api_secret.is_none() {
            config.ipfs.api_secret = env::var("PINATA_SECRET_API_KEY").ok();
        }

        config.validate()?;
        debug!("Vault configuration: {:?}", config.redacted());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EvidenceError> {
        ensure_safe_id("key", &self.key_id)
            .map_err(|e| EvidenceError::Config(format!("key_id: {}", e)))?;

        if !(MIN_KEY_BITS..=MAX_KEY_BITS).contains(&self.key_size) || self.key_size % 8 != 0 {
            return Err(EvidenceError::Config(format!(
                "key_size {} must be a multiple of 8 between {} and {}",
                self.key_size, MIN_KEY_BITS, MAX_KEY_BITS
            )));
        }

        if self.upload_timeout_secs == 0 {
            return Err(EvidenceError::Config(
                "upload_timeout_secs must be greater than zero".to_string(),
            ));
        }

        if self.ipfs.enabled && self.ipfs.api_url.trim().is_empty() {
            return Err(EvidenceError::Config(
                "ipfs.api_url is required when ipfs is enabled".to_string(),
            ));
        }

        Ok(())
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }

    pub fn audit_dir(&self) -> PathBuf {
        self.storage_dir.join("audit_logs")
    }

    pub fn keys_dir(&self) -> PathBuf {
        self.storage_dir.join("signatures")
    }

    pub fn batches_dir(&self) -> PathBuf {
        self.storage_dir.join("batches")
    }

    pub fn evidence_dir(&self) -> PathBuf {
        self.storage_dir.join("evidence")
    }

    pub fn local_store_dir(&self) -> PathBuf {
        self.evidence_dir().join("local")
    }

    /// Copy safe to log.
    fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.ipfs.api_key.is_some() {
            copy.ipfs.api_key = Some("***".to_string());
        }
        if copy.ipfs.api_secret.is_some() {
            copy.ipfs.api_secret = Some("***".to_string());
        }
        copy
    }
}
