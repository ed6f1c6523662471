//! Signing Key Storage
//!
//! Generates, persists and loads RSA key pairs. Each identity is stored as
//! `<id>_private.pem` (PKCS#8, owner read/write only), `<id>_public.pem`
//! (SPKI) and `<id>_metadata.json`.

use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{ensure_safe_id, EvidenceError};

pub const MIN_KEY_BITS: usize = 1024;
pub const MAX_KEY_BITS: usize = 8192;
pub const DEFAULT_KEY_BITS: usize = 2048;

/// A loaded signing identity
#[derive(Clone)]
pub struct KeyPair {
    pub key_id: String,
    pub private_key: RsaPrivateKey,
    pub public_key: RsaPublicKey,
    pub created_at: DateTime<Utc>,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("key_id", &self.key_id)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

impl KeyPair {
    pub fn public_key_pem(&self) -> Result<String, EvidenceError> {
        public_key_pem(&self.public_key)
    }

    pub fn fingerprint(&self) -> Result<String, EvidenceError> {
        fingerprint(&self.public_key)
    }

    pub fn key_size(&self) -> usize {
        rsa::traits::PublicKeyParts::size(&self.public_key) * 8
    }
}

/// Key metadata stored next to the PEM files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyMetadata {
    pub key_id: String,
    pub algorithm: String,
    pub key_size: usize,
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
    pub private_key_path: PathBuf,
    pub public_key_path: PathBuf,
}

/// Directory of persisted key pairs
#[derive(Debug, Clone)]
pub struct KeyStore {
    keys_dir: PathBuf,
}

impl KeyStore {
    pub fn new(keys_dir: &Path) -> Result<Self, EvidenceError> {
        fs::create_dir_all(keys_dir)
            .map_err(|e| EvidenceError::io_context("Failed to create keys directory", e))?;
        restrict_permissions(keys_dir, 0o700)?;
        Ok(Self {
            keys_dir: keys_dir.to_path_buf(),
        })
    }

    pub fn keys_dir(&self) -> &Path {
        &self.keys_dir
    }

    pub fn private_key_path(&self, key_id: &str) -> PathBuf {
        self.keys_dir.join(format!("{}_private.pem", key_id))
    }

    pub fn public_key_path(&self, key_id: &str) -> PathBuf {
        self.keys_dir.join(format!("{}_public.pem", key_id))
    }

    pub fn metadata_path(&self, key_id: &str) -> PathBuf {
        self.keys_dir.join(format!("{}_metadata.json", key_id))
    }

    pub fn exists(&self, key_id: &str) -> bool {
        self.private_key_path(key_id).exists() || self.public_key_path(key_id).exists()
    }

    /// Generate and persist a new key pair.
    ///
    /// Fails with `KeyExists` if either key file is present and `overwrite` is false.
    pub fn generate_key_pair(
        &self,
        key_id: &str,
        key_size: usize,
        overwrite: bool,
    ) -> Result<KeyPair, EvidenceError> {
        ensure_safe_id("key", key_id)?;
        if self.exists(key_id) && !overwrite {
            return Err(EvidenceError::KeyExists(key_id.to_string()));
        }

        info!("Generating {}-bit RSA key pair {}", key_size, key_id);
        let private_key = generate_private_key(key_size)?;
        let public_key = RsaPublicKey::from(&private_key);

        let private_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| EvidenceError::Crypto(format!("Failed to encode private key: {}", e)))?;
        let public_pem = public_key_pem(&public_key)?;

        let private_path = self.private_key_path(key_id);
        let public_path = self.public_key_path(key_id);
        write_key_file(&private_path, private_pem.as_bytes(), 0o600, overwrite)?;
        write_key_file(&public_path, public_pem.as_bytes(), 0o644, overwrite)?;

        let created_at = Utc::now();
        let metadata = KeyMetadata {
            key_id: key_id.to_string(),
            algorithm: "RSA".to_string(),
            key_size,
            fingerprint: fingerprint(&public_key)?,
            created_at,
            private_key_path: private_path.clone(),
            public_key_path: public_path,
        };
        fs::write(
            self.metadata_path(key_id),
            serde_json::to_string_pretty(&metadata)?,
        )
        .map_err(|e| EvidenceError::io_context("Failed to write key metadata", e))?;

        info!("Key pair {} saved under {:?}", key_id, self.keys_dir);
        Ok(KeyPair {
            key_id: key_id.to_string(),
            private_key,
            public_key,
            created_at,
        })
    }

    /// Load a persisted key pair. A missing or unreadable private key is fatal.
    pub fn load(&self, key_id: &str) -> Result<KeyPair, EvidenceError> {
        ensure_safe_id("key", key_id)?;
        let private_path = self.private_key_path(key_id);
        if !private_path.exists() {
            return Err(EvidenceError::KeyNotFound(key_id.to_string()));
        }

        let private_pem = fs::read_to_string(&private_path).map_err(|e| {
            EvidenceError::KeyMaterial(format!("Cannot read private key {:?}: {}", private_path, e))
        })?;
        let private_key = RsaPrivateKey::from_pkcs8_pem(&private_pem).map_err(|e| {
            EvidenceError::KeyMaterial(format!("Cannot parse private key {:?}: {}", private_path, e))
        })?;
        let public_key = RsaPublicKey::from(&private_key);

        let public_path = self.public_key_path(key_id);
        if public_path.exists() {
            let stored = load_public_key(&public_path)?;
            if stored != public_key {
                return Err(EvidenceError::KeyMaterial(format!(
                    "Public key {:?} does not match private key",
                    public_path
                )));
            }
        } else {
            warn!("Public key for {} missing, deriving from private key", key_id);
        }

        let created_at = match self.metadata(key_id)? {
            Some(metadata) => metadata.created_at,
            None => fs::metadata(&private_path)
                .and_then(|m| m.modified())
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now()),
        };

        info!("Loaded key pair {}", key_id);
        Ok(KeyPair {
            key_id: key_id.to_string(),
            private_key,
            public_key,
            created_at,
        })
    }

    /// Load the identity, generating it only when no key files exist yet
    pub fn load_or_generate(&self, key_id: &str, key_size: usize) -> Result<KeyPair, EvidenceError> {
        if self.private_key_path(key_id).exists() {
            self.load(key_id)
        } else {
            self.generate_key_pair(key_id, key_size, false)
        }
    }

    pub fn metadata(&self, key_id: &str) -> Result<Option<KeyMetadata>, EvidenceError> {
        let path = self.metadata_path(key_id);
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&contents)?))
    }
}

pub fn generate_private_key(key_size: usize) -> Result<RsaPrivateKey, EvidenceError> {
    if !(MIN_KEY_BITS..=MAX_KEY_BITS).contains(&key_size) || key_size % 8 != 0 {
        return Err(EvidenceError::Crypto(format!(
            "Unsupported RSA key size: {} bits",
            key_size
        )));
    }
    RsaPrivateKey::new(&mut OsRng, key_size)
        .map_err(|e| EvidenceError::Crypto(format!("Key generation failed: {}", e)))
}

pub fn public_key_pem(public_key: &RsaPublicKey) -> Result<String, EvidenceError> {
    public_key
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| EvidenceError::Crypto(format!("Failed to encode public key: {}", e)))
}

pub fn parse_public_key_pem(pem: &str) -> Result<RsaPublicKey, EvidenceError> {
    RsaPublicKey::from_public_key_pem(pem)
        .map_err(|e| EvidenceError::KeyMaterial(format!("Invalid public key PEM: {}", e)))
}

pub fn load_public_key(path: &Path) -> Result<RsaPublicKey, EvidenceError> {
    let pem = fs::read_to_string(path).map_err(|e| {
        EvidenceError::KeyMaterial(format!("Cannot read public key {:?}: {}", path, e))
    })?;
    parse_public_key_pem(&pem)
}

/// SHA-256 of the DER-encoded public key
pub fn fingerprint(public_key: &RsaPublicKey) -> Result<String, EvidenceError> {
    let der = public_key
        .to_public_key_der()
        .map_err(|e| EvidenceError::Crypto(format!("Failed to encode public key: {}", e)))?;
    Ok(hex::encode(Sha256::digest(der.as_bytes())))
}

fn write_key_file(path: &Path, contents: &[u8], mode: u32, overwrite: bool) -> Result<(), EvidenceError> {
    let mut options = OpenOptions::new();
    options.write(true);
    if overwrite {
        options.create(true).truncate(true);
    } else {
        options.create_new(true);
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }

    let mut file = options
        .open(path)
        .map_err(|e| EvidenceError::io_context(&format!("Failed to create {:?}", path), e))?;
    file.write_all(contents)?;
    file.sync_all()?;

    // mode() only applies on creation
    restrict_permissions(path, mode)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path, mode: u32) -> Result<(), EvidenceError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .map_err(|e| EvidenceError::io_context(&format!("Failed to set permissions on {:?}", path), e))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path, _mode: u32) -> Result<(), EvidenceError> {
    Ok(())
}

/// One small key shared by every unit test; RSA generation dominates test time otherwise.
#[cfg(test)]
pub(crate) fn test_key_pair() -> KeyPair {
    use std::sync::OnceLock;
    static KEY: OnceLock<KeyPair> = OnceLock::new();
    KEY.get_or_init(|| {
        let private_key = generate_private_key(MIN_KEY_BITS).unwrap();
        KeyPair {
            key_id: "unit_test".to_string(),
            public_key: RsaPublicKey::from(&private_key),
            private_key,
            created_at: Utc::now(),
        }
    })
    .clone()
}
