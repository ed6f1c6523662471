//! Digital Signatures
//!
//! RSA-PSS (SHA-256, MGF1-SHA-256) signing of evidence reports. The signed
//! bytes are the canonical serialization of the report together with the
//! signer identity, timestamp and package version.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rsa::pss::{Signature, SigningKey, VerifyingKey};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::RsaPublicKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::crypto::keys::{parse_public_key_pem, KeyPair};
use crate::error::EvidenceError;
use crate::hashing::to_canonical_bytes;

pub const SIGNATURE_ALGORITHM: &str = "RSA-PSS-SHA256";
pub const PACKAGE_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureBlock {
    /// Base64 (standard alphabet) signature bytes
    pub signature_value: String,
    pub algorithm: String,
    pub signer_name: String,
    pub signer_role: String,
    pub signed_at: DateTime<Utc>,
    pub key_id: String,
    pub public_key_pem: String,
}

/// A report together with its detached signature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedPackage {
    pub report: Value,
    pub signature: SignatureBlock,
    pub version: String,
}

#[derive(Serialize)]
struct SigningEnvelope<'a> {
    report: &'a Value,
    signer_name: &'a str,
    signer_role: &'a str,
    signed_at: &'a DateTime<Utc>,
    version: &'a str,
}

impl SignedPackage {
    fn signed_bytes(&self) -> Result<Vec<u8>, EvidenceError> {
        to_canonical_bytes(&SigningEnvelope {
            report: &self.report,
            signer_name: &self.signature.signer_name,
            signer_role: &self.signature.signer_role,
            signed_at: &self.signature.signed_at,
            version: &self.version,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationFailure {
    MissingSignature,
    UnsupportedAlgorithm,
    UndecodableSignature,
    UntrustedKey,
    SignatureMismatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureVerification {
    pub is_valid: bool,
    pub signer_name: String,
    pub signer_role: String,
    pub signed_at: DateTime<Utc>,
    pub algorithm: String,
    pub reason: Option<VerificationFailure>,
    pub verified_at: DateTime<Utc>,
}

impl SignatureVerification {
    fn new(package: &SignedPackage, reason: Option<VerificationFailure>) -> Self {
        Self {
            is_valid: reason.is_none(),
            signer_name: package.signature.signer_name.clone(),
            signer_role: package.signature.signer_role.clone(),
            signed_at: package.signature.signed_at,
            algorithm: package.signature.algorithm.clone(),
            reason,
            verified_at: Utc::now(),
        }
    }
}

pub struct SignatureManager {
    key_pair: KeyPair,
    signing_key: SigningKey<Sha256>,
    public_key_pem: String,
}

impl SignatureManager {
    pub fn new(key_pair: KeyPair) -> Result<Self, EvidenceError> {
        let public_key_pem = key_pair.public_key_pem()?;
        let signing_key = SigningKey::<Sha256>::new(key_pair.private_key.clone());
        Ok(Self {
            key_pair,
            signing_key,
            public_key_pem,
        })
    }

    pub fn key_id(&self) -> &str {
        &self.key_pair.key_id
    }

    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    pub fn public_key_pem(&self) -> &str {
        &self.public_key_pem
    }

    /// Sign a serializable report
    pub fn sign<T: Serialize + ?Sized>(
        &self,
        report: &T,
        signer_name: &str,
        signer_role: &str,
    ) -> Result<SignedPackage, EvidenceError> {
        let mut package = SignedPackage {
            report: serde_json::to_value(report)?,
            signature: SignatureBlock {
                signature_value: String::new(),
                algorithm: SIGNATURE_ALGORITHM.to_string(),
                signer_name: signer_name.to_string(),
                signer_role: signer_role.to_string(),
                signed_at: Utc::now(),
                key_id: self.key_pair.key_id.clone(),
                public_key_pem: self.public_key_pem.clone(),
            },
            version: PACKAGE_VERSION.to_string(),
        };

        let message = package.signed_bytes()?;
        let signature = self
            .signing_key
            .try_sign_with_rng(&mut OsRng, &message)
            .map_err(|e| EvidenceError::Crypto(format!("Signing failed: {}", e)))?;
        package.signature.signature_value = STANDARD.encode(signature.to_bytes());

        debug!("Signed report as {} ({})", signer_name, signer_role);
        Ok(package)
    }

    /// Verify a package against this manager's own public key
    pub fn verify(&self, package: &SignedPackage) -> Result<SignatureVerification, EvidenceError> {
        verify_package(package, Some(&self.key_pair.public_key))
    }

    /// Parse and verify a serialized package
    pub fn verify_json(&self, text: &str) -> Result<SignatureVerification, EvidenceError> {
        let package: SignedPackage = serde_json::from_str(text)
            .map_err(|e| EvidenceError::MalformedPackage(e.to_string()))?;
        self.verify(&package)
    }

    /// Write the public key (SPKI PEM) for distribution to verifiers
    pub fn export_public_key(&self, path: &Path) -> Result<(), EvidenceError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, &self.public_key_pem)
            .map_err(|e| EvidenceError::io_context("Failed to export public key", e))?;
        info!("Exported public key {} to {:?}", self.key_pair.key_id, path);
        Ok(())
    }
}

/// Verify a package.
///
/// With `trusted` set, the embedded public key must equal it. Without it the
/// embedded key is taken at its word, which only proves internal consistency.
pub fn verify_package(
    package: &SignedPackage,
    trusted: Option<&RsaPublicKey>,
) -> Result<SignatureVerification, EvidenceError> {
    let block = &package.signature;
    let fail = |reason| {
        warn!("Signature verification failed: {:?}", reason);
        Ok(SignatureVerification::new(package, Some(reason)))
    };

    if block.signature_value.is_empty() {
        return fail(VerificationFailure::MissingSignature);
    }
    if block.algorithm != SIGNATURE_ALGORITHM {
        return fail(VerificationFailure::UnsupportedAlgorithm);
    }

    let declared = parse_public_key_pem(&block.public_key_pem)
        .map_err(|e| EvidenceError::MalformedPackage(e.to_string()))?;
    if let Some(trusted) = trusted {
        if &declared != trusted {
            return fail(VerificationFailure::UntrustedKey);
        }
    }

    let signature = match STANDARD
        .decode(&block.signature_value)
        .ok()
        .and_then(|bytes| Signature::try_from(bytes.as_slice()).ok())
    {
        Some(signature) => signature,
        None => return fail(VerificationFailure::UndecodableSignature),
    };

    let message = package.signed_bytes()?;
    match VerifyingKey::<Sha256>::new(declared).verify(&message, &signature) {
        Ok(()) => {
            debug!("Signature by {} verified", block.signer_name);
            Ok(SignatureVerification::new(package, None))
        }
        Err(_) => fail(VerificationFailure::SignatureMismatch),
    }
}
