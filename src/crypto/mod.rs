//! Cryptographic Identity
//!
//! RSA key storage and RSA-PSS signing of evidence reports.

pub mod keys;
pub mod signatures;

pub use keys::{KeyMetadata, KeyPair, KeyStore, DEFAULT_KEY_BITS, MAX_KEY_BITS, MIN_KEY_BITS};
pub use signatures::{
    verify_package, SignatureBlock, SignatureManager, SignatureVerification, SignedPackage,
    VerificationFailure, PACKAGE_VERSION, SIGNATURE_ALGORITHM,
};
