//! Signing round trips with persisted keys

mod common;

use common::shared_key_pair;
use evidence_vault::crypto::keys::{load_public_key, MIN_KEY_BITS};
use evidence_vault::crypto::{verify_package, KeyStore, SignatureManager, VerificationFailure};
use evidence_vault::hashing::to_canonical_string;
use evidence_vault::EvidenceError;
use proptest::prelude::*;
use serde_json::{json, Value};
use std::sync::OnceLock;
use tempfile::tempdir;

fn manager() -> &'static SignatureManager {
    static MANAGER: OnceLock<SignatureManager> = OnceLock::new();
    MANAGER.get_or_init(|| SignatureManager::new(shared_key_pair()).unwrap())
}

fn report() -> Value {
    json!({
        "record_id": "LAND_001",
        "analysis_result": {"is_fraudulent": true, "risk_score": 87.5, "flags": 3},
        "documents": ["deed_scan.pdf"],
    })
}

#[test]
fn test_persisted_key_signs_and_verifies() {
    let dir = tempdir().unwrap();
    let store = KeyStore::new(dir.path()).unwrap();
    store.generate_key_pair("landguard_main", MIN_KEY_BITS, false).unwrap();

    let signer = SignatureManager::new(store.load("landguard_main").unwrap()).unwrap();
    let package = signer
        .sign(&report(), "LandGuard System", "Automated Fraud Detector")
        .unwrap();

    // a verifier holding only the exported public key
    let exported = dir.path().join("distributed").join("landguard_public.pem");
    signer.export_public_key(&exported).unwrap();
    let trusted = load_public_key(&exported).unwrap();
    let result = verify_package(&package, Some(&trusted)).unwrap();
    assert!(result.is_valid);
    assert_eq!(result.signer_role, "Automated Fraud Detector");

    assert!(matches!(
        store.generate_key_pair("landguard_main", MIN_KEY_BITS, false),
        Err(EvidenceError::KeyExists(_))
    ));
}

#[test]
fn test_missing_key_never_signs() {
    let dir = tempdir().unwrap();
    let store = KeyStore::new(dir.path()).unwrap();
    assert!(matches!(
        store.load("landguard_main"),
        Err(EvidenceError::KeyNotFound(_))
    ));
}

#[test]
fn test_serialized_package_round_trip() {
    let package = manager().sign(&report(), "LandGuard System", "Detector").unwrap();
    let text = serde_json::to_string_pretty(&package).unwrap();
    assert!(manager().verify_json(&text).unwrap().is_valid);

    let tampered = text.replace("87.5", "12.5");
    let result = manager().verify_json(&tampered).unwrap();
    assert_eq!(result.reason, Some(VerificationFailure::SignatureMismatch));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_single_byte_mutation_invalidates(position in any::<prop::sample::Index>(), bit in 0u8..8) {
        let original = report();
        let package = manager().sign(&original, "LandGuard System", "Detector").unwrap();

        let mut bytes = to_canonical_string(&original).unwrap().into_bytes();
        let index = position.index(bytes.len());
        bytes[index] ^= 1 << bit;

        let mutated: Value = match std::str::from_utf8(&bytes).ok().and_then(|s| serde_json::from_str(s).ok()) {
            Some(value) => value,
            None => return Ok(()),
        };
        prop_assume!(mutated != original);

        let mut forged = package.clone();
        forged.report = mutated;
        let result = manager().verify(&forged).unwrap();
        prop_assert!(!result.is_valid);
        prop_assert_eq!(result.reason, Some(VerificationFailure::SignatureMismatch));
    }
}
