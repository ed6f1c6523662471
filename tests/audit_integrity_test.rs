//! Audit trail tamper-detection tests

mod common;

use common::corrupt_audit_line;
use evidence_vault::audit::{
    verify_log_file, AuditEventType, AuditTrail, EventFilter, IntegrityIssue,
};
use evidence_vault::EvidenceError;
use serde_json::json;
use std::io::Write;
use tempfile::tempdir;

async fn land_001_trail(dir: &std::path::Path) -> AuditTrail {
    let trail = AuditTrail::open(dir).unwrap();
    trail
        .log_analysis_started("LAND_001", "suspicious_deed.pdf", Some("analyst_123"))
        .await
        .unwrap();
    trail
        .log_fraud_detected("LAND_001", 87.5, &"a".repeat(64), Some("analyst_123"))
        .await
        .unwrap();
    trail
        .log_analysis_completed(
            "LAND_001",
            &json!({"is_fraudulent": true, "risk_score": 87.5}),
            2.5,
            Some("analyst_123"),
        )
        .await
        .unwrap();
    trail
}

#[tokio::test]
async fn test_corrupted_event_hash_flags_that_sequence() {
    let dir = tempdir().unwrap();
    let trail = land_001_trail(dir.path()).await;
    assert!(trail.verify_integrity().await.unwrap().is_valid);

    corrupt_audit_line(trail.log_path(), 2, "event_hash", json!("b".repeat(64)));

    let report = trail.verify_integrity().await.unwrap();
    assert!(!report.is_valid);
    assert_eq!(report.total_entries, 3);
    assert_eq!(report.corrupted_sequences(), vec![2]);
    assert_eq!(
        report.corrupted_entries[0].reasons,
        vec![IntegrityIssue::EventHashMismatch]
    );
}

#[tokio::test]
async fn test_any_single_details_corruption_is_pinpointed() {
    for target in 1..=3 {
        let dir = tempdir().unwrap();
        let trail = land_001_trail(dir.path()).await;

        corrupt_audit_line(trail.log_path(), target, "details", json!({"tampered": true}));

        let report = trail.verify_integrity().await.unwrap();
        assert_eq!(
            report.corrupted_sequences(),
            vec![target as u64],
            "corrupting entry {} should flag only that entry",
            target
        );
    }
}

#[tokio::test]
async fn test_reopened_trail_continues_the_chain() {
    let dir = tempdir().unwrap();
    let head = {
        let trail = land_001_trail(dir.path()).await;
        trail.head_hash().await
    };

    let trail = AuditTrail::open(dir.path()).unwrap();
    assert_eq!(trail.next_sequence().await, 4);

    let entry = trail
        .append(AuditEventType::UserAction, "LAND_001", json!({"action": "reviewed"}), Some("judge_7"))
        .await
        .unwrap();
    assert_eq!(entry.sequence, 4);
    assert_eq!(entry.previous_hash, head);
    assert!(trail.verify_integrity().await.unwrap().is_valid);
}

#[tokio::test]
async fn test_history_filters_and_export() {
    let dir = tempdir().unwrap();
    let trail = land_001_trail(dir.path()).await;
    trail
        .log_analysis_started("LAND_002", "deed_2.pdf", None)
        .await
        .unwrap();

    let history = trail.get_history("LAND_001").await.unwrap();
    assert_eq!(history.len(), 3);
    assert!(history.windows(2).all(|w| w[0].sequence < w[1].sequence));

    let fraud = trail
        .events(&EventFilter {
            event_type: Some(AuditEventType::FraudDetected),
            ..EventFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(fraud.len(), 1);
    assert_eq!(fraud[0].detail_str("severity"), Some("CRITICAL"));

    let output = dir.path().join("exports").join("land_001.json");
    let exported = trail.export_json(&output, Some("LAND_001")).await.unwrap();
    assert_eq!(exported, 3);
    let parsed: Vec<serde_json::Value> =
        serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
    assert_eq!(parsed.len(), 3);

    let stats = trail.statistics().await.unwrap();
    assert_eq!(stats.total_entries, 4);
    assert_eq!(stats.unique_records, 2);
    assert_eq!(stats.actor_counts.get("analyst_123"), Some(&3));
}

#[tokio::test]
async fn test_unterminated_tail_blocks_further_appends() {
    let dir = tempdir().unwrap();
    let log_path = land_001_trail(dir.path()).await.log_path().to_path_buf();

    // a write cut short mid-line
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(&log_path)
        .unwrap();
    file.write_all(br#"{"sequence":4,"record_id":"LAND_002","det"#)
        .unwrap();
    drop(file);

    assert!(matches!(
        AuditTrail::open(dir.path()),
        Err(EvidenceError::AuditLog(_))
    ));

    let report = verify_log_file(&log_path).unwrap();
    assert_eq!(report.total_entries, 4);
    assert_eq!(report.corrupted_sequences(), vec![4]);
    assert_eq!(
        report.corrupted_entries[0].reasons,
        vec![IntegrityIssue::InvalidJson]
    );
}

#[tokio::test]
async fn test_float_details_survive_reopen() {
    let dir = tempdir().unwrap();
    {
        let trail = AuditTrail::open(dir.path()).unwrap();
        trail
            .log_fraud_detected("LAND_001", 99.61939237544027, &"c".repeat(64), None)
            .await
            .unwrap();
        trail
            .log_analysis_completed(
                "LAND_001",
                &json!({"is_fraudulent": true, "risk_score": 38.822687907887044}),
                0.1 + 0.2,
                None,
            )
            .await
            .unwrap();
    }

    let trail = AuditTrail::open(dir.path()).unwrap();
    let report = trail.verify_integrity().await.unwrap();
    assert!(report.is_valid, "{}", report.summary());
    let history = trail.get_history("LAND_001").await.unwrap();
    assert_eq!(history[0].details["risk_score"], json!(99.61939237544027));
}
