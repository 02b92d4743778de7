//! Scenario: the artifact gateway confines every read to the allowed root.
//!
//! Purely filesystem-backed (no database, no network). Each test builds
//! its own temp tree and gateway, so nothing here touches process env.

use chrono::{TimeZone, Utc};
use pfd_artifacts::{ArtifactGateway, ArtifactKind};
use pfd_schemas::DiagnosticsError;
use pfd_testkit::{record_with_artifacts, ArtifactTree};
use serde_json::json;

fn t0() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 22, 10, 0, 0).unwrap()
}

fn assert_access_denied(err: &anyhow::Error) {
    match err.downcast_ref::<DiagnosticsError>() {
        Some(DiagnosticsError::Access(_)) => {}
        other => panic!("expected Access error, got {other:?}"),
    }
}

#[test]
fn traversal_in_report_path_is_forbidden_without_opening_anything() {
    let tree = ArtifactTree::new();
    let gateway = tree.gateway();

    let mut record = record_with_artifacts(&tree, "run-1", "train", t0());
    record.validation_report_path = Some("../../../../etc/passwd".to_string());

    let err = gateway
        .load_artifact_json(&record, ArtifactKind::Validation)
        .unwrap_err();
    assert_access_denied(&err);

    // The descriptor path fails the same way; confinement happens before
    // any existence check.
    let err = gateway
        .resolve_descriptor(&record, ArtifactKind::Validation)
        .unwrap_err();
    assert_access_denied(&err);
}

#[test]
fn artifact_dir_outside_allowed_root_is_forbidden() {
    let tree = ArtifactTree::new();
    let outside = tempfile::tempdir().unwrap();
    let gateway = tree.gateway();

    let mut record = record_with_artifacts(&tree, "run-1", "train", t0());
    record.artifact_dir = Some(outside.path().display().to_string());

    let err = gateway
        .resolve_descriptor(&record, ArtifactKind::Manifest)
        .unwrap_err();
    assert_access_denied(&err);
}

#[test]
fn absolute_summary_path_outside_the_artifact_dir_is_forbidden() {
    let tree = ArtifactTree::new();
    let gateway = tree.gateway();

    // A sibling run directory inside the allowed root is still outside this
    // record's registered artifact dir.
    let other_dir = tree.run_dir("run-other", "train");
    let planted = tree.write_json(&other_dir, "semantic_report.json", &json!({"rules": []}));

    let mut record = record_with_artifacts(&tree, "run-1", "train", t0());
    record.summary_json = json!({"paths": {"semantic_report_path": planted.display().to_string()}});

    let err = gateway
        .load_artifact_json(&record, ArtifactKind::Semantic)
        .unwrap_err();
    assert_access_denied(&err);
}

#[test]
fn missing_artifact_is_not_found_and_parse_failures_are_payload_errors() {
    let tree = ArtifactTree::new();
    let gateway = tree.gateway();
    let record = record_with_artifacts(&tree, "run-1", "train", t0());

    let err = gateway
        .load_artifact_json(&record, ArtifactKind::Validation)
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DiagnosticsError>(),
        Some(DiagnosticsError::NotFound(_))
    ));

    let dir = tree.run_dir("run-1", "train");
    std::fs::write(dir.join("validation_report.json"), "not json at all").unwrap();
    let err = gateway
        .load_artifact_json(&record, ArtifactKind::Validation)
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DiagnosticsError>(),
        Some(DiagnosticsError::Payload(_))
    ));

    // A JSON array root is equally a payload error.
    std::fs::write(dir.join("validation_report.json"), "[1, 2, 3]").unwrap();
    let err = gateway
        .load_artifact_json(&record, ArtifactKind::Validation)
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DiagnosticsError>(),
        Some(DiagnosticsError::Payload(_))
    ));
}

#[test]
fn semantic_falls_back_to_manifest_then_preflight_blocks() {
    let tree = ArtifactTree::new();
    let gateway = tree.gateway();
    let record = record_with_artifacts(&tree, "run-1", "train", t0());
    let dir = tree.run_dir("run-1", "train");

    // No standalone semantic report; the manifest carries the block.
    tree.write_json(
        &dir,
        "manifest.json",
        &json!({"validation_status": "PASS", "semantic_quality": {"rules": [
            {"rule_id": "rule_x", "status": "FAIL", "rule_type": "range", "severity": "FAIL", "message": "out of range"}
        ]}}),
    );

    let (payload, path) = gateway.load_semantic_with_fallback(&record).unwrap();
    assert!(path.ends_with("manifest.json"));
    assert_eq!(payload["rules"][0]["rule_id"], "rule_x");

    // A standalone report takes precedence once it exists.
    tree.write_semantic_report(&dir, &[("rule_y", "WARN")]);
    let (payload, path) = gateway.load_semantic_with_fallback(&record).unwrap();
    assert!(path.ends_with("semantic_report.json"));
    assert_eq!(payload["rules"][0]["rule_id"], "rule_y");
}

#[test]
fn listing_reports_availability_sizes_and_content_types() {
    let tree = ArtifactTree::new();
    let gateway = tree.gateway();
    let record = record_with_artifacts(&tree, "run-1", "train", t0());
    let dir = tree.run_dir("run-1", "train");
    tree.write_semantic_report(&dir, &[("rule_x", "FAIL")]);
    std::fs::write(dir.join("unified.csv"), "date,store,sales\n").unwrap();

    let items = gateway.list_artifacts(&record).unwrap();
    assert_eq!(items.len(), 5);

    let semantic = items.iter().find(|i| i.artifact_type == "semantic").unwrap();
    assert!(semantic.available);
    assert!(semantic.size_bytes.unwrap() > 0);
    assert_eq!(semantic.content_type, "application/json");
    assert!(semantic.download_url.as_deref().unwrap().ends_with("/download/semantic"));

    let unified = items.iter().find(|i| i.artifact_type == "unified_csv").unwrap();
    assert!(unified.available);
    assert_eq!(unified.content_type, "text/csv; charset=utf-8");

    let validation = items.iter().find(|i| i.artifact_type == "validation").unwrap();
    assert!(!validation.available);
    assert!(validation.download_url.is_none());
}

#[test]
fn rule_rollup_aggregates_warn_and_fail_across_records() {
    let tree = ArtifactTree::new();
    let gateway = tree.gateway();

    let record_a = record_with_artifacts(&tree, "run-1", "train", t0());
    tree.write_semantic_report(
        &tree.run_dir("run-1", "train"),
        &[("rule_x", "FAIL"), ("rule_y", "WARN")],
    );

    let later = Utc.with_ymd_and_hms(2026, 2, 23, 10, 0, 0).unwrap();
    let record_b = record_with_artifacts(&tree, "run-2", "train", later);
    tree.write_semantic_report(
        &tree.run_dir("run-2", "train"),
        &[("rule_x", "FAIL"), ("rule_x", "PASS")],
    );

    // A record without artifacts is skipped, not fatal.
    let record_c = pfd_testkit::base_record("run-3", "train", later);

    let counts = gateway
        .collect_rule_counts(&[record_a, record_b, record_c])
        .unwrap();
    assert_eq!(counts["rule_x"].fail_count, 2);
    assert_eq!(counts["rule_y"].warn_count, 1);
    assert_eq!(counts["rule_x"].last_seen_at.unwrap(), later);
    assert!(counts["rule_x"].sample_message.is_some());
    assert!(!counts.contains_key("rule_z"));
}
