//! Scenario: registry upserts repair in place and run aggregation is
//! worst-of across member records.
//!
//! Skipped when PFD_DATABASE_URL is unset.

use chrono::{Duration, TimeZone, Utc};
use pfd_db::registry::{get_latest, get_run, insert_record, list_runs, query_runs, RunFilter};
use pfd_testkit::{base_record, db_guard, failing_record, reset_tables, try_db_pool};

#[tokio::test]
async fn run_aggregation_is_worst_of_members() {
    let _guard = db_guard().await;
    let Some(pool) = try_db_pool().await else {
        return;
    };
    reset_tables(&pool).await;

    let t0 = Utc.with_ymd_and_hms(2026, 2, 22, 10, 0, 0).unwrap();
    insert_record(&pool, &base_record("run-1", "train", t0)).await.unwrap();

    let mut store = failing_record("run-1", "store", t0);
    store.blocked = true;
    store.block_reason = Some("validation failed in enforce mode".to_string());
    insert_record(&pool, &store).await.unwrap();

    let run = get_run(&pool, "run-1").await.unwrap().unwrap();
    assert_eq!(run.final_status, "FAIL");
    assert!(run.blocked);
    assert_eq!(run.records.len(), 2);
    // Members come back in source order.
    assert_eq!(run.records[0].source_name, "store");
    assert_eq!(run.records[1].source_name, "train");

    // Every blocked record is an enforce-mode FAIL.
    for record in &run.records {
        if record.blocked {
            assert_eq!(record.mode, "enforce");
            assert_eq!(record.final_status, "FAIL");
            assert!(record.block_reason.is_some());
        }
    }

    assert!(get_run(&pool, "missing-run").await.unwrap().is_none());
}

#[tokio::test]
async fn upsert_repairs_the_same_composite_key_in_place() {
    let _guard = db_guard().await;
    let Some(pool) = try_db_pool().await else {
        return;
    };
    reset_tables(&pool).await;

    let t0 = Utc.with_ymd_and_hms(2026, 2, 22, 10, 0, 0).unwrap();
    insert_record(&pool, &failing_record("run-2", "train", t0)).await.unwrap();

    // Second write for the same (run_id, source) repairs, not duplicates.
    let mut repaired = base_record("run-2", "train", t0);
    repaired.summary_json = serde_json::json!({"paths": {"manifest_path": "manifest.json"}});
    insert_record(&pool, &repaired).await.unwrap();

    let run = get_run(&pool, "run-2").await.unwrap().unwrap();
    assert_eq!(run.records.len(), 1);
    assert_eq!(run.final_status, "PASS");
    assert_eq!(
        run.records[0].summary_json["paths"]["manifest_path"],
        "manifest.json"
    );
}

#[tokio::test]
async fn filters_and_latest_lookups() {
    let _guard = db_guard().await;
    let Some(pool) = try_db_pool().await else {
        return;
    };
    reset_tables(&pool).await;

    let t0 = Utc.with_ymd_and_hms(2026, 2, 20, 10, 0, 0).unwrap();
    for (run_id, source, offset_hours, status) in [
        ("run-a", "train", 0i64, "PASS"),
        ("run-b", "train", 24, "FAIL"),
        ("run-c", "store", 48, "WARN"),
    ] {
        let mut record = base_record(run_id, source, t0 + Duration::hours(offset_hours));
        record.final_status = status.to_string();
        record.validation_status = status.to_string();
        record.data_source_id = Some(7);
        insert_record(&pool, &record).await.unwrap();
    }

    let train_only = list_runs(&pool, 20, Some("train"), None).await.unwrap();
    assert_eq!(train_only.len(), 2);
    assert_eq!(train_only[0].run_id, "run-b", "latest first");

    let failed = query_runs(
        &pool,
        &RunFilter {
            final_status: Some("FAIL".to_string()),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].run_id, "run-b");

    let windowed = query_runs(
        &pool,
        &RunFilter {
            date_from: Some(t0 + Duration::hours(12)),
            date_to: Some(t0 + Duration::hours(36)),
            ascending: true,
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(windowed.len(), 1);
    assert_eq!(windowed[0].run_id, "run-b");

    let latest = get_latest(&pool, None, None).await.unwrap().unwrap();
    assert_eq!(latest.run_id, "run-c");
    let latest_train = get_latest(&pool, Some("train"), Some(7)).await.unwrap().unwrap();
    assert_eq!(latest_train.run_id, "run-b");
}
