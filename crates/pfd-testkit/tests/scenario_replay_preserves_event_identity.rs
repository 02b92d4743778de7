//! Scenario: replay clones a terminal outbox row: same `event_id`, fresh
//! `id` and `delivery_id`, counters reset, source row untouched.
//!
//! Skipped when PFD_DATABASE_URL is unset.

use chrono::{TimeZone, Utc};
use pfd_db::outbox::{get_outbox_item, insert_outbox_item, OutboxItem};
use pfd_notify::{replay_dead_outbox, replay_outbox_item};
use pfd_schemas::hex_id;
use pfd_testkit::{db_guard, reset_tables, try_db_pool};
use serde_json::json;

fn outbox_row(status: &str) -> OutboxItem {
    let now = Utc.with_ymd_and_hms(2026, 2, 22, 12, 0, 0).unwrap();
    OutboxItem {
        id: hex_id(),
        event_id: Some(hex_id()),
        delivery_id: Some(hex_id()),
        replayed_from_id: None,
        event_type: "ALERT_FIRING".to_string(),
        alert_id: "fail_count_train".to_string(),
        policy_id: "fail_count_train".to_string(),
        severity: Some("HIGH".to_string()),
        source_name: Some("train".to_string()),
        payload_json: json!({"version": "v1"}),
        channel_type: "webhook".to_string(),
        channel_target: "ops".to_string(),
        status: status.to_string(),
        attempt_count: 3,
        max_attempts: 5,
        next_retry_at: now,
        last_error: Some("HTTP 503".to_string()),
        last_http_status: Some(503),
        last_error_code: Some("HTTP_ERROR".to_string()),
        created_at: now,
        updated_at: now,
        sent_at: (status == "SENT").then_some(now),
    }
}

#[tokio::test]
async fn replay_rotates_delivery_identity_and_keeps_event_id() {
    let _guard = db_guard().await;
    let Some(pool) = try_db_pool().await else {
        return;
    };
    reset_tables(&pool).await;

    let source = outbox_row("SENT");
    insert_outbox_item(&pool, &source).await.unwrap();

    let summary = replay_outbox_item(&pool, &source.id, "ops-admin").await.unwrap();
    assert_eq!(summary.replayed_count, 1);
    let clone = &summary.items[0];

    assert_ne!(clone.id, source.id);
    assert_eq!(clone.event_id, source.event_id);
    assert_ne!(clone.delivery_id, source.delivery_id);
    assert_eq!(clone.replayed_from_id.as_deref(), Some(source.id.as_str()));
    assert_eq!(clone.status, "PENDING");
    assert_eq!(clone.attempt_count, 0);
    assert!(clone.last_error.is_none());
    assert!(clone.sent_at.is_none());

    // The source row is untouched.
    let original = get_outbox_item(&pool, &source.id).await.unwrap().unwrap();
    assert_eq!(original.status, "SENT");
    assert_eq!(original.attempt_count, 3);
}

#[tokio::test]
async fn only_terminal_rows_are_replayable() {
    let _guard = db_guard().await;
    let Some(pool) = try_db_pool().await else {
        return;
    };
    reset_tables(&pool).await;

    let pending = outbox_row("PENDING");
    insert_outbox_item(&pool, &pending).await.unwrap();

    let err = replay_outbox_item(&pool, &pending.id, "ops-admin").await.unwrap_err();
    assert!(err.to_string().contains("is not replayable"));

    assert!(replay_outbox_item(&pool, "missing-id", "ops-admin").await.is_err());
}

#[tokio::test]
async fn replay_dead_covers_only_dead_rows() {
    let _guard = db_guard().await;
    let Some(pool) = try_db_pool().await else {
        return;
    };
    reset_tables(&pool).await;

    let dead_a = outbox_row("DEAD");
    let dead_b = outbox_row("DEAD");
    let sent = outbox_row("SENT");
    for row in [&dead_a, &dead_b, &sent] {
        insert_outbox_item(&pool, row).await.unwrap();
    }

    let summary = replay_dead_outbox(&pool, 50, "ops-admin").await.unwrap();
    assert_eq!(summary.replayed_count, 2);
    assert!(summary
        .items
        .iter()
        .all(|item| item.status == "PENDING" && item.attempt_count == 0));

    let replayed_sources: Vec<&str> = summary
        .items
        .iter()
        .filter_map(|item| item.replayed_from_id.as_deref())
        .collect();
    assert!(replayed_sources.contains(&dead_a.id.as_str()));
    assert!(replayed_sources.contains(&dead_b.id.as_str()));
    assert!(!replayed_sources.contains(&sent.id.as_str()));
}
