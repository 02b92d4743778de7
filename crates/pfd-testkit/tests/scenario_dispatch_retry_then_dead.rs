//! Scenario: retryable failures back off, then dead-letter at the attempt
//! cap, with a gapless attempt ledger.
//!
//! # Invariants under test
//!
//! 1. A 503 outcome marks the row RETRYING with `attempt_count = 1` and a
//!    strictly future `next_retry_at`; the ledger row finalises as RETRY.
//! 2. The second 503 marks the row DEAD at `attempt_count = max_attempts`.
//! 3. Ledger attempt numbers are gapless `[1, 2]` and `attempt_count`
//!    never exceeds `max_attempts`.
//! 4. Every delivery carries the id headers, and a configured secret
//!    produces a verifiable signature over `timestamp + "." + body`.
//!
//! Skipped when PFD_DATABASE_URL is unset.

use chrono::{Duration, TimeZone, Utc};
use pfd_db::attempts::list_attempts_for_outbox_item;
use pfd_db::outbox::{get_outbox_item, list_outbox_history};
use pfd_notify::{
    dispatch_due, enqueue_alert_transition, verify_signature, AlertTransition, DeliveryOutcome,
};
use pfd_testkit::{db_guard, reset_tables, try_db_pool, webhook_channel, ScriptedSender};
use serde_json::json;

fn resolved_transition() -> AlertTransition {
    AlertTransition {
        event_type: "ALERT_RESOLVED".to_string(),
        alert_id: "fail_count_train".to_string(),
        policy_id: "fail_count_train".to_string(),
        severity: Some("HIGH".to_string()),
        source_name: Some("train".to_string()),
        message: "train failures cleared".to_string(),
        current_value: Some(0.0),
        threshold: Some(0.0),
        previous_status: Some("FIRING".to_string()),
        current_status: Some("RESOLVED".to_string()),
        evaluated_at: Utc.with_ymd_and_hms(2026, 2, 22, 12, 0, 0).unwrap(),
        context: json!({"total_runs": 0}),
    }
}

#[tokio::test]
async fn http_503_retries_once_then_dead_letters() {
    let _guard = db_guard().await;
    let Some(pool) = try_db_pool().await else {
        return;
    };
    reset_tables(&pool).await;

    let channels = vec![webhook_channel("ops", 2, 1)];
    let now = Utc.with_ymd_and_hms(2026, 2, 22, 12, 0, 0).unwrap();

    let enqueued = enqueue_alert_transition(&pool, &channels, &resolved_transition(), now)
        .await
        .unwrap();
    assert_eq!(enqueued.enqueued_count, 1);
    let item_id = enqueued.items[0].id.clone();
    let event_id = enqueued.items[0].event_id.clone().unwrap();

    let sender = ScriptedSender::always(DeliveryOutcome::http_error(503));

    // Tick 1: retryable failure below the attempt cap.
    let summary = dispatch_due(&pool, &channels, &sender, 50, now, "system:scheduler")
        .await
        .unwrap();
    assert_eq!(summary.processed_count, 1);
    assert_eq!(summary.retrying_count, 1);
    assert_eq!(summary.sent_count, 0);

    let item = get_outbox_item(&pool, &item_id).await.unwrap().unwrap();
    assert_eq!(item.status, "RETRYING");
    assert_eq!(item.attempt_count, 1);
    assert_eq!(item.last_http_status, Some(503));
    assert_eq!(item.last_error_code.as_deref(), Some("HTTP_ERROR"));
    assert!(item.next_retry_at > now, "retry timing must move forward");

    let attempts = list_attempts_for_outbox_item(&pool, &item_id).await.unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].attempt_number, 1);
    assert_eq!(attempts[0].attempt_status, "RETRY");
    assert_eq!(attempts[0].http_status, Some(503));
    assert!(attempts[0].completed_at.is_some());
    assert!(attempts[0].duration_ms.unwrap_or(-1) >= 0);

    // Tick 2, past next_retry_at: the cap is reached, row dead-letters.
    let later = now + Duration::seconds(10);
    let summary = dispatch_due(&pool, &channels, &sender, 50, later, "system:scheduler")
        .await
        .unwrap();
    assert_eq!(summary.dead_count, 1);

    let item = get_outbox_item(&pool, &item_id).await.unwrap().unwrap();
    assert_eq!(item.status, "DEAD");
    assert_eq!(item.attempt_count, 2);
    assert!(item.attempt_count <= item.max_attempts);

    let attempts = list_attempts_for_outbox_item(&pool, &item_id).await.unwrap();
    let numbers: Vec<i32> = attempts.iter().map(|a| a.attempt_number).collect();
    assert_eq!(numbers, vec![1, 2], "ledger must stay gapless");
    assert_eq!(attempts[1].attempt_status, "DEAD");

    // Both attempts carried the same event id, distinct delivery ids.
    let requests = sender.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests.iter().all(|(_, r)| r.event_id == event_id));
    assert_ne!(requests[0].1.delivery_id, requests[1].1.delivery_id);

    // A dead row no longer shows up as due.
    let summary = dispatch_due(&pool, &channels, &sender, 50, later + Duration::hours(1), "x")
        .await
        .unwrap();
    assert_eq!(summary.processed_count, 0);
}

#[tokio::test]
async fn non_retryable_4xx_dead_letters_immediately() {
    let _guard = db_guard().await;
    let Some(pool) = try_db_pool().await else {
        return;
    };
    reset_tables(&pool).await;

    let channels = vec![webhook_channel("ops", 5, 30)];
    let now = Utc.with_ymd_and_hms(2026, 2, 22, 12, 0, 0).unwrap();
    enqueue_alert_transition(&pool, &channels, &resolved_transition(), now)
        .await
        .unwrap();

    let sender = ScriptedSender::always(DeliveryOutcome::http_error(422));
    let summary = dispatch_due(&pool, &channels, &sender, 50, now, "system").await.unwrap();
    assert_eq!(summary.dead_count, 1);
    assert_eq!(summary.retrying_count, 0);

    let dead = list_outbox_history(&pool, 10, &["DEAD"]).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].attempt_count, 1);
}

#[tokio::test]
async fn unknown_channel_dead_letters_with_channel_unavailable() {
    let _guard = db_guard().await;
    let Some(pool) = try_db_pool().await else {
        return;
    };
    reset_tables(&pool).await;

    let enqueue_channels = vec![webhook_channel("ops", 3, 1)];
    let now = Utc.with_ymd_and_hms(2026, 2, 22, 12, 0, 0).unwrap();
    enqueue_alert_transition(&pool, &enqueue_channels, &resolved_transition(), now)
        .await
        .unwrap();

    // Dispatch with a channel map that no longer knows "ops".
    let sender = ScriptedSender::new(Vec::new());
    let summary = dispatch_due(&pool, &[], &sender, 50, now, "system").await.unwrap();
    assert_eq!(summary.dead_count, 1);
    assert_eq!(sender.request_count(), 0, "no HTTP call for unavailable channels");

    let dead = list_outbox_history(&pool, 10, &["DEAD"]).await.unwrap();
    assert_eq!(dead[0].last_error_code.as_deref(), Some("CHANNEL_UNAVAILABLE"));

    let attempts = list_attempts_for_outbox_item(&pool, &dead[0].id).await.unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].attempt_status, "DEAD");
    assert_eq!(attempts[0].error_code.as_deref(), Some("CHANNEL_UNAVAILABLE"));
}

#[tokio::test]
async fn configured_secret_signs_requests_verifiably() {
    let _guard = db_guard().await;
    let Some(pool) = try_db_pool().await else {
        return;
    };
    reset_tables(&pool).await;

    const SECRET_ENV: &str = "PFD_TEST_WEBHOOK_SECRET";
    const SECRET: &str = "super-secret-token";
    std::env::set_var(SECRET_ENV, SECRET);

    let mut channel = webhook_channel("ops", 3, 1);
    channel.signing_secret_env = Some(SECRET_ENV.to_string());
    let channels = vec![channel];

    let now = Utc.with_ymd_and_hms(2026, 2, 22, 12, 0, 0).unwrap();
    enqueue_alert_transition(&pool, &channels, &resolved_transition(), now)
        .await
        .unwrap();

    let sender = ScriptedSender::new(vec![DeliveryOutcome::success(200)]);
    let summary = dispatch_due(&pool, &channels, &sender, 50, now, "system").await.unwrap();
    assert_eq!(summary.sent_count, 1);

    let requests = sender.requests();
    let request = &requests[0].1;
    let signature = request.signature.as_deref().expect("request is signed");
    assert!(verify_signature(&request.timestamp, &request.body, signature, SECRET));
    assert!(!verify_signature(&request.timestamp, &request.body, signature, "wrong"));

    // The body's delivery block matches the id headers.
    let payload: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
    assert_eq!(payload["event_id"].as_str().unwrap(), request.event_id);
    assert_eq!(
        payload["delivery"]["delivery_id"].as_str().unwrap(),
        request.delivery_id
    );
    assert_eq!(payload["version"], "v1");
    assert_eq!(payload["alert"]["previous_status"], "FIRING");
}
