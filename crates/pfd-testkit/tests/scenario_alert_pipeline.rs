//! Scenario: pending → firing → resolved, end to end against Postgres.
//!
//! # Invariants under test
//!
//! 1. A breach below the pending window persists PENDING with
//!    `consecutive_breaches = 1` and enqueues nothing.
//! 2. The breach crossing the pending window flips the state to FIRING and
//!    enqueues exactly one ALERT_FIRING row per enabled channel.
//! 3. Repeated FIRING ticks add neither history nor outbox rows.
//! 4. Clearing from FIRING removes the state row, appends a RESOLVED
//!    history row, and enqueues exactly one ALERT_RESOLVED row.
//! 5. Re-evaluating a quiet policy changes nothing.
//!
//! Skipped when PFD_DATABASE_URL is unset.

use std::path::PathBuf;

use chrono::{DateTime, Duration, TimeZone, Utc};
use pfd_config::{AlertPolicy, PolicyDocument};
use pfd_db::alerts::{get_alert_state, list_alert_history};
use pfd_db::outbox::list_outbox_history;
use pfd_db::registry::insert_record;
use pfd_schemas::{CompareOp, MetricType};
use pfd_testkit::{db_guard, failing_record, reset_tables, try_db_pool, webhook_channel};

fn fail_count_train_policy() -> AlertPolicy {
    AlertPolicy {
        id: "fail_count_train".to_string(),
        enabled: true,
        severity: "HIGH".to_string(),
        source_name: Some("train".to_string()),
        window_days: 7,
        metric_type: MetricType::FailCount,
        operator: CompareOp::Gt,
        threshold: 0.0,
        pending_evaluations: 2,
        rule_id: None,
        description: "train failures observed".to_string(),
    }
}

fn document(policy: AlertPolicy) -> PolicyDocument {
    PolicyDocument {
        version: "v1".to_string(),
        path: PathBuf::from("inline-policies.yaml"),
        policies: vec![policy],
    }
}

fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 22, hour, 0, 0).unwrap()
}

#[tokio::test]
async fn pending_to_firing_to_resolved_enqueues_one_notification_per_edge() {
    let _guard = db_guard().await;
    let Some(pool) = try_db_pool().await else {
        return;
    };
    reset_tables(&pool).await;

    let channels = vec![webhook_channel("ops", 5, 30)];
    let doc = document(fail_count_train_policy());

    insert_record(&pool, &failing_record("run-1", "train", at(10)))
        .await
        .unwrap();

    // Tick 1 at 11:00: first breach goes PENDING, nothing enqueued.
    let summary = pfd_alerts::evaluate_policies(&pool, &doc, &channels, at(11), "system")
        .await
        .unwrap();
    assert_eq!(summary.items[0].status, "PENDING");

    let state = get_alert_state(&pool, "fail_count_train").await.unwrap().unwrap();
    assert_eq!(state.status, "PENDING");
    assert_eq!(state.consecutive_breaches, 1);

    let history = list_alert_history(&pool, 50).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, "PENDING");

    let queued = list_outbox_history(&pool, 50, &["PENDING", "RETRYING"]).await.unwrap();
    assert!(queued.is_empty(), "no notification before FIRING");

    // Tick 2 at 12:00: crosses pending_evaluations, enqueues exactly one
    // ALERT_FIRING row for the one enabled channel.
    let summary = pfd_alerts::evaluate_policies(&pool, &doc, &channels, at(12), "system")
        .await
        .unwrap();
    assert_eq!(summary.items[0].status, "FIRING");
    assert_eq!(summary.active_count, 1);

    let state = get_alert_state(&pool, "fail_count_train").await.unwrap().unwrap();
    assert_eq!(state.status, "FIRING");
    assert_eq!(state.consecutive_breaches, 2);

    let history = list_alert_history(&pool, 50).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].status, "FIRING");

    let queued = list_outbox_history(&pool, 50, &["PENDING"]).await.unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].event_type, "ALERT_FIRING");
    assert_eq!(queued[0].channel_target, "ops");
    let firing_event_id = queued[0].event_id.clone().unwrap();

    // Tick 3 at 13:00. FIRING stays FIRING: no new history, no new outbox.
    pfd_alerts::evaluate_policies(&pool, &doc, &channels, at(13), "system")
        .await
        .unwrap();
    let state = get_alert_state(&pool, "fail_count_train").await.unwrap().unwrap();
    assert_eq!(state.consecutive_breaches, 3);
    assert_eq!(list_alert_history(&pool, 50).await.unwrap().len(), 2);
    assert_eq!(
        list_outbox_history(&pool, 50, &["PENDING"]).await.unwrap().len(),
        1,
        "repeated FIRING must not enqueue duplicates"
    );

    // The failing record ages out of the 7-day window, so the alert resolves
    // with exactly one ALERT_RESOLVED row.
    let later = at(12) + Duration::days(8);
    let summary = pfd_alerts::evaluate_policies(&pool, &doc, &channels, later, "system")
        .await
        .unwrap();
    assert_eq!(summary.items[0].status, "OK");
    assert!(summary.items[0].resolved_at.is_some());

    assert!(get_alert_state(&pool, "fail_count_train").await.unwrap().is_none());

    let history = list_alert_history(&pool, 50).await.unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].status, "RESOLVED");
    assert!(history[0].resolved_at.is_some());

    let queued = list_outbox_history(&pool, 50, &["PENDING"]).await.unwrap();
    assert_eq!(queued.len(), 2);
    let resolved_row = queued
        .iter()
        .find(|item| item.event_type == "ALERT_RESOLVED")
        .expect("resolved notification enqueued");
    assert_ne!(resolved_row.event_id.clone().unwrap(), firing_event_id);

    // Quiet re-evaluation: nothing changes.
    pfd_alerts::evaluate_policies(&pool, &doc, &channels, later + Duration::hours(1), "system")
        .await
        .unwrap();
    assert_eq!(list_alert_history(&pool, 50).await.unwrap().len(), 3);
    assert_eq!(list_outbox_history(&pool, 50, &["PENDING"]).await.unwrap().len(), 2);
}

#[tokio::test]
async fn pending_resolution_is_silent() {
    let _guard = db_guard().await;
    let Some(pool) = try_db_pool().await else {
        return;
    };
    reset_tables(&pool).await;

    let channels = vec![webhook_channel("ops", 5, 30)];
    let doc = document(fail_count_train_policy());

    insert_record(&pool, &failing_record("run-2", "train", at(10)))
        .await
        .unwrap();

    // One breach → PENDING, then the window empties before a second breach.
    pfd_alerts::evaluate_policies(&pool, &doc, &channels, at(11), "system")
        .await
        .unwrap();
    let later = at(11) + Duration::days(8);
    pfd_alerts::evaluate_policies(&pool, &doc, &channels, later, "system")
        .await
        .unwrap();

    let history = list_alert_history(&pool, 50).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].status, "RESOLVED");

    // PENDING→RESOLVED produces no notification at all.
    assert!(list_outbox_history(&pool, 50, &["PENDING", "RETRYING", "SENT", "DEAD", "FAILED"])
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn overlays_decorate_firing_alerts() {
    let _guard = db_guard().await;
    let Some(pool) = try_db_pool().await else {
        return;
    };
    reset_tables(&pool).await;

    let channels = vec![webhook_channel("ops", 5, 30)];
    let mut policy = fail_count_train_policy();
    policy.pending_evaluations = 1;
    let doc = document(policy.clone());

    insert_record(&pool, &failing_record("run-3", "train", at(10)))
        .await
        .unwrap();
    pfd_alerts::evaluate_policies(&pool, &doc, &channels, at(11), "system")
        .await
        .unwrap();

    // Silence scoped to the policy, then acknowledge the alert.
    pfd_alerts::create_silence(
        &pool,
        &pfd_alerts::CreateSilence {
            actor: "ops-oncall".to_string(),
            starts_at: None,
            ends_at: pfd_schemas::now_utc() + Duration::hours(2),
            reason: "known upstream outage".to_string(),
            policy_id: Some(policy.id.clone()),
            source_name: None,
            severity: None,
            rule_id: None,
        },
    )
    .await
    .unwrap();
    pfd_alerts::acknowledge_alert(&pool, &policy.id, "ops-oncall", Some("looking into it"))
        .await
        .unwrap();

    let active = pfd_alerts::get_active_alerts(&pool, &doc.policies).await.unwrap();
    assert_eq!(active.total_active, 1);
    let item = &active.items[0];
    assert!(item.is_silenced);
    assert!(item.is_acknowledged);
    assert_eq!(item.status, "FIRING");

    // Expiring the silence clears the decoration.
    let silence_id = item.silence.as_ref().unwrap()["silence_id"]
        .as_str()
        .unwrap()
        .to_string();
    pfd_alerts::expire_silence_by_id(&pool, &silence_id, "ops-oncall")
        .await
        .unwrap();
    let active = pfd_alerts::get_active_alerts(&pool, &doc.policies).await.unwrap();
    assert!(!active.items[0].is_silenced);
    assert!(active.items[0].is_acknowledged);

    // Unack clears the other overlay; a second unack is NotFound.
    pfd_alerts::unacknowledge_alert(&pool, &policy.id, "ops-oncall")
        .await
        .unwrap();
    assert!(pfd_alerts::unacknowledge_alert(&pool, &policy.id, "ops-oncall")
        .await
        .is_err());
}
