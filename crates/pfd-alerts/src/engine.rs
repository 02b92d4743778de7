//! The evaluation tick.
//!
//! Within one policy the state row and its history row commit in one
//! transaction, and outbox rows are enqueued only after that commit — a
//! crash in between leaves the transition recorded, and the next tick will
//! not re-enqueue because the edge has already happened.

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use pfd_artifacts::ArtifactGateway;
use pfd_config::{AlertPolicy, NotificationChannel, PolicyDocument};
use pfd_db::alerts::{
    delete_alert_state, get_alert_state, insert_alert_history, insert_alert_audit_event,
    upsert_alert_state, AlertStateRow, NewAlertHistory, NewAuditEvent,
};
use pfd_db::registry::{query_runs, RunFilter};
use pfd_schemas::{iso_utc, AlertStatus, EVENT_ALERT_FIRING, EVENT_ALERT_RESOLVED};
use serde_json::{json, Value};
use sqlx::PgPool;
use tracing::warn;

use crate::overlay::decorate_items;
use crate::transition::{plan_transition, ExistingState, TransitionPlan};
use crate::AlertItem;

pub const AUDIT_ACTOR_SYSTEM: &str = "system";
pub const AUDIT_ACTOR_SCHEDULER: &str = "system:scheduler";

#[derive(Debug, Clone, serde::Serialize)]
pub struct EvaluationSummary {
    pub evaluated_at: String,
    pub total_policies: usize,
    pub active_count: usize,
    pub items: Vec<AlertItem>,
    pub policy_path: String,
    pub version: String,
}

fn build_message(policy: &AlertPolicy, current_value: f64, status: &str) -> String {
    format!(
        "{} (metric={}, current={:.6}, operator='{}', threshold={:.6}, status={})",
        policy.description,
        policy.metric_type.as_str(),
        current_value,
        policy.operator.as_str(),
        policy.threshold,
        status
    )
}

/// Audit writes are best-effort: losing one must never abort a tick.
async fn emit_audit(pool: &PgPool, alert_id: &str, event_type: &str, actor: &str, payload: Value) {
    let event = NewAuditEvent {
        alert_id: alert_id.to_string(),
        event_type: event_type.trim().to_ascii_uppercase(),
        actor: if actor.trim().is_empty() {
            AUDIT_ACTOR_SYSTEM.to_string()
        } else {
            actor.trim().to_string()
        },
        event_at: pfd_schemas::now_utc(),
        payload_json: payload,
    };
    if let Err(err) = insert_alert_audit_event(pool, &event).await {
        warn!(alert_id, event_type = %event.event_type, error = %err, "failed to write alert audit event");
    }
}

fn transition_payload(
    status: &str,
    first_seen_at: Option<DateTime<Utc>>,
    last_seen_at: Option<DateTime<Utc>>,
    resolved_at: Option<DateTime<Utc>>,
    current_value: f64,
    threshold: f64,
    message: &str,
    context: &Value,
) -> Value {
    json!({
        "status": status,
        "first_seen_at": first_seen_at.map(|t| iso_utc(&t)),
        "last_seen_at": last_seen_at.map(|t| iso_utc(&t)),
        "resolved_at": resolved_at.map(|t| iso_utc(&t)),
        "current_value": current_value,
        "threshold": threshold,
        "message": message,
        "context": context,
    })
}

fn existing_from_row(row: &AlertStateRow) -> Result<ExistingState> {
    Ok(ExistingState {
        status: AlertStatus::parse(&row.status)?,
        first_seen_at: row.first_seen_at,
        consecutive_breaches: row.consecutive_breaches,
    })
}

#[allow(clippy::too_many_arguments)]
fn make_item(
    policy: &AlertPolicy,
    status: &str,
    first_seen_at: Option<DateTime<Utc>>,
    last_seen_at: Option<DateTime<Utc>>,
    resolved_at: Option<DateTime<Utc>>,
    current_value: f64,
    message: String,
    context: Value,
    now: DateTime<Utc>,
) -> AlertItem {
    AlertItem {
        alert_id: policy.id.clone(),
        policy_id: policy.id.clone(),
        status: status.to_string(),
        severity: policy.severity.clone(),
        source_name: policy.source_name.clone(),
        first_seen_at: first_seen_at.map(|t| iso_utc(&t)),
        last_seen_at: last_seen_at.map(|t| iso_utc(&t)),
        resolved_at: resolved_at.map(|t| iso_utc(&t)),
        current_value: Some(current_value),
        threshold: Some(policy.threshold),
        message,
        evaluation_context_json: context,
        policy: Some(policy.snapshot_json()),
        evaluated_at: Some(iso_utc(&now)),
        is_silenced: false,
        silence: None,
        is_acknowledged: false,
        acknowledgement: None,
    }
}

/// Evaluate every enabled policy at `now` and overlay ack/silence status
/// on the returned items.
pub async fn evaluate_policies(
    pool: &PgPool,
    document: &PolicyDocument,
    channels: &[NotificationChannel],
    now: DateTime<Utc>,
    actor: &str,
) -> Result<EvaluationSummary> {
    let gateway = ArtifactGateway::from_env();
    let mut items: Vec<AlertItem> = Vec::new();
    let mut total_policies = 0usize;

    for policy in &document.policies {
        if !policy.enabled {
            continue;
        }
        total_policies += 1;
        let item = evaluate_one(pool, &gateway, policy, channels, now, actor).await?;
        items.push(item);
    }

    decorate_items(pool, &mut items, now).await?;

    let active_count = items
        .iter()
        .filter(|item| item.status == "PENDING" || item.status == "FIRING")
        .count();

    Ok(EvaluationSummary {
        evaluated_at: iso_utc(&now),
        total_policies,
        active_count,
        items,
        policy_path: document.path.display().to_string(),
        version: document.version.clone(),
    })
}

async fn evaluate_one(
    pool: &PgPool,
    gateway: &ArtifactGateway,
    policy: &AlertPolicy,
    channels: &[NotificationChannel],
    now: DateTime<Utc>,
    actor: &str,
) -> Result<AlertItem> {
    let window_start = now - Duration::days(policy.window_days);
    let filter = RunFilter {
        source_name: policy.source_name.clone(),
        date_from: Some(window_start),
        date_to: Some(now),
        ..Default::default()
    };
    let records = query_runs(pool, &filter).await?;

    let rule_counts = if policy.metric_type.needs_rule_counts() {
        gateway.collect_rule_counts(&records)?
    } else {
        BTreeMap::new()
    };

    let (current_value, mut context_map) =
        crate::metrics::compute_metric(policy, &records, &rule_counts);
    let condition_met = policy.operator.apply(current_value, policy.threshold);

    context_map.insert("window_start".to_string(), json!(iso_utc(&window_start)));
    context_map.insert("window_end".to_string(), json!(iso_utc(&now)));
    context_map.insert("source_name".to_string(), json!(policy.source_name));
    context_map.insert("condition_met".to_string(), json!(condition_met));
    context_map.insert(
        "pending_evaluations".to_string(),
        json!(policy.pending_evaluations),
    );
    context_map.insert("operator".to_string(), json!(policy.operator.as_str()));
    context_map.insert("threshold".to_string(), json!(policy.threshold));
    context_map.insert("current_value".to_string(), json!(current_value));
    let context = Value::Object(context_map);

    emit_audit(pool, &policy.id, "EVALUATED", actor, context.clone()).await;

    let existing_row = get_alert_state(pool, &policy.id).await?;
    let existing = match existing_row.as_ref() {
        Some(row) => Some(existing_from_row(row)?),
        None => None,
    };
    let previous_status = existing_row.as_ref().map(|row| row.status.clone());

    let plan = plan_transition(
        existing.as_ref(),
        condition_met,
        policy.pending_evaluations,
        now,
    );

    match plan {
        TransitionPlan::Breach {
            status,
            consecutive,
            first_seen_at,
            entered,
            notify_firing,
        } => {
            let status_str = status.as_str();
            let message = build_message(policy, current_value, status_str);

            let state = AlertStateRow {
                policy_id: policy.id.clone(),
                status: status_str.to_string(),
                severity: policy.severity.clone(),
                source_name: policy.source_name.clone(),
                first_seen_at: Some(first_seen_at),
                last_seen_at: Some(now),
                consecutive_breaches: consecutive,
                current_value: Some(current_value),
                threshold: Some(policy.threshold),
                message: message.clone(),
                evaluation_context_json: context.clone(),
                policy_snapshot_json: policy.snapshot_json(),
                updated_at: now,
            };

            let mut tx = pool.begin().await?;
            upsert_alert_state(&mut *tx, &state).await?;
            if entered {
                insert_alert_history(
                    &mut *tx,
                    &NewAlertHistory {
                        policy_id: policy.id.clone(),
                        status: status_str.to_string(),
                        severity: policy.severity.clone(),
                        source_name: policy.source_name.clone(),
                        first_seen_at: Some(first_seen_at),
                        last_seen_at: Some(now),
                        resolved_at: None,
                        current_value: Some(current_value),
                        threshold: Some(policy.threshold),
                        message: message.clone(),
                        evaluation_context_json: context.clone(),
                        policy_snapshot_json: policy.snapshot_json(),
                        created_at: now,
                    },
                )
                .await?;
            }
            tx.commit().await?;

            if entered {
                emit_audit(
                    pool,
                    &policy.id,
                    status_str,
                    actor,
                    transition_payload(
                        status_str,
                        Some(first_seen_at),
                        Some(now),
                        None,
                        current_value,
                        policy.threshold,
                        &message,
                        &context,
                    ),
                )
                .await;
            }

            if notify_firing {
                let transition = pfd_notify::AlertTransition {
                    event_type: EVENT_ALERT_FIRING.to_string(),
                    alert_id: policy.id.clone(),
                    policy_id: policy.id.clone(),
                    severity: Some(policy.severity.clone()),
                    source_name: policy.source_name.clone(),
                    message: message.clone(),
                    current_value: Some(current_value),
                    threshold: Some(policy.threshold),
                    previous_status: previous_status.clone(),
                    current_status: Some(status_str.to_string()),
                    evaluated_at: now,
                    context: context.clone(),
                };
                if let Err(err) =
                    pfd_notify::enqueue_alert_transition(pool, channels, &transition, now).await
                {
                    warn!(policy_id = %policy.id, error = %err, "failed to enqueue firing notification");
                }
            }

            Ok(make_item(
                policy,
                status_str,
                Some(first_seen_at),
                Some(now),
                None,
                current_value,
                message,
                context,
                now,
            ))
        }

        TransitionPlan::Resolve {
            first_seen_at,
            notify_resolved,
        } => {
            let message = build_message(policy, current_value, "RESOLVED");

            let mut tx = pool.begin().await?;
            insert_alert_history(
                &mut *tx,
                &NewAlertHistory {
                    policy_id: policy.id.clone(),
                    status: "RESOLVED".to_string(),
                    severity: policy.severity.clone(),
                    source_name: policy.source_name.clone(),
                    first_seen_at,
                    last_seen_at: Some(now),
                    resolved_at: Some(now),
                    current_value: Some(current_value),
                    threshold: Some(policy.threshold),
                    message: message.clone(),
                    evaluation_context_json: context.clone(),
                    policy_snapshot_json: policy.snapshot_json(),
                    created_at: now,
                },
            )
            .await?;
            delete_alert_state(&mut *tx, &policy.id).await?;
            tx.commit().await?;

            emit_audit(
                pool,
                &policy.id,
                "RESOLVED",
                actor,
                transition_payload(
                    "RESOLVED",
                    first_seen_at,
                    Some(now),
                    Some(now),
                    current_value,
                    policy.threshold,
                    &message,
                    &context,
                ),
            )
            .await;

            if notify_resolved {
                let transition = pfd_notify::AlertTransition {
                    event_type: EVENT_ALERT_RESOLVED.to_string(),
                    alert_id: policy.id.clone(),
                    policy_id: policy.id.clone(),
                    severity: Some(policy.severity.clone()),
                    source_name: policy.source_name.clone(),
                    message: message.clone(),
                    current_value: Some(current_value),
                    threshold: Some(policy.threshold),
                    previous_status: previous_status.clone(),
                    current_status: Some("RESOLVED".to_string()),
                    evaluated_at: now,
                    context: context.clone(),
                };
                if let Err(err) =
                    pfd_notify::enqueue_alert_transition(pool, channels, &transition, now).await
                {
                    warn!(policy_id = %policy.id, error = %err, "failed to enqueue resolved notification");
                }
            }

            Ok(make_item(
                policy,
                "OK",
                first_seen_at,
                Some(now),
                Some(now),
                current_value,
                build_message(policy, current_value, "OK"),
                context,
                now,
            ))
        }

        TransitionPlan::Quiet => Ok(make_item(
            policy,
            "OK",
            None,
            Some(now),
            None,
            current_value,
            build_message(policy, current_value, "OK"),
            context,
            now,
        )),
    }
}
