//! Transition → outbox fan-out.
//!
//! All channels of one transition share a fresh `event_id`; each row gets
//! its own `delivery_id`. Enqueue happens only after the alert engine has
//! committed the history row, so a crash in between leaves the system
//! consistent.

use anyhow::Result;
use chrono::{DateTime, Utc};
use pfd_config::NotificationChannel;
use pfd_db::outbox::{insert_outbox_item, OutboxItem};
use pfd_schemas::{hex_id, NotificationEventType};
use serde_json::Value;
use sqlx::PgPool;
use tracing::warn;

use crate::log::emit_delivery_log;
use crate::payload::build_webhook_payload;

/// One alert transition, as handed over by the alert engine.
#[derive(Debug, Clone)]
pub struct AlertTransition {
    pub event_type: String,
    pub alert_id: String,
    pub policy_id: String,
    pub severity: Option<String>,
    pub source_name: Option<String>,
    pub message: String,
    pub current_value: Option<f64>,
    pub threshold: Option<f64>,
    pub previous_status: Option<String>,
    pub current_status: Option<String>,
    pub evaluated_at: DateTime<Utc>,
    pub context: Value,
}

#[derive(Debug, Clone)]
pub struct EnqueueSummary {
    pub event_type: String,
    pub enqueued_count: usize,
    pub items: Vec<OutboxItem>,
}

/// Insert one PENDING outbox row per enabled channel that supports the
/// event type. Channels without a resolvable target are skipped with a
/// warning; they would only dead-letter immediately.
pub async fn enqueue_alert_transition(
    pool: &PgPool,
    channels: &[NotificationChannel],
    transition: &AlertTransition,
    now: DateTime<Utc>,
) -> Result<EnqueueSummary> {
    let event_type = NotificationEventType::parse(&transition.event_type)?
        .as_str()
        .to_string();

    let transition_event_id = hex_id();
    let payload = build_webhook_payload(
        &transition_event_id,
        &event_type,
        &transition.alert_id,
        &transition.policy_id,
        transition.severity.as_deref(),
        transition.source_name.as_deref(),
        &transition.message,
        transition.current_value,
        transition.threshold,
        transition.previous_status.as_deref(),
        transition.current_status.as_deref(),
        transition.evaluated_at,
        &transition.context,
    );

    let mut items = Vec::new();
    for channel in channels {
        if !channel.enabled || !channel.supports_event(&event_type) {
            continue;
        }
        if channel.target_url.is_none() {
            warn!(
                channel = %channel.id,
                event_type = %event_type,
                "skipping notification enqueue: channel target URL is not configured"
            );
            continue;
        }

        let item = OutboxItem {
            id: hex_id(),
            event_id: Some(transition_event_id.clone()),
            delivery_id: Some(hex_id()),
            replayed_from_id: None,
            event_type: event_type.clone(),
            alert_id: transition.alert_id.clone(),
            policy_id: transition.policy_id.clone(),
            severity: transition.severity.clone(),
            source_name: transition.source_name.clone(),
            payload_json: payload.clone(),
            channel_type: "webhook".to_string(),
            channel_target: channel.id.clone(),
            status: "PENDING".to_string(),
            attempt_count: 0,
            max_attempts: channel.max_attempts,
            next_retry_at: now,
            last_error: None,
            last_http_status: None,
            last_error_code: None,
            created_at: now,
            updated_at: now,
            sent_at: None,
        };

        insert_outbox_item(pool, &item).await?;
        emit_delivery_log(
            "ENQUEUED",
            item.event_id.as_deref(),
            item.delivery_id.as_deref(),
            Some(&item.id),
            Some(&item.channel_target),
            Some(&item.event_type),
            None,
            Some(item.attempt_count),
            None,
            None,
            None,
        );
        items.push(item);
    }

    Ok(EnqueueSummary {
        event_type,
        enqueued_count: items.len(),
        items,
    })
}
