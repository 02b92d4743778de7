//! The dispatcher tick: drain due outbox rows, send webhooks, keep the
//! ledger gapless.
//!
//! Per item the ledger row is inserted STARTED before any HTTP call and
//! finalised exactly once afterwards; an error between the two finalises
//! the row as FAILED so no attempt ever stays unaccounted while its outbox
//! row moves on.

use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use pfd_config::NotificationChannel;
use pfd_db::attempts::{
    complete_delivery_attempt, insert_delivery_attempt_started, NewDeliveryAttempt,
};
use pfd_db::outbox::{
    list_due_outbox_items, mark_outbox_dead, mark_outbox_retry, mark_outbox_sent, OutboxItem,
};
use pfd_schemas::{hex_id, iso_utc, now_utc};
use serde_json::json;
use sqlx::PgPool;
use tracing::warn;

use crate::log::emit_delivery_log;
use crate::payload::build_delivery_payload;
use crate::sender::{DeliveryOutcome, WebhookRequest, WebhookSender};
use crate::sign::sign_payload;

const MAX_RETRY_DELAY_SECONDS: i64 = 24 * 3600;

/// Capped exponential backoff: `min(backoff * 2^(attempt-1), 24h)`.
pub fn compute_retry_delay_seconds(base_backoff_seconds: i64, attempt_count: i32) -> i64 {
    let base = base_backoff_seconds.max(1);
    let exponent = (attempt_count.max(1) - 1).min(30) as u32;
    base.saturating_mul(1i64 << exponent)
        .min(MAX_RETRY_DELAY_SECONDS)
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DispatchSummary {
    pub actor: String,
    pub dispatched_at: String,
    pub processed_count: i64,
    pub sent_count: i64,
    pub retrying_count: i64,
    pub dead_count: i64,
    pub failed_count: i64,
}

enum ItemOutcome {
    Sent,
    Retrying,
    Dead,
}

/// Drain up to `limit` due rows at `now`.
pub async fn dispatch_due(
    pool: &PgPool,
    channels: &[NotificationChannel],
    sender: &dyn WebhookSender,
    limit: i64,
    now: DateTime<Utc>,
    actor: &str,
) -> Result<DispatchSummary> {
    let channel_map: HashMap<&str, &NotificationChannel> =
        channels.iter().map(|c| (c.id.as_str(), c)).collect();

    let due_items = list_due_outbox_items(pool, limit.clamp(1, 1000), now).await?;

    let mut summary = DispatchSummary {
        actor: if actor.trim().is_empty() {
            "system:scheduler".to_string()
        } else {
            actor.trim().to_string()
        },
        dispatched_at: iso_utc(&now),
        processed_count: 0,
        sent_count: 0,
        retrying_count: 0,
        dead_count: 0,
        failed_count: 0,
    };

    for item in due_items {
        summary.processed_count += 1;

        let attempt_count = item.attempt_count.max(0) + 1;
        let event_id = item
            .event_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(hex_id);
        let delivery_id = hex_id();
        let attempt_id = hex_id();
        let started_at = now_utc();

        let started = NewDeliveryAttempt {
            attempt_id: attempt_id.clone(),
            outbox_item_id: item.id.clone(),
            event_id: Some(event_id.clone()),
            delivery_id: Some(delivery_id.clone()),
            replayed_from_id: item.replayed_from_id.clone(),
            channel_type: item.channel_type.clone(),
            channel_target: item.channel_target.clone(),
            event_type: item.event_type.clone(),
            alert_id: item.alert_id.clone(),
            policy_id: item.policy_id.clone(),
            source_name: item.source_name.clone(),
            attempt_number: attempt_count,
            started_at,
        };
        if let Err(err) = insert_delivery_attempt_started(pool, &started).await {
            warn!(outbox_item_id = %item.id, error = %err, "attempt ledger insert failed; item left due");
            summary.failed_count += 1;
            continue;
        }

        let result = dispatch_one(
            pool,
            &channel_map,
            sender,
            &item,
            attempt_count,
            &event_id,
            &delivery_id,
            &attempt_id,
            now,
        )
        .await;

        match result {
            Ok(ItemOutcome::Sent) => summary.sent_count += 1,
            Ok(ItemOutcome::Retrying) => {
                summary.retrying_count += 1;
                summary.failed_count += 1;
            }
            Ok(ItemOutcome::Dead) => {
                summary.dead_count += 1;
                summary.failed_count += 1;
            }
            Err(err) => {
                warn!(
                    outbox_item_id = %item.id,
                    event_id = %event_id,
                    error = %err,
                    "dispatch flow terminated unexpectedly"
                );
                summary.failed_count += 1;
                let _ = complete_delivery_attempt(
                    pool,
                    &attempt_id,
                    "FAILED",
                    now_utc(),
                    None,
                    Some("UNEXPECTED_ERROR"),
                    Some("Unexpected dispatch flow termination."),
                )
                .await;
            }
        }
    }

    Ok(summary)
}

#[allow(clippy::too_many_arguments)]
async fn dispatch_one(
    pool: &PgPool,
    channel_map: &HashMap<&str, &NotificationChannel>,
    sender: &dyn WebhookSender,
    item: &OutboxItem,
    attempt_count: i32,
    event_id: &str,
    delivery_id: &str,
    attempt_id: &str,
    now: DateTime<Utc>,
) -> Result<ItemOutcome> {
    let channel = match channel_map.get(item.channel_target.as_str()).copied() {
        Some(ch) if ch.enabled && ch.channel_type == "webhook" => ch,
        _ => {
            return finish_dead(
                pool,
                item,
                attempt_count,
                event_id,
                delivery_id,
                attempt_id,
                None,
                "CHANNEL_UNAVAILABLE",
                "Channel is missing or disabled.",
                now,
            )
            .await;
        }
    };

    let Some(target_url) = channel.target_url.clone() else {
        return finish_dead(
            pool,
            item,
            attempt_count,
            event_id,
            delivery_id,
            attempt_id,
            None,
            "CHANNEL_TARGET_MISSING",
            "Channel target URL is not configured.",
            now,
        )
        .await;
    };

    // Compose body + headers. The delivery object and the id headers carry
    // the same values.
    let base_payload = if item.payload_json.is_object() {
        item.payload_json.clone()
    } else {
        json!({})
    };
    let payload = build_delivery_payload(
        &base_payload,
        event_id,
        delivery_id,
        item.replayed_from_id.as_deref(),
    );
    let body = serde_json::to_vec(&payload)?;
    let timestamp = now_utc().timestamp().to_string();

    let signature = match &channel.signing_secret_env {
        Some(env_name) => {
            let secret = std::env::var(env_name).unwrap_or_default();
            let secret = secret.trim();
            if secret.is_empty() {
                warn!(
                    channel = %channel.id,
                    secret_env = %env_name,
                    "webhook signing secret is not configured; dispatching unsigned"
                );
                None
            } else {
                Some(sign_payload(&timestamp, &body, secret))
            }
        }
        None => {
            warn!(channel = %channel.id, "webhook signing secret env is not set; dispatching unsigned");
            None
        }
    };

    let request = WebhookRequest {
        url: target_url,
        body,
        event_id: event_id.to_string(),
        delivery_id: delivery_id.to_string(),
        timestamp,
        signature,
    };

    let outcome: DeliveryOutcome = sender.send(channel, &request).await;
    let completed_at = now_utc();

    if outcome.success {
        mark_outbox_sent(
            pool,
            &item.id,
            attempt_count,
            now,
            delivery_id,
            outcome.status_code,
            now,
        )
        .await?;
        complete_delivery_attempt(
            pool,
            attempt_id,
            "SENT",
            completed_at,
            outcome.status_code,
            None,
            None,
        )
        .await?;
        emit_delivery_log(
            "SENT",
            Some(event_id),
            Some(delivery_id),
            Some(&item.id),
            Some(&item.channel_target),
            Some(&item.event_type),
            outcome.status_code,
            Some(attempt_count),
            Some(attempt_id),
            item.replayed_from_id.as_deref(),
            None,
        );
        return Ok(ItemOutcome::Sent);
    }

    let error_code = outcome
        .error_code
        .clone()
        .unwrap_or_else(|| "UNKNOWN".to_string());

    if outcome.retryable && attempt_count < item.max_attempts.max(1) {
        let delay = compute_retry_delay_seconds(backoff_for(channel), attempt_count);
        let next_retry_at = now + chrono::Duration::seconds(delay);
        mark_outbox_retry(
            pool,
            &item.id,
            attempt_count,
            next_retry_at,
            delivery_id,
            outcome.error.as_deref(),
            outcome.status_code,
            Some(&error_code),
            now,
        )
        .await?;
        complete_delivery_attempt(
            pool,
            attempt_id,
            "RETRY",
            completed_at,
            outcome.status_code,
            Some(&error_code),
            outcome.error.as_deref(),
        )
        .await?;
        emit_delivery_log(
            "RETRYING",
            Some(event_id),
            Some(delivery_id),
            Some(&item.id),
            Some(&item.channel_target),
            Some(&item.event_type),
            outcome.status_code,
            Some(attempt_count),
            Some(attempt_id),
            item.replayed_from_id.as_deref(),
            Some(&error_code),
        );
        return Ok(ItemOutcome::Retrying);
    }

    mark_outbox_dead(
        pool,
        &item.id,
        attempt_count,
        delivery_id,
        outcome.error.as_deref(),
        outcome.status_code,
        Some(&error_code),
        now,
    )
    .await?;
    complete_delivery_attempt(
        pool,
        attempt_id,
        "DEAD",
        completed_at,
        outcome.status_code,
        Some(&error_code),
        outcome.error.as_deref(),
    )
    .await?;
    emit_delivery_log(
        "DEAD",
        Some(event_id),
        Some(delivery_id),
        Some(&item.id),
        Some(&item.channel_target),
        Some(&item.event_type),
        outcome.status_code,
        Some(attempt_count),
        Some(attempt_id),
        item.replayed_from_id.as_deref(),
        Some(&error_code),
    );
    Ok(ItemOutcome::Dead)
}

fn backoff_for(channel: &NotificationChannel) -> i64 {
    channel.backoff_seconds.max(1)
}

#[allow(clippy::too_many_arguments)]
async fn finish_dead(
    pool: &PgPool,
    item: &OutboxItem,
    attempt_count: i32,
    event_id: &str,
    delivery_id: &str,
    attempt_id: &str,
    http_status: Option<i32>,
    error_code: &str,
    error_message: &str,
    now: DateTime<Utc>,
) -> Result<ItemOutcome> {
    mark_outbox_dead(
        pool,
        &item.id,
        attempt_count,
        delivery_id,
        Some(error_message),
        http_status,
        Some(error_code),
        now,
    )
    .await?;
    complete_delivery_attempt(
        pool,
        attempt_id,
        "DEAD",
        now_utc(),
        http_status,
        Some(error_code),
        Some(error_message),
    )
    .await?;
    emit_delivery_log(
        "DEAD",
        Some(event_id),
        Some(delivery_id),
        Some(&item.id),
        Some(&item.channel_target),
        Some(&item.event_type),
        http_status,
        Some(attempt_count),
        Some(attempt_id),
        item.replayed_from_id.as_deref(),
        Some(error_code),
    );
    Ok(ItemOutcome::Dead)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps_at_24h() {
        assert_eq!(compute_retry_delay_seconds(30, 1), 30);
        assert_eq!(compute_retry_delay_seconds(30, 2), 60);
        assert_eq!(compute_retry_delay_seconds(30, 3), 120);
        assert_eq!(compute_retry_delay_seconds(30, 20), MAX_RETRY_DELAY_SECONDS);
        assert_eq!(compute_retry_delay_seconds(1, 1), 1);
    }

    #[test]
    fn backoff_tolerates_degenerate_inputs() {
        assert_eq!(compute_retry_delay_seconds(0, 1), 1);
        assert_eq!(compute_retry_delay_seconds(-5, 0), 1);
        assert_eq!(
            compute_retry_delay_seconds(i64::MAX, 5),
            MAX_RETRY_DELAY_SECONDS
        );
    }
}
