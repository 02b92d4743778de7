//! Manual resend of terminal outbox rows.
//!
//! A replay clones the row with a fresh `id` and `delivery_id`, preserves
//! `event_id`, and never mutates the source row.

use anyhow::Result;
use pfd_db::outbox::{
    clone_outbox_item_for_replay, get_outbox_item, list_outbox_history, OutboxItem,
};
use pfd_schemas::{hex_id, now_utc, DiagnosticsError};
use sqlx::PgPool;

use crate::log::emit_delivery_log;

pub const REPLAYABLE_STATUSES: [&str; 3] = ["DEAD", "FAILED", "SENT"];

#[derive(Debug, Clone)]
pub struct ReplaySummary {
    pub actor: String,
    pub replayed_count: usize,
    pub items: Vec<OutboxItem>,
}

fn log_replayed(item: &OutboxItem) {
    emit_delivery_log(
        "REPLAYED",
        item.event_id.as_deref(),
        item.delivery_id.as_deref(),
        Some(&item.id),
        Some(&item.channel_target),
        Some(&item.event_type),
        None,
        Some(item.attempt_count),
        None,
        item.replayed_from_id.as_deref(),
        None,
    );
}

/// Replay a single outbox item. Only `{DEAD, FAILED, SENT}` rows qualify.
pub async fn replay_outbox_item(
    pool: &PgPool,
    item_id: &str,
    actor: &str,
) -> Result<ReplaySummary> {
    let normalized_id = item_id.trim();
    if normalized_id.is_empty() {
        return Err(DiagnosticsError::payload("outbox item id is required"));
    }

    let item = get_outbox_item(pool, normalized_id)
        .await?
        .ok_or_else(|| {
            DiagnosticsError::not_found(format!("Outbox item not found: {normalized_id}"))
        })?;

    if !REPLAYABLE_STATUSES.contains(&item.status.as_str()) {
        return Err(DiagnosticsError::payload(format!(
            "Outbox item '{normalized_id}' with status '{}' is not replayable. Allowed statuses: DEAD, FAILED, SENT.",
            item.status
        )));
    }

    // The clone re-checks the status predicate in SQL, so a concurrent
    // dispatcher transition surfaces as NotFound rather than a bad clone.
    let replayed = clone_outbox_item_for_replay(pool, normalized_id, &hex_id(), &hex_id(), now_utc())
        .await?
        .ok_or_else(|| {
            DiagnosticsError::not_found(format!("Failed to replay outbox item: {normalized_id}"))
        })?;

    log_replayed(&replayed);

    Ok(ReplaySummary {
        actor: normalize_actor(actor),
        replayed_count: 1,
        items: vec![replayed],
    })
}

/// Replay every DEAD row, bounded by `limit`.
pub async fn replay_dead_outbox(pool: &PgPool, limit: i64, actor: &str) -> Result<ReplaySummary> {
    let dead_items = list_outbox_history(pool, limit.clamp(1, 1000), &["DEAD"]).await?;

    let mut items = Vec::new();
    for item in dead_items {
        if let Some(replayed) =
            clone_outbox_item_for_replay(pool, &item.id, &hex_id(), &hex_id(), now_utc()).await?
        {
            log_replayed(&replayed);
            items.push(replayed);
        }
    }

    Ok(ReplaySummary {
        actor: normalize_actor(actor),
        replayed_count: items.len(),
        items,
    })
}

fn normalize_actor(actor: &str) -> String {
    let trimmed = actor.trim();
    if trimmed.is_empty() {
        "system:admin".to_string()
    } else {
        trimmed.to_string()
    }
}
