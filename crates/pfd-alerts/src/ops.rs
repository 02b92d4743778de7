//! Operator-facing mutations and read surfaces. Every mutation is
//! audit-logged with the caller's actor.

use anyhow::Result;
use chrono::{DateTime, Utc};
use pfd_config::AlertPolicy;
use pfd_db::alerts::{
    acknowledge_alert as save_acknowledgement, create_silence as save_silence,
    expire_elapsed_silences, expire_silence, get_alert_state, get_silence, list_alert_audit_events,
    list_alert_history, list_active_alert_states, list_silences,
    unacknowledge_alert as clear_acknowledgement, AcknowledgementRow, SilenceRow,
};
use pfd_schemas::{hex_id, iso_utc, now_utc, DiagnosticsError, Severity, SourceName};
use serde_json::{json, Value};
use sqlx::PgPool;

use crate::engine::AUDIT_ACTOR_SYSTEM;
use crate::overlay::{decorate_items, silence_json};
use crate::AlertItem;

async fn emit_audit(pool: &PgPool, alert_id: &str, event_type: &str, actor: &str, payload: Value) {
    let event = pfd_db::alerts::NewAuditEvent {
        alert_id: alert_id.to_string(),
        event_type: event_type.to_string(),
        actor: if actor.trim().is_empty() {
            AUDIT_ACTOR_SYSTEM.to_string()
        } else {
            actor.trim().to_string()
        },
        event_at: now_utc(),
        payload_json: payload,
    };
    if let Err(err) = pfd_db::alerts::insert_alert_audit_event(pool, &event).await {
        tracing::warn!(alert_id, event_type, error = %err, "failed to write alert audit event");
    }
}

fn require_actor(actor: &str, what: &str) -> Result<String> {
    let trimmed = actor.trim();
    if trimmed.is_empty() {
        return Err(DiagnosticsError::payload(format!(
            "Actor is required for {what}."
        )));
    }
    Ok(trimmed.to_string())
}

// ---------------------------------------------------------------------------
// Silences
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CreateSilence {
    pub actor: String,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: DateTime<Utc>,
    pub reason: String,
    pub policy_id: Option<String>,
    pub source_name: Option<String>,
    pub severity: Option<String>,
    pub rule_id: Option<String>,
}

fn normalize_optional(value: Option<&String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub async fn create_silence(pool: &PgPool, args: &CreateSilence) -> Result<Value> {
    let created_by = require_actor(&args.actor, "silence creation")?;

    let source_name = match normalize_optional(args.source_name.as_ref()) {
        None => None,
        Some(value) => Some(
            SourceName::parse(&value)
                .map_err(|_| {
                    DiagnosticsError::payload(format!("Unsupported source_name '{value}'."))
                })?
                .as_str()
                .to_string(),
        ),
    };
    let severity = match normalize_optional(args.severity.as_ref()) {
        None => None,
        Some(value) => Some(
            Severity::parse(&value)
                .map_err(|_| DiagnosticsError::payload(format!("Unsupported severity '{value}'.")))?
                .as_str()
                .to_string(),
        ),
    };

    let now = now_utc();
    let starts_at = args.starts_at.unwrap_or(now);
    if args.ends_at <= starts_at {
        return Err(DiagnosticsError::payload(
            "Silence ends_at must be later than starts_at.",
        ));
    }

    let row = SilenceRow {
        silence_id: hex_id(),
        policy_id: normalize_optional(args.policy_id.as_ref()),
        source_name,
        severity,
        rule_id: normalize_optional(args.rule_id.as_ref()),
        starts_at,
        ends_at: args.ends_at,
        reason: args.reason.trim().to_string(),
        created_by: created_by.clone(),
        created_at: now,
        expired_at: None,
    };
    save_silence(pool, &row).await?;

    let audit_alert_id = row
        .policy_id
        .clone()
        .unwrap_or_else(|| format!("silence:{}", row.silence_id));
    let payload = silence_json(&row, now);
    emit_audit(
        pool,
        &audit_alert_id,
        "SILENCED",
        &created_by,
        json!({"silence": payload}),
    )
    .await;

    Ok(silence_json(&row, now_utc()))
}

pub async fn expire_silence_by_id(pool: &PgPool, silence_id: &str, actor: &str) -> Result<Value> {
    let normalized_actor = require_actor(actor, "silence expiry")?;

    let existing = get_silence(pool, silence_id).await?;
    if existing.is_none() {
        return Err(DiagnosticsError::not_found(format!(
            "Silence not found: {silence_id}"
        )));
    }

    let now = now_utc();
    let updated = expire_silence(pool, silence_id, now).await?.ok_or_else(|| {
        DiagnosticsError::not_found(format!("Silence not found: {silence_id}"))
    })?;

    let audit_alert_id = updated
        .policy_id
        .clone()
        .unwrap_or_else(|| format!("silence:{silence_id}"));
    let payload = silence_json(&updated, now);
    emit_audit(
        pool,
        &audit_alert_id,
        "UNSILENCED",
        &normalized_actor,
        json!({"silence": payload.clone()}),
    )
    .await;

    Ok(payload)
}

pub async fn list_silences_payload(
    pool: &PgPool,
    limit: i64,
    include_expired: bool,
) -> Result<Value> {
    let normalized_limit = limit.clamp(1, 1000);
    let now = now_utc();
    expire_elapsed_silences(pool, now).await?;

    let rows = list_silences(pool, normalized_limit, include_expired, false, now).await?;
    let items: Vec<Value> = rows.iter().map(|row| silence_json(row, now)).collect();

    Ok(json!({
        "limit": normalized_limit,
        "include_expired": include_expired,
        "items": items,
    }))
}

// ---------------------------------------------------------------------------
// Acknowledgements
// ---------------------------------------------------------------------------

pub async fn acknowledge_alert(
    pool: &PgPool,
    alert_id: &str,
    actor: &str,
    note: Option<&str>,
) -> Result<AcknowledgementRow> {
    let normalized_alert_id = alert_id.trim().to_string();
    if normalized_alert_id.is_empty() {
        return Err(DiagnosticsError::payload("alert_id is required."));
    }
    let normalized_actor = require_actor(actor, "alert acknowledgement")?;

    if get_alert_state(pool, &normalized_alert_id).await?.is_none() {
        return Err(DiagnosticsError::not_found(format!(
            "Active alert not found for alert_id '{normalized_alert_id}'."
        )));
    }

    let row =
        save_acknowledgement(pool, &normalized_alert_id, &normalized_actor, note, now_utc())
            .await?;

    emit_audit(
        pool,
        &normalized_alert_id,
        "ACKED",
        &normalized_actor,
        json!({"acknowledgement": serde_json::to_value(&row)?}),
    )
    .await;

    Ok(row)
}

pub async fn unacknowledge_alert(
    pool: &PgPool,
    alert_id: &str,
    actor: &str,
) -> Result<AcknowledgementRow> {
    let normalized_alert_id = alert_id.trim().to_string();
    if normalized_alert_id.is_empty() {
        return Err(DiagnosticsError::payload("alert_id is required."));
    }
    let normalized_actor = require_actor(actor, "unacknowledge")?;

    let row = clear_acknowledgement(pool, &normalized_alert_id, now_utc())
        .await?
        .ok_or_else(|| {
            DiagnosticsError::not_found(format!(
                "Acknowledgement not found for alert_id '{normalized_alert_id}'."
            ))
        })?;

    emit_audit(
        pool,
        &normalized_alert_id,
        "UNACKED",
        &normalized_actor,
        json!({"acknowledgement": serde_json::to_value(&row)?}),
    )
    .await;

    Ok(row)
}

// ---------------------------------------------------------------------------
// Read surfaces
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, serde::Serialize)]
pub struct ActiveAlerts {
    pub evaluated_at: String,
    pub total_active: usize,
    pub items: Vec<AlertItem>,
}

/// Currently-persisted PENDING/FIRING alerts with overlays.
pub async fn get_active_alerts(pool: &PgPool, policies: &[AlertPolicy]) -> Result<ActiveAlerts> {
    let now = now_utc();
    let snapshots: std::collections::HashMap<&str, Value> = policies
        .iter()
        .map(|p| (p.id.as_str(), p.snapshot_json()))
        .collect();

    let rows = list_active_alert_states(pool, 5000).await?;
    let mut items: Vec<AlertItem> = rows
        .iter()
        .map(|row| AlertItem {
            alert_id: row.policy_id.clone(),
            policy_id: row.policy_id.clone(),
            status: row.status.trim().to_ascii_uppercase(),
            severity: row.severity.trim().to_ascii_uppercase(),
            source_name: row.source_name.clone(),
            first_seen_at: row.first_seen_at.map(|t| iso_utc(&t)),
            last_seen_at: row.last_seen_at.map(|t| iso_utc(&t)),
            resolved_at: None,
            current_value: row.current_value,
            threshold: row.threshold,
            message: row.message.clone(),
            evaluation_context_json: row.evaluation_context_json.clone(),
            policy: snapshots.get(row.policy_id.as_str()).cloned(),
            evaluated_at: Some(iso_utc(&row.updated_at)),
            is_silenced: false,
            silence: None,
            is_acknowledged: false,
            acknowledgement: None,
        })
        .collect();

    decorate_items(pool, &mut items, now).await?;

    Ok(ActiveAlerts {
        evaluated_at: iso_utc(&now),
        total_active: items.len(),
        items,
    })
}

/// Transition history, newest first, stamped with policy snapshots.
pub async fn get_alert_history(
    pool: &PgPool,
    policies: &[AlertPolicy],
    limit: i64,
) -> Result<Value> {
    let normalized_limit = limit.clamp(1, 500);
    let snapshots: std::collections::HashMap<&str, Value> = policies
        .iter()
        .map(|p| (p.id.as_str(), p.snapshot_json()))
        .collect();

    let rows = list_alert_history(pool, normalized_limit).await?;
    let items: Vec<Value> = rows
        .iter()
        .map(|row| {
            json!({
                "alert_id": format!("{}:{}", row.policy_id, row.id),
                "policy_id": row.policy_id,
                "status": row.status.trim().to_ascii_uppercase(),
                "severity": row.severity.trim().to_ascii_uppercase(),
                "source_name": row.source_name,
                "first_seen_at": row.first_seen_at.map(|t| iso_utc(&t)),
                "last_seen_at": row.last_seen_at.map(|t| iso_utc(&t)),
                "resolved_at": row.resolved_at.map(|t| iso_utc(&t)),
                "current_value": row.current_value,
                "threshold": row.threshold,
                "message": row.message,
                "evaluation_context_json": row.evaluation_context_json,
                "policy": snapshots.get(row.policy_id.as_str()).cloned(),
                "evaluated_at": iso_utc(&row.created_at),
            })
        })
        .collect();

    Ok(json!({"limit": normalized_limit, "items": items}))
}

/// Append-only audit trail, newest first.
pub async fn list_alert_audit(pool: &PgPool, limit: i64) -> Result<Value> {
    let normalized_limit = limit.clamp(1, 500);
    let rows = list_alert_audit_events(pool, normalized_limit).await?;
    let items: Vec<Value> = rows
        .iter()
        .map(|row| {
            json!({
                "event_id": row.event_id,
                "alert_id": row.alert_id,
                "event_type": row.event_type.to_ascii_uppercase(),
                "actor": row.actor,
                "event_at": iso_utc(&row.event_at),
                "payload_json": row.payload_json,
            })
        })
        .collect();

    Ok(json!({"limit": normalized_limit, "items": items}))
}
