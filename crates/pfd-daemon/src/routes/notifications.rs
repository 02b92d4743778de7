//! Notification outbox, dispatch, replay, and analytics surfaces.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use pfd_analytics::{
    attempt_statuses_for_outbox_status, compute_channel_summaries, compute_notification_stats,
    compute_notification_trends, normalize_attempt_status_filter, normalize_status_filter,
    resolve_analytics_window, TrendBucket, DEFAULT_ANALYTICS_DAYS,
};
use pfd_db::attempts::{get_delivery_attempt, query_delivery_attempts, AttemptQuery};
use pfd_db::outbox::{list_outbox_history, query_outbox_items, OutboxItem, OutboxQuery};
use pfd_notify::HttpWebhookSender;
use pfd_schemas::{iso_utc, now_utc, DiagnosticsError};
use serde_json::{json, Value};

use crate::api_types::{DispatchBody, NotificationAnalyticsQuery, OutboxListQuery, ReplayDeadBody};
use crate::error::ApiResult;
use crate::routes::actor_from_headers;
use crate::state::AppState;

fn normalize_event_type(raw: Option<&str>) -> anyhow::Result<Option<String>> {
    pfd_analytics::notifications::normalize_event_type_filter(raw)
}

async fn list_by_statuses(
    st: &AppState,
    query: &OutboxListQuery,
    defaults: &[&str],
) -> anyhow::Result<Value> {
    let limit = query.limit.unwrap_or(50).clamp(1, 1000);
    let statuses: Vec<&str> = match normalize_status_filter(query.status.as_deref())? {
        Some(ref status) => vec![match status.as_str() {
            "PENDING" => "PENDING",
            "RETRYING" => "RETRYING",
            "SENT" => "SENT",
            "DEAD" => "DEAD",
            _ => "FAILED",
        }],
        None => defaults.to_vec(),
    };
    let items = list_outbox_history(&st.pool, limit, &statuses).await?;
    Ok(json!({"limit": limit, "items": items}))
}

/// Queue view: PENDING/RETRYING by default.
pub async fn outbox(
    State(st): State<Arc<AppState>>,
    Query(query): Query<OutboxListQuery>,
) -> ApiResult<Json<Value>> {
    Ok(Json(
        list_by_statuses(&st, &query, &["PENDING", "RETRYING"]).await?,
    ))
}

/// Terminal view: SENT/FAILED/DEAD by default.
pub async fn history(
    State(st): State<Arc<AppState>>,
    Query(query): Query<OutboxListQuery>,
) -> ApiResult<Json<Value>> {
    Ok(Json(
        list_by_statuses(&st, &query, &["SENT", "FAILED", "DEAD"]).await?,
    ))
}

// ---------------------------------------------------------------------------
// Analytics
// ---------------------------------------------------------------------------

struct ResolvedAttemptQuery {
    query: AttemptQuery,
    status_filter: Option<String>,
    filters_json: Value,
}

fn resolve_attempt_query(
    params: &NotificationAnalyticsQuery,
    allow_attempt_status: bool,
) -> anyhow::Result<ResolvedAttemptQuery> {
    let event_type = normalize_event_type(params.event_type.as_deref())?;
    let channel_target = params
        .channel_target
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    let alert_id = params
        .alert_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let status_filter = normalize_status_filter(params.status.as_deref())?;
    let explicit_attempt_status = if allow_attempt_status {
        normalize_attempt_status_filter(params.attempt_status.as_deref())?
    } else {
        None
    };
    if status_filter.is_some() && explicit_attempt_status.is_some() {
        return Err(DiagnosticsError::payload(
            "Use either status or attempt_status filter, not both.",
        ));
    }

    let attempt_statuses = match &explicit_attempt_status {
        Some(status) => Some(vec![status.clone()]),
        None => status_filter
            .as_deref()
            .and_then(attempt_statuses_for_outbox_status),
    };

    let window = resolve_analytics_window(
        params.date_from.as_deref(),
        params.date_to.as_deref(),
        params.days,
        now_utc(),
        DEFAULT_ANALYTICS_DAYS,
    )?;

    let filters_json = json!({
        "days": window.days,
        "event_type": event_type,
        "channel_target": channel_target,
        "status": status_filter,
        "attempt_status": explicit_attempt_status,
        "alert_id": alert_id,
        "date_from": window.date_from.map(|t| iso_utc(&t)),
        "date_to": window.date_to.map(|t| iso_utc(&t)),
    });

    Ok(ResolvedAttemptQuery {
        query: AttemptQuery {
            attempt_statuses,
            event_type,
            channel_target,
            alert_id,
            date_from: window.date_from,
            date_to: window.date_to,
            ascending: true,
            limit: None,
        },
        status_filter,
        filters_json,
    })
}

/// Pending outbox rows matching the analytics filters. Terminal status
/// filters yield no pending set at all.
async fn pending_rows(
    st: &AppState,
    resolved: &ResolvedAttemptQuery,
) -> anyhow::Result<Vec<OutboxItem>> {
    let statuses = match resolved.status_filter.as_deref() {
        Some("SENT") | Some("DEAD") | Some("FAILED") => return Ok(Vec::new()),
        Some(active) => vec![active.to_string()],
        None => vec!["PENDING".to_string(), "RETRYING".to_string()],
    };
    query_outbox_items(
        &st.pool,
        &OutboxQuery {
            statuses: Some(statuses),
            event_type: resolved.query.event_type.clone(),
            channel_target: resolved.query.channel_target.clone(),
            date_from: resolved.query.date_from,
            date_to: resolved.query.date_to,
            ascending: true,
            limit: None,
        },
    )
    .await
}

pub async fn stats(
    State(st): State<Arc<AppState>>,
    Query(params): Query<NotificationAnalyticsQuery>,
) -> ApiResult<Json<Value>> {
    let resolved = resolve_attempt_query(&params, false)?;
    let attempts = query_delivery_attempts(&st.pool, &resolved.query).await?;
    let pending = pending_rows(&st, &resolved).await?;
    Ok(Json(compute_notification_stats(
        &attempts,
        &pending,
        now_utc(),
        resolved.filters_json,
    )))
}

pub async fn trends(
    State(st): State<Arc<AppState>>,
    Query(params): Query<NotificationAnalyticsQuery>,
) -> ApiResult<Json<Value>> {
    let bucket = TrendBucket::parse(params.bucket.as_deref().unwrap_or("day"))?;
    let resolved = resolve_attempt_query(&params, false)?;
    let attempts = query_delivery_attempts(&st.pool, &resolved.query).await?;
    Ok(Json(compute_notification_trends(
        &attempts,
        bucket,
        resolved.filters_json,
    )))
}

pub async fn channels(
    State(st): State<Arc<AppState>>,
    Query(params): Query<NotificationAnalyticsQuery>,
) -> ApiResult<Json<Value>> {
    let resolved = resolve_attempt_query(&params, false)?;
    let attempts = query_delivery_attempts(&st.pool, &resolved.query).await?;
    let pending = pending_rows(&st, &resolved).await?;
    Ok(Json(compute_channel_summaries(
        &attempts,
        &pending,
        resolved.filters_json,
    )))
}

/// Configured channel endpoints, sanitised: no URLs, no secret values.
pub async fn endpoints(State(_st): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let document = pfd_config::load_notification_channels(None)?;
    let items: Vec<Value> = document
        .channels
        .iter()
        .map(|channel| {
            json!({
                "id": channel.id,
                "channel_type": channel.channel_type,
                "enabled": channel.enabled,
                "timeout_seconds": channel.timeout_seconds,
                "max_attempts": channel.max_attempts,
                "backoff_seconds": channel.backoff_seconds,
                "enabled_event_types": channel.enabled_event_types,
                "target_configured": channel.target_url.is_some(),
                "signing_secret_env_set": channel.signing_secret_env.is_some(),
            })
        })
        .collect();

    Ok(Json(json!({
        "path": document.path.display().to_string(),
        "version": document.version,
        "items": items,
    })))
}

/// Outbox rows (any status) filtered like the analytics endpoints.
pub async fn deliveries(
    State(st): State<Arc<AppState>>,
    Query(params): Query<NotificationAnalyticsQuery>,
) -> ApiResult<Json<Value>> {
    let limit = params.limit.unwrap_or(100).clamp(1, 1000);
    let event_type = normalize_event_type(params.event_type.as_deref())?;
    let status = normalize_status_filter(params.status.as_deref())?;
    let window = resolve_analytics_window(
        params.date_from.as_deref(),
        params.date_to.as_deref(),
        params.days,
        now_utc(),
        DEFAULT_ANALYTICS_DAYS,
    )?;

    let items = query_outbox_items(
        &st.pool,
        &OutboxQuery {
            statuses: status.map(|s| vec![s]),
            event_type,
            channel_target: params
                .channel_target
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            date_from: window.date_from,
            date_to: window.date_to,
            ascending: false,
            limit: Some(limit),
        },
    )
    .await?;

    Ok(Json(json!({"limit": limit, "items": items})))
}

pub async fn attempts(
    State(st): State<Arc<AppState>>,
    Query(params): Query<NotificationAnalyticsQuery>,
) -> ApiResult<Json<Value>> {
    let limit = params.limit.unwrap_or(100).clamp(1, 1000);
    let mut resolved = resolve_attempt_query(&params, true)?;
    resolved.query.ascending = false;
    resolved.query.limit = Some(limit);

    let rows = query_delivery_attempts(&st.pool, &resolved.query).await?;
    Ok(Json(json!({
        "limit": limit,
        "filters": resolved.filters_json,
        "items": rows,
    })))
}

pub async fn attempt_details(
    State(st): State<Arc<AppState>>,
    Path(attempt_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let normalized = attempt_id.trim();
    if normalized.is_empty() {
        return Err(DiagnosticsError::payload("attempt_id is required").into());
    }
    let row = get_delivery_attempt(&st.pool, normalized)
        .await?
        .ok_or_else(|| {
            DiagnosticsError::not_found(format!("Delivery attempt not found: {normalized}"))
        })?;
    Ok(Json(serde_json::to_value(row)?))
}

// ---------------------------------------------------------------------------
// Mutations
// ---------------------------------------------------------------------------

pub async fn dispatch(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Option<Json<DispatchBody>>,
) -> ApiResult<Json<Value>> {
    let limit = body.and_then(|Json(b)| b.limit).unwrap_or(50);
    let channels = pfd_config::safe_load_channels(None);
    let sender = HttpWebhookSender::new();
    let summary = pfd_notify::dispatch_due(
        &st.pool,
        &channels,
        &sender,
        limit,
        now_utc(),
        &actor_from_headers(&headers),
    )
    .await?;
    Ok(Json(serde_json::to_value(summary)?))
}

pub async fn replay(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(item_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let summary =
        pfd_notify::replay_outbox_item(&st.pool, &item_id, &actor_from_headers(&headers)).await?;
    Ok(Json(json!({
        "actor": summary.actor,
        "replayed_count": summary.replayed_count,
        "items": summary.items,
    })))
}

pub async fn replay_dead(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Option<Json<ReplayDeadBody>>,
) -> ApiResult<Json<Value>> {
    let limit = body.and_then(|Json(b)| b.limit).unwrap_or(50);
    let summary =
        pfd_notify::replay_dead_outbox(&st.pool, limit, &actor_from_headers(&headers)).await?;
    Ok(Json(json!({
        "actor": summary.actor,
        "replayed_count": summary.replayed_count,
        "items": summary.items,
    })))
}
