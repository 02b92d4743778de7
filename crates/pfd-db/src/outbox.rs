//! Notification outbox: append-only writer with controlled status
//! transitions.
//!
//! Transition predicates live in the `WHERE` clause of each update; the
//! returned boolean reports whether a row actually transitioned. A replay
//! is a single `INSERT .. SELECT` so the replayable-status check cannot
//! race with a concurrent dispatcher.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use pfd_schemas::sort_keys;
use serde_json::Value;
use sqlx::{postgres::PgRow, PgPool, Row};

/// One delivery job: a single transition bound for a single channel.
#[derive(Debug, Clone, serde::Serialize)]
pub struct OutboxItem {
    pub id: String,
    pub event_id: Option<String>,
    pub delivery_id: Option<String>,
    pub replayed_from_id: Option<String>,
    pub event_type: String,
    pub alert_id: String,
    pub policy_id: String,
    pub severity: Option<String>,
    pub source_name: Option<String>,
    pub payload_json: Value,
    pub channel_type: String,
    pub channel_target: String,
    pub status: String,
    pub attempt_count: i32,
    pub max_attempts: i32,
    pub next_retry_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub last_http_status: Option<i32>,
    pub last_error_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

const OUTBOX_COLUMNS: &str = "id, event_id, delivery_id, replayed_from_id, event_type, \
     alert_id, policy_id, severity, source_name, payload_json, channel_type, \
     channel_target, status, attempt_count, max_attempts, next_retry_at, last_error, \
     last_http_status, last_error_code, created_at, updated_at, sent_at";

fn item_from_row(row: &PgRow) -> Result<OutboxItem> {
    Ok(OutboxItem {
        id: row.try_get("id")?,
        event_id: row.try_get("event_id")?,
        delivery_id: row.try_get("delivery_id")?,
        replayed_from_id: row.try_get("replayed_from_id")?,
        event_type: row.try_get("event_type")?,
        alert_id: row.try_get("alert_id")?,
        policy_id: row.try_get("policy_id")?,
        severity: row.try_get("severity")?,
        source_name: row.try_get("source_name")?,
        payload_json: row.try_get("payload_json")?,
        channel_type: row.try_get("channel_type")?,
        channel_target: row.try_get("channel_target")?,
        status: row.try_get("status")?,
        attempt_count: row.try_get("attempt_count")?,
        max_attempts: row.try_get("max_attempts")?,
        next_retry_at: row.try_get("next_retry_at")?,
        last_error: row.try_get("last_error")?,
        last_http_status: row.try_get("last_http_status")?,
        last_error_code: row.try_get("last_error_code")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        sent_at: row.try_get("sent_at")?,
    })
}

pub async fn insert_outbox_item(pool: &PgPool, item: &OutboxItem) -> Result<()> {
    sqlx::query(
        r#"
        insert into preflight_notification_outbox (
          id, event_id, delivery_id, replayed_from_id, event_type, alert_id, policy_id,
          severity, source_name, payload_json, channel_type, channel_target, status,
          attempt_count, max_attempts, next_retry_at, last_error, last_http_status,
          last_error_code, created_at, updated_at, sent_at
        ) values (
          $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
          $14, $15, $16, $17, $18, $19, $20, $21, $22
        )
        "#,
    )
    .bind(&item.id)
    .bind(&item.event_id)
    .bind(&item.delivery_id)
    .bind(&item.replayed_from_id)
    .bind(&item.event_type)
    .bind(&item.alert_id)
    .bind(&item.policy_id)
    .bind(&item.severity)
    .bind(&item.source_name)
    .bind(sort_keys(&item.payload_json))
    .bind(&item.channel_type)
    .bind(&item.channel_target)
    .bind(&item.status)
    .bind(item.attempt_count)
    .bind(item.max_attempts)
    .bind(item.next_retry_at)
    .bind(&item.last_error)
    .bind(item.last_http_status)
    .bind(&item.last_error_code)
    .bind(item.created_at)
    .bind(item.updated_at)
    .bind(item.sent_at)
    .execute(pool)
    .await
    .context("insert_outbox_item failed")?;
    Ok(())
}

/// Due rows in `{PENDING, RETRYING}` ordered by `next_retry_at`, oldest
/// enqueue first on ties.
pub async fn list_due_outbox_items(
    pool: &PgPool,
    limit: i64,
    now: DateTime<Utc>,
) -> Result<Vec<OutboxItem>> {
    let sql = format!(
        r#"
        select {OUTBOX_COLUMNS}
        from preflight_notification_outbox
        where status in ('PENDING', 'RETRYING')
          and next_retry_at <= $1
        order by next_retry_at asc, created_at asc
        limit $2
        "#
    );
    let rows = sqlx::query(&sql)
        .bind(now)
        .bind(limit.clamp(1, 1000))
        .fetch_all(pool)
        .await
        .context("list_due_outbox_items failed")?;
    rows.iter().map(item_from_row).collect()
}

pub async fn get_outbox_item(pool: &PgPool, id: &str) -> Result<Option<OutboxItem>> {
    let sql = format!("select {OUTBOX_COLUMNS} from preflight_notification_outbox where id = $1");
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("get_outbox_item failed")?;
    row.as_ref().map(item_from_row).transpose()
}

/// Mark a due row SENT. Only `{PENDING, RETRYING}` rows transition; the
/// boolean reports whether one did.
pub async fn mark_outbox_sent(
    pool: &PgPool,
    id: &str,
    attempt_count: i32,
    sent_at: DateTime<Utc>,
    delivery_id: &str,
    last_http_status: Option<i32>,
    now: DateTime<Utc>,
) -> Result<bool> {
    let row: Option<(String,)> = sqlx::query_as(
        r#"
        update preflight_notification_outbox
           set status           = 'SENT',
               attempt_count    = $2,
               sent_at          = $3,
               delivery_id      = $4,
               last_http_status = $5,
               last_error       = null,
               last_error_code  = null,
               updated_at       = $6
         where id = $1
           and status in ('PENDING', 'RETRYING')
        returning id
        "#,
    )
    .bind(id)
    .bind(attempt_count)
    .bind(sent_at)
    .bind(delivery_id)
    .bind(last_http_status)
    .bind(now)
    .fetch_optional(pool)
    .await
    .context("mark_outbox_sent failed")?;
    Ok(row.is_some())
}

/// Schedule a retry. `next_retry_at` only ever moves forward because the
/// new value is `now + backoff` computed by the dispatcher.
#[allow(clippy::too_many_arguments)]
pub async fn mark_outbox_retry(
    pool: &PgPool,
    id: &str,
    attempt_count: i32,
    next_retry_at: DateTime<Utc>,
    delivery_id: &str,
    last_error: Option<&str>,
    last_http_status: Option<i32>,
    last_error_code: Option<&str>,
    now: DateTime<Utc>,
) -> Result<bool> {
    let row: Option<(String,)> = sqlx::query_as(
        r#"
        update preflight_notification_outbox
           set status           = 'RETRYING',
               attempt_count    = $2,
               next_retry_at    = $3,
               delivery_id      = $4,
               last_error       = $5,
               last_http_status = $6,
               last_error_code  = $7,
               updated_at       = $8
         where id = $1
           and status in ('PENDING', 'RETRYING')
        returning id
        "#,
    )
    .bind(id)
    .bind(attempt_count)
    .bind(next_retry_at)
    .bind(delivery_id)
    .bind(last_error)
    .bind(last_http_status)
    .bind(last_error_code)
    .bind(now)
    .fetch_optional(pool)
    .await
    .context("mark_outbox_retry failed")?;
    Ok(row.is_some())
}

/// Terminal DEAD transition.
#[allow(clippy::too_many_arguments)]
pub async fn mark_outbox_dead(
    pool: &PgPool,
    id: &str,
    attempt_count: i32,
    delivery_id: &str,
    last_error: Option<&str>,
    last_http_status: Option<i32>,
    last_error_code: Option<&str>,
    now: DateTime<Utc>,
) -> Result<bool> {
    let row: Option<(String,)> = sqlx::query_as(
        r#"
        update preflight_notification_outbox
           set status           = 'DEAD',
               attempt_count    = $2,
               delivery_id      = $3,
               last_error       = $4,
               last_http_status = $5,
               last_error_code  = $6,
               updated_at       = $7
         where id = $1
           and status in ('PENDING', 'RETRYING')
        returning id
        "#,
    )
    .bind(id)
    .bind(attempt_count)
    .bind(delivery_id)
    .bind(last_error)
    .bind(last_http_status)
    .bind(last_error_code)
    .bind(now)
    .fetch_optional(pool)
    .await
    .context("mark_outbox_dead failed")?;
    Ok(row.is_some())
}

/// Clone a terminal row for replay: fresh `id` and `delivery_id`, same
/// `event_id`, `replayed_from_id` pointing at the source, counters reset.
///
/// Returns None when the source row is missing or not in
/// `{DEAD, FAILED, SENT}`.
pub async fn clone_outbox_item_for_replay(
    pool: &PgPool,
    source_id: &str,
    new_id: &str,
    new_delivery_id: &str,
    now: DateTime<Utc>,
) -> Result<Option<OutboxItem>> {
    let sql = format!(
        r#"
        insert into preflight_notification_outbox (
          id, event_id, delivery_id, replayed_from_id, event_type, alert_id, policy_id,
          severity, source_name, payload_json, channel_type, channel_target, status,
          attempt_count, max_attempts, next_retry_at, created_at, updated_at
        )
        select $2, event_id, $3, id, event_type, alert_id, policy_id,
               severity, source_name, payload_json, channel_type, channel_target, 'PENDING',
               0, max_attempts, $4, $4, $4
        from preflight_notification_outbox
        where id = $1
          and status in ('DEAD', 'FAILED', 'SENT')
        returning {OUTBOX_COLUMNS}
        "#
    );
    let row = sqlx::query(&sql)
        .bind(source_id)
        .bind(new_id)
        .bind(new_delivery_id)
        .bind(now)
        .fetch_optional(pool)
        .await
        .context("clone_outbox_item_for_replay failed")?;
    row.as_ref().map(item_from_row).transpose()
}

/// Rows in any of `statuses`, newest first.
pub async fn list_outbox_history(
    pool: &PgPool,
    limit: i64,
    statuses: &[&str],
) -> Result<Vec<OutboxItem>> {
    let status_list: Vec<String> = statuses.iter().map(|s| s.to_string()).collect();
    let sql = format!(
        r#"
        select {OUTBOX_COLUMNS}
        from preflight_notification_outbox
        where status = any($1)
        order by created_at desc
        limit $2
        "#
    );
    let rows = sqlx::query(&sql)
        .bind(&status_list)
        .bind(limit.clamp(1, 1000))
        .fetch_all(pool)
        .await
        .context("list_outbox_history failed")?;
    rows.iter().map(item_from_row).collect()
}

/// Analytics-facing filter over outbox rows.
#[derive(Debug, Clone, Default)]
pub struct OutboxQuery {
    pub statuses: Option<Vec<String>>,
    pub event_type: Option<String>,
    pub channel_target: Option<String>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub ascending: bool,
    pub limit: Option<i64>,
}

pub async fn query_outbox_items(pool: &PgPool, query: &OutboxQuery) -> Result<Vec<OutboxItem>> {
    let direction = if query.ascending { "asc" } else { "desc" };
    let sql = format!(
        r#"
        select {OUTBOX_COLUMNS}
        from preflight_notification_outbox
        where ($1::text[] is null or status = any($1))
          and ($2::text is null or event_type = $2)
          and ($3::text is null or channel_target = $3)
          and ($4::timestamptz is null or created_at >= $4)
          and ($5::timestamptz is null or created_at <= $5)
        order by created_at {direction}
        limit $6
        "#
    );
    let rows = sqlx::query(&sql)
        .bind(&query.statuses)
        .bind(&query.event_type)
        .bind(&query.channel_target)
        .bind(query.date_from)
        .bind(query.date_to)
        .bind(query.limit)
        .fetch_all(pool)
        .await
        .context("query_outbox_items failed")?;
    rows.iter().map(item_from_row).collect()
}
