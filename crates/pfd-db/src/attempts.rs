//! Immutable delivery-attempt ledger: one row per physical HTTP attempt.
//!
//! Rows are inserted in STARTED status before the HTTP call and finalised
//! exactly once afterwards. A crash mid-flight leaves an orphan STARTED row,
//! which analytics must treat as neither success nor error.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};

pub const ERROR_MESSAGE_MAX_CHARS: usize = 512;

#[derive(Debug, Clone, serde::Serialize)]
pub struct DeliveryAttemptRow {
    pub attempt_id: String,
    pub outbox_item_id: String,
    pub event_id: Option<String>,
    pub delivery_id: Option<String>,
    pub replayed_from_id: Option<String>,
    pub channel_type: String,
    pub channel_target: String,
    pub event_type: String,
    pub alert_id: String,
    pub policy_id: String,
    pub source_name: Option<String>,
    pub attempt_number: i32,
    pub attempt_status: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub http_status: Option<i32>,
    pub error_code: Option<String>,
    pub error_message_safe: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewDeliveryAttempt {
    pub attempt_id: String,
    pub outbox_item_id: String,
    pub event_id: Option<String>,
    pub delivery_id: Option<String>,
    pub replayed_from_id: Option<String>,
    pub channel_type: String,
    pub channel_target: String,
    pub event_type: String,
    pub alert_id: String,
    pub policy_id: String,
    pub source_name: Option<String>,
    pub attempt_number: i32,
    pub started_at: DateTime<Utc>,
}

const ATTEMPT_COLUMNS: &str = "attempt_id, outbox_item_id, event_id, delivery_id, \
     replayed_from_id, channel_type, channel_target, event_type, alert_id, policy_id, \
     source_name, attempt_number, attempt_status, started_at, completed_at, duration_ms, \
     http_status, error_code, error_message_safe, created_at";

fn attempt_from_row(row: &PgRow) -> Result<DeliveryAttemptRow> {
    Ok(DeliveryAttemptRow {
        attempt_id: row.try_get("attempt_id")?,
        outbox_item_id: row.try_get("outbox_item_id")?,
        event_id: row.try_get("event_id")?,
        delivery_id: row.try_get("delivery_id")?,
        replayed_from_id: row.try_get("replayed_from_id")?,
        channel_type: row.try_get("channel_type")?,
        channel_target: row.try_get("channel_target")?,
        event_type: row.try_get("event_type")?,
        alert_id: row.try_get("alert_id")?,
        policy_id: row.try_get("policy_id")?,
        source_name: row.try_get("source_name")?,
        attempt_number: row.try_get("attempt_number")?,
        attempt_status: row.try_get("attempt_status")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        duration_ms: row.try_get("duration_ms")?,
        http_status: row.try_get("http_status")?,
        error_code: row.try_get("error_code")?,
        error_message_safe: row.try_get("error_message_safe")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Single line, no control characters, truncated to 512 chars. Applied to
/// every error message before it reaches the ledger.
pub fn sanitize_error_message(value: Option<&str>) -> Option<String> {
    let raw = value?.trim();
    if raw.is_empty() {
        return None;
    }
    let single_line: String = raw
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    let collapsed = single_line.split_whitespace().collect::<Vec<_>>().join(" ");
    Some(collapsed.chars().take(ERROR_MESSAGE_MAX_CHARS).collect())
}

pub async fn insert_delivery_attempt_started(
    pool: &PgPool,
    attempt: &NewDeliveryAttempt,
) -> Result<()> {
    sqlx::query(
        r#"
        insert into preflight_notification_delivery_attempt (
          attempt_id, outbox_item_id, event_id, delivery_id, replayed_from_id,
          channel_type, channel_target, event_type, alert_id, policy_id, source_name,
          attempt_number, attempt_status, started_at, created_at
        ) values (
          $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, 'STARTED', $13, $13
        )
        "#,
    )
    .bind(&attempt.attempt_id)
    .bind(&attempt.outbox_item_id)
    .bind(&attempt.event_id)
    .bind(&attempt.delivery_id)
    .bind(&attempt.replayed_from_id)
    .bind(&attempt.channel_type)
    .bind(&attempt.channel_target)
    .bind(&attempt.event_type)
    .bind(&attempt.alert_id)
    .bind(&attempt.policy_id)
    .bind(&attempt.source_name)
    .bind(attempt.attempt_number)
    .bind(attempt.started_at)
    .execute(pool)
    .await
    .context("insert_delivery_attempt_started failed")?;
    Ok(())
}

/// Finalise a STARTED row exactly once. `duration_ms` is computed in SQL
/// from the persisted `started_at` so it never goes negative.
pub async fn complete_delivery_attempt(
    pool: &PgPool,
    attempt_id: &str,
    attempt_status: &str,
    completed_at: DateTime<Utc>,
    http_status: Option<i32>,
    error_code: Option<&str>,
    error_message_safe: Option<&str>,
) -> Result<bool> {
    let sanitized = sanitize_error_message(error_message_safe);
    let row: Option<(String,)> = sqlx::query_as(
        r#"
        update preflight_notification_delivery_attempt
           set attempt_status     = $2,
               completed_at       = $3,
               duration_ms        = greatest(0::bigint, (extract(epoch from ($3 - started_at)) * 1000)::bigint),
               http_status        = $4,
               error_code         = $5,
               error_message_safe = $6
         where attempt_id = $1
           and attempt_status = 'STARTED'
        returning attempt_id
        "#,
    )
    .bind(attempt_id)
    .bind(attempt_status)
    .bind(completed_at)
    .bind(http_status)
    .bind(error_code)
    .bind(sanitized)
    .fetch_optional(pool)
    .await
    .context("complete_delivery_attempt failed")?;
    Ok(row.is_some())
}

pub async fn get_delivery_attempt(
    pool: &PgPool,
    attempt_id: &str,
) -> Result<Option<DeliveryAttemptRow>> {
    let sql = format!(
        "select {ATTEMPT_COLUMNS} from preflight_notification_delivery_attempt where attempt_id = $1"
    );
    let row = sqlx::query(&sql)
        .bind(attempt_id)
        .fetch_optional(pool)
        .await
        .context("get_delivery_attempt failed")?;
    row.as_ref().map(attempt_from_row).transpose()
}

/// Ledger rows for one outbox item, in attempt order. Used to verify the
/// ledger stays gapless across a delivery's life.
pub async fn list_attempts_for_outbox_item(
    pool: &PgPool,
    outbox_item_id: &str,
) -> Result<Vec<DeliveryAttemptRow>> {
    let sql = format!(
        r#"
        select {ATTEMPT_COLUMNS}
        from preflight_notification_delivery_attempt
        where outbox_item_id = $1
        order by attempt_number asc
        "#
    );
    let rows = sqlx::query(&sql)
        .bind(outbox_item_id)
        .fetch_all(pool)
        .await
        .context("list_attempts_for_outbox_item failed")?;
    rows.iter().map(attempt_from_row).collect()
}

/// Analytics-facing filter over the ledger, windowed on `started_at`.
#[derive(Debug, Clone, Default)]
pub struct AttemptQuery {
    pub attempt_statuses: Option<Vec<String>>,
    pub event_type: Option<String>,
    pub channel_target: Option<String>,
    pub alert_id: Option<String>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub ascending: bool,
    pub limit: Option<i64>,
}

pub async fn query_delivery_attempts(
    pool: &PgPool,
    query: &AttemptQuery,
) -> Result<Vec<DeliveryAttemptRow>> {
    let direction = if query.ascending { "asc" } else { "desc" };
    let sql = format!(
        r#"
        select {ATTEMPT_COLUMNS}
        from preflight_notification_delivery_attempt
        where ($1::text[] is null or attempt_status = any($1))
          and ($2::text is null or event_type = $2)
          and ($3::text is null or channel_target = $3)
          and ($4::text is null or alert_id = $4)
          and ($5::timestamptz is null or started_at >= $5)
          and ($6::timestamptz is null or started_at <= $6)
        order by started_at {direction}
        limit $7
        "#
    );
    let rows = sqlx::query(&sql)
        .bind(&query.attempt_statuses)
        .bind(&query.event_type)
        .bind(&query.channel_target)
        .bind(&query.alert_id)
        .bind(query.date_from)
        .bind(query.date_to)
        .bind(query.limit)
        .fetch_all(pool)
        .await
        .context("query_delivery_attempts failed")?;
    rows.iter().map(attempt_from_row).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_collapses_newlines_and_truncates() {
        let raw = format!("line one\nline two\r\n{}", "x".repeat(600));
        let cleaned = sanitize_error_message(Some(&raw)).unwrap();
        assert!(!cleaned.contains('\n'));
        assert!(cleaned.starts_with("line one line two"));
        assert_eq!(cleaned.chars().count(), ERROR_MESSAGE_MAX_CHARS);
    }

    #[test]
    fn sanitize_drops_empty_input() {
        assert_eq!(sanitize_error_message(None), None);
        assert_eq!(sanitize_error_message(Some("   ")), None);
    }
}
