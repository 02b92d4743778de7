//! Alert state, history, silences, acknowledgements, audit trail, and the
//! scheduler lease.
//!
//! State and history writers are generic over the executor so the alert
//! engine can commit both inside one transaction; everything else takes the
//! pool directly.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use pfd_schemas::sort_keys;
use serde_json::Value;
use sqlx::{postgres::PgRow, PgExecutor, PgPool, Row};

// ---------------------------------------------------------------------------
// Alert state
// ---------------------------------------------------------------------------

/// One row per policy while the policy is not OK.
#[derive(Debug, Clone)]
pub struct AlertStateRow {
    pub policy_id: String,
    pub status: String,
    pub severity: String,
    pub source_name: Option<String>,
    pub first_seen_at: Option<DateTime<Utc>>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub consecutive_breaches: i32,
    pub current_value: Option<f64>,
    pub threshold: Option<f64>,
    pub message: String,
    pub evaluation_context_json: Value,
    pub policy_snapshot_json: Value,
    pub updated_at: DateTime<Utc>,
}

fn state_from_row(row: &PgRow) -> Result<AlertStateRow> {
    Ok(AlertStateRow {
        policy_id: row.try_get("policy_id")?,
        status: row.try_get("status")?,
        severity: row.try_get("severity")?,
        source_name: row.try_get("source_name")?,
        first_seen_at: row.try_get("first_seen_at")?,
        last_seen_at: row.try_get("last_seen_at")?,
        consecutive_breaches: row.try_get("consecutive_breaches")?,
        current_value: row.try_get("current_value")?,
        threshold: row.try_get("threshold")?,
        message: row.try_get("message")?,
        evaluation_context_json: row.try_get("evaluation_context_json")?,
        policy_snapshot_json: row.try_get("policy_snapshot_json")?,
        updated_at: row.try_get("updated_at")?,
    })
}

const STATE_COLUMNS: &str = "policy_id, status, severity, source_name, first_seen_at, \
     last_seen_at, consecutive_breaches, current_value, threshold, message, \
     evaluation_context_json, policy_snapshot_json, updated_at";

pub async fn upsert_alert_state<'e, E>(executor: E, row: &AlertStateRow) -> Result<()>
where
    E: PgExecutor<'e>,
{
    sqlx::query(
        r#"
        insert into preflight_alert_state (
          policy_id, status, severity, source_name, first_seen_at, last_seen_at,
          consecutive_breaches, current_value, threshold, message,
          evaluation_context_json, policy_snapshot_json, updated_at
        ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        on conflict (policy_id) do update set
          status                  = excluded.status,
          severity                = excluded.severity,
          source_name             = excluded.source_name,
          first_seen_at           = excluded.first_seen_at,
          last_seen_at            = excluded.last_seen_at,
          consecutive_breaches    = excluded.consecutive_breaches,
          current_value           = excluded.current_value,
          threshold               = excluded.threshold,
          message                 = excluded.message,
          evaluation_context_json = excluded.evaluation_context_json,
          policy_snapshot_json    = excluded.policy_snapshot_json,
          updated_at              = excluded.updated_at
        "#,
    )
    .bind(&row.policy_id)
    .bind(&row.status)
    .bind(&row.severity)
    .bind(&row.source_name)
    .bind(row.first_seen_at)
    .bind(row.last_seen_at)
    .bind(row.consecutive_breaches)
    .bind(row.current_value)
    .bind(row.threshold)
    .bind(&row.message)
    .bind(sort_keys(&row.evaluation_context_json))
    .bind(sort_keys(&row.policy_snapshot_json))
    .bind(row.updated_at)
    .execute(executor)
    .await
    .context("upsert_alert_state failed")?;
    Ok(())
}

pub async fn get_alert_state(pool: &PgPool, policy_id: &str) -> Result<Option<AlertStateRow>> {
    let sql = format!("select {STATE_COLUMNS} from preflight_alert_state where policy_id = $1");
    let row = sqlx::query(&sql)
        .bind(policy_id)
        .fetch_optional(pool)
        .await
        .context("get_alert_state failed")?;
    row.as_ref().map(state_from_row).transpose()
}

pub async fn delete_alert_state<'e, E>(executor: E, policy_id: &str) -> Result<()>
where
    E: PgExecutor<'e>,
{
    sqlx::query("delete from preflight_alert_state where policy_id = $1")
        .bind(policy_id)
        .execute(executor)
        .await
        .context("delete_alert_state failed")?;
    Ok(())
}

/// PENDING/FIRING rows, most recently seen first.
pub async fn list_active_alert_states(pool: &PgPool, limit: i64) -> Result<Vec<AlertStateRow>> {
    let sql = format!(
        r#"
        select {STATE_COLUMNS}
        from preflight_alert_state
        where status in ('PENDING', 'FIRING')
        order by last_seen_at desc nulls last
        limit $1
        "#
    );
    let rows = sqlx::query(&sql)
        .bind(limit.clamp(1, 5000))
        .fetch_all(pool)
        .await
        .context("list_active_alert_states failed")?;
    rows.iter().map(state_from_row).collect()
}

// ---------------------------------------------------------------------------
// Alert history (append-only)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct NewAlertHistory {
    pub policy_id: String,
    pub status: String,
    pub severity: String,
    pub source_name: Option<String>,
    pub first_seen_at: Option<DateTime<Utc>>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub current_value: Option<f64>,
    pub threshold: Option<f64>,
    pub message: String,
    pub evaluation_context_json: Value,
    pub policy_snapshot_json: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AlertHistoryRow {
    pub id: i64,
    pub policy_id: String,
    pub status: String,
    pub severity: String,
    pub source_name: Option<String>,
    pub first_seen_at: Option<DateTime<Utc>>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub current_value: Option<f64>,
    pub threshold: Option<f64>,
    pub message: String,
    pub evaluation_context_json: Value,
    pub policy_snapshot_json: Value,
    pub created_at: DateTime<Utc>,
}

pub async fn insert_alert_history<'e, E>(executor: E, row: &NewAlertHistory) -> Result<()>
where
    E: PgExecutor<'e>,
{
    sqlx::query(
        r#"
        insert into preflight_alert_history (
          policy_id, status, severity, source_name, first_seen_at, last_seen_at,
          resolved_at, current_value, threshold, message,
          evaluation_context_json, policy_snapshot_json, created_at
        ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        "#,
    )
    .bind(&row.policy_id)
    .bind(&row.status)
    .bind(&row.severity)
    .bind(&row.source_name)
    .bind(row.first_seen_at)
    .bind(row.last_seen_at)
    .bind(row.resolved_at)
    .bind(row.current_value)
    .bind(row.threshold)
    .bind(&row.message)
    .bind(sort_keys(&row.evaluation_context_json))
    .bind(sort_keys(&row.policy_snapshot_json))
    .bind(row.created_at)
    .execute(executor)
    .await
    .context("insert_alert_history failed")?;
    Ok(())
}

pub async fn list_alert_history(pool: &PgPool, limit: i64) -> Result<Vec<AlertHistoryRow>> {
    let rows = sqlx::query(
        r#"
        select id, policy_id, status, severity, source_name, first_seen_at, last_seen_at,
               resolved_at, current_value, threshold, message,
               evaluation_context_json, policy_snapshot_json, created_at
        from preflight_alert_history
        order by created_at desc, id desc
        limit $1
        "#,
    )
    .bind(limit.clamp(1, 500))
    .fetch_all(pool)
    .await
    .context("list_alert_history failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(AlertHistoryRow {
            id: row.try_get("id")?,
            policy_id: row.try_get("policy_id")?,
            status: row.try_get("status")?,
            severity: row.try_get("severity")?,
            source_name: row.try_get("source_name")?,
            first_seen_at: row.try_get("first_seen_at")?,
            last_seen_at: row.try_get("last_seen_at")?,
            resolved_at: row.try_get("resolved_at")?,
            current_value: row.try_get("current_value")?,
            threshold: row.try_get("threshold")?,
            message: row.try_get("message")?,
            evaluation_context_json: row.try_get("evaluation_context_json")?,
            policy_snapshot_json: row.try_get("policy_snapshot_json")?,
            created_at: row.try_get("created_at")?,
        });
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Silences
// ---------------------------------------------------------------------------

/// Filter-scoped suppression overlay. Missing filter fields are wildcards.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SilenceRow {
    pub silence_id: String,
    pub policy_id: Option<String>,
    pub source_name: Option<String>,
    pub severity: Option<String>,
    pub rule_id: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub reason: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub expired_at: Option<DateTime<Utc>>,
}

impl SilenceRow {
    pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
        self.expired_at.is_none() && self.starts_at <= at && at < self.ends_at
    }
}

fn silence_from_row(row: &PgRow) -> Result<SilenceRow> {
    Ok(SilenceRow {
        silence_id: row.try_get("silence_id")?,
        policy_id: row.try_get("policy_id")?,
        source_name: row.try_get("source_name")?,
        severity: row.try_get("severity")?,
        rule_id: row.try_get("rule_id")?,
        starts_at: row.try_get("starts_at")?,
        ends_at: row.try_get("ends_at")?,
        reason: row.try_get("reason")?,
        created_by: row.try_get("created_by")?,
        created_at: row.try_get("created_at")?,
        expired_at: row.try_get("expired_at")?,
    })
}

const SILENCE_COLUMNS: &str = "silence_id, policy_id, source_name, severity, rule_id, \
     starts_at, ends_at, reason, created_by, created_at, expired_at";

pub async fn create_silence(pool: &PgPool, row: &SilenceRow) -> Result<()> {
    sqlx::query(
        r#"
        insert into preflight_alert_silence (
          silence_id, policy_id, source_name, severity, rule_id,
          starts_at, ends_at, reason, created_by, created_at, expired_at
        ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(&row.silence_id)
    .bind(&row.policy_id)
    .bind(&row.source_name)
    .bind(&row.severity)
    .bind(&row.rule_id)
    .bind(row.starts_at)
    .bind(row.ends_at)
    .bind(&row.reason)
    .bind(&row.created_by)
    .bind(row.created_at)
    .bind(row.expired_at)
    .execute(pool)
    .await
    .context("create_silence failed")?;
    Ok(())
}

pub async fn get_silence(pool: &PgPool, silence_id: &str) -> Result<Option<SilenceRow>> {
    let sql = format!("select {SILENCE_COLUMNS} from preflight_alert_silence where silence_id = $1");
    let row = sqlx::query(&sql)
        .bind(silence_id)
        .fetch_optional(pool)
        .await
        .context("get_silence failed")?;
    row.as_ref().map(silence_from_row).transpose()
}

/// Stamp `expired_at` (idempotent). Returns the updated row when it exists.
pub async fn expire_silence(
    pool: &PgPool,
    silence_id: &str,
    at: DateTime<Utc>,
) -> Result<Option<SilenceRow>> {
    let sql = format!(
        r#"
        update preflight_alert_silence
           set expired_at = coalesce(expired_at, $2)
         where silence_id = $1
        returning {SILENCE_COLUMNS}
        "#
    );
    let row = sqlx::query(&sql)
        .bind(silence_id)
        .bind(at)
        .fetch_optional(pool)
        .await
        .context("expire_silence failed")?;
    row.as_ref().map(silence_from_row).transpose()
}

/// Expire every silence whose window has elapsed. Idempotent; called from
/// both read and evaluate paths.
pub async fn expire_elapsed_silences(pool: &PgPool, now: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query(
        r#"
        update preflight_alert_silence
           set expired_at = $1
         where expired_at is null
           and ends_at <= $1
        "#,
    )
    .bind(now)
    .execute(pool)
    .await
    .context("expire_elapsed_silences failed")?;
    Ok(result.rows_affected())
}

pub async fn list_silences(
    pool: &PgPool,
    limit: i64,
    include_expired: bool,
    active_only: bool,
    at: DateTime<Utc>,
) -> Result<Vec<SilenceRow>> {
    let sql = format!(
        r#"
        select {SILENCE_COLUMNS}
        from preflight_alert_silence
        where ($2 or expired_at is null)
          and (not $3 or (expired_at is null and starts_at <= $4 and ends_at > $4))
        order by created_at desc
        limit $1
        "#
    );
    let rows = sqlx::query(&sql)
        .bind(limit.clamp(1, 1000))
        .bind(include_expired)
        .bind(active_only)
        .bind(at)
        .fetch_all(pool)
        .await
        .context("list_silences failed")?;
    rows.iter().map(silence_from_row).collect()
}

pub async fn count_active_silences(pool: &PgPool, at: DateTime<Utc>) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as(
        r#"
        select count(*)::bigint
        from preflight_alert_silence
        where expired_at is null
          and starts_at <= $1
          and ends_at > $1
        "#,
    )
    .bind(at)
    .fetch_one(pool)
    .await
    .context("count_active_silences failed")?;
    Ok(count)
}

// ---------------------------------------------------------------------------
// Acknowledgements
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, serde::Serialize)]
pub struct AcknowledgementRow {
    pub alert_id: String,
    pub acknowledged_by: String,
    pub acknowledged_at: DateTime<Utc>,
    pub note: Option<String>,
    pub cleared_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

fn ack_from_row(row: &PgRow) -> Result<AcknowledgementRow> {
    Ok(AcknowledgementRow {
        alert_id: row.try_get("alert_id")?,
        acknowledged_by: row.try_get("acknowledged_by")?,
        acknowledged_at: row.try_get("acknowledged_at")?,
        note: row.try_get("note")?,
        cleared_at: row.try_get("cleared_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

const ACK_COLUMNS: &str =
    "alert_id, acknowledged_by, acknowledged_at, note, cleared_at, updated_at";

/// Upsert an acknowledgement; re-acking clears any tombstone.
pub async fn acknowledge_alert(
    pool: &PgPool,
    alert_id: &str,
    acknowledged_by: &str,
    note: Option<&str>,
    at: DateTime<Utc>,
) -> Result<AcknowledgementRow> {
    let sql = format!(
        r#"
        insert into preflight_alert_acknowledgement (
          alert_id, acknowledged_by, acknowledged_at, note, cleared_at, updated_at
        ) values ($1, $2, $3, $4, null, $3)
        on conflict (alert_id) do update set
          acknowledged_by = excluded.acknowledged_by,
          acknowledged_at = excluded.acknowledged_at,
          note            = excluded.note,
          cleared_at      = null,
          updated_at      = excluded.updated_at
        returning {ACK_COLUMNS}
        "#
    );
    let row = sqlx::query(&sql)
        .bind(alert_id)
        .bind(acknowledged_by)
        .bind(at)
        .bind(note)
        .fetch_one(pool)
        .await
        .context("acknowledge_alert failed")?;
    ack_from_row(&row)
}

/// Clear an active acknowledgement. Returns None when no active row exists.
pub async fn unacknowledge_alert(
    pool: &PgPool,
    alert_id: &str,
    cleared_at: DateTime<Utc>,
) -> Result<Option<AcknowledgementRow>> {
    let sql = format!(
        r#"
        update preflight_alert_acknowledgement
           set cleared_at = $2,
               updated_at = $2
         where alert_id = $1
           and cleared_at is null
        returning {ACK_COLUMNS}
        "#
    );
    let row = sqlx::query(&sql)
        .bind(alert_id)
        .bind(cleared_at)
        .fetch_optional(pool)
        .await
        .context("unacknowledge_alert failed")?;
    row.as_ref().map(ack_from_row).transpose()
}

pub async fn list_active_acknowledgements(
    pool: &PgPool,
    limit: i64,
) -> Result<Vec<AcknowledgementRow>> {
    let sql = format!(
        r#"
        select {ACK_COLUMNS}
        from preflight_alert_acknowledgement
        where cleared_at is null
        order by acknowledged_at desc
        limit $1
        "#
    );
    let rows = sqlx::query(&sql)
        .bind(limit.clamp(1, 5000))
        .fetch_all(pool)
        .await
        .context("list_active_acknowledgements failed")?;
    rows.iter().map(ack_from_row).collect()
}

// ---------------------------------------------------------------------------
// Audit trail (append-only)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct NewAuditEvent {
    pub alert_id: String,
    pub event_type: String,
    pub actor: String,
    pub event_at: DateTime<Utc>,
    pub payload_json: Value,
}

#[derive(Debug, Clone)]
pub struct AuditEventRow {
    pub event_id: i64,
    pub alert_id: String,
    pub event_type: String,
    pub actor: String,
    pub event_at: DateTime<Utc>,
    pub payload_json: Value,
}

pub async fn insert_alert_audit_event(pool: &PgPool, event: &NewAuditEvent) -> Result<()> {
    sqlx::query(
        r#"
        insert into preflight_alert_audit_event (
          alert_id, event_type, actor, event_at, payload_json
        ) values ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(&event.alert_id)
    .bind(&event.event_type)
    .bind(&event.actor)
    .bind(event.event_at)
    .bind(sort_keys(&event.payload_json))
    .execute(pool)
    .await
    .context("insert_alert_audit_event failed")?;
    Ok(())
}

pub async fn list_alert_audit_events(pool: &PgPool, limit: i64) -> Result<Vec<AuditEventRow>> {
    let rows = sqlx::query(
        r#"
        select event_id, alert_id, event_type, actor, event_at, payload_json
        from preflight_alert_audit_event
        order by event_at desc, event_id desc
        limit $1
        "#,
    )
    .bind(limit.clamp(1, 500))
    .fetch_all(pool)
    .await
    .context("list_alert_audit_events failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(AuditEventRow {
            event_id: row.try_get("event_id")?,
            alert_id: row.try_get("alert_id")?,
            event_type: row.try_get("event_type")?,
            actor: row.try_get("actor")?,
            event_at: row.try_get("event_at")?,
            payload_json: row.try_get("payload_json")?,
        });
    }
    Ok(out)
}

/// Transition/audit event counts grouped by event_type, for exposition.
pub async fn count_audit_events_by_type(pool: &PgPool) -> Result<Vec<(String, i64)>> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        r#"
        select event_type, count(*)::bigint
        from preflight_alert_audit_event
        group by event_type
        order by event_type asc
        "#,
    )
    .fetch_all(pool)
    .await
    .context("count_audit_events_by_type failed")?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Scheduler lease
// ---------------------------------------------------------------------------

pub const ENV_SCHEDULER_LEASE_NAME: &str = "PREFLIGHT_ALERTS_SCHEDULER_LEASE_NAME";
pub const DEFAULT_SCHEDULER_LEASE_NAME: &str = "preflight_alerts_scheduler";

/// Base lease name; the loops append `:alerts` / `:notifications`.
pub fn scheduler_lease_base_name() -> String {
    match std::env::var(ENV_SCHEDULER_LEASE_NAME) {
        Ok(value) if !value.trim().is_empty() => value.trim().to_string(),
        _ => DEFAULT_SCHEDULER_LEASE_NAME.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerLeaseRow {
    pub lease_name: String,
    pub owner_id: String,
    pub acquired_at: DateTime<Utc>,
    pub heartbeat_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Acquire or renew a scheduler lease in one statement.
///
/// The conflict branch only fires when the caller already owns the lease or
/// the current lease has expired; a row coming back means the caller owns
/// the lease after this call. Splitting this into read-then-write would be
/// incorrect under concurrency.
pub async fn acquire_scheduler_lease(
    pool: &PgPool,
    lease_name: &str,
    owner_id: &str,
    lease_ttl_seconds: i64,
    now: DateTime<Utc>,
) -> Result<bool> {
    anyhow::ensure!(!lease_name.trim().is_empty(), "lease_name is required");
    anyhow::ensure!(!owner_id.trim().is_empty(), "owner_id is required");
    anyhow::ensure!(lease_ttl_seconds >= 1, "lease_ttl_seconds must be >= 1");

    let expires_at = now + chrono::Duration::seconds(lease_ttl_seconds);
    let row: Option<(String,)> = sqlx::query_as(
        r#"
        insert into preflight_alert_scheduler_lease (
          lease_name, owner_id, acquired_at, heartbeat_at, expires_at, updated_at
        ) values ($1, $2, $3, $3, $4, $3)
        on conflict (lease_name) do update set
          owner_id     = excluded.owner_id,
          acquired_at  = excluded.acquired_at,
          heartbeat_at = excluded.heartbeat_at,
          expires_at   = excluded.expires_at,
          updated_at   = excluded.updated_at
        where preflight_alert_scheduler_lease.owner_id = excluded.owner_id
           or preflight_alert_scheduler_lease.expires_at <= excluded.heartbeat_at
        returning owner_id
        "#,
    )
    .bind(lease_name)
    .bind(owner_id)
    .bind(now)
    .bind(expires_at)
    .fetch_optional(pool)
    .await
    .context("acquire_scheduler_lease failed")?;

    Ok(row.is_some())
}

pub async fn get_scheduler_lease(
    pool: &PgPool,
    lease_name: &str,
) -> Result<Option<SchedulerLeaseRow>> {
    let row = sqlx::query(
        r#"
        select lease_name, owner_id, acquired_at, heartbeat_at, expires_at, updated_at
        from preflight_alert_scheduler_lease
        where lease_name = $1
        "#,
    )
    .bind(lease_name)
    .fetch_optional(pool)
    .await
    .context("get_scheduler_lease failed")?;

    let Some(row) = row else { return Ok(None) };
    Ok(Some(SchedulerLeaseRow {
        lease_name: row.try_get("lease_name")?,
        owner_id: row.try_get("owner_id")?,
        acquired_at: row.try_get("acquired_at")?,
        heartbeat_at: row.try_get("heartbeat_at")?,
        expires_at: row.try_get("expires_at")?,
        updated_at: row.try_get("updated_at")?,
    }))
}

/// Best-effort release: expires the lease immediately, only for its owner.
pub async fn release_scheduler_lease(
    pool: &PgPool,
    lease_name: &str,
    owner_id: &str,
    released_at: DateTime<Utc>,
) -> Result<bool> {
    let row: Option<(String,)> = sqlx::query_as(
        r#"
        update preflight_alert_scheduler_lease
           set expires_at = $3,
               updated_at = $3
         where lease_name = $1
           and owner_id = $2
        returning lease_name
        "#,
    )
    .bind(lease_name)
    .bind(owner_id)
    .bind(released_at)
    .fetch_optional(pool)
    .await
    .context("release_scheduler_lease failed")?;
    Ok(row.is_some())
}
