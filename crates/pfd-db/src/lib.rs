// crates/pfd-db/src/lib.rs
//! Typed Postgres access for the preflight diagnostics core.
//!
//! One module per table family. All functions are free async fns over an
//! executor; every operation is a single bound statement. The scheduler
//! lease acquire is the only compare-and-set (see `alerts::acquire_scheduler_lease`).

use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, PgPool};

pub const ENV_DB_URL: &str = "PFD_DATABASE_URL";

pub mod alerts;
pub mod attempts;
pub mod outbox;
pub mod registry;

pub use alerts::{
    AcknowledgementRow, AlertHistoryRow, AlertStateRow, AuditEventRow, NewAlertHistory,
    NewAuditEvent, SchedulerLeaseRow, SilenceRow,
};
pub use attempts::{AttemptQuery, DeliveryAttemptRow, NewDeliveryAttempt};
pub use outbox::{OutboxItem, OutboxQuery};
pub use registry::RunFilter;

/// Connect to Postgres using PFD_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    connect(&url).await
}

pub async fn connect(url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;
    Ok(pool)
}

/// Test helper used by integration tests:
/// - Connect using PFD_DATABASE_URL
/// - Ensure the schema is applied
pub async fn testkit_db_pool() -> Result<PgPool> {
    let pool = connect_from_env().await?;
    ensure_schema(&pool).await?;
    Ok(pool)
}

/// Idempotent DDL for every table and index. Safe to run from any number of
/// processes concurrently; every statement is `IF NOT EXISTS`.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    for statement in SCHEMA_STATEMENTS {
        sqlx::query(statement)
            .execute(pool)
            .await
            .with_context(|| format!("schema statement failed: {}", first_line(statement)))?;
    }
    Ok(())
}

fn first_line(statement: &str) -> &str {
    statement.trim().lines().next().unwrap_or_default()
}

const SCHEMA_STATEMENTS: &[&str] = &[
    r#"
    create table if not exists preflight_run_registry (
        run_id                 text not null,
        source_name            text not null,
        created_at             timestamptz not null,
        mode                   text not null,
        validation_status      text not null,
        semantic_status        text not null,
        final_status           text not null,
        used_input_path        text not null,
        used_unified           boolean not null default false,
        artifact_dir           text,
        validation_report_path text,
        manifest_path          text,
        summary_json           jsonb not null default '{}'::jsonb,
        blocked                boolean not null default false,
        block_reason           text,
        data_source_id         bigint,
        contract_id            text,
        contract_version       text,
        primary key (run_id, source_name)
    )
    "#,
    "create index if not exists ix_preflight_run_registry_created_at on preflight_run_registry (created_at)",
    "create index if not exists ix_preflight_run_registry_source_name on preflight_run_registry (source_name)",
    "create index if not exists ix_preflight_run_registry_data_source_id on preflight_run_registry (data_source_id)",
    r#"
    create table if not exists preflight_alert_state (
        policy_id               text primary key,
        status                  text not null,
        severity                text not null,
        source_name             text,
        first_seen_at           timestamptz,
        last_seen_at            timestamptz,
        consecutive_breaches    integer not null default 0,
        current_value           double precision,
        threshold               double precision,
        message                 text not null default '',
        evaluation_context_json jsonb not null default '{}'::jsonb,
        policy_snapshot_json    jsonb not null default '{}'::jsonb,
        updated_at              timestamptz not null
    )
    "#,
    "create index if not exists ix_preflight_alert_state_status on preflight_alert_state (status)",
    "create index if not exists ix_preflight_alert_state_last_seen on preflight_alert_state (last_seen_at)",
    r#"
    create table if not exists preflight_alert_history (
        id                      bigserial primary key,
        policy_id               text not null,
        status                  text not null,
        severity                text not null,
        source_name             text,
        first_seen_at           timestamptz,
        last_seen_at            timestamptz,
        resolved_at             timestamptz,
        current_value           double precision,
        threshold               double precision,
        message                 text not null default '',
        evaluation_context_json jsonb not null default '{}'::jsonb,
        policy_snapshot_json    jsonb not null default '{}'::jsonb,
        created_at              timestamptz not null
    )
    "#,
    "create index if not exists ix_preflight_alert_history_policy_id on preflight_alert_history (policy_id)",
    "create index if not exists ix_preflight_alert_history_status on preflight_alert_history (status)",
    "create index if not exists ix_preflight_alert_history_created_at on preflight_alert_history (created_at)",
    r#"
    create table if not exists preflight_alert_silence (
        silence_id  text primary key,
        policy_id   text,
        source_name text,
        severity    text,
        rule_id     text,
        starts_at   timestamptz not null,
        ends_at     timestamptz not null,
        reason      text not null default '',
        created_by  text not null,
        created_at  timestamptz not null,
        expired_at  timestamptz
    )
    "#,
    "create index if not exists ix_preflight_alert_silence_ends_at on preflight_alert_silence (ends_at)",
    "create index if not exists ix_preflight_alert_silence_expired_at on preflight_alert_silence (expired_at)",
    "create index if not exists ix_preflight_alert_silence_policy_id on preflight_alert_silence (policy_id)",
    r#"
    create table if not exists preflight_alert_acknowledgement (
        alert_id        text primary key,
        acknowledged_by text not null,
        acknowledged_at timestamptz not null,
        note            text,
        cleared_at      timestamptz,
        updated_at      timestamptz not null
    )
    "#,
    "create index if not exists ix_preflight_alert_ack_cleared_at on preflight_alert_acknowledgement (cleared_at)",
    r#"
    create table if not exists preflight_alert_audit_event (
        event_id     bigserial primary key,
        alert_id     text not null,
        event_type   text not null,
        actor        text not null,
        event_at     timestamptz not null,
        payload_json jsonb not null default '{}'::jsonb
    )
    "#,
    "create index if not exists ix_preflight_alert_audit_alert_id on preflight_alert_audit_event (alert_id)",
    "create index if not exists ix_preflight_alert_audit_event_type on preflight_alert_audit_event (event_type)",
    "create index if not exists ix_preflight_alert_audit_event_at on preflight_alert_audit_event (event_at)",
    r#"
    create table if not exists preflight_notification_outbox (
        id               text primary key,
        event_id         text,
        delivery_id      text,
        replayed_from_id text,
        event_type       text not null,
        alert_id         text not null,
        policy_id        text not null,
        severity         text,
        source_name      text,
        payload_json     jsonb not null default '{}'::jsonb,
        channel_type     text not null default 'webhook',
        channel_target   text not null,
        status           text not null default 'PENDING',
        attempt_count    integer not null default 0,
        max_attempts     integer not null default 5,
        next_retry_at    timestamptz not null,
        last_error       text,
        last_http_status integer,
        last_error_code  text,
        created_at       timestamptz not null,
        updated_at       timestamptz not null,
        sent_at          timestamptz
    )
    "#,
    "create index if not exists ix_preflight_notification_outbox_status on preflight_notification_outbox (status)",
    "create index if not exists ix_preflight_notification_outbox_next_retry_at on preflight_notification_outbox (next_retry_at)",
    "create index if not exists ix_preflight_notification_outbox_created_at on preflight_notification_outbox (created_at)",
    "create index if not exists ix_preflight_notification_outbox_event_id on preflight_notification_outbox (event_id)",
    r#"
    create table if not exists preflight_notification_delivery_attempt (
        attempt_id         text primary key,
        outbox_item_id     text not null,
        event_id           text,
        delivery_id        text,
        replayed_from_id   text,
        channel_type       text not null default 'webhook',
        channel_target     text not null,
        event_type         text not null,
        alert_id           text not null,
        policy_id          text not null,
        source_name        text,
        attempt_number     integer not null,
        attempt_status     text not null default 'STARTED',
        started_at         timestamptz not null,
        completed_at       timestamptz,
        duration_ms        bigint,
        http_status        integer,
        error_code         text,
        error_message_safe text,
        created_at         timestamptz not null
    )
    "#,
    "create index if not exists ix_preflight_notification_attempt_outbox_item on preflight_notification_delivery_attempt (outbox_item_id)",
    "create index if not exists ix_preflight_notification_attempt_channel_target on preflight_notification_delivery_attempt (channel_target)",
    "create index if not exists ix_preflight_notification_attempt_status on preflight_notification_delivery_attempt (attempt_status)",
    "create index if not exists ix_preflight_notification_attempt_started_at on preflight_notification_delivery_attempt (started_at)",
    r#"
    create table if not exists preflight_alert_scheduler_lease (
        lease_name   text primary key,
        owner_id     text not null,
        acquired_at  timestamptz not null,
        heartbeat_at timestamptz not null,
        expires_at   timestamptz not null,
        updated_at   timestamptz not null
    )
    "#,
    "create index if not exists ix_preflight_alert_scheduler_lease_expires_at on preflight_alert_scheduler_lease (expires_at)",
];
