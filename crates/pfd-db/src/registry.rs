//! Preflight run registry: one row per `(run_id, source_name)`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use pfd_schemas::{aggregate_final_status, sort_keys, PreflightRecord, RunAggregate};
use sqlx::{postgres::PgRow, PgPool, Row};

const RECORD_COLUMNS: &str = "run_id, source_name, created_at, mode, validation_status, \
     semantic_status, final_status, used_input_path, used_unified, artifact_dir, \
     validation_report_path, manifest_path, summary_json, blocked, block_reason, \
     data_source_id, contract_id, contract_version";

fn record_from_row(row: &PgRow) -> Result<PreflightRecord> {
    Ok(PreflightRecord {
        run_id: row.try_get("run_id")?,
        source_name: row.try_get("source_name")?,
        created_at: row.try_get("created_at")?,
        mode: row.try_get("mode")?,
        validation_status: row.try_get("validation_status")?,
        semantic_status: row.try_get("semantic_status")?,
        final_status: row.try_get("final_status")?,
        used_input_path: row.try_get("used_input_path")?,
        used_unified: row.try_get("used_unified")?,
        artifact_dir: row.try_get("artifact_dir")?,
        validation_report_path: row.try_get("validation_report_path")?,
        manifest_path: row.try_get("manifest_path")?,
        summary_json: row.try_get("summary_json")?,
        blocked: row.try_get("blocked")?,
        block_reason: row.try_get("block_reason")?,
        data_source_id: row.try_get("data_source_id")?,
        contract_id: row.try_get("contract_id")?,
        contract_version: row.try_get("contract_version")?,
    })
}

/// Insert a registry record; a second write to the same `(run_id,
/// source_name)` repairs the row in place.
pub async fn insert_record(pool: &PgPool, record: &PreflightRecord) -> Result<()> {
    sqlx::query(
        r#"
        insert into preflight_run_registry (
          run_id, source_name, created_at, mode, validation_status, semantic_status,
          final_status, used_input_path, used_unified, artifact_dir,
          validation_report_path, manifest_path, summary_json, blocked, block_reason,
          data_source_id, contract_id, contract_version
        ) values (
          $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18
        )
        on conflict (run_id, source_name) do update set
          created_at             = excluded.created_at,
          mode                   = excluded.mode,
          validation_status      = excluded.validation_status,
          semantic_status        = excluded.semantic_status,
          final_status           = excluded.final_status,
          used_input_path        = excluded.used_input_path,
          used_unified           = excluded.used_unified,
          artifact_dir           = excluded.artifact_dir,
          validation_report_path = excluded.validation_report_path,
          manifest_path          = excluded.manifest_path,
          summary_json           = excluded.summary_json,
          blocked                = excluded.blocked,
          block_reason           = excluded.block_reason,
          data_source_id         = excluded.data_source_id,
          contract_id            = excluded.contract_id,
          contract_version       = excluded.contract_version
        "#,
    )
    .bind(&record.run_id)
    .bind(&record.source_name)
    .bind(record.created_at)
    .bind(&record.mode)
    .bind(&record.validation_status)
    .bind(&record.semantic_status)
    .bind(&record.final_status)
    .bind(&record.used_input_path)
    .bind(record.used_unified)
    .bind(&record.artifact_dir)
    .bind(&record.validation_report_path)
    .bind(&record.manifest_path)
    .bind(sort_keys(&record.summary_json))
    .bind(record.blocked)
    .bind(&record.block_reason)
    .bind(record.data_source_id)
    .bind(&record.contract_id)
    .bind(&record.contract_version)
    .execute(pool)
    .await
    .context("insert_record failed")?;
    Ok(())
}

/// Latest-first record listing. `limit` is clamped to 1..=200.
pub async fn list_runs(
    pool: &PgPool,
    limit: i64,
    source_name: Option<&str>,
    data_source_id: Option<i64>,
) -> Result<Vec<PreflightRecord>> {
    let normalized_limit = limit.clamp(1, 200);
    let sql = format!(
        r#"
        select {RECORD_COLUMNS}
        from preflight_run_registry
        where ($1::text is null or source_name = $1)
          and ($2::bigint is null or data_source_id = $2)
        order by created_at desc
        limit $3
        "#
    );
    let rows = sqlx::query(&sql)
        .bind(source_name)
        .bind(data_source_id)
        .bind(normalized_limit)
        .fetch_all(pool)
        .await
        .context("list_runs failed")?;

    rows.iter().map(record_from_row).collect()
}

/// Filter grammar for `query_runs`. Every field is optional; `ascending`
/// defaults to latest-first; `limit = None` returns the full window.
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub source_name: Option<String>,
    pub data_source_id: Option<i64>,
    pub mode: Option<String>,
    pub final_status: Option<String>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub ascending: bool,
    pub limit: Option<i64>,
}

pub async fn query_runs(pool: &PgPool, filter: &RunFilter) -> Result<Vec<PreflightRecord>> {
    // Direction is a compile-chosen keyword, never caller data.
    let direction = if filter.ascending { "asc" } else { "desc" };
    let sql = format!(
        r#"
        select {RECORD_COLUMNS}
        from preflight_run_registry
        where ($1::text is null or source_name = $1)
          and ($2::bigint is null or data_source_id = $2)
          and ($3::text is null or mode = $3)
          and ($4::text is null or final_status = $4)
          and ($5::timestamptz is null or created_at >= $5)
          and ($6::timestamptz is null or created_at <= $6)
        order by created_at {direction}
        limit $7
        "#
    );
    let rows = sqlx::query(&sql)
        .bind(&filter.source_name)
        .bind(filter.data_source_id)
        .bind(&filter.mode)
        .bind(&filter.final_status)
        .bind(filter.date_from)
        .bind(filter.date_to)
        .bind(filter.limit)
        .fetch_all(pool)
        .await
        .context("query_runs failed")?;

    rows.iter().map(record_from_row).collect()
}

/// All member records of one run, aggregated worst-of.
pub async fn get_run(pool: &PgPool, run_id: &str) -> Result<Option<RunAggregate>> {
    let sql = format!(
        r#"
        select {RECORD_COLUMNS}
        from preflight_run_registry
        where run_id = $1
        order by source_name asc
        "#
    );
    let rows = sqlx::query(&sql)
        .bind(run_id)
        .fetch_all(pool)
        .await
        .context("get_run failed")?;

    if rows.is_empty() {
        return Ok(None);
    }

    let records: Vec<PreflightRecord> = rows
        .iter()
        .map(record_from_row)
        .collect::<Result<Vec<_>>>()?;

    let final_status =
        aggregate_final_status(records.iter().map(|r| r.final_status.as_str())).to_string();
    let blocked = records.iter().any(|r| r.blocked);
    let first = &records[0];

    Ok(Some(RunAggregate {
        run_id: run_id.to_string(),
        created_at: first.created_at,
        mode: first.mode.clone(),
        final_status,
        blocked,
        records,
    }))
}

/// Most recent record matching the optional filters.
pub async fn get_latest(
    pool: &PgPool,
    source_name: Option<&str>,
    data_source_id: Option<i64>,
) -> Result<Option<PreflightRecord>> {
    let rows = list_runs(pool, 1, source_name, data_source_id).await?;
    Ok(rows.into_iter().next())
}
