//! Registry read surfaces: run listings, aggregates, and analytics.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use pfd_analytics::{
    compute_run_stats, compute_run_trends, compute_top_rules, resolve_analytics_window,
    TrendBucket, DEFAULT_ANALYTICS_DAYS,
};
use pfd_db::registry::{self, RunFilter};
use pfd_schemas::{iso_utc, now_utc, CheckStatus, DiagnosticsError, PreflightMode, SourceName};
use serde_json::{json, Value};

use crate::api_types::{PreflightAnalyticsQuery, RunsQuery};
use crate::error::ApiResult;
use crate::routes::{compact_record, run_aggregate_json};
use crate::state::AppState;

fn validated_source(source_name: Option<&str>) -> anyhow::Result<Option<String>> {
    match source_name.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(raw) => Ok(Some(
            SourceName::parse(raw)
                .map_err(|_| {
                    DiagnosticsError::payload(format!("Unsupported source_name '{raw}'."))
                })?
                .as_str()
                .to_string(),
        )),
    }
}

pub async fn list_runs(
    State(st): State<Arc<AppState>>,
    Query(query): Query<RunsQuery>,
) -> ApiResult<Json<Value>> {
    let source_name = validated_source(query.source_name.as_deref())?;
    let limit = query.limit.unwrap_or(20);
    let records = registry::list_runs(
        &st.pool,
        limit,
        source_name.as_deref(),
        query.data_source_id,
    )
    .await?;

    Ok(Json(json!({
        "limit": limit.clamp(1, 200),
        "items": records.iter().map(compact_record).collect::<Vec<_>>(),
    })))
}

pub async fn get_run(
    State(st): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let run = registry::get_run(&st.pool, &run_id)
        .await?
        .ok_or_else(|| DiagnosticsError::not_found(format!("Preflight run not found: {run_id}")))?;
    Ok(Json(run_aggregate_json(&run)))
}

pub async fn latest(State(st): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let newest = registry::get_latest(&st.pool, None, None)
        .await?
        .ok_or_else(|| DiagnosticsError::not_found("No preflight runs recorded yet"))?;
    let run = registry::get_run(&st.pool, &newest.run_id)
        .await?
        .ok_or_else(|| {
            DiagnosticsError::not_found(format!("Preflight run not found: {}", newest.run_id))
        })?;
    Ok(Json(run_aggregate_json(&run)))
}

pub async fn latest_for_source(
    State(st): State<Arc<AppState>>,
    Path(source_name): Path<String>,
) -> ApiResult<Json<Value>> {
    let source = validated_source(Some(source_name.as_str()))?;
    let record = registry::get_latest(&st.pool, source.as_deref(), None)
        .await?
        .ok_or_else(|| {
            DiagnosticsError::not_found(format!(
                "No preflight runs recorded for source '{source_name}'"
            ))
        })?;
    Ok(Json(compact_record(&record)))
}

// ---------------------------------------------------------------------------
// Analytics
// ---------------------------------------------------------------------------

struct ResolvedRunQuery {
    filter: RunFilter,
    filters_json: Value,
}

fn resolve_run_query(query: &PreflightAnalyticsQuery) -> anyhow::Result<ResolvedRunQuery> {
    let source_name = validated_source(query.source_name.as_deref())?;

    let mode = match query.mode.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        None => None,
        Some(raw) => Some(
            PreflightMode::parse(raw)
                .map_err(|_| DiagnosticsError::payload(format!("Unsupported mode '{raw}'.")))?
                .as_str()
                .to_string(),
        ),
    };

    let final_status = match query
        .final_status
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        None => None,
        Some(raw) => Some(
            CheckStatus::parse(raw)
                .map_err(|_| {
                    DiagnosticsError::payload(format!("Unsupported final_status '{raw}'."))
                })?
                .as_str()
                .to_string(),
        ),
    };

    let window = resolve_analytics_window(
        query.date_from.as_deref(),
        query.date_to.as_deref(),
        query.days,
        now_utc(),
        DEFAULT_ANALYTICS_DAYS,
    )?;

    let filters_json = json!({
        "source_name": source_name,
        "data_source_id": query.data_source_id,
        "mode": mode,
        "final_status": final_status,
        "days": window.days,
        "date_from": window.date_from.map(|t| iso_utc(&t)),
        "date_to": window.date_to.map(|t| iso_utc(&t)),
    });

    Ok(ResolvedRunQuery {
        filter: RunFilter {
            source_name,
            data_source_id: query.data_source_id,
            mode,
            final_status,
            date_from: window.date_from,
            date_to: window.date_to,
            ascending: true,
            limit: None,
        },
        filters_json,
    })
}

pub async fn stats(
    State(st): State<Arc<AppState>>,
    Query(query): Query<PreflightAnalyticsQuery>,
) -> ApiResult<Json<Value>> {
    let resolved = resolve_run_query(&query)?;
    let records = registry::query_runs(&st.pool, &resolved.filter).await?;
    Ok(Json(compute_run_stats(&records, resolved.filters_json)))
}

pub async fn trends(
    State(st): State<Arc<AppState>>,
    Query(query): Query<PreflightAnalyticsQuery>,
) -> ApiResult<Json<Value>> {
    let bucket = TrendBucket::parse(query.bucket.as_deref().unwrap_or("day"))?;
    let resolved = resolve_run_query(&query)?;
    let records = registry::query_runs(&st.pool, &resolved.filter).await?;
    Ok(Json(compute_run_trends(
        &records,
        bucket,
        resolved.filters_json,
    )))
}

pub async fn top_rules(
    State(st): State<Arc<AppState>>,
    Query(query): Query<PreflightAnalyticsQuery>,
) -> ApiResult<Json<Value>> {
    let limit = query.limit.unwrap_or(10).clamp(1, 100) as usize;
    let resolved = resolve_run_query(&query)?;
    let records = registry::query_runs(&st.pool, &resolved.filter).await?;
    let rule_counts = st.gateway.collect_rule_counts(&records)?;
    Ok(Json(compute_top_rules(
        &rule_counts,
        limit,
        resolved.filters_json,
    )))
}
