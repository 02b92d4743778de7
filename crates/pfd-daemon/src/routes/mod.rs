//! Axum router and shared handler helpers.
//!
//! Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
//! attaches them after this call so tests can use the bare router.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use pfd_schemas::{iso_utc, DiagnosticsError, PreflightRecord};
use serde_json::{json, Value};

use crate::error::ApiResult;
use crate::state::AppState;

pub mod alerts;
pub mod artifacts;
pub mod metrics;
pub mod notifications;
pub mod runs;

pub const API_PREFIX: &str = "/api/v1/diagnostics";

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&p("/health"), get(health))
        // Preflight registry
        .route(&p("/preflight/runs"), get(runs::list_runs))
        .route(&p("/preflight/runs/:run_id"), get(runs::get_run))
        .route(&p("/preflight/latest"), get(runs::latest))
        .route(&p("/preflight/latest/:source_name"), get(runs::latest_for_source))
        .route(&p("/preflight/stats"), get(runs::stats))
        .route(&p("/preflight/trends"), get(runs::trends))
        .route(&p("/preflight/rules/top"), get(runs::top_rules))
        // Artifact gateway
        .route(
            &p("/preflight/runs/:run_id/sources/:source_name/artifacts"),
            get(artifacts::list),
        )
        .route(
            &p("/preflight/runs/:run_id/sources/:source_name/validation"),
            get(artifacts::validation),
        )
        .route(
            &p("/preflight/runs/:run_id/sources/:source_name/semantic"),
            get(artifacts::semantic),
        )
        .route(
            &p("/preflight/runs/:run_id/sources/:source_name/manifest"),
            get(artifacts::manifest),
        )
        .route(
            &p("/preflight/runs/:run_id/sources/:source_name/download/:kind"),
            get(artifacts::download),
        )
        // Alerts
        .route(&p("/preflight/alerts/active"), get(alerts::active))
        .route(&p("/preflight/alerts/history"), get(alerts::history))
        .route(&p("/preflight/alerts/policies"), get(alerts::policies))
        .route(
            &p("/preflight/alerts/silences"),
            get(alerts::list_silences).post(alerts::create_silence),
        )
        .route(
            &p("/preflight/alerts/silences/:silence_id/expire"),
            post(alerts::expire_silence),
        )
        .route(&p("/preflight/alerts/audit"), get(alerts::audit))
        .route(&p("/preflight/alerts/evaluate"), post(alerts::evaluate))
        .route(&p("/preflight/alerts/:alert_id/ack"), post(alerts::ack))
        .route(&p("/preflight/alerts/:alert_id/unack"), post(alerts::unack))
        // Notifications
        .route(&p("/preflight/notifications/outbox"), get(notifications::outbox))
        .route(&p("/preflight/notifications/history"), get(notifications::history))
        .route(&p("/preflight/notifications/stats"), get(notifications::stats))
        .route(&p("/preflight/notifications/trends"), get(notifications::trends))
        .route(&p("/preflight/notifications/channels"), get(notifications::channels))
        .route(&p("/preflight/notifications/endpoints"), get(notifications::endpoints))
        .route(&p("/preflight/notifications/deliveries"), get(notifications::deliveries))
        .route(&p("/preflight/notifications/attempts"), get(notifications::attempts))
        .route(
            &p("/preflight/notifications/attempts/:attempt_id"),
            get(notifications::attempt_details),
        )
        .route(&p("/preflight/notifications/dispatch"), post(notifications::dispatch))
        .route(
            &p("/preflight/notifications/outbox/:item_id/replay"),
            post(notifications::replay),
        )
        .route(
            &p("/preflight/notifications/outbox/replay-dead"),
            post(notifications::replay_dead),
        )
        // Metrics exposition
        .route(&p("/metrics"), get(metrics::exposition))
        .with_state(state)
}

fn p(suffix: &str) -> String {
    format!("{API_PREFIX}{suffix}")
}

async fn health(State(st): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    Ok(Json(json!({
        "ok": true,
        "service": st.build.service,
        "version": st.build.version,
    })))
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Mutating endpoints attribute audit events to the `X-Actor` header;
/// identity verification is the outer platform's concern.
pub(crate) fn actor_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("X-Actor")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| "system:api".to_string())
}

pub(crate) fn compact_record(record: &PreflightRecord) -> Value {
    json!({
        "run_id": record.run_id,
        "created_at": iso_utc(&record.created_at),
        "mode": record.mode,
        "source_name": record.source_name,
        "validation_status": record.validation_status,
        "semantic_status": record.semantic_status,
        "final_status": record.final_status,
        "blocked": record.blocked,
        "block_reason": record.block_reason,
        "used_unified": record.used_unified,
        "used_input_path": record.used_input_path,
        "artifact_dir": record.artifact_dir,
        "validation_report_path": record.validation_report_path,
        "manifest_path": record.manifest_path,
        "data_source_id": record.data_source_id,
        "contract_id": record.contract_id,
        "contract_version": record.contract_version,
    })
}

pub(crate) async fn resolve_source_record(
    state: &AppState,
    run_id: &str,
    source_name: &str,
) -> anyhow::Result<PreflightRecord> {
    let run = pfd_db::registry::get_run(&state.pool, run_id)
        .await?
        .ok_or_else(|| DiagnosticsError::not_found(format!("Preflight run not found: {run_id}")))?;

    run.records
        .into_iter()
        .find(|record| record.source_name == source_name)
        .ok_or_else(|| {
            DiagnosticsError::not_found(format!(
                "Source '{source_name}' not found for run '{run_id}'"
            ))
        })
}

pub(crate) fn run_aggregate_json(run: &pfd_schemas::RunAggregate) -> Value {
    json!({
        "run_id": run.run_id,
        "created_at": iso_utc(&run.created_at),
        "mode": run.mode,
        "final_status": run.final_status,
        "blocked": run.blocked,
        "records": run.records.iter().map(compact_record).collect::<Vec<_>>(),
    })
}

pub(crate) fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|raw| {
            matches!(
                raw.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(false)
}
