//! Alert read/mutate surfaces.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use pfd_alerts::{CreateSilence, AUDIT_ACTOR_SYSTEM};
use pfd_analytics::parse_iso_date_or_datetime;
use pfd_config::{load_alert_policies, safe_load_channels, PolicyDocument};
use pfd_schemas::{now_utc, DiagnosticsError};
use serde_json::{json, Value};

use crate::api_types::{AckBody, CreateSilenceBody, LimitQuery, SilenceListQuery};
use crate::error::ApiResult;
use crate::routes::{actor_from_headers, env_flag};
use crate::state::AppState;

const ENV_ALLOW_EVALUATE: &str = "PREFLIGHT_ALERTS_ALLOW_EVALUATE";

fn policy_document() -> anyhow::Result<PolicyDocument> {
    load_alert_policies(None)
}

pub async fn active(State(st): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let document = policy_document()?;
    let payload = pfd_alerts::get_active_alerts(&st.pool, &document.policies).await?;
    Ok(Json(serde_json::to_value(payload)?))
}

pub async fn history(
    State(st): State<Arc<AppState>>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Json<Value>> {
    let document = policy_document()?;
    let payload =
        pfd_alerts::get_alert_history(&st.pool, &document.policies, query.limit.unwrap_or(50))
            .await?;
    Ok(Json(payload))
}

pub async fn policies(State(_st): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let document = policy_document()?;
    Ok(Json(json!({
        "path": document.path.display().to_string(),
        "version": document.version,
        "items": document
            .policies
            .iter()
            .map(|policy| policy.snapshot_json())
            .collect::<Vec<_>>(),
    })))
}

pub async fn list_silences(
    State(st): State<Arc<AppState>>,
    Query(query): Query<SilenceListQuery>,
) -> ApiResult<Json<Value>> {
    let payload = pfd_alerts::list_silences_payload(
        &st.pool,
        query.limit.unwrap_or(100),
        query.include_expired,
    )
    .await?;
    Ok(Json(payload))
}

pub async fn audit(
    State(st): State<Arc<AppState>>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Json<Value>> {
    let payload = pfd_alerts::list_alert_audit(&st.pool, query.limit.unwrap_or(50)).await?;
    Ok(Json(payload))
}

pub async fn create_silence(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateSilenceBody>,
) -> ApiResult<Json<Value>> {
    let starts_at = body
        .starts_at
        .as_deref()
        .map(|raw| parse_iso_date_or_datetime(raw, "starts_at", false))
        .transpose()?;
    let ends_at = parse_iso_date_or_datetime(&body.ends_at, "ends_at", false)?;

    let silence = pfd_alerts::create_silence(
        &st.pool,
        &CreateSilence {
            actor: actor_from_headers(&headers),
            starts_at,
            ends_at,
            reason: body.reason,
            policy_id: body.policy_id,
            source_name: body.source_name,
            severity: body.severity,
            rule_id: body.rule_id,
        },
    )
    .await?;
    Ok(Json(silence))
}

pub async fn expire_silence(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(silence_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let payload =
        pfd_alerts::expire_silence_by_id(&st.pool, &silence_id, &actor_from_headers(&headers))
            .await?;
    Ok(Json(payload))
}

pub async fn ack(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(alert_id): Path<String>,
    body: Option<Json<AckBody>>,
) -> ApiResult<Json<Value>> {
    let note = body.and_then(|Json(b)| b.note);
    let row = pfd_alerts::acknowledge_alert(
        &st.pool,
        &alert_id,
        &actor_from_headers(&headers),
        note.as_deref(),
    )
    .await?;
    Ok(Json(serde_json::to_value(row)?))
}

pub async fn unack(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(alert_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let row =
        pfd_alerts::unacknowledge_alert(&st.pool, &alert_id, &actor_from_headers(&headers))
            .await?;
    Ok(Json(serde_json::to_value(row)?))
}

/// Manual evaluation is an admin surface, gated by env flag.
pub async fn evaluate(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    if !env_flag(ENV_ALLOW_EVALUATE) {
        return Err(DiagnosticsError::access(
            "Manual alert evaluation is disabled; set PREFLIGHT_ALERTS_ALLOW_EVALUATE=1.",
        )
        .into());
    }

    let document = policy_document()?;
    let channels = safe_load_channels(None);
    let actor = {
        let from_header = actor_from_headers(&headers);
        if from_header == "system:api" {
            AUDIT_ACTOR_SYSTEM.to_string()
        } else {
            from_header
        }
    };

    let summary =
        pfd_alerts::evaluate_policies(&st.pool, &document, &channels, now_utc(), &actor).await?;
    Ok(Json(serde_json::to_value(summary)?))
}
