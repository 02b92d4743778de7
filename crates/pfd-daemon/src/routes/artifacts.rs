//! Artifact gateway surfaces: listings, JSON loads, and downloads.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use pfd_artifacts::{
    normalize_manifest_payload, normalize_semantic_payload, normalize_validation_payload,
    ArtifactKind,
};
use pfd_schemas::DiagnosticsError;
use serde_json::{json, Value};

use crate::error::ApiResult;
use crate::routes::resolve_source_record;
use crate::state::AppState;

const ENV_MAX_FILE_SIZE_MB: &str = "PREFLIGHT_ARTIFACT_MAX_FILE_SIZE_MB";
const DEFAULT_MAX_FILE_SIZE_MB: u64 = 50;

pub async fn list(
    State(st): State<Arc<AppState>>,
    Path((run_id, source_name)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let record = resolve_source_record(&st, &run_id, &source_name).await?;
    let artifacts = st.gateway.list_artifacts(&record)?;
    Ok(Json(json!({
        "run_id": run_id,
        "source_name": source_name,
        "artifact_dir": record.artifact_dir,
        "artifacts": artifacts,
    })))
}

fn with_identity(mut payload: Value, run_id: &str, source_name: &str, artifact_path: &str) -> Value {
    if let Some(map) = payload.as_object_mut() {
        map.insert("run_id".to_string(), json!(run_id));
        map.insert("source_name".to_string(), json!(source_name));
        map.insert("artifact_path".to_string(), json!(artifact_path));
    }
    payload
}

pub async fn validation(
    State(st): State<Arc<AppState>>,
    Path((run_id, source_name)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let record = resolve_source_record(&st, &run_id, &source_name).await?;
    let (payload, path) = st
        .gateway
        .load_artifact_json(&record, ArtifactKind::Validation)?;
    let normalized = serde_json::to_value(normalize_validation_payload(&payload))?;
    Ok(Json(with_identity(
        normalized,
        &run_id,
        &source_name,
        &path.display().to_string(),
    )))
}

pub async fn semantic(
    State(st): State<Arc<AppState>>,
    Path((run_id, source_name)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let record = resolve_source_record(&st, &run_id, &source_name).await?;
    let (payload, path) = st.gateway.load_semantic_with_fallback(&record)?;
    let normalized = serde_json::to_value(normalize_semantic_payload(&payload))?;
    Ok(Json(with_identity(
        normalized,
        &run_id,
        &source_name,
        &path.display().to_string(),
    )))
}

pub async fn manifest(
    State(st): State<Arc<AppState>>,
    Path((run_id, source_name)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let record = resolve_source_record(&st, &run_id, &source_name).await?;
    let (payload, path) = st
        .gateway
        .load_artifact_json(&record, ArtifactKind::Manifest)?;
    let normalized = serde_json::to_value(normalize_manifest_payload(&payload))?;
    Ok(Json(with_identity(
        normalized,
        &run_id,
        &source_name,
        &path.display().to_string(),
    )))
}

fn max_download_bytes() -> u64 {
    let mb = std::env::var(ENV_MAX_FILE_SIZE_MB)
        .ok()
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .filter(|mb| *mb >= 1)
        .unwrap_or(DEFAULT_MAX_FILE_SIZE_MB);
    mb.saturating_mul(1024 * 1024)
}

pub async fn download(
    State(st): State<Arc<AppState>>,
    Path((run_id, source_name, kind)): Path<(String, String, String)>,
) -> ApiResult<Response> {
    let kind = ArtifactKind::parse(&kind)?;
    let record = resolve_source_record(&st, &run_id, &source_name).await?;
    let spec = st.gateway.resolve_download(&record, kind)?;

    let metadata = tokio::fs::metadata(&spec.path).await.map_err(|_| {
        DiagnosticsError::not_found(format!("Artifact file not found: {}", spec.file_name))
    })?;
    let cap = max_download_bytes();
    if metadata.len() > cap {
        return Err(DiagnosticsError::payload(format!(
            "Artifact '{}' exceeds the configured download size limit",
            spec.file_name
        ))
        .into());
    }

    let bytes = tokio::fs::read(&spec.path).await.map_err(|_| {
        DiagnosticsError::not_found(format!("Artifact file not found: {}", spec.file_name))
    })?;

    let mut response = (StatusCode::OK, bytes).into_response();
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(spec.content_type) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Ok(value) =
        HeaderValue::from_str(&format!("attachment; filename=\"{}\"", spec.file_name))
    {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}
