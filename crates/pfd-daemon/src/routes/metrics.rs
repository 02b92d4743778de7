//! Prometheus exposition endpoint.
//!
//! Token verification belongs to the outer platform; in-core the endpoint
//! only refuses anonymous calls unless the demo bypass flag is set.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use pfd_analytics::render_prometheus_metrics;
use pfd_schemas::now_utc;
use serde_json::json;

use crate::routes::env_flag;
use crate::state::AppState;

const ENV_METRICS_AUTH_DISABLED: &str = "DIAGNOSTICS_METRICS_AUTH_DISABLED";
const CONTENT_TYPE_TEXT: &str = "text/plain; version=0.0.4; charset=utf-8";

pub async fn exposition(State(st): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let authorized = env_flag(ENV_METRICS_AUTH_DISABLED)
        || headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .is_some();
    if !authorized {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "Authentication required"})),
        )
            .into_response();
    }

    let body = render_prometheus_metrics(&st.pool, &st.metrics, now_utc()).await;
    let mut response = (StatusCode::OK, body).into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(CONTENT_TYPE_TEXT),
    );
    response
}
