//! In-process scenario tests for pfd-daemon HTTP endpoints.
//!
//! These tests spin up the Axum router **without** binding a TCP socket.
//! Each test calls `routes::build_router` and drives it via
//! `tower::ServiceExt::oneshot`; no network IO required.
//!
//! Tests that only exercise routing, gating, and input validation use a
//! lazy pool (never connected); end-to-end tests acquire a real pool and
//! skip when PFD_DATABASE_URL is unset.

use std::sync::Arc;

use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use pfd_daemon::{routes, state};
use sqlx::postgres::PgPoolOptions;
use tower::ServiceExt; // oneshot

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Router over a lazy pool: handlers that never touch the database work
/// without Postgres.
fn make_offline_router() -> axum::Router {
    let pool = PgPoolOptions::new()
        .connect_lazy("postgres://localhost:1/pfd_offline")
        .expect("lazy pool");
    let st = Arc::new(state::AppState::new(pool));
    routes::build_router(st)
}

async fn call(router: axum::Router, req: Request<axum::body::Body>) -> (StatusCode, bytes::Bytes) {
    let resp = router.oneshot(req).await.expect("oneshot failed");
    let status = resp.status();
    let body = resp
        .into_body()
        .collect()
        .await
        .expect("body collect failed")
        .to_bytes();
    (status, body)
}

fn parse_json(b: bytes::Bytes) -> serde_json::Value {
    serde_json::from_slice(&b).expect("body is not valid JSON")
}

fn get(uri: &str) -> Request<axum::body::Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap()
}

// ---------------------------------------------------------------------------
// Offline: routing, gating, validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_returns_200_ok_true() {
    let (status, body) = call(make_offline_router(), get("/api/v1/diagnostics/health")).await;
    assert_eq!(status, StatusCode::OK);

    let json = parse_json(body);
    assert_eq!(json["ok"], true);
    assert_eq!(json["service"], "pfd-daemon");
}

#[tokio::test]
async fn metrics_requires_authorization_without_bypass_flag() {
    std::env::remove_var("DIAGNOSTICS_METRICS_AUTH_DISABLED");
    let (status, body) = call(make_offline_router(), get("/api/v1/diagnostics/metrics")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(parse_json(body)["error"], "Authentication required");
}

#[tokio::test]
async fn unknown_download_kind_is_rejected_before_any_lookup() {
    let (status, body) = call(
        make_offline_router(),
        get("/api/v1/diagnostics/preflight/runs/r1/sources/train/download/secrets"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(parse_json(body)["error"]
        .as_str()
        .unwrap()
        .contains("Unsupported artifact type"));
}

#[tokio::test]
async fn invalid_source_name_is_a_payload_error() {
    let (status, _) = call(
        make_offline_router(),
        get("/api/v1/diagnostics/preflight/latest/warehouse"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn evaluate_is_forbidden_unless_enabled() {
    std::env::remove_var("PREFLIGHT_ALERTS_ALLOW_EVALUATE");
    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/diagnostics/preflight/alerts/evaluate")
        .body(axum::body::Body::empty())
        .unwrap();
    let (status, body) = call(make_offline_router(), req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(parse_json(body)["error"]
        .as_str()
        .unwrap()
        .contains("PREFLIGHT_ALERTS_ALLOW_EVALUATE"));
}

#[tokio::test]
async fn notification_stats_reject_conflicting_window_filters() {
    let (status, body) = call(
        make_offline_router(),
        get("/api/v1/diagnostics/preflight/notifications/stats?days=7&date_from=2026-01-01"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(parse_json(body)["error"]
        .as_str()
        .unwrap()
        .contains("not both"));
}

#[tokio::test]
async fn attempt_status_and_status_filters_are_mutually_exclusive() {
    let (status, _) = call(
        make_offline_router(),
        get("/api/v1/diagnostics/preflight/notifications/attempts?status=SENT&attempt_status=RETRY"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// End to end (DB-backed; skipped without PFD_DATABASE_URL)
// ---------------------------------------------------------------------------

async fn make_db_router() -> Option<(axum::Router, sqlx::PgPool, pfd_testkit::ArtifactTree)> {
    let pool = pfd_testkit::try_db_pool().await?;
    pfd_testkit::reset_tables(&pool).await;
    let tree = pfd_testkit::ArtifactTree::new();
    let st = Arc::new(state::AppState::with_gateway(pool.clone(), tree.gateway()));
    Some((routes::build_router(st), pool, tree))
}

#[tokio::test]
async fn run_listing_and_aggregate_round_trip() {
    let _guard = pfd_testkit::db_guard().await;
    let Some((router, pool, _tree)) = make_db_router().await else {
        return;
    };

    let t0 = chrono::Utc::now();
    pfd_db::registry::insert_record(&pool, &pfd_testkit::failing_record("run-9", "train", t0))
        .await
        .unwrap();

    let (status, body) = call(router.clone(), get("/api/v1/diagnostics/preflight/runs")).await;
    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    assert_eq!(json["items"][0]["run_id"], "run-9");
    assert_eq!(json["items"][0]["final_status"], "FAIL");

    let (status, body) = call(router.clone(), get("/api/v1/diagnostics/preflight/runs/run-9")).await;
    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    assert_eq!(json["final_status"], "FAIL");
    assert_eq!(json["records"].as_array().unwrap().len(), 1);

    let (status, _) = call(router.clone(), get("/api/v1/diagnostics/preflight/runs/absent")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = call(router, get("/api/v1/diagnostics/preflight/stats?days=30")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse_json(body)["totals"]["fail_count"], 1);
}

#[tokio::test]
async fn path_traversal_is_forbidden_over_http() {
    let _guard = pfd_testkit::db_guard().await;
    let Some((router, pool, tree)) = make_db_router().await else {
        return;
    };

    let mut record = pfd_testkit::record_with_artifacts(&tree, "run-esc", "train", chrono::Utc::now());
    record.validation_report_path = Some("../../../../etc/passwd".to_string());
    pfd_db::registry::insert_record(&pool, &record).await.unwrap();

    let (status, _) = call(
        router,
        get("/api/v1/diagnostics/preflight/runs/run-esc/sources/train/validation"),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn artifact_download_streams_with_content_type() {
    let _guard = pfd_testkit::db_guard().await;
    let Some((router, pool, tree)) = make_db_router().await else {
        return;
    };

    let record = pfd_testkit::record_with_artifacts(&tree, "run-dl", "train", chrono::Utc::now());
    let dir = tree.run_dir("run-dl", "train");
    std::fs::write(dir.join("unified.csv"), "date,store,sales\n2026-02-22,1,100\n").unwrap();
    pfd_db::registry::insert_record(&pool, &record).await.unwrap();

    let resp = router
        .oneshot(get(
            "/api/v1/diagnostics/preflight/runs/run-dl/sources/train/download/unified_csv",
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get("content-type").unwrap(),
        "text/csv; charset=utf-8"
    );
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    assert!(body.starts_with(b"date,store,sales"));
}

#[tokio::test]
async fn silence_lifecycle_over_http() {
    let _guard = pfd_testkit::db_guard().await;
    let Some((router, _pool, _tree)) = make_db_router().await else {
        return;
    };

    let ends_at = (chrono::Utc::now() + chrono::Duration::hours(1)).to_rfc3339();
    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/diagnostics/preflight/alerts/silences")
        .header("content-type", "application/json")
        .header("X-Actor", "ops-oncall")
        .body(axum::body::Body::from(
            serde_json::json!({"ends_at": ends_at, "reason": "maintenance", "policy_id": "p1"})
                .to_string(),
        ))
        .unwrap();
    let (status, body) = call(router.clone(), req).await;
    assert_eq!(status, StatusCode::OK);
    let created = parse_json(body);
    assert_eq!(created["is_active"], true);
    assert_eq!(created["created_by"], "ops-oncall");
    let silence_id = created["silence_id"].as_str().unwrap().to_string();

    let (status, body) = call(
        router.clone(),
        get("/api/v1/diagnostics/preflight/alerts/silences"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse_json(body)["items"].as_array().unwrap().len(), 1);

    let req = Request::builder()
        .method("POST")
        .uri(format!(
            "/api/v1/diagnostics/preflight/alerts/silences/{silence_id}/expire"
        ))
        .header("X-Actor", "ops-oncall")
        .body(axum::body::Body::empty())
        .unwrap();
    let (status, body) = call(router.clone(), req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse_json(body)["is_active"], false);

    // The audit trail recorded both actions.
    let (status, body) = call(router, get("/api/v1/diagnostics/preflight/alerts/audit")).await;
    assert_eq!(status, StatusCode::OK);
    let audit = parse_json(body);
    let types: Vec<&str> = audit["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item["event_type"].as_str().unwrap())
        .collect();
    assert!(types.contains(&"SILENCED"));
    assert!(types.contains(&"UNSILENCED"));
}

#[tokio::test]
async fn metrics_exposition_renders_with_bypass_flag() {
    let _guard = pfd_testkit::db_guard().await;
    let Some((router, _pool, _tree)) = make_db_router().await else {
        return;
    };

    let req = Request::builder()
        .method("GET")
        .uri("/api/v1/diagnostics/metrics")
        .header("Authorization", "Bearer test-token")
        .body(axum::body::Body::empty())
        .unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/plain"));
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("# TYPE preflight_runs_total counter"));
    assert!(text.contains("preflight_metrics_render_errors_total 0"));
    assert!(text.contains("preflight_notifications_delivery_latency_ms_bucket{le=\"+Inf\"} 0"));
}
