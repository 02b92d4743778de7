//! Shared fixtures for scenario tests: registry records, channel configs,
//! scripted webhook senders, temp artifact trees, and the env-gated
//! database pool.
//!
//! DB-backed scenarios call [`try_db_pool`] and return early when
//! `PFD_DATABASE_URL` is unset, so the suite stays green on machines
//! without Postgres.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pfd_artifacts::ArtifactGateway;
use pfd_config::NotificationChannel;
use pfd_notify::{DeliveryOutcome, WebhookRequest, WebhookSender};
use pfd_schemas::{PreflightRecord, EVENT_ALERT_FIRING, EVENT_ALERT_RESOLVED};
use serde_json::{json, Value};
use sqlx::PgPool;

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

static DB_GUARD: std::sync::OnceLock<tokio::sync::Mutex<()>> = std::sync::OnceLock::new();

/// Scenarios sharing the database serialize on this guard so truncation in
/// one test cannot race another.
pub async fn db_guard() -> tokio::sync::MutexGuard<'static, ()> {
    DB_GUARD
        .get_or_init(|| tokio::sync::Mutex::new(()))
        .lock()
        .await
}

/// Pool from `PFD_DATABASE_URL` with the schema applied, or None when the
/// variable is unset. Panics if the variable is set but unusable; that is
/// a harness misconfiguration worth surfacing loudly.
pub async fn try_db_pool() -> Option<PgPool> {
    if std::env::var(pfd_db::ENV_DB_URL).is_err() {
        eprintln!("skipping: {} is not set", pfd_db::ENV_DB_URL);
        return None;
    }
    Some(
        pfd_db::testkit_db_pool()
            .await
            .expect("PFD_DATABASE_URL is set but unusable"),
    )
}

/// Truncate every table so scenarios start from a clean slate.
pub async fn reset_tables(pool: &PgPool) {
    sqlx::query(
        r#"
        truncate table
          preflight_run_registry,
          preflight_alert_state,
          preflight_alert_history,
          preflight_alert_silence,
          preflight_alert_acknowledgement,
          preflight_alert_audit_event,
          preflight_notification_outbox,
          preflight_notification_delivery_attempt,
          preflight_alert_scheduler_lease
        restart identity
        "#,
    )
    .execute(pool)
    .await
    .expect("truncate failed");
}

// ---------------------------------------------------------------------------
// Registry records
// ---------------------------------------------------------------------------

/// A PASS record with sane defaults; tests overwrite fields directly.
pub fn base_record(run_id: &str, source_name: &str, created_at: DateTime<Utc>) -> PreflightRecord {
    PreflightRecord {
        run_id: run_id.to_string(),
        source_name: source_name.to_string(),
        created_at,
        mode: "enforce".to_string(),
        validation_status: "PASS".to_string(),
        semantic_status: "PASS".to_string(),
        final_status: "PASS".to_string(),
        used_input_path: format!("/data/input/{source_name}.csv"),
        used_unified: false,
        artifact_dir: None,
        validation_report_path: None,
        manifest_path: None,
        summary_json: json!({}),
        blocked: false,
        block_reason: None,
        data_source_id: None,
        contract_id: None,
        contract_version: None,
    }
}

/// A FAIL record (validation failed, not blocked).
pub fn failing_record(
    run_id: &str,
    source_name: &str,
    created_at: DateTime<Utc>,
) -> PreflightRecord {
    let mut record = base_record(run_id, source_name, created_at);
    record.validation_status = "FAIL".to_string();
    record.final_status = "FAIL".to_string();
    record
}

// ---------------------------------------------------------------------------
// Channels
// ---------------------------------------------------------------------------

/// An enabled webhook channel supporting both event types.
pub fn webhook_channel(id: &str, max_attempts: i32, backoff_seconds: i64) -> NotificationChannel {
    NotificationChannel {
        id: id.to_string(),
        channel_type: "webhook".to_string(),
        enabled: true,
        target_url: Some(format!("https://hooks.example.test/{id}")),
        timeout_seconds: 5,
        max_attempts,
        backoff_seconds,
        signing_secret_env: None,
        enabled_event_types: vec![
            EVENT_ALERT_FIRING.to_string(),
            EVENT_ALERT_RESOLVED.to_string(),
        ],
    }
}

// ---------------------------------------------------------------------------
// Scripted webhook sender
// ---------------------------------------------------------------------------

/// Returns scripted outcomes in order (last one repeats) and records every
/// request it saw. Never performs network IO.
pub struct ScriptedSender {
    outcomes: Mutex<VecDeque<DeliveryOutcome>>,
    fallback: DeliveryOutcome,
    requests: Mutex<Vec<(String, WebhookRequest)>>,
}

impl ScriptedSender {
    pub fn new(outcomes: Vec<DeliveryOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            fallback: DeliveryOutcome::success(200),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn always(outcome: DeliveryOutcome) -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            fallback: outcome,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().expect("requests lock").len()
    }

    pub fn requests(&self) -> Vec<(String, WebhookRequest)> {
        self.requests.lock().expect("requests lock").clone()
    }
}

#[async_trait]
impl WebhookSender for ScriptedSender {
    async fn send(
        &self,
        channel: &NotificationChannel,
        request: &WebhookRequest,
    ) -> DeliveryOutcome {
        self.requests
            .lock()
            .expect("requests lock")
            .push((channel.id.clone(), request.clone()));
        self.outcomes
            .lock()
            .expect("outcomes lock")
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

// ---------------------------------------------------------------------------
// Artifact trees
// ---------------------------------------------------------------------------

/// Temp directory acting as the allowed artifact root, with helpers for
/// per-run directories and JSON artifacts.
pub struct ArtifactTree {
    dir: tempfile::TempDir,
}

impl ArtifactTree {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn gateway(&self) -> ArtifactGateway {
        ArtifactGateway::new(self.root())
    }

    /// `<root>/<run_id>/<source>/`, created on demand.
    pub fn run_dir(&self, run_id: &str, source_name: &str) -> PathBuf {
        let dir = self.root().join(run_id).join(source_name);
        std::fs::create_dir_all(&dir).expect("create run dir");
        dir
    }

    pub fn write_json(&self, dir: &Path, file_name: &str, payload: &Value) -> PathBuf {
        let path = dir.join(file_name);
        std::fs::write(&path, serde_json::to_string_pretty(payload).expect("json"))
            .expect("write artifact");
        path
    }

    /// A semantic report with the given `(rule_id, status)` pairs.
    pub fn write_semantic_report(&self, dir: &Path, rules: &[(&str, &str)]) -> PathBuf {
        let rules_json: Vec<Value> = rules
            .iter()
            .map(|(rule_id, status)| {
                json!({
                    "rule_id": rule_id,
                    "rule_type": "range",
                    "severity": "FAIL",
                    "status": status,
                    "message": format!("rule {rule_id} observed {status}"),
                })
            })
            .collect();
        self.write_json(dir, "semantic_report.json", &json!({"rules": rules_json}))
    }
}

impl Default for ArtifactTree {
    fn default() -> Self {
        Self::new()
    }
}

/// A record wired to an artifact directory inside the tree.
pub fn record_with_artifacts(
    tree: &ArtifactTree,
    run_id: &str,
    source_name: &str,
    created_at: DateTime<Utc>,
) -> PreflightRecord {
    let dir = tree.run_dir(run_id, source_name);
    let mut record = base_record(run_id, source_name, created_at);
    record.artifact_dir = Some(dir.display().to_string());
    record
}
