//! Prometheus text exposition.
//!
//! Rendering is pure over a collected snapshot so the format is testable
//! without a store. The render-errors counter is injected state owned by
//! the application context; on a render failure the endpoint still returns
//! the counter line so callers can observe the self-failure.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use chrono::{DateTime, Utc};
use pfd_db::alerts::{
    count_active_silences, count_audit_events_by_type, get_scheduler_lease,
    list_active_alert_states, scheduler_lease_base_name, AlertStateRow, SchedulerLeaseRow,
};
use pfd_db::attempts::{query_delivery_attempts, AttemptQuery, DeliveryAttemptRow};
use pfd_db::outbox::{query_outbox_items, OutboxItem, OutboxQuery};
use pfd_db::registry::{query_runs, RunFilter};
use pfd_schemas::PreflightRecord;
use sqlx::PgPool;
use tracing::error;

const LATENCY_BUCKETS_MS: [f64; 10] = [
    50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 30000.0, 60000.0,
];

/// Injected exposition state (no process-wide globals).
#[derive(Debug, Default)]
pub struct MetricsState {
    render_errors: AtomicU64,
}

impl MetricsState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render_errors(&self) -> u64 {
        self.render_errors.load(Ordering::Relaxed)
    }

    pub fn increment_render_errors(&self) -> u64 {
        self.render_errors.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Everything one exposition needs, fetched in one pass.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub runs: Vec<PreflightRecord>,
    pub active_alerts: Vec<AlertStateRow>,
    pub audit_counts: Vec<(String, i64)>,
    pub active_silences: i64,
    pub attempts: Vec<DeliveryAttemptRow>,
    pub pending_outbox: Vec<OutboxItem>,
    pub dead_outbox_count: i64,
    pub replay_count: i64,
    pub alerts_lease: Option<SchedulerLeaseRow>,
    pub notifications_lease: Option<SchedulerLeaseRow>,
}

pub async fn collect_snapshot(pool: &PgPool, now: DateTime<Utc>) -> Result<MetricsSnapshot> {
    let runs = query_runs(
        pool,
        &RunFilter {
            ascending: true,
            ..Default::default()
        },
    )
    .await?;
    let active_alerts = list_active_alert_states(pool, 5000).await?;
    let audit_counts = count_audit_events_by_type(pool).await?;
    let active_silences = count_active_silences(pool, now).await?;

    let attempts = query_delivery_attempts(
        pool,
        &AttemptQuery {
            ascending: true,
            ..Default::default()
        },
    )
    .await?;

    let pending_outbox = query_outbox_items(
        pool,
        &OutboxQuery {
            statuses: Some(vec!["PENDING".to_string(), "RETRYING".to_string()]),
            ascending: true,
            ..Default::default()
        },
    )
    .await?;
    let dead_outbox_count = query_outbox_items(
        pool,
        &OutboxQuery {
            statuses: Some(vec!["DEAD".to_string()]),
            ascending: true,
            ..Default::default()
        },
    )
    .await?
    .len() as i64;
    let replay_count = query_outbox_items(
        pool,
        &OutboxQuery {
            ascending: true,
            ..Default::default()
        },
    )
    .await?
    .iter()
    .filter(|item| {
        item.replayed_from_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .is_some()
    })
    .count() as i64;

    let lease_base = scheduler_lease_base_name();
    let alerts_lease = get_scheduler_lease(pool, &format!("{lease_base}:alerts")).await?;
    let notifications_lease =
        get_scheduler_lease(pool, &format!("{lease_base}:notifications")).await?;

    Ok(MetricsSnapshot {
        runs,
        active_alerts,
        audit_counts,
        active_silences,
        attempts,
        pending_outbox,
        dead_outbox_count,
        replay_count,
        alerts_lease,
        notifications_lease,
    })
}

// ---------------------------------------------------------------------------
// Text rendering
// ---------------------------------------------------------------------------

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('\n', "\\n")
        .replace('"', "\\\"")
}

/// `%.6f` with trailing zeros trimmed; NaN/inf render as 0.
fn format_f64(value: f64) -> String {
    if value.is_nan() || value.is_infinite() {
        return "0".to_string();
    }
    let rendered = format!("{value:.6}");
    let trimmed = rendered.trim_end_matches('0').trim_end_matches('.');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

fn render_metric(name: &str, value: &str, labels: &BTreeMap<&str, String>) -> String {
    if labels.is_empty() {
        return format!("{name} {value}");
    }
    let serialized = labels
        .iter()
        .map(|(key, label)| format!("{key}=\"{}\"", escape_label_value(label)))
        .collect::<Vec<_>>()
        .join(",");
    format!("{name}{{{serialized}}} {value}")
}

fn normalize_upper(raw: &str) -> String {
    let upper = raw.trim().to_ascii_uppercase();
    if upper.is_empty() {
        "UNKNOWN".to_string()
    } else {
        upper
    }
}

fn normalize_lower(raw: &str) -> String {
    let lower = raw.trim().to_ascii_lowercase();
    if lower.is_empty() {
        "unknown".to_string()
    } else {
        lower
    }
}

fn lease_tick_timestamp(lease: Option<&SchedulerLeaseRow>) -> i64 {
    lease.map(|row| row.heartbeat_at.timestamp()).unwrap_or(0)
}

fn preflight_lines(snapshot: &MetricsSnapshot, lines: &mut Vec<String>) {
    let mut runs_counter: BTreeMap<(String, String, String), i64> = BTreeMap::new();
    let mut blocked_counter: BTreeMap<String, i64> = BTreeMap::new();
    let mut latest_by_source: BTreeMap<String, DateTime<Utc>> = BTreeMap::new();

    for run in &snapshot.runs {
        let source = normalize_lower(&run.source_name);
        let status = normalize_upper(&run.final_status);
        let mode = normalize_lower(&run.mode);
        *runs_counter.entry((source.clone(), status, mode)).or_insert(0) += 1;
        if run.blocked {
            *blocked_counter.entry(source.clone()).or_insert(0) += 1;
        }
        let latest = latest_by_source.entry(source).or_insert(run.created_at);
        if run.created_at > *latest {
            *latest = run.created_at;
        }
    }

    lines.push("# HELP preflight_runs_total Total persisted preflight runs grouped by source/final_status/mode.".to_string());
    lines.push("# TYPE preflight_runs_total counter".to_string());
    for ((source, status, mode), count) in &runs_counter {
        let labels = BTreeMap::from([
            ("source_name", source.clone()),
            ("final_status", status.clone()),
            ("mode", mode.clone()),
        ]);
        lines.push(render_metric("preflight_runs_total", &count.to_string(), &labels));
    }

    lines.push("# HELP preflight_blocked_total Total blocked preflight runs grouped by source.".to_string());
    lines.push("# TYPE preflight_blocked_total counter".to_string());
    for (source, count) in &blocked_counter {
        let labels = BTreeMap::from([("source_name", source.clone())]);
        lines.push(render_metric("preflight_blocked_total", &count.to_string(), &labels));
    }

    lines.push("# HELP preflight_latest_run_timestamp_seconds Latest preflight run timestamp by source (unix seconds).".to_string());
    lines.push("# TYPE preflight_latest_run_timestamp_seconds gauge".to_string());
    for (source, created_at) in &latest_by_source {
        let labels = BTreeMap::from([("source_name", source.clone())]);
        lines.push(render_metric(
            "preflight_latest_run_timestamp_seconds",
            &created_at.timestamp().to_string(),
            &labels,
        ));
    }
}

fn alert_lines(snapshot: &MetricsSnapshot, lines: &mut Vec<String>) {
    let mut active_counter: BTreeMap<(String, String), i64> = BTreeMap::new();
    for row in &snapshot.active_alerts {
        let key = (normalize_upper(&row.severity), normalize_upper(&row.status));
        *active_counter.entry(key).or_insert(0) += 1;
    }

    lines.push("# HELP preflight_alerts_active Current active alerts grouped by severity/status.".to_string());
    lines.push("# TYPE preflight_alerts_active gauge".to_string());
    for ((severity, status), count) in &active_counter {
        let labels = BTreeMap::from([("severity", severity.clone()), ("status", status.clone())]);
        lines.push(render_metric("preflight_alerts_active", &count.to_string(), &labels));
    }

    lines.push("# HELP preflight_alert_transitions_total Total alert transition/audit events grouped by event_type.".to_string());
    lines.push("# TYPE preflight_alert_transitions_total counter".to_string());
    let mut audit_counts = snapshot.audit_counts.clone();
    audit_counts.sort_by(|a, b| a.0.cmp(&b.0));
    for (event_type, count) in &audit_counts {
        let labels = BTreeMap::from([("event_type", normalize_upper(event_type))]);
        lines.push(render_metric(
            "preflight_alert_transitions_total",
            &count.to_string(),
            &labels,
        ));
    }

    lines.push("# HELP preflight_alert_silences_active Current number of active alert silences.".to_string());
    lines.push("# TYPE preflight_alert_silences_active gauge".to_string());
    lines.push(render_metric(
        "preflight_alert_silences_active",
        &snapshot.active_silences.to_string(),
        &BTreeMap::new(),
    ));

    lines.push("# HELP preflight_alerts_scheduler_last_tick_timestamp_seconds Last alerts scheduler tick timestamp (unix seconds).".to_string());
    lines.push("# TYPE preflight_alerts_scheduler_last_tick_timestamp_seconds gauge".to_string());
    lines.push(render_metric(
        "preflight_alerts_scheduler_last_tick_timestamp_seconds",
        &lease_tick_timestamp(snapshot.alerts_lease.as_ref()).to_string(),
        &BTreeMap::new(),
    ));
}

fn notification_lines(snapshot: &MetricsSnapshot, now: DateTime<Utc>, lines: &mut Vec<String>) {
    let mut attempts_counter: BTreeMap<(String, String, String), i64> = BTreeMap::new();
    let mut latencies: Vec<f64> = Vec::new();
    let mut dispatch_errors_total = 0i64;

    for row in &snapshot.attempts {
        let channel = {
            let trimmed = row.channel_target.trim();
            if trimmed.is_empty() {
                "unknown".to_string()
            } else {
                trimmed.to_string()
            }
        };
        let key = (
            channel,
            normalize_upper(&row.event_type),
            normalize_upper(&row.attempt_status),
        );
        *attempts_counter.entry(key).or_insert(0) += 1;

        if let Some(ms) = row.duration_ms.filter(|ms| *ms >= 0) {
            latencies.push(ms as f64);
        }
        if matches!(
            normalize_upper(&row.attempt_status).as_str(),
            "RETRY" | "DEAD" | "FAILED"
        ) {
            dispatch_errors_total += 1;
        }
    }

    lines.push("# HELP preflight_notifications_attempts_total Total notification delivery attempts grouped by channel/event/status.".to_string());
    lines.push("# TYPE preflight_notifications_attempts_total counter".to_string());
    for ((channel_target, event_type, attempt_status), count) in &attempts_counter {
        let labels = BTreeMap::from([
            ("channel_target", channel_target.clone()),
            ("event_type", event_type.clone()),
            ("attempt_status", attempt_status.clone()),
        ]);
        lines.push(render_metric(
            "preflight_notifications_attempts_total",
            &count.to_string(),
            &labels,
        ));
    }

    lines.push("# HELP preflight_notifications_delivery_latency_ms Delivery latency histogram from attempt ledger (milliseconds).".to_string());
    lines.push("# TYPE preflight_notifications_delivery_latency_ms histogram".to_string());
    latencies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    for bucket in LATENCY_BUCKETS_MS {
        let cumulative = latencies.iter().filter(|ms| **ms <= bucket).count();
        let labels = BTreeMap::from([("le", format_f64(bucket))]);
        lines.push(render_metric(
            "preflight_notifications_delivery_latency_ms_bucket",
            &cumulative.to_string(),
            &labels,
        ));
    }
    let labels = BTreeMap::from([("le", "+Inf".to_string())]);
    lines.push(render_metric(
        "preflight_notifications_delivery_latency_ms_bucket",
        &latencies.len().to_string(),
        &labels,
    ));
    lines.push(render_metric(
        "preflight_notifications_delivery_latency_ms_sum",
        &format_f64(latencies.iter().sum()),
        &BTreeMap::new(),
    ));
    lines.push(render_metric(
        "preflight_notifications_delivery_latency_ms_count",
        &latencies.len().to_string(),
        &BTreeMap::new(),
    ));

    let oldest_pending_age_seconds = snapshot
        .pending_outbox
        .iter()
        .map(|row| (now - row.created_at).num_seconds().max(0))
        .max()
        .unwrap_or(0);

    let gauges = [
        (
            "preflight_notifications_outbox_pending",
            "Current number of pending/retrying outbox items.",
            "gauge",
            snapshot.pending_outbox.len() as i64,
        ),
        (
            "preflight_notifications_outbox_dead",
            "Current number of dead outbox items.",
            "gauge",
            snapshot.dead_outbox_count,
        ),
        (
            "preflight_notifications_outbox_oldest_pending_age_seconds",
            "Age of oldest pending outbox item in seconds.",
            "gauge",
            oldest_pending_age_seconds,
        ),
        (
            "preflight_notifications_replays_total",
            "Total replayed notification outbox items.",
            "counter",
            snapshot.replay_count,
        ),
        (
            "preflight_notifications_scheduler_last_tick_timestamp_seconds",
            "Last notifications scheduler tick timestamp (unix seconds).",
            "gauge",
            lease_tick_timestamp(snapshot.notifications_lease.as_ref()),
        ),
        (
            "preflight_notifications_dispatch_errors_total",
            "Total notification attempt outcomes with RETRY/DEAD/FAILED status.",
            "counter",
            dispatch_errors_total,
        ),
    ];
    for (name, help, kind, value) in gauges {
        lines.push(format!("# HELP {name} {help}"));
        lines.push(format!("# TYPE {name} {kind}"));
        lines.push(render_metric(name, &value.to_string(), &BTreeMap::new()));
    }
}

fn render_errors_lines(total: u64) -> Vec<String> {
    vec![
        "# HELP preflight_metrics_render_errors_total Total diagnostics metrics render failures."
            .to_string(),
        "# TYPE preflight_metrics_render_errors_total counter".to_string(),
        render_metric(
            "preflight_metrics_render_errors_total",
            &total.to_string(),
            &BTreeMap::new(),
        ),
    ]
}

/// Pure rendering over a snapshot.
pub fn render_snapshot(snapshot: &MetricsSnapshot, render_errors_total: u64, now: DateTime<Utc>) -> String {
    let mut lines: Vec<String> = Vec::new();
    preflight_lines(snapshot, &mut lines);
    lines.push(String::new());
    alert_lines(snapshot, &mut lines);
    lines.push(String::new());
    notification_lines(snapshot, now, &mut lines);
    lines.push(String::new());
    lines.extend(render_errors_lines(render_errors_total));
    lines.push(String::new());
    lines.join("\n")
}

/// Collect and render. A collection/render failure increments the counter
/// and still returns the counter-only exposition.
pub async fn render_prometheus_metrics(
    pool: &PgPool,
    state: &MetricsState,
    now: DateTime<Utc>,
) -> String {
    match collect_snapshot(pool, now).await {
        Ok(snapshot) => render_snapshot(&snapshot, state.render_errors(), now),
        Err(err) => {
            let failures = state.increment_render_errors();
            error!(error = %err, "failed to render diagnostics metrics payload");
            let mut lines = render_errors_lines(failures);
            lines.push(String::new());
            lines.join("\n")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn attempt(channel: &str, event_type: &str, status: &str, duration: Option<i64>) -> DeliveryAttemptRow {
        let at = Utc.with_ymd_and_hms(2026, 2, 22, 10, 0, 0).unwrap();
        DeliveryAttemptRow {
            attempt_id: pfd_schemas::hex_id(),
            outbox_item_id: "o1".to_string(),
            event_id: None,
            delivery_id: None,
            replayed_from_id: None,
            channel_type: "webhook".to_string(),
            channel_target: channel.to_string(),
            event_type: event_type.to_string(),
            alert_id: "a".to_string(),
            policy_id: "p".to_string(),
            source_name: None,
            attempt_number: 1,
            attempt_status: status.to_string(),
            started_at: at,
            completed_at: None,
            duration_ms: duration,
            http_status: None,
            error_code: None,
            error_message_safe: None,
            created_at: at,
        }
    }

    fn empty_snapshot() -> MetricsSnapshot {
        MetricsSnapshot {
            runs: Vec::new(),
            active_alerts: Vec::new(),
            audit_counts: Vec::new(),
            active_silences: 0,
            attempts: Vec::new(),
            pending_outbox: Vec::new(),
            dead_outbox_count: 0,
            replay_count: 0,
            alerts_lease: None,
            notifications_lease: None,
        }
    }

    #[test]
    fn attempts_family_renders_exact_sorted_lines() {
        let mut snapshot = empty_snapshot();
        snapshot.attempts = vec![
            attempt("channel_a", "ALERT_FIRING", "SENT", Some(120)),
            attempt("channel_a", "ALERT_FIRING", "RETRY", Some(80)),
        ];
        let now = Utc.with_ymd_and_hms(2026, 2, 22, 12, 0, 0).unwrap();
        let output = render_snapshot(&snapshot, 0, now);

        assert!(output.contains(
            "preflight_notifications_attempts_total{attempt_status=\"RETRY\",channel_target=\"channel_a\",event_type=\"ALERT_FIRING\"} 1"
        ));
        assert!(output.contains(
            "preflight_notifications_attempts_total{attempt_status=\"SENT\",channel_target=\"channel_a\",event_type=\"ALERT_FIRING\"} 1"
        ));
        assert!(output.contains(
            "preflight_notifications_delivery_latency_ms_bucket{le=\"+Inf\"} 2"
        ));
        assert!(output.contains("preflight_notifications_delivery_latency_ms_bucket{le=\"50\"} 0"));
        assert!(output.contains("preflight_notifications_delivery_latency_ms_bucket{le=\"100\"} 1"));
        assert!(output.contains("preflight_notifications_delivery_latency_ms_sum 200"));
        assert!(output.contains("# TYPE preflight_notifications_delivery_latency_ms histogram"));
        assert!(output.contains("preflight_metrics_render_errors_total 0"));
    }

    #[test]
    fn label_values_are_escaped() {
        let labels = BTreeMap::from([("channel_target", "a\"b\\c\nd".to_string())]);
        let line = render_metric("m", "1", &labels);
        assert_eq!(line, "m{channel_target=\"a\\\"b\\\\c\\nd\"} 1");
    }

    #[test]
    fn number_formatting_trims_trailing_zeros() {
        assert_eq!(format_f64(50.0), "50");
        assert_eq!(format_f64(0.25), "0.25");
        assert_eq!(format_f64(f64::NAN), "0");
        assert_eq!(format_f64(0.0), "0");
    }

    #[test]
    fn started_attempts_do_not_count_as_dispatch_errors() {
        let mut snapshot = empty_snapshot();
        snapshot.attempts = vec![
            attempt("c", "ALERT_FIRING", "STARTED", None),
            attempt("c", "ALERT_FIRING", "DEAD", Some(5)),
        ];
        let now = Utc.with_ymd_and_hms(2026, 2, 22, 12, 0, 0).unwrap();
        let output = render_snapshot(&snapshot, 0, now);
        assert!(output.contains("preflight_notifications_dispatch_errors_total 1"));
    }

    #[test]
    fn render_errors_counter_survives_failures() {
        let state = MetricsState::new();
        assert_eq!(state.increment_render_errors(), 1);
        assert_eq!(state.increment_render_errors(), 2);
        let lines = render_errors_lines(state.render_errors());
        assert!(lines[2].ends_with(" 2"));
    }
}
