//! Rollups over the delivery-attempt ledger and the pending outbox.
//!
//! Orphaned STARTED attempts (crash mid-flight) count as neither success
//! nor error anywhere here.

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use pfd_db::attempts::DeliveryAttemptRow;
use pfd_db::outbox::OutboxItem;
use pfd_schemas::{iso_utc, DiagnosticsError, NotificationEventType};
use serde_json::{json, Value};

use crate::window::TrendBucket;

const OUTBOX_STATUSES: [&str; 5] = ["PENDING", "RETRYING", "SENT", "DEAD", "FAILED"];
const ATTEMPT_STATUSES: [&str; 5] = ["STARTED", "SENT", "RETRY", "DEAD", "FAILED"];

/// Outbox-status filter → the attempt statuses it maps to.
pub fn attempt_statuses_for_outbox_status(status: &str) -> Option<Vec<String>> {
    let mapped: &[&str] = match status {
        "PENDING" => &["STARTED"],
        "RETRYING" => &["RETRY"],
        "SENT" => &["SENT"],
        "DEAD" => &["DEAD"],
        "FAILED" => &["FAILED"],
        _ => return None,
    };
    Some(mapped.iter().map(|s| s.to_string()).collect())
}

pub fn normalize_status_filter(status: Option<&str>) -> Result<Option<String>> {
    let Some(raw) = status.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    let upper = raw.to_ascii_uppercase();
    if !OUTBOX_STATUSES.contains(&upper.as_str()) {
        return Err(DiagnosticsError::payload(format!(
            "Unsupported status '{raw}'. Expected one of DEAD, FAILED, PENDING, RETRYING, SENT."
        )));
    }
    Ok(Some(upper))
}

pub fn normalize_attempt_status_filter(attempt_status: Option<&str>) -> Result<Option<String>> {
    let Some(raw) = attempt_status.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    let upper = raw.to_ascii_uppercase();
    if !ATTEMPT_STATUSES.contains(&upper.as_str()) {
        return Err(DiagnosticsError::payload(format!(
            "Unsupported attempt_status '{raw}'. Expected one of DEAD, FAILED, RETRY, SENT, STARTED."
        )));
    }
    Ok(Some(upper))
}

pub fn normalize_event_type_filter(event_type: Option<&str>) -> Result<Option<String>> {
    let Some(raw) = event_type.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    let parsed = NotificationEventType::parse(raw).map_err(|_| {
        DiagnosticsError::payload(format!(
            "Unsupported event_type '{raw}'. Expected one of ALERT_FIRING, ALERT_RESOLVED."
        ))
    })?;
    Ok(Some(parsed.as_str().to_string()))
}

/// Linear-interpolated percentile over unsorted values.
pub fn percentile(values: &[f64], pct: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut ordered: Vec<f64> = values.to_vec();
    ordered.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    if ordered.len() == 1 {
        return Some(ordered[0]);
    }
    let rank = (pct.clamp(0.0, 100.0) / 100.0) * (ordered.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = (lower + 1).min(ordered.len() - 1);
    let weight = rank - lower as f64;
    Some(ordered[lower] + (ordered[upper] - ordered[lower]) * weight)
}

fn duration_of(row: &DeliveryAttemptRow) -> Option<f64> {
    row.duration_ms
        .map(|ms| ms as f64)
        .filter(|ms| *ms >= 0.0)
}

fn is_replay(row: &DeliveryAttemptRow) -> bool {
    row.replayed_from_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .is_some()
}

/// Aggregate delivery stats for a window of attempt rows and the current
/// pending outbox rows.
pub fn compute_notification_stats(
    attempt_rows: &[DeliveryAttemptRow],
    pending_rows: &[OutboxItem],
    now: DateTime<Utc>,
    filters: Value,
) -> Value {
    let count_status = |status: &str| {
        attempt_rows
            .iter()
            .filter(|r| r.attempt_status.eq_ignore_ascii_case(status))
            .count() as i64
    };
    let sent_count = count_status("SENT");
    let retry_count = count_status("RETRY");
    let dead_count = count_status("DEAD");
    let failed_count = count_status("FAILED");
    let replay_count = attempt_rows.iter().filter(|r| is_replay(r)).count() as i64;

    let completed = sent_count + dead_count + failed_count;
    let success_rate = if completed > 0 {
        sent_count as f64 / completed as f64
    } else {
        0.0
    };

    let latencies: Vec<f64> = attempt_rows.iter().filter_map(duration_of).collect();
    let avg_latency = if latencies.is_empty() {
        None
    } else {
        Some(latencies.iter().sum::<f64>() / latencies.len() as f64)
    };

    let oldest_pending_age_seconds = pending_rows
        .iter()
        .map(|row| (now - row.created_at).num_seconds().max(0))
        .max();

    json!({
        "filters": filters,
        "total_events": attempt_rows.len(),
        "sent_count": sent_count,
        "retry_count": retry_count,
        "dead_count": dead_count,
        "failed_count": failed_count,
        "replay_count": replay_count,
        "pending_count": pending_rows.len(),
        "success_rate": success_rate,
        "avg_delivery_latency_ms": avg_latency,
        "p95_delivery_latency_ms": percentile(&latencies, 95.0),
        "oldest_pending_age_seconds": oldest_pending_age_seconds,
    })
}

/// Attempt trends bucketed on `started_at`.
pub fn compute_notification_trends(
    attempt_rows: &[DeliveryAttemptRow],
    bucket: TrendBucket,
    filters: Value,
) -> Value {
    #[derive(Default)]
    struct BucketCounts {
        sent: i64,
        retry: i64,
        dead: i64,
        replay: i64,
        latencies: Vec<f64>,
    }

    let mut bucketed: BTreeMap<DateTime<Utc>, BucketCounts> = BTreeMap::new();
    for row in attempt_rows {
        let entry = bucketed.entry(bucket.truncate(row.started_at)).or_default();
        match row.attempt_status.to_ascii_uppercase().as_str() {
            "SENT" => entry.sent += 1,
            "RETRY" => entry.retry += 1,
            "DEAD" => entry.dead += 1,
            _ => {}
        }
        if is_replay(row) {
            entry.replay += 1;
        }
        if let Some(ms) = duration_of(row) {
            entry.latencies.push(ms);
        }
    }

    let items: Vec<Value> = bucketed
        .iter()
        .map(|(bucket_start, counts)| {
            let avg = if counts.latencies.is_empty() {
                None
            } else {
                Some(counts.latencies.iter().sum::<f64>() / counts.latencies.len() as f64)
            };
            json!({
                "bucket_start": iso_utc(bucket_start),
                "sent_count": counts.sent,
                "retry_count": counts.retry,
                "dead_count": counts.dead,
                "replay_count": counts.replay,
                "avg_delivery_latency_ms": avg,
            })
        })
        .collect();

    json!({
        "bucket": bucket.as_str(),
        "filters": filters,
        "items": items,
    })
}

/// Per-channel delivery summaries with top error codes.
pub fn compute_channel_summaries(
    attempt_rows: &[DeliveryAttemptRow],
    pending_rows: &[OutboxItem],
    filters: Value,
) -> Value {
    #[derive(Default)]
    struct ChannelCounts {
        sent: i64,
        retry: i64,
        dead: i64,
        pending: i64,
        replay: i64,
        latencies: Vec<f64>,
        last_sent_at: Option<DateTime<Utc>>,
        last_error_at: Option<DateTime<Utc>>,
        error_counts: BTreeMap<String, i64>,
    }

    let mut channels: BTreeMap<String, ChannelCounts> = BTreeMap::new();

    for row in attempt_rows {
        let target = row.channel_target.trim();
        let key = if target.is_empty() { "unknown" } else { target };
        let entry = channels.entry(key.to_string()).or_default();

        let status = row.attempt_status.to_ascii_uppercase();
        match status.as_str() {
            "SENT" => entry.sent += 1,
            "RETRY" => entry.retry += 1,
            "DEAD" => entry.dead += 1,
            _ => {}
        }
        if is_replay(row) {
            entry.replay += 1;
        }
        if let Some(ms) = duration_of(row) {
            entry.latencies.push(ms);
        }

        if status == "SENT" {
            if let Some(completed_at) = row.completed_at {
                if entry.last_sent_at.map(|t| completed_at > t).unwrap_or(true) {
                    entry.last_sent_at = Some(completed_at);
                }
            }
        }
        if let Some(code) = row.error_code.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            *entry
                .error_counts
                .entry(code.to_ascii_uppercase())
                .or_insert(0) += 1;
            if let Some(completed_at) = row.completed_at {
                if entry.last_error_at.map(|t| completed_at > t).unwrap_or(true) {
                    entry.last_error_at = Some(completed_at);
                }
            }
        }
    }

    for row in pending_rows {
        let target = row.channel_target.trim();
        let key = if target.is_empty() { "unknown" } else { target };
        channels.entry(key.to_string()).or_default().pending += 1;
    }

    let items: Vec<Value> = channels
        .iter()
        .map(|(target, counts)| {
            let completed = counts.sent + counts.dead;
            let success_rate = if completed > 0 {
                counts.sent as f64 / completed as f64
            } else {
                0.0
            };
            let avg = if counts.latencies.is_empty() {
                None
            } else {
                Some(counts.latencies.iter().sum::<f64>() / counts.latencies.len() as f64)
            };

            let mut errors: Vec<(&String, &i64)> = counts.error_counts.iter().collect();
            errors.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
            let top_error_codes: Vec<Value> = errors
                .into_iter()
                .take(5)
                .map(|(code, count)| json!({"error_code": code, "count": count}))
                .collect();

            json!({
                "channel_target": target,
                "sent_count": counts.sent,
                "retry_count": counts.retry,
                "dead_count": counts.dead,
                "pending_count": counts.pending,
                "replay_count": counts.replay,
                "success_rate": success_rate,
                "avg_delivery_latency_ms": avg,
                "last_sent_at": counts.last_sent_at.map(|t| iso_utc(&t)),
                "last_error_at": counts.last_error_at.map(|t| iso_utc(&t)),
                "top_error_codes": top_error_codes,
            })
        })
        .collect();

    json!({"filters": filters, "items": items})
}
