//! Rollups over preflight registry records.

use std::collections::BTreeMap;

use pfd_artifacts::RuleCounter;
use pfd_schemas::{iso_utc, PreflightRecord};
use serde_json::{json, Value};

use crate::window::TrendBucket;

fn status_key(raw: &str) -> String {
    let upper = raw.trim().to_ascii_uppercase();
    if upper.is_empty() {
        "UNKNOWN".to_string()
    } else {
        upper
    }
}

fn source_key(raw: &str) -> String {
    let lower = raw.trim().to_ascii_lowercase();
    if lower.is_empty() {
        "unknown".to_string()
    } else {
        lower
    }
}

#[derive(Default)]
struct Counts {
    total: i64,
    fail: i64,
    warn: i64,
    pass: i64,
    skipped: i64,
    blocked: i64,
    used_unified: i64,
}

impl Counts {
    fn observe(&mut self, record: &PreflightRecord) {
        self.total += 1;
        match status_key(&record.final_status).as_str() {
            "FAIL" => self.fail += 1,
            "WARN" => self.warn += 1,
            "PASS" => self.pass += 1,
            "SKIPPED" => self.skipped += 1,
            _ => {}
        }
        if record.blocked {
            self.blocked += 1;
        }
        if record.used_unified {
            self.used_unified += 1;
        }
    }

    fn to_json(&self) -> Value {
        json!({
            "total_runs": self.total,
            "fail_count": self.fail,
            "warn_count": self.warn,
            "pass_count": self.pass,
            "skipped_count": self.skipped,
            "blocked_count": self.blocked,
            "used_unified_count": self.used_unified,
        })
    }
}

/// Counts by final_status/blocked/used_unified with per-source and
/// per-mode breakdowns.
pub fn compute_run_stats(records: &[PreflightRecord], filters: Value) -> Value {
    let mut totals = Counts::default();
    let mut by_source: BTreeMap<String, Counts> = BTreeMap::new();
    let mut by_mode: BTreeMap<String, Counts> = BTreeMap::new();
    let mut by_status: BTreeMap<String, i64> = BTreeMap::new();

    for record in records {
        totals.observe(record);
        by_source
            .entry(source_key(&record.source_name))
            .or_default()
            .observe(record);
        by_mode
            .entry(source_key(&record.mode))
            .or_default()
            .observe(record);
        *by_status
            .entry(status_key(&record.final_status))
            .or_insert(0) += 1;
    }

    let fail_rate = if totals.total > 0 {
        totals.fail as f64 / totals.total as f64
    } else {
        0.0
    };
    let unified_usage_rate = if totals.total > 0 {
        totals.used_unified as f64 / totals.total as f64
    } else {
        0.0
    };

    json!({
        "filters": filters,
        "totals": totals.to_json(),
        "fail_rate": fail_rate,
        "unified_usage_rate": unified_usage_rate,
        "by_final_status": by_status,
        "by_source": by_source.iter().map(|(k, v)| (k.clone(), v.to_json())).collect::<BTreeMap<_, _>>(),
        "by_mode": by_mode.iter().map(|(k, v)| (k.clone(), v.to_json())).collect::<BTreeMap<_, _>>(),
    })
}

/// Day/hour trend buckets over `created_at`, ascending.
pub fn compute_run_trends(records: &[PreflightRecord], bucket: TrendBucket, filters: Value) -> Value {
    let mut bucketed: BTreeMap<chrono::DateTime<chrono::Utc>, Counts> = BTreeMap::new();
    for record in records {
        bucketed
            .entry(bucket.truncate(record.created_at))
            .or_default()
            .observe(record);
    }

    let items: Vec<Value> = bucketed
        .iter()
        .map(|(bucket_start, counts)| {
            let mut payload = counts.to_json();
            if let Some(map) = payload.as_object_mut() {
                map.insert("bucket_start".to_string(), json!(iso_utc(bucket_start)));
            }
            payload
        })
        .collect();

    json!({
        "bucket": bucket.as_str(),
        "filters": filters,
        "items": items,
    })
}

/// Top semantic rules by fail count (warn count and rule id break ties).
pub fn compute_top_rules(
    rule_counts: &BTreeMap<String, RuleCounter>,
    limit: usize,
    filters: Value,
) -> Value {
    let mut entries: Vec<&RuleCounter> = rule_counts.values().collect();
    entries.sort_by(|a, b| {
        b.fail_count
            .cmp(&a.fail_count)
            .then(b.warn_count.cmp(&a.warn_count))
            .then(a.rule_id.cmp(&b.rule_id))
    });

    let items: Vec<Value> = entries
        .into_iter()
        .take(limit.max(1))
        .map(RuleCounter::to_json)
        .collect();

    json!({
        "filters": filters,
        "limit": limit.max(1),
        "items": items,
    })
}
