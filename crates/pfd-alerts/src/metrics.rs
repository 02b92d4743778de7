//! Metric computation over a window of registry records.
//!
//! Pure: records and rule rollups come in, a value plus its evaluation
//! context go out.

use std::collections::BTreeMap;

use pfd_artifacts::RuleCounter;
use pfd_config::AlertPolicy;
use pfd_schemas::{MetricType, PreflightRecord};
use serde_json::{json, Map, Value};

fn count_final_status(records: &[PreflightRecord], status: &str) -> i64 {
    records
        .iter()
        .filter(|r| r.final_status.trim().eq_ignore_ascii_case(status))
        .count() as i64
}

/// Compute the policy's metric over the window.
///
/// The returned context carries the counts every metric shares plus the
/// metric-specific details (`metric_details` for rates, `rule` for
/// rule-based metrics).
pub fn compute_metric(
    policy: &AlertPolicy,
    records: &[PreflightRecord],
    rule_counts: &BTreeMap<String, RuleCounter>,
) -> (f64, Map<String, Value>) {
    let total_runs = records.len() as i64;
    let fail_count = count_final_status(records, "FAIL");
    let blocked_count = records.iter().filter(|r| r.blocked).count() as i64;
    let used_unified_count = records.iter().filter(|r| r.used_unified).count() as i64;

    let mut context = Map::new();
    context.insert("window_days".to_string(), json!(policy.window_days));
    context.insert("total_runs".to_string(), json!(total_runs));
    context.insert("fail_count".to_string(), json!(fail_count));
    context.insert("blocked_count".to_string(), json!(blocked_count));
    context.insert(
        "used_unified_count".to_string(),
        json!(used_unified_count),
    );

    let value = match policy.metric_type {
        MetricType::FailRate => {
            context.insert(
                "metric_details".to_string(),
                json!({"numerator": fail_count, "denominator": total_runs}),
            );
            if total_runs > 0 {
                fail_count as f64 / total_runs as f64
            } else {
                0.0
            }
        }
        MetricType::BlockedCount => blocked_count as f64,
        MetricType::FailCount => fail_count as f64,
        MetricType::UnifiedUsageRate => {
            context.insert(
                "metric_details".to_string(),
                json!({"numerator": used_unified_count, "denominator": total_runs}),
            );
            if total_runs > 0 {
                used_unified_count as f64 / total_runs as f64
            } else {
                0.0
            }
        }
        MetricType::TopRuleFailCount => {
            let top = rule_counts
                .values()
                .max_by_key(|counter| counter.fail_count);
            context.insert(
                "rule".to_string(),
                top.map(RuleCounter::to_json).unwrap_or(Value::Null),
            );
            top.map(|c| c.fail_count as f64).unwrap_or(0.0)
        }
        MetricType::SemanticRuleFailCount => {
            let entry = policy
                .rule_id
                .as_deref()
                .and_then(|rule_id| rule_counts.get(rule_id));
            context.insert(
                "rule".to_string(),
                entry.map(RuleCounter::to_json).unwrap_or(Value::Null),
            );
            context.insert("rule_id".to_string(), json!(policy.rule_id));
            entry.map(|c| c.fail_count as f64).unwrap_or(0.0)
        }
    };

    (value, context)
}
