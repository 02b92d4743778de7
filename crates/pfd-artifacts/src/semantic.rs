//! Normalisers for artifact payloads and the rule rollup used by
//! rule-based alert metrics and top-rule analytics.
//!
//! Artifact JSON is producer-controlled, so every field goes through a
//! tolerant normaliser: known sub-schemas become typed values, everything
//! else stays a raw object.

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use pfd_schemas::PreflightRecord;
use serde::Serialize;
use serde_json::{json, Value};

use crate::ArtifactGateway;

fn normalize_status(value: Option<&Value>, fallback: &str) -> String {
    let text = value
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or("")
        .to_ascii_uppercase();
    if text.is_empty() {
        fallback.to_string()
    } else {
        text
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect()
        })
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Semantic report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct SemanticRule {
    pub rule_id: String,
    pub rule_type: String,
    pub severity: String,
    pub status: String,
    pub message: String,
    pub target: Vec<String>,
    pub observed: Value,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SemanticCounts {
    pub total: i64,
    pub passed: i64,
    pub warned: i64,
    pub failed: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SemanticReport {
    pub status: String,
    pub summary: String,
    pub counts: SemanticCounts,
    pub rules: Vec<SemanticRule>,
}

fn normalize_rules(value: Option<&Value>) -> Vec<SemanticRule> {
    let Some(items) = value.and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(Value::as_object)
        .map(|rule| SemanticRule {
            rule_id: rule
                .get("rule_id")
                .and_then(Value::as_str)
                .unwrap_or("unknown_rule")
                .to_string(),
            rule_type: rule
                .get("rule_type")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
            severity: normalize_status(rule.get("severity"), "WARN"),
            status: normalize_status(rule.get("status"), "UNKNOWN"),
            message: rule
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
            target: string_list(rule.get("target")),
            observed: rule
                .get("observed")
                .filter(|v| v.is_object())
                .cloned()
                .unwrap_or_else(|| json!({})),
        })
        .collect()
}

fn counts_from_rules(rules: &[SemanticRule]) -> SemanticCounts {
    SemanticCounts {
        total: rules.len() as i64,
        passed: rules.iter().filter(|r| r.status == "PASS").count() as i64,
        warned: rules.iter().filter(|r| r.status == "WARN").count() as i64,
        failed: rules.iter().filter(|r| r.status == "FAIL").count() as i64,
    }
}

fn normalize_counts(value: Option<&Value>, fallback: SemanticCounts) -> SemanticCounts {
    let Some(map) = value.and_then(Value::as_object) else {
        return fallback;
    };
    let pick = |key: &str, fb: i64| map.get(key).and_then(Value::as_i64).unwrap_or(fb);
    SemanticCounts {
        total: pick("total", fallback.total),
        passed: pick("passed", fallback.passed),
        warned: pick("warned", fallback.warned),
        failed: pick("failed", fallback.failed),
    }
}

pub fn normalize_semantic_payload(payload: &Value) -> SemanticReport {
    let rules = normalize_rules(payload.get("rules"));
    let counts = normalize_counts(payload.get("counts"), counts_from_rules(&rules));

    let mut status = normalize_status(payload.get("status"), "");
    if status.is_empty() {
        status = if counts.failed > 0 {
            "FAIL".to_string()
        } else if counts.warned > 0 {
            "WARN".to_string()
        } else {
            "PASS".to_string()
        };
    }

    let summary = payload
        .get("summary")
        .and_then(Value::as_str)
        .unwrap_or("Semantic quality results loaded.")
        .to_string();

    SemanticReport {
        status,
        summary,
        counts,
        rules,
    }
}

// ---------------------------------------------------------------------------
// Validation report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub status: String,
    pub contract_version: Value,
    pub profile: Value,
    pub checks: BTreeMap<String, String>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub summary: Value,
    pub metadata: Value,
}

pub fn normalize_validation_payload(payload: &Value) -> ValidationReport {
    let checks = payload
        .get("checks")
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .map(|(name, status)| (name.clone(), normalize_status(Some(status), "UNKNOWN")))
                .collect()
        })
        .unwrap_or_default();

    ValidationReport {
        status: normalize_status(payload.get("status"), "UNKNOWN"),
        contract_version: payload.get("contract_version").cloned().unwrap_or(Value::Null),
        profile: payload.get("profile").cloned().unwrap_or(Value::Null),
        checks,
        errors: string_list(payload.get("errors")),
        warnings: string_list(payload.get("warnings")),
        summary: payload.get("summary").cloned().unwrap_or(Value::Null),
        metadata: payload
            .get("metadata")
            .filter(|v| v.is_object())
            .cloned()
            .unwrap_or_else(|| json!({})),
    }
}

// ---------------------------------------------------------------------------
// Manifest report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ManifestReport {
    pub contract_version: Value,
    pub profile: Value,
    pub validation_status: String,
    pub renamed_columns: BTreeMap<String, String>,
    pub extra_columns_dropped: Vec<String>,
    pub coercion_stats: Value,
    pub final_canonical_columns: Vec<String>,
    pub retained_extra_columns: Vec<String>,
    pub output_row_count: Option<i64>,
    pub output_column_count: Option<i64>,
    pub semantic_quality: Option<Value>,
}

pub fn normalize_manifest_payload(payload: &Value) -> ManifestReport {
    let renamed_columns = payload
        .get("renamed_columns")
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .map(|(k, v)| {
                    let rendered = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), rendered)
                })
                .collect()
        })
        .unwrap_or_default();

    ManifestReport {
        contract_version: payload.get("contract_version").cloned().unwrap_or(Value::Null),
        profile: payload.get("profile").cloned().unwrap_or(Value::Null),
        validation_status: normalize_status(payload.get("validation_status"), "UNKNOWN"),
        renamed_columns,
        extra_columns_dropped: string_list(payload.get("extra_columns_dropped")),
        coercion_stats: payload
            .get("coercion_stats")
            .filter(|v| v.is_object())
            .cloned()
            .unwrap_or_else(|| json!({})),
        final_canonical_columns: string_list(payload.get("final_canonical_columns")),
        retained_extra_columns: string_list(payload.get("retained_extra_columns")),
        output_row_count: payload.get("output_row_count").and_then(Value::as_i64),
        output_column_count: payload.get("output_column_count").and_then(Value::as_i64),
        semantic_quality: payload
            .get("semantic_quality")
            .filter(|v| v.is_object())
            .cloned(),
    }
}

// ---------------------------------------------------------------------------
// Rule rollup
// ---------------------------------------------------------------------------

/// WARN/FAIL observations for one rule across a record window.
#[derive(Debug, Clone, Serialize)]
pub struct RuleCounter {
    pub rule_id: String,
    pub rule_type: String,
    pub severity: String,
    pub warn_count: i64,
    pub fail_count: i64,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub sample_message: Option<String>,
}

impl RuleCounter {
    pub fn to_json(&self) -> Value {
        json!({
            "rule_id": self.rule_id,
            "rule_type": self.rule_type,
            "severity": self.severity,
            "warn_count": self.warn_count,
            "fail_count": self.fail_count,
            "last_seen_at": self.last_seen_at.map(|t| pfd_schemas::iso_utc(&t)),
            "sample_message": self.sample_message,
        })
    }
}

pub(crate) fn collect_rule_counts(
    gateway: &ArtifactGateway,
    records: &[PreflightRecord],
) -> Result<BTreeMap<String, RuleCounter>> {
    let mut counts: BTreeMap<String, RuleCounter> = BTreeMap::new();

    for record in records {
        let payload = match gateway.load_semantic_with_fallback(record) {
            Ok((payload, _path)) => payload,
            Err(err) if crate::is_not_found(&err) => continue,
            Err(err) => return Err(err),
        };

        let report = normalize_semantic_payload(&payload);
        for rule in &report.rules {
            if rule.status != "WARN" && rule.status != "FAIL" {
                continue;
            }

            let entry = counts
                .entry(rule.rule_id.clone())
                .or_insert_with(|| RuleCounter {
                    rule_id: rule.rule_id.clone(),
                    rule_type: rule.rule_type.clone(),
                    severity: if rule.severity.is_empty() {
                        "WARN".to_string()
                    } else {
                        rule.severity.clone()
                    },
                    warn_count: 0,
                    fail_count: 0,
                    last_seen_at: None,
                    sample_message: None,
                });

            if rule.status == "WARN" {
                entry.warn_count += 1;
            } else {
                entry.fail_count += 1;
            }

            if entry.sample_message.is_none() && !rule.message.is_empty() {
                entry.sample_message = Some(rule.message.clone());
            }
            if entry
                .last_seen_at
                .map(|seen| record.created_at > seen)
                .unwrap_or(true)
            {
                entry.last_seen_at = Some(record.created_at);
            }
        }
    }

    Ok(counts)
}

