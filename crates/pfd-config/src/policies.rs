//! Alert-policy document loader.
//!
//! The document boundary is strict: unknown fields are rejected, every
//! option is validated, duplicate policy ids fail the whole load.

use std::path::{Path, PathBuf};

use anyhow::Result;
use pfd_schemas::{CompareOp, DiagnosticsError, MetricType, Severity, SourceName};
use serde::Deserialize;
use serde_json::{json, Value};

pub const ENV_POLICY_PATH: &str = "PREFLIGHT_ALERT_POLICY_PATH";
const DEFAULT_POLICY_PATH: &str = "config/preflight_alert_policies.yaml";

/// A validated alert policy. `severity` and `source_name` are stored in
/// their canonical string forms because they flow straight into rows and
/// payloads.
#[derive(Debug, Clone)]
pub struct AlertPolicy {
    pub id: String,
    pub enabled: bool,
    pub severity: String,
    pub source_name: Option<String>,
    pub window_days: i64,
    pub metric_type: MetricType,
    pub operator: CompareOp,
    pub threshold: f64,
    pub pending_evaluations: i32,
    pub rule_id: Option<String>,
    pub description: String,
}

impl AlertPolicy {
    /// Full snapshot stamped onto state rows, history rows, and payloads.
    pub fn snapshot_json(&self) -> Value {
        json!({
            "id": self.id,
            "enabled": self.enabled,
            "severity": self.severity,
            "source_name": self.source_name,
            "window_days": self.window_days,
            "metric_type": self.metric_type.as_str(),
            "operator": self.operator.as_str(),
            "threshold": self.threshold,
            "pending_evaluations": self.pending_evaluations,
            "description": self.description,
            "rule_id": self.rule_id,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PolicyDocument {
    pub version: String,
    pub path: PathBuf,
    pub policies: Vec<AlertPolicy>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPolicyDocument {
    version: Option<String>,
    policies: Option<Vec<RawPolicy>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPolicy {
    id: Option<String>,
    enabled: Option<bool>,
    severity: Option<String>,
    source_name: Option<String>,
    window_days: Option<i64>,
    metric_type: Option<String>,
    operator: Option<String>,
    threshold: Option<f64>,
    pending_evaluations: Option<i64>,
    rule_id: Option<String>,
    description: Option<String>,
}

pub fn policy_path_from_env() -> PathBuf {
    match std::env::var(ENV_POLICY_PATH) {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value.trim()),
        _ => PathBuf::from(DEFAULT_POLICY_PATH),
    }
}

/// Load and validate the alert-policy document. `path = None` resolves via
/// `PREFLIGHT_ALERT_POLICY_PATH`.
pub fn load_alert_policies(path: Option<&Path>) -> Result<PolicyDocument> {
    let resolved = path.map(Path::to_path_buf).unwrap_or_else(policy_path_from_env);
    if !resolved.exists() {
        return Err(DiagnosticsError::not_found(format!(
            "Alert policy file not found: {}",
            resolved.display()
        )));
    }

    let content = std::fs::read_to_string(&resolved).map_err(|e| {
        DiagnosticsError::payload(format!(
            "Failed to read alert policies file {}: {e}",
            resolved.display()
        ))
    })?;

    let raw: RawPolicyDocument = serde_yaml::from_str(&content).map_err(|e| {
        DiagnosticsError::payload(format!(
            "Failed to parse alert policies YAML at {}: {e}",
            resolved.display()
        ))
    })?;

    let mut policies = Vec::new();
    let mut seen_ids = std::collections::HashSet::new();
    for item in raw.policies.unwrap_or_default() {
        let policy = validate_policy(item)?;
        if !seen_ids.insert(policy.id.clone()) {
            return Err(DiagnosticsError::payload(format!(
                "Duplicate alert policy id '{}' is not allowed.",
                policy.id
            )));
        }
        policies.push(policy);
    }

    Ok(PolicyDocument {
        version: raw.version.unwrap_or_else(|| "v1".to_string()),
        path: resolved,
        policies,
    })
}

fn validate_policy(raw: RawPolicy) -> Result<AlertPolicy> {
    let id = raw.id.as_deref().unwrap_or("").trim().to_string();
    if id.is_empty() {
        return Err(DiagnosticsError::payload(
            "Alert policy requires non-empty 'id'.",
        ));
    }

    let severity_raw = raw.severity.as_deref().unwrap_or("MEDIUM");
    let severity = Severity::parse(severity_raw)
        .map_err(|_| {
            DiagnosticsError::payload(format!(
                "Alert policy '{id}' has invalid severity '{severity_raw}'."
            ))
        })?
        .as_str()
        .to_string();

    let source_name = match raw.source_name.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(value) => Some(
            SourceName::parse(value)
                .map_err(|_| {
                    DiagnosticsError::payload(format!(
                        "Alert policy '{id}' has unsupported source_name '{value}'."
                    ))
                })?
                .as_str()
                .to_string(),
        ),
    };

    let window_days = raw.window_days.unwrap_or(7);
    if !(1..=3650).contains(&window_days) {
        return Err(DiagnosticsError::payload(format!(
            "Alert policy '{id}' window_days must be between 1 and 3650."
        )));
    }

    let metric_raw = raw.metric_type.as_deref().unwrap_or("");
    let metric_type = MetricType::parse(metric_raw).map_err(|_| {
        DiagnosticsError::payload(format!(
            "Alert policy '{id}' metric_type '{metric_raw}' is not supported."
        ))
    })?;

    let operator_raw = raw.operator.as_deref().unwrap_or("");
    let operator = CompareOp::parse(operator_raw).map_err(|_| {
        DiagnosticsError::payload(format!(
            "Alert policy '{id}' operator '{operator_raw}' is not supported."
        ))
    })?;

    let threshold = raw.threshold.ok_or_else(|| {
        DiagnosticsError::payload(format!("Alert policy '{id}' requires numeric threshold."))
    })?;

    let pending_evaluations = raw.pending_evaluations.unwrap_or(1);
    if pending_evaluations < 1 {
        return Err(DiagnosticsError::payload(format!(
            "Alert policy '{id}' pending_evaluations must be >= 1."
        )));
    }

    let rule_id = match raw.rule_id.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(value) => Some(value.to_string()),
    };
    if metric_type == MetricType::SemanticRuleFailCount && rule_id.is_none() {
        return Err(DiagnosticsError::payload(format!(
            "Alert policy '{id}' with metric_type=semantic_rule_fail_count requires non-empty rule_id."
        )));
    }

    let description = match raw.description.as_deref().map(str::trim) {
        None | Some("") => id.clone(),
        Some(value) => value.to_string(),
    };

    Ok(AlertPolicy {
        id,
        enabled: raw.enabled.unwrap_or(true),
        severity,
        source_name,
        window_days,
        metric_type,
        operator,
        threshold,
        pending_evaluations: pending_evaluations as i32,
        rule_id,
        description,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_doc(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_minimal_policy_with_defaults() {
        let file = write_doc(
            r#"
version: v2
policies:
  - id: fail_rate_all
    metric_type: fail_rate
    operator: ">"
    threshold: 0.25
"#,
        );
        let doc = load_alert_policies(Some(file.path())).unwrap();
        assert_eq!(doc.version, "v2");
        let p = &doc.policies[0];
        assert!(p.enabled);
        assert_eq!(p.severity, "MEDIUM");
        assert_eq!(p.window_days, 7);
        assert_eq!(p.pending_evaluations, 1);
        assert_eq!(p.description, "fail_rate_all");
        assert!(p.source_name.is_none());
    }

    #[test]
    fn duplicate_policy_id_is_rejected() {
        let file = write_doc(
            r#"
policies:
  - {id: p1, metric_type: fail_count, operator: ">", threshold: 0}
  - {id: p1, metric_type: fail_count, operator: ">", threshold: 1}
"#,
        );
        let err = load_alert_policies(Some(file.path())).unwrap_err();
        assert!(err.to_string().contains("Duplicate alert policy id"));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let file = write_doc(
            r#"
policies:
  - {id: p1, metric_type: fail_count, operator: ">", threshold: 0, surprise: 1}
"#,
        );
        assert!(load_alert_policies(Some(file.path())).is_err());
    }

    #[test]
    fn rule_metric_requires_rule_id() {
        let file = write_doc(
            r#"
policies:
  - {id: p1, metric_type: semantic_rule_fail_count, operator: ">=", threshold: 1}
"#,
        );
        let err = load_alert_policies(Some(file.path())).unwrap_err();
        assert!(err.to_string().contains("requires non-empty rule_id"));
    }

    #[test]
    fn window_days_bounds_are_enforced() {
        let file = write_doc(
            r#"
policies:
  - {id: p1, metric_type: fail_count, operator: ">", threshold: 0, window_days: 0}
"#,
        );
        assert!(load_alert_policies(Some(file.path())).is_err());
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = load_alert_policies(Some(Path::new("/nonexistent/policies.yaml"))).unwrap_err();
        let downcast = err.downcast_ref::<DiagnosticsError>().unwrap();
        assert!(matches!(downcast, DiagnosticsError::NotFound(_)));
    }
}
