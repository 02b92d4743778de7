//! Shared domain types for the preflight diagnostics core.
//!
//! Status enums carry `as_str`/`parse` pairs so database rows and API
//! payloads stay plain strings with one validation boundary. The registry
//! record lives here because the artifact gateway, the alert engine, and
//! the analytics rollups all consume it.

use anyhow::{anyhow, Result};

pub mod canonical;
pub mod error;
pub mod ids;
pub mod record;

pub use canonical::{canonical_json, sort_keys};
pub use error::DiagnosticsError;
pub use ids::{hex_id, iso_utc, now_utc, unix_timestamp};
pub use record::{PreflightRecord, RunAggregate};

// ---------------------------------------------------------------------------
// Run statuses
// ---------------------------------------------------------------------------

/// Validation / semantic / final status of a preflight pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
    Skipped,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Pass => "PASS",
            CheckStatus::Warn => "WARN",
            CheckStatus::Fail => "FAIL",
            CheckStatus::Skipped => "SKIPPED",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PASS" => Ok(CheckStatus::Pass),
            "WARN" => Ok(CheckStatus::Warn),
            "FAIL" => Ok(CheckStatus::Fail),
            "SKIPPED" => Ok(CheckStatus::Skipped),
            other => Err(anyhow!("invalid check status: {}", other)),
        }
    }
}

/// `FAIL` if any input is FAIL, else `WARN` if any is WARN, else `SKIPPED`
/// when both are SKIPPED, else `PASS`.
pub fn derive_final_status(validation: CheckStatus, semantic: CheckStatus) -> CheckStatus {
    use CheckStatus::*;
    if validation == Fail || semantic == Fail {
        Fail
    } else if validation == Warn || semantic == Warn {
        Warn
    } else if validation == Skipped && semantic == Skipped {
        Skipped
    } else {
        Pass
    }
}

/// Worst-of aggregation over member record statuses (run-level rollup).
pub fn aggregate_final_status<'a>(statuses: impl IntoIterator<Item = &'a str>) -> &'static str {
    let mut saw_warn = false;
    let mut saw_pass = false;
    for raw in statuses {
        match raw.trim().to_ascii_uppercase().as_str() {
            "FAIL" => return "FAIL",
            "WARN" => saw_warn = true,
            "PASS" => saw_pass = true,
            _ => {}
        }
    }
    if saw_warn {
        "WARN"
    } else if saw_pass {
        "PASS"
    } else {
        "SKIPPED"
    }
}

/// Preflight enforcement mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreflightMode {
    Off,
    ReportOnly,
    Enforce,
}

impl PreflightMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PreflightMode::Off => "off",
            PreflightMode::ReportOnly => "report_only",
            PreflightMode::Enforce => "enforce",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(PreflightMode::Off),
            "report_only" => Ok(PreflightMode::ReportOnly),
            "enforce" => Ok(PreflightMode::Enforce),
            other => Err(anyhow!("invalid preflight mode: {}", other)),
        }
    }
}

/// Upstream feed identity. Exactly two feeds exist today.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceName {
    Train,
    Store,
}

impl SourceName {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceName::Train => "train",
            SourceName::Store => "store",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "train" => Ok(SourceName::Train),
            "store" => Ok(SourceName::Store),
            other => Err(anyhow!("invalid source name: {}", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Alerting
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOW" => Ok(Severity::Low),
            "MEDIUM" => Ok(Severity::Medium),
            "HIGH" => Ok(Severity::High),
            other => Err(anyhow!("invalid severity: {}", other)),
        }
    }
}

/// Per-policy alert lifecycle. `OK` never persists a state row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertStatus {
    Ok,
    Pending,
    Firing,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Ok => "OK",
            AlertStatus::Pending => "PENDING",
            AlertStatus::Firing => "FIRING",
            AlertStatus::Resolved => "RESOLVED",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "OK" => Ok(AlertStatus::Ok),
            "PENDING" => Ok(AlertStatus::Pending),
            "FIRING" => Ok(AlertStatus::Firing),
            "RESOLVED" => Ok(AlertStatus::Resolved),
            other => Err(anyhow!("invalid alert status: {}", other)),
        }
    }
}

/// Metric a policy evaluates over its rolling window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    FailRate,
    BlockedCount,
    FailCount,
    UnifiedUsageRate,
    TopRuleFailCount,
    SemanticRuleFailCount,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::FailRate => "fail_rate",
            MetricType::BlockedCount => "blocked_count",
            MetricType::FailCount => "fail_count",
            MetricType::UnifiedUsageRate => "unified_usage_rate",
            MetricType::TopRuleFailCount => "top_rule_fail_count",
            MetricType::SemanticRuleFailCount => "semantic_rule_fail_count",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail_rate" => Ok(MetricType::FailRate),
            "blocked_count" => Ok(MetricType::BlockedCount),
            "fail_count" => Ok(MetricType::FailCount),
            "unified_usage_rate" => Ok(MetricType::UnifiedUsageRate),
            "top_rule_fail_count" => Ok(MetricType::TopRuleFailCount),
            "semantic_rule_fail_count" => Ok(MetricType::SemanticRuleFailCount),
            other => Err(anyhow!("invalid metric type: {}", other)),
        }
    }

    /// Rule-based metrics require loading semantic artifacts per record.
    pub fn needs_rule_counts(&self) -> bool {
        matches!(
            self,
            MetricType::TopRuleFailCount | MetricType::SemanticRuleFailCount
        )
    }
}

/// Threshold comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

impl CompareOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.trim() {
            ">" => Ok(CompareOp::Gt),
            ">=" => Ok(CompareOp::Ge),
            "<" => Ok(CompareOp::Lt),
            "<=" => Ok(CompareOp::Le),
            "==" => Ok(CompareOp::Eq),
            "!=" => Ok(CompareOp::Ne),
            other => Err(anyhow!("invalid operator: {}", other)),
        }
    }

    pub fn apply(&self, left: f64, right: f64) -> bool {
        match self {
            CompareOp::Gt => left > right,
            CompareOp::Ge => left >= right,
            CompareOp::Lt => left < right,
            CompareOp::Le => left <= right,
            CompareOp::Eq => left == right,
            CompareOp::Ne => left != right,
        }
    }
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

pub const EVENT_ALERT_FIRING: &str = "ALERT_FIRING";
pub const EVENT_ALERT_RESOLVED: &str = "ALERT_RESOLVED";

/// Transition event delivered to notification channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationEventType {
    AlertFiring,
    AlertResolved,
}

impl NotificationEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationEventType::AlertFiring => EVENT_ALERT_FIRING,
            NotificationEventType::AlertResolved => EVENT_ALERT_RESOLVED,
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            EVENT_ALERT_FIRING => Ok(NotificationEventType::AlertFiring),
            EVENT_ALERT_RESOLVED => Ok(NotificationEventType::AlertResolved),
            other => Err(anyhow!("invalid notification event type: {}", other)),
        }
    }
}

/// Outbox delivery-job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxStatus {
    Pending,
    Retrying,
    Sent,
    Dead,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "PENDING",
            OutboxStatus::Retrying => "RETRYING",
            OutboxStatus::Sent => "SENT",
            OutboxStatus::Dead => "DEAD",
            OutboxStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(OutboxStatus::Pending),
            "RETRYING" => Ok(OutboxStatus::Retrying),
            "SENT" => Ok(OutboxStatus::Sent),
            "DEAD" => Ok(OutboxStatus::Dead),
            "FAILED" => Ok(OutboxStatus::Failed),
            other => Err(anyhow!("invalid outbox status: {}", other)),
        }
    }
}

/// Immutable ledger status for one physical HTTP attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptStatus {
    Started,
    Sent,
    Retry,
    Dead,
    Failed,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Started => "STARTED",
            AttemptStatus::Sent => "SENT",
            AttemptStatus::Retry => "RETRY",
            AttemptStatus::Dead => "DEAD",
            AttemptStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "STARTED" => Ok(AttemptStatus::Started),
            "SENT" => Ok(AttemptStatus::Sent),
            "RETRY" => Ok(AttemptStatus::Retry),
            "DEAD" => Ok(AttemptStatus::Dead),
            "FAILED" => Ok(AttemptStatus::Failed),
            other => Err(anyhow!("invalid attempt status: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn final_status_derivation_prefers_fail_then_warn() {
        use CheckStatus::*;
        assert_eq!(derive_final_status(Pass, Fail), Fail);
        assert_eq!(derive_final_status(Warn, Pass), Warn);
        assert_eq!(derive_final_status(Skipped, Skipped), Skipped);
        assert_eq!(derive_final_status(Pass, Skipped), Pass);
    }

    #[test]
    fn aggregate_final_status_is_worst_of() {
        assert_eq!(aggregate_final_status(["PASS", "FAIL"]), "FAIL");
        assert_eq!(aggregate_final_status(["pass", "warn"]), "WARN");
        assert_eq!(aggregate_final_status(["SKIPPED", "SKIPPED"]), "SKIPPED");
        assert_eq!(aggregate_final_status(["PASS", "SKIPPED"]), "PASS");
        assert_eq!(aggregate_final_status([]), "SKIPPED");
    }

    #[test]
    fn compare_op_applies_all_operators() {
        assert!(CompareOp::Gt.apply(1.0, 0.0));
        assert!(CompareOp::Ge.apply(1.0, 1.0));
        assert!(CompareOp::Lt.apply(0.5, 1.0));
        assert!(CompareOp::Le.apply(1.0, 1.0));
        assert!(CompareOp::Eq.apply(2.0, 2.0));
        assert!(CompareOp::Ne.apply(2.0, 3.0));
        assert!(!CompareOp::Gt.apply(0.0, 0.0));
    }

    #[test]
    fn status_parse_round_trips() {
        for s in ["PENDING", "RETRYING", "SENT", "DEAD", "FAILED"] {
            assert_eq!(OutboxStatus::parse(s).unwrap().as_str(), s);
        }
        assert!(OutboxStatus::parse("CLAIMED").is_err());
        assert_eq!(AlertStatus::parse(" firing ").unwrap(), AlertStatus::Firing);
    }
}
