//! Silence and acknowledgement decoration.
//!
//! Silences never change alert state; they only flip the `is_silenced`
//! decoration returned to callers. A silence matches an alert iff every
//! non-null filter field matches; missing fields are wildcards.

use anyhow::Result;
use chrono::{DateTime, Utc};
use pfd_db::alerts::{expire_elapsed_silences, list_active_acknowledgements, list_silences, SilenceRow};
use serde_json::Value;
use sqlx::PgPool;

use crate::AlertItem;

fn field_set(value: Option<&String>) -> Option<&str> {
    value.map(|s| s.trim()).filter(|s| !s.is_empty())
}

pub fn silence_matches(silence: &SilenceRow, item: &AlertItem) -> bool {
    if let Some(policy_id) = field_set(silence.policy_id.as_ref()) {
        if policy_id != item.policy_id.trim() {
            return false;
        }
    }

    if let Some(source) = field_set(silence.source_name.as_ref()) {
        let item_source = item.source_name.as_deref().unwrap_or("").trim().to_string();
        if !source.eq_ignore_ascii_case(&item_source) {
            return false;
        }
    }

    if let Some(severity) = field_set(silence.severity.as_ref()) {
        if !severity.eq_ignore_ascii_case(item.severity.trim()) {
            return false;
        }
    }

    if let Some(rule_id) = field_set(silence.rule_id.as_ref()) {
        let item_rule = item
            .policy
            .as_ref()
            .and_then(|p| p.get("rule_id"))
            .and_then(Value::as_str)
            .unwrap_or("");
        if rule_id != item_rule.trim() {
            return false;
        }
    }

    true
}

pub(crate) fn silence_json(silence: &SilenceRow, at: DateTime<Utc>) -> Value {
    let mut value = serde_json::to_value(silence).unwrap_or(Value::Null);
    if let Some(map) = value.as_object_mut() {
        map.insert("is_active".to_string(), Value::Bool(silence.is_active_at(at)));
    }
    value
}

/// Overlay ack/silence status on evaluated or listed items. Expires
/// elapsed silences first so the decoration never reflects a stale window.
pub async fn decorate_items(pool: &PgPool, items: &mut [AlertItem], now: DateTime<Utc>) -> Result<()> {
    expire_elapsed_silences(pool, now).await?;
    let active_silences = list_silences(pool, 1000, false, true, now).await?;
    let acknowledgements = list_active_acknowledgements(pool, 5000).await?;

    for item in items.iter_mut() {
        let matching = active_silences
            .iter()
            .find(|silence| silence_matches(silence, item));
        item.is_silenced = matching.is_some();
        item.silence = matching.map(|silence| silence_json(silence, now));

        let acknowledgement = acknowledgements
            .iter()
            .find(|ack| ack.alert_id == item.alert_id);
        item.is_acknowledged = acknowledgement.is_some();
        item.acknowledgement = acknowledgement
            .map(|ack| serde_json::to_value(ack).unwrap_or(Value::Null));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn item(policy_id: &str, source: Option<&str>, severity: &str, rule_id: Option<&str>) -> AlertItem {
        AlertItem {
            alert_id: policy_id.to_string(),
            policy_id: policy_id.to_string(),
            status: "FIRING".to_string(),
            severity: severity.to_string(),
            source_name: source.map(str::to_string),
            first_seen_at: None,
            last_seen_at: None,
            resolved_at: None,
            current_value: None,
            threshold: None,
            message: String::new(),
            evaluation_context_json: json!({}),
            policy: rule_id.map(|r| json!({"rule_id": r})),
            evaluated_at: None,
            is_silenced: false,
            silence: None,
            is_acknowledged: false,
            acknowledgement: None,
        }
    }

    fn silence(
        policy_id: Option<&str>,
        source: Option<&str>,
        severity: Option<&str>,
        rule_id: Option<&str>,
    ) -> SilenceRow {
        let now = Utc.with_ymd_and_hms(2026, 2, 22, 10, 0, 0).unwrap();
        SilenceRow {
            silence_id: "s1".to_string(),
            policy_id: policy_id.map(str::to_string),
            source_name: source.map(str::to_string),
            severity: severity.map(str::to_string),
            rule_id: rule_id.map(str::to_string),
            starts_at: now,
            ends_at: now + chrono::Duration::hours(1),
            reason: String::new(),
            created_by: "ops".to_string(),
            created_at: now,
            expired_at: None,
        }
    }

    #[test]
    fn empty_filters_match_everything() {
        let s = silence(None, None, None, None);
        assert!(silence_matches(&s, &item("p1", Some("train"), "HIGH", None)));
    }

    #[test]
    fn each_filter_field_must_match() {
        let s = silence(Some("p1"), Some("TRAIN"), Some("high"), None);
        assert!(silence_matches(&s, &item("p1", Some("train"), "HIGH", None)));
        assert!(!silence_matches(&s, &item("p2", Some("train"), "HIGH", None)));
        assert!(!silence_matches(&s, &item("p1", Some("store"), "HIGH", None)));
        assert!(!silence_matches(&s, &item("p1", Some("train"), "LOW", None)));
    }

    #[test]
    fn rule_filter_reads_the_policy_snapshot() {
        let s = silence(None, None, None, Some("rule_x"));
        assert!(silence_matches(&s, &item("p1", None, "HIGH", Some("rule_x"))));
        assert!(!silence_matches(&s, &item("p1", None, "HIGH", Some("rule_y"))));
        assert!(!silence_matches(&s, &item("p1", None, "HIGH", None)));
    }
}
