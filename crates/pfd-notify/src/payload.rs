//! Webhook payload envelope (wire format `version: v1`).

use chrono::{DateTime, Utc};
use pfd_schemas::iso_utc;
use serde_json::{json, Map, Value};

/// The alert envelope persisted with the outbox row at enqueue time.
#[allow(clippy::too_many_arguments)]
pub fn build_webhook_payload(
    event_id: &str,
    event_type: &str,
    alert_id: &str,
    policy_id: &str,
    severity: Option<&str>,
    source_name: Option<&str>,
    message: &str,
    current_value: Option<f64>,
    threshold: Option<f64>,
    previous_status: Option<&str>,
    current_status: Option<&str>,
    occurred_at: DateTime<Utc>,
    context: &Value,
) -> Value {
    json!({
        "version": "v1",
        "event_id": event_id,
        "event_type": event_type,
        "occurred_at": iso_utc(&occurred_at),
        "alert": {
            "alert_id": alert_id,
            "policy_id": policy_id,
            "severity": severity,
            "source_name": source_name,
            "previous_status": previous_status,
            "status": current_status,
            "current_value": current_value,
            "threshold": threshold,
            "message": message,
        },
        "context": if context.is_object() { context.clone() } else { json!({}) },
    })
}

/// Stamp the per-delivery identity onto a stored payload. The delivery
/// object is always present; `replayed_from_id` only when this row is a
/// replay clone.
pub fn build_delivery_payload(
    base_payload: &Value,
    event_id: &str,
    delivery_id: &str,
    replayed_from_id: Option<&str>,
) -> Value {
    let mut payload: Map<String, Value> = base_payload
        .as_object()
        .cloned()
        .unwrap_or_default();
    payload.insert("event_id".to_string(), json!(event_id));

    let mut delivery = Map::new();
    delivery.insert("delivery_id".to_string(), json!(delivery_id));
    if let Some(source) = replayed_from_id.filter(|s| !s.trim().is_empty()) {
        delivery.insert("replayed_from_id".to_string(), json!(source));
    }
    payload.insert("delivery".to_string(), Value::Object(delivery));

    Value::Object(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn envelope_carries_event_identity_and_alert_block() {
        let occurred = Utc.with_ymd_and_hms(2026, 2, 22, 12, 0, 0).unwrap();
        let payload = build_webhook_payload(
            "ev1",
            "ALERT_FIRING",
            "fail_count_train",
            "fail_count_train",
            Some("HIGH"),
            Some("train"),
            "boom",
            Some(3.0),
            Some(0.0),
            Some("PENDING"),
            Some("FIRING"),
            occurred,
            &json!({"total_runs": 3}),
        );
        assert_eq!(payload["version"], "v1");
        assert_eq!(payload["event_id"], "ev1");
        assert_eq!(payload["alert"]["previous_status"], "PENDING");
        assert_eq!(payload["alert"]["status"], "FIRING");
        assert_eq!(payload["context"]["total_runs"], 3);
        assert!(payload["occurred_at"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn delivery_block_is_always_present_and_replay_marked() {
        let base = json!({"version": "v1", "event_id": "old"});
        let fresh = build_delivery_payload(&base, "ev1", "d1", None);
        assert_eq!(fresh["event_id"], "ev1");
        assert_eq!(fresh["delivery"]["delivery_id"], "d1");
        assert!(fresh["delivery"].get("replayed_from_id").is_none());

        let replay = build_delivery_payload(&base, "ev1", "d2", Some("outbox-1"));
        assert_eq!(replay["delivery"]["replayed_from_id"], "outbox-1");
    }
}
