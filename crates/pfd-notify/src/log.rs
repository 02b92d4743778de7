//! Structured delivery log: one event per enqueue/replay/attempt outcome.
//!
//! Exactly this field set and nothing more: no secrets, no payload
//! bodies, no full target URLs.

#[allow(clippy::too_many_arguments)]
pub(crate) fn emit_delivery_log(
    status: &str,
    event_id: Option<&str>,
    delivery_id: Option<&str>,
    outbox_item_id: Option<&str>,
    channel_target: Option<&str>,
    event_type: Option<&str>,
    http_status: Option<i32>,
    attempt_count: Option<i32>,
    attempt_id: Option<&str>,
    replayed_from_id: Option<&str>,
    error_code: Option<&str>,
) {
    tracing::info!(
        target: "preflight::notifications::delivery",
        status,
        event_id,
        delivery_id,
        outbox_item_id,
        channel_target,
        event_type,
        http_status,
        attempt_count,
        attempt_id,
        replayed_from_id,
        error_code,
        "notification_delivery_event"
    );
}
