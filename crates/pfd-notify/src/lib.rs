//! Notification outbox and webhook dispatcher.
//!
//! The alert engine enqueues one outbox row per channel per transition;
//! the dispatcher drains due rows, signs and sends webhooks through the
//! [`WebhookSender`] seam, and writes every physical attempt to the
//! immutable ledger.

pub mod dispatch;
pub mod enqueue;
mod log;
pub mod payload;
pub mod replay;
pub mod sender;
pub mod sign;

pub use dispatch::{compute_retry_delay_seconds, dispatch_due, DispatchSummary};
pub use enqueue::{enqueue_alert_transition, AlertTransition, EnqueueSummary};
pub use payload::{build_delivery_payload, build_webhook_payload};
pub use replay::{replay_dead_outbox, replay_outbox_item, ReplaySummary, REPLAYABLE_STATUSES};
pub use sender::{
    is_retryable_status, DeliveryOutcome, HttpWebhookSender, WebhookRequest, WebhookSender,
};
pub use sign::{sign_payload, verify_signature};

pub const HEADER_EVENT_ID: &str = "X-Preflight-Event-Id";
pub const HEADER_DELIVERY_ID: &str = "X-Preflight-Delivery-Id";
pub const HEADER_TIMESTAMP: &str = "X-Preflight-Timestamp";
pub const HEADER_SIGNATURE: &str = "X-Preflight-Signature";
