//! Analytics rollups over the preflight registry and the delivery-attempt
//! ledger, plus the Prometheus text exposition.
//!
//! Aggregation is pure over fetched rows; the async collectors only fetch.

pub mod notifications;
pub mod preflight;
pub mod prometheus;
pub mod window;

pub use notifications::{
    attempt_statuses_for_outbox_status, compute_channel_summaries, compute_notification_stats,
    compute_notification_trends, normalize_attempt_status_filter, normalize_status_filter,
    percentile,
};
pub use preflight::{compute_run_stats, compute_run_trends, compute_top_rules};
pub use prometheus::{collect_snapshot, render_prometheus_metrics, MetricsSnapshot, MetricsState};
pub use window::{
    parse_iso_date_or_datetime, resolve_analytics_window, AnalyticsWindow, TrendBucket,
    DEFAULT_ANALYTICS_DAYS,
};
