//! Query-string and request-body types for the diagnostics API.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct RunsQuery {
    pub limit: Option<i64>,
    pub source_name: Option<String>,
    pub data_source_id: Option<i64>,
}

/// Filters shared by the preflight stats/trends/rules endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct PreflightAnalyticsQuery {
    pub source_name: Option<String>,
    pub data_source_id: Option<i64>,
    pub mode: Option<String>,
    pub final_status: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub days: Option<i64>,
    pub bucket: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SilenceListQuery {
    pub limit: Option<i64>,
    #[serde(default)]
    pub include_expired: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateSilenceBody {
    pub starts_at: Option<String>,
    pub ends_at: String,
    #[serde(default)]
    pub reason: String,
    pub policy_id: Option<String>,
    pub source_name: Option<String>,
    pub severity: Option<String>,
    pub rule_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AckBody {
    pub note: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutboxListQuery {
    pub limit: Option<i64>,
    pub status: Option<String>,
}

/// Filters shared by the notification analytics endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationAnalyticsQuery {
    pub days: Option<i64>,
    pub event_type: Option<String>,
    pub channel_target: Option<String>,
    pub status: Option<String>,
    pub attempt_status: Option<String>,
    pub alert_id: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub bucket: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DispatchBody {
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReplayDeadBody {
    pub limit: Option<i64>,
}
