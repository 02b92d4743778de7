//! Notification-channel document loader.
//!
//! Channels are webhook-only today. A channel whose target URL cannot be
//! resolved (empty env reference) loads as mis-configured; the dispatcher
//! dead-letters its items rather than failing the whole document.

use std::path::{Path, PathBuf};

use anyhow::Result;
use pfd_schemas::{DiagnosticsError, EVENT_ALERT_FIRING, EVENT_ALERT_RESOLVED};
use serde::Deserialize;

pub const ENV_CHANNELS_PATH: &str = "PREFLIGHT_NOTIFICATION_CHANNELS_PATH";
const DEFAULT_CHANNELS_PATH: &str = "config/preflight_notification_channels.yaml";

#[derive(Debug, Clone)]
pub struct NotificationChannel {
    pub id: String,
    pub channel_type: String,
    pub enabled: bool,
    pub target_url: Option<String>,
    pub timeout_seconds: u64,
    pub max_attempts: i32,
    pub backoff_seconds: i64,
    pub signing_secret_env: Option<String>,
    pub enabled_event_types: Vec<String>,
}

impl NotificationChannel {
    pub fn supports_event(&self, event_type: &str) -> bool {
        let normalized = event_type.trim().to_ascii_uppercase();
        self.enabled_event_types.iter().any(|et| et == &normalized)
    }
}

#[derive(Debug, Clone)]
pub struct ChannelDocument {
    pub version: String,
    pub path: PathBuf,
    pub channels: Vec<NotificationChannel>,
}

#[derive(Debug, Deserialize)]
struct RawChannelDocument {
    version: Option<String>,
    channels: Option<Vec<RawChannel>>,
}

#[derive(Debug, Deserialize)]
struct RawChannel {
    id: Option<String>,
    #[serde(rename = "type")]
    channel_type: Option<String>,
    enabled: Option<bool>,
    target_url: Option<String>,
    target_url_env: Option<String>,
    timeout_seconds: Option<i64>,
    max_attempts: Option<i64>,
    backoff_seconds: Option<i64>,
    signing_secret_env: Option<String>,
    enabled_event_types: Option<Vec<String>>,
}

pub fn channels_path_from_env() -> PathBuf {
    match std::env::var(ENV_CHANNELS_PATH) {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value.trim()),
        _ => PathBuf::from(DEFAULT_CHANNELS_PATH),
    }
}

/// `${ENV_NAME}` indirection for inline values; empty resolution means the
/// value is absent.
fn resolve_env_reference(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Some(name) = trimmed
        .strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
    {
        let resolved = std::env::var(name.trim()).unwrap_or_default();
        let resolved = resolved.trim();
        return (!resolved.is_empty()).then(|| resolved.to_string());
    }
    Some(trimmed.to_string())
}

fn resolve_target_url(raw: &RawChannel) -> Option<String> {
    if let Some(url) = raw.target_url.as_deref().and_then(resolve_env_reference) {
        return Some(url);
    }
    let env_name = raw.target_url_env.as_deref().unwrap_or("").trim();
    if env_name.is_empty() {
        return None;
    }
    let resolved = std::env::var(env_name).unwrap_or_default();
    let resolved = resolved.trim();
    (!resolved.is_empty()).then(|| resolved.to_string())
}

fn normalize_event_types(raw: Option<&Vec<String>>) -> Vec<String> {
    let all = vec![
        EVENT_ALERT_FIRING.to_string(),
        EVENT_ALERT_RESOLVED.to_string(),
    ];
    let Some(raw) = raw else { return all };

    let mut normalized = Vec::new();
    for item in raw {
        let event_type = item.trim().to_ascii_uppercase();
        let supported = event_type == EVENT_ALERT_FIRING || event_type == EVENT_ALERT_RESOLVED;
        if supported && !normalized.contains(&event_type) {
            normalized.push(event_type);
        }
    }
    if normalized.is_empty() {
        return all;
    }
    normalized
}

fn validate_channel(raw: RawChannel) -> Result<NotificationChannel> {
    let id = raw.id.as_deref().unwrap_or("").trim().to_string();
    if id.is_empty() {
        return Err(DiagnosticsError::payload(
            "Notification channel requires non-empty 'id'.",
        ));
    }

    let channel_type = raw
        .channel_type
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("webhook")
        .to_ascii_lowercase();
    if channel_type != "webhook" {
        return Err(DiagnosticsError::payload(format!(
            "Unsupported notification channel type '{channel_type}' for '{id}'."
        )));
    }

    let signing_secret_env = raw
        .signing_secret_env
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    Ok(NotificationChannel {
        target_url: resolve_target_url(&raw),
        enabled_event_types: normalize_event_types(raw.enabled_event_types.as_ref()),
        id,
        channel_type,
        enabled: raw.enabled.unwrap_or(false),
        timeout_seconds: raw.timeout_seconds.unwrap_or(5).max(1) as u64,
        max_attempts: raw.max_attempts.unwrap_or(5).max(1) as i32,
        backoff_seconds: raw.backoff_seconds.unwrap_or(30).max(1),
        signing_secret_env,
    })
}

/// Load and validate the channel document. `path = None` resolves via
/// `PREFLIGHT_NOTIFICATION_CHANNELS_PATH`.
pub fn load_notification_channels(path: Option<&Path>) -> Result<ChannelDocument> {
    let resolved = path
        .map(Path::to_path_buf)
        .unwrap_or_else(channels_path_from_env);
    if !resolved.exists() {
        return Err(DiagnosticsError::not_found(format!(
            "Notification channels file not found: {}",
            resolved.display()
        )));
    }

    let content = std::fs::read_to_string(&resolved).map_err(|e| {
        DiagnosticsError::payload(format!(
            "Failed to read notification channels file {}: {e}",
            resolved.display()
        ))
    })?;

    let raw: RawChannelDocument = serde_yaml::from_str(&content).map_err(|e| {
        DiagnosticsError::payload(format!(
            "Failed to parse notification channels YAML at {}: {e}",
            resolved.display()
        ))
    })?;

    let mut channels = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for item in raw.channels.unwrap_or_default() {
        let channel = validate_channel(item)?;
        if !seen.insert(channel.id.clone()) {
            return Err(DiagnosticsError::payload(format!(
                "Duplicate notification channel id '{}' is not allowed.",
                channel.id
            )));
        }
        channels.push(channel);
    }

    Ok(ChannelDocument {
        version: raw.version.unwrap_or_else(|| "v1".to_string()),
        path: resolved,
        channels,
    })
}

/// Channel list for dispatch paths: a missing or broken document disables
/// dispatch with a warning instead of failing the tick.
pub fn safe_load_channels(path: Option<&Path>) -> Vec<NotificationChannel> {
    match load_notification_channels(path) {
        Ok(doc) => doc.channels,
        Err(err) => {
            tracing::warn!(error = %err, "notification channels config unavailable; outbox dispatch skipped");
            Vec::new()
        }
    }
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
    fn loads_channel_with_defaults() {
        let file = write_doc(
            r#"
channels:
  - id: ops_webhook
    target_url: "https://hooks.example.test/ops"
"#,
        );
        let doc = load_notification_channels(Some(file.path())).unwrap();
        let ch = &doc.channels[0];
        assert_eq!(ch.channel_type, "webhook");
        assert!(!ch.enabled);
        assert_eq!(ch.timeout_seconds, 5);
        assert_eq!(ch.max_attempts, 5);
        assert_eq!(ch.backoff_seconds, 30);
        assert!(ch.supports_event("ALERT_FIRING"));
        assert!(ch.supports_event("alert_resolved"));
    }

    #[test]
    fn non_webhook_type_is_rejected() {
        let file = write_doc("channels:\n  - {id: c1, type: email}\n");
        assert!(load_notification_channels(Some(file.path())).is_err());
    }

    #[test]
    fn unresolvable_env_target_loads_as_misconfigured() {
        let file = write_doc(
            "channels:\n  - {id: c1, enabled: true, target_url_env: PFD_TEST_UNSET_TARGET_URL}\n",
        );
        std::env::remove_var("PFD_TEST_UNSET_TARGET_URL");
        let doc = load_notification_channels(Some(file.path())).unwrap();
        assert!(doc.channels[0].target_url.is_none());
    }

    #[test]
    fn inline_env_reference_resolves() {
        std::env::set_var("PFD_TEST_INLINE_TARGET_URL", "https://hooks.example.test/x");
        let file = write_doc("channels:\n  - {id: c1, target_url: \"${PFD_TEST_INLINE_TARGET_URL}\"}\n");
        let doc = load_notification_channels(Some(file.path())).unwrap();
        assert_eq!(
            doc.channels[0].target_url.as_deref(),
            Some("https://hooks.example.test/x")
        );
    }

    #[test]
    fn unknown_event_types_fall_back_to_all() {
        let file = write_doc(
            "channels:\n  - {id: c1, enabled_event_types: [SOMETHING_ELSE]}\n",
        );
        let doc = load_notification_channels(Some(file.path())).unwrap();
        assert_eq!(doc.channels[0].enabled_event_types.len(), 2);
    }

    #[test]
    fn event_type_subset_is_preserved() {
        let file = write_doc(
            "channels:\n  - {id: c1, enabled_event_types: [ALERT_FIRING, ALERT_FIRING]}\n",
        );
        let doc = load_notification_channels(Some(file.path())).unwrap();
        assert_eq!(doc.channels[0].enabled_event_types, vec!["ALERT_FIRING"]);
        assert!(!doc.channels[0].supports_event("ALERT_RESOLVED"));
    }
}
