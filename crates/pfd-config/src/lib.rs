//! Config-document loaders for the preflight diagnostics core.
//!
//! Two YAML documents exist: alert policies and notification channels.
//! Loading is pure: read the file, resolve environment references, validate
//! every recognised option. It never touches the database.

pub mod channels;
pub mod policies;

pub use channels::{
    channels_path_from_env, load_notification_channels, safe_load_channels, ChannelDocument,
    NotificationChannel, ENV_CHANNELS_PATH,
};
pub use policies::{
    load_alert_policies, policy_path_from_env, AlertPolicy, PolicyDocument, ENV_POLICY_PATH,
};
