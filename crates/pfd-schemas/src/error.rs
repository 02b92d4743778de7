//! Caller-visible error taxonomy.
//!
//! Infrastructure code keeps returning `anyhow::Result` with context; these
//! variants ride inside `anyhow::Error` and are downcast once at the API
//! boundary (Payload → 400, NotFound → 404, Access → 403, everything else
//! → 500). Delivery failures are not represented here; the dispatcher
//! recovers from those itself via retry/dead policy.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiagnosticsError {
    /// Caller-supplied input problem. Never retried.
    #[error("{0}")]
    Payload(String),

    /// Missing registry row, artifact file, silence, or attempt.
    #[error("{0}")]
    NotFound(String),

    /// Path escapes the allowed root, or an admin surface is disabled.
    #[error("{0}")]
    Access(String),
}

impl DiagnosticsError {
    pub fn payload(msg: impl Into<String>) -> anyhow::Error {
        anyhow::Error::new(DiagnosticsError::Payload(msg.into()))
    }

    pub fn not_found(msg: impl Into<String>) -> anyhow::Error {
        anyhow::Error::new(DiagnosticsError::NotFound(msg.into()))
    }

    pub fn access(msg: impl Into<String>) -> anyhow::Error {
        anyhow::Error::new(DiagnosticsError::Access(msg.into()))
    }
}
