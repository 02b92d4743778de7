//! Shared application state.
//!
//! Built once in `main.rs` (or directly by scenario tests) and handed to
//! every handler as `State<Arc<AppState>>`. No process-wide globals: the
//! artifact gateway and metrics counters live here.

use pfd_analytics::MetricsState;
use pfd_artifacts::ArtifactGateway;
use sqlx::PgPool;

/// Static build metadata included in health responses.
#[derive(Clone, Debug, serde::Serialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

pub struct AppState {
    pub pool: PgPool,
    pub gateway: ArtifactGateway,
    pub metrics: MetricsState,
    pub build: BuildInfo,
}

impl AppState {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            gateway: ArtifactGateway::from_env(),
            metrics: MetricsState::new(),
            build: BuildInfo {
                service: "pfd-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
        }
    }

    /// Test constructor with an explicit artifact root.
    pub fn with_gateway(pool: PgPool, gateway: ArtifactGateway) -> Self {
        Self {
            pool,
            gateway,
            metrics: MetricsState::new(),
            build: BuildInfo {
                service: "pfd-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
        }
    }
}
