//! Alert engine: policy evaluation over the preflight registry, the
//! per-policy state machine, silence/ack overlays, and the audit trail.

pub mod engine;
pub mod metrics;
pub mod ops;
pub mod overlay;
pub mod transition;

pub use engine::{evaluate_policies, EvaluationSummary, AUDIT_ACTOR_SCHEDULER, AUDIT_ACTOR_SYSTEM};
pub use metrics::compute_metric;
pub use ops::{
    acknowledge_alert, create_silence, expire_silence_by_id, get_active_alerts, get_alert_history,
    list_alert_audit, list_silences_payload, unacknowledge_alert, ActiveAlerts, CreateSilence,
};
pub use overlay::{decorate_items, silence_matches};
pub use transition::{plan_transition, ExistingState, TransitionPlan};

use serde::Serialize;
use serde_json::Value;

/// One alert as returned by evaluation and read surfaces, including the
/// silence/ack decoration.
#[derive(Debug, Clone, Serialize)]
pub struct AlertItem {
    pub alert_id: String,
    pub policy_id: String,
    pub status: String,
    pub severity: String,
    pub source_name: Option<String>,
    pub first_seen_at: Option<String>,
    pub last_seen_at: Option<String>,
    pub resolved_at: Option<String>,
    pub current_value: Option<f64>,
    pub threshold: Option<f64>,
    pub message: String,
    pub evaluation_context_json: Value,
    pub policy: Option<Value>,
    pub evaluated_at: Option<String>,
    pub is_silenced: bool,
    pub silence: Option<Value>,
    pub is_acknowledged: bool,
    pub acknowledgement: Option<Value>,
}
