//! The per-policy state machine, isolated from IO.
//!
//! Given the existing state row (if any) and whether the condition held,
//! decide the consecutive-breach count, the next status, and which
//! notifications the transition produces. Notifications fire only on the
//! entering edge: `→FIRING` and `FIRING→RESOLVED`.

use chrono::{DateTime, Utc};
use pfd_schemas::AlertStatus;

/// The parts of an existing state row the planner needs.
#[derive(Debug, Clone)]
pub struct ExistingState {
    pub status: AlertStatus,
    pub first_seen_at: Option<DateTime<Utc>>,
    pub consecutive_breaches: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransitionPlan {
    /// Condition held: upsert state, and when `entered`, append history.
    Breach {
        status: AlertStatus,
        consecutive: i32,
        first_seen_at: DateTime<Utc>,
        entered: bool,
        notify_firing: bool,
    },
    /// Condition cleared while PENDING/FIRING: append RESOLVED history,
    /// delete state. `notify_resolved` only when leaving FIRING.
    Resolve {
        first_seen_at: Option<DateTime<Utc>>,
        notify_resolved: bool,
    },
    /// Condition clear and nothing active.
    Quiet,
}

pub fn plan_transition(
    existing: Option<&ExistingState>,
    condition_met: bool,
    pending_evaluations: i32,
    now: DateTime<Utc>,
) -> TransitionPlan {
    let active = existing
        .filter(|state| matches!(state.status, AlertStatus::Pending | AlertStatus::Firing));

    if condition_met {
        let consecutive = match active {
            Some(state) => state.consecutive_breaches.saturating_add(1),
            None => 1,
        };
        let first_seen_at = active
            .and_then(|state| state.first_seen_at)
            .unwrap_or(now);
        let status = if consecutive >= pending_evaluations.max(1) {
            AlertStatus::Firing
        } else {
            AlertStatus::Pending
        };
        let entered = active.map(|state| state.status) != Some(status);
        return TransitionPlan::Breach {
            status,
            consecutive,
            first_seen_at,
            entered,
            notify_firing: entered && status == AlertStatus::Firing,
        };
    }

    match active {
        Some(state) => TransitionPlan::Resolve {
            first_seen_at: state.first_seen_at,
            notify_resolved: state.status == AlertStatus::Firing,
        },
        None => TransitionPlan::Quiet,
    }
}
