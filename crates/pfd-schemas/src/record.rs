//! Registry record types shared across the workspace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One persisted preflight result for a single `(run_id, source_name)`.
///
/// Appended by the preflight runner and never mutated afterwards; an upsert
/// on the composite key only repairs a previously-written row in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreflightRecord {
    pub run_id: String,
    pub source_name: String,
    pub created_at: DateTime<Utc>,
    pub mode: String,
    pub validation_status: String,
    pub semantic_status: String,
    pub final_status: String,
    pub used_input_path: String,
    pub used_unified: bool,
    pub artifact_dir: Option<String>,
    pub validation_report_path: Option<String>,
    pub manifest_path: Option<String>,
    pub summary_json: Value,
    pub blocked: bool,
    pub block_reason: Option<String>,
    pub data_source_id: Option<i64>,
    pub contract_id: Option<String>,
    pub contract_version: Option<String>,
}

/// Run-level aggregation over all member records of one `run_id`.
///
/// `final_status` is the worst member status; `blocked` is true when any
/// member blocked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunAggregate {
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub mode: String,
    pub final_status: String,
    pub blocked: bool,
    pub records: Vec<PreflightRecord>,
}
