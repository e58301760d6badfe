//! Row structs for the three tables kept by the store.
//!
//! These are *persistence* models — they carry no domain behaviour.
//! Domain types live in the `chain` crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// plans
// ---------------------------------------------------------------------------

/// A persisted execution plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanRow {
    pub id: Uuid,
    pub chain_name: String,
    /// Full JSON plan (nodes, dependencies, optional flags)
    pub definition: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// execution status
// ---------------------------------------------------------------------------

/// Status shared by chain executions and engine executions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Scheduled,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scheduled  => write!(f, "scheduled"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed  => write!(f, "completed"),
            Self::Failed     => write!(f, "failed"),
            Self::Skipped    => write!(f, "skipped"),
        }
    }
}

// ---------------------------------------------------------------------------
// chain_executions
// ---------------------------------------------------------------------------

/// A persisted chain execution row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainExecutionRow {
    pub id: Uuid,
    pub content_item_id: String,
    pub plan_id: Uuid,
    pub chain_name: String,
    pub is_default_chain: bool,
    pub status: ExecutionStatus,
    pub started: Option<DateTime<Utc>>,
    pub completed: Option<DateTime<Utc>>,
    pub status_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// engine_executions
// ---------------------------------------------------------------------------

/// A persisted engine execution row, keyed by `(chain_execution_id, node_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineExecutionRow {
    pub id: Uuid,
    pub chain_execution_id: Uuid,
    pub node_id: Uuid,
    pub status: ExecutionStatus,
    pub started: Option<DateTime<Utc>>,
    pub completed: Option<DateTime<Utc>>,
    pub status_message: Option<String>,
}
