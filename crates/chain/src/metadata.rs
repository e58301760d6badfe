//! Execution metadata: per-node run records for one execution of a chain
//! against one content item.
//!
//! Each [`EngineExecution`] follows a small state machine:
//!
//! | from        | call         | to          | timestamps                    |
//! |-------------|--------------|-------------|-------------------------------|
//! | any         | `schedule`   | Scheduled   | started/completed cleared     |
//! | Scheduled   | `start`      | InProgress  | started = now                 |
//! | InProgress  | `complete`   | Completed   | completed = now               |
//! | InProgress  | `fail`       | Failed      | completed = now               |
//! | any         | `skip`       | Skipped     | started = completed = now     |
//!
//! Repeating the transition a record just went through is a no-op.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use store::models::{ChainExecutionRow, EngineExecutionRow};
pub use store::ExecutionStatus;

use crate::models::{ExecutionNode, ExecutionPlan, NodeId};
use crate::policy::{propagation, Propagation};
use crate::ChainError;

// ---------------------------------------------------------------------------
// EngineExecution
// ---------------------------------------------------------------------------

/// Run record of one execution node within one chain execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineExecution {
    pub id: Uuid,
    pub chain_execution_id: Uuid,
    pub node_id: NodeId,
    status: ExecutionStatus,
    started: Option<DateTime<Utc>>,
    completed: Option<DateTime<Utc>>,
    status_message: Option<String>,
}

impl EngineExecution {
    /// A fresh `Scheduled` record.
    pub fn new(chain_execution_id: Uuid, node_id: NodeId) -> Self {
        Self {
            id: Uuid::new_v4(),
            chain_execution_id,
            node_id,
            status: ExecutionStatus::Scheduled,
            started: None,
            completed: None,
            status_message: None,
        }
    }

    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    pub fn started(&self) -> Option<DateTime<Utc>> {
        self.started
    }

    pub fn completed(&self) -> Option<DateTime<Utc>> {
        self.completed
    }

    pub fn status_message(&self) -> Option<&str> {
        self.status_message.as_deref()
    }

    pub fn is_failed(&self) -> bool {
        self.status == ExecutionStatus::Failed
    }

    /// `Completed` or `Failed`.
    pub fn is_finished(&self) -> bool {
        matches!(self.status, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }

    /// Reset to `Scheduled`, dropping timestamps and message.
    pub fn schedule(&mut self) {
        self.status = ExecutionStatus::Scheduled;
        self.started = None;
        self.completed = None;
        self.status_message = None;
    }

    /// `Scheduled → InProgress`.
    pub fn start(&mut self) -> Result<(), ChainError> {
        match self.status {
            ExecutionStatus::Scheduled => {
                self.status = ExecutionStatus::InProgress;
                self.started = Some(Utc::now());
                Ok(())
            }
            ExecutionStatus::InProgress => {
                warn!("engine execution {} already in progress, start ignored", self.id);
                Ok(())
            }
            other => Err(self.illegal("start", other)),
        }
    }

    /// `InProgress → Completed`.
    pub fn complete(&mut self, message: Option<String>) -> Result<(), ChainError> {
        match self.status {
            ExecutionStatus::InProgress => {
                self.status = ExecutionStatus::Completed;
                self.completed = Some(Utc::now());
                self.status_message = message;
                Ok(())
            }
            ExecutionStatus::Completed => {
                warn!("engine execution {} already completed, complete ignored", self.id);
                Ok(())
            }
            other => Err(self.illegal("complete", other)),
        }
    }

    /// `InProgress → Failed`. A non-empty message is required.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), ChainError> {
        let message = message.into();
        if message.trim().is_empty() {
            return Err(ChainError::Argument(format!(
                "a status message is required to fail engine execution {}",
                self.id
            )));
        }
        match self.status {
            ExecutionStatus::InProgress => {
                self.status = ExecutionStatus::Failed;
                self.completed = Some(Utc::now());
                self.status_message = Some(message);
                Ok(())
            }
            ExecutionStatus::Failed => {
                warn!("engine execution {} already failed, fail ignored", self.id);
                Ok(())
            }
            other => Err(self.illegal("fail", other)),
        }
    }

    /// Any state `→ Skipped`; the record never runs.
    pub fn skip(&mut self, message: Option<String>) {
        if self.status == ExecutionStatus::Skipped {
            return;
        }
        let now = Utc::now();
        self.status = ExecutionStatus::Skipped;
        self.started = Some(now);
        self.completed = Some(now);
        self.status_message = message;
    }

    fn illegal(&self, transition: &str, status: ExecutionStatus) -> ChainError {
        ChainError::State(format!(
            "cannot {transition} engine execution {} (node {}) while it is {status}",
            self.id, self.node_id
        ))
    }
}

// ---------------------------------------------------------------------------
// ChainExecution
// ---------------------------------------------------------------------------

/// One instantiation of a plan against one content item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainExecution {
    pub id: Uuid,
    pub content_item_id: String,
    pub plan_id: Uuid,
    pub chain_name: String,
    pub is_default_chain: bool,
    pub created_at: DateTime<Utc>,
    status: ExecutionStatus,
    started: Option<DateTime<Utc>>,
    completed: Option<DateTime<Utc>>,
    status_message: Option<String>,
}

impl ChainExecution {
    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    pub fn started(&self) -> Option<DateTime<Utc>> {
        self.started
    }

    pub fn completed(&self) -> Option<DateTime<Utc>> {
        self.completed
    }

    pub fn status_message(&self) -> Option<&str> {
        self.status_message.as_deref()
    }

    pub fn is_failed(&self) -> bool {
        self.status == ExecutionStatus::Failed
    }

    pub(crate) fn mark_in_progress(&mut self) {
        self.status = ExecutionStatus::InProgress;
        self.started = Some(Utc::now());
        self.completed = None;
        self.status_message = None;
    }

    pub(crate) fn mark_completed(&mut self) {
        self.status = ExecutionStatus::Completed;
        self.completed = Some(Utc::now());
    }

    pub(crate) fn mark_failed(&mut self, message: String) {
        self.status = ExecutionStatus::Failed;
        self.completed = Some(Utc::now());
        self.status_message = Some(message);
    }

    fn reschedule(&mut self) {
        self.status = ExecutionStatus::Scheduled;
        self.started = None;
        self.completed = None;
        self.status_message = None;
    }
}

// ---------------------------------------------------------------------------
// ExecutionMetadata
// ---------------------------------------------------------------------------

/// A chain execution together with the engine executions it owns.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionMetadata {
    chain: ChainExecution,
    executions: HashMap<NodeId, EngineExecution>,
}

impl ExecutionMetadata {
    /// Start fresh metadata for running `plan` against `content_item_id`.
    ///
    /// Engine executions are created lazily through
    /// [`ExecutionMetadata::ensure_engine_execution`].
    pub fn create_chain_execution(
        plan: &ExecutionPlan,
        content_item_id: impl Into<String>,
        is_default_chain: bool,
    ) -> Self {
        Self {
            chain: ChainExecution {
                id: Uuid::new_v4(),
                content_item_id: content_item_id.into(),
                plan_id: plan.id,
                chain_name: plan.chain_name.clone(),
                is_default_chain,
                created_at: Utc::now(),
                status: ExecutionStatus::Scheduled,
                started: None,
                completed: None,
                status_message: None,
            },
            executions: HashMap::new(),
        }
    }

    /// Reconcile previously persisted metadata with `plan` so the run can
    /// continue where it stopped.
    ///
    /// - Records for plan nodes that have none are created `Scheduled`.
    /// - Records left `InProgress` are re-scheduled.
    /// - Required nodes that ended `Failed` or `Skipped` are re-scheduled.
    /// - `Completed` nodes and finished optional nodes are kept as they are.
    ///
    /// # Errors
    /// [`ChainError::State`] if the metadata belong to another content item or
    /// chain, or reference a node that is not part of `plan`.
    pub fn initialize_from_existing(
        existing: ExecutionMetadata,
        plan: &ExecutionPlan,
        content_item_id: &str,
    ) -> Result<Self, ChainError> {
        let ExecutionMetadata { mut chain, mut executions } = existing;

        if chain.content_item_id != content_item_id {
            return Err(ChainError::State(format!(
                "chain execution {} enhances content item '{}', not '{}'",
                chain.id, chain.content_item_id, content_item_id
            )));
        }
        if chain.chain_name != plan.chain_name {
            return Err(ChainError::State(format!(
                "chain execution {} was recorded for chain '{}' but the plan is for chain '{}'",
                chain.id, chain.chain_name, plan.chain_name
            )));
        }
        if let Some(stale) = executions.values().find(|e| !plan.contains(e.node_id)) {
            return Err(ChainError::State(format!(
                "engine execution {} of chain execution {} references node {} which is not part of plan {} (chain '{}')",
                stale.id, chain.id, stale.node_id, plan.id, plan.chain_name
            )));
        }

        for node in &plan.nodes {
            let record = executions
                .entry(node.id)
                .or_insert_with(|| EngineExecution::new(chain.id, node.id));
            let rerun = match record.status {
                ExecutionStatus::InProgress => true,
                status => propagation(node.optional, status) == Propagation::Abort,
            };
            if rerun {
                info!(
                    "re-scheduling engine '{}' ({}) of chain execution {}",
                    node.engine, record.status, chain.id
                );
                record.schedule();
            }
        }

        chain.plan_id = plan.id;
        chain.reschedule();
        Ok(Self { chain, executions })
    }

    /// Move engine executions recorded against the nodes of `stored` onto
    /// the nodes of `plan` that run the same engine.
    ///
    /// A plan rebuilt from the same chain definition gets fresh node ids;
    /// this lets the earlier run be resumed against it. Records whose engine
    /// is not part of `plan` keep their old node id.
    pub fn rebind_to_plan(&mut self, stored: &ExecutionPlan, plan: &ExecutionPlan) {
        if stored.id == plan.id {
            return;
        }
        let executions = std::mem::take(&mut self.executions);
        self.executions = executions
            .into_values()
            .map(|mut record| {
                let target = stored
                    .node(record.node_id)
                    .and_then(|old| plan.node_for_engine(&old.engine));
                if let Some(node) = target {
                    record.node_id = node.id;
                }
                (record.node_id, record)
            })
            .collect();
    }

    pub fn chain(&self) -> &ChainExecution {
        &self.chain
    }

    pub(crate) fn chain_mut(&mut self) -> &mut ChainExecution {
        &mut self.chain
    }

    /// The record for `node`, created `Scheduled` on first reference.
    pub fn ensure_engine_execution(&mut self, node: &ExecutionNode) -> &mut EngineExecution {
        let chain_execution_id = self.chain.id;
        self.executions
            .entry(node.id)
            .or_insert_with(|| EngineExecution::new(chain_execution_id, node.id))
    }

    pub fn engine_execution(&self, node_id: NodeId) -> Option<&EngineExecution> {
        self.executions.get(&node_id)
    }

    pub fn engine_execution_mut(&mut self, node_id: NodeId) -> Option<&mut EngineExecution> {
        self.executions.get_mut(&node_id)
    }

    pub fn engine_executions(&self) -> impl Iterator<Item = &EngineExecution> {
        self.executions.values()
    }

    /// Nodes of `plan` whose outcome lets their dependents run.
    pub fn executed_nodes(&self, plan: &ExecutionPlan) -> HashSet<NodeId> {
        plan.nodes
            .iter()
            .filter(|node| {
                self.executions
                    .get(&node.id)
                    .is_some_and(|e| propagation(node.optional, e.status) == Propagation::Proceed)
            })
            .map(|node| node.id)
            .collect()
    }

    // -----------------------------------------------------------------------
    // Row conversion
    // -----------------------------------------------------------------------

    /// Rebuild metadata from persisted rows. Rows of other chain executions
    /// are ignored.
    pub fn from_rows(chain: ChainExecutionRow, engines: Vec<EngineExecutionRow>) -> Self {
        let executions = engines
            .into_iter()
            .filter(|row| row.chain_execution_id == chain.id)
            .map(|row| {
                let execution = EngineExecution::from(row);
                (execution.node_id, execution)
            })
            .collect();
        Self {
            chain: ChainExecution::from(chain),
            executions,
        }
    }

    pub fn chain_row(&self) -> ChainExecutionRow {
        ChainExecutionRow::from(&self.chain)
    }
}

impl From<EngineExecutionRow> for EngineExecution {
    fn from(row: EngineExecutionRow) -> Self {
        Self {
            id: row.id,
            chain_execution_id: row.chain_execution_id,
            node_id: NodeId::from(row.node_id),
            status: row.status,
            started: row.started,
            completed: row.completed,
            status_message: row.status_message,
        }
    }
}

impl From<&EngineExecution> for EngineExecutionRow {
    fn from(e: &EngineExecution) -> Self {
        Self {
            id: e.id,
            chain_execution_id: e.chain_execution_id,
            node_id: e.node_id.as_uuid(),
            status: e.status,
            started: e.started,
            completed: e.completed,
            status_message: e.status_message.clone(),
        }
    }
}

impl From<ChainExecutionRow> for ChainExecution {
    fn from(row: ChainExecutionRow) -> Self {
        Self {
            id: row.id,
            content_item_id: row.content_item_id,
            plan_id: row.plan_id,
            chain_name: row.chain_name,
            is_default_chain: row.is_default_chain,
            created_at: row.created_at,
            status: row.status,
            started: row.started,
            completed: row.completed,
            status_message: row.status_message,
        }
    }
}

impl From<&ChainExecution> for ChainExecutionRow {
    fn from(c: &ChainExecution) -> Self {
        Self {
            id: c.id,
            content_item_id: c.content_item_id.clone(),
            plan_id: c.plan_id,
            chain_name: c.chain_name.clone(),
            is_default_chain: c.is_default_chain,
            status: c.status,
            started: c.started,
            completed: c.completed,
            status_message: c.status_message.clone(),
            created_at: c.created_at,
        }
    }
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn record() -> EngineExecution {
        EngineExecution::new(Uuid::new_v4(), NodeId::new())
    }

    /// a (required) → b (optional), a → c (required)
    fn plan() -> ExecutionPlan {
        let a = ExecutionNode::new("a", false, BTreeSet::new());
        let b = ExecutionNode::new("b", true, BTreeSet::from([a.id]));
        let c = ExecutionNode::new("c", false, BTreeSet::from([a.id]));
        let mut plan = ExecutionPlan::new("chain");
        plan.nodes = vec![a, b, c];
        plan
    }

    fn node<'p>(plan: &'p ExecutionPlan, engine: &str) -> &'p ExecutionNode {
        plan.node_for_engine(engine).expect("present")
    }

    #[test]
    fn start_then_fail_records_both_timestamps_and_message() {
        let mut e = record();
        e.start().unwrap();
        e.fail("boom").unwrap();

        assert_eq!(e.status(), ExecutionStatus::Failed);
        assert!(e.started().is_some());
        assert!(e.completed().is_some());
        assert_eq!(e.status_message(), Some("boom"));
        assert!(e.is_failed() && e.is_finished());
    }

    #[test]
    fn fail_without_message_is_rejected_and_leaves_state_unchanged() {
        let mut e = record();
        e.start().unwrap();
        let before = e.clone();

        assert!(matches!(e.fail(""), Err(ChainError::Argument(_))));
        assert_eq!(e, before);
    }

    #[test]
    fn complete_keeps_optional_message() {
        let mut e = record();
        e.start().unwrap();
        e.complete(Some("2 entities".into())).unwrap();

        assert_eq!(e.status(), ExecutionStatus::Completed);
        assert_eq!(e.status_message(), Some("2 entities"));
        assert!(e.is_finished() && !e.is_failed());
    }

    #[test]
    fn repeating_a_transition_is_a_no_op() {
        let mut e = record();
        e.start().unwrap();
        let started = e.started();
        e.start().unwrap();
        assert_eq!(e.started(), started);

        e.complete(None).unwrap();
        let completed = e.completed();
        e.complete(Some("again".into())).unwrap();
        assert_eq!(e.completed(), completed);
        assert_eq!(e.status_message(), None);
    }

    #[test]
    fn out_of_order_transitions_are_state_errors() {
        let mut e = record();
        assert!(matches!(e.complete(None), Err(ChainError::State(_))));
        assert!(matches!(e.fail("x"), Err(ChainError::State(_))));

        e.start().unwrap();
        e.complete(None).unwrap();
        assert!(matches!(e.start(), Err(ChainError::State(_))));
        assert!(matches!(e.fail("late"), Err(ChainError::State(_))));
    }

    #[test]
    fn skip_sets_both_timestamps_from_any_state() {
        let mut e = record();
        e.skip(Some("engine not active".into()));

        assert_eq!(e.status(), ExecutionStatus::Skipped);
        assert!(e.started().is_some());
        assert_eq!(e.started(), e.completed());
        assert!(!e.is_finished());
    }

    #[test]
    fn schedule_clears_previous_run() {
        let mut e = record();
        e.start().unwrap();
        e.fail("boom").unwrap();
        e.schedule();

        assert_eq!(e.status(), ExecutionStatus::Scheduled);
        assert!(e.started().is_none() && e.completed().is_none());
        assert!(e.status_message().is_none());
    }

    #[test]
    fn engine_executions_are_created_once_per_node() {
        let plan = plan();
        let mut md = ExecutionMetadata::create_chain_execution(&plan, "urn:item:1", true);
        assert_eq!(md.engine_executions().count(), 0);

        let a = node(&plan, "a");
        let first = md.ensure_engine_execution(a).id;
        md.ensure_engine_execution(a).start().unwrap();
        let again = md.ensure_engine_execution(a);

        assert_eq!(again.id, first);
        assert_eq!(again.status(), ExecutionStatus::InProgress);
        assert_eq!(md.engine_executions().count(), 1);
        assert_eq!(md.chain().chain_name, "chain");
        assert!(md.chain().is_default_chain);
        assert_eq!(md.chain().status(), ExecutionStatus::Scheduled);
    }

    #[test]
    fn executed_nodes_follow_the_decision_table() {
        let plan = plan();
        let mut md = ExecutionMetadata::create_chain_execution(&plan, "urn:item:1", false);
        for engine in ["a", "b", "c"] {
            let e = md.ensure_engine_execution(node(&plan, engine));
            e.start().unwrap();
            e.fail("boom").unwrap();
        }
        md.engine_execution_mut(node(&plan, "a").id).unwrap().schedule();
        let a = md.engine_execution_mut(node(&plan, "a").id).unwrap();
        a.start().unwrap();
        a.complete(None).unwrap();

        let executed = md.executed_nodes(&plan);
        // a completed, b failed but optional, c failed and required.
        assert_eq!(
            executed,
            HashSet::from([node(&plan, "a").id, node(&plan, "b").id])
        );
    }

    #[test]
    fn resume_reschedules_unfinished_and_required_failures() {
        let plan = plan();
        let mut md = ExecutionMetadata::create_chain_execution(&plan, "urn:item:1", true);
        let a = md.ensure_engine_execution(node(&plan, "a"));
        a.start().unwrap();
        a.complete(None).unwrap();
        let b = md.ensure_engine_execution(node(&plan, "b"));
        b.start().unwrap();
        b.fail("optional boom").unwrap();
        md.ensure_engine_execution(node(&plan, "c")).start().unwrap();
        md.chain_mut().mark_failed("interrupted".into());

        let resumed = ExecutionMetadata::initialize_from_existing(md, &plan, "urn:item:1").unwrap();

        let status = |engine: &str| {
            resumed
                .engine_execution(node(&plan, engine).id)
                .map(|e| e.status())
        };
        assert_eq!(status("a"), Some(ExecutionStatus::Completed));
        assert_eq!(status("b"), Some(ExecutionStatus::Failed));
        assert_eq!(status("c"), Some(ExecutionStatus::Scheduled));
        assert_eq!(resumed.chain().status(), ExecutionStatus::Scheduled);
        assert!(resumed.chain().status_message().is_none());
    }

    #[test]
    fn resume_creates_missing_records() {
        let plan = plan();
        let md = ExecutionMetadata::create_chain_execution(&plan, "urn:item:1", true);
        let resumed = ExecutionMetadata::initialize_from_existing(md, &plan, "urn:item:1").unwrap();
        assert_eq!(resumed.engine_executions().count(), 3);
        assert!(resumed
            .engine_executions()
            .all(|e| e.status() == ExecutionStatus::Scheduled));
    }

    #[test]
    fn resume_rejects_records_for_unknown_nodes() {
        let plan = plan();
        let mut md = ExecutionMetadata::create_chain_execution(&plan, "urn:item:1", true);
        let stranger = ExecutionNode::new("gone", false, BTreeSet::new());
        md.ensure_engine_execution(&stranger);

        assert!(matches!(
            ExecutionMetadata::initialize_from_existing(md, &plan, "urn:item:1"),
            Err(ChainError::State(msg)) if msg.contains(&stranger.id.to_string())
        ));
    }

    #[test]
    fn resume_rejects_other_chain_or_content_item() {
        let plan = plan();
        let md = ExecutionMetadata::create_chain_execution(&plan, "urn:item:1", true);

        assert!(matches!(
            ExecutionMetadata::initialize_from_existing(md.clone(), &plan, "urn:item:2"),
            Err(ChainError::State(_))
        ));

        let mut other = plan.clone();
        other.chain_name = "other".into();
        assert!(matches!(
            ExecutionMetadata::initialize_from_existing(md, &other, "urn:item:1"),
            Err(ChainError::State(msg)) if msg.contains("'other'")
        ));
    }

    #[test]
    fn rebinding_moves_records_onto_a_rebuilt_plan() {
        let stored = plan();
        let rebuilt = plan();

        let mut md = ExecutionMetadata::create_chain_execution(&stored, "item", false);
        let a = md.ensure_engine_execution(node(&stored, "a"));
        a.start().unwrap();
        a.complete(None).unwrap();
        let c = md.ensure_engine_execution(node(&stored, "c"));
        c.start().unwrap();
        c.fail("boom").unwrap();

        md.rebind_to_plan(&stored, &rebuilt);
        let md = ExecutionMetadata::initialize_from_existing(md, &rebuilt, "item").unwrap();

        let a_new = md.engine_execution(node(&rebuilt, "a").id).unwrap();
        assert_eq!(a_new.status(), ExecutionStatus::Completed);
        assert_eq!(a_new.node_id, node(&rebuilt, "a").id);
        assert_eq!(
            md.engine_execution(node(&rebuilt, "c").id).unwrap().status(),
            ExecutionStatus::Scheduled
        );
        assert_eq!(md.chain().plan_id, rebuilt.id);
    }

    #[test]
    fn rebinding_keeps_records_of_engines_the_new_plan_lacks() {
        let stored = plan();
        let mut smaller = ExecutionPlan::new("chain");
        smaller.nodes = vec![ExecutionNode::new("a", false, BTreeSet::new())];

        let mut md = ExecutionMetadata::create_chain_execution(&stored, "item", false);
        md.ensure_engine_execution(node(&stored, "b"));
        md.rebind_to_plan(&stored, &smaller);

        assert!(md.engine_execution(node(&stored, "b").id).is_some());
        assert!(matches!(
            ExecutionMetadata::initialize_from_existing(md, &smaller, "item"),
            Err(ChainError::State(_))
        ));
    }

    #[test]
    fn rows_round_trip_through_store_models() {
        let plan = plan();
        let mut md = ExecutionMetadata::create_chain_execution(&plan, "urn:item:9", false);
        let a = md.ensure_engine_execution(node(&plan, "a"));
        a.start().unwrap();
        a.fail("boom").unwrap();
        let rows: Vec<EngineExecutionRow> = md.engine_executions().map(Into::into).collect();

        let rebuilt = ExecutionMetadata::from_rows(md.chain_row(), rows);
        assert_eq!(rebuilt, md);
    }
}
