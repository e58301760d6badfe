//! Caller-visible summary of a chain execution.

use std::fmt;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::metadata::{ExecutionMetadata, ExecutionStatus};
use crate::models::{ExecutionPlan, NodeId};
use crate::policy::{propagation, Propagation};
use crate::ChainError;

/// Chain status message recorded when a run is cancelled.
pub const CANCELLED_MESSAGE: &str = "chain execution was cancelled";

/// How a chain execution ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainOutcome {
    /// Every required node completed.
    Completed,
    /// A required node failed or was skipped.
    Aborted {
        node_id: NodeId,
        engine: String,
        message: String,
    },
    /// The run was cancelled from outside.
    Cancelled,
    /// Nothing is left to run but some required nodes never became ready.
    Stalled { engines: Vec<String> },
    /// The chain execution has not finished (only seen when reading
    /// persisted metadata).
    Unfinished,
}

impl ChainOutcome {
    /// Derive the outcome from stored metadata.
    pub fn infer(plan: &ExecutionPlan, metadata: &ExecutionMetadata) -> Self {
        let chain = metadata.chain();
        match chain.status() {
            ExecutionStatus::Completed => ChainOutcome::Completed,
            ExecutionStatus::Failed if chain.status_message() == Some(CANCELLED_MESSAGE) => {
                ChainOutcome::Cancelled
            }
            ExecutionStatus::Failed => first_abort(plan, metadata).unwrap_or_else(|| {
                ChainOutcome::Stalled {
                    engines: unfinished_required(plan, metadata),
                }
            }),
            _ => ChainOutcome::Unfinished,
        }
    }
}

/// First required node, in plan order, whose status aborts the chain.
pub(crate) fn first_abort(plan: &ExecutionPlan, metadata: &ExecutionMetadata) -> Option<ChainOutcome> {
    plan.nodes.iter().find_map(|node| {
        let record = metadata.engine_execution(node.id)?;
        (propagation(node.optional, record.status()) == Propagation::Abort).then(|| {
            ChainOutcome::Aborted {
                node_id: node.id,
                engine: node.engine.clone(),
                message: record.status_message().unwrap_or_default().to_owned(),
            }
        })
    })
}

/// Required nodes that have not completed.
pub(crate) fn unfinished_required(plan: &ExecutionPlan, metadata: &ExecutionMetadata) -> Vec<String> {
    plan.nodes
        .iter()
        .filter(|node| !node.optional)
        .filter(|node| {
            metadata
                .engine_execution(node.id)
                .map_or(true, |e| e.status() != ExecutionStatus::Completed)
        })
        .map(|node| node.engine.clone())
        .collect()
}

/// Status of one node at the end of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeReport {
    pub node_id: NodeId,
    pub engine: String,
    pub optional: bool,
    pub status: ExecutionStatus,
    pub started: Option<DateTime<Utc>>,
    pub completed: Option<DateTime<Utc>>,
    pub message: Option<String>,
}

/// The result of running (or inspecting) one chain execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainReport {
    pub chain_execution_id: Uuid,
    pub chain_name: String,
    pub content_item_id: String,
    pub outcome: ChainOutcome,
    /// One entry per plan node, in plan order. Nodes without a record are
    /// reported as `Scheduled`.
    pub nodes: Vec<NodeReport>,
}

impl ChainReport {
    pub fn new(plan: &ExecutionPlan, metadata: &ExecutionMetadata, outcome: ChainOutcome) -> Self {
        let nodes = plan
            .nodes
            .iter()
            .map(|node| {
                let record = metadata.engine_execution(node.id);
                NodeReport {
                    node_id: node.id,
                    engine: node.engine.clone(),
                    optional: node.optional,
                    status: record.map_or(ExecutionStatus::Scheduled, |e| e.status()),
                    started: record.and_then(|e| e.started()),
                    completed: record.and_then(|e| e.completed()),
                    message: record.and_then(|e| e.status_message().map(str::to_owned)),
                }
            })
            .collect();

        Self {
            chain_execution_id: metadata.chain().id,
            chain_name: metadata.chain().chain_name.clone(),
            content_item_id: metadata.chain().content_item_id.clone(),
            outcome,
            nodes,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == ChainOutcome::Completed
    }

    /// Final status of the first node running `engine`.
    pub fn status_of(&self, engine: &str) -> Option<ExecutionStatus> {
        self.nodes.iter().find(|n| n.engine == engine).map(|n| n.status)
    }

    pub fn completed_engines(&self) -> Vec<&str> {
        self.engines_with(ExecutionStatus::Completed)
    }

    /// Engines that were never started.
    pub fn never_ran(&self) -> Vec<&str> {
        self.engines_with(ExecutionStatus::Scheduled)
    }

    fn engines_with(&self, status: ExecutionStatus) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|n| n.status == status)
            .map(|n| n.engine.as_str())
            .collect()
    }

    /// The error a caller should surface for an unsuccessful run.
    pub fn error(&self) -> Option<ChainError> {
        match &self.outcome {
            ChainOutcome::Completed | ChainOutcome::Unfinished => None,
            ChainOutcome::Aborted { engine, message, .. } => Some(ChainError::EngineInvocation {
                engine: engine.clone(),
                message: message.clone(),
            }),
            ChainOutcome::Cancelled => Some(ChainError::Cancelled),
            ChainOutcome::Stalled { engines } => Some(ChainError::State(format!(
                "required engines {engines:?} of chain '{}' never became executable",
                self.chain_name
            ))),
        }
    }
}

impl fmt::Display for ChainOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Aborted { engine, .. } => write!(f, "aborted by required engine '{engine}'"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Stalled { engines } => write!(f, "stalled waiting for {engines:?}"),
            Self::Unfinished => write!(f, "unfinished"),
        }
    }
}

impl fmt::Display for ChainReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "chain '{}' on '{}' ({}): {}",
            self.chain_name, self.content_item_id, self.chain_execution_id, self.outcome
        )?;
        for node in &self.nodes {
            write!(
                f,
                "  {:<24} {:<11} {}",
                node.engine,
                node.status.to_string(),
                if node.optional { "optional" } else { "required" }
            )?;
            if let Some(msg) = &node.message {
                write!(f, "  {msg}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::models::ExecutionNode;

    fn plan() -> ExecutionPlan {
        let lang = ExecutionNode::new("lang", false, BTreeSet::new());
        let thumbs = ExecutionNode::new("thumbs", true, BTreeSet::from([lang.id]));
        let mut plan = ExecutionPlan::new("enrich");
        plan.nodes = vec![lang, thumbs];
        plan
    }

    #[test]
    fn infer_reads_aborting_node_from_metadata() {
        let plan = plan();
        let mut md = ExecutionMetadata::create_chain_execution(&plan, "item", false);
        let lang = md.ensure_engine_execution(&plan.nodes[0]);
        lang.start().unwrap();
        lang.fail("no text").unwrap();
        md.chain_mut().mark_failed("chain failed".into());

        let outcome = ChainOutcome::infer(&plan, &md);
        assert_eq!(
            outcome,
            ChainOutcome::Aborted {
                node_id: plan.nodes[0].id,
                engine: "lang".into(),
                message: "no text".into(),
            }
        );

        let report = ChainReport::new(&plan, &md, outcome);
        assert_eq!(report.never_ran(), vec!["thumbs"]);
        assert!(!report.is_success());
        assert!(report.to_string().contains("aborted by required engine 'lang'"));
    }

    #[test]
    fn infer_recognises_cancellation_and_unfinished_runs() {
        let plan = plan();
        let mut md = ExecutionMetadata::create_chain_execution(&plan, "item", false);
        assert_eq!(ChainOutcome::infer(&plan, &md), ChainOutcome::Unfinished);

        md.chain_mut().mark_in_progress();
        md.chain_mut().mark_failed(CANCELLED_MESSAGE.to_owned());
        assert_eq!(ChainOutcome::infer(&plan, &md), ChainOutcome::Cancelled);
    }

    #[test]
    fn optional_failure_does_not_count_as_abort() {
        let plan = plan();
        let mut md = ExecutionMetadata::create_chain_execution(&plan, "item", false);
        md.ensure_engine_execution(&plan.nodes[0]).start().unwrap();
        md.ensure_engine_execution(&plan.nodes[0]).complete(None).unwrap();
        md.ensure_engine_execution(&plan.nodes[1]).skip(None);

        assert!(first_abort(&plan, &md).is_none());
        assert!(unfinished_required(&plan, &md).is_empty());
    }
}
