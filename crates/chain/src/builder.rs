//! Plan construction from a prioritised list of engines.
//!
//! Engines are grouped into tiers by priority (ascending). Every node of a
//! tier depends on every node of the previous tier. Within a tier, nodes
//! are added in engine-name order so that plans are reproducible.
//!
//! Missing engines (configured but unavailable) get nodes without
//! dependencies. Missing *required* engines are additionally placed in front
//! of the first available tier, so that tier can never start; the
//! coordinator refuses to run such a plan.

use std::collections::{BTreeSet, HashSet};

use tracing::debug;

use crate::models::{EngineDescriptor, ExecutionNode, ExecutionPlan, NodeId, PlanProperties};
use crate::ChainError;

/// Build the execution plan for `chain_name`.
///
/// # Errors
/// [`ChainError::Argument`] if the chain name or an engine name is empty, or
/// an engine name is listed more than once across `available` and `missing`.
pub fn build_plan(
    chain_name: &str,
    available: &[EngineDescriptor],
    optional: &HashSet<String>,
    missing: &HashSet<String>,
) -> Result<ExecutionPlan, ChainError> {
    build_plan_with_properties(chain_name, available, optional, missing, &PlanProperties::default())
}

/// [`build_plan`], attaching `properties.chain` to the plan and each entry of
/// `properties.engines` to the node running that engine.
pub fn build_plan_with_properties(
    chain_name: &str,
    available: &[EngineDescriptor],
    optional: &HashSet<String>,
    missing: &HashSet<String>,
    properties: &PlanProperties,
) -> Result<ExecutionPlan, ChainError> {
    if chain_name.is_empty() {
        return Err(ChainError::Argument("chain name must not be empty".into()));
    }

    let mut seen: HashSet<&str> = HashSet::new();
    for name in available.iter().map(|e| e.name.as_str()).chain(missing.iter().map(String::as_str)) {
        if name.is_empty() {
            return Err(ChainError::Argument(format!(
                "chain '{chain_name}' lists an engine with an empty name"
            )));
        }
        if !seen.insert(name) {
            return Err(ChainError::Argument(format!(
                "engine '{name}' is listed more than once for chain '{chain_name}'"
            )));
        }
    }

    let mut plan = ExecutionPlan::new(chain_name);
    plan.properties = properties.chain.clone();

    // Missing engines first; required ones block the first tier.
    let mut current: BTreeSet<NodeId> = BTreeSet::new();
    let mut missing_sorted: Vec<&String> = missing.iter().collect();
    missing_sorted.sort();
    for name in missing_sorted {
        let is_optional = optional.contains(name);
        let node = ExecutionNode::new(name.as_str(), is_optional, BTreeSet::new())
            .with_properties(properties.for_engine(name));
        if !is_optional {
            current.insert(node.id);
        }
        plan.nodes.push(node);
    }

    let mut sorted: Vec<&EngineDescriptor> = available.iter().collect();
    sorted.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));

    let mut prev_priority: Option<i32> = None;
    let mut prev: BTreeSet<NodeId> = BTreeSet::new();
    for engine in sorted {
        if prev_priority != Some(engine.priority) {
            prev = std::mem::take(&mut current);
            prev_priority = Some(engine.priority);
        }
        let node = ExecutionNode::new(
            engine.name.as_str(),
            optional.contains(&engine.name),
            prev.clone(),
        )
        .with_properties(properties.for_engine(&engine.name));
        current.insert(node.id);
        plan.nodes.push(node);
    }

    debug!(
        "built plan for chain '{}' with {} nodes ({} missing)",
        chain_name,
        plan.nodes.len(),
        missing.len()
    );
    Ok(plan)
}
