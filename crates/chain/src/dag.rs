//! Plan validation and ready-set resolution.
//!
//! Validation rules:
//! 1. Node ids must be unique within the plan.
//! 2. Every node must name a non-empty engine.
//! 3. Every `depends_on` entry must reference a node of the same plan.
//!
//! Cycles are *not* detected. A node on a cycle simply never becomes ready,
//! so [`executable`] returns an empty set once everything else has run.

use std::collections::{BTreeSet, HashSet};

use crate::models::{ExecutionNode, ExecutionPlan, NodeId};
use crate::ChainError;

/// Validate the plan's structure and return the distinct engine names it
/// references.
///
/// # Errors
/// [`ChainError::Structural`] naming the first offending node.
pub fn validate_plan(plan: &ExecutionPlan) -> Result<BTreeSet<String>, ChainError> {
    // -----------------------------------------------------------------------
    // 1. Node ids and engine names
    // -----------------------------------------------------------------------
    let mut node_ids: HashSet<NodeId> = HashSet::with_capacity(plan.nodes.len());
    let mut engines: BTreeSet<String> = BTreeSet::new();
    for node in &plan.nodes {
        if !node_ids.insert(node.id) {
            return Err(ChainError::structural(node.id, "duplicate node id"));
        }
        if node.engine.trim().is_empty() {
            return Err(ChainError::structural(node.id, "engine name is empty"));
        }
        engines.insert(node.engine.clone());
    }

    // -----------------------------------------------------------------------
    // 2. Dependency targets
    // -----------------------------------------------------------------------
    for node in &plan.nodes {
        if let Some(dangling) = node.depends_on.iter().find(|d| !node_ids.contains(d)) {
            return Err(ChainError::structural(
                node.id,
                format!("depends on node '{dangling}' which is not part of the plan"),
            ));
        }
    }

    Ok(engines)
}

/// Nodes that have not been executed yet and whose dependencies all have.
///
/// Pure: the result depends only on `plan` and `executed`. Nodes are returned
/// in plan order. An empty result means either everything ran or nothing
/// remaining can become ready.
pub fn executable<'p>(plan: &'p ExecutionPlan, executed: &HashSet<NodeId>) -> Vec<&'p ExecutionNode> {
    plan.nodes
        .iter()
        .filter(|node| !executed.contains(&node.id))
        .filter(|node| node.depends_on.iter().all(|dep| executed.contains(dep)))
        .collect()
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::build_plan;
    use crate::models::EngineDescriptor;

    fn node(engine: &str, deps: &[&ExecutionNode]) -> ExecutionNode {
        ExecutionNode::new(engine, false, deps.iter().map(|d| d.id).collect())
    }

    /// A, B independent; C depends on both.
    fn fan_in() -> ExecutionPlan {
        let a = node("a", &[]);
        let b = node("b", &[]);
        let c = node("c", &[&a, &b]);
        let mut plan = ExecutionPlan::new("fan-in");
        plan.nodes = vec![a, b, c];
        plan
    }

    fn engines_of(nodes: &[&ExecutionNode]) -> Vec<String> {
        nodes.iter().map(|n| n.engine.clone()).collect()
    }

    fn ids(plan: &ExecutionPlan, engines: &[&str]) -> HashSet<NodeId> {
        engines
            .iter()
            .map(|e| plan.node_for_engine(e).expect("present").id)
            .collect()
    }

    #[test]
    fn frontier_advances_as_nodes_execute() {
        let plan = fan_in();

        assert_eq!(engines_of(&executable(&plan, &HashSet::new())), vec!["a", "b"]);
        assert_eq!(engines_of(&executable(&plan, &ids(&plan, &["a", "b"]))), vec!["c"]);
        assert!(executable(&plan, &ids(&plan, &["a", "b", "c"])).is_empty());
    }

    #[test]
    fn partially_satisfied_dependencies_are_not_ready() {
        let plan = fan_in();
        assert_eq!(engines_of(&executable(&plan, &ids(&plan, &["a"]))), vec!["b"]);
    }

    #[test]
    fn resolver_is_pure() {
        let plan = fan_in();
        let executed = ids(&plan, &["a"]);
        assert_eq!(executable(&plan, &executed), executable(&plan, &executed.clone()));
    }

    #[test]
    fn executed_nodes_never_come_back() {
        let plan = fan_in();
        let mut executed = ids(&plan, &["a"]);
        let a = plan.node_for_engine("a").unwrap().id;
        for more in [&["b"][..], &["b", "c"][..]] {
            executed.extend(ids(&plan, more));
            assert!(executable(&plan, &executed).iter().all(|n| n.id != a));
        }
    }

    #[test]
    fn nodes_waiting_on_a_cycle_never_become_ready() {
        let mut a = node("a", &[]);
        let b = node("b", &[&a]);
        a.depends_on.insert(b.id);
        let c = node("c", &[]);
        let mut plan = ExecutionPlan::new("cyclic");
        plan.nodes = vec![a, b, c];

        // Validation is permissive about cycles.
        assert!(validate_plan(&plan).is_ok());
        let layers = plan.layers();
        assert_eq!(layers.len(), 1);
        assert_eq!(engines_of(&layers[0]), vec!["c"]);
    }

    #[test]
    fn layers_follow_priority_tiers() {
        let engines = vec![
            EngineDescriptor::new("tika", 0),
            EngineDescriptor::new("lang", 10),
            EngineDescriptor::new("ner", 10),
            EngineDescriptor::new("linking", 20),
        ];
        let plan = build_plan("default", &engines, &HashSet::new(), &HashSet::new()).unwrap();
        let layers: Vec<Vec<String>> = plan.layers().iter().map(|l| engines_of(l)).collect();
        assert_eq!(
            layers,
            vec![vec!["tika"], vec!["lang", "ner"], vec!["linking"]]
        );
    }

    #[test]
    fn validating_a_built_plan_returns_its_engine_names() {
        let engines = vec![
            EngineDescriptor::new("a", 1),
            EngineDescriptor::new("b", 1),
            EngineDescriptor::new("c", 2),
        ];
        let plan = build_plan("round-trip", &engines, &HashSet::new(), &HashSet::new()).unwrap();
        let names = validate_plan(&plan).expect("valid");
        assert_eq!(names, BTreeSet::from(["a".into(), "b".into(), "c".into()]));
    }

    #[test]
    fn dangling_dependency_is_rejected() {
        let mut plan = fan_in();
        let ghost = NodeId::new();
        plan.nodes[2].depends_on.insert(ghost);
        let c = plan.nodes[2].id;

        assert!(matches!(
            validate_plan(&plan),
            Err(ChainError::Structural { node_id, reason })
                if node_id == c.to_string() && reason.contains(&ghost.to_string())
        ));
    }

    #[test]
    fn empty_engine_name_is_rejected() {
        let mut plan = fan_in();
        plan.nodes[1].engine = "  ".into();
        assert!(matches!(
            validate_plan(&plan),
            Err(ChainError::Structural { reason, .. }) if reason.contains("empty")
        ));
    }

    #[test]
    fn duplicate_node_id_is_rejected() {
        let mut plan = fan_in();
        let dup = plan.nodes[0].clone();
        plan.nodes.push(dup);
        assert!(matches!(
            validate_plan(&plan),
            Err(ChainError::Structural { reason, .. }) if reason == "duplicate node id"
        ));
    }

    #[test]
    fn validation_does_not_modify_the_plan() {
        let plan = fan_in();
        let before = plan.clone();
        let _ = validate_plan(&plan);
        assert_eq!(plan, before);
    }
}
