//! Core plan models.
//!
//! An [`ExecutionPlan`] is the dependency graph computed for one chain. It
//! serialises to the JSON `definition` stored in the `plans` table.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use engines::{Properties, DEFAULT_PRIORITY};

// ---------------------------------------------------------------------------
// NodeId
// ---------------------------------------------------------------------------

/// Opaque identity of an execution node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Uuid);

impl NodeId {
    /// Generate a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for NodeId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ---------------------------------------------------------------------------
// ExecutionNode
// ---------------------------------------------------------------------------

/// One vertex of the plan: an engine and the nodes that must run before it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionNode {
    pub id: NodeId,
    /// Name the engine is looked up under.
    pub engine: String,
    /// Failure of an optional node is recorded but does not abort the chain.
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub depends_on: BTreeSet<NodeId>,
    /// Handed to the engine on every invocation.
    #[serde(default, skip_serializing_if = "Properties::is_empty")]
    pub properties: Properties,
}

impl ExecutionNode {
    pub fn new(engine: impl Into<String>, optional: bool, depends_on: BTreeSet<NodeId>) -> Self {
        Self {
            id: NodeId::new(),
            engine: engine.into(),
            optional,
            depends_on,
            properties: Properties::new(),
        }
    }

    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = properties;
        self
    }
}

// ---------------------------------------------------------------------------
// ExecutionPlan
// ---------------------------------------------------------------------------

/// The dependency graph of execution nodes for one named chain.
///
/// Nodes keep the order they were added in; that order is also the order in
/// which ready sets are reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub id: Uuid,
    pub chain_name: String,
    pub nodes: Vec<ExecutionNode>,
    /// Chain-wide properties, visible to every engine of the plan.
    #[serde(default, skip_serializing_if = "Properties::is_empty")]
    pub properties: Properties,
}

impl ExecutionPlan {
    /// An empty plan for `chain_name`.
    pub fn new(chain_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            chain_name: chain_name.into(),
            nodes: Vec::new(),
            properties: Properties::new(),
        }
    }

    pub fn node(&self, id: NodeId) -> Option<&ExecutionNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    /// First node running the given engine.
    pub fn node_for_engine(&self, engine: &str) -> Option<&ExecutionNode> {
        self.nodes.iter().find(|n| n.engine == engine)
    }

    /// The successive ready sets a fully successful run would produce.
    ///
    /// Nodes that can never become ready (e.g. because of a dependency
    /// cycle) appear in no layer.
    pub fn layers(&self) -> Vec<Vec<&ExecutionNode>> {
        let mut executed = std::collections::HashSet::new();
        let mut layers = Vec::new();
        loop {
            let ready = crate::dag::executable(self, &executed);
            if ready.is_empty() {
                return layers;
            }
            executed.extend(ready.iter().map(|n| n.id));
            layers.push(ready);
        }
    }
}

// ---------------------------------------------------------------------------
// EngineDescriptor
// ---------------------------------------------------------------------------

/// An available engine as seen by the plan builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineDescriptor {
    pub name: String,
    /// Lower priorities run earlier; equal priorities form one tier.
    pub priority: i32,
}

impl EngineDescriptor {
    pub fn new(name: impl Into<String>, priority: i32) -> Self {
        Self {
            name: name.into(),
            priority,
        }
    }

    /// Descriptor with [`DEFAULT_PRIORITY`].
    pub fn unprioritised(name: impl Into<String>) -> Self {
        Self::new(name, DEFAULT_PRIORITY)
    }
}

/// Properties to attach while building a plan: chain-wide ones and
/// per-engine ones keyed by engine name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanProperties {
    pub chain: Properties,
    pub engines: HashMap<String, Properties>,
}

impl PlanProperties {
    pub(crate) fn for_engine(&self, engine: &str) -> Properties {
        self.engines.get(engine).cloned().unwrap_or_default()
    }
}
