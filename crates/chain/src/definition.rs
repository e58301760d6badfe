//! JSON chain definitions.
//!
//! ```json
//! {
//!   "name": "enrich",
//!   "default": true,
//!   "properties": { "locale": "de" },
//!   "engines": [
//!     { "name": "language", "priority": 0 },
//!     { "name": "thumbnails", "priority": 10, "optional": true,
//!       "properties": { "size": 128 } }
//!   ]
//! }
//! ```
//!
//! An entry without `priority` uses the priority its engine reports, or
//! [`engines::DEFAULT_PRIORITY`] if the engine is not registered.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use engines::{EngineRegistry, Properties, DEFAULT_PRIORITY};

use crate::builder::build_plan_with_properties;
use crate::coordinator::ChainCoordinator;
use crate::models::{EngineDescriptor, ExecutionPlan, PlanProperties};
use crate::report::ChainReport;
use crate::ChainError;

/// A named, ordered set of engines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainDefinition {
    pub name: String,
    /// Whether this is the chain used when a content item names none.
    #[serde(default)]
    pub default: bool,
    #[serde(default, skip_serializing_if = "Properties::is_empty")]
    pub properties: Properties,
    pub engines: Vec<EngineEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineEntry {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    #[serde(default)]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "Properties::is_empty")]
    pub properties: Properties,
}

impl ChainDefinition {
    pub fn from_json(json: &str) -> Result<Self, ChainError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn optional_engines(&self) -> HashSet<String> {
        self.engines
            .iter()
            .filter(|e| e.optional)
            .map(|e| e.name.clone())
            .collect()
    }

    /// Build the plan for the engines `registry` currently provides.
    /// Entries the registry does not know are treated as missing.
    pub fn execution_plan(&self, registry: &dyn EngineRegistry) -> Result<ExecutionPlan, ChainError> {
        self.check_unique()?;
        let mut available = Vec::new();
        let mut missing = HashSet::new();
        for entry in &self.engines {
            match registry.lookup(&entry.name) {
                Some(engine) => available.push(EngineDescriptor::new(
                    entry.name.clone(),
                    entry.priority.unwrap_or_else(|| engine.priority()),
                )),
                None => {
                    missing.insert(entry.name.clone());
                }
            }
        }
        build_plan_with_properties(
            &self.name,
            &available,
            &self.optional_engines(),
            &missing,
            &self.plan_properties(),
        )
    }

    /// Build the plan as if every listed engine were available.
    pub fn declared_plan(&self) -> Result<ExecutionPlan, ChainError> {
        self.check_unique()?;
        let available: Vec<_> = self
            .engines
            .iter()
            .map(|e| EngineDescriptor::new(e.name.clone(), e.priority.unwrap_or(DEFAULT_PRIORITY)))
            .collect();
        build_plan_with_properties(
            &self.name,
            &available,
            &self.optional_engines(),
            &HashSet::new(),
            &self.plan_properties(),
        )
    }

    /// Build the plan against the coordinator's registry and run it, marking
    /// the chain execution as default when this definition is the default
    /// chain.
    pub async fn run(
        &self,
        coordinator: &ChainCoordinator,
        content_item_id: &str,
    ) -> Result<ChainReport, ChainError> {
        let plan = self.execution_plan(coordinator.registry())?;
        coordinator.run(&plan, content_item_id, self.default).await
    }

    fn plan_properties(&self) -> PlanProperties {
        PlanProperties {
            chain: self.properties.clone(),
            engines: self
                .engines
                .iter()
                .filter(|e| !e.properties.is_empty())
                .map(|e| (e.name.clone(), e.properties.clone()))
                .collect(),
        }
    }

    fn check_unique(&self) -> Result<(), ChainError> {
        let mut seen = HashSet::new();
        match self.engines.iter().find(|e| !seen.insert(e.name.as_str())) {
            Some(dup) => Err(ChainError::Argument(format!(
                "chain '{}' lists engine '{}' more than once",
                self.name, dup.name
            ))),
            None => Ok(()),
        }
    }
}
