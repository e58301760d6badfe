//! `chain` crate — execution plans, execution metadata and the coordinator
//! that runs a chain of engines against a content item.

pub mod models;
pub mod error;
pub mod builder;
pub mod dag;
pub mod policy;
pub mod metadata;
pub mod report;
pub mod definition;
pub mod coordinator;

pub use models::{EngineDescriptor, ExecutionNode, ExecutionPlan, NodeId, PlanProperties};
pub use error::ChainError;
pub use builder::{build_plan, build_plan_with_properties};
pub use dag::{executable, validate_plan};
pub use policy::{propagation, Propagation};
pub use metadata::{ChainExecution, EngineExecution, ExecutionMetadata, ExecutionStatus};
pub use report::{ChainOutcome, ChainReport, NodeReport};
pub use definition::{ChainDefinition, EngineEntry};
pub use coordinator::{ChainCoordinator, CoordinatorConfig};
