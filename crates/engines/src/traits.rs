//! The `Engine` and `EngineRegistry` traits — the contracts every engine
//! and engine lookup must fulfil.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::InvokeError;

/// Priority assumed for engines that do not declare one.
pub const DEFAULT_PRIORITY: i32 = 0;

/// Free-form configuration attached to a chain or to one of its engines.
pub type Properties = BTreeMap<String, serde_json::Value>;

/// Context passed to every engine invocation.
///
/// Defined here (in the engines crate) so both the chain coordinator and
/// individual engine implementations can import it without a circular
/// dependency.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    /// ID of the chain execution this invocation belongs to.
    pub chain_execution_id: Uuid,
    /// Name of the chain being executed.
    pub chain_name: String,
    /// Name under which the engine was looked up.
    pub engine_name: String,
    /// Properties configured for the chain as a whole.
    pub chain_properties: Properties,
    /// Properties configured for this engine within the chain.
    pub properties: Properties,
    /// Cancelled when the chain execution is cancelled or the engine's
    /// deadline passes. Long running engines should poll or select on it.
    pub cancellation: CancellationToken,
}

/// An opaque, invocable unit of work run against a content item.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Process the content item identified by `content_item_id`.
    async fn invoke(
        &self,
        content_item_id: &str,
        ctx: &InvocationContext,
    ) -> Result<(), InvokeError>;

    /// Ordering hint used when a chain does not configure a priority.
    /// Lower values run earlier.
    fn priority(&self) -> i32 {
        DEFAULT_PRIORITY
    }
}

/// Resolves engine names to invocable engines.
pub trait EngineRegistry: Send + Sync {
    /// Return the engine registered under `name`, if any.
    fn lookup(&self, name: &str) -> Option<Arc<dyn Engine>>;
}

/// Maps engine names to shared `Engine` implementations.
pub type EngineMap = HashMap<String, Arc<dyn Engine>>;

impl EngineRegistry for EngineMap {
    fn lookup(&self, name: &str) -> Option<Arc<dyn Engine>> {
        self.get(name).cloned()
    }
}

impl<R: EngineRegistry + ?Sized> EngineRegistry for Arc<R> {
    fn lookup(&self, name: &str) -> Option<Arc<dyn Engine>> {
        (**self).lookup(name)
    }
}
