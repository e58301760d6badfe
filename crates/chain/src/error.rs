//! Chain-level error types.

use thiserror::Error;

/// Errors produced while building, validating, tracking or running a chain.
#[derive(Debug, Error)]
pub enum ChainError {
    // ------ Plan errors ------

    /// The execution plan is malformed (empty engine name, duplicate node
    /// id, dangling dependency). Raised before anything executes.
    #[error("execution node '{node_id}' is malformed: {reason}")]
    Structural {
        node_id: String,
        reason: String,
    },

    // ------ Metadata errors ------

    /// Execution metadata disagree with the plan they are used with.
    #[error("inconsistent execution state: {0}")]
    State(String),

    /// A metadata or builder call received an invalid argument.
    #[error("invalid argument: {0}")]
    Argument(String),

    // ------ Execution errors ------

    /// A required engine failed and the chain was aborted.
    #[error("engine '{engine}' failed: {message}")]
    EngineInvocation {
        engine: String,
        message: String,
    },

    /// The chain execution was cancelled before it finished.
    #[error("chain execution was cancelled")]
    Cancelled,

    // ------ Collaborator errors ------

    /// Plan or definition could not be (de)serialised.
    #[error("serialisation error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Persistence error from the store crate.
    #[error("store error: {0}")]
    Store(#[from] store::StoreError),
}

impl ChainError {
    pub(crate) fn structural(node_id: impl ToString, reason: impl Into<String>) -> Self {
        Self::Structural {
            node_id: node_id.to_string(),
            reason: reason.into(),
        }
    }
}
