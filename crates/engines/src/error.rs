//! Engine-level error type.

use std::time::Duration;

use thiserror::Error;

/// Errors returned by an engine's `invoke` method.
///
/// The chain coordinator records any of these on the node's engine execution
/// as `Failed`; whether the chain continues depends on the node being
/// optional or required.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvokeError {
    /// The engine was unable to process the content item.
    #[error("{0}")]
    Failed(String),

    /// The invocation observed a cancellation of its chain execution.
    #[error("invocation was cancelled")]
    Cancelled,

    /// The invocation did not finish within the configured deadline.
    #[error("invocation timed out after {0:?}")]
    TimedOut(Duration),
}

impl InvokeError {
    /// Shorthand for [`InvokeError::Failed`].
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}
