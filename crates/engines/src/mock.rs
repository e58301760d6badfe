//! `MockEngine` — a test double for `Engine`.
//!
//! Useful in unit and integration tests where a real engine implementation
//! is either unavailable or irrelevant. Clones share the recorded calls, so
//! a test can keep one handle and register another.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Barrier;

use crate::{Engine, InvocationContext, InvokeError, DEFAULT_PRIORITY};

/// Behaviour injected into `MockEngine` at construction time.
#[derive(Clone)]
pub enum MockBehaviour {
    /// Return `Ok(())` immediately.
    Succeed,
    /// Fail with the given message.
    Fail(String),
    /// Panic with the given message.
    Panic(String),
    /// Sleep for the given duration, then succeed. Honors cancellation.
    Sleep(Duration),
    /// Never finish on its own; returns `Cancelled` once the context is cancelled.
    HangUntilCancelled,
    /// Wait on the barrier, then succeed. Deadlocks unless enough engines
    /// reach the barrier concurrently.
    Rendezvous(Arc<Barrier>),
}

/// A mock engine that records every call it receives and behaves as
/// programmed.
#[derive(Clone)]
pub struct MockEngine {
    /// Label used in test assertions.
    pub name: String,
    /// What the engine will do when `invoke` is called.
    pub behaviour: MockBehaviour,
    /// Priority reported through [`Engine::priority`].
    pub priority: i32,
    /// Content item ids seen by this engine (in call order).
    pub calls: Arc<Mutex<Vec<String>>>,
    /// Invocation contexts, parallel to `calls`.
    pub contexts: Arc<Mutex<Vec<InvocationContext>>>,
}

impl MockEngine {
    fn with_behaviour(name: impl Into<String>, behaviour: MockBehaviour) -> Self {
        Self {
            name: name.into(),
            behaviour,
            priority: DEFAULT_PRIORITY,
            calls: Arc::new(Mutex::new(Vec::new())),
            contexts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a mock that always succeeds.
    pub fn succeeding(name: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::Succeed)
    }

    /// Create a mock that always fails with `msg`.
    pub fn failing(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::Fail(msg.into()))
    }

    /// Create a mock that panics with `msg`.
    pub fn panicking(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::Panic(msg.into()))
    }

    /// Create a mock that sleeps before succeeding.
    pub fn sleeping(name: impl Into<String>, duration: Duration) -> Self {
        Self::with_behaviour(name, MockBehaviour::Sleep(duration))
    }

    /// Create a mock that only returns once cancelled.
    pub fn hanging(name: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::HangUntilCancelled)
    }

    /// Create a mock that waits on `barrier` before succeeding.
    pub fn rendezvous(name: impl Into<String>, barrier: Arc<Barrier>) -> Self {
        Self::with_behaviour(name, MockBehaviour::Rendezvous(barrier))
    }

    /// Override the reported priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Context of the most recent invocation.
    pub fn last_context(&self) -> Option<InvocationContext> {
        self.contexts.lock().unwrap_or_else(|e| e.into_inner()).last().cloned()
    }

    /// Number of times this engine has been invoked.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl Engine for MockEngine {
    async fn invoke(
        &self,
        content_item_id: &str,
        ctx: &InvocationContext,
    ) -> Result<(), InvokeError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(content_item_id.to_owned());
        self.contexts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(ctx.clone());

        match &self.behaviour {
            MockBehaviour::Succeed => Ok(()),
            MockBehaviour::Fail(msg) => Err(InvokeError::Failed(msg.clone())),
            MockBehaviour::Panic(msg) => panic!("{msg}"),
            MockBehaviour::Sleep(duration) => {
                tokio::select! {
                    _ = tokio::time::sleep(*duration) => Ok(()),
                    _ = ctx.cancellation.cancelled() => Err(InvokeError::Cancelled),
                }
            }
            MockBehaviour::HangUntilCancelled => {
                ctx.cancellation.cancelled().await;
                Err(InvokeError::Cancelled)
            }
            MockBehaviour::Rendezvous(barrier) => {
                barrier.wait().await;
                Ok(())
            }
        }
    }

    fn priority(&self) -> i32 {
        self.priority
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Properties;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    fn ctx() -> InvocationContext {
        InvocationContext {
            chain_execution_id: Uuid::new_v4(),
            chain_name: "test".into(),
            engine_name: "mock".into(),
            chain_properties: Properties::new(),
            properties: Properties::new(),
            cancellation: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn failing_mock_records_call_and_returns_error() {
        let engine = MockEngine::failing("lang", "no text");
        let result = engine.invoke("urn:item:1", &ctx()).await;

        assert_eq!(result, Err(InvokeError::Failed("no text".into())));
        assert_eq!(engine.call_count(), 1);
        assert_eq!(engine.calls.lock().unwrap()[0], "urn:item:1");
    }

    #[tokio::test]
    async fn clones_share_recorded_calls() {
        let engine = MockEngine::succeeding("ner");
        let registered = engine.clone();

        registered.invoke("urn:item:2", &ctx()).await.expect("succeeds");
        assert_eq!(engine.call_count(), 1);
    }

    #[tokio::test]
    async fn records_the_context_it_was_invoked_with() {
        let engine = MockEngine::succeeding("thumbs");
        let mut ctx = ctx();
        ctx.properties.insert("size".into(), json!(128));

        engine.invoke("urn:item:4", &ctx).await.expect("succeeds");
        let seen = engine.last_context().expect("recorded");
        assert_eq!(seen.properties.get("size"), Some(&json!(128)));
        assert!(seen.chain_properties.is_empty());
    }

    #[tokio::test]
    async fn hanging_mock_returns_cancelled_once_token_fires() {
        let engine = MockEngine::hanging("slow");
        let ctx = ctx();
        ctx.cancellation.cancel();

        assert_eq!(engine.invoke("urn:item:3", &ctx).await, Err(InvokeError::Cancelled));
    }

    #[test]
    fn map_registry_resolves_registered_names_only() {
        use crate::{EngineMap, EngineRegistry};

        let mut map = EngineMap::new();
        map.insert("ner".into(), Arc::new(MockEngine::succeeding("ner").with_priority(5)));

        let found = map.lookup("ner").expect("registered");
        assert_eq!(found.priority(), 5);
        assert!(map.lookup("missing").is_none());
    }
}
