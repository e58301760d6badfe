//! Chain execution coordinator.
//!
//! `ChainCoordinator` drives one chain execution to its end:
//! 1. Validates the plan.
//! 2. Resolves every node's engine; a missing required engine is fatal
//!    before anything runs.
//! 3. Creates fresh execution metadata, or resumes the stored metadata of
//!    the content item.
//! 4. Repeatedly computes the ready set, runs its nodes concurrently (one
//!    task per node, joined before the next round) and records the outcome
//!    of each node.
//! 5. Stops when nothing is ready, a required node failed, or the run was
//!    cancelled.
//!
//! Every state change is written to the store as it happens, so partial
//! state stays inspectable after an abort.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use engines::{Engine, EngineRegistry, InvocationContext, InvokeError};
use store::models::EngineExecutionRow;
use store::repository::{executions, plans};
use store::{StoreError, StorePool};

use crate::dag::{executable, validate_plan};
use crate::metadata::{EngineExecution, ExecutionMetadata};
use crate::models::{ExecutionNode, ExecutionPlan, NodeId};
use crate::policy::{propagation, Propagation};
use crate::report::{first_abort, unfinished_required, ChainOutcome, ChainReport, CANCELLED_MESSAGE};
use crate::ChainError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for the coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Deadline for a single engine invocation. `None` waits forever.
    pub engine_timeout: Option<Duration>,
    /// Upper bound on engines running at the same time.
    pub max_parallel_engines: usize,
    /// Continue the stored chain execution of a content item instead of
    /// starting a new one.
    pub resume_existing: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            engine_timeout: Some(Duration::from_secs(60)),
            max_parallel_engines: 8,
            resume_existing: true,
        }
    }
}

// ---------------------------------------------------------------------------
// ChainCoordinator
// ---------------------------------------------------------------------------

/// Runs execution plans against content items.
pub struct ChainCoordinator {
    pool: StorePool,
    registry: Arc<dyn EngineRegistry>,
    config: CoordinatorConfig,
}

impl ChainCoordinator {
    pub fn new(pool: StorePool, registry: Arc<dyn EngineRegistry>, config: CoordinatorConfig) -> Self {
        Self { pool, registry, config }
    }

    pub fn pool(&self) -> &StorePool {
        &self.pool
    }

    pub fn registry(&self) -> &dyn EngineRegistry {
        self.registry.as_ref()
    }

    /// Run `plan` against `content_item_id` until it completes or aborts.
    ///
    /// An aborted run is still `Ok`: the report names the failing engine and
    /// [`ChainReport::error`] turns it into a [`ChainError`].
    ///
    /// # Errors
    /// Structural plan errors, unavailable required engines, metadata that
    /// cannot be resumed against `plan`, and store failures.
    pub async fn run(
        &self,
        plan: &ExecutionPlan,
        content_item_id: &str,
        is_default_chain: bool,
    ) -> Result<ChainReport, ChainError> {
        self.run_with_cancellation(plan, content_item_id, is_default_chain, CancellationToken::new())
            .await
    }

    /// Like [`ChainCoordinator::run`]; cancelling `cancel` stops the run
    /// after the in-flight engines returned or observed the cancellation.
    #[instrument(skip(self, plan, cancel), fields(chain = %plan.chain_name))]
    pub async fn run_with_cancellation(
        &self,
        plan: &ExecutionPlan,
        content_item_id: &str,
        is_default_chain: bool,
        cancel: CancellationToken,
    ) -> Result<ChainReport, ChainError> {
        let engine_names = validate_plan(plan)?;
        info!(
            "plan validated: {} nodes using engines {:?}",
            plan.nodes.len(),
            engine_names
        );

        let engines = self.resolve_engines(plan)?;

        let mut metadata = self.load_or_create(plan, content_item_id, is_default_chain).await?;
        plans::save_plan(&self.pool, plan.id, &plan.chain_name, serde_json::to_value(plan)?).await?;

        metadata.chain_mut().mark_in_progress();
        self.persist_all(&metadata).await?;

        let outcome = self.drive(plan, &engines, &mut metadata, &cancel).await?;

        match &outcome {
            ChainOutcome::Completed => {
                metadata.chain_mut().mark_completed();
                info!("chain execution {} completed", metadata.chain().id);
            }
            ChainOutcome::Aborted { engine, message, .. } => {
                metadata.chain_mut().mark_failed(format!(
                    "chain failed because required engine '{engine}' failed: {message}"
                ));
                error!("chain execution {} aborted by engine '{}'", metadata.chain().id, engine);
            }
            ChainOutcome::Cancelled => {
                metadata.chain_mut().mark_failed(CANCELLED_MESSAGE.to_owned());
                warn!("chain execution {} cancelled", metadata.chain().id);
            }
            ChainOutcome::Stalled { engines } => {
                metadata.chain_mut().mark_failed(format!(
                    "chain stalled: required engines {engines:?} never became executable"
                ));
                error!("chain execution {} stalled on {:?}", metadata.chain().id, engines);
            }
            ChainOutcome::Unfinished => {}
        }
        self.persist_chain(&metadata).await?;
        self.pool.flush().await?;

        Ok(ChainReport::new(plan, &metadata, outcome))
    }

    // -----------------------------------------------------------------------
    // Internal: setup
    // -----------------------------------------------------------------------

    fn resolve_engines(&self, plan: &ExecutionPlan) -> Result<HashMap<NodeId, Arc<dyn Engine>>, ChainError> {
        let mut resolved = HashMap::with_capacity(plan.nodes.len());
        for node in &plan.nodes {
            match self.registry.lookup(&node.engine) {
                Some(engine) => {
                    resolved.insert(node.id, engine);
                }
                None if node.optional => {
                    warn!("optional engine '{}' is not available and will be skipped", node.engine);
                }
                None => {
                    return Err(ChainError::State(format!(
                        "required engine '{}' of chain '{}' is not available",
                        node.engine, plan.chain_name
                    )));
                }
            }
        }
        Ok(resolved)
    }

    async fn load_or_create(
        &self,
        plan: &ExecutionPlan,
        content_item_id: &str,
        is_default_chain: bool,
    ) -> Result<ExecutionMetadata, ChainError> {
        if self.config.resume_existing {
            if let Some(row) =
                executions::find_chain_execution_for_content_item(&self.pool, content_item_id).await?
            {
                let rows = executions::list_engine_executions(&self.pool, row.id).await?;
                info!("resuming chain execution {} for '{}'", row.id, content_item_id);
                let mut existing = ExecutionMetadata::from_rows(row, rows);
                if existing.chain().plan_id != plan.id {
                    if let Some(stored) = self.stored_plan(existing.chain().plan_id).await? {
                        existing.rebind_to_plan(&stored, plan);
                    }
                }
                return ExecutionMetadata::initialize_from_existing(existing, plan, content_item_id);
            }
        }
        Ok(ExecutionMetadata::create_chain_execution(plan, content_item_id, is_default_chain))
    }

    /// The plan a stored chain execution was last run with, if it is still
    /// in the store.
    async fn stored_plan(&self, plan_id: Uuid) -> Result<Option<ExecutionPlan>, ChainError> {
        match plans::get_plan(&self.pool, plan_id).await {
            Ok(row) => Ok(Some(serde_json::from_value(row.definition)?)),
            Err(StoreError::NotFound) => {
                warn!("plan {} of the stored chain execution is gone", plan_id);
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    // -----------------------------------------------------------------------
    // Internal: scheduling rounds
    // -----------------------------------------------------------------------

    async fn drive(
        &self,
        plan: &ExecutionPlan,
        engines: &HashMap<NodeId, Arc<dyn Engine>>,
        metadata: &mut ExecutionMetadata,
        cancel: &CancellationToken,
    ) -> Result<ChainOutcome, ChainError> {
        let permits = self.config.max_parallel_engines.clamp(1, Semaphore::MAX_PERMITS);
        let semaphore = Arc::new(Semaphore::new(permits));
        let chain_execution_id = metadata.chain().id;
        let content_item_id = metadata.chain().content_item_id.clone();
        let mut executed = metadata.executed_nodes(plan);
        let mut round = 0usize;

        loop {
            if cancel.is_cancelled() {
                return Ok(ChainOutcome::Cancelled);
            }

            let ready = executable(plan, &executed);
            if ready.is_empty() {
                let stalled = unfinished_required(plan, metadata);
                return Ok(if stalled.is_empty() {
                    ChainOutcome::Completed
                } else {
                    ChainOutcome::Stalled { engines: stalled }
                });
            }
            round += 1;
            debug!(
                "round {}: ready set {:?}",
                round,
                ready.iter().map(|n| n.engine.as_str()).collect::<Vec<_>>()
            );

            // Record the start of every node before spawning any of them, so
            // a store failure here leaves no task behind.
            let mut launch = Vec::with_capacity(ready.len());
            for node in &ready {
                let record = metadata.ensure_engine_execution(node);
                match engines.get(&node.id) {
                    Some(engine) => {
                        record.start()?;
                        self.persist_engine(record).await?;
                        launch.push((*node, Arc::clone(engine)));
                    }
                    None => {
                        record.skip(Some(failure_message(
                            &content_item_id,
                            &node.engine,
                            "is currently not active",
                        )));
                        self.persist_engine(record).await?;
                    }
                }
            }

            let round_cancel = cancel.child_token();
            let mut in_flight = launch
                .into_iter()
                .map(|(node, engine)| {
                    let task = NodeTask {
                        engine,
                        content_item_id: content_item_id.clone(),
                        ctx: InvocationContext {
                            chain_execution_id,
                            chain_name: plan.chain_name.clone(),
                            engine_name: node.engine.clone(),
                            chain_properties: plan.properties.clone(),
                            properties: node.properties.clone(),
                            cancellation: round_cancel.child_token(),
                        },
                        semaphore: Arc::clone(&semaphore),
                        timeout: self.config.engine_timeout,
                    };
                    (node, tokio::spawn(task.run()))
                })
                .collect::<Vec<_>>()
                .into_iter();

            // Join them and record their outcome.
            while let Some((node, handle)) = in_flight.next() {
                let result = match handle.await {
                    Ok(result) => result,
                    Err(join_err) if join_err.is_panic() => Err(InvokeError::Failed(format!(
                        "engine panicked: {}",
                        panic_message(join_err.into_panic())
                    ))),
                    Err(join_err) => Err(InvokeError::Failed(join_err.to_string())),
                };
                if let Err(err) = self.record_result(node, result, metadata, &content_item_id).await {
                    round_cancel.cancel();
                    for (_, rest) in in_flight {
                        let _ = rest.await;
                    }
                    return Err(err);
                }
            }

            for node in &ready {
                let proceed = metadata
                    .engine_execution(node.id)
                    .is_some_and(|e| propagation(node.optional, e.status()) == Propagation::Proceed);
                if proceed {
                    executed.insert(node.id);
                }
            }

            if cancel.is_cancelled() {
                return Ok(ChainOutcome::Cancelled);
            }
            if let Some(aborted) = first_abort(plan, metadata) {
                return Ok(aborted);
            }
        }
    }

    async fn record_result(
        &self,
        node: &ExecutionNode,
        result: Result<(), InvokeError>,
        metadata: &mut ExecutionMetadata,
        content_item_id: &str,
    ) -> Result<(), ChainError> {
        let record = metadata.ensure_engine_execution(node);
        match result {
            Ok(()) => {
                record.complete(None)?;
                info!("engine '{}' completed", node.engine);
            }
            Err(err) => {
                let reason = format!("was unable to process the content (reason: {err})");
                record.fail(failure_message(content_item_id, &node.engine, &reason))?;
                if node.optional {
                    warn!("optional engine '{}' failed: {}", node.engine, err);
                } else {
                    error!("required engine '{}' failed: {}", node.engine, err);
                }
            }
        }
        self.persist_engine(record).await
    }

    // -----------------------------------------------------------------------
    // Internal: persistence
    // -----------------------------------------------------------------------

    async fn persist_chain(&self, metadata: &ExecutionMetadata) -> Result<(), ChainError> {
        executions::upsert_chain_execution(&self.pool, &metadata.chain_row()).await?;
        Ok(())
    }

    async fn persist_engine(&self, record: &EngineExecution) -> Result<(), ChainError> {
        executions::upsert_engine_execution(&self.pool, &EngineExecutionRow::from(record)).await?;
        Ok(())
    }

    async fn persist_all(&self, metadata: &ExecutionMetadata) -> Result<(), ChainError> {
        self.persist_chain(metadata).await?;
        for record in metadata.engine_executions() {
            self.persist_engine(record).await?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Node tasks
// ---------------------------------------------------------------------------

/// Everything one spawned engine invocation needs.
struct NodeTask {
    engine: Arc<dyn Engine>,
    content_item_id: String,
    ctx: InvocationContext,
    semaphore: Arc<Semaphore>,
    timeout: Option<Duration>,
}

impl NodeTask {
    async fn run(self) -> Result<(), InvokeError> {
        let Ok(_permit) = self.semaphore.acquire_owned().await else {
            return Err(InvokeError::Cancelled);
        };
        if self.ctx.cancellation.is_cancelled() {
            return Err(InvokeError::Cancelled);
        }

        tokio::select! {
            result = self.engine.invoke(&self.content_item_id, &self.ctx) => result,
            _ = self.ctx.cancellation.cancelled() => Err(InvokeError::Cancelled),
            elapsed = deadline(self.timeout) => {
                self.ctx.cancellation.cancel();
                Err(InvokeError::TimedOut(elapsed))
            }
        }
    }
}

async fn deadline(timeout: Option<Duration>) -> Duration {
    match timeout {
        Some(d) => {
            tokio::time::sleep(d).await;
            d
        }
        None => std::future::pending().await,
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

fn failure_message(content_item_id: &str, engine: &str, reason: &str) -> String {
    format!("unable to process content item '{content_item_id}' with engine '{engine}' because the engine {reason}")
}
