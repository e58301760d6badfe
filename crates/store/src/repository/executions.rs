//! Chain-execution and engine-execution repository functions.

use uuid::Uuid;

use crate::{
    models::{ChainExecutionRow, EngineExecutionRow},
    StoreError, StoreResult, StorePool,
};

// ---------------------------------------------------------------------------
// chain_executions
// ---------------------------------------------------------------------------

/// Insert or replace a chain execution row.
pub async fn upsert_chain_execution(pool: &StorePool, row: &ChainExecutionRow) -> StoreResult<()> {
    let mut tables = pool.tables().write().await;
    tables.chain_executions.insert(row.id, row.clone());
    tables.engine_executions.entry(row.id).or_default();
    Ok(())
}

/// Fetch a single chain execution by its primary key.
pub async fn get_chain_execution(pool: &StorePool, id: Uuid) -> StoreResult<ChainExecutionRow> {
    let tables = pool.tables().read().await;
    tables.chain_executions.get(&id).cloned().ok_or(StoreError::NotFound)
}

/// Return the most recently created chain execution for a content item.
pub async fn find_chain_execution_for_content_item(
    pool: &StorePool,
    content_item_id: &str,
) -> StoreResult<Option<ChainExecutionRow>> {
    let tables = pool.tables().read().await;
    let row = tables
        .chain_executions
        .values()
        .filter(|r| r.content_item_id == content_item_id)
        .max_by_key(|r| r.created_at)
        .cloned();
    Ok(row)
}

/// Permanently delete a chain execution together with its engine executions.
///
/// Returns `StoreError::NotFound` if no row was deleted.
pub async fn delete_chain_execution(pool: &StorePool, id: Uuid) -> StoreResult<()> {
    let mut tables = pool.tables().write().await;
    tables.engine_executions.remove(&id);
    if tables.chain_executions.remove(&id).is_none() {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// engine_executions
// ---------------------------------------------------------------------------

/// Insert or replace the engine execution for `(row.chain_execution_id, row.node_id)`.
///
/// Returns `StoreError::NotFound` if the owning chain execution does not exist.
pub async fn upsert_engine_execution(pool: &StorePool, row: &EngineExecutionRow) -> StoreResult<()> {
    let mut tables = pool.tables().write().await;
    if !tables.chain_executions.contains_key(&row.chain_execution_id) {
        return Err(StoreError::NotFound);
    }
    tables
        .engine_executions
        .entry(row.chain_execution_id)
        .or_default()
        .insert(row.node_id, row.clone());
    Ok(())
}

/// Return all engine executions of a chain execution, ordered by node id.
pub async fn list_engine_executions(
    pool: &StorePool,
    chain_execution_id: Uuid,
) -> StoreResult<Vec<EngineExecutionRow>> {
    let tables = pool.tables().read().await;
    let mut rows: Vec<EngineExecutionRow> = tables
        .engine_executions
        .get(&chain_execution_id)
        .map(|m| m.values().cloned().collect())
        .unwrap_or_default();
    rows.sort_by_key(|r| r.node_id);
    Ok(rows)
}
