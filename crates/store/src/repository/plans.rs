//! Plan storage.

use chrono::Utc;
use uuid::Uuid;

use crate::{models::PlanRow, StoreResult, StorePool};

/// Insert or replace the plan stored under `id`.
///
/// `definition` must be the JSON form of the domain `ExecutionPlan` from
/// the `chain` crate.
pub async fn save_plan(
    pool: &StorePool,
    id: Uuid,
    chain_name: &str,
    definition: serde_json::Value,
) -> StoreResult<PlanRow> {
    let mut tables = pool.tables().write().await;
    let created_at = tables
        .plans
        .get(&id)
        .map(|existing| existing.created_at)
        .unwrap_or_else(Utc::now);

    let row = PlanRow {
        id,
        chain_name: chain_name.to_owned(),
        definition,
        created_at,
    };
    tables.plans.insert(id, row.clone());
    Ok(row)
}

/// Fetch a single plan by its primary key.
pub async fn get_plan(pool: &StorePool, id: Uuid) -> StoreResult<PlanRow> {
    let tables = pool.tables().read().await;
    tables.plans.get(&id).cloned().ok_or(crate::StoreError::NotFound)
}

/// Return all plans for a chain, newest first.
pub async fn list_plans_for_chain(pool: &StorePool, chain_name: &str) -> StoreResult<Vec<PlanRow>> {
    let tables = pool.tables().read().await;
    let mut rows: Vec<PlanRow> = tables
        .plans
        .values()
        .filter(|p| p.chain_name == chain_name)
        .cloned()
        .collect();
    rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(rows)
}
