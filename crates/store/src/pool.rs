//! Shared store pool.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::{ChainExecutionRow, EngineExecutionRow, PlanRow};
use crate::StoreError;

/// Every row the store knows about.
#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct Tables {
    pub plans: HashMap<Uuid, PlanRow>,
    pub chain_executions: HashMap<Uuid, ChainExecutionRow>,
    /// chain_execution_id → node_id → row
    pub engine_executions: HashMap<Uuid, HashMap<Uuid, EngineExecutionRow>>,
}

/// Cheaply cloneable handle shared across the whole application.
#[derive(Debug, Clone, Default)]
pub struct StorePool {
    tables: Arc<RwLock<Tables>>,
    snapshot: Option<PathBuf>,
}

impl StorePool {
    pub(crate) fn tables(&self) -> &RwLock<Tables> {
        &self.tables
    }

    /// Path of the JSON snapshot backing this pool, if any.
    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot.as_deref()
    }

    /// Write all tables to the snapshot file. No-op for in-memory pools.
    ///
    /// The snapshot is written to a sibling temp file first and then renamed
    /// over the old one.
    pub async fn flush(&self) -> Result<(), StoreError> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };
        let bytes = {
            let tables = self.tables.read().await;
            serde_json::to_vec_pretty(&*tables)?
        };
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        debug!("store snapshot written to {}", path.display());
        Ok(())
    }
}

/// Create a pool that lives only as long as the process.
pub fn in_memory() -> StorePool {
    StorePool::default()
}

/// Create a pool backed by the JSON snapshot at `path`.
///
/// An existing snapshot is loaded; a missing file starts an empty store that
/// is created on the first [`StorePool::flush`].
pub async fn create_pool(path: impl AsRef<Path>) -> Result<StorePool, StoreError> {
    let path = path.as_ref().to_path_buf();
    let tables = match tokio::fs::read(&path).await {
        Ok(bytes) => {
            let tables: Tables = serde_json::from_slice(&bytes)?;
            info!(
                "Loaded store snapshot {} ({} chain executions)",
                path.display(),
                tables.chain_executions.len()
            );
            tables
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("No store snapshot at {}, starting empty", path.display());
            Tables::default()
        }
        Err(e) => return Err(e.into()),
    };

    Ok(StorePool {
        tables: Arc::new(RwLock::new(tables)),
        snapshot: Some(path),
    })
}
