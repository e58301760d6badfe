//! `store` crate — pure persistence layer.
//!
//! Provides a shared pool over an in-memory table set (optionally snapshotted
//! to a JSON file), typed row structs, and repository functions for plans,
//! chain executions and engine executions. No business logic lives here.

pub mod error;
pub mod pool;
pub mod repository;
pub mod models;

pub use pool::StorePool;
pub use error::StoreError;
pub use models::ExecutionStatus;

/// Result alias used by every repository function.
pub type StoreResult<T> = Result<T, StoreError>;
