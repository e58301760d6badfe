//! Repository functions — one function per store operation.
//!
//! Every function takes a `&StorePool` and returns a `Result<T, StoreError>`.
//! No business logic, no domain types — rows only.

pub mod plans;
pub mod executions;
