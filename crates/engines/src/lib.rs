//! `engines` crate — the `Engine` and `EngineRegistry` contracts plus a
//! test double.
//!
//! Engines are supplied from outside the orchestration core; the `chain`
//! crate only ever dispatches through these traits.

pub mod error;
pub mod traits;
pub mod mock;

pub use error::InvokeError;
pub use traits::{Engine, EngineMap, EngineRegistry, InvocationContext, Properties, DEFAULT_PRIORITY};
