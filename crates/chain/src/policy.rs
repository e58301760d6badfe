//! Partial-failure propagation.
//!
//! | node     | status                  | effect                              |
//! |----------|-------------------------|-------------------------------------|
//! | any      | `Completed`             | executed, dependents may run        |
//! | optional | `Failed` / `Skipped`    | executed, dependents may run        |
//! | required | `Failed` / `Skipped`    | chain aborts, no further ready sets |
//! | any      | `Scheduled`/`InProgress`| not executed yet                    |

use store::ExecutionStatus;

/// What a node's final status means for the rest of the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    /// The node has not finished.
    Pending,
    /// The node counts as executed; dependents may run.
    Proceed,
    /// The chain must stop.
    Abort,
}

pub fn propagation(optional: bool, status: ExecutionStatus) -> Propagation {
    use ExecutionStatus::*;
    match (optional, status) {
        (_, Scheduled | InProgress) => Propagation::Pending,
        (_, Completed) => Propagation::Proceed,
        (true, Failed | Skipped) => Propagation::Proceed,
        (false, Failed | Skipped) => Propagation::Abort,
    }
}
