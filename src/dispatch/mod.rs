//! Dispatch queue.
//!
//! Accepts "run task N" requests and executes them on a bounded pool of
//! workers. At most one execution per task is active at a time; a request
//! for a task that is already running is coalesced into a single follow-up
//! pass once the current one ends.

mod handle;
mod types;
mod worker;

pub use handle::DispatchHandle;
pub use types::{DispatchError, EnqueueOutcome};
pub use worker::{DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKER_CONCURRENCY, Dispatcher};
