//! Test execution
//!
//! Worker pool, unit runners, and the run timeout guard.

mod pool;
mod runner;
mod timeout;

pub use pool::{Parallelism, WorkerPool, DEFAULT_DRAIN_GRACE};
pub use runner::{CommandRunner, UnitRunner, INTERRUPTED};
pub use timeout::{Guarded, TimeoutGuard, DEFAULT_CEILING};

#[cfg(test)]
pub(crate) use runner::FnRunner;
