//! Run timeout guard
//!
//! Bounds an execution by a wall-clock ceiling. On expiry the run's handle is
//! cancelled with `TimedOut`, the same signal admission uses, and the
//! execution is allowed to drain so partial results are kept.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::admission::{CancelReason, RunHandle};

/// Default ceiling for one run (30 minutes)
pub const DEFAULT_CEILING: Duration = Duration::from_secs(30 * 60);

/// Output of a guarded execution
#[derive(Debug)]
pub struct Guarded<T> {
    pub value: T,
    pub timed_out: bool,
}

/// Wall-clock ceiling for one execution
#[derive(Clone, Copy, Debug)]
pub struct TimeoutGuard {
    ceiling: Duration,
}

impl TimeoutGuard {
    pub fn new(ceiling: Duration) -> Self {
        Self { ceiling }
    }

    pub fn ceiling(&self) -> Duration {
        self.ceiling
    }

    /// Drive `execution` to completion, cancelling `handle` if the ceiling passes first.
    ///
    /// `timed_out` is only set when the timeout was the run's first
    /// cancellation reason; a run already superseded stays superseded.
    pub async fn guard<F>(&self, handle: &RunHandle, execution: F) -> Guarded<F::Output>
    where
        F: Future,
    {
        tokio::pin!(execution);

        tokio::select! {
            value = &mut execution => Guarded { value, timed_out: false },
            _ = tokio::time::sleep(self.ceiling) => {
                if handle.cancel(CancelReason::TimedOut) {
                    warn!(
                        "Run {} exceeded its {}ms ceiling; cancelling remaining units",
                        handle.run_id(),
                        self.ceiling.as_millis()
                    );
                }
                let value = execution.await;
                Guarded {
                    value,
                    timed_out: handle.cancel_reason() == Some(CancelReason::TimedOut),
                }
            }
        }
    }
}

impl Default for TimeoutGuard {
    fn default() -> Self {
        Self::new(DEFAULT_CEILING)
    }
}
