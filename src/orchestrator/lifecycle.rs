//! Run lifecycle
//!
//! Phases only move forward. Terminal phases are final.

use thiserror::Error;
use tracing::info;

use crate::models::{PhaseTiming, RunPhase};
use crate::utils::Stopwatch;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("run {run_id} is already {from}; cannot move to {to}")]
    Finished {
        run_id: String,
        from: RunPhase,
        to: RunPhase,
    },

    #[error("run {run_id} cannot move back from {from} to {to}")]
    Regression {
        run_id: String,
        from: RunPhase,
        to: RunPhase,
    },
}

/// Tracks the phase of one run and how long it spent in each
#[derive(Debug)]
pub struct RunLifecycle {
    run_id: String,
    phase: RunPhase,
    stopwatch: Stopwatch,
}

impl RunLifecycle {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            phase: RunPhase::Pending,
            stopwatch: Stopwatch::new(),
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Move to `next`, which must rank strictly after the current phase
    pub fn advance(&mut self, next: RunPhase) -> Result<(), LifecycleError> {
        if self.phase.is_terminal() {
            return Err(LifecycleError::Finished {
                run_id: self.run_id.clone(),
                from: self.phase,
                to: next,
            });
        }
        if next.rank() <= self.phase.rank() {
            return Err(LifecycleError::Regression {
                run_id: self.run_id.clone(),
                from: self.phase,
                to: next,
            });
        }

        info!("Run {}: {} -> {}", self.run_id, self.phase, next);
        self.stopwatch.enter(next);
        self.phase = next;
        Ok(())
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.stopwatch.total_ms()
    }

    pub fn phase_timings(&self) -> Vec<PhaseTiming> {
        self.stopwatch.phase_timings()
    }
}
