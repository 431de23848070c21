//! Timer utilities
//!
//! Provides timing and measurement helpers.

use std::time::{Duration, Instant};

use crate::models::{PhaseTiming, RunPhase};

/// Simple timer for measuring elapsed time
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    label: String,
}

impl Timer {
    /// Create and start a new timer
    pub fn start(label: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            label: label.into(),
        }
    }

    /// Get elapsed time
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Get elapsed time in milliseconds
    pub fn elapsed_ms(&self) -> u64 {
        millis(self.elapsed())
    }

    /// Stop timer and return elapsed milliseconds
    pub fn stop(self) -> u64 {
        let elapsed = self.elapsed_ms();
        tracing::debug!("{}: {}ms", self.label, elapsed);
        elapsed
    }
}

/// Stopwatch that records how long a run spent in each phase
#[derive(Debug)]
pub struct Stopwatch {
    start: Instant,
    current: Option<(RunPhase, Instant)>,
    laps: Vec<(RunPhase, Duration)>,
}

impl Stopwatch {
    /// Create a new stopwatch
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            current: None,
            laps: Vec::new(),
        }
    }

    /// Close the current phase (if any) and start timing `phase`
    pub fn enter(&mut self, phase: RunPhase) {
        let now = Instant::now();
        if let Some((previous, since)) = self.current.take() {
            self.laps.push((previous, now - since));
        }
        if !phase.is_terminal() {
            self.current = Some((phase, now));
        }
    }

    /// Get total elapsed time
    pub fn total(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn total_ms(&self) -> u64 {
        millis(self.total())
    }

    /// Closed phases with their durations
    pub fn phase_timings(&self) -> Vec<PhaseTiming> {
        self.laps
            .iter()
            .map(|(phase, duration)| PhaseTiming {
                phase: *phase,
                duration_ms: millis(*duration),
            })
            .collect()
    }
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::new()
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
