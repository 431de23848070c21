//! Run report models
//!
//! Aggregates unit results into the one report a run produces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{UnitResult, UnitStatus};

/// Overall outcome of a run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Failure,
    Cancelled,
    TimedOut,
    SetupFailed,
}

impl RunStatus {
    /// Process exit code for this status
    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::Success => 0,
            RunStatus::Failure => 1,
            RunStatus::SetupFailed => 2,
            RunStatus::Cancelled => 3,
            RunStatus::TimedOut => 124,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Success)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Success => write!(f, "SUCCESS"),
            RunStatus::Failure => write!(f, "FAILURE"),
            RunStatus::Cancelled => write!(f, "CANCELLED"),
            RunStatus::TimedOut => write!(f, "TIMED OUT"),
            RunStatus::SetupFailed => write!(f, "SETUP FAILED"),
        }
    }
}

/// Exit code used when an empty run is treated as an error
pub const EMPTY_RUN_EXIT_CODE: i32 = 4;

/// Lifecycle phase of one run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Pending,
    Admitted,
    Provisioning,
    Discovering,
    Executing,
    Completed,
    Cancelled,
    TimedOut,
    SetupFailed,
}

impl RunPhase {
    /// Position in the lifecycle; terminal phases share the last rank
    pub fn rank(&self) -> u8 {
        match self {
            RunPhase::Pending => 0,
            RunPhase::Admitted => 1,
            RunPhase::Provisioning => 2,
            RunPhase::Discovering => 3,
            RunPhase::Executing => 4,
            RunPhase::Completed
            | RunPhase::Cancelled
            | RunPhase::TimedOut
            | RunPhase::SetupFailed => 5,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.rank() == 5
    }

    pub fn name(&self) -> &'static str {
        match self {
            RunPhase::Pending => "pending",
            RunPhase::Admitted => "admitted",
            RunPhase::Provisioning => "provisioning",
            RunPhase::Discovering => "discovering",
            RunPhase::Executing => "executing",
            RunPhase::Completed => "completed",
            RunPhase::Cancelled => "cancelled",
            RunPhase::TimedOut => "timed_out",
            RunPhase::SetupFailed => "setup_failed",
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Time spent in one phase
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTiming {
    pub phase: RunPhase,
    pub duration_ms: u64,
}

/// Success iff no unit failed or errored
pub fn aggregate_status(results: &[UnitResult]) -> RunStatus {
    if results.iter().all(|r| r.status.is_success()) {
        RunStatus::Success
    } else {
        RunStatus::Failure
    }
}

/// Aggregate report of one run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub concurrency_key: String,
    pub status: RunStatus,
    pub phase: RunPhase,
    pub empty_run: bool,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    pub skipped: usize,
    pub excluded: usize,
    pub parallelism: usize,
    pub elapsed_ms: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub phase_timings: Vec<PhaseTiming>,
    pub results: Vec<UnitResult>,
}

impl RunReport {
    /// Build a completed report; results are sorted by unit id
    pub fn new(
        run_id: impl Into<String>,
        concurrency_key: impl Into<String>,
        mut results: Vec<UnitResult>,
    ) -> Self {
        results.sort_by(|a, b| a.unit_id.cmp(&b.unit_id));
        let count = |status: UnitStatus| results.iter().filter(|r| r.status == status).count();
        let now = Utc::now();

        Self {
            run_id: run_id.into(),
            concurrency_key: concurrency_key.into(),
            status: aggregate_status(&results),
            phase: RunPhase::Completed,
            empty_run: results.is_empty(),
            total: results.len(),
            passed: count(UnitStatus::Passed),
            failed: count(UnitStatus::Failed),
            errored: count(UnitStatus::Errored),
            skipped: count(UnitStatus::Skipped),
            excluded: 0,
            parallelism: 0,
            elapsed_ms: 0,
            started_at: now,
            finished_at: now,
            message: None,
            phase_timings: Vec::new(),
            results,
        }
    }

    /// Report for a run that ended before executing anything
    pub fn aborted(
        run_id: impl Into<String>,
        concurrency_key: impl Into<String>,
        status: RunStatus,
        phase: RunPhase,
        message: impl Into<String>,
    ) -> Self {
        let mut report = Self::new(run_id, concurrency_key, Vec::new());
        report.status = status;
        report.phase = phase;
        report.empty_run = false;
        report.message = Some(message.into());
        report
    }

    /// Override the aggregate status with a run-level outcome
    pub fn with_status(mut self, status: RunStatus, phase: RunPhase) -> Self {
        self.status = status;
        self.phase = phase;
        self
    }

    pub fn with_excluded(mut self, excluded: usize) -> Self {
        self.excluded = excluded;
        self
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Stamp timing information once the run is over
    pub fn finish(
        mut self,
        started_at: DateTime<Utc>,
        elapsed_ms: u64,
        phase_timings: Vec<PhaseTiming>,
    ) -> Self {
        self.started_at = started_at;
        self.finished_at = Utc::now();
        self.elapsed_ms = elapsed_ms;
        self.phase_timings = phase_timings;
        self
    }

    pub fn pass_rate(&self) -> f64 {
        let ran = self.total - self.skipped;
        if ran == 0 {
            0.0
        } else {
            (self.passed as f64 / ran as f64) * 100.0
        }
    }

    /// Exit code for the process; optionally an empty run counts as an error
    pub fn exit_code(&self, fail_on_empty: bool) -> i32 {
        if fail_on_empty && self.empty_run && self.status.is_success() {
            EMPTY_RUN_EXIT_CODE
        } else {
            self.status.exit_code()
        }
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run {} - {}", self.run_id, self.concurrency_key)?;
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        for result in &self.results {
            writeln!(f, "  {result}")?;
        }
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        writeln!(
            f,
            "Total: {} | Pass: {} | Fail: {} | Error: {} | Skip: {} | Excluded: {}",
            self.total, self.passed, self.failed, self.errored, self.skipped, self.excluded
        )?;
        write!(f, "Status: {} | Duration: {}ms", self.status, self.elapsed_ms)?;
        if self.empty_run {
            write!(f, " | EMPTY RUN")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregation_law() {
        let green = vec![
            UnitResult::passed("a", 10),
            UnitResult::skipped("b", "not started"),
        ];
        assert_eq!(aggregate_status(&green), RunStatus::Success);

        let failed = vec![UnitResult::passed("a", 10), UnitResult::failed("b", 5, "boom")];
        assert_eq!(aggregate_status(&failed), RunStatus::Failure);

        let errored = vec![UnitResult::errored("a", 1, "panic")];
        assert_eq!(aggregate_status(&errored), RunStatus::Failure);
    }

    #[test]
    fn test_report_counts_and_sorting() {
        let results = vec![
            UnitResult::failed("c", 5, "assert"),
            UnitResult::passed("a", 10),
            UnitResult::skipped("d", "cancelled"),
            UnitResult::errored("b", 1, "crash"),
        ];

        let report = RunReport::new("run-1", "ci-main", results);
        let ids: Vec<_> = report.results.iter().map(|r| r.unit_id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c", "d"]);
        assert_eq!(report.total, 4);
        assert_eq!(report.passed, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.errored, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.status, RunStatus::Failure);
        assert!(!report.empty_run);
    }

    #[test]
    fn test_empty_report_is_flagged() {
        let report = RunReport::new("run-1", "ci-main", Vec::new());
        assert_eq!(report.status, RunStatus::Success);
        assert!(report.empty_run);
        assert_eq!(report.exit_code(false), 0);
        assert_eq!(report.exit_code(true), EMPTY_RUN_EXIT_CODE);
    }

    #[test]
    fn test_exit_codes_are_distinct() {
        assert_eq!(RunStatus::Success.exit_code(), 0);
        assert_ne!(RunStatus::Failure.exit_code(), 0);
        assert_ne!(
            RunStatus::TimedOut.exit_code(),
            RunStatus::Failure.exit_code()
        );
        assert_ne!(
            RunStatus::Cancelled.exit_code(),
            RunStatus::Failure.exit_code()
        );
    }

    #[test]
    fn test_aborted_report() {
        let report = RunReport::aborted(
            "run-2",
            "ci-main",
            RunStatus::SetupFailed,
            RunPhase::SetupFailed,
            "pip install failed",
        );
        assert_eq!(report.status, RunStatus::SetupFailed);
        assert!(!report.empty_run);
        assert_eq!(report.message.as_deref(), Some("pip install failed"));
        assert_eq!(report.exit_code(true), 2);
    }

    #[test]
    fn test_phase_ranks() {
        assert!(RunPhase::Pending.rank() < RunPhase::Admitted.rank());
        assert!(RunPhase::Discovering.rank() < RunPhase::Executing.rank());
        assert!(RunPhase::TimedOut.is_terminal());
        assert!(!RunPhase::Executing.is_terminal());
    }

    #[test]
    fn test_pass_rate_ignores_skipped() {
        let report = RunReport::new(
            "r",
            "k",
            vec![
                UnitResult::passed("a", 1),
                UnitResult::failed("b", 1, "x"),
                UnitResult::skipped("c", "cancelled"),
            ],
        );
        assert!((report.pass_rate() - 50.0).abs() < f64::EPSILON);
    }
}
