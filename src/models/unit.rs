//! Test unit models
//!
//! Defines discovered units, unit outcomes, and status types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A discovered test unit (a test file or a single test case)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnitSpec {
    pub id: String,
    pub excluded: bool,
}

impl UnitSpec {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            excluded: false,
        }
    }

    pub fn excluded(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            excluded: true,
        }
    }
}

impl fmt::Display for UnitSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.excluded {
            write!(f, "{} (excluded)", self.id)
        } else {
            write!(f, "{}", self.id)
        }
    }
}

/// Unit execution status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    Passed,
    Failed,
    Errored,
    Skipped,
}

impl UnitStatus {
    pub fn symbol(&self) -> &'static str {
        match self {
            UnitStatus::Passed => "✓",
            UnitStatus::Failed => "✗",
            UnitStatus::Skipped => "○",
            UnitStatus::Errored => "!",
        }
    }

    /// Whether this status keeps the run green
    pub fn is_success(&self) -> bool {
        matches!(self, UnitStatus::Passed | UnitStatus::Skipped)
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitStatus::Passed => write!(f, "PASS"),
            UnitStatus::Failed => write!(f, "FAIL"),
            UnitStatus::Skipped => write!(f, "SKIP"),
            UnitStatus::Errored => write!(f, "ERROR"),
        }
    }
}

/// What a runner reports back for one unit; timing is added by the executor
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnitOutcome {
    pub status: UnitStatus,
    pub output: String,
}

impl UnitOutcome {
    pub fn passed(output: impl Into<String>) -> Self {
        Self {
            status: UnitStatus::Passed,
            output: output.into(),
        }
    }

    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            status: UnitStatus::Failed,
            output: output.into(),
        }
    }

    pub fn errored(output: impl Into<String>) -> Self {
        Self {
            status: UnitStatus::Errored,
            output: output.into(),
        }
    }

    pub fn skipped(output: impl Into<String>) -> Self {
        Self {
            status: UnitStatus::Skipped,
            output: output.into(),
        }
    }
}

/// Result of a single unit execution
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitResult {
    pub unit_id: String,
    pub status: UnitStatus,
    pub duration_ms: u64,
    pub output: String,
}

impl UnitResult {
    pub fn from_outcome(unit_id: impl Into<String>, outcome: UnitOutcome, duration_ms: u64) -> Self {
        Self {
            unit_id: unit_id.into(),
            status: outcome.status,
            duration_ms,
            output: outcome.output,
        }
    }

    pub fn passed(unit_id: impl Into<String>, duration_ms: u64) -> Self {
        Self::from_outcome(unit_id, UnitOutcome::passed(""), duration_ms)
    }

    pub fn failed(unit_id: impl Into<String>, duration_ms: u64, output: impl Into<String>) -> Self {
        Self::from_outcome(unit_id, UnitOutcome::failed(output), duration_ms)
    }

    pub fn errored(unit_id: impl Into<String>, duration_ms: u64, error: impl Into<String>) -> Self {
        Self::from_outcome(unit_id, UnitOutcome::errored(error), duration_ms)
    }

    pub fn skipped(unit_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::from_outcome(unit_id, UnitOutcome::skipped(reason), 0)
    }

    /// First line of the captured output, for one-line displays
    pub fn headline(&self) -> Option<&str> {
        self.output.lines().map(str::trim).find(|l| !l.is_empty())
    }
}

impl fmt::Display for UnitResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}ms]",
            self.status.symbol(),
            self.unit_id,
            self.duration_ms
        )?;
        if let Some(line) = self.headline() {
            write!(f, " - {line}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_success_set() {
        assert!(UnitStatus::Passed.is_success());
        assert!(UnitStatus::Skipped.is_success());
        assert!(!UnitStatus::Failed.is_success());
        assert!(!UnitStatus::Errored.is_success());
    }

    #[test]
    fn test_result_creation() {
        let result = UnitResult::passed("tests/a_test.py", 100);
        assert!(result.status.is_success());
        assert_eq!(result.duration_ms, 100);
        assert_eq!(result.headline(), None);
    }

    #[test]
    fn test_headline_skips_blank_lines() {
        let result = UnitResult::failed("b", 5, "\n\n  AssertionError: 1 != 2\nmore");
        assert_eq!(result.headline(), Some("AssertionError: 1 != 2"));
        assert_eq!(
            result.to_string(),
            "✗ b [5ms] - AssertionError: 1 != 2"
        );
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&UnitStatus::Errored).unwrap();
        assert_eq!(json, "\"errored\"");
    }
}
