//! Data models for test orchestration
//!
//! This module contains all data structures used throughout the application.

mod report;
mod trigger;
mod unit;

pub use report::{
    aggregate_status, PhaseTiming, RunPhase, RunReport, RunStatus, EMPTY_RUN_EXIT_CODE,
};
pub use trigger::{TriggerEvent, TriggerKind};
pub use unit::{UnitOutcome, UnitResult, UnitSpec, UnitStatus};
