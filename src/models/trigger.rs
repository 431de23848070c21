//! Trigger event models
//!
//! A trigger is one push or manual invocation that asks for a test run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What caused a run to be requested
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    Push,
    Manual,
}

impl TriggerKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "push" => Some(TriggerKind::Push),
            "manual" | "workflow_dispatch" | "dispatch" => Some(TriggerKind::Manual),
            _ => None,
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerKind::Push => write!(f, "push"),
            TriggerKind::Manual => write!(f, "manual"),
        }
    }
}

/// One incoming request for a run.
///
/// Immutable once created: fields are only reachable through accessors.
/// `sequence` orders events that share a concurrency key; larger is newer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerEvent {
    concurrency_key: String,
    #[serde(default = "generate_run_id")]
    run_id: String,
    #[serde(default = "now_millis")]
    sequence: u64,
    #[serde(default = "default_kind")]
    kind: TriggerKind,
    #[serde(default = "Utc::now")]
    received_at: DateTime<Utc>,
}

impl TriggerEvent {
    /// Create an event for a workflow and git ref.
    ///
    /// The concurrency key is `{workflow}-{git_ref}`, so every push to the same
    /// branch of the same workflow competes for one slot.
    pub fn new(workflow: &str, git_ref: &str, kind: TriggerKind) -> Self {
        Self::with_key(concurrency_key(workflow, git_ref), kind)
    }

    /// Create an event with an explicit concurrency key
    pub fn with_key(key: impl Into<String>, kind: TriggerKind) -> Self {
        Self {
            concurrency_key: key.into(),
            run_id: generate_run_id(),
            sequence: now_millis(),
            kind,
            received_at: Utc::now(),
        }
    }

    /// Override the ordering value
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// Override the run identifier
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    pub fn concurrency_key(&self) -> &str {
        &self.concurrency_key
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn kind(&self) -> TriggerKind {
        self.kind
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }
}

impl fmt::Display for TriggerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} run {} [{}] (seq {})",
            self.kind, self.run_id, self.concurrency_key, self.sequence
        )
    }
}

/// Build the concurrency key for a workflow and ref
pub fn concurrency_key(workflow: &str, git_ref: &str) -> String {
    format!("{workflow}-{git_ref}")
}

/// Generate unique run ID
pub fn generate_run_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let random: u32 = rand::random::<u32>() % 10000;
    format!("{timestamp}_{random:04}")
}

fn now_millis() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}

fn default_kind() -> TriggerKind {
    TriggerKind::Push
}
