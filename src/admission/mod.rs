//! Run admission
//!
//! Single-flight admission of runs keyed by concurrency key.

mod controller;
mod handle;

pub use controller::{ActiveRun, AdmissionController, AdmissionError, RunRegistry};
pub use handle::{CancelReason, RunHandle};
