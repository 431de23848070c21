//! Run handles
//!
//! A `RunHandle` is the admission ticket of one in-flight run. It carries the
//! run's cancellation signal and the acknowledgment the controller waits for
//! when the run is superseded.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio_util::sync::CancellationToken;

use crate::models::TriggerEvent;

/// Why a run was asked to stop
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelReason {
    /// A newer trigger arrived for the same concurrency key
    Superseded,
    /// The run exceeded its wall-clock ceiling
    TimedOut,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Superseded => write!(f, "superseded"),
            CancelReason::TimedOut => write!(f, "timed out"),
        }
    }
}

/// State shared between a handle, its observers, and the registry
#[derive(Debug)]
pub(crate) struct RunSignals {
    pub(crate) run_id: String,
    pub(crate) concurrency_key: String,
    pub(crate) sequence: u64,
    pub(crate) started_at: DateTime<Utc>,
    cancel: CancellationToken,
    reason: OnceLock<CancelReason>,
    retired: CancellationToken,
    zombie: AtomicBool,
}

impl RunSignals {
    /// Raise cancellation; the first reason sticks. Returns true if this call set it.
    pub(crate) fn cancel(&self, reason: CancelReason) -> bool {
        let first = self.reason.set(reason).is_ok();
        self.cancel.cancel();
        first
    }

    pub(crate) fn reason(&self) -> Option<CancelReason> {
        self.reason.get().copied()
    }

    /// Resolves once the run has acknowledged retirement
    pub(crate) async fn retired(&self) {
        self.retired.cancelled().await;
    }

    pub(crate) fn mark_zombie(&self) {
        self.zombie.store(true, Ordering::SeqCst);
    }
}

/// Admission ticket for one run.
///
/// Not `Clone`: the orchestrator owns it for the run's lifetime. Dropping it
/// acknowledges retirement, so a run that unwinds early never blocks admission
/// of its successor.
#[derive(Debug)]
pub struct RunHandle {
    signals: Arc<RunSignals>,
}

impl RunHandle {
    pub(crate) fn new(event: &TriggerEvent) -> Self {
        Self {
            signals: Arc::new(RunSignals {
                run_id: event.run_id().to_string(),
                concurrency_key: event.concurrency_key().to_string(),
                sequence: event.sequence(),
                started_at: Utc::now(),
                cancel: CancellationToken::new(),
                reason: OnceLock::new(),
                retired: CancellationToken::new(),
                zombie: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) fn signals(&self) -> Arc<RunSignals> {
        Arc::clone(&self.signals)
    }

    /// Whether `entry` is this handle's own registry entry
    pub(crate) fn owns(&self, entry: &Arc<RunSignals>) -> bool {
        Arc::ptr_eq(&self.signals, entry)
    }

    pub fn run_id(&self) -> &str {
        &self.signals.run_id
    }

    pub fn concurrency_key(&self) -> &str {
        &self.signals.concurrency_key
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.signals.started_at
    }

    /// Ask the run to stop. Returns true if this was the first cancellation.
    pub fn cancel(&self, reason: CancelReason) -> bool {
        self.signals.cancel(reason)
    }

    pub fn is_cancelled(&self) -> bool {
        self.signals.cancel.is_cancelled()
    }

    pub fn cancel_reason(&self) -> Option<CancelReason> {
        self.signals.reason()
    }

    /// Token observed by workers between units
    pub fn cancellation_token(&self) -> CancellationToken {
        self.signals.cancel.clone()
    }

    /// Resolves when cancellation is raised for any reason
    pub async fn cancelled(&self) {
        self.signals.cancel.cancelled().await;
    }

    /// Whether admission force-retired this run after the grace period
    pub fn is_zombie(&self) -> bool {
        self.signals.zombie.load(Ordering::SeqCst)
    }

    /// Acknowledge that the run has stopped
    pub fn retire(&self) {
        self.signals.retired.cancel();
    }

    /// Read-only view that outlives the handle
    #[cfg(test)]
    pub fn observer(&self) -> RunObserver {
        RunObserver {
            signals: self.signals(),
        }
    }
}

impl Drop for RunHandle {
    fn drop(&mut self) {
        self.signals.retired.cancel();
    }
}

/// Cloneable read-only view of a run
#[cfg(test)]
#[derive(Clone, Debug)]
pub struct RunObserver {
    signals: Arc<RunSignals>,
}

#[cfg(test)]
impl RunObserver {
    pub fn run_id(&self) -> &str {
        &self.signals.run_id
    }

    pub fn is_cancelled(&self) -> bool {
        self.signals.cancel.is_cancelled()
    }

    pub fn cancel_reason(&self) -> Option<CancelReason> {
        self.signals.reason()
    }

    pub fn is_zombie(&self) -> bool {
        self.signals.zombie.load(Ordering::SeqCst)
    }

    pub fn is_retired(&self) -> bool {
        self.signals.retired.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TriggerKind;

    fn handle() -> RunHandle {
        RunHandle::new(&TriggerEvent::with_key("branch-x", TriggerKind::Push).with_run_id("r1"))
    }

    #[test]
    fn test_first_cancel_reason_wins() {
        let handle = handle();
        assert!(!handle.is_cancelled());
        assert!(handle.cancel(CancelReason::Superseded));
        assert!(!handle.cancel(CancelReason::TimedOut));
        assert!(handle.is_cancelled());
        assert_eq!(handle.cancel_reason(), Some(CancelReason::Superseded));
    }

    #[test]
    fn test_token_shares_cancellation() {
        let handle = handle();
        let token = handle.cancellation_token();
        handle.cancel(CancelReason::TimedOut);
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_cancelled_resolves_on_cancel() {
        let handle = handle();
        let mut waiting = tokio_test::task::spawn(handle.cancelled());
        tokio_test::assert_pending!(waiting.poll());

        handle.cancel(CancelReason::Superseded);
        assert!(waiting.is_woken());
        tokio_test::assert_ready!(waiting.poll());
    }

    #[test]
    fn test_drop_acknowledges_retirement() {
        let handle = handle();
        let observer = handle.observer();
        assert!(!observer.is_retired());
        drop(handle);
        assert!(observer.is_retired());
        assert_eq!(observer.run_id(), "r1");
    }
}
