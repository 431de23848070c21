//! Concurrency admission controller
//!
//! Keeps at most one active run per concurrency key. Admitting a new run for
//! a busy key cancels the old one and waits, up to a grace period, for it to
//! acknowledge before the new handle is handed out.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::handle::{CancelReason, RunHandle, RunSignals};
use crate::models::TriggerEvent;

/// Admission errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AdmissionError {
    #[error(
        "Stale trigger for {key}: sequence {incoming} is older than active run {active_run} (sequence {active})"
    )]
    Stale {
        key: String,
        incoming: u64,
        active_run: String,
        active: u64,
    },
}

/// Snapshot entry of an active run
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ActiveRun {
    pub concurrency_key: String,
    pub run_id: String,
    pub sequence: u64,
    pub started_at: DateTime<Utc>,
}

/// Lock-guarded map from concurrency key to the active run
#[derive(Clone, Debug, Default)]
pub struct RunRegistry {
    runs: Arc<Mutex<HashMap<String, Arc<RunSignals>>>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Active runs sorted by key
    pub async fn snapshot(&self) -> Vec<ActiveRun> {
        let runs = self.runs.lock().await;
        let mut active: Vec<ActiveRun> = runs
            .values()
            .map(|s| ActiveRun {
                concurrency_key: s.concurrency_key.clone(),
                run_id: s.run_id.clone(),
                sequence: s.sequence,
                started_at: s.started_at,
            })
            .collect();
        active.sort_by(|a, b| a.concurrency_key.cmp(&b.concurrency_key));
        active
    }

    /// Run currently active for a key
    pub async fn active(&self, key: &str) -> Option<String> {
        self.runs.lock().await.get(key).map(|s| s.run_id.clone())
    }
}

/// Single-flight admission per concurrency key
pub struct AdmissionController {
    registry: RunRegistry,
    grace: Duration,
}

impl AdmissionController {
    pub fn new(registry: RunRegistry, grace: Duration) -> Self {
        Self { registry, grace }
    }

    pub fn registry(&self) -> &RunRegistry {
        &self.registry
    }

    /// Admit a run for the event's key, retiring any run already active there.
    ///
    /// The registry lock is held from lookup through registration, so two
    /// triggers for one key can never both observe an empty slot.
    pub async fn admit(&self, event: &TriggerEvent) -> Result<RunHandle, AdmissionError> {
        let key = event.concurrency_key();
        let mut runs = self.registry.runs.lock().await;

        if let Some(active) = runs.get(key).cloned() {
            if event.sequence() < active.sequence {
                warn!(
                    "Ignoring stale trigger {} for {}: run {} is newer",
                    event.run_id(),
                    key,
                    active.run_id
                );
                return Err(AdmissionError::Stale {
                    key: key.to_string(),
                    incoming: event.sequence(),
                    active_run: active.run_id.clone(),
                    active: active.sequence,
                });
            }

            info!(
                "Run {} for {} superseded by {}",
                active.run_id,
                key,
                event.run_id()
            );
            active.cancel(CancelReason::Superseded);

            match tokio::time::timeout(self.grace, active.retired()).await {
                Ok(()) => debug!("Run {} acknowledged cancellation", active.run_id),
                Err(_) => {
                    active.mark_zombie();
                    warn!(
                        "Run {} did not stop within {}ms; force-retiring it as a zombie",
                        active.run_id,
                        self.grace.as_millis()
                    );
                }
            }

            runs.remove(key);
        }

        let handle = RunHandle::new(event);
        runs.insert(key.to_string(), handle.signals());
        info!("Admitted run {} for {}", handle.run_id(), key);

        Ok(handle)
    }

    /// Retire a finished run and drop its registry entry if it still owns the key
    pub async fn release(&self, handle: RunHandle) {
        // Acknowledge before locking: a superseding admit may hold the lock
        // while it waits for exactly this signal.
        handle.retire();

        // Identity, not run id: a re-delivered trigger reuses its run id.
        let mut runs = self.registry.runs.lock().await;
        let owns_key = runs
            .get(handle.concurrency_key())
            .is_some_and(|s| handle.owns(s));
        if owns_key {
            runs.remove(handle.concurrency_key());
            debug!("Released run {} for {}", handle.run_id(), handle.concurrency_key());
        }
    }

    pub async fn snapshot(&self) -> Vec<ActiveRun> {
        self.registry.snapshot().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TriggerKind;
    use futures::future::join_all;

    fn event(key: &str, run_id: &str, sequence: u64) -> TriggerEvent {
        TriggerEvent::with_key(key, TriggerKind::Push)
            .with_run_id(run_id)
            .with_sequence(sequence)
    }

    fn controller(grace_ms: u64) -> Arc<AdmissionController> {
        Arc::new(AdmissionController::new(
            RunRegistry::new(),
            Duration::from_millis(grace_ms),
        ))
    }

    #[tokio::test]
    async fn test_admit_registers_run() {
        let controller = controller(100);
        let handle = controller.admit(&event("branch-x", "r1", 1)).await.unwrap();

        let snapshot = controller.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].run_id, "r1");
        assert_eq!(snapshot[0].concurrency_key, "branch-x");
        assert!(!handle.is_cancelled());
    }

    #[tokio::test]
    async fn test_cooperative_run_acknowledges_supersession() {
        let controller = controller(5_000);
        let first = controller.admit(&event("branch-x", "r1", 1)).await.unwrap();
        let observer = first.observer();

        let worker_controller = Arc::clone(&controller);
        let worker = tokio::spawn(async move {
            first.cancelled().await;
            worker_controller.release(first).await;
        });

        let second = controller.admit(&event("branch-x", "r2", 2)).await.unwrap();
        worker.await.unwrap();

        assert!(observer.is_cancelled());
        assert_eq!(observer.cancel_reason(), Some(CancelReason::Superseded));
        assert!(!observer.is_zombie());
        assert_eq!(controller.registry().active("branch-x").await, Some("r2".into()));
        assert!(!second.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresponsive_run_is_force_retired() {
        // Run 1 never reaches a cancellation check point during its 10s body.
        let controller = controller(3_000);
        let first = controller.admit(&event("branch-x", "r1", 1)).await.unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        let second = controller.admit(&event("branch-x", "r2", 2)).await.unwrap();

        assert!(first.is_cancelled());
        assert!(first.is_zombie());
        assert!(!second.is_zombie());

        let snapshot = controller.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].run_id, "r2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_admits_leave_one_active_run() {
        let controller = controller(10);

        let admits = (0..8).map(|i| {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move {
                controller
                    .admit(&event("branch-x", &format!("r{i}"), 1))
                    .await
                    .unwrap()
            })
        });
        let handles: Vec<RunHandle> = join_all(admits)
            .await
            .into_iter()
            .map(|h| h.unwrap())
            .collect();

        let live: Vec<_> = handles.iter().filter(|h| !h.is_cancelled()).collect();
        assert_eq!(live.len(), 1);

        let snapshot = controller.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].run_id, live[0].run_id());
    }

    #[tokio::test]
    async fn test_stale_trigger_is_rejected() {
        let controller = controller(100);
        let newer = controller.admit(&event("branch-x", "r2", 20)).await.unwrap();

        let err = controller
            .admit(&event("branch-x", "r1", 10))
            .await
            .unwrap_err();
        assert!(matches!(err, AdmissionError::Stale { incoming: 10, active: 20, .. }));
        assert!(!newer.is_cancelled());
        assert_eq!(controller.registry().active("branch-x").await, Some("r2".into()));
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let controller = controller(100);
        let main = controller.admit(&event("ci-main", "r1", 1)).await.unwrap();
        let dev = controller.admit(&event("ci-dev", "r2", 1)).await.unwrap();

        assert!(!main.is_cancelled());
        assert!(!dev.is_cancelled());
        let keys: Vec<_> = controller
            .snapshot()
            .await
            .into_iter()
            .map(|r| r.concurrency_key)
            .collect();
        assert_eq!(keys, ["ci-dev", "ci-main"]);
    }

    #[tokio::test]
    async fn test_release_only_removes_own_entry() {
        let controller = controller(10);
        let first = controller.admit(&event("branch-x", "r1", 1)).await.unwrap();
        let second = controller.admit(&event("branch-x", "r2", 2)).await.unwrap();

        controller.release(first).await;
        assert_eq!(controller.registry().active("branch-x").await, Some("r2".into()));

        controller.release(second).await;
        assert!(controller.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_redelivered_trigger_keeps_its_successor_registered() {
        let controller = controller(10);
        let redelivered = event("branch-x", "dup", 1);
        let first = controller.admit(&redelivered).await.unwrap();
        let second = controller.admit(&redelivered).await.unwrap();
        assert!(first.is_cancelled());

        controller.release(first).await;
        assert_eq!(controller.snapshot().await.len(), 1);

        let third = controller.admit(&event("branch-x", "r3", 2)).await.unwrap();
        assert!(second.is_cancelled());
        assert!(!third.is_cancelled());

        let snapshot = controller.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].run_id, "r3");
    }
}
