//! Worker pool execution
//!
//! Runs a unit set on N workers that pull from a shared queue. Workers check
//! the cancellation token before taking each unit; units never taken are
//! reported as skipped.

use futures::future::join_all;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::runner::{UnitRunner, INTERRUPTED};
use crate::models::{UnitResult, UnitSpec};
use crate::utils::Timer;

/// Default time an in-flight unit gets to finish after cancellation
pub const DEFAULT_DRAIN_GRACE: Duration = Duration::from_secs(10);

/// Worker count policy
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Parallelism {
    /// One worker per available execution context
    #[default]
    Auto,
    Fixed(usize),
}

impl Parallelism {
    /// Resolve to a concrete worker count (at least 1)
    pub fn resolve(&self) -> usize {
        match self {
            Parallelism::Auto => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            Parallelism::Fixed(n) => (*n).max(1),
        }
    }
}

impl FromStr for Parallelism {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("auto") {
            return Ok(Parallelism::Auto);
        }
        match s.parse::<usize>() {
            Ok(0) => Err("parallelism must be at least 1".to_string()),
            Ok(n) => Ok(Parallelism::Fixed(n)),
            Err(_) => Err(format!("invalid parallelism '{s}': expected 'auto' or a number")),
        }
    }
}

impl fmt::Display for Parallelism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parallelism::Auto => write!(f, "auto"),
            Parallelism::Fixed(n) => write!(f, "{n}"),
        }
    }
}

impl Serialize for Parallelism {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Parallelism::Auto => serializer.serialize_str("auto"),
            Parallelism::Fixed(n) => serializer.serialize_u64(*n as u64),
        }
    }
}

impl<'de> Deserialize<'de> for Parallelism {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(usize),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(0) => Err(de::Error::custom("parallelism must be at least 1")),
            Raw::Number(n) => Ok(Parallelism::Fixed(n)),
            Raw::Text(s) => s.parse().map_err(de::Error::custom),
        }
    }
}

/// Parallel unit executor
pub struct WorkerPool {
    runner: Arc<dyn UnitRunner>,
    drain_grace: Duration,
}

impl WorkerPool {
    pub fn new(runner: Arc<dyn UnitRunner>) -> Self {
        Self {
            runner,
            drain_grace: DEFAULT_DRAIN_GRACE,
        }
    }

    pub fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = grace;
        self
    }

    /// Execute every non-excluded unit on `workers` workers.
    ///
    /// Returns exactly one result per non-excluded unit, sorted by unit id.
    pub async fn execute(
        &self,
        units: &[UnitSpec],
        workers: usize,
        cancel: CancellationToken,
    ) -> Vec<UnitResult> {
        let selected: Vec<UnitSpec> = units.iter().filter(|u| !u.excluded).cloned().collect();
        let workers = workers.max(1).min(selected.len().max(1));
        info!("Executing {} units on {} workers", selected.len(), workers);

        let queue = Arc::new(Mutex::new(selected.iter().cloned().collect::<VecDeque<_>>()));

        let handles = (0..workers).map(|worker| {
            let queue = Arc::clone(&queue);
            let runner = Arc::clone(&self.runner);
            let cancel = cancel.clone();
            let drain_grace = self.drain_grace;

            tokio::spawn(async move {
                let mut results = Vec::new();
                loop {
                    if cancel.is_cancelled() {
                        debug!("Worker {} stopping: run cancelled", worker);
                        break;
                    }
                    let next = queue.lock().await.pop_front();
                    let Some(unit) = next else { break };

                    debug!("Worker {} running {}", worker, unit.id);
                    let result = run_unit(&runner, unit, &cancel, drain_grace).await;
                    debug!("  {}", result);
                    results.push(result);
                }
                results
            })
        });

        let mut results: Vec<UnitResult> = Vec::with_capacity(selected.len());
        for joined in join_all(handles).await {
            match joined {
                Ok(worker_results) => results.extend(worker_results),
                Err(e) => error!("Worker task failed: {}", e),
            }
        }

        let finished: HashSet<&str> = results.iter().map(|r| r.unit_id.as_str()).collect();
        let reason = if cancel.is_cancelled() {
            "not started: run cancelled"
        } else {
            "not started"
        };
        let skipped: Vec<UnitResult> = selected
            .iter()
            .filter(|u| !finished.contains(u.id.as_str()))
            .map(|u| UnitResult::skipped(&u.id, reason))
            .collect();
        if !skipped.is_empty() {
            warn!("{} units were never started", skipped.len());
        }
        results.extend(skipped);

        results.sort_by(|a, b| a.unit_id.cmp(&b.unit_id));
        results
    }
}

/// Run one unit in its own task so a panic or error stays with that unit
async fn run_unit(
    runner: &Arc<dyn UnitRunner>,
    unit: UnitSpec,
    cancel: &CancellationToken,
    drain_grace: Duration,
) -> UnitResult {
    let timer = Timer::start(unit.id.clone());
    let id = unit.id.clone();

    let mut task = {
        let runner = Arc::clone(runner);
        let cancel = cancel.clone();
        tokio::spawn(async move { runner.run(&unit, cancel).await })
    };

    let joined = tokio::select! {
        joined = &mut task => joined,
        _ = cancel.cancelled() => {
            match tokio::time::timeout(drain_grace, &mut task).await {
                Ok(joined) => joined,
                Err(_) => {
                    task.abort();
                    warn!("Aborted {} after {}ms drain grace", id, drain_grace.as_millis());
                    return UnitResult::errored(id, timer.stop(), INTERRUPTED);
                }
            }
        }
    };

    let duration_ms = timer.stop();
    match joined {
        Ok(Ok(outcome)) => UnitResult::from_outcome(id, outcome, duration_ms),
        Ok(Err(e)) => UnitResult::errored(id, duration_ms, format!("{e:#}")),
        Err(e) if e.is_panic() => {
            let message = panic_message(e.into_panic());
            UnitResult::errored(id, duration_ms, format!("unit panicked: {message}"))
        }
        Err(e) => UnitResult::errored(id, duration_ms, e.to_string()),
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::runner::FnRunner;
    use crate::models::{aggregate_status, RunStatus, UnitOutcome, UnitStatus};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn units(ids: &[&str]) -> Vec<UnitSpec> {
        ids.iter().map(|id| UnitSpec::new(*id)).collect()
    }

    fn statuses(results: &[UnitResult]) -> BTreeMap<String, UnitStatus> {
        results
            .iter()
            .map(|r| (r.unit_id.clone(), r.status))
            .collect()
    }

    fn failing_u3() -> Arc<dyn UnitRunner> {
        Arc::new(FnRunner::new(|unit: UnitSpec, _cancel| async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            if unit.id == "u3" {
                Ok(UnitOutcome::failed("assert 1 == 2"))
            } else {
                Ok(UnitOutcome::passed("ok"))
            }
        }))
    }

    #[test]
    fn test_parallelism_parse_and_resolve() {
        assert_eq!("auto".parse::<Parallelism>(), Ok(Parallelism::Auto));
        assert_eq!("4".parse::<Parallelism>(), Ok(Parallelism::Fixed(4)));
        assert!("0".parse::<Parallelism>().is_err());
        assert!("many".parse::<Parallelism>().is_err());

        assert!(Parallelism::Auto.resolve() >= 1);
        assert_eq!(Parallelism::Fixed(3).resolve(), 3);
        assert_eq!(Parallelism::Fixed(0).resolve(), 1);
    }

    #[test]
    fn test_parallelism_serde() {
        let auto: Parallelism = serde_json::from_str("\"auto\"").unwrap();
        let fixed: Parallelism = serde_json::from_str("8").unwrap();
        assert_eq!(auto, Parallelism::Auto);
        assert_eq!(fixed, Parallelism::Fixed(8));
        assert_eq!(serde_json::to_string(&fixed).unwrap(), "8");
        assert!(serde_json::from_str::<Parallelism>("0").is_err());
    }

    #[tokio::test]
    async fn test_one_failure_does_not_stop_siblings() {
        let pool = WorkerPool::new(failing_u3());
        let results = pool
            .execute(&units(&["u1", "u2", "u3", "u4", "u5"]), 2, CancellationToken::new())
            .await;

        assert_eq!(results.len(), 5);
        let failed: Vec<_> = results
            .iter()
            .filter(|r| r.status == UnitStatus::Failed)
            .map(|r| r.unit_id.as_str())
            .collect();
        assert_eq!(failed, ["u3"]);
        assert_eq!(aggregate_status(&results), RunStatus::Failure);
    }

    #[tokio::test]
    async fn test_results_independent_of_worker_count() {
        let ids = ["u1", "u2", "u3", "u4", "u5", "u6", "u7"];
        let pool = WorkerPool::new(failing_u3());

        let baseline = statuses(&pool.execute(&units(&ids), 1, CancellationToken::new()).await);
        for workers in [2, 3, 16] {
            let results = pool.execute(&units(&ids), workers, CancellationToken::new()).await;
            let ordered: Vec<_> = results.iter().map(|r| r.unit_id.as_str()).collect();
            assert_eq!(ordered, ids);
            assert_eq!(statuses(&results), baseline);
        }
    }

    #[tokio::test]
    async fn test_excluded_units_are_not_run() {
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        let runner: Arc<dyn UnitRunner> = Arc::new(FnRunner::new(move |_unit, _cancel| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(UnitOutcome::passed(""))
            }
        }));

        let mut set = units(&["a", "c"]);
        set.push(UnitSpec::excluded("b"));
        let results = WorkerPool::new(runner)
            .execute(&set, 4, CancellationToken::new())
            .await;

        assert_eq!(results.len(), 2);
        assert_eq!(ran.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_panics_and_errors_are_captured() {
        let runner: Arc<dyn UnitRunner> = Arc::new(FnRunner::new(|unit: UnitSpec, _cancel| async move {
            match unit.id.as_str() {
                "boom" => panic!("fixture exploded"),
                "err" => Err(anyhow::anyhow!("could not import module")),
                _ => Ok(UnitOutcome::passed("")),
            }
        }));

        let results = WorkerPool::new(runner)
            .execute(&units(&["boom", "err", "ok"]), 2, CancellationToken::new())
            .await;

        let by_id = statuses(&results);
        assert_eq!(by_id["boom"], UnitStatus::Errored);
        assert_eq!(by_id["err"], UnitStatus::Errored);
        assert_eq!(by_id["ok"], UnitStatus::Passed);
        assert!(results[0].output.contains("fixture exploded"));
        assert!(results[1].output.contains("could not import module"));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_skips_everything() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let results = WorkerPool::new(failing_u3())
            .execute(&units(&["u1", "u2", "u3"]), 2, cancel)
            .await;

        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.status == UnitStatus::Skipped));
        assert_eq!(aggregate_status(&results), RunStatus::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_count_bounds_concurrency() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (r, p) = (Arc::clone(&running), Arc::clone(&peak));

        let runner: Arc<dyn UnitRunner> = Arc::new(FnRunner::new(move |_unit, _cancel| {
            let (running, peak) = (Arc::clone(&r), Arc::clone(&p));
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(UnitOutcome::passed(""))
            }
        }));

        let ids: Vec<String> = (0..10).map(|i| format!("u{i:02}")).collect();
        let set: Vec<UnitSpec> = ids.iter().map(UnitSpec::new).collect();
        let results = WorkerPool::new(runner)
            .execute(&set, 3, CancellationToken::new())
            .await;

        assert_eq!(results.len(), 10);
        assert_eq!(peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_mid_run_skips_unstarted_units() {
        let runner: Arc<dyn UnitRunner> = Arc::new(FnRunner::new(|_unit, cancel: CancellationToken| async move {
            tokio::select! {
                _ = cancel.cancelled() => Ok(UnitOutcome::errored(INTERRUPTED)),
                _ = tokio::time::sleep(Duration::from_millis(100)) => Ok(UnitOutcome::passed("")),
            }
        }));

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            trigger.cancel();
        });

        let results = WorkerPool::new(runner)
            .execute(&units(&["a", "b", "c", "d"]), 1, cancel)
            .await;

        let by_id = statuses(&results);
        assert_eq!(by_id["a"], UnitStatus::Passed);
        assert_eq!(by_id["b"], UnitStatus::Errored);
        assert_eq!(by_id["c"], UnitStatus::Skipped);
        assert_eq!(by_id["d"], UnitStatus::Skipped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresponsive_unit_is_aborted_after_drain_grace() {
        let runner: Arc<dyn UnitRunner> = Arc::new(FnRunner::new(|_unit, _cancel| async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(UnitOutcome::passed(""))
        }));

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let results = WorkerPool::new(runner)
            .with_drain_grace(Duration::from_millis(50))
            .execute(&units(&["stuck", "next"]), 1, cancel)
            .await;

        let by_id = statuses(&results);
        assert_eq!(by_id["stuck"], UnitStatus::Errored);
        assert_eq!(by_id["next"], UnitStatus::Skipped);
        assert_eq!(results[1].output, INTERRUPTED);
    }

    #[tokio::test]
    async fn test_empty_unit_set() {
        let results = WorkerPool::new(failing_u3())
            .execute(&[], 4, CancellationToken::new())
            .await;
        assert!(results.is_empty());
    }
}
