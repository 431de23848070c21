//! Run orchestration
//!
//! One run end to end: admit, provision, discover, execute under the timeout
//! guard, aggregate, release. Nothing is retried; a failed unit is a reported
//! fact.

mod lifecycle;
mod setup;
mod stream;

pub use lifecycle::{LifecycleError, RunLifecycle};
pub use setup::{CommandSetup, SetupStep};
pub use stream::{orchestrate_stream, ReportSink, StreamSummary};

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::admission::{AdmissionController, CancelReason, RunHandle};
use crate::discovery::{classify, ExcludePattern, UnitSource};
use crate::executor::{
    Parallelism, TimeoutGuard, UnitRunner, WorkerPool, DEFAULT_CEILING, DEFAULT_DRAIN_GRACE,
};
use crate::models::{RunPhase, RunReport, RunStatus, TriggerEvent, UnitSpec};

/// Run-level faults that end a run early
#[derive(Debug, Error)]
pub enum RunFault {
    #[error("setup failed: {0}")]
    SetupFailure(String),

    #[error("run exceeded its {}ms ceiling", .0.as_millis())]
    RunTimeout(Duration),

    #[error("superseded by a newer trigger for the same key")]
    Superseded,
}

impl RunFault {
    pub fn status(&self) -> RunStatus {
        match self {
            RunFault::SetupFailure(_) => RunStatus::SetupFailed,
            RunFault::RunTimeout(_) => RunStatus::TimedOut,
            RunFault::Superseded => RunStatus::Cancelled,
        }
    }

    pub fn phase(&self) -> RunPhase {
        match self {
            RunFault::SetupFailure(_) => RunPhase::SetupFailed,
            RunFault::RunTimeout(_) => RunPhase::TimedOut,
            RunFault::Superseded => RunPhase::Cancelled,
        }
    }
}

/// Per-run execution settings
#[derive(Clone, Debug)]
pub struct RunPlan {
    pub exclude: Vec<ExcludePattern>,
    pub parallelism: Parallelism,
    pub ceiling: Duration,
    pub drain_grace: Duration,
}

impl Default for RunPlan {
    fn default() -> Self {
        Self {
            exclude: Vec::new(),
            parallelism: Parallelism::Auto,
            ceiling: DEFAULT_CEILING,
            drain_grace: DEFAULT_DRAIN_GRACE,
        }
    }
}

/// Composes admission, discovery, and execution into one run.
///
/// Cheap to clone; clones share the admission controller.
#[derive(Clone)]
pub struct Orchestrator {
    controller: Arc<AdmissionController>,
    source: Arc<dyn UnitSource>,
    runner: Arc<dyn UnitRunner>,
    setup: Option<Arc<dyn SetupStep>>,
    plan: RunPlan,
}

impl Orchestrator {
    pub fn new(
        controller: Arc<AdmissionController>,
        source: Arc<dyn UnitSource>,
        runner: Arc<dyn UnitRunner>,
    ) -> Self {
        Self {
            controller,
            source,
            runner,
            setup: None,
            plan: RunPlan::default(),
        }
    }

    pub fn with_setup(mut self, setup: Arc<dyn SetupStep>) -> Self {
        self.setup = Some(setup);
        self
    }

    pub fn with_plan(mut self, plan: RunPlan) -> Self {
        self.plan = plan;
        self
    }

    pub fn controller(&self) -> &AdmissionController {
        &self.controller
    }

    /// Orchestrate one trigger into exactly one report
    pub async fn run(&self, event: &TriggerEvent) -> RunReport {
        match self.admit(event).await {
            Ok(admitted) => admitted.complete().await,
            Err(rejected) => rejected,
        }
    }

    /// Pass a trigger through admission only.
    ///
    /// A rejected trigger comes back as its final, cancelled report. Callers
    /// that admit in arrival order and finish runs concurrently keep newer
    /// triggers winning over older ones.
    pub async fn admit(&self, event: &TriggerEvent) -> Result<AdmittedRun, RunReport> {
        let started_at = Utc::now();
        let mut lifecycle = RunLifecycle::new(event.run_id());

        let handle = match self.controller.admit(event).await {
            Ok(handle) => handle,
            Err(err) => {
                warn!("{err}");
                enter(&mut lifecycle, RunPhase::Cancelled);
                return Err(RunReport::aborted(
                    event.run_id(),
                    event.concurrency_key(),
                    RunStatus::Cancelled,
                    RunPhase::Cancelled,
                    err.to_string(),
                )
                .finish(started_at, lifecycle.elapsed_ms(), lifecycle.phase_timings()));
            }
        };
        enter(&mut lifecycle, RunPhase::Admitted);
        debug!(
            "{} run {} admitted {}ms after its trigger",
            event.kind(),
            event.run_id(),
            (Utc::now() - event.received_at()).num_milliseconds()
        );

        Ok(AdmittedRun {
            orchestrator: self.clone(),
            handle,
            lifecycle,
        })
    }

    async fn drive(&self, handle: &RunHandle, lifecycle: &mut RunLifecycle) -> RunReport {
        if let Some(setup) = &self.setup {
            enter(lifecycle, RunPhase::Provisioning);
            if let Err(err) = setup.provision(handle.cancellation_token()).await {
                error!("Run {} setup failed: {err:#}", handle.run_id());
                return abort(handle, lifecycle, RunFault::SetupFailure(format!("{err:#}")));
            }
        }
        if handle.cancel_reason() == Some(CancelReason::Superseded) {
            return abort(handle, lifecycle, RunFault::Superseded);
        }

        enter(lifecycle, RunPhase::Discovering);
        let units = match self.discover().await {
            Ok(units) => units,
            Err(message) => {
                error!("Run {} discovery failed: {message}", handle.run_id());
                enter(lifecycle, RunPhase::Completed);
                return RunReport::aborted(
                    handle.run_id(),
                    handle.concurrency_key(),
                    RunStatus::Failure,
                    RunPhase::Completed,
                    message,
                );
            }
        };

        let excluded = units.iter().filter(|u| u.excluded).count();
        if units.len() == excluded {
            warn!("Run {} has no units to execute", handle.run_id());
        }

        enter(lifecycle, RunPhase::Executing);
        let workers = self.plan.parallelism.resolve();
        let pool = WorkerPool::new(Arc::clone(&self.runner)).with_drain_grace(self.plan.drain_grace);
        let guard = TimeoutGuard::new(self.plan.ceiling);
        let guarded = guard
            .guard(handle, pool.execute(&units, workers, handle.cancellation_token()))
            .await;

        let report = RunReport::new(handle.run_id(), handle.concurrency_key(), guarded.value)
            .with_excluded(excluded)
            .with_parallelism(workers);

        let fault = if guarded.timed_out {
            Some(RunFault::RunTimeout(guard.ceiling()))
        } else if handle.cancel_reason() == Some(CancelReason::Superseded) {
            Some(RunFault::Superseded)
        } else {
            None
        };

        match fault {
            Some(fault) => {
                enter(lifecycle, fault.phase());
                let mut message = fault.to_string();
                if handle.is_zombie() {
                    message.push_str("; force-retired before it finished draining");
                }
                report
                    .with_status(fault.status(), fault.phase())
                    .with_message(message)
            }
            None => {
                enter(lifecycle, RunPhase::Completed);
                report
            }
        }
    }

    /// List and classify units off the async runtime
    async fn discover(&self) -> Result<Vec<UnitSpec>, String> {
        let source = Arc::clone(&self.source);
        let patterns = self.plan.exclude.clone();

        let listed = tokio::task::spawn_blocking(move || {
            source.list().map(|ids| classify(ids, &patterns))
        })
        .await;

        match listed {
            Ok(Ok(units)) => Ok(units),
            Ok(Err(err)) => Err(format!("discovery failed: {err}")),
            Err(err) => Err(format!("discovery task failed: {err}")),
        }
    }
}

/// A run that holds its concurrency key and has not started setup yet
pub struct AdmittedRun {
    orchestrator: Orchestrator,
    handle: RunHandle,
    lifecycle: RunLifecycle,
}

impl AdmittedRun {
    pub fn run_id(&self) -> &str {
        self.handle.run_id()
    }

    /// Drive the run to its report and give the key back
    pub async fn complete(mut self) -> RunReport {
        let report = self
            .orchestrator
            .drive(&self.handle, &mut self.lifecycle)
            .await
            .finish(
                self.handle.started_at(),
                self.lifecycle.elapsed_ms(),
                self.lifecycle.phase_timings(),
            );

        info!(
            "Run {} finished: {} ({} passed, {} failed, {} errored, {} skipped)",
            report.run_id, report.status, report.passed, report.failed, report.errored, report.skipped
        );

        self.orchestrator.controller.release(self.handle).await;
        report
    }
}

fn enter(lifecycle: &mut RunLifecycle, phase: RunPhase) {
    if let Err(err) = lifecycle.advance(phase) {
        warn!("{err}");
    }
}

fn abort(handle: &RunHandle, lifecycle: &mut RunLifecycle, fault: RunFault) -> RunReport {
    enter(lifecycle, fault.phase());
    RunReport::aborted(
        handle.run_id(),
        handle.concurrency_key(),
        fault.status(),
        fault.phase(),
        fault.to_string(),
    )
}
