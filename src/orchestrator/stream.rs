//! Trigger streams
//!
//! JSON lines in, one report per trigger out. Triggers are admitted in the
//! order they are read, then their runs proceed concurrently.

use anyhow::{Context, Result};
use futures::future::join_all;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, error, info, warn};

use super::Orchestrator;
use crate::models::{RunReport, RunStatus, TriggerEvent};

/// Called with each report as soon as its run ends
pub type ReportSink = Arc<dyn Fn(&RunReport) + Send + Sync>;

/// Everything a stream produced
#[derive(Debug, Default)]
pub struct StreamSummary {
    pub reports: Vec<RunReport>,
    /// Run tasks that panicked before producing a report
    pub crashed: usize,
}

impl StreamSummary {
    /// Runs that count against the stream.
    ///
    /// Cancelled reports come from superseded or stale triggers and are not
    /// failures.
    pub fn failed(&self, fail_on_empty: bool) -> usize {
        let failed = self
            .reports
            .iter()
            .filter(|r| r.status != RunStatus::Cancelled && r.exit_code(fail_on_empty) != 0)
            .count();
        failed + self.crashed
    }

    pub fn exit_code(&self, fail_on_empty: bool) -> i32 {
        if self.failed(fail_on_empty) == 0 {
            0
        } else {
            1
        }
    }
}

/// Orchestrate every trigger read from `reader` until it closes
pub async fn orchestrate_stream<R>(
    orchestrator: &Orchestrator,
    reader: R,
    sink: ReportSink,
) -> Result<StreamSummary>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut summary = StreamSummary::default();
    let mut runs = Vec::new();
    let mut line_no = 0usize;

    while let Some(line) = lines
        .next_line()
        .await
        .context("Failed to read trigger stream")?
    {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let event: TriggerEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(err) => {
                warn!("Skipping line {line_no}: {err}");
                continue;
            }
        };
        info!("Received {event}");
        if let Some(active) = orchestrator
            .controller()
            .registry()
            .active(event.concurrency_key())
            .await
        {
            debug!("{} arrives while run {active} holds the key", event.run_id());
        }

        // Admission stays on the read loop so line order decides which run wins.
        match orchestrator.admit(&event).await {
            Ok(admitted) => {
                debug!("Run {} admitted from line {line_no}", admitted.run_id());
                let sink = Arc::clone(&sink);
                runs.push(tokio::spawn(async move {
                    let report = admitted.complete().await;
                    sink(&report);
                    report
                }));
            }
            Err(rejected) => {
                sink(&rejected);
                summary.reports.push(rejected);
            }
        }
    }

    let active = orchestrator.controller().snapshot().await;
    if !active.is_empty() {
        let ids: Vec<&str> = active.iter().map(|a| a.run_id.as_str()).collect();
        info!("Input closed; waiting for {} active runs: {}", ids.len(), ids.join(", "));
    }

    for joined in join_all(runs).await {
        match joined {
            Ok(report) => summary.reports.push(report),
            Err(err) => {
                error!("Run task failed: {err}");
                summary.crashed += 1;
            }
        }
    }

    Ok(summary)
}
