//! Unit runners
//!
//! A runner executes one unit and classifies how it ended. Runners receive the
//! run's cancellation token and may stop early when it fires.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::models::{UnitOutcome, UnitSpec, UnitStatus};

/// Placeholder replaced by the unit identifier in command templates
pub const UNIT_PLACEHOLDER: &str = "{unit}";

/// Message recorded for units stopped by cancellation
pub const INTERRUPTED: &str = "interrupted: run cancelled before the unit finished";

/// Executes a single unit
#[async_trait]
pub trait UnitRunner: Send + Sync {
    /// Run `unit`. An `Err` is recorded as an errored unit, never propagated.
    async fn run(&self, unit: &UnitSpec, cancel: CancellationToken) -> Result<UnitOutcome>;
}

/// Runs each unit as a subprocess built from a command template.
///
/// Exit code 0 passes, a configured failure code fails, anything else errors.
/// Cancellation kills the child.
#[derive(Clone, Debug)]
pub struct CommandRunner {
    program: String,
    args: Vec<String>,
    workdir: Option<PathBuf>,
    env: BTreeMap<String, String>,
    failure_codes: Vec<i32>,
    unit_timeout: Option<Duration>,
}

impl CommandRunner {
    /// Create a runner from `[program, args...]`
    pub fn new(command: &[String]) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .context("Runner command must not be empty")?;

        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            workdir: None,
            env: BTreeMap::new(),
            failure_codes: vec![1],
            unit_timeout: None,
        })
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    pub fn envs(mut self, env: BTreeMap<String, String>) -> Self {
        self.env.extend(env);
        self
    }

    pub fn failure_codes(mut self, codes: Vec<i32>) -> Self {
        self.failure_codes = codes;
        self
    }

    pub fn unit_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.unit_timeout = timeout;
        self
    }

    /// Arguments for one unit; the id is appended when no placeholder is present
    fn args_for(&self, unit_id: &str) -> Vec<String> {
        let mut args: Vec<String> = self
            .args
            .iter()
            .map(|a| a.replace(UNIT_PLACEHOLDER, unit_id))
            .collect();
        if !self.args.iter().any(|a| a.contains(UNIT_PLACEHOLDER)) {
            args.push(unit_id.to_string());
        }
        args
    }

    fn classify(&self, code: Option<i32>) -> (UnitStatus, Option<String>) {
        match code {
            Some(0) => (UnitStatus::Passed, None),
            Some(c) if self.failure_codes.contains(&c) => (UnitStatus::Failed, None),
            Some(c) => (UnitStatus::Errored, Some(format!("exited with code {c}"))),
            None => (UnitStatus::Errored, Some("terminated by signal".to_string())),
        }
    }
}

#[async_trait]
impl UnitRunner for CommandRunner {
    async fn run(&self, unit: &UnitSpec, cancel: CancellationToken) -> Result<UnitOutcome> {
        let mut command = Command::new(&self.program);
        command
            .args(self.args_for(&unit.id))
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.workdir {
            command.current_dir(dir);
        }

        debug!("Spawning {} for {}", self.program, unit.id);
        let child = command
            .spawn()
            .with_context(|| format!("Failed to start '{}' for {}", self.program, unit.id))?;

        // Dropping the wait future drops the child, which kills it.
        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(UnitOutcome::errored(INTERRUPTED)),
            _ = deadline(self.unit_timeout) => {
                let ms = self.unit_timeout.map(|t| t.as_millis()).unwrap_or_default();
                return Ok(UnitOutcome::errored(format!("unit timed out after {ms}ms")));
            }
            output = child.wait_with_output() => {
                output.with_context(|| format!("Failed to wait for {}", unit.id))?
            }
        };

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        let (status, note) = self.classify(output.status.code());
        if let Some(note) = note {
            text = format!("{note}\n{text}");
        }

        Ok(UnitOutcome { status, output: text })
    }
}

/// Sleeps for the timeout, or forever when there is none
async fn deadline(timeout: Option<Duration>) {
    match timeout {
        Some(t) => tokio::time::sleep(t).await,
        None => std::future::pending().await,
    }
}

/// In-process runner backed by an async closure
#[cfg(test)]
pub struct FnRunner<F> {
    f: F,
}

#[cfg(test)]
impl<F, Fut> FnRunner<F>
where
    F: Fn(UnitSpec, CancellationToken) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<UnitOutcome>> + Send,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[cfg(test)]
#[async_trait]
impl<F, Fut> UnitRunner for FnRunner<F>
where
    F: Fn(UnitSpec, CancellationToken) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<UnitOutcome>> + Send,
{
    async fn run(&self, unit: &UnitSpec, cancel: CancellationToken) -> Result<UnitOutcome> {
        (self.f)(unit.clone(), cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_empty_command_rejected() {
        assert!(CommandRunner::new(&[]).is_err());
    }

    #[test]
    fn test_args_placeholder_and_append() {
        let runner = CommandRunner::new(&command(&["pytest", "-q", "{unit}", "-x"])).unwrap();
        assert_eq!(runner.args_for("a_test.py"), ["-q", "a_test.py", "-x"]);

        let runner = CommandRunner::new(&command(&["pytest", "-q"])).unwrap();
        assert_eq!(runner.args_for("a_test.py"), ["-q", "a_test.py"]);
    }

    #[test]
    fn test_exit_code_classification() {
        let runner = CommandRunner::new(&command(&["true"]))
            .unwrap()
            .failure_codes(vec![1, 2]);
        assert_eq!(runner.classify(Some(0)).0, UnitStatus::Passed);
        assert_eq!(runner.classify(Some(2)).0, UnitStatus::Failed);
        assert_eq!(runner.classify(Some(5)).0, UnitStatus::Errored);
        assert_eq!(runner.classify(None).0, UnitStatus::Errored);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_runner_captures_failure_output() {
        let runner =
            CommandRunner::new(&command(&["sh", "-c", "echo checking $0; exit 1", "{unit}"]))
                .unwrap();
        let outcome = runner
            .run(&UnitSpec::new("u1"), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.status, UnitStatus::Failed);
        assert!(outcome.output.contains("checking u1"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_runner_unexpected_code_errors() {
        let runner = CommandRunner::new(&command(&["sh", "-c", "exit 3"])).unwrap();
        let outcome = runner
            .run(&UnitSpec::new("u1"), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.status, UnitStatus::Errored);
        assert!(outcome.output.starts_with("exited with code 3"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_runner_stops_on_cancel() {
        let runner = CommandRunner::new(&command(&["sh", "-c", "sleep 30"])).unwrap();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let outcome = runner.run(&UnitSpec::new("u1"), cancel).await.unwrap();
        assert_eq!(outcome.status, UnitStatus::Errored);
        assert_eq!(outcome.output, INTERRUPTED);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_runner_unit_timeout() {
        let runner = CommandRunner::new(&command(&["sh", "-c", "sleep 30"]))
            .unwrap()
            .unit_timeout(Some(Duration::from_millis(50)));
        let outcome = runner
            .run(&UnitSpec::new("u1"), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.status, UnitStatus::Errored);
        assert!(outcome.output.contains("timed out"));
    }

    #[tokio::test]
    async fn test_missing_program_is_an_error() {
        let runner =
            CommandRunner::new(&command(&["definitely-not-a-real-binary-7f3a"])).unwrap();
        let result = runner
            .run(&UnitSpec::new("u1"), CancellationToken::new())
            .await;
        assert!(result.is_err());
    }
}
