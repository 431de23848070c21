//! Dependency provisioning
//!
//! Runs once per run, before discovery.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Prepares the environment a run's units need
#[async_trait]
pub trait SetupStep: Send + Sync {
    /// Provision dependencies. Returning early on `cancel` is allowed;
    /// the orchestrator checks the token afterwards.
    async fn provision(&self, cancel: CancellationToken) -> Result<()>;
}

/// Provisions by running a shell-free command
#[derive(Clone, Debug)]
pub struct CommandSetup {
    program: String,
    args: Vec<String>,
    workdir: Option<PathBuf>,
    env: BTreeMap<String, String>,
}

impl CommandSetup {
    /// Create a setup step from `[program, args...]`
    pub fn new(command: &[String]) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .context("Setup command must not be empty")?;

        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            workdir: None,
            env: BTreeMap::new(),
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
}

#[async_trait]
impl SetupStep for CommandSetup {
    async fn provision(&self, cancel: CancellationToken) -> Result<()> {
        info!("Provisioning with '{}'", self.program);

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.workdir {
            command.current_dir(dir);
        }

        let child = command
            .spawn()
            .with_context(|| format!("Failed to start setup command '{}'", self.program))?;

        let output = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Setup interrupted by cancellation");
                return Ok(());
            }
            output = child.wait_with_output() => output.context("Failed to wait for setup command")?,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "Setup command '{}' exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            );
        }

        debug!("Setup finished");
        Ok(())
    }
}
