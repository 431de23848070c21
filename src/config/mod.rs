//! Configuration module
//!
//! Handles loading and managing configuration, and turns it into the parts an
//! orchestrated run is assembled from.

mod env;
mod file;

pub use env::{print_env_help, EnvConfig};
pub use file::ConfigFile;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::admission::{AdmissionController, RunRegistry};
use crate::discovery::{ExcludePattern, FsUnitSource, StaticUnitSource, UnitSource};
use crate::executor::{CommandRunner, Parallelism, UnitRunner};
use crate::orchestrator::{CommandSetup, Orchestrator, RunPlan, SetupStep};

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory scanned for test units
    pub root: PathBuf,

    /// File name glob identifying a unit
    pub test_pattern: String,

    /// Explicit unit list; replaces filesystem discovery when non-empty
    pub units: Vec<String>,

    /// Exclusion patterns (`dir/` for a subtree, otherwise a single unit)
    pub exclude: Vec<String>,

    /// Worker count, or "auto"
    pub parallelism: Parallelism,

    /// Wall-clock ceiling for execution in seconds
    pub timeout_secs: u64,

    /// How long a superseding trigger waits for the old run to stop
    pub grace_period_secs: u64,

    /// How long an in-flight unit may keep running after cancellation
    pub drain_grace_secs: u64,

    /// Workflow name used in the concurrency key
    pub workflow: String,

    /// Treat a run with zero executed units as an error
    pub fail_on_empty: bool,

    /// Dependency provisioning
    pub setup: SetupConfig,

    /// How each unit is executed
    pub runner: RunnerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            test_pattern: "*_test.py".to_string(),
            units: Vec::new(),
            exclude: Vec::new(),
            parallelism: Parallelism::Auto,
            timeout_secs: 1800,
            grace_period_secs: 30,
            drain_grace_secs: 10,
            workflow: "ci".to_string(),
            fail_on_empty: false,
            setup: SetupConfig::default(),
            runner: RunnerConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        if self.test_pattern.trim().is_empty() {
            bail!("test_pattern must not be empty");
        }
        if self.timeout_secs == 0 {
            bail!("timeout_secs must be greater than zero");
        }
        if self.runner.command.is_empty() {
            bail!("runner.command must name a program");
        }
        if self.runner.failure_codes.contains(&0) {
            bail!("runner.failure_codes must not contain 0");
        }
        self.exclude_patterns()?;
        Ok(())
    }

    pub fn exclude_patterns(&self) -> Result<Vec<ExcludePattern>> {
        ExcludePattern::parse_all(&self.exclude).context("Invalid exclusion pattern")
    }

    pub fn ceiling(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn plan(&self) -> Result<RunPlan> {
        Ok(RunPlan {
            exclude: self.exclude_patterns()?,
            parallelism: self.parallelism,
            ceiling: self.ceiling(),
            drain_grace: Duration::from_secs(self.drain_grace_secs),
        })
    }

    pub fn unit_source(&self) -> Arc<dyn UnitSource> {
        if self.units.is_empty() {
            Arc::new(FsUnitSource::new(&self.root, &self.test_pattern))
        } else {
            Arc::new(StaticUnitSource::new(self.units.iter().cloned()))
        }
    }

    pub fn unit_runner(&self) -> Result<Arc<dyn UnitRunner>> {
        let runner = CommandRunner::new(&self.runner.command)?
            .in_dir(&self.root)
            .envs(self.runner.env.clone())
            .failure_codes(self.runner.failure_codes.clone())
            .unit_timeout(self.runner.unit_timeout_secs.map(Duration::from_secs));
        Ok(Arc::new(runner))
    }

    pub fn setup_step(&self) -> Result<Option<Arc<dyn SetupStep>>> {
        if self.setup.command.is_empty() {
            return Ok(None);
        }
        let setup = CommandSetup::new(&self.setup.command)?
            .in_dir(&self.root)
            .envs(self.setup.env.clone());
        Ok(Some(Arc::new(setup)))
    }

    pub fn admission_controller(&self) -> Arc<AdmissionController> {
        Arc::new(AdmissionController::new(RunRegistry::new(), self.grace_period()))
    }

    /// Assemble an orchestrator sharing `controller`
    pub fn orchestrator(&self, controller: Arc<AdmissionController>) -> Result<Orchestrator> {
        self.validate()?;
        let mut orchestrator = Orchestrator::new(controller, self.unit_source(), self.unit_runner()?)
            .with_plan(self.plan()?);
        if let Some(setup) = self.setup_step()? {
            orchestrator = orchestrator.with_setup(setup);
        }
        Ok(orchestrator)
    }
}

/// Dependency provisioning run before discovery
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SetupConfig {
    /// `[program, args...]`; empty disables provisioning
    pub command: Vec<String>,

    pub env: BTreeMap<String, String>,
}

/// Per-unit command settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// `[program, args...]`; `{unit}` is replaced by the unit id, or the id is appended
    pub command: Vec<String>,

    /// Exit codes meaning "assertions failed" rather than "errored"
    pub failure_codes: Vec<i32>,

    /// Optional per-unit timeout in seconds
    pub unit_timeout_secs: Option<u64>,

    pub env: BTreeMap<String, String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            command: ["python", "-m", "pytest", "-q", "{unit}"]
                .into_iter()
                .map(String::from)
                .collect(),
            failure_codes: vec![1],
            unit_timeout_secs: None,
            env: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.timeout_secs, 1800);
        assert_eq!(config.grace_period_secs, 30);
        assert_eq!(config.test_pattern, "*_test.py");
        assert_eq!(config.parallelism, Parallelism::Auto);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: AppConfig = serde_yaml::from_str(
            "parallelism: 3\nexclude:\n  - tests/integration/\nrunner:\n  command: [cargo, test]\n",
        )
        .unwrap();

        assert_eq!(config.parallelism, Parallelism::Fixed(3));
        assert_eq!(config.exclude, ["tests/integration/"]);
        assert_eq!(config.runner.command, ["cargo", "test"]);
        assert_eq!(config.runner.failure_codes, [1]);
        assert_eq!(config.timeout_secs, 1800);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.exclude = vec!["  ".to_string()];
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.runner.command.clear();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_plan_from_config() {
        let config = AppConfig {
            exclude: vec!["tests/integration/".to_string()],
            parallelism: Parallelism::Fixed(2),
            timeout_secs: 60,
            drain_grace_secs: 3,
            ..AppConfig::default()
        };
        let plan = config.plan().unwrap();

        assert_eq!(plan.exclude.len(), 1);
        assert_eq!(plan.parallelism, Parallelism::Fixed(2));
        assert_eq!(plan.ceiling, Duration::from_secs(60));
        assert_eq!(plan.drain_grace, Duration::from_secs(3));
    }

    #[test]
    fn test_setup_is_optional() {
        let mut config = AppConfig::default();
        assert!(config.setup_step().unwrap().is_none());

        config.setup.command = vec!["pip".to_string(), "install".to_string()];
        assert!(config.setup_step().unwrap().is_some());
    }

    #[test]
    fn test_explicit_units_bypass_filesystem() {
        let config = AppConfig {
            root: PathBuf::from("/definitely/not/here"),
            units: vec!["b".to_string(), "a".to_string()],
            ..AppConfig::default()
        };
        let listed = config.unit_source().list().unwrap();
        assert_eq!(listed.len(), 2);
    }
}
