//! Environment variable configuration
//!
//! Provides environment variable overrides for configuration.

use std::env;
use std::path::PathBuf;

use super::AppConfig;
use crate::executor::Parallelism;
use crate::models::TriggerKind;

/// Environment variable prefix
const ENV_PREFIX: &str = "FLIGHTGATE";

/// Environment configuration from environment variables
#[derive(Clone, Debug, Default)]
pub struct EnvConfig {
    /// Unit root from FLIGHTGATE_ROOT
    pub root: Option<PathBuf>,
    /// Config file from FLIGHTGATE_CONFIG
    pub config_file: Option<PathBuf>,
    /// Worker count from FLIGHTGATE_PARALLELISM
    pub parallelism: Option<Parallelism>,
    /// Ceiling in seconds from FLIGHTGATE_TIMEOUT
    pub timeout: Option<u64>,
    /// Comma-separated exclusions from FLIGHTGATE_EXCLUDE
    pub exclude: Option<Vec<String>>,
    /// Output format from FLIGHTGATE_FORMAT
    pub format: Option<String>,
    /// Workflow name from FLIGHTGATE_WORKFLOW, falling back to GITHUB_WORKFLOW
    pub workflow: Option<String>,
    /// Git ref from FLIGHTGATE_REF, falling back to GITHUB_REF
    pub git_ref: Option<String>,
    /// Trigger kind from FLIGHTGATE_EVENT, falling back to GITHUB_EVENT_NAME
    pub kind: Option<TriggerKind>,
    /// Verbose from FLIGHTGATE_VERBOSE
    pub verbose: Option<bool>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self {
            root: get_env("ROOT").map(PathBuf::from),
            config_file: get_env("CONFIG").map(PathBuf::from),
            parallelism: get_env_parse("PARALLELISM"),
            timeout: get_env_parse("TIMEOUT"),
            exclude: get_env("EXCLUDE").map(|v| split_list(&v)),
            format: get_env("FORMAT"),
            workflow: get_env("WORKFLOW").or_else(|| env::var("GITHUB_WORKFLOW").ok()),
            git_ref: get_env("REF").or_else(|| env::var("GITHUB_REF").ok()),
            kind: get_env("EVENT")
                .or_else(|| env::var("GITHUB_EVENT_NAME").ok())
                .and_then(|v| TriggerKind::from_str(&v)),
            verbose: get_env_bool("VERBOSE"),
        }
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        self.root.is_some()
            || self.config_file.is_some()
            || self.parallelism.is_some()
            || self.timeout.is_some()
            || self.exclude.is_some()
            || self.format.is_some()
            || self.workflow.is_some()
            || self.git_ref.is_some()
            || self.kind.is_some()
            || self.verbose.is_some()
    }

    /// Overlay the variables that are set onto `config`.
    ///
    /// Exclusions add to the configured list rather than replacing it.
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(root) = &self.root {
            config.root = root.clone();
        }
        if let Some(parallelism) = self.parallelism {
            config.parallelism = parallelism;
        }
        if let Some(timeout) = self.timeout {
            config.timeout_secs = timeout;
        }
        if let Some(exclude) = &self.exclude {
            config.exclude.extend(exclude.iter().cloned());
        }
        if let Some(workflow) = &self.workflow {
            config.workflow = workflow.clone();
        }
    }

    /// Get git ref with fallback
    pub fn git_ref_or(&self, default: &str) -> String {
        self.git_ref.clone().unwrap_or_else(|| default.to_string())
    }

    /// Print current environment configuration
    pub fn print_summary(&self) {
        println!("Environment Configuration:");
        println!("  {}_ROOT:        {:?}", ENV_PREFIX, self.root);
        println!("  {}_CONFIG:      {:?}", ENV_PREFIX, self.config_file);
        println!("  {}_PARALLELISM: {:?}", ENV_PREFIX, self.parallelism);
        println!("  {}_TIMEOUT:     {:?}", ENV_PREFIX, self.timeout);
        println!("  {}_EXCLUDE:     {:?}", ENV_PREFIX, self.exclude);
        println!("  {}_FORMAT:      {:?}", ENV_PREFIX, self.format);
        println!("  {}_WORKFLOW:    {:?}", ENV_PREFIX, self.workflow);
        println!("  {}_REF:         {:?}", ENV_PREFIX, self.git_ref);
        println!("  {}_EVENT:       {:?}", ENV_PREFIX, self.kind);
    }
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}"))
        .ok()
        .filter(|v| !v.trim().is_empty())
}

/// Get environment variable and parse to type
fn get_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    get_env(name).and_then(|v| v.trim().parse().ok())
}

/// Get environment variable as boolean
fn get_env_bool(name: &str) -> Option<bool> {
    get_env(name).map(|v| {
        matches!(
            v.to_lowercase().as_str(),
            "1" | "true" | "yes" | "on" | "enabled"
        )
    })
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Builder for setting environment variables (useful for testing)
#[cfg(test)]
pub struct EnvBuilder {
    vars: Vec<(String, String)>,
}

#[cfg(test)]
impl EnvBuilder {
    pub fn new() -> Self {
        Self { vars: Vec::new() }
    }

    pub fn var(mut self, name: &str, value: impl Into<String>) -> Self {
        self.vars.push((format!("{ENV_PREFIX}_{name}"), value.into()));
        self
    }

    /// Apply and return guard that restores on drop
    pub fn apply_scoped(self) -> EnvGuard {
        let previous: Vec<_> = self
            .vars
            .iter()
            .map(|(k, _)| (k.clone(), env::var(k).ok()))
            .collect();

        for (key, value) in self.vars {
            env::set_var(key, value);
        }

        EnvGuard { previous }
    }
}

/// Guard that restores environment variables on drop
#[cfg(test)]
pub struct EnvGuard {
    previous: Vec<(String, Option<String>)>,
}

#[cfg(test)]
impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.previous {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }
    }
}

/// Print all FLIGHTGATE environment variables
pub fn print_env_help() {
    println!("Environment Variables:");
    println!();
    println!("  {ENV_PREFIX}_ROOT         Directory scanned for test units");
    println!("  {ENV_PREFIX}_CONFIG       Path to configuration file");
    println!("  {ENV_PREFIX}_PARALLELISM  Worker count or 'auto'");
    println!("  {ENV_PREFIX}_TIMEOUT      Run ceiling in seconds");
    println!("  {ENV_PREFIX}_EXCLUDE      Comma-separated exclusions (dir/ or unit)");
    println!("  {ENV_PREFIX}_FORMAT       Output format (table, summary, json, csv)");
    println!("  {ENV_PREFIX}_WORKFLOW     Workflow name (default: GITHUB_WORKFLOW)");
    println!("  {ENV_PREFIX}_REF          Git ref (default: GITHUB_REF)");
    println!("  {ENV_PREFIX}_EVENT        Trigger kind: push or manual (default: GITHUB_EVENT_NAME)");
    println!("  {ENV_PREFIX}_VERBOSE      Enable verbose output (true/false)");
    println!();
    println!("Example:");
    println!("  export {ENV_PREFIX}_EXCLUDE=tests/integration/,tests/unit/slow_test.py");
    println!("  flightgate run --ref refs/heads/main");
}
