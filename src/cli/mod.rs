//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::executor::Parallelism;

/// Single-flight test execution for CI triggers
#[derive(Parser, Debug)]
#[command(name = "flightgate")]
#[command(version)]
#[command(about = "Run a test suite once per concurrency key, cancelling superseded runs")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Configuration file (default: search standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Orchestrate one run
    Run(RunArgs),

    /// Orchestrate a stream of JSON trigger events, one per line
    Listen(ListenArgs),

    /// List the units a run would execute
    Discover(DiscoverArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

/// Arguments for run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Workflow name (default: config, then GITHUB_WORKFLOW)
    #[arg(short, long)]
    pub workflow: Option<String>,

    /// Git ref being tested (default: GITHUB_REF)
    #[arg(long = "ref")]
    pub git_ref: Option<String>,

    /// Mark the trigger as a manual dispatch
    #[arg(long)]
    pub manual: bool,

    /// Run identifier (default: generated)
    #[arg(long)]
    pub run_id: Option<String>,

    /// Ordering value for triggers sharing a key; larger is newer (default: now in ms)
    #[arg(long)]
    pub sequence: Option<u64>,

    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Worker count, or "auto"
    #[arg(short, long)]
    pub parallelism: Option<Parallelism>,

    /// Run ceiling in seconds
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Output format (table, summary, json, json-pretty, csv)
    #[arg(short, long)]
    pub format: Option<String>,

    /// Save the report to a file
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Exit non-zero when no unit was executed
    #[arg(long)]
    pub fail_on_empty: bool,
}

/// Unit selection shared by run and discover
#[derive(Parser, Debug, Default)]
pub struct SelectionArgs {
    /// Directory scanned for test units
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Exclude a unit, or a subtree when the pattern ends with '/' (repeatable)
    #[arg(short = 'x', long)]
    pub exclude: Vec<String>,
}

/// Arguments for listen command
#[derive(Parser, Debug)]
pub struct ListenArgs {
    /// Read events from a file instead of stdin
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Output format (table, summary, json, json-pretty, csv)
    #[arg(short, long)]
    pub format: Option<String>,
}

/// Arguments for discover command
#[derive(Parser, Debug)]
pub struct DiscoverArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Also list excluded units
    #[arg(long)]
    pub show_excluded: bool,

    /// Output format (table, json, json-pretty, csv)
    #[arg(short, long)]
    pub format: Option<String>,
}

/// Arguments for config management
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write an example configuration file
    Init {
        /// Destination
        #[arg(default_value = "flightgate.yaml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration
    Show {
        /// Also describe the environment variables
        #[arg(long)]
        env: bool,
    },

    /// Validate a configuration file
    Validate {
        /// File to validate (default: the one that would be loaded)
        path: Option<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_args() {
        let args = Args::parse_from([
            "flightgate",
            "run",
            "--workflow",
            "ci",
            "--ref",
            "refs/heads/main",
            "-x",
            "tests/integration/",
            "--exclude",
            "tests/unit/slow_test.py",
            "--parallelism",
            "4",
            "--fail-on-empty",
            "--sequence",
            "17",
        ]);
        match args.command {
            Command::Run(run) => {
                assert_eq!(run.workflow.as_deref(), Some("ci"));
                assert_eq!(run.git_ref.as_deref(), Some("refs/heads/main"));
                assert_eq!(
                    run.selection.exclude,
                    ["tests/integration/", "tests/unit/slow_test.py"]
                );
                assert_eq!(run.parallelism, Some(Parallelism::Fixed(4)));
                assert!(run.fail_on_empty);
                assert!(!run.manual);
                assert_eq!(run.sequence, Some(17));
                assert_eq!(run.run_id, None);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_parallelism_auto_and_zero() {
        let args = Args::parse_from(["flightgate", "run", "-p", "auto"]);
        match args.command {
            Command::Run(run) => assert_eq!(run.parallelism, Some(Parallelism::Auto)),
            _ => panic!("Expected Run command"),
        }

        assert!(Args::try_parse_from(["flightgate", "run", "-p", "0"]).is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = Args::parse_from([
            "flightgate",
            "discover",
            "--show-excluded",
            "--verbose",
            "--config",
            "ci.yaml",
        ]);
        assert!(args.verbose);
        assert_eq!(args.config, Some(PathBuf::from("ci.yaml")));
        match args.command {
            Command::Discover(discover) => assert!(discover.show_excluded),
            _ => panic!("Expected Discover command"),
        }
    }

    #[test]
    fn test_config_init_default_path() {
        let args = Args::parse_from(["flightgate", "config", "init"]);
        match args.command {
            Command::Config(ConfigArgs {
                action: ConfigAction::Init { path, force },
            }) => {
                assert_eq!(path, PathBuf::from("flightgate.yaml"));
                assert!(!force);
            }
            _ => panic!("Expected Config Init command"),
        }
    }
}
