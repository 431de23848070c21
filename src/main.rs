//! flightgate - single-flight test execution for CI triggers
//!
//! Runs a project's test units at most once per concurrency key. A newer
//! trigger for the same workflow and branch cancels the run in progress,
//! exclusions are applied before anything executes, units run on a bounded
//! worker pool, and the whole execution is bounded by a wall-clock ceiling.
//!
//! ## Usage
//!
//! ```bash
//! # One run for the current branch
//! flightgate run --workflow ci --ref refs/heads/main -x tests/integration/
//!
//! # Orchestrate a stream of triggers, one JSON object per line
//! echo '{"concurrency_key":"ci-main"}' | flightgate listen
//!
//! # Show what would run
//! flightgate discover --show-excluded
//!
//! # Write an example configuration
//! flightgate config init
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, BufReader};
use tracing::{error, info};

mod admission;
mod cli;
mod config;
mod discovery;
mod executor;
mod models;
mod orchestrator;
mod output;
mod utils;

use cli::{Args, Command, SelectionArgs};
use config::{AppConfig, ConfigFile, EnvConfig};
use discovery::{classify, discover};
use models::{RunReport, TriggerEvent, TriggerKind};
use orchestrator::{orchestrate_stream, ReportSink};
use output::{write_report_to_file, OutputFormat, ResultFormatter};
use utils::{init_logger, LogLevel};

#[tokio::main]
async fn main() -> Result<()> {
    let Args {
        command,
        verbose,
        log_level,
        config,
    } = Args::parse();
    let env = EnvConfig::load();

    let verbose = verbose || env.verbose.unwrap_or(false);
    init_logger(LogLevel::resolve(log_level.as_deref(), verbose));

    let config = config.or_else(|| env.config_file.clone());

    let code = match command {
        Command::Run(run_args) => run_once(config.as_deref(), &env, run_args).await?,
        Command::Listen(listen_args) => listen(config.as_deref(), &env, listen_args).await?,
        Command::Discover(discover_args) => list_units(config.as_deref(), &env, discover_args)?,
        Command::Config(config_args) => {
            manage_config(config.as_deref(), &env, config_args)?;
            0
        }
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

/// Layer file, environment, and command-line settings
fn load_config(path: Option<&Path>, env: &EnvConfig, selection: &SelectionArgs) -> Result<AppConfig> {
    let mut app = ConfigFile::load_or_default(path)?.app;
    env.apply(&mut app);

    if let Some(root) = &selection.root {
        app.root = root.clone();
    }
    app.exclude.extend(selection.exclude.iter().cloned());
    Ok(app)
}

fn output_format(flag: Option<&str>, env: &EnvConfig) -> Result<OutputFormat> {
    let name = flag.or(env.format.as_deref()).unwrap_or("table");
    OutputFormat::from_str(name).with_context(|| format!("Unknown output format: {name}"))
}

async fn run_once(config: Option<&Path>, env: &EnvConfig, args: cli::RunArgs) -> Result<i32> {
    let mut app = load_config(config, env, &args.selection)?;
    if let Some(parallelism) = args.parallelism {
        app.parallelism = parallelism;
    }
    if let Some(timeout) = args.timeout {
        app.timeout_secs = timeout;
    }
    if let Some(workflow) = args.workflow {
        app.workflow = workflow;
    }
    let fail_on_empty = args.fail_on_empty || app.fail_on_empty;
    let format = output_format(args.format.as_deref(), env)?;

    let git_ref = args.git_ref.unwrap_or_else(|| env.git_ref_or("local"));
    let kind = if args.manual {
        TriggerKind::Manual
    } else {
        env.kind.unwrap_or(TriggerKind::Push)
    };
    let mut event = TriggerEvent::new(&app.workflow, &git_ref, kind);
    if let Some(run_id) = args.run_id {
        event = event.with_run_id(run_id);
    }
    if let Some(sequence) = args.sequence {
        event = event.with_sequence(sequence);
    }

    let orchestrator = app.orchestrator(app.admission_controller())?;
    info!("Received {event}");
    let report = orchestrator.run(&event).await;

    println!("{}", ResultFormatter::new(format).format_report(&report)?);

    if let Some(path) = &args.output {
        write_report_to_file(path, &report, format)?;
        info!("Report saved to {}", path.display());
    }

    Ok(report.exit_code(fail_on_empty))
}

async fn listen(config: Option<&Path>, env: &EnvConfig, args: cli::ListenArgs) -> Result<i32> {
    let app = load_config(config, env, &SelectionArgs::default())?;
    let format = output_format(args.format.as_deref(), env)?;
    let orchestrator = app.orchestrator(app.admission_controller())?;

    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match &args.input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open {}", path.display()))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };

    let sink: ReportSink = Arc::new(move |report: &RunReport| {
        match ResultFormatter::new(format).format_report(report) {
            Ok(rendered) => println!("{rendered}"),
            Err(err) => error!("Failed to render report {}: {err:#}", report.run_id),
        }
    });

    let summary = orchestrate_stream(&orchestrator, reader, sink).await?;
    let failed = summary.failed(app.fail_on_empty);
    info!(
        "Processed {} triggers, {failed} did not succeed",
        summary.reports.len() + summary.crashed
    );
    Ok(summary.exit_code(app.fail_on_empty))
}

fn list_units(config: Option<&Path>, env: &EnvConfig, args: cli::DiscoverArgs) -> Result<i32> {
    let app = load_config(config, env, &args.selection)?;
    app.validate()?;
    let format = output_format(args.format.as_deref(), env)?;

    let source = app.unit_source();
    let patterns = app.exclude_patterns()?;
    let units = if args.show_excluded {
        classify(source.list()?, &patterns)
    } else {
        discover(source.as_ref(), &patterns)?
    };

    print!("{}", ResultFormatter::new(format).format_units(&units)?);
    Ok(0)
}

fn manage_config(config: Option<&Path>, env: &EnvConfig, args: cli::ConfigArgs) -> Result<()> {
    match args.action {
        cli::ConfigAction::Init { path, force } => {
            if path.exists() && !force {
                anyhow::bail!(
                    "Configuration file already exists: {}. Use --force to overwrite.",
                    path.display()
                );
            }

            ConfigFile::example().save(&path)?;
            println!("✓ Configuration file created: {}", path.display());
            println!("\nEdit the file to customize your settings.");
        }

        cli::ConfigAction::Show { env: show_env } => {
            if show_env {
                if !env.has_any() {
                    println!("No FLIGHTGATE_* variables are set.\n");
                }
                env.print_summary();
                println!();
                config::print_env_help();
            } else {
                let mut file = ConfigFile::load_or_default(config)?;
                env.apply(&mut file.app);
                println!("{}", serde_yaml::to_string(&file)?);
            }
        }

        cli::ConfigAction::Validate { path } => {
            let path: PathBuf = path
                .or_else(|| config.map(Path::to_path_buf))
                .or_else(ConfigFile::find)
                .unwrap_or_else(|| PathBuf::from("./flightgate.yaml"));

            match ConfigFile::load(&path) {
                Ok(_) => {
                    println!("✓ Configuration file is valid: {}", path.display());
                }
                Err(e) => {
                    println!("✗ Configuration file is invalid: {}", path.display());
                    println!("  Error: {e:#}");
                    return Err(e);
                }
            }
        }
    }

    Ok(())
}
