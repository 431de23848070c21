//! Output formatters for run reports
//!
//! Provides Table, Summary, JSON, and CSV output formats.

use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;

use crate::models::{RunReport, RunStatus, UnitResult, UnitSpec, UnitStatus};

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    JsonPretty,
    Csv,
    Summary,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "table" => Some(OutputFormat::Table),
            "json" => Some(OutputFormat::Json),
            "json-pretty" | "jsonpretty" => Some(OutputFormat::JsonPretty),
            "csv" => Some(OutputFormat::Csv),
            "summary" => Some(OutputFormat::Summary),
            _ => None,
        }
    }
}

/// Report formatter
pub struct ResultFormatter {
    format: OutputFormat,
    colorize: bool,
}

impl ResultFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colorize: true,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    /// Render a whole report
    pub fn format_report(&self, report: &RunReport) -> Result<String> {
        match self.format {
            OutputFormat::Table => Ok(self.format_report_table(report)),
            OutputFormat::Summary => Ok(self.format_report_brief(report)),
            OutputFormat::Json => serde_json::to_string(report).context("Failed to encode report"),
            OutputFormat::JsonPretty => {
                serde_json::to_string_pretty(report).context("Failed to encode report")
            }
            OutputFormat::Csv => self.format_report_csv(report),
        }
    }

    fn status_label(&self, status: UnitStatus) -> String {
        let label = format!("{} {}", status.symbol(), status);
        if !self.colorize {
            return label;
        }
        let color = match status {
            UnitStatus::Passed => "32",
            UnitStatus::Failed | UnitStatus::Errored => "31",
            UnitStatus::Skipped => "33",
        };
        format!("\x1b[{color}m{label}\x1b[0m")
    }

    fn run_status_label(&self, status: RunStatus) -> String {
        if !self.colorize {
            return status.to_string();
        }
        let color = match status {
            RunStatus::Success => "32",
            RunStatus::Cancelled => "33",
            RunStatus::Failure | RunStatus::TimedOut | RunStatus::SetupFailed => "31",
        };
        format!("\x1b[{color}m{status}\x1b[0m")
    }

    fn format_result_row(&self, result: &UnitResult) -> String {
        let mut row = format!(
            "{:<48} {:<9} [{:>7}ms]",
            result.unit_id,
            self.status_label(result.status),
            result.duration_ms
        );
        if !matches!(result.status, UnitStatus::Passed) {
            if let Some(line) = result.headline() {
                row.push_str("  ");
                row.push_str(line);
            }
        }
        row
    }

    fn format_report_table(&self, report: &RunReport) -> String {
        let mut output = String::new();

        output.push_str("\n╔══════════════════════════════════════════════════════════════╗\n");
        output.push_str(&format!(" Run {} [{}]\n", report.run_id, report.concurrency_key));
        output.push_str("╠══════════════════════════════════════════════════════════════╣\n");

        for result in &report.results {
            output.push_str(&format!(" {}\n", self.format_result_row(result)));
        }
        if report.results.is_empty() {
            output.push_str(" (no units executed)\n");
        }

        output.push_str("╠══════════════════════════════════════════════════════════════╣\n");
        output.push_str(&format!(
            " Total: {} | Pass: {} | Fail: {} | Error: {} | Skip: {} | Excluded: {}\n",
            report.total,
            report.passed,
            report.failed,
            report.errored,
            report.skipped,
            report.excluded
        ));
        output.push_str(&format!(
            " Pass Rate: {:5.1}% | Workers: {} | Duration: {}ms\n",
            report.pass_rate(),
            report.parallelism,
            report.elapsed_ms
        ));
        output.push_str(&format!(
            " Status: {}",
            self.run_status_label(report.status)
        ));
        if report.empty_run {
            output.push_str(" (empty run)");
        }
        output.push('\n');
        if let Some(message) = &report.message {
            output.push_str(&format!(" {message}\n"));
        }
        output.push_str("╚══════════════════════════════════════════════════════════════╝\n");

        output
    }

    fn format_report_brief(&self, report: &RunReport) -> String {
        let mut line = format!(
            "{} [{}] {}: {}/{} passed, {} failed, {} errored, {} skipped in {}ms",
            report.run_id,
            report.concurrency_key,
            self.run_status_label(report.status),
            report.passed,
            report.total,
            report.failed,
            report.errored,
            report.skipped,
            report.elapsed_ms
        );
        if let Some(message) = &report.message {
            line.push_str(&format!(" ({message})"));
        }
        line
    }

    fn format_report_csv(&self, report: &RunReport) -> Result<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(["run_id", "unit_id", "status", "duration_ms", "message"])?;
        for result in &report.results {
            let status = result.status.to_string();
            let duration = result.duration_ms.to_string();
            writer.write_record([
                report.run_id.as_str(),
                result.unit_id.as_str(),
                status.as_str(),
                duration.as_str(),
                result.headline().unwrap_or(""),
            ])?;
        }
        let bytes = writer.into_inner().context("Failed to flush CSV output")?;
        String::from_utf8(bytes).context("CSV output was not UTF-8")
    }

    /// Render a discovered unit list
    pub fn format_units(&self, units: &[UnitSpec]) -> Result<String> {
        match self.format {
            OutputFormat::Json => serde_json::to_string(units).context("Failed to encode units"),
            OutputFormat::JsonPretty => {
                serde_json::to_string_pretty(units).context("Failed to encode units")
            }
            OutputFormat::Csv => {
                let mut writer = csv::Writer::from_writer(Vec::new());
                writer.write_record(["unit_id", "excluded"])?;
                for unit in units {
                    let excluded = unit.excluded.to_string();
                    writer.write_record([unit.id.as_str(), excluded.as_str()])?;
                }
                let bytes = writer.into_inner().context("Failed to flush CSV output")?;
                String::from_utf8(bytes).context("CSV output was not UTF-8")
            }
            OutputFormat::Table | OutputFormat::Summary => {
                let selected = units.iter().filter(|u| !u.excluded).count();
                let mut output = String::new();
                for unit in units {
                    output.push_str(&format!("{unit}\n"));
                }
                output.push_str(&format!(
                    "{} units ({} selected, {} excluded)\n",
                    units.len(),
                    selected,
                    units.len() - selected
                ));
                Ok(output)
            }
        }
    }
}

impl Default for ResultFormatter {
    fn default() -> Self {
        Self::new(OutputFormat::Table)
    }
}

/// Write a report to a file
pub fn write_report_to_file(
    path: impl AsRef<Path>,
    report: &RunReport,
    format: OutputFormat,
) -> Result<()> {
    let path = path.as_ref();
    let formatter = ResultFormatter::new(format).no_color();
    let content = formatter.format_report(report)?;

    let mut file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    file.write_all(content.as_bytes())?;

    Ok(())
}
