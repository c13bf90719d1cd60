//! Report command: generate, poll and download one or more reports

use chrono::NaiveDate;
use clap::Args;
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::info;

use super::{print_json, read_json_file, Cli, CliError, OutputFormat};
use crate::engine::SyncEngine;
use crate::report::{ReportError, ReportOutput, ReportSpec};

/// Report command arguments
#[derive(Debug, Args)]
pub struct ReportArgs {
    /// JSON array of report specs; runs them in the worker pool
    #[arg(long, conflicts_with_all = ["record_type", "metrics"])]
    pub spec_file: Option<PathBuf>,

    /// Record type of a single report (campaigns, adGroups, keywords, targets, ...)
    #[arg(long, requires = "metrics")]
    pub record_type: Option<String>,

    /// Comma-separated metrics of a single report
    #[arg(long, value_delimiter = ',')]
    pub metrics: Vec<String>,

    /// Name of a single report (defaults to the record type)
    #[arg(long)]
    pub name: Option<String>,

    /// Report date, YYYY-MM-DD (default: yesterday UTC)
    #[arg(long)]
    pub date: Option<NaiveDate>,

    /// Segment of a single report (e.g. query)
    #[arg(long)]
    pub segment: Option<String>,

    /// Write each report's rows to <DIR>/<name>.json
    #[arg(long)]
    pub output_dir: Option<PathBuf>,
}

impl ReportArgs {
    /// Specs to run, from the spec file or the single-report flags.
    pub fn specs(&self) -> Result<Vec<ReportSpec>, CliError> {
        if let Some(path) = &self.spec_file {
            return read_json_file(path);
        }

        let record_type = self.record_type.clone().ok_or_else(|| {
            CliError::InvalidArgument("either --spec-file or --record-type is required".to_string())
        })?;
        let mut spec = ReportSpec::new(
            self.name.clone().unwrap_or_else(|| record_type.clone()),
            record_type,
            self.metrics.iter().map(|m| m.trim().to_string()),
        );
        if let Some(date) = self.date {
            spec = spec.with_date(date);
        }
        if let Some(segment) = &self.segment {
            spec = spec.with_segment(segment.clone());
        }
        Ok(vec![spec])
    }

    /// Execute the report command
    pub async fn execute(&self, cli: &Cli, engine: &SyncEngine) -> Result<(), CliError> {
        let scope = cli.scope()?;
        let specs = self.specs()?;
        for spec in &specs {
            spec.validate().map_err(CliError::InvalidArgument)?;
        }

        let results = engine.run_reports(&scope, specs).await;

        if let Some(dir) = &self.output_dir {
            std::fs::create_dir_all(dir).map_err(|e| CliError::file(dir, e))?;
            for (name, result) in &results {
                if let Ok(output) = result {
                    write_rows(dir, name, output)?;
                }
            }
        }

        let failed = results.values().filter(|r| r.is_err()).count();
        match cli.output_format {
            OutputFormat::Json => {
                let summary: serde_json::Map<String, serde_json::Value> = results
                    .iter()
                    .map(|(name, result)| (name.clone(), summarize(result)))
                    .collect();
                print_json(&summary)?;
            }
            OutputFormat::Human => {
                for (name, result) in &results {
                    match result {
                        Ok(output) => println!(
                            "{name}: {} rows ({}, {}) from report {}",
                            output.rows.len(),
                            output
                                .job
                                .format
                                .map(|f| f.to_string())
                                .unwrap_or_else(|| "unknown".to_string()),
                            output.row_format,
                            output.job.job_id
                        ),
                        Err(e) => println!("{name}: FAILED: {e}"),
                    }
                }
            }
        }

        if failed > 0 {
            return Err(CliError::Incomplete(format!(
                "{failed} of {} reports failed",
                results.len()
            )));
        }
        Ok(())
    }
}

fn summarize(result: &Result<ReportOutput, ReportError>) -> serde_json::Value {
    match result {
        Ok(output) => json!({
            "jobId": output.job.job_id,
            "status": output.job.status,
            "format": output.job.format.map(|f| f.to_string()),
            "rowFormat": output.row_format.to_string(),
            "rows": output.rows.len(),
        }),
        Err(e) => json!({ "error": e.to_string() }),
    }
}

fn write_rows(dir: &Path, name: &str, output: &ReportOutput) -> Result<(), CliError> {
    let file_name: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let path = dir.join(format!("{file_name}.json"));
    let rendered = serde_json::to_vec_pretty(&output.rows).map_err(|e| CliError::json(&path, e))?;
    std::fs::write(&path, rendered).map_err(|e| CliError::file(&path, e))?;
    info!(report = %name, path = %path.display(), rows = output.rows.len(), "Report rows written");
    Ok(())
}
