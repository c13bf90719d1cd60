//! Apply command: submit a mutation file in batches and write the audit trail

use chrono::Utc;
use clap::Args;
use std::path::PathBuf;
use tracing::{error, info};

use super::{print_json, read_json_file, Cli, CliError, OutputFormat};
use crate::audit::AuditTrail;
use crate::batch::{BatchResult, ItemOutcome, MutationRequest};
use crate::engine::SyncEngine;
use crate::EntityType;

/// Apply command arguments
#[derive(Debug, Args)]
pub struct ApplyArgs {
    /// JSON array of mutations: [{"entityId", "field", "newValue", "oldValue"?, "reason"?}]
    #[arg(long)]
    pub file: PathBuf,

    /// Entity type the mutations target
    #[arg(long, default_value = "keyword")]
    pub entity_type: EntityType,

    /// Audit CSV path (default: audit_<timestamp>.csv in the current directory)
    #[arg(long)]
    pub audit_file: Option<PathBuf>,
}

impl ApplyArgs {
    /// Execute the apply command
    pub async fn execute(&self, cli: &Cli, engine: &SyncEngine) -> Result<(), CliError> {
        let scope = cli.scope()?;
        let mutations: Vec<MutationRequest> = read_json_file(&self.file)?;
        if mutations.is_empty() {
            info!(file = %self.file.display(), "No mutations to apply");
            return Ok(());
        }

        info!(
            file = %self.file.display(),
            mutations = mutations.len(),
            entity_type = %self.entity_type,
            dry_run = engine.config().batch.dry_run,
            "Applying mutations"
        );

        let result = engine
            .apply_mutations(&scope, self.entity_type, &mutations)
            .await;

        // The trail holds partial outcomes even when the run aborted.
        let audit_path = self
            .audit_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(AuditTrail::default_file_name(Utc::now())));
        let audit = engine.audit().write_csv(&audit_path);
        if let Err(e) = &audit {
            error!(error = %e, "Audit trail not written");
        }

        let result = result?;
        match cli.output_format {
            OutputFormat::Json => print_json(&result)?,
            OutputFormat::Human => print_summary(&result),
        }
        // Mutations were applied, but a run without its trail still fails.
        audit?;
        Ok(())
    }
}

fn print_summary(result: &BatchResult) {
    println!(
        "{} mutations in {} batch calls: {} succeeded, {} failed, {} skipped",
        result.total(),
        result.batch_calls(),
        result.succeeded(),
        result.failed(),
        result.skipped()
    );
    for item in result.failures() {
        if let ItemOutcome::Failed { code, details } = &item.outcome {
            println!(
                "  #{} {}: {} {}",
                item.index,
                item.entity_id.as_deref().unwrap_or("-"),
                code.as_deref().unwrap_or("ERROR"),
                details
            );
        }
    }
}
