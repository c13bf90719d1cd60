//! Verify command: credentials and profile access check

use clap::Args;

use super::{print_json, Cli, CliError, OutputFormat};
use crate::engine::SyncEngine;

/// Verify command arguments
#[derive(Debug, Args)]
pub struct VerifyArgs {
    /// Campaigns to show from the sample listing
    #[arg(long, default_value_t = 5)]
    pub sample: usize,
}

impl VerifyArgs {
    /// Execute the verify command
    pub async fn execute(&self, cli: &Cli, engine: &SyncEngine) -> Result<(), CliError> {
        let scope = cli.scope()?;
        let report = engine.verify_connection(&scope, self.sample).await;

        match cli.output_format {
            OutputFormat::Json => print_json(&report)?,
            OutputFormat::Human => {
                if report.success {
                    println!("Connection OK for profile {scope}");
                    println!("Campaigns in sample: {}", report.campaign_count);
                    for campaign in &report.sample {
                        println!(
                            "  {} {:<40} {:<10} budget {}",
                            campaign.campaign_id, campaign.name, campaign.state, campaign.daily_budget
                        );
                    }
                } else {
                    println!(
                        "Connection FAILED for profile {scope}: {}",
                        report.error.as_deref().unwrap_or("unknown error")
                    );
                }
            }
        }

        if report.success {
            Ok(())
        } else {
            Err(CliError::Incomplete("API verification failed".to_string()))
        }
    }
}
