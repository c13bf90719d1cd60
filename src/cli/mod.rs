//! CLI command implementations

pub mod apply;
pub mod entities;
pub mod error;
pub mod report;
pub mod verify;

use clap::{Parser, Subcommand, ValueEnum};
use serde::de::DeserializeOwned;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::auth::ClientCredentials;
use crate::client::Region;
use crate::config::EngineConfig;
use crate::engine::SyncEngine;
use crate::Scope;

pub use apply::ApplyArgs;
pub use entities::EntitiesArgs;
pub use error::CliError;
pub use report::ReportArgs;
pub use verify::VerifyArgs;

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output
    Json,
}

/// Ads Sync Engine CLI
#[derive(Parser, Debug)]
#[command(name = "ads-sync")]
#[command(about = "Synchronize campaigns, apply bid changes and pull reports from the advertising API", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// JSON engine configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Advertising profile id (account scope)
    #[arg(long, global = true)]
    pub profile_id: Option<String>,

    /// API region: NA, EU or FE
    #[arg(long, global = true)]
    pub region: Option<Region>,

    /// Attempts per request, including the first (range: 1-20)
    #[arg(long, global = true, value_parser = clap::value_parser!(u32).range(1..=20))]
    pub max_retries: Option<u32>,

    /// Record intended mutations without submitting them
    #[arg(long, global = true, default_value_t = false)]
    pub dry_run: bool,

    /// Serve Prometheus metrics on this address (e.g. 127.0.0.1:9000)
    #[arg(long, global = true)]
    pub metrics_addr: Option<SocketAddr>,

    /// Write rotated refresh tokens to this file
    #[arg(long, global = true)]
    pub refresh_token_file: Option<PathBuf>,

    /// Output format (json or human)
    #[arg(long, global = true, default_value = "human")]
    pub output_format: OutputFormat,
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check credentials and profile access with a small campaign listing
    Verify(VerifyArgs),

    /// List campaigns, ad groups, keywords or negative keywords
    Entities(EntitiesArgs),

    /// Apply a JSON file of mutations in provider-sized batches
    Apply(ApplyArgs),

    /// Generate and download reports
    Report(ReportArgs),
}

impl Cli {
    /// Engine configuration: file (or defaults) with command-line overrides applied.
    pub fn engine_config(&self) -> Result<EngineConfig, CliError> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::from_json_file(path)?,
            None => EngineConfig::default(),
        };
        if let Some(region) = self.region {
            config.region = region;
        }
        if let Some(max_retries) = self.max_retries {
            config.retry.max_attempts = max_retries;
        }
        if self.dry_run {
            config.batch.dry_run = true;
        }
        config.validate()?;
        Ok(config)
    }

    /// Build the engine from configuration and environment credentials.
    pub fn build_engine(&self) -> Result<SyncEngine, CliError> {
        let config = self.engine_config()?;
        let credentials = ClientCredentials::from_env()?;
        Ok(SyncEngine::new(config, credentials)?)
    }

    /// Profile id given with `--profile-id`.
    pub fn scope(&self) -> Result<Scope, CliError> {
        self.profile_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(Scope::from)
            .ok_or_else(|| CliError::InvalidArgument("--profile-id is required".to_string()))
    }

    /// Run the selected command.
    pub async fn execute(&self, engine: &SyncEngine) -> Result<(), CliError> {
        match &self.command {
            Commands::Verify(args) => args.execute(self, engine).await,
            Commands::Entities(args) => args.execute(self, engine).await,
            Commands::Apply(args) => args.execute(self, engine).await,
            Commands::Report(args) => args.execute(self, engine).await,
        }
    }
}

/// Read and deserialize a JSON file.
pub(crate) fn read_json_file<T: DeserializeOwned>(path: &Path) -> Result<T, CliError> {
    let contents = std::fs::read_to_string(path).map_err(|e| CliError::file(path, e))?;
    serde_json::from_str(&contents).map_err(|e| CliError::json(path, e))
}

/// Print a value as pretty JSON on stdout.
pub(crate) fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|e| CliError::InvalidArgument(format!("failed to render output: {e}")))?;
    println!("{rendered}");
    Ok(())
}
