//! # Ads Sync Engine Library
//!
//! Synchronization and optimization engine for an advertising platform's REST
//! API. Keeps bid and campaign adjustments flowing under strict per-second
//! rate limits, with asynchronous report generation and partial-failure
//! tolerance across hundreds of campaigns and thousands of keywords.
//!
//! ## Features
//!
//! - **Auto-rotating credential**: OAuth2 refresh with single-flight
//!   concurrency and rotated refresh-token signalling
//! - **Shared rate budget**: token bucket with burst, applied to every attempt
//! - **Retries**: exponential backoff on network failures, 429 and 5xx
//! - **Entity cache**: run-scoped, explicitly invalidated listing cache
//! - **Batch mutations**: provider-sized batches with per-item outcomes
//! - **Report jobs**: adaptive polling, zip/gzip/raw decoding, bounded worker pool
//!
//! ## Quick Start
//!
//! ```no_run
//! use ads_sync_engine::{auth::ClientCredentials, config::EngineConfig, engine::SyncEngine, Scope};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = SyncEngine::new(EngineConfig::default(), ClientCredentials::from_env()?)?;
//! let scope = Scope::from("1234567890");
//!
//! let campaigns = engine.entities().campaigns(&scope).await?;
//! println!("{} campaigns", campaigns.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! Leaves first:
//!
//! - [`auth`] - OAuth2 credential manager
//! - [`client`] - rate limiter, request executor, retry policy
//! - [`cache`] - entity cache keyed by scope and entity type
//! - [`entities`] - campaign, ad group and keyword listing and writes
//! - [`batch`] - batch mutation coordinator
//! - [`report`] - report job creation, polling, download and decoding
//! - [`engine`] - facade wiring everything together once per process

#![warn(missing_docs)]
#![warn(clippy::all)]

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Audit trail of attempted mutations
pub mod audit;

/// OAuth2 credential lifecycle
pub mod auth;

/// Batch mutation coordination
pub mod batch;

/// Run-scoped entity cache
pub mod cache;

/// CLI command implementations
pub mod cli;

/// HTTP plumbing: rate limiting, execution, retries
pub mod client;

/// Engine configuration and tuning constants
pub mod config;

/// Engine facade
pub mod engine;

/// Entity models and API operations
pub mod entities;

/// Observability metrics
pub mod metrics;

/// Asynchronous report jobs
pub mod report;

/// Graceful shutdown coordination shared across modules
pub mod shutdown;

// Re-export commonly used types
pub use auth::{ClientCredentials, Credential, CredentialError, CredentialManager};
pub use batch::{BatchMutationCoordinator, BatchResult, ItemOutcome, MutationRequest};
pub use cache::EntityCache;
pub use client::{RateLimiter, RequestError, RequestExecutor};
pub use config::EngineConfig;
pub use engine::{EngineError, SyncEngine};
pub use report::{ReportJob, ReportJobPoller, ReportSpec, ReportStatus};

/// Account scope (advertising profile id). Partitions all entity data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Scope(String);

impl Scope {
    /// Wrap a profile id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Profile id as sent in the scope header.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Scope {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for Scope {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Entity kinds the engine reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// Sponsored products campaign
    Campaign,
    /// Ad group within a campaign
    AdGroup,
    /// Biddable keyword
    Keyword,
    /// Negative keyword
    NegativeKeyword,
}

impl EntityType {
    /// Stable label for logs, metrics and the audit trail.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Campaign => "campaign",
            EntityType::AdGroup => "ad_group",
            EntityType::Keyword => "keyword",
            EntityType::NegativeKeyword => "negative_keyword",
        }
    }

    /// Listing and bulk mutation path.
    pub fn path(&self) -> &'static str {
        use client::region::paths;
        match self {
            EntityType::Campaign => paths::CAMPAIGNS,
            EntityType::AdGroup => paths::AD_GROUPS,
            EntityType::Keyword => paths::KEYWORDS,
            EntityType::NegativeKeyword => paths::NEGATIVE_KEYWORDS,
        }
    }

    /// JSON field holding the entity id in provider payloads.
    pub fn id_field(&self) -> &'static str {
        match self {
            EntityType::Campaign => "campaignId",
            EntityType::AdGroup => "adGroupId",
            EntityType::Keyword | EntityType::NegativeKeyword => "keywordId",
        }
    }

    /// Whether listings of this type are served from the entity cache.
    pub fn is_cached(&self) -> bool {
        matches!(self, EntityType::Campaign | EntityType::AdGroup)
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "campaign" | "campaigns" => Ok(EntityType::Campaign),
            "ad_group" | "ad_groups" | "adgroup" | "adgroups" => Ok(EntityType::AdGroup),
            "keyword" | "keywords" => Ok(EntityType::Keyword),
            "negative_keyword" | "negative_keywords" => Ok(EntityType::NegativeKeyword),
            _ => Err(format!(
                "Invalid entity type: {s}. Valid options: campaign, ad_group, keyword, negative_keyword"
            )),
        }
    }
}
