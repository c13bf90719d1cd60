//! Engine facade
//!
//! [`SyncEngine`] builds every component once per process and hands out the
//! shared pieces. The credential manager and rate limiter live for the whole
//! process; the entity cache and audit trail live for one engine (one run).

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::audit::{AuditError, AuditTrail};
use crate::auth::{ClientCredentials, CredentialError, CredentialManager};
use crate::batch::{BatchError, BatchMutationCoordinator, BatchResult, MutationRequest};
use crate::cache::EntityCache;
use crate::client::shared_resources::build_http_client;
use crate::client::{RateLimiter, RequestError, RequestExecutor};
use crate::config::{ConfigError, EngineConfig};
use crate::entities::{
    AdGroup, Campaign, ConnectionReport, EntityError, EntityService, Keyword, KeywordFilter,
    NegativeKeyword,
};
use crate::report::{ReportError, ReportJobPoller, ReportOutput, ReportSpec};
use crate::shutdown::{SharedShutdown, ShutdownCoordinator};
use crate::{EntityType, Scope};

/// Errors surfaced by [`SyncEngine`].
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid or unreadable configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// HTTP client could not be built
    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),

    /// API call failed
    #[error(transparent)]
    Request(#[from] RequestError),

    /// No token could be obtained
    #[error(transparent)]
    Credential(#[from] CredentialError),

    /// Entity listing or write failed
    #[error(transparent)]
    Entity(#[from] EntityError),

    /// Batch run aborted
    #[error(transparent)]
    Batch(#[from] BatchError),

    /// Report lifecycle failed
    #[error(transparent)]
    Report(#[from] ReportError),

    /// Audit trail could not be written
    #[error(transparent)]
    Audit(#[from] AuditError),
}

/// Result of [`SyncEngine::fetch_entities`].
#[derive(Debug, Clone)]
pub enum EntityListing {
    /// Cached campaigns
    Campaigns(Arc<Vec<Campaign>>),
    /// Cached ad groups
    AdGroups(Arc<Vec<AdGroup>>),
    /// Freshly read keywords
    Keywords(Vec<Keyword>),
    /// Freshly read negative keywords
    NegativeKeywords(Vec<NegativeKeyword>),
}

impl EntityListing {
    /// Number of entities
    pub fn len(&self) -> usize {
        match self {
            EntityListing::Campaigns(v) => v.len(),
            EntityListing::AdGroups(v) => v.len(),
            EntityListing::Keywords(v) => v.len(),
            EntityListing::NegativeKeywords(v) => v.len(),
        }
    }

    /// Whether the listing is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Listing as a JSON array.
    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            EntityListing::Campaigns(v) => serde_json::to_value(v.as_ref()),
            EntityListing::AdGroups(v) => serde_json::to_value(v.as_ref()),
            EntityListing::Keywords(v) => serde_json::to_value(v),
            EntityListing::NegativeKeywords(v) => serde_json::to_value(v),
        }
    }
}

/// Synchronization engine: one credential, one rate budget, one cache.
#[derive(Debug, Clone)]
pub struct SyncEngine {
    config: EngineConfig,
    credentials: CredentialManager,
    rate_limiter: Arc<RateLimiter>,
    executor: RequestExecutor,
    cache: Arc<EntityCache>,
    coordinator: BatchMutationCoordinator,
    entities: EntityService,
    reports: ReportJobPoller,
    audit: Arc<AuditTrail>,
    shutdown: SharedShutdown,
}

impl SyncEngine {
    /// Validate `config` and build every component.
    pub fn new(config: EngineConfig, client: ClientCredentials) -> Result<Self, EngineError> {
        config.validate()?;

        let http = build_http_client(&config.http)?;
        let shutdown = ShutdownCoordinator::shared();
        let credentials = CredentialManager::new(
            http.clone(),
            config.token_url(),
            client,
            config.retry.clone(),
            config.token_safety_buffer_secs,
        );
        let rate_limiter = Arc::new(RateLimiter::from_config(&config.rate_limit));
        let executor = RequestExecutor::new(
            http,
            config.api_base_url(),
            credentials.clone(),
            rate_limiter.clone(),
            config.retry.clone(),
        )
        .with_body_preview_bytes(config.http.body_preview_bytes)
        .with_default_deadline(config.http.call_deadline())
        .with_shutdown(shutdown.clone());

        let cache = Arc::new(EntityCache::new());
        let coordinator = BatchMutationCoordinator::new(executor.clone(), config.batch.clone())
            .with_cache(cache.clone())
            .with_shutdown(shutdown.clone());
        let entities = EntityService::new(
            executor.clone(),
            cache.clone(),
            coordinator.clone(),
            config.http.page_size,
        );
        let reports =
            ReportJobPoller::new(executor.clone(), config.report.clone()).with_shutdown(shutdown.clone());

        info!(
            region = %config.region,
            api_base_url = %executor.base_url(),
            requests_per_second = config.rate_limit.requests_per_second,
            burst = config.rate_limit.burst,
            max_attempts = config.retry.max_attempts,
            dry_run = config.batch.dry_run,
            "Sync engine initialized"
        );

        Ok(Self {
            config,
            credentials,
            rate_limiter,
            executor,
            cache,
            coordinator,
            entities,
            reports,
            audit: Arc::new(AuditTrail::new()),
            shutdown,
        })
    }

    /// Active configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Credential manager shared by every call
    pub fn credentials(&self) -> &CredentialManager {
        &self.credentials
    }

    /// Rate limiter shared by every call
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    /// Request executor
    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    /// Entity cache for this run
    pub fn cache(&self) -> &Arc<EntityCache> {
        &self.cache
    }

    /// Entity reads and writes
    pub fn entities(&self) -> &EntityService {
        &self.entities
    }

    /// Report jobs
    pub fn reports(&self) -> &ReportJobPoller {
        &self.reports
    }

    /// Audit trail for this run
    pub fn audit(&self) -> &Arc<AuditTrail> {
        &self.audit
    }

    /// Shutdown handle; requesting shutdown stops new calls, batches and polls.
    pub fn shutdown(&self) -> &SharedShutdown {
        &self.shutdown
    }

    /// Cached-or-fresh listing of one entity type.
    pub async fn fetch_entities(
        &self,
        scope: &Scope,
        entity_type: EntityType,
    ) -> Result<EntityListing, EngineError> {
        let listing = match entity_type {
            EntityType::Campaign => EntityListing::Campaigns(self.entities.campaigns(scope).await?),
            EntityType::AdGroup => EntityListing::AdGroups(self.entities.ad_groups(scope).await?),
            EntityType::Keyword => EntityListing::Keywords(
                self.entities
                    .keywords(scope, &KeywordFilter::default())
                    .await?,
            ),
            EntityType::NegativeKeyword => {
                EntityListing::NegativeKeywords(self.entities.negative_keywords(scope, None).await?)
            }
        };
        Ok(listing)
    }

    /// Apply mutations in batches and record each item in the audit trail.
    ///
    /// On a credential abort the partial outcomes are still audited before
    /// the error is returned.
    pub async fn apply_mutations(
        &self,
        scope: &Scope,
        entity_type: EntityType,
        mutations: &[MutationRequest],
    ) -> Result<BatchResult, EngineError> {
        let dry_run = self.config.batch.dry_run;
        match self.coordinator.apply(scope, entity_type, mutations).await {
            Ok(result) => {
                self.audit
                    .record_batch(entity_type, mutations, &result, dry_run);
                Ok(result)
            }
            Err(BatchError::Credential { source, partial }) => {
                self.audit
                    .record_batch(entity_type, mutations, &partial, dry_run);
                warn!(
                    scope = %scope,
                    succeeded = partial.succeeded(),
                    failed = partial.failed(),
                    "Mutation run aborted by credential failure"
                );
                Err(BatchError::Credential { source, partial }.into())
            }
        }
    }

    /// Generate and download one report.
    pub async fn run_report(&self, scope: &Scope, spec: &ReportSpec) -> Result<ReportOutput, EngineError> {
        Ok(self.reports.run_report(scope, spec).await?)
    }

    /// Generate and download several reports in the bounded worker pool.
    pub async fn run_reports(
        &self,
        scope: &Scope,
        specs: Vec<ReportSpec>,
    ) -> BTreeMap<String, Result<ReportOutput, ReportError>> {
        self.reports.run_reports(scope, specs).await
    }

    /// Check credentials and scope with a small campaign listing.
    pub async fn verify_connection(&self, scope: &Scope, sample_size: usize) -> ConnectionReport {
        self.entities.verify_connection(scope, sample_size).await
    }
}
