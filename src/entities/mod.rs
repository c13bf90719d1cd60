//! Entity listing and writes
//!
//! [`EntityService`] is the read/write surface the optimization layer uses:
//! - campaigns and ad groups are served through the [`EntityCache`]
//! - keywords and negative keywords are always read fresh
//! - filtered listings bypass the cache and never populate it
//! - single-entity writes invalidate the matching cache entry on success
//! - bulk updates and creations go through the [`BatchMutationCoordinator`];
//!   successful campaign and ad group writes drop the cached listing

pub mod models;
pub mod pagination;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info};

use crate::batch::{BatchError, BatchMutationCoordinator, BatchResult, MutationRequest};
use crate::cache::EntityCache;
use crate::client::region::paths;
use crate::client::{ApiRequest, RequestError, RequestExecutor};
use crate::{EntityType, Scope};

pub use models::{AdGroup, Campaign, Keyword, KeywordSuggestion, NegativeKeyword};
pub use pagination::paginate;

/// Errors from entity operations
#[derive(Debug, thiserror::Error)]
pub enum EntityError {
    /// Underlying API call failed
    #[error(transparent)]
    Request(#[from] RequestError),

    /// Batch run aborted
    #[error(transparent)]
    Batch(#[from] BatchError),

    /// Listing never returned a short page
    #[error("pagination of {path} exceeded {pages} pages")]
    PaginationLimit {
        /// Listing path
        path: String,
        /// Pages fetched before giving up
        pages: usize,
    },
}

/// Filters for keyword listings.
#[derive(Debug, Clone, Default)]
pub struct KeywordFilter {
    /// Only keywords of this campaign
    pub campaign_id: Option<String>,
    /// Only keywords of this ad group
    pub ad_group_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RecommendationsResponse {
    #[serde(default)]
    recommendations: Vec<KeywordSuggestion>,
}

/// Campaign fields shown by [`EntityService::verify_connection`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignSample {
    /// Campaign id
    pub campaign_id: String,
    /// Display name
    pub name: String,
    /// State
    pub state: String,
    /// Daily budget
    #[serde(with = "rust_decimal::serde::float")]
    pub daily_budget: rust_decimal::Decimal,
}

/// Result of a connectivity check.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionReport {
    /// Whether the sample listing succeeded
    pub success: bool,
    /// Campaigns returned by the sample listing
    pub campaign_count: usize,
    /// Up to `sample_size` campaigns
    pub sample: Vec<CampaignSample>,
    /// Error message when `success` is false
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Entity reads and writes for one engine.
#[derive(Debug, Clone)]
pub struct EntityService {
    executor: RequestExecutor,
    cache: Arc<EntityCache>,
    coordinator: BatchMutationCoordinator,
    page_size: usize,
}

impl EntityService {
    /// Create the service over shared components.
    pub fn new(
        executor: RequestExecutor,
        cache: Arc<EntityCache>,
        coordinator: BatchMutationCoordinator,
        page_size: usize,
    ) -> Self {
        Self {
            executor,
            cache,
            coordinator,
            page_size: page_size.max(1),
        }
    }

    /// Shared cache
    pub fn cache(&self) -> &Arc<EntityCache> {
        &self.cache
    }

    /// Batch coordinator used for bulk writes
    pub fn coordinator(&self) -> &BatchMutationCoordinator {
        &self.coordinator
    }

    /// Fetch every page of a listing, bypassing the cache.
    pub async fn list<T: DeserializeOwned>(
        &self,
        scope: &Scope,
        entity_type: EntityType,
        filters: &[(&str, String)],
    ) -> Result<Vec<T>, EntityError> {
        let path = entity_type.path();
        let executor = &self.executor;
        let items = paginate(path, self.page_size, |start_index, count| {
            let mut request = ApiRequest::get(path)
                .scope(scope.as_str())
                .query("startIndex", start_index)
                .query("count", count);
            for (key, value) in filters {
                request = request.query(*key, value);
            }
            async move { executor.execute_json::<Vec<T>>(request).await }
        })
        .await?;

        info!(
            scope = %scope,
            entity_type = %entity_type,
            count = items.len(),
            "Retrieved entities"
        );
        Ok(items)
    }

    /// All campaigns of a scope, cached for the run.
    pub async fn campaigns(&self, scope: &Scope) -> Result<Arc<Vec<Campaign>>, EntityError> {
        self.cache
            .get_or_fetch(scope, EntityType::Campaign, || {
                self.list(scope, EntityType::Campaign, &[])
            })
            .await
    }

    /// Campaigns in one state (`enabled`, `paused`, ...). Not cached.
    pub async fn campaigns_in_state(
        &self,
        scope: &Scope,
        state: &str,
    ) -> Result<Vec<Campaign>, EntityError> {
        self.list(scope, EntityType::Campaign, &[("stateFilter", state.to_string())])
            .await
    }

    /// Re-read all campaigns and replace the cached listing.
    pub async fn refresh_campaigns(&self, scope: &Scope) -> Result<Arc<Vec<Campaign>>, EntityError> {
        self.cache
            .fetch_fresh(scope, EntityType::Campaign, || {
                self.list(scope, EntityType::Campaign, &[])
            })
            .await
    }

    /// All ad groups of a scope, cached for the run.
    pub async fn ad_groups(&self, scope: &Scope) -> Result<Arc<Vec<AdGroup>>, EntityError> {
        self.cache
            .get_or_fetch(scope, EntityType::AdGroup, || {
                self.list(scope, EntityType::AdGroup, &[])
            })
            .await
    }

    /// Ad groups of one campaign. Not cached.
    pub async fn ad_groups_for_campaign(
        &self,
        scope: &Scope,
        campaign_id: &str,
    ) -> Result<Vec<AdGroup>, EntityError> {
        self.list(
            scope,
            EntityType::AdGroup,
            &[("campaignIdFilter", campaign_id.to_string())],
        )
        .await
    }

    /// Re-read all ad groups and replace the cached listing.
    pub async fn refresh_ad_groups(&self, scope: &Scope) -> Result<Arc<Vec<AdGroup>>, EntityError> {
        self.cache
            .fetch_fresh(scope, EntityType::AdGroup, || {
                self.list(scope, EntityType::AdGroup, &[])
            })
            .await
    }

    /// Keywords, always read fresh.
    pub async fn keywords(
        &self,
        scope: &Scope,
        filter: &KeywordFilter,
    ) -> Result<Vec<Keyword>, EntityError> {
        let mut filters = Vec::new();
        if let Some(campaign_id) = &filter.campaign_id {
            filters.push(("campaignIdFilter", campaign_id.clone()));
        }
        if let Some(ad_group_id) = &filter.ad_group_id {
            filters.push(("adGroupIdFilter", ad_group_id.clone()));
        }
        self.list(scope, EntityType::Keyword, &filters).await
    }

    /// Negative keywords, optionally of one campaign.
    pub async fn negative_keywords(
        &self,
        scope: &Scope,
        campaign_id: Option<&str>,
    ) -> Result<Vec<NegativeKeyword>, EntityError> {
        let filters: Vec<(&str, String)> = campaign_id
            .map(|id| vec![("campaignIdFilter", id.to_string())])
            .unwrap_or_default();
        self.list(scope, EntityType::NegativeKeyword, &filters).await
    }

    /// Update one campaign, then drop the cached campaign listing.
    pub async fn update_campaign(
        &self,
        scope: &Scope,
        campaign_id: &str,
        updates: &Value,
    ) -> Result<(), EntityError> {
        self.update_single(scope, EntityType::Campaign, campaign_id, updates)
            .await
    }

    /// Update one ad group, then drop the cached ad group listing.
    pub async fn update_ad_group(
        &self,
        scope: &Scope,
        ad_group_id: &str,
        updates: &Value,
    ) -> Result<(), EntityError> {
        self.update_single(scope, EntityType::AdGroup, ad_group_id, updates)
            .await
    }

    async fn update_single(
        &self,
        scope: &Scope,
        entity_type: EntityType,
        entity_id: &str,
        updates: &Value,
    ) -> Result<(), EntityError> {
        let path = format!("{}/{}", entity_type.path(), entity_id);
        let request = ApiRequest::put(path).scope(scope.as_str()).json(updates)?;

        match self.executor.execute(request).await {
            Ok(_) => {
                self.cache.invalidate(scope, entity_type);
                info!(scope = %scope, entity_type = %entity_type, entity_id, "Entity updated");
                Ok(())
            }
            Err(e) => {
                error!(
                    scope = %scope,
                    entity_type = %entity_type,
                    entity_id,
                    error = %e,
                    "Entity update failed"
                );
                Err(e.into())
            }
        }
    }

    /// Apply field updates in provider-sized batches.
    pub async fn apply_mutations(
        &self,
        scope: &Scope,
        entity_type: EntityType,
        mutations: &[MutationRequest],
    ) -> Result<BatchResult, EntityError> {
        Ok(self.coordinator.apply(scope, entity_type, mutations).await?)
    }

    /// Create campaigns. Succeeded items carry the new campaign ids.
    pub async fn create_campaigns(
        &self,
        scope: &Scope,
        campaigns: Vec<Value>,
    ) -> Result<BatchResult, EntityError> {
        self.create_cached(scope, EntityType::Campaign, campaigns).await
    }

    /// Create ad groups. Succeeded items carry the new ad group ids.
    pub async fn create_ad_groups(
        &self,
        scope: &Scope,
        ad_groups: Vec<Value>,
    ) -> Result<BatchResult, EntityError> {
        self.create_cached(scope, EntityType::AdGroup, ad_groups).await
    }

    async fn create_cached(
        &self,
        scope: &Scope,
        entity_type: EntityType,
        payloads: Vec<Value>,
    ) -> Result<BatchResult, EntityError> {
        let result = self.coordinator.create(scope, entity_type, payloads).await?;
        if result.succeeded() > 0 {
            self.cache.invalidate(scope, entity_type);
        }
        info!(
            scope = %scope,
            entity_type = %entity_type,
            created = result.succeeded(),
            failed = result.failed(),
            "Entities created"
        );
        Ok(result)
    }

    /// Keyword suggestions for one product (ASIN), at most `max_suggestions`.
    pub async fn keyword_suggestions(
        &self,
        scope: &Scope,
        asin: &str,
        max_suggestions: usize,
    ) -> Result<Vec<KeywordSuggestion>, EntityError> {
        let body = serde_json::json!({
            "asins": [asin],
            "maxRecommendations": max_suggestions,
        });
        let request = ApiRequest::post(paths::KEYWORD_RECOMMENDATIONS)
            .scope(scope.as_str())
            .json(&body)?;
        let response: RecommendationsResponse = self.executor.execute_json(request).await?;

        info!(
            scope = %scope,
            asin,
            suggestions = response.recommendations.len(),
            "Retrieved keyword suggestions"
        );
        Ok(response.recommendations)
    }

    /// Create keywords. Succeeded items carry the new keyword ids.
    pub async fn create_keywords(
        &self,
        scope: &Scope,
        keywords: Vec<Value>,
    ) -> Result<BatchResult, EntityError> {
        let result = self
            .coordinator
            .create(scope, EntityType::Keyword, keywords)
            .await?;
        info!(scope = %scope, created = result.succeeded(), failed = result.failed(), "Keywords created");
        Ok(result)
    }

    /// Create negative keywords. Succeeded items carry the new ids.
    pub async fn create_negative_keywords(
        &self,
        scope: &Scope,
        negatives: Vec<Value>,
    ) -> Result<BatchResult, EntityError> {
        let result = self
            .coordinator
            .create(scope, EntityType::NegativeKeyword, negatives)
            .await?;
        info!(
            scope = %scope,
            created = result.succeeded(),
            failed = result.failed(),
            "Negative keywords created"
        );
        Ok(result)
    }

    /// List a small campaign sample to check credentials and scope.
    ///
    /// Failures are reported in the returned value rather than as an error.
    pub async fn verify_connection(&self, scope: &Scope, sample_size: usize) -> ConnectionReport {
        let request = ApiRequest::get(EntityType::Campaign.path())
            .scope(scope.as_str())
            .query("startIndex", 0)
            .query("count", sample_size.max(1));

        match self.executor.execute_json::<Vec<Campaign>>(request).await {
            Ok(campaigns) => {
                info!(
                    scope = %scope,
                    campaigns = campaigns.len(),
                    "API connectivity verified"
                );
                ConnectionReport {
                    success: true,
                    campaign_count: campaigns.len(),
                    sample: campaigns
                        .into_iter()
                        .take(sample_size)
                        .map(|c| CampaignSample {
                            campaign_id: c.campaign_id,
                            name: c.name,
                            state: c.state,
                            daily_budget: c.daily_budget,
                        })
                        .collect(),
                    error: None,
                }
            }
            Err(e) => {
                error!(scope = %scope, error = %e, "API verification failed");
                ConnectionReport {
                    success: false,
                    campaign_count: 0,
                    sample: Vec::new(),
                    error: Some(e.to_string()),
                }
            }
        }
    }
}
