//! Entities command: list one entity type for a profile

use clap::Args;
use std::sync::Arc;

use super::{print_json, Cli, CliError, OutputFormat};
use crate::engine::{EngineError, EntityListing, SyncEngine};
use crate::entities::{EntityError, KeywordFilter};
use crate::{EntityType, Scope};

/// Entities command arguments
#[derive(Debug, Args)]
pub struct EntitiesArgs {
    /// campaign, ad_group, keyword or negative_keyword
    pub entity_type: EntityType,

    /// Only campaigns in this state (enabled, paused, archived); bypasses the cache
    #[arg(long)]
    pub state: Option<String>,

    /// Only entities of this campaign (ad groups, keywords, negative keywords)
    #[arg(long)]
    pub campaign_id: Option<String>,
}

impl EntitiesArgs {
    /// Execute the entities command
    pub async fn execute(&self, cli: &Cli, engine: &SyncEngine) -> Result<(), CliError> {
        let scope = cli.scope()?;

        let listing = match self.filtered(&scope, engine).await.map_err(EngineError::from)? {
            Some(listing) => listing,
            None => engine.fetch_entities(&scope, self.entity_type).await?,
        };

        match cli.output_format {
            OutputFormat::Json => {
                let value = listing
                    .to_json()
                    .map_err(|e| CliError::InvalidArgument(format!("failed to render output: {e}")))?;
                print_json(&value)?;
            }
            OutputFormat::Human => print_human(&listing),
        }
        Ok(())
    }

    /// Filtered listings bypass the cache; `None` when no filter applies.
    async fn filtered(
        &self,
        scope: &Scope,
        engine: &SyncEngine,
    ) -> Result<Option<EntityListing>, EntityError> {
        let entities = engine.entities();
        let listing = match (self.entity_type, &self.state, &self.campaign_id) {
            (EntityType::Campaign, Some(state), _) => {
                EntityListing::Campaigns(Arc::new(entities.campaigns_in_state(scope, state).await?))
            }
            (EntityType::AdGroup, _, Some(campaign_id)) => EntityListing::AdGroups(Arc::new(
                entities.ad_groups_for_campaign(scope, campaign_id).await?,
            )),
            (EntityType::Keyword, _, Some(campaign_id)) => {
                let filter = KeywordFilter {
                    campaign_id: Some(campaign_id.clone()),
                    ad_group_id: None,
                };
                EntityListing::Keywords(entities.keywords(scope, &filter).await?)
            }
            (EntityType::NegativeKeyword, _, Some(campaign_id)) => EntityListing::NegativeKeywords(
                entities.negative_keywords(scope, Some(campaign_id)).await?,
            ),
            _ => return Ok(None),
        };
        Ok(Some(listing))
    }
}

fn print_human(listing: &EntityListing) {
    match listing {
        EntityListing::Campaigns(campaigns) => {
            println!("{} campaigns", campaigns.len());
            for c in campaigns.iter() {
                println!(
                    "  {} {:<40} {:<10} {:<7} budget {}",
                    c.campaign_id, c.name, c.state, c.targeting_type, c.daily_budget
                );
            }
        }
        EntityListing::AdGroups(ad_groups) => {
            println!("{} ad groups", ad_groups.len());
            for g in ad_groups.iter() {
                println!(
                    "  {} campaign {} {:<40} {:<10} default bid {}",
                    g.ad_group_id, g.campaign_id, g.name, g.state, g.default_bid
                );
            }
        }
        EntityListing::Keywords(keywords) => {
            println!("{} keywords", keywords.len());
            for k in keywords {
                println!(
                    "  {} ad group {} {:<40} {:<7} {:<10} bid {}",
                    k.keyword_id, k.ad_group_id, k.keyword_text, k.match_type, k.state, k.bid
                );
            }
        }
        EntityListing::NegativeKeywords(negatives) => {
            println!("{} negative keywords", negatives.len());
            for n in negatives {
                println!(
                    "  {} campaign {} {:<40} {}",
                    n.keyword_id, n.campaign_id, n.keyword_text, n.match_type
                );
            }
        }
    }
}
