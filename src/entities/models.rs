//! Entity payloads as returned by the listing endpoints.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

/// Ids arrive as JSON numbers; they are kept as strings.
fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Number(u64),
        Text(String),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Number(n) => n.to_string(),
        RawId::Text(s) => s,
    })
}

fn opt_id_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wrapped(#[serde(deserialize_with = "id_string")] String);

    Ok(Option::<Wrapped>::deserialize(deserializer)?.map(|w| w.0))
}

/// Sponsored products campaign
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    /// Campaign id
    #[serde(deserialize_with = "id_string")]
    pub campaign_id: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// `enabled`, `paused` or `archived`
    #[serde(default)]
    pub state: String,
    /// Daily budget
    #[serde(default, with = "rust_decimal::serde::float")]
    pub daily_budget: Decimal,
    /// `manual` or `auto`
    #[serde(default)]
    pub targeting_type: String,
}

/// Ad group within a campaign
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdGroup {
    /// Ad group id
    #[serde(deserialize_with = "id_string")]
    pub ad_group_id: String,
    /// Owning campaign
    #[serde(deserialize_with = "id_string")]
    pub campaign_id: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// `enabled`, `paused` or `archived`
    #[serde(default)]
    pub state: String,
    /// Bid applied to keywords without their own bid
    #[serde(default, with = "rust_decimal::serde::float")]
    pub default_bid: Decimal,
}

/// Biddable keyword
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Keyword {
    /// Keyword id
    #[serde(deserialize_with = "id_string")]
    pub keyword_id: String,
    /// Owning ad group
    #[serde(deserialize_with = "id_string")]
    pub ad_group_id: String,
    /// Owning campaign
    #[serde(deserialize_with = "id_string")]
    pub campaign_id: String,
    /// Keyword text
    #[serde(default)]
    pub keyword_text: String,
    /// `exact`, `phrase` or `broad`
    #[serde(default)]
    pub match_type: String,
    /// `enabled`, `paused` or `archived`
    #[serde(default)]
    pub state: String,
    /// Current bid
    #[serde(default, with = "rust_decimal::serde::float")]
    pub bid: Decimal,
}

/// Negative keyword
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NegativeKeyword {
    /// Keyword id
    #[serde(deserialize_with = "id_string")]
    pub keyword_id: String,
    /// Owning campaign
    #[serde(deserialize_with = "id_string")]
    pub campaign_id: String,
    /// Owning ad group, absent for campaign-level negatives
    #[serde(default, deserialize_with = "opt_id_string")]
    pub ad_group_id: Option<String>,
    /// Keyword text
    #[serde(default)]
    pub keyword_text: String,
    /// `negativeExact` or `negativePhrase`
    #[serde(default)]
    pub match_type: String,
    /// `enabled` or `archived`
    #[serde(default)]
    pub state: String,
}

/// Keyword suggested for a product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeywordSuggestion {
    /// Suggested keyword text
    #[serde(default)]
    pub keyword: String,
    /// Suggested match type
    #[serde(default = "default_match_type")]
    pub match_type: String,
    /// Suggested bid
    #[serde(rename = "bid", default = "default_suggested_bid", with = "rust_decimal::serde::float")]
    pub suggested_bid: Decimal,
}

fn default_match_type() -> String {
    "broad".to_string()
}

fn default_suggested_bid() -> Decimal {
    Decimal::new(5, 1)
}
