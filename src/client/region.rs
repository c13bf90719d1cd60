//! Provider regions and endpoint table
//!
//! The advertising API is served from one host per marketplace region while
//! the OAuth2 token endpoint is shared. Region differences are purely
//! configuration, the request code is identical for all of them.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// OAuth2 token endpoint shared by all regions.
pub const TOKEN_URL: &str = "https://api.amazon.com/auth/o2/token";

/// Endpoint paths used by the engine.
pub mod paths {
    /// Campaign listing and bulk update
    pub const CAMPAIGNS: &str = "/v2/sp/campaigns";
    /// Ad group listing and bulk update
    pub const AD_GROUPS: &str = "/v2/sp/adGroups";
    /// Keyword listing, creation and bulk update
    pub const KEYWORDS: &str = "/v2/sp/keywords";
    /// Negative keyword listing and creation
    pub const NEGATIVE_KEYWORDS: &str = "/v2/sp/negativeKeywords";
    /// Report status prefix (`/v2/reports/{reportId}`)
    pub const REPORTS: &str = "/v2/reports";
    /// Keyword recommendations for products
    pub const KEYWORD_RECOMMENDATIONS: &str = "/v2/sp/targets/keywords/recommendations";
}

/// Provider marketplace region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Region {
    /// North America
    #[default]
    #[serde(rename = "NA")]
    NorthAmerica,
    /// Europe
    #[serde(rename = "EU")]
    Europe,
    /// Far East
    #[serde(rename = "FE")]
    FarEast,
}

impl Region {
    /// API host for this region.
    pub fn api_base_url(&self) -> &'static str {
        match self {
            Region::NorthAmerica => "https://advertising-api.amazon.com",
            Region::Europe => "https://advertising-api-eu.amazon.com",
            Region::FarEast => "https://advertising-api-fe.amazon.com",
        }
    }

    /// Token endpoint for this region.
    pub fn token_url(&self) -> &'static str {
        TOKEN_URL
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Region::NorthAmerica => "NA",
            Region::Europe => "EU",
            Region::FarEast => "FE",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Region {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "NA" => Ok(Region::NorthAmerica),
            "EU" => Ok(Region::Europe),
            "FE" => Ok(Region::FarEast),
            _ => Err(format!("Invalid region: {s}. Valid options: NA, EU, FE")),
        }
    }
}
