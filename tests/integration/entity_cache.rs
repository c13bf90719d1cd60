//! Entity listings, the run cache and cache invalidation on writes

use std::sync::Arc;

use ads_sync_engine::EntityType;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

use super::support::{engine, mount_token, requests_to, scope, setup, test_config};

const CAMPAIGNS: &str = "/v2/sp/campaigns";

fn campaigns_body() -> serde_json::Value {
    json!([
        {"campaignId": 1001, "name": "Brand", "state": "enabled", "dailyBudget": 25.0, "targetingType": "manual"},
        {"campaignId": 1002, "name": "Generic", "state": "paused", "dailyBudget": 10.5, "targetingType": "auto"}
    ])
}

#[tokio::test]
async fn test_second_read_is_served_from_cache() {
    let (server, engine) = setup().await;
    Mock::given(method("GET"))
        .and(path(CAMPAIGNS))
        .respond_with(ResponseTemplate::new(200).set_body_json(campaigns_body()))
        .expect(1)
        .mount(&server)
        .await;

    let scope = scope();
    let first = engine.entities().campaigns(&scope).await.unwrap();
    let second = engine.entities().campaigns(&scope).await.unwrap();

    assert_eq!(first.len(), 2);
    assert_eq!(first[0].campaign_id, "1001");
    assert!(Arc::ptr_eq(&first, &second));
    assert!(engine.cache().contains(&scope, EntityType::Campaign));
}

#[tokio::test]
async fn test_invalidating_absent_entry_is_noop() {
    let (_server, engine) = setup().await;

    assert!(!engine.cache().invalidate(&scope(), EntityType::AdGroup));
    assert!(engine.cache().is_empty());
}

#[tokio::test]
async fn test_update_campaign_invalidates_listing() {
    let (server, engine) = setup().await;
    Mock::given(method("GET"))
        .and(path(CAMPAIGNS))
        .respond_with(ResponseTemplate::new(200).set_body_json(campaigns_body()))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/v2/sp/campaigns/1001"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"campaignId": 1001, "code": "SUCCESS"})))
        .expect(1)
        .mount(&server)
        .await;

    let scope = scope();
    let entities = engine.entities();
    entities.campaigns(&scope).await.unwrap();
    entities
        .update_campaign(&scope, "1001", &json!({"dailyBudget": 30.0}))
        .await
        .unwrap();
    assert!(!engine.cache().contains(&scope, EntityType::Campaign));

    entities.campaigns(&scope).await.unwrap();
    assert_eq!(requests_to(&server, CAMPAIGNS).await.len(), 2);
}

#[tokio::test]
async fn test_failed_fetch_is_not_cached() {
    let (server, engine) = setup().await;
    Mock::given(method("GET"))
        .and(path(CAMPAIGNS))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(CAMPAIGNS))
        .respond_with(ResponseTemplate::new(200).set_body_json(campaigns_body()))
        .mount(&server)
        .await;

    let scope = scope();
    assert!(engine.entities().campaigns(&scope).await.is_err());
    assert!(!engine.cache().contains(&scope, EntityType::Campaign));

    let campaigns = engine.entities().campaigns(&scope).await.unwrap();
    assert_eq!(campaigns.len(), 2);
}

#[tokio::test]
async fn test_listing_follows_pages() {
    let server = wiremock::MockServer::start().await;
    mount_token(&server).await;
    let mut config = test_config(&server);
    config.http.page_size = 2;
    let engine = engine(config);

    Mock::given(method("GET"))
        .and(path("/v2/sp/keywords"))
        .and(query_param("startIndex", "0"))
        .and(query_param("count", "2"))
        .and(query_param("campaignIdFilter", "1001"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"keywordId": 1, "adGroupId": 10, "campaignId": 1001, "keywordText": "shoes", "matchType": "exact", "state": "enabled", "bid": 0.5},
            {"keywordId": 2, "adGroupId": 10, "campaignId": 1001, "keywordText": "boots", "matchType": "broad", "state": "enabled", "bid": 0.7}
        ])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/sp/keywords"))
        .and(query_param("startIndex", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"keywordId": 3, "adGroupId": 11, "campaignId": 1001, "keywordText": "sandals", "matchType": "phrase", "state": "paused", "bid": 0.3}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let filter = ads_sync_engine::entities::KeywordFilter {
        campaign_id: Some("1001".to_string()),
        ad_group_id: None,
    };
    let keywords = engine.entities().keywords(&scope(), &filter).await.unwrap();

    let ids: Vec<&str> = keywords.iter().map(|k| k.keyword_id.as_str()).collect();
    assert_eq!(ids, vec!["1", "2", "3"]);
    // Keywords are never cached.
    assert!(engine.cache().is_empty());
}

#[tokio::test]
async fn test_verify_connection_reports_sample() {
    let (server, engine) = setup().await;
    Mock::given(method("GET"))
        .and(path(CAMPAIGNS))
        .and(query_param("count", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([campaigns_body()[0].clone()])))
        .mount(&server)
        .await;

    let report = engine.verify_connection(&scope(), 1).await;

    assert!(report.success);
    assert_eq!(report.campaign_count, 1);
    assert_eq!(report.sample[0].name, "Brand");
    assert!(report.error.is_none());
}

#[tokio::test]
async fn test_verify_connection_reports_failure() {
    let (server, engine) = setup().await;
    Mock::given(method("GET"))
        .and(path(CAMPAIGNS))
        .respond_with(ResponseTemplate::new(404).set_body_string("profile not found"))
        .mount(&server)
        .await;

    let report = engine.verify_connection(&scope(), 5).await;

    assert!(!report.success);
    assert!(report.error.unwrap().contains("profile not found"));
}

#[tokio::test]
async fn test_create_campaign_refetches_cached_listing() {
    let (server, engine) = setup().await;
    Mock::given(method("GET"))
        .and(path(CAMPAIGNS))
        .respond_with(ResponseTemplate::new(200).set_body_json(campaigns_body()))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(CAMPAIGNS))
        .respond_with(ResponseTemplate::new(207).set_body_json(json!([
            {"code": "SUCCESS", "campaignId": 1003}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let scope = scope();
    let entities = engine.entities();
    entities.campaigns(&scope).await.unwrap();

    let result = entities
        .create_campaigns(
            &scope,
            vec![json!({"name": "Launch", "targetingType": "manual", "state": "enabled", "dailyBudget": 15.0})],
        )
        .await
        .unwrap();
    assert_eq!(result.succeeded_ids(), vec!["1003".to_string()]);
    assert!(!engine.cache().contains(&scope, EntityType::Campaign));

    entities.campaigns(&scope).await.unwrap();
    let listings = requests_to(&server, CAMPAIGNS)
        .await
        .into_iter()
        .filter(|r| r.method.as_str() == "GET")
        .count();
    assert_eq!(listings, 2);
}

#[tokio::test]
async fn test_rejected_ad_group_creation_keeps_cache() {
    let (server, engine) = setup().await;
    Mock::given(method("GET"))
        .and(path("/v2/sp/adGroups"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"adGroupId": 10, "campaignId": 1001, "name": "Exact", "state": "enabled", "defaultBid": 0.75}
        ])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/sp/adGroups"))
        .respond_with(ResponseTemplate::new(207).set_body_json(json!([
            {"code": "INVALID_ARGUMENT", "details": "campaign not found"}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let scope = scope();
    let entities = engine.entities();
    entities.ad_groups(&scope).await.unwrap();

    let result = entities
        .create_ad_groups(&scope, vec![json!({"campaignId": 9999, "name": "Broad", "defaultBid": 0.5})])
        .await
        .unwrap();
    assert_eq!(result.failed(), 1);
    assert!(engine.cache().contains(&scope, EntityType::AdGroup));
}

#[tokio::test]
async fn test_refresh_replaces_cached_listings() {
    let (server, engine) = setup().await;
    Mock::given(method("GET"))
        .and(path(CAMPAIGNS))
        .respond_with(ResponseTemplate::new(200).set_body_json(campaigns_body()))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(CAMPAIGNS))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([campaigns_body()[0].clone()])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/sp/adGroups"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"adGroupId": 10, "campaignId": 1001}
        ])))
        .expect(2)
        .mount(&server)
        .await;

    let scope = scope();
    let entities = engine.entities();
    assert_eq!(entities.campaigns(&scope).await.unwrap().len(), 2);

    let refreshed = entities.refresh_campaigns(&scope).await.unwrap();
    assert_eq!(refreshed.len(), 1);
    let cached = entities.campaigns(&scope).await.unwrap();
    assert!(Arc::ptr_eq(&refreshed, &cached));

    entities.ad_groups(&scope).await.unwrap();
    let groups = entities.refresh_ad_groups(&scope).await.unwrap();
    assert_eq!(groups[0].ad_group_id, "10");
    assert_eq!(requests_to(&server, CAMPAIGNS).await.len(), 2);
}

#[tokio::test]
async fn test_keyword_suggestions_for_product() {
    let (server, engine) = setup().await;
    Mock::given(method("POST"))
        .and(path("/v2/sp/targets/keywords/recommendations"))
        .and(body_partial_json(json!({"asins": ["B000TEST01"], "maxRecommendations": 2})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "recommendations": [
                {"keyword": "trail running shoes", "matchType": "exact", "bid": 1.1},
                {"keyword": "running shoes"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let suggestions = engine
        .entities()
        .keyword_suggestions(&scope(), "B000TEST01", 2)
        .await
        .unwrap();

    assert_eq!(suggestions.len(), 2);
    assert_eq!(suggestions[0].keyword, "trail running shoes");
    assert_eq!(suggestions[0].match_type, "exact");
    assert_eq!(suggestions[1].match_type, "broad");
    assert_eq!(suggestions[1].suggested_bid.to_string(), "0.5");
}
