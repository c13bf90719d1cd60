//! Batch mutation runs: chunking, per-item outcomes, dry runs and aborts

use ads_sync_engine::batch::BatchError;
use ads_sync_engine::{EngineError, EntityType, ItemOutcome, MutationRequest};
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use super::support::{engine, requests_to, scope, test_config, TOKEN_PATH};

const KEYWORDS: &str = "/v2/sp/keywords";

/// Answers a keyword batch with one row per item, rejecting the listed ids.
struct KeywordBatchResponder {
    rejected: Vec<u64>,
}

impl Respond for KeywordBatchResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let items: Vec<Value> = serde_json::from_slice(&request.body).unwrap_or_default();
        let rows: Vec<Value> = items
            .iter()
            .map(|item| {
                let id = item["keywordId"].as_u64().unwrap_or_default();
                if self.rejected.contains(&id) {
                    json!({"keywordId": id, "code": "INVALID_ARGUMENT", "details": "bid below minimum"})
                } else {
                    json!({"keywordId": id, "code": "SUCCESS"})
                }
            })
            .collect();
        ResponseTemplate::new(207).set_body_json(rows)
    }
}

fn bid_changes(count: u64) -> Vec<MutationRequest> {
    (0..count)
        .map(|i| {
            MutationRequest::new((100 + i).to_string(), "bid", 0.5 + i as f64 / 100.0)
                .with_old_value(0.45)
                .with_reason("acos above target")
        })
        .collect()
}

async fn server_with_token() -> MockServer {
    let server = MockServer::start().await;
    super::support::mount_token(&server).await;
    server
}

#[tokio::test]
async fn test_partial_failures_are_reported_per_item() {
    let server = server_with_token().await;
    Mock::given(method("PUT"))
        .and(path(KEYWORDS))
        .respond_with(KeywordBatchResponder {
            rejected: vec![103, 107],
        })
        .mount(&server)
        .await;

    let mut config = test_config(&server);
    config.batch.max_items = 5;
    let engine = engine(config);
    let mutations = bid_changes(10);

    let result = engine
        .apply_mutations(&scope(), EntityType::Keyword, &mutations)
        .await
        .unwrap();

    assert_eq!(result.total(), 10);
    assert_eq!(result.succeeded(), 8);
    assert_eq!(result.failed(), 2);
    assert_eq!(result.batch_calls(), 2);
    // Progress is tallied from per-batch summaries.
    let batch_succeeded: Vec<usize> = result.batches.iter().map(|b| b.succeeded).collect();
    let batch_failed: Vec<usize> = result.batches.iter().map(|b| b.failed).collect();
    assert_eq!(batch_succeeded, vec![4, 4]);
    assert_eq!(batch_failed, vec![1, 1]);

    let failed: Vec<&str> = result
        .failures()
        .filter_map(|item| item.entity_id.as_deref())
        .collect();
    assert_eq!(failed, vec!["103", "107"]);
    match &result.items[3].outcome {
        ItemOutcome::Failed { code, details } => {
            assert_eq!(code.as_deref(), Some("INVALID_ARGUMENT"));
            assert_eq!(details, "bid below minimum");
        }
        other => panic!("expected failure, got {other:?}"),
    }

    let audit = engine.audit().entries();
    assert_eq!(audit.len(), 10);
    assert_eq!(audit[0].action_type, "update_bid");
    assert_eq!(audit[0].outcome, "succeeded");
    assert!(audit[3].outcome.starts_with("failed: INVALID_ARGUMENT"));
}

#[tokio::test]
async fn test_items_are_chunked_in_order() {
    let server = server_with_token().await;
    Mock::given(method("PUT"))
        .and(path(KEYWORDS))
        .respond_with(KeywordBatchResponder { rejected: vec![] })
        .mount(&server)
        .await;

    let mut config = test_config(&server);
    config.batch.max_items = 10;
    config.batch.concurrency = 2;
    let engine = engine(config);
    let mutations = bid_changes(23);

    let result = engine
        .apply_mutations(&scope(), EntityType::Keyword, &mutations)
        .await
        .unwrap();

    assert_eq!(result.batch_calls(), 3);
    let sizes: Vec<usize> = result.batches.iter().map(|b| b.size).collect();
    assert_eq!(sizes, vec![10, 10, 3]);

    let indices: Vec<usize> = result.items.iter().map(|i| i.index).collect();
    assert_eq!(indices, (0..23).collect::<Vec<_>>());
    assert_eq!(result.succeeded(), 23);

    let calls = requests_to(&server, KEYWORDS).await;
    assert_eq!(calls.len(), 3);
    let mut submitted: Vec<u64> = calls
        .iter()
        .flat_map(|r| serde_json::from_slice::<Vec<Value>>(&r.body).unwrap())
        .map(|item| item["keywordId"].as_u64().unwrap())
        .collect();
    submitted.sort_unstable();
    assert_eq!(submitted, (100..123).collect::<Vec<u64>>());
}

#[tokio::test]
async fn test_dry_run_submits_nothing() {
    let server = server_with_token().await;
    let mut config = test_config(&server);
    config.batch.dry_run = true;
    let engine = engine(config);

    let result = engine
        .apply_mutations(&scope(), EntityType::Keyword, &bid_changes(4))
        .await
        .unwrap();

    assert_eq!(result.skipped(), 4);
    assert_eq!(result.batch_calls(), 0);
    assert!(requests_to(&server, KEYWORDS).await.is_empty());

    let audit = engine.audit().entries();
    assert_eq!(audit.len(), 4);
    assert!(audit.iter().all(|e| e.dry_run && e.outcome == "skipped"));
}

#[tokio::test]
async fn test_credential_failure_aborts_remaining_batches() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access-1",
            "expires_in": 3600
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_string(r#"{"error":"invalid_grant"}"#))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(KEYWORDS))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let mut config = test_config(&server);
    config.batch.max_items = 5;
    let engine = engine(config);

    let err = engine
        .apply_mutations(&scope(), EntityType::Keyword, &bid_changes(10))
        .await
        .unwrap_err();

    match err {
        EngineError::Batch(BatchError::Credential { partial, .. }) => {
            assert_eq!(partial.failed(), 10);
            assert!(!partial.batches[1].submitted);
        }
        other => panic!("expected credential abort, got {other}"),
    }
    assert_eq!(requests_to(&server, KEYWORDS).await.len(), 1);
    // Partial outcomes are still audited.
    assert_eq!(engine.audit().len(), 10);
}

#[tokio::test]
async fn test_created_keywords_carry_new_ids() {
    let server = server_with_token().await;
    Mock::given(method("POST"))
        .and(path(KEYWORDS))
        .respond_with(ResponseTemplate::new(207).set_body_json(json!([
            {"code": "SUCCESS", "keywordId": 9001},
            {"code": "DUPLICATE_VALUE", "details": "keyword already exists"}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let engine = engine(test_config(&server));
    let keywords = vec![
        json!({"campaignId": 1001, "adGroupId": 10, "keywordText": "trail shoes", "matchType": "exact", "state": "enabled", "bid": 0.6}),
        json!({"campaignId": 1001, "adGroupId": 10, "keywordText": "shoes", "matchType": "exact", "state": "enabled", "bid": 0.6}),
    ];

    let result = engine
        .entities()
        .create_keywords(&scope(), keywords)
        .await
        .unwrap();

    assert_eq!(result.succeeded_ids(), vec!["9001".to_string()]);
    assert_eq!(result.failed(), 1);
    assert!(result.items[1].entity_id.is_none());
}
