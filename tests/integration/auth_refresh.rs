//! Token refresh: single flight, rotation and 401 recovery

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use ads_sync_engine::client::ApiRequest;
use ads_sync_engine::{CredentialError, RequestError};
use futures::future::join_all;
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use super::support::{engine, requests_to, scope, test_config, TOKEN_PATH};

fn token_body(access_token: &str) -> serde_json::Value {
    json!({"access_token": access_token, "token_type": "bearer", "expires_in": 3600})
}

#[tokio::test]
async fn test_concurrent_callers_share_one_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(token_body("access-1"))
                .set_delay(Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let engine = engine(test_config(&server));
    let credentials = engine.credentials();

    let results = join_all((0..10).map(|_| credentials.get_access_token(false))).await;

    for result in results {
        assert_eq!(result.unwrap().access_token(), "access-1");
    }
    assert_eq!(credentials.refresh_requests(), 1);
}

#[tokio::test]
async fn test_fresh_token_is_reused() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("access-1")))
        .expect(1)
        .mount(&server)
        .await;

    let engine = engine(test_config(&server));
    engine.credentials().get_access_token(false).await.unwrap();
    engine.credentials().get_access_token(false).await.unwrap();

    assert_eq!(engine.credentials().refresh_requests(), 1);
}

#[tokio::test]
async fn test_rotated_refresh_token_is_announced_and_used() {
    let server = MockServer::start().await;
    // Mounted first so it wins once the rotated token is sent.
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("refresh_token=refresh-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("access-2")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access-1",
            "refresh_token": "refresh-2",
            "expires_in": 3600
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    let engine = engine(test_config(&server));
    let credentials = engine.credentials();
    let mut rotations = credentials.subscribe_rotations();

    let first = credentials.get_access_token(false).await.unwrap();
    assert_eq!(first.access_token(), "access-1");
    assert_eq!(first.refresh_token(), "refresh-2");

    let rotation = rotations.try_recv().unwrap();
    assert_eq!(rotation.refresh_token, "refresh-2");
    assert_eq!(rotation.fingerprint, ads_sync_engine::auth::fingerprint("refresh-2"));

    let second = credentials.get_access_token(true).await.unwrap();
    assert_eq!(second.access_token(), "access-2");
    assert_eq!(second.refresh_token(), "refresh-2");

    // The second response carried no new refresh token.
    assert!(rotations.try_recv().is_err());
    assert_eq!(credentials.rotation_count(), 1);
}

#[tokio::test]
async fn test_rejected_refresh_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_string(r#"{"error":"invalid_grant"}"#))
        .mount(&server)
        .await;

    let engine = engine(test_config(&server));
    let err = engine.credentials().get_access_token(false).await.unwrap_err();

    match err {
        CredentialError::Rejected { status, body_preview } => {
            assert_eq!(status, 400);
            assert!(body_preview.contains("invalid_grant"));
        }
        other => panic!("expected rejection, got {other}"),
    }
    assert_eq!(requests_to(&server, TOKEN_PATH).await.len(), 1);
}

#[tokio::test]
async fn test_unauthorized_call_refreshes_and_retries_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("access-1")))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("access-2")))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v2/sp/campaigns"))
        .and(header("Authorization", "Bearer access-1"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/sp/campaigns"))
        .and(header("Authorization", "Bearer access-2"))
        .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
        .expect(1)
        .mount(&server)
        .await;

    let engine = engine(test_config(&server));
    let response = engine
        .executor()
        .execute(ApiRequest::get("/v2/sp/campaigns").scope(scope().as_str()))
        .await
        .unwrap();

    assert_eq!(response.status.as_u16(), 200);
    assert_eq!(engine.credentials().refresh_requests(), 2);
}

#[tokio::test]
async fn test_persistent_unauthorized_is_surfaced() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("access-1")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/sp/campaigns"))
        .respond_with(ResponseTemplate::new(401).set_body_string("token revoked"))
        .mount(&server)
        .await;

    let engine = engine(test_config(&server));
    let err = engine
        .executor()
        .execute(ApiRequest::get("/v2/sp/campaigns").scope(scope().as_str()))
        .await
        .unwrap_err();

    assert!(matches!(err, RequestError::Unauthorized { .. }), "got {err}");
    assert_eq!(requests_to(&server, "/v2/sp/campaigns").await.len(), 2);
}

/// Token endpoint that records when each refresh arrives.
struct RecordingTokenEndpoint {
    arrivals: Arc<Mutex<Vec<Instant>>>,
}

impl Respond for RecordingTokenEndpoint {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        self.arrivals.lock().unwrap().push(Instant::now());
        ResponseTemplate::new(200)
            .set_body_json(token_body("access-1"))
            .set_delay(Duration::from_millis(100))
    }
}

#[tokio::test]
async fn test_forced_refreshes_never_overlap() {
    let server = MockServer::start().await;
    let arrivals = Arc::new(Mutex::new(Vec::new()));
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(RecordingTokenEndpoint {
            arrivals: arrivals.clone(),
        })
        .mount(&server)
        .await;

    let engine = engine(test_config(&server));
    let credentials = engine.credentials();

    let results = join_all((0..3).map(|_| credentials.get_access_token(true))).await;
    for result in results {
        assert_eq!(result.unwrap().access_token(), "access-1");
    }

    let arrivals = arrivals.lock().unwrap().clone();
    assert_eq!(arrivals.len(), 3);
    for pair in arrivals.windows(2) {
        // Each refresh starts only after the previous 100ms response landed.
        assert!(pair[1] - pair[0] >= Duration::from_millis(90));
    }
}
