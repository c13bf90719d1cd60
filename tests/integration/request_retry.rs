//! Request executor retry behaviour against a mock provider

use std::time::{Duration, Instant};

use ads_sync_engine::client::ApiRequest;
use ads_sync_engine::RequestError;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::support::{engine, mount_token, requests_to, scope, setup, test_config, PROFILE_ID, TOKEN_PATH};

const CAMPAIGNS: &str = "/v2/sp/campaigns";

#[tokio::test]
async fn test_transient_failures_are_retried_with_backoff() {
    let (server, engine) = setup().await;

    Mock::given(method("GET"))
        .and(path(CAMPAIGNS))
        .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(CAMPAIGNS))
        .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
        .mount(&server)
        .await;

    let started = Instant::now();
    let response = engine
        .executor()
        .execute(ApiRequest::get(CAMPAIGNS).scope(scope().as_str()))
        .await
        .unwrap();

    assert_eq!(response.attempts, 3);
    assert_eq!(response.status.as_u16(), 200);
    // 20ms then 40ms of backoff
    assert!(started.elapsed() >= Duration::from_millis(60));
    assert_eq!(requests_to(&server, CAMPAIGNS).await.len(), 3);
}

#[tokio::test]
async fn test_retries_exhaust_into_transient_error() {
    let (server, engine) = setup().await;

    Mock::given(method("GET"))
        .and(path(CAMPAIGNS))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let err = engine
        .executor()
        .execute(ApiRequest::get(CAMPAIGNS).scope(scope().as_str()))
        .await
        .unwrap_err();

    assert!(err.is_transient(), "unexpected error: {err}");
    assert_eq!(err.status(), Some(429));
    assert_eq!(requests_to(&server, CAMPAIGNS).await.len(), 3);
}

#[tokio::test]
async fn test_validation_errors_are_not_retried() {
    let (server, engine) = setup().await;

    Mock::given(method("GET"))
        .and(path(CAMPAIGNS))
        .respond_with(ResponseTemplate::new(400).set_body_string(r#"{"code":"INVALID_ARGUMENT"}"#))
        .mount(&server)
        .await;

    let err = engine
        .executor()
        .execute(ApiRequest::get(CAMPAIGNS).scope(scope().as_str()))
        .await
        .unwrap_err();

    match err {
        RequestError::Validation { status, body_preview, .. } => {
            assert_eq!(status, 400);
            assert!(body_preview.contains("INVALID_ARGUMENT"));
        }
        other => panic!("expected validation error, got {other}"),
    }
    assert_eq!(requests_to(&server, CAMPAIGNS).await.len(), 1);
}

#[tokio::test]
async fn test_provider_headers_are_sent() {
    let (server, engine) = setup().await;

    Mock::given(method("GET"))
        .and(path(CAMPAIGNS))
        .and(header("Authorization", "Bearer access-1"))
        .and(header("Amazon-Advertising-API-ClientId", "client-id"))
        .and(header("Amazon-Advertising-API-Scope", PROFILE_ID))
        .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
        .expect(1)
        .mount(&server)
        .await;

    engine
        .executor()
        .execute(ApiRequest::get(CAMPAIGNS).scope(scope().as_str()))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_shutdown_stops_new_calls() {
    let (server, engine) = setup().await;
    engine.shutdown().request_shutdown();

    let err = engine
        .executor()
        .execute(ApiRequest::get(CAMPAIGNS).scope(scope().as_str()))
        .await
        .unwrap_err();

    assert!(matches!(err, RequestError::Cancelled));
    assert!(requests_to(&server, CAMPAIGNS).await.is_empty());
}

#[tokio::test]
async fn test_credentials_stay_off_lookalike_hosts() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    let uri = server.uri();
    // Base URL whose text is a prefix of the server's, on another port.
    let mut config = test_config(&server);
    config.api_base_url = Some(uri[..uri.len() - 1].to_string());
    let engine = engine(config);

    Mock::given(method("GET"))
        .and(path("/files/report"))
        .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
        .mount(&server)
        .await;

    engine
        .executor()
        .execute(ApiRequest::get(format!("{uri}/files/report")).scope(scope().as_str()))
        .await
        .unwrap();

    let received = requests_to(&server, "/files/report").await;
    assert_eq!(received.len(), 1);
    assert!(received[0].headers.get("authorization").is_none());
    assert!(received[0].headers.get("amazon-advertising-api-scope").is_none());
    assert!(requests_to(&server, TOKEN_PATH).await.is_empty());
}

#[tokio::test]
async fn test_error_body_preview_is_bounded() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    let mut config = test_config(&server);
    config.http.body_preview_bytes = 16;
    let engine = engine(config);

    Mock::given(method("GET"))
        .and(path(CAMPAIGNS))
        .respond_with(ResponseTemplate::new(400).set_body_string("x".repeat(4096)))
        .mount(&server)
        .await;

    let err = engine
        .executor()
        .execute(ApiRequest::get(CAMPAIGNS).scope(scope().as_str()))
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(400));
    assert_eq!(err.body_preview(), Some("x".repeat(16).as_str()));
}

#[tokio::test]
async fn test_exhausted_retries_keep_last_body_preview() {
    let (server, engine) = setup().await;

    Mock::given(method("GET"))
        .and(path(CAMPAIGNS))
        .respond_with(ResponseTemplate::new(503).set_body_string("service unavailable, try later"))
        .mount(&server)
        .await;

    let err = engine
        .executor()
        .execute(ApiRequest::get(CAMPAIGNS).scope(scope().as_str()))
        .await
        .unwrap_err();

    match &err {
        RequestError::Transient { status, attempts, body_preview, .. } => {
            assert_eq!(*status, Some(503));
            assert_eq!(*attempts, 3);
            assert_eq!(body_preview, "service unavailable, try later");
        }
        other => panic!("expected transient error, got {other}"),
    }
}

#[tokio::test]
async fn test_request_deadline_cuts_slow_call() {
    let (server, engine) = setup().await;

    Mock::given(method("GET"))
        .and(path(CAMPAIGNS))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("[]")
                .set_delay(Duration::from_millis(1500)),
        )
        .mount(&server)
        .await;

    let started = Instant::now();
    let err = engine
        .executor()
        .execute(
            ApiRequest::get(CAMPAIGNS)
                .scope(scope().as_str())
                .deadline(Duration::from_millis(100)),
        )
        .await
        .unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(1));
    match err {
        RequestError::Timeout { deadline, path, .. } => {
            assert_eq!(deadline, Duration::from_millis(100));
            assert_eq!(path, CAMPAIGNS);
        }
        other => panic!("expected timeout, got {other}"),
    }
}

#[tokio::test]
async fn test_configured_call_deadline_applies_without_explicit_one() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    let mut config = test_config(&server);
    config.http.call_deadline_ms = Some(100);
    let engine = engine(config);

    Mock::given(method("GET"))
        .and(path(CAMPAIGNS))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("[]")
                .set_delay(Duration::from_millis(1500)),
        )
        .mount(&server)
        .await;

    let started = Instant::now();
    let err = engine
        .executor()
        .execute(ApiRequest::get(CAMPAIGNS).scope(scope().as_str()))
        .await
        .unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(matches!(err, RequestError::Timeout { .. }), "unexpected error: {err}");
}

#[tokio::test]
async fn test_retry_after_is_honoured_up_to_max_backoff() {
    let (server, engine) = setup().await;

    Mock::given(method("GET"))
        .and(path(CAMPAIGNS))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(CAMPAIGNS))
        .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
        .mount(&server)
        .await;

    let started = Instant::now();
    let response = engine
        .executor()
        .execute(ApiRequest::get(CAMPAIGNS).scope(scope().as_str()))
        .await
        .unwrap();

    assert_eq!(response.attempts, 2);
    // A one second hint is capped at the 200ms max backoff.
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(200), "waited {elapsed:?}");
    assert!(elapsed < Duration::from_millis(900), "waited {elapsed:?}");
}
