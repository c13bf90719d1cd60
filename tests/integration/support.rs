//! Shared fixtures: an engine pointed at a wiremock server.

use ads_sync_engine::config::{EngineConfig, RateLimitConfig, ReportConfig, RetryPolicy};
use ads_sync_engine::{ClientCredentials, Scope, SyncEngine};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TOKEN_PATH: &str = "/auth/o2/token";
pub const PROFILE_ID: &str = "1234567890";

/// Config with short backoffs and poll intervals, talking to `server`.
pub fn test_config(server: &MockServer) -> EngineConfig {
    EngineConfig {
        api_base_url: Some(server.uri()),
        token_url: Some(format!("{}{}", server.uri(), TOKEN_PATH)),
        rate_limit: RateLimitConfig {
            requests_per_second: 500.0,
            burst: 500.0,
        },
        retry: RetryPolicy {
            max_attempts: 3,
            initial_backoff_ms: 20,
            max_backoff_ms: 200,
        },
        report: ReportConfig {
            initial_poll_ms: 20,
            growth_factor: 1.5,
            max_poll_ms: 50,
            max_wait_secs: 5,
            workers: 2,
        },
        ..EngineConfig::default()
    }
}

pub fn client_credentials() -> ClientCredentials {
    ClientCredentials::new("client-id", "client-secret", "refresh-1")
}

pub fn engine(config: EngineConfig) -> SyncEngine {
    SyncEngine::new(config, client_credentials()).expect("engine should build")
}

pub fn scope() -> Scope {
    Scope::new(PROFILE_ID)
}

/// Token endpoint answering every refresh with `access-1`.
pub async fn mount_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access-1",
            "token_type": "bearer",
            "expires_in": 3600
        })))
        .mount(server)
        .await;
}

/// Mock server with the token endpoint mounted, plus an engine using it.
pub async fn setup() -> (MockServer, SyncEngine) {
    let server = MockServer::start().await;
    mount_token(&server).await;
    let engine = engine(test_config(&server));
    (server, engine)
}

/// Requests the server received on `path`.
pub async fn requests_to(server: &MockServer, request_path: &str) -> Vec<wiremock::Request> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.url.path() == request_path)
        .collect()
}
