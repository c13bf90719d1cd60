//! Authenticated request execution
//!
//! [`RequestExecutor`] is the only component that talks to the advertising
//! API. Per attempt it:
//! - takes one token from the shared [`RateLimiter`]
//! - obtains a valid token from the [`CredentialManager`] and sets the
//!   bearer, client id and scope headers
//! - classifies the response: success, single 401 refresh-and-retry,
//!   retryable failure with exponential backoff, or immediate rejection
//!
//! Error responses keep only a bounded body preview.

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::auth::{Credential, CredentialManager};
use crate::client::rate_limit::RateLimiter;
use crate::client::retry::{
    extract_error_type, is_retryable_status, parse_retry_after, RetryContext,
};
use crate::client::{read_body_preview, ApiRequest, ApiResponse, RequestError, RequestResult};
use crate::config::{RetryPolicy, BODY_PREVIEW_BYTES};
use crate::metrics::{record_retry_backoff, HttpRequestMetrics};
use crate::shutdown::SharedShutdown;

/// Header carrying the OAuth2 client id.
pub const CLIENT_ID_HEADER: &str = "Amazon-Advertising-API-ClientId";

/// Header carrying the account scope (profile id).
pub const SCOPE_HEADER: &str = "Amazon-Advertising-API-Scope";

/// Rate-limited, authenticated, retrying HTTP executor.
#[derive(Debug, Clone)]
pub struct RequestExecutor {
    http: Client,
    base_url: String,
    credentials: CredentialManager,
    rate_limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    body_preview_bytes: usize,
    default_deadline: Option<Duration>,
    shutdown: Option<SharedShutdown>,
}

/// Failure of one attempt that may be retried.
struct FailedAttempt {
    error_type: crate::client::retry::RetryErrorType,
    status: Option<u16>,
    detail: String,
    retry_after: Option<Duration>,
}

impl RequestExecutor {
    /// Create an executor over the shared client, credential and limiter.
    pub fn new(
        http: Client,
        base_url: impl Into<String>,
        credentials: CredentialManager,
        rate_limiter: Arc<RateLimiter>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
            rate_limiter,
            retry,
            body_preview_bytes: BODY_PREVIEW_BYTES,
            default_deadline: None,
            shutdown: None,
        }
    }

    /// Override the number of body bytes kept on error responses.
    pub fn with_body_preview_bytes(mut self, bytes: usize) -> Self {
        self.body_preview_bytes = bytes;
        self
    }

    /// Overall deadline for requests that do not carry their own.
    pub fn with_default_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.default_deadline = deadline;
        self
    }

    /// Refuse to start new calls once shutdown is requested.
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// API base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Shared credential manager
    pub fn credentials(&self) -> &CredentialManager {
        &self.credentials
    }

    /// Shared rate limiter
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    /// Retry policy in effect
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Execute a request and deserialize the JSON body.
    pub async fn execute_json<T: DeserializeOwned>(&self, request: ApiRequest) -> RequestResult<T> {
        self.execute(request).await?.json()
    }

    /// Execute a request within its deadline, or the executor default.
    pub async fn execute(&self, request: ApiRequest) -> RequestResult<ApiResponse> {
        match request.deadline.or(self.default_deadline) {
            Some(deadline) => tokio::time::timeout(deadline, self.execute_with_retry(&request))
                .await
                .map_err(|_| {
                    warn!(
                        method = %request.method,
                        path = %request.path,
                        deadline_ms = deadline.as_millis() as u64,
                        "Request deadline exceeded"
                    );
                    RequestError::Timeout {
                        method: request.method.to_string(),
                        path: request.path.clone(),
                        deadline,
                    }
                })?,
            None => self.execute_with_retry(&request).await,
        }
    }

    /// Absolute URL for a path; absolute URLs pass through unchanged.
    pub fn resolve_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// Whether `url` has the same scheme, host and port as the API base URL.
    pub fn is_provider_origin(&self, url: &str) -> bool {
        match (Url::parse(url), Url::parse(&self.base_url)) {
            (Ok(target), Ok(base)) => target.origin() == base.origin(),
            _ => false,
        }
    }

    async fn execute_with_retry(&self, request: &ApiRequest) -> RequestResult<ApiResponse> {
        if self
            .shutdown
            .as_ref()
            .is_some_and(|s| s.is_shutdown_requested())
        {
            return Err(RequestError::Cancelled);
        }

        let url = self.resolve_url(&request.path);
        // Credentials only go to the provider host, never to presigned download URLs.
        let authenticated = self.is_provider_origin(&url);
        let method = request.method.to_string();
        let operation = format!("{method} {}", request.path);
        let max_attempts = self.retry.max_attempts.max(1);

        let mut attempt: u32 = 0;
        let mut failures: u32 = 0;
        let mut refreshed_after_401 = false;

        loop {
            attempt += 1;
            self.rate_limiter.acquire(1).await;

            let credential = if authenticated {
                Some(self.credentials.get_access_token(false).await?)
            } else {
                None
            };

            let metrics = HttpRequestMetrics::start(&request.path, attempt);
            let failed = match self.build(request, &url, credential.as_ref()).send().await {
                Err(e) => {
                    metrics.record_network_error();
                    FailedAttempt {
                        error_type: extract_error_type(None, Some(&e)),
                        status: None,
                        detail: e.to_string(),
                        retry_after: None,
                    }
                }
                Ok(response) => {
                    let status = response.status();
                    metrics.record_complete(status.as_u16());

                    if status.is_success() {
                        let content_type = response
                            .headers()
                            .get(CONTENT_TYPE)
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string);
                        match response.bytes().await {
                            Ok(body) => {
                                if failures > 0 {
                                    let ctx = RetryContext::new(
                                        attempt,
                                        max_attempts,
                                        extract_error_type(Some(status), None),
                                        Duration::ZERO,
                                        &operation,
                                        "",
                                    )
                                    .with_scope(request.scope.as_deref());
                                    info!("{}", ctx.format_success());
                                }
                                debug!(
                                    method = %method,
                                    path = %request.path,
                                    status = status.as_u16(),
                                    bytes = body.len(),
                                    attempt,
                                    "Request succeeded"
                                );
                                return Ok(ApiResponse {
                                    status,
                                    content_type,
                                    body,
                                    attempts: attempt,
                                    method,
                                    path: request.path.clone(),
                                });
                            }
                            Err(e) => FailedAttempt {
                                error_type: extract_error_type(None, Some(&e)),
                                status: None,
                                detail: format!("failed to read response body: {e}"),
                                retry_after: None,
                            },
                        }
                    } else {
                        let retry_after = parse_retry_after(response.headers());
                        let preview = read_body_preview(response, self.body_preview_bytes).await;

                        if status == StatusCode::UNAUTHORIZED {
                            if authenticated && !refreshed_after_401 {
                                refreshed_after_401 = true;
                                warn!(
                                    method = %method,
                                    path = %request.path,
                                    attempt,
                                    body = %preview,
                                    "Unauthorized, refreshing token and retrying once"
                                );
                                let used = credential
                                    .as_ref()
                                    .map(|c| c.access_token().to_string())
                                    .unwrap_or_default();
                                self.credentials.refresh_after_rejection(&used).await?;
                                continue;
                            }
                            error!(
                                method = %method,
                                path = %request.path,
                                body = %preview,
                                "Unauthorized after token refresh"
                            );
                            return Err(RequestError::Unauthorized {
                                method,
                                path: request.path.clone(),
                                body_preview: preview,
                            });
                        }

                        if !is_retryable_status(status.as_u16()) {
                            warn!(
                                method = %method,
                                path = %request.path,
                                status = status.as_u16(),
                                attempt,
                                body = %preview,
                                "Request rejected"
                            );
                            return Err(RequestError::Validation {
                                method,
                                path: request.path.clone(),
                                status: status.as_u16(),
                                body_preview: preview,
                            });
                        }

                        FailedAttempt {
                            error_type: extract_error_type(Some(status), None),
                            status: Some(status.as_u16()),
                            detail: preview,
                            retry_after,
                        }
                    }
                }
            };

            failures += 1;
            if failures >= max_attempts {
                let ctx = RetryContext::new(
                    failures,
                    max_attempts,
                    failed.error_type,
                    Duration::ZERO,
                    &operation,
                    &failed.detail,
                )
                .with_scope(request.scope.as_deref());
                error!(
                    method = %method,
                    path = %request.path,
                    status = failed.status,
                    attempt,
                    "{}",
                    ctx.format_failure()
                );
                return Err(RequestError::Transient {
                    method,
                    path: request.path.clone(),
                    status: failed.status,
                    attempts: attempt,
                    body_preview: failed.detail,
                });
            }

            let delay = match failed.retry_after {
                Some(hint) => hint.min(self.retry.max_backoff()),
                None => self.retry.backoff(failures - 1),
            };
            let ctx = RetryContext::new(
                failures,
                max_attempts,
                failed.error_type,
                delay,
                &operation,
                &failed.detail,
            )
            .with_scope(request.scope.as_deref());
            warn!(
                method = %method,
                path = %request.path,
                status = failed.status,
                attempt,
                body = %failed.detail,
                "{}",
                ctx.format_retry()
            );
            record_retry_backoff(delay, attempt);
            tokio::time::sleep(delay).await;
        }
    }

    fn build(
        &self,
        request: &ApiRequest,
        url: &str,
        credential: Option<&Credential>,
    ) -> RequestBuilder {
        let mut builder = self
            .http
            .request(request.method.clone(), url)
            .header(ACCEPT, "application/json");

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }

        if let Some(credential) = credential {
            builder = builder
                .bearer_auth(credential.access_token())
                .header(CLIENT_ID_HEADER, credential.client_id());
            if let Some(scope) = &request.scope {
                builder = builder.header(SCOPE_HEADER, scope.as_str());
            }
        }

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        builder
    }
}
