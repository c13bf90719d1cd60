//! HTTP plumbing for the advertising API
//!
//! - [`rate_limit`] - token bucket shared by every outbound call
//! - [`executor`] - authenticated, rate-limited, retrying request execution
//! - [`retry`] - retryable status set and retry log formatting
//! - [`region`] - regional hosts and endpoint paths
//! - [`shared_resources`] - pooled `reqwest::Client` construction

pub mod executor;
pub mod rate_limit;
pub mod region;
pub mod retry;
pub mod shared_resources;

use bytes::Bytes;
use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

use crate::auth::CredentialError;

pub use executor::RequestExecutor;
pub use rate_limit::RateLimiter;
pub use region::Region;

/// Result type for API calls
pub type RequestResult<T> = std::result::Result<T, RequestError>;

/// Errors surfaced by [`RequestExecutor`].
///
/// Every variant tied to a call carries the method and path; status errors
/// also carry a bounded preview of the provider's response body.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RequestError {
    /// Network failure or retryable status that persisted through every attempt
    #[error("{method} {path} failed after {attempts} attempts ({}): {body_preview}", describe_status(.status))]
    Transient {
        /// HTTP method
        method: String,
        /// Request path
        path: String,
        /// Last status, `None` for network failures
        status: Option<u16>,
        /// Attempts made
        attempts: u32,
        /// Bounded body preview or network error message
        body_preview: String,
    },

    /// 4xx other than 401, not retried
    #[error("{method} {path} rejected with status {status}: {body_preview}")]
    Validation {
        /// HTTP method
        method: String,
        /// Request path
        path: String,
        /// HTTP status
        status: u16,
        /// Bounded body preview
        body_preview: String,
    },

    /// 401 that persisted after a token refresh
    #[error("{method} {path} unauthorized after token refresh: {body_preview}")]
    Unauthorized {
        /// HTTP method
        method: String,
        /// Request path
        path: String,
        /// Bounded body preview
        body_preview: String,
    },

    /// Overall deadline elapsed before the call completed
    #[error("{method} {path} exceeded its deadline of {deadline:?}")]
    Timeout {
        /// HTTP method
        method: String,
        /// Request path
        path: String,
        /// Deadline that elapsed
        deadline: Duration,
    },

    /// No token could be obtained
    #[error(transparent)]
    Credential(#[from] CredentialError),

    /// Success status with a body that did not match the expected shape
    #[error("failed to decode response of {method} {path}: {message}")]
    Decode {
        /// HTTP method
        method: String,
        /// Request path
        path: String,
        /// Parser message
        message: String,
    },

    /// Request body could not be serialized
    #[error("failed to encode request body: {0}")]
    Encode(String),

    /// Shutdown was requested before the call started
    #[error("request cancelled by shutdown")]
    Cancelled,
}

fn describe_status(status: &Option<u16>) -> String {
    match status {
        Some(code) => code.to_string(),
        None => "network error".to_string(),
    }
}

impl RequestError {
    /// Network, 5xx or 429 failure that exhausted retries.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Timeout { .. })
    }

    /// Credential failure; aborts the whole run.
    pub fn is_credential(&self) -> bool {
        matches!(self, Self::Credential(_))
    }

    /// HTTP status attached to the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transient { status, .. } => *status,
            Self::Validation { status, .. } => Some(*status),
            Self::Unauthorized { .. } => Some(401),
            _ => None,
        }
    }

    /// Body preview attached to the error, if any.
    pub fn body_preview(&self) -> Option<&str> {
        match self {
            Self::Transient { body_preview, .. }
            | Self::Validation { body_preview, .. }
            | Self::Unauthorized { body_preview, .. } => Some(body_preview),
            _ => None,
        }
    }
}

/// One API call: method, path (or absolute URL), query, body, scope.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// HTTP method
    pub method: Method,
    /// Path relative to the API base, or an absolute URL
    pub path: String,
    /// Query parameters
    pub query: Vec<(String, String)>,
    /// JSON body
    pub body: Option<serde_json::Value>,
    /// Account scope sent as the scope header
    pub scope: Option<String>,
    /// Extra headers
    pub headers: Vec<(String, String)>,
    /// Overall deadline for all attempts
    pub deadline: Option<Duration>,
}

impl ApiRequest {
    /// Request with no query, body or scope.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            scope: None,
            headers: Vec::new(),
            deadline: None,
        }
    }

    /// GET request
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// POST request
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// PUT request
    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    /// Set the account scope.
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Add a query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    /// Add a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Serialize `body` as the JSON payload.
    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> RequestResult<Self> {
        let value = serde_json::to_value(body).map_err(|e| RequestError::Encode(e.to_string()))?;
        self.body = Some(value);
        Ok(self)
    }

    /// Bound the whole call (all attempts and waits) by `deadline`.
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Successful response: status, content type and full body.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    /// HTTP status (2xx)
    pub status: StatusCode,
    /// `Content-Type` header, if present
    pub content_type: Option<String>,
    /// Response body
    pub body: Bytes,
    /// Attempts it took
    pub attempts: u32,
    pub(crate) method: String,
    pub(crate) path: String,
}

impl ApiResponse {
    /// Deserialize the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> RequestResult<T> {
        serde_json::from_slice(&self.body).map_err(|e| RequestError::Decode {
            method: self.method.clone(),
            path: self.path.clone(),
            message: e.to_string(),
        })
    }
}

/// Read at most `limit` bytes of a response body, lossily decoded as UTF-8.
///
/// Stops reading once the limit is reached so oversized error pages are
/// never buffered whole.
pub async fn read_body_preview(mut response: Response, limit: usize) -> String {
    let mut buffer: Vec<u8> = Vec::with_capacity(limit.min(4096));
    while buffer.len() < limit {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                let take = (limit - buffer.len()).min(chunk.len());
                buffer.extend_from_slice(&chunk[..take]);
            }
            Ok(None) | Err(_) => break,
        }
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
