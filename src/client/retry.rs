//! Retry classification and retry log messages
//!
//! Every outbound call (token refresh included) uses the same policy: network
//! failures and the statuses in [`RETRYABLE_STATUSES`] are retried with
//! exponential backoff, everything else fails on the first response.

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Error as ReqwestError, StatusCode};
use std::time::Duration;

/// HTTP statuses retried by the token refresh and the request executor.
pub const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Whether a status is in the retryable set.
pub fn is_retryable_status(status: u16) -> bool {
    RETRYABLE_STATUSES.contains(&status)
}

/// Classification of a failed attempt for log messages and retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryErrorType {
    /// Request timed out
    NetworkTimeout,
    /// Connection refused or DNS failure
    NetworkOffline,
    /// HTTP 429
    RateLimit,
    /// HTTP 5xx
    ServerError(u16),
    /// HTTP 401/403
    AuthFailed(u16),
    /// Any other 4xx
    ClientError(u16),
    /// Transport failure without a better classification
    NetworkGeneric,
}

impl RetryErrorType {
    /// Short description used inside retry log messages.
    pub fn description(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "network timeout",
            Self::NetworkOffline => "connection failed",
            Self::RateLimit => "throttled by provider",
            Self::ServerError(code) => match code {
                500 => "internal server error",
                502 => "bad gateway",
                503 => "service unavailable",
                504 => "gateway timeout",
                _ => "server error",
            },
            Self::AuthFailed(401) => "unauthorized (401)",
            Self::AuthFailed(403) => "forbidden (403)",
            Self::AuthFailed(_) => "authentication failed",
            Self::ClientError(code) => match code {
                400 => "invalid request",
                404 => "resource not found",
                422 => "unprocessable entity",
                _ => "client error",
            },
            Self::NetworkGeneric => "network error",
        }
    }

    /// Remediation hint attached to the final failure message.
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "Check network connectivity or raise http.request_timeout_secs",
            Self::NetworkOffline => "Verify internet connectivity and DNS resolution",
            Self::RateLimit => "Lower rate_limit.requests_per_second or batch.concurrency",
            Self::ServerError(_) => "The provider may be degraded, try again later",
            Self::AuthFailed(_) => "Verify client id, client secret, refresh token and profile access",
            Self::ClientError(_) => "Review the request payload against the provider's API reference",
            Self::NetworkGeneric => "Check network connectivity and try again",
        }
    }

    /// Whether attempts failing this way are retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NetworkTimeout | Self::NetworkOffline | Self::NetworkGeneric => true,
            Self::RateLimit => true,
            Self::ServerError(code) => is_retryable_status(*code),
            Self::AuthFailed(_) | Self::ClientError(_) => false,
        }
    }
}

/// Extract a [`RetryErrorType`] from an HTTP status or reqwest error.
pub fn extract_error_type(
    status: Option<StatusCode>,
    err: Option<&ReqwestError>,
) -> RetryErrorType {
    if let Some(status) = status {
        let code = status.as_u16();
        match code {
            401 | 403 => return RetryErrorType::AuthFailed(code),
            429 => return RetryErrorType::RateLimit,
            _ => {}
        }
        if status.is_server_error() {
            return RetryErrorType::ServerError(code);
        }
        if status.is_client_error() {
            return RetryErrorType::ClientError(code);
        }
    }

    if let Some(err) = err {
        if err.is_timeout() {
            return RetryErrorType::NetworkTimeout;
        }
        if err.is_connect() {
            return RetryErrorType::NetworkOffline;
        }
    }

    RetryErrorType::NetworkGeneric
}

/// Parse a `Retry-After` header given in whole seconds.
///
/// HTTP-date values are ignored; the caller falls back to computed backoff.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?;
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Context for formatting retry messages.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Current attempt number (1-based)
    pub attempt: u32,
    /// Maximum number of attempts configured
    pub max_attempts: u32,
    /// Why the attempt failed
    pub error_type: RetryErrorType,
    /// Delay until the next attempt
    pub backoff_duration: Duration,
    /// `METHOD /path` of the failed call
    pub operation: String,
    /// Account scope, when the call had one
    pub scope: Option<String>,
    /// Error message or bounded body preview
    pub error_message: String,
}

impl RetryContext {
    /// Build a context for one failed attempt.
    pub fn new(
        attempt: u32,
        max_attempts: u32,
        error_type: RetryErrorType,
        backoff_duration: Duration,
        operation: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            attempt,
            max_attempts,
            error_type,
            backoff_duration,
            operation: operation.into(),
            scope: None,
            error_message: error_message.into(),
        }
    }

    /// Attach the account scope.
    pub fn with_scope(mut self, scope: Option<&str>) -> Self {
        self.scope = scope.map(str::to_string);
        self
    }

    /// One-line retry notice.
    pub fn format_retry(&self) -> String {
        let mut message = format!(
            "Retrying {} (attempt {}/{}) after {} - waiting {:.2} seconds",
            self.operation,
            self.attempt,
            self.max_attempts,
            self.error_type.description(),
            self.backoff_duration.as_secs_f64()
        );
        self.append_scope(&mut message);
        message
    }

    /// Notice logged when an attempt after a retry succeeds.
    pub fn format_success(&self) -> String {
        let mut message = format!(
            "{} succeeded on attempt {}/{}",
            self.operation, self.attempt, self.max_attempts
        );
        self.append_scope(&mut message);
        message
    }

    /// Multi-line summary logged when retries are exhausted.
    pub fn format_failure(&self) -> String {
        let mut lines = vec![
            format!(
                "[FAILED] {} failed after {} attempts",
                self.operation, self.attempt
            ),
            format!("  Last error: {}", self.error_message),
        ];
        if let Some(scope) = &self.scope {
            lines.push(format!("  Scope: {scope}"));
        }
        lines.push(format!("  Suggestion: {}", self.error_type.suggestion()));
        lines.join("\n")
    }

    fn append_scope(&self, buffer: &mut String) {
        if let Some(scope) = &self.scope {
            buffer.push_str(" (scope ");
            buffer.push_str(scope);
            buffer.push(')');
        }
    }
}
