//! Engine configuration and tuning constants
//!
//! Every knob has a default taken from the constants below, so an empty JSON
//! object (or no config file at all) yields a working configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::client::region::Region;

/// Steady request rate the provider allows per second.
pub const DEFAULT_REQUESTS_PER_SECOND: f64 = 10.0;

/// Bucket capacity. 1.5x the steady rate lets short bursts through without
/// tripping the provider's own throttling.
pub const DEFAULT_BURST: f64 = 15.0;

/// Attempts per call (initial attempt included).
pub const MAX_ATTEMPTS: u32 = 3;

/// First retry delay in milliseconds; doubled on every further attempt.
pub const INITIAL_BACKOFF_MS: u64 = 250;

/// Upper bound for a single retry delay in milliseconds.
pub const MAX_BACKOFF_MS: u64 = 8_000;

/// Provider limit for items in one mutation call.
pub const MAX_BATCH_ITEMS: usize = 100;

/// Report polling starts at this interval (milliseconds).
pub const INITIAL_POLL_INTERVAL_MS: u64 = 2_000;

/// Growth factor applied to the poll interval after every poll.
pub const POLL_GROWTH_FACTOR: f64 = 1.5;

/// Poll interval ceiling (milliseconds).
pub const MAX_POLL_INTERVAL_MS: u64 = 10_000;

/// How long a report job may stay unfinished before it is abandoned.
pub const DEFAULT_REPORT_MAX_WAIT_SECS: u64 = 300;

/// Concurrent report job lifecycles.
pub const DEFAULT_REPORT_WORKERS: usize = 3;

/// Bytes of an error response body kept for diagnostics.
pub const BODY_PREVIEW_BYTES: usize = 512;

/// Access tokens are treated as expired this many seconds early.
pub const TOKEN_SAFETY_BUFFER_SECS: i64 = 60;

/// Token lifetime assumed when the provider omits `expires_in`.
pub const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3_600;

/// Page size for entity listings.
pub const DEFAULT_PAGE_SIZE: usize = 1_000;

/// HTTP connect timeout (seconds).
pub const HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;

/// HTTP request timeout (seconds).
pub const HTTP_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Overall deadline for one API call, retries and backoff included (milliseconds).
pub const DEFAULT_CALL_DEADLINE_MS: u64 = 120_000;

/// User agent sent with every request.
pub const USER_AGENT: &str = concat!("ads-sync-engine/", env!("CARGO_PKG_VERSION"));

/// Calculate exponential backoff delay for a zero-based retry number.
pub fn calculate_backoff(base: Duration, retry: u32, max: Duration) -> Duration {
    let factor = 2u32.saturating_pow(retry);
    base.saturating_mul(factor).min(max)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable missing
    #[error("missing environment variable {0}")]
    MissingEnv(&'static str),

    /// Config file could not be read
    #[error("failed to read config file {path}: {message}")]
    Io {
        /// File that failed
        path: String,
        /// Underlying error
        message: String,
    },

    /// Config file is not valid JSON for [`EngineConfig`]
    #[error("invalid config file {path}: {message}")]
    Parse {
        /// File that failed
        path: String,
        /// Underlying error
        message: String,
    },

    /// A value is out of range
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Token bucket settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Refill rate in tokens per second
    pub requests_per_second: f64,
    /// Bucket capacity
    pub burst: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: DEFAULT_REQUESTS_PER_SECOND,
            burst: DEFAULT_BURST,
        }
    }
}

/// Retry settings shared by token refresh and API calls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the first retry (milliseconds)
    pub initial_backoff_ms: u64,
    /// Ceiling for any single delay (milliseconds)
    pub max_backoff_ms: u64,
}

impl RetryPolicy {
    /// Delay to wait after the given zero-based failed attempt.
    pub fn backoff(&self, retry: u32) -> Duration {
        calculate_backoff(
            Duration::from_millis(self.initial_backoff_ms),
            retry,
            Duration::from_millis(self.max_backoff_ms),
        )
    }

    /// Ceiling applied to server-provided `Retry-After` hints.
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            initial_backoff_ms: INITIAL_BACKOFF_MS,
            max_backoff_ms: MAX_BACKOFF_MS,
        }
    }
}

/// Batch mutation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BatchConfig {
    /// Items per provider call
    pub max_items: usize,
    /// Batches in flight at once (1 = sequential)
    pub concurrency: usize,
    /// Record intended changes without submitting them
    pub dry_run: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_items: MAX_BATCH_ITEMS,
            concurrency: 1,
            dry_run: false,
        }
    }
}

/// Report polling settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReportConfig {
    /// First poll interval (milliseconds)
    pub initial_poll_ms: u64,
    /// Multiplier applied after each poll
    pub growth_factor: f64,
    /// Poll interval ceiling (milliseconds)
    pub max_poll_ms: u64,
    /// Give up on a job after this many seconds
    pub max_wait_secs: u64,
    /// Concurrent job lifecycles
    pub workers: usize,
}

impl ReportConfig {
    /// First poll interval.
    pub fn initial_poll(&self) -> Duration {
        Duration::from_millis(self.initial_poll_ms)
    }

    /// Poll interval ceiling.
    pub fn max_poll(&self) -> Duration {
        Duration::from_millis(self.max_poll_ms)
    }

    /// Overall wait ceiling per job.
    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            initial_poll_ms: INITIAL_POLL_INTERVAL_MS,
            growth_factor: POLL_GROWTH_FACTOR,
            max_poll_ms: MAX_POLL_INTERVAL_MS,
            max_wait_secs: DEFAULT_REPORT_MAX_WAIT_SECS,
            workers: DEFAULT_REPORT_WORKERS,
        }
    }
}

/// HTTP transport settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HttpConfig {
    /// TCP connect timeout (seconds)
    pub connect_timeout_secs: u64,
    /// Whole-request timeout (seconds)
    pub request_timeout_secs: u64,
    /// Bytes of error bodies kept for diagnostics
    pub body_preview_bytes: usize,
    /// Page size for entity listings
    pub page_size: usize,
    /// Overall deadline per API call (milliseconds); `null` disables it
    pub call_deadline_ms: Option<u64>,
}

impl HttpConfig {
    /// Overall per-call deadline
    pub fn call_deadline(&self) -> Option<Duration> {
        self.call_deadline_ms.map(Duration::from_millis)
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: HTTP_CONNECT_TIMEOUT_SECS,
            request_timeout_secs: HTTP_REQUEST_TIMEOUT_SECS,
            body_preview_bytes: BODY_PREVIEW_BYTES,
            page_size: DEFAULT_PAGE_SIZE,
            call_deadline_ms: Some(DEFAULT_CALL_DEADLINE_MS),
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Provider region
    pub region: Region,
    /// Override for the API base URL (tests, proxies)
    pub api_base_url: Option<String>,
    /// Override for the OAuth2 token endpoint
    pub token_url: Option<String>,
    /// Seconds before expiry at which a token counts as stale
    pub token_safety_buffer_secs: i64,
    /// Rate limiter
    pub rate_limit: RateLimitConfig,
    /// Retry policy
    pub retry: RetryPolicy,
    /// Batch coordinator
    pub batch: BatchConfig,
    /// Report poller
    pub report: ReportConfig,
    /// Transport
    pub http: HttpConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            region: Region::NorthAmerica,
            api_base_url: None,
            token_url: None,
            token_safety_buffer_secs: TOKEN_SAFETY_BUFFER_SECS,
            rate_limit: RateLimitConfig::default(),
            retry: RetryPolicy::default(),
            batch: BatchConfig::default(),
            report: ReportConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file. Missing keys fall back to defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let config: EngineConfig = serde_json::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Effective API base URL.
    pub fn api_base_url(&self) -> String {
        self.api_base_url
            .clone()
            .unwrap_or_else(|| self.region.api_base_url().to_string())
    }

    /// Effective token endpoint.
    pub fn token_url(&self) -> String {
        self.token_url
            .clone()
            .unwrap_or_else(|| self.region.token_url().to_string())
    }

    /// Reject values that would stall or misbehave at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let rl = &self.rate_limit;
        if rl.requests_per_second.is_nan() || rl.requests_per_second <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "rate_limit.requests_per_second must be positive, got {}",
                rl.requests_per_second
            )));
        }
        if rl.burst < rl.requests_per_second || rl.burst < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "rate_limit.burst ({}) must be at least 1 and not below the steady rate ({})",
                rl.burst, rl.requests_per_second
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.batch.max_items == 0 {
            return Err(ConfigError::Invalid(
                "batch.max_items must be at least 1".to_string(),
            ));
        }
        if self.batch.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "batch.concurrency must be at least 1".to_string(),
            ));
        }
        if self.report.growth_factor < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "report.growth_factor must be >= 1.0, got {}",
                self.report.growth_factor
            )));
        }
        if self.http.call_deadline_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "http.call_deadline_ms must be positive or null".to_string(),
            ));
        }
        if self.report.workers == 0 {
            return Err(ConfigError::Invalid(
                "report.workers must be at least 1".to_string(),
            ));
        }
        if self.report.initial_poll_ms > self.report.max_poll_ms {
            return Err(ConfigError::Invalid(
                "report.initial_poll_ms must not exceed report.max_poll_ms".to_string(),
            ));
        }
        if self.http.page_size == 0 {
            return Err(ConfigError::Invalid(
                "http.page_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
