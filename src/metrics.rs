//! Observability metrics for the sync engine
//!
//! Counters and histograms for the signals operators watch during a run:
//! throttling, retries, token refreshes, cache effectiveness, batch outcomes
//! and report jobs.
//!
//! ## Architecture
//!
//! - Uses the `metrics` facade, so recording is a no-op until a recorder is installed
//! - Prometheus exporter is optional and started from the CLI (`--metrics-addr`)
//! - Helpers below pair every metric with a structured `tracing` event

use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Global metrics registry initialization flag
static METRICS_INITIALIZED: Lazy<AtomicBool> = Lazy::new(|| AtomicBool::new(false));

/// Correlation ID generator for request tracing
static CORRELATION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Initialize the Prometheus exporter and register metric descriptions.
///
/// Idempotent: later calls return `Ok(())` without reinstalling.
pub fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    info!(%addr, "Initializing metrics exporter");

    if let Err(e) = PrometheusBuilder::new().with_http_listener(addr).install() {
        METRICS_INITIALIZED.store(false, Ordering::SeqCst);
        return Err(format!("Failed to install Prometheus exporter: {e}").into());
    }

    describe_counter!(
        "http_requests_total",
        Unit::Count,
        "HTTP requests sent to the advertising API"
    );
    describe_counter!("http_retries_total", Unit::Count, "Retry attempts");
    describe_histogram!(
        "http_request_duration_seconds",
        Unit::Seconds,
        "HTTP request duration in seconds"
    );
    describe_histogram!(
        "retry_backoff_duration_seconds",
        Unit::Seconds,
        "Duration of retry backoff in seconds"
    );
    describe_histogram!(
        "rate_limit_queue_wait_seconds",
        Unit::Seconds,
        "Time spent waiting for rate limit tokens"
    );
    describe_gauge!(
        "rate_limit_tokens_available",
        Unit::Count,
        "Tokens left in the bucket after the last acquire"
    );
    describe_counter!(
        "token_refresh_total",
        Unit::Count,
        "Access token refreshes by outcome"
    );
    describe_counter!(
        "entity_cache_lookups_total",
        Unit::Count,
        "Entity cache lookups by entity type and result"
    );
    describe_counter!(
        "batch_items_total",
        Unit::Count,
        "Mutation items processed by outcome"
    );
    describe_counter!("report_jobs_total", Unit::Count, "Report jobs by outcome");
    describe_counter!("report_rows_total", Unit::Count, "Report rows decoded");

    info!(%addr, "Metrics exporter initialized");
    Ok(())
}

/// Check if the exporter was installed
pub fn is_initialized() -> bool {
    METRICS_INITIALIZED.load(Ordering::SeqCst)
}

/// Generate a new correlation ID for request tracing
pub fn generate_correlation_id() -> String {
    let id = CORRELATION_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    format!("req-{id:08x}")
}

/// Timing and outcome of a single HTTP attempt
pub struct HttpRequestMetrics {
    path: String,
    start_time: Instant,
    correlation_id: String,
    attempt: u32,
}

impl HttpRequestMetrics {
    /// Start recording an attempt
    pub fn start(path: impl Into<String>, attempt: u32) -> Self {
        let path = path.into();
        let correlation_id = generate_correlation_id();

        debug!(
            correlation_id = %correlation_id,
            path = %path,
            attempt,
            "Starting HTTP request"
        );

        Self {
            path,
            start_time: Instant::now(),
            correlation_id,
            attempt,
        }
    }

    /// Record a response with a status code
    pub fn record_complete(&self, status_code: u16) {
        let duration = self.start_time.elapsed();

        counter!(
            "http_requests_total",
            "path" => self.path.clone(),
            "status" => status_code.to_string(),
        )
        .increment(1);
        histogram!("http_request_duration_seconds", "path" => self.path.clone())
            .record(duration.as_secs_f64());

        if status_code == 429 {
            warn!(
                correlation_id = %self.correlation_id,
                path = %self.path,
                attempt = self.attempt,
                duration_ms = duration.as_millis() as u64,
                "Throttled by provider (429)"
            );
        }

        debug!(
            correlation_id = %self.correlation_id,
            path = %self.path,
            status = status_code,
            duration_ms = duration.as_millis() as u64,
            "HTTP request completed"
        );
    }

    /// Record a transport failure (no status code)
    pub fn record_network_error(&self) {
        let duration = self.start_time.elapsed();

        counter!(
            "http_requests_total",
            "path" => self.path.clone(),
            "status" => "network_error",
        )
        .increment(1);
        histogram!("http_request_duration_seconds", "path" => self.path.clone())
            .record(duration.as_secs_f64());

        warn!(
            correlation_id = %self.correlation_id,
            path = %self.path,
            attempt = self.attempt,
            duration_ms = duration.as_millis() as u64,
            "Network error"
        );
    }

    /// Correlation ID of this attempt
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }
}

/// Record a retry delay
pub fn record_retry_backoff(duration: Duration, attempt: u32) {
    counter!("http_retries_total").increment(1);
    histogram!("retry_backoff_duration_seconds").record(duration.as_secs_f64());

    debug!(
        attempt,
        backoff_ms = duration.as_millis() as u64,
        "Retry backoff recorded"
    );
}

/// Rate limiter metrics helper
#[derive(Default)]
pub struct RateLimiterMetrics {
    start_time: Option<Instant>,
}

impl RateLimiterMetrics {
    /// Create a new helper
    pub fn new() -> Self {
        Self { start_time: None }
    }

    /// Start measuring queue wait time
    pub fn start_acquire(&mut self) {
        self.start_time = Some(Instant::now());
    }

    /// Record a successful debit
    pub fn record_acquired(&mut self, cost: u32) {
        if let Some(start) = self.start_time.take() {
            let wait = start.elapsed();
            histogram!("rate_limit_queue_wait_seconds").record(wait.as_secs_f64());

            if wait.as_millis() > 100 {
                debug!(
                    cost,
                    wait_ms = wait.as_millis() as u64,
                    "Rate limit tokens acquired after wait"
                );
            }
        }
    }

    /// Update the tokens-available gauge
    pub fn update_available_permits(&self, available: f64) {
        gauge!("rate_limit_tokens_available").set(available);
    }
}

/// Count a token refresh. `outcome` is `success` or `failure`.
pub fn record_token_refresh(outcome: &'static str) {
    counter!("token_refresh_total", "outcome" => outcome).increment(1);
}

/// Count an entity cache lookup
pub fn record_cache_lookup(entity_type: &'static str, hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!(
        "entity_cache_lookups_total",
        "entity_type" => entity_type,
        "result" => result,
    )
    .increment(1);
}

/// Count processed batch items. `outcome` is `succeeded`, `failed` or `skipped`.
pub fn record_batch_items(outcome: &'static str, count: usize) {
    if count > 0 {
        counter!("batch_items_total", "outcome" => outcome).increment(count as u64);
    }
}

/// Report job lifecycle metrics
pub struct ReportJobMetrics {
    report: String,
    start_time: Instant,
}

impl ReportJobMetrics {
    /// Start tracking a report job
    pub fn start(report: impl Into<String>) -> Self {
        let report = report.into();
        info!(report = %report, "Report job started");
        Self {
            report,
            start_time: Instant::now(),
        }
    }

    /// Record a downloaded and decoded report
    pub fn record_success(&self, rows: usize) {
        let duration = self.start_time.elapsed();

        counter!("report_jobs_total", "outcome" => "success").increment(1);
        counter!("report_rows_total").increment(rows as u64);

        info!(
            report = %self.report,
            rows,
            duration_secs = duration.as_secs(),
            "Report job completed"
        );
    }

    /// Record a failed report job
    pub fn record_failure(&self, error: &str) {
        let duration = self.start_time.elapsed();

        counter!("report_jobs_total", "outcome" => "failure").increment(1);

        error!(
            report = %self.report,
            error = %error,
            duration_secs = duration.as_secs(),
            "Report job failed"
        );
    }
}
