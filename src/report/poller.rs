//! Report job creation, adaptive polling and download
//!
//! Polling waits `initial_poll` after the first status check and grows the
//! interval by `growth_factor` each round, capped at `max_poll`. Every wait is
//! clamped to the remaining `max_wait`, so a job is never polled past its
//! deadline and a terminal status is seen at most one interval late.

use futures::stream::{self, StreamExt};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::client::region::paths;
use crate::client::{ApiRequest, RequestError, RequestExecutor};
use crate::config::ReportConfig;
use crate::metrics::ReportJobMetrics;
use crate::shutdown::SharedShutdown;
use crate::Scope;

use super::decode::decode_report;
use super::{ReportError, ReportJob, ReportOutput, ReportSpec, ReportStatus};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateReportResponse {
    #[serde(default)]
    report_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReportStatusResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    status_details: Option<String>,
}

/// Result of [`ReportJobPoller::poll_until_ready`].
#[derive(Debug, Clone)]
pub struct PollOutcome {
    /// Job in `ready` state
    pub job: ReportJob,
    /// Status checks made
    pub polls: u32,
    /// Waits between consecutive status checks
    pub intervals: Vec<Duration>,
    /// Time from the first check until ready
    pub elapsed: Duration,
}

/// Creates, polls and downloads report jobs.
#[derive(Debug, Clone)]
pub struct ReportJobPoller {
    executor: RequestExecutor,
    config: ReportConfig,
    shutdown: Option<SharedShutdown>,
}

impl ReportJobPoller {
    /// Create a poller issuing calls through `executor`.
    pub fn new(executor: RequestExecutor, config: ReportConfig) -> Self {
        Self {
            executor,
            config,
            shutdown: None,
        }
    }

    /// Abandon polling once shutdown is requested.
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Active configuration
    pub fn config(&self) -> &ReportConfig {
        &self.config
    }

    /// Create a report job.
    pub async fn create_job(&self, scope: &Scope, spec: &ReportSpec) -> Result<ReportJob, ReportError> {
        spec.validate().map_err(ReportError::InvalidSpec)?;

        let request = ApiRequest::post(spec.creation_path())
            .scope(scope.as_str())
            .json(&spec.to_payload())?;
        let response: CreateReportResponse = self.executor.execute_json(request).await?;

        let job_id = response
            .report_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                ReportError::InvalidResponse(format!(
                    "report creation for '{}' returned no reportId",
                    spec.name
                ))
            })?;

        let mut job = ReportJob::new(job_id, spec.name.clone());
        if let Some(status) = response.status.as_deref().and_then(ReportStatus::from_provider) {
            // Terminal statuses are only taken from polling.
            if !status.is_terminal() {
                job.status = status;
            }
        }

        info!(
            report = %spec.name,
            job_id = %job.job_id,
            record_type = %spec.record_type,
            report_date = %spec.effective_date(),
            status = %job.status,
            "Report job created"
        );
        Ok(job)
    }

    /// Poll until the job is ready, fails or `max_wait` elapses.
    pub async fn poll_until_ready(
        &self,
        scope: &Scope,
        mut job: ReportJob,
        max_wait: Duration,
    ) -> Result<PollOutcome, ReportError> {
        let started = Instant::now();
        let deadline = started + max_wait;
        let growth = self.config.growth_factor.max(1.0);
        let max_interval = self.config.max_poll();
        let mut interval = self.config.initial_poll().min(max_interval);
        let mut intervals = Vec::new();
        let mut polls: u32 = 0;

        loop {
            if self.shutdown_requested() {
                warn!(job_id = %job.job_id, polls, "Shutdown requested, abandoning report job");
                return Err(ReportError::Cancelled {
                    job_id: job.job_id.clone(),
                });
            }

            // A slow status call must not outlive the polling window.
            let remaining = deadline.saturating_duration_since(Instant::now());
            let status = match self.fetch_status(scope, &job.job_id, remaining).await {
                Ok(status) => status,
                Err(ReportError::Request(RequestError::Timeout { .. })) => {
                    error!(
                        job_id = %job.job_id,
                        polls,
                        max_wait_secs = max_wait.as_secs(),
                        "Status check ran past the report deadline"
                    );
                    return Err(ReportError::Timeout {
                        job_id: job.job_id,
                        waited: started.elapsed(),
                        polls,
                        status: job.status,
                    });
                }
                Err(e) => return Err(e),
            };
            polls += 1;

            match status.status.as_deref().and_then(ReportStatus::from_provider) {
                Some(next) if next != job.status => {
                    info!(
                        job_id = %job.job_id,
                        from = %job.status,
                        to = %next,
                        polls,
                        "Report status changed"
                    );
                    job.status = next;
                }
                Some(_) => {}
                None => warn!(
                    job_id = %job.job_id,
                    status = status.status.as_deref().unwrap_or("<missing>"),
                    "Unknown report status, polling again"
                ),
            }

            match job.status {
                ReportStatus::Ready => {
                    job.location = status.location;
                    let elapsed = started.elapsed();
                    info!(
                        job_id = %job.job_id,
                        polls,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Report ready"
                    );
                    return Ok(PollOutcome {
                        job,
                        polls,
                        intervals,
                        elapsed,
                    });
                }
                ReportStatus::Failed => {
                    error!(
                        job_id = %job.job_id,
                        details = status.status_details.as_deref().unwrap_or(""),
                        "Report generation failed"
                    );
                    return Err(ReportError::Failed {
                        job_id: job.job_id,
                        details: status.status_details,
                    });
                }
                _ => {}
            }

            let now = Instant::now();
            if now >= deadline {
                error!(
                    job_id = %job.job_id,
                    polls,
                    max_wait_secs = max_wait.as_secs(),
                    status = %job.status,
                    "Report not ready before deadline"
                );
                return Err(ReportError::Timeout {
                    job_id: job.job_id,
                    waited: now - started,
                    polls,
                    status: job.status,
                });
            }

            let wait = interval.min(deadline - now);
            debug!(job_id = %job.job_id, wait_ms = wait.as_millis() as u64, polls, "Waiting before next poll");
            intervals.push(wait);
            if !self.pause(wait).await {
                return Err(ReportError::Cancelled {
                    job_id: job.job_id,
                });
            }

            interval = interval.mul_f64(growth).min(max_interval);
        }
    }

    /// Download and decode a ready job's artifact.
    pub async fn download(&self, scope: &Scope, job: &ReportJob) -> Result<ReportOutput, ReportError> {
        if job.status != ReportStatus::Ready {
            return Err(ReportError::NotReady {
                job_id: job.job_id.clone(),
                status: job.status,
            });
        }

        let path = job
            .location
            .clone()
            .unwrap_or_else(|| format!("{}/{}/download", paths::REPORTS, job.job_id));
        let response = self
            .executor
            .execute(ApiRequest::get(path).scope(scope.as_str()))
            .await?;

        let decoded = decode_report(&response.body, response.content_type.as_deref()).map_err(|source| {
            error!(
                job_id = %job.job_id,
                content_type = source.content_type().unwrap_or("unknown"),
                error = %source,
                "Report payload could not be decoded"
            );
            ReportError::Decode {
                job_id: job.job_id.clone(),
                source,
            }
        })?;

        info!(
            job_id = %job.job_id,
            format = %decoded.format,
            row_format = %decoded.row_format,
            bytes = response.body.len(),
            rows = decoded.rows.len(),
            "Report downloaded"
        );

        let mut job = job.clone();
        job.status = ReportStatus::Downloaded;
        job.format = Some(decoded.format);
        Ok(ReportOutput {
            job,
            row_format: decoded.row_format,
            rows: decoded.rows,
        })
    }

    /// One full lifecycle: create, poll with the configured `max_wait`, download.
    pub async fn run_report(&self, scope: &Scope, spec: &ReportSpec) -> Result<ReportOutput, ReportError> {
        let span = info_span!("report_job", report = %spec.name, record_type = %spec.record_type);

        async move {
            let metrics = ReportJobMetrics::start(spec.name.clone());
            let result = async {
                let job = self.create_job(scope, spec).await?;
                let outcome = self
                    .poll_until_ready(scope, job, self.config.max_wait())
                    .await?;
                self.download(scope, &outcome.job).await
            }
            .await;

            match &result {
                Ok(output) => metrics.record_success(output.rows.len()),
                Err(e) => {
                    warn!(error = %e, "Report job did not complete");
                    metrics.record_failure(&e.to_string());
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    /// Run several reports, at most `workers` lifecycles at a time.
    ///
    /// Jobs are independent: one failing never stops the others. Results are
    /// keyed by report name; a repeated name is skipped.
    pub async fn run_reports(
        &self,
        scope: &Scope,
        specs: Vec<ReportSpec>,
    ) -> BTreeMap<String, Result<ReportOutput, ReportError>> {
        let mut seen = HashSet::new();
        let specs: Vec<ReportSpec> = specs
            .into_iter()
            .filter(|spec| {
                let fresh = seen.insert(spec.name.clone());
                if !fresh {
                    warn!(report = %spec.name, "Duplicate report name, skipping");
                }
                fresh
            })
            .collect();

        let workers = self.config.workers.max(1);
        let started = Instant::now();
        info!(reports = specs.len(), workers, "Running reports");

        let results: BTreeMap<String, Result<ReportOutput, ReportError>> = stream::iter(specs)
            .map(|spec| async move {
                let result = self.run_report(scope, &spec).await;
                (spec.name, result)
            })
            .buffer_unordered(workers)
            .collect()
            .await;

        let succeeded = results.values().filter(|r| r.is_ok()).count();
        info!(
            reports = results.len(),
            succeeded,
            failed = results.len() - succeeded,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Report run complete"
        );
        results
    }

    async fn fetch_status(
        &self,
        scope: &Scope,
        job_id: &str,
        deadline: Duration,
    ) -> Result<ReportStatusResponse, ReportError> {
        let request = ApiRequest::get(format!("{}/{}", paths::REPORTS, job_id))
            .scope(scope.as_str())
            .deadline(deadline);
        Ok(self.executor.execute_json(request).await?)
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .is_some_and(|s| s.is_shutdown_requested())
    }

    /// Sleep for `wait`; false if shutdown interrupted it.
    async fn pause(&self, wait: Duration) -> bool {
        match &self.shutdown {
            Some(shutdown) => tokio::select! {
                _ = tokio::time::sleep(wait) => true,
                _ = shutdown.wait_for_shutdown() => false,
            },
            None => {
                tokio::time::sleep(wait).await;
                true
            }
        }
    }
}
