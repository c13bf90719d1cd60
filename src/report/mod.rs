//! Asynchronous report jobs
//!
//! A report is generated provider-side: the job is created, polled until it
//! reaches a terminal status, then its artifact is downloaded and decoded.
//!
//! ```text
//! requested -> generating -> ready -> downloaded
//!                        \-> failed
//! ```
//!
//! Status transitions are driven only by poll responses.

pub mod decode;
pub mod poller;

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

use crate::client::RequestError;

pub use decode::{decode_report, DecodeError, DecodedReport, ReportRow, RowFormat, WireFormat};
pub use poller::{PollOutcome, ReportJobPoller};

/// What to generate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSpec {
    /// Caller-chosen name; results of parallel runs are keyed by it
    pub name: String,
    /// Record type in the creation path (`campaigns`, `keywords`, `targets`, ...)
    pub record_type: String,
    /// Metrics to include
    pub metrics: Vec<String>,
    /// Day to report on; yesterday (UTC) when absent
    #[serde(default)]
    pub report_date: Option<NaiveDate>,
    /// Optional segment (e.g. `query`)
    #[serde(default)]
    pub segment: Option<String>,
}

impl ReportSpec {
    /// Report on yesterday with no segment.
    pub fn new(
        name: impl Into<String>,
        record_type: impl Into<String>,
        metrics: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            record_type: record_type.into(),
            metrics: metrics.into_iter().map(Into::into).collect(),
            report_date: None,
            segment: None,
        }
    }

    /// Report on a specific day.
    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.report_date = Some(date);
        self
    }

    /// Segment the report.
    pub fn with_segment(mut self, segment: impl Into<String>) -> Self {
        self.segment = Some(segment.into());
        self
    }

    /// Day the report covers.
    pub fn effective_date(&self) -> NaiveDate {
        self.report_date
            .unwrap_or_else(|| (Utc::now() - ChronoDuration::days(1)).date_naive())
    }

    /// Creation path, `/v2/sp/{recordType}/report`.
    pub fn creation_path(&self) -> String {
        format!("/v2/sp/{}/report", self.record_type)
    }

    /// Creation body: `reportDate` as YYYYMMDD and comma-joined metrics.
    pub fn to_payload(&self) -> Value {
        let mut payload = Map::new();
        payload.insert(
            "reportDate".to_string(),
            Value::String(self.effective_date().format("%Y%m%d").to_string()),
        );
        payload.insert("metrics".to_string(), Value::String(self.metrics.join(",")));
        if let Some(segment) = &self.segment {
            payload.insert("segment".to_string(), Value::String(segment.clone()));
        }
        Value::Object(payload)
    }

    /// Validate the spec before anything is sent.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("report name must not be empty".to_string());
        }
        if self.record_type.trim().is_empty() || self.record_type.contains('/') {
            return Err(format!("invalid record type '{}'", self.record_type));
        }
        if self.metrics.is_empty() {
            return Err(format!("report '{}' requests no metrics", self.name));
        }
        Ok(())
    }
}

/// Lifecycle status of a report job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    /// Created, not yet observed generating
    #[default]
    Requested,
    /// Provider is generating the artifact
    Generating,
    /// Artifact is ready to download
    Ready,
    /// Generation failed or was cancelled
    Failed,
    /// Artifact downloaded and decoded
    Downloaded,
}

impl ReportStatus {
    /// Map a provider status string.
    ///
    /// Provider codes (`IN_PROGRESS`, `SUCCESS`, `FAILURE`, `CANCELLED`) and
    /// lowercase lifecycle names are both accepted.
    pub fn from_provider(status: &str) -> Option<Self> {
        match status.trim().to_ascii_uppercase().as_str() {
            "REQUESTED" | "PENDING" => Some(ReportStatus::Requested),
            "IN_PROGRESS" | "GENERATING" | "PROCESSING" => Some(ReportStatus::Generating),
            "SUCCESS" | "COMPLETED" | "READY" => Some(ReportStatus::Ready),
            "FAILURE" | "FAILED" | "CANCELLED" => Some(ReportStatus::Failed),
            _ => None,
        }
    }

    /// `ready`, `failed` and `downloaded` end polling.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReportStatus::Ready | ReportStatus::Failed | ReportStatus::Downloaded
        )
    }

    /// Label used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Requested => "requested",
            ReportStatus::Generating => "generating",
            ReportStatus::Ready => "ready",
            ReportStatus::Failed => "failed",
            ReportStatus::Downloaded => "downloaded",
        }
    }
}

impl std::fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A provider-side report job.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportJob {
    /// Provider report id
    pub job_id: String,
    /// Name of the spec that created it
    pub name: String,
    /// Current status
    pub status: ReportStatus,
    /// When the job was created
    pub created_at: DateTime<Utc>,
    /// Wire format, known once downloaded
    pub format: Option<WireFormat>,
    /// Download location reported when ready
    pub location: Option<String>,
}

impl ReportJob {
    /// Job in `requested` state.
    pub fn new(job_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            name: name.into(),
            status: ReportStatus::Requested,
            created_at: Utc::now(),
            format: None,
            location: None,
        }
    }
}

/// Downloaded and decoded report.
#[derive(Debug, Clone)]
pub struct ReportOutput {
    /// Job in `downloaded` state
    pub job: ReportJob,
    /// Row layout of the artifact
    pub row_format: RowFormat,
    /// Parsed rows
    pub rows: Vec<ReportRow>,
}

/// Errors from a report job lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    /// Creation, poll or download call failed
    #[error(transparent)]
    Request(#[from] RequestError),

    /// Spec rejected before submission
    #[error("invalid report spec: {0}")]
    InvalidSpec(String),

    /// Provider response was missing required fields
    #[error("unexpected report response: {0}")]
    InvalidResponse(String),

    /// Job did not reach a terminal status within `max_wait`
    #[error("report {job_id} not ready after {waited:?} ({polls} polls, last status {status})")]
    Timeout {
        /// Provider report id
        job_id: String,
        /// Time spent polling
        waited: Duration,
        /// Status polls made
        polls: u32,
        /// Last observed status
        status: ReportStatus,
    },

    /// Provider reported the job as failed
    #[error("report {job_id} failed: {}", .details.as_deref().unwrap_or("no details"))]
    Failed {
        /// Provider report id
        job_id: String,
        /// Provider status detail
        details: Option<String>,
    },

    /// Download requested for a job that is not ready
    #[error("report {job_id} is {status}, not ready for download")]
    NotReady {
        /// Provider report id
        job_id: String,
        /// Current status
        status: ReportStatus,
    },

    /// Artifact matched no supported format
    #[error("report {job_id}: {source}")]
    Decode {
        /// Provider report id
        job_id: String,
        /// Decoder error with content type
        #[source]
        source: DecodeError,
    },

    /// Shutdown was requested while the job was in progress
    #[error("report {job_id} abandoned by shutdown")]
    Cancelled {
        /// Provider report id, empty when cancelled before creation
        job_id: String,
    },
}

impl ReportError {
    /// Credential failure; aborts the whole run.
    pub fn is_credential(&self) -> bool {
        matches!(self, ReportError::Request(e) if e.is_credential())
    }
}
