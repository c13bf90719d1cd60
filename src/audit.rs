//! Audit trail of attempted mutations
//!
//! Every mutation handed to the engine is recorded with its outcome, dry runs
//! included, and the trail can be written out as CSV at the end of a run.

use chrono::{DateTime, Utc};
use csv::Writer;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::info;

use crate::batch::{BatchResult, ItemOutcome, MutationRequest};
use crate::EntityType;

/// Errors writing the audit trail
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// CSV file could not be written
    #[error("failed to write audit trail to {}: {source}", .path.display())]
    Write {
        /// Target file
        path: PathBuf,
        /// Writer error
        #[source]
        source: csv::Error,
    },
}

/// One attempted change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    /// When the change was attempted
    pub timestamp: DateTime<Utc>,
    /// What was done, e.g. `update_bid`
    pub action_type: String,
    /// Entity kind
    pub entity_type: EntityType,
    /// Entity id
    pub entity_id: String,
    /// Value before the change, if known
    pub old_value: String,
    /// Requested value
    pub new_value: String,
    /// Why the change was made
    pub reason: String,
    /// Whether the change was only simulated
    pub dry_run: bool,
    /// `succeeded`, `failed` or `skipped`
    pub outcome: String,
}

fn render(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

impl AuditEntry {
    /// Entry for one mutation and its outcome.
    pub fn from_mutation(
        entity_type: EntityType,
        mutation: &MutationRequest,
        outcome: &ItemOutcome,
        dry_run: bool,
    ) -> Self {
        let outcome = match outcome {
            ItemOutcome::Succeeded => "succeeded".to_string(),
            ItemOutcome::Skipped => "skipped".to_string(),
            ItemOutcome::Failed { code, details } => match code {
                Some(code) => format!("failed: {code} {details}"),
                None => format!("failed: {details}"),
            },
        };

        Self {
            timestamp: Utc::now(),
            action_type: format!("update_{}", mutation.field),
            entity_type,
            entity_id: mutation.entity_id.clone(),
            old_value: render(mutation.old_value.as_ref()),
            new_value: render(Some(&mutation.new_value)),
            reason: mutation.reason.clone().unwrap_or_default(),
            dry_run,
            outcome,
        }
    }
}

/// Append-only, thread-safe list of audit entries.
#[derive(Debug, Default)]
pub struct AuditTrail {
    entries: Mutex<Vec<AuditEntry>>,
}

impl AuditTrail {
    /// Empty trail.
    pub fn new() -> Self {
        Self::default()
    }

    fn entries_mut(&self) -> MutexGuard<'_, Vec<AuditEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append one entry.
    pub fn record(&self, entry: AuditEntry) {
        self.entries_mut().push(entry);
    }

    /// Record every mutation of a batch run with its per-item outcome.
    pub fn record_batch(
        &self,
        entity_type: EntityType,
        mutations: &[MutationRequest],
        result: &BatchResult,
        dry_run: bool,
    ) {
        let mut entries = self.entries_mut();
        for item in &result.items {
            if let Some(mutation) = mutations.get(item.index) {
                entries.push(AuditEntry::from_mutation(
                    entity_type,
                    mutation,
                    &item.outcome,
                    dry_run,
                ));
            }
        }
    }

    /// Snapshot of all entries.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries_mut().clone()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries_mut().len()
    }

    /// Whether nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.entries_mut().is_empty()
    }

    /// File name for a trail written at `now`, e.g. `audit_20240309_141500.csv`.
    pub fn default_file_name(now: DateTime<Utc>) -> String {
        format!("audit_{}.csv", now.format("%Y%m%d_%H%M%S"))
    }

    /// Write all entries as CSV with a header row. Returns the entry count.
    ///
    /// An empty trail writes no file.
    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<usize, AuditError> {
        let path = path.as_ref();
        let entries = self.entries();
        if entries.is_empty() {
            info!("No audit entries to write");
            return Ok(0);
        }

        let write = || -> Result<(), csv::Error> {
            let mut writer = Writer::from_path(path)?;
            for entry in &entries {
                writer.serialize(entry)?;
            }
            writer.flush()?;
            Ok(())
        };
        write().map_err(|source| AuditError::Write {
            path: path.to_path_buf(),
            source,
        })?;

        info!(path = %path.display(), entries = entries.len(), "Audit trail written");
        Ok(entries.len())
    }
}
