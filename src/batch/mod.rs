//! Batch mutation coordination
//!
//! Splits a mutation list into provider-sized batches, submits each batch as
//! one request and reduces the provider's per-item response into a
//! [`BatchResult`]. Guarantees:
//! - every input item gets exactly one outcome, in input order
//! - a transport failure fails every item of that batch and nothing else
//! - per-item rejections inside a successful call are reported individually
//! - a credential failure stops submission; the partial result is returned
//!   inside [`BatchError::Credential`]

use futures::stream::{self, StreamExt};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::auth::CredentialError;
use crate::cache::EntityCache;
use crate::client::{ApiRequest, RequestError, RequestExecutor};
use crate::config::BatchConfig;
use crate::metrics::record_batch_items;
use crate::shutdown::SharedShutdown;
use crate::{EntityType, Scope};

/// Provider result code for an accepted item.
const SUCCESS_CODE: &str = "SUCCESS";

/// One field change on one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationRequest {
    /// Target entity id
    pub entity_id: String,
    /// Provider field name (`bid`, `state`, `dailyBudget`, ...)
    pub field: String,
    /// New value
    pub new_value: Value,
    /// Previous value, recorded in the audit trail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
    /// Why the change is made, recorded in the audit trail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl MutationRequest {
    /// Change `field` of `entity_id` to `new_value`.
    pub fn new(entity_id: impl Into<String>, field: impl Into<String>, new_value: impl Into<Value>) -> Self {
        Self {
            entity_id: entity_id.into(),
            field: field.into(),
            new_value: new_value.into(),
            old_value: None,
            reason: None,
        }
    }

    /// Attach the previous value.
    pub fn with_old_value(mut self, old_value: impl Into<Value>) -> Self {
        self.old_value = Some(old_value.into());
        self
    }

    /// Attach a reason.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Provider payload: `{<idField>: id, <field>: value}`.
    ///
    /// Numeric ids are sent as numbers, which is what the provider expects.
    pub fn to_payload(&self, entity_type: EntityType) -> Value {
        let id = match self.entity_id.parse::<u64>() {
            Ok(n) => Value::from(n),
            Err(_) => Value::from(self.entity_id.clone()),
        };
        let mut object = serde_json::Map::new();
        object.insert(entity_type.id_field().to_string(), id);
        object.insert(self.field.clone(), self.new_value.clone());
        Value::Object(object)
    }
}

/// Outcome of one input item.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ItemOutcome {
    /// Accepted by the provider
    Succeeded,
    /// Rejected by the provider or lost to a transport failure
    Failed {
        /// Provider result code, if any
        code: Option<String>,
        /// Provider detail or transport error
        details: String,
    },
    /// Not submitted (dry run)
    Skipped,
}

/// Per-item result, in input order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemResult {
    /// Position in the input list
    pub index: usize,
    /// Entity id: the input id for updates, the provider-assigned id for creations
    pub entity_id: Option<String>,
    /// What happened
    #[serde(flatten)]
    pub outcome: ItemOutcome,
}

impl ItemResult {
    /// Whether the provider accepted the item.
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ItemOutcome::Succeeded)
    }
}

/// Summary of one submitted (or skipped) batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    /// Zero-based batch number
    pub index: usize,
    /// Items in the batch
    pub size: usize,
    /// Whether a request was sent for this batch
    pub submitted: bool,
    /// Accepted items
    pub succeeded: usize,
    /// Failed items
    pub failed: usize,
    /// Transport-level error that failed the whole batch
    pub error: Option<String>,
}

/// Aggregate result of a coordinator run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    /// One entry per input item, in input order
    pub items: Vec<ItemResult>,
    /// One entry per batch, in submission order
    pub batches: Vec<BatchSummary>,
}

impl BatchResult {
    /// Items processed (always equal to the input length).
    pub fn total(&self) -> usize {
        self.items.len()
    }

    /// Accepted items.
    pub fn succeeded(&self) -> usize {
        self.items.iter().filter(|i| i.is_success()).count()
    }

    /// Failed items.
    pub fn failed(&self) -> usize {
        self.failures().count()
    }

    /// Skipped items (dry run).
    pub fn skipped(&self) -> usize {
        self.items
            .iter()
            .filter(|i| matches!(i.outcome, ItemOutcome::Skipped))
            .count()
    }

    /// Failed items with their details.
    pub fn failures(&self) -> impl Iterator<Item = &ItemResult> {
        self.items
            .iter()
            .filter(|i| matches!(i.outcome, ItemOutcome::Failed { .. }))
    }

    /// Batch requests actually sent.
    pub fn batch_calls(&self) -> usize {
        self.batches.iter().filter(|b| b.submitted).count()
    }

    /// Ids of accepted items (provider-assigned ids for creations).
    pub fn succeeded_ids(&self) -> Vec<String> {
        self.items
            .iter()
            .filter(|i| i.is_success())
            .filter_map(|i| i.entity_id.clone())
            .collect()
    }

    /// Whether every item succeeded.
    pub fn is_complete_success(&self) -> bool {
        self.items.iter().all(ItemResult::is_success)
    }
}

/// Errors that stop a coordinator run.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    /// No token could be obtained; remaining batches were not submitted
    #[error("batch run aborted by credential failure: {source}")]
    Credential {
        /// Underlying credential error
        #[source]
        source: CredentialError,
        /// Outcomes up to the abort; unsent items are marked failed
        partial: BatchResult,
    },
}

/// One input item ready for submission.
#[derive(Debug, Clone)]
struct BatchItem {
    index: usize,
    entity_id: Option<String>,
    payload: Value,
}

struct BatchOutcome {
    summary: BatchSummary,
    items: Vec<ItemResult>,
    credential_error: Option<CredentialError>,
}

/// Partitions mutations into provider-sized batches and reduces per-item results.
#[derive(Debug, Clone)]
pub struct BatchMutationCoordinator {
    executor: RequestExecutor,
    config: BatchConfig,
    cache: Option<Arc<EntityCache>>,
    shutdown: Option<SharedShutdown>,
}

impl BatchMutationCoordinator {
    /// Create a coordinator submitting through `executor`.
    pub fn new(executor: RequestExecutor, config: BatchConfig) -> Self {
        Self {
            executor,
            config,
            cache: None,
            shutdown: None,
        }
    }

    /// Invalidate cached listings after successful writes.
    pub fn with_cache(mut self, cache: Arc<EntityCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Stop submitting new batches once shutdown is requested.
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Active configuration
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Apply field updates (PUT to the entity path).
    pub async fn apply(
        &self,
        scope: &Scope,
        entity_type: EntityType,
        mutations: &[MutationRequest],
    ) -> Result<BatchResult, BatchError> {
        let items = mutations
            .iter()
            .enumerate()
            .map(|(index, m)| BatchItem {
                index,
                entity_id: Some(m.entity_id.clone()),
                payload: m.to_payload(entity_type),
            })
            .collect();
        self.run(scope, entity_type, Method::PUT, items).await
    }

    /// Create entities (POST to the entity path). Succeeded items carry the new id.
    pub async fn create(
        &self,
        scope: &Scope,
        entity_type: EntityType,
        payloads: Vec<Value>,
    ) -> Result<BatchResult, BatchError> {
        let items = payloads
            .into_iter()
            .enumerate()
            .map(|(index, payload)| BatchItem {
                index,
                entity_id: None,
                payload,
            })
            .collect();
        self.run(scope, entity_type, Method::POST, items).await
    }

    async fn run(
        &self,
        scope: &Scope,
        entity_type: EntityType,
        method: Method,
        items: Vec<BatchItem>,
    ) -> Result<BatchResult, BatchError> {
        let total = items.len();
        let max_items = self.config.max_items.max(1);
        let batches: Vec<Vec<BatchItem>> = items.chunks(max_items).map(<[_]>::to_vec).collect();
        let batch_count = batches.len();

        let span = info_span!(
            "batch_run",
            scope = %scope,
            entity_type = %entity_type,
            method = %method,
            items = total,
            batches = batch_count
        );

        async move {
            if self.config.dry_run {
                info!(items = total, batches = batch_count, "Dry run, nothing submitted");
                record_batch_items("skipped", total);
                return Ok(skipped_result(batches));
            }

            info!(
                items = total,
                batches = batch_count,
                max_items,
                concurrency = self.config.concurrency.max(1),
                "Submitting batches"
            );

            let abort = AtomicBool::new(false);
            let abort = &abort;
            let method = &method;
            let mut outcomes = stream::iter(batches.into_iter().enumerate())
                .map(|(index, chunk)| self.submit_batch(scope, entity_type, method, index, chunk, abort))
                .buffered(self.config.concurrency.max(1));

            let mut result = BatchResult::default();
            let mut credential_error: Option<CredentialError> = None;
            let (mut succeeded, mut failed) = (0usize, 0usize);

            while let Some(outcome) = outcomes.next().await {
                if let Some(e) = outcome.credential_error {
                    abort.store(true, Ordering::SeqCst);
                    credential_error.get_or_insert(e);
                }
                let summary = outcome.summary;
                result.items.extend(outcome.items);
                succeeded += summary.succeeded;
                failed += summary.failed;
                info!(
                    batch = summary.index + 1,
                    batches = batch_count,
                    batch_size = summary.size,
                    batch_succeeded = summary.succeeded,
                    batch_failed = summary.failed,
                    processed = result.items.len(),
                    total,
                    succeeded,
                    failed,
                    "Batch processed"
                );
                result.batches.push(summary);
            }

            info!(
                total,
                succeeded,
                failed,
                batch_calls = result.batch_calls(),
                "Batch run complete"
            );

            match credential_error {
                Some(source) => Err(BatchError::Credential {
                    source,
                    partial: result,
                }),
                None => Ok(result),
            }
        }
        .instrument(span)
        .await
    }

    async fn submit_batch(
        &self,
        scope: &Scope,
        entity_type: EntityType,
        method: &Method,
        index: usize,
        chunk: Vec<BatchItem>,
        abort: &AtomicBool,
    ) -> BatchOutcome {
        if abort.load(Ordering::SeqCst) {
            return not_submitted(index, chunk, "not submitted: credential failure aborted the run");
        }
        if self
            .shutdown
            .as_ref()
            .is_some_and(|s| s.is_shutdown_requested())
        {
            return not_submitted(index, chunk, "not submitted: shutdown requested");
        }

        let payload: Vec<Value> = chunk.iter().map(|item| item.payload.clone()).collect();
        let request = match ApiRequest::new(method.clone(), entity_type.path())
            .scope(scope.as_str())
            .json(&payload)
        {
            Ok(request) => request,
            Err(e) => return transport_failure(index, chunk, &e, None),
        };

        debug!(batch = index + 1, size = chunk.len(), "Submitting batch");
        let response = match self.executor.execute(request).await {
            Ok(response) => response,
            Err(RequestError::Credential(e)) => {
                let error = RequestError::Credential(e.clone());
                return transport_failure(index, chunk, &error, Some(e));
            }
            Err(e) => return transport_failure(index, chunk, &e, None),
        };

        let rows: Vec<Value> = match response.json() {
            Ok(rows) => rows,
            Err(e) => return transport_failure(index, chunk, &e, None),
        };

        let items = reduce_item_results(entity_type, &chunk, &rows);
        let succeeded = items.iter().filter(|i| i.is_success()).count();
        let failed = items.len() - succeeded;

        for item in items.iter() {
            if let ItemOutcome::Failed { code, details } = &item.outcome {
                warn!(
                    batch = index + 1,
                    entity_id = item.entity_id.as_deref().unwrap_or("-"),
                    code = code.as_deref().unwrap_or("-"),
                    details = %details,
                    "Item rejected"
                );
            }
        }

        record_batch_items("succeeded", succeeded);
        record_batch_items("failed", failed);

        if succeeded > 0 && entity_type.is_cached() {
            if let Some(cache) = &self.cache {
                cache.invalidate(scope, entity_type);
            }
        }

        BatchOutcome {
            summary: BatchSummary {
                index,
                size: chunk.len(),
                submitted: true,
                succeeded,
                failed,
                error: None,
            },
            items,
            credential_error: None,
        }
    }
}

fn skipped_result(batches: Vec<Vec<BatchItem>>) -> BatchResult {
    let mut result = BatchResult::default();
    for (index, chunk) in batches.into_iter().enumerate() {
        result.batches.push(BatchSummary {
            index,
            size: chunk.len(),
            submitted: false,
            succeeded: 0,
            failed: 0,
            error: None,
        });
        result.items.extend(chunk.into_iter().map(|item| ItemResult {
            index: item.index,
            entity_id: item.entity_id,
            outcome: ItemOutcome::Skipped,
        }));
    }
    result
}

fn failed_items(chunk: Vec<BatchItem>, details: &str) -> Vec<ItemResult> {
    chunk
        .into_iter()
        .map(|item| ItemResult {
            index: item.index,
            entity_id: item.entity_id,
            outcome: ItemOutcome::Failed {
                code: None,
                details: details.to_string(),
            },
        })
        .collect()
}

fn not_submitted(index: usize, chunk: Vec<BatchItem>, reason: &str) -> BatchOutcome {
    let size = chunk.len();
    record_batch_items("failed", size);
    warn!(batch = index + 1, size, reason, "Batch not submitted");
    BatchOutcome {
        summary: BatchSummary {
            index,
            size,
            submitted: false,
            succeeded: 0,
            failed: size,
            error: Some(reason.to_string()),
        },
        items: failed_items(chunk, reason),
        credential_error: None,
    }
}

fn transport_failure(
    index: usize,
    chunk: Vec<BatchItem>,
    error: &RequestError,
    credential_error: Option<CredentialError>,
) -> BatchOutcome {
    let size = chunk.len();
    let details = error.to_string();
    record_batch_items("failed", size);
    warn!(batch = index + 1, size, error = %details, "Batch failed");
    BatchOutcome {
        summary: BatchSummary {
            index,
            size,
            submitted: true,
            succeeded: 0,
            failed: size,
            error: Some(details.clone()),
        },
        items: failed_items(chunk, &details),
        credential_error,
    }
}

fn id_of(row: &Value, entity_type: EntityType) -> Option<String> {
    match row.get(entity_type.id_field())? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn outcome_of(row: &Value) -> ItemOutcome {
    let code = row.get("code").and_then(Value::as_str);
    match code {
        Some(code) if code.eq_ignore_ascii_case(SUCCESS_CODE) => ItemOutcome::Succeeded,
        _ => ItemOutcome::Failed {
            code: code.map(str::to_string),
            details: row
                .get("details")
                .or_else(|| row.get("description"))
                .and_then(Value::as_str)
                .unwrap_or("rejected without details")
                .to_string(),
        },
    }
}

/// Match provider rows to input items: by position when the counts agree.
/// Otherwise items with an id take the row carrying that id, and items
/// without one (creations) take the remaining rows in order. Items left
/// without a row count as failed.
fn reduce_item_results(entity_type: EntityType, chunk: &[BatchItem], rows: &[Value]) -> Vec<ItemResult> {
    if rows.len() == chunk.len() {
        return chunk
            .iter()
            .zip(rows)
            .map(|(item, row)| ItemResult {
                index: item.index,
                entity_id: item.entity_id.clone().or_else(|| id_of(row, entity_type)),
                outcome: outcome_of(row),
            })
            .collect();
    }

    warn!(
        expected = chunk.len(),
        received = rows.len(),
        "Per-item result count mismatch, matching by id"
    );
    let mut by_id: HashMap<String, usize> = HashMap::new();
    for (position, row) in rows.iter().enumerate() {
        if let Some(id) = id_of(row, entity_type) {
            by_id.entry(id).or_insert(position);
        }
    }

    let mut consumed = vec![false; rows.len()];
    let mut matched: Vec<Option<usize>> = Vec::with_capacity(chunk.len());
    for item in chunk {
        let position = item.entity_id.as_ref().and_then(|id| by_id.get(id)).copied();
        if let Some(position) = position {
            consumed[position] = true;
        }
        matched.push(position);
    }
    let mut unclaimed = (0..rows.len()).filter(|&position| !consumed[position]);

    let results: Vec<ItemResult> = chunk
        .iter()
        .zip(matched)
        .map(|(item, position)| {
            let position = match &item.entity_id {
                Some(_) => position,
                None => unclaimed.next(),
            };
            match position.map(|p| &rows[p]) {
                Some(row) => ItemResult {
                    index: item.index,
                    entity_id: item.entity_id.clone().or_else(|| id_of(row, entity_type)),
                    outcome: outcome_of(row),
                },
                None => ItemResult {
                    index: item.index,
                    entity_id: item.entity_id.clone(),
                    outcome: ItemOutcome::Failed {
                        code: None,
                        details: "no per-item result returned".to_string(),
                    },
                },
            }
        })
        .collect();

    let stray: Vec<String> = unclaimed
        .filter_map(|position| id_of(&rows[position], entity_type))
        .collect();
    if !stray.is_empty() {
        warn!(ids = ?stray, "Provider returned results matching no submitted item");
    }
    results
}
