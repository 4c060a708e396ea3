//! Batch reconciliation over a workspace's conversations.
//!
//! The caller drives pagination with an explicit `offset` cursor and keeps
//! calling [`run_batch`] until a page comes back short. Items within a page
//! are reclassified concurrently, bounded by `batch_concurrency`. Each item
//! is its own atomic unit; per-item failures are recorded and never abort
//! the page. Failing to fetch the page itself is returned to the caller,
//! who may retry the same offset.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::bucket::ReviewPath;
use crate::config::EngineConfig;
use crate::engine::TriageEngine;
use crate::error::{ItemError, TriageError};
use crate::pipeline::{self, ReclassifyOptions, ReclassifyOutcome};
use crate::types::DecisionBucket;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOptions {
    /// Page size; `None` uses the configured default.
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub skip_llm: bool,
    /// Selects the review threshold applied to model confidences.
    #[serde(default)]
    pub review_path: ReviewPath,
}

impl BatchOptions {
    /// "Apply Sender Rules": rules only, no classifier calls.
    pub fn fast() -> Self {
        Self {
            skip_llm: true,
            ..Self::default()
        }
    }

    /// "Full AI Re-Analysis": every item goes to the classifier.
    pub fn full() -> Self {
        Self::default()
    }

    pub fn preview(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn on_path(mut self, path: ReviewPath) -> Self {
        self.review_path = path;
        self
    }

    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }

    fn reclassify_options(&self, config: &EngineConfig) -> ReclassifyOptions {
        ReclassifyOptions {
            dry_run: self.dry_run,
            skip_llm: self.skip_llm,
            prefer_rules: self.skip_llm,
            respect_reviews: true,
            review_threshold: self.review_path.threshold(config),
        }
    }
}

/// One changed conversation in a batch report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemResult {
    pub conversation_id: String,
    pub original_classification: Option<String>,
    pub new_classification: Option<String>,
    pub original_bucket: Option<DecisionBucket>,
    pub new_bucket: Option<DecisionBucket>,
    pub rule_applied: Option<String>,
}

impl From<&ReclassifyOutcome> for BatchItemResult {
    fn from(outcome: &ReclassifyOutcome) -> Self {
        Self {
            conversation_id: outcome.conversation_id.clone(),
            original_classification: outcome.original.classification.clone(),
            new_classification: outcome.updated.classification.clone(),
            original_bucket: outcome.original.bucket,
            new_bucket: outcome.updated.bucket,
            rule_applied: outcome.rule_applied.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemFailure {
    pub conversation_id: String,
    pub error: ItemError,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub offset: usize,
    pub limit: usize,
    pub dry_run: bool,
    /// Items fetched and attempted on this page.
    pub processed: usize,
    pub changed: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Changed items only, in page order.
    pub results: Vec<BatchItemResult>,
    pub errors: Vec<ItemFailure>,
    pub next_offset: usize,
    /// The page came back short; there is nothing after it.
    pub exhausted: bool,
}

/// Cooperative stop signal for [`run_all`], checked between pages.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Totals across every page of a [`run_all`] call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub pages: usize,
    pub processed: usize,
    pub changed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub results: Vec<BatchItemResult>,
    pub errors: Vec<ItemFailure>,
    /// Where to resume after a cancellation.
    pub next_offset: usize,
    pub cancelled: bool,
}

/// Reclassify one page of a workspace's conversations.
pub async fn run_batch(
    engine: &TriageEngine,
    workspace_id: &str,
    options: &BatchOptions,
) -> Result<BatchReport, TriageError> {
    let limit = options
        .limit
        .unwrap_or(engine.config().default_page_size)
        .max(1);
    let page = engine
        .db()
        .lock()
        .list_conversations_page(workspace_id, limit, options.offset)?;

    let item_options = options.reclassify_options(engine.config());
    let semaphore = Arc::new(Semaphore::new(engine.config().batch_concurrency.max(1)));
    let mut join_set = JoinSet::new();

    for (index, conversation) in page.iter().enumerate() {
        let engine = engine.clone();
        let semaphore = Arc::clone(&semaphore);
        let item_options = item_options.clone();
        let id = conversation.id.clone();
        join_set.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            let result = pipeline::reclassify(&engine, &id, &item_options).await;
            (index, id, result)
        });
    }

    let mut outcomes = Vec::with_capacity(page.len());
    let mut panicked = 0;
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(item) => outcomes.push(item),
            Err(e) => {
                log::error!("Batch item task failed: {}", e);
                panicked += 1;
            }
        }
    }
    outcomes.sort_by_key(|(index, _, _)| *index);

    let mut report = BatchReport {
        offset: options.offset,
        limit,
        dry_run: options.dry_run,
        processed: page.len(),
        failed: panicked,
        next_offset: options.offset + page.len(),
        exhausted: page.len() < limit,
        ..BatchReport::default()
    };

    for (_, id, result) in outcomes {
        match result {
            Ok(outcome) if outcome.skipped.is_some() => report.skipped += 1,
            Ok(outcome) => {
                if outcome.changed {
                    report.changed += 1;
                    report.results.push(BatchItemResult::from(&outcome));
                }
            }
            Err(e) => {
                if e.is_skippable() {
                    log::warn!("Skipped {}: {}", id, e);
                    report.skipped += 1;
                } else {
                    log::error!("Failed to reclassify {}: {}", id, e);
                    report.failed += 1;
                }
                report.errors.push(ItemFailure {
                    conversation_id: id,
                    error: ItemError::from(&e),
                });
            }
        }
    }

    log::info!(
        "Batch {}[{}..{}]{}: processed={} changed={} skipped={} failed={}",
        workspace_id,
        report.offset,
        report.next_offset,
        if report.dry_run { " (dry run)" } else { "" },
        report.processed,
        report.changed,
        report.skipped,
        report.failed
    );
    Ok(report)
}

/// Page through the whole workspace starting at `options.offset`.
///
/// Stops early when `cancel` is set, always after finishing the page in
/// flight. A page fetch failure ends the run with that error.
pub async fn run_all(
    engine: &TriageEngine,
    workspace_id: &str,
    options: &BatchOptions,
    cancel: &CancelFlag,
) -> Result<RunSummary, TriageError> {
    let mut summary = RunSummary {
        next_offset: options.offset,
        ..RunSummary::default()
    };
    let mut page_options = options.clone();

    loop {
        if cancel.is_cancelled() {
            log::info!("Batch run for {} cancelled at offset {}", workspace_id, summary.next_offset);
            summary.cancelled = true;
            break;
        }

        page_options.offset = summary.next_offset;
        let report = run_batch(engine, workspace_id, &page_options).await?;

        summary.pages += 1;
        summary.processed += report.processed;
        summary.changed += report.changed;
        summary.skipped += report.skipped;
        summary.failed += report.failed;
        summary.results.extend(report.results);
        summary.errors.extend(report.errors);
        summary.next_offset = report.next_offset;

        if report.exhausted {
            break;
        }
    }
    Ok(summary)
}
