//! Single-conversation reclassification.
//!
//! Flow: load snapshot → sender rule lookup → (fallback) classifier call →
//! bucket resolution → diff → persist or report.
//!
//! The database lock is only taken for the load and the persist; the
//! classifier call runs unlocked. Persistence is a version compare-and-set
//! on the conversation row plus the rule hit count, in one transaction.

use serde::{Deserialize, Serialize};

use crate::bucket::{resolve, MESSAGE_REVIEW_THRESHOLD};
use crate::classifier::ClassifyRequest;
use crate::db::{TriageDb, TriageUpdate};
use crate::engine::TriageEngine;
use crate::error::TriageError;
use crate::rules::matcher::match_identity;
use crate::sender::parse_sender;
use crate::types::{ClassificationSource, Confidence, Conversation, SenderRule, TriageSnapshot};

/// Persist attempts before a version conflict is surfaced.
const MAX_PERSIST_ATTEMPTS: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReclassifyOptions {
    /// Compute and report only; never write.
    pub dry_run: bool,
    /// Rules only: never call the classifier.
    pub skip_llm: bool,
    /// Use a matching rule instead of the classifier even when `skip_llm`
    /// is off. Off by default: without it only rules-only mode skips the
    /// classifier.
    pub prefer_rules: bool,
    /// Leave human-reviewed conversations alone.
    pub respect_reviews: bool,
    pub review_threshold: f64,
}

impl Default for ReclassifyOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            skip_llm: false,
            prefer_rules: false,
            respect_reviews: true,
            review_threshold: MESSAGE_REVIEW_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// A reviewer already decided this conversation.
    HumanReviewed,
    /// Rules-only mode and no rule matched the sender.
    NoMatchingRule,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReclassifyOutcome {
    pub conversation_id: String,
    /// Classification or bucket differs from what was stored.
    pub changed: bool,
    pub original: TriageSnapshot,
    pub updated: TriageSnapshot,
    /// Pattern of the rule that produced the candidate, if any.
    pub rule_applied: Option<String>,
    pub persisted: bool,
    pub skipped: Option<SkipReason>,
}

impl ReclassifyOutcome {
    fn skipped(conversation: &Conversation, reason: SkipReason) -> Self {
        let snapshot = conversation.snapshot();
        Self {
            conversation_id: conversation.id.clone(),
            changed: false,
            original: snapshot.clone(),
            updated: snapshot,
            rule_applied: None,
            persisted: false,
            skipped: Some(reason),
        }
    }
}

/// Proposed classification before bucket resolution.
#[derive(Debug, Clone)]
struct Candidate {
    classification: String,
    /// `None` defers to the taxonomy.
    requires_reply: Option<bool>,
    confidence: Confidence,
    sentiment: Option<String>,
    draft_reply: Option<String>,
    rule: Option<SenderRule>,
}

/// Reclassify one conversation.
///
/// Errors leave the stored conversation untouched.
pub async fn reclassify(
    engine: &TriageEngine,
    conversation_id: &str,
    options: &ReclassifyOptions,
) -> Result<ReclassifyOutcome, TriageError> {
    let conversation = load(engine, conversation_id)?;
    if options.respect_reviews && conversation.is_human_reviewed() {
        log::debug!("Skipping {}: human-reviewed", conversation.id);
        return Ok(ReclassifyOutcome::skipped(&conversation, SkipReason::HumanReviewed));
    }

    let rule = lookup_rule(engine, &conversation, options)?;

    let candidate = match rule {
        Some(rule) if options.skip_llm || options.prefer_rules => Candidate {
            classification: rule.default_classification.clone(),
            requires_reply: Some(rule.default_requires_reply),
            confidence: Confidence::RuleDerived,
            sentiment: None,
            draft_reply: None,
            rule: Some(rule),
        },
        _ if options.skip_llm => {
            return Ok(ReclassifyOutcome::skipped(&conversation, SkipReason::NoMatchingRule));
        }
        _ => classify(engine, &conversation).await?,
    };

    let updated = evaluate(engine, &candidate, options.review_threshold);
    let original = conversation.snapshot();
    let rule_applied = candidate.rule.as_ref().map(|r| r.pattern.clone());

    let mut outcome = ReclassifyOutcome {
        conversation_id: conversation.id.clone(),
        changed: is_changed(&original, &updated),
        original,
        updated,
        rule_applied,
        persisted: false,
        skipped: None,
    };

    if options.dry_run {
        return Ok(outcome);
    }

    let db = engine.db().lock();
    let mut current = conversation;
    let mut attempt = 0;
    loop {
        attempt += 1;
        if !needs_write(&current, &outcome.updated, candidate.confidence.source()) {
            break;
        }
        if persist(&db, &current, &candidate, &outcome.updated)? {
            outcome.persisted = true;
            break;
        }
        if attempt >= MAX_PERSIST_ATTEMPTS {
            log::warn!("Giving up on {} after a repeated version conflict", current.id);
            return Err(TriageError::PersistenceConflict(current.id));
        }

        log::debug!("Version conflict on {}; re-reading", current.id);
        current = db
            .get_conversation(&current.id)?
            .ok_or_else(|| TriageError::NotFound(format!("conversation {}", current.id)))?;
        if options.respect_reviews && current.is_human_reviewed() {
            return Ok(ReclassifyOutcome::skipped(&current, SkipReason::HumanReviewed));
        }
        outcome.original = current.snapshot();
        outcome.changed = is_changed(&outcome.original, &outcome.updated);
    }

    if outcome.persisted {
        log::info!(
            "Reclassified {}: {:?} -> {} ({})",
            outcome.conversation_id,
            outcome.original.classification,
            candidate.classification,
            outcome.rule_applied.as_deref().unwrap_or("model"),
        );
    }
    Ok(outcome)
}

fn load(engine: &TriageEngine, conversation_id: &str) -> Result<Conversation, TriageError> {
    engine
        .db()
        .lock()
        .get_conversation(conversation_id)?
        .ok_or_else(|| TriageError::NotFound(format!("conversation {}", conversation_id)))
}

/// Senders without a parseable address (SMS, chat handles) have no rule.
/// In rules-only mode that is an invalid pattern for the item.
fn lookup_rule(
    engine: &TriageEngine,
    conversation: &Conversation,
    options: &ReclassifyOptions,
) -> Result<Option<SenderRule>, TriageError> {
    let identity = match parse_sender(&conversation.sender_email) {
        Ok(identity) => identity,
        Err(e) if options.skip_llm => return Err(e),
        Err(e) => {
            log::debug!("No rule lookup for {}: {}", conversation.id, e);
            return Ok(None);
        }
    };
    let db = engine.db().lock();
    Ok(match_identity(&db, &conversation.workspace_id, &identity)?)
}

async fn classify(engine: &TriageEngine, conversation: &Conversation) -> Result<Candidate, TriageError> {
    let labels = engine
        .taxonomy()
        .entries()
        .iter()
        .map(|e| e.label.clone())
        .collect();
    let request = ClassifyRequest::for_conversation(conversation, labels);
    let timeout = engine.classifier_timeout();

    let output = tokio::time::timeout(timeout, engine.classifier().classify(&request))
        .await
        .map_err(|_| {
            TriageError::ClassifierUnavailable(format!(
                "timed out after {}ms on {}",
                timeout.as_millis(),
                conversation.id
            ))
        })??
        .validated()?;

    let classification = output.classification;
    if !engine.taxonomy().contains(&classification) {
        log::warn!(
            "Classifier returned unknown label '{}' for {}; holding for review",
            classification,
            conversation.id
        );
    }
    Ok(Candidate {
        classification,
        requires_reply: None,
        confidence: Confidence::Model(output.confidence),
        sentiment: output.sentiment,
        draft_reply: output.draft_reply,
        rule: None,
    })
}

fn evaluate(engine: &TriageEngine, candidate: &Candidate, review_threshold: f64) -> TriageSnapshot {
    let taxonomy = engine.taxonomy();
    let resolution = resolve(
        taxonomy,
        &candidate.classification,
        candidate.requires_reply,
        candidate.confidence,
        review_threshold,
    );
    let requires_reply = candidate
        .requires_reply
        .or_else(|| taxonomy.requires_reply(&candidate.classification))
        .unwrap_or(false);

    TriageSnapshot {
        classification: Some(candidate.classification.clone()),
        requires_reply,
        bucket: Some(resolution.bucket),
        confidence: candidate.confidence.probability(),
        needs_review: resolution.needs_review,
    }
}

fn is_changed(original: &TriageSnapshot, updated: &TriageSnapshot) -> bool {
    original.classification != updated.classification || original.bucket != updated.bucket
}

/// Any stored triage field differs from the candidate.
fn needs_write(current: &Conversation, updated: &TriageSnapshot, source: ClassificationSource) -> bool {
    current.snapshot() != *updated || current.classification_source != Some(source)
}

/// Returns `false` when another writer bumped the version first.
fn persist(
    db: &TriageDb,
    current: &Conversation,
    candidate: &Candidate,
    updated: &TriageSnapshot,
) -> Result<bool, TriageError> {
    let (Some(classification), Some(bucket)) = (updated.classification.clone(), updated.bucket)
    else {
        return Ok(true);
    };
    let update = TriageUpdate {
        classification,
        requires_reply: updated.requires_reply,
        bucket,
        confidence: updated.confidence,
        source: candidate.confidence.source(),
        needs_review: updated.needs_review,
        sentiment: candidate.sentiment.clone(),
        draft_reply: candidate.draft_reply.clone(),
    };

    db.with_transaction::<_, _, TriageError>(|tx| {
        if !tx.apply_triage(&current.id, current.version, &update)? {
            return Ok(false);
        }
        if let Some(ref rule) = candidate.rule {
            tx.increment_rule_hit(&rule.id)?;
        }
        Ok(true)
    })
}
