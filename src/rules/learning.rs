//! Correction ingestion and sender-rule learning.
//!
//! When a reviewer overrides a classification, this module:
//! 1. Appends an immutable `triage_corrections` row
//! 2. Upserts a sender rule, either because the reviewer asked for one
//!    (explicit) or because the sender's domain crossed the correction
//!    threshold (implicit)
//! 3. Reopens or closes the conversation per the new label
//!
//! All three happen in one transaction. A version conflict on the
//! conversation rolls everything back and is retried once.

use serde::{Deserialize, Serialize};

use crate::bucket::resolve;
use crate::config::EngineConfig;
use crate::db::{now_ts, NewCorrection, ReviewUpdate, TriageDb};
use crate::error::TriageError;
use crate::sender::{is_personal_domain, parse_sender};
use crate::taxonomy::Taxonomy;
use crate::types::{
    Confidence, Conversation, ConversationStatus, DecisionBucket, NewSenderRule, ReviewOutcome,
    RuleScope, SenderRule, TriageCorrection,
};

/// Attempts at the correction transaction before surfacing a conflict.
const MAX_ATTEMPTS: usize = 2;

/// How a correction may turn into a sender rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RuleLearning {
    /// Reviewer opted in: upsert a rule at `scope` right away.
    Explicit { scope: RuleScope },
    /// Review-queue path: learn a domain rule only once the domain has
    /// enough corrections.
    Implicit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrectionRequest {
    pub conversation_id: String,
    pub new_classification: String,
    pub corrected_by: String,
    /// Overrides the taxonomy's reply requirement for the new label.
    #[serde(default)]
    pub requires_reply: Option<bool>,
    pub learning: RuleLearning,
}

/// Thresholds the learning step needs from the engine config.
#[derive(Debug, Clone, PartialEq)]
pub struct LearningSettings {
    pub auto_rule_threshold: i64,
    pub protected_domains: Vec<String>,
}

impl From<&EngineConfig> for LearningSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            auto_rule_threshold: config.auto_rule_threshold,
            protected_domains: config.protected_domains.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "change", content = "rule", rename_all = "snake_case")]
pub enum RuleChange {
    Created(SenderRule),
    Updated(SenderRule),
}

impl RuleChange {
    pub fn rule(&self) -> &SenderRule {
        match self {
            RuleChange::Created(r) | RuleChange::Updated(r) => r,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrectionOutcome {
    pub correction: TriageCorrection,
    pub rule_created: bool,
    pub rule_change: Option<RuleChange>,
    /// Sender domain, when a domain rule was created or updated.
    pub domain: Option<String>,
    pub conversation: Conversation,
}

/// Record a human override and learn from it.
pub fn record_correction(
    db: &TriageDb,
    taxonomy: &Taxonomy,
    settings: &LearningSettings,
    request: &CorrectionRequest,
) -> Result<CorrectionOutcome, TriageError> {
    let label = request.new_classification.trim().to_lowercase();
    let entry = taxonomy
        .get(&label)
        .ok_or_else(|| TriageError::UnknownClassification(label.clone()))?;
    let new_requires_reply = request.requires_reply.unwrap_or(entry.requires_reply);

    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = db.with_transaction(|tx| {
            correct_once(tx, settings, request, &label, new_requires_reply)
        });
        match result {
            Err(TriageError::PersistenceConflict(id)) if attempt < MAX_ATTEMPTS => {
                log::warn!("Correction on {} lost a version race; retrying", id);
            }
            other => return other,
        }
    }
}

fn correct_once(
    tx: &TriageDb,
    settings: &LearningSettings,
    request: &CorrectionRequest,
    label: &str,
    new_requires_reply: bool,
) -> Result<CorrectionOutcome, TriageError> {
    let conversation = tx
        .get_conversation(&request.conversation_id)?
        .ok_or_else(|| TriageError::NotFound(format!("conversation {}", request.conversation_id)))?;

    let sender_domain = parse_sender(&conversation.sender_email)
        .ok()
        .map(|identity| identity.domain)
        .or_else(|| conversation.sender_domain.clone());
    let correction = tx.insert_correction(&NewCorrection {
        workspace_id: conversation.workspace_id.clone(),
        conversation_id: conversation.id.clone(),
        original_classification: conversation.classification.clone(),
        new_classification: label.to_string(),
        original_requires_reply: conversation.requires_reply,
        new_requires_reply,
        sender_email: conversation.sender_email.clone(),
        sender_domain,
        corrected_by: request.corrected_by.clone(),
    })?;

    let learned = match request.learning {
        RuleLearning::Explicit { scope } => {
            learn_explicit(tx, &conversation, &correction, scope, new_requires_reply)?
        }
        RuleLearning::Implicit => learn_implicit(tx, settings, &conversation, &correction)?,
    };

    let now = now_ts();
    let (bucket, status, resolved_at) = if new_requires_reply {
        (DecisionBucket::QuickWin, ConversationStatus::Open, None)
    } else {
        (
            DecisionBucket::AutoHandled,
            ConversationStatus::Resolved,
            Some(now.clone()),
        )
    };
    let outcome = if conversation.classification.as_deref() == Some(label)
        && conversation.requires_reply == new_requires_reply
    {
        ReviewOutcome::Confirmed
    } else {
        ReviewOutcome::Changed
    };

    let applied = tx.apply_review(
        &conversation.id,
        conversation.version,
        &ReviewUpdate {
            classification: label.to_string(),
            requires_reply: new_requires_reply,
            bucket,
            status,
            resolved_at,
            reviewed_by: request.corrected_by.clone(),
            reviewed_at: now,
            outcome,
        },
    )?;
    if !applied {
        return Err(TriageError::PersistenceConflict(conversation.id));
    }

    let updated = tx
        .get_conversation(&conversation.id)?
        .ok_or_else(|| TriageError::NotFound(format!("conversation {}", conversation.id)))?;

    let (rule_change, domain) = match learned {
        Some((change, domain)) => (Some(change), domain),
        None => (None, None),
    };
    log::info!(
        "Recorded correction {} on {}: {:?} -> {} (rule: {})",
        correction.id,
        updated.id,
        correction.original_classification,
        correction.new_classification,
        rule_change
            .as_ref()
            .map(|c| c.rule().pattern.as_str())
            .unwrap_or("none"),
    );

    Ok(CorrectionOutcome {
        rule_created: matches!(rule_change, Some(RuleChange::Created(_))),
        rule_change,
        domain,
        correction,
        conversation: updated,
    })
}

type Learned = Option<(RuleChange, Option<String>)>;

fn learn_explicit(
    tx: &TriageDb,
    conversation: &Conversation,
    correction: &TriageCorrection,
    scope: RuleScope,
    new_requires_reply: bool,
) -> Result<Learned, TriageError> {
    let identity = parse_sender(&conversation.sender_email)?;
    let (rule, created) = tx.upsert_rule(&NewSenderRule {
        workspace_id: conversation.workspace_id.clone(),
        pattern: identity.pattern(scope),
        default_classification: correction.new_classification.clone(),
        default_requires_reply: new_requires_reply,
        created_from_correction_id: Some(correction.id.clone()),
        ..NewSenderRule::default()
    })?;
    let domain = match scope {
        RuleScope::Domain => Some(identity.domain),
        RuleScope::Email => None,
    };
    let change = if created {
        RuleChange::Created(rule)
    } else {
        RuleChange::Updated(rule)
    };
    Ok(Some((change, domain)))
}

fn learn_implicit(
    tx: &TriageDb,
    settings: &LearningSettings,
    conversation: &Conversation,
    correction: &TriageCorrection,
) -> Result<Learned, TriageError> {
    // Chat and SMS senders have no domain to learn.
    let Ok(identity) = parse_sender(&conversation.sender_email) else {
        return Ok(None);
    };
    if is_personal_domain(&identity.domain, &settings.protected_domains) {
        log::debug!("Not learning a domain rule for protected domain {}", identity.domain);
        return Ok(None);
    }

    let count = tx.count_domain_corrections(&conversation.workspace_id, &identity.domain)?;
    if count < settings.auto_rule_threshold {
        return Ok(None);
    }

    let rule = NewSenderRule {
        workspace_id: conversation.workspace_id.clone(),
        pattern: identity.domain_pattern(),
        default_classification: correction.new_classification.clone(),
        default_requires_reply: correction.new_requires_reply,
        created_from_correction_id: Some(correction.id.clone()),
        ..NewSenderRule::default()
    };

    let has_active = tx
        .get_rule_by_pattern(&rule.workspace_id, &rule.pattern)?
        .is_some_and(|r| r.is_active);

    let change = if has_active {
        let (stored, _) = tx.upsert_rule(&rule)?;
        RuleChange::Updated(stored)
    } else {
        match insert_learned_rule(tx, &rule) {
            Ok(stored) => {
                log::info!(
                    "Auto-created rule {} after {} corrections for {}",
                    stored.pattern,
                    count,
                    identity.domain
                );
                RuleChange::Created(stored)
            }
            Err(TriageError::RuleUniquenessViolation { .. }) => resolve_collision(tx, &rule)?,
            Err(e) => return Err(e),
        }
    };
    Ok(Some((change, Some(identity.domain))))
}

fn insert_learned_rule(tx: &TriageDb, rule: &NewSenderRule) -> Result<SenderRule, TriageError> {
    tx.insert_rule(rule).map_err(|e| {
        if e.is_unique_violation() {
            TriageError::RuleUniquenessViolation {
                workspace_id: rule.workspace_id.clone(),
                pattern: rule.pattern.clone(),
            }
        } else {
            e.into()
        }
    })
}

/// Another writer already holds the pattern. Keep it when it already says
/// what we wanted, else overwrite it.
fn resolve_collision(tx: &TriageDb, rule: &NewSenderRule) -> Result<RuleChange, TriageError> {
    if let Some(existing) = tx.get_rule_by_pattern(&rule.workspace_id, &rule.pattern)? {
        if existing.is_active
            && existing.default_classification == rule.default_classification
            && existing.default_requires_reply == rule.default_requires_reply
        {
            return Ok(RuleChange::Updated(existing));
        }
    }
    let (stored, created) = tx.upsert_rule(rule)?;
    Ok(if created {
        RuleChange::Created(stored)
    } else {
        RuleChange::Updated(stored)
    })
}

/// Stamp a conversation as reviewed without changing its classification.
pub fn confirm_review(
    db: &TriageDb,
    taxonomy: &Taxonomy,
    conversation_id: &str,
    reviewed_by: &str,
) -> Result<Conversation, TriageError> {
    let conversation = db
        .get_conversation(conversation_id)?
        .ok_or_else(|| TriageError::NotFound(format!("conversation {}", conversation_id)))?;
    let label = conversation.classification.clone().ok_or_else(|| {
        TriageError::UnknownClassification(format!("conversation {} is unclassified", conversation_id))
    })?;

    let bucket = conversation.decision_bucket.unwrap_or_else(|| {
        resolve(
            taxonomy,
            &label,
            Some(conversation.requires_reply),
            Confidence::Human,
            0.0,
        )
        .bucket
    });

    let applied = db.apply_review(
        &conversation.id,
        conversation.version,
        &ReviewUpdate {
            classification: label,
            requires_reply: conversation.requires_reply,
            bucket,
            status: conversation.status,
            resolved_at: conversation.resolved_at.clone(),
            reviewed_by: reviewed_by.to_string(),
            reviewed_at: now_ts(),
            outcome: ReviewOutcome::Confirmed,
        },
    )?;
    if !applied {
        return Err(TriageError::PersistenceConflict(conversation.id));
    }

    db.get_conversation(conversation_id)?
        .ok_or_else(|| TriageError::NotFound(format!("conversation {}", conversation_id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::test_db;
    use crate::taxonomy::loader::load_default;
    use crate::types::NewConversation;

    fn settings() -> LearningSettings {
        LearningSettings {
            auto_rule_threshold: 3,
            protected_domains: vec![],
        }
    }

    fn seed(db: &TriageDb, id: &str, sender: &str) {
        db.insert_conversation(&NewConversation {
            id: Some(id.into()),
            workspace_id: "w1".into(),
            sender_email: sender.into(),
            body: format!("message {id}"),
            ..NewConversation::default()
        })
        .unwrap();
    }

    fn implicit(id: &str, label: &str) -> CorrectionRequest {
        CorrectionRequest {
            conversation_id: id.into(),
            new_classification: label.into(),
            corrected_by: "alice".into(),
            requires_reply: None,
            learning: RuleLearning::Implicit,
        }
    }

    fn active_rules(db: &TriageDb, pattern: &str) -> i64 {
        db.conn_ref()
            .query_row(
                "SELECT COUNT(*) FROM sender_rules WHERE pattern = ?1 AND is_active = 1",
                [pattern],
                |row| row.get(0),
            )
            .unwrap()
    }

    #[test]
    fn test_third_domain_correction_creates_rule_fourth_updates() {
        let db = test_db();
        let taxonomy = load_default().unwrap();
        for i in 1..=4 {
            seed(&db, &format!("c{i}"), &format!("user{i}@vendorx.com"));
        }

        let first = record_correction(&db, &taxonomy, &settings(), &implicit("c1", "supplier_invoice"))
            .unwrap();
        assert!(!first.rule_created);
        assert!(first.rule_change.is_none());
        let second = record_correction(&db, &taxonomy, &settings(), &implicit("c2", "supplier_invoice"))
            .unwrap();
        assert!(!second.rule_created);

        let third = record_correction(&db, &taxonomy, &settings(), &implicit("c3", "supplier_invoice"))
            .unwrap();
        assert!(third.rule_created);
        assert_eq!(third.domain.as_deref(), Some("vendorx.com"));
        let rule = third.rule_change.as_ref().unwrap().rule();
        assert_eq!(rule.pattern, "*@vendorx.com");
        assert!(rule.is_active);
        assert_eq!(
            rule.created_from_correction_id.as_deref(),
            Some(third.correction.id.as_str())
        );

        let fourth = record_correction(&db, &taxonomy, &settings(), &implicit("c4", "supplier_question"))
            .unwrap();
        assert!(!fourth.rule_created);
        match fourth.rule_change.unwrap() {
            RuleChange::Updated(r) => {
                assert_eq!(r.id, rule.id);
                assert_eq!(r.default_classification, "supplier_question");
                assert!(r.default_requires_reply);
            }
            other => panic!("expected update, got {:?}", other),
        }
        assert_eq!(active_rules(&db, "*@vendorx.com"), 1);
    }

    #[test]
    fn test_display_name_senders_learn_domain_rule() {
        let db = test_db();
        let taxonomy = load_default().unwrap();
        for i in 1..=3 {
            seed(&db, &format!("c{i}"), &format!("Billing Dept <billing{i}@VendorX.com>"));
        }
        assert_eq!(
            db.get_conversation("c1").unwrap().unwrap().sender_domain.as_deref(),
            Some("vendorx.com")
        );

        for id in ["c1", "c2"] {
            let outcome =
                record_correction(&db, &taxonomy, &settings(), &implicit(id, "supplier_invoice"))
                    .unwrap();
            assert!(!outcome.rule_created);
        }
        let third = record_correction(&db, &taxonomy, &settings(), &implicit("c3", "supplier_invoice"))
            .unwrap();
        assert!(third.rule_created);
        assert_eq!(third.correction.sender_domain.as_deref(), Some("vendorx.com"));
        assert_eq!(third.rule_change.unwrap().rule().pattern, "*@vendorx.com");
        assert_eq!(active_rules(&db, "*@vendorx.com"), 1);
    }

    #[test]
    fn test_explicit_email_rule_created_immediately() {
        let db = test_db();
        let taxonomy = load_default().unwrap();
        seed(&db, "c1", "Ceo@VendorX.com");

        let outcome = record_correction(
            &db,
            &taxonomy,
            &settings(),
            &CorrectionRequest {
                learning: RuleLearning::Explicit {
                    scope: RuleScope::Email,
                },
                ..implicit("c1", "complaint_dispute")
            },
        )
        .unwrap();
        assert!(outcome.rule_created);
        assert_eq!(outcome.domain, None);
        assert_eq!(outcome.rule_change.unwrap().rule().pattern, "ceo@vendorx.com");
    }

    #[test]
    fn test_explicit_rule_overwrites_and_resets_hits() {
        let db = test_db();
        let taxonomy = load_default().unwrap();
        seed(&db, "c1", "a@vendorx.com");
        seed(&db, "c2", "b@vendorx.com");
        let explicit = |id: &str, label: &str| CorrectionRequest {
            learning: RuleLearning::Explicit {
                scope: RuleScope::Domain,
            },
            ..implicit(id, label)
        };

        let first = record_correction(&db, &taxonomy, &settings(), &explicit("c1", "spam")).unwrap();
        let rule_id = first.rule_change.unwrap().rule().id.clone();
        db.increment_rule_hit(&rule_id).unwrap();

        let second =
            record_correction(&db, &taxonomy, &settings(), &explicit("c2", "supplier_invoice")).unwrap();
        assert!(!second.rule_created);
        let rule = second.rule_change.unwrap().rule().clone();
        assert_eq!(rule.id, rule_id);
        assert_eq!(rule.hit_count, 0);
        assert_eq!(rule.default_classification, "supplier_invoice");
        assert_eq!(second.domain.as_deref(), Some("vendorx.com"));
    }

    #[test]
    fn test_conversation_reopened_or_closed_per_label() {
        let db = test_db();
        let taxonomy = load_default().unwrap();
        seed(&db, "c1", "a@shop.io");

        let closed = record_correction(&db, &taxonomy, &settings(), &implicit("c1", "spam")).unwrap();
        assert_eq!(closed.conversation.decision_bucket, Some(DecisionBucket::AutoHandled));
        assert_eq!(closed.conversation.status, ConversationStatus::Resolved);
        assert!(closed.conversation.resolved_at.is_some());
        assert_eq!(closed.conversation.review_outcome, Some(ReviewOutcome::Changed));

        let reopened =
            record_correction(&db, &taxonomy, &settings(), &implicit("c1", "complaint_dispute")).unwrap();
        assert_eq!(reopened.conversation.decision_bucket, Some(DecisionBucket::QuickWin));
        assert_eq!(reopened.conversation.status, ConversationStatus::Open);
        assert_eq!(reopened.conversation.resolved_at, None);
        assert_eq!(reopened.correction.original_classification.as_deref(), Some("spam"));
        assert!(!reopened.correction.original_requires_reply);
        assert!(reopened.correction.new_requires_reply);
    }

    #[test]
    fn test_unknown_label_records_nothing() {
        let db = test_db();
        let taxonomy = load_default().unwrap();
        seed(&db, "c1", "a@shop.io");

        let err = record_correction(&db, &taxonomy, &settings(), &implicit("c1", "made_up"))
            .unwrap_err();
        assert!(matches!(err, TriageError::UnknownClassification(_)));
        assert!(db.corrections_for_conversation("c1").unwrap().is_empty());
    }

    #[test]
    fn test_missing_conversation_is_not_found() {
        let db = test_db();
        let taxonomy = load_default().unwrap();
        let err = record_correction(&db, &taxonomy, &settings(), &implicit("nope", "spam"))
            .unwrap_err();
        assert!(matches!(err, TriageError::NotFound(_)));
    }

    #[test]
    fn test_protected_domain_never_learned_implicitly() {
        let db = test_db();
        let taxonomy = load_default().unwrap();
        for i in 1..=3 {
            seed(&db, &format!("c{i}"), &format!("friend{i}@gmail.com"));
            record_correction(&db, &taxonomy, &settings(), &implicit(&format!("c{i}"), "personal"))
                .unwrap();
        }
        assert_eq!(active_rules(&db, "*@gmail.com"), 0);
    }

    #[test]
    fn test_sms_sender_records_correction_without_rule() {
        let db = test_db();
        let taxonomy = load_default().unwrap();
        seed(&db, "c1", "+15551234567");
        let outcome = record_correction(&db, &taxonomy, &settings(), &implicit("c1", "booking_request"))
            .unwrap();
        assert!(outcome.rule_change.is_none());
        assert_eq!(db.corrections_for_conversation("c1").unwrap().len(), 1);
    }

    #[test]
    fn test_explicit_rule_for_sms_sender_fails_closed() {
        let db = test_db();
        let taxonomy = load_default().unwrap();
        seed(&db, "c1", "+15551234567");
        let err = record_correction(
            &db,
            &taxonomy,
            &settings(),
            &CorrectionRequest {
                learning: RuleLearning::Explicit {
                    scope: RuleScope::Email,
                },
                ..implicit("c1", "booking_request")
            },
        )
        .unwrap_err();
        assert!(matches!(err, TriageError::InvalidPattern(_)));
        assert!(db.corrections_for_conversation("c1").unwrap().is_empty());
        assert!(!db.get_conversation("c1").unwrap().unwrap().is_human_reviewed());
    }

    #[test]
    fn test_inactive_domain_rule_reactivated_by_threshold() {
        let db = test_db();
        let taxonomy = load_default().unwrap();
        let old = db
            .insert_rule(&NewSenderRule {
                workspace_id: "w1".into(),
                pattern: "*@vendorx.com".into(),
                default_classification: "spam".into(),
                default_requires_reply: false,
                ..NewSenderRule::default()
            })
            .unwrap();
        db.deactivate_rule(&old.id).unwrap();

        for i in 1..=3 {
            seed(&db, &format!("c{i}"), &format!("u{i}@vendorx.com"));
        }
        record_correction(&db, &taxonomy, &settings(), &implicit("c1", "supplier_invoice")).unwrap();
        record_correction(&db, &taxonomy, &settings(), &implicit("c2", "supplier_invoice")).unwrap();
        let third =
            record_correction(&db, &taxonomy, &settings(), &implicit("c3", "supplier_invoice")).unwrap();

        assert!(third.rule_created);
        let rule = third.rule_change.unwrap().rule().clone();
        assert_eq!(rule.id, old.id);
        assert!(rule.is_active);
        assert_eq!(rule.default_classification, "supplier_invoice");
        assert_eq!(active_rules(&db, "*@vendorx.com"), 1);
    }

    #[test]
    fn test_confirm_review_keeps_classification() {
        let db = test_db();
        let taxonomy = load_default().unwrap();
        seed(&db, "c1", "a@shop.io");
        db.apply_triage(
            "c1",
            1,
            &crate::db::TriageUpdate {
                classification: "customer_inquiry".into(),
                requires_reply: true,
                bucket: DecisionBucket::QuickWin,
                confidence: Some(0.55),
                source: crate::types::ClassificationSource::Model,
                needs_review: true,
                sentiment: None,
                draft_reply: None,
            },
        )
        .unwrap();

        let confirmed = confirm_review(&db, &taxonomy, "c1", "bob").unwrap();
        assert_eq!(confirmed.classification.as_deref(), Some("customer_inquiry"));
        assert_eq!(confirmed.decision_bucket, Some(DecisionBucket::QuickWin));
        assert_eq!(confirmed.review_outcome, Some(ReviewOutcome::Confirmed));
        assert!(!confirmed.needs_review);
        assert!(db.corrections_for_conversation("c1").unwrap().is_empty());
    }

    #[test]
    fn test_confirm_unclassified_errors() {
        let db = test_db();
        let taxonomy = load_default().unwrap();
        seed(&db, "c1", "a@shop.io");
        assert!(confirm_review(&db, &taxonomy, "c1", "bob").is_err());
    }
}
