//! Decision bucket resolution.
//!
//! Pure mapping from {classification, requiresReply, confidence} to a bucket
//! and a review flag. Precedence, first match wins:
//!   1. No reply required          → auto_handled
//!   2. Urgent complaint / lead    → act_now
//!   3. Reply required             → quick_win
//!   4. Reply requirement unknown  → wait

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::taxonomy::Taxonomy;
use crate::types::{Confidence, DecisionBucket};

/// Review threshold for per-message classification.
pub const MESSAGE_REVIEW_THRESHOLD: f64 = 0.80;

/// Review threshold for the specialized triage-agent path.
pub const TRIAGE_AGENT_REVIEW_THRESHOLD: f64 = 0.85;

/// Which caller is triaging. Each path reviews against its own threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewPath {
    /// Per-message classification.
    #[default]
    Message,
    /// The specialized triage-agent pass.
    TriageAgent,
}

impl ReviewPath {
    pub fn threshold(self, config: &EngineConfig) -> f64 {
        match self {
            ReviewPath::Message => config.message_review_threshold,
            ReviewPath::TriageAgent => config.triage_agent_review_threshold,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub bucket: DecisionBucket,
    pub needs_review: bool,
}

/// Resolve the decision bucket for a candidate classification.
///
/// `requires_reply` overrides the taxonomy's value when set (rules carry
/// their own). When it is `None`, the taxonomy entry decides; a label the
/// taxonomy does not know leaves the requirement unknown and lands in `wait`.
///
/// Only model confidences are compared against `review_threshold`.
/// Auto-handled messages are never flagged.
pub fn resolve(
    taxonomy: &Taxonomy,
    classification: &str,
    requires_reply: Option<bool>,
    confidence: Confidence,
    review_threshold: f64,
) -> Resolution {
    let entry = taxonomy.get(classification);
    let requires_reply = requires_reply.or(entry.map(|e| e.requires_reply));

    let bucket = match requires_reply {
        Some(false) => DecisionBucket::AutoHandled,
        _ if entry.is_some_and(|e| e.is_act_now()) => DecisionBucket::ActNow,
        Some(true) => DecisionBucket::QuickWin,
        None => DecisionBucket::Wait,
    };

    let needs_review = match (bucket, confidence) {
        (DecisionBucket::AutoHandled, _) => false,
        // NaN compares false, so it is flagged too.
        (_, Confidence::Model(p)) => entry.is_none() || !(p >= review_threshold),
        (_, Confidence::RuleDerived | Confidence::Human) => false,
    };

    Resolution {
        bucket,
        needs_review,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::loader::load_default;

    #[test]
    fn test_supplier_invoice_auto_handled_even_at_low_confidence() {
        let taxonomy = load_default().unwrap();
        let r = resolve(
            &taxonomy,
            "supplier_invoice",
            None,
            Confidence::Model(0.3),
            MESSAGE_REVIEW_THRESHOLD,
        );
        assert_eq!(r.bucket, DecisionBucket::AutoHandled);
        assert!(!r.needs_review);
    }

    #[test]
    fn test_complaint_dispute_act_now_needs_review_below_threshold() {
        let taxonomy = load_default().unwrap();
        let r = resolve(
            &taxonomy,
            "complaint_dispute",
            None,
            Confidence::Model(0.6),
            MESSAGE_REVIEW_THRESHOLD,
        );
        assert_eq!(r.bucket, DecisionBucket::ActNow);
        assert!(r.needs_review);
    }

    #[test]
    fn test_every_no_reply_label_is_auto_handled() {
        let taxonomy = load_default().unwrap();
        for entry in taxonomy.entries().iter().filter(|e| !e.requires_reply) {
            for conf in [0.0, 0.3, 0.79, 0.8, 0.85, 1.0] {
                let r = resolve(
                    &taxonomy,
                    &entry.label,
                    None,
                    Confidence::Model(conf),
                    TRIAGE_AGENT_REVIEW_THRESHOLD,
                );
                assert_eq!(r.bucket, DecisionBucket::AutoHandled, "label {}", entry.label);
            }
        }
    }

    #[test]
    fn test_reply_required_non_urgent_is_quick_win() {
        let taxonomy = load_default().unwrap();
        let r = resolve(
            &taxonomy,
            "customer_inquiry",
            None,
            Confidence::Model(0.95),
            MESSAGE_REVIEW_THRESHOLD,
        );
        assert_eq!(r.bucket, DecisionBucket::QuickWin);
        assert!(!r.needs_review);
    }

    #[test]
    fn test_thresholds_are_distinguishable() {
        let taxonomy = load_default().unwrap();
        let at = |threshold| {
            resolve(
                &taxonomy,
                "customer_inquiry",
                None,
                Confidence::Model(0.82),
                threshold,
            )
            .needs_review
        };
        assert!(!at(MESSAGE_REVIEW_THRESHOLD));
        assert!(at(TRIAGE_AGENT_REVIEW_THRESHOLD));
    }

    #[test]
    fn test_rule_derived_never_flagged() {
        let taxonomy = load_default().unwrap();
        let r = resolve(
            &taxonomy,
            "complaint_dispute",
            Some(true),
            Confidence::RuleDerived,
            MESSAGE_REVIEW_THRESHOLD,
        );
        assert_eq!(r.bucket, DecisionBucket::ActNow);
        assert!(!r.needs_review);
    }

    #[test]
    fn test_rule_reply_override_beats_taxonomy() {
        let taxonomy = load_default().unwrap();
        let r = resolve(
            &taxonomy,
            "supplier_invoice",
            Some(true),
            Confidence::RuleDerived,
            MESSAGE_REVIEW_THRESHOLD,
        );
        assert_eq!(r.bucket, DecisionBucket::QuickWin);
    }

    #[test]
    fn test_unknown_model_label_waits_for_review() {
        let taxonomy = load_default().unwrap();
        let r = resolve(
            &taxonomy,
            "galactic_inquiry",
            None,
            Confidence::Model(0.99),
            MESSAGE_REVIEW_THRESHOLD,
        );
        assert_eq!(r.bucket, DecisionBucket::Wait);
        assert!(r.needs_review);
    }

    #[test]
    fn test_nan_confidence_is_flagged() {
        let taxonomy = load_default().unwrap();
        let r = resolve(
            &taxonomy,
            "customer_inquiry",
            None,
            Confidence::Model(f64::NAN),
            MESSAGE_REVIEW_THRESHOLD,
        );
        assert!(r.needs_review);
    }
}
