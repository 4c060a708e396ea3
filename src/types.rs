//! Domain types shared by the pipeline, rule learning and batch layers.
//!
//! Enums carry an `as_str` label for SQL storage and a `parse` for reading
//! rows back; unknown strings read as `None` rather than failing the row.

use serde::{Deserialize, Serialize};

/// Triage outcome driving queue placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionBucket {
    ActNow,
    QuickWin,
    Wait,
    AutoHandled,
}

impl DecisionBucket {
    /// String label for SQL storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionBucket::ActNow => "act_now",
            DecisionBucket::QuickWin => "quick_win",
            DecisionBucket::Wait => "wait",
            DecisionBucket::AutoHandled => "auto_handled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "act_now" => Some(DecisionBucket::ActNow),
            "quick_win" => Some(DecisionBucket::QuickWin),
            "wait" => Some(DecisionBucket::Wait),
            "auto_handled" => Some(DecisionBucket::AutoHandled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewOutcome {
    Confirmed,
    Changed,
}

impl ReviewOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewOutcome::Confirmed => "confirmed",
            ReviewOutcome::Changed => "changed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "confirmed" => Some(ReviewOutcome::Confirmed),
            "changed" => Some(ReviewOutcome::Changed),
            _ => None,
        }
    }
}

/// How much a sender rule is trusted to act without a human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutomationLevel {
    Auto,
    #[default]
    DraftFirst,
    AlwaysReview,
}

impl AutomationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutomationLevel::Auto => "auto",
            AutomationLevel::DraftFirst => "draft_first",
            AutomationLevel::AlwaysReview => "always_review",
        }
    }

    /// Parse from SQL string. Unknown levels fall back to the default.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "auto" => AutomationLevel::Auto,
            "always_review" => AutomationLevel::AlwaysReview,
            _ => AutomationLevel::DraftFirst,
        }
    }
}

/// Where a conversation's current classification came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationSource {
    Model,
    Rule,
    Human,
}

impl ClassificationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassificationSource::Model => "model",
            ClassificationSource::Rule => "rule",
            ClassificationSource::Human => "human",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "model" => Some(ClassificationSource::Model),
            "rule" => Some(ClassificationSource::Rule),
            "human" => Some(ClassificationSource::Human),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    #[default]
    Open,
    Resolved,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationStatus::Open => "open",
            ConversationStatus::Resolved => "resolved",
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "resolved" => ConversationStatus::Resolved,
            _ => ConversationStatus::Open,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    #[default]
    Email,
    Sms,
    Chat,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Sms => "sms",
            Channel::Chat => "chat",
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "sms" => Channel::Sms,
            "chat" => Channel::Chat,
            _ => Channel::Email,
        }
    }
}

/// Specificity of a sender rule pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleScope {
    /// Exact address, e.g. `ap@vendorx.com`.
    Email,
    /// Domain wildcard, e.g. `*@vendorx.com`.
    Domain,
}

/// Confidence attached to a candidate classification.
///
/// Only `Model` is a probability. Rule-derived and human classifications were
/// vetted by a person and are never compared against a review threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Confidence {
    Model(f64),
    RuleDerived,
    Human,
}

impl Confidence {
    /// Probability to persist, if any.
    pub fn probability(&self) -> Option<f64> {
        match self {
            Confidence::Model(p) => Some(*p),
            Confidence::RuleDerived | Confidence::Human => None,
        }
    }

    pub fn source(&self) -> ClassificationSource {
        match self {
            Confidence::Model(_) => ClassificationSource::Model,
            Confidence::RuleDerived => ClassificationSource::Rule,
            Confidence::Human => ClassificationSource::Human,
        }
    }
}

/// One inbound thread, as stored in `conversations`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub workspace_id: String,
    pub channel: Channel,
    pub sender_email: String,
    pub sender_domain: Option<String>,
    pub subject: Option<String>,
    pub body: String,
    pub classification: Option<String>,
    pub requires_reply: bool,
    pub decision_bucket: Option<DecisionBucket>,
    pub confidence: Option<f64>,
    pub classification_source: Option<ClassificationSource>,
    pub needs_review: bool,
    pub status: ConversationStatus,
    pub resolved_at: Option<String>,
    pub reviewed_at: Option<String>,
    pub reviewed_by: Option<String>,
    pub review_outcome: Option<ReviewOutcome>,
    pub sentiment: Option<String>,
    pub draft_reply: Option<String>,
    /// Optimistic-concurrency token, bumped on every write.
    pub version: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl Conversation {
    /// The triage-relevant slice of this conversation.
    pub fn snapshot(&self) -> TriageSnapshot {
        TriageSnapshot {
            classification: self.classification.clone(),
            requires_reply: self.requires_reply,
            bucket: self.decision_bucket,
            confidence: self.confidence,
            needs_review: self.needs_review,
        }
    }

    pub fn is_human_reviewed(&self) -> bool {
        self.reviewed_at.is_some() && self.review_outcome.is_some()
    }
}

/// Fields supplied at message ingest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewConversation {
    pub id: Option<String>,
    pub workspace_id: String,
    #[serde(default)]
    pub channel: Channel,
    pub sender_email: String,
    pub subject: Option<String>,
    pub body: String,
    /// Ingest timestamp; defaults to now. Batches page by this key.
    pub created_at: Option<String>,
}

/// Classification state compared by the pipeline's diff step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriageSnapshot {
    pub classification: Option<String>,
    pub requires_reply: bool,
    pub bucket: Option<DecisionBucket>,
    pub confidence: Option<f64>,
    pub needs_review: bool,
}

/// A learned or configured sender override, as stored in `sender_rules`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderRule {
    pub id: String,
    pub workspace_id: String,
    pub pattern: String,
    pub default_classification: String,
    pub default_requires_reply: bool,
    pub is_active: bool,
    pub hit_count: i64,
    pub automation_level: AutomationLevel,
    pub tone_preference: Option<String>,
    pub created_from_correction_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl SenderRule {
    pub fn scope(&self) -> RuleScope {
        if self.pattern.starts_with("*@") {
            RuleScope::Domain
        } else {
            RuleScope::Email
        }
    }
}

/// Values written by a rule upsert.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSenderRule {
    pub workspace_id: String,
    pub pattern: String,
    pub default_classification: String,
    pub default_requires_reply: bool,
    #[serde(default)]
    pub automation_level: AutomationLevel,
    pub tone_preference: Option<String>,
    pub created_from_correction_id: Option<String>,
}

/// Immutable audit record of a human override, as stored in `triage_corrections`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriageCorrection {
    pub id: String,
    pub workspace_id: String,
    pub conversation_id: String,
    pub original_classification: Option<String>,
    pub new_classification: String,
    pub original_requires_reply: bool,
    pub new_requires_reply: bool,
    pub sender_email: String,
    pub sender_domain: Option<String>,
    pub corrected_by: String,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_labels_round_trip_through_sql_strings() {
        for bucket in [
            DecisionBucket::ActNow,
            DecisionBucket::QuickWin,
            DecisionBucket::Wait,
            DecisionBucket::AutoHandled,
        ] {
            assert_eq!(DecisionBucket::parse(bucket.as_str()), Some(bucket));
        }
        assert_eq!(DecisionBucket::parse("archived"), None);
    }

    #[test]
    fn test_rule_derived_confidence_has_no_probability() {
        assert_eq!(Confidence::RuleDerived.probability(), None);
        assert_eq!(Confidence::RuleDerived.source(), ClassificationSource::Rule);
        assert_eq!(Confidence::Model(0.42).probability(), Some(0.42));
    }

    #[test]
    fn test_automation_level_unknown_falls_back_to_default() {
        assert_eq!(AutomationLevel::from_str_lossy("yolo"), AutomationLevel::DraftFirst);
        assert_eq!(AutomationLevel::from_str_lossy("auto"), AutomationLevel::Auto);
    }

    #[test]
    fn test_bucket_serializes_snake_case() {
        let json = serde_json::to_string(&DecisionBucket::AutoHandled).unwrap();
        assert_eq!(json, "\"auto_handled\"");
    }
}
