//! Sender rules: lookup, learning from corrections, and manual management.

pub mod learning;
pub mod matcher;

use serde::{Deserialize, Serialize};

use crate::config::DefaultRuleConfig;
use crate::db::TriageDb;
use crate::error::TriageError;
use crate::sender::normalize_pattern;
use crate::taxonomy::Taxonomy;
use crate::types::{AutomationLevel, NewSenderRule, SenderRule};

pub use learning::{
    confirm_review, record_correction, CorrectionOutcome, CorrectionRequest, LearningSettings,
    RuleChange, RuleLearning,
};
pub use matcher::match_rule;

/// A rule entered directly by an operator rather than learned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleRequest {
    pub workspace_id: String,
    /// `user@domain` or `*@domain`.
    pub pattern: String,
    pub classification: String,
    /// Defaults to the taxonomy's value for `classification`.
    #[serde(default)]
    pub requires_reply: Option<bool>,
    #[serde(default)]
    pub automation_level: AutomationLevel,
    #[serde(default)]
    pub tone_preference: Option<String>,
}

fn to_new_rule(taxonomy: &Taxonomy, request: &RuleRequest) -> Result<NewSenderRule, TriageError> {
    let pattern = normalize_pattern(&request.pattern)?;
    let label = request.classification.trim().to_lowercase();
    let entry = taxonomy
        .get(&label)
        .ok_or_else(|| TriageError::UnknownClassification(label.clone()))?;
    Ok(NewSenderRule {
        workspace_id: request.workspace_id.clone(),
        pattern,
        default_classification: label,
        default_requires_reply: request.requires_reply.unwrap_or(entry.requires_reply),
        automation_level: request.automation_level,
        tone_preference: request.tone_preference.clone(),
        created_from_correction_id: None,
    })
}

/// Create or overwrite a rule, including its automation settings.
pub fn create_rule(
    db: &TriageDb,
    taxonomy: &Taxonomy,
    request: &RuleRequest,
) -> Result<(SenderRule, bool), TriageError> {
    let rule = to_new_rule(taxonomy, request)?;
    db.with_transaction::<_, _, TriageError>(|tx| {
        let (stored, created) = tx.upsert_rule(&rule)?;
        tx.set_rule_settings(&stored.id, rule.automation_level, rule.tone_preference.as_deref())?;
        let stored = tx
            .get_rule(&stored.id)?
            .ok_or_else(|| TriageError::NotFound(format!("rule {}", stored.id)))?;
        log::info!(
            "{} rule {} -> {}",
            if created { "Created" } else { "Updated" },
            stored.pattern,
            stored.default_classification
        );
        Ok((stored, created))
    })
}

/// Seed onboarding rules for a workspace.
///
/// Patterns that already have a rule (active or not) are left alone so a
/// deactivated default stays deactivated. Returns the rules inserted.
pub fn seed_default_rules(
    db: &TriageDb,
    taxonomy: &Taxonomy,
    workspace_id: &str,
    defaults: &[DefaultRuleConfig],
) -> Result<Vec<SenderRule>, TriageError> {
    let mut requests = Vec::with_capacity(defaults.len());
    for d in defaults {
        requests.push(to_new_rule(
            taxonomy,
            &RuleRequest {
                workspace_id: workspace_id.to_string(),
                pattern: d.pattern.clone(),
                classification: d.classification.clone(),
                requires_reply: d.requires_reply,
                automation_level: d.automation_level,
                tone_preference: d.tone_preference.clone(),
            },
        )?);
    }

    db.with_transaction(|tx| {
        let mut inserted = Vec::new();
        for rule in &requests {
            if tx.get_rule_by_pattern(workspace_id, &rule.pattern)?.is_some() {
                continue;
            }
            inserted.push(tx.insert_rule(rule)?);
        }
        log::info!(
            "Seeded {} of {} default rules for workspace {}",
            inserted.len(),
            requests.len(),
            workspace_id
        );
        Ok::<_, TriageError>(inserted)
    })
}

pub fn list_rules(
    db: &TriageDb,
    workspace_id: &str,
    include_inactive: bool,
) -> Result<Vec<SenderRule>, TriageError> {
    Ok(db.list_rules(workspace_id, include_inactive)?)
}

/// Stop applying a rule. The row is kept for audit and can be reactivated
/// by a later correction.
pub fn deactivate_rule(db: &TriageDb, rule_id: &str) -> Result<SenderRule, TriageError> {
    let rule = db
        .get_rule(rule_id)?
        .ok_or_else(|| TriageError::NotFound(format!("rule {}", rule_id)))?;
    if db.deactivate_rule(rule_id)? {
        log::info!("Deactivated rule {} ({})", rule.pattern, rule.id);
    }
    db.get_rule(rule_id)?
        .ok_or_else(|| TriageError::NotFound(format!("rule {}", rule_id)))
}
