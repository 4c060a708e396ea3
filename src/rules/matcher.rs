//! Sender rule lookup.
//!
//! Exact-address rules beat domain wildcards. No fuzzy matching: the
//! normalized address and `*@domain` are the only candidates. Lookup never
//! touches `hit_count`; callers count a hit only when they apply the rule.

use crate::db::{DbError, TriageDb};
use crate::error::TriageError;
use crate::sender::{parse_sender, SenderIdentity};
use crate::types::{RuleScope, SenderRule};

/// Find the most specific active rule for a raw sender address.
pub fn match_rule(
    db: &TriageDb,
    workspace_id: &str,
    sender_email: &str,
) -> Result<Option<SenderRule>, TriageError> {
    let identity = parse_sender(sender_email)?;
    Ok(match_identity(db, workspace_id, &identity)?)
}

/// Find the most specific active rule for an already-normalized sender.
pub fn match_identity(
    db: &TriageDb,
    workspace_id: &str,
    identity: &SenderIdentity,
) -> Result<Option<SenderRule>, DbError> {
    let domain_pattern = identity.domain_pattern();
    let candidates =
        db.find_active_rules(workspace_id, &[identity.address.as_str(), domain_pattern.as_str()])?;
    Ok(most_specific(candidates))
}

fn most_specific(candidates: Vec<SenderRule>) -> Option<SenderRule> {
    let mut domain_rule = None;
    for rule in candidates {
        match rule.scope() {
            RuleScope::Email => return Some(rule),
            RuleScope::Domain => domain_rule = Some(rule),
        }
    }
    domain_rule
}
