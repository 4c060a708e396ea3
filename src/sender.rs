//! Sender identity normalization and rule pattern construction.
//!
//! Patterns are either a full lower-cased address (`ap@vendorx.com`) or a
//! domain wildcard (`*@vendorx.com`). Nothing else is a valid pattern.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::TriageError;
use crate::types::RuleScope;

/// Personal mail domains (not tied to any organization).
pub const PERSONAL_EMAIL_DOMAINS: &[&str] = &[
    "gmail.com",
    "googlemail.com",
    "outlook.com",
    "hotmail.com",
    "yahoo.com",
    "icloud.com",
    "me.com",
    "live.com",
    "aol.com",
    "proton.me",
    "protonmail.com",
];

// Compile-once regex patterns via OnceLock.
fn re_local_part() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z0-9!#$%&'*+/=?^_`{|}~.-]+$").unwrap())
}

fn re_domain() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9](?:[a-z0-9-]*[a-z0-9])?(?:\.[a-z0-9](?:[a-z0-9-]*[a-z0-9])?)+$")
            .unwrap()
    })
}

/// A normalized sender address split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderIdentity {
    pub address: String,
    pub domain: String,
}

impl SenderIdentity {
    /// Rule pattern for this sender at the given specificity.
    pub fn pattern(&self, scope: RuleScope) -> String {
        match scope {
            RuleScope::Email => self.address.clone(),
            RuleScope::Domain => domain_pattern(&self.domain),
        }
    }

    pub fn domain_pattern(&self) -> String {
        domain_pattern(&self.domain)
    }
}

/// Extract bare email from a "From" header like "Name <email@example.com>".
pub fn extract_email_address(from_field: &str) -> String {
    if let Some(start) = from_field.find('<') {
        if let Some(end) = from_field.find('>') {
            if end > start {
                return from_field[start + 1..end].trim().to_lowercase();
            }
        }
    }
    from_field.trim().to_lowercase()
}

/// Domain wildcard pattern, e.g. `*@vendorx.com`.
pub fn domain_pattern(domain: &str) -> String {
    format!("*@{}", domain.trim().to_lowercase())
}

/// Parse and validate a raw sender into a normalized identity.
pub fn parse_sender(raw: &str) -> Result<SenderIdentity, TriageError> {
    let address = extract_email_address(raw);
    let (local, domain) = address
        .split_once('@')
        .ok_or_else(|| TriageError::InvalidPattern(format!("'{}' has no @", raw.trim())))?;

    if local.is_empty() || !re_local_part().is_match(local) {
        return Err(TriageError::InvalidPattern(format!(
            "'{}' has a malformed local part",
            raw.trim()
        )));
    }
    if !re_domain().is_match(domain) {
        return Err(TriageError::InvalidPattern(format!(
            "'{}' has a malformed domain",
            raw.trim()
        )));
    }

    Ok(SenderIdentity {
        domain: domain.to_string(),
        address,
    })
}

/// Normalize a user-supplied rule pattern. Accepts an address or `*@domain`.
pub fn normalize_pattern(raw: &str) -> Result<String, TriageError> {
    let trimmed = raw.trim().to_lowercase();
    if let Some(domain) = trimmed.strip_prefix("*@") {
        if !re_domain().is_match(domain) {
            return Err(TriageError::InvalidPattern(format!(
                "'{}' is not a valid domain wildcard",
                raw.trim()
            )));
        }
        return Ok(domain_pattern(domain));
    }
    if trimmed.contains('*') {
        return Err(TriageError::InvalidPattern(format!(
            "'{}' uses an unsupported wildcard",
            raw.trim()
        )));
    }
    parse_sender(&trimmed).map(|identity| identity.address)
}

pub fn is_personal_domain(domain: &str, protected: &[String]) -> bool {
    let domain = domain.to_lowercase();
    PERSONAL_EMAIL_DOMAINS.contains(&domain.as_str()) || protected.iter().any(|d| *d == domain)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sender_normalizes_case_and_display_name() {
        let identity = parse_sender("Accounts Payable <AP@VendorX.com>").unwrap();
        assert_eq!(identity.address, "ap@vendorx.com");
        assert_eq!(identity.domain, "vendorx.com");
        assert_eq!(identity.domain_pattern(), "*@vendorx.com");
        assert_eq!(identity.pattern(RuleScope::Email), "ap@vendorx.com");
    }

    #[test]
    fn test_parse_sender_rejects_phone_numbers() {
        let err = parse_sender("+15551234567").unwrap_err();
        assert!(matches!(err, TriageError::InvalidPattern(_)));
    }

    #[test]
    fn test_parse_sender_rejects_bare_tld() {
        assert!(parse_sender("someone@localhost").is_err());
        assert!(parse_sender("@vendorx.com").is_err());
        assert!(parse_sender("a b@vendorx.com").is_err());
    }

    #[test]
    fn test_normalize_pattern_accepts_both_scopes() {
        assert_eq!(normalize_pattern("*@VendorX.com").unwrap(), "*@vendorx.com");
        assert_eq!(normalize_pattern(" Bob@Shop.io ").unwrap(), "bob@shop.io");
    }

    #[test]
    fn test_normalize_pattern_rejects_partial_wildcards() {
        assert!(normalize_pattern("bob*@shop.io").is_err());
        assert!(normalize_pattern("*@").is_err());
        assert!(normalize_pattern("*.shop.io").is_err());
    }

    #[test]
    fn test_personal_domains_include_configured_extras() {
        assert!(is_personal_domain("Gmail.com", &[]));
        assert!(!is_personal_domain("vendorx.com", &[]));
        assert!(is_personal_domain("family.net", &["family.net".to_string()]));
    }
}
