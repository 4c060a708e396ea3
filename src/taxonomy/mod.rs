//! Classification taxonomy: label → {category, requiresReply, urgent}.
//!
//! Loaded once per process (embedded default or a JSON override) and shared
//! by reference. Nothing in the engine branches on literal label names.

pub mod loader;
pub mod schema;

use std::collections::HashMap;

pub use schema::{Category, TaxonomyEntry};

#[derive(Debug, Clone)]
pub struct Taxonomy {
    entries: Vec<TaxonomyEntry>,
    index: HashMap<String, usize>,
}

impl Taxonomy {
    pub fn from_entries(entries: Vec<TaxonomyEntry>) -> Self {
        let index = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.label.clone(), i))
            .collect();
        Self { entries, index }
    }

    /// Look up a label. Labels are matched case-insensitively.
    pub fn get(&self, label: &str) -> Option<&TaxonomyEntry> {
        let key = label.trim().to_lowercase();
        self.index.get(&key).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, label: &str) -> bool {
        self.get(label).is_some()
    }

    /// Whether the label implies a reply. `None` for labels outside the taxonomy.
    pub fn requires_reply(&self, label: &str) -> Option<bool> {
        self.get(label).map(|e| e.requires_reply)
    }

    pub fn entries(&self) -> &[TaxonomyEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        let taxonomy = loader::load_default().unwrap();
        let entry = taxonomy.get("  Supplier_Invoice ").expect("label found");
        assert_eq!(entry.category, Category::Supplier);
        assert!(!entry.requires_reply);
    }

    #[test]
    fn test_complaint_dispute_is_act_now() {
        let taxonomy = loader::load_default().unwrap();
        let entry = taxonomy.get("complaint_dispute").unwrap();
        assert_eq!(entry.category, Category::Complaint);
        assert!(entry.requires_reply);
        assert!(entry.is_act_now());
    }

    #[test]
    fn test_urgent_flag_ignored_outside_complaint_and_lead() {
        let entry = TaxonomyEntry {
            label: "supplier_question".into(),
            category: Category::Supplier,
            requires_reply: true,
            urgent: true,
            description: String::new(),
        };
        assert!(!entry.is_act_now());
    }

    #[test]
    fn test_unknown_label_has_no_reply_requirement() {
        let taxonomy = loader::load_default().unwrap();
        assert_eq!(taxonomy.requires_reply("made_up_label"), None);
        assert!(!taxonomy.contains("made_up_label"));
    }
}
