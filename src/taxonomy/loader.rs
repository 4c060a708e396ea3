use std::collections::HashSet;
use std::path::Path;

use super::schema::TaxonomyFile;
use super::Taxonomy;
use crate::error::TriageError;

const DEFAULT_TAXONOMY: &str = include_str!("../../resources/taxonomy.json");

/// Load the taxonomy compiled into the binary.
pub fn load_default() -> Result<Taxonomy, TriageError> {
    parse_taxonomy(DEFAULT_TAXONOMY)
        .map_err(|e| TriageError::Config(format!("Failed to parse embedded taxonomy: {}", e)))
}

/// Load a workspace-specific taxonomy override from a JSON file.
pub fn load_custom(path: &Path) -> Result<Taxonomy, TriageError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        TriageError::Config(format!("Failed to read taxonomy {}: {}", path.display(), e))
    })?;
    let taxonomy = parse_taxonomy(&content).map_err(|e| {
        TriageError::Config(format!("Failed to parse taxonomy {}: {}", path.display(), e))
    })?;
    log::info!(
        "Loaded taxonomy override from {} ({} labels)",
        path.display(),
        taxonomy.len()
    );
    Ok(taxonomy)
}

/// Load the override if one is configured, else the embedded default.
pub fn load(path: Option<&Path>) -> Result<Taxonomy, TriageError> {
    match path {
        Some(p) => load_custom(p),
        None => load_default(),
    }
}

fn parse_taxonomy(json: &str) -> Result<Taxonomy, String> {
    let file: TaxonomyFile = serde_json::from_str(json).map_err(|e| e.to_string())?;
    validate_taxonomy(&file)?;
    Ok(Taxonomy::from_entries(file.labels))
}

/// Validate a taxonomy has labels and no duplicates.
pub fn validate_taxonomy(file: &TaxonomyFile) -> Result<(), String> {
    if file.labels.is_empty() {
        return Err("Taxonomy has no labels".into());
    }
    let mut seen = HashSet::new();
    for entry in &file.labels {
        let label = entry.label.trim();
        if label.is_empty() {
            return Err("Taxonomy label is required".into());
        }
        if label != entry.label || label.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(format!("Taxonomy label must be trimmed lower-case: '{}'", entry.label));
        }
        if !seen.insert(label) {
            return Err(format!("Duplicate taxonomy label: {}", label));
        }
    }
    Ok(())
}
