//! Error types for the triage engine
//!
//! Errors are classified by recoverability:
//! - Retryable: classifier outages, optimistic-concurrency conflicts
//! - Skippable: malformed sender identities, unknown labels
//! - Fatal to the call: storage failures, bad configuration

use thiserror::Error;

use crate::db::DbError;

/// Error types for reclassification, correction ingestion and batch runs
#[derive(Debug, Error)]
pub enum TriageError {
    // Retryable errors
    #[error("Classifier unavailable: {0}")]
    ClassifierUnavailable(String),

    #[error("Concurrent update on conversation {0}; retry later")]
    PersistenceConflict(String),

    #[error("Sender rule already exists for pattern {pattern} in workspace {workspace_id}")]
    RuleUniquenessViolation {
        workspace_id: String,
        pattern: String,
    },

    // Skippable errors
    #[error("Invalid sender pattern: {0}")]
    InvalidPattern(String),

    #[error("Classification label not in taxonomy: {0}")]
    UnknownClassification(String),

    // Fatal to the call
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Db(#[from] DbError),
}

impl TriageError {
    /// Returns true if the same call may succeed later without any input change
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TriageError::ClassifierUnavailable(_)
                | TriageError::PersistenceConflict(_)
                | TriageError::RuleUniquenessViolation { .. }
        )
    }

    /// Returns true if a batch should record the item as skipped rather than failed
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            TriageError::ClassifierUnavailable(_)
                | TriageError::InvalidPattern(_)
                | TriageError::UnknownClassification(_)
        )
    }

    fn error_type(&self) -> ErrorType {
        if self.is_retryable() {
            ErrorType::Retryable
        } else if self.is_skippable() {
            ErrorType::Skipped
        } else {
            ErrorType::NonRetryable
        }
    }
}

impl From<rusqlite::Error> for TriageError {
    fn from(err: rusqlite::Error) -> Self {
        TriageError::Db(DbError::Sqlite(err))
    }
}

/// Serializable error representation attached to per-item batch results
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemError {
    pub message: String,
    pub error_type: ErrorType,
    pub can_retry: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorType {
    Retryable,
    Skipped,
    NonRetryable,
}

impl From<&TriageError> for ItemError {
    fn from(err: &TriageError) -> Self {
        ItemError {
            message: err.to_string(),
            error_type: err.error_type(),
            can_retry: err.is_retryable(),
        }
    }
}
