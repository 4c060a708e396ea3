//! Shared type definitions for the database layer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{ClassificationSource, ConversationStatus, DecisionBucket, ReviewOutcome};

/// Errors specific to database operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Schema migration failed: {0}")]
    Migration(String),
}

impl DbError {
    /// True when the statement tripped a UNIQUE constraint.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            DbError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => {
                err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
            }
            _ => false,
        }
    }
}

/// Pipeline write to a conversation's triage fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriageUpdate {
    pub classification: String,
    pub requires_reply: bool,
    pub bucket: DecisionBucket,
    pub confidence: Option<f64>,
    pub source: ClassificationSource,
    pub needs_review: bool,
    pub sentiment: Option<String>,
    pub draft_reply: Option<String>,
}

/// Human review write to a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewUpdate {
    pub classification: String,
    pub requires_reply: bool,
    pub bucket: DecisionBucket,
    pub status: ConversationStatus,
    pub resolved_at: Option<String>,
    pub reviewed_by: String,
    pub reviewed_at: String,
    pub outcome: ReviewOutcome,
}

/// Values for a new `triage_corrections` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCorrection {
    pub workspace_id: String,
    pub conversation_id: String,
    pub original_classification: Option<String>,
    pub new_classification: String,
    pub original_requires_reply: bool,
    pub new_requires_reply: bool,
    pub sender_email: String,
    pub sender_domain: Option<String>,
    pub corrected_by: String,
}
