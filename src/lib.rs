//! Reclassification and rule-learning engine for inbound message triage.
//!
//! A conversation's sender is matched against learned sender rules; when no
//! rule applies, an external classifier labels it. The label resolves to a
//! decision bucket. Human corrections are recorded as an append-only audit
//! trail and feed back into the rule table.

pub mod batch;
pub mod bucket;
pub mod classifier;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
mod migrations;
pub mod pipeline;
pub mod rules;
pub mod sender;
pub mod taxonomy;
pub mod types;

pub use batch::{BatchOptions, BatchReport, CancelFlag, RunSummary};
pub use bucket::ReviewPath;
pub use engine::TriageEngine;
pub use error::TriageError;
pub use pipeline::{ReclassifyOptions, ReclassifyOutcome};
