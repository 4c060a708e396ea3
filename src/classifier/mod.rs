//! External classifier capability.
//!
//! The model behind it is a black box: message text and sender in, a
//! taxonomy label plus confidence out. Calls may fail or time out; callers
//! treat that as a per-item error.

pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::TriageError;
use crate::types::{Channel, Conversation};

pub use http::HttpClassifier;

/// Input handed to the classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifyRequest {
    pub message_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub sender: String,
    pub channel: Channel,
    /// Labels the classifier is allowed to answer with.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allowed_labels: Vec<String>,
}

impl ClassifyRequest {
    pub fn for_conversation(conversation: &Conversation, allowed_labels: Vec<String>) -> Self {
        Self {
            message_text: conversation.body.clone(),
            subject: conversation.subject.clone(),
            sender: conversation.sender_email.clone(),
            channel: conversation.channel,
            allowed_labels,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifierOutput {
    pub classification: String,
    pub confidence: f64,
    #[serde(default)]
    pub sentiment: Option<String>,
    #[serde(default)]
    pub draft_reply: Option<String>,
}

impl ClassifierOutput {
    /// Reject an empty label or a confidence outside `[0, 1]`, and
    /// lower-case the label.
    pub fn validated(self) -> Result<Self, ClassifierError> {
        if self.classification.trim().is_empty() {
            return Err(ClassifierError::InvalidResponse("empty classification".into()));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(ClassifierError::InvalidResponse(format!(
                "confidence {} outside [0, 1]",
                self.confidence
            )));
        }
        Ok(Self {
            classification: self.classification.trim().to_lowercase(),
            ..self
        })
    }
}

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("classifier timed out after {0}s")]
    Timeout(u64),

    #[error("classifier rate limit exceeded")]
    RateLimited,

    #[error("classifier unreachable: {0}")]
    Unavailable(String),

    #[error("classifier returned an invalid response: {0}")]
    InvalidResponse(String),
}

impl From<ClassifierError> for TriageError {
    fn from(err: ClassifierError) -> Self {
        TriageError::ClassifierUnavailable(err.to_string())
    }
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, request: &ClassifyRequest) -> Result<ClassifierOutput, ClassifierError>;
}

/// Stand-in used when no classifier endpoint is configured.
///
/// Every call fails, so full re-analysis degrades to per-item skips while
/// the rule fast path keeps working.
pub struct UnavailableClassifier;

#[async_trait]
impl Classifier for UnavailableClassifier {
    async fn classify(&self, _request: &ClassifyRequest) -> Result<ClassifierOutput, ClassifierError> {
        Err(ClassifierError::Unavailable(
            "no classifier endpoint configured".into(),
        ))
    }
}

#[cfg(test)]
pub mod fake {
    //! Scripted classifier for pipeline and batch tests.

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::*;

    enum Script {
        Answer(ClassifierOutput),
        Fail,
        Hang,
    }

    /// Answers by message text; unknown texts fail.
    #[derive(Default)]
    pub struct ScriptedClassifier {
        scripts: Mutex<HashMap<String, Script>>,
        calls: AtomicUsize,
    }

    impl ScriptedClassifier {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn answer(&self, text: &str, label: &str, confidence: f64) {
            self.scripts.lock().insert(
                text.to_string(),
                Script::Answer(ClassifierOutput {
                    classification: label.to_string(),
                    confidence,
                    sentiment: Some("neutral".into()),
                    draft_reply: None,
                }),
            );
        }

        pub fn fail(&self, text: &str) {
            self.scripts.lock().insert(text.to_string(), Script::Fail);
        }

        /// Never returns; exercises the pipeline's timeout.
        pub fn hang(&self, text: &str) {
            self.scripts.lock().insert(text.to_string(), Script::Hang);
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Classifier for ScriptedClassifier {
        async fn classify(
            &self,
            request: &ClassifyRequest,
        ) -> Result<ClassifierOutput, ClassifierError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let outcome = match self.scripts.lock().get(&request.message_text) {
                Some(Script::Answer(out)) => Ok(out.clone()),
                Some(Script::Hang) => Err(true),
                Some(Script::Fail) | None => Err(false),
            };
            match outcome {
                Ok(out) => Ok(out),
                Err(true) => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(ClassifierError::Timeout(3600))
                }
                Err(false) => Err(ClassifierError::RateLimited),
            }
        }
    }
}
