//! Engine handle: the shared database, classifier, taxonomy and config.
//!
//! Cheap to clone; batch workers each hold a clone. Synchronous methods
//! take the database lock for the duration of the call only.

use std::sync::Arc;
use std::time::Duration;

use crate::batch::{self, BatchOptions, BatchReport, CancelFlag, RunSummary};
use crate::bucket::ReviewPath;
use crate::classifier::{Classifier, HttpClassifier, UnavailableClassifier};
use crate::config::EngineConfig;
use crate::db::{SharedDb, TriageDb};
use crate::error::TriageError;
use crate::pipeline::{self, ReclassifyOptions, ReclassifyOutcome};
use crate::rules::{self, CorrectionOutcome, CorrectionRequest, LearningSettings, RuleRequest};
use crate::taxonomy::{loader, Taxonomy};
use crate::types::{Conversation, NewConversation, SenderRule};

#[derive(Clone)]
pub struct TriageEngine {
    db: SharedDb,
    classifier: Arc<dyn Classifier>,
    taxonomy: Arc<Taxonomy>,
    config: Arc<EngineConfig>,
    classifier_timeout: Duration,
}

impl TriageEngine {
    pub fn new(
        db: SharedDb,
        classifier: Arc<dyn Classifier>,
        taxonomy: Taxonomy,
        config: EngineConfig,
    ) -> Self {
        let classifier_timeout = config.classifier_timeout();
        Self {
            db,
            classifier,
            taxonomy: Arc::new(taxonomy),
            config: Arc::new(config),
            classifier_timeout,
        }
    }

    /// Open the configured database, load the taxonomy and pick a classifier.
    pub fn from_config(config: EngineConfig) -> Result<Self, TriageError> {
        config.validate()?;
        let taxonomy = loader::load(config.taxonomy_path.as_deref())?;
        let db = TriageDb::open_configured(config.db_path.as_deref())?.into_shared();

        let classifier: Arc<dyn Classifier> = match config.classifier_endpoint {
            Some(ref endpoint) => Arc::new(HttpClassifier::new(
                endpoint,
                config.classifier_api_key.as_deref(),
                config.classifier_timeout(),
            )?),
            None => {
                log::warn!("No classifier endpoint configured; full re-analysis will skip every item");
                Arc::new(UnavailableClassifier)
            }
        };

        log::info!(
            "Triage engine ready: {} taxonomy labels, classifier timeout {}s",
            taxonomy.len(),
            config.classifier_timeout_secs
        );
        Ok(Self::new(db, classifier, taxonomy, config))
    }

    /// Override the per-call classifier deadline.
    pub fn with_classifier_timeout(mut self, timeout: Duration) -> Self {
        self.classifier_timeout = timeout;
        self
    }

    pub fn db(&self) -> &SharedDb {
        &self.db
    }

    pub fn classifier(&self) -> &dyn Classifier {
        self.classifier.as_ref()
    }

    pub fn taxonomy(&self) -> &Taxonomy {
        &self.taxonomy
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn classifier_timeout(&self) -> Duration {
        self.classifier_timeout
    }

    /// Options for a single re-triage on `path` under this engine's config.
    pub fn reclassify_options(&self, path: ReviewPath) -> ReclassifyOptions {
        ReclassifyOptions {
            review_threshold: path.threshold(&self.config),
            ..ReclassifyOptions::default()
        }
    }

    pub async fn reclassify(
        &self,
        conversation_id: &str,
        options: &ReclassifyOptions,
    ) -> Result<ReclassifyOutcome, TriageError> {
        pipeline::reclassify(self, conversation_id, options).await
    }

    pub async fn run_batch(
        &self,
        workspace_id: &str,
        options: &BatchOptions,
    ) -> Result<BatchReport, TriageError> {
        batch::run_batch(self, workspace_id, options).await
    }

    pub async fn run_all(
        &self,
        workspace_id: &str,
        options: &BatchOptions,
        cancel: &CancelFlag,
    ) -> Result<RunSummary, TriageError> {
        batch::run_all(self, workspace_id, options, cancel).await
    }

    pub fn insert_conversation(&self, new: &NewConversation) -> Result<Conversation, TriageError> {
        Ok(self.db.lock().insert_conversation(new)?)
    }

    pub fn record_correction(
        &self,
        request: &CorrectionRequest,
    ) -> Result<CorrectionOutcome, TriageError> {
        let settings = LearningSettings::from(self.config.as_ref());
        let db = self.db.lock();
        rules::record_correction(&db, &self.taxonomy, &settings, request)
    }

    pub fn confirm_review(
        &self,
        conversation_id: &str,
        reviewed_by: &str,
    ) -> Result<Conversation, TriageError> {
        let db = self.db.lock();
        rules::confirm_review(&db, &self.taxonomy, conversation_id, reviewed_by)
    }

    pub fn create_rule(&self, request: &RuleRequest) -> Result<(SenderRule, bool), TriageError> {
        let db = self.db.lock();
        rules::create_rule(&db, &self.taxonomy, request)
    }

    /// Seed the configured onboarding rules into a workspace.
    pub fn seed_default_rules(&self, workspace_id: &str) -> Result<Vec<SenderRule>, TriageError> {
        let db = self.db.lock();
        rules::seed_default_rules(&db, &self.taxonomy, workspace_id, &self.config.default_rules)
    }

    pub fn list_rules(
        &self,
        workspace_id: &str,
        include_inactive: bool,
    ) -> Result<Vec<SenderRule>, TriageError> {
        let db = self.db.lock();
        rules::list_rules(&db, workspace_id, include_inactive)
    }

    pub fn deactivate_rule(&self, rule_id: &str) -> Result<SenderRule, TriageError> {
        let db = self.db.lock();
        rules::deactivate_rule(&db, rule_id)
    }
}
