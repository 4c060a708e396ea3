//! Engine configuration stored in `~/.triage/config.json`.
//!
//! Every field has a default so an empty `{}` file is a valid config.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bucket::{MESSAGE_REVIEW_THRESHOLD, TRIAGE_AGENT_REVIEW_THRESHOLD};
use crate::error::TriageError;
use crate::types::AutomationLevel;

/// Corrections for one sender domain before a domain rule is learned.
pub const DEFAULT_AUTO_RULE_THRESHOLD: i64 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Database file. Defaults to `~/.triage/triage.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,
    #[serde(default = "default_message_threshold")]
    pub message_review_threshold: f64,
    #[serde(default = "default_agent_threshold")]
    pub triage_agent_review_threshold: f64,
    #[serde(default = "default_auto_rule_threshold")]
    pub auto_rule_threshold: i64,
    /// Items reclassified concurrently within one batch page.
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,
    #[serde(default = "default_classifier_timeout")]
    pub classifier_timeout_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classifier_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classifier_api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taxonomy_path: Option<PathBuf>,
    /// Extra domains never learned as implicit domain rules.
    #[serde(default)]
    pub protected_domains: Vec<String>,
    /// Onboarding rules seeded per workspace.
    #[serde(default)]
    pub default_rules: Vec<DefaultRuleConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefaultRuleConfig {
    pub pattern: String,
    pub classification: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_reply: Option<bool>,
    #[serde(default)]
    pub automation_level: AutomationLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tone_preference: Option<String>,
}

fn default_message_threshold() -> f64 {
    MESSAGE_REVIEW_THRESHOLD
}

fn default_agent_threshold() -> f64 {
    TRIAGE_AGENT_REVIEW_THRESHOLD
}

fn default_auto_rule_threshold() -> i64 {
    DEFAULT_AUTO_RULE_THRESHOLD
}

fn default_batch_concurrency() -> usize {
    4
}

fn default_page_size() -> usize {
    50
}

fn default_classifier_timeout() -> u64 {
    30
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            message_review_threshold: default_message_threshold(),
            triage_agent_review_threshold: default_agent_threshold(),
            auto_rule_threshold: default_auto_rule_threshold(),
            batch_concurrency: default_batch_concurrency(),
            default_page_size: default_page_size(),
            classifier_timeout_secs: default_classifier_timeout(),
            classifier_endpoint: None,
            classifier_api_key: None,
            taxonomy_path: None,
            protected_domains: Vec::new(),
            default_rules: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn classifier_timeout(&self) -> Duration {
        Duration::from_secs(self.classifier_timeout_secs)
    }

    /// Validate ranges and parse the classifier endpoint.
    pub fn validate(&self) -> Result<(), TriageError> {
        for (name, value) in [
            ("messageReviewThreshold", self.message_review_threshold),
            ("triageAgentReviewThreshold", self.triage_agent_review_threshold),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(TriageError::Config(format!(
                    "{} must be in (0, 1], got {}",
                    name, value
                )));
            }
        }
        if self.auto_rule_threshold < 1 {
            return Err(TriageError::Config(
                "autoRuleThreshold must be at least 1".into(),
            ));
        }
        if self.batch_concurrency == 0 || self.default_page_size == 0 {
            return Err(TriageError::Config(
                "batchConcurrency and defaultPageSize must be positive".into(),
            ));
        }
        if self.classifier_timeout_secs == 0 {
            return Err(TriageError::Config(
                "classifierTimeoutSecs must be positive".into(),
            ));
        }
        if let Some(ref endpoint) = self.classifier_endpoint {
            url::Url::parse(endpoint).map_err(|e| {
                TriageError::Config(format!("Invalid classifierEndpoint '{}': {}", endpoint, e))
            })?;
        }
        Ok(())
    }
}

/// Get the canonical config file path (~/.triage/config.json)
pub fn config_path() -> Result<PathBuf, TriageError> {
    let home = dirs::home_dir()
        .ok_or_else(|| TriageError::Config("Could not find home directory".into()))?;
    Ok(home.join(".triage").join("config.json"))
}

/// Load configuration from an explicit path, or the default location.
///
/// A missing default file yields the default config; a missing explicit
/// path is an error.
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig, TriageError> {
    let (path, explicit) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => (config_path()?, false),
    };

    if !path.exists() {
        if explicit {
            return Err(TriageError::Config(format!(
                "Config file not found at {}",
                path.display()
            )));
        }
        log::debug!("No config at {}, using defaults", path.display());
        return Ok(EngineConfig::default());
    }

    let content = fs::read_to_string(&path)
        .map_err(|e| TriageError::Config(format!("Failed to read config: {}", e)))?;
    let config: EngineConfig = serde_json::from_str(&content)
        .map_err(|e| TriageError::Config(format!("Failed to parse config: {}", e)))?;
    config.validate()?;
    Ok(config)
}
