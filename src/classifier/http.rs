//! JSON-over-HTTP client for a hosted classifier.
//!
//! POSTs a [`ClassifyRequest`] to the configured endpoint and expects a
//! [`ClassifierOutput`] back. Bearer auth when an API key is configured.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use super::{Classifier, ClassifierError, ClassifierOutput, ClassifyRequest};

pub struct HttpClassifier {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpClassifier {
    pub fn new(endpoint: &str, api_key: Option<&str>, timeout: Duration) -> Result<Self, ClassifierError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClassifierError::Unavailable(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            api_key: api_key.map(str::to_string),
            timeout,
        })
    }
}

/// Map a non-success status to the error the pipeline should see.
fn status_error(status: StatusCode, body: &str) -> ClassifierError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        ClassifierError::RateLimited
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        ClassifierError::Unavailable(format!("HTTP {}: {}", status, body))
    } else {
        ClassifierError::InvalidResponse(format!("HTTP {}: {}", status, body))
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(&self, request: &ClassifyRequest) -> Result<ClassifierOutput, ClassifierError> {
        let mut req = self.client.post(&self.endpoint).json(request);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                ClassifierError::Timeout(self.timeout.as_secs())
            } else {
                ClassifierError::Unavailable(format!("Classifier request failed: {}", e))
            }
        })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            log::warn!("Classifier returned {}: {}", status, text);
            return Err(status_error(status, &text));
        }

        let output: ClassifierOutput = resp.json().await.map_err(|e| {
            ClassifierError::InvalidResponse(format!("Failed to parse classifier response: {}", e))
        })?;
        output.validated()
    }
}
