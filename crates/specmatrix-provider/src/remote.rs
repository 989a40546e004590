//! Hosted model over the `generateContent` REST API

use crate::assessment::{parse_assessment, unparseable_reason, GeneratedAssessment};
use crate::config::{ProviderKind, RemoteSettings};
use crate::error::ProviderError;
use crate::prompt::render_prompt;
use crate::{AssessmentProvider, AssessmentRequest, ProviderDescriptor};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

/// Hosted, higher-fidelity implementation
#[derive(Debug, Clone)]
pub struct RemoteProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl RemoteProvider {
    /// Build from settings
    ///
    /// # Errors
    /// `Config` without an API key, `Http` if the client cannot be built.
    pub fn new(settings: &RemoteSettings, timeout: Duration) -> Result<Self, ProviderError> {
        let api_key = settings
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ProviderError::Config("remote provider requires an API key".into()))?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            api_key,
        })
    }

    /// Request body for a prompt
    #[must_use]
    pub fn request_body(prompt: &str) -> Value {
        json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "temperature": 0.0,
                "responseMimeType": "application/json"
            }
        })
    }

    /// Generated text from a response envelope
    ///
    /// # Errors
    /// `Envelope` when no candidate text is present.
    pub fn response_text(envelope: &Value) -> Result<String, ProviderError> {
        let parts = envelope
            .pointer("/candidates/0/content/parts")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                let reason = envelope
                    .pointer("/promptFeedback/blockReason")
                    .and_then(Value::as_str)
                    .unwrap_or("no candidates");
                ProviderError::Envelope(reason.to_string())
            })?;
        let text: String = parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect();
        Ok(text)
    }

    fn endpoint(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model)
    }
}

#[async_trait]
impl AssessmentProvider for RemoteProvider {
    fn descriptor(&self) -> ProviderDescriptor {
        ProviderDescriptor {
            kind: ProviderKind::Remote,
            model: self.model.clone(),
        }
    }

    async fn assess(&self, request: &AssessmentRequest) -> Result<GeneratedAssessment, ProviderError> {
        let prompt = render_prompt(request);
        tracing::debug!(model = %self.model, prompt_chars = prompt.len(), "remote assessment request");

        let response = self
            .client
            .post(self.endpoint())
            .query(&[("key", self.api_key.as_str())])
            .json(&Self::request_body(&prompt))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body: String = response.text().await.unwrap_or_default().chars().take(500).collect();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: Value = response.json().await?;
        let text = match Self::response_text(&envelope) {
            Ok(text) => text,
            Err(err) => return Ok(GeneratedAssessment::degraded(err.to_string(), &self.model)),
        };

        Ok(match parse_assessment(&text) {
            Ok(assessment) => GeneratedAssessment::ok(assessment, &self.model),
            Err(problem) => {
                tracing::warn!(model = %self.model, %problem, "remote output unusable");
                GeneratedAssessment::degraded(unparseable_reason(&problem, &text), &self.model)
            }
        })
    }

    async fn health(&self) -> bool {
        let url = format!("{}/v1beta/models/{}", self.base_url, self.model);
        match self
            .client
            .get(url)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(err) => {
                tracing::warn!(error = %err, "remote provider health check failed");
                false
            }
        }
    }
}
