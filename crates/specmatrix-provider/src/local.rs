//! Self-hosted model over the `/api/generate` REST API

use crate::assessment::{assessment_schema, parse_assessment, unparseable_reason, GeneratedAssessment};
use crate::config::{LocalSettings, ProviderKind};
use crate::error::ProviderError;
use crate::prompt::render_prompt;
use crate::{AssessmentProvider, AssessmentRequest, ProviderDescriptor};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

/// Self-hosted, lower-cost implementation
#[derive(Debug, Clone)]
pub struct LocalProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    num_ctx: u32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    total_duration: u64,
    #[serde(default)]
    prompt_eval_count: u64,
    #[serde(default)]
    eval_count: u64,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<Value>,
}

impl LocalProvider {
    /// Build from settings
    ///
    /// # Errors
    /// `Http` if the client cannot be built.
    pub fn new(settings: &LocalSettings, timeout: Duration) -> Result<Self, ProviderError> {
        if settings.model.trim().is_empty() {
            return Err(ProviderError::Config("local provider requires a model".into()));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            num_ctx: settings.num_ctx,
            num_predict: settings.num_predict,
        })
    }

    /// Request body for a prompt
    #[must_use]
    pub fn request_body(&self, prompt: &str) -> Value {
        json!({
            "model": self.model,
            "prompt": prompt,
            "format": assessment_schema(),
            "stream": false,
            "options": {
                "temperature": 0.0,
                "top_p": 0.9,
                "num_predict": self.num_predict,
                "num_ctx": self.num_ctx
            }
        })
    }
}

#[async_trait]
impl AssessmentProvider for LocalProvider {
    fn descriptor(&self) -> ProviderDescriptor {
        ProviderDescriptor {
            kind: ProviderKind::Local,
            model: self.model.clone(),
        }
    }

    async fn assess(&self, request: &AssessmentRequest) -> Result<GeneratedAssessment, ProviderError> {
        let prompt = render_prompt(request);
        tracing::debug!(
            model = %self.model,
            prompt_chars = prompt.len(),
            documents = request.bundle.len(),
            "local assessment request"
        );

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&self.request_body(&prompt))
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

        let generated: GenerateResponse = response.json().await?;
        tracing::debug!(
            model = %self.model,
            duration_ms = generated.total_duration / 1_000_000,
            prompt_tokens = generated.prompt_eval_count,
            output_tokens = generated.eval_count,
            "local assessment response"
        );

        Ok(match parse_assessment(&generated.response) {
            Ok(assessment) => GeneratedAssessment::ok(assessment, &self.model),
            Err(problem) => {
                tracing::warn!(model = %self.model, %problem, "local output unusable");
                GeneratedAssessment::degraded(
                    unparseable_reason(&problem, &generated.response),
                    &self.model,
                )
            }
        })
    }

    async fn health(&self) -> bool {
        let result = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => resp
                .json::<TagsResponse>()
                .await
                .is_ok_and(|tags| !tags.models.is_empty()),
            Ok(_) => false,
            Err(err) => {
                tracing::warn!(error = %err, "local provider health check failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_pins_sampling_and_schema() {
        let provider = LocalProvider::new(&LocalSettings::default(), Duration::from_secs(1)).unwrap();
        let body = provider.request_body("prompt");
        assert_eq!(body["stream"], json!(false));
        assert_eq!(body["options"]["temperature"], json!(0.0));
        assert_eq!(body["options"]["num_ctx"], json!(32_768));
        assert!(body["format"].is_object());
    }
}
