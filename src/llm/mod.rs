//! Stage-2 structured extraction, pluggable behind [`StructuredExtractor`].
//!
//! [`HttpStructuredExtractor`] is the only production implementation: a JSON
//! completion call against a remote LLM endpoint, timeout-bounded per call.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::error::PipelineError;
use crate::models::StructuredRecord;

/// `Parse(text) -> StructuredRecord | error` (`spec.md` §6). The timeout is
/// applied by the caller (the Stage-2 worker loop), not the implementation,
/// so it composes with whatever `llm_timeout` the run was started with.
#[async_trait]
pub trait StructuredExtractor: Send + Sync {
    async fn parse(&self, text: &str) -> Result<StructuredRecord, PipelineError>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    pub endpoint: String,
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f32 {
    0.0
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434".to_string(),
            model: "llama3".to_string(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            api_key: None,
        }
    }
}

const EXTRACTION_PROMPT: &str = include_str!("prompt.txt");

pub struct HttpStructuredExtractor {
    client: reqwest::Client,
    config: LlmConfig,
}

impl HttpStructuredExtractor {
    pub fn new(config: LlmConfig, call_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(call_timeout)
            .build()
            .expect("reqwest client builds with a plain timeout");
        Self { client, config }
    }

    async fn call_llm(&self, text: &str) -> Result<String, PipelineError> {
        let prompt = format!("{EXTRACTION_PROMPT}\n\n---\n{text}");

        let mut request = self
            .client
            .post(format!("{}/api/generate", self.config.endpoint))
            .json(&json!({
                "model": self.config.model,
                "prompt": prompt,
                "stream": false,
                "options": {
                    "temperature": self.config.temperature,
                    "num_predict": self.config.max_tokens,
                }
            }));

        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                PipelineError::LlmTimeout
            } else {
                PipelineError::LlmParse(format!("request failed: {e}"))
            }
        })?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(PipelineError::LlmRateLimited);
        }

        if !response.status().is_success() {
            return Err(PipelineError::LlmParse(format!(
                "LLM endpoint returned {}",
                response.status()
            )));
        }

        #[derive(Deserialize)]
        struct GenerateResponse {
            response: String,
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::LlmParse(format!("malformed envelope: {e}")))?;

        Ok(body.response)
    }
}

#[async_trait]
impl StructuredExtractor for HttpStructuredExtractor {
    async fn parse(&self, text: &str) -> Result<StructuredRecord, PipelineError> {
        let raw = self.call_llm(text).await?;
        let json_slice = extract_json_object(&raw).ok_or_else(|| {
            PipelineError::LlmParse("response did not contain a JSON object".to_string())
        })?;

        let record: StructuredRecord = serde_json::from_str(json_slice).map_err(|e| {
            warn!(error = %e, "llm response failed schema validation");
            PipelineError::LlmInvalidShape(e.to_string())
        })?;

        Ok(record)
    }
}

/// Models occasionally wrap the JSON object in prose or a code fence; take
/// the outermost `{...}` span rather than requiring an exact-match response.
fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&raw[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_points_at_local_ollama() {
        let config = LlmConfig::default();
        assert_eq!(config.endpoint, "http://localhost:11434");
        assert_eq!(config.max_tokens, 4096);
    }

    #[test]
    fn extract_json_object_strips_surrounding_prose() {
        let raw = "Here is the record:\n```json\n{\"transaction_date\":\"2024-01-01\"}\n```\nDone.";
        let extracted = extract_json_object(raw).unwrap();
        assert_eq!(extracted, "{\"transaction_date\":\"2024-01-01\"}");
    }

    #[test]
    fn extract_json_object_returns_none_without_braces() {
        assert!(extract_json_object("no json here").is_none());
    }
}
