//! Text-generation capability and its backends.
//!
//! The pipeline calls [`Generator::generate`] exactly once per answer.
//! Backends make a single request (no retries, no streaming) bounded by the
//! configured timeout, and report every failure as
//! [`RagError::GenerationFailure`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::GenerationConfig;
use crate::embedding::post_json_with_retry;
use crate::error::{RagError, RagResult};

/// Prompt → text black box.
#[async_trait]
pub trait Generator: Send + Sync {
    fn model_name(&self) -> &str;

    async fn generate(&self, prompt: &str) -> RagResult<String>;
}

/// Used when `generation.provider = "disabled"`. Every call fails.
pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _prompt: &str) -> RagResult<String> {
        Err(RagError::GenerationFailure(
            "Generation provider is disabled".to_string(),
        ))
    }
}

/// Completions from Ollama's `POST /api/generate` with `stream: false`.
pub struct OllamaGenerator {
    client: reqwest::Client,
    model: String,
    url: String,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        Ok(Self {
            client,
            model: config.model.clone(),
            url: url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> RagResult<String> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
        });
        let endpoint = format!("{}/api/generate", self.url);

        let json = post_json_with_retry(&self.client, &endpoint, None, &body, 0)
            .await
            .map_err(|e| {
                tracing::error!(endpoint = %endpoint, error = %e, "completion request failed");
                RagError::GenerationFailure(e)
            })?;

        parse_ollama_completion(&json).map_err(RagError::GenerationFailure)
    }
}

fn parse_ollama_completion(json: &Value) -> Result<String, String> {
    json.get("response")
        .and_then(|r| r.as_str())
        .map(str::to_string)
        .ok_or_else(|| "Missing 'response' in Ollama server response".to_string())
}

/// Completions from the OpenAI chat completions API. Requires `OPENAI_API_KEY`.
pub struct OpenAIGenerator {
    client: reqwest::Client,
    model: String,
    url: String,
    api_key: String,
}

impl OpenAIGenerator {
    pub fn new(config: &GenerationConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com".to_string());

        Ok(Self {
            client,
            model: config.model.clone(),
            url: url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl Generator for OpenAIGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> RagResult<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
        });
        let endpoint = format!("{}/v1/chat/completions", self.url);

        let json = post_json_with_retry(&self.client, &endpoint, Some(&self.api_key), &body, 0)
            .await
            .map_err(|e| {
                tracing::error!(endpoint = %endpoint, error = %e, "completion request failed");
                RagError::GenerationFailure(e)
            })?;

        parse_openai_completion(&json).map_err(RagError::GenerationFailure)
    }
}

fn parse_openai_completion(json: &Value) -> Result<String, String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| "Invalid OpenAI response: missing choices[0].message.content".to_string())
}

/// Create the [`Generator`] named by `generation.provider`.
pub fn create_generator(config: &GenerationConfig) -> anyhow::Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config)?)),
        "openai" => Ok(Arc::new(OpenAIGenerator::new(config)?)),
        other => anyhow::bail!("Unknown generation provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ollama_completion_parsing() {
        let ok = serde_json::json!({ "model": "m", "response": "Blue.", "done": true });
        assert_eq!(parse_ollama_completion(&ok).unwrap(), "Blue.");

        let missing = serde_json::json!({ "error": "model not found" });
        assert!(parse_ollama_completion(&missing).is_err());
    }

    #[test]
    fn openai_completion_parsing() {
        let ok = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "Blue." } }]
        });
        assert_eq!(parse_openai_completion(&ok).unwrap(), "Blue.");
        assert!(parse_openai_completion(&serde_json::json!({ "choices": [] })).is_err());
    }

    #[tokio::test]
    async fn unreachable_ollama_is_a_generation_failure() {
        let config = GenerationConfig {
            url: Some("http://127.0.0.1:9".to_string()),
            timeout_secs: 1,
            ..GenerationConfig::default()
        };
        let generator = OllamaGenerator::new(&config).unwrap();
        let err = generator.generate("hi").await.unwrap_err();
        assert!(matches!(err, RagError::GenerationFailure(_)));
    }

    #[tokio::test]
    async fn disabled_generator_fails() {
        assert!(DisabledGenerator.generate("hi").await.is_err());
    }
}
