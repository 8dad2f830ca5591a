//! Completion client.
//!
//! [`CompletionProvider`] turns a prompt into generated text. Implementations:
//! - **[`DisabledCompletion`]**: always errors.
//! - **[`OllamaCompletion`]**: `POST /api/generate` with streaming off.
//! - **[`OpenAICompletion`]**: `POST /v1/chat/completions`.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::CompletionConfig;
use crate::retry::post_json;

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const DEFAULT_OPENAI_URL: &str = "https://api.openai.com";

/// Returned by the OpenAI provider when the model produced no text.
pub const EMPTY_COMPLETION_FALLBACK: &str = "Sorry, I could not generate a response.";

const SYSTEM_PROMPT: &str = "You are a helpful assistant. Use the context included in the \
user's message to answer their question. If the context does not contain the answer, say so \
instead of making one up.";

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn model_name(&self) -> &str;
    async fn complete(&self, prompt: &str) -> Result<String>;
}

pub struct DisabledCompletion;

#[async_trait]
impl CompletionProvider for DisabledCompletion {
    fn model_name(&self) -> &str {
        "disabled"
    }
    async fn complete(&self, _prompt: &str) -> Result<String> {
        bail!("Completion provider is disabled")
    }
}

// ============ Ollama ============

pub struct OllamaCompletion {
    client: reqwest::Client,
    model: String,
    url: String,
    max_tokens: u32,
    temperature: f32,
    max_retries: u32,
}

impl OllamaCompletion {
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            model: config.model.clone(),
            url: url.trim_end_matches('/').to_string(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl CompletionProvider for OllamaCompletion {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "temperature": self.temperature,
                "num_predict": self.max_tokens,
            },
        });
        let json = post_json(
            &self.client,
            &format!("{}/api/generate", self.url),
            None,
            &body,
            self.max_retries,
            "Ollama",
        )
        .await?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<String> {
    json.get("response")
        .and_then(|r| r.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing response field"))
}

// ============ OpenAI ============

/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAICompletion {
    client: reqwest::Client,
    api_key: String,
    model: String,
    url: String,
    max_tokens: u32,
    temperature: f32,
    max_retries: u32,
}

impl OpenAICompletion {
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            url: url.trim_end_matches('/').to_string(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl CompletionProvider for OpenAICompletion {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": prompt },
            ],
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        });
        let json = post_json(
            &self.client,
            &format!("{}/v1/chat/completions", self.url),
            Some(&self.api_key),
            &body,
            self.max_retries,
            "OpenAI",
        )
        .await?;
        parse_openai_response(&json)
    }
}

fn parse_openai_response(json: &serde_json::Value) -> Result<String> {
    let choices = json
        .get("choices")
        .and_then(|c| c.as_array())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing choices array"))?;

    let content = choices
        .first()
        .and_then(|c| c.pointer("/message/content"))
        .and_then(|c| c.as_str())
        .map(str::trim)
        .unwrap_or_default();

    if content.is_empty() {
        Ok(EMPTY_COMPLETION_FALLBACK.to_string())
    } else {
        Ok(content.to_string())
    }
}

/// Create the [`CompletionProvider`] named by `config.provider`.
pub fn create_provider(config: &CompletionConfig) -> Result<Box<dyn CompletionProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledCompletion)),
        "ollama" => Ok(Box::new(OllamaCompletion::new(config)?)),
        "openai" => Ok(Box::new(OpenAICompletion::new(config)?)),
        other => bail!("Unknown completion provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ollama_response() {
        let json = serde_json::json!({ "model": "llama3.2", "response": "Hi there", "done": true });
        assert_eq!(parse_ollama_response(&json).unwrap(), "Hi there");
    }

    #[test]
    fn test_parse_ollama_response_missing() {
        let json = serde_json::json!({ "error": "model not found" });
        assert!(parse_ollama_response(&json).is_err());
    }

    #[test]
    fn test_parse_openai_response() {
        let json = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": " Paris. " } }]
        });
        assert_eq!(parse_openai_response(&json).unwrap(), "Paris.");
    }

    #[test]
    fn test_parse_openai_empty_content_falls_back() {
        let json = serde_json::json!({ "choices": [{ "message": { "content": null } }] });
        assert_eq!(
            parse_openai_response(&json).unwrap(),
            EMPTY_COMPLETION_FALLBACK
        );
    }

    #[test]
    fn test_unknown_provider() {
        let config = CompletionConfig {
            provider: "cohere".to_string(),
            ..CompletionConfig::default()
        };
        assert!(create_provider(&config).is_err());
    }

    #[tokio::test]
    async fn test_disabled_errors() {
        assert!(DisabledCompletion.complete("hi").await.is_err());
    }
}
