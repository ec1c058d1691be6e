//! Text-generation provider abstraction and implementations.
//!
//! Defines the [`TextGenerator`] trait and concrete implementations:
//! - **[`DisabledGenerator`]**: always fails; analysis degrades to
//!   filename-as-title. Used when `llm.provider = "disabled"`.
//! - **[`ChatCompletionsGenerator`]**: calls an OpenAI-compatible
//!   chat-completions endpoint (OpenAI or Azure OpenAI).
//!
//! Each request is a single attempt bounded by the configured client
//! timeout. There is no retry: a failed call degrades that file's analysis
//! and the batch moves on.
//!
//! # Endpoints
//!
//! | Provider | URL | Auth header |
//! |----------|-----|-------------|
//! | `openai` | `{base}/v1/chat/completions` | `Authorization: Bearer $OPENAI_API_KEY` |
//! | `azure` | `{base}/openai/deployments/{deployment}/chat/completions?api-version={v}` | `api-key: $AZURE_OPENAI_API_KEY` |

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::LlmConfig;

/// One completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    /// Ask the service for a JSON-object response.
    pub json_response: bool,
}

/// A text-completion service.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Returns the model identifier (e.g. `"gpt-4o-mini"`).
    fn model_name(&self) -> &str;

    /// Run one completion and return the generated text.
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

// ============ Disabled Generator ============

/// A generator that always returns an error.
pub struct DisabledGenerator;

#[async_trait]
impl TextGenerator for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<String> {
        bail!("Text generation is disabled (llm.provider = \"disabled\")")
    }
}

// ============ Chat Completions Generator ============

/// How the API key is presented.
#[derive(Debug, Clone)]
pub enum ApiAuth {
    /// `Authorization: Bearer <key>` (OpenAI and compatible services).
    Bearer(String),
    /// `api-key: <key>` (Azure OpenAI).
    ApiKeyHeader(String),
}

/// Generator backed by an OpenAI-compatible `chat/completions` endpoint.
pub struct ChatCompletionsGenerator {
    client: reqwest::Client,
    url: String,
    auth: ApiAuth,
    model: String,
}

impl ChatCompletionsGenerator {
    /// Build a generator for an explicit endpoint URL.
    pub fn new(url: String, auth: ApiAuth, model: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            url,
            auth,
            model,
        })
    }

    /// OpenAI (or a compatible service at `llm.base_url`). Requires `OPENAI_API_KEY`.
    pub fn openai(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .context("OPENAI_API_KEY environment variable not set")?;
        let base = config
            .base_url
            .as_deref()
            .unwrap_or("https://api.openai.com");
        Self::new(
            openai_chat_url(base),
            ApiAuth::Bearer(api_key),
            config.model.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    /// Azure OpenAI. Requires `llm.base_url`, `llm.deployment`, and
    /// `AZURE_OPENAI_API_KEY`.
    pub fn azure(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var("AZURE_OPENAI_API_KEY")
            .context("AZURE_OPENAI_API_KEY environment variable not set")?;
        let base = config
            .base_url
            .as_deref()
            .context("llm.base_url (Azure endpoint) required for the azure provider")?;
        let deployment = config
            .deployment
            .as_deref()
            .context("llm.deployment required for the azure provider")?;
        Self::new(
            azure_chat_url(base, deployment, &config.api_version),
            ApiAuth::ApiKeyHeader(api_key),
            deployment.to_string(),
            Duration::from_secs(config.timeout_secs),
        )
    }
}

#[async_trait]
impl TextGenerator for ChatCompletionsGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.prompt },
            ],
            "temperature": request.temperature,
            "max_tokens": request.max_output_tokens,
        });
        if request.json_response {
            body["response_format"] = serde_json::json!({ "type": "json_object" });
        }

        let builder = self.client.post(&self.url).json(&body);
        let builder = match &self.auth {
            ApiAuth::Bearer(key) => builder.bearer_auth(key),
            ApiAuth::ApiKeyHeader(key) => builder.header("api-key", key),
        };

        let response = builder
            .send()
            .await
            .with_context(|| format!("Chat completion request to {} failed", self.url))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!(
                "Chat completion API error {}: {}",
                status,
                body_text.chars().take(500).collect::<String>()
            );
        }

        let json: serde_json::Value = response
            .json()
            .await
            .context("Chat completion response was not valid JSON")?;
        parse_chat_response(&json)
    }
}

/// Extract `choices[0].message.content` from a chat-completions response.
fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    let content = json
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| anyhow::anyhow!("Invalid chat completion response: missing message content"))?;
    Ok(content.trim().to_string())
}

fn openai_chat_url(base_url: &str) -> String {
    format!("{}/v1/chat/completions", base_url.trim_end_matches('/'))
}

fn azure_chat_url(base_url: &str, deployment: &str, api_version: &str) -> String {
    format!(
        "{}/openai/deployments/{}/chat/completions?api-version={}",
        base_url.trim_end_matches('/'),
        deployment,
        api_version
    )
}

/// Create the [`TextGenerator`] named by `llm.provider`.
///
/// | Config Value | Generator |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledGenerator`] |
/// | `"openai"` | [`ChatCompletionsGenerator::openai`] |
/// | `"azure"` | [`ChatCompletionsGenerator::azure`] |
pub fn create_generator(config: &LlmConfig) -> Result<Arc<dyn TextGenerator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "openai" => Ok(Arc::new(ChatCompletionsGenerator::openai(config)?)),
        "azure" => Ok(Arc::new(ChatCompletionsGenerator::azure(config)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_openai_url() {
        assert_eq!(
            openai_chat_url("https://api.openai.com/"),
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[test]
    fn builds_azure_url() {
        assert_eq!(
            azure_chat_url("https://acme.openai.azure.com", "gpt4o", "2024-02-01"),
            "https://acme.openai.azure.com/openai/deployments/gpt4o/chat/completions?api-version=2024-02-01"
        );
    }

    #[test]
    fn parses_message_content() {
        let json = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "  {\"title\":\"x\"}\n" } }]
        });
        assert_eq!(parse_chat_response(&json).unwrap(), "{\"title\":\"x\"}");
    }

    #[test]
    fn missing_choices_is_an_error() {
        let json = serde_json::json!({ "error": { "message": "quota" } });
        assert!(parse_chat_response(&json).is_err());
    }

    #[tokio::test]
    async fn disabled_generator_fails() {
        let request = CompletionRequest {
            system: String::new(),
            prompt: "hi".to_string(),
            temperature: 0.3,
            max_output_tokens: 10,
            json_response: true,
        };
        assert!(DisabledGenerator.complete(&request).await.is_err());
    }
}
