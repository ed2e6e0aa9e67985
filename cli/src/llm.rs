//! A minimal OpenAI-compatible [`LlmClient`]. The LLM provider integration is
//! out of scope for the engine itself; this is the ambient glue that lets the
//! CLI actually run against a live model.

use async_trait::async_trait;
use recon_core::prompt::{LlmClient, ModelRole, Usage};
use schemars::Schema;
use serde_json::{Value, json};

/// Calls a chat-completions endpoint shaped like OpenAI's, constraining the
/// response to `schema` via `response_format: json_schema`.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiCompatibleClient {
    /// Creates a client targeting `base_url` (no trailing slash) with `model`
    /// used uniformly across every [`ModelRole`].
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn complete(&self, role: ModelRole, prompt: &str, schema: &Schema) -> anyhow::Result<(Value, Usage)> {
        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": role.as_str(),
                    "schema": schema,
                    "strict": true,
                }
            },
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let payload: ChatCompletionResponse = response.json().await?;
        let content = payload
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow::anyhow!("chat completion returned no message content"))?;
        let value: Value = serde_json::from_str(&content)?;

        let usage = payload.usage.map_or_else(Usage::default, |u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            cost_usd: 0.0,
        });
        Ok((value, usage))
    }
}

#[derive(Debug, serde::Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, serde::Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, serde::Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct ChatUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}
