//! OpenAI chat-completions backend.
//!
//! Calls `POST /v1/chat/completions` with the configured model. Requires
//! the `OPENAI_API_KEY` environment variable at construction time.

use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use super::{
    classify_http_status, classify_transport_error, system_prompt, Provider, ProviderError,
    ProviderReply, ProviderRequest,
};
use crate::config::ProviderConfig;
use crate::models::TokenUsage;

pub struct OpenAiProvider {
    model: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new(model: &str, config: &ProviderConfig) -> Result<Self> {
        let api_key = match std::env::var("OPENAI_API_KEY") {
            Ok(key) if !key.is_empty() => key,
            _ => bail!("OPENAI_API_KEY environment variable not set"),
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model: model.to_string(),
            api_key,
            client,
        })
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &ProviderRequest) -> Result<ProviderReply, ProviderError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system_prompt(&request.directive) },
                { "role": "user", "content": request.text },
            ],
            "temperature": 0.3,
        });

        let resp = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                ProviderError::new(classify_transport_error(&e), format!("OpenAI: {}", e))
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::new(
                classify_http_status(status),
                format!("OpenAI API error {}: {}", status, body_text),
            ));
        }

        let json: serde_json::Value = resp.json().await.map_err(|e| {
            ProviderError::new(classify_transport_error(&e), format!("OpenAI: {}", e))
        })?;
        parse_response(&json)
    }
}

fn parse_response(json: &serde_json::Value) -> Result<ProviderReply, ProviderError> {
    let text = json
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|t| t.as_str())
        .ok_or_else(|| {
            ProviderError::new(
                super::FailureKind::RetryableTransient,
                "Invalid OpenAI response: missing choices[0].message.content",
            )
        })?
        .to_string();

    let usage = TokenUsage {
        prompt_tokens: json["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
        completion_tokens: json["usage"]["completion_tokens"].as_u64().unwrap_or(0),
    };

    Ok(ProviderReply { text, usage })
}
