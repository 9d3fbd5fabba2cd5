//! Anthropic messages backend.
//!
//! Calls `POST /v1/messages` with the configured model. Requires the
//! `ANTHROPIC_API_KEY` environment variable at construction time. The task
//! directive maps to the `system` field; chunk text goes in a single user
//! message.

use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use super::{
    classify_http_status, classify_transport_error, system_prompt, Provider, ProviderError,
    ProviderReply, ProviderRequest,
};
use crate::config::ProviderConfig;
use crate::models::TokenUsage;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_OUTPUT_TOKENS: u32 = 2048;

pub struct AnthropicProvider {
    model: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(model: &str, config: &ProviderConfig) -> Result<Self> {
        let api_key = match std::env::var("ANTHROPIC_API_KEY") {
            Ok(key) if !key.is_empty() => key,
            _ => bail!("ANTHROPIC_API_KEY environment variable not set"),
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
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &ProviderRequest) -> Result<ProviderReply, ProviderError> {
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": MAX_OUTPUT_TOKENS,
            "system": system_prompt(&request.directive),
            "messages": [
                { "role": "user", "content": request.text },
            ],
        });

        let resp = self
            .client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                ProviderError::new(classify_transport_error(&e), format!("Anthropic: {}", e))
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::new(
                classify_http_status(status),
                format!("Anthropic API error {}: {}", status, body_text),
            ));
        }

        let json: serde_json::Value = resp.json().await.map_err(|e| {
            ProviderError::new(classify_transport_error(&e), format!("Anthropic: {}", e))
        })?;
        parse_response(&json)
    }
}

fn parse_response(json: &serde_json::Value) -> Result<ProviderReply, ProviderError> {
    let text = json
        .get("content")
        .and_then(|c| c.get(0))
        .and_then(|b| b.get("text"))
        .and_then(|t| t.as_str())
        .ok_or_else(|| {
            ProviderError::new(
                super::FailureKind::RetryableTransient,
                "Invalid Anthropic response: missing content[0].text",
            )
        })?
        .to_string();

    let usage = TokenUsage {
        prompt_tokens: json["usage"]["input_tokens"].as_u64().unwrap_or(0),
        completion_tokens: json["usage"]["output_tokens"].as_u64().unwrap_or(0),
    };

    Ok(ProviderReply { text, usage })
}
