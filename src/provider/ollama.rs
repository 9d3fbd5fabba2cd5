//! Ollama backend for local models.
//!
//! Calls `POST /api/generate` on the configured Ollama URL (default
//! `http://localhost:11434`). No API key; requires Ollama to be running
//! with the model pulled.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use super::{
    classify_http_status, system_prompt, FailureKind, Provider, ProviderError, ProviderReply,
    ProviderRequest,
};
use crate::config::ProviderConfig;
use crate::models::TokenUsage;

pub struct OllamaProvider {
    model: String,
    url: String,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(model: &str, config: &ProviderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model: model.to_string(),
            url: config.ollama_url.clone(),
            client,
        })
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &ProviderRequest) -> Result<ProviderReply, ProviderError> {
        let body = serde_json::json!({
            "model": self.model,
            "system": system_prompt(&request.directive),
            "prompt": request.text,
            "stream": false,
        });

        let resp = self
            .client
            .post(format!("{}/api/generate", self.url))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                ProviderError::new(
                    FailureKind::RetryableTransient,
                    format!("Ollama connection error (is Ollama running at {}?): {}", self.url, e),
                )
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::new(
                classify_http_status(status),
                format!("Ollama API error {}: {}", status, body_text),
            ));
        }

        let json: serde_json::Value = resp.json().await.map_err(|e| {
            ProviderError::new(FailureKind::RetryableTransient, format!("Ollama: {}", e))
        })?;
        parse_response(&json)
    }
}

fn parse_response(json: &serde_json::Value) -> Result<ProviderReply, ProviderError> {
    let text = json
        .get("response")
        .and_then(|t| t.as_str())
        .ok_or_else(|| {
            ProviderError::new(
                FailureKind::RetryableTransient,
                "Invalid Ollama response: missing response field",
            )
        })?
        .to_string();

    let usage = TokenUsage {
        prompt_tokens: json["prompt_eval_count"].as_u64().unwrap_or(0),
        completion_tokens: json["eval_count"].as_u64().unwrap_or(0),
    };

    Ok(ProviderReply { text, usage })
}
