//! Provider gateway: one request/response contract over heterogeneous AI
//! backends.
//!
//! Defines the [`Provider`] trait and concrete implementations:
//! - **[`openai::OpenAiProvider`]** — OpenAI chat completions.
//! - **[`anthropic::AnthropicProvider`]** — Anthropic messages API.
//! - **[`ollama::OllamaProvider`]** — a local Ollama instance.
//!
//! The [`ProviderGateway`] owns the resilience policy: classified failures,
//! bounded retries with exponential backoff and jitter for retryable kinds,
//! and a single fallback request to the configured secondary provider after
//! the primary exhausts. Every outcome is encoded in a [`ProviderResponse`];
//! the gateway never lets an error escape its boundary.
//!
//! # Retry Strategy
//!
//! - HTTP 429 → `RetryableRateLimit`, retried
//! - Timeouts, connection errors, 5xx → `RetryableTransient`, retried
//! - HTTP 401/403 → `FatalAuth`, straight to fallback
//! - Other 4xx → `FatalInvalidRequest`, straight to fallback
//! - Backoff: `base * 2^(attempt-1)` plus uniform jitter in `[0, base]`

pub mod anthropic;
pub mod ollama;
pub mod openai;

use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, warn};

use crate::config::ProviderConfig;
use crate::models::{TaskDirective, TokenUsage};

/// Failure classification taxonomy. Drives the retry/fallback decision;
/// never relies on error-type hierarchies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    RetryableRateLimit,
    RetryableTransient,
    FatalAuth,
    FatalInvalidRequest,
    FatalUnavailable,
}

impl FailureKind {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FailureKind::RetryableRateLimit | FailureKind::RetryableTransient
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::RetryableRateLimit => "retryable-rate-limit",
            FailureKind::RetryableTransient => "retryable-transient",
            FailureKind::FatalAuth => "fatal-auth",
            FailureKind::FatalInvalidRequest => "fatal-invalid-request",
            FailureKind::FatalUnavailable => "fatal-unavailable",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A classified provider failure.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ProviderError {
    pub kind: FailureKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// One chunk's worth of work for a provider. Transient: created per
/// dispatch, discarded once the response is recorded.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub chunk_id: String,
    pub text: String,
    pub directive: TaskDirective,
}

/// A successful generation.
#[derive(Debug, Clone)]
pub struct ProviderReply {
    pub text: String,
    pub usage: TokenUsage,
}

/// Final outcome of a gateway dispatch. Failures carry the last error's
/// classification after retries and fallback are exhausted.
#[derive(Debug, Clone)]
pub enum ProviderResponse {
    Success {
        provider: String,
        text: String,
        usage: TokenUsage,
    },
    Failure {
        kind: FailureKind,
        message: String,
    },
}

impl ProviderResponse {
    pub fn is_success(&self) -> bool {
        matches!(self, ProviderResponse::Success { .. })
    }
}

/// An AI text-generation backend. Implementations shape the wire request,
/// classify HTTP failures, and report token usage; retry and fallback
/// policy live in the gateway.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Backend identifier (e.g. `"openai"`).
    fn name(&self) -> &str;

    /// Model this provider instance dispatches to.
    fn model(&self) -> &str;

    async fn generate(&self, request: &ProviderRequest) -> Result<ProviderReply, ProviderError>;
}

/// System prompt for a task directive.
pub fn system_prompt(directive: &TaskDirective) -> String {
    match directive {
        TaskDirective::Summarize => "You are a quality analyst. Summarize the following \
             document excerpt concisely, preserving figures, product identifiers, and dates."
            .to_string(),
        TaskDirective::ExtractEntities => "You are a quality analyst. Extract the entities from \
             the following document excerpt (products, SKUs, order identifiers, organizations, \
             dates) as a bulleted list, one entity per line."
            .to_string(),
        TaskDirective::Categorize => "You are a quality analyst. Categorize each issue described \
             in the following excerpt into one of: size/fit, quality defect, wrong product, \
             buyer mistake, no longer needed, functionality, compatibility. Answer one category \
             per issue with a one-line justification."
            .to_string(),
        TaskDirective::Custom(prompt) => prompt.clone(),
    }
}

/// Map an HTTP status to a failure classification.
pub(crate) fn classify_http_status(status: reqwest::StatusCode) -> FailureKind {
    match status.as_u16() {
        429 => FailureKind::RetryableRateLimit,
        401 | 403 => FailureKind::FatalAuth,
        s if (500..600).contains(&s) => FailureKind::RetryableTransient,
        _ => FailureKind::FatalInvalidRequest,
    }
}

/// Transport-level failures (timeouts, refused connections, interrupted
/// bodies) are all transient from the gateway's point of view.
pub(crate) fn classify_transport_error(_e: &reqwest::Error) -> FailureKind {
    FailureKind::RetryableTransient
}

/// Create a provider instance by configured name.
pub fn create_provider(
    name: &str,
    model: &str,
    config: &ProviderConfig,
) -> Result<Box<dyn Provider>> {
    match name {
        "openai" => Ok(Box::new(openai::OpenAiProvider::new(model, config)?)),
        "anthropic" => Ok(Box::new(anthropic::AnthropicProvider::new(model, config)?)),
        "ollama" => Ok(Box::new(ollama::OllamaProvider::new(model, config)?)),
        other => bail!("Unknown provider: {}", other),
    }
}

/// Exponential backoff with a cap on the exponent and uniform jitter.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl RetryPolicy {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let backoff = self.base_delay_ms.saturating_mul(1u64 << exponent);
        let jitter = rand::thread_rng().gen_range(0..=self.base_delay_ms);
        Duration::from_millis(backoff + jitter)
    }
}

/// Uniform dispatch surface over a primary and optional secondary provider.
///
/// Credentials and configuration are read-only after construction; the
/// gateway holds no document-level state between calls.
pub struct ProviderGateway {
    primary: Box<dyn Provider>,
    secondary: Option<Box<dyn Provider>>,
    policy: RetryPolicy,
}

impl ProviderGateway {
    pub fn new(
        primary: Box<dyn Provider>,
        secondary: Option<Box<dyn Provider>>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            primary,
            secondary,
            policy,
        }
    }

    /// Build the gateway from configuration, resolving both backends and
    /// their credentials up front.
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        let primary = create_provider(&config.primary, &config.model, config)?;
        let secondary = match &config.secondary {
            Some(name) => {
                let model = config.secondary_model.as_deref().unwrap_or(&config.model);
                Some(create_provider(name, model, config)?)
            }
            None => None,
        };
        Ok(Self::new(
            primary,
            secondary,
            RetryPolicy {
                max_retries: config.max_retries,
                base_delay_ms: config.retry_backoff_base_ms,
            },
        ))
    }

    pub fn primary_name(&self) -> &str {
        self.primary.name()
    }

    /// Dispatch one request. Retries retryable failures against the primary,
    /// then issues the request once to the secondary; every outcome comes
    /// back as a [`ProviderResponse`].
    pub async fn dispatch(&self, request: &ProviderRequest) -> ProviderResponse {
        let primary_err = match self.attempt_with_retry(self.primary.as_ref(), request).await {
            Ok(reply) => {
                return ProviderResponse::Success {
                    provider: self.primary.name().to_string(),
                    text: reply.text,
                    usage: reply.usage,
                }
            }
            Err(e) => e,
        };

        let secondary = match &self.secondary {
            Some(secondary) => secondary,
            None => {
                return ProviderResponse::Failure {
                    kind: primary_err.kind,
                    message: primary_err.message,
                }
            }
        };

        warn!(
            chunk_id = %request.chunk_id,
            primary = self.primary.name(),
            secondary = secondary.name(),
            error = %primary_err,
            "primary provider exhausted, falling back"
        );

        // Exactly one fallback request, no retries on the secondary.
        match secondary.generate(request).await {
            Ok(reply) => ProviderResponse::Success {
                provider: secondary.name().to_string(),
                text: reply.text,
                usage: reply.usage,
            },
            Err(e) => ProviderResponse::Failure {
                kind: e.kind,
                message: e.message,
            },
        }
    }

    /// Bounded retry loop for one provider. Fatal classifications return
    /// immediately; retryable ones back off and try again.
    async fn attempt_with_retry(
        &self,
        provider: &dyn Provider,
        request: &ProviderRequest,
    ) -> Result<ProviderReply, ProviderError> {
        let mut last_err = None;
        for attempt in 0..=self.policy.max_retries {
            if attempt > 0 {
                tokio::time::sleep(self.policy.delay_for_attempt(attempt)).await;
            }

            match provider.generate(request).await {
                Ok(reply) => return Ok(reply),
                Err(e) if e.kind.is_retryable() => {
                    debug!(
                        chunk_id = %request.chunk_id,
                        provider = provider.name(),
                        attempt,
                        error = %e,
                        "retryable provider failure"
                    );
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            ProviderError::new(FailureKind::FatalUnavailable, "no attempt was made")
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Scripted provider: pops one outcome per call, counts calls.
    struct ScriptedProvider {
        name: &'static str,
        outcomes: Mutex<Vec<Result<ProviderReply, ProviderError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(
            name: &'static str,
            outcomes: Vec<Result<ProviderReply, ProviderError>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                name,
                outcomes: Mutex::new(outcomes),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Provider for Arc<ScriptedProvider> {
        fn name(&self) -> &str {
            self.name
        }
        fn model(&self) -> &str {
            "scripted"
        }
        async fn generate(
            &self,
            _request: &ProviderRequest,
        ) -> Result<ProviderReply, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut outcomes = self.outcomes.lock().unwrap();
            if outcomes.is_empty() {
                return Err(ProviderError::new(
                    FailureKind::FatalUnavailable,
                    "script exhausted",
                ));
            }
            outcomes.remove(0)
        }
    }

    fn ok_reply(text: &str) -> Result<ProviderReply, ProviderError> {
        Ok(ProviderReply {
            text: text.to_string(),
            usage: TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
            },
        })
    }

    fn err(kind: FailureKind) -> Result<ProviderReply, ProviderError> {
        Err(ProviderError::new(kind, "scripted failure"))
    }

    fn request() -> ProviderRequest {
        ProviderRequest {
            chunk_id: "doc1-c0000".into(),
            text: "chunk text".into(),
            directive: TaskDirective::Summarize,
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            base_delay_ms: 0,
        }
    }

    #[tokio::test]
    async fn first_attempt_success_uses_primary() {
        let primary = ScriptedProvider::new("primary", vec![ok_reply("done")]);
        let gateway = ProviderGateway::new(Box::new(primary.clone()), None, policy());

        match gateway.dispatch(&request()).await {
            ProviderResponse::Success { provider, text, .. } => {
                assert_eq!(provider, "primary");
                assert_eq!(text, "done");
            }
            other => panic!("expected success, got {:?}", other),
        }
        assert_eq!(primary.calls(), 1);
    }

    #[tokio::test]
    async fn retryable_failures_retry_then_succeed() {
        let primary = ScriptedProvider::new(
            "primary",
            vec![
                err(FailureKind::RetryableTransient),
                err(FailureKind::RetryableRateLimit),
                ok_reply("third time"),
            ],
        );
        let gateway = ProviderGateway::new(Box::new(primary.clone()), None, policy());

        assert!(gateway.dispatch(&request()).await.is_success());
        assert_eq!(primary.calls(), 3);
    }

    #[tokio::test]
    async fn exhausted_primary_sends_exactly_one_request_to_secondary() {
        let primary = ScriptedProvider::new(
            "primary",
            vec![
                err(FailureKind::RetryableTransient),
                err(FailureKind::RetryableTransient),
                err(FailureKind::RetryableTransient),
            ],
        );
        let secondary = ScriptedProvider::new("secondary", vec![ok_reply("rescued")]);
        let gateway =
            ProviderGateway::new(Box::new(primary.clone()), Some(Box::new(secondary.clone())), policy());

        match gateway.dispatch(&request()).await {
            ProviderResponse::Success { provider, text, .. } => {
                assert_eq!(provider, "secondary");
                assert_eq!(text, "rescued");
            }
            other => panic!("expected success, got {:?}", other),
        }
        // max_retries = 2 means 3 primary attempts, then one fallback.
        assert_eq!(primary.calls(), 3);
        assert_eq!(secondary.calls(), 1);
    }

    #[tokio::test]
    async fn fatal_auth_skips_retries_and_falls_back() {
        let primary = ScriptedProvider::new("primary", vec![err(FailureKind::FatalAuth)]);
        let secondary = ScriptedProvider::new("secondary", vec![ok_reply("rescued")]);
        let gateway =
            ProviderGateway::new(Box::new(primary.clone()), Some(Box::new(secondary.clone())), policy());

        assert!(gateway.dispatch(&request()).await.is_success());
        assert_eq!(primary.calls(), 1);
        assert_eq!(secondary.calls(), 1);
    }

    #[tokio::test]
    async fn both_providers_failing_reports_last_classification() {
        let primary = ScriptedProvider::new("primary", vec![err(FailureKind::FatalAuth)]);
        let secondary =
            ScriptedProvider::new("secondary", vec![err(FailureKind::FatalInvalidRequest)]);
        let gateway =
            ProviderGateway::new(Box::new(primary.clone()), Some(Box::new(secondary.clone())), policy());

        match gateway.dispatch(&request()).await {
            ProviderResponse::Failure { kind, .. } => {
                assert_eq!(kind, FailureKind::FatalInvalidRequest);
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(secondary.calls(), 1);
    }

    #[tokio::test]
    async fn no_secondary_reports_primary_failure() {
        let primary = ScriptedProvider::new(
            "primary",
            vec![
                err(FailureKind::RetryableTransient),
                err(FailureKind::RetryableTransient),
                err(FailureKind::RetryableTransient),
            ],
        );
        let gateway = ProviderGateway::new(Box::new(primary.clone()), None, policy());

        match gateway.dispatch(&request()).await {
            ProviderResponse::Failure { kind, .. } => {
                assert_eq!(kind, FailureKind::RetryableTransient);
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(primary.calls(), 3);
    }

    #[test]
    fn classification_taxonomy() {
        assert!(FailureKind::RetryableRateLimit.is_retryable());
        assert!(FailureKind::RetryableTransient.is_retryable());
        assert!(!FailureKind::FatalAuth.is_retryable());
        assert!(!FailureKind::FatalInvalidRequest.is_retryable());
        assert!(!FailureKind::FatalUnavailable.is_retryable());

        assert_eq!(
            classify_http_status(reqwest::StatusCode::TOO_MANY_REQUESTS),
            FailureKind::RetryableRateLimit
        );
        assert_eq!(
            classify_http_status(reqwest::StatusCode::UNAUTHORIZED),
            FailureKind::FatalAuth
        );
        assert_eq!(
            classify_http_status(reqwest::StatusCode::BAD_GATEWAY),
            FailureKind::RetryableTransient
        );
        assert_eq!(
            classify_http_status(reqwest::StatusCode::UNPROCESSABLE_ENTITY),
            FailureKind::FatalInvalidRequest
        );
    }
}
