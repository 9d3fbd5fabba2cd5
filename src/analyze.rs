//! Analysis orchestration.
//!
//! Drives the end-to-end pipeline for one document: normalize → chunk →
//! dispatch → reduce. Chunk dispatch is the only concurrent stage, bounded
//! by a semaphore sized from `dispatch_concurrency`; results land in
//! per-sequence slots and are reassembled in chunk order after all
//! dispatches join, so the output ordering is deterministic regardless of
//! completion order.
//!
//! Failures before dispatch (unsupported format, corrupt input, no
//! extractable content) are typed errors — no provider call is wasted on
//! undecodable input. From dispatch onward, per-chunk failures never abort
//! sibling chunks and the run always reduces to an [`AnalysisResult`] whose
//! status the caller inspects.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chunk::chunk_units;
use crate::config::Config;
use crate::detect::{detect_format, DetectError};
use crate::extract::{OcrEngine, TesseractEngine};
use crate::models::{
    AnalysisResult, Chunk, ChunkOutcome, NormalizedDocument, RunStatus, SourceDocument,
    TaskDirective, TokenUsage,
};
use crate::normalize::{normalize, NormalizeError};
use crate::provider::{ProviderGateway, ProviderRequest, ProviderResponse};

/// Fatal pre-dispatch failures. Anything after chunking is encoded in the
/// returned [`AnalysisResult`] instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Detect(#[from] DetectError),

    #[error(transparent)]
    Normalize(#[from] NormalizeError),

    /// The run lock rejected a second concurrent `analyze` for the same
    /// document id.
    #[error("analysis already in flight for document {0}")]
    AlreadyRunning(String),
}

/// Pipeline run states. Dispatch failures do not reach `Failed`; they are
/// recorded per chunk and the run proceeds to `Reducing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Normalizing,
    Chunking,
    Dispatching,
    Reducing,
    Done,
    Failed,
}

/// Cancel side of a cooperative cancellation pair.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Observe side of a cooperative cancellation pair. Cheap to clone; one per
/// in-flight dispatch.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve when cancellation is requested. A dropped [`CancelHandle`]
    /// means the run can never be cancelled; this future then stays pending.
    async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Create a linked cancel handle/token pair.
pub fn cancellation() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx: Arc::new(tx) }, CancelToken { rx })
}

/// Document-level run lock: at most one in-flight `analyze` per document id.
#[derive(Clone, Default)]
struct RunLock {
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl RunLock {
    fn try_acquire(&self, document_id: &str) -> Option<RunGuard> {
        let mut set = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if set.insert(document_id.to_string()) {
            Some(RunGuard {
                in_flight: self.in_flight.clone(),
                document_id: document_id.to_string(),
            })
        } else {
            None
        }
    }
}

struct RunGuard {
    in_flight: Arc<Mutex<HashSet<String>>>,
    document_id: String,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let mut set = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        set.remove(&self.document_id);
    }
}

/// Owns the pipeline configuration, the provider gateway, and the optional
/// OCR engine for the lifetime of the process. One orchestrator serves many
/// runs; per-run state lives on the stack of [`analyze`](Self::analyze).
pub struct AnalysisOrchestrator {
    config: Config,
    gateway: Arc<ProviderGateway>,
    ocr: Option<Arc<dyn OcrEngine>>,
    run_lock: RunLock,
}

impl AnalysisOrchestrator {
    pub fn new(
        config: Config,
        gateway: ProviderGateway,
        ocr: Option<Arc<dyn OcrEngine>>,
    ) -> Self {
        Self {
            config,
            gateway: Arc::new(gateway),
            ocr,
            run_lock: RunLock::default(),
        }
    }

    /// Build an orchestrator from configuration: resolve the provider
    /// gateway and wire up the Tesseract engine (availability is probed at
    /// use, so a missing binary degrades instead of failing here).
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let gateway = ProviderGateway::from_config(&config.provider)?;
        let ocr: Arc<dyn OcrEngine> = Arc::new(TesseractEngine::new(config.ocr.language.clone()));
        Ok(Self::new(config, gateway, Some(ocr)))
    }

    /// Detect the format of raw bytes and run the full pipeline.
    pub async fn analyze_bytes(
        &self,
        document_id: &str,
        bytes: Vec<u8>,
        name_hint: Option<&str>,
        directive: TaskDirective,
    ) -> Result<AnalysisResult, PipelineError> {
        let format = detect_format(&bytes, name_hint)?;
        let mut source = SourceDocument::new(document_id, format, bytes);
        if let Some(name) = name_hint {
            source = source.with_name(name);
        }
        self.analyze(source, directive).await
    }

    /// Run the full pipeline for one document.
    pub async fn analyze(
        &self,
        source: SourceDocument,
        directive: TaskDirective,
    ) -> Result<AnalysisResult, PipelineError> {
        let (_handle, token) = cancellation();
        self.analyze_with_cancel(source, directive, token).await
    }

    /// Run the full pipeline with cooperative cancellation. A cancelled run
    /// reduces to `Failed` with reason `cancelled`; partial output is never
    /// reported as success.
    pub async fn analyze_with_cancel(
        &self,
        source: SourceDocument,
        directive: TaskDirective,
        cancel: CancelToken,
    ) -> Result<AnalysisResult, PipelineError> {
        let _guard = self
            .run_lock
            .try_acquire(&source.id)
            .ok_or_else(|| PipelineError::AlreadyRunning(source.id.clone()))?;

        let run_id = Uuid::new_v4().to_string();
        let document_id = source.id.clone();
        let mut state = RunState::Normalizing;
        debug!(%document_id, %run_id, format = %source.format, state = ?state, "run started");

        let normalized = match normalize(&source, self.ocr.as_deref(), &self.config.ocr) {
            Ok(doc) => doc,
            Err(e) => {
                state = RunState::Failed;
                debug!(%document_id, %run_id, state = ?state, error = %e, "run failed before dispatch");
                return Err(e.into());
            }
        };
        // Raw bytes are no longer needed once normalization is done.
        drop(source);

        state = RunState::Chunking;
        debug!(%document_id, %run_id, state = ?state, units = normalized.total_units(), "chunking");
        let chunks = chunk_units(&normalized, self.config.chunking.size_budget_tokens);
        if chunks.is_empty() {
            state = RunState::Failed;
            debug!(%document_id, %run_id, state = ?state, "no chunks produced");
            return Ok(failed_result(
                &normalized,
                run_id,
                "no analyzable text after normalization",
            ));
        }

        state = RunState::Dispatching;
        info!(
            %document_id,
            %run_id,
            state = ?state,
            chunks = chunks.len(),
            provider = self.gateway.primary_name(),
            task = directive.label(),
            "dispatching"
        );
        let slots = self.dispatch_chunks(&chunks, &directive, &cancel).await;

        state = RunState::Reducing;
        debug!(%document_id, %run_id, state = ?state, "reducing");
        let result = reduce(&normalized, run_id, &chunks, slots, cancel.is_cancelled());
        state = if result.status == RunStatus::Failed {
            RunState::Failed
        } else {
            RunState::Done
        };
        debug!(
            %document_id,
            run_id = %result.run_id,
            state = ?state,
            status = ?result.status,
            "run finished"
        );
        Ok(result)
    }

    /// Dispatch every chunk on a bounded worker pool. Each slot is written
    /// at most once, indexed by sequence number; `None` means the dispatch
    /// was cancelled before completing.
    async fn dispatch_chunks(
        &self,
        chunks: &[Chunk],
        directive: &TaskDirective,
        cancel: &CancelToken,
    ) -> Vec<Option<ProviderResponse>> {
        let semaphore = Arc::new(Semaphore::new(self.config.provider.dispatch_concurrency));
        let mut handles = Vec::with_capacity(chunks.len());

        for chunk in chunks {
            let semaphore = semaphore.clone();
            let gateway = self.gateway.clone();
            let cancel = cancel.clone();
            let request = ProviderRequest {
                chunk_id: chunk.id.clone(),
                text: chunk.text.clone(),
                directive: directive.clone(),
            };
            let sequence = chunk.sequence as usize;

            handles.push(tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (sequence, None),
                };
                if cancel.is_cancelled() {
                    return (sequence, None);
                }
                tokio::select! {
                    _ = cancel.cancelled() => (sequence, None),
                    response = gateway.dispatch(&request) => (sequence, Some(response)),
                }
            }));
        }

        let mut slots: Vec<Option<ProviderResponse>> = vec![None; chunks.len()];
        for handle in handles {
            match handle.await {
                Ok((sequence, response)) => slots[sequence] = response,
                Err(e) => warn!(error = %e, "chunk dispatch task failed"),
            }
        }
        slots
    }
}

/// Reassemble per-chunk responses into one ordered result and compute the
/// overall status.
fn reduce(
    normalized: &NormalizedDocument,
    run_id: String,
    chunks: &[Chunk],
    slots: Vec<Option<ProviderResponse>>,
    cancelled: bool,
) -> AnalysisResult {
    let mut outcomes = Vec::with_capacity(chunks.len());
    let mut usage = TokenUsage::default();
    let mut succeeded = 0usize;

    for (chunk, slot) in chunks.iter().zip(slots) {
        let outcome = match slot {
            Some(ProviderResponse::Success {
                provider,
                text,
                usage: chunk_usage,
            }) => {
                usage.add(chunk_usage);
                succeeded += 1;
                ChunkOutcome {
                    chunk_id: chunk.id.clone(),
                    sequence: chunk.sequence,
                    unit_ordinals: chunk.unit_ordinals.clone(),
                    output_text: Some(text),
                    error_reason: None,
                    provider: Some(provider),
                }
            }
            Some(ProviderResponse::Failure { kind, message }) => ChunkOutcome {
                chunk_id: chunk.id.clone(),
                sequence: chunk.sequence,
                unit_ordinals: chunk.unit_ordinals.clone(),
                output_text: None,
                error_reason: Some(format!("{}: {}", kind, message)),
                provider: None,
            },
            None => ChunkOutcome {
                chunk_id: chunk.id.clone(),
                sequence: chunk.sequence,
                unit_ordinals: chunk.unit_ordinals.clone(),
                output_text: None,
                error_reason: Some("cancelled".to_string()),
                provider: None,
            },
        };
        outcomes.push(outcome);
    }
    outcomes.sort_by_key(|o| o.sequence);

    let (status, failure_reason) = if cancelled {
        (RunStatus::Failed, Some("cancelled".to_string()))
    } else if succeeded == chunks.len() {
        (RunStatus::Complete, None)
    } else if succeeded > 0 {
        (RunStatus::Partial, None)
    } else {
        (
            RunStatus::Failed,
            Some(format!("all {} chunks failed", chunks.len())),
        )
    };

    AnalysisResult {
        document_id: normalized.document_id.clone(),
        run_id,
        status,
        failure_reason,
        chunks: outcomes,
        usage,
        degraded: normalized.degraded(),
        finished_at: Utc::now(),
    }
}

fn failed_result(normalized: &NormalizedDocument, run_id: String, reason: &str) -> AnalysisResult {
    AnalysisResult {
        document_id: normalized.document_id.clone(),
        run_id,
        status: RunStatus::Failed,
        failure_reason: Some(reason.to_string()),
        chunks: Vec::new(),
        usage: TokenUsage::default(),
        degraded: normalized.degraded(),
        finished_at: Utc::now(),
    }
}
