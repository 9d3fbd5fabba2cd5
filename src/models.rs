//! Core data models used throughout docflow.
//!
//! These types represent the documents, extracted units, chunks, and analysis
//! results that flow through the normalization and dispatch pipeline. A
//! pipeline run exclusively owns its [`SourceDocument`] and everything derived
//! from it; nothing here is shared across concurrent runs.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Detected input format, a closed set. New formats are added as variants
/// with their own extractor, never via runtime type inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    /// Plain or structured text: DOCX, CSV/TSV, UTF-8 text.
    TextNative,
    /// Workbook formats (XLSX).
    Spreadsheet,
    /// PDF with an embedded text layer (pages may still need OCR).
    Pdf,
    /// Raster image or scan; text only reachable through OCR.
    Image,
}

impl DocumentFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentFormat::TextNative => "text-native",
            DocumentFormat::Spreadsheet => "spreadsheet",
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Image => "image",
        }
    }
}

impl std::fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One input file, immutable once created. The raw bytes are owned by the
/// normalizer for the duration of a run and dropped when it finishes.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub id: String,
    pub format: DocumentFormat,
    pub name: Option<String>,
    pub bytes: Vec<u8>,
}

impl SourceDocument {
    pub fn new(id: impl Into<String>, format: DocumentFormat, bytes: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            format,
            name: None,
            bytes,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }
}

/// How a unit's text was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtractionMethod {
    /// Native text content (DOCX paragraph, CSV row block, …). Confidence 1.0.
    NativeText,
    /// Embedded PDF text layer.
    PdfTextLayer,
    /// Optical character recognition over a page or image.
    Ocr,
    /// Placeholder for a page that had no text layer and no usable OCR.
    /// Confidence 0.0; keeps ordinals gapless.
    EmptyFallback,
}

/// One logically addressable piece of extracted content. Ordinals within a
/// document are strictly increasing and gapless relative to the original
/// structure (page number, paragraph index, row-block index).
#[derive(Debug, Clone)]
pub struct ExtractedUnit {
    pub document_id: String,
    pub ordinal: u32,
    pub text: String,
    /// In `[0.0, 1.0]`; 1.0 for native text, engine-reported otherwise.
    pub confidence: f32,
    pub method: ExtractionMethod,
}

/// The ordered unit sequence for one document plus aggregate metadata.
#[derive(Debug, Clone)]
pub struct NormalizedDocument {
    pub document_id: String,
    pub units: Vec<ExtractedUnit>,
    /// Units whose text came from OCR.
    pub ocr_units: usize,
    /// Units below the configured OCR confidence floor or emitted as
    /// empty fallbacks.
    pub degraded_units: usize,
    pub mean_confidence: f32,
}

impl NormalizedDocument {
    pub fn total_units(&self) -> usize {
        self.units.len()
    }

    /// Whether OCR fallback or empty-content degradation occurred anywhere
    /// in this document.
    pub fn degraded(&self) -> bool {
        self.ocr_units > 0 || self.degraded_units > 0
    }

    /// Full normalized text in document order, empty placeholder units
    /// elided. Chunking round-trips against this.
    pub fn joined_text(&self) -> String {
        self.units
            .iter()
            .filter(|u| !u.text.is_empty())
            .map(|u| u.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// A contiguous, size-bounded window over one or more extracted units, sent
/// as a single unit of work to a provider.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    /// Monotonically increasing per document; the reducer sorts by this.
    pub sequence: u32,
    /// Ordinals of every unit that contributed text to this chunk.
    pub unit_ordinals: Vec<u32>,
    pub text: String,
    pub estimated_tokens: usize,
    pub hash: String,
}

/// What the caller wants done with each chunk of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskDirective {
    Summarize,
    ExtractEntities,
    /// Categorize content (e.g. return reasons) into quality buckets.
    Categorize,
    Custom(String),
}

impl TaskDirective {
    pub fn label(&self) -> &str {
        match self {
            TaskDirective::Summarize => "summarize",
            TaskDirective::ExtractEntities => "extract-entities",
            TaskDirective::Categorize => "categorize",
            TaskDirective::Custom(_) => "custom",
        }
    }
}

/// Token accounting reported by providers, aggregated per run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }

    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Overall completion status of one analysis run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Every chunk succeeded.
    Complete,
    /// At least one chunk succeeded and at least one failed.
    Partial,
    /// Every chunk failed, or the run never reached dispatch.
    Failed,
}

/// Per-chunk outcome in document order. Exactly one of `output_text` /
/// `error_reason` is set.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkOutcome {
    pub chunk_id: String,
    pub sequence: u32,
    pub unit_ordinals: Vec<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
    /// Which provider produced the output (may be the secondary).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

impl ChunkOutcome {
    pub fn succeeded(&self) -> bool {
        self.output_text.is_some()
    }
}

/// The reduction of all chunk outcomes for one document. Immutable after
/// return; callers inspect `status` and per-chunk reasons rather than
/// catching errors.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    pub document_id: String,
    pub run_id: String,
    pub status: RunStatus,
    /// Single top-level reason, set only when `status` is `Failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub chunks: Vec<ChunkOutcome>,
    pub usage: TokenUsage,
    /// Whether OCR fallback or empty-content degradation occurred during
    /// normalization.
    pub degraded: bool,
    pub finished_at: DateTime<Utc>,
}
