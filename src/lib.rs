//! # docflow
//!
//! A document normalization and multi-provider AI analysis pipeline.
//!
//! docflow ingests heterogeneous documents (PDF, DOCX, XLSX, CSV/plain
//! text, images), normalizes them into an ordered stream of text units with
//! OCR fallback for scanned pages, chunks the text under a provider token
//! budget, and dispatches the chunks to a configurable AI backend with
//! retry, backoff, and secondary-provider fallback. Per-chunk outputs are
//! reduced into one ordered, inspectable analysis result — degraded inputs
//! and failed chunks are reported, not hidden.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌────────────┐   ┌─────────┐   ┌───────────────┐
//! │  Detect    │──▶│ Normalize  │──▶│  Chunk  │──▶│   Gateway      │
//! │ signature  │   │ extract+OCR│   │ budget  │   │ retry/fallback │
//! └───────────┘   └────────────┘   └─────────┘   └──────┬────────┘
//!                                                        │
//!                                                  ┌─────▼─────┐
//!                                                  │  Reduce    │
//!                                                  │ (ordered)  │
//!                                                  └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docflow detect report.pdf
//! docflow chunk report.pdf             # dry run: no provider calls
//! docflow analyze report.pdf --task summarize
//! docflow providers                    # credential/availability status
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`detect`] | Signature-based format detection |
//! | [`extract`] | Per-format extractors and the OCR engine |
//! | [`normalize`] | Extractor dispatch and OCR fallback splicing |
//! | [`chunk`] | Budget-bounded chunking |
//! | [`provider`] | Provider gateway and backends |
//! | [`analyze`] | Run orchestration and reduction |

pub mod analyze;
pub mod chunk;
pub mod config;
pub mod detect;
pub mod extract;
pub mod models;
pub mod normalize;
pub mod provider;
