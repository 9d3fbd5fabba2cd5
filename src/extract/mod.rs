//! Per-format text extraction.
//!
//! One adapter per [`DocumentFormat`](crate::models::DocumentFormat) family:
//! OOXML (DOCX paragraphs, XLSX row blocks), plain/delimited text, PDF text
//! layer with per-page `needs-ocr` flagging, and OCR for images and scanned
//! pages. Adapters read the given bytes and nothing else — no network, no
//! provider calls. OCR fallback decisions belong to the normalizer, not to
//! the adapters.

pub mod ocr;
mod ooxml;
mod pdf;
mod text;

pub use ocr::{OcrEngine, OcrError, OcrOutput, TesseractEngine};
pub use pdf::{extract_pdf_pages, PdfPage};

use thiserror::Error;

/// Extraction failure. Fatal to the whole run: an input that cannot be
/// decoded is rejected before any provider dispatch.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("corrupt input: {0}")]
    CorruptInput(String),
}

/// Extract native-text blocks: DOCX paragraphs when the bytes are an OOXML
/// container, paragraph/row blocks otherwise.
pub fn extract_text_native(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    if bytes.starts_with(b"PK") {
        ooxml::extract_docx_paragraphs(bytes)
    } else {
        text::extract_text_blocks(bytes)
    }
}

/// Extract spreadsheet row blocks from an XLSX workbook, sheets in order.
pub fn extract_spreadsheet(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    ooxml::extract_xlsx_row_blocks(bytes)
}
