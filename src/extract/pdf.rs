//! PDF text-layer extraction with per-page boundaries.
//!
//! Pages whose embedded text layer is empty or under the configured
//! character threshold are flagged for OCR rather than silently emitted as
//! blank units; the normalizer decides what to do with flagged pages.

use super::ExtractError;

/// Outcome of text-layer extraction for a single page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PdfPage {
    /// The text layer produced usable text.
    Text { number: u32, text: String },
    /// Empty or sub-threshold text layer; OCR fallback candidate.
    NeedsOcr { number: u32 },
}

impl PdfPage {
    pub fn number(&self) -> u32 {
        match self {
            PdfPage::Text { number, .. } | PdfPage::NeedsOcr { number } => *number,
        }
    }
}

/// Extract the text layer of every page, in page order. Pages with fewer
/// than `min_char_threshold` characters of text come back as
/// [`PdfPage::NeedsOcr`].
pub fn extract_pdf_pages(
    bytes: &[u8],
    min_char_threshold: usize,
) -> Result<Vec<PdfPage>, ExtractError> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| ExtractError::CorruptInput(format!("PDF extraction failed: {}", e)))?;

    Ok(pages
        .into_iter()
        .enumerate()
        .map(|(idx, raw)| {
            let number = idx as u32 + 1;
            let text = raw.trim().to_string();
            if text.chars().count() < min_char_threshold {
                PdfPage::NeedsOcr { number }
            } else {
                PdfPage::Text { number, text }
            }
        })
        .collect())
}
