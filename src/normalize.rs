//! Document normalization: extractor dispatch and OCR fallback.
//!
//! Turns one [`SourceDocument`] into an ordered [`NormalizedDocument`].
//! For PDFs the text layer runs first; pages flagged `needs-ocr` are then
//! recognized and spliced back in at their page ordinal. A missing or
//! failing OCR engine degrades the affected pages to zero-confidence
//! placeholder units instead of failing the document — only a document
//! yielding zero units of any kind is an error.

use thiserror::Error;
use tracing::warn;

use crate::config::OcrConfig;
use crate::extract::{self, ExtractError, OcrEngine, PdfPage};
use crate::models::{
    DocumentFormat, ExtractedUnit, ExtractionMethod, NormalizedDocument, SourceDocument,
};

/// Normalization failure. Both variants are fatal to the run and occur
/// before any provider dispatch.
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error(transparent)]
    Extract(#[from] ExtractError),

    /// Zero units of any kind could be produced. Distinct from extraction
    /// failure: the input decoded fine but holds nothing to analyze.
    #[error("no extractable content")]
    NoExtractableContent,
}

/// Normalize `source` into an ordered unit sequence.
pub fn normalize(
    source: &SourceDocument,
    ocr: Option<&dyn OcrEngine>,
    ocr_config: &OcrConfig,
) -> Result<NormalizedDocument, NormalizeError> {
    let units = match source.format {
        DocumentFormat::TextNative => native_units(source, extract::extract_text_native)?,
        DocumentFormat::Spreadsheet => native_units(source, extract::extract_spreadsheet)?,
        DocumentFormat::Pdf => {
            let pages = extract::extract_pdf_pages(&source.bytes, ocr_config.min_char_threshold)?;
            pdf_units(&source.id, &source.bytes, pages, ocr)
        }
        DocumentFormat::Image => vec![image_unit(source, ocr)],
    };

    if units.is_empty() {
        return Err(NormalizeError::NoExtractableContent);
    }

    Ok(assemble(&source.id, units, ocr_config))
}

fn native_units(
    source: &SourceDocument,
    extractor: fn(&[u8]) -> Result<Vec<String>, ExtractError>,
) -> Result<Vec<ExtractedUnit>, NormalizeError> {
    let blocks = extractor(&source.bytes)?;
    Ok(blocks
        .into_iter()
        .enumerate()
        .map(|(i, text)| ExtractedUnit {
            document_id: source.id.clone(),
            ordinal: i as u32 + 1,
            text,
            confidence: 1.0,
            method: ExtractionMethod::NativeText,
        })
        .collect())
}

/// Merge text-layer pages and OCR results into one gapless unit sequence,
/// page numbers as ordinals.
fn pdf_units(
    document_id: &str,
    pdf_bytes: &[u8],
    pages: Vec<PdfPage>,
    ocr: Option<&dyn OcrEngine>,
) -> Vec<ExtractedUnit> {
    pages
        .into_iter()
        .map(|page| match page {
            PdfPage::Text { number, text } => ExtractedUnit {
                document_id: document_id.to_string(),
                ordinal: number,
                text,
                confidence: 1.0,
                method: ExtractionMethod::PdfTextLayer,
            },
            PdfPage::NeedsOcr { number } => {
                ocr_page_unit(document_id, pdf_bytes, number, ocr)
            }
        })
        .collect()
}

fn ocr_page_unit(
    document_id: &str,
    pdf_bytes: &[u8],
    number: u32,
    ocr: Option<&dyn OcrEngine>,
) -> ExtractedUnit {
    let fallback = |text: String, confidence: f32, method: ExtractionMethod| ExtractedUnit {
        document_id: document_id.to_string(),
        ordinal: number,
        text,
        confidence,
        method,
    };

    let engine = match ocr {
        Some(engine) => engine,
        None => {
            warn!(document_id, page = number, "page needs OCR but no engine is configured");
            return fallback(String::new(), 0.0, ExtractionMethod::EmptyFallback);
        }
    };

    match engine.ocr_pdf_page(pdf_bytes, number) {
        Ok(out) if !out.text.trim().is_empty() => {
            fallback(out.text, out.confidence, ExtractionMethod::Ocr)
        }
        Ok(_) => fallback(String::new(), 0.0, ExtractionMethod::EmptyFallback),
        Err(e) => {
            warn!(document_id, page = number, error = %e, "OCR fallback failed for page");
            fallback(String::new(), 0.0, ExtractionMethod::EmptyFallback)
        }
    }
}

fn image_unit(source: &SourceDocument, ocr: Option<&dyn OcrEngine>) -> ExtractedUnit {
    let unit = |text: String, confidence: f32, method: ExtractionMethod| ExtractedUnit {
        document_id: source.id.clone(),
        ordinal: 1,
        text,
        confidence,
        method,
    };

    let engine = match ocr {
        Some(engine) => engine,
        None => {
            warn!(document_id = %source.id, "image input but no OCR engine is configured");
            return unit(String::new(), 0.0, ExtractionMethod::EmptyFallback);
        }
    };

    match engine.ocr_image(&source.bytes) {
        Ok(out) if !out.text.trim().is_empty() => {
            unit(out.text, out.confidence, ExtractionMethod::Ocr)
        }
        Ok(_) => unit(String::new(), 0.0, ExtractionMethod::EmptyFallback),
        Err(e) => {
            warn!(document_id = %source.id, error = %e, "image OCR failed");
            unit(String::new(), 0.0, ExtractionMethod::EmptyFallback)
        }
    }
}

fn assemble(
    document_id: &str,
    units: Vec<ExtractedUnit>,
    ocr_config: &OcrConfig,
) -> NormalizedDocument {
    let ocr_units = units
        .iter()
        .filter(|u| u.method == ExtractionMethod::Ocr)
        .count();
    let degraded_units = units
        .iter()
        .filter(|u| {
            u.method == ExtractionMethod::EmptyFallback
                || (u.method == ExtractionMethod::Ocr && u.confidence < ocr_config.min_confidence)
        })
        .count();
    let mean_confidence = if units.is_empty() {
        0.0
    } else {
        units.iter().map(|u| u.confidence).sum::<f32>() / units.len() as f32
    };

    NormalizedDocument {
        document_id: document_id.to_string(),
        units,
        ocr_units,
        degraded_units,
        mean_confidence,
    }
}
