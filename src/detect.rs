//! Signature-based format detection.
//!
//! Classifies raw bytes into the closed [`DocumentFormat`] set before any
//! extractor runs. Detection is a pure function of the byte signature; a
//! caller-declared name hint only disambiguates formats that have no magic
//! bytes (plain text, CSV) and is never trusted over a conflicting
//! signature.

use std::io::Cursor;

use thiserror::Error;

use crate::models::DocumentFormat;

/// Detection failure. Both variants are fatal to a run and occur before any
/// extraction or provider dispatch.
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("corrupt input: {0}")]
    CorruptInput(String),
}

/// Image MIME types the OCR adapter can consume.
const IMAGE_MIMES: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/tiff",
    "image/bmp",
    "image/webp",
];

/// Extensions routed to the text-native adapter when the bytes carry no
/// magic signature.
const TEXT_EXTENSIONS: &[&str] = &["txt", "csv", "tsv", "md", "log"];

/// Detect the format of `bytes`. `name_hint` is an optional declared file
/// name whose extension is consulted only for signatureless text formats.
pub fn detect_format(bytes: &[u8], name_hint: Option<&str>) -> Result<DocumentFormat, DetectError> {
    if bytes.is_empty() {
        return Err(DetectError::CorruptInput("empty input".to_string()));
    }

    if let Some(kind) = infer::get(bytes) {
        return match kind.mime_type() {
            "application/pdf" => Ok(DocumentFormat::Pdf),
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
                Ok(DocumentFormat::TextNative)
            }
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => {
                Ok(DocumentFormat::Spreadsheet)
            }
            mime if IMAGE_MIMES.contains(&mime) => Ok(DocumentFormat::Image),
            "application/zip" => classify_zip(bytes),
            other => Err(DetectError::UnsupportedFormat(other.to_string())),
        };
    }

    // No signature: plain text is the only remaining candidate.
    if std::str::from_utf8(bytes).is_ok() {
        let hinted_text = name_hint
            .and_then(extension_of)
            .map(|ext| TEXT_EXTENSIONS.contains(&ext.as_str()))
            // Unnamed UTF-8 input is treated as plain text.
            .unwrap_or(true);
        if hinted_text {
            return Ok(DocumentFormat::TextNative);
        }
    }

    Err(DetectError::UnsupportedFormat(
        "no recognizable signature".to_string(),
    ))
}

/// A generic ZIP container is an OOXML document only if it carries the
/// marker entry for one of the families we extract.
fn classify_zip(bytes: &[u8]) -> Result<DocumentFormat, DetectError> {
    let archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| DetectError::CorruptInput(format!("unreadable ZIP container: {}", e)))?;

    let names: Vec<&str> = archive.file_names().collect();
    if names.contains(&"word/document.xml") {
        Ok(DocumentFormat::TextNative)
    } else if names.contains(&"xl/workbook.xml") {
        Ok(DocumentFormat::Spreadsheet)
    } else {
        Err(DetectError::UnsupportedFormat(
            "ZIP container is not a known OOXML document".to_string(),
        ))
    }
}

fn extension_of(name: &str) -> Option<String> {
    std::path::Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
}
