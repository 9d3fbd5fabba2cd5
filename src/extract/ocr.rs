//! OCR engine abstraction and the Tesseract implementation.
//!
//! The pipeline treats OCR as an opaque capability: image bytes in, text
//! plus an engine-reported confidence out. A missing engine is a
//! configuration condition ([`OcrError::EngineUnavailable`]), not a pipeline
//! bug — the normalizer degrades instead of failing the document.
//!
//! Tesseract runs as a system binary; scanned PDF pages are rasterized with
//! `pdftoppm` before recognition.

use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;
use thiserror::Error;

/// Errors from OCR engines.
#[derive(Debug, Error)]
pub enum OcrError {
    /// The engine is not configured or its binary is missing.
    #[error("OCR engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("OCR failed: {0}")]
    Failed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of one recognition run.
#[derive(Debug, Clone)]
pub struct OcrOutput {
    pub text: String,
    /// Mean word confidence in `[0.0, 1.0]`.
    pub confidence: f32,
}

/// An optical character recognition capability.
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the engine can actually run (binaries installed, models
    /// present).
    fn is_available(&self) -> bool;

    /// What is needed to make this engine available.
    fn availability_hint(&self) -> String;

    /// Recognize text in a raster image.
    fn ocr_image(&self, image: &[u8]) -> Result<OcrOutput, OcrError>;

    /// Recognize text on one page of a PDF (1-based page number) by
    /// rasterizing it first.
    fn ocr_pdf_page(&self, pdf: &[u8], page: u32) -> Result<OcrOutput, OcrError> {
        let temp_dir = TempDir::new()?;
        let pdf_path = temp_dir.path().join("input.pdf");
        std::fs::write(&pdf_path, pdf)?;
        let image_path = render_pdf_page(&pdf_path, page, temp_dir.path())?;
        let image = std::fs::read(&image_path)?;
        self.ocr_image(&image)
    }
}

/// Rasterize one PDF page to PNG with `pdftoppm`, returning the produced
/// file path.
fn render_pdf_page(pdf_path: &Path, page: u32, out_dir: &Path) -> Result<PathBuf, OcrError> {
    if which::which("pdftoppm").is_err() {
        return Err(OcrError::EngineUnavailable(
            "pdftoppm not found (install poppler-utils)".to_string(),
        ));
    }

    let prefix = out_dir.join("page");
    let output = Command::new("pdftoppm")
        .args(["-f", &page.to_string(), "-l", &page.to_string()])
        .args(["-r", "300", "-png"])
        .arg(pdf_path)
        .arg(&prefix)
        .output()?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(OcrError::Failed(format!("pdftoppm failed: {}", stderr)));
    }

    // pdftoppm pads the page number in the output name; scan for the file.
    std::fs::read_dir(out_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .find(|path| path.extension().is_some_and(|ext| ext == "png"))
        .ok_or_else(|| OcrError::Failed("pdftoppm produced no page image".to_string()))
}

/// Tesseract OCR via the system binary, the traditional widely-available
/// option.
pub struct TesseractEngine {
    language: String,
}

impl TesseractEngine {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
        }
    }

    fn run_tesseract(&self, image_path: &Path) -> Result<OcrOutput, OcrError> {
        let output = Command::new("tesseract")
            .arg(image_path)
            .arg("stdout")
            .args(["-l", &self.language])
            .arg("tsv")
            .output();

        match output {
            Ok(output) => {
                if output.status.success() {
                    Ok(parse_tesseract_tsv(&String::from_utf8_lossy(
                        &output.stdout,
                    )))
                } else {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    Err(OcrError::Failed(format!("tesseract failed: {}", stderr)))
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(OcrError::EngineUnavailable(
                "tesseract not found (install tesseract-ocr)".to_string(),
            )),
            Err(e) => Err(OcrError::Io(e)),
        }
    }
}

impl Default for TesseractEngine {
    fn default() -> Self {
        Self::new("eng")
    }
}

impl OcrEngine for TesseractEngine {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn is_available(&self) -> bool {
        which::which("tesseract").is_ok()
    }

    fn availability_hint(&self) -> String {
        if which::which("tesseract").is_err() {
            "Tesseract not installed. Install with: apt install tesseract-ocr".to_string()
        } else if which::which("pdftoppm").is_err() {
            "pdftoppm not installed (needed for scanned PDFs). Install with: apt install poppler-utils"
                .to_string()
        } else {
            "Tesseract is available".to_string()
        }
    }

    fn ocr_image(&self, image: &[u8]) -> Result<OcrOutput, OcrError> {
        let temp_dir = TempDir::new()?;
        let image_path = temp_dir.path().join("input.png");
        std::fs::write(&image_path, image)?;
        self.run_tesseract(&image_path)
    }
}

/// Rebuild text and a mean word confidence from tesseract's TSV output.
/// Word rows are level 5; `conf` is -1 for non-word rows and 0–100 for
/// words.
fn parse_tesseract_tsv(tsv: &str) -> OcrOutput {
    let mut text = String::new();
    let mut confidences: Vec<f32> = Vec::new();
    let mut current_line: Option<(String, String, String)> = None;

    for row in tsv.lines().skip(1) {
        let cols: Vec<&str> = row.split('\t').collect();
        if cols.len() < 12 || cols[0] != "5" {
            continue;
        }
        let word = cols[11].trim();
        if word.is_empty() {
            continue;
        }
        if let Ok(conf) = cols[10].parse::<f32>() {
            if conf >= 0.0 {
                confidences.push(conf);
            }
        }

        let line_key = (
            cols[2].to_string(), // block
            cols[3].to_string(), // paragraph
            cols[4].to_string(), // line
        );
        match &current_line {
            Some(prev) if *prev == line_key => text.push(' '),
            Some(_) => text.push('\n'),
            None => {}
        }
        current_line = Some(line_key);
        text.push_str(word);
    }

    let confidence = if confidences.is_empty() {
        0.0
    } else {
        confidences.iter().sum::<f32>() / confidences.len() as f32 / 100.0
    };

    OcrOutput { text, confidence }
}
