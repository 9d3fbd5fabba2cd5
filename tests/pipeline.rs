//! End-to-end pipeline tests: detection → normalization → chunking →
//! dispatch (stubbed providers) → reduction.
//!
//! Fixtures are built in memory: OOXML containers via the zip writer and a
//! minimal hand-assembled PDF, so no test depends on files on disk or on
//! network access.

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use docflow::analyze::AnalysisOrchestrator;
use docflow::chunk::chunk_units;
use docflow::config::{Config, OcrConfig};
use docflow::detect::detect_format;
use docflow::extract::{extract_pdf_pages, OcrEngine, OcrError, OcrOutput, PdfPage};
use docflow::models::{
    DocumentFormat, ExtractionMethod, RunStatus, SourceDocument, TaskDirective, TokenUsage,
};
use docflow::normalize::normalize;
use docflow::provider::{
    FailureKind, Provider, ProviderError, ProviderGateway, ProviderReply, ProviderRequest,
    RetryPolicy,
};

// ───────────────────────── fixtures ─────────────────────────

fn build_zip(entries: &[(&str, String)]) -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        for (name, content) in entries {
            writer
                .start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }
    buf
}

/// Minimal DOCX with one `w:p` per paragraph.
fn docx_with_paragraphs(paragraphs: &[&str]) -> Vec<u8> {
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p))
        .collect();
    let xml = format!(
        "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
        body
    );
    build_zip(&[("word/document.xml", xml)])
}

/// Minimal XLSX with one sheet of shared-string cells, one row per entry.
fn xlsx_with_rows(rows: &[&str]) -> Vec<u8> {
    let shared: String = rows
        .iter()
        .map(|r| format!("<si><t>{}</t></si>", r))
        .collect();
    let sheet_rows: String = (0..rows.len())
        .map(|i| format!("<row><c t=\"s\"><v>{}</v></c></row>", i))
        .collect();
    build_zip(&[
        ("xl/workbook.xml", "<workbook/>".to_string()),
        (
            "xl/sharedStrings.xml",
            format!("<?xml version=\"1.0\"?><sst>{}</sst>", shared),
        ),
        (
            "xl/worksheets/sheet1.xml",
            format!(
                "<?xml version=\"1.0\"?><worksheet><sheetData>{}</sheetData></worksheet>",
                sheet_rows
            ),
        ),
    ])
}

/// Minimal valid single-page PDF carrying `phrase` in its content stream.
/// Builds the body then an xref table with correct byte offsets.
fn minimal_pdf_with_phrase(phrase: &str) -> Vec<u8> {
    let stream = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET\n", phrase);
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    out.extend_from_slice(
        format!(
            "4 0 obj << /Length {} >> stream\n{}endstream endobj\n",
            stream.len(),
            stream
        )
        .as_bytes(),
    );
    let o5 = out.len();
    out.extend_from_slice(b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n");
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in [o1, o2, o3, o4, o5] {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

/// Multi-page PDF built with lopdf; `None` entries become pages without a
/// text layer (the scanned-page case).
fn pdf_with_pages(pages: &[Option<&str>]) -> Vec<u8> {
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream};

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::new();
    for text in pages {
        let operations = match text {
            Some(text) => vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 24.into()]),
                Operation::new("Td", vec![100.into(), 600.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ],
            None => vec![],
        };
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().unwrap(),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}

// ───────────────────────── stub providers ─────────────────────────

#[derive(Clone)]
struct StubProvider {
    name: &'static str,
    fail_kind: Option<FailureKind>,
    fail_chunk_ids: Vec<String>,
    calls: Arc<AtomicUsize>,
}

impl StubProvider {
    fn ok(name: &'static str) -> Self {
        Self {
            name,
            fail_kind: None,
            fail_chunk_ids: Vec::new(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn failing(name: &'static str, kind: FailureKind) -> Self {
        Self {
            name,
            fail_kind: Some(kind),
            fail_chunk_ids: Vec::new(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fails only the listed chunk ids with the given classification.
    fn failing_chunks(
        name: &'static str,
        kind: FailureKind,
        chunk_ids: &[&str],
    ) -> Self {
        Self {
            name,
            fail_kind: Some(kind),
            fail_chunk_ids: chunk_ids.iter().map(|s| s.to_string()).collect(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl Provider for StubProvider {
    fn name(&self) -> &str {
        self.name
    }
    fn model(&self) -> &str {
        "stub-model"
    }
    async fn generate(&self, request: &ProviderRequest) -> Result<ProviderReply, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let fails = match self.fail_kind {
            Some(_) => {
                self.fail_chunk_ids.is_empty() || self.fail_chunk_ids.contains(&request.chunk_id)
            }
            None => false,
        };
        if fails {
            return Err(ProviderError::new(
                self.fail_kind.unwrap(),
                "scripted failure",
            ));
        }
        Ok(ProviderReply {
            text: format!("analyzed {}", request.chunk_id),
            usage: TokenUsage {
                prompt_tokens: 7,
                completion_tokens: 3,
            },
        })
    }
}

fn orchestrator(
    primary: StubProvider,
    secondary: Option<StubProvider>,
    size_budget: usize,
) -> AnalysisOrchestrator {
    let mut config = Config::default();
    config.chunking.size_budget_tokens = size_budget;
    let gateway = ProviderGateway::new(
        Box::new(primary),
        secondary.map(|s| Box::new(s) as Box<dyn Provider>),
        RetryPolicy {
            max_retries: 1,
            base_delay_ms: 0,
        },
    );
    AnalysisOrchestrator::new(config, gateway, None)
}

// ───────────────────────── detection ─────────────────────────

#[test]
fn detection_covers_all_fixture_formats() {
    let docx = docx_with_paragraphs(&["hello"]);
    let xlsx = xlsx_with_rows(&["cell"]);
    let pdf = minimal_pdf_with_phrase("pdf phrase");

    assert_eq!(
        detect_format(&docx, Some("report.docx")).unwrap(),
        DocumentFormat::TextNative
    );
    assert_eq!(
        detect_format(&xlsx, Some("sheet.xlsx")).unwrap(),
        DocumentFormat::Spreadsheet
    );
    assert_eq!(
        detect_format(&pdf, Some("scan.pdf")).unwrap(),
        DocumentFormat::Pdf
    );
    assert_eq!(
        detect_format(b"plain,csv\nrow,two\n", Some("data.csv")).unwrap(),
        DocumentFormat::TextNative
    );
}

// ───────────────────────── normalization + chunking ─────────────────────────

#[test]
fn docx_normalizes_and_round_trips_through_chunker() {
    let bytes = docx_with_paragraphs(&[
        "First paragraph about quality.",
        "Second paragraph about returns.",
        "Third paragraph about defects.",
    ]);
    let source = SourceDocument::new("doc1", DocumentFormat::TextNative, bytes);
    let doc = normalize(&source, None, &OcrConfig::default()).unwrap();

    assert_eq!(doc.total_units(), 3);
    assert_eq!(doc.mean_confidence, 1.0);

    let chunks = chunk_units(&doc, 12);
    assert!(chunks.len() > 1);
    let rejoined = chunks
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    assert_eq!(rejoined, doc.joined_text());
}

#[test]
fn xlsx_normalizes_into_row_blocks() {
    let bytes = xlsx_with_rows(&["SKU-1 defective", "SKU-2 wrong size"]);
    let source = SourceDocument::new("sheet1", DocumentFormat::Spreadsheet, bytes);
    let doc = normalize(&source, None, &OcrConfig::default()).unwrap();

    assert_eq!(doc.total_units(), 1);
    assert!(doc.units[0].text.contains("SKU-1 defective"));
    assert!(doc.units[0].text.contains("SKU-2 wrong size"));
}

struct StubOcr;

impl OcrEngine for StubOcr {
    fn name(&self) -> &str {
        "stub-ocr"
    }
    fn is_available(&self) -> bool {
        true
    }
    fn availability_hint(&self) -> String {
        "stub".to_string()
    }
    fn ocr_image(&self, _image: &[u8]) -> Result<OcrOutput, OcrError> {
        Ok(OcrOutput {
            text: "recognized scanned content".to_string(),
            confidence: 0.75,
        })
    }
    fn ocr_pdf_page(&self, _pdf: &[u8], _page: u32) -> Result<OcrOutput, OcrError> {
        self.ocr_image(&[])
    }
}

#[test]
fn pdf_text_layer_extracts_per_page_in_order() {
    let bytes = pdf_with_pages(&[
        Some("This is the first page of the fixture document."),
        None,
        Some("This is the third page of the fixture document."),
    ]);
    let pages = extract_pdf_pages(&bytes, OcrConfig::default().min_char_threshold).unwrap();

    assert_eq!(pages.len(), 3);
    match &pages[0] {
        PdfPage::Text { number, text } => {
            assert_eq!(*number, 1);
            assert!(text.contains("first page"), "got: {}", text);
        }
        other => panic!("expected text page, got {:?}", other),
    }
    assert_eq!(pages[1], PdfPage::NeedsOcr { number: 2 });
    match &pages[2] {
        PdfPage::Text { number, text } => {
            assert_eq!(*number, 3);
            assert!(text.contains("third page"), "got: {}", text);
        }
        other => panic!("expected text page, got {:?}", other),
    }
}

#[test]
fn scanned_pdf_page_is_recovered_by_ocr_and_spliced() {
    let bytes = pdf_with_pages(&[
        Some("This is the first page of the fixture document."),
        None,
        Some("This is the third page of the fixture document."),
    ]);
    let source = SourceDocument::new("pdf1", DocumentFormat::Pdf, bytes);
    let doc = normalize(&source, Some(&StubOcr), &OcrConfig::default()).unwrap();

    assert_eq!(doc.total_units(), 3);
    assert_eq!(doc.units[1].ordinal, 2);
    assert_eq!(doc.units[1].method, ExtractionMethod::Ocr);
    assert_eq!(doc.units[1].text, "recognized scanned content");
    assert_eq!(doc.ocr_units, 1);
    assert!(doc.mean_confidence < 1.0);
    assert!(doc.degraded());
}

#[test]
fn scanned_pdf_page_degrades_without_ocr_engine() {
    let bytes = pdf_with_pages(&[
        Some("This is the first page of the fixture document."),
        None,
    ]);
    let source = SourceDocument::new("pdf1", DocumentFormat::Pdf, bytes);
    let doc = normalize(&source, None, &OcrConfig::default()).unwrap();

    assert_eq!(doc.total_units(), 2);
    assert_eq!(doc.units[1].method, ExtractionMethod::EmptyFallback);
    assert_eq!(doc.units[1].confidence, 0.0);
    assert!(doc.degraded());
}

#[test]
fn minimal_pdf_normalizes_with_page_ordinals() {
    let bytes = minimal_pdf_with_phrase("quality report phrase");
    let source = SourceDocument::new("pdf1", DocumentFormat::Pdf, bytes);
    // No OCR engine configured: an empty text layer degrades, it never
    // fails the document.
    let doc = normalize(&source, None, &OcrConfig::default()).unwrap();

    assert_eq!(doc.total_units(), 1);
    assert_eq!(doc.units[0].ordinal, 1);
}

// ───────────────────────── full pipeline ─────────────────────────

#[tokio::test]
async fn docx_end_to_end_completes_in_order() {
    let primary = StubProvider::ok("primary");
    let orchestrator = orchestrator(primary.clone(), None, 12);

    let bytes = docx_with_paragraphs(&[
        "First paragraph about quality.",
        "Second paragraph about returns.",
        "Third paragraph about defects.",
    ]);
    let result = orchestrator
        .analyze_bytes("doc1", bytes, Some("report.docx"), TaskDirective::Summarize)
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Complete);
    assert!(result.chunks.len() > 1);
    assert_eq!(primary.calls.load(Ordering::SeqCst), result.chunks.len());
    for (i, outcome) in result.chunks.iter().enumerate() {
        assert_eq!(outcome.sequence, i as u32);
        assert_eq!(outcome.provider.as_deref(), Some("primary"));
        assert_eq!(
            outcome.output_text.as_deref().unwrap(),
            format!("analyzed {}", outcome.chunk_id)
        );
    }
    assert_eq!(
        result.usage.total(),
        result.chunks.len() as u64 * 10
    );
}

#[tokio::test]
async fn csv_end_to_end_with_categorize_task() {
    let primary = StubProvider::ok("primary");
    let orchestrator = orchestrator(primary, None, 700);

    let csv = "sku,quantity,reason\nABC1234,2,defective\nXYZ9876,1,too small\n";
    let result = orchestrator
        .analyze_bytes(
            "returns",
            csv.as_bytes().to_vec(),
            Some("returns.csv"),
            TaskDirective::Categorize,
        )
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Complete);
    assert_eq!(result.chunks.len(), 1);
    assert!(!result.degraded);
}

#[tokio::test]
async fn fatal_auth_on_primary_is_rescued_by_secondary() {
    let primary = StubProvider::failing("primary", FailureKind::FatalAuth);
    let secondary = StubProvider::ok("secondary");
    let orchestrator = orchestrator(primary.clone(), Some(secondary.clone()), 700);

    let bytes = docx_with_paragraphs(&["Body paragraph for fallback test."]);
    let result = orchestrator
        .analyze_bytes("doc1", bytes, Some("doc.docx"), TaskDirective::Summarize)
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Complete);
    assert_eq!(result.chunks[0].provider.as_deref(), Some("secondary"));
    // Fatal classification skips retries: one primary call, one fallback.
    assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
    assert_eq!(secondary.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn single_chunk_auth_failure_rescued_by_secondary_keeps_run_complete() {
    // Primary rejects only the middle chunk; the secondary picks it up, so
    // the run stays complete with mixed provider attribution.
    let primary =
        StubProvider::failing_chunks("primary", FailureKind::FatalAuth, &["doc1-c0001"]);
    let secondary = StubProvider::ok("secondary");
    let orchestrator = orchestrator(primary, Some(secondary), 12);

    let bytes = docx_with_paragraphs(&[
        "First paragraph about quality.",
        "Second paragraph about returns.",
        "Third paragraph about defects.",
    ]);
    let result = orchestrator
        .analyze_bytes("doc1", bytes, Some("doc.docx"), TaskDirective::Summarize)
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Complete);
    assert_eq!(result.chunks.len(), 3);
    assert_eq!(result.chunks[0].provider.as_deref(), Some("primary"));
    assert_eq!(result.chunks[1].provider.as_deref(), Some("secondary"));
    assert_eq!(result.chunks[2].provider.as_deref(), Some("primary"));
}

#[tokio::test]
async fn both_providers_failing_fails_the_run_with_no_output() {
    let primary = StubProvider::failing("primary", FailureKind::RetryableTransient);
    let secondary = StubProvider::failing("secondary", FailureKind::FatalUnavailable);
    let orchestrator = orchestrator(primary, Some(secondary), 700);

    let bytes = docx_with_paragraphs(&["Body paragraph for failure test."]);
    let result = orchestrator
        .analyze_bytes("doc1", bytes, Some("doc.docx"), TaskDirective::Summarize)
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Failed);
    assert!(result.failure_reason.is_some());
    assert!(result.chunks.iter().all(|c| c.output_text.is_none()));
    assert_eq!(result.usage.total(), 0);
}

#[tokio::test]
async fn unsupported_format_fails_before_any_dispatch() {
    let primary = StubProvider::ok("primary");
    let orchestrator = orchestrator(primary.clone(), None, 700);

    // A PNG signature with no OCR engine configured detects as image; a
    // truly unknown signature must fail before dispatch.
    let bytes = vec![0x7f, b'E', b'L', b'F', 2, 1, 1, 0];
    let err = orchestrator
        .analyze_bytes("bin1", bytes, Some("binary.elf"), TaskDirective::Summarize)
        .await;

    assert!(err.is_err());
    assert_eq!(primary.calls.load(Ordering::SeqCst), 0);
}
