//! OOXML extraction: DOCX paragraphs and XLSX sheet rows.
//!
//! Both formats are ZIP containers holding XML parts. Entry reads are
//! bounded so a crafted archive cannot expand without limit.

use std::io::Read;

use super::ExtractError;

/// Maximum sheets to process in an xlsx workbook.
const XLSX_MAX_SHEETS: usize = 100;
/// Maximum cells to process per sheet (avoids unbounded memory).
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb
/// protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
/// Consecutive sheet rows grouped into one extracted unit.
const ROWS_PER_BLOCK: usize = 50;

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, ExtractError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::CorruptInput(format!("unreadable OOXML container: {}", e)))
}

fn read_zip_entry_bounded(
    archive: &mut Archive<'_>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::CorruptInput(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::CorruptInput(format!("{}: {}", name, e)))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::CorruptInput(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

/// Extract one block per non-empty paragraph (`w:p`) from a DOCX body,
/// joining the text runs (`w:t`) inside each paragraph.
pub fn extract_docx_paragraphs(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut archive = open_archive(bytes)?;
    if !archive.file_names().any(|n| n == "word/document.xml") {
        return Err(ExtractError::CorruptInput(
            "word/document.xml not found".to_string(),
        ));
    }
    let doc_xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;

    let mut paragraphs = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(doc_xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut current = String::new();
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => match e.local_name().as_ref() {
                b"p" => current.clear(),
                b"t" => in_t = true,
                _ => {}
            },
            Ok(quick_xml::events::Event::Text(te)) if in_t => {
                current.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"p" => {
                    let trimmed = current.trim();
                    if !trimmed.is_empty() {
                        paragraphs.push(trimmed.to_string());
                    }
                    current.clear();
                }
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::CorruptInput(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(paragraphs)
}

/// Extract row blocks from every worksheet, sheets in numeric order. Rows
/// render as tab-separated cell values; [`ROWS_PER_BLOCK`] consecutive rows
/// form one block.
pub fn extract_xlsx_row_blocks(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let shared_strings = read_shared_strings(&mut archive)?;
    let sheet_names = list_worksheet_names(&archive);

    let mut blocks = Vec::new();
    for name in sheet_names.into_iter().take(XLSX_MAX_SHEETS) {
        let sheet_xml = read_zip_entry_bounded(&mut archive, &name, MAX_XML_ENTRY_BYTES)?;
        let rows = extract_sheet_rows(&sheet_xml, &shared_strings)?;
        for group in rows.chunks(ROWS_PER_BLOCK) {
            let block = group.join("\n");
            if !block.trim().is_empty() {
                blocks.push(block);
            }
        }
    }
    Ok(blocks)
}

/// Shared-strings table, one entry per `si` (rich-text runs concatenated).
/// Workbooks without shared strings (numeric-only) yield an empty table.
fn read_shared_strings(archive: &mut Archive<'_>) -> Result<Vec<String>, ExtractError> {
    if !archive.file_names().any(|n| n == "xl/sharedStrings.xml") {
        return Ok(Vec::new());
    }
    let xml = read_zip_entry_bounded(archive, "xl/sharedStrings.xml", MAX_XML_ENTRY_BYTES)?;

    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_si = false;
    let mut in_t = false;
    let mut current = String::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => {
                    in_si = true;
                    current.clear();
                }
                b"t" if in_si => in_t = true,
                _ => {}
            },
            Ok(quick_xml::events::Event::Text(te)) if in_t => {
                current.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"si" => {
                    in_si = false;
                    strings.push(std::mem::take(&mut current));
                }
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::CorruptInput(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

fn list_worksheet_names(archive: &Archive<'_>) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches("xl/worksheets/sheet")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

/// One rendered line per sheet row. Shared-string cells resolve through the
/// table; inline and numeric cells pass their value through.
fn extract_sheet_rows(xml: &[u8], shared_strings: &[String]) -> Result<Vec<String>, ExtractError> {
    let mut rows: Vec<String> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut cells: Vec<String> = Vec::new();
    let mut in_v = false;
    let mut cell_is_shared_str = false;
    let mut cell_count = 0usize;
    loop {
        if cell_count >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => cells.clear(),
                b"c" => {
                    cell_is_shared_str = e.attributes().any(|a| {
                        a.as_ref()
                            .map(|a| a.key.as_ref() == b"t" && a.value.as_ref() == b"s")
                            .unwrap_or(false)
                    });
                }
                b"v" => in_v = true,
                _ => {}
            },
            Ok(quick_xml::events::Event::Text(te)) if in_v => {
                let v = te.unescape().unwrap_or_default();
                let s = v.trim();
                if !s.is_empty() {
                    let resolved = if cell_is_shared_str {
                        s.parse::<usize>()
                            .ok()
                            .and_then(|i| shared_strings.get(i))
                            .cloned()
                    } else {
                        Some(s.to_string())
                    };
                    if let Some(value) = resolved {
                        cells.push(value);
                        cell_count += 1;
                    }
                }
                in_v = false;
            }
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"v" => in_v = false,
                b"c" => cell_is_shared_str = false,
                b"row" => {
                    if !cells.is_empty() {
                        rows.push(cells.join("\t"));
                        cells.clear();
                    }
                }
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::CorruptInput(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(rows)
}
