//! Plain and delimited text extraction.
//!
//! Prose splits on blank lines into paragraphs; delimited exports (CSV/TSV,
//! tab-separated marketplace reports) group data rows into fixed-size blocks
//! so one malformed row never hides a whole file.

use super::ExtractError;

/// Consecutive delimited rows grouped into one extracted unit.
const ROWS_PER_BLOCK: usize = 50;

/// Split UTF-8 text into extraction blocks.
pub fn extract_text_blocks(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| ExtractError::CorruptInput(format!("invalid UTF-8: {}", e)))?;

    let blocks = if looks_delimited(text) {
        delimited_blocks(text)
    } else {
        paragraph_blocks(text)
    };
    Ok(blocks)
}

/// A file is treated as delimited when its first data line carries a comma
/// or tab and at least two lines share that shape.
fn looks_delimited(text: &str) -> bool {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let (first, second) = match (lines.next(), lines.next()) {
        (Some(a), Some(b)) => (a, b),
        _ => return false,
    };
    for sep in ['\t', ','] {
        let n = first.matches(sep).count();
        if n > 0 && second.matches(sep).count() == n {
            return true;
        }
    }
    false
}

fn paragraph_blocks(text: &str) -> Vec<String> {
    text.split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

fn delimited_blocks(text: &str) -> Vec<String> {
    let rows: Vec<&str> = text
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.trim().is_empty())
        .collect();
    rows.chunks(ROWS_PER_BLOCK)
        .map(|group| group.join("\n"))
        .collect()
}
