//! Multi-format text extraction (plain text, PDF, OOXML).
//!
//! Sources supply bytes plus a format tag; this module returns plain UTF-8
//! text or a [`ExtractionOutcome::Failure`]. Nothing here panics, retries,
//! or logs: decode problems are reported to the caller as values.

use std::io::Read;
use std::panic::{self, AssertUnwindSafe};

/// Maximum sheets to process in an xlsx.
const XLSX_MAX_SHEETS: usize = 100;
/// Maximum cells to process per sheet (avoids unbounded memory).
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Closed set of formats the extractor knows how to decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentFormat {
    /// `.txt`
    PlainText,
    /// `.pdf`
    Pdf,
    /// `.docx` and `.doc`
    WordProcessing,
    /// `.pptx`
    Presentation,
    /// `.xlsx`
    Spreadsheet,
    /// Anything else; decoded as lossy UTF-8. Holds the tag as listed.
    Other(String),
}

impl DocumentFormat {
    pub fn from_tag(format_tag: &str) -> Self {
        match format_tag {
            ".txt" => DocumentFormat::PlainText,
            ".pdf" => DocumentFormat::Pdf,
            ".docx" | ".doc" => DocumentFormat::WordProcessing,
            ".pptx" => DocumentFormat::Presentation,
            ".xlsx" => DocumentFormat::Spreadsheet,
            other => DocumentFormat::Other(other.to_string()),
        }
    }
}

/// Result of decoding one file. Exactly one of text or a failure reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionOutcome {
    Text(String),
    Failure(String),
}

/// Extraction error, internal to this module.
#[derive(Debug)]
enum ExtractError {
    Pdf(String),
    Ooxml(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
            ExtractError::Ooxml(e) => write!(f, "OOXML extraction failed: {}", e),
        }
    }
}

impl std::error::Error for ExtractError {}

impl From<Result<String, ExtractError>> for ExtractionOutcome {
    fn from(result: Result<String, ExtractError>) -> Self {
        match result {
            Ok(text) => ExtractionOutcome::Text(text),
            Err(e) => ExtractionOutcome::Failure(e.to_string()),
        }
    }
}

/// Extracts plain text from `bytes` according to `format`.
pub fn extract(bytes: &[u8], format: &DocumentFormat) -> ExtractionOutcome {
    match format {
        DocumentFormat::PlainText | DocumentFormat::Other(_) => {
            ExtractionOutcome::Text(String::from_utf8_lossy(bytes).into_owned())
        }
        DocumentFormat::Pdf => extract_pdf(bytes).into(),
        DocumentFormat::WordProcessing => extract_docx(bytes).into(),
        DocumentFormat::Presentation => extract_pptx(bytes).into(),
        DocumentFormat::Spreadsheet => extract_xlsx(bytes).into(),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    // pdf-extract panics on some malformed inputs instead of returning Err.
    let pages = panic::catch_unwind(AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem_by_pages(bytes)
    }))
    .map_err(|payload| ExtractError::Pdf(panic_message(payload.as_ref())))?
    .map_err(|e| ExtractError::Pdf(e.to_string()))?;
    Ok(pages.join("\n"))
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("decoder panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("decoder panicked: {}", s)
    } else {
        "decoder panicked".to_string()
    }
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let doc_xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
    let paragraphs = extract_docx_paragraphs(&doc_xml)?;
    Ok(paragraphs.join("\n"))
}

/// Collects the text of every `w:p` in document order. Runs inside a
/// paragraph are concatenated; `w:tab` becomes a tab character.
fn extract_docx_paragraphs(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    use quick_xml::events::Event;

    let mut paragraphs = Vec::new();
    let mut current: Option<String> = None;
    let mut in_text = false;
    let mut reader = quick_xml::Reader::from_reader(xml);
    // Whitespace inside w:t is significant.
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"p" => current = Some(String::new()),
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"p" => paragraphs.push(String::new()),
                b"tab" => {
                    if let Some(p) = current.as_mut() {
                        p.push('\t');
                    }
                }
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                if let Some(p) = current.as_mut() {
                    p.push_str(te.unescape().unwrap_or_default().as_ref());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    if let Some(p) = current.take() {
                        paragraphs.push(p);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(paragraphs)
}

fn extract_pptx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let mut slides = Vec::new();
    for name in ordered_parts(&archive, "ppt/slides/", "slide") {
        let xml = read_zip_entry_bounded(&mut archive, &name, MAX_XML_ENTRY_BYTES)?;
        let lines = drawing_paragraphs(&xml)?;
        if !lines.is_empty() {
            slides.push(lines.join("\n"));
        }
    }
    Ok(slides.join("\n"))
}

/// Non-blank `a:p` paragraphs of a slide, runs concatenated.
fn drawing_paragraphs(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    use quick_xml::events::Event;

    let mut lines = Vec::new();
    let mut line = String::new();
    let mut in_text = false;
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                line.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let trimmed = line.trim();
                    if !trimmed.is_empty() {
                        lines.push(trimmed.to_string());
                    }
                    line.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(lines)
}

/// Spreadsheet text: one line per non-empty row, cells separated by tabs,
/// sheets in workbook order.
fn extract_xlsx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    // Workbooks with only numeric cells have no shared-strings part.
    let shared_strings = if archive.file_names().any(|n| n == "xl/sharedStrings.xml") {
        let xml = read_zip_entry_bounded(&mut archive, "xl/sharedStrings.xml", MAX_XML_ENTRY_BYTES)?;
        shared_string_table(&xml)?
    } else {
        Vec::new()
    };
    let mut sheets = Vec::new();
    for name in ordered_parts(&archive, "xl/worksheets/", "sheet")
        .into_iter()
        .take(XLSX_MAX_SHEETS)
    {
        let xml = read_zip_entry_bounded(&mut archive, &name, MAX_XML_ENTRY_BYTES)?;
        let rows = sheet_rows(&xml, &shared_strings)?;
        if !rows.is_empty() {
            sheets.push(rows.join("\n"));
        }
    }
    Ok(sheets.join("\n"))
}

/// Parts named `<dir><stem>N.xml`, ordered by `N`. Anything else in `dir`
/// (relationship folders, unnumbered parts) is ignored.
fn ordered_parts(
    archive: &zip::ZipArchive<std::io::Cursor<&[u8]>>,
    dir: &str,
    stem: &str,
) -> Vec<String> {
    let mut parts: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|name| {
            let n = name
                .strip_prefix(dir)?
                .strip_prefix(stem)?
                .strip_suffix(".xml")?
                .parse::<u32>()
                .ok()?;
            Some((n, name.to_string()))
        })
        .collect();
    parts.sort();
    parts.into_iter().map(|(_, name)| name).collect()
}

/// One entry per `si`. Rich-text runs are concatenated; phonetic hints
/// (`rPh`) are skipped so indices line up with what Excel displays.
fn shared_string_table(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    use quick_xml::events::Event;

    let mut table = Vec::new();
    let mut current: Option<String> = None;
    let mut in_text = false;
    let mut in_phonetic = false;
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"rPh" => in_phonetic = true,
                b"t" => in_text = !in_phonetic,
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"si" => table.push(String::new()),
            Ok(Event::Text(te)) if in_text => {
                if let Some(s) = current.as_mut() {
                    s.push_str(te.unescape().unwrap_or_default().as_ref());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"rPh" => in_phonetic = false,
                b"si" => table.extend(current.take()),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(table)
}

/// How a cell's `t` attribute says to read its content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CellKind {
    /// `t="s"`: `v` indexes the shared-string table.
    Shared,
    /// `t="inlineStr"`: text lives in `is/t`.
    Inline,
    /// `t="b"`: `v` is 0 or 1.
    Boolean,
    /// Numbers, dates, formula strings and errors: `v` as written.
    Literal,
}

impl CellKind {
    fn from_attr(value: Option<&[u8]>) -> Self {
        match value {
            Some(b"s") => CellKind::Shared,
            Some(b"inlineStr") => CellKind::Inline,
            Some(b"b") => CellKind::Boolean,
            _ => CellKind::Literal,
        }
    }

    fn render(self, raw: &str, shared_strings: &[String]) -> Option<String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        match self {
            CellKind::Shared => raw
                .parse::<usize>()
                .ok()
                .and_then(|i| shared_strings.get(i))
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            CellKind::Boolean => Some(if raw == "1" { "TRUE" } else { "FALSE" }.to_string()),
            CellKind::Inline | CellKind::Literal => Some(raw.to_string()),
        }
    }
}

/// Rows of one worksheet as tab-separated cell values. Stops after
/// `XLSX_MAX_CELLS_PER_SHEET` cells.
fn sheet_rows(xml: &[u8], shared_strings: &[String]) -> Result<Vec<String>, ExtractError> {
    use quick_xml::events::Event;

    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut kind = CellKind::Literal;
    let mut raw = String::new();
    let mut capturing = false;
    let mut cells_seen = 0usize;
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    while cells_seen < XLSX_MAX_CELLS_PER_SHEET {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"c" => {
                    let t = e
                        .attributes()
                        .flatten()
                        .find(|a| a.key.as_ref() == b"t")
                        .map(|a| a.value.into_owned());
                    kind = CellKind::from_attr(t.as_deref());
                    raw.clear();
                }
                b"v" => capturing = kind != CellKind::Inline,
                b"t" => capturing = kind == CellKind::Inline,
                _ => {}
            },
            Ok(Event::Text(te)) if capturing => {
                raw.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => capturing = false,
                b"c" => {
                    cells_seen += 1;
                    row.extend(kind.render(&raw, shared_strings));
                }
                b"row" => {
                    if !row.is_empty() {
                        rows.push(row.join("\t"));
                        row.clear();
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    if !row.is_empty() {
        rows.push(row.join("\t"));
    }
    Ok(rows)
}
