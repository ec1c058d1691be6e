//! Report serialization.
//!
//! Two sinks are built in:
//!
//! | Destination extension | Sink |
//! |-----------------------|------|
//! | `.json` | [`JsonSink`]: pretty-printed JSON for scripts |
//! | anything else | [`XlsxSink`]: an Excel workbook |
//!
//! The workbook is written as SpreadsheetML parts inside a ZIP container
//! (`zip` + `quick-xml`), the same OOXML layout the extractor reads. It has a
//! "File Analysis" sheet and, only when the run produced errors, an "Errors"
//! sheet.
//!
//! Every sink renders the whole artifact in memory and then writes it to a
//! temporary file next to the destination before renaming it into place, so
//! an interrupted or failed write never leaves a half-written report behind.

use anyhow::{Context, Result};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::models::ProcessingError;
use crate::report::{Report, ReportRow, RunMetadata, TIMESTAMP_FORMAT};

/// Writes a [`Report`] to a destination.
pub trait ReportSink {
    /// Short name for logs (`"xlsx"`, `"json"`).
    fn name(&self) -> &str;

    /// Serialize the whole report.
    fn render(&self, report: &Report) -> Result<Vec<u8>>;

    /// Render and write atomically to `destination`.
    fn write(&self, report: &Report, destination: &Path) -> Result<()> {
        let bytes = self.render(report)?;
        write_atomically(destination, &bytes)
    }
}

/// Pick a sink from the destination's extension.
pub fn sink_for_path(destination: &Path) -> Box<dyn ReportSink> {
    let is_json = destination
        .extension()
        .map(|e| e.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if is_json {
        Box::new(JsonSink)
    } else {
        Box::new(XlsxSink)
    }
}

/// Serialize `report` to `destination` with the sink matching its extension.
pub fn save_report(report: &Report, destination: &Path) -> Result<()> {
    let sink = sink_for_path(destination);
    sink.write(report, destination)
        .with_context(|| format!("Failed to save {} report to {}", sink.name(), destination.display()))?;
    tracing::info!(
        path = %destination.display(),
        sink = sink.name(),
        files = report.total_files(),
        errors = report.errors.len(),
        "report saved"
    );
    Ok(())
}

fn write_atomically(destination: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = destination.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
    }
    let tmp = temp_path_for(destination);
    std::fs::write(&tmp, bytes)
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    if let Err(e) = std::fs::rename(&tmp, destination) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e).with_context(|| format!("Failed to move report into {}", destination.display()));
    }
    Ok(())
}

fn temp_path_for(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "report".to_string());
    destination.with_file_name(format!(".{}.tmp", name))
}

// ============ JSON ============

pub struct JsonSink;

#[derive(Serialize)]
struct JsonReport<'a> {
    metadata: &'a RunMetadata,
    total_files: usize,
    files: Vec<ReportRow<'a>>,
    #[serde(skip_serializing_if = "no_errors")]
    errors: &'a [ProcessingError],
}

fn no_errors(errors: &&[ProcessingError]) -> bool {
    errors.is_empty()
}

impl ReportSink for JsonSink {
    fn name(&self) -> &str {
        "json"
    }

    fn render(&self, report: &Report) -> Result<Vec<u8>> {
        let data = JsonReport {
            metadata: &report.metadata,
            total_files: report.total_files(),
            files: report.rows().collect(),
            errors: &report.errors,
        };
        let mut json = serde_json::to_vec_pretty(&data)?;
        json.push(b'\n');
        Ok(json)
    }
}

// ============ XLSX ============

pub struct XlsxSink;

pub const ANALYSIS_SHEET: &str = "File Analysis";
pub const ERRORS_SHEET: &str = "Errors";

/// Excel refuses cells longer than this.
const MAX_CELL_CHARS: usize = 32_767;

// Indices into `cellXfs` in STYLES_XML.
const STYLE_TITLE: &str = "1";
const STYLE_HEADER: &str = "2";
const STYLE_WRAP: &str = "3";
const STYLE_ERROR_HEADER: &str = "4";
const STYLE_SUBTITLE: &str = "5";

const ANALYSIS_HEADERS: [&str; 6] = [
    "#",
    "Filename",
    "Title",
    "Summary",
    "File Size (KB)",
    "Last Modified",
];
const ANALYSIS_WIDTHS: [f64; 6] = [5.0, 30.0, 35.0, 60.0, 15.0, 20.0];
const ANALYSIS_HEADER_ROW: u32 = 8;
const ANALYSIS_ROW_HEIGHT: &str = "60";

const ERROR_HEADERS: [&str; 3] = ["Filename", "Error Type", "Error Message"];
const ERROR_WIDTHS: [f64; 3] = [30.0, 25.0, 60.0];
const ERROR_HEADER_ROW: u32 = 3;

const STYLES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><fonts count="4"><font><sz val="11"/><name val="Calibri"/></font><font><b/><sz val="16"/><name val="Calibri"/></font><font><b/><sz val="11"/><color rgb="FFFFFFFF"/><name val="Calibri"/></font><font><b/><sz val="14"/><name val="Calibri"/></font></fonts><fills count="4"><fill><patternFill patternType="none"/></fill><fill><patternFill patternType="gray125"/></fill><fill><patternFill patternType="solid"><fgColor rgb="FF366092"/><bgColor indexed="64"/></patternFill></fill><fill><patternFill patternType="solid"><fgColor rgb="FFC00000"/><bgColor indexed="64"/></patternFill></fill></fills><borders count="1"><border><left/><right/><top/><bottom/><diagonal/></border></borders><cellStyleXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0"/></cellStyleXfs><cellXfs count="6"><xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/><xf numFmtId="0" fontId="1" fillId="0" borderId="0" xfId="0" applyFont="1"/><xf numFmtId="0" fontId="2" fillId="2" borderId="0" xfId="0" applyFont="1" applyFill="1" applyAlignment="1"><alignment horizontal="center" vertical="center"/></xf><xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0" applyAlignment="1"><alignment vertical="top" wrapText="1"/></xf><xf numFmtId="0" fontId="2" fillId="3" borderId="0" xfId="0" applyFont="1" applyFill="1"/><xf numFmtId="0" fontId="3" fillId="0" borderId="0" xfId="0" applyFont="1"/></cellXfs><cellStyles count="1"><cellStyle name="Normal" xfId="0" builtinId="0"/></cellStyles></styleSheet>"#;

const ROOT_RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

impl ReportSink for XlsxSink {
    fn name(&self) -> &str {
        "xlsx"
    }

    fn render(&self, report: &Report) -> Result<Vec<u8>> {
        let mut sheets = vec![(ANALYSIS_SHEET, analysis_sheet_xml(report)?)];
        if report.has_error_table() {
            sheets.push((ERRORS_SHEET, errors_sheet_xml(&report.errors)?));
        }
        let names: Vec<&str> = sheets.iter().map(|(name, _)| *name).collect();

        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));

        let mut parts: Vec<(String, Vec<u8>)> = vec![
            ("[Content_Types].xml".to_string(), content_types_xml(names.len()).into_bytes()),
            ("_rels/.rels".to_string(), ROOT_RELS_XML.as_bytes().to_vec()),
            ("xl/workbook.xml".to_string(), workbook_xml(&names).into_bytes()),
            (
                "xl/_rels/workbook.xml.rels".to_string(),
                workbook_rels_xml(names.len()).into_bytes(),
            ),
            ("xl/styles.xml".to_string(), STYLES_XML.as_bytes().to_vec()),
        ];
        for (i, (_, xml)) in sheets.into_iter().enumerate() {
            parts.push((format!("xl/worksheets/sheet{}.xml", i + 1), xml));
        }

        for (name, body) in parts {
            zip.start_file(name.as_str(), options)
                .with_context(|| format!("Failed to add {} to workbook", name))?;
            zip.write_all(&body)?;
        }
        Ok(zip.finish()?.into_inner())
    }
}

fn analysis_sheet_xml(report: &Report) -> Result<Vec<u8>> {
    let meta = &report.metadata;
    let mut sheet = SheetXml::begin(&ANALYSIS_WIDTHS)?;

    sheet.text_row(1, &[(STYLE_TITLE, "Folder File Analysis Report")])?;
    let lines = [
        format!("Source: {}", meta.source_location),
        format!("Folder Path: {}", meta.folder_path),
        format!("Generated: {}", meta.generated_at.format(TIMESTAMP_FORMAT)),
        format!("Total Files Analyzed: {}", report.total_files()),
        format!(
            "Files Considered: {} of {} listed",
            meta.files_eligible, meta.files_listed
        ),
    ];
    for (i, line) in lines.iter().enumerate() {
        sheet.text_row(2 + i as u32, &[("0", line.as_str())])?;
    }

    let headers: Vec<(&str, &str)> = ANALYSIS_HEADERS.iter().map(|h| (STYLE_HEADER, *h)).collect();
    sheet.text_row(ANALYSIS_HEADER_ROW, &headers)?;

    for row in report.rows() {
        let r = ANALYSIS_HEADER_ROW + row.index as u32;
        sheet.start_row(r, Some(ANALYSIS_ROW_HEIGHT))?;
        sheet.number_cell(0, r, row.index as f64)?;
        sheet.text_cell(1, r, "0", row.filename)?;
        sheet.text_cell(2, r, "0", row.title)?;
        sheet.text_cell(3, r, STYLE_WRAP, row.summary)?;
        sheet.number_cell(4, r, row.size_kib)?;
        sheet.text_cell(5, r, "0", &row.last_modified)?;
        sheet.end_row()?;
    }

    sheet.finish(Some("A1:F1"))
}

fn errors_sheet_xml(errors: &[ProcessingError]) -> Result<Vec<u8>> {
    let mut sheet = SheetXml::begin(&ERROR_WIDTHS)?;
    sheet.text_row(1, &[(STYLE_SUBTITLE, "Files with Processing Errors")])?;

    let headers: Vec<(&str, &str)> = ERROR_HEADERS
        .iter()
        .map(|h| (STYLE_ERROR_HEADER, *h))
        .collect();
    sheet.text_row(ERROR_HEADER_ROW, &headers)?;

    for (i, error) in errors.iter().enumerate() {
        let r = ERROR_HEADER_ROW + 1 + i as u32;
        sheet.text_row(
            r,
            &[
                ("0", error.filename.as_str()),
                ("0", error.category.label()),
                (STYLE_WRAP, error.detail.as_str()),
            ],
        )?;
    }

    sheet.finish(Some("A1:C1"))
}

/// Streaming writer for one worksheet part.
struct SheetXml {
    writer: quick_xml::Writer<Vec<u8>>,
}

impl SheetXml {
    fn begin(widths: &[f64]) -> Result<Self> {
        let mut writer = quick_xml::Writer::new(Vec::new());
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))?;
        let mut root = BytesStart::new("worksheet");
        root.push_attribute((
            "xmlns",
            "http://schemas.openxmlformats.org/spreadsheetml/2006/main",
        ));
        writer.write_event(Event::Start(root))?;

        writer.write_event(Event::Start(BytesStart::new("cols")))?;
        for (i, width) in widths.iter().enumerate() {
            let n = (i + 1).to_string();
            let w = width.to_string();
            let mut col = BytesStart::new("col");
            col.push_attribute(("min", n.as_str()));
            col.push_attribute(("max", n.as_str()));
            col.push_attribute(("width", w.as_str()));
            col.push_attribute(("customWidth", "1"));
            writer.write_event(Event::Empty(col))?;
        }
        writer.write_event(Event::End(BytesEnd::new("cols")))?;

        writer.write_event(Event::Start(BytesStart::new("sheetData")))?;
        Ok(Self { writer })
    }

    fn start_row(&mut self, row: u32, height: Option<&str>) -> Result<()> {
        let r = row.to_string();
        let mut start = BytesStart::new("row");
        start.push_attribute(("r", r.as_str()));
        if let Some(ht) = height {
            start.push_attribute(("ht", ht));
            start.push_attribute(("customHeight", "1"));
        }
        self.writer.write_event(Event::Start(start))?;
        Ok(())
    }

    fn end_row(&mut self) -> Result<()> {
        self.writer.write_event(Event::End(BytesEnd::new("row")))?;
        Ok(())
    }

    /// A row of text cells starting at column A. Each cell is `(style, text)`.
    fn text_row(&mut self, row: u32, cells: &[(&str, &str)]) -> Result<()> {
        self.start_row(row, None)?;
        for (col, (style, text)) in cells.iter().enumerate() {
            self.text_cell(col, row, style, text)?;
        }
        self.end_row()
    }

    fn text_cell(&mut self, col: usize, row: u32, style: &str, text: &str) -> Result<()> {
        let reference = cell_ref(col, row);
        let mut cell = BytesStart::new("c");
        cell.push_attribute(("r", reference.as_str()));
        cell.push_attribute(("t", "inlineStr"));
        if style != "0" {
            cell.push_attribute(("s", style));
        }
        self.writer.write_event(Event::Start(cell))?;
        self.writer.write_event(Event::Start(BytesStart::new("is")))?;
        let mut t = BytesStart::new("t");
        t.push_attribute(("xml:space", "preserve"));
        self.writer.write_event(Event::Start(t))?;
        let clean = xml_safe(text);
        self.writer.write_event(Event::Text(BytesText::new(&clean)))?;
        self.writer.write_event(Event::End(BytesEnd::new("t")))?;
        self.writer.write_event(Event::End(BytesEnd::new("is")))?;
        self.writer.write_event(Event::End(BytesEnd::new("c")))?;
        Ok(())
    }

    fn number_cell(&mut self, col: usize, row: u32, value: f64) -> Result<()> {
        let reference = cell_ref(col, row);
        let mut cell = BytesStart::new("c");
        cell.push_attribute(("r", reference.as_str()));
        self.writer.write_event(Event::Start(cell))?;
        self.writer.write_event(Event::Start(BytesStart::new("v")))?;
        let v = value.to_string();
        self.writer.write_event(Event::Text(BytesText::new(&v)))?;
        self.writer.write_event(Event::End(BytesEnd::new("v")))?;
        self.writer.write_event(Event::End(BytesEnd::new("c")))?;
        Ok(())
    }

    fn finish(mut self, merge: Option<&str>) -> Result<Vec<u8>> {
        self.writer.write_event(Event::End(BytesEnd::new("sheetData")))?;
        if let Some(range) = merge {
            let mut merges = BytesStart::new("mergeCells");
            merges.push_attribute(("count", "1"));
            self.writer.write_event(Event::Start(merges))?;
            let mut m = BytesStart::new("mergeCell");
            m.push_attribute(("ref", range));
            self.writer.write_event(Event::Empty(m))?;
            self.writer.write_event(Event::End(BytesEnd::new("mergeCells")))?;
        }
        self.writer.write_event(Event::End(BytesEnd::new("worksheet")))?;
        Ok(self.writer.into_inner())
    }
}

/// `A1`-style reference for a zero-based column.
fn cell_ref(col: usize, row: u32) -> String {
    format!("{}{}", column_letter(col), row)
}

fn column_letter(col: usize) -> String {
    let mut n = col + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push((b'A' + rem as u8) as char);
        n = (n - 1) / 26;
    }
    letters.iter().rev().collect()
}

/// Drop characters XML 1.0 cannot carry and clip to the cell limit.
fn xml_safe(text: &str) -> String {
    text.chars()
        .filter(|&c| matches!(c, '\t' | '\n' | '\r') || (c >= ' ' && c != '\u{FFFE}' && c != '\u{FFFF}'))
        .take(MAX_CELL_CHARS)
        .collect()
}

fn content_types_xml(sheet_count: usize) -> String {
    let sheets: String = (1..=sheet_count)
        .map(|i| {
            format!(
                r#"<Override PartName="/xl/worksheets/sheet{}.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>"#,
                i
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml"/>{}</Types>"#,
        sheets
    )
}

fn workbook_xml(sheet_names: &[&str]) -> String {
    let sheets: String = sheet_names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            format!(
                r#"<sheet name="{}" sheetId="{}" r:id="rId{}"/>"#,
                name,
                i + 1,
                i + 1
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets>{}</sheets></workbook>"#,
        sheets
    )
}

fn workbook_rels_xml(sheet_count: usize) -> String {
    let mut rels: String = (1..=sheet_count)
        .map(|i| {
            format!(
                r#"<Relationship Id="rId{}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet{}.xml"/>"#,
                i, i
            )
        })
        .collect();
    rels.push_str(&format!(
        r#"<Relationship Id="rId{}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/>"#,
        sheet_count + 1
    ));
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">{}</Relationships>"#,
        rels
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnalysisRecord, ErrorCategory};
    use std::io::Read;
    use tempfile::TempDir;

    fn sample_report(with_errors: bool) -> Report {
        let records = vec![AnalysisRecord {
            filename: "budget.xlsx".to_string(),
            format_tag: ".xlsx".to_string(),
            title: "FY25 Budget & Forecast".to_string(),
            summary: "Plans <spending> for\u{0} next year.".to_string(),
            size_bytes: 2048,
            last_modified: None,
        }];
        let errors = if with_errors {
            vec![ProcessingError::new(
                "scan.pdf",
                ErrorCategory::ContentExtractionFailed,
                "PDF extraction failed: bad xref",
            )]
        } else {
            vec![]
        };
        Report::build(records, errors, RunMetadata::new("/srv/docs", "finance", 4, 1))
    }

    fn read_part(bytes: &[u8], name: &str) -> String {
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
        let mut out = String::new();
        archive
            .by_name(name)
            .unwrap()
            .read_to_string(&mut out)
            .unwrap();
        out
    }

    #[test]
    fn column_letters() {
        assert_eq!(column_letter(0), "A");
        assert_eq!(column_letter(5), "F");
        assert_eq!(column_letter(25), "Z");
        assert_eq!(column_letter(26), "AA");
    }

    #[test]
    fn xlsx_contains_rows_and_escaped_text() {
        let bytes = XlsxSink.render(&sample_report(false)).unwrap();
        let sheet = read_part(&bytes, "xl/worksheets/sheet1.xml");
        assert!(sheet.contains("FY25 Budget &amp; Forecast"));
        assert!(sheet.contains("Plans &lt;spending&gt; for next year."));
        assert!(sheet.contains(r#"<c r="E9"><v>2</v></c>"#));
        assert!(sheet.contains("Folder Path: finance"));
        assert!(sheet.contains("Files Considered: 1 of 4 listed"));

        let workbook = read_part(&bytes, "xl/workbook.xml");
        assert!(workbook.contains(ANALYSIS_SHEET));
        assert!(!workbook.contains(ERRORS_SHEET));
        let archive = zip::ZipArchive::new(std::io::Cursor::new(bytes.as_slice())).unwrap();
        assert!(archive.file_names().all(|n| n != "xl/worksheets/sheet2.xml"));
    }

    #[test]
    fn xlsx_error_sheet_only_when_errors() {
        let bytes = XlsxSink.render(&sample_report(true)).unwrap();
        let workbook = read_part(&bytes, "xl/workbook.xml");
        assert!(workbook.contains(ERRORS_SHEET));
        let errors = read_part(&bytes, "xl/worksheets/sheet2.xml");
        assert!(errors.contains("scan.pdf"));
        assert!(errors.contains("Content Extraction Failed"));
        assert!(errors.contains("bad xref"));
    }

    #[test]
    fn json_sink_keeps_raw_bytes_and_kib() {
        let bytes = JsonSink.render(&sample_report(true)).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["total_files"], 1);
        assert_eq!(json["files"][0]["index"], 1);
        assert_eq!(json["files"][0]["size_bytes"], 2048);
        assert_eq!(json["files"][0]["size_kib"], 2.0);
        assert_eq!(json["errors"][0]["category"], "content-extraction-failed");
        assert_eq!(json["metadata"]["files_listed"], 4);
    }

    #[test]
    fn json_sink_omits_empty_errors() {
        let bytes = JsonSink.render(&sample_report(false)).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(json.get("errors").is_none());
    }

    #[test]
    fn save_report_picks_sink_and_creates_parent() {
        let tmp = TempDir::new().unwrap();
        let json_path = tmp.path().join("out/nested/report.json");
        save_report(&sample_report(false), &json_path).unwrap();
        let text = std::fs::read_to_string(&json_path).unwrap();
        assert!(text.contains("budget.xlsx"));

        let xlsx_path = tmp.path().join("report.xlsx");
        save_report(&sample_report(false), &xlsx_path).unwrap();
        let bytes = std::fs::read(&xlsx_path).unwrap();
        assert_eq!(&bytes[..2], b"PK");
        assert!(!tmp.path().join(".report.xlsx.tmp").exists());
    }

    #[test]
    fn save_report_fails_for_unwritable_destination() {
        let tmp = TempDir::new().unwrap();
        // A directory where the file should go.
        let dest = tmp.path().join("taken.xlsx");
        std::fs::create_dir_all(dest.join("child")).unwrap();
        assert!(save_report(&sample_report(false), &dest).is_err());
    }
}
