//! Core data models used throughout docsweep.
//!
//! These types represent the files, analyses, and per-file errors that flow
//! through the batch pipeline and into the report.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A candidate file produced by a [`FolderSource`](crate::traits::FolderSource) listing.
#[derive(Debug, Clone, PartialEq)]
pub struct FileDescriptor {
    pub name: String,
    /// Opaque reference handed back to the source's `fetch_bytes`
    /// (absolute path, object key, drive item id).
    pub locator: String,
    pub size_bytes: u64,
    /// Lowercase extension including the dot (`".pdf"`), or empty.
    pub format_tag: String,
    pub last_modified: Option<DateTime<Utc>>,
}

impl FileDescriptor {
    /// Build a descriptor, deriving `format_tag` from `name`.
    pub fn new(
        name: impl Into<String>,
        locator: impl Into<String>,
        size_bytes: u64,
        last_modified: Option<DateTime<Utc>>,
    ) -> Self {
        let name = name.into();
        let format_tag = format_tag_for(&name);
        Self {
            name,
            locator: locator.into(),
            size_bytes,
            format_tag,
            last_modified,
        }
    }
}

/// Derive the format tag of a file name: the lowercased suffix starting at
/// the last `.`. Names without a dot, or whose only dot is the leading one
/// (`.bashrc`), have no tag.
pub fn format_tag_for(name: &str) -> String {
    match name.rfind('.') {
        Some(i) if i > 0 => name[i..].to_lowercase(),
        _ => String::new(),
    }
}

/// Title and summary for one file. Always display-ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisResult {
    pub title: String,
    pub summary: String,
}

impl AnalysisResult {
    /// Result used when content analysis fails: the filename stands in for
    /// the title and the summary carries the reason.
    pub fn degraded(filename: &str, reason: impl std::fmt::Display) -> Self {
        Self {
            title: filename.to_string(),
            summary: format!("Error during analysis: {}", reason),
        }
    }
}

/// One row of the final report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisRecord {
    pub filename: String,
    pub format_tag: String,
    pub title: String,
    pub summary: String,
    pub size_bytes: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

impl AnalysisRecord {
    pub fn from_analysis(descriptor: &FileDescriptor, analysis: AnalysisResult) -> Self {
        Self {
            filename: descriptor.name.clone(),
            format_tag: descriptor.format_tag.clone(),
            title: analysis.title,
            summary: analysis.summary,
            size_bytes: descriptor.size_bytes,
            last_modified: descriptor.last_modified,
        }
    }
}

/// Why a file shows up in the error table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    /// Bytes could not be fetched or decoded. The file still gets a
    /// (degraded) record.
    ContentExtractionFailed,
    /// The file was dropped from the report.
    ProcessingFailed,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::ContentExtractionFailed => "content-extraction-failed",
            ErrorCategory::ProcessingFailed => "processing-failed",
        }
    }

    /// Human label used in the spreadsheet.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorCategory::ContentExtractionFailed => "Content Extraction Failed",
            ErrorCategory::ProcessingFailed => "Processing Failed",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A per-file error surfaced to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessingError {
    pub filename: String,
    pub category: ErrorCategory,
    pub detail: String,
}

impl ProcessingError {
    pub fn new(filename: &str, category: ErrorCategory, detail: impl Into<String>) -> Self {
        Self {
            filename: filename.to_string(),
            category,
            detail: detail.into(),
        }
    }
}
