//! Report assembly.
//!
//! A [`Report`] takes ownership of a batch's records and errors plus the
//! run metadata. Display concerns (row numbering, KiB sizes, timestamp
//! formatting) are computed on the way out by [`Report::rows`], so the stored
//! records keep their raw values.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::batch::BatchOutcome;
use crate::models::{AnalysisRecord, ProcessingError};

/// Display format for timestamps in the report. Every timestamp is UTC.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

#[derive(Debug, Clone, Serialize)]
pub struct RunMetadata {
    /// Site URL, bucket, or root directory.
    pub source_location: String,
    pub folder_path: String,
    pub generated_at: DateTime<Utc>,
    pub files_listed: usize,
    pub files_eligible: usize,
}

impl RunMetadata {
    pub fn new(
        source_location: impl Into<String>,
        folder_path: impl Into<String>,
        files_listed: usize,
        files_eligible: usize,
    ) -> Self {
        Self {
            source_location: source_location.into(),
            folder_path: folder_path.into(),
            generated_at: Utc::now(),
            files_listed,
            files_eligible,
        }
    }
}

/// One display row, numbered from 1.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow<'a> {
    pub index: usize,
    pub filename: &'a str,
    pub title: &'a str,
    pub summary: &'a str,
    pub size_bytes: u64,
    pub size_kib: f64,
    pub last_modified: String,
}

#[derive(Debug, Clone)]
pub struct Report {
    pub metadata: RunMetadata,
    pub records: Vec<AnalysisRecord>,
    pub errors: Vec<ProcessingError>,
}

impl Report {
    pub fn build(
        records: Vec<AnalysisRecord>,
        errors: Vec<ProcessingError>,
        metadata: RunMetadata,
    ) -> Self {
        Self {
            metadata,
            records,
            errors,
        }
    }

    /// Build from a batch outcome, taking listed/eligible counts from it.
    pub fn from_outcome(
        outcome: BatchOutcome,
        source_location: impl Into<String>,
        folder_path: impl Into<String>,
    ) -> Self {
        let metadata = RunMetadata::new(
            source_location,
            folder_path,
            outcome.listed,
            outcome.eligible,
        );
        Self::build(outcome.records, outcome.errors, metadata)
    }

    pub fn total_files(&self) -> usize {
        self.records.len()
    }

    /// Whether the secondary error table is emitted.
    pub fn has_error_table(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = ReportRow<'_>> {
        self.records.iter().enumerate().map(|(i, r)| ReportRow {
            index: i + 1,
            filename: &r.filename,
            title: &r.title,
            summary: &r.summary,
            size_bytes: r.size_bytes,
            size_kib: bytes_to_kib(r.size_bytes),
            last_modified: r
                .last_modified
                .map(|t| t.format(TIMESTAMP_FORMAT).to_string())
                .unwrap_or_default(),
        })
    }
}

/// Bytes to kibibytes, rounded to two decimals.
pub fn bytes_to_kib(bytes: u64) -> f64 {
    (bytes as f64 / 1024.0 * 100.0).round() / 100.0
}
