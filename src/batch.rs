//! Batch processing: the per-file pipeline.
//!
//! For every eligible file, in listing order:
//!
//! ```text
//! fetch bytes ─▶ extract text ─▶ analyze (text)          ─▶ record
//!      │               │      └▶ analyze (metadata only) ─┘
//!      └───────┬───────┘
//!              ▼
//!   content-extraction-failed (file still gets a record)
//! ```
//!
//! Anything that goes wrong beyond that, including a file exceeding its
//! time budget or a collaborator panicking, is recorded as `processing-failed` and the file is dropped
//! from the report. The batch itself never fails.

use anyhow::{anyhow, Result};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::analyze::Analyzer;
use crate::config::ProcessingConfig;
use crate::extract::{extract, DocumentFormat, ExtractionOutcome};
use crate::models::{AnalysisRecord, ErrorCategory, FileDescriptor, ProcessingError};
use crate::progress::{NoProgress, ProgressEvent, ProgressReporter};
use crate::traits::FolderSource;

/// Which files take part in a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EligibilityPolicy {
    /// Lowercase format tags, including the dot.
    pub supported_formats: Vec<String>,
    pub max_size_bytes: u64,
}

impl EligibilityPolicy {
    pub fn from_config(config: &ProcessingConfig) -> Self {
        Self {
            supported_formats: config.supported_types.clone(),
            max_size_bytes: config.max_file_size_bytes(),
        }
    }

    pub fn is_eligible(&self, descriptor: &FileDescriptor) -> bool {
        self.supported_formats
            .iter()
            .any(|f| f == &descriptor.format_tag)
            && descriptor.size_bytes <= self.max_size_bytes
    }
}

/// Time budgets for one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Bound on `fetch_bytes`. Exceeding it counts as an extraction failure.
    pub fetch: Duration,
    /// Bound on the whole file. Exceeding it drops the file.
    pub file: Duration,
}

impl Timeouts {
    pub fn from_config(config: &ProcessingConfig) -> Self {
        Self {
            fetch: Duration::from_secs(config.fetch_timeout_secs),
            file: Duration::from_secs(config.file_timeout_secs),
        }
    }
}

/// Output of one batch. Both sequences follow listing order.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub records: Vec<AnalysisRecord>,
    pub errors: Vec<ProcessingError>,
    /// Files handed to [`BatchProcessor::process`].
    pub listed: usize,
    /// Files that passed the [`EligibilityPolicy`].
    pub eligible: usize,
}

pub struct BatchProcessor {
    source: Arc<dyn FolderSource>,
    analyzer: Analyzer,
    policy: EligibilityPolicy,
    timeouts: Timeouts,
    progress: Box<dyn ProgressReporter>,
}

impl BatchProcessor {
    pub fn new(
        source: Arc<dyn FolderSource>,
        analyzer: Analyzer,
        policy: EligibilityPolicy,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            source,
            analyzer,
            policy,
            timeouts,
            progress: Box::new(NoProgress),
        }
    }

    pub fn with_progress(mut self, progress: Box<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn policy(&self) -> &EligibilityPolicy {
        &self.policy
    }

    /// Run every eligible file through the pipeline, sequentially.
    pub async fn process(&self, descriptors: &[FileDescriptor]) -> BatchOutcome {
        let eligible: Vec<&FileDescriptor> = descriptors
            .iter()
            .filter(|d| self.policy.is_eligible(d))
            .collect();

        info!(
            eligible = eligible.len(),
            listed = descriptors.len(),
            "processing files"
        );

        let mut outcome = BatchOutcome {
            listed: descriptors.len(),
            eligible: eligible.len(),
            ..BatchOutcome::default()
        };
        let total = eligible.len() as u64;

        for (i, descriptor) in eligible.into_iter().enumerate() {
            self.progress.report(ProgressEvent::Analyzing {
                n: i as u64 + 1,
                total,
                filename: descriptor.name.clone(),
            });

            let mut file_errors = Vec::new();
            let bounded =
                tokio::time::timeout(self.timeouts.file, self.process_file(descriptor, &mut file_errors));
            let result = match AssertUnwindSafe(bounded).catch_unwind().await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(anyhow!(
                    "timed out after {}s",
                    self.timeouts.file.as_secs_f64()
                )),
                Err(payload) => Err(anyhow!("panicked: {}", panic_message(payload.as_ref()))),
            };
            outcome.errors.append(&mut file_errors);

            match result {
                Ok(record) => outcome.records.push(record),
                Err(e) => {
                    warn!(file = %descriptor.name, error = %format!("{:#}", e), "file dropped");
                    outcome.errors.push(ProcessingError::new(
                        &descriptor.name,
                        ErrorCategory::ProcessingFailed,
                        format!("{:#}", e),
                    ));
                }
            }
        }

        outcome
    }

    /// One file. Extraction problems are pushed onto `errors` and the file
    /// continues with metadata-only analysis.
    async fn process_file(
        &self,
        descriptor: &FileDescriptor,
        errors: &mut Vec<ProcessingError>,
    ) -> Result<AnalysisRecord> {
        let text = match self.load_text(descriptor).await {
            Ok(text) => Some(text),
            Err(reason) => {
                warn!(file = %descriptor.name, %reason, "content extraction failed");
                errors.push(ProcessingError::new(
                    &descriptor.name,
                    ErrorCategory::ContentExtractionFailed,
                    reason,
                ));
                None
            }
        };

        let analysis = match text.as_deref() {
            Some(t) if !t.trim().is_empty() => self.analyzer.analyze(&descriptor.name, t).await,
            _ => Analyzer::analyze_by_metadata_only(&descriptor.name, &descriptor.format_tag),
        };

        Ok(AnalysisRecord::from_analysis(descriptor, analysis))
    }

    /// Fetch and decode. The error is the reason shown in the error table.
    async fn load_text(&self, descriptor: &FileDescriptor) -> std::result::Result<String, String> {
        let bytes = match tokio::time::timeout(
            self.timeouts.fetch,
            self.source.fetch_bytes(&descriptor.locator),
        )
        .await
        {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => return Err(format!("{:#}", e)),
            Err(_) => {
                return Err(format!(
                    "retrieval timed out after {}s",
                    self.timeouts.fetch.as_secs_f64()
                ))
            }
        };

        // PDF and OOXML decoding are CPU-bound; keep them off the executor.
        let format = DocumentFormat::from_tag(&descriptor.format_tag);
        let outcome = tokio::task::spawn_blocking(move || extract(&bytes, &format))
            .await
            .map_err(|e| format!("extraction task failed: {}", e))?;

        match outcome {
            ExtractionOutcome::Text(text) => Ok(text),
            ExtractionOutcome::Failure(reason) => Err(reason),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
