//! End-to-end run orchestration for `docsweep run` and `docsweep list`.
//!
//! # Run Flow
//!
//! ```text
//! open source ─▶ list folder ─▶ (empty? stop)
//!                     │
//!                     ▼
//!   BatchProcessor::process ◀── Ctrl-C aborts, nothing is written
//!                     │
//!                     ▼
//!   Report::from_outcome ─▶ export::save_report ─▶ summary on stdout
//! ```
//!
//! Collaborators can be injected with [`run_with`] so the whole flow runs
//! against fakes in tests; [`run_analysis`] builds them from configuration.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::analyze::{Analyzer, AnalyzerSettings};
use crate::batch::{BatchProcessor, EligibilityPolicy, Timeouts};
use crate::config::{Config, ProcessingConfig};
use crate::export::save_report;
use crate::llm::{create_generator, DisabledGenerator, TextGenerator};
use crate::models::FileDescriptor;
use crate::progress::{ProgressEvent, ProgressMode};
use crate::report::Report;
use crate::sources::open_source;
use crate::traits::FolderSource;

/// Per-invocation overrides of the configuration.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub folder: Option<String>,
    pub output: Option<PathBuf>,
    /// List and filter only; no retrieval, no generation, no report.
    pub dry_run: bool,
    pub progress: ProgressMode,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            folder: None,
            output: None,
            dry_run: false,
            progress: ProgressMode::Off,
        }
    }
}

/// How a run ended, short of a fatal error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Completed {
        records: usize,
        errors: usize,
        output: PathBuf,
    },
    DryRun {
        listed: usize,
        eligible: usize,
    },
    /// The folder had no files at all.
    EmptyFolder,
    /// Files were eligible but none produced a record. No report is written.
    NothingProcessed { errors: usize },
    /// Interrupted by the operator. No report is written.
    Cancelled,
}

impl RunStatus {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::Completed { .. } | RunStatus::DryRun { .. } | RunStatus::EmptyFolder => 0,
            RunStatus::NothingProcessed { .. } => 1,
            RunStatus::Cancelled => 130,
        }
    }
}

/// Build collaborators from `config` and run.
pub async fn run_analysis(config: &Config, options: RunOptions) -> Result<RunStatus> {
    let source = open_source(&config.source)?;
    // A dry run never calls the provider, so it needs no API key.
    let generator: Arc<dyn TextGenerator> = if options.dry_run {
        Arc::new(DisabledGenerator)
    } else {
        create_generator(&config.llm)?
    };
    run_with(config, options, source, generator).await
}

/// Run with explicit collaborators.
pub async fn run_with(
    config: &Config,
    options: RunOptions,
    source: Arc<dyn FolderSource>,
    generator: Arc<dyn TextGenerator>,
) -> Result<RunStatus> {
    let folder = options
        .folder
        .clone()
        .unwrap_or_else(|| config.source.folder().to_string());
    let output = options
        .output
        .clone()
        .unwrap_or_else(|| config.report.output.clone());
    let progress = options.progress.reporter();

    progress.report(ProgressEvent::Listing {
        folder: folder.clone(),
    });
    let files = list_folder(source.as_ref(), &folder, &config.processing).await?;
    info!(source = source.kind(), folder = %folder, files = files.len(), "folder listed");

    if files.is_empty() {
        println!("run {}", folder);
        println!("  no files found");
        return Ok(RunStatus::EmptyFolder);
    }

    let policy = EligibilityPolicy::from_config(&config.processing);

    if options.dry_run {
        let eligible = files.iter().filter(|f| policy.is_eligible(f)).count();
        println!("run {} (dry-run)", folder);
        println!("  files found: {}", files.len());
        println!("  eligible: {}", eligible);
        println!("  report: {}", output.display());
        return Ok(RunStatus::DryRun {
            listed: files.len(),
            eligible,
        });
    }

    let analyzer = Analyzer::new(
        generator,
        AnalyzerSettings::from_config(&config.analysis, &config.llm),
    );
    let processor = BatchProcessor::new(
        source,
        analyzer,
        policy,
        Timeouts::from_config(&config.processing),
    )
    .with_progress(progress);

    let outcome = tokio::select! {
        outcome = processor.process(&files) => outcome,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, discarding partial results");
            eprintln!("Operation cancelled by user.");
            return Ok(RunStatus::Cancelled);
        }
    };

    let eligible = outcome.eligible;
    if outcome.records.is_empty() {
        println!("run {}", folder);
        println!("  eligible: {}", eligible);
        println!("  errors: {}", outcome.errors.len());
        println!("  no files were successfully processed");
        return Ok(RunStatus::NothingProcessed {
            errors: outcome.errors.len(),
        });
    }

    let report = Report::from_outcome(outcome, config.source.location(), &folder);
    save_report(&report, &output)?;

    println!("run {}", folder);
    println!("  files found: {}", report.metadata.files_listed);
    println!("  eligible: {}", eligible);
    println!("  analyzed: {}", report.total_files());
    if report.has_error_table() {
        println!("  errors: {} (see Errors sheet)", report.errors.len());
    }
    println!("  report: {}", output.display());
    println!("ok");

    Ok(RunStatus::Completed {
        records: report.total_files(),
        errors: report.errors.len(),
        output,
    })
}

/// `source.list` bounded by `processing.list_timeout_secs`.
async fn list_folder(
    source: &dyn FolderSource,
    folder: &str,
    processing: &ProcessingConfig,
) -> Result<Vec<FileDescriptor>> {
    let limit = Duration::from_secs(processing.list_timeout_secs);
    match tokio::time::timeout(limit, source.list(folder)).await {
        Ok(listed) => listed.with_context(|| format!("Failed to list folder '{}'", folder)),
        Err(_) => bail!(
            "Failed to list folder '{}': timed out after {}s",
            folder,
            limit.as_secs()
        ),
    }
}

/// Print the folder listing with each file's eligibility.
pub async fn list_files(config: &Config, folder: Option<String>) -> Result<()> {
    let folder = folder.unwrap_or_else(|| config.source.folder().to_string());
    let source = open_source(&config.source)?;
    let files = list_folder(source.as_ref(), &folder, &config.processing).await?;
    let policy = EligibilityPolicy::from_config(&config.processing);

    println!("{:<40} {:>12} {:<20} ELIGIBLE", "NAME", "SIZE", "MODIFIED");
    for file in &files {
        let modified = file
            .last_modified
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<40} {:>12} {:<20} {}",
            file.name,
            file.size_bytes,
            modified,
            if policy.is_eligible(file) { "yes" } else { "no" }
        );
    }
    let eligible = files.iter().filter(|f| policy.is_eligible(f)).count();
    println!("{} files, {} eligible", files.len(), eligible);
    Ok(())
}
