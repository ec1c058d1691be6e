//! Integration tests for the batch pipeline.
//!
//! The retrieval and text-generation collaborators are replaced by in-memory
//! fakes implementing `FolderSource` and `TextGenerator`, so every path
//! through the per-file pipeline runs offline.

use anyhow::{bail, Result};
use async_trait::async_trait;
use docsweep::analyze::{Analyzer, AnalyzerSettings};
use docsweep::batch::{BatchProcessor, EligibilityPolicy, Timeouts};
use docsweep::config::parse_config;
use docsweep::llm::{CompletionRequest, DisabledGenerator, TextGenerator};
use docsweep::models::{ErrorCategory, FileDescriptor};
use docsweep::pipeline::{run_with, RunOptions, RunStatus};
use docsweep::traits::FolderSource;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

// ─── Fakes ──────────────────────────────────────────────────────────

/// Files held in memory. A locator without content fails to fetch.
struct InMemorySource {
    files: Vec<FileDescriptor>,
    contents: HashMap<String, Vec<u8>>,
}

impl InMemorySource {
    fn new() -> Self {
        Self {
            files: Vec::new(),
            contents: HashMap::new(),
        }
    }

    fn with_file(mut self, name: &str, bytes: &[u8]) -> Self {
        self.files
            .push(FileDescriptor::new(name, name, bytes.len() as u64, None));
        self.contents.insert(name.to_string(), bytes.to_vec());
        self
    }

    /// Listed, but fetching it fails.
    fn with_unreachable(mut self, name: &str, size: u64) -> Self {
        self.files.push(FileDescriptor::new(name, name, size, None));
        self
    }
}

#[async_trait]
impl FolderSource for InMemorySource {
    fn kind(&self) -> &str {
        "memory"
    }

    async fn list(&self, _folder: &str) -> Result<Vec<FileDescriptor>> {
        Ok(self.files.clone())
    }

    async fn fetch_bytes(&self, locator: &str) -> Result<Vec<u8>> {
        match self.contents.get(locator) {
            Some(bytes) => Ok(bytes.clone()),
            None => bail!("403 Forbidden: {}", locator),
        }
    }
}

/// Answers every request with the same JSON and records the prompts.
struct ScriptedGenerator {
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            prompts: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        self.prompts.lock().unwrap().push(request.prompt.clone());
        Ok(r#"{"title": "Quarterly Notes", "summary": "Notes from the quarter."}"#.to_string())
    }
}

/// Takes longer than any test's per-file budget.
struct StalledGenerator;

#[async_trait]
impl TextGenerator for StalledGenerator {
    fn model_name(&self) -> &str {
        "stalled"
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<String> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(String::new())
    }
}

/// Delegates to an [`InMemorySource`] but panics when fetching one locator.
struct PanickingSource {
    inner: InMemorySource,
    poisoned: String,
}

#[async_trait]
impl FolderSource for PanickingSource {
    fn kind(&self) -> &str {
        "panicking"
    }

    async fn list(&self, folder: &str) -> Result<Vec<FileDescriptor>> {
        self.inner.list(folder).await
    }

    async fn fetch_bytes(&self, locator: &str) -> Result<Vec<u8>> {
        if locator == self.poisoned {
            panic!("fetch blew up on {}", locator);
        }
        self.inner.fetch_bytes(locator).await
    }
}

/// A listing that never completes.
struct HangingListSource;

#[async_trait]
impl FolderSource for HangingListSource {
    fn kind(&self) -> &str {
        "hanging"
    }

    async fn list(&self, _folder: &str) -> Result<Vec<FileDescriptor>> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(Vec::new())
    }

    async fn fetch_bytes(&self, locator: &str) -> Result<Vec<u8>> {
        bail!("not reachable: {}", locator)
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

fn policy() -> EligibilityPolicy {
    EligibilityPolicy {
        supported_formats: vec![".txt".to_string(), ".pdf".to_string(), ".md".to_string()],
        max_size_bytes: 1024,
    }
}

fn timeouts() -> Timeouts {
    Timeouts {
        fetch: Duration::from_secs(5),
        file: Duration::from_secs(10),
    }
}

fn processor(
    source: InMemorySource,
    generator: Arc<dyn TextGenerator>,
    timeouts: Timeouts,
) -> BatchProcessor {
    BatchProcessor::new(
        Arc::new(source),
        Analyzer::new(generator, AnalyzerSettings::default()),
        policy(),
        timeouts,
    )
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn mixed_folder_partitions_records_and_errors() {
    let text = "x".repeat(100);
    let source = InMemorySource::new()
        .with_file("a.txt", text.as_bytes())
        .with_file("b.pdf", b"this is not a pdf")
        .with_file("c.bin", b"\x00\x01\x02");
    let files = source.files.clone();
    let generator = ScriptedGenerator::new();

    let outcome = processor(source, generator.clone(), timeouts())
        .process(&files)
        .await;

    assert_eq!(outcome.listed, 3);
    assert_eq!(outcome.eligible, 2);
    assert_eq!(outcome.records.len(), 2);
    assert_eq!(outcome.records[0].filename, "a.txt");
    assert_eq!(outcome.records[0].title, "Quarterly Notes");
    assert_eq!(outcome.records[0].size_bytes, 100);

    // The PDF keeps a record built from metadata alone.
    assert_eq!(outcome.records[1].filename, "b.pdf");
    assert_eq!(outcome.records[1].title, "b.pdf");
    assert!(outcome.records[1].summary.contains(".pdf"));

    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.errors[0].filename, "b.pdf");
    assert_eq!(
        outcome.errors[0].category,
        ErrorCategory::ContentExtractionFailed
    );

    assert!(outcome.records.iter().all(|r| r.filename != "c.bin"));
    assert!(outcome.errors.iter().all(|e| e.filename != "c.bin"));

    // Only the readable file reached the generator.
    assert_eq!(generator.prompts.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn oversized_files_are_skipped_silently() {
    let source = InMemorySource::new()
        .with_file("small.txt", b"hello")
        .with_file("big.txt", &vec![b'a'; 2048]);
    let files = source.files.clone();

    let outcome = processor(source, ScriptedGenerator::new(), timeouts())
        .process(&files)
        .await;

    assert_eq!(outcome.eligible, 1);
    assert_eq!(outcome.records.len(), 1);
    assert_eq!(outcome.records[0].filename, "small.txt");
    assert!(outcome.errors.is_empty());
}

#[tokio::test]
async fn fetch_failure_keeps_record_and_logs_extraction_error() {
    let source = InMemorySource::new()
        .with_file("ok.md", b"# Title\n\nBody")
        .with_unreachable("locked.pdf", 10);
    let files = source.files.clone();

    let outcome = processor(source, ScriptedGenerator::new(), timeouts())
        .process(&files)
        .await;

    assert_eq!(outcome.records.len(), 2);
    assert_eq!(outcome.records[1].filename, "locked.pdf");
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(
        outcome.errors[0].category,
        ErrorCategory::ContentExtractionFailed
    );
    assert!(outcome.errors[0].detail.contains("403 Forbidden"));
}

#[tokio::test]
async fn blank_text_uses_metadata_only_analysis() {
    let source = InMemorySource::new().with_file("empty.txt", b"   \n\t ");
    let files = source.files.clone();
    let generator = ScriptedGenerator::new();

    let outcome = processor(source, generator.clone(), timeouts())
        .process(&files)
        .await;

    assert_eq!(outcome.records.len(), 1);
    assert_eq!(outcome.records[0].title, "empty.txt");
    assert!(outcome.records[0].summary.contains(".txt"));
    assert!(outcome.errors.is_empty());
    assert!(generator.prompts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn generator_failure_degrades_without_error_entry() {
    let source = InMemorySource::new().with_file("memo.txt", b"Please review the memo.");
    let files = source.files.clone();

    let outcome = processor(source, Arc::new(DisabledGenerator), timeouts())
        .process(&files)
        .await;

    assert_eq!(outcome.records.len(), 1);
    assert_eq!(outcome.records[0].title, "memo.txt");
    assert!(outcome.records[0].summary.starts_with("Error during analysis"));
    assert!(outcome.errors.is_empty());
}

#[tokio::test]
async fn long_text_is_truncated_before_generation() {
    let body = "word ".repeat(4000);
    let source = InMemorySource::new().with_file("long.txt", body.as_bytes());
    let mut files = source.files.clone();
    files[0].size_bytes = 10; // keep it under the test size ceiling
    let generator = ScriptedGenerator::new();

    let outcome = BatchProcessor::new(
        Arc::new(source),
        Analyzer::new(
            generator.clone(),
            AnalyzerSettings {
                max_content_chars: 100,
                ..AnalyzerSettings::default()
            },
        ),
        policy(),
        timeouts(),
    )
    .process(&files)
    .await;

    assert_eq!(outcome.records.len(), 1);
    let prompts = generator.prompts.lock().unwrap();
    assert!(prompts[0].contains("[content truncated]"));
    assert!(prompts[0].len() < 1000);
}

#[tokio::test]
async fn file_timeout_drops_file_as_processing_failed() {
    let source = InMemorySource::new()
        .with_file("first.txt", b"one")
        .with_file("second.txt", b"two");
    let files = source.files.clone();
    let tight = Timeouts {
        fetch: Duration::from_secs(5),
        file: Duration::from_millis(50),
    };

    let outcome = processor(source, Arc::new(StalledGenerator), tight)
        .process(&files)
        .await;

    assert!(outcome.records.is_empty());
    assert_eq!(outcome.errors.len(), 2);
    assert_eq!(outcome.errors[0].filename, "first.txt");
    assert_eq!(outcome.errors[1].filename, "second.txt");
    assert!(outcome
        .errors
        .iter()
        .all(|e| e.category == ErrorCategory::ProcessingFailed));
    assert!(outcome.errors[0].detail.contains("timed out"));
}

#[tokio::test]
async fn panicking_source_drops_only_that_file() {
    let inner = InMemorySource::new()
        .with_file("bad.txt", b"never read")
        .with_file("good.txt", b"fine");
    let files = inner.files.clone();
    let source = PanickingSource {
        inner,
        poisoned: "bad.txt".to_string(),
    };

    let outcome = BatchProcessor::new(
        Arc::new(source),
        Analyzer::new(ScriptedGenerator::new(), AnalyzerSettings::default()),
        policy(),
        timeouts(),
    )
    .process(&files)
    .await;

    assert_eq!(outcome.records.len(), 1);
    assert_eq!(outcome.records[0].filename, "good.txt");
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.errors[0].filename, "bad.txt");
    assert_eq!(outcome.errors[0].category, ErrorCategory::ProcessingFailed);
    assert!(outcome.errors[0].detail.contains("fetch blew up on bad.txt"));
}

#[tokio::test]
async fn stalled_listing_fails_the_run_after_list_timeout() {
    let tmp = TempDir::new().unwrap();
    let output = tmp.path().join("never.xlsx");
    let config = parse_config(&format!(
        "[source]\nkind = \"filesystem\"\nroot = \"{}\"\n\n[processing]\nlist_timeout_secs = 1\n",
        tmp.path().display()
    ))
    .unwrap();

    let err = run_with(
        &config,
        RunOptions {
            output: Some(output.clone()),
            ..RunOptions::default()
        },
        Arc::new(HangingListSource),
        ScriptedGenerator::new(),
    )
    .await
    .unwrap_err();

    let message = format!("{:#}", err);
    assert!(message.contains("timed out after 1s"), "{}", message);
    assert!(!output.exists());
}

#[tokio::test]
async fn run_writes_json_report_through_injected_collaborators() {
    let tmp = TempDir::new().unwrap();
    let output = tmp.path().join("reports/run.json");
    let config = parse_config(&format!(
        r#"
[source]
kind = "filesystem"
root = "{}"

[llm]
provider = "disabled"
"#,
        tmp.path().display()
    ))
    .unwrap();

    let source = InMemorySource::new()
        .with_file("a.txt", b"alpha")
        .with_file("b.pdf", b"broken");
    let status = run_with(
        &config,
        RunOptions {
            output: Some(output.clone()),
            ..RunOptions::default()
        },
        Arc::new(source),
        ScriptedGenerator::new(),
    )
    .await
    .unwrap();

    assert_eq!(
        status,
        RunStatus::Completed {
            records: 2,
            errors: 1,
            output: output.clone(),
        }
    );
    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
    assert_eq!(json["total_files"], 2);
    assert_eq!(json["files"][0]["title"], "Quarterly Notes");
    assert_eq!(json["errors"][0]["filename"], "b.pdf");
}

#[tokio::test]
async fn run_on_empty_folder_writes_nothing() {
    let tmp = TempDir::new().unwrap();
    let output = tmp.path().join("empty.xlsx");
    let config = parse_config(&format!(
        "[source]\nkind = \"filesystem\"\nroot = \"{}\"\n",
        tmp.path().display()
    ))
    .unwrap();

    let status = run_with(
        &config,
        RunOptions {
            output: Some(output.clone()),
            ..RunOptions::default()
        },
        Arc::new(InMemorySource::new()),
        ScriptedGenerator::new(),
    )
    .await
    .unwrap();

    assert_eq!(status, RunStatus::EmptyFolder);
    assert_eq!(status.exit_code(), 0);
    assert!(!output.exists());
}

#[tokio::test]
async fn run_with_no_successful_file_writes_nothing() {
    let tmp = TempDir::new().unwrap();
    let output = tmp.path().join("none.xlsx");
    let config = parse_config(&format!(
        "[source]\nkind = \"filesystem\"\nroot = \"{}\"\n\n[processing]\nfile_timeout_secs = 1\n",
        tmp.path().display()
    ))
    .unwrap();

    let status = run_with(
        &config,
        RunOptions {
            output: Some(output.clone()),
            ..RunOptions::default()
        },
        Arc::new(InMemorySource::new().with_file("slow.txt", b"zzz")),
        Arc::new(StalledGenerator),
    )
    .await
    .unwrap();

    assert_eq!(status, RunStatus::NothingProcessed { errors: 1 });
    assert_eq!(status.exit_code(), 1);
    assert!(!output.exists());
}
