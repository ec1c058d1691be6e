use anyhow::Result;
use std::sync::Arc;

use crate::config::{Config, SourceConfig};
use crate::connector_fs::FilesystemSource;
use crate::connector_s3::S3Source;
use crate::connector_sharepoint::SharePointSource;
use crate::traits::FolderSource;

/// Build the configured source.
pub fn open_source(config: &SourceConfig) -> Result<Arc<dyn FolderSource>> {
    let source: Arc<dyn FolderSource> = match config {
        SourceConfig::Filesystem(c) => Arc::new(FilesystemSource::new(c.clone())?),
        SourceConfig::S3(c) => Arc::new(S3Source::new(c.clone())?),
        SourceConfig::Sharepoint(c) => Arc::new(SharePointSource::new(c.clone())?),
    };
    Ok(source)
}

/// Print a status table for `docsweep check`. Returns whether a run could start.
pub fn check_config(config: &Config) -> Result<bool> {
    let problems = config.credential_problems();

    println!("{:<12} {:<12} DETAIL", "COMPONENT", "STATUS");
    println!(
        "{:<12} {:<12} {} ({})",
        "source",
        "OK",
        config.source.kind(),
        config.source.location()
    );
    println!(
        "{:<12} {:<12} {} / {}",
        "llm", "OK", config.llm.provider, config.llm.model
    );
    println!(
        "{:<12} {:<12} {} types, max {} MB",
        "processing",
        "OK",
        config.processing.supported_types.len(),
        config.processing.max_file_size_mb
    );
    if problems.is_empty() {
        println!("{:<12} {:<12} all present", "environment", "OK");
    } else {
        for problem in &problems {
            println!("{:<12} {:<12} {}", "environment", "MISSING", problem);
        }
    }

    Ok(problems.is_empty())
}
