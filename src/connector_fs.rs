//! Local filesystem source.
//!
//! Lists the files of a folder under the configured `root` with `walkdir`.
//! Only the folder itself is scanned unless `recursive = true`; in that case
//! a file's name is its path relative to the folder so nested files stay
//! distinguishable in the report.
//!
//! ```toml
//! [source]
//! kind = "filesystem"
//! root = "/srv/shared"
//! folder = "finance/2024"
//! exclude_globs = ["**/~$*"]
//! ```

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use crate::config::FilesystemSourceConfig;
use crate::models::FileDescriptor;
use crate::traits::FolderSource;

const DEFAULT_EXCLUDES: [&str; 3] = ["**/.git/**", "**/.DS_Store", "**/Thumbs.db"];

pub struct FilesystemSource {
    config: FilesystemSourceConfig,
    excludes: GlobSet,
}

impl FilesystemSource {
    pub fn new(config: FilesystemSourceConfig) -> Result<Self> {
        let mut patterns: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
        patterns.extend(config.exclude_globs.iter().cloned());
        let excludes = build_globset(&patterns)?;
        Ok(Self { config, excludes })
    }

    /// `folder` relative to the root, unless it is already absolute.
    fn resolve(&self, folder: &str) -> PathBuf {
        let folder = Path::new(folder);
        if folder.is_absolute() {
            folder.to_path_buf()
        } else {
            self.config.root.join(folder)
        }
    }
}

#[async_trait]
impl FolderSource for FilesystemSource {
    fn kind(&self) -> &str {
        "filesystem"
    }

    async fn list(&self, folder: &str) -> Result<Vec<FileDescriptor>> {
        let dir = self.resolve(folder);
        if !dir.is_dir() {
            bail!("Folder does not exist or is not a directory: {}", dir.display());
        }

        let max_depth = if self.config.recursive { usize::MAX } else { 1 };
        let walker = WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(max_depth)
            .follow_links(self.config.follow_symlinks)
            .sort_by_file_name();

        let mut files = Vec::new();
        for entry in walker {
            let entry = entry.with_context(|| format!("Failed to list {}", dir.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(&dir).unwrap_or(path);
            let rel_str = relative.to_string_lossy().replace('\\', "/");
            if self.excludes.is_match(&rel_str) {
                continue;
            }

            let metadata = entry
                .metadata()
                .with_context(|| format!("Failed to stat {}", path.display()))?;
            let modified = metadata.modified().ok().map(DateTime::<Utc>::from);
            let locator = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());

            files.push(FileDescriptor::new(
                rel_str,
                locator.to_string_lossy(),
                metadata.len(),
                modified,
            ));
        }

        files.sort_by(|a, b| a.name.cmp(&b.name));
        debug!(dir = %dir.display(), files = files.len(), "filesystem listing");
        Ok(files)
    }

    async fn fetch_bytes(&self, locator: &str) -> Result<Vec<u8>> {
        tokio::fs::read(locator)
            .await
            .with_context(|| format!("Failed to read {}", locator))
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}
