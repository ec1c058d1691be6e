//! Extension trait for document sources.
//!
//! A [`FolderSource`] is the retrieval side of a run: it lists the files in
//! a folder and later fetches each file's bytes by its locator. The built-in
//! sources are the local filesystem, Amazon S3, and SharePoint Online;
//! anything else (a DMS, another object store, an in-memory fixture) only has
//! to implement these two methods.
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │              FolderSource                │
//! │  ┌──────────┐ ┌─────────┐ ┌────────────┐ │
//! │  │Filesystem│ │   S3    │ │ SharePoint │ │
//! │  └──────────┘ └─────────┘ └────────────┘ │
//! └──────────────┬───────────────────────────┘
//!                ▼
//!     BatchProcessor::process() → Report
//! ```
//!
//! # Example
//!
//! ```rust
//! use anyhow::Result;
//! use async_trait::async_trait;
//! use docsweep::models::FileDescriptor;
//! use docsweep::traits::FolderSource;
//!
//! pub struct FixedSource;
//!
//! #[async_trait]
//! impl FolderSource for FixedSource {
//!     fn kind(&self) -> &str { "fixed" }
//!
//!     async fn list(&self, _folder: &str) -> Result<Vec<FileDescriptor>> {
//!         Ok(vec![FileDescriptor::new("hello.txt", "hello", 5, None)])
//!     }
//!
//!     async fn fetch_bytes(&self, _locator: &str) -> Result<Vec<u8>> {
//!         Ok(b"hello".to_vec())
//!     }
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;

use crate::models::FileDescriptor;

/// Lists and fetches files from one document store.
#[async_trait]
pub trait FolderSource: Send + Sync {
    /// Source type identifier (`"filesystem"`, `"s3"`, `"sharepoint"`).
    fn kind(&self) -> &str;

    /// Files directly in `folder`, in a stable order. Folders themselves are
    /// not returned.
    async fn list(&self, folder: &str) -> Result<Vec<FileDescriptor>>;

    /// Raw bytes of the file behind `locator`, as produced by [`list`](FolderSource::list).
    async fn fetch_bytes(&self, locator: &str) -> Result<Vec<u8>>;
}
