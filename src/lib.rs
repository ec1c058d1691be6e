//! # docsweep
//!
//! Batch document analysis: list a folder in a document store, extract the
//! text of every supported file, ask a language model for a title and a short
//! summary, and write the results to a spreadsheet report.
//!
//! Failures are contained per file. A file whose content cannot be read is
//! still described from its name and type; a file that fails outright is
//! listed on the report's error sheet; the run goes on either way.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────────────────────┐   ┌──────────┐
//! │ FolderSource │──▶│       BatchProcessor        │──▶│  Report  │
//! │ FS/S3/SP     │   │ fetch ▸ extract ▸ analyze   │   │ XLSX/JSON│
//! └──────────────┘   └──────────────┬──────────────┘   └──────────┘
//!                                   │
//!                             ┌─────▼──────┐
//!                             │TextGenerator│
//!                             │OpenAI/Azure │
//!                             └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docsweep check                          # verify config and credentials
//! docsweep list --folder "Shared Documents/Reports"
//! docsweep run --output reports/q3.xlsx
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`traits`] | The `FolderSource` retrieval trait |
//! | [`connector_fs`] | Local filesystem source |
//! | [`connector_s3`] | Amazon S3 source |
//! | [`connector_sharepoint`] | SharePoint Online source (Microsoft Graph) |
//! | [`extract`] | Format-aware text extraction |
//! | [`llm`] | Text-generation providers |
//! | [`analyze`] | Title/summary analysis with graceful degradation |
//! | [`batch`] | Per-file pipeline with error partitioning |
//! | [`report`] | Report assembly |
//! | [`export`] | XLSX and JSON report sinks |
//! | [`pipeline`] | Run orchestration |
//! | [`progress`] | Progress reporting on stderr |
//! | [`sources`] | Source construction and `check` output |

pub mod analyze;
pub mod batch;
pub mod config;
pub mod connector_fs;
pub mod connector_s3;
pub mod connector_sharepoint;
pub mod export;
pub mod extract;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod report;
pub mod sources;
pub mod traits;
