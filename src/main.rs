//! # docsweep CLI
//!
//! ## Usage
//!
//! ```bash
//! docsweep --config ./config/docsweep.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docsweep run` | Analyze every eligible file in the folder and write the report |
//! | `docsweep check` | Show the configured source and provider, and any missing credentials |
//! | `docsweep list` | List the folder with each file's eligibility |
//!
//! ## Examples
//!
//! ```bash
//! # Analyze the configured folder
//! docsweep run
//!
//! # Analyze another folder, JSON output for scripts
//! docsweep run --folder "Shared Documents/Legal" --output legal.json --progress json
//!
//! # See what would be analyzed
//! docsweep run --dry-run
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use docsweep::config;
use docsweep::pipeline::{self, RunOptions};
use docsweep::progress::ProgressMode;
use docsweep::sources;

/// docsweep: summarize a folder of documents into a spreadsheet.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/docsweep.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "docsweep",
    about = "Summarize every document in a folder with a language model and write a spreadsheet report",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docsweep.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a folder and write the report.
    ///
    /// Lists the folder, filters by type and size, extracts text, asks the
    /// language model for a title and summary per file, and saves the report.
    /// Exits 1 when no file could be processed or the report cannot be saved,
    /// and 130 when interrupted.
    Run {
        /// Folder to analyze. Defaults to `[source].folder`.
        #[arg(long)]
        folder: Option<String>,

        /// Report path. A `.json` extension writes JSON instead of XLSX.
        #[arg(long)]
        output: Option<PathBuf>,

        /// List and filter only; show counts without analyzing.
        #[arg(long)]
        dry_run: bool,

        /// Progress on stderr. Defaults to `human` on a terminal, `off` otherwise.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Check configuration and credentials.
    Check,

    /// List a folder and show which files would be analyzed.
    List {
        /// Folder to list. Defaults to `[source].folder`.
        #[arg(long)]
        folder: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,docsweep=info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<u8> {
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Run {
            folder,
            output,
            dry_run,
            progress,
        } => {
            let problems = cfg.credential_problems();
            if !dry_run && !problems.is_empty() {
                anyhow::bail!("Configuration incomplete: {}", problems.join("; "));
            }
            let options = RunOptions {
                folder,
                output,
                dry_run,
                progress: progress.unwrap_or_else(ProgressMode::default_for_tty),
            };
            let status = pipeline::run_analysis(&cfg, options).await?;
            Ok(status.exit_code() as u8)
        }
        Commands::Check => {
            let healthy = sources::check_config(&cfg)?;
            Ok(if healthy { 0 } else { 1 })
        }
        Commands::List { folder } => {
            pipeline::list_files(&cfg, folder).await?;
            Ok(0)
        }
    }
}
