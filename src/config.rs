//! Configuration parsing and validation.
//!
//! docsweep reads a TOML file (default `./config/docsweep.toml`). Secrets
//! never live in the file: API keys and cloud credentials are read from the
//! environment, which `main` may populate from a `.env` file first.
//!
//! ```toml
//! [source]
//! kind = "sharepoint"
//! site_url = "https://contoso.sharepoint.com/sites/finance"
//! tenant_id = "..."
//! client_id = "..."
//! folder = "Shared Documents/Reports"
//!
//! [llm]
//! provider = "openai"
//! model = "gpt-4o-mini"
//!
//! [processing]
//! max_file_size_mb = 10
//!
//! [report]
//! output = "file_analysis.xlsx"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub source: SourceConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

/// Where the documents live. Selected by `kind`.
#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceConfig {
    Filesystem(FilesystemSourceConfig),
    S3(S3SourceConfig),
    Sharepoint(SharePointSourceConfig),
}

impl SourceConfig {
    /// Default folder to scan when `--folder` is not given.
    pub fn folder(&self) -> &str {
        match self {
            SourceConfig::Filesystem(c) => &c.folder,
            SourceConfig::S3(c) => &c.folder,
            SourceConfig::Sharepoint(c) => &c.folder,
        }
    }

    /// Human-readable location for the report header.
    pub fn location(&self) -> String {
        match self {
            SourceConfig::Filesystem(c) => c.root.display().to_string(),
            SourceConfig::S3(c) => format!("s3://{}/{}", c.bucket, c.prefix),
            SourceConfig::Sharepoint(c) => c.site_url.clone(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SourceConfig::Filesystem(_) => "filesystem",
            SourceConfig::S3(_) => "s3",
            SourceConfig::Sharepoint(_) => "sharepoint",
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct FilesystemSourceConfig {
    pub root: PathBuf,
    #[serde(default = "default_fs_folder")]
    pub folder: String,
    /// Descend into subfolders.
    #[serde(default)]
    pub recursive: bool,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_fs_folder() -> String {
    ".".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct S3SourceConfig {
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default)]
    pub folder: String,
    /// Bound on each HTTP request to the bucket.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_region() -> String {
    "us-east-1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SharePointSourceConfig {
    /// e.g. `https://contoso.sharepoint.com/sites/finance`
    pub site_url: String,
    pub tenant_id: String,
    pub client_id: String,
    #[serde(default = "default_sharepoint_folder")]
    pub folder: String,
    /// Bound on each Graph request, token requests included.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_sharepoint_folder() -> String {
    "Shared Documents".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub deployment: Option<String>,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            deployment: None,
            api_version: default_api_version(),
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_api_version() -> String {
    "2024-02-01".to_string()
}
fn default_temperature() -> f32 {
    0.3
}
fn default_max_output_tokens() -> u32 {
    500
}
fn default_llm_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalysisConfig {
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_content_chars: default_max_content_chars(),
        }
    }
}

fn default_max_content_chars() -> usize {
    8000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProcessingConfig {
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
    #[serde(default = "default_supported_types")]
    pub supported_types: Vec<String>,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_file_timeout_secs")]
    pub file_timeout_secs: u64,
    #[serde(default = "default_list_timeout_secs")]
    pub list_timeout_secs: u64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_file_size_mb: default_max_file_size_mb(),
            supported_types: default_supported_types(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            file_timeout_secs: default_file_timeout_secs(),
            list_timeout_secs: default_list_timeout_secs(),
        }
    }
}

impl ProcessingConfig {
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }
}

fn default_max_file_size_mb() -> u64 {
    10
}
fn default_supported_types() -> Vec<String> {
    [
        ".txt", ".pdf", ".docx", ".doc", ".xlsx", ".xls", ".pptx", ".ppt", ".md", ".csv",
        ".json", ".xml",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_fetch_timeout_secs() -> u64 {
    60
}
fn default_file_timeout_secs() -> u64 {
    300
}
fn default_list_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReportConfig {
    #[serde(default = "default_output")]
    pub output: PathBuf,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
        }
    }
}

fn default_output() -> PathBuf {
    PathBuf::from("file_analysis.xlsx")
}

impl Config {
    /// Missing environment credentials for the configured source and
    /// provider. Empty when the run can start.
    pub fn credential_problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let missing = |var: &str| std::env::var(var).map(|v| v.is_empty()).unwrap_or(true);

        match &self.source {
            SourceConfig::Filesystem(fs) => {
                if !fs.root.exists() {
                    problems.push(format!(
                        "source.root does not exist: {}",
                        fs.root.display()
                    ));
                }
            }
            SourceConfig::S3(_) => {
                for var in ["AWS_ACCESS_KEY_ID", "AWS_SECRET_ACCESS_KEY"] {
                    if missing(var) {
                        problems.push(format!("{} is not set", var));
                    }
                }
            }
            SourceConfig::Sharepoint(_) => {
                if missing("SHAREPOINT_CLIENT_SECRET") {
                    problems.push("SHAREPOINT_CLIENT_SECRET is not set".to_string());
                }
            }
        }

        match self.llm.provider.as_str() {
            "openai" if missing("OPENAI_API_KEY") => {
                problems.push("OPENAI_API_KEY is not set".to_string());
            }
            "azure" if missing("AZURE_OPENAI_API_KEY") => {
                problems.push("AZURE_OPENAI_API_KEY is not set".to_string());
            }
            _ => {}
        }

        problems
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let mut config: Config =
        toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Allow-list entries are compared against lowercase format tags.
    for ext in &mut config.processing.supported_types {
        let lower = ext.trim().to_lowercase();
        *ext = if lower.starts_with('.') {
            lower
        } else {
            format!(".{}", lower)
        };
    }

    match config.llm.provider.as_str() {
        "disabled" | "openai" => {}
        "azure" => {
            if config.llm.base_url.is_none() {
                bail!("llm.base_url must be set to the Azure endpoint when provider is 'azure'");
            }
            if config.llm.deployment.is_none() {
                bail!("llm.deployment must be set when provider is 'azure'");
            }
        }
        other => bail!(
            "Unknown llm provider: '{}'. Must be disabled, openai, or azure.",
            other
        ),
    }

    if !(0.0..=2.0).contains(&config.llm.temperature) {
        bail!("llm.temperature must be in [0.0, 2.0]");
    }
    if config.llm.max_output_tokens == 0 {
        bail!("llm.max_output_tokens must be > 0");
    }
    if config.analysis.max_content_chars == 0 {
        bail!("analysis.max_content_chars must be > 0");
    }
    if config.processing.supported_types.is_empty() {
        bail!("processing.supported_types must not be empty");
    }
    if config.processing.fetch_timeout_secs == 0
        || config.processing.file_timeout_secs == 0
        || config.processing.list_timeout_secs == 0
    {
        bail!("processing timeouts must be > 0");
    }

    match &config.source {
        SourceConfig::S3(s3) => {
            if s3.bucket.is_empty() {
                bail!("source.bucket must not be empty");
            }
            if s3.request_timeout_secs == 0 {
                bail!("source.request_timeout_secs must be > 0");
            }
        }
        SourceConfig::Sharepoint(sp) if sp.request_timeout_secs == 0 => {
            bail!("source.request_timeout_secs must be > 0");
        }
        _ => {}
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_filesystem_config_uses_defaults() {
        let cfg = parse_config(
            r#"
[source]
kind = "filesystem"
root = "/srv/docs"
"#,
        )
        .unwrap();
        assert_eq!(cfg.source.kind(), "filesystem");
        assert_eq!(cfg.source.folder(), ".");
        assert_eq!(cfg.llm.provider, "openai");
        assert_eq!(cfg.llm.max_output_tokens, 500);
        assert!((cfg.llm.temperature - 0.3).abs() < f32::EPSILON);
        assert_eq!(cfg.analysis.max_content_chars, 8000);
        assert_eq!(cfg.processing.max_file_size_bytes(), 10 * 1024 * 1024);
        assert!(cfg.processing.supported_types.contains(&".docx".to_string()));
        assert_eq!(cfg.report.output, PathBuf::from("file_analysis.xlsx"));
    }

    #[test]
    fn sharepoint_folder_defaults_to_shared_documents() {
        let cfg = parse_config(
            r#"
[source]
kind = "sharepoint"
site_url = "https://contoso.sharepoint.com/sites/finance"
tenant_id = "t"
client_id = "c"
"#,
        )
        .unwrap();
        assert_eq!(cfg.source.folder(), "Shared Documents");
        assert_eq!(
            cfg.source.location(),
            "https://contoso.sharepoint.com/sites/finance"
        );
    }

    #[test]
    fn supported_types_are_normalized() {
        let cfg = parse_config(
            r#"
[source]
kind = "filesystem"
root = "."

[processing]
supported_types = ["PDF", ".Txt"]
"#,
        )
        .unwrap();
        assert_eq!(cfg.processing.supported_types, vec![".pdf", ".txt"]);
    }

    #[test]
    fn unknown_provider_rejected() {
        let err = parse_config(
            r#"
[source]
kind = "filesystem"
root = "."

[llm]
provider = "llama"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Unknown llm provider"));
    }

    #[test]
    fn azure_requires_deployment() {
        let err = parse_config(
            r#"
[source]
kind = "filesystem"
root = "."

[llm]
provider = "azure"
base_url = "https://acme.openai.azure.com"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("deployment"));
    }

    #[test]
    fn huge_size_limit_saturates() {
        let cfg = parse_config(
            r#"
[source]
kind = "filesystem"
root = "."

[processing]
max_file_size_mb = 9223372036854775807
"#,
        )
        .unwrap();
        assert_eq!(cfg.processing.max_file_size_bytes(), u64::MAX);
    }

    #[test]
    fn remote_sources_default_request_timeout() {
        let cfg = parse_config(
            r#"
[source]
kind = "s3"
bucket = "docs"
"#,
        )
        .unwrap();
        match cfg.source {
            SourceConfig::S3(s3) => assert_eq!(s3.request_timeout_secs, 60),
            other => panic!("unexpected source: {:?}", other),
        }
        assert_eq!(cfg.processing.list_timeout_secs, 120);
    }

    #[test]
    fn missing_root_is_a_credential_problem() {
        let cfg = parse_config(
            r#"
[source]
kind = "filesystem"
root = "/definitely/not/here"

[llm]
provider = "disabled"
"#,
        )
        .unwrap();
        let problems = cfg.credential_problems();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("does not exist"));
    }
}
