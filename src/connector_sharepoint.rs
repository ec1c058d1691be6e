//! SharePoint Online source via Microsoft Graph.
//!
//! Authenticates with the OAuth2 client-credentials flow (app registration
//! with `Sites.Read.All`), resolves the site from its URL, then lists and
//! downloads files from the site's default document library.
//!
//! # Configuration
//!
//! ```toml
//! [source]
//! kind = "sharepoint"
//! site_url = "https://contoso.sharepoint.com/sites/finance"
//! tenant_id = "00000000-0000-0000-0000-000000000000"
//! client_id = "11111111-1111-1111-1111-111111111111"
//! folder = "Shared Documents/Reports"
//! ```
//!
//! The client secret is read from `SHAREPOINT_CLIENT_SECRET`.
//!
//! Folder paths may be given with or without the library name: both
//! `Shared Documents/Reports` and `Reports` address the same folder, and
//! `Shared Documents` alone is the library root.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OnceCell};
use tracing::debug;

use crate::config::SharePointSourceConfig;
use crate::connector_s3::uri_encode;
use crate::models::FileDescriptor;
use crate::traits::FolderSource;

const GRAPH_BASE: &str = "https://graph.microsoft.com/v1.0";
const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";
const DEFAULT_LIBRARY: &str = "Shared Documents";

/// Refresh the token this long before Graph says it expires.
const TOKEN_SLACK: Duration = Duration::from_secs(60);

pub struct SharePointSource {
    config: SharePointSourceConfig,
    client_secret: String,
    client: reqwest::Client,
    token: Mutex<Option<CachedToken>>,
    site_id: OnceCell<String>,
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

#[derive(Deserialize)]
struct Site {
    id: String,
}

#[derive(Deserialize)]
struct DriveItemPage {
    #[serde(default)]
    value: Vec<DriveItem>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveItem {
    id: String,
    name: String,
    #[serde(default)]
    size: u64,
    last_modified_date_time: Option<DateTime<Utc>>,
    /// Present only on files.
    file: Option<serde_json::Value>,
}

impl SharePointSource {
    pub fn new(config: SharePointSourceConfig) -> Result<Self> {
        let client_secret = std::env::var("SHAREPOINT_CLIENT_SECRET")
            .context("SHAREPOINT_CLIENT_SECRET environment variable not set")?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            config,
            client_secret,
            client,
            token: Mutex::new(None),
            site_id: OnceCell::new(),
        })
    }

    async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(ref token) = *cached {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        let url = format!(
            "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
            self.config.tenant_id
        );
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", GRAPH_SCOPE),
        ];
        let resp = self
            .client
            .post(&url)
            .form(&form)
            .send()
            .await
            .context("SharePoint token request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!(
                "SharePoint authentication failed (HTTP {}): {}",
                status,
                body.chars().take(500).collect::<String>()
            );
        }

        let token: TokenResponse = resp.json().await?;
        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_SLACK);
        debug!(expires_in = token.expires_in, "acquired graph token");
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }

    async fn graph_get(&self, url: &str) -> Result<reqwest::Response> {
        let token = self.access_token().await?;
        let resp = self
            .client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .with_context(|| format!("Graph request failed: {}", url))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!(
                "Graph API error (HTTP {}): {}",
                status,
                body.chars().take(500).collect::<String>()
            );
        }
        Ok(resp)
    }

    async fn site_id(&self) -> Result<&str> {
        let id = self
            .site_id
            .get_or_try_init(|| async {
                let url = site_lookup_url(&self.config.site_url)?;
                let site: Site = self
                    .graph_get(&url)
                    .await
                    .with_context(|| format!("Failed to resolve site {}", self.config.site_url))?
                    .json()
                    .await?;
                Ok::<_, anyhow::Error>(site.id)
            })
            .await?;
        Ok(id.as_str())
    }
}

#[async_trait]
impl FolderSource for SharePointSource {
    fn kind(&self) -> &str {
        "sharepoint"
    }

    async fn list(&self, folder: &str) -> Result<Vec<FileDescriptor>> {
        let site_id = self.site_id().await?;
        let mut next = Some(children_url(site_id, folder));
        let mut files = Vec::new();

        while let Some(url) = next.take() {
            let page: DriveItemPage = self
                .graph_get(&url)
                .await
                .with_context(|| format!("Failed to list folder '{}'", folder))?
                .json()
                .await?;
            files.extend(
                page.value
                    .into_iter()
                    .filter(|item| item.file.is_some())
                    .map(|item| {
                        FileDescriptor::new(
                            item.name,
                            item.id,
                            item.size,
                            item.last_modified_date_time,
                        )
                    }),
            );
            next = page.next_link;
        }

        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    async fn fetch_bytes(&self, item_id: &str) -> Result<Vec<u8>> {
        let site_id = self.site_id().await?;
        let url = format!(
            "{}/sites/{}/drive/items/{}/content",
            GRAPH_BASE,
            site_id,
            uri_encode(item_id)
        );
        let resp = self.graph_get(&url).await?;
        Ok(resp.bytes().await?.to_vec())
    }
}

/// `https://contoso.sharepoint.com/sites/x` → `{graph}/sites/contoso.sharepoint.com:/sites/x`
fn site_lookup_url(site_url: &str) -> Result<String> {
    let rest = site_url
        .strip_prefix("https://")
        .or_else(|| site_url.strip_prefix("http://"))
        .unwrap_or(site_url);
    let (host, path) = match rest.split_once('/') {
        Some((host, path)) => (host, path.trim_matches('/')),
        None => (rest, ""),
    };
    if host.is_empty() {
        bail!("Invalid SharePoint site URL: {}", site_url);
    }
    if path.is_empty() {
        Ok(format!("{}/sites/{}", GRAPH_BASE, host))
    } else {
        Ok(format!("{}/sites/{}:/{}", GRAPH_BASE, host, path))
    }
}

/// Folder path inside the default library, without the library name.
fn library_relative(folder: &str) -> String {
    let trimmed = folder.trim().trim_matches('/');
    let rest = trimmed
        .strip_prefix(DEFAULT_LIBRARY)
        .filter(|r| r.is_empty() || r.starts_with('/'))
        .unwrap_or(trimmed);
    rest.trim_matches('/').to_string()
}

fn children_url(site_id: &str, folder: &str) -> String {
    let relative = library_relative(folder);
    if relative.is_empty() {
        format!("{}/sites/{}/drive/root/children", GRAPH_BASE, site_id)
    } else {
        let encoded = relative
            .split('/')
            .map(uri_encode)
            .collect::<Vec<_>>()
            .join("/");
        format!(
            "{}/sites/{}/drive/root:/{}:/children",
            GRAPH_BASE, site_id, encoded
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn site_lookup_from_url() {
        assert_eq!(
            site_lookup_url("https://contoso.sharepoint.com/sites/finance/").unwrap(),
            "https://graph.microsoft.com/v1.0/sites/contoso.sharepoint.com:/sites/finance"
        );
        assert_eq!(
            site_lookup_url("https://contoso.sharepoint.com").unwrap(),
            "https://graph.microsoft.com/v1.0/sites/contoso.sharepoint.com"
        );
        assert!(site_lookup_url("https:///sites/x").is_err());
    }

    #[test]
    fn library_name_is_optional() {
        assert_eq!(library_relative("Shared Documents"), "");
        assert_eq!(library_relative("/Shared Documents/Reports/"), "Reports");
        assert_eq!(library_relative("Reports/2024"), "Reports/2024");
        assert_eq!(library_relative("Shared Documents Archive"), "Shared Documents Archive");
    }

    #[test]
    fn children_url_encodes_segments() {
        assert_eq!(
            children_url("site-1", "Shared Documents"),
            "https://graph.microsoft.com/v1.0/sites/site-1/drive/root/children"
        );
        assert_eq!(
            children_url("site-1", "Q1 Reports/final"),
            "https://graph.microsoft.com/v1.0/sites/site-1/drive/root:/Q1%20Reports/final:/children"
        );
    }

    #[test]
    fn drive_items_keep_files_only() {
        let body = r#"{
            "value": [
                {"id": "01A", "name": "plan.docx", "size": 2048,
                 "lastModifiedDateTime": "2024-02-03T04:05:06Z", "file": {"mimeType": "x"}},
                {"id": "01B", "name": "Archive", "folder": {"childCount": 3}}
            ],
            "@odata.nextLink": "https://graph.microsoft.com/v1.0/next"
        }"#;
        let page: DriveItemPage = serde_json::from_str(body).unwrap();
        assert_eq!(page.next_link.as_deref(), Some("https://graph.microsoft.com/v1.0/next"));
        let files: Vec<&DriveItem> = page.value.iter().filter(|i| i.file.is_some()).collect();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "plan.docx");
        assert_eq!(files[0].size, 2048);
        assert!(files[0].last_modified_date_time.is_some());
    }
}
