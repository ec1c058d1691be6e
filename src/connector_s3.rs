//! Amazon S3 source.
//!
//! Lists and downloads objects using the S3 REST API with AWS Signature V4
//! authentication. Supports custom endpoints for S3-compatible services
//! (MinIO, LocalStack).
//!
//! Uses only pure-Rust dependencies (`hmac`, `sha2`) for signing.
//!
//! # Configuration
//!
//! ```toml
//! [source]
//! kind = "s3"
//! bucket = "acme-docs"
//! prefix = "shared/"
//! region = "us-east-1"
//! folder = "finance"
//! # endpoint_url = "http://localhost:9000"   # MinIO
//! ```
//!
//! The listed folder is `prefix` + `folder`. Only objects directly under it
//! are returned (the listing uses `/` as delimiter), so "subfolders" are
//! skipped the same way a directory listing skips directories.
//!
//! # Environment Variables
//!
//! - `AWS_ACCESS_KEY_ID`: required
//! - `AWS_SECRET_ACCESS_KEY`: required
//! - `AWS_SESSION_TOKEN`: optional (temporary credentials)

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::debug;

use crate::config::S3SourceConfig;
use crate::models::FileDescriptor;
use crate::traits::FolderSource;

type HmacSha256 = Hmac<Sha256>;

pub struct S3Source {
    config: S3SourceConfig,
    creds: AwsCredentials,
    client: reqwest::Client,
}

impl S3Source {
    /// Reads credentials from the environment.
    pub fn new(config: S3SourceConfig) -> Result<Self> {
        let creds = AwsCredentials::from_env()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            config,
            creds,
            client,
        })
    }

    /// Send a signed GET for `path` (already URI-encoded, no leading slash).
    async fn signed_get(&self, path: &str, query: &[(String, String)]) -> Result<reqwest::Response> {
        let endpoint = S3Endpoint::from_config(&self.config);
        let canonical_uri = format!("/{}{}", endpoint.base_path, path);
        let request = SignedRequest::new(
            &self.config.region,
            &self.creds,
            &endpoint.host,
            &canonical_uri,
            query,
            Utc::now(),
        );

        let mut url = format!("{}://{}{}", endpoint.scheme, endpoint.host, canonical_uri);
        if !request.canonical_query.is_empty() {
            url.push('?');
            url.push_str(&request.canonical_query);
        }

        let mut builder = self
            .client
            .get(&url)
            .header("Authorization", &request.authorization)
            .header("x-amz-content-sha256", &request.payload_hash)
            .header("x-amz-date", &request.amz_date);
        if let Some(ref token) = self.creds.session_token {
            builder = builder.header("x-amz-security-token", token);
        }

        Ok(builder.send().await?)
    }
}

#[async_trait]
impl FolderSource for S3Source {
    fn kind(&self) -> &str {
        "s3"
    }

    async fn list(&self, folder: &str) -> Result<Vec<FileDescriptor>> {
        let prefix = folder_prefix(&self.config.prefix, folder);
        let mut files = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut query = vec![
                ("list-type".to_string(), "2".to_string()),
                ("max-keys".to_string(), "1000".to_string()),
                ("delimiter".to_string(), "/".to_string()),
            ];
            if !prefix.is_empty() {
                query.push(("prefix".to_string(), prefix.clone()));
            }
            if let Some(ref token) = continuation_token {
                query.push(("continuation-token".to_string(), token.clone()));
            }

            let resp = self.signed_get("", &query).await.with_context(|| {
                format!(
                    "Failed to list S3 objects in s3://{}/{}",
                    self.config.bucket, prefix
                )
            })?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                bail!(
                    "S3 ListObjectsV2 failed (HTTP {}): {}",
                    status,
                    body.chars().take(500).collect::<String>()
                );
            }

            let xml_body = resp.text().await?;
            let page = parse_list_objects_response(&xml_body);
            debug!(objects = page.objects.len(), truncated = page.is_truncated, "s3 list page");
            files.extend(page.objects.into_iter().map(|obj| {
                let name = obj.key.rsplit('/').next().unwrap_or(&obj.key).to_string();
                FileDescriptor::new(name, obj.key, obj.size, obj.last_modified)
            }));

            match (page.is_truncated, page.next_token) {
                (true, Some(token)) => continuation_token = Some(token),
                _ => break,
            }
        }

        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    async fn fetch_bytes(&self, key: &str) -> Result<Vec<u8>> {
        let encoded_key = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
        let resp = self
            .signed_get(&encoded_key, &[])
            .await
            .with_context(|| format!("Failed to get s3://{}/{}", self.config.bucket, key))?;

        if !resp.status().is_success() {
            bail!(
                "S3 GetObject failed (HTTP {}) for key '{}'",
                resp.status(),
                key
            );
        }

        Ok(resp.bytes().await?.to_vec())
    }
}

// ============ AWS Credentials ============

struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    fn from_env() -> Result<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .context("AWS_ACCESS_KEY_ID environment variable not set")?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .context("AWS_SECRET_ACCESS_KEY environment variable not set")?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

// ============ SigV4 ============

/// Headers for one signed, body-less GET request.
struct SignedRequest {
    canonical_query: String,
    payload_hash: String,
    amz_date: String,
    authorization: String,
}

impl SignedRequest {
    fn new(
        region: &str,
        creds: &AwsCredentials,
        host: &str,
        canonical_uri: &str,
        query: &[(String, String)],
        now: DateTime<Utc>,
    ) -> Self {
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

        // Canonical query string must be sorted by key.
        let mut sorted = query.to_vec();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));
        let canonical_query = sorted
            .iter()
            .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let payload_hash = hex_sha256(b"");

        let mut headers = vec![
            ("host".to_string(), host.to_string()),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(ref token) = creds.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let signed_headers = headers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");
        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v))
            .collect();

        let canonical_request = format!(
            "GET\n{}\n{}\n{}\n{}\n{}",
            canonical_uri, canonical_query, canonical_headers, signed_headers, payload_hash
        );

        let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );

        let signing_key = derive_signing_key(&creds.secret_access_key, &date_stamp, region, "s3");
        let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            creds.access_key_id, credential_scope, signed_headers, signature
        );

        Self {
            canonical_query,
            payload_hash,
            amz_date,
            authorization,
        }
    }
}

/// Where requests go. AWS uses virtual-hosted style
/// (`<bucket>.s3.<region>.amazonaws.com`); custom endpoints use path style
/// with the bucket as first path segment.
struct S3Endpoint {
    scheme: &'static str,
    host: String,
    /// Empty, or `<bucket>/`.
    base_path: String,
}

impl S3Endpoint {
    fn from_config(config: &S3SourceConfig) -> Self {
        match config.endpoint_url {
            Some(ref endpoint) => {
                let scheme = if endpoint.starts_with("http://") {
                    "http"
                } else {
                    "https"
                };
                let host = endpoint
                    .trim_start_matches("https://")
                    .trim_start_matches("http://")
                    .trim_end_matches('/')
                    .to_string();
                Self {
                    scheme,
                    host,
                    base_path: format!("{}/", uri_encode(&config.bucket)),
                }
            }
            None => Self {
                scheme: "https",
                host: format!("{}.s3.{}.amazonaws.com", config.bucket, config.region),
                base_path: String::new(),
            },
        }
    }
}

/// Join the configured prefix and a folder into a listing prefix ending in `/`.
fn folder_prefix(prefix: &str, folder: &str) -> String {
    let joined = [prefix.trim_matches('/'), folder.trim_matches('/')]
        .iter()
        .filter(|s| !s.is_empty() && **s != ".")
        .copied()
        .collect::<Vec<_>>()
        .join("/");
    if joined.is_empty() {
        joined
    } else {
        format!("{}/", joined)
    }
}

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// URI-encode per RFC 3986, keeping only `A-Z a-z 0-9 - _ . ~`.
pub(crate) fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}

// ============ ListObjectsV2 parsing ============

struct S3Object {
    key: String,
    last_modified: Option<DateTime<Utc>>,
    size: u64,
}

struct ListPage {
    objects: Vec<S3Object>,
    is_truncated: bool,
    next_token: Option<String>,
}

fn parse_list_objects_response(xml: &str) -> ListPage {
    let mut objects = Vec::new();
    let is_truncated = extract_xml_value(xml, "IsTruncated")
        .map(|v| v == "true")
        .unwrap_or(false);
    let next_token = extract_xml_value(xml, "NextContinuationToken");

    let mut remaining = xml;
    while let Some(start) = remaining.find("<Contents>") {
        let block_start = start + "<Contents>".len();
        let Some(end) = remaining[block_start..].find("</Contents>") else {
            break;
        };
        let block = &remaining[block_start..block_start + end];
        remaining = &remaining[block_start + end + "</Contents>".len()..];

        let key = extract_xml_value(block, "Key").unwrap_or_default();
        // Folder placeholder objects.
        if key.is_empty() || key.ends_with('/') {
            continue;
        }

        let last_modified = extract_xml_value(block, "LastModified")
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc));
        let size = extract_xml_value(block, "Size")
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);

        objects.push(S3Object {
            key: unescape_xml(&key),
            last_modified,
            size,
        });
    }

    ListPage {
        objects,
        is_truncated,
        next_token,
    }
}

fn extract_xml_value(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)?;
    Some(xml[start..start + end].to_string())
}

fn unescape_xml(s: &str) -> String {
    quick_xml::escape::unescape(s)
        .map(|c| c.into_owned())
        .unwrap_or_else(|_| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult>
  <Name>acme-docs</Name>
  <Prefix>shared/finance/</Prefix>
  <IsTruncated>true</IsTruncated>
  <NextContinuationToken>tok-2</NextContinuationToken>
  <Contents>
    <Key>shared/finance/</Key>
    <Size>0</Size>
  </Contents>
  <Contents>
    <Key>shared/finance/Q1 &amp; Q2.xlsx</Key>
    <LastModified>2024-05-01T10:20:30.000Z</LastModified>
    <ETag>"abc"</ETag>
    <Size>4096</Size>
  </Contents>
  <Contents>
    <Key>shared/finance/notes.txt</Key>
    <LastModified>2024-05-02T00:00:00.000Z</LastModified>
    <Size>12</Size>
  </Contents>
  <CommonPrefixes><Prefix>shared/finance/archive/</Prefix></CommonPrefixes>
</ListBucketResult>"#;

    #[test]
    fn parses_objects_and_skips_folder_markers() {
        let page = parse_list_objects_response(PAGE);
        assert!(page.is_truncated);
        assert_eq!(page.next_token.as_deref(), Some("tok-2"));
        assert_eq!(page.objects.len(), 2);
        assert_eq!(page.objects[0].key, "shared/finance/Q1 & Q2.xlsx");
        assert_eq!(page.objects[0].size, 4096);
        assert_eq!(
            page.objects[0].last_modified.unwrap().to_rfc3339(),
            "2024-05-01T10:20:30+00:00"
        );
    }

    #[test]
    fn folder_prefix_joins_and_terminates() {
        assert_eq!(folder_prefix("", ""), "");
        assert_eq!(folder_prefix("shared/", "finance"), "shared/finance/");
        assert_eq!(folder_prefix("", "/finance/"), "finance/");
        assert_eq!(folder_prefix("shared", "."), "shared/");
    }

    #[test]
    fn uri_encode_keeps_unreserved() {
        assert_eq!(uri_encode("a-b_c.d~e"), "a-b_c.d~e");
        assert_eq!(uri_encode("Q1 & Q2.xlsx"), "Q1%20%26%20Q2.xlsx");
        assert_eq!(uri_encode("a/b"), "a%2Fb");
    }

    #[test]
    fn signing_key_matches_aws_reference() {
        // Example from the AWS SigV4 documentation.
        let key = derive_signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20120215",
            "us-east-1",
            "iam",
        );
        assert_eq!(
            hex::encode(key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[test]
    fn custom_endpoint_uses_path_style() {
        let config = S3SourceConfig {
            bucket: "docs".to_string(),
            prefix: String::new(),
            region: "us-east-1".to_string(),
            endpoint_url: Some("http://localhost:9000/".to_string()),
            folder: String::new(),
            request_timeout_secs: 60,
        };
        let endpoint = S3Endpoint::from_config(&config);
        assert_eq!(endpoint.host, "localhost:9000");
        assert_eq!(endpoint.base_path, "docs/");
        assert_eq!(endpoint.scheme, "http");
    }
}
