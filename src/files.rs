//! Uploaded-file retrieval backends.
//!
//! File documents reference an upload stored outside the database, keyed
//! by the document id. [`FileStore`] abstracts the two backends: a local
//! uploads directory and an S3 bucket.
//!
//! The S3 backend signs requests with
//! [AWS Signature Version 4](https://docs.aws.amazon.com/AmazonS3/latest/API/sigv4-auth-using-authorization-header.html)
//! using only pure-Rust dependencies (`hmac`, `sha2`) — no C library
//! dependencies like `aws-lc-sys`. Credentials come from the standard
//! `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` / `AWS_SESSION_TOKEN`
//! environment variables, and a custom `endpoint_url` supports
//! S3-compatible services (MinIO, LocalStack).

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::config::UploadsConfig;

type HmacSha256 = Hmac<Sha256>;

/// Retrieval contract for uploaded file bytes.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Fetch the raw bytes uploaded for a document.
    async fn fetch(&self, doc_id: &str) -> Result<Vec<u8>>;
}

/// Uploads stored on the local filesystem, one file per document id.
pub struct LocalFileStore {
    dir: PathBuf,
}

impl LocalFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn fetch(&self, doc_id: &str) -> Result<Vec<u8>> {
        let path = self.dir.join(doc_id);
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed to read upload {}", path.display()))
    }
}

/// Uploads stored in an S3 bucket under `<prefix>/<doc_id>`.
pub struct S3FileStore {
    bucket: String,
    region: String,
    prefix: String,
    endpoint_url: Option<String>,
    creds: AwsCredentials,
    client: reqwest::Client,
}

impl S3FileStore {
    pub fn new(config: &UploadsConfig) -> Result<Self> {
        let bucket = config
            .bucket
            .clone()
            .ok_or_else(|| anyhow::anyhow!("uploads.bucket required for s3 backend"))?;
        Ok(Self {
            bucket,
            region: config.region.clone(),
            prefix: config.prefix.trim_matches('/').to_string(),
            endpoint_url: config.endpoint_url.clone(),
            creds: AwsCredentials::from_env()?,
            client: reqwest::Client::new(),
        })
    }

    fn host(&self) -> String {
        if let Some(ref endpoint) = self.endpoint_url {
            // Custom endpoint (MinIO, LocalStack, etc.)
            endpoint
                .trim_start_matches("https://")
                .trim_start_matches("http://")
                .trim_end_matches('/')
                .to_string()
        } else {
            format!("{}.s3.{}.amazonaws.com", self.bucket, self.region)
        }
    }

    fn key_for(&self, doc_id: &str) -> String {
        if self.prefix.is_empty() {
            doc_id.to_string()
        } else {
            format!("{}/{}", self.prefix, doc_id)
        }
    }
}

#[async_trait]
impl FileStore for S3FileStore {
    async fn fetch(&self, doc_id: &str) -> Result<Vec<u8>> {
        let key = self.key_for(doc_id);
        let host = self.host();
        let encoded_key = key
            .split('/')
            .map(uri_encode)
            .collect::<Vec<_>>()
            .join("/");
        let url = format!("https://{}/{}", host, encoded_key);

        let now = Utc::now();
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

        let payload_hash = hex_sha256(b"");

        let mut headers = vec![
            ("host".to_string(), host.clone()),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(ref token) = self.creds.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let signed_headers: String = headers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");

        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v))
            .collect();

        let canonical_uri = format!("/{}", encoded_key);
        let canonical_request = format!(
            "GET\n{}\n\n{}\n{}\n{}",
            canonical_uri, canonical_headers, signed_headers, payload_hash
        );

        let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );

        let signing_key =
            derive_signing_key(&self.creds.secret_access_key, &date_stamp, &self.region, "s3");
        let signature = hex_hmac_sha256(&signing_key, string_to_sign.as_bytes());

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.creds.access_key_id, credential_scope, signed_headers, signature
        );

        let mut req_builder = self
            .client
            .get(&url)
            .header("Authorization", &authorization)
            .header("x-amz-content-sha256", &payload_hash)
            .header("x-amz-date", &amz_date);

        if let Some(ref token) = self.creds.session_token {
            req_builder = req_builder.header("x-amz-security-token", token);
        }

        let resp = req_builder
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to get s3://{}/{}: {}", self.bucket, key, e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            bail!("S3 GetObject failed (HTTP {}) for key '{}'", status, key);
        }

        Ok(resp.bytes().await?.to_vec())
    }
}

// ============ AWS Credentials ============

/// AWS credentials loaded from environment variables.
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

// ============ AWS SigV4 Helpers ============

/// Compute the hex-encoded SHA-256 hash of data.
fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Compute HMAC-SHA256 of data with the given key.
fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Compute hex-encoded HMAC-SHA256.
fn hex_hmac_sha256(key: &[u8], data: &[u8]) -> String {
    hex::encode(hmac_sha256(key, data))
}

/// Derive the AWS SigV4 signing key for a given date, region, and service.
///
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

/// URI-encode a string per RFC 3986 (used in SigV4 canonical requests).
///
/// Encodes all characters except unreserved characters:
/// `A-Z a-z 0-9 - _ . ~`
fn uri_encode(s: &str) -> String {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_fetch_reads_upload() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("doc-1"), b"file bytes").unwrap();

        let store = LocalFileStore::new(dir.path());
        let bytes = store.fetch("doc-1").await.unwrap();
        assert_eq!(bytes, b"file bytes");
    }

    #[tokio::test]
    async fn test_local_fetch_missing_upload_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFileStore::new(dir.path());
        assert!(store.fetch("missing").await.is_err());
    }

    #[test]
    fn test_uri_encode_passes_unreserved() {
        assert_eq!(uri_encode("doc-1_a.b~c"), "doc-1_a.b~c");
        assert_eq!(uri_encode("a b/c"), "a%20b%2Fc");
    }

    #[test]
    fn test_derive_signing_key_deterministic() {
        let a = derive_signing_key("secret", "20260101", "us-east-1", "s3");
        let b = derive_signing_key("secret", "20260101", "us-east-1", "s3");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }
}
