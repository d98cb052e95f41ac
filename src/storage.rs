//! Object storage and artifact download.
//!
//! The storage bucket is a transient relay: whole-file translation uploads
//! the source document and hands the workflow its public URL, and the
//! workflow's own outputs are downloaded back from wherever it put them.
//!
//! [`HttpFetcher`] downloads any public URL. [`StorageClient`] talks to a
//! Supabase-compatible storage REST API and also implements
//! [`ArtifactFetcher`], sending its credentials only to its own host.

use crate::config::StorageConfig;
use crate::error::TranslateError;
use crate::pipeline::input::extension_of;
use crate::pipeline::merge::ArtifactFetcher;
use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;
use tracing::{debug, info, warn};

const SUFFIX_LEN: usize = 5;
const SUFFIX_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

fn http_client(timeout_secs: u64) -> Result<reqwest::Client, TranslateError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(concat!("edgequake-translate/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| TranslateError::Internal(format!("HTTP client: {e}")))
}

async fn get_bytes(request: reqwest::RequestBuilder, url: &str, timeout_secs: u64) -> Result<Vec<u8>, TranslateError> {
    let failed = |reason: String| TranslateError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            TranslateError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;
    Ok(bytes.to_vec())
}

/// Plain HTTP(S) downloader for public artifact URLs.
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout_secs: u64,
}

impl HttpFetcher {
    pub fn new(timeout_secs: u64) -> Result<Self, TranslateError> {
        Ok(Self {
            client: http_client(timeout_secs)?,
            timeout_secs,
        })
    }
}

#[async_trait]
impl ArtifactFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, TranslateError> {
        debug!("GET {}", url);
        get_bytes(self.client.get(url), url, self.timeout_secs).await
    }
}

/// Client for a Supabase-compatible storage bucket.
pub struct StorageClient {
    client: reqwest::Client,
    config: StorageConfig,
    timeout_secs: u64,
}

/// Where an upload landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// URL-encoded object path inside the bucket.
    pub path: String,
    /// Publicly readable URL.
    pub public_url: String,
}

impl StorageClient {
    pub fn new(config: StorageConfig, timeout_secs: u64) -> Result<Self, TranslateError> {
        Ok(Self {
            client: http_client(timeout_secs)?,
            config,
            timeout_secs,
        })
    }

    fn base(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    /// Public URL of an (already encoded) object path.
    pub fn public_url(&self, encoded_path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base(),
            self.config.bucket,
            encoded_path
        )
    }

    /// Upload `bytes` under `file_name` with a random suffix and return its
    /// public location.
    pub async fn upload(&self, file_name: &str, bytes: Vec<u8>) -> Result<StoredObject, TranslateError> {
        let path = urlencoding::encode(&object_path(file_name, &random_suffix())).into_owned();
        let url = format!("{}/storage/v1/object/{}/{}", self.base(), self.config.bucket, path);
        let size = bytes.len();

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .header("apikey", &self.config.api_key)
            .header("x-upsert", "false")
            .header(reqwest::header::CONTENT_TYPE, content_type(file_name))
            .body(bytes)
            .send()
            .await
            .map_err(|e| TranslateError::UploadFailed {
                name: file_name.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TranslateError::UploadFailed {
                name: file_name.to_string(),
                reason: format!("HTTP {}: {}", status, body.trim()),
            });
        }

        let stored = StoredObject {
            public_url: self.public_url(&path),
            path,
        };
        info!("Uploaded {} ({} bytes) → {}", file_name, size, stored.public_url);
        Ok(stored)
    }

    /// Download an object by public URL.
    pub async fn download(&self, url: &str) -> Result<Vec<u8>, TranslateError> {
        let mut request = self.client.get(url);
        if url.starts_with(self.base()) {
            request = request
                .bearer_auth(&self.config.api_key)
                .header("apikey", &self.config.api_key);
        }
        get_bytes(request, url, self.timeout_secs).await
    }

    /// Delete an uploaded object. Failure is logged and ignored.
    pub async fn remove(&self, encoded_path: &str) {
        let url = format!("{}/storage/v1/object/{}", self.base(), self.config.bucket);
        let decoded = urlencoding::decode(encoded_path)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| encoded_path.to_string());

        let result = self
            .client
            .delete(&url)
            .bearer_auth(&self.config.api_key)
            .header("apikey", &self.config.api_key)
            .json(&serde_json::json!({ "prefixes": [decoded] }))
            .send()
            .await;

        match result {
            Ok(r) if r.status().is_success() => debug!("Removed relay object {}", encoded_path),
            Ok(r) => warn!("Could not remove relay object {}: HTTP {}", encoded_path, r.status()),
            Err(e) => warn!("Could not remove relay object {}: {}", encoded_path, e),
        }
    }
}

#[async_trait]
impl ArtifactFetcher for StorageClient {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, TranslateError> {
        self.download(url).await
    }
}

/// `report.v2.docx` + `k3x9a` → `report.v2-k3x9a.docx`.
pub fn object_path(file_name: &str, suffix: &str) -> String {
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}-{suffix}.{ext}"),
        _ => format!("{file_name}-{suffix}"),
    }
}

/// Five random base-36 characters.
pub fn random_suffix() -> String {
    let mut rng = rand::thread_rng();
    (0..SUFFIX_LEN)
        .map(|_| SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())] as char)
        .collect()
}

fn content_type(file_name: &str) -> &'static str {
    match extension_of(file_name).as_deref() {
        Some("pdf") => "application/pdf",
        Some("txt") | Some("text") => "text/plain; charset=utf-8",
        Some("doc") => "application/msword",
        Some("docx") => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("zip") => "application/zip",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{serve_once, Canned};

    fn config(base_url: String) -> StorageConfig {
        StorageConfig {
            base_url,
            api_key: "anon-key".into(),
            bucket: "relay".into(),
        }
    }

    #[test]
    fn object_path_inserts_suffix_before_extension() {
        assert_eq!(object_path("report.v2.docx", "k3x9a"), "report.v2-k3x9a.docx");
        assert_eq!(object_path("README", "abcde"), "README-abcde");
    }

    #[test]
    fn suffix_is_five_base36_chars() {
        for _ in 0..50 {
            let s = random_suffix();
            assert_eq!(s.len(), 5);
            assert!(s.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
        }
    }

    #[test]
    fn public_url_shape() {
        let c = StorageClient::new(config("https://proj.supabase.co/".into()), 5).unwrap();
        assert_eq!(
            c.public_url("a%20b-xyz12.pdf"),
            "https://proj.supabase.co/storage/v1/object/public/relay/a%20b-xyz12.pdf"
        );
    }

    #[test]
    fn content_types() {
        assert_eq!(content_type("a.PDF"), "application/pdf");
        assert_eq!(content_type("a.bin"), "application/octet-stream");
    }

    #[tokio::test]
    async fn upload_posts_to_bucket_and_returns_public_url() {
        let (base, server) = serve_once(Canned::ok("application/json", r#"{"Key":"relay/x"}"#)).await;
        let c = StorageClient::new(config(base.clone()), 5).unwrap();

        let stored = c.upload("my file.pdf", b"%PDF-1.7".to_vec()).await.unwrap();
        assert!(stored.path.starts_with("my%20file-"));
        assert!(stored.path.ends_with(".pdf"));
        assert_eq!(
            stored.public_url,
            format!("{base}/storage/v1/object/public/relay/{}", stored.path)
        );

        let request = server.await.unwrap();
        assert!(request.starts_with(&format!("POST /storage/v1/object/relay/{}", stored.path)));
        assert!(request.contains("apikey: anon-key"));
        assert!(request.ends_with("%PDF-1.7"));
    }

    #[tokio::test]
    async fn upload_error_status_is_upload_failed() {
        let (base, _server) = serve_once(Canned::status("409 Conflict", "Duplicate")).await;
        let c = StorageClient::new(config(base), 5).unwrap();
        let err = c.upload("a.pdf", vec![1, 2, 3]).await.unwrap_err();
        assert!(matches!(err, TranslateError::UploadFailed { .. }));
        assert!(err.to_string().contains("Duplicate"));
    }

    #[tokio::test]
    async fn http_fetcher_downloads_bytes() {
        let (base, _server) = serve_once(Canned::ok("application/octet-stream", b"PK\x03\x04".to_vec())).await;
        let f = HttpFetcher::new(5).unwrap();
        let bytes = f.fetch(&format!("{base}/out/page_1.docx")).await.unwrap();
        assert_eq!(bytes, b"PK\x03\x04");
    }

    #[tokio::test]
    async fn http_fetcher_maps_404() {
        let (base, _server) = serve_once(Canned::status("404 Not Found", "")).await;
        let f = HttpFetcher::new(5).unwrap();
        let err = f.fetch(&format!("{base}/missing.pdf")).await.unwrap_err();
        assert!(matches!(err, TranslateError::DownloadFailed { .. }));
    }

    #[tokio::test]
    async fn storage_download_sends_credentials_to_own_host() {
        let (base, server) = serve_once(Canned::ok("application/pdf", "%PDF")).await;
        let c = StorageClient::new(config(base.clone()), 5).unwrap();
        let url = c.public_url("x.pdf");
        assert_eq!(c.fetch(&url).await.unwrap(), b"%PDF");
        let request = server.await.unwrap();
        assert!(request.contains("apikey: anon-key"));
    }
}
