// src/server/http.rs

//! HTTP package server
//!
//! Talks to a JSON catalog API: paged search, specification resolution,
//! login, and binary download with checksum verification. Replies decode
//! through a tagged result type: either the typed payload or a protocol
//! failure carrying the server-supplied message, decided once at the
//! deserialization boundary.

use crate::error::{Error, ErrorKind, Result};
use crate::model::{CatalogEntry, PackageSpec, PackageVersion};
use crate::retry::RetryPolicy;
use crate::server::{ChecksumMode, PackageServer};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use url::Url;

/// Default timeout for HTTP requests (30 seconds)
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum retry attempts for transient failures
const MAX_RETRIES: u32 = 3;

/// Base retry delay in milliseconds
const RETRY_DELAY_MS: u64 = 1000;

/// Application-level error payload
#[derive(Debug, Deserialize)]
struct ProtocolFailure {
    message: String,
}

/// A reply is either an error payload or the expected body, never both
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ApiReply<T> {
    Failure(ProtocolFailure),
    Payload(T),
}

#[derive(Debug, Deserialize)]
struct CatalogPage {
    items: Vec<CatalogEntry>,
    has_more: bool,
}

/// Decode a response body, surfacing server-reported failures as typed errors
fn decode_body<T: DeserializeOwned>(server: &str, body: &[u8]) -> Result<T> {
    match serde_json::from_slice::<ApiReply<T>>(body) {
        Ok(ApiReply::Payload(value)) => Ok(value),
        Ok(ApiReply::Failure(failure)) => Err(Error::ProtocolError {
            server: server.to_string(),
            message: failure.message,
        }),
        Err(e) => Err(Error::ParseError(format!(
            "Failed to decode reply from '{server}': {e}"
        ))),
    }
}

/// Client for one remote JSON catalog
pub struct HttpPackageServer {
    name: String,
    base: Url,
    url_base: String,
    client: reqwest::Client,
    connected: AtomicBool,
    auth: Mutex<Option<(String, String)>>,
    retry: RetryPolicy,
}

impl HttpPackageServer {
    pub fn new(name: impl Into<String>, url_base: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::InitError(format!("Failed to create HTTP client: {e}")))?;

        let trimmed = url_base.trim_end_matches('/').to_string();
        // A trailing slash keeps Url::join from replacing the last path segment
        let base = Url::parse(&format!("{trimmed}/"))
            .map_err(|e| Error::InitError(format!("Invalid server url '{url_base}': {e}")))?;

        Ok(Self {
            name: name.into(),
            url_base: trimmed,
            base,
            client,
            connected: AtomicBool::new(true),
            auth: Mutex::new(None),
            retry: RetryPolicy::new(MAX_RETRIES, Duration::from_millis(RETRY_DELAY_MS))
                .retry_kind(ErrorKind::Download),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| Error::InitError(format!("Invalid endpoint '{path}': {e}")))
    }

    fn apply_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &*self.auth.lock().unwrap() {
            Some((user, pass)) => request.basic_auth(user, Some(pass.clone())),
            None => request,
        }
    }

    /// Send a request, retrying transient transport failures
    async fn send<F>(&self, build: F) -> Result<reqwest::Response>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        self.retry
            .run(|| {
                let request = self.apply_auth(build());
                let server = self.name.clone();
                async move {
                    request
                        .send()
                        .await
                        .map_err(|e| Error::DownloadError(format!("Request to '{server}': {e}")))
                }
            })
            .await
    }

    /// Read a reply body; 404 is "not found", not an error
    async fn read_reply<T: DeserializeOwned>(
        &self,
        url: &Url,
        response: reqwest::Response,
    ) -> Result<Option<T>> {
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::DownloadError(format!("Failed to read reply from {url}: {e}")))?;

        if !status.is_success() {
            if let Ok(failure) = serde_json::from_slice::<ProtocolFailure>(&body) {
                return Err(Error::ProtocolError {
                    server: self.name.clone(),
                    message: failure.message,
                });
            }
            return Err(Error::DownloadError(format!("HTTP {status} from {url}")));
        }

        decode_body(&self.name, &body).map(Some)
    }
}

#[async_trait]
impl PackageServer for HttpPackageServer {
    fn name(&self) -> &str {
        &self.name
    }

    fn url_base(&self) -> &str {
        &self.url_base
    }

    fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn login(&self, username: &str, password: &str) -> Result<()> {
        let url = self.endpoint("api/v1/login")?;
        let response = self
            .client
            .post(url.clone())
            .basic_auth(username, Some(password))
            .send()
            .await
            .map_err(|e| Error::DownloadError(format!("Request to '{}': {e}", self.name)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.bytes().await.unwrap_or_default();
            let message = serde_json::from_slice::<ProtocolFailure>(&body)
                .map(|f| f.message)
                .unwrap_or_else(|_| format!("HTTP {status}"));
            return Err(Error::LoginError {
                server: self.name.clone(),
                message,
            });
        }

        *self.auth.lock().unwrap() = Some((username.to_string(), password.to_string()));
        self.connected.store(true, Ordering::SeqCst);
        info!("Logged in to '{}'", self.name);
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        *self.auth.lock().unwrap() = None;
        Ok(())
    }

    async fn search(
        &self,
        filter: Option<&str>,
        page: usize,
        per_page: usize,
    ) -> Result<(Vec<CatalogEntry>, bool)> {
        let url = self.endpoint("api/v1/catalog")?;
        debug!("Searching '{}' page {} (filter: {:?})", self.name, page, filter);

        let response = self
            .send(|| {
                let mut request = self.client.get(url.clone()).query(&[
                    ("page", page.to_string()),
                    ("per_page", per_page.to_string()),
                ]);
                if let Some(term) = filter {
                    request = request.query(&[("search", term)]);
                }
                request
            })
            .await?;

        let reply: CatalogPage = self
            .read_reply(&url, response)
            .await?
            .unwrap_or(CatalogPage {
                items: Vec::new(),
                has_more: false,
            });
        Ok((reply.items, reply.has_more))
    }

    async fn resolve_version(&self, spec: &PackageSpec) -> Result<Option<PackageVersion>> {
        let url = self.endpoint("api/v1/resolve")?;
        debug!("Resolving {} on '{}'", spec.cache_key(), self.name);

        let response = self.send(|| self.client.post(url.clone()).json(spec)).await?;
        self.read_reply(&url, response).await
    }

    async fn get_package_version(
        &self,
        spec: &PackageSpec,
        include_binary: bool,
    ) -> Result<Option<PackageVersion>> {
        let url = self.endpoint("api/v1/package-version")?;
        let response = self
            .send(|| {
                self.client
                    .post(url.clone())
                    .query(&[("include_binary", include_binary.to_string())])
                    .json(spec)
            })
            .await?;
        self.read_reply(&url, response).await
    }

    async fn get_package(&self, distributor: &str, name: &str) -> Result<Option<CatalogEntry>> {
        let url = self.endpoint(&format!("api/v1/package/{distributor}/{name}"))?;
        let response = self.send(|| self.client.get(url.clone())).await?;
        self.read_reply(&url, response).await
    }

    async fn download_package_version(
        &self,
        version: &PackageVersion,
        checksum: ChecksumMode,
        dest_dir: &Path,
    ) -> Result<PathBuf> {
        let url = self.endpoint("api/v1/download")?;
        info!(
            "Downloading {} {} from '{}'",
            version.name, version.version, self.name
        );

        let mut response = self
            .send(|| {
                self.client.get(url.clone()).query(&[
                    ("name", version.name.as_str()),
                    ("distributor", version.distributor.as_str()),
                    ("version", version.version.as_str()),
                    ("branch", version.branch.as_str()),
                    ("target", version.target.as_str()),
                    ("configuration", version.configuration.as_str()),
                ])
            })
            .await?;

        if !response.status().is_success() {
            return Err(Error::DownloadError(format!(
                "HTTP {} from {url}",
                response.status()
            )));
        }

        tokio::fs::create_dir_all(dest_dir).await.map_err(|e| {
            Error::IoError(format!(
                "Failed to create directory {}: {e}",
                dest_dir.display()
            ))
        })?;

        let dest_path = dest_dir.join(version.binary_file_name());
        let temp_path = dest_path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&temp_path).await.map_err(|e| {
            Error::IoError(format!("Failed to create {}: {e}", temp_path.display()))
        })?;

        let mut hasher = Sha256::new();
        let mut downloaded: u64 = 0;
        loop {
            let chunk = response.chunk().await.map_err(|e| {
                Error::DownloadError(format!("Failed to read download stream: {e}"))
            })?;
            let Some(chunk) = chunk else { break };
            hasher.update(&chunk);
            downloaded += chunk.len() as u64;
            file.write_all(&chunk)
                .await
                .map_err(|e| Error::IoError(format!("Failed to write downloaded data: {e}")))?;
        }
        file.flush()
            .await
            .map_err(|e| Error::IoError(format!("Failed to flush downloaded data: {e}")))?;
        drop(file);

        if checksum == ChecksumMode::Verify {
            if let Some(expected) = &version.checksum {
                let actual = hex::encode(hasher.finalize());
                if &actual != expected {
                    // Remove the corrupt file so it cannot pollute the cache
                    let _ = tokio::fs::remove_file(&temp_path).await;
                    return Err(Error::ChecksumMismatch {
                        expected: expected.clone(),
                        actual,
                    });
                }
            } else {
                warn!(
                    "No checksum published for {} {}, skipping verification",
                    version.name, version.version
                );
            }
        }

        tokio::fs::rename(&temp_path, &dest_path).await.map_err(|e| {
            Error::IoError(format!(
                "Failed to move {} to {}: {e}",
                temp_path.display(),
                dest_path.display()
            ))
        })?;

        info!("Downloaded {} bytes to {}", downloaded, dest_path.display());
        Ok(dest_path)
    }

    fn invalidate_cache(&self) {
        // Responses are not cached client-side; caching lives in the collection
    }
}
