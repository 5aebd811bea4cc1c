/*============================================================
  Project: appleloops
  Module: appleloops::content
  ------------------------------------------------------------
  Purpose:
    HTTP boundary: status probes, manifest retrieval with
    mirror failover, package downloads and Content-Length
    lookups.

  Security / Safety Notes:
    Read-only HTTPS requests. Certificate validation is only
    relaxed when the operator explicitly allows it.

  Dependencies:
    reqwest for HTTP, tokio for file output, tempfile for the
    transient manifest directory.

  Operational Scope:
    Requests are issued one at a time; each call completes
    before the caller moves on.

  Revision History:
    2026-10-18 CW  Adapted HTTP client for vendor content.
  ------------------------------------------------------------
  Principles Observed:
    - Transport errors converted at this boundary
    - Primary host first, mirror second, then fail
    - Fetched manifests never outlive parsing
============================================================*/

use std::path::Path;
use std::time::Duration;

use reqwest::header::{CONTENT_LENGTH, RANGE};
use reqwest::StatusCode;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::config::{ContentConfig, HttpConfig, BUNDLE_ID};
use crate::error::{LoopsError, Result};
use crate::logger::Logger;
use crate::manifest::ManifestDocument;

/// Client for the vendor content host and its mirrors.
#[derive(Clone)]
pub struct ContentClient {
    client: reqwest::Client,
    content: ContentConfig,
}

impl ContentClient {
    /// Construct a new client from configuration.
    pub fn new(http: &HttpConfig, content: &ContentConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent(http.user_agent.clone())
            .danger_accept_invalid_certs(http.allow_insecure);
        if http.timeout > 0 {
            builder = builder.timeout(Duration::from_secs(http.timeout));
        }
        if let Some(proxy) = &http.proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|err| LoopsError::Config(format!("Invalid proxy: {err}")))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|err| LoopsError::Network(format!("Failed to build HTTP client: {err}")))?;

        Ok(Self {
            client,
            content: content.clone(),
        })
    }

    /// HTTP status of a HEAD request, or `None` on transport failure.
    pub async fn status(&self, url: &str) -> Option<u16> {
        self.client
            .head(url)
            .send()
            .await
            .ok()
            .map(|response| response.status().as_u16())
    }

    /// True when `url` answers with an accepted status.
    pub async fn is_available(&self, url: &str) -> bool {
        self.status(url)
            .await
            .map(|status| self.content.accepts(status))
            .unwrap_or(false)
    }

    /// Fetch a named manifest, falling back to the mirror host.
    ///
    /// The manifest is written to a private temporary directory, parsed,
    /// and removed before returning.
    pub async fn fetch_manifest(&self, manifest: &str, logger: &Logger) -> Result<ManifestDocument> {
        let primary = self.content.manifest_url(manifest);
        let failover = self.content.failover_manifest_url(manifest);

        let mut failures = Vec::new();
        for url in [primary, failover] {
            match self.get_bytes(&url).await {
                Ok(bytes) => {
                    logger.debug("FETCH", format!("Fetched {url} ({} bytes)", bytes.len()));
                    return parse_transient(manifest, &bytes);
                }
                Err(reason) => {
                    logger.debug("FETCH", format!("{url}: {reason}"));
                    failures.push(format!("{url}: {reason}"));
                }
            }
        }

        Err(LoopsError::Network(format!(
            "Unable to fetch {manifest}: {}",
            failures.join("; ")
        )))
    }

    async fn get_bytes(&self, url: &str) -> std::result::Result<Vec<u8>, String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| format!("request failed: {err}"))?;
        let status = response.status().as_u16();
        if !self.content.accepts(status) {
            return Err(format!("status {status}"));
        }
        response
            .bytes()
            .await
            .map(|bytes| bytes.to_vec())
            .map_err(|err| format!("body read failed: {err}"))
    }

    /// `Content-Length` advertised for `url`, if any.
    pub async fn content_length(&self, url: &str) -> Option<u64> {
        let response = self.client.head(url).send().await.ok()?;
        if !self.content.accepts(response.status().as_u16()) {
            return None;
        }
        response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok())
            .or_else(|| response.content_length())
    }

    /// Download `url` to `dest`, resuming a partial file when present.
    ///
    /// Returns the number of bytes written by this call.
    pub async fn download(&self, url: &str, dest: &Path) -> Result<u64> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await.map_err(|err| {
                LoopsError::Filesystem(format!(
                    "Failed to create download directory {}: {err}",
                    parent.display()
                ))
            })?;
        }

        let existing = fs::metadata(dest)
            .await
            .map(|meta| meta.len())
            .unwrap_or(0);

        let mut request = self.client.get(url);
        if existing > 0 {
            request = request.header(RANGE, format!("bytes={existing}-"));
        }
        let mut response = request
            .send()
            .await
            .map_err(|err| LoopsError::Network(format!("Download of {url} failed: {err}")))?;

        let status = response.status();
        if status == StatusCode::RANGE_NOT_SATISFIABLE && existing > 0 {
            // Partial file is already complete.
            return Ok(0);
        }
        let append = status == StatusCode::PARTIAL_CONTENT;
        if !append && !self.content.accepts(status.as_u16()) {
            return Err(LoopsError::Network(format!(
                "Download of {url} failed with status {status}"
            )));
        }

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(dest)
            .await
            .map_err(|err| {
                LoopsError::Filesystem(format!("Failed to open {}: {err}", dest.display()))
            })?;

        let mut written = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|err| LoopsError::Network(format!("Download of {url} interrupted: {err}")))?
        {
            file.write_all(&chunk).await.map_err(|err| {
                LoopsError::Filesystem(format!("Failed to write {}: {err}", dest.display()))
            })?;
            written = written.saturating_add(chunk.len() as u64);
        }
        file.flush().await?;

        Ok(written)
    }
}

fn parse_transient(manifest: &str, bytes: &[u8]) -> Result<ManifestDocument> {
    let dir = tempfile::Builder::new()
        .prefix(BUNDLE_ID)
        .tempdir()
        .map_err(|err| LoopsError::Filesystem(format!("Failed to create temp directory: {err}")))?;
    let path = dir.path().join(manifest);
    std::fs::write(&path, bytes).map_err(|err| {
        LoopsError::Filesystem(format!("Failed to write {}: {err}", path.display()))
    })?;
    let document = ManifestDocument::from_path(&path);
    dir.close().map_err(|err| {
        LoopsError::Filesystem(format!("Failed to remove temporary manifest: {err}"))
    })?;
    document
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0">
<dict>
    <key>Packages</key>
    <dict/>
</dict>
</plist>"#;

    #[test]
    fn transient_manifest_keeps_its_name() {
        let document = parse_transient("mainstage350.plist", MINIMAL.as_bytes()).unwrap();
        assert_eq!(document.name, "mainstage350.plist");
        assert!(document.packages.is_empty());
    }

    #[test]
    fn transient_parse_errors_are_manifest_errors() {
        let err = parse_transient("mainstage350.plist", b"not a plist").unwrap_err();
        assert!(matches!(err, LoopsError::Manifest { .. }));
    }
}
