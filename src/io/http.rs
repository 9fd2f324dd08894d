//! HTTP Range request byte source for remote ZIP archives.
//!
//! Implements random-access reading over HTTP using the Range request
//! header (RFC 7233), so individual entries can be listed and extracted
//! from a large remote archive without downloading the whole file.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::ByteSource;
use crate::error::{Result, ZipError};

/// Read-only byte source over a remote file served with Range support.
///
/// The remote server must support Range requests (`Accept-Ranges: bytes`)
/// and report a `Content-Length` in HEAD responses; both are verified by
/// [`HttpSource::connect`]. Transient network errors are retried with a
/// linear backoff. All write-half operations fail with
/// [`ZipError::UnwritableArchive`].
pub struct HttpSource {
    client: Client,
    url: String,
    len: u64,
    position: u64,
    /// Cumulative bytes received from the network.
    transferred: u64,
    max_retry: u32,
}

impl HttpSource {
    /// Probe `url` with a HEAD request and build a source over it.
    ///
    /// Fails with [`ZipError::UnreadableArchive`] when the server answers
    /// with a non-success status, does not advertise Range support, or
    /// omits `Content-Length`.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        let resp = client.head(url).send().await?;
        if !resp.status().is_success() {
            log::warn!("HEAD {url} failed with status {}", resp.status());
            return Err(ZipError::UnreadableArchive);
        }

        let accept_ranges = resp
            .headers()
            .get("accept-ranges")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("none");
        if !accept_ranges.contains("bytes") {
            log::warn!("{url} does not support Range requests");
            return Err(ZipError::UnreadableArchive);
        }

        let len = resp
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok())
            .ok_or(ZipError::UnreadableArchive)?;

        Ok(Self {
            client,
            url: url.to_owned(),
            len,
            position: 0,
            transferred: 0,
            max_retry: 10,
        })
    }

    /// Total bytes received from the server so far, for bandwidth
    /// statistics.
    pub fn transferred_bytes(&self) -> u64 {
        self.transferred
    }
}

#[async_trait]
impl ByteSource for HttpSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn seek(&mut self, offset: u64) {
        self.position = offset;
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() || self.position >= self.len {
            return Ok(0);
        }

        // Clamp the requested range to the remote length.
        let end = (self.position + buf.len() as u64 - 1).min(self.len - 1);
        let expected = (end - self.position + 1) as usize;

        let mut received = 0;
        let mut retry_count = 0u32;

        while received < expected {
            let start = self.position + received as u64;
            let range = format!("bytes={start}-{end}");

            let result = self
                .client
                .get(&self.url)
                .header("Range", &range)
                .send()
                .await;

            match result {
                Ok(resp) => {
                    if resp.status() != reqwest::StatusCode::PARTIAL_CONTENT {
                        log::warn!(
                            "range GET {} returned status {}",
                            self.url,
                            resp.status()
                        );
                        return Err(ZipError::UnreadableArchive);
                    }
                    let bytes = resp.bytes().await?;
                    let n = bytes.len().min(expected - received);
                    buf[received..received + n].copy_from_slice(&bytes[..n]);
                    received += n;
                    self.transferred += n as u64;
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    retry_count += 1;
                    if retry_count >= self.max_retry {
                        return Err(ZipError::Http(e));
                    }
                    log::debug!(
                        "connection error, retry {retry_count}/{}: {e}",
                        self.max_retry
                    );
                    tokio::time::sleep(Duration::from_millis(500 * retry_count as u64)).await;
                }
                Err(e) => return Err(ZipError::Http(e)),
            }
        }

        self.position += received as u64;
        Ok(received)
    }
}
