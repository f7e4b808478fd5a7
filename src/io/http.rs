//! Remote archives read through HTTP Range requests.
//!
//! Opening a remote site costs one size request; after that every read is a
//! single `Range` GET for exactly the bytes asked for, so serving a file
//! only downloads that file's data.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, HeaderMap, RANGE};
use reqwest::{Client, Response, StatusCode};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::ReadAt;
use anyhow::{Context, Result, bail};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_ATTEMPTS: u32 = 10;
const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Random access to an archive served by a Range-capable HTTP server.
pub struct HttpRangeReader {
    client: Client,
    url: String,
    size: u64,
    transferred_bytes: AtomicU64,
}

impl HttpRangeReader {
    /// Connect to `url` and learn the archive size.
    ///
    /// The size comes from a HEAD request when the server advertises
    /// `Accept-Ranges: bytes`. Servers that omit the header (or answer HEAD
    /// without a length) are asked for the first byte instead and the total
    /// is taken from `Content-Range`.
    pub async fn new(url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        let head = client
            .head(&url)
            .send()
            .await
            .with_context(|| format!("HEAD {url} failed"))?;
        if !head.status().is_success() {
            bail!("HEAD {} returned status {}", url, head.status());
        }

        let size = match advertised_size(head.headers()) {
            Some(size) => size,
            None => {
                let first = client
                    .get(&url)
                    .header(RANGE, "bytes=0-0")
                    .send()
                    .await
                    .with_context(|| format!("GET {url} failed"))?;
                if first.status() != StatusCode::PARTIAL_CONTENT {
                    bail!("Remote server does not support Range requests");
                }
                let (_, total) = content_range(first.headers())
                    .context("Remote server did not report the archive size")?;
                total
            }
        };

        tracing::debug!(%url, size, "Remote archive supports range requests");
        Ok(Self {
            client,
            url,
            size,
            transferred_bytes: AtomicU64::new(0),
        })
    }

    /// Fetch bytes `start..=end`, retrying connection failures with a growing delay.
    async fn fetch(&self, start: u64, end: u64) -> Result<Bytes> {
        let range = format!("bytes={start}-{end}");
        let mut attempt = 0;
        let response = loop {
            attempt += 1;
            match self.client.get(&self.url).header(RANGE, &range).send().await {
                Ok(response) => break response,
                Err(e) if (e.is_timeout() || e.is_connect()) && attempt < MAX_ATTEMPTS => {
                    tracing::warn!(
                        "Connection error, retry {}/{}: {}",
                        attempt,
                        MAX_ATTEMPTS - 1,
                        e
                    );
                    tokio::time::sleep(RETRY_DELAY * attempt).await;
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("Range request {range} failed"));
                }
            }
        };

        let body = partial_body(response, start)
            .await
            .with_context(|| format!("Range request {range} to {}", self.url))?;
        self.transferred_bytes
            .fetch_add(body.len() as u64, Ordering::Relaxed);
        Ok(body)
    }
}

/// The body of a 206 response whose range begins at `start`.
async fn partial_body(response: Response, start: u64) -> Result<Bytes> {
    if response.status() != StatusCode::PARTIAL_CONTENT {
        bail!("unexpected status {}", response.status());
    }
    if let Some((first, _)) = content_range(response.headers()) {
        if first != start {
            bail!("server answered from offset {first}");
        }
    }
    let body = response.bytes().await?;
    if body.is_empty() {
        bail!("no data returned");
    }
    Ok(body)
}

/// Archive size from a HEAD response that advertises byte ranges.
fn advertised_size(headers: &HeaderMap) -> Option<u64> {
    let ranges = headers.get(ACCEPT_RANGES)?.to_str().ok()?;
    if !ranges.contains("bytes") {
        return None;
    }
    headers.get(CONTENT_LENGTH)?.to_str().ok()?.parse().ok()
}

/// `(first byte, complete length)` from `Content-Range: bytes first-last/length`.
fn content_range(headers: &HeaderMap) -> Option<(u64, u64)> {
    let value = headers.get(CONTENT_RANGE)?.to_str().ok()?;
    let (span, total) = value.strip_prefix("bytes ")?.split_once('/')?;
    let (first, _) = span.split_once('-')?;
    Some((first.trim().parse().ok()?, total.trim().parse().ok()?))
}

#[async_trait]
impl ReadAt for HttpRangeReader {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() || offset >= self.size {
            return Ok(0);
        }

        let end = (offset + buf.len() as u64 - 1).min(self.size - 1);
        let body = self.fetch(offset, end).await?;
        let n = body.len().min(buf.len());
        buf[..n].copy_from_slice(&body[..n]);
        Ok(n)
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn transferred_bytes(&self) -> Option<u64> {
        Some(self.transferred_bytes.load(Ordering::Relaxed))
    }
}
