mod http;
mod local;
mod memory;

pub use http::HttpRangeReader;
pub use local::LocalFileReader;
pub use memory::BytesReader;

use anyhow::{Result, bail};
use async_trait::async_trait;

/// Trait for random access reading from a data source
#[async_trait]
pub trait ReadAt: Send + Sync {
    /// Read data at the specified offset into the buffer
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Get the total size of the data source
    fn size(&self) -> u64;

    /// Bytes fetched over the network so far, for remote sources.
    fn transferred_bytes(&self) -> Option<u64> {
        None
    }

    /// Fill the whole buffer starting at `offset`, retrying short reads.
    async fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read_at(offset + filled as u64, &mut buf[filled..]).await?;
            if n == 0 {
                bail!(
                    "Unexpected end of data at offset {} ({} of {} bytes read)",
                    offset + filled as u64,
                    filled,
                    buf.len()
                );
            }
            filled += n;
        }
        Ok(())
    }
}

/// Returns true if the archive location should be fetched over HTTP.
pub fn is_http_url(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}
