use super::ReadAt;
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// Archive held entirely in memory, e.g. embedded in a binary.
pub struct BytesReader {
    data: Bytes,
}

impl BytesReader {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

#[async_trait]
impl ReadAt for BytesReader {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let len = self.data.len() as u64;
        if offset >= len {
            return Ok(0);
        }
        let start = offset as usize;
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        Ok(n)
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }
}
