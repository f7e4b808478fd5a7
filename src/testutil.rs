//! Archive fixtures for unit tests.

use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicU64, Ordering};

use ::zip::write::SimpleFileOptions;
use ::zip::{CompressionMethod, ZipWriter};
use anyhow::Result;
use async_trait::async_trait;

use crate::io::{BytesReader, ReadAt};

enum Item {
    Dir(String),
    File(String, Vec<u8>, CompressionMethod),
}

/// Builds small in-memory ZIP archives entry by entry, in order.
#[derive(Default)]
pub struct ZipFixture {
    items: Vec<Item>,
    comment: Option<String>,
}

impl ZipFixture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dir(mut self, name: &str) -> Self {
        self.items.push(Item::Dir(name.to_string()));
        self
    }

    pub fn file(mut self, name: &str, content: impl AsRef<[u8]>) -> Self {
        self.items.push(Item::File(
            name.to_string(),
            content.as_ref().to_vec(),
            CompressionMethod::Stored,
        ));
        self
    }

    pub fn deflated(mut self, name: &str, content: impl AsRef<[u8]>) -> Self {
        self.items.push(Item::File(
            name.to_string(),
            content.as_ref().to_vec(),
            CompressionMethod::Deflated,
        ));
        self
    }

    pub fn comment(mut self, comment: &str) -> Self {
        self.comment = Some(comment.to_string());
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for item in self.items {
            match item {
                Item::Dir(name) => writer
                    .add_directory(name, SimpleFileOptions::default())
                    .unwrap(),
                Item::File(name, content, method) => {
                    let options = SimpleFileOptions::default().compression_method(method);
                    writer.start_file(name, options).unwrap();
                    writer.write_all(&content).unwrap();
                }
            }
        }
        if let Some(comment) = self.comment {
            writer.set_comment(comment);
        }
        writer.finish().unwrap().into_inner()
    }
}

/// In-memory source that counts the bytes handed out.
pub struct CountingReader {
    inner: BytesReader,
    read: AtomicU64,
}

impl CountingReader {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            inner: BytesReader::new(data),
            read: AtomicU64::new(0),
        }
    }

    pub fn bytes_read(&self) -> u64 {
        self.read.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ReadAt for CountingReader {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let n = self.inner.read_at(offset, buf).await?;
        self.read.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }
}
