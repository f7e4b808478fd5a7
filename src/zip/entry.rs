use std::io::{self, Cursor, Read};

use flate2::Crc;
use flate2::read::DeflateDecoder;

use super::structures::{CompressionMethod, ZipFileEntry};

/// Sequential reader over the decompressed content of one entry.
///
/// The CRC-32 recorded in the Central Directory is checked once the
/// stream is exhausted; a mismatch surfaces as [`io::ErrorKind::InvalidData`].
pub struct EntryReader {
    name: String,
    inner: Decoder,
    crc: Crc,
    expected_crc: u32,
    expected_size: u64,
    verified: bool,
}

enum Decoder {
    Stored(Cursor<Vec<u8>>),
    Deflate(DeflateDecoder<Cursor<Vec<u8>>>),
}

impl EntryReader {
    /// Wrap the raw bytes of `entry`. Fails for methods other than STORED and DEFLATE.
    pub fn new(entry: &ZipFileEntry, raw: Vec<u8>) -> Result<Self, CompressionMethod> {
        let inner = match entry.compression_method {
            CompressionMethod::Stored => Decoder::Stored(Cursor::new(raw)),
            CompressionMethod::Deflate => Decoder::Deflate(DeflateDecoder::new(Cursor::new(raw))),
            other => return Err(other),
        };

        Ok(Self {
            name: entry.name.clone(),
            inner,
            crc: Crc::new(),
            expected_crc: entry.crc32,
            expected_size: entry.uncompressed_size,
            verified: false,
        })
    }

    /// Size of the decompressed content according to the Central Directory.
    pub fn size(&self) -> u64 {
        self.expected_size
    }

    fn verify(&mut self) -> io::Result<()> {
        self.verified = true;
        if self.crc.amount() as u64 != self.expected_size & 0xFFFF_FFFF {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "{}: expected {} bytes, decoded {}",
                    self.name,
                    self.expected_size,
                    self.crc.amount()
                ),
            ));
        }
        if self.crc.sum() != self.expected_crc {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "{}: CRC-32 mismatch (expected {:08x}, got {:08x})",
                    self.name,
                    self.expected_crc,
                    self.crc.sum()
                ),
            ));
        }
        Ok(())
    }
}

impl Read for EntryReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = match &mut self.inner {
            Decoder::Stored(r) => r.read(buf)?,
            Decoder::Deflate(r) => r.read(buf)?,
        };
        if n == 0 {
            if !buf.is_empty() && !self.verified {
                self.verify()?;
            }
        } else {
            self.crc.update(&buf[..n]);
        }
        Ok(n)
    }
}
