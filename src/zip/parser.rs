//! Low-level ZIP archive parser.
//!
//! ZIP archives are indexed from the end: the End of Central Directory
//! record (and its ZIP64 counterpart for large archives) locates the
//! Central Directory, which describes every entry. An entry's Local File
//! Header is only read when its data is needed.
//!
//! Only the tail of the archive is touched when it is opened, which keeps
//! remote archives cheap: a site is indexed with one or two Range requests.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};
use std::ops::Range;
use std::sync::Arc;

use crate::io::ReadAt;
use anyhow::{Context, Result, bail};

use super::structures::*;

/// Longest archive comment the format can express.
const MAX_COMMENT_SIZE: u64 = 65535;

/// Extra field carrying 64-bit sizes and offsets.
const ZIP64_EXTRA_ID: u16 = 0x0001;

/// 32-bit header fields set to this value are stored in the ZIP64 extra field.
const ZIP64_SATURATED: u64 = 0xFFFF_FFFF;

/// Indexes archives and reads entry data from any [`ReadAt`] source.
pub struct ZipParser<R: ReadAt + ?Sized> {
    reader: Arc<R>,
    size: u64,
}

impl<R: ReadAt + ?Sized> ZipParser<R> {
    pub fn new(reader: Arc<R>) -> Self {
        let size = reader.size();
        Self { reader, size }
    }

    pub fn reader(&self) -> &R {
        &self.reader
    }

    /// Find the End of Central Directory record and its offset.
    ///
    /// Archives without a comment are recognized from their last 22 bytes;
    /// otherwise the last 64 KiB are scanned.
    pub async fn find_eocd(&self) -> Result<(EndOfCentralDirectory, u64)> {
        if self.size < EndOfCentralDirectory::SIZE as u64 {
            bail!("Not a valid ZIP file: {} bytes is too small", self.size);
        }

        let mut tail_len = EndOfCentralDirectory::SIZE as u64;
        loop {
            let start = self.size - tail_len;
            let mut tail = vec![0u8; tail_len as usize];
            self.reader.read_exact_at(start, &mut tail).await?;

            if let Some(at) = locate_eocd(&tail) {
                let eocd = EndOfCentralDirectory::from_bytes(&tail[at..])?;
                return Ok((eocd, start + at as u64));
            }

            let widest = (MAX_COMMENT_SIZE + EndOfCentralDirectory::SIZE as u64).min(self.size);
            if tail_len == widest {
                bail!("Not a valid ZIP file: End of Central Directory not found");
            }
            tail_len = widest;
        }
    }

    /// Read the ZIP64 End of Central Directory through the locator that
    /// precedes the regular record at `eocd_offset`.
    pub async fn read_zip64_eocd(&self, eocd_offset: u64) -> Result<Zip64EOCD> {
        let locator_offset = eocd_offset
            .checked_sub(Zip64EOCDLocator::SIZE as u64)
            .context("Invalid ZIP64 format: locator out of bounds")?;
        let mut locator = [0u8; Zip64EOCDLocator::SIZE];
        self.reader.read_exact_at(locator_offset, &mut locator).await?;
        let locator = Zip64EOCDLocator::from_bytes(&locator)?;

        let mut record = [0u8; Zip64EOCD::MIN_SIZE];
        self.reader
            .read_exact_at(locator.eocd64_offset, &mut record)
            .await?;
        Zip64EOCD::from_bytes(&record)
    }

    /// Read every entry of the Central Directory with a single read.
    pub async fn read_central_directory(&self) -> Result<Vec<ZipFileEntry>> {
        let (eocd, eocd_offset) = self.find_eocd().await?;

        let (cd_offset, cd_size, total_entries) = if eocd.is_zip64() {
            let eocd64 = self.read_zip64_eocd(eocd_offset).await?;
            (eocd64.cd_offset, eocd64.cd_size, eocd64.total_entries)
        } else {
            (
                u64::from(eocd.cd_offset),
                u64::from(eocd.cd_size),
                u64::from(eocd.total_entries),
            )
        };

        if cd_offset.checked_add(cd_size).is_none_or(|end| end > self.size) {
            bail!(
                "Central Directory ({} bytes at offset {}) lies outside the archive",
                cd_size,
                cd_offset
            );
        }
        if total_entries.saturating_mul(CDFH_MIN_SIZE as u64) > cd_size {
            bail!(
                "Central Directory of {} bytes cannot hold {} entries",
                cd_size,
                total_entries
            );
        }

        let mut directory = vec![0u8; cd_size as usize];
        self.reader.read_exact_at(cd_offset, &mut directory).await?;

        let mut cursor = Cursor::new(directory.as_slice());
        let entries = (0..total_entries)
            .map(|index| {
                parse_cdfh(&mut cursor)
                    .with_context(|| format!("Corrupt Central Directory entry #{index}"))
            })
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(entries = entries.len(), "Read Central Directory");
        Ok(entries)
    }

    /// Archive byte range holding an entry's stored (possibly compressed) data.
    ///
    /// The Local File Header repeats the name and may carry a different
    /// extra field than the Central Directory, so it has to be read.
    pub async fn data_range(&self, entry: &ZipFileEntry) -> Result<Range<u64>> {
        let mut header = [0u8; LFH_SIZE];
        self.reader
            .read_exact_at(entry.lfh_offset, &mut header)
            .await
            .with_context(|| format!("Cannot read Local File Header of {}", entry.name))?;

        if &header[0..4] != LFH_SIGNATURE {
            bail!("Invalid Local File Header for {}", entry.name);
        }

        // Name and extra field lengths close the fixed part of the header
        let mut lengths = &header[26..30];
        let name_len = lengths.read_u16::<LittleEndian>()?;
        let extra_len = lengths.read_u16::<LittleEndian>()?;

        let range = entry
            .lfh_offset
            .checked_add(LFH_SIZE as u64 + u64::from(name_len) + u64::from(extra_len))
            .and_then(|start| Some(start..start.checked_add(entry.compressed_size)?));
        match range {
            Some(range) if range.end <= self.size => Ok(range),
            _ => bail!("Data of {} extends past the end of the archive", entry.name),
        }
    }

    /// Read the raw stored bytes of an entry.
    pub async fn read_raw(&self, entry: &ZipFileEntry) -> Result<Vec<u8>> {
        let range = self.data_range(entry).await?;
        let mut raw = vec![0u8; entry.compressed_size as usize];
        self.reader.read_exact_at(range.start, &mut raw).await?;
        Ok(raw)
    }

    /// Read `within` (relative to the start of the entry's data) from the
    /// raw stored bytes, without touching the rest of the entry.
    pub async fn read_raw_range(
        &self,
        entry: &ZipFileEntry,
        within: Range<u64>,
    ) -> Result<Vec<u8>> {
        if within.start > within.end || within.end > entry.compressed_size {
            bail!(
                "Range {}..{} is outside the {} stored bytes of {}",
                within.start,
                within.end,
                entry.compressed_size,
                entry.name
            );
        }
        let data = self.data_range(entry).await?;
        let mut raw = vec![0u8; (within.end - within.start) as usize];
        self.reader
            .read_exact_at(data.start + within.start, &mut raw)
            .await?;
        Ok(raw)
    }
}

/// Position of an EOCD record in `tail` whose comment runs exactly to the
/// end of the archive, searching from the end.
fn locate_eocd(tail: &[u8]) -> Option<usize> {
    let last = tail.len().checked_sub(EndOfCentralDirectory::SIZE)?;
    (0..=last).rev().find(|&at| {
        let record = &tail[at..];
        record.starts_with(EndOfCentralDirectory::SIGNATURE)
            && usize::from(u16::from_le_bytes([record[20], record[21]])) == last - at
    })
}

/// Parse one Central Directory File Header at the cursor.
fn parse_cdfh(cursor: &mut Cursor<&[u8]>) -> Result<ZipFileEntry> {
    let mut sig = [0u8; 4];
    cursor.read_exact(&mut sig)?;
    if sig != CDFH_SIGNATURE {
        bail!("Invalid Central Directory File Header");
    }

    cursor.set_position(cursor.position() + 4); // versions made by / needed
    let flags = cursor.read_u16::<LittleEndian>()?;
    let compression_method = cursor.read_u16::<LittleEndian>()?;
    let last_mod_time = cursor.read_u16::<LittleEndian>()?;
    let last_mod_date = cursor.read_u16::<LittleEndian>()?;
    let crc32 = cursor.read_u32::<LittleEndian>()?;
    let compressed_size = u64::from(cursor.read_u32::<LittleEndian>()?);
    let uncompressed_size = u64::from(cursor.read_u32::<LittleEndian>()?);
    let name_len = cursor.read_u16::<LittleEndian>()?;
    let extra_len = cursor.read_u16::<LittleEndian>()?;
    let comment_len = cursor.read_u16::<LittleEndian>()?;
    cursor.set_position(cursor.position() + 8); // disk number, attributes
    let lfh_offset = u64::from(cursor.read_u32::<LittleEndian>()?);

    let mut name = vec![0u8; usize::from(name_len)];
    cursor.read_exact(&mut name)?;
    // Non-UTF8 names (CP437 archives) are served under their lossy form
    let name = String::from_utf8_lossy(&name).into_owned();

    let mut extra = vec![0u8; usize::from(extra_len)];
    cursor
        .read_exact(&mut extra)
        .with_context(|| format!("Extra field of {name} is truncated"))?;
    let [uncompressed_size, compressed_size, lfh_offset] =
        zip64_fields(&extra, [uncompressed_size, compressed_size, lfh_offset])?;

    let comment_end = cursor.position() + u64::from(comment_len);
    if comment_end > cursor.get_ref().len() as u64 {
        bail!("Central Directory entry {} is truncated", name);
    }
    cursor.set_position(comment_end);

    Ok(ZipFileEntry {
        is_directory: name.ends_with('/'),
        name,
        flags,
        compression_method: CompressionMethod::from_u16(compression_method),
        compressed_size,
        uncompressed_size,
        crc32,
        lfh_offset,
        last_mod_time,
        last_mod_date,
    })
}

/// Replace saturated header values with their 64-bit versions from the
/// ZIP64 extra field.
///
/// `values` are the uncompressed size, compressed size and header offset,
/// in the order the extra field stores them; only saturated ones are present.
fn zip64_fields(extra: &[u8], mut values: [u64; 3]) -> Result<[u64; 3]> {
    let mut fields = extra;
    while fields.len() >= 4 {
        let id = fields.read_u16::<LittleEndian>()?;
        let len = usize::from(fields.read_u16::<LittleEndian>()?).min(fields.len());
        let (mut data, rest) = fields.split_at(len);
        fields = rest;

        if id != ZIP64_EXTRA_ID {
            continue;
        }
        for value in values.iter_mut().filter(|v| **v == ZIP64_SATURATED) {
            if data.len() < 8 {
                break;
            }
            *value = data.read_u64::<LittleEndian>()?;
        }
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::BytesReader;
    use crate::testutil::ZipFixture;

    fn parser(data: Vec<u8>) -> ZipParser<BytesReader> {
        ZipParser::new(Arc::new(BytesReader::new(data)))
    }

    #[tokio::test]
    async fn lists_entries_from_central_directory() {
        let data = ZipFixture::new()
            .dir("site/")
            .file("site/index.html", "<h1>hi</h1>")
            .deflated("site/app.js", "console.log(1);")
            .build();

        let entries = parser(data).read_central_directory().await.unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["site/", "site/index.html", "site/app.js"]);
        assert!(entries[0].is_directory);
        assert_eq!(entries[1].compression_method, CompressionMethod::Stored);
        assert_eq!(entries[2].compression_method, CompressionMethod::Deflate);
        assert_eq!(entries[2].uncompressed_size, 15);
    }

    #[tokio::test]
    async fn finds_eocd_behind_archive_comment() {
        let data = ZipFixture::new()
            .file("a.txt", "a")
            .comment("built by the release pipeline")
            .build();

        let parser = parser(data);
        let entries = parser.read_central_directory().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(parser.read_raw(&entries[0]).await.unwrap(), b"a");
    }

    #[tokio::test]
    async fn rejects_non_zip_data() {
        let err = parser(vec![b'x'; 100])
            .read_central_directory()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Not a valid ZIP file"));
    }

    #[tokio::test]
    async fn rejects_tiny_input() {
        assert!(parser(b"PK".to_vec()).find_eocd().await.is_err());
    }

    #[tokio::test]
    async fn reads_part_of_stored_data() {
        let data = ZipFixture::new().file("notes.txt", "0123456789").build();
        let parser = parser(data);
        let entries = parser.read_central_directory().await.unwrap();

        assert_eq!(parser.read_raw_range(&entries[0], 2..6).await.unwrap(), b"2345");
        assert!(parser.read_raw_range(&entries[0], 8..11).await.is_err());
    }

    #[tokio::test]
    async fn data_past_the_archive_is_rejected() {
        let data = ZipFixture::new().file("notes.txt", "0123456789").build();
        let parser = parser(data);
        let mut entry = parser.read_central_directory().await.unwrap().remove(0);

        entry.compressed_size = u64::MAX;
        let err = parser.data_range(&entry).await.unwrap_err();
        assert!(err.to_string().contains("extends past the end"));
        assert!(parser.read_raw(&entry).await.is_err());

        entry.compressed_size = 10;
        entry.lfh_offset = u64::MAX - 4;
        assert!(parser.data_range(&entry).await.is_err());
    }

    #[test]
    fn eocd_comment_must_reach_the_end() {
        let mut tail = vec![0u8; 30];
        tail[4..8].copy_from_slice(EndOfCentralDirectory::SIGNATURE);
        // Comment length 4 reaches exactly to the end of 30 bytes
        tail[24] = 4;
        assert_eq!(locate_eocd(&tail), Some(4));
        tail[24] = 3;
        assert_eq!(locate_eocd(&tail), None);
        assert_eq!(locate_eocd(&tail[..10]), None);
    }

    #[test]
    fn zip64_extra_replaces_saturated_values() {
        let mut extra = Vec::new();
        // Unrelated field first
        extra.extend_from_slice(&[0x55, 0x54, 2, 0, 9, 9]);
        extra.extend_from_slice(&[0x01, 0x00, 16, 0]);
        extra.extend_from_slice(&5_000_000_000u64.to_le_bytes());
        extra.extend_from_slice(&7_000_000_000u64.to_le_bytes());

        let values = zip64_fields(&extra, [ZIP64_SATURATED, 10, ZIP64_SATURATED]).unwrap();
        assert_eq!(values, [5_000_000_000, 10, 7_000_000_000]);

        let values = zip64_fields(&[], [1, 2, 3]).unwrap();
        assert_eq!(values, [1, 2, 3]);
    }
}
