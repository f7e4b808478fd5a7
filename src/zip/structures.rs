use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;
use std::time::SystemTime;

use anyhow::{Result, bail};
use chrono::NaiveDate;

/// ZIP compression methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflate,
    Unknown(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            _ => CompressionMethod::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Unknown(v) => *v,
        }
    }
}

/// End of Central Directory (EOCD) - 22 bytes minimum
pub struct EndOfCentralDirectory {
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment_len: u16,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: &'static [u8] = b"PK\x05\x06";
    pub const SIZE: usize = 22;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            bail!("Invalid End of Central Directory");
        }

        // Skip disk number and disk-with-central-directory; multi-disk archives are not served
        let mut cursor = Cursor::new(&data[8..]);

        Ok(Self {
            disk_entries: cursor.read_u16::<LittleEndian>()?,
            total_entries: cursor.read_u16::<LittleEndian>()?,
            cd_size: cursor.read_u32::<LittleEndian>()?,
            cd_offset: cursor.read_u32::<LittleEndian>()?,
            comment_len: cursor.read_u16::<LittleEndian>()?,
        })
    }

    pub fn is_zip64(&self) -> bool {
        self.disk_entries == 0xFFFF
            || self.total_entries == 0xFFFF
            || self.cd_size == 0xFFFFFFFF
            || self.cd_offset == 0xFFFFFFFF
    }
}

/// ZIP64 End of Central Directory Locator - 20 bytes
pub struct Zip64EOCDLocator {
    pub eocd64_offset: u64,
}

impl Zip64EOCDLocator {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x07";
    pub const SIZE: usize = 20;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            bail!("Invalid ZIP64 End of Central Directory Locator");
        }

        let mut cursor = Cursor::new(&data[8..]);
        Ok(Self {
            eocd64_offset: cursor.read_u64::<LittleEndian>()?,
        })
    }
}

/// ZIP64 End of Central Directory - 56 bytes minimum
pub struct Zip64EOCD {
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64EOCD {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x06";
    pub const MIN_SIZE: usize = 56;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::MIN_SIZE || &data[0..4] != Self::SIGNATURE {
            bail!("Invalid ZIP64 End of Central Directory");
        }

        // Record size, versions and disk numbers precede the entry counts
        let mut cursor = Cursor::new(&data[32..]);

        Ok(Self {
            total_entries: cursor.read_u64::<LittleEndian>()?,
            cd_size: cursor.read_u64::<LittleEndian>()?,
            cd_offset: cursor.read_u64::<LittleEndian>()?,
        })
    }
}

/// Central Directory File Header (CDFH) - 46 bytes minimum
pub const CDFH_SIGNATURE: &[u8] = b"PK\x01\x02";
pub const CDFH_MIN_SIZE: usize = 46;

/// Local File Header (LFH) - 30 bytes
pub const LFH_SIGNATURE: &[u8] = b"PK\x03\x04";
pub const LFH_SIZE: usize = 30;

/// General purpose flag bit marking an encrypted entry
pub const FLAG_ENCRYPTED: u16 = 0x0001;

/// Parsed central directory entry
#[derive(Debug, Clone)]
pub struct ZipFileEntry {
    /// Raw name as stored in the archive, `/` separated
    pub name: String,
    pub flags: u16,
    pub compression_method: CompressionMethod,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub crc32: u32,
    pub lfh_offset: u64,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub is_directory: bool,
}

impl ZipFileEntry {
    /// Parse modification date to (year, month, day)
    pub fn mod_date(&self) -> (u16, u8, u8) {
        let day = (self.last_mod_date & 0x1F) as u8;
        let month = ((self.last_mod_date >> 5) & 0x0F) as u8;
        let year = ((self.last_mod_date >> 9) & 0x7F) + 1980;
        (year, month, day)
    }

    /// Parse modification time to (hour, minute, second)
    pub fn mod_time(&self) -> (u8, u8, u8) {
        let second = ((self.last_mod_time & 0x1F) * 2) as u8;
        let minute = ((self.last_mod_time >> 5) & 0x3F) as u8;
        let hour = ((self.last_mod_time >> 11) & 0x1F) as u8;
        (hour, minute, second)
    }

    /// Modification time, reading the DOS timestamp as UTC.
    ///
    /// Returns `None` for impossible dates and times (some writers leave the date zeroed).
    pub fn modified(&self) -> Option<SystemTime> {
        let (year, month, day) = self.mod_date();
        let (hour, minute, second) = self.mod_time();
        let timestamp = NaiveDate::from_ymd_opt(year.into(), month.into(), day.into())?
            .and_hms_opt(hour.into(), minute.into(), second.into())?
            .and_utc();
        Some(timestamp.into())
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }

    /// True when the stored bytes are the content itself, so any part of
    /// the file can be read without reading the rest.
    pub fn is_plain(&self) -> bool {
        self.compression_method == CompressionMethod::Stored
            && !self.is_encrypted()
            && self.compressed_size == self.uncompressed_size
    }
}
