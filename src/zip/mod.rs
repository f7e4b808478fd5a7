//! ZIP container format.
//!
//! This module reads the structures of a ZIP archive through the
//! [`ReadAt`](crate::io::ReadAt) abstraction, supporting both the standard
//! format and the ZIP64 extensions for large archives.
//!
//! ## Architecture
//!
//! - [`structures`]: Data structures representing ZIP format elements (EOCD, file headers, etc.)
//! - [`parser`]: Low-level parsing of ZIP structures from raw bytes
//! - [`entry`]: Sequential, CRC-checked reading of a single entry's content
//!
//! ## ZIP Format Overview
//!
//! A ZIP file consists of:
//! 1. Local file headers and compressed data for each file
//! 2. Central Directory with metadata for all files
//! 3. End of Central Directory (EOCD) record at the end
//!
//! Reading the EOCD and the Central Directory is enough to know every
//! path and its size, so a site can be indexed without inflating anything.
//!
//! ## Limitations
//!
//! - No encryption support
//! - No multi-disk archive support
//! - Only STORED and DEFLATE compression methods

mod entry;
mod parser;
mod structures;

pub use entry::EntryReader;
pub use parser::ZipParser;
pub use structures::*;
