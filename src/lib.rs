//! # zipserve
//!
//! Serve the contents of a ZIP archive as a static website.
//!
//! The archive can be a local file or an `http(s)://` URL; remote archives
//! are read with HTTP Range requests, so only the central directory and the
//! entries actually requested are downloaded.
//!
//! The site directory and its URL prefix are either given explicitly or
//! discovered from a `.prefix` marker file inside the archive: the first
//! marker found designates the site root, and its first line is the prefix.
//!
//! ## Example
//!
//! ```no_run
//! use zipserve::{ServeConfig, ShutdownSignal, SystemBrowser, lifecycle};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServeConfig::new("site.zip");
//!     lifecycle::run(&config, &SystemBrowser, ShutdownSignal::with_os_signals()).await?;
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod browser;
pub mod cli;
pub mod config;
pub mod error;
pub mod io;
pub mod lifecycle;
pub mod logging;
pub mod resolve;
pub mod vfs;
pub mod web;
pub mod zip;

#[cfg(test)]
mod testutil;

pub use archive::Archive;
pub use browser::{Browser, SystemBrowser};
pub use cli::Cli;
pub use config::ServeConfig;
pub use error::{FsError, ServeError};
pub use io::{BytesReader, HttpRangeReader, LocalFileReader, ReadAt};
pub use resolve::Prefix;
pub use vfs::{ArchiveFs, DirEntry, Metadata};
pub use web::{Mount, Server, ShutdownSignal};
