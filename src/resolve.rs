//! Site root and URL prefix resolution.
//!
//! Both values can be given explicitly or discovered from the marker file
//! ([`MARKER_FILE`]) inside the archive: the first marker met by a walk of the
//! archive designates the site root, and its first line is the URL prefix.

use std::fmt;
use std::io::{BufRead, BufReader};
use std::ops::ControlFlow;

use percent_encoding::utf8_percent_encode;

use crate::config::MARKER_FILE;
use crate::error::FsError;
use crate::vfs::{ArchiveFs, path};
use crate::web::listing::PATH_ESCAPES;

/// URL path prefix a site is mounted under. Always starts and ends with `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Prefix(String);

impl Prefix {
    /// Add a leading and a trailing slash where missing.
    ///
    /// ```
    /// use zipserve::Prefix;
    ///
    /// assert_eq!(Prefix::normalize("").as_str(), "/");
    /// assert_eq!(Prefix::normalize("docs/v1").as_str(), "/docs/v1/");
    /// ```
    pub fn normalize(raw: &str) -> Self {
        let mut prefix = String::with_capacity(raw.len() + 2);
        if !raw.starts_with('/') {
            prefix.push('/');
        }
        prefix.push_str(raw);
        if !prefix.ends_with('/') {
            prefix.push('/');
        }
        Prefix(prefix)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The prefix without its trailing slash, `None` for the root prefix.
    pub fn without_trailing_slash(&self) -> Option<&str> {
        let trimmed = &self.0[..self.0.len() - 1];
        (!trimmed.is_empty()).then_some(trimmed)
    }

    /// The prefix as it appears in a URL, non-ASCII and reserved characters
    /// percent-encoded.
    ///
    /// ```
    /// use zipserve::Prefix;
    ///
    /// assert_eq!(Prefix::normalize("café").encoded(), "/caf%C3%A9/");
    /// ```
    pub fn encoded(&self) -> String {
        utf8_percent_encode(&self.0, PATH_ESCAPES).to_string()
    }

    /// The part of `path` below this prefix, if `path` is under it.
    pub fn strip<'a>(&self, path: &'a str) -> Option<&'a str> {
        path.strip_prefix(self.0.as_str())
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Prefix {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Determine the directory of the archive to serve.
///
/// A non-empty `explicit` directory is returned as given; its existence is
/// checked later, when the site is mounted. Otherwise the archive is walked
/// and the parent of the first marker file found is used, or the archive root
/// (`.`) when there is none.
pub fn resolve_root(fs: &ArchiveFs, explicit: &str) -> Result<String, FsError> {
    if !explicit.is_empty() {
        return Ok(explicit.to_string());
    }

    tracing::debug!("Searching for {} file to determine directory", MARKER_FILE);
    let found = fs.walk(".", |entry| {
        if entry.name == MARKER_FILE {
            ControlFlow::Break(path::display(path::parent(&entry.path)).to_string())
        } else {
            ControlFlow::Continue(())
        }
    });

    match found {
        Ok(Some(directory)) => {
            tracing::debug!("Found {} in {}", MARKER_FILE, directory);
            Ok(directory)
        }
        Ok(None) => Ok(".".to_string()),
        Err(e) if e.is_not_found() => Ok(".".to_string()),
        Err(e) => Err(e),
    }
}

/// Determine the URL prefix of the site.
///
/// A non-empty `explicit` prefix wins. Otherwise the first line of the marker
/// file in `directory` is used. A missing or unreadable marker yields the root
/// prefix; read failures are logged and never abort.
pub async fn resolve_prefix(fs: &ArchiveFs, directory: &str, explicit: &str) -> Prefix {
    if !explicit.is_empty() {
        return Prefix::normalize(explicit);
    }

    tracing::debug!("Reading prefix from {} file", MARKER_FILE);
    let marker = path::join(directory, MARKER_FILE);
    let raw = match read_first_line(fs, &marker).await {
        Ok(line) => line,
        Err(e) if e.is_not_found() => String::new(),
        Err(e) => {
            tracing::warn!("Error reading {} file: {}", MARKER_FILE, e);
            String::new()
        }
    };
    Prefix::normalize(&raw)
}

async fn read_first_line(fs: &ArchiveFs, marker: &str) -> Result<String, FsError> {
    let reader = fs.open(marker).await?;
    let mut line = Vec::new();
    BufReader::new(reader).read_until(b'\n', &mut line)?;
    Ok(String::from_utf8_lossy(&line).trim().to_string())
}
