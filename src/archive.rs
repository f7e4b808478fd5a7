//! The archive handle.

use std::path::Path;
use std::sync::Arc;

use crate::error::ServeError;
use crate::io::{HttpRangeReader, LocalFileReader, ReadAt, is_http_url};
use crate::vfs::{ArchiveFs, Shared, Tree};
use crate::zip::ZipParser;

/// Owner of an open archive.
///
/// The handle keeps the only strong reference to the archive source and its
/// index; [`ArchiveFs`] views derived from it hold weak references. Closing
/// (or dropping) the handle releases the source, after which views report
/// [`FsError::Closed`](crate::FsError::Closed).
pub struct Archive {
    location: String,
    shared: Option<Arc<Shared>>,
}

impl Archive {
    /// Open a local path or an `http(s)://` URL.
    pub async fn open(location: &str) -> Result<Self, ServeError> {
        tracing::debug!("Opening archive {}", location);
        let reader: Arc<dyn ReadAt> = if is_http_url(location) {
            let reader = HttpRangeReader::new(location)
                .await
                .map_err(|reason| open_error(location, reason))?;
            Arc::new(reader)
        } else {
            let reader = LocalFileReader::new(Path::new(location))
                .map_err(|reason| open_error(location, reason))?;
            Arc::new(reader)
        };
        Self::from_reader(location, reader).await
    }

    /// Index an archive from an already opened source.
    pub async fn from_reader(
        location: impl Into<String>,
        reader: Arc<dyn ReadAt>,
    ) -> Result<Self, ServeError> {
        let location = location.into();
        let parser = ZipParser::new(reader);
        let entries = parser
            .read_central_directory()
            .await
            .map_err(|reason| open_error(&location, reason))?;
        let tree = Tree::build(entries);
        tracing::debug!(paths = tree.len(), "Indexed archive {}", location);

        Ok(Self {
            location,
            shared: Some(Arc::new(Shared { parser, tree })),
        })
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn is_open(&self) -> bool {
        self.shared.is_some()
    }

    /// A view of the whole archive. A view taken after close is already closed.
    pub fn fs(&self) -> ArchiveFs {
        ArchiveFs::new(self.shared.as_ref().map(Arc::downgrade).unwrap_or_default())
    }

    /// Release the archive. Returns false if it was already released.
    pub fn close(&mut self) -> bool {
        let Some(shared) = self.shared.take() else {
            tracing::debug!("Archive {} already closed", self.location);
            return false;
        };
        let in_flight = Arc::strong_count(&shared) - 1;
        if let Some(transferred) = shared.parser.reader().transferred_bytes() {
            tracing::info!("Total bytes transferred from {}: {}", self.location, transferred);
        }
        drop(shared);
        if in_flight > 0 {
            tracing::debug!(
                in_flight,
                "Closed archive {}, pending reads release it when they finish",
                self.location
            );
        } else {
            tracing::debug!("Closed archive {}", self.location);
        }
        true
    }
}

impl Drop for Archive {
    fn drop(&mut self) {
        if self.is_open() {
            self.close();
        }
    }
}

fn open_error(location: &str, reason: anyhow::Error) -> ServeError {
    ServeError::ArchiveOpen {
        location: location.to_string(),
        reason,
    }
}
