use super::ReadAt;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;

/// Local file reader with random access support
pub struct LocalFileReader {
    file: std::fs::File,
    size: u64,
}

impl LocalFileReader {
    pub fn new(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Cannot open {}", path.display()))?;
        let metadata = file.metadata()?;
        if metadata.is_dir() {
            anyhow::bail!("{} is a directory", path.display());
        }
        tracing::debug!(path = %path.display(), size = metadata.len(), "Opened local archive");
        Ok(Self {
            file,
            size: metadata.len(),
        })
    }
}

#[async_trait]
impl ReadAt for LocalFileReader {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            Ok(self.file.read_at(buf, offset)?)
        }

        #[cfg(windows)]
        {
            // seek_read moves the cursor, but every read here is positional
            use std::os::windows::fs::FileExt;
            Ok(self.file.seek_read(buf, offset)?)
        }

        #[cfg(not(any(unix, windows)))]
        {
            compile_error!("LocalFileReader needs positional reads on this platform");
        }
    }

    fn size(&self) -> u64 {
        self.size
    }
}
