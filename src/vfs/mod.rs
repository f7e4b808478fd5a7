//! Read-only filesystem view over an open archive.
//!
//! An [`ArchiveFs`] answers metadata queries from the in-memory tree built
//! when the archive was opened, and only touches the archive source when an
//! entry's content is read. Views hold a weak reference to the archive:
//! once the owning [`Archive`](crate::Archive) is closed, every operation
//! fails with [`FsError::Closed`].

pub mod path;
mod tree;

use std::io::Read;
use std::fmt;
use std::ops::{ControlFlow, Range};
use std::sync::{Arc, Weak};
use std::time::SystemTime;

use bytes::Bytes;

use crate::error::FsError;
use crate::io::ReadAt;
use crate::zip::{EntryReader, ZipFileEntry, ZipParser};

pub(crate) use tree::{Node, Tree};

/// Upper bound on memory reserved up front when reading a file.
const PREALLOCATE_LIMIT: u64 = 1 << 20;

/// State shared between the archive handle and its views.
pub(crate) struct Shared {
    pub parser: ZipParser<dyn ReadAt>,
    pub tree: Tree,
}

/// Metadata of a file or directory, available without reading content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    name: String,
    is_dir: bool,
    size: u64,
    modified: Option<SystemTime>,
}

impl Metadata {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    /// Uncompressed size in bytes; zero for directories.
    pub fn len(&self) -> u64 {
        self.size
    }

    pub fn modified(&self) -> Option<SystemTime> {
        self.modified
    }
}

/// An entry met while listing or walking a view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Path relative to the view root, `.` for the root itself
    pub path: String,
    pub name: String,
    pub is_dir: bool,
}

/// A read-only, change-rooted projection of an archive.
#[derive(Clone)]
pub struct ArchiveFs {
    shared: Weak<Shared>,
    root: String,
}

impl fmt::Debug for ArchiveFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveFs")
            .field("root", &self.root())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ArchiveFs {
    pub(crate) fn new(shared: Weak<Shared>) -> Self {
        Self {
            shared,
            root: String::new(),
        }
    }

    /// The directory of the archive this view is rooted at (`.` for the archive root).
    pub fn root(&self) -> &str {
        path::display(&self.root)
    }

    /// True once the archive backing this view has been released.
    pub fn is_closed(&self) -> bool {
        self.shared.strong_count() == 0
    }

    fn shared(&self) -> Result<Arc<Shared>, FsError> {
        self.shared.upgrade().ok_or(FsError::Closed)
    }

    /// Archive key for a path relative to this view. `..` cannot leave the view.
    fn key(&self, path: &str) -> String {
        path::join(&self.root, &path::clean(path))
    }

    pub fn stat(&self, path: &str) -> Result<Metadata, FsError> {
        let shared = self.shared()?;
        let key = self.key(path);
        let name = if key == self.root {
            ".".to_string()
        } else {
            path::base_name(&key).to_string()
        };

        match shared.tree.get(&key) {
            Some(Node::Dir { modified, .. }) => Ok(Metadata {
                name,
                is_dir: true,
                size: 0,
                modified: *modified,
            }),
            Some(Node::File(entry)) => Ok(Metadata {
                name,
                is_dir: false,
                size: entry.uncompressed_size,
                modified: entry.modified(),
            }),
            None => Err(FsError::NotFound(path.to_string())),
        }
    }

    /// Entries of a directory, sorted by name.
    pub fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>, FsError> {
        let shared = self.shared()?;
        let rel = path::clean(path);
        match shared.tree.get(&self.key(&rel)) {
            Some(Node::Dir { children, .. }) => Ok(children
                .iter()
                .map(|name| {
                    let child = path::join(&rel, name);
                    let is_dir = matches!(
                        shared.tree.get(&self.key(&child)),
                        Some(Node::Dir { .. })
                    );
                    DirEntry {
                        path: child,
                        name: name.clone(),
                        is_dir,
                    }
                })
                .collect()),
            Some(Node::File(_)) => Err(FsError::NotDirectory(path.to_string())),
            None => Err(FsError::NotFound(path.to_string())),
        }
    }

    /// Depth-first, pre-order walk starting at `start` (visited first).
    ///
    /// Siblings are visited in bytewise name order, so the visit order only
    /// depends on the archive's paths. Returning `ControlFlow::Break` from
    /// `visit` ends the walk and its value is returned.
    pub fn walk<T>(
        &self,
        start: &str,
        mut visit: impl FnMut(&DirEntry) -> ControlFlow<T>,
    ) -> Result<Option<T>, FsError> {
        let shared = self.shared()?;
        let start = path::clean(start);
        let first = match shared.tree.get(&self.key(&start)) {
            Some(node) => DirEntry {
                path: path::display(&start).to_string(),
                name: if start.is_empty() {
                    ".".to_string()
                } else {
                    path::base_name(&start).to_string()
                },
                is_dir: matches!(node, Node::Dir { .. }),
            },
            None => return Err(FsError::NotFound(path::display(&start).to_string())),
        };

        let mut stack = vec![(start, first)];
        while let Some((rel, entry)) = stack.pop() {
            if let ControlFlow::Break(found) = visit(&entry) {
                return Ok(Some(found));
            }
            if !entry.is_dir {
                continue;
            }
            let Some(Node::Dir { children, .. }) = shared.tree.get(&self.key(&rel)) else {
                continue;
            };
            for name in children.iter().rev() {
                let child = path::join(&rel, name);
                let is_dir = matches!(shared.tree.get(&self.key(&child)), Some(Node::Dir { .. }));
                let entry = DirEntry {
                    path: child.clone(),
                    name: name.clone(),
                    is_dir,
                };
                stack.push((child, entry));
            }
        }
        Ok(None)
    }

    /// Every path below the view root with its kind, in walk order.
    pub fn entries(&self) -> Result<Vec<DirEntry>, FsError> {
        let mut all = Vec::new();
        self.walk(".", |entry| {
            if entry.path != "." {
                all.push(entry.clone());
            }
            ControlFlow::<()>::Continue(())
        })?;
        Ok(all)
    }

    /// The file entry at `path`, or why there is none.
    fn file<'a>(shared: &'a Shared, key: &str, path: &str) -> Result<&'a ZipFileEntry, FsError> {
        let entry = match shared.tree.get(key) {
            Some(Node::File(entry)) => entry,
            Some(Node::Dir { .. }) => return Err(FsError::IsDirectory(path.to_string())),
            None => return Err(FsError::NotFound(path.to_string())),
        };
        if entry.is_encrypted() {
            return Err(FsError::Unsupported {
                path: path.to_string(),
                reason: "encrypted".to_string(),
            });
        }
        Ok(entry)
    }

    /// Open a file for sequential reading.
    pub async fn open(&self, path: &str) -> Result<EntryReader, FsError> {
        let shared = self.shared()?;
        let entry = Self::file(&shared, &self.key(path), path)?;

        let raw = shared
            .parser
            .read_raw(entry)
            .await
            .map_err(|reason| FsError::Read {
                path: path.to_string(),
                reason,
            })?;

        EntryReader::new(entry, raw).map_err(|method| FsError::unsupported_method(path, method))
    }

    /// Read a whole file into memory.
    pub async fn read(&self, path: &str) -> Result<Bytes, FsError> {
        let mut reader = self.open(path).await?;
        // The declared size is only a hint; the reader checks it at the end
        let mut content = Vec::with_capacity(reader.size().min(PREALLOCATE_LIMIT) as usize);
        reader.read_to_end(&mut content)?;
        Ok(Bytes::from(content))
    }

    /// Read bytes `range` of a file.
    ///
    /// Uncompressed entries are read in place, so only the requested bytes
    /// are fetched from the archive source; compressed entries are inflated
    /// and cut. The range is clamped to the file size.
    pub async fn read_range(&self, path: &str, range: Range<u64>) -> Result<Bytes, FsError> {
        let shared = self.shared()?;
        let entry = Self::file(&shared, &self.key(path), path)?;
        let end = range.end.min(entry.uncompressed_size);
        let start = range.start.min(end);

        if !entry.is_plain() {
            drop(shared);
            let content = self.read(path).await?;
            let end = end.min(content.len() as u64);
            return Ok(content.slice(start.min(end) as usize..end as usize));
        }

        let raw = shared
            .parser
            .read_raw_range(entry, start..end)
            .await
            .map_err(|reason| FsError::Read {
                path: path.to_string(),
                reason,
            })?;
        Ok(Bytes::from(raw))
    }

    /// A view rooted at `dir`, which must be a directory of this view.
    pub fn sub(&self, dir: &str) -> Result<ArchiveFs, FsError> {
        let meta = self.stat(dir)?;
        if !meta.is_dir() {
            return Err(FsError::NotDirectory(dir.to_string()));
        }
        Ok(Self {
            shared: self.shared.clone(),
            root: self.key(dir),
        })
    }
}
