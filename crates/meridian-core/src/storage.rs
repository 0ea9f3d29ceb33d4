//! Read-only storage facade over a materialized working tree.
//!
//! This module defines the object-access contract the dataset engine reads
//! through. The contract is deliberately read-only: the engine never writes
//! back to the on-disk format, so the trait exposes `get`/`list_dir`/`head`
//! and nothing else.
//!
//! All paths are repo-relative, use `/` separators on every platform, and
//! never begin with `/`. Listings are sorted by name so iteration order is
//! deterministic across backends.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tokio::sync::Semaphore;

use crate::error::{Error, Result};

/// Default bound on concurrently open filesystem handles.
pub const DEFAULT_MAX_HANDLES: usize = 256;

/// Whether a directory entry is a file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// A regular file.
    File,
    /// A directory.
    Dir,
}

/// A single entry yielded by [`ObjectSource::list_dir`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Entry name (no path separators).
    pub name: String,
    /// File or directory.
    pub kind: EntryKind,
}

impl DirEntry {
    /// Returns true if this entry is a regular file.
    #[must_use]
    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    /// Returns true if this entry is a directory.
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }
}

/// Metadata about a stored object, returned by [`ObjectSource::head`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Repo-relative path.
    pub path: String,
    /// Object size in bytes (0 for directories).
    pub size: u64,
    /// File or directory.
    pub kind: EntryKind,
}

/// Read-only, path-based object access.
///
/// Backends must be safe for concurrent use; the engine issues reads from
/// multiple lazy walks at once.
#[async_trait]
pub trait ObjectSource: Send + Sync + 'static {
    /// Reads an entire object.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the object doesn't exist, or
    /// [`Error::Io`] for other read failures.
    async fn get(&self, path: &str) -> Result<Bytes>;

    /// Lists the immediate children of a directory, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the directory doesn't exist.
    async fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>>;

    /// Stats a path without reading content. Returns `None` when absent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] for failures other than absence.
    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>>;
}

/// Joins repo-relative path segments with `/`, skipping empty segments.
///
/// The result never begins with `/`.
#[must_use]
pub fn join(segments: &[&str]) -> String {
    let mut out = String::new();
    for segment in segments {
        let trimmed = segment.trim_matches('/');
        if trimmed.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push('/');
        }
        out.push_str(trimmed);
    }
    out
}

/// Returns the final path component of a repo-relative path.
#[must_use]
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Local-filesystem backend rooted at a directory.
///
/// Concurrent open handles are bounded by a semaphore (default
/// [`DEFAULT_MAX_HANDLES`]) so wide fan-out walks cannot exhaust file
/// descriptors.
#[derive(Debug)]
pub struct LocalSource {
    root: PathBuf,
    permits: Arc<Semaphore>,
}

impl LocalSource {
    /// Creates a source rooted at `root` with the default handle bound.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_max_handles(root, DEFAULT_MAX_HANDLES)
    }

    /// Creates a source with an explicit bound on concurrent handles.
    #[must_use]
    pub fn with_max_handles(root: impl Into<PathBuf>, max_handles: usize) -> Self {
        Self {
            root: root.into(),
            permits: Arc::new(Semaphore::new(max_handles.max(1))),
        }
    }

    /// Returns the root directory this source reads under.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let mut out = self.root.clone();
        for part in path.split('/') {
            if part.is_empty() || part == "." || part == ".." {
                continue;
            }
            out.push(part);
        }
        out
    }
}

#[async_trait]
impl ObjectSource for LocalSource {
    async fn get(&self, path: &str) -> Result<Bytes> {
        let _permit = self.permits.acquire().await.map_err(|_| Error::Internal {
            message: "handle semaphore closed".into(),
        })?;
        let full = self.resolve(path);
        let data = tokio::fs::read(&full)
            .await
            .map_err(|e| Error::io(path, e))?;
        Ok(Bytes::from(data))
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>> {
        let _permit = self.permits.acquire().await.map_err(|_| Error::Internal {
            message: "handle semaphore closed".into(),
        })?;
        let full = self.resolve(path);
        let mut reader = tokio::fs::read_dir(&full)
            .await
            .map_err(|e| Error::io(path, e))?;

        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await.map_err(|e| Error::io(path, e))? {
            let file_type = entry.file_type().await.map_err(|e| Error::io(path, e))?;
            let kind = if file_type.is_dir() {
                EntryKind::Dir
            } else {
                EntryKind::File
            };
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                kind,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>> {
        let full = self.resolve(path);
        match tokio::fs::metadata(&full).await {
            Ok(meta) => Ok(Some(ObjectMeta {
                path: path.to_string(),
                size: if meta.is_file() { meta.len() } else { 0 },
                kind: if meta.is_dir() {
                    EntryKind::Dir
                } else {
                    EntryKind::File
                },
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io(path, e)),
        }
    }
}

/// In-memory backend for tests.
///
/// Stores files in a sorted map keyed by repo-relative path; directories
/// exist implicitly wherever a stored path passes through them.
#[derive(Debug, Default)]
pub struct MemorySource {
    objects: Arc<RwLock<BTreeMap<String, Bytes>>>,
}

impl MemorySource {
    /// Creates a new empty memory source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a file at the given repo-relative path.
    pub fn insert(&self, path: impl Into<String>, data: impl Into<Bytes>) {
        let mut objects = self.objects.write().unwrap_or_else(|e| e.into_inner());
        objects.insert(path.into(), data.into());
    }
}

#[async_trait]
impl ObjectSource for MemorySource {
    async fn get(&self, path: &str) -> Result<Bytes> {
        let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
        objects
            .get(path)
            .cloned()
            .ok_or_else(|| Error::NotFound(path.to_string()))
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>> {
        let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{}/", path.trim_end_matches('/'))
        };

        let mut entries: Vec<DirEntry> = Vec::new();
        let mut seen = std::collections::BTreeSet::new();
        for key in objects.keys() {
            let Some(rest) = key.strip_prefix(&prefix) else {
                continue;
            };
            if rest.is_empty() {
                continue;
            }
            match rest.split_once('/') {
                Some((dir, _)) => {
                    if seen.insert(dir.to_string()) {
                        entries.push(DirEntry {
                            name: dir.to_string(),
                            kind: EntryKind::Dir,
                        });
                    }
                }
                None => {
                    if seen.insert(rest.to_string()) {
                        entries.push(DirEntry {
                            name: rest.to_string(),
                            kind: EntryKind::File,
                        });
                    }
                }
            }
        }
        if entries.is_empty() && !prefix.is_empty() {
            return Err(Error::NotFound(path.to_string()));
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>> {
        let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
        if let Some(data) = objects.get(path) {
            return Ok(Some(ObjectMeta {
                path: path.to_string(),
                size: data.len() as u64,
                kind: EntryKind::File,
            }));
        }
        let prefix = format!("{}/", path.trim_end_matches('/'));
        if objects.keys().any(|k| k.starts_with(&prefix)) {
            return Ok(Some(ObjectMeta {
                path: path.to_string(),
                size: 0,
                kind: EntryKind::Dir,
            }));
        }
        Ok(None)
    }
}
