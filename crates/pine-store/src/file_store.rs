//! The [`FileStore`] trait abstracts blob + directory access over a single
//! root, with two implementations: [`LocalFileStore`] (real `tokio::fs` I/O)
//! and [`OverlayFileStore`] (an in-memory copy-on-write layer used by the
//! two-phase "attempt continue" commit protocol in `pine-process`): one
//! trait, multiple backends, async throughout.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

/// Errors produced by [`FileStore`] implementations.
#[derive(Debug, Error)]
pub enum FileStoreError {
    /// Underlying filesystem I/O failed.
    #[error("file store I/O error at {path}: {source}")]
    Io {
        /// The path the operation was attempted against.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// A relative, `/`-separated path within a [`FileStore`]. Never contains
/// `..` segments or an absolute prefix — callers pass logical paths such as
/// `"values/ab/abcdef..."`.
pub type RelPath = String;

/// Abstract blob + directory interface over a single root.
///
/// All paths are relative to that root; implementations never allow escaping
/// it. Every method is async so a `FileStore` can wrap either a real
/// filesystem or an in-memory overlay without callers caring which.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Read the full contents of `path`, or `None` if it doesn't exist.
    async fn read_file(&self, path: &str) -> Result<Option<Vec<u8>>, FileStoreError>;

    /// Write `contents` to `path`, creating parent directories as needed.
    /// Overwrites any existing file.
    async fn write_file(&self, path: &str, contents: &[u8]) -> Result<(), FileStoreError>;

    /// List the direct entries of directory `path` (file and directory names,
    /// not full paths). Returns an empty list if the directory doesn't exist.
    async fn list_directory(&self, path: &str) -> Result<Vec<String>, FileStoreError>;

    /// Remove the file at `path`. A no-op if it doesn't exist.
    async fn delete_file(&self, path: &str) -> Result<(), FileStoreError>;

    /// Produce a disposable, in-memory copy-on-write overlay on top of this
    /// store — the "projected file store" the two-phase commit protocol
    /// speculatively writes into before touching durable storage.
    fn project(self: std::sync::Arc<Self>) -> OverlayFileStore;
}

//─────────────────────────────
//  LocalFileStore
//─────────────────────────────

/// A [`FileStore`] backed by real files under `root`.
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    /// Open (without creating) a local file store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn read_file(&self, path: &str) -> Result<Option<Vec<u8>>, FileStoreError> {
        let full = self.resolve(path);
        match tokio::fs::read(&full).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(FileStoreError::Io { path: path.to_string(), source }),
        }
    }

    async fn write_file(&self, path: &str, contents: &[u8]) -> Result<(), FileStoreError> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| FileStoreError::Io { path: path.to_string(), source })?;
        }
        tokio::fs::write(&full, contents)
            .await
            .map_err(|source| FileStoreError::Io { path: path.to_string(), source })?;
        debug!(path, bytes = contents.len(), "wrote file to local store");
        Ok(())
    }

    async fn list_directory(&self, path: &str) -> Result<Vec<String>, FileStoreError> {
        let full = self.resolve(path);
        let mut entries = match tokio::fs::read_dir(&full).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(FileStoreError::Io { path: path.to_string(), source }),
        };
        let mut names = Vec::new();
        loop {
            let next = entries
                .next_entry()
                .await
                .map_err(|source| FileStoreError::Io { path: path.to_string(), source })?;
            match next {
                Some(entry) => {
                    if let Some(name) = entry.file_name().to_str() {
                        names.push(name.to_string());
                    }
                }
                None => break,
            }
        }
        names.sort();
        Ok(names)
    }

    async fn delete_file(&self, path: &str) -> Result<(), FileStoreError> {
        let full = self.resolve(path);
        match tokio::fs::remove_file(&full).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(FileStoreError::Io { path: path.to_string(), source }),
        }
    }

    fn project(self: std::sync::Arc<Self>) -> OverlayFileStore {
        OverlayFileStore::new(self as std::sync::Arc<dyn FileStore>)
    }
}

//─────────────────────────────
//  OverlayFileStore
//─────────────────────────────

#[derive(Debug, Clone)]
enum OverlayEntry {
    Written(Vec<u8>),
    Deleted,
}

/// An in-memory, copy-on-write overlay on top of a base [`FileStore`].
///
/// Reads fall through to the base store unless the path has been written or
/// deleted in the overlay. Writes never touch the base store — they're held
/// in memory until [`OverlayFileStore::writes`] is drained into the real
/// store by the commit phase of the two-phase "attempt continue" protocol.
pub struct OverlayFileStore {
    base: std::sync::Arc<dyn FileStore>,
    overlay: Mutex<BTreeMap<RelPath, OverlayEntry>>,
}

impl OverlayFileStore {
    /// Wrap `base` in a fresh, empty overlay.
    pub fn new(base: std::sync::Arc<dyn FileStore>) -> Self {
        Self { base, overlay: Mutex::new(BTreeMap::new()) }
    }

    /// The set of paths written (not deleted) in this overlay, for copying
    /// into the real store during the commit phase.
    pub fn writes(&self) -> Vec<(RelPath, Vec<u8>)> {
        self.overlay
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(path, entry)| match entry {
                OverlayEntry::Written(bytes) => Some((path.clone(), bytes.clone())),
                OverlayEntry::Deleted => None,
            })
            .collect()
    }
}

#[async_trait]
impl FileStore for OverlayFileStore {
    async fn read_file(&self, path: &str) -> Result<Option<Vec<u8>>, FileStoreError> {
        {
            let overlay = self.overlay.lock().unwrap();
            match overlay.get(path) {
                Some(OverlayEntry::Written(bytes)) => return Ok(Some(bytes.clone())),
                Some(OverlayEntry::Deleted) => return Ok(None),
                None => {}
            }
        }
        self.base.read_file(path).await
    }

    async fn write_file(&self, path: &str, contents: &[u8]) -> Result<(), FileStoreError> {
        self.overlay
            .lock()
            .unwrap()
            .insert(path.to_string(), OverlayEntry::Written(contents.to_vec()));
        Ok(())
    }

    async fn list_directory(&self, path: &str) -> Result<Vec<String>, FileStoreError> {
        let mut names: std::collections::BTreeSet<String> =
            self.base.list_directory(path).await?.into_iter().collect();
        let prefix = if path.is_empty() { String::new() } else { format!("{path}/") };
        let overlay = self.overlay.lock().unwrap();
        for (entry_path, entry) in overlay.iter() {
            if let Some(rest) = entry_path.strip_prefix(&prefix) {
                if rest.is_empty() || rest.contains('/') {
                    continue;
                }
                match entry {
                    OverlayEntry::Written(_) => {
                        names.insert(rest.to_string());
                    }
                    OverlayEntry::Deleted => {
                        names.remove(rest);
                    }
                }
            }
        }
        Ok(names.into_iter().collect())
    }

    async fn delete_file(&self, path: &str) -> Result<(), FileStoreError> {
        self.overlay.lock().unwrap().insert(path.to_string(), OverlayEntry::Deleted);
        Ok(())
    }

    fn project(self: std::sync::Arc<Self>) -> OverlayFileStore {
        OverlayFileStore::new(self as std::sync::Arc<dyn FileStore>)
    }
}

/// Copy every write recorded in `overlay` into `target`. The commit phase of
/// the two-phase "attempt continue" protocol.
pub async fn commit_overlay(
    overlay: &OverlayFileStore,
    target: &dyn FileStore,
) -> Result<(), FileStoreError> {
    for (path, contents) in overlay.writes() {
        target.write_file(&path, &contents).await?;
    }
    Ok(())
}

/// Join path segments with `/`, used throughout `pine-store` to build
/// `RelPath`s without accidental platform path separators.
pub fn join(segments: &[&str]) -> RelPath {
    segments.join("/")
}
