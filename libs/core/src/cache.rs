//! Content-addressable image cache.
//!
//! Entries live at `<root>/<namespace>/<id>/<name>`. An entry is only ever
//! created by renaming a fully written and verified partial file into place,
//! so a path that exists is complete. For content-addressed namespaces
//! [`ContentCache::exists`] re-hashes the entry on every call.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempPath;
use thiserror::Error;
use tracing::debug;

use crate::config::CacheConfig;
use crate::digest::{sha256_file, ContentId};

/// Prefix of in-flight files inside an entry directory.
pub const PARTIAL_PREFIX: &str = ".partial-";

/// Errors from cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cached image {path} is corrupt: expected {expected}, found sha256:{actual}")]
    BadChecksum {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("cached image {0} is not a regular file")]
    NotAFile(PathBuf),

    #[error("invalid image name for cache: {0:?}")]
    InvalidName(String),

    #[error("namespace {namespace} requires a sha256 identifier, got {id}")]
    MissingChecksum { namespace: Namespace, id: ContentId },

    #[error("cache I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl CacheError {
    /// Whether the error describes a stored entry that must be purged.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::BadChecksum { .. } | Self::NotAFile(_))
    }

    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Per-backend top-level cache directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Library,
    Shub,
    OciTmp,
    Oras,
}

impl Namespace {
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Library => "library",
            Self::Shub => "shub",
            Self::OciTmp => "oci-tmp",
            Self::Oras => "oras",
        }
    }

    /// Whether entries are named by the sha256 of their own bytes.
    ///
    /// Hub commits and OCI manifest digests name the source, not the stored
    /// file, so those namespaces can only be presence-checked.
    pub fn is_content_addressed(self) -> bool {
        matches!(self, Self::Library | Self::Oras)
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// (namespace, identifier, logical name) of one cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    namespace: Namespace,
    id: ContentId,
    name: String,
}

impl CacheKey {
    pub fn new(
        namespace: Namespace,
        id: ContentId,
        name: impl Into<String>,
    ) -> Result<Self, CacheError> {
        let name = name.into();
        if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
            return Err(CacheError::InvalidName(name));
        }
        if namespace.is_content_addressed() && id.sha256_hex().is_none() {
            return Err(CacheError::MissingChecksum { namespace, id });
        }
        Ok(Self {
            namespace,
            id,
            name,
        })
    }

    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    pub fn id(&self) -> &ContentId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Handle on the cache root.
#[derive(Debug, Clone)]
pub struct ContentCache {
    root: PathBuf,
    disabled: bool,
}

impl ContentCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            root: config.root.clone(),
            disabled: config.disabled,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// When true the puller never reads or writes under the root.
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Path of an entry. Pure; does not touch the filesystem.
    pub fn path(&self, key: &CacheKey) -> PathBuf {
        self.entry_dir(key).join(&key.name)
    }

    fn entry_dir(&self, key: &CacheKey) -> PathBuf {
        self.root
            .join(key.namespace.dir_name())
            .join(key.id.as_str())
    }

    /// Check that an entry is present and intact.
    ///
    /// Returns `Ok(false)` when absent and `Err` with
    /// [`CacheError::BadChecksum`] when present but its bytes do not hash to
    /// the identifier.
    pub fn exists(&self, key: &CacheKey) -> Result<bool, CacheError> {
        let path = self.path(key);
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Err(CacheError::NotAFile(path)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(CacheError::io(&path, e)),
        }

        if !key.namespace.is_content_addressed() {
            return Ok(true);
        }

        let actual = sha256_file(&path).map_err(|e| CacheError::io(&path, e))?;
        if key.id.matches_sha256(&actual) {
            debug!(path = %path.display(), "Cached image checksum verified");
            Ok(true)
        } else {
            Err(CacheError::BadChecksum {
                path,
                expected: key.id.to_string(),
                actual,
            })
        }
    }

    /// Delete an entry. A missing entry is not an error.
    pub fn remove(&self, key: &CacheKey) -> Result<(), CacheError> {
        let path = self.path(key);
        let result = match fs::symlink_metadata(&path) {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(&path),
            Ok(_) => fs::remove_file(&path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => Err(e),
        };
        result.map_err(|e| CacheError::io(&path, e))
    }

    /// Allocate a fresh partial file next to the entry.
    ///
    /// The returned path is deleted on drop unless it is committed.
    pub fn partial_path(&self, key: &CacheKey) -> Result<TempPath, CacheError> {
        let dir = self.entry_dir(key);
        fs::create_dir_all(&dir).map_err(|e| CacheError::io(&dir, e))?;

        let file = tempfile::Builder::new()
            .prefix(PARTIAL_PREFIX)
            .suffix(&format!("-{}", key.name))
            .tempfile_in(&dir)
            .map_err(|e| CacheError::io(&dir, e))?;
        Ok(file.into_temp_path())
    }

    /// Atomically move a verified partial file into the entry path.
    pub fn commit(&self, partial: TempPath, key: &CacheKey) -> Result<PathBuf, CacheError> {
        let path = self.path(key);
        partial
            .persist(&path)
            .map_err(|e| CacheError::io(&path, e.error))?;
        debug!(path = %path.display(), "Committed cache entry");
        Ok(path)
    }
}
