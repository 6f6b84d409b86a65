//! Pull orchestration: resolve, check the cache, fetch, verify, copy out.
//!
//! A pull with the cache enabled always goes through the cache: content is
//! fetched into a partial file next to its entry, verified, renamed into
//! place and only then copied to the destination. A second pull of the same
//! identifier is therefore a cache hit and a copy, with no transfer.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::backend::{Backend, BackendError, FetchContext, Resolved};
use crate::cache::{CacheError, CacheKey, ContentCache};
use crate::digest::{sha256_file, ContentId};
use crate::finalize::{check_target, copy_from_cache, finalize_in_place};
use crate::guard::InterruptGuard;
use crate::progress::LogProgress;

/// Errors from a pull. Each variant is a terminal state.
#[derive(Debug, Error)]
pub enum PullError {
    #[error("destination {} already exists", .path.display())]
    DestinationExists { path: PathBuf },

    #[error("failed to resolve {reference}: {source}")]
    Resolution {
        reference: String,
        #[source]
        source: BackendError,
    },

    #[error("failed to fetch {reference} ({id}): {source}")]
    Fetch {
        reference: String,
        id: ContentId,
        #[source]
        source: BackendError,
    },

    #[error("downloaded image for {reference} failed verification: expected {expected}, got sha256:{actual}")]
    Integrity {
        reference: String,
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("failed to copy {id} from {} to {}: {source}", .source_path.display(), .destination.display())]
    Copy {
        id: ContentId,
        source_path: PathBuf,
        destination: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("interrupted while fetching {reference}; removed {}", .path.display())]
    Interrupted { reference: String, path: PathBuf },

    #[error("cache error: {source}")]
    Cache {
        #[from]
        source: CacheError,
    },
}

/// One pull: which image, where to put it.
#[derive(Debug, Clone)]
pub struct PullRequest {
    pub reference: String,
    pub destination: PathBuf,
    /// Overwrite an existing destination.
    pub force: bool,
}

impl PullRequest {
    pub fn new(reference: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            reference: reference.into(),
            destination: destination.into(),
            force: false,
        }
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

/// Result of a successful pull.
#[derive(Debug, Clone, Serialize)]
pub struct PullResult {
    pub reference: String,
    /// Identifier the content resolved to.
    pub id: ContentId,
    pub destination: PathBuf,
    /// Cache entry the destination was copied from; `None` with the cache
    /// disabled.
    pub cache_path: Option<PathBuf>,
    /// Whether a valid entry was already cached.
    pub was_cached: bool,
    /// Size of the destination file.
    pub bytes: u64,
    pub pull_duration_ms: u64,
}

/// Drives pulls against an injected cache.
///
/// Concurrent pulls of the same cache key in one process are serialized from
/// the cache check through commit, so only the first one fetches.
pub struct ImagePuller {
    cache: ContentCache,
    /// Per-key fetch locks.
    fetch_locks: Mutex<HashMap<CacheKey, Arc<Mutex<()>>>>,
}

impl ImagePuller {
    pub fn new(cache: ContentCache) -> Self {
        Self {
            cache,
            fetch_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn cache(&self) -> &ContentCache {
        &self.cache
    }

    /// Pull `request.reference` through `backend` into `request.destination`.
    pub async fn pull(
        &self,
        backend: &dyn Backend,
        request: &PullRequest,
    ) -> Result<PullResult, PullError> {
        let start = Instant::now();
        let reference = request.reference.as_str();
        let dest = request.destination.as_path();

        if !check_target(dest, request.force) {
            return Err(PullError::DestinationExists {
                path: dest.to_path_buf(),
            });
        }

        let resolved = backend
            .identify(reference)
            .await
            .map_err(|source| PullError::Resolution {
                reference: reference.to_string(),
                source,
            })?;
        let key = &resolved.key;

        info!(
            reference = %reference,
            backend = %backend.kind(),
            id = %key.id(),
            name = %key.name(),
            "Resolved image"
        );

        if self.cache.is_disabled() {
            return self.pull_direct(backend, &resolved, request, start).await;
        }

        let (cache_path, was_cached) = self.ensure_cached(backend, &resolved, reference).await?;

        let bytes = copy_from_cache(&cache_path, dest)
            .await
            .map_err(|source| PullError::Copy {
                id: key.id().clone(),
                source_path: cache_path.clone(),
                destination: dest.to_path_buf(),
                source,
            })?;

        let duration = start.elapsed();
        info!(
            reference = %reference,
            id = %key.id(),
            destination = %dest.display(),
            was_cached,
            duration_ms = duration.as_millis(),
            size_bytes = bytes,
            "Pull complete"
        );

        Ok(PullResult {
            reference: reference.to_string(),
            id: key.id().clone(),
            destination: dest.to_path_buf(),
            cache_path: Some(cache_path),
            was_cached,
            bytes,
            pull_duration_ms: duration.as_millis() as u64,
        })
    }

    /// Return a valid cache entry for `resolved`, fetching it if needed.
    ///
    /// The boolean is true when the entry was already present.
    async fn ensure_cached(
        &self,
        backend: &dyn Backend,
        resolved: &Resolved,
        reference: &str,
    ) -> Result<(PathBuf, bool), PullError> {
        let key = &resolved.key;

        let lock = self.fetch_lock(key).await;
        let _held = lock.lock().await;

        match self.cache.exists(key) {
            Ok(true) => {
                info!(reference = %reference, id = %key.id(), "Cache hit");
                return Ok((self.cache.path(key), true));
            }
            Ok(false) => {
                debug!(reference = %reference, id = %key.id(), "Cache miss");
            }
            Err(e) if e.is_corrupt() => {
                warn!(
                    reference = %reference,
                    id = %key.id(),
                    error = %e,
                    "Removing corrupt cache entry"
                );
                self.cache.remove(key)?;
            }
            Err(e) => return Err(e.into()),
        }

        let path = self.fetch_to_cache(backend, resolved, reference).await?;
        Ok((path, false))
    }

    async fn fetch_to_cache(
        &self,
        backend: &dyn Backend,
        resolved: &Resolved,
        reference: &str,
    ) -> Result<PathBuf, PullError> {
        let key = &resolved.key;
        let partial = self.cache.partial_path(key)?;

        let guard = match InterruptGuard::arm(partial.to_path_buf()) {
            Ok(guard) => Some(guard),
            Err(e) => {
                warn!(error = %e, "Could not install interrupt handler");
                None
            }
        };

        let progress = LogProgress::new(key.name());
        let ctx = FetchContext {
            progress: &progress,
            cache_disabled: false,
        };
        let fetch = backend.fetch(resolved, reference, &partial, &ctx);
        let fetched = match &guard {
            // Returning drops the fetch, which stops the transfer and kills
            // any builder child.
            Some(guard) => tokio::select! {
                result = fetch => result,
                _ = guard.interrupted() => {
                    return Err(PullError::Interrupted {
                        reference: reference.to_string(),
                        path: guard.path().to_path_buf(),
                    });
                }
            },
            None => fetch.await,
        };

        if let Some(guard) = guard {
            guard.disarm().await;
        }

        // Dropping `partial` on any error below removes it.
        fetched.map_err(|source| PullError::Fetch {
            reference: reference.to_string(),
            id: key.id().clone(),
            source,
        })?;
        verify(key, &partial, reference)?;

        Ok(self.cache.commit(partial, key)?)
    }

    /// Fetch straight into the destination, bypassing the cache.
    ///
    /// A failed fetch may leave a truncated destination behind.
    async fn pull_direct(
        &self,
        backend: &dyn Backend,
        resolved: &Resolved,
        request: &PullRequest,
        start: Instant,
    ) -> Result<PullResult, PullError> {
        let key = &resolved.key;
        let reference = request.reference.as_str();
        let dest = request.destination.as_path();

        info!(reference = %reference, destination = %dest.display(), "Cache disabled, fetching to destination");

        let progress = LogProgress::new(key.name());
        let ctx = FetchContext {
            progress: &progress,
            cache_disabled: true,
        };
        backend
            .fetch(resolved, reference, dest, &ctx)
            .await
            .map_err(|source| PullError::Fetch {
                reference: reference.to_string(),
                id: key.id().clone(),
                source,
            })?;

        if let Err(e) = verify(key, dest, reference) {
            if matches!(e, PullError::Integrity { .. }) {
                if let Err(remove_err) = std::fs::remove_file(dest) {
                    warn!(path = %dest.display(), error = %remove_err, "Failed to remove unverified image");
                }
            }
            return Err(e);
        }

        let bytes = finalize_in_place(dest)
            .await
            .map_err(|source| PullError::Copy {
                id: key.id().clone(),
                source_path: dest.to_path_buf(),
                destination: dest.to_path_buf(),
                source,
            })?;

        let duration = start.elapsed();
        info!(
            reference = %reference,
            id = %key.id(),
            destination = %dest.display(),
            duration_ms = duration.as_millis(),
            size_bytes = bytes,
            "Pull complete"
        );

        Ok(PullResult {
            reference: reference.to_string(),
            id: key.id().clone(),
            destination: dest.to_path_buf(),
            cache_path: None,
            was_cached: false,
            bytes,
            pull_duration_ms: duration.as_millis() as u64,
        })
    }

    /// Get or create the fetch lock for a key, dropping idle ones.
    async fn fetch_lock(&self, key: &CacheKey) -> Arc<Mutex<()>> {
        let mut locks = self.fetch_locks.lock().await;
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Re-hash fetched content for content-addressed namespaces.
fn verify(key: &CacheKey, path: &Path, reference: &str) -> Result<(), PullError> {
    if !key.namespace().is_content_addressed() {
        return Ok(());
    }

    let actual = sha256_file(path).map_err(|e| PullError::Fetch {
        reference: reference.to_string(),
        id: key.id().clone(),
        source: BackendError::Io(e),
    })?;

    if key.id().matches_sha256(&actual) {
        debug!(path = %path.display(), id = %key.id(), "Fetched content verified");
        Ok(())
    } else {
        Err(PullError::Integrity {
            reference: reference.to_string(),
            path: path.to_path_buf(),
            expected: key.id().to_string(),
            actual,
        })
    }
}
