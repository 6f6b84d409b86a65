//! Interrupt handling during a cached fetch.
//!
//! Sends a real SIGINT to the test process, so it lives in its own test
//! binary where no other pull can observe the signal.

#![cfg(unix)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Notify;

use imgpull_core::{
    Backend, BackendError, BackendKind, CacheConfig, CacheKey, ContentCache, ContentId,
    FetchContext, ImagePuller, Namespace, PullError, PullRequest, Resolved,
};

/// Sets the flag when the fetch future is dropped.
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Backend whose fetch writes half an image and then never finishes.
struct StalledBackend {
    key: CacheKey,
    started: Notify,
    dropped: Arc<AtomicBool>,
}

#[async_trait]
impl Backend for StalledBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Oras
    }

    async fn identify(&self, _reference: &str) -> Result<Resolved, BackendError> {
        Ok(Resolved {
            key: self.key.clone(),
            location: None,
            size: None,
        })
    }

    async fn fetch(
        &self,
        _resolved: &Resolved,
        _reference: &str,
        dest: &Path,
        _ctx: &FetchContext<'_>,
    ) -> Result<(), BackendError> {
        let _running = DropFlag(self.dropped.clone());
        tokio::fs::write(dest, b"half an ima").await?;
        self.started.notify_one();
        std::future::pending::<()>().await;
        Ok(())
    }
}

fn entry_dir_files(cache: &ContentCache, key: &CacheKey) -> usize {
    let entry = cache.path(key);
    let Some(dir) = entry.parent() else {
        return 0;
    };
    std::fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
}

#[tokio::test]
async fn test_interrupt_stops_fetch_and_removes_partial() {
    let temp_dir = TempDir::new().unwrap();
    let puller = ImagePuller::new(ContentCache::new(&CacheConfig {
        root: temp_dir.path().join("cache"),
        disabled: false,
    }));
    let backend = StalledBackend {
        key: CacheKey::new(
            Namespace::Oras,
            ContentId::sha256_of(b"full image"),
            "alpine_latest.sif",
        )
        .unwrap(),
        started: Notify::new(),
        dropped: Arc::new(AtomicBool::new(false)),
    };
    let dest = temp_dir.path().join("alpine.sif");
    let request = PullRequest::new("oras://ghcr.io/org/alpine:latest", &dest);

    let interrupt = async {
        backend.started.notified().await;
        let status = std::process::Command::new("kill")
            .args(["-INT", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());
    };

    let (result, ()) = tokio::time::timeout(Duration::from_secs(10), async {
        tokio::join!(puller.pull(&backend, &request), interrupt)
    })
    .await
    .unwrap();

    match result.unwrap_err() {
        PullError::Interrupted { reference, .. } => {
            assert_eq!(reference, "oras://ghcr.io/org/alpine:latest");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(backend.dropped.load(Ordering::SeqCst));
    assert_eq!(entry_dir_files(puller.cache(), &backend.key), 0);
    assert!(!dest.exists());
}
