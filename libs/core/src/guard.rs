//! Removes an in-progress download when the process is interrupted.
//!
//! The guard is armed on the partial file of a fetch and disarmed as soon as
//! the fetch returns, before the file is verified or renamed into the cache.
//! An interrupt after disarm can leave at most a stray partial file, which
//! the cache never reports as an entry.
//!
//! The guard does not end the process itself. The puller stops the fetch
//! once [`InterruptGuard::interrupted`] completes, so in-flight transfers and
//! builder children are dropped before the caller exits with
//! [`INTERRUPT_EXIT_CODE`].

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Exit code used after an interrupt (128 + SIGINT).
pub const INTERRUPT_EXIT_CODE: i32 = 130;

/// Watches for SIGINT/SIGTERM while a fetch writes `path`.
pub struct InterruptGuard {
    path: PathBuf,
    disarm: Option<oneshot::Sender<()>>,
    watcher: Option<JoinHandle<()>>,
    fired: watch::Receiver<bool>,
}

impl InterruptGuard {
    /// Arm on process signals.
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm(path: impl Into<PathBuf>) -> io::Result<Self> {
        Ok(Self::arm_with(path, interrupt_signal()?))
    }

    /// Arm on an arbitrary interrupt future.
    pub fn arm_with<F>(path: impl Into<PathBuf>, interrupted: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let path = path.into();
        let (disarm, disarmed) = oneshot::channel::<()>();
        let (fire, fired) = watch::channel(false);
        let watched = path.clone();

        let watcher = tokio::spawn(async move {
            tokio::select! {
                biased;

                _ = interrupted => {
                    warn!(path = %watched.display(), "Interrupted, removing partial download");
                    if let Err(e) = remove_if_present(&watched) {
                        warn!(path = %watched.display(), error = %e, "Failed to remove partial download");
                    }
                    let _ = fire.send(true);
                }

                _ = disarmed => {}
            }
        });

        debug!(path = %path.display(), "Interrupt guard armed");
        Self {
            path,
            disarm: Some(disarm),
            watcher: Some(watcher),
            fired,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether an interrupt has already removed the file.
    pub fn is_interrupted(&self) -> bool {
        *self.fired.borrow()
    }

    /// Completes once an interrupt has removed the file; pending forever if
    /// the guard is disarmed first.
    pub async fn interrupted(&self) {
        let mut fired = self.fired.clone();
        if fired.wait_for(|fired| *fired).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Remove the watched file now. Idempotent.
    pub fn cleanup(&self) -> io::Result<()> {
        remove_if_present(&self.path)
    }

    /// Stop watching and wait until the watcher has exited.
    pub async fn disarm(mut self) {
        if let Some(disarm) = self.disarm.take() {
            let _ = disarm.send(());
        }
        if let Some(watcher) = self.watcher.take() {
            let _ = watcher.await;
        }
        debug!(path = %self.path.display(), "Interrupt guard disarmed");
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        if let Some(disarm) = self.disarm.take() {
            let _ = disarm.send(());
        }
    }
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Future that completes on the next SIGINT or SIGTERM.
///
/// Registering replaces the default action of both signals for the rest of
/// the process, so a binary using this must exit on its own when it fires.
#[cfg(unix)]
pub fn interrupt_signal() -> io::Result<impl Future<Output = ()> + Send + 'static> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    Ok(async move {
        tokio::select! {
            _ = sigint.recv() => {}
            _ = sigterm.recv() => {}
        }
    })
}

/// Future that completes on the next Ctrl-C.
#[cfg(not(unix))]
pub fn interrupt_signal() -> io::Result<impl Future<Output = ()> + Send + 'static> {
    Ok(async {
        let _ = tokio::signal::ctrl_c().await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn partial_in(dir: &TempDir) -> PathBuf {
        let path = dir.path().join(".partial-abc-alpine.sif");
        std::fs::write(&path, b"half an ima").unwrap();
        path
    }

    #[tokio::test]
    async fn test_interrupt_removes_partial() {
        let dir = TempDir::new().unwrap();
        let path = partial_in(&dir);
        let (fire, fired) = oneshot::channel::<()>();

        let guard = InterruptGuard::arm_with(&path, async move {
            let _ = fired.await;
        });
        fire.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(5), guard.interrupted())
            .await
            .unwrap();
        assert!(guard.is_interrupted());
        assert!(!path.exists());

        guard.disarm().await;
    }

    #[tokio::test]
    async fn test_disarm_keeps_file() {
        let dir = TempDir::new().unwrap();
        let path = partial_in(&dir);

        let guard = InterruptGuard::arm_with(&path, std::future::pending());
        assert!(!guard.is_interrupted());
        guard.disarm().await;

        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_interrupted_stays_pending_without_interrupt() {
        let dir = TempDir::new().unwrap();
        let path = partial_in(&dir);

        let guard = InterruptGuard::arm_with(&path, std::future::pending());
        let waited =
            tokio::time::timeout(Duration::from_millis(50), guard.interrupted()).await;
        assert!(waited.is_err());

        guard.disarm().await;
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = partial_in(&dir);

        let guard = InterruptGuard::arm_with(&path, std::future::pending());
        guard.cleanup().unwrap();
        guard.cleanup().unwrap();
        assert!(!path.exists());

        drop(guard);
    }

    #[tokio::test]
    async fn test_arm_on_process_signals() {
        let dir = TempDir::new().unwrap();
        let path = partial_in(&dir);

        let guard = InterruptGuard::arm(&path).unwrap();
        assert_eq!(guard.path(), path.as_path());
        guard.disarm().await;

        assert!(path.exists());
    }
}
