//! Download progress reporting.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, info};

/// Report granularity when the total size is unknown.
const UNKNOWN_TOTAL_STEP: u64 = 64 * 1024 * 1024;

/// Observes bytes as a fetch writes them.
///
/// Implementations must not affect the transfer; they are called from the
/// download loop and should return quickly.
pub trait Progress: Send + Sync {
    /// Called once before the first byte with the total, if known.
    fn start(&self, total: Option<u64>);

    /// Called after each chunk is written.
    fn advance(&self, bytes: u64);

    /// Called once after the last byte.
    fn finish(&self);
}

/// Discards all progress events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn start(&self, _total: Option<u64>) {}
    fn advance(&self, _bytes: u64) {}
    fn finish(&self) {}
}

/// Logs progress through `tracing`.
///
/// Emits a debug event every 10% of a known total, or every 64 MiB when the
/// total is unknown, and an info event on finish.
#[derive(Debug)]
pub struct LogProgress {
    label: String,
    total: AtomicU64,
    transferred: AtomicU64,
    next_report: AtomicU64,
}

impl LogProgress {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            total: AtomicU64::new(0),
            transferred: AtomicU64::new(0),
            next_report: AtomicU64::new(UNKNOWN_TOTAL_STEP),
        }
    }

    /// Bytes observed so far.
    pub fn transferred(&self) -> u64 {
        self.transferred.load(Ordering::Relaxed)
    }

    fn step(&self) -> u64 {
        match self.total.load(Ordering::Relaxed) {
            0 => UNKNOWN_TOTAL_STEP,
            total => (total / 10).max(1),
        }
    }
}

impl Progress for LogProgress {
    fn start(&self, total: Option<u64>) {
        self.total.store(total.unwrap_or(0), Ordering::Relaxed);
        self.transferred.store(0, Ordering::Relaxed);
        self.next_report.store(self.step(), Ordering::Relaxed);
        debug!(label = %self.label, total = ?total, "Transfer started");
    }

    fn advance(&self, bytes: u64) {
        let transferred = self.transferred.fetch_add(bytes, Ordering::Relaxed) + bytes;
        let next = self.next_report.load(Ordering::Relaxed);
        if transferred < next {
            return;
        }

        let step = self.step();
        let following = (transferred / step + 1) * step;
        if self
            .next_report
            .compare_exchange(next, following, Ordering::Relaxed, Ordering::Relaxed)
            .is_err()
        {
            return;
        }

        match self.total.load(Ordering::Relaxed) {
            0 => debug!(label = %self.label, transferred, "Transfer progress"),
            total => debug!(
                label = %self.label,
                transferred,
                total,
                percent = transferred.saturating_mul(100) / total,
                "Transfer progress"
            ),
        }
    }

    fn finish(&self) {
        info!(label = %self.label, bytes = self.transferred(), "Transfer complete");
    }
}
