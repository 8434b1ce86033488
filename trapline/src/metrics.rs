//! Metrics for a trap source task.
//!
//! Lightweight counters for observability. One `TaskMetrics` lives per task
//! and is shared by `Arc` with the listener handler and the poller.

use std::sync::atomic::{ AtomicU64, Ordering };

/// Monotonic, non-negative counter safe to bump from any thread
#[derive(Debug, Default)]
pub struct Counter {
    count: AtomicU64,
}

impl Counter {
    pub const fn new() -> Self {
        Self { count: AtomicU64::new(0) }
    }

    #[inline]
    pub fn increment(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add(&self, n: u64) {
        self.count.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

/// Counters owned by a task
#[derive(Debug, Default)]
pub struct TaskMetrics {
    /// Messages handed to the task by the listener, before filtering
    pub to_process: Counter,
    /// Records appended to the buffer
    pub processed: Counter,
    /// Records returned to the host by `poll`
    pub polled: Counter,
}

impl TaskMetrics {
    pub const fn new() -> Self {
        Self {
            to_process: Counter::new(),
            processed: Counter::new(),
            polled: Counter::new(),
        }
    }

    #[inline]
    pub fn record_received(&self) {
        self.to_process.increment();
    }

    #[inline]
    pub fn record_processed(&self) {
        self.processed.increment();
    }

    #[inline]
    pub fn record_polled(&self, n: usize) {
        self.polled.add(n as u64);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            to_process: self.to_process.get(),
            processed: self.processed.get(),
            polled: self.polled.get(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub to_process: u64,
    pub processed: u64,
    pub polled: u64,
}

impl MetricsSnapshot {
    /// Messages received but not turned into records (filtered or malformed)
    pub fn dropped(&self) -> u64 {
        self.to_process.saturating_sub(self.processed)
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "to_process={} processed={} polled={}",
            self.to_process,
            self.processed,
            self.polled
        )
    }
}
