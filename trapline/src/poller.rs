//! Poll loop: hand buffered records to the host in batches, back off when idle.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{ Duration, Instant };

use parking_lot::Mutex;
use tracing::{ debug, error, info };

use crate::backoff::Backoff;
use crate::buffer::RecordBuffer;
use crate::error::Result;
use crate::metrics::TaskMetrics;

/// How often the metrics snapshot is logged when collection is on
pub const METRICS_REPORT_INTERVAL: Duration = Duration::from_secs(30);

/// Result of a single poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    /// One or more records, oldest first
    Batch(Vec<T>),
    /// Nothing to hand over this time
    NoData,
}

impl<T> PollOutcome<T> {
    pub fn is_batch(&self) -> bool {
        matches!(self, PollOutcome::Batch(_))
    }

    pub fn len(&self) -> usize {
        match self {
            PollOutcome::Batch(records) => records.len(),
            PollOutcome::NoData => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_records(self) -> Vec<T> {
        match self {
            PollOutcome::Batch(records) => records,
            PollOutcome::NoData => Vec::new(),
        }
    }
}

/// Anything the poller can drain records from
pub trait RecordSource<T>: Send + Sync {
    fn is_empty(&self) -> bool;
    fn size(&self) -> usize;
    fn drain(&self, max: usize) -> Result<Vec<T>>;
}

impl<T: Send> RecordSource<T> for RecordBuffer<T> {
    fn is_empty(&self) -> bool {
        RecordBuffer::is_empty(self)
    }

    fn size(&self) -> usize {
        RecordBuffer::size(self)
    }

    fn drain(&self, max: usize) -> Result<Vec<T>> {
        Ok(RecordBuffer::drain(self, max))
    }
}

pub struct Poller<S, T> {
    source: Arc<S>,
    batch_size: usize,
    backoff: Arc<Backoff>,
    metrics: Option<Arc<TaskMetrics>>,
    report_every: Option<Duration>,
    last_report: Mutex<Instant>,
    _records: PhantomData<fn() -> T>,
}

impl<S: RecordSource<T>, T> Poller<S, T> {
    pub fn new(source: Arc<S>, batch_size: usize, backoff: Arc<Backoff>) -> Self {
        Self {
            source,
            batch_size,
            backoff,
            metrics: None,
            report_every: None,
            last_report: Mutex::new(Instant::now()),
            _records: PhantomData,
        }
    }

    /// Count polled records into `metrics`
    pub fn with_metrics(mut self, metrics: Arc<TaskMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Log the metrics snapshot at most once per `interval`
    pub fn report_metrics_every(mut self, interval: Duration) -> Self {
        self.report_every = Some(interval);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn backoff(&self) -> &Arc<Backoff> {
        &self.backoff
    }

    pub fn poll(&self) -> Result<PollOutcome<T>> {
        if self.source.is_empty() {
            self.backoff.wait()?;
            self.maybe_report();
            return Ok(PollOutcome::NoData);
        }

        let max = self.batch_size.min(self.source.size());
        let batch = match self.source.drain(max) {
            Ok(batch) => batch,
            Err(e) => {
                error!(error = %e, "failed to drain records, skipping poll");
                return Ok(PollOutcome::NoData);
            }
        };

        if batch.is_empty() {
            return Ok(PollOutcome::NoData);
        }

        debug!(count = batch.len(), "polled records");
        if let Some(metrics) = &self.metrics {
            metrics.record_polled(batch.len());
        }
        self.maybe_report();
        Ok(PollOutcome::Batch(batch))
    }

    fn maybe_report(&self) {
        let (Some(metrics), Some(interval)) = (&self.metrics, self.report_every) else {
            return;
        };
        let mut last = self.last_report.lock();
        if last.elapsed() >= interval {
            *last = Instant::now();
            info!(metrics = %metrics.snapshot(), "trap source metrics");
        }
    }
}

impl<S, T> std::fmt::Debug for Poller<S, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller")
            .field("batch_size", &self.batch_size)
            .field("backoff", &self.backoff)
            .field("metrics", &self.metrics.is_some())
            .field("report_every", &self.report_every)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TraplineError;

    struct FailingSource;

    impl RecordSource<u32> for FailingSource {
        fn is_empty(&self) -> bool {
            false
        }

        fn size(&self) -> usize {
            3
        }

        fn drain(&self, _max: usize) -> Result<Vec<u32>> {
            Err(TraplineError::source_error("queue unavailable"))
        }
    }

    fn poller(buffer: &Arc<RecordBuffer<u32>>, batch_size: usize, backoff_ms: u64) -> Poller<RecordBuffer<u32>, u32> {
        Poller::new(buffer.clone(), batch_size, Arc::new(Backoff::from_millis(backoff_ms)))
    }

    #[test]
    fn test_empty_poll_backs_off() {
        let buffer = Arc::new(RecordBuffer::new());
        let poller = poller(&buffer, 10, 50);

        let start = Instant::now();
        let outcome = poller.poll().unwrap();
        assert_eq!(outcome, PollOutcome::NoData);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_batch_capped_at_batch_size() {
        let buffer = Arc::new(RecordBuffer::new());
        for i in 0..25 {
            buffer.append(i);
        }
        let metrics = Arc::new(TaskMetrics::new());
        let poller = poller(&buffer, 10, 10_000).with_metrics(metrics.clone());

        let first = poller.poll().unwrap();
        assert_eq!(first.len(), 10);
        assert_eq!(first.into_records(), (0..10).collect::<Vec<_>>());
        assert_eq!(poller.poll().unwrap().len(), 10);

        let start = Instant::now();
        let last = poller.poll().unwrap();
        assert_eq!(last.into_records(), (20..25).collect::<Vec<_>>());
        assert!(start.elapsed() < Duration::from_secs(1));

        assert_eq!(metrics.snapshot().polled, 25);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_drain_error_is_swallowed() {
        let poller: Poller<FailingSource, u32> = Poller::new(
            Arc::new(FailingSource),
            10,
            Arc::new(Backoff::from_millis(10))
        );
        assert_eq!(poller.poll().unwrap(), PollOutcome::NoData);
    }

    #[test]
    fn test_interrupt_propagates() {
        let buffer = Arc::new(RecordBuffer::new());
        let poller = poller(&buffer, 10, 60_000);
        poller.backoff().interrupt();

        assert!(matches!(poller.poll(), Err(TraplineError::Interrupted)));
    }

    #[test]
    fn test_outcome_helpers() {
        let batch = PollOutcome::Batch(vec![1, 2]);
        assert!(batch.is_batch());
        assert!(!batch.is_empty());

        let none: PollOutcome<u8> = PollOutcome::NoData;
        assert!(!none.is_batch());
        assert!(none.is_empty());
        assert!(none.into_records().is_empty());
    }
}
