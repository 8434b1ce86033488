//! Stress testing utilities for the record buffer.

use std::sync::atomic::{ AtomicBool, AtomicU64, Ordering };
use std::sync::Arc;
use std::thread::{ self, JoinHandle };
use std::time::{ Duration, Instant };

use trapline::RecordBuffer;

/// Configuration for stress tests
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Upper bound on how long producers run
    pub duration: Duration,
    /// Number of producer threads
    pub producers: usize,
    /// Records per producer (0 = until `duration` elapses)
    pub records_per_producer: u64,
    /// Max records per drain
    pub batch_size: usize,
    /// Print progress every interval
    pub report_interval: Duration,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(10),
            producers: 4,
            records_per_producer: 0,
            batch_size: 1024,
            report_interval: Duration::from_secs(1),
        }
    }
}

impl StressConfig {
    pub fn new(duration_secs: u64) -> Self {
        Self {
            duration: Duration::from_secs(duration_secs),
            ..Default::default()
        }
    }

    pub fn with_producers(mut self, n: usize) -> Self {
        self.producers = n;
        self
    }

    pub fn with_records_per_producer(mut self, n: u64) -> Self {
        self.records_per_producer = n;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_report_interval(mut self, interval: Duration) -> Self {
        self.report_interval = interval;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct StressMetrics {
    pub appended: u64,
    pub drained: u64,
    /// Records seen out of their producer's order
    pub out_of_order: u64,
    /// Producer threads that panicked instead of finishing
    pub producer_panics: u64,
    pub duration: Duration,
    pub peak_rate: f64,
}

impl StressMetrics {
    pub fn append_rate(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            (self.appended as f64) / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    pub fn drain_rate(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            (self.drained as f64) / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Appended but never drained
    pub fn missing(&self) -> u64 {
        self.appended.saturating_sub(self.drained)
    }
}

/// Shared counters for stress testing
pub struct StressCounters {
    pub appended: AtomicU64,
    pub drained: AtomicU64,
    pub out_of_order: AtomicU64,
    pub producer_panics: AtomicU64,
    pub running: AtomicBool,
}

impl StressCounters {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_append(&self) {
        self.appended.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_drain(&self, n: usize) {
        self.drained.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn record_out_of_order(&self) {
        self.out_of_order.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_producer_panic(&self) {
        self.producer_panics.fetch_add(1, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StressMetrics {
        StressMetrics {
            appended: self.appended.load(Ordering::Relaxed),
            drained: self.drained.load(Ordering::Relaxed),
            out_of_order: self.out_of_order.load(Ordering::Relaxed),
            producer_panics: self.producer_panics.load(Ordering::Relaxed),
            duration: Duration::ZERO,
            peak_rate: 0.0,
        }
    }
}

impl Default for StressCounters {
    fn default() -> Self {
        Self {
            appended: AtomicU64::new(0),
            drained: AtomicU64::new(0),
            out_of_order: AtomicU64::new(0),
            producer_panics: AtomicU64::new(0),
            running: AtomicBool::new(true),
        }
    }
}

/// Tracks the next expected sequence number per producer
#[derive(Debug)]
pub struct SequenceChecker {
    next: Vec<u64>,
}

impl SequenceChecker {
    pub fn new(producers: usize) -> Self {
        Self { next: vec![0; producers] }
    }

    /// False if `seq` is not the next record from `producer`
    pub fn check(&mut self, producer: usize, seq: u64) -> bool {
        let expected = &mut self.next[producer];
        let ok = seq == *expected;
        *expected = seq + 1;
        ok
    }

    pub fn seen(&self, producer: usize) -> u64 {
        self.next[producer]
    }
}

/// Runner for stress tests with progress reporting
pub struct StressRunner {
    config: StressConfig,
    counters: Arc<StressCounters>,
}

impl StressRunner {
    pub fn new(config: StressConfig) -> Self {
        Self {
            config,
            counters: StressCounters::new(),
        }
    }

    pub fn counters(&self) -> Arc<StressCounters> {
        self.counters.clone()
    }

    pub fn config(&self) -> &StressConfig {
        &self.config
    }

    /// Run the stress test with progress reporting
    pub fn run_with_progress<F>(&self, test_fn: F) -> StressMetrics where F: FnOnce(Arc<StressCounters>) {
        let start = Instant::now();
        let counters = self.counters.clone();
        let duration = self.config.duration;
        let report_interval = self.config.report_interval;

        let report_counters = counters.clone();
        let reporter = thread::spawn(move || {
            let mut last_appended = 0u64;
            let mut peak_rate = 0.0f64;

            while report_counters.is_running() {
                thread::sleep(report_interval);

                let appended = report_counters.appended.load(Ordering::Relaxed);
                let drained = report_counters.drained.load(Ordering::Relaxed);

                let rate = ((appended - last_appended) as f64) / report_interval.as_secs_f64();
                peak_rate = peak_rate.max(rate);
                last_appended = appended;

                let elapsed = start.elapsed();
                eprintln!(
                    "[{:>5.1}s] appended: {:>10}, drained: {:>10}, rate: {:>10.0}/s",
                    elapsed.as_secs_f64(),
                    appended,
                    drained,
                    rate
                );

                if elapsed >= duration {
                    report_counters.stop();
                    break;
                }
            }

            peak_rate
        });

        test_fn(counters.clone());

        counters.stop();
        let peak_rate = reporter.join().unwrap_or(0.0);

        let mut metrics = counters.snapshot();
        metrics.duration = start.elapsed();
        metrics.peak_rate = peak_rate;
        metrics
    }

    /// Producers append `(producer, seq)` while one consumer drains and
    /// checks per-producer FIFO order.
    pub fn run_buffer(&self) -> StressMetrics {
        let producers = self.config.producers;
        let quota = self.config.records_per_producer;
        let batch_size = self.config.batch_size;

        self.run_with_progress(move |counters| {
            let buffer = Arc::new(RecordBuffer::<(usize, u64)>::new());
            let active = Arc::new(AtomicU64::new(producers as u64));

            let handles: Vec<_> = (0..producers)
                .map(|id| {
                    let buffer = buffer.clone();
                    let counters = counters.clone();
                    let active = active.clone();
                    thread::spawn(move || {
                        let _finished = ActiveGuard(active);
                        let mut seq = 0u64;
                        while (quota == 0 || seq < quota) && (quota > 0 || counters.is_running()) {
                            buffer.append((id, seq));
                            counters.record_append();
                            seq += 1;
                        }
                    })
                })
                .collect();

            let mut checker = SequenceChecker::new(producers);
            loop {
                let done = active.load(Ordering::Acquire) == 0;
                let batch = buffer.drain(batch_size);
                if batch.is_empty() {
                    if done {
                        break;
                    }
                    thread::yield_now();
                    continue;
                }
                for (producer, seq) in &batch {
                    if !checker.check(*producer, *seq) {
                        counters.record_out_of_order();
                    }
                }
                counters.record_drain(batch.len());
            }

            join_producers(handles, &counters);
        })
    }
}

/// Decrements the live producer count even when the producer unwinds
struct ActiveGuard(Arc<AtomicU64>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Release);
    }
}

fn join_producers(handles: Vec<JoinHandle<()>>, counters: &StressCounters) {
    for h in handles {
        if h.join().is_err() {
            counters.record_producer_panic();
        }
    }
}

/// Print a summary of stress test results
pub fn print_summary(metrics: &StressMetrics) {
    eprintln!("\n=== buffer stress results ===");
    eprintln!("  duration:      {:>10.2}s", metrics.duration.as_secs_f64());
    eprintln!("  appended:      {:>10}", metrics.appended);
    eprintln!("  drained:       {:>10}", metrics.drained);
    eprintln!("  append rate:   {:>10.0} rec/s", metrics.append_rate());
    eprintln!("  drain rate:    {:>10.0} rec/s", metrics.drain_rate());
    eprintln!("  peak rate:     {:>10.0} rec/s", metrics.peak_rate);
    eprintln!("  missing:       {:>10}", metrics.missing());
    eprintln!("  out of order:  {:>10}", metrics.out_of_order);
    eprintln!("  panics:        {:>10}", metrics.producer_panics);

    if metrics.out_of_order > 0 || metrics.missing() > 0 || metrics.producer_panics > 0 {
        eprintln!("FAILED");
    } else {
        eprintln!("PASSED");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stress_counters() {
        let counters = StressCounters::new();
        counters.record_append();
        counters.record_append();
        counters.record_drain(1);

        let metrics = counters.snapshot();
        assert_eq!(metrics.appended, 2);
        assert_eq!(metrics.drained, 1);
        assert_eq!(metrics.missing(), 1);
    }

    #[test]
    fn test_sequence_checker() {
        let mut checker = SequenceChecker::new(2);
        assert!(checker.check(0, 0));
        assert!(checker.check(1, 0));
        assert!(checker.check(0, 1));
        assert!(!checker.check(1, 5));
        assert_eq!(checker.seen(1), 6);
    }

    #[test]
    fn test_stress_metrics_rates() {
        let metrics = StressMetrics {
            appended: 1000,
            drained: 990,
            duration: Duration::from_secs(10),
            ..Default::default()
        };
        assert!((metrics.append_rate() - 100.0).abs() < 0.1);
        assert!((metrics.drain_rate() - 99.0).abs() < 0.1);
        assert_eq!(metrics.missing(), 10);
    }

    #[test]
    fn test_bounded_buffer_run() {
        let runner = StressRunner::new(
            StressConfig::new(30)
                .with_producers(4)
                .with_records_per_producer(20_000)
                .with_batch_size(512)
                .with_report_interval(Duration::from_millis(100))
        );
        let metrics = runner.run_buffer();
        print_summary(&metrics);

        assert_eq!(metrics.appended, 80_000);
        assert_eq!(metrics.drained, 80_000);
        assert_eq!(metrics.out_of_order, 0);
        assert_eq!(metrics.producer_panics, 0);
    }

    #[test]
    fn test_producer_panic_is_counted() {
        let counters = StressCounters::new();
        let active = Arc::new(AtomicU64::new(2));

        let handles = vec![
            {
                let active = active.clone();
                thread::spawn(move || {
                    let _finished = ActiveGuard(active);
                })
            },
            {
                let active = active.clone();
                thread::spawn(move || {
                    let _finished = ActiveGuard(active);
                    panic!("producer failed mid-run");
                })
            }
        ];
        join_producers(handles, &counters);

        assert_eq!(active.load(Ordering::Acquire), 0);
        assert_eq!(counters.snapshot().producer_panics, 1);
    }
}
