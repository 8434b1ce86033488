//! Interruptible backoff for idle polls.
//!
//! The poll loop sleeps here when the buffer is empty. The sleep parks on a
//! condition variable so a shutdown can wake it immediately instead of
//! waiting out the interval.

use std::time::{ Duration, Instant };

use parking_lot::{ Condvar, Mutex };

use crate::error::{ Result, TraplineError };

pub struct Backoff {
    interval: Duration,
    interrupted: Mutex<bool>,
    condition: Condvar,
}

impl Backoff {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            interrupted: Mutex::new(false),
            condition: Condvar::new(),
        }
    }

    pub fn from_millis(ms: u64) -> Self {
        Self::new(Duration::from_millis(ms))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Sleep for the configured interval.
    ///
    /// Returns `Err(Interrupted)` as soon as `interrupt` is called, or right
    /// away if it already was. Spurious wakeups resume the remaining wait.
    pub fn wait(&self) -> Result<()> {
        let deadline = Instant::now() + self.interval;
        let mut interrupted = self.interrupted.lock();

        loop {
            if *interrupted {
                return Err(TraplineError::Interrupted);
            }
            if self.condition.wait_until(&mut interrupted, deadline).timed_out() {
                return if *interrupted { Err(TraplineError::Interrupted) } else { Ok(()) };
            }
        }
    }

    /// Wake every waiter. Sticky: later waits return immediately.
    pub fn interrupt(&self) {
        let mut interrupted = self.interrupted.lock();
        *interrupted = true;
        self.condition.notify_all();
    }

    pub fn is_interrupted(&self) -> bool {
        *self.interrupted.lock()
    }
}

impl std::fmt::Debug for Backoff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backoff")
            .field("interval", &self.interval)
            .field("interrupted", &self.is_interrupted())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_wait_sleeps_full_interval() {
        let backoff = Backoff::from_millis(20);
        let start = Instant::now();
        assert!(backoff.wait().is_ok());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_interrupt_wakes_waiter() {
        let backoff = Arc::new(Backoff::new(Duration::from_secs(30)));

        let b = backoff.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            b.interrupt();
        });

        let start = Instant::now();
        let result = backoff.wait();
        assert!(matches!(result, Err(TraplineError::Interrupted)));
        assert!(start.elapsed() < Duration::from_secs(5));

        handle.join().unwrap();
    }

    #[test]
    fn test_interrupt_is_sticky() {
        let backoff = Backoff::new(Duration::from_secs(30));
        backoff.interrupt();
        assert!(backoff.is_interrupted());
        assert!(backoff.wait().is_err());
        assert!(backoff.wait().is_err());
    }
}
