//! Unbounded multi-producer, single-consumer record buffer.
//!
//! ## Memory Ordering
//!
//! - **queue**: lock-free segmented FIFO, producers never contend on a lock
//! - **len**: incremented only after the item is in the queue, decremented
//!   before the consumer pops, so `len` never exceeds the items held
//! - **drain_lock**: serialises `drain`/`clear` (one logical consumer)

use std::sync::atomic::{ AtomicUsize, Ordering };

use crossbeam::queue::SegQueue;
use parking_lot::Mutex;

pub struct RecordBuffer<T> {
    queue: SegQueue<T>,
    len: AtomicUsize,
    drain_lock: Mutex<()>,
}

impl<T> RecordBuffer<T> {
    pub fn new() -> Self {
        Self {
            queue: SegQueue::new(),
            len: AtomicUsize::new(0),
            drain_lock: Mutex::new(()),
        }
    }

    /// Append at the tail. Never blocks, never fails.
    #[inline]
    pub fn append(&self, record: T) {
        self.queue.push(record);
        self.len.fetch_add(1, Ordering::Release);
    }

    /// Current count. May be stale by the time the caller acts on it.
    #[inline]
    pub fn size(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Remove up to `max` records in FIFO order.
    pub fn drain(&self, max: usize) -> Vec<T> {
        let _guard = self.drain_lock.lock();

        let to_take = self.size().min(max);
        if to_take == 0 {
            return Vec::new();
        }

        // Only this thread decrements, so the subtraction cannot underflow.
        self.len.fetch_sub(to_take, Ordering::AcqRel);

        let mut batch = Vec::with_capacity(to_take);
        while batch.len() < to_take {
            match self.queue.pop() {
                Some(record) => batch.push(record),
                // Counted items are always in the queue; a producer between
                // push and increment is only visible as an extra item.
                None => std::hint::spin_loop(),
            }
        }
        batch
    }

    /// Remove the head record, if any.
    pub fn pop(&self) -> Option<T> {
        self.drain(1).pop()
    }

    /// Drop every counted record. Appends racing with `clear` may survive.
    pub fn clear(&self) {
        let _guard = self.drain_lock.lock();

        let counted = self.len.swap(0, Ordering::AcqRel);
        for _ in 0..counted {
            if self.queue.pop().is_none() {
                break;
            }
        }
    }
}

impl<T> Default for RecordBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for RecordBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordBuffer").field("len", &self.size()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_drain_in_fifo_order() {
        let buffer = RecordBuffer::new();
        buffer.append("A");
        buffer.append("B");
        buffer.append("C");

        assert_eq!(buffer.drain(2), vec!["A", "B"]);
        assert_eq!(buffer.size(), 1);
        assert_eq!(buffer.drain(5), vec!["C"]);
        assert_eq!(buffer.size(), 0);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_size_tracks_sequential_appends() {
        let buffer = RecordBuffer::new();
        for i in 0..101 {
            buffer.append(i);
        }
        assert_eq!(buffer.size(), 101);
        assert!(!buffer.is_empty());

        assert_eq!(buffer.pop(), Some(0));
        assert_eq!(buffer.size(), 100);

        let mut last = None;
        while !buffer.is_empty() {
            last = buffer.pop();
        }
        assert_eq!(last, Some(100));
        assert_eq!(buffer.size(), 0);
    }

    #[test]
    fn test_drain_empty_returns_empty() {
        let buffer: RecordBuffer<u64> = RecordBuffer::new();
        assert!(buffer.drain(100).is_empty());
        assert!(buffer.is_empty());
        assert_eq!(buffer.pop(), None);
    }

    #[test]
    fn test_drain_zero_leaves_state_unchanged() {
        let buffer = RecordBuffer::new();
        buffer.append(1u32);
        assert!(buffer.drain(0).is_empty());
        assert_eq!(buffer.size(), 1);
    }

    #[test]
    fn test_clear_resets_count() {
        let buffer = RecordBuffer::new();
        for i in 0..50 {
            buffer.append(i);
        }
        buffer.clear();
        assert_eq!(buffer.size(), 0);
        assert!(buffer.is_empty());
        assert!(buffer.drain(10).is_empty());

        buffer.clear();
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_many_drained_in_batches() {
        let buffer = RecordBuffer::new();
        let count = 1_000_000u64;
        for i in 0..count {
            buffer.append(i);
        }
        assert_eq!(buffer.size(), count as usize);

        let mut drained = Vec::with_capacity(count as usize);
        let mut rounds = 0;
        while !buffer.is_empty() {
            rounds += 1;
            drained.extend(buffer.drain(10_000));
        }

        assert_eq!(rounds, 100);
        assert_eq!(drained.len(), count as usize);
        assert_eq!(drained.last(), Some(&(count - 1)));
        assert!(drained.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_size_never_exceeds_drainable_under_contention() {
        let buffer = Arc::new(RecordBuffer::new());
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let b = buffer.clone();
                thread::spawn(move || {
                    for i in 0..25_000u64 {
                        b.append(p * 1_000_000 + i);
                    }
                })
            })
            .collect();

        let mut total = 0usize;
        while total < 100_000 {
            let promised = buffer.size();
            let batch = buffer.drain(promised);
            // Single consumer: nobody else can shrink the buffer.
            assert_eq!(batch.len(), promised);
            total += batch.len();
        }

        for p in producers {
            p.join().unwrap();
        }
        assert_eq!(total, 100_000);
        assert!(buffer.is_empty());
    }
}
