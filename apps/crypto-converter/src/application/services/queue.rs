//! Bounded transport queue with a drop-oldest overflow policy.
//!
//! Sits between exchange read loops (producers) and the flush job
//! (consumer). Pushing never blocks: when full, the oldest element is
//! evicted so the read side of a connection is never stalled by a slow
//! consumer.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::infrastructure::metrics;

/// Smallest capacity a queue can be created with.
pub const MIN_QUEUE_CAPACITY: usize = 100;

/// Fixed-capacity FIFO queue that evicts its oldest element when full.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl<T> BoundedQueue<T> {
    /// Create a queue. Capacities below `MIN_QUEUE_CAPACITY` are raised to it.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity < MIN_QUEUE_CAPACITY {
            tracing::warn!(
                requested = capacity,
                applied = MIN_QUEUE_CAPACITY,
                "Queue capacity below floor, raising"
            );
            MIN_QUEUE_CAPACITY
        } else {
            capacity
        };

        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Maximum number of queued elements.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Enqueue an element.
    ///
    /// Returns `false` when the queue was full and its oldest element was
    /// evicted to make room. The new element is always admitted.
    pub fn push(&self, item: T) -> bool {
        let mut items = self.items.lock();
        let evicted = if items.len() >= self.capacity {
            items.pop_front();
            true
        } else {
            false
        };
        items.push_back(item);
        let depth = items.len();
        drop(items);

        metrics::set_queue_depth(depth);
        if evicted {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            metrics::record_queue_dropped(1);
        }
        !evicted
    }

    /// Dequeue up to `max_n` elements in FIFO order without waiting.
    pub fn pop_batch(&self, max_n: usize) -> Vec<T> {
        let mut items = self.items.lock();
        let n = max_n.min(items.len());
        let batch: Vec<T> = items.drain(..n).collect();
        metrics::set_queue_depth(items.len());
        batch
    }

    /// Dequeue everything currently queued.
    pub fn drain(&self) -> Vec<T> {
        let mut items = self.items.lock();
        let batch: Vec<T> = items.drain(..).collect();
        metrics::set_queue_depth(0);
        batch
    }

    /// Number of queued elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Total elements evicted since creation.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn capacity_is_raised_to_floor() {
        let queue: BoundedQueue<u32> = BoundedQueue::new(5);
        assert_eq!(queue.capacity(), MIN_QUEUE_CAPACITY);

        let queue: BoundedQueue<u32> = BoundedQueue::new(500);
        assert_eq!(queue.capacity(), 500);
    }

    #[test]
    fn push_reports_eviction() {
        let queue = BoundedQueue::new(MIN_QUEUE_CAPACITY);
        for i in 0..MIN_QUEUE_CAPACITY {
            assert!(queue.push(i));
        }
        assert!(!queue.push(MIN_QUEUE_CAPACITY));
        assert_eq!(queue.len(), MIN_QUEUE_CAPACITY);
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.pop_batch(1), vec![1]);
    }

    #[test]
    fn pop_batch_is_fifo_and_bounded() {
        let queue = BoundedQueue::new(MIN_QUEUE_CAPACITY);
        for i in 0..10 {
            queue.push(i);
        }
        assert_eq!(queue.pop_batch(3), vec![0, 1, 2]);
        assert_eq!(queue.pop_batch(100), (3..10).collect::<Vec<_>>());
        assert!(queue.pop_batch(5).is_empty());
        assert!(queue.is_empty());
    }

    #[test]
    fn drain_empties_queue() {
        let queue = BoundedQueue::new(MIN_QUEUE_CAPACITY);
        queue.push("a");
        queue.push("b");
        assert_eq!(queue.drain(), vec!["a", "b"]);
        assert_eq!(queue.len(), 0);
    }

    proptest! {
        #[test]
        fn retains_most_recent_capacity_elements(
            capacity in MIN_QUEUE_CAPACITY..250usize,
            pushes in 0usize..800,
        ) {
            let queue = BoundedQueue::new(capacity);
            for i in 0..pushes {
                queue.push(i);
                prop_assert!(queue.len() <= capacity);
            }

            let expected_start = pushes.saturating_sub(capacity);
            let retained = queue.drain();
            prop_assert_eq!(retained, (expected_start..pushes).collect::<Vec<_>>());
            prop_assert_eq!(queue.dropped(), expected_start as u64);
        }
    }
}
