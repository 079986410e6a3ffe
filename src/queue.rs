//! Lock-free bounded task queue feeding one reactor thread.
//!
//! Many producer threads hand work to a single consumer (the owning reactor)
//! without taking a lock. Producers claim a slot by atomically bumping a tail
//! counter and installing their item with a compare-exchange; the consumer
//! walks a private head counter. `offer` never blocks and never overwrites:
//! if the claimed slot still holds an unconsumed item the offer fails, which
//! callers must treat as fatal for the targeted reactor.

use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

/// Fixed-capacity multi-producer, single-consumer ring buffer.
///
/// Capacity is rounded up to the next power of two. `poll` must only ever be
/// called from one thread at a time (the owning reactor); concurrent polling
/// is unsupported and produces undefined ordering.
pub struct BoundedTaskQueue<T> {
    slots: Box<[AtomicPtr<T>]>,
    mask: usize,
    tail: AtomicUsize,
    // Single-consumer cursor. Only the owning reactor touches it, so relaxed
    // ordering is sufficient; the slot swap carries the synchronization.
    head: AtomicUsize,
}

unsafe impl<T: Send> Send for BoundedTaskQueue<T> {}
unsafe impl<T: Send> Sync for BoundedTaskQueue<T> {}

impl<T> BoundedTaskQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2).next_power_of_two();
        let slots = (0..capacity)
            .map(|_| AtomicPtr::new(std::ptr::null_mut()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            slots,
            mask: capacity - 1,
            tail: AtomicUsize::new(0),
            head: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Attempts to enqueue `value`, returning it back on failure.
    ///
    /// Fails when the claimed slot is still occupied, i.e. producers have
    /// lapped the consumer. The claimed index is burned either way; a full
    /// queue is a design failure, not a transient condition to retry.
    pub fn offer(&self, value: T) -> Result<(), T> {
        let index = self.tail.fetch_add(1, Ordering::AcqRel) & self.mask;
        let ptr = Box::into_raw(Box::new(value));
        match self.slots[index].compare_exchange(
            std::ptr::null_mut(),
            ptr,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Ok(()),
            Err(_) => Err(*unsafe { Box::from_raw(ptr) }),
        }
    }

    /// Dequeues the next item, if any. Single consumer only.
    pub fn poll(&self) -> Option<T> {
        let head = self.head.load(Ordering::Relaxed);
        let ptr = self.slots[head & self.mask].swap(std::ptr::null_mut(), Ordering::AcqRel);
        if ptr.is_null() {
            return None;
        }
        self.head.store(head.wrapping_add(1), Ordering::Relaxed);
        Some(*unsafe { Box::from_raw(ptr) })
    }

    pub fn is_empty(&self) -> bool {
        let head = self.head.load(Ordering::Relaxed);
        self.slots[head & self.mask].load(Ordering::Acquire).is_null()
    }
}

impl<T> Drop for BoundedTaskQueue<T> {
    fn drop(&mut self) {
        for slot in self.slots.iter() {
            let ptr = slot.swap(std::ptr::null_mut(), Ordering::AcqRel);
            if !ptr.is_null() {
                drop(unsafe { Box::from_raw(ptr) });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_capacity_rounds_to_power_of_two() {
        assert_eq!(BoundedTaskQueue::<usize>::new(3).capacity(), 4);
        assert_eq!(BoundedTaskQueue::<usize>::new(1000).capacity(), 1024);
        assert_eq!(BoundedTaskQueue::<usize>::new(1024).capacity(), 1024);
    }

    #[test]
    fn test_fifo_single_producer() {
        let queue = BoundedTaskQueue::new(8);
        for i in 0..8 {
            queue.offer(i).unwrap();
        }
        for i in 0..8 {
            assert_eq!(queue.poll(), Some(i));
        }
        assert_eq!(queue.poll(), None);
    }

    #[test]
    fn test_overflow_fails_without_corruption() {
        let queue = BoundedTaskQueue::new(4);
        for i in 0..4 {
            queue.offer(i).unwrap();
        }
        assert_eq!(queue.offer(99), Err(99));
        for i in 0..4 {
            assert_eq!(queue.poll(), Some(i));
        }
        assert_eq!(queue.poll(), None);
    }

    #[test]
    fn test_interleaved_offer_poll() {
        let queue = BoundedTaskQueue::new(4);
        for round in 0..100 {
            queue.offer(round).unwrap();
            queue.offer(round + 1000).unwrap();
            assert_eq!(queue.poll(), Some(round));
            assert_eq!(queue.poll(), Some(round + 1000));
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_multi_producer_delivery() {
        let queue = Arc::new(BoundedTaskQueue::new(1024));
        let mut handles = Vec::new();
        for p in 0..4 {
            let q = Arc::clone(&queue);
            handles.push(thread::spawn(move || {
                for i in 0..100 {
                    q.offer(p * 1000 + i).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let mut seen: Vec<usize> = Vec::new();
        while let Some(v) = queue.poll() {
            seen.push(v);
        }
        assert_eq!(seen.len(), 400);
        // FIFO per producer, even though not globally ordered.
        for p in 0..4 {
            let per: Vec<usize> = seen
                .iter()
                .copied()
                .filter(|v| v / 1000 == p)
                .collect();
            let mut sorted = per.clone();
            sorted.sort_unstable();
            assert_eq!(per, sorted);
        }
    }

    #[test]
    fn test_drop_releases_pending_items() {
        let queue = BoundedTaskQueue::new(8);
        let item = Arc::new(());
        queue.offer(Arc::clone(&item)).unwrap();
        queue.offer(Arc::clone(&item)).unwrap();
        drop(queue);
        assert_eq!(Arc::strong_count(&item), 1);
    }
}
