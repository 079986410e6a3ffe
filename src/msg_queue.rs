//! Pooled segmented queue of pending outbound buffers.
//!
//! Under sustained write backpressure a connection can hold thousands of
//! queued buffers. Rather than growing a heap structure per push, the queue
//! is a chain of fixed-capacity segments drawn from a per-reactor free-list
//! pool: once the pool is warm the steady-state allocation rate is zero.
//! The pool is reactor-private, so it needs no synchronization.

use crate::buffer::IoBuf;
use std::collections::VecDeque;

/// Slots per segment.
pub const SEGMENT_SLOTS: usize = 1024;

/// One fixed-capacity array of buffer slots with head/tail cursors.
pub struct Segment {
    slots: Vec<Option<IoBuf>>,
    head: usize,
    tail: usize,
}

impl Segment {
    fn new() -> Self {
        let mut slots = Vec::with_capacity(SEGMENT_SLOTS);
        slots.resize_with(SEGMENT_SLOTS, || None);
        Self { slots, head: 0, tail: 0 }
    }

    fn is_full(&self) -> bool {
        self.tail == SEGMENT_SLOTS
    }

    fn is_drained(&self) -> bool {
        self.head == self.tail
    }

    /// Clears slots and cursors so freed slots do not retain buffer values.
    fn reset(&mut self) {
        for slot in &mut self.slots[self.head..self.tail] {
            *slot = None;
        }
        self.head = 0;
        self.tail = 0;
    }
}

/// Per-reactor free-list of segments.
pub struct SegmentPool {
    free: Vec<Box<Segment>>,
}

impl SegmentPool {
    pub fn new(prewarm: usize) -> Self {
        let free = (0..prewarm).map(|_| Box::new(Segment::new())).collect();
        Self { free }
    }

    pub fn len(&self) -> usize {
        self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.free.is_empty()
    }

    fn acquire(&mut self) -> Box<Segment> {
        self.free.pop().unwrap_or_else(|| Box::new(Segment::new()))
    }

    fn release(&mut self, mut segment: Box<Segment>) {
        segment.reset();
        self.free.push(segment);
    }
}

/// Growable FIFO of outbound buffers backed by pooled segments.
///
/// The queue always owns at least one segment; fully drained tail segments
/// go back to the pool, the last one is reset in place.
pub struct MessageQueue {
    segments: VecDeque<Box<Segment>>,
    len: usize,
}

impl MessageQueue {
    pub fn new(pool: &mut SegmentPool) -> Self {
        let mut segments = VecDeque::new();
        segments.push_back(pool.acquire());
        Self { segments, len: 0 }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn push(&mut self, pool: &mut SegmentPool, buf: IoBuf) {
        if self.segments.back().map_or(true, |s| s.is_full()) {
            self.segments.push_back(pool.acquire());
        }
        let back = self.segments.back_mut().expect("queue owns a segment");
        back.slots[back.tail] = Some(buf);
        back.tail += 1;
        self.len += 1;
    }

    /// The head buffer, for in-place partial writes.
    pub fn peek_mut(&mut self) -> Option<&mut IoBuf> {
        let front = self.segments.front_mut()?;
        front.slots[front.head].as_mut()
    }

    pub fn pop(&mut self, pool: &mut SegmentPool) -> Option<IoBuf> {
        let (buf, head, drained) = {
            let front = self.segments.front_mut()?;
            if front.is_drained() {
                return None;
            }
            let buf = front.slots[front.head].take();
            front.head += 1;
            (buf, front.head, front.is_drained())
        };
        self.len -= 1;

        if head == SEGMENT_SLOTS {
            // Exhausted; hand it back unless it is the only segment left.
            let exhausted = self.segments.pop_front().expect("front exists");
            if self.segments.is_empty() {
                let mut seg = exhausted;
                seg.reset();
                self.segments.push_back(seg);
            } else {
                pool.release(exhausted);
            }
        } else if drained && self.segments.len() == 1 {
            if let Some(front) = self.segments.front_mut() {
                front.reset();
            }
        }
        buf
    }

    /// Drops every queued buffer, returning surplus segments to the pool.
    /// The resident segment stays, reset, so the queue remains usable.
    pub fn clear(&mut self, pool: &mut SegmentPool) {
        while let Some(segment) = self.segments.pop_front() {
            if self.segments.is_empty() {
                let mut seg = segment;
                seg.reset();
                self.segments.push_back(seg);
                break;
            }
            pool.release(segment);
        }
        self.len = 0;
    }

    /// Releases the resident segment too; the queue is unusable afterwards.
    pub fn release_all(mut self, pool: &mut SegmentPool) {
        while let Some(segment) = self.segments.pop_front() {
            pool.release(segment);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buf(tag: u8) -> IoBuf {
        IoBuf::from(vec![tag])
    }

    #[test]
    fn test_push_pop_order() {
        let mut pool = SegmentPool::new(2);
        let mut queue = MessageQueue::new(&mut pool);
        for i in 0..10u8 {
            queue.push(&mut pool, buf(i));
        }
        for i in 0..10u8 {
            assert_eq!(queue.pop(&mut pool).unwrap().bytes(), &[i]);
        }
        assert!(queue.is_empty());
        assert!(queue.pop(&mut pool).is_none());
    }

    #[test]
    fn test_segment_pool_accounting_across_2050_buffers() {
        let mut pool = SegmentPool::new(4);
        let mut queue = MessageQueue::new(&mut pool);
        let before = pool.len();

        for i in 0..2050usize {
            queue.push(&mut pool, buf((i % 251) as u8));
        }
        // 2050 buffers over 1024-slot segments: the resident segment plus
        // exactly two more drawn from the pool.
        assert_eq!(before - pool.len(), 2);
        assert_eq!(queue.len(), 2050);

        for _ in 0..2050 {
            assert!(queue.pop(&mut pool).is_some());
        }
        assert!(queue.is_empty());
        assert_eq!(pool.len(), before);
    }

    #[test]
    fn test_pool_grows_when_cold() {
        let mut pool = SegmentPool::new(0);
        let mut queue = MessageQueue::new(&mut pool);
        for i in 0..(SEGMENT_SLOTS + 1) {
            queue.push(&mut pool, buf((i % 251) as u8));
        }
        for _ in 0..(SEGMENT_SLOTS + 1) {
            queue.pop(&mut pool).unwrap();
        }
        // The overflow segment came from the heap but drains back to the pool.
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_peek_mut_allows_partial_consumption() {
        let mut pool = SegmentPool::new(1);
        let mut queue = MessageQueue::new(&mut pool);
        queue.push(&mut pool, IoBuf::from(b"abcd".to_vec()));

        let mut sink = Vec::new();
        {
            let head = queue.peek_mut().unwrap();
            let mut partial = std::io::Cursor::new([0u8; 2]);
            head.write_to(&mut partial).unwrap();
        }
        assert_eq!(queue.peek_mut().unwrap().bytes(), b"cd");
        queue.peek_mut().unwrap().write_to(&mut sink).unwrap();
        assert!(queue.peek_mut().unwrap().is_drained());
        queue.pop(&mut pool).unwrap();
        assert!(queue.is_empty());
    }

    #[test]
    fn test_clear_returns_segments() {
        let mut pool = SegmentPool::new(3);
        let mut queue = MessageQueue::new(&mut pool);
        let before = pool.len();
        for i in 0..(SEGMENT_SLOTS * 2 + 5) {
            queue.push(&mut pool, buf((i % 251) as u8));
        }
        queue.clear(&mut pool);
        assert!(queue.is_empty());
        assert_eq!(pool.len(), before);
        queue.release_all(&mut pool);
        assert_eq!(pool.len(), before + 1);
    }
}
