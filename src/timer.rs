//! Hashed timer wheel for approximate connection timeouts.
//!
//! A ring of buckets indexed by tick count gives O(1) schedule, cancel and
//! expiry at the cost of rounding every delay up to a tick boundary: a
//! timeout fires within one tick duration of the requested delay, never
//! earlier. The wheel is reactor-private; the [`Timeout`] handle is the only
//! piece shared with other threads, and its state lives in one atomic so a
//! cross-thread cancel deterministically beats or loses the race with
//! expiry, never both.
//!
//! Buckets are intrusive doubly linked lists threaded through a flat entry
//! arena; freed entries go on a free list, so a warm wheel schedules without
//! touching the heap.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const NIL: usize = usize::MAX;
const NO_ENTRY: usize = usize::MAX;

/// Lifecycle of a [`Timeout`]. Transitions are one-way; `Cancelled` and
/// `Expired` are both terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TimeoutState {
    Init = 0,
    Scheduled = 1,
    Cancelled = 2,
    Expired = 3,
}

impl TimeoutState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => TimeoutState::Init,
            1 => TimeoutState::Scheduled,
            2 => TimeoutState::Cancelled,
            _ => TimeoutState::Expired,
        }
    }

    /// The allowed-transition table.
    const fn can_transition(from: TimeoutState, to: TimeoutState) -> bool {
        matches!(
            (from, to),
            (TimeoutState::Init, TimeoutState::Scheduled)
                | (TimeoutState::Init, TimeoutState::Cancelled)
                | (TimeoutState::Scheduled, TimeoutState::Cancelled)
                | (TimeoutState::Scheduled, TimeoutState::Expired)
        )
    }
}

pub(crate) struct TimeoutInner {
    state: AtomicU8,
    callback: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    /// Arena index while linked into a wheel, `NO_ENTRY` otherwise. Only the
    /// owning reactor thread reads it for unlinking.
    entry: AtomicUsize,
    /// Index of the owning reactor once scheduled through a cluster,
    /// `NO_ENTRY` before that. Set once, before the schedule task is
    /// submitted.
    owner: AtomicUsize,
}

impl TimeoutInner {
    fn try_transition(&self, from: TimeoutState, to: TimeoutState) -> bool {
        debug_assert!(TimeoutState::can_transition(from, to));
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Handle to a one-shot scheduled callback.
///
/// A timeout may be scheduled at most once; cancelling is always safe, even
/// after expiry. `reschedule` is unsupported and is a no-op.
#[derive(Clone)]
pub struct Timeout {
    inner: Arc<TimeoutInner>,
}

impl Timeout {
    pub fn new<F>(callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            inner: Arc::new(TimeoutInner {
                state: AtomicU8::new(TimeoutState::Init as u8),
                callback: Mutex::new(Some(Box::new(callback))),
                entry: AtomicUsize::new(NO_ENTRY),
                owner: AtomicUsize::new(NO_ENTRY),
            }),
        }
    }

    pub fn state(&self) -> TimeoutState {
        TimeoutState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// Moves the timeout to `Cancelled` if it has not already expired.
    ///
    /// This is the race decider and may run on any thread; unlinking from
    /// the wheel happens separately on the owning reactor. Returns true if
    /// this call performed the transition.
    pub fn cancel(&self) -> bool {
        let won = self.inner.try_transition(TimeoutState::Init, TimeoutState::Cancelled)
            || self
                .inner
                .try_transition(TimeoutState::Scheduled, TimeoutState::Cancelled);
        if won {
            // Drop the callback eagerly; it will never run.
            self.inner.callback.lock().unwrap().take();
        }
        won
    }

    /// Unsupported; kept for interface compatibility. Always returns false.
    pub fn reschedule(&self) -> bool {
        false
    }

    pub(crate) fn inner(&self) -> &Arc<TimeoutInner> {
        &self.inner
    }

    pub(crate) fn set_owner(&self, reactor: usize) {
        self.inner.owner.store(reactor, Ordering::Release);
    }

    pub(crate) fn owner(&self) -> Option<usize> {
        match self.inner.owner.load(Ordering::Acquire) {
            NO_ENTRY => None,
            idx => Some(idx),
        }
    }
}

struct Entry {
    timeout: Option<Arc<TimeoutInner>>,
    target_tick: u64,
    prev: usize,
    next: usize,
}

/// Reactor-private hashed wheel.
pub struct TimerWheel {
    buckets: Box<[usize]>,
    entries: Vec<Entry>,
    free_head: usize,
    mask: u64,
    current_tick: u64,
    tick_ms: u64,
}

impl TimerWheel {
    /// `tick_count` is rounded up to the next power of two; `tick_ms` is the
    /// cluster's ticker interval.
    pub fn new(tick_count: usize, tick_ms: u64) -> Self {
        let tick_count = tick_count.max(2).next_power_of_two();
        Self {
            buckets: vec![NIL; tick_count].into_boxed_slice(),
            entries: Vec::new(),
            free_head: NIL,
            mask: (tick_count - 1) as u64,
            current_tick: 0,
            tick_ms: tick_ms.max(1),
        }
    }

    pub fn current_tick(&self) -> u64 {
        self.current_tick
    }

    /// Schedules `timeout` to fire approximately `delay_ms` from now.
    ///
    /// Performs the `Init -> Scheduled` transition first; returns false
    /// without scheduling if the timeout was already scheduled, cancelled or
    /// expired. Delays are clamped to at least one tick.
    pub fn schedule(&mut self, timeout: &Timeout, delay_ms: u64) -> bool {
        let inner = timeout.inner();
        if !inner.try_transition(TimeoutState::Init, TimeoutState::Scheduled) {
            return false;
        }
        let ticks = (delay_ms.div_ceil(self.tick_ms)).max(1);
        let target_tick = self.current_tick + ticks;
        let bucket = (target_tick & self.mask) as usize;

        let idx = self.alloc(Arc::clone(inner), target_tick);
        let old_head = self.buckets[bucket];
        self.entries[idx].next = old_head;
        if old_head != NIL {
            self.entries[old_head].prev = idx;
        }
        self.buckets[bucket] = idx;
        inner.entry.store(idx, Ordering::Release);
        true
    }

    /// Cancels and unlinks `timeout`. Safe to call at any point in its
    /// lifecycle; cancelling an expired or never-scheduled timeout is a
    /// no-op.
    pub fn cancel(&mut self, timeout: &Timeout) {
        timeout.cancel();
        let inner = timeout.inner();
        let idx = inner.entry.swap(NO_ENTRY, Ordering::AcqRel);
        if idx == NO_ENTRY || idx >= self.entries.len() {
            return;
        }
        // The arena slot may have been freed and reused after expiry; only
        // unlink if it still belongs to this timeout.
        let same = self.entries[idx]
            .timeout
            .as_ref()
            .map_or(false, |t| Arc::ptr_eq(t, inner));
        if same {
            self.entries[idx].timeout = None;
            self.unlink(idx);
            self.free(idx);
        }
    }

    /// Advances the wheel by one tick, expiring every due entry in the
    /// bucket the new tick maps to. Entries parked in the same bucket for a
    /// later wheel revolution are left in place.
    pub fn tick(&mut self) {
        self.current_tick += 1;
        let bucket = (self.current_tick & self.mask) as usize;
        let mut idx = self.buckets[bucket];
        while idx != NIL {
            let next = self.entries[idx].next;
            if self.entries[idx].target_tick <= self.current_tick {
                let inner = self.entries[idx].timeout.take();
                self.unlink(idx);
                self.free(idx);
                if let Some(inner) = inner {
                    inner.entry.store(NO_ENTRY, Ordering::Release);
                    if inner.try_transition(TimeoutState::Scheduled, TimeoutState::Expired) {
                        let callback = inner.callback.lock().unwrap().take();
                        if let Some(callback) = callback {
                            callback();
                        }
                    }
                }
            }
            idx = next;
        }
    }

    fn alloc(&mut self, timeout: Arc<TimeoutInner>, target_tick: u64) -> usize {
        if self.free_head != NIL {
            let idx = self.free_head;
            self.free_head = self.entries[idx].next;
            self.entries[idx] = Entry { timeout: Some(timeout), target_tick, prev: NIL, next: NIL };
            idx
        } else {
            self.entries.push(Entry { timeout: Some(timeout), target_tick, prev: NIL, next: NIL });
            self.entries.len() - 1
        }
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = (self.entries[idx].prev, self.entries[idx].next);
        if prev != NIL {
            self.entries[prev].next = next;
        } else {
            // Head of its bucket.
            let bucket = (self.entries[idx].target_tick & self.mask) as usize;
            if self.buckets[bucket] == idx {
                self.buckets[bucket] = next;
            }
        }
        if next != NIL {
            self.entries[next].prev = prev;
        }
        self.entries[idx].prev = NIL;
        self.entries[idx].next = NIL;
    }

    fn free(&mut self, idx: usize) {
        self.entries[idx].timeout = None;
        self.entries[idx].next = self.free_head;
        self.entries[idx].prev = NIL;
        self.free_head = idx;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_timeout(counter: &Arc<AtomicUsize>) -> Timeout {
        let counter = Arc::clone(counter);
        Timeout::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_transition_table() {
        use TimeoutState::*;
        assert!(TimeoutState::can_transition(Init, Scheduled));
        assert!(TimeoutState::can_transition(Init, Cancelled));
        assert!(TimeoutState::can_transition(Scheduled, Cancelled));
        assert!(TimeoutState::can_transition(Scheduled, Expired));
        assert!(!TimeoutState::can_transition(Cancelled, Scheduled));
        assert!(!TimeoutState::can_transition(Expired, Scheduled));
        assert!(!TimeoutState::can_transition(Expired, Cancelled));
    }

    #[test]
    fn test_fires_after_ceil_ticks_not_before() {
        let mut wheel = TimerWheel::new(16, 10);
        let counter = Arc::new(AtomicUsize::new(0));
        let timeout = counting_timeout(&counter);

        // 35ms at 10ms ticks -> ceil = 4 ticks.
        assert!(wheel.schedule(&timeout, 35));
        for _ in 0..3 {
            wheel.tick();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        wheel.tick();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(timeout.state(), TimeoutState::Expired);

        // Never fires twice.
        for _ in 0..32 {
            wheel.tick();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_zero_delay_clamps_to_one_tick() {
        let mut wheel = TimerWheel::new(8, 100);
        let counter = Arc::new(AtomicUsize::new(0));
        let timeout = counting_timeout(&counter);
        assert!(wheel.schedule(&timeout, 0));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        wheel.tick();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_before_tick_suppresses_callback() {
        let mut wheel = TimerWheel::new(8, 10);
        let counter = Arc::new(AtomicUsize::new(0));
        let timeout = counting_timeout(&counter);
        wheel.schedule(&timeout, 10);
        wheel.cancel(&timeout);
        assert_eq!(timeout.state(), TimeoutState::Cancelled);
        for _ in 0..16 {
            wheel.tick();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_cancel_after_expiry_is_noop() {
        let mut wheel = TimerWheel::new(8, 10);
        let counter = Arc::new(AtomicUsize::new(0));
        let timeout = counting_timeout(&counter);
        wheel.schedule(&timeout, 10);
        wheel.tick();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        wheel.cancel(&timeout);
        assert_eq!(timeout.state(), TimeoutState::Expired);
    }

    #[test]
    fn test_schedule_twice_rejected() {
        let mut wheel = TimerWheel::new(8, 10);
        let counter = Arc::new(AtomicUsize::new(0));
        let timeout = counting_timeout(&counter);
        assert!(wheel.schedule(&timeout, 10));
        assert!(!wheel.schedule(&timeout, 10));
        wheel.tick();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(!wheel.schedule(&timeout, 10));
        assert!(!timeout.reschedule());
    }

    #[test]
    fn test_wrap_around_leaves_later_entries_in_place() {
        // 4 buckets: a 6-tick delay shares bucket (tick 6 & 3 == 2) with a
        // 2-tick delay but must survive the first visit.
        let mut wheel = TimerWheel::new(4, 10);
        let near = Arc::new(AtomicUsize::new(0));
        let far = Arc::new(AtomicUsize::new(0));
        let near_t = counting_timeout(&near);
        let far_t = counting_timeout(&far);
        wheel.schedule(&near_t, 20);
        wheel.schedule(&far_t, 60);

        wheel.tick();
        wheel.tick();
        assert_eq!(near.load(Ordering::SeqCst), 1);
        assert_eq!(far.load(Ordering::SeqCst), 0);

        for _ in 0..4 {
            wheel.tick();
        }
        assert_eq!(far.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_arena_reuse_does_not_confuse_stale_cancel() {
        let mut wheel = TimerWheel::new(8, 10);
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let first_t = counting_timeout(&first);
        wheel.schedule(&first_t, 10);
        wheel.tick();
        assert_eq!(first.load(Ordering::SeqCst), 1);

        // The freed entry is reused by a new timeout.
        let second_t = counting_timeout(&second);
        wheel.schedule(&second_t, 10);
        // A late cancel of the expired handle must not unlink the new entry.
        wheel.cancel(&first_t);
        wheel.tick();
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_many_timeouts_same_bucket() {
        let mut wheel = TimerWheel::new(8, 10);
        let counter = Arc::new(AtomicUsize::new(0));
        let timeouts: Vec<Timeout> = (0..50).map(|_| counting_timeout(&counter)).collect();
        for t in &timeouts {
            wheel.schedule(t, 30);
        }
        wheel.tick();
        wheel.tick();
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        wheel.tick();
        assert_eq!(counter.load(Ordering::SeqCst), 50);
    }
}
