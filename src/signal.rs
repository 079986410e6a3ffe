//! Minimal single-shot completion signal.
//!
//! A listener exposes two of these: "bound" fires once after its socket is
//! registered, "closed" fires once after the socket is released. Only the
//! first `fire` wins; waiters block until the value lands.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

pub struct Signal<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    slot: Mutex<Option<T>>,
    cond: Condvar,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<T> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Signal<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                slot: Mutex::new(None),
                cond: Condvar::new(),
            }),
        }
    }

    /// Completes the signal. Returns false if it had already fired.
    pub fn fire(&self, value: T) -> bool {
        let mut slot = self.inner.slot.lock().unwrap();
        if slot.is_some() {
            return false;
        }
        *slot = Some(value);
        self.inner.cond.notify_all();
        true
    }

    pub fn is_fired(&self) -> bool {
        self.inner.slot.lock().unwrap().is_some()
    }
}

impl<T: Clone> Signal<T> {
    pub fn try_get(&self) -> Option<T> {
        self.inner.slot.lock().unwrap().clone()
    }

    /// Blocks until the signal fires or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.inner.slot.lock().unwrap();
        loop {
            if let Some(value) = slot.as_ref() {
                return Some(value.clone());
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self.inner.cond.wait_timeout(slot, deadline - now).unwrap();
            slot = guard;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_first_fire_wins() {
        let signal = Signal::new();
        assert!(signal.fire(1));
        assert!(!signal.fire(2));
        assert_eq!(signal.try_get(), Some(1));
    }

    #[test]
    fn test_wait_from_another_thread() {
        let signal: Signal<&'static str> = Signal::new();
        let fired = signal.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            fired.fire("bound");
        });
        assert_eq!(signal.wait_timeout(Duration::from_secs(5)), Some("bound"));
        assert!(signal.is_fired());
    }

    #[test]
    fn test_wait_times_out() {
        let signal: Signal<()> = Signal::new();
        assert_eq!(signal.wait_timeout(Duration::from_millis(20)), None);
    }
}
