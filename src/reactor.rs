//! The per-thread reactor: one OS thread, one readiness multiplexer, one
//! cross-thread task queue, one timer wheel, and the connections owned by
//! that thread.
//!
//! All mutable per-connection state is owned by exactly one reactor thread.
//! The single synchronization primitive of the subsystem is the thread-affine
//! dispatch rule: a public mutator invoked on the owning thread joins a
//! thread-local run queue drained before the loop advances; invoked from
//! any other thread it is boxed, offered to the reactor's
//! [`BoundedTaskQueue`], and the multiplexer is woken. There are no locks on
//! the I/O path.
//!
//! Each loop iteration: block on the multiplexer, drain the task queue
//! completely, then dispatch the batch of readiness events (ticker pipe,
//! accepts, per-connection read/write). Draining tasks first guarantees that
//! a task registering a handler is visible before I/O on that handler is
//! dispatched.
//!
//! Queue overflow is apoptosis: the reactor logs the condition, aborts every
//! connection it owns, and terminates its own thread. Overflow means
//! producers outran a live reactor — a design failure, not a transient
//! condition — and failing loudly preserves per-connection ordering where
//! silently dropping or blocking would not.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::ThreadId;
use std::time::Duration;

use mio::unix::pipe;
use mio::{Events, Interest, Poll, Token, Waker};

use crate::cluster::ClusterShared;
use crate::config::ClusterConfig;
use crate::error::{ReactorError, Result};
use crate::msg_queue::SegmentPool;
use crate::net::conn::Connection;
use crate::net::listener::ListenerState;
use crate::net::traits::{LogLevel, Logger};
use crate::queue::BoundedTaskQueue;
use crate::timer::TimerWheel;

pub(crate) const WAKER_TOKEN: Token = Token(0);
pub(crate) const TICKER_TOKEN: Token = Token(1);
const FIRST_DYNAMIC_TOKEN: usize = 2;

const EVENTS_CAPACITY: usize = 1024;
const RECOVERY_SLEEP_MS: u64 = 100;

/// A unit of work marshaled to a reactor thread.
pub(crate) type ReactorTask = Box<dyn FnOnce(&mut ReactorCore) + Send + 'static>;

thread_local! {
    // Same-thread submissions. One reactor per thread, so one queue per
    // thread; drained by the owning loop before it advances.
    static LOCAL_TASKS: RefCell<VecDeque<ReactorTask>> = RefCell::new(VecDeque::new());
}

/// Shared handle to one reactor thread.
///
/// Cheap to share across threads; it exposes submission (used by the cluster
/// and the connection handles) and counters, nothing else.
pub struct Reactor {
    index: usize,
    queue: BoundedTaskQueue<ReactorTask>,
    waker: Waker,
    thread_id: OnceLock<ThreadId>,
    pub(crate) conn_count: AtomicUsize,
    alive: AtomicBool,
    logger: Arc<dyn Logger>,
}

impl Reactor {
    pub(crate) fn new(
        index: usize,
        queue_capacity: usize,
        waker: Waker,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self {
            index,
            queue: BoundedTaskQueue::new(queue_capacity),
            waker,
            thread_id: OnceLock::new(),
            conn_count: AtomicUsize::new(0),
            alive: AtomicBool::new(true),
            logger,
        }
    }

    /// Position of this reactor within its cluster.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Number of connections currently owned by this reactor.
    pub fn connection_count(&self) -> usize {
        self.conn_count.load(Ordering::Relaxed)
    }

    /// False once the reactor has shut down, orderly or fatally.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub(crate) fn bind_thread(&self) {
        let _ = self.thread_id.set(std::thread::current().id());
    }

    pub(crate) fn is_loop_thread(&self) -> bool {
        self.thread_id.get() == Some(&std::thread::current().id())
    }

    /// Thread-affine dispatch. On the owning thread the task joins the local
    /// run queue; from any other thread it is offered to the cross-thread
    /// queue and the multiplexer is woken. Never blocks.
    pub(crate) fn submit(&self, task: ReactorTask) -> Result<()> {
        if !self.is_alive() {
            return Err(ReactorError::ReactorGone);
        }
        if self.is_loop_thread() {
            LOCAL_TASKS.with(|q| q.borrow_mut().push_back(task));
            return Ok(());
        }
        match self.queue.offer(task) {
            Ok(()) => {
                self.waker.wake()?;
                Ok(())
            }
            Err(_) => {
                // Producers outran the loop. The reactor terminates itself on
                // observing the flag; this submission was not accepted.
                self.mark_dead();
                let _ = self.waker.wake();
                self.logger.log(
                    LogLevel::Error,
                    &format!("reactor {}: task queue overflow", self.index),
                );
                Err(ReactorError::TaskQueueFull)
            }
        }
    }

    pub(crate) fn mark_dead(&self) {
        self.alive.store(false, Ordering::Release);
    }

    pub(crate) fn next_task(&self) -> Option<ReactorTask> {
        self.queue.poll()
    }
}

/// The loop-owned half of a reactor. Lives on the reactor's own thread and
/// is never shared.
pub(crate) struct ReactorCore {
    pub(crate) handle: Arc<Reactor>,
    pub(crate) cluster: Arc<ClusterShared>,
    pub(crate) poll: Poll,
    ticker: pipe::Receiver,
    pub(crate) wheel: TimerWheel,
    pub(crate) pool: SegmentPool,
    pub(crate) scratch: Box<[u8]>,
    pub(crate) connections: HashMap<Token, Connection>,
    pub(crate) listeners: HashMap<Token, ListenerState>,
    next_token: usize,
    pub(crate) shutdown: bool,
    pub(crate) config: ClusterConfig,
}

impl ReactorCore {
    pub(crate) fn new(
        handle: Arc<Reactor>,
        cluster: Arc<ClusterShared>,
        poll: Poll,
        mut ticker: pipe::Receiver,
        config: ClusterConfig,
    ) -> Result<Self> {
        poll.registry()
            .register(&mut ticker, TICKER_TOKEN, Interest::READABLE)?;
        let tick_ms = config.tick_interval.as_millis().max(1) as u64;
        Ok(Self {
            handle,
            cluster,
            poll,
            ticker,
            wheel: TimerWheel::new(config.timer_slots, tick_ms),
            pool: SegmentPool::new(2),
            scratch: vec![0u8; config.read_buffer_size].into_boxed_slice(),
            connections: HashMap::new(),
            listeners: HashMap::new(),
            next_token: FIRST_DYNAMIC_TOKEN,
            shutdown: false,
            config,
        })
    }

    pub(crate) fn alloc_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        token
    }

    pub(crate) fn log(&self, level: LogLevel, message: &str) {
        self.config.logger.log(level, message);
    }

    /// The select/dispatch loop. Runs until orderly shutdown or apoptosis.
    pub(crate) fn run(&mut self) {
        let mut events = Events::with_capacity(EVENTS_CAPACITY);
        loop {
            if !self.handle.is_alive() {
                self.terminate("task queue overflow");
                return;
            }
            if self.shutdown {
                self.handle.mark_dead();
                self.terminate("shutdown");
                return;
            }

            if let Err(e) = self.poll.poll(&mut events, None) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                // Bound CPU usage during a failure storm rather than
                // busy-looping on a broken multiplexer.
                self.log(
                    LogLevel::Error,
                    &format!("reactor {}: poll failed: {}", self.handle.index(), e),
                );
                std::thread::sleep(Duration::from_millis(RECOVERY_SLEEP_MS));
                continue;
            }

            self.drain_tasks();

            for event in events.iter() {
                let token = event.token();
                match token {
                    WAKER_TOKEN => {}
                    TICKER_TOKEN => self.advance_ticks(),
                    token if self.listeners.contains_key(&token) => self.accept_ready(token),
                    token => {
                        if event.is_readable() {
                            self.handle_readable(token);
                            self.drain_local();
                        }
                        if event.is_writable() {
                            self.handle_writable(token);
                        }
                    }
                }
                self.drain_local();
            }
        }
    }

    /// Drains the cross-thread queue completely, interleaving same-thread
    /// followups so each task's effects are fully applied before the next.
    fn drain_tasks(&mut self) {
        while let Some(task) = self.handle.next_task() {
            task(self);
            self.drain_local();
        }
    }

    pub(crate) fn drain_local(&mut self) {
        loop {
            let task = LOCAL_TASKS.with(|q| q.borrow_mut().pop_front());
            match task {
                Some(task) => task(self),
                None => break,
            }
        }
    }

    /// One byte per elapsed tick sits in the ticker pipe; read them all and
    /// advance the wheel accordingly.
    fn advance_ticks(&mut self) {
        let mut pending = 0usize;
        let mut buf = [0u8; 64];
        loop {
            match self.ticker.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => pending += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.log(
                        LogLevel::Error,
                        &format!("reactor {}: ticker pipe failed: {}", self.handle.index(), e),
                    );
                    break;
                }
            }
        }
        for _ in 0..pending {
            self.wheel.tick();
            self.drain_local();
        }
    }

    /// Final exit path, shared by orderly shutdown and apoptosis: every
    /// surviving connection gets exactly one abort, listeners fire their
    /// closed signals, and the thread unwinds. Connections that closed
    /// normally before this point already received their close/abort.
    fn terminate(&mut self, reason: &str) {
        self.log(
            LogLevel::Info,
            &format!("reactor {}: terminating ({})", self.handle.index(), reason),
        );
        self.abort_all_connections(reason);
        self.close_all_listeners();
        LOCAL_TASKS.with(|q| q.borrow_mut().clear());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::traits::NoOpLogger;

    #[test]
    fn test_overflow_from_foreign_thread_is_fatal() {
        let poll = Poll::new().unwrap();
        let waker = Waker::new(poll.registry(), WAKER_TOKEN).unwrap();
        let reactor = Arc::new(Reactor::new(0, 4, waker, Arc::new(NoOpLogger)));

        // Nobody drains, so the 5th submission overflows.
        let r = Arc::clone(&reactor);
        std::thread::spawn(move || {
            for _ in 0..4 {
                r.submit(Box::new(|_| {})).unwrap();
            }
            assert!(matches!(
                r.submit(Box::new(|_| {})),
                Err(ReactorError::TaskQueueFull)
            ));
            assert!(!r.is_alive());
        })
        .join()
        .unwrap();

        // Once dead, every further submission bounces.
        assert!(matches!(
            reactor.submit(Box::new(|_| {})),
            Err(ReactorError::ReactorGone)
        ));
    }

    #[test]
    fn test_queued_tasks_survive_in_submission_order() {
        let poll = Poll::new().unwrap();
        let waker = Waker::new(poll.registry(), WAKER_TOKEN).unwrap();
        let reactor = Reactor::new(0, 16, waker, Arc::new(NoOpLogger));

        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        for i in 0..10 {
            let order = Arc::clone(&order);
            reactor
                .submit(Box::new(move |_| order.lock().unwrap().push(i)))
                .unwrap();
        }
        let mut pulled = 0;
        while reactor.next_task().is_some() {
            pulled += 1;
        }
        assert_eq!(pulled, 10);
    }
}
