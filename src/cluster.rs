//! The reactor cluster: lifecycle, placement, and cross-thread routing.
//!
//! A cluster owns a fixed set of reactor threads plus one ticker thread.
//! Startup is a two-phase handshake: every reactor thread registers its
//! `ThreadId` and parks on a barrier, the cluster publishes the read-only
//! thread map, and a second barrier releases the loops. From then on any
//! thread can be classified as loop-thread-or-not with a plain map lookup.
//!
//! Placement is least-loaded: accepted and connected sockets land on the
//! live reactor owning the fewest connections, and never migrate after.
//! The ticker thread writes one byte per interval into each reactor's tick
//! pipe; each reactor converts pending bytes into timer-wheel ticks on its
//! own thread.

use std::collections::HashMap;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Barrier, Mutex, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use mio::net::TcpStream;
use mio::unix::pipe;
use mio::{Poll, Waker};

use crate::config::ClusterConfig;
use crate::error::{ReactorError, Result};
use crate::net::listener::ListenerHandler;
use crate::net::traits::{LogLevel, UpstreamFactory};
use crate::reactor::{Reactor, ReactorCore, WAKER_TOKEN};
use crate::signal::Signal;
use crate::timer::Timeout;

const STATE_IDLE: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_STOPPED: u8 = 2;

/// State shared between the cluster handle and every reactor thread.
pub(crate) struct ClusterShared {
    pub(crate) config: ClusterConfig,
    reactors: OnceLock<Vec<Arc<Reactor>>>,
    thread_map: OnceLock<HashMap<ThreadId, usize>>,
    state: AtomicU8,
}

impl ClusterShared {
    fn new(config: ClusterConfig) -> Self {
        Self {
            config,
            reactors: OnceLock::new(),
            thread_map: OnceLock::new(),
            state: AtomicU8::new(STATE_IDLE),
        }
    }

    pub(crate) fn reactors(&self) -> &[Arc<Reactor>] {
        self.reactors.get().map(Vec::as_slice).unwrap_or(&[])
    }

    pub(crate) fn reactor(&self, index: usize) -> Option<&Arc<Reactor>> {
        self.reactors().get(index)
    }

    /// Total connections across every reactor.
    pub(crate) fn connection_total(&self) -> usize {
        self.reactors().iter().map(|r| r.connection_count()).sum()
    }

    /// Index of the reactor whose loop runs on the calling thread.
    pub(crate) fn current_index(&self) -> Option<usize> {
        self.thread_map
            .get()
            .and_then(|map| map.get(&thread::current().id()).copied())
    }

    /// Live reactor with the fewest connections.
    pub(crate) fn least_loaded(&self) -> Option<&Arc<Reactor>> {
        self.reactors()
            .iter()
            .filter(|r| r.is_alive())
            .min_by_key(|r| r.connection_count())
    }

    /// Routing for work with no affinity of its own: the calling thread's
    /// reactor if there is one, otherwise the least-loaded live reactor.
    fn route(&self) -> Option<&Arc<Reactor>> {
        if let Some(index) = self.current_index() {
            if let Some(reactor) = self.reactor(index) {
                if reactor.is_alive() {
                    return Some(reactor);
                }
            }
        }
        self.least_loaded()
    }

    /// Hands a socket to the least-loaded reactor, which registers it and
    /// builds its upstream. Placement is final.
    pub(crate) fn place(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        factory: Arc<dyn UpstreamFactory>,
    ) -> Result<()> {
        let reactor = self
            .least_loaded()
            .ok_or(ReactorError::ClusterState("no live reactors"))?;
        reactor.submit(Box::new(move |core| {
            core.install_connection(stream, peer, &factory)
        }))
    }
}

struct TickerHandle {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// A fixed-size cluster of reactor threads sharing one ticker.
///
/// The lifecycle is single-shot: `start` once, `stop` once; a stopped
/// cluster cannot be restarted. All other methods require a running
/// cluster.
pub struct ReactorCluster {
    shared: Arc<ClusterShared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    ticker: Mutex<Option<TickerHandle>>,
}

impl ReactorCluster {
    pub fn new(config: ClusterConfig) -> Self {
        Self {
            shared: Arc::new(ClusterShared::new(config)),
            threads: Mutex::new(Vec::new()),
            ticker: Mutex::new(None),
        }
    }

    /// Spawns the reactor threads and the ticker, returning once every loop
    /// is running and the thread map is published.
    pub fn start(&self) -> Result<()> {
        if self
            .shared
            .state
            .compare_exchange(STATE_IDLE, STATE_RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ReactorError::ClusterState("cluster already started"));
        }
        if let Err(e) = self.spawn_threads() {
            self.shared.state.store(STATE_STOPPED, Ordering::Release);
            return Err(e);
        }
        Ok(())
    }

    fn spawn_threads(&self) -> Result<()> {
        let config = self.shared.config.clone();
        let count = config.reactors;

        let mut cores = Vec::with_capacity(count);
        let mut reactors = Vec::with_capacity(count);
        let mut senders = Vec::with_capacity(count);
        for index in 0..count {
            let poll = Poll::new()?;
            let waker = Waker::new(poll.registry(), WAKER_TOKEN)?;
            let (sender, receiver) = pipe::new()?;
            let reactor = Arc::new(Reactor::new(
                index,
                config.task_queue_capacity,
                waker,
                Arc::clone(&config.logger),
            ));
            cores.push(ReactorCore::new(
                Arc::clone(&reactor),
                Arc::clone(&self.shared),
                poll,
                receiver,
                config.clone(),
            )?);
            reactors.push(reactor);
            senders.push(sender);
        }
        let _ = self.shared.reactors.set(reactors);

        // Two-phase start: phase one collects every loop thread's id, phase
        // two releases the loops only after the map is published.
        let barrier = Arc::new(Barrier::new(count + 1));
        let registrations: Arc<Mutex<HashMap<ThreadId, usize>>> =
            Arc::new(Mutex::new(HashMap::new()));

        let mut threads = self.threads.lock().unwrap();
        for (index, mut core) in cores.into_iter().enumerate() {
            let barrier = Arc::clone(&barrier);
            let registrations = Arc::clone(&registrations);
            let handle = thread::Builder::new()
                .name(format!("reactor-{}", index))
                .spawn(move || {
                    core.handle.bind_thread();
                    registrations
                        .lock()
                        .unwrap()
                        .insert(thread::current().id(), index);
                    barrier.wait();
                    barrier.wait();
                    core.run();
                })?;
            threads.push(handle);
        }

        barrier.wait();
        let map = std::mem::take(&mut *registrations.lock().unwrap());
        let _ = self.shared.thread_map.set(map);
        barrier.wait();

        let stop = Arc::new(AtomicBool::new(false));
        let ticker_stop = Arc::clone(&stop);
        let interval = config.tick_interval;
        let logger = Arc::clone(&config.logger);
        let mut senders = senders;
        let ticker = thread::Builder::new()
            .name("reactor-ticker".to_string())
            .spawn(move || {
                while !ticker_stop.load(Ordering::Acquire) {
                    thread::sleep(interval);
                    for sender in senders.iter_mut() {
                        match sender.write(&[1u8]) {
                            Ok(_) => {}
                            // A full pipe means that reactor is far behind;
                            // the tick is dropped rather than blocking the
                            // ticker for every other reactor.
                            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                            Err(e) => {
                                logger.log(LogLevel::Error, &format!("Ticker write failed: {}", e));
                            }
                        }
                    }
                }
            })?;
        *self.ticker.lock().unwrap() = Some(TickerHandle { stop, thread: ticker });
        Ok(())
    }

    /// Orderly shutdown: stops the ticker, asks every reactor loop to exit,
    /// and joins all threads. Surviving connections receive one abort each.
    pub fn stop(&self) -> Result<()> {
        if self
            .shared
            .state
            .compare_exchange(STATE_RUNNING, STATE_STOPPED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ReactorError::ClusterState("cluster is not running"));
        }

        if let Some(ticker) = self.ticker.lock().unwrap().take() {
            ticker.stop.store(true, Ordering::Release);
            let _ = ticker.thread.join();
        }

        for reactor in self.shared.reactors() {
            // A reactor that already died of overflow rejects this; its
            // thread has exited and joins immediately.
            let _ = reactor.submit(Box::new(|core| core.shutdown = true));
        }
        for handle in self.threads.lock().unwrap().drain(..) {
            let _ = handle.join();
        }
        Ok(())
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shared.state.load(Ordering::Acquire) == STATE_RUNNING {
            Ok(())
        } else {
            Err(ReactorError::ClusterState("cluster is not running"))
        }
    }

    pub fn reactor_count(&self) -> usize {
        self.shared.reactors().len()
    }

    /// Total connections across the cluster.
    pub fn connection_count(&self) -> usize {
        self.shared.connection_total()
    }

    /// Index of the reactor owning the calling thread, if the caller is a
    /// reactor loop thread.
    pub fn current_reactor(&self) -> Option<usize> {
        self.shared.current_index()
    }

    /// Opens a server listener whose bind happens on a reactor thread. The
    /// returned handle's `wait_bound` reports the local address; accepted
    /// connections are spread across the whole cluster.
    pub fn start_tcp_server(&self, factory: Arc<dyn UpstreamFactory>) -> Result<ListenerHandler> {
        self.ensure_running()?;
        let reactor = self
            .shared
            .least_loaded()
            .ok_or(ReactorError::ClusterState("no live reactors"))?;
        let token = Signal::new();
        let bound = Signal::new();
        let closed = Signal::new();
        let handler =
            ListenerHandler::new(Arc::clone(reactor), token.clone(), bound.clone(), closed.clone());
        reactor.submit(Box::new(move |core| {
            core.open_listener(factory, token, bound, closed)
        }))?;
        Ok(handler)
    }

    /// Opens an outbound connection to the factory's address and places it
    /// like an accepted one. `send_open` is delivered once registered; the
    /// nonblocking connect completes in the background.
    pub fn connect_tcp_client(&self, factory: Arc<dyn UpstreamFactory>) -> Result<()> {
        self.ensure_running()?;
        let addr = factory.address();
        let stream = TcpStream::connect(addr)?;
        self.shared.place(stream, addr, factory)
    }

    /// Runs `f` on a reactor thread: the calling thread's own loop when the
    /// caller is one, otherwise the least-loaded reactor.
    pub fn schedule<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.ensure_running()?;
        let reactor = self
            .shared
            .route()
            .ok_or(ReactorError::ClusterState("no live reactors"))?;
        reactor.submit(Box::new(move |_core| f()))
    }

    /// Arms `timeout` on a reactor's timer wheel. Granularity is the tick
    /// interval, rounded up; a delay of zero still waits one full tick. A
    /// timeout can be armed at most once, ever.
    pub fn schedule_timeout(&self, timeout: &Timeout, delay: Duration) -> Result<()> {
        self.ensure_running()?;
        let reactor = self
            .shared
            .route()
            .ok_or(ReactorError::ClusterState("no live reactors"))?;
        timeout.set_owner(reactor.index());
        let delay_ms = delay.as_millis() as u64;
        let armed = timeout.clone();
        reactor.submit(Box::new(move |core| {
            core.wheel.schedule(&armed, delay_ms);
        }))
    }

    /// Cancels a pending timeout. The state flips synchronously, so the
    /// callback is guaranteed not to run once this returns true; the wheel
    /// entry itself is unlinked later on the owning reactor thread.
    pub fn cancel_timeout(&self, timeout: &Timeout) -> bool {
        let cancelled = timeout.cancel();
        if let Some(owner) = timeout.owner() {
            if let Some(reactor) = self.shared.reactor(owner) {
                let stale = timeout.clone();
                let _ = reactor.submit(Box::new(move |core| core.wheel.cancel(&stale)));
            }
        }
        cancelled
    }
}

impl Drop for ReactorCluster {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
