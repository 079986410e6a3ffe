//! Server-side listeners: reactor-owned accept sockets and their public
//! handle.
//!
//! A listener lives on exactly one reactor thread. The handle returned to
//! the caller carries two single-shot signals: `bound` fires with the local
//! address once the socket is registered, `closed` fires once the socket is
//! released (explicit close or reactor shutdown). Binding happens on the
//! reactor thread, so a handle is usable before the socket exists.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use mio::net::TcpListener;
use mio::{Interest, Token};

use crate::error::Result;
use crate::net::traits::{LogLevel, UpstreamFactory};
use crate::reactor::{Reactor, ReactorCore};
use crate::signal::Signal;

/// Reactor-owned state for one accept socket.
pub(crate) struct ListenerState {
    listener: TcpListener,
    factory: Arc<dyn UpstreamFactory>,
    closed: Signal<()>,
}

/// Handle to a listener owned by a reactor thread.
///
/// Cloneable; `close` may be called from any thread and is idempotent.
#[derive(Clone)]
pub struct ListenerHandler {
    reactor: Arc<Reactor>,
    token: Signal<Token>,
    bound: Signal<SocketAddr>,
    closed: Signal<()>,
}

impl ListenerHandler {
    pub(crate) fn new(
        reactor: Arc<Reactor>,
        token: Signal<Token>,
        bound: Signal<SocketAddr>,
        closed: Signal<()>,
    ) -> Self {
        Self { reactor, token, bound, closed }
    }

    /// Blocks until the listener is bound and registered, returning its
    /// local address. `None` on timeout — including the case where the bind
    /// failed, in which case [`wait_closed`](Self::wait_closed) fires.
    pub fn wait_bound(&self, timeout: Duration) -> Option<SocketAddr> {
        self.bound.wait_timeout(timeout)
    }

    /// Local address, if the listener has finished binding.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.bound.try_get()
    }

    /// Blocks until the listener socket has been released.
    pub fn wait_closed(&self, timeout: Duration) -> bool {
        self.closed.wait_timeout(timeout).is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_fired()
    }

    /// Stops accepting and releases the socket. Established connections are
    /// unaffected. Safe to call more than once.
    pub fn close(&self) -> Result<()> {
        let Some(token) = self.token.try_get() else {
            // Bind never completed; there is nothing to release.
            return Ok(());
        };
        self.reactor
            .submit(Box::new(move |core| core.close_listener(token)))
    }
}

impl ReactorCore {
    /// Binds and registers an accept socket on this reactor thread. Fires
    /// `bound` on success; on failure fires `closed` so waiters unblock.
    pub(crate) fn open_listener(
        &mut self,
        factory: Arc<dyn UpstreamFactory>,
        token_slot: Signal<Token>,
        bound: Signal<SocketAddr>,
        closed: Signal<()>,
    ) {
        let addr = factory.address();
        let mut listener = match TcpListener::bind(addr) {
            Ok(listener) => listener,
            Err(e) => {
                self.log(LogLevel::Error, &format!("Failed to bind {}: {}", addr, e));
                closed.fire(());
                return;
            }
        };
        let local = match listener.local_addr() {
            Ok(local) => local,
            Err(e) => {
                self.log(LogLevel::Error, &format!("Failed to resolve local address: {}", e));
                closed.fire(());
                return;
            }
        };

        let token = self.alloc_token();
        if let Err(e) = self
            .poll
            .registry()
            .register(&mut listener, token, Interest::READABLE)
        {
            self.log(LogLevel::Error, &format!("Failed to register listener {}: {}", local, e));
            closed.fire(());
            return;
        }

        token_slot.fire(token);
        bound.fire(local);
        self.listeners.insert(token, ListenerState { listener, factory, closed });
        self.log(
            LogLevel::Info,
            &format!("Listening on {} (reactor {})", local, self.handle.index()),
        );
    }

    /// Accept-readiness dispatch: drain the backlog, placing each accepted
    /// socket on the least-loaded reactor in the cluster.
    pub(crate) fn accept_ready(&mut self, token: Token) {
        loop {
            let Some(state) = self.listeners.get_mut(&token) else {
                return;
            };
            match state.listener.accept() {
                Ok((stream, peer)) => {
                    let factory = Arc::clone(&state.factory);
                    if let Some(max) = self.config.max_connections {
                        if self.cluster.connection_total() >= max {
                            self.log(
                                LogLevel::Warn,
                                &format!("Connection limit ({}) reached, dropping {}", max, peer),
                            );
                            drop(stream);
                            continue;
                        }
                    }
                    if let Err(e) = self.cluster.place(stream, peer, factory) {
                        self.log(
                            LogLevel::Error,
                            &format!("Failed to place connection from {}: {}", peer, e),
                        );
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.log(LogLevel::Error, &format!("Accept failed: {}", e));
                    return;
                }
            }
        }
    }

    /// Releases one accept socket and fires its closed signal. Idempotent.
    pub(crate) fn close_listener(&mut self, token: Token) {
        let Some(mut state) = self.listeners.remove(&token) else {
            return;
        };
        let _ = self.poll.registry().deregister(&mut state.listener);
        state.closed.fire(());
        self.log(LogLevel::Info, &format!("Listener closed (reactor {})", self.handle.index()));
    }

    pub(crate) fn close_all_listeners(&mut self) {
        let tokens: Vec<Token> = self.listeners.keys().copied().collect();
        for token in tokens {
            self.close_listener(token);
        }
    }
}
