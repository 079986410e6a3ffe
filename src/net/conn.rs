//! Per-connection state and its thread-affine control surface.
//!
//! The reactor-owned [`Connection`] holds the socket, its readiness
//! registration, the pooled outbound [`MessageQueue`], and the upstream
//! sink. The public [`ConnectionHandler`] is a cheap cloneable handle
//! `{reactor, token}`; every mutator marshals itself to the owning reactor,
//! so the caller never blocks and never needs a lock.
//!
//! Backpressure couples inbound delivery to outbound drain: whenever an
//! inbound event leaves the outbound queue non-empty, exactly one
//! `send_pause` goes upstream; when a writable event fully drains the
//! queue, exactly one `send_resume` follows. No resume without a preceding
//! pause, at most one pause in flight.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use mio::net::TcpStream;
use mio::{Interest, Registry, Token};

use crate::buffer::IoBuf;
use crate::error::Result;
use crate::msg_queue::MessageQueue;
use crate::net::traits::{LogLevel, Upstream, UpstreamFactory};
use crate::reactor::{Reactor, ReactorCore};

/// Reactor-owned state for one TCP connection.
pub(crate) struct Connection {
    stream: TcpStream,
    token: Token,
    peer: SocketAddr,
    upstream: Box<dyn Upstream>,
    outbound: MessageQueue,
    /// Read interest requested by the application (pause/resume downstream).
    want_read: bool,
    /// Write interest; set while the outbound queue holds unwritten bytes.
    want_write: bool,
    /// An automatic backpressure pause is in flight upstream.
    paused_upstream: bool,
    registered: bool,
}

impl Connection {
    fn apply_interest(&mut self, registry: &Registry) -> io::Result<()> {
        let interest = match (self.want_read, self.want_write) {
            (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        };
        match (interest, self.registered) {
            (Some(interest), true) => registry.reregister(&mut self.stream, self.token, interest),
            (Some(interest), false) => {
                registry.register(&mut self.stream, self.token, interest)?;
                self.registered = true;
                Ok(())
            }
            (None, true) => {
                registry.deregister(&mut self.stream)?;
                self.registered = false;
                Ok(())
            }
            (None, false) => Ok(()),
        }
    }
}

/// Thread-affine handle to one connection.
///
/// Clone freely and call from any thread: on the owning reactor thread the
/// operation runs before the loop advances, from anywhere else it is queued
/// to the owning reactor and the call returns immediately. Submission fails
/// only when the owning reactor is gone or its task queue overflowed.
#[derive(Clone)]
pub struct ConnectionHandler {
    reactor: Arc<Reactor>,
    token: Token,
    peer: SocketAddr,
}

impl ConnectionHandler {
    pub(crate) fn new(reactor: Arc<Reactor>, token: Token, peer: SocketAddr) -> Self {
        Self { reactor, token, peer }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Index of the reactor that owns this connection. Placement is final;
    /// connections do not migrate.
    pub fn reactor_index(&self) -> usize {
        self.reactor.index()
    }

    /// Queues `buf` for writing. If nothing is pending the buffer goes to
    /// the socket straight away; a partial write parks the remainder and
    /// enables write interest. Ordering across calls is preserved.
    pub fn send_message_downstream(&self, buf: impl Into<IoBuf>) -> Result<()> {
        let token = self.token;
        let buf = buf.into();
        self.reactor
            .submit(Box::new(move |core| core.conn_send(token, buf)))
    }

    /// Closes the connection and delivers exactly one `send_close` upstream.
    /// Idempotent; a second close is a no-op.
    pub fn send_close_downstream(&self) -> Result<()> {
        let token = self.token;
        self.reactor
            .submit(Box::new(move |core| core.close_connection(token, None)))
    }

    /// Closes the connection and delivers exactly one `send_abort` upstream.
    pub fn send_abort_downstream(&self, error: io::Error) -> Result<()> {
        let token = self.token;
        self.reactor
            .submit(Box::new(move |core| core.close_connection(token, Some(error))))
    }

    /// Disables read interest; inbound delivery stops until resumed.
    pub fn send_pause_downstream(&self) -> Result<()> {
        let token = self.token;
        self.reactor
            .submit(Box::new(move |core| core.conn_set_read(token, false)))
    }

    /// Re-enables read interest.
    pub fn send_resume_downstream(&self) -> Result<()> {
        let token = self.token;
        self.reactor
            .submit(Box::new(move |core| core.conn_set_read(token, true)))
    }
}

enum WriteStep {
    Progress,
    Drained,
    Blocked,
    Failed(io::Error),
}

impl ReactorCore {
    /// Registers an accepted or connected socket with this reactor, builds
    /// its upstream via the factory, and announces `send_open`.
    pub(crate) fn install_connection(
        &mut self,
        stream: TcpStream,
        peer: SocketAddr,
        factory: &Arc<dyn UpstreamFactory>,
    ) {
        if self.config.no_delay {
            if let Err(e) = stream.set_nodelay(true) {
                self.log(LogLevel::Error, &format!("Failed to set TCP_NODELAY: {}", e));
            }
        }

        let token = self.alloc_token();
        let handler = ConnectionHandler::new(Arc::clone(&self.handle), token, peer);
        let upstream = factory.upstream_for(handler);
        let mut conn = Connection {
            stream,
            token,
            peer,
            upstream,
            outbound: MessageQueue::new(&mut self.pool),
            want_read: true,
            want_write: false,
            paused_upstream: false,
            registered: false,
        };

        if let Err(e) = conn.apply_interest(self.poll.registry()) {
            self.log(
                LogLevel::Error,
                &format!("Failed to register connection from {}: {}", peer, e),
            );
            conn.outbound.release_all(&mut self.pool);
            return;
        }

        self.handle
            .conn_count
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.log(
            LogLevel::Info,
            &format!("New connection: {} (reactor {})", peer, self.handle.index()),
        );

        let logger = Arc::clone(&self.config.logger);
        let conn = self.connections.entry(token).or_insert(conn);
        if let Err(e) = conn.upstream.send_open(peer) {
            logger.log(LogLevel::Error, &format!("Upstream send_open error: {}", e));
        }
    }

    /// Thread-affine write entry point.
    pub(crate) fn conn_send(&mut self, token: Token, buf: IoBuf) {
        let registry = self.poll.registry();
        let Some(conn) = self.connections.get_mut(&token) else {
            return;
        };

        if !conn.outbound.is_empty() {
            conn.outbound.push(&mut self.pool, buf);
            return;
        }

        // Queue empty: write straight to the socket, park the remainder on
        // a partial write.
        let mut buf = buf;
        let failure = loop {
            match buf.write_to(&mut conn.stream) {
                Ok(_) if buf.is_drained() => return,
                Ok(0) => break None,
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break None,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => break Some(e),
            }
        };
        if let Some(e) = failure {
            self.close_connection(token, Some(e));
            return;
        }

        let Some(conn) = self.connections.get_mut(&token) else {
            return;
        };
        conn.outbound.push(&mut self.pool, buf);
        if !conn.want_write {
            conn.want_write = true;
            if let Err(e) = conn.apply_interest(registry) {
                self.close_connection(token, Some(e));
            }
        }
    }

    /// Readable dispatch: pull from the socket into the reactor's scratch
    /// buffer and deliver upstream until the socket would block. Work the
    /// sink submits from inside the callback (writes, pause, close) is
    /// applied before the pause decision and before the next read.
    pub(crate) fn handle_readable(&mut self, token: Token) {
        let logger = Arc::clone(&self.config.logger);
        loop {
            let Some(conn) = self.connections.get_mut(&token) else {
                return;
            };
            if !conn.want_read {
                // A pause may have landed between reads.
                return;
            }
            let n = match io::Read::read(&mut conn.stream, &mut self.scratch) {
                Ok(0) => {
                    self.close_connection(token, None);
                    return;
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.close_connection(token, Some(e));
                    return;
                }
            };
            // The scratch slice must not be retained by the sink; anything
            // it keeps, it copies.
            if let Err(e) = conn.upstream.send_message(&self.scratch[..n]) {
                logger.log(LogLevel::Error, &format!("Upstream send_message error: {}", e));
            }
            // The callback ran on this thread, so anything it submitted sits
            // in the local run queue. Apply it now: a queued write must be
            // visible to the pause check below, and a queued pause or close
            // must stop this loop before the next read.
            self.drain_local();
            let Some(conn) = self.connections.get_mut(&token) else {
                return;
            };
            if !conn.outbound.is_empty() && !conn.paused_upstream {
                conn.paused_upstream = true;
                if let Err(e) = conn.upstream.send_pause() {
                    logger.log(LogLevel::Error, &format!("Upstream send_pause error: {}", e));
                }
            }
        }
    }

    /// Writable dispatch: drain the outbound queue as far as the socket
    /// accepts; on full drain, drop write interest and resume upstream.
    pub(crate) fn handle_writable(&mut self, token: Token) {
        loop {
            let step = {
                let Some(conn) = self.connections.get_mut(&token) else {
                    return;
                };
                match conn.outbound.peek_mut() {
                    None => WriteStep::Drained,
                    Some(head) => match head.write_to(&mut conn.stream) {
                        Ok(_) if head.is_drained() => {
                            conn.outbound.pop(&mut self.pool);
                            WriteStep::Progress
                        }
                        Ok(0) => WriteStep::Blocked,
                        Ok(_) => WriteStep::Progress,
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => WriteStep::Blocked,
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => WriteStep::Progress,
                        Err(e) => WriteStep::Failed(e),
                    },
                }
            };

            match step {
                WriteStep::Progress => continue,
                WriteStep::Blocked => return,
                WriteStep::Failed(e) => {
                    self.close_connection(token, Some(e));
                    return;
                }
                WriteStep::Drained => {
                    let logger = Arc::clone(&self.config.logger);
                    let registry = self.poll.registry();
                    let Some(conn) = self.connections.get_mut(&token) else {
                        return;
                    };
                    if conn.want_write {
                        conn.want_write = false;
                        if let Err(e) = conn.apply_interest(registry) {
                            self.close_connection(token, Some(e));
                            return;
                        }
                    }
                    let Some(conn) = self.connections.get_mut(&token) else {
                        return;
                    };
                    if conn.paused_upstream {
                        conn.paused_upstream = false;
                        if let Err(e) = conn.upstream.send_resume() {
                            logger.log(LogLevel::Error, &format!("Upstream send_resume error: {}", e));
                        }
                    }
                    return;
                }
            }
        }
    }

    pub(crate) fn conn_set_read(&mut self, token: Token, want_read: bool) {
        let registry = self.poll.registry();
        let Some(conn) = self.connections.get_mut(&token) else {
            return;
        };
        if conn.want_read == want_read {
            return;
        }
        conn.want_read = want_read;
        if let Err(e) = conn.apply_interest(registry) {
            self.close_connection(token, Some(e));
        }
    }

    /// Removes the connection and notifies upstream exactly once: `close`
    /// for an orderly close or EOF, `abort` with the causing error for a
    /// failure. Idempotent — a second call finds nothing to remove.
    pub(crate) fn close_connection(&mut self, token: Token, error: Option<io::Error>) {
        let Some(mut conn) = self.connections.remove(&token) else {
            return;
        };
        if conn.registered {
            let _ = self.poll.registry().deregister(&mut conn.stream);
        }
        conn.outbound.release_all(&mut self.pool);
        self.handle
            .conn_count
            .fetch_sub(1, std::sync::atomic::Ordering::Relaxed);

        match error {
            Some(e) => {
                self.log(
                    LogLevel::Debug,
                    &format!("Connection {} aborted: {}", conn.peer, e),
                );
                if let Err(e) = conn.upstream.send_abort(e) {
                    self.log(LogLevel::Error, &format!("Upstream send_abort error: {}", e));
                }
            }
            None => {
                self.log(LogLevel::Debug, &format!("Connection {} closed", conn.peer));
                if let Err(e) = conn.upstream.send_close() {
                    self.log(LogLevel::Error, &format!("Upstream send_close error: {}", e));
                }
            }
        }
        // Socket closes when `conn` drops.
    }

    /// Fatal-shutdown step: every surviving connection gets exactly one
    /// abort so upstream learns of the abandonment.
    pub(crate) fn abort_all_connections(&mut self, reason: &str) {
        let tokens: Vec<Token> = self.connections.keys().copied().collect();
        for token in tokens {
            let error = io::Error::new(
                io::ErrorKind::Other,
                format!("reactor terminated: {}", reason),
            );
            self.close_connection(token, Some(error));
        }
    }
}
