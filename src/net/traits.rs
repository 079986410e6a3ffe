//! External interfaces between the reactor core and the protocol layer.

use crate::error::Result;
use crate::net::conn::ConnectionHandler;
use std::io::Error;
use std::net::SocketAddr;

/// Per-connection event sink, implemented by the surrounding protocol layer
/// (e.g. an HTTP engine) and called by the reactor core.
///
/// Every method is invoked on the connection's owning reactor thread, at
/// most once per logical event. `send_close` and `send_abort` are mutually
/// exclusive and each fires at most once per connection. Payload slices
/// passed to `send_message` point into a reactor-owned scratch buffer and
/// must not be retained past the call; copy what you need to keep.
///
/// Errors returned from these callbacks are logged and discarded — a
/// misbehaving upstream cannot kill its reactor.
pub trait Upstream: Send + 'static {
    /// The connection is open and registered. For inbound connections this
    /// follows the accept; for outbound ones, the registration.
    fn send_open(&mut self, peer: SocketAddr) -> Result<()> {
        let _ = peer;
        Ok(())
    }

    /// Inbound bytes arrived.
    fn send_message(&mut self, data: &[u8]) -> Result<()>;

    /// The peer closed, or the application closed downstream.
    fn send_close(&mut self) -> Result<()> {
        Ok(())
    }

    /// Outbound writes are backed up; inbound delivery should slow down.
    fn send_pause(&mut self) -> Result<()> {
        Ok(())
    }

    /// The outbound queue drained; inbound delivery may resume.
    fn send_resume(&mut self) -> Result<()> {
        Ok(())
    }

    /// The connection failed. Terminal, and exclusive with `send_close`.
    fn send_abort(&mut self, error: Error) -> Result<()> {
        let _ = error;
        Ok(())
    }
}

/// Supplied by the protocol layer to obtain a per-connection [`Upstream`].
pub trait UpstreamFactory: Send + Sync + 'static {
    /// Builds the event sink for one connection. The handler is the
    /// connection's thread-affine control surface; it is cheap to clone and
    /// may be used from any thread.
    fn upstream_for(&self, handler: ConnectionHandler) -> Box<dyn Upstream>;

    /// Bind address for servers, remote address for clients.
    fn address(&self) -> SocketAddr;
}

/// Log levels for reactor events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Logger trait for reactor events
///
/// Library users can implement this trait to handle logging however they prefer.
pub trait Logger: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);
}

/// Default no-op logger that discards all messages
#[derive(Default, Clone)]
pub struct NoOpLogger;

impl Logger for NoOpLogger {
    fn log(&self, _level: LogLevel, _message: &str) {
        // Do nothing
    }
}
