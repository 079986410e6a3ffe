//! TCP transport for the reactor cluster.
//!
//! The application sits *upstream* of this module and the sockets sit
//! *downstream*. The seam between the two is a pair of traits: the reactor
//! calls into the application through [`traits::Upstream`], and the
//! application drives a connection through the thread-affine
//! [`conn::ConnectionHandler`].
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │              Application (upstream)             │
//! │     Upstream callbacks ▲   │ ConnectionHandler  │
//! └────────────────────────┼───┼────────────────────┘
//!                          │   ▼
//! ┌─────────────────────────────────────────────────┐
//! │   Reactor thread: Connection + MessageQueue     │
//! │   ListenerState: accept -> least-loaded place   │
//! └────────────────────────┬────────────────────────┘
//!                          ▼
//!                   TCP socket (downstream)
//! ```
//!
//! Every `Upstream` callback runs on the connection's owning reactor
//! thread; every `ConnectionHandler` call marshals itself there. Neither
//! side ever blocks on the other.

pub(crate) mod conn;
pub(crate) mod listener;
pub mod traits;

pub use conn::ConnectionHandler;
pub use listener::ListenerHandler;
pub use traits::{LogLevel, Logger, NoOpLogger, Upstream, UpstreamFactory};
