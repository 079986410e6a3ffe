//! # Spindle-IO
//! A multi-threaded, reactor-based event-loop cluster for Rust that provides
//! efficient non-blocking TCP transport without relying on heavyweight async
//! runtimes like Tokio.
//! Spindle-IO runs one blocking [`mio`] poll loop per thread; every
//! connection is owned by exactly one of those threads, and all mutation of
//! connection state happens there. Cross-thread calls are marshaled through
//! lock-free task queues, so the I/O path itself never takes a lock.
//! ## Core Philosophy
//! Spindle-IO was designed for transport layers that require:
//! - **Predictable performance** with minimal runtime overhead
//! - **Runtime-agnostic architecture** that doesn't force async/await patterns
//! - **Thread-affine state** instead of shared-state locking
//! - **Zero steady-state allocation** on the write path via pooled buffers
//! ## Features
//! - **Reactor cluster**: a fixed set of event-loop threads plus one ticker
//! - **Thread-affine handlers**: cloneable per-connection handles usable from
//!   any thread; operations run on the owning loop, callers never block
//! - **Lock-free submission**: bounded MPSC task queues between threads
//! - **Backpressure**: automatic pause/resume coupling inbound delivery to
//!   outbound drain
//! - **Hashed timer wheel**: O(1) approximate timeouts driven by a shared
//!   ticker thread
//! - **Cross-platform polling**: epoll and kqueue through mio
//! ## Architecture Overview
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                    ReactorCluster                    │
//! │  ┌───────────┐  ┌───────────┐       ┌───────────┐    │
//! │  │ Reactor 0 │  │ Reactor 1 │  ...  │ Reactor N │    │
//! │  │ (thread)  │  │ (thread)  │       │ (thread)  │    │
//! │  └─────▲─────┘  └─────▲─────┘       └─────▲─────┘    │
//! │        │ task queue + │ waker             │          │
//! │        └──────────────┴───────────────────┘          │
//! │                       ▲                              │
//! │                 ┌─────┴─────┐                        │
//! │                 │  Ticker   │  1 byte/tick per pipe  │
//! │                 └───────────┘                        │
//! └──────────────────────────────────────────────────────┘
//!          ▲                                ▲
//!          │ ConnectionHandler              │ Upstream callbacks
//!   any application thread          owning reactor thread
//! ```
//! Each reactor blocks on its poll, drains its task queue, then dispatches
//! readiness events: accepts, per-connection reads and writes, and timer
//! ticks. The application supplies an [`UpstreamFactory`]; the reactor calls
//! back into the per-connection [`Upstream`] it builds, always on the owning
//! thread.
//! ## Quick Start
//!
//! ```rust,no_run
//! use spindle_io::{
//!     ClusterConfig, ConnectionHandler, ReactorCluster, Result, Upstream, UpstreamFactory,
//! };
//! use std::net::SocketAddr;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! struct Echo {
//!     handler: ConnectionHandler,
//! }
//!
//! impl Upstream for Echo {
//!     fn send_message(&mut self, data: &[u8]) -> Result<()> {
//!         // Echo the bytes straight back downstream.
//!         self.handler.send_message_downstream(data.to_vec())
//!     }
//! }
//!
//! struct EchoFactory {
//!     addr: SocketAddr,
//! }
//!
//! impl UpstreamFactory for EchoFactory {
//!     fn upstream_for(&self, handler: ConnectionHandler) -> Box<dyn Upstream> {
//!         Box::new(Echo { handler })
//!     }
//!
//!     fn address(&self) -> SocketAddr {
//!         self.addr
//!     }
//! }
//!
//! fn main() -> Result<()> {
//!     let cluster = ReactorCluster::new(ClusterConfig::default());
//!     cluster.start()?;
//!
//!     let factory = Arc::new(EchoFactory { addr: "127.0.0.1:8080".parse().unwrap() });
//!     let listener = cluster.start_tcp_server(factory)?;
//!     let addr = listener.wait_bound(Duration::from_secs(5)).expect("bind timed out");
//!     println!("echo server on {}", addr);
//!
//!     std::thread::park();
//!     Ok(())
//! }
//! ```

pub mod buffer;
pub mod cluster;
pub mod config;
pub mod error;
pub mod msg_queue;
pub mod net;
pub mod queue;
mod reactor;
mod signal;
pub mod timer;

pub use buffer::IoBuf;
pub use cluster::ReactorCluster;
pub use config::{ClusterConfig, ClusterConfigBuilder};
pub use error::{ReactorError, Result};
pub use net::conn::ConnectionHandler;
pub use net::listener::ListenerHandler;
pub use net::traits::{LogLevel, Logger, NoOpLogger, Upstream, UpstreamFactory};
pub use timer::{Timeout, TimeoutState};

/// Convenience re-exports for the common use case.
pub mod prelude {
    pub use crate::buffer::IoBuf;
    pub use crate::cluster::ReactorCluster;
    pub use crate::config::ClusterConfig;
    pub use crate::error::{ReactorError, Result};
    pub use crate::net::conn::ConnectionHandler;
    pub use crate::net::listener::ListenerHandler;
    pub use crate::net::traits::{LogLevel, Logger, NoOpLogger, Upstream, UpstreamFactory};
    pub use crate::timer::{Timeout, TimeoutState};
}
