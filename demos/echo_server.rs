//! TCP echo server on a reactor cluster.
//!
//! Run with `cargo run --example echo_server`, then try:
//! `printf 'hello\n' | nc 127.0.0.1 8080`

use spindle_io::{
    ClusterConfig, ConnectionHandler, LogLevel, Logger, ReactorCluster, Result, Upstream,
    UpstreamFactory,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

struct StdoutLogger;

impl Logger for StdoutLogger {
    fn log(&self, level: LogLevel, message: &str) {
        println!("[{:?}] {}", level, message);
    }
}

struct EchoConnection {
    handler: ConnectionHandler,
}

impl Upstream for EchoConnection {
    fn send_open(&mut self, peer: SocketAddr) -> Result<()> {
        println!(
            "connection from {} on reactor {}",
            peer,
            self.handler.reactor_index()
        );
        Ok(())
    }

    fn send_message(&mut self, data: &[u8]) -> Result<()> {
        self.handler.send_message_downstream(data.to_vec())
    }

    fn send_close(&mut self) -> Result<()> {
        println!("connection from {} closed", self.handler.peer_addr());
        Ok(())
    }
}

struct EchoFactory {
    addr: SocketAddr,
}

impl UpstreamFactory for EchoFactory {
    fn upstream_for(&self, handler: ConnectionHandler) -> Box<dyn Upstream> {
        Box::new(EchoConnection { handler })
    }

    fn address(&self) -> SocketAddr {
        self.addr
    }
}

fn main() -> Result<()> {
    let config = ClusterConfig::builder()
        .reactors(4)
        .logger(Arc::new(StdoutLogger))
        .build();
    let cluster = ReactorCluster::new(config);
    cluster.start()?;

    let factory = Arc::new(EchoFactory {
        addr: "127.0.0.1:8080".parse().unwrap(),
    });
    let listener = cluster.start_tcp_server(factory)?;
    let addr = listener
        .wait_bound(Duration::from_secs(5))
        .expect("bind timed out");
    println!("echo server listening on {}", addr);

    std::thread::park();
    Ok(())
}
