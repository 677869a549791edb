//! Network module - Transport plumbing around the RPC engine
//!
//! Provides:
//! - Runtime network settings shared by clients and servers
//! - Host resolution and dialing with a timeout
//! - A TCP server that serves registered handlers on every connection

mod server;

pub use server::*;

use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;

/// Configuration for network operations
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Port to listen on or connect to
    pub port: u16,
    /// Interface to bind to
    pub bind_address: String,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Size of each read from the stream
    pub read_buffer_size: usize,
    /// Capacity of the push/forwarded-response queue
    pub push_queue_capacity: usize,
    /// Capacity of completion queues the engine allocates itself
    pub done_queue_capacity: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: crate::protocol::DEFAULT_PORT,
            bind_address: "0.0.0.0".to_string(),
            connect_timeout_ms: 5000,
            read_buffer_size: 512,
            push_queue_capacity: 2 << 10,
            done_queue_capacity: 10,
        }
    }
}

impl NetworkConfig {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl From<&crate::config::Config> for NetworkConfig {
    fn from(config: &crate::config::Config) -> Self {
        let net = &config.network;
        Self {
            port: net.port,
            bind_address: net
                .bind_address
                .clone()
                .unwrap_or_else(|| "0.0.0.0".to_string()),
            connect_timeout_ms: net.connect_timeout_ms,
            read_buffer_size: net.read_buffer_size.max(1),
            push_queue_capacity: net.push_queue_capacity.max(1),
            done_queue_capacity: net.done_queue_capacity.max(1),
        }
    }
}

/// Resolve a hostname to a socket address
pub async fn resolve_host(host: &str, port: u16) -> std::io::Result<SocketAddr> {
    use tokio::net::lookup_host;

    let addr_string = format!("{}:{}", host, port);
    let mut addrs = lookup_host(&addr_string).await?;

    addrs.next().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Could not resolve host: {}", host),
        )
    })
}

/// Open a TCP connection, giving up after the configured timeout
pub async fn connect(addr: SocketAddr, config: &NetworkConfig) -> std::io::Result<TcpStream> {
    tracing::info!("Connecting to {}", addr);

    match tokio::time::timeout(config.connect_timeout(), TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => {
            stream.set_nodelay(true)?;
            Ok(stream)
        }
        Ok(Err(e)) => Err(e),
        Err(_) => Err(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!("Connection to {} timed out", addr),
        )),
    }
}
