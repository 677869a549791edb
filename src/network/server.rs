//! Request server
//!
//! Listens for peer processes and runs `rpc::serve_connection` on every
//! accepted stream against one shared handler registry.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;

use super::NetworkConfig;
use crate::rpc::{serve_connection, HandlerRegistry};

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Server already running")]
    AlreadyRunning,

    #[error("Server not running")]
    NotRunning,

    #[error("Cannot bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
}

pub type ServerResult<T> = Result<T, ServerError>;

/// Lifecycle notifications
#[derive(Debug, Clone)]
pub enum ServerEvent {
    Started { bind_addr: SocketAddr },
    PeerConnected { addr: SocketAddr },
    /// `reason` is the serving loop's outcome
    PeerDisconnected { addr: SocketAddr, reason: String },
    Stopped,
    Error { message: String },
}

/// State shared between the server handle and its tasks
struct Shared {
    registry: Arc<HandlerRegistry>,
    peers: RwLock<HashSet<SocketAddr>>,
    running: RwLock<bool>,
    events: mpsc::Sender<ServerEvent>,
}

impl Shared {
    /// Drops the event when the queue is full
    fn emit(&self, event: ServerEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                tracing::debug!("Event queue full, dropping {:?}", event);
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

/// TCP front of a handler registry
pub struct Server {
    config: NetworkConfig,
    shared: Arc<Shared>,
    event_rx: Option<mpsc::Receiver<ServerEvent>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    local_addr: Option<SocketAddr>,
}

impl Server {
    pub fn new(config: NetworkConfig, registry: Arc<HandlerRegistry>) -> Self {
        let (events, event_rx) = mpsc::channel(256);

        Self {
            config,
            shared: Arc::new(Shared {
                registry,
                peers: RwLock::new(HashSet::new()),
                running: RwLock::new(false),
                events,
            }),
            event_rx: Some(event_rx),
            shutdown_tx: None,
            local_addr: None,
        }
    }

    /// Take the event receiver (can only be called once)
    pub fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<ServerEvent>> {
        self.event_rx.take()
    }

    /// Bind and start accepting. Returns the bound address, which differs
    /// from the configured one when port 0 was requested.
    pub async fn start(&mut self) -> ServerResult<SocketAddr> {
        let mut running = self.shared.running.write().await;
        if *running {
            return Err(ServerError::AlreadyRunning);
        }

        let addr = format!("{}:{}", self.config.bind_address, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        self.shutdown_tx = Some(shutdown_tx);
        self.local_addr = Some(local_addr);
        *running = true;
        drop(running);

        tracing::info!(
            "Serving {} methods on {}",
            self.shared.registry.len(),
            local_addr
        );
        self.shared.emit(ServerEvent::Started {
            bind_addr: local_addr,
        });

        tokio::spawn(accept_loop(listener, self.shared.clone(), shutdown_rx));
        Ok(local_addr)
    }

    /// Stop accepting connections. Established connections run until their
    /// peers close them.
    pub async fn stop(&mut self) -> ServerResult<()> {
        if !*self.shared.running.read().await {
            return Err(ServerError::NotRunning);
        }

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        Ok(())
    }

    /// Currently connected peers
    pub async fn peers(&self) -> Vec<SocketAddr> {
        self.shared.peers.read().await.iter().copied().collect()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub async fn is_running(&self) -> bool {
        *self.shared.running.read().await
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>, mut shutdown_rx: mpsc::Receiver<()>) {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                tracing::info!("Server shutdown requested");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    tokio::spawn(serve_peer(stream, addr, shared.clone()));
                }
                Err(e) => {
                    tracing::error!("Accept error: {}", e);
                    shared.emit(ServerEvent::Error { message: e.to_string() });
                }
            },
        }
    }

    *shared.running.write().await = false;
    shared.emit(ServerEvent::Stopped);
}

async fn serve_peer(stream: TcpStream, addr: SocketAddr, shared: Arc<Shared>) {
    tracing::info!("Peer connected from {}", addr);
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!("set_nodelay failed for {}: {}", addr, e);
    }

    shared.peers.write().await.insert(addr);
    shared.emit(ServerEvent::PeerConnected { addr });

    let reason = match serve_connection(stream, shared.registry.clone()).await {
        Ok(()) => "closed by peer".to_string(),
        Err(e) => {
            tracing::warn!("Peer {} ended with error: {}", addr, e);
            e.to_string()
        }
    };

    shared.peers.write().await.remove(&addr);
    shared.emit(ServerEvent::PeerDisconnected { addr, reason });
}
