//! P2P Node implementation
//!
//! The node context that owns the ledger handle, the peer registry and the
//! sync state, and wires them to the server and transport.

use crate::core::{Blockchain, BlockchainError};
use crate::network::message::{MAX_MESSAGE_SIZE, PROTOCOL_VERSION};
use crate::network::peer::{PeerRegistry, DEFAULT_PEER_LIVENESS};
use crate::network::server::{Server, ServerLimits};
use crate::network::sync::{ChainSync, MessageHandler, SyncError};
use crate::network::transport::{TcpTransport, Transport};
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// File under the data directory listing peers that completed a handshake
pub const KNOWN_PEERS_FILE: &str = "peers.json";

/// Node errors
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Blockchain error: {0}")]
    BlockchainError(#[from] BlockchainError),
    #[error("Sync error: {0}")]
    SyncError(#[from] SyncError),
    #[error("Peer file error: {0}")]
    PeerFileError(#[from] serde_json::Error),
}

/// P2P Node configuration
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Address to listen on, also advertised to peers as our return address
    pub listen_addr: SocketAddr,
    /// Initial peers to connect to
    pub bootstrap_peers: Vec<SocketAddr>,
    /// Data directory for ledger storage
    pub data_dir: PathBuf,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub connect_timeout: Duration,
    /// Concurrent inbound connection workers
    pub max_workers: usize,
    /// How recently a peer must have been heard from to be asked for blocks
    pub peer_liveness: Duration,
    pub max_message_size: usize,
    pub protocol_version: u32,
    /// How often handshaked peers are written to the known-peers file
    pub peer_save_interval: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            bootstrap_peers: Vec::new(),
            data_dir: PathBuf::from(".ledger_data"),
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            max_workers: 64,
            peer_liveness: DEFAULT_PEER_LIVENESS,
            max_message_size: MAX_MESSAGE_SIZE,
            protocol_version: PROTOCOL_VERSION,
            peer_save_interval: Duration::from_secs(60),
        }
    }
}

impl NodeConfig {
    fn server_limits(&self) -> ServerLimits {
        ServerLimits {
            read_timeout: self.read_timeout,
            max_workers: self.max_workers,
            max_message_size: self.max_message_size,
        }
    }

    pub fn known_peers_path(&self) -> PathBuf {
        self.data_dir.join(KNOWN_PEERS_FILE)
    }
}

/// Read the known-peers file. A missing or unreadable file yields no peers.
pub async fn load_known_peers(path: &Path) -> Vec<SocketAddr> {
    let json = match tokio::fs::read_to_string(path).await {
        Ok(json) => json,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            log::warn!("Cannot read known peers {:?}: {}", path, e);
            return Vec::new();
        }
    };

    match serde_json::from_str(&json) {
        Ok(peers) => peers,
        Err(e) => {
            log::warn!("Ignoring corrupt known peers {:?}: {}", path, e);
            Vec::new()
        }
    }
}

/// Replace the known-peers file with `peers`
pub async fn save_known_peers(path: &Path, peers: &[SocketAddr]) -> Result<(), NodeError> {
    let json = serde_json::to_string_pretty(peers)?;
    let temp_path = path.with_extension("tmp");
    tokio::fs::write(&temp_path, json).await?;
    tokio::fs::rename(&temp_path, path).await?;
    Ok(())
}

/// The main P2P node
pub struct Node {
    config: NodeConfig,
    blockchain: Arc<Blockchain>,
    peers: Arc<PeerRegistry>,
    chain_sync: Arc<ChainSync>,
}

impl Node {
    /// Create a node sending through `transport`
    pub fn new(config: NodeConfig, blockchain: Arc<Blockchain>, transport: Arc<dyn Transport>) -> Self {
        let peers = Arc::new(PeerRegistry::new(config.protocol_version));
        let chain_sync = Arc::new(ChainSync::new(
            blockchain.clone(),
            peers.clone(),
            transport,
            config.listen_addr,
            config.protocol_version,
            config.peer_liveness,
        ));

        Self {
            config,
            blockchain,
            peers,
            chain_sync,
        }
    }

    /// Create a node that talks TCP
    pub fn with_tcp(config: NodeConfig, blockchain: Arc<Blockchain>) -> Self {
        let transport = Arc::new(TcpTransport::new(
            config.connect_timeout,
            config.write_timeout,
        ));
        Self::new(config, blockchain, transport)
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn blockchain(&self) -> &Arc<Blockchain> {
        &self.blockchain
    }

    pub fn peers(&self) -> &Arc<PeerRegistry> {
        &self.peers
    }

    /// Inbound message entry point
    pub fn handler(&self) -> Arc<dyn MessageHandler> {
        self.chain_sync.clone()
    }

    /// Open a handshake with a peer
    pub async fn connect_to(&self, peer: SocketAddr) -> Result<(), NodeError> {
        log::info!("Connecting to peer: {}", peer);
        self.chain_sync.say_hello(peer).await?;
        Ok(())
    }

    /// Bootstrap peers followed by remembered ones, without duplicates or
    /// our own address
    pub async fn initial_peers(&self) -> Vec<SocketAddr> {
        let known = load_known_peers(&self.config.known_peers_path()).await;
        let mut peers: Vec<SocketAddr> = Vec::new();
        for peer in self.config.bootstrap_peers.iter().chain(known.iter()) {
            if *peer != self.config.listen_addr && !peers.contains(peer) {
                peers.push(*peer);
            }
        }
        peers
    }

    /// Write every handshaked peer to the known-peers file
    pub async fn save_known_peers(&self) -> Result<usize, NodeError> {
        let peers: Vec<SocketAddr> = self
            .peers
            .all()
            .await
            .into_iter()
            .filter(|p| p.is_handshaked())
            .map(|p| p.addr)
            .collect();
        save_known_peers(&self.config.known_peers_path(), &peers).await?;
        Ok(peers.len())
    }

    async fn persist_peers(&self) {
        let mut ticker = tokio::time::interval(self.config.peer_save_interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match self.save_known_peers().await {
                Ok(count) => log::debug!("Saved {} known peers", count),
                Err(e) => log::warn!("Failed to save known peers: {}", e),
            }
        }
    }

    /// Bind the listener, greet bootstrap and remembered peers and serve
    /// until the listener stops. Failing to bind is the only error.
    pub async fn start(&self) -> Result<(), NodeError> {
        let server = Server::bind(self.config.listen_addr, self.config.server_limits()).await?;
        log::info!(
            "Node started on {} at height {}",
            server.local_addr(),
            self.blockchain.tip_height()?
        );

        for peer in self.initial_peers().await {
            if let Err(e) = self.connect_to(peer).await {
                log::warn!("Failed to greet {}: {}", peer, e);
            }
        }

        tokio::select! {
            _ = server.run(self.handler()) => {}
            _ = self.persist_peers() => {}
        }
        Ok(())
    }

    /// Get node status
    pub async fn status(&self) -> Result<NodeStatus, NodeError> {
        Ok(NodeStatus {
            listen_addr: self.config.listen_addr,
            height: self.blockchain.tip_height()?,
            peers: self.peers.len().await,
            pending_blocks: self.chain_sync.pending().len().await,
            syncing: self.peers.is_syncing().await,
        })
    }
}

/// Node status information
#[derive(Debug, Clone)]
pub struct NodeStatus {
    pub listen_addr: SocketAddr,
    pub height: u64,
    pub peers: usize,
    pub pending_blocks: usize,
    pub syncing: bool,
}
