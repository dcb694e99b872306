//! Chain synchronization with peers
//!
//! Implements the handshake and block-download protocol:
//!
//! 1. `version` / `verack` establish the peer and compare chain heights.
//! 2. The shorter side sends `getblocks` with its tip; the taller side answers
//!    with an `inv` of every (height, hash) above that tip.
//! 3. Announced blocks go into the pending-download set and are fetched with
//!    `getdata`, spread across live handshaked peers.
//! 4. Each `block` reply is validated and committed; announced blocks that
//!    arrive ahead of the tip wait in a bounded buffer until their parent lands.
//!
//! Ledger reads and writes block on disk and on the writer lock, so they run
//! on the blocking pool rather than on the async workers.

use crate::core::{Block, Blockchain, BlockchainError};
use crate::crypto::short_hex;
use crate::network::message::{
    encode_frame, BlockPayload, GetBlocksPayload, GetDataPayload, InvKind, InventoryPayload,
    Message, VerackPayload, VersionPayload, MIN_PROTOCOL_VERSION,
};
use crate::network::peer::{PeerRegistry, PeerState};
use crate::network::transport::Transport;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinError;

/// Most out-of-order blocks held while waiting for a parent
pub const MAX_BUFFERED_BLOCKS: usize = 1024;

/// Sync handler errors
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] BlockchainError),
    #[error("Ledger task failed: {0}")]
    Task(#[from] JoinError),
}

/// What happened to a block offered to the out-of-order buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Buffered {
    Held,
    /// Height and hash were never announced to us
    Unannounced,
    Full,
}

/// Receives decoded inbound messages
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: Message);
}

#[derive(Debug, Default)]
struct PendingState {
    /// Announced blocks not yet applied, by height
    wanted: BTreeMap<u64, Vec<u8>>,
    /// Blocks received ahead of the tip, by height
    buffered: BTreeMap<u64, Block>,
}

/// Blocks we have been told about and still need
#[derive(Debug, Default)]
pub struct PendingDownloads {
    state: Mutex<PendingState>,
}

impl PendingDownloads {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge announced entries; returns the ones not already pending
    pub async fn merge(&self, entries: Vec<(u64, Vec<u8>)>) -> Vec<(u64, Vec<u8>)> {
        let mut state = self.state.lock().await;
        let mut added = Vec::new();
        for (height, hash) in entries {
            if state.wanted.get(&height) != Some(&hash) {
                state.wanted.insert(height, hash.clone());
                added.push((height, hash));
            }
        }
        added
    }

    /// Drop a height once its block is applied
    pub async fn complete(&self, height: u64) {
        self.state.lock().await.wanted.remove(&height);
    }

    /// Forget everything at or below `height`
    pub async fn prune_through(&self, height: u64) {
        let mut state = self.state.lock().await;
        state.wanted.retain(|h, _| *h > height);
        state.buffered.retain(|h, _| *h > height);
    }

    /// Hold a block that arrived ahead of its parent. Only blocks whose
    /// height and hash match a pending announcement are kept.
    pub async fn buffer(&self, block: Block) -> Buffered {
        let mut state = self.state.lock().await;
        if state.wanted.get(&block.height) != Some(&block.hash) {
            return Buffered::Unannounced;
        }
        let full = state.buffered.len() >= MAX_BUFFERED_BLOCKS;
        if full && !state.buffered.contains_key(&block.height) {
            return Buffered::Full;
        }
        state.buffered.insert(block.height, block);
        Buffered::Held
    }

    pub async fn take_buffered(&self, height: u64) -> Option<Block> {
        self.state.lock().await.buffered.remove(&height)
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.wanted.is_empty()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.wanted.len()
    }

    pub async fn buffered_len(&self) -> usize {
        self.state.lock().await.buffered.len()
    }
}

/// Chain synchronization manager
pub struct ChainSync {
    blockchain: Arc<Blockchain>,
    peers: Arc<PeerRegistry>,
    pending: PendingDownloads,
    transport: Arc<dyn Transport>,
    local_addr: SocketAddr,
    protocol_version: u32,
    peer_liveness: Duration,
}

impl ChainSync {
    pub fn new(
        blockchain: Arc<Blockchain>,
        peers: Arc<PeerRegistry>,
        transport: Arc<dyn Transport>,
        local_addr: SocketAddr,
        protocol_version: u32,
        peer_liveness: Duration,
    ) -> Self {
        Self {
            blockchain,
            peers,
            pending: PendingDownloads::new(),
            transport,
            local_addr,
            protocol_version,
            peer_liveness,
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn pending(&self) -> &PendingDownloads {
        &self.pending
    }

    /// Run `f` against the ledger on the blocking pool
    async fn ledger<T, F>(&self, f: F) -> Result<T, SyncError>
    where
        F: FnOnce(&Blockchain) -> T + Send + 'static,
        T: Send + 'static,
    {
        let blockchain = self.blockchain.clone();
        Ok(tokio::task::spawn_blocking(move || f(&blockchain)).await?)
    }

    /// Encode and deliver; failures are logged, never propagated
    async fn send(&self, to: SocketAddr, message: Message) -> bool {
        let command = message.command();
        let frame = match encode_frame(&message) {
            Ok(frame) => frame,
            Err(e) => {
                log::error!("Failed to encode {} for {}: {}", command, to, e);
                return false;
            }
        };
        match self.transport.send(to, frame).await {
            Ok(()) => {
                log::debug!("Sent {} to {}", command, to);
                true
            }
            Err(e) => {
                log::warn!("Failed to send {} to {}: {}", command, to, e);
                false
            }
        }
    }

    async fn version_message(&self, to: SocketAddr) -> Result<Message, SyncError> {
        let chain_height = self.ledger(|chain| chain.tip_height()).await??;
        Ok(Message::Version(VersionPayload {
            version: self.protocol_version,
            timestamp: Utc::now().timestamp(),
            recv_addr: to,
            addr_from: self.local_addr,
            chain_height,
        }))
    }

    /// Open a handshake with `peer`
    pub async fn say_hello(&self, peer: SocketAddr) -> Result<(), SyncError> {
        let message = self.version_message(peer).await?;
        self.peers.mark_version_sent(peer).await;
        self.send(peer, message).await;
        Ok(())
    }

    /// Ask `peer` for everything above our tip
    async fn request_blocks(&self, peer: SocketAddr) -> Result<(), SyncError> {
        let (height, tip_hash) = self.ledger(|chain| chain.tip()).await??;
        let message = Message::GetBlocks(GetBlocksPayload {
            addr_from: self.local_addr,
            height,
            tip_hash,
        });
        if self.send(peer, message).await {
            self.peers.mark_syncing(peer).await;
        }
        Ok(())
    }

    // =========================================================================
    // Handlers
    // =========================================================================

    /// Route one inbound message to its handler
    pub async fn dispatch(&self, message: Message) {
        let from = message.addr_from();
        let command = message.command();
        log::debug!("Received {} from {}", command, from);

        let result = match message {
            Message::Version(p) => self.handle_version(p).await,
            Message::Verack(p) => {
                self.peers.mark_handshaked(p.addr_from).await;
                Ok(())
            }
            Message::GetBlocks(p) => self.handle_getblocks(p).await,
            Message::Inventory(p) => self.handle_inventory(p).await,
            Message::GetData(p) => self.handle_getdata(p).await,
            Message::Block(p) => self.handle_block(p).await,
        };

        if let Err(e) = result {
            log::error!("Handling {} from {} failed: {}", command, from, e);
        }
    }

    async fn handle_version(&self, version: VersionPayload) -> Result<(), SyncError> {
        let peer = version.addr_from;
        if version.version < MIN_PROTOCOL_VERSION {
            log::warn!(
                "Ignoring {} with unsupported protocol version {}",
                peer,
                version.version
            );
            return Ok(());
        }

        let previous = self
            .peers
            .record_version(peer, version.version, version.chain_height)
            .await;

        // Only answer a version we did not solicit, or the two sides ping-pong
        if previous == PeerState::Unknown {
            let reply = self.version_message(peer).await?;
            self.send(peer, reply).await;
        }
        self.send(
            peer,
            Message::Verack(VerackPayload {
                addr_from: self.local_addr,
            }),
        )
        .await;

        let local_height = self.ledger(|chain| chain.tip_height()).await??;
        if local_height < version.chain_height {
            log::info!(
                "Peer {} has higher chain ({} vs {}), requesting blocks",
                peer,
                version.chain_height,
                local_height
            );
            self.request_blocks(peer).await?;
        }

        Ok(())
    }

    async fn handle_getblocks(&self, request: GetBlocksPayload) -> Result<(), SyncError> {
        let peer = request.addr_from;
        self.peers.touch(peer).await;

        let from = request.height;
        match self.ledger(move |chain| chain.block_at(from)).await?? {
            Some(block) if block.hash == request.tip_hash => {}
            Some(_) => {
                log::warn!(
                    "Peer {} claims tip {} at height {} which we do not have; ignoring",
                    peer,
                    short_hex(&request.tip_hash),
                    request.height
                );
                return Ok(());
            }
            None => {
                log::debug!(
                    "Peer {} is ahead of us at height {}; nothing to offer",
                    peer,
                    request.height
                );
                return Ok(());
            }
        }

        let (heights, hashes) = self
            .ledger(move |chain| -> Result<_, BlockchainError> {
                let mut heights = Vec::new();
                let mut hashes = Vec::new();
                for block in chain.iter()? {
                    let block = block?;
                    if block.height <= from {
                        break;
                    }
                    heights.push(block.height);
                    hashes.push(block.hash);
                }
                heights.reverse();
                hashes.reverse();
                Ok((heights, hashes))
            })
            .await??;

        if heights.is_empty() {
            return Ok(());
        }

        log::info!(
            "Offering {} blocks ({}..={}) to {}",
            heights.len(),
            request.height + 1,
            heights[heights.len() - 1],
            peer
        );
        self.send(
            peer,
            Message::Inventory(InventoryPayload {
                addr_from: self.local_addr,
                kind: InvKind::Block,
                heights,
                hashes,
            }),
        )
        .await;
        Ok(())
    }

    async fn handle_inventory(&self, inv: InventoryPayload) -> Result<(), SyncError> {
        let peer = inv.addr_from;
        self.peers.touch(peer).await;

        if inv.kind != InvKind::Block {
            log::debug!("Ignoring {:?} inventory from {}", inv.kind, peer);
            return Ok(());
        }
        if inv.heights.len() != inv.hashes.len() {
            log::warn!(
                "Malformed inventory from {}: {} heights, {} hashes",
                peer,
                inv.heights.len(),
                inv.hashes.len()
            );
            return Ok(());
        }
        if let Some(top) = inv.heights.iter().max() {
            self.peers.note_height(peer, *top).await;
        }

        let (tip, entries) = self
            .ledger(move |chain| -> Result<_, BlockchainError> {
                let tip = chain.tip_height()?;
                let mut entries = Vec::new();
                for (height, hash) in inv.heights.into_iter().zip(inv.hashes) {
                    if height > tip && !chain.contains(&hash)? {
                        entries.push((height, hash));
                    }
                }
                Ok((tip, entries))
            })
            .await??;

        let added = self.pending.merge(entries).await;
        if added.is_empty() {
            return Ok(());
        }
        self.peers.mark_syncing(peer).await;

        let max_height = added.iter().map(|(h, _)| *h).max().unwrap_or(tip);
        let targets = self.peers.sync_targets(max_height, self.peer_liveness).await;
        log::info!(
            "Requesting {} blocks from {} peer(s)",
            added.len(),
            targets.len().max(1)
        );

        for (i, (height, hash)) in added.into_iter().enumerate() {
            let target = if targets.is_empty() {
                peer
            } else {
                targets[i % targets.len()]
            };
            self.send(
                target,
                Message::GetData(GetDataPayload {
                    addr_from: self.local_addr,
                    kind: InvKind::Block,
                    height,
                    hash,
                }),
            )
            .await;
        }

        Ok(())
    }

    async fn handle_getdata(&self, request: GetDataPayload) -> Result<(), SyncError> {
        let peer = request.addr_from;
        self.peers.touch(peer).await;

        if request.kind != InvKind::Block {
            log::debug!("Ignoring {:?} getdata from {}", request.kind, peer);
            return Ok(());
        }

        let height = request.height;
        let block = match self.ledger(move |chain| chain.block_at(height)).await?? {
            Some(block) if block.hash == request.hash => block,
            _ => {
                log::warn!(
                    "Peer {} asked for block {} at height {} which we do not have",
                    peer,
                    short_hex(&request.hash),
                    request.height
                );
                return Ok(());
            }
        };

        self.send(
            peer,
            Message::Block(BlockPayload {
                addr_from: self.local_addr,
                encoded: block.encode().map_err(BlockchainError::from)?,
            }),
        )
        .await;
        Ok(())
    }

    async fn handle_block(&self, payload: BlockPayload) -> Result<(), SyncError> {
        let peer = payload.addr_from;
        self.peers.touch(peer).await;

        let block = match Block::decode(&payload.encoded) {
            Ok(block) => block,
            Err(e) => {
                log::warn!("Undecodable block from {}: {}", peer, e);
                return Ok(());
            }
        };

        let mut next = Some(block);
        while let Some(block) = next.take() {
            let height = block.height;
            let (block, result) = self
                .ledger(move |chain| {
                    let result = chain.accept_block(&block);
                    (block, result)
                })
                .await?;

            match result {
                Ok(()) => {
                    self.pending.complete(height).await;
                    next = self.pending.take_buffered(height + 1).await;
                }
                Err(BlockchainError::UnexpectedHeight { expected, got }) if got > expected => {
                    match self.pending.buffer(block).await {
                        Buffered::Held => {
                            log::debug!("Buffering block {} until {} arrives", got, expected)
                        }
                        Buffered::Unannounced => {
                            log::warn!("Dropping unannounced block {} from {}", got, peer)
                        }
                        Buffered::Full => {
                            log::warn!("Out-of-order buffer full, dropping block {}", got)
                        }
                    }
                }
                Err(BlockchainError::DuplicateBlock(_)) => {
                    self.pending.complete(height).await;
                }
                Err(e @ BlockchainError::Storage(_)) => return Err(e.into()),
                Err(e) => {
                    log::warn!("Rejected block {} from {}: {}", height, peer, e);
                }
            }
        }

        let tip = self.ledger(|chain| chain.tip_height()).await??;
        self.pending.prune_through(tip).await;

        if self.pending.is_empty().await {
            let synced = self.peers.complete_sync().await;
            if synced > 0 {
                log::info!("Sync complete at height {}", tip);
            }
        }

        Ok(())
    }
}

#[async_trait]
impl MessageHandler for ChainSync {
    async fn handle(&self, message: Message) {
        self.dispatch(message).await;
    }
}
