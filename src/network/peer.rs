//! Peer management for P2P networking
//!
//! Tracks every peer we have exchanged messages with: its handshake state,
//! negotiated protocol version, advertised chain height and when we last
//! heard from it.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Default window within which a peer counts as live
pub const DEFAULT_PEER_LIVENESS: Duration = Duration::from_secs(30 * 60);

/// Per-peer handshake and sync state, in protocol order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PeerState {
    Unknown,
    VersionSent,
    Handshaked,
    SyncingBlocks,
    Synced,
}

/// Information about a known peer
#[derive(Debug, Clone)]
pub struct PeerInfo {
    /// Peer's listen address
    pub addr: SocketAddr,
    pub state: PeerState,
    /// Version agreed with this peer (lower of both sides)
    pub version: u32,
    /// Peer's last advertised chain height
    pub height: u64,
    /// When we last received anything from the peer
    pub last_seen: Option<Instant>,
}

impl PeerInfo {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            state: PeerState::Unknown,
            version: 0,
            height: 0,
            last_seen: None,
        }
    }

    pub fn is_handshaked(&self) -> bool {
        self.state >= PeerState::Handshaked
    }

    /// Heard from within `window`
    pub fn is_live(&self, window: Duration) -> bool {
        self.last_seen
            .map(|seen| seen.elapsed() <= window)
            .unwrap_or(false)
    }
}

/// Registry of known peers
pub struct PeerRegistry {
    peers: RwLock<HashMap<SocketAddr, PeerInfo>>,
    local_version: u32,
}

impl PeerRegistry {
    pub fn new(local_version: u32) -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            local_version,
        }
    }

    /// Snapshot of one peer
    pub async fn get(&self, addr: &SocketAddr) -> Option<PeerInfo> {
        self.peers.read().await.get(addr).cloned()
    }

    /// Current state, `Unknown` for peers never seen
    pub async fn state(&self, addr: &SocketAddr) -> PeerState {
        self.peers
            .read()
            .await
            .get(addr)
            .map(|p| p.state)
            .unwrap_or(PeerState::Unknown)
    }

    /// Note that we opened a handshake with `addr`
    pub async fn mark_version_sent(&self, addr: SocketAddr) {
        let mut peers = self.peers.write().await;
        let peer = peers.entry(addr).or_insert_with(|| PeerInfo::new(addr));
        if peer.state == PeerState::Unknown {
            peer.state = PeerState::VersionSent;
        }
    }

    /// Record a received `version`. Returns the state the peer was in before.
    pub async fn record_version(&self, addr: SocketAddr, version: u32, height: u64) -> PeerState {
        let mut peers = self.peers.write().await;
        let peer = peers.entry(addr).or_insert_with(|| PeerInfo::new(addr));
        let previous = peer.state;

        peer.version = version.min(self.local_version);
        peer.height = height;
        peer.last_seen = Some(Instant::now());
        if peer.state < PeerState::Handshaked {
            peer.state = PeerState::Handshaked;
        }

        previous
    }

    /// Record a received `verack`
    pub async fn mark_handshaked(&self, addr: SocketAddr) {
        let mut peers = self.peers.write().await;
        let peer = peers.entry(addr).or_insert_with(|| PeerInfo::new(addr));
        peer.last_seen = Some(Instant::now());
        if peer.state < PeerState::Handshaked {
            peer.state = PeerState::Handshaked;
        }
    }

    /// Refresh last-seen for any message from `addr`
    pub async fn touch(&self, addr: SocketAddr) {
        let mut peers = self.peers.write().await;
        peers
            .entry(addr)
            .or_insert_with(|| PeerInfo::new(addr))
            .last_seen = Some(Instant::now());
    }

    /// Raise the peer's known chain height
    pub async fn note_height(&self, addr: SocketAddr, height: u64) {
        if let Some(peer) = self.peers.write().await.get_mut(&addr) {
            peer.height = peer.height.max(height);
        }
    }

    /// Mark that we are downloading blocks from `addr`
    pub async fn mark_syncing(&self, addr: SocketAddr) {
        if let Some(peer) = self.peers.write().await.get_mut(&addr) {
            if peer.is_handshaked() {
                peer.state = PeerState::SyncingBlocks;
            }
        }
    }

    /// Move every syncing peer to `Synced`
    pub async fn complete_sync(&self) -> usize {
        let mut peers = self.peers.write().await;
        let mut count = 0;
        for peer in peers.values_mut() {
            if peer.state == PeerState::SyncingBlocks {
                peer.state = PeerState::Synced;
                count += 1;
            }
        }
        count
    }

    /// Handshaked peers heard from within `window` that advertise at least
    /// `min_height`, in address order
    pub async fn sync_targets(&self, min_height: u64, window: Duration) -> Vec<SocketAddr> {
        let peers = self.peers.read().await;
        let mut targets: Vec<SocketAddr> = peers
            .values()
            .filter(|p| p.is_handshaked() && p.is_live(window) && p.height >= min_height)
            .map(|p| p.addr)
            .collect();
        targets.sort();
        targets
    }

    /// True while any peer is in `SyncingBlocks`
    pub async fn is_syncing(&self) -> bool {
        self.peers
            .read()
            .await
            .values()
            .any(|p| p.state == PeerState::SyncingBlocks)
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }

    /// All known peers
    pub async fn all(&self) -> Vec<PeerInfo> {
        self.peers.read().await.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[tokio::test]
    async fn test_handshake_transitions() {
        let registry = PeerRegistry::new(2);
        let peer = addr(3001);
        assert_eq!(registry.state(&peer).await, PeerState::Unknown);

        registry.mark_version_sent(peer).await;
        assert_eq!(registry.state(&peer).await, PeerState::VersionSent);

        let previous = registry.record_version(peer, 1, 7).await;
        assert_eq!(previous, PeerState::VersionSent);

        let info = registry.get(&peer).await.unwrap();
        assert_eq!(info.state, PeerState::Handshaked);
        assert_eq!(info.version, 1);
        assert_eq!(info.height, 7);
    }

    #[tokio::test]
    async fn test_version_does_not_downgrade_state() {
        let registry = PeerRegistry::new(1);
        let peer = addr(3002);
        registry.record_version(peer, 1, 3).await;
        registry.mark_syncing(peer).await;
        registry.record_version(peer, 1, 4).await;
        assert_eq!(registry.state(&peer).await, PeerState::SyncingBlocks);
    }

    #[tokio::test]
    async fn test_sync_completion() {
        let registry = PeerRegistry::new(1);
        registry.record_version(addr(3003), 1, 5).await;
        registry.record_version(addr(3004), 1, 5).await;
        registry.mark_syncing(addr(3003)).await;
        assert!(registry.is_syncing().await);

        assert_eq!(registry.complete_sync().await, 1);
        assert_eq!(registry.state(&addr(3003)).await, PeerState::Synced);
        assert_eq!(registry.state(&addr(3004)).await, PeerState::Handshaked);
        assert!(!registry.is_syncing().await);
    }

    #[tokio::test]
    async fn test_sync_targets() {
        let registry = PeerRegistry::new(1);
        registry.record_version(addr(3007), 1, 9).await;
        registry.record_version(addr(3005), 1, 9).await;
        registry.record_version(addr(3006), 1, 2).await;
        registry.mark_version_sent(addr(3008)).await;

        let window = Duration::from_secs(60);
        assert_eq!(
            registry.sync_targets(5, window).await,
            vec![addr(3005), addr(3007)]
        );
        assert!(registry.sync_targets(10, window).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_liveness_window() {
        let registry = PeerRegistry::new(1);
        registry.record_version(addr(3009), 1, 9).await;
        assert_eq!(registry.sync_targets(1, DEFAULT_PEER_LIVENESS).await.len(), 1);

        tokio::time::advance(DEFAULT_PEER_LIVENESS + Duration::from_secs(1)).await;
        assert!(registry.sync_targets(1, DEFAULT_PEER_LIVENESS).await.is_empty());

        registry.touch(addr(3009)).await;
        assert_eq!(registry.sync_targets(1, DEFAULT_PEER_LIVENESS).await.len(), 1);
    }
}
