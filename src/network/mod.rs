//! P2P Networking module
//!
//! Provides block synchronization between ledger nodes.
//!
//! # Features
//! - One-message-per-connection TCP transport with deadlines
//! - 12-byte command framing with bincode payloads
//! - Version/verack handshake and per-peer state tracking
//! - Inventory-driven block download with out-of-order buffering
//! - Bounded inbound worker pool
//! - Known peers remembered across restarts

pub mod message;
pub mod node;
pub mod peer;
pub mod server;
pub mod sync;
pub mod transport;

pub use message::{
    decode_frame, encode_frame, BlockPayload, GetBlocksPayload, GetDataPayload, InvKind,
    InventoryPayload, Message, MessageCodec, ProtocolError, VerackPayload, VersionPayload,
    COMMAND_LEN, MAX_MESSAGE_SIZE, MIN_PROTOCOL_VERSION, PROTOCOL_VERSION,
};
pub use node::{
    load_known_peers, save_known_peers, Node, NodeConfig, NodeError, NodeStatus, KNOWN_PEERS_FILE,
};
pub use peer::{PeerInfo, PeerRegistry, PeerState, DEFAULT_PEER_LIVENESS};
pub use server::{serve_inbox, Server, ServerLimits};
pub use sync::{Buffered, ChainSync, MessageHandler, PendingDownloads, SyncError};
pub use transport::{MemoryNetwork, TcpTransport, Transport};
