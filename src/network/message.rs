//! Network message types for P2P communication
//!
//! Every message travels on its own TCP connection: a 12-byte ASCII command
//! name, zero-padded, followed by the bincode-encoded payload. The sender
//! closes the connection after writing, so the receiver reads to end of
//! stream before decoding.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::io;
use std::net::SocketAddr;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Protocol version
pub const PROTOCOL_VERSION: u32 = 1;

/// Oldest peer protocol version we talk to
pub const MIN_PROTOCOL_VERSION: u32 = 1;

/// Length of the command-name header
pub const COMMAND_LEN: usize = 12;

/// Default upper bound on a single message (32 MiB)
pub const MAX_MESSAGE_SIZE: usize = 32 * 1024 * 1024;

/// Protocol errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),
    #[error("Invalid command name: {0}")]
    InvalidCommandName(String),
    #[error("Message truncated: {0} bytes")]
    Truncated(usize),
    #[error("Empty message")]
    EmptyMessage,
    #[error("Message too large: {0} bytes (max: {1})")]
    MessageTooLarge(usize, usize),
    #[error("Decode error: {0}")]
    DecodeError(#[from] bincode::Error),
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Timed out: {0}")]
    Timeout(String),
    #[error("Peer {0} unreachable")]
    Unreachable(SocketAddr),
}

/// Inventory item kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvKind {
    Block,
    Transaction,
}

/// Handshake opener
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionPayload {
    pub version: u32,
    /// Sender clock (unix seconds)
    pub timestamp: i64,
    /// Address the sender dialled
    pub recv_addr: SocketAddr,
    pub addr_from: SocketAddr,
    pub chain_height: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerackPayload {
    pub addr_from: SocketAddr,
}

/// Request for the hashes above the requester's tip
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetBlocksPayload {
    pub addr_from: SocketAddr,
    /// Requester's tip height
    pub height: u64,
    /// Requester's tip hash, checked against our block at `height`
    pub tip_hash: Vec<u8>,
}

/// Announcement of (height, hash) pairs, `heights[i]` pairs with `hashes[i]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryPayload {
    pub addr_from: SocketAddr,
    pub kind: InvKind,
    pub heights: Vec<u64>,
    pub hashes: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetDataPayload {
    pub addr_from: SocketAddr,
    pub kind: InvKind,
    pub height: u64,
    pub hash: Vec<u8>,
}

/// A single block, bincode-encoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockPayload {
    pub addr_from: SocketAddr,
    pub encoded: Vec<u8>,
}

/// Network message types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Version(VersionPayload),
    Verack(VerackPayload),
    GetBlocks(GetBlocksPayload),
    Inventory(InventoryPayload),
    GetData(GetDataPayload),
    Block(BlockPayload),
}

impl Message {
    /// Wire command name
    pub fn command(&self) -> &'static str {
        match self {
            Message::Version(_) => "version",
            Message::Verack(_) => "verack",
            Message::GetBlocks(_) => "getblocks",
            Message::Inventory(_) => "inv",
            Message::GetData(_) => "getdata",
            Message::Block(_) => "block",
        }
    }

    /// Listen address of the sender
    pub fn addr_from(&self) -> SocketAddr {
        match self {
            Message::Version(p) => p.addr_from,
            Message::Verack(p) => p.addr_from,
            Message::GetBlocks(p) => p.addr_from,
            Message::Inventory(p) => p.addr_from,
            Message::GetData(p) => p.addr_from,
            Message::Block(p) => p.addr_from,
        }
    }

    fn encode_payload(&self) -> Result<Vec<u8>, bincode::Error> {
        match self {
            Message::Version(p) => bincode::serialize(p),
            Message::Verack(p) => bincode::serialize(p),
            Message::GetBlocks(p) => bincode::serialize(p),
            Message::Inventory(p) => bincode::serialize(p),
            Message::GetData(p) => bincode::serialize(p),
            Message::Block(p) => bincode::serialize(p),
        }
    }

    fn decode_payload(command: &str, payload: &[u8]) -> Result<Self, ProtocolError> {
        let message = match command {
            "version" => Message::Version(bincode::deserialize(payload)?),
            "verack" => Message::Verack(bincode::deserialize(payload)?),
            "getblocks" => Message::GetBlocks(bincode::deserialize(payload)?),
            "inv" => Message::Inventory(bincode::deserialize(payload)?),
            "getdata" => Message::GetData(bincode::deserialize(payload)?),
            "block" => Message::Block(bincode::deserialize(payload)?),
            other => return Err(ProtocolError::UnknownCommand(other.to_string())),
        };
        Ok(message)
    }
}

/// Pack a command name into its zero-padded header
pub fn command_to_bytes(command: &str) -> Result<[u8; COMMAND_LEN], ProtocolError> {
    if command.is_empty() || command.len() > COMMAND_LEN || !command.is_ascii() {
        return Err(ProtocolError::InvalidCommandName(command.to_string()));
    }
    let mut header = [0u8; COMMAND_LEN];
    header[..command.len()].copy_from_slice(command.as_bytes());
    Ok(header)
}

/// Read a command name back out of its header
pub fn bytes_to_command(header: &[u8]) -> Result<String, ProtocolError> {
    let end = header.iter().position(|&b| b == 0).unwrap_or(header.len());
    let (name, padding) = header.split_at(end);

    if name.is_empty() || !name.is_ascii() || padding.iter().any(|&b| b != 0) {
        return Err(ProtocolError::InvalidCommandName(
            String::from_utf8_lossy(header).into_owned(),
        ));
    }
    Ok(String::from_utf8_lossy(name).into_owned())
}

/// Encode a message into a complete frame
pub fn encode_frame(message: &Message) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::new();
    MessageCodec::default().encode(message, &mut buf)?;
    Ok(buf.freeze())
}

/// Decode a complete frame
pub fn decode_frame(frame: &[u8], max_size: usize) -> Result<Message, ProtocolError> {
    if frame.is_empty() {
        return Err(ProtocolError::EmptyMessage);
    }
    if frame.len() > max_size {
        return Err(ProtocolError::MessageTooLarge(frame.len(), max_size));
    }
    if frame.len() < COMMAND_LEN {
        return Err(ProtocolError::Truncated(frame.len()));
    }
    let (header, payload) = frame.split_at(COMMAND_LEN);
    let command = bytes_to_command(header)?;
    Message::decode_payload(&command, payload)
}

/// Codec for command-framed messages. The frame boundary is end of stream,
/// so decoding only yields a message from `decode_eof`.
#[derive(Debug, Clone)]
pub struct MessageCodec {
    max_size: usize,
}

impl MessageCodec {
    pub fn new(max_size: usize) -> Self {
        Self { max_size }
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new(MAX_MESSAGE_SIZE)
    }
}

impl Encoder<&Message> for MessageCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: &Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let header = command_to_bytes(item.command())?;
        let payload = item.encode_payload()?;

        let len = COMMAND_LEN + payload.len();
        if len > self.max_size {
            return Err(ProtocolError::MessageTooLarge(len, self.max_size));
        }

        dst.reserve(len);
        dst.put_slice(&header);
        dst.put_slice(&payload);
        Ok(())
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Wait for end of stream, but stop reading an oversized message early
        if src.len() > self.max_size {
            return Err(ProtocolError::MessageTooLarge(src.len(), self.max_size));
        }
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }
        let frame = src.split();
        decode_frame(&frame, self.max_size).map(Some)
    }
}
