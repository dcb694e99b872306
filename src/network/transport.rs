//! Outbound message delivery
//!
//! Sending is connect, write one frame, close. [`TcpTransport`] does this over
//! real sockets with deadlines; [`MemoryNetwork`] routes frames through
//! channels so several nodes can run inside one process.

use crate::network::message::ProtocolError;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Delivers a single encoded frame to a peer
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, to: SocketAddr, frame: Bytes) -> Result<(), ProtocolError>;
}

/// One TCP connection per message
#[derive(Debug, Clone)]
pub struct TcpTransport {
    connect_timeout: Duration,
    write_timeout: Duration,
}

impl TcpTransport {
    pub fn new(connect_timeout: Duration, write_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            write_timeout,
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&self, to: SocketAddr, frame: Bytes) -> Result<(), ProtocolError> {
        let mut stream = timeout(self.connect_timeout, TcpStream::connect(to))
            .await
            .map_err(|_| ProtocolError::Timeout(format!("connecting to {}", to)))??;

        timeout(self.write_timeout, async {
            stream.write_all(&frame).await?;
            stream.shutdown().await
        })
        .await
        .map_err(|_| ProtocolError::Timeout(format!("writing to {}", to)))??;

        log::trace!("Sent {} bytes to {}", frame.len(), to);
        Ok(())
    }
}

/// In-process network: each registered address gets a frame channel
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    routes: Arc<Mutex<HashMap<SocketAddr, mpsc::UnboundedSender<Bytes>>>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `addr`, returning the receiving end of its inbox
    pub fn register(&self, addr: SocketAddr) -> mpsc::UnboundedReceiver<Bytes> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.routes.lock().insert(addr, tx);
        rx
    }

    /// Detach `addr`; later sends to it fail
    pub fn unregister(&self, addr: &SocketAddr) {
        self.routes.lock().remove(addr);
    }
}

#[async_trait]
impl Transport for MemoryNetwork {
    async fn send(&self, to: SocketAddr, frame: Bytes) -> Result<(), ProtocolError> {
        let route = self
            .routes
            .lock()
            .get(&to)
            .cloned()
            .ok_or(ProtocolError::Unreachable(to))?;
        route.send(frame).map_err(|_| ProtocolError::Unreachable(to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_memory_network_routes_frames() {
        let network = MemoryNetwork::new();
        let addr: SocketAddr = "10.0.0.1:3000".parse().unwrap();
        let mut inbox = network.register(addr);

        network.send(addr, Bytes::from_static(b"hello")).await.unwrap();
        assert_eq!(inbox.recv().await.unwrap(), Bytes::from_static(b"hello"));

        network.unregister(&addr);
        let other: SocketAddr = "10.0.0.2:3000".parse().unwrap();
        assert!(matches!(
            network.send(addr, Bytes::new()).await,
            Err(ProtocolError::Unreachable(a)) if a == addr
        ));
        assert!(network.send(other, Bytes::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_tcp_transport_writes_and_closes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let reader = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            stream.read_to_end(&mut buf).await.unwrap();
            buf
        });

        let transport = TcpTransport::new(Duration::from_secs(5), Duration::from_secs(5));
        transport
            .send(addr, Bytes::from_static(b"frame bytes"))
            .await
            .unwrap();

        assert_eq!(reader.await.unwrap(), b"frame bytes");
    }

    #[tokio::test]
    async fn test_tcp_transport_unreachable() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = TcpTransport::new(Duration::from_secs(2), Duration::from_secs(2));
        assert!(transport.send(addr, Bytes::new()).await.is_err());
    }
}
