//! TCP server and connection handling
//!
//! Each accepted connection carries exactly one message: the worker reads to
//! end of stream under a deadline, decodes, hands the message to the handler
//! and lets the connection drop. Workers are capped by a semaphore.

use crate::network::message::{decode_frame, Message, MessageCodec, ProtocolError};
use crate::network::sync::MessageHandler;
use bytes::Bytes;
use futures::stream::StreamExt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Semaphore};
use tokio::time::timeout;
use tokio_util::codec::FramedRead;

/// Per-connection limits
#[derive(Debug, Clone)]
pub struct ServerLimits {
    pub read_timeout: Duration,
    pub max_workers: usize,
    pub max_message_size: usize,
}

/// TCP server for accepting peer connections
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    limits: ServerLimits,
}

impl Server {
    /// Bind the listener
    pub async fn bind(addr: SocketAddr, limits: ServerLimits) -> Result<Self, io::Error> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        log::info!("Server listening on {}", local_addr);

        Ok(Self {
            listener,
            local_addr,
            limits,
        })
    }

    /// Address actually bound (resolves port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections forever, one worker per connection
    pub async fn run(self, handler: Arc<dyn MessageHandler>) {
        let workers = Arc::new(Semaphore::new(self.limits.max_workers.max(1)));

        loop {
            let (stream, addr) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    log::error!("Accept error: {}", e);
                    continue;
                }
            };

            // Waits while the pool is full, pushing back on the accept queue
            let permit = match workers.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            let handler = handler.clone();
            let limits = self.limits.clone();
            tokio::spawn(async move {
                let _permit = permit;
                match read_message(stream, &limits).await {
                    Ok(message) => handler.handle(message).await,
                    Err(ProtocolError::UnknownCommand(command)) => {
                        log::warn!("Ignoring unknown command '{}' from {}", command, addr);
                    }
                    Err(e) => log::warn!("Dropping message from {}: {}", addr, e),
                }
            });
        }
    }
}

/// Read one message from a connection
pub async fn read_message(stream: TcpStream, limits: &ServerLimits) -> Result<Message, ProtocolError> {
    let mut reader = FramedRead::new(stream, MessageCodec::new(limits.max_message_size));
    match timeout(limits.read_timeout, reader.next()).await {
        Err(_) => Err(ProtocolError::Timeout("reading message".to_string())),
        Ok(None) => Err(ProtocolError::EmptyMessage),
        Ok(Some(result)) => result,
    }
}

/// In-process counterpart of [`Server::run`] for a [`MemoryNetwork`] inbox.
/// Frames are handled one at a time in arrival order.
///
/// [`MemoryNetwork`]: crate::network::transport::MemoryNetwork
pub async fn serve_inbox(
    mut inbox: mpsc::UnboundedReceiver<Bytes>,
    handler: Arc<dyn MessageHandler>,
    max_message_size: usize,
) {
    while let Some(frame) = inbox.recv().await {
        match decode_frame(&frame, max_message_size) {
            Ok(message) => handler.handle(message).await,
            Err(ProtocolError::UnknownCommand(command)) => {
                log::warn!("Ignoring unknown command '{}'", command);
            }
            Err(e) => log::warn!("Dropping message: {}", e),
        }
    }
}
