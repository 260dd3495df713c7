//! Command-channel transport seams

use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;

use crate::error::{Result, TransportError};

/// Events produced by a connection's receiving half
#[derive(Debug)]
pub enum TransportEvent {
    /// One command payload: command byte followed by the command body
    Data(Bytes),
    /// Peer closed or reset the connection
    Disconnected { reason: Option<String> },
    /// Read or write failure other than a peer-initiated close
    Error(TransportError),
}

/// Sending half of a connection
#[async_trait]
pub trait TransportSender: Send + Sync {
    /// Queue an already framed response for writing
    async fn send(&self, data: Bytes) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Stop writing and shut down the socket's write side
    async fn close(&self) -> Result<()>;
}

/// Receiving half of a connection
#[async_trait]
pub trait TransportReceiver: Send {
    /// Read the next event. Returns `None` once the connection has ended.
    async fn recv(&mut self) -> Option<TransportEvent>;
}

/// Listener accepting subscriber connections
#[async_trait]
pub trait TransportServer: Send + Sync {
    type Sender: TransportSender + 'static;
    type Receiver: TransportReceiver + 'static;

    async fn accept(&mut self) -> Result<(Self::Sender, Self::Receiver, SocketAddr)>;

    fn local_addr(&self) -> Result<SocketAddr>;

    async fn close(&self) -> Result<()>;
}
