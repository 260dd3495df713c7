//! TCP command channel
//!
//! Inbound frames are `[AA BB CC DD][4B little-endian payload size][payload]`. The
//! receiver reads exactly one frame per [`TransportReceiver::recv`] call, so a connection
//! never has more than one command in flight. Outbound bytes are already framed by the
//! caller and are written in order by a dedicated writer task.

use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use parking_lot::Mutex;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

use gep_core::{CommandFrame, MAX_PACKET_SIZE, PAYLOAD_HEADER_SIZE};

use crate::error::{Result, TransportError};
use crate::traits::{TransportEvent, TransportReceiver, TransportSender, TransportServer};

/// Default channel buffer size for outbound frames
const DEFAULT_CHANNEL_BUFFER_SIZE: usize = 1000;

/// Socket options for accepted command channels
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Initial read buffer capacity; grown on demand for larger frames
    pub read_buffer_size: usize,
    /// Keep-alive idle time in seconds (0 = disabled)
    pub keepalive_secs: u64,
    /// Outbound frames queued per connection before senders wait
    pub channel_buffer_size: usize,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: MAX_PACKET_SIZE,
            keepalive_secs: 30,
            channel_buffer_size: DEFAULT_CHANNEL_BUFFER_SIZE,
        }
    }
}

fn is_peer_close(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof
    )
}

/// Split an accepted stream into its sending and receiving halves
fn split_stream(stream: TcpStream, config: &TcpConfig) -> (TcpSender, TcpReceiver) {
    if config.keepalive_secs > 0 {
        let socket = socket2::SockRef::from(&stream);
        let keepalive =
            socket2::TcpKeepalive::new().with_time(Duration::from_secs(config.keepalive_secs));
        if let Err(e) = socket.set_tcp_keepalive(&keepalive) {
            debug!("Failed to enable TCP keepalive: {}", e);
        }
    }
    let _ = stream.set_nodelay(true);

    let (reader, writer) = stream.into_split();
    let connected = Arc::new(Mutex::new(true));
    let shutdown = Arc::new(Notify::new());
    let (outgoing_tx, outgoing_rx) = mpsc::channel::<Bytes>(config.channel_buffer_size.max(1));
    let (events_tx, events_rx) = mpsc::unbounded_channel::<TransportEvent>();

    tokio::spawn(run_writer(
        writer,
        outgoing_rx,
        events_tx,
        shutdown.clone(),
        connected.clone(),
    ));

    let sender = TcpSender {
        tx: outgoing_tx,
        connected,
        shutdown,
    };

    let receiver = TcpReceiver {
        reader,
        buf: BytesMut::with_capacity(config.read_buffer_size),
        read_chunk: config.read_buffer_size.max(PAYLOAD_HEADER_SIZE),
        events: events_rx,
        finished: false,
    };

    (sender, receiver)
}

/// Writes queued frames until the sender closes or the socket fails
async fn run_writer(
    mut writer: OwnedWriteHalf,
    mut outgoing_rx: mpsc::Receiver<Bytes>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    shutdown: Arc<Notify>,
    connected: Arc<Mutex<bool>>,
) {
    loop {
        tokio::select! {
            _ = shutdown.notified() => break,

            data = outgoing_rx.recv() => {
                let Some(data) = data else { break };

                if let Err(e) = writer.write_all(&data).await {
                    let event = if is_peer_close(e.kind()) {
                        debug!("TCP peer closed during write: {}", e);
                        TransportEvent::Disconnected { reason: Some(e.to_string()) }
                    } else {
                        warn!("TCP write error: {}", e);
                        TransportEvent::Error(TransportError::SendFailed(e.to_string()))
                    };
                    let _ = events_tx.send(event);
                    break;
                }
            }
        }
    }

    *connected.lock() = false;
    let _ = writer.shutdown().await;
}

/// Sending half of an accepted connection
pub struct TcpSender {
    tx: mpsc::Sender<Bytes>,
    connected: Arc<Mutex<bool>>,
    shutdown: Arc<Notify>,
}

#[async_trait]
impl TransportSender for TcpSender {
    async fn send(&self, data: Bytes) -> Result<()> {
        if !*self.connected.lock() {
            return Err(TransportError::NotConnected);
        }

        self.tx
            .send(data)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock()
    }

    async fn close(&self) -> Result<()> {
        *self.connected.lock() = false;
        self.shutdown.notify_one();
        Ok(())
    }
}

/// Receiving half of an accepted connection
pub struct TcpReceiver {
    reader: OwnedReadHalf,
    buf: BytesMut,
    read_chunk: usize,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    finished: bool,
}

impl TcpReceiver {
    /// Take one complete payload from the buffer, reserving room for a partial one
    fn take_frame(&mut self) -> Option<Bytes> {
        if self.buf.len() < PAYLOAD_HEADER_SIZE {
            self.buf.reserve(PAYLOAD_HEADER_SIZE);
            return None;
        }

        let payload_size = CommandFrame::payload_size(&self.buf[..PAYLOAD_HEADER_SIZE]).ok()?;
        let total = PAYLOAD_HEADER_SIZE + payload_size;

        if self.buf.len() < total {
            self.buf
                .reserve((total - self.buf.len()).min(self.read_chunk));
            return None;
        }

        self.buf.advance(PAYLOAD_HEADER_SIZE);
        Some(self.buf.split_to(payload_size).freeze())
    }

    fn finish(&mut self, event: TransportEvent) -> Option<TransportEvent> {
        self.finished = true;
        Some(event)
    }
}

#[async_trait]
impl TransportReceiver for TcpReceiver {
    async fn recv(&mut self) -> Option<TransportEvent> {
        if self.finished {
            return None;
        }

        loop {
            if let Some(payload) = self.take_frame() {
                return Some(TransportEvent::Data(payload));
            }

            tokio::select! {
                Some(event) = self.events.recv() => {
                    return self.finish(event);
                }

                result = self.reader.read_buf(&mut self.buf) => {
                    match result {
                        Ok(0) => {
                            debug!("TCP connection closed by peer");
                            return self.finish(TransportEvent::Disconnected { reason: None });
                        }
                        Ok(_) => continue,
                        Err(e) if is_peer_close(e.kind()) => {
                            debug!("TCP connection reset: {}", e);
                            return self.finish(TransportEvent::Disconnected {
                                reason: Some(e.to_string()),
                            });
                        }
                        Err(e) => {
                            return self.finish(TransportEvent::Error(
                                TransportError::ReceiveFailed(e.to_string()),
                            ));
                        }
                    }
                }
            }
        }
    }
}

/// TCP server for accepting subscriber connections
pub struct TcpServer {
    listener: TcpListener,
    config: TcpConfig,
}

impl TcpServer {
    /// Listen for subscribers on `addr` with default socket options
    pub async fn bind(addr: &str) -> Result<Self> {
        Self::bind_with_config(addr, TcpConfig::default()).await
    }

    /// Listen for subscribers on `addr` with explicit socket options
    pub async fn bind_with_config(addr: &str, config: TcpConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::BindFailed(format!("{}: {}", addr, e)))?;

        info!("GEP command channel listening on {}", addr);

        Ok(Self { listener, config })
    }

    pub fn config(&self) -> &TcpConfig {
        &self.config
    }
}

#[async_trait]
impl TransportServer for TcpServer {
    type Sender = TcpSender;
    type Receiver = TcpReceiver;

    async fn accept(&mut self) -> Result<(Self::Sender, Self::Receiver, SocketAddr)> {
        let (stream, peer_addr) = self
            .listener
            .accept()
            .await
            .map_err(|e| TransportError::AcceptFailed(e.to_string()))?;

        debug!("TCP connection accepted from {}", peer_addr);

        let (sender, receiver) = split_stream(stream, &self.config);
        Ok((sender, receiver, peer_addr))
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    async fn close(&self) -> Result<()> {
        // TcpListener closes when dropped
        Ok(())
    }
}
