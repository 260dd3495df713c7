//! Subscriber connections
//!
//! A connection moves `Created -> Running -> Stopped` and never leaves `Stopped`. While
//! running it reads one command at a time, hands it to the publisher's handlers and only
//! then reads the next, so at most one command per connection is ever in flight.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use gep_core::{
    encode_client_string, CommandFrame, OperationalEncoding, OperationalModes, ResponseFrame,
    ServerCommand, ServerResponse, SignalIndexCache,
};
use gep_transport::{TransportError, TransportEvent, TransportReceiver, TransportSender};
use parking_lot::RwLock;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{PublisherError, Result};
use crate::measurement::PacketFormat;
use crate::publisher::PublisherShared;

/// Stable key of a connection inside its publisher
pub type ConnectionHandle = u64;

const CREATED: u8 = 0;
const RUNNING: u8 = 1;
const STOPPED: u8 = 2;

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Created,
    Running,
    Stopped,
}

/// One key/IV pair
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CipherKeys {
    pub key: Vec<u8>,
    pub iv: Vec<u8>,
}

/// Values negotiated with the subscriber
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub operational_modes: OperationalModes,
    pub encoding: OperationalEncoding,
    pub use_compact_measurement_format: bool,
    pub use_payload_compression: bool,
    pub include_time: bool,
    pub use_millisecond_resolution: bool,
    pub is_nan_filtered: bool,
    pub is_subscribed: bool,
    pub subscription_info: String,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            operational_modes: OperationalModes(OperationalModes::NO_FLAGS),
            encoding: OperationalEncoding::Utf8,
            use_compact_measurement_format: true,
            use_payload_compression: false,
            include_time: true,
            use_millisecond_resolution: false,
            is_nan_filtered: false,
            is_subscribed: false,
            subscription_info: String::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct Identity {
    connection_id: String,
    host_name: String,
}

/// `ip:port`, with IPv6 addresses bracketed
fn endpoint_id(peer: &SocketAddr) -> String {
    match peer {
        SocketAddr::V4(addr) => format!("{}:{}", addr.ip(), addr.port()),
        SocketAddr::V6(addr) => format!("[{}]:{}", addr.ip(), addr.port()),
    }
}

/// A subscriber connected to the command channel
pub struct ClientConnection {
    handle: ConnectionHandle,
    subscriber_id: Uuid,
    peer: SocketAddr,
    connected_at: DateTime<Utc>,
    identity: RwLock<Identity>,
    settings: RwLock<ConnectionSettings>,
    signal_index_cache: RwLock<Arc<SignalIndexCache>>,
    cipher_keys: RwLock<[CipherKeys; 2]>,
    sender: Arc<dyn TransportSender>,
    state: AtomicU8,
    stop_signal: Notify,
    publisher: Weak<PublisherShared>,
}

impl ClientConnection {
    pub(crate) fn new(
        handle: ConnectionHandle,
        subscriber_id: Uuid,
        peer: SocketAddr,
        sender: Arc<dyn TransportSender>,
        publisher: Weak<PublisherShared>,
    ) -> Self {
        Self {
            handle,
            subscriber_id,
            peer,
            connected_at: Utc::now(),
            identity: RwLock::new(Identity {
                connection_id: endpoint_id(&peer),
                host_name: peer.ip().to_string(),
            }),
            settings: RwLock::new(ConnectionSettings::default()),
            signal_index_cache: RwLock::new(Arc::new(SignalIndexCache::new(subscriber_id))),
            cipher_keys: RwLock::new([CipherKeys::default(), CipherKeys::default()]),
            sender,
            state: AtomicU8::new(CREATED),
            stop_signal: Notify::new(),
            publisher,
        }
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.handle
    }

    pub fn subscriber_id(&self) -> Uuid {
        self.subscriber_id
    }

    /// `host (ip:port)` once the host name is known, otherwise `ip:port`
    pub fn connection_id(&self) -> String {
        self.identity.read().connection_id.clone()
    }

    pub fn ip_address(&self) -> IpAddr {
        self.peer.ip()
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Resolved host name, or the bare IP when resolution failed
    pub fn host_name(&self) -> String {
        self.identity.read().host_name.clone()
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn state(&self) -> ConnectionState {
        match self.state.load(Ordering::SeqCst) {
            CREATED => ConnectionState::Created,
            RUNNING => ConnectionState::Running,
            _ => ConnectionState::Stopped,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::SeqCst) == RUNNING
    }

    pub fn settings(&self) -> ConnectionSettings {
        self.settings.read().clone()
    }

    pub(crate) fn update_settings(&self, update: impl FnOnce(&mut ConnectionSettings)) {
        update(&mut self.settings.write());
    }

    pub fn operational_modes(&self) -> OperationalModes {
        self.settings.read().operational_modes
    }

    /// Store a new modes word and re-derive the text encoding from it
    pub fn set_operational_modes(&self, modes: OperationalModes) -> Result<()> {
        let encoding = modes.encoding()?;
        let mut settings = self.settings.write();
        settings.operational_modes = modes;
        settings.encoding = encoding;
        Ok(())
    }

    pub fn encoding(&self) -> OperationalEncoding {
        self.settings.read().encoding
    }

    pub fn is_subscribed(&self) -> bool {
        self.settings.read().is_subscribed
    }

    pub fn set_subscribed(&self, subscribed: bool) {
        self.settings.write().is_subscribed = subscribed;
    }

    pub fn subscription_info(&self) -> String {
        self.settings.read().subscription_info.clone()
    }

    pub(crate) fn packet_format(&self) -> (PacketFormat, bool) {
        let settings = self.settings.read();
        (
            PacketFormat {
                compact: settings.use_compact_measurement_format,
                include_time: settings.include_time,
                use_millisecond_resolution: settings.use_millisecond_resolution,
            },
            settings.is_nan_filtered,
        )
    }

    pub fn signal_index_cache(&self) -> Arc<SignalIndexCache> {
        Arc::clone(&self.signal_index_cache.read())
    }

    pub(crate) fn set_signal_index_cache(&self, cache: SignalIndexCache) {
        *self.signal_index_cache.write() = Arc::new(cache);
    }

    pub fn keys(&self, cipher_index: usize) -> Result<Vec<u8>> {
        self.cipher_keys
            .read()
            .get(cipher_index)
            .map(|keys| keys.key.clone())
            .ok_or(PublisherError::InvalidCipherIndex(cipher_index))
    }

    pub fn ivs(&self, cipher_index: usize) -> Result<Vec<u8>> {
        self.cipher_keys
            .read()
            .get(cipher_index)
            .map(|keys| keys.iv.clone())
            .ok_or(PublisherError::InvalidCipherIndex(cipher_index))
    }

    pub fn set_cipher_keys(&self, cipher_index: usize, keys: CipherKeys) -> Result<()> {
        let mut slots = self.cipher_keys.write();
        let slot = slots
            .get_mut(cipher_index)
            .ok_or(PublisherError::InvalidCipherIndex(cipher_index))?;
        *slot = keys;
        Ok(())
    }

    pub fn cipher_keys_defined(&self) -> bool {
        !self.cipher_keys.read()[0].key.is_empty()
    }

    fn publisher(&self) -> Option<Arc<PublisherShared>> {
        self.publisher.upgrade()
    }

    /// Move from `Created` to `Running` and resolve the peer's host name.
    /// Returns false when the connection was already started or stopped.
    pub(crate) async fn start(&self, resolve_host_name: bool) -> bool {
        if self
            .state
            .compare_exchange(CREATED, RUNNING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        if resolve_host_name {
            let ip = self.peer.ip();

            match tokio::task::spawn_blocking(move || dns_lookup::lookup_addr(&ip)).await {
                Ok(Ok(host)) if !host.is_empty() && host != ip.to_string() => {
                    let mut identity = self.identity.write();
                    identity.connection_id = format!("{} ({})", host, endpoint_id(&self.peer));
                    identity.host_name = host;
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => debug!("Reverse lookup of {} failed: {}", ip, e),
                Err(e) => debug!("Reverse lookup of {} did not complete: {}", ip, e),
            }
        }

        info!(
            "Client {} connected as subscriber {}",
            self.connection_id(),
            self.subscriber_id
        );
        true
    }

    /// Read loop. Returns once the connection has stopped.
    pub(crate) async fn run<R: TransportReceiver>(&self, mut receiver: R, keepalive: Duration) {
        let keepalive_enabled = !keepalive.is_zero();
        let period = if keepalive_enabled {
            keepalive
        } else {
            Duration::from_secs(3600)
        };
        let mut ping = time::interval_at(Instant::now() + period, period);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while self.is_running() {
            tokio::select! {
                _ = self.stop_signal.notified() => break,

                _ = ping.tick(), if keepalive_enabled => {
                    if self.is_running() {
                        self.send_response(
                            ServerResponse::NoOp,
                            ServerCommand::Subscribe.as_u8(),
                            Bytes::new(),
                        )
                        .await;
                    }
                }

                event = receiver.recv() => match event {
                    Some(TransportEvent::Data(payload)) => self.process_payload(payload).await,
                    Some(TransportEvent::Disconnected { reason }) => {
                        debug!(
                            "Client {} disconnected: {}",
                            self.connection_id(),
                            reason.as_deref().unwrap_or("closed")
                        );
                        break;
                    }
                    Some(TransportEvent::Error(TransportError::SendFailed(e))) => {
                        self.report_error(format!(
                            "Error writing data to client \"{}\" command channel: {}",
                            self.connection_id(),
                            e
                        ));
                        break;
                    }
                    Some(TransportEvent::Error(e)) => {
                        self.report_error(format!(
                            "Error reading data from client \"{}\" command channel: {}",
                            self.connection_id(),
                            e
                        ));
                        break;
                    }
                    None => break,
                },
            }
        }

        self.stop().await;
    }

    async fn process_payload(&self, payload: Bytes) {
        let frame = match CommandFrame::decode(payload) {
            Ok(frame) => frame,
            Err(e) => {
                self.report_error(format!(
                    "Encountered an exception while processing received client data: {}",
                    e
                ));
                return;
            }
        };

        match self.publisher() {
            Some(publisher) => publisher.handle_command(self, frame).await,
            None => warn!(
                "Dropping command 0x{:02X} from {}: publisher is gone",
                frame.command,
                self.connection_id()
            ),
        }
    }

    fn report_error(&self, message: String) {
        match self.publisher() {
            Some(publisher) => publisher.dispatcher().error(message),
            None => warn!("{}", message),
        }
    }

    /// Frame and queue one response. Returns false when it could not be queued.
    pub(crate) async fn send_response(
        &self,
        response: ServerResponse,
        command: u8,
        data: impl Into<Bytes>,
    ) -> bool {
        let encoded = match ResponseFrame::new(response, command, data).encode() {
            Ok(encoded) => encoded,
            Err(e) => {
                self.report_error(format!(
                    "Failed to frame {:?} response for client \"{}\": {}",
                    response,
                    self.connection_id(),
                    e
                ));
                return false;
            }
        };
        let size = encoded.len() as u64;

        match self.sender.send(encoded).await {
            Ok(()) => {
                if let Some(publisher) = self.publisher() {
                    publisher.counters().record_response(response, size);
                }
                true
            }
            Err(e) => {
                debug!(
                    "{:?} response to {} not sent: {}",
                    response,
                    self.connection_id(),
                    e
                );
                false
            }
        }
    }

    /// Send a text response in the connection's negotiated encoding
    pub(crate) async fn send_message(
        &self,
        response: ServerResponse,
        command: u8,
        message: &str,
    ) -> bool {
        let data = encode_client_string(self.encoding(), message);
        self.send_response(response, command, data).await
    }

    /// Stop the connection. Safe to call from any path any number of times; only the first
    /// call closes the socket and deregisters from the publisher.
    pub async fn stop(&self) {
        if self.state.swap(STOPPED, Ordering::SeqCst) == STOPPED {
            return;
        }

        self.stop_signal.notify_one();

        if let Err(e) = self.sender.close().await {
            debug!("Closing {} failed: {}", self.connection_id(), e);
        }

        if let Some(publisher) = self.publisher() {
            publisher.remove_connection(self.handle);
        }

        info!("Client {} disconnected", self.connection_id());
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("handle", &self.handle)
            .field("subscriber_id", &self.subscriber_id)
            .field("connection_id", &self.connection_id())
            .field("state", &self.state())
            .finish()
    }
}
