//! Data publisher
//!
//! Owns the listener, the set of live connections and the metadata catalog. Connections
//! are stored by handle and only hold a weak reference back to the publisher.

use dashmap::DashMap;
use gep_core::{SecurityMode, ServerCommand, ServerResponse};
use gep_metadata::{
    build_active_measurements, records::build_metadata, DataSet, DeviceMetadata,
    ExpressionEngine, FilterEvaluator, MeasurementMetadata, PhasorMetadata,
};
use gep_transport::{TcpServer, TransportReceiver, TransportSender, TransportServer};
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::catalog::Catalog;
use crate::config::PublisherConfig;
use crate::connection::{ClientConnection, ConnectionHandle};
use crate::dispatcher::CallbackDispatcher;
use crate::error::{PublisherError, Result};
use crate::ids::{IdSource, RandomIds};
use crate::measurement::{encode_data_packet, Measurement};

/// Bytes and measurements sent to subscribers
#[derive(Debug, Default)]
pub struct Counters {
    command_channel_bytes: AtomicU64,
    data_channel_bytes: AtomicU64,
    measurements: AtomicU64,
}

impl Counters {
    pub(crate) fn record_response(&self, response: ServerResponse, size: u64) {
        let counter = if response.is_data_channel() {
            &self.data_channel_bytes
        } else {
            &self.command_channel_bytes
        };
        counter.fetch_add(size, Ordering::Relaxed);
    }

    pub(crate) fn record_measurements(&self, count: u64) {
        self.measurements.fetch_add(count, Ordering::Relaxed);
    }

    pub fn command_channel_bytes(&self) -> u64 {
        self.command_channel_bytes.load(Ordering::Relaxed)
    }

    pub fn data_channel_bytes(&self) -> u64 {
        self.data_channel_bytes.load(Ordering::Relaxed)
    }

    pub fn measurements(&self) -> u64 {
        self.measurements.load(Ordering::Relaxed)
    }
}

/// State shared between the publisher handle and its connections
pub(crate) struct PublisherShared {
    pub(crate) config: PublisherConfig,
    node_id: RwLock<Uuid>,
    security_mode: RwLock<SecurityMode>,
    pub(crate) allow_metadata_refresh: AtomicBool,
    pub(crate) allow_nan_value_filter: AtomicBool,
    pub(crate) force_nan_value_filter: AtomicBool,
    cipher_key_rotation_period_ms: AtomicU64,
    catalog: RwLock<Arc<Catalog>>,
    connections: DashMap<ConnectionHandle, Arc<ClientConnection>>,
    next_handle: AtomicU64,
    dispatcher: CallbackDispatcher,
    ids: Arc<dyn IdSource>,
    pub(crate) filter: Arc<dyn FilterEvaluator>,
    counters: Counters,
    listening: AtomicBool,
    local_addr: RwLock<Option<SocketAddr>>,
    shutdown: watch::Sender<bool>,
}

impl PublisherShared {
    pub(crate) fn dispatcher(&self) -> &CallbackDispatcher {
        &self.dispatcher
    }

    pub(crate) fn counters(&self) -> &Counters {
        &self.counters
    }

    pub(crate) fn catalog(&self) -> Arc<Catalog> {
        Arc::clone(&self.catalog.read())
    }

    /// Deregister a connection. The disconnect event fires only if it was still registered.
    pub(crate) fn remove_connection(&self, handle: ConnectionHandle) {
        if let Some((_, connection)) = self.connections.remove(&handle) {
            self.dispatcher
                .client_disconnected(connection.subscriber_id(), connection.connection_id());
        }
    }

    fn handle_connection<R>(
        self: &Arc<Self>,
        sender: Arc<dyn TransportSender>,
        receiver: R,
        addr: SocketAddr,
    ) where
        R: TransportReceiver + 'static,
    {
        let handle = self.next_handle.fetch_add(1, Ordering::SeqCst);
        let connection = Arc::new(ClientConnection::new(
            handle,
            self.ids.new_id(),
            addr,
            sender,
            Arc::downgrade(self),
        ));

        self.connections.insert(handle, Arc::clone(&connection));

        let publisher = Arc::downgrade(self);
        let resolve_host_names = self.config.resolve_host_names;
        let keepalive = self.config.keepalive_interval();

        tokio::spawn(async move {
            if !connection.start(resolve_host_names).await {
                return;
            }

            match publisher.upgrade() {
                Some(publisher) => publisher
                    .dispatcher
                    .client_connected(connection.subscriber_id(), connection.connection_id()),
                None => {
                    connection.stop().await;
                    return;
                }
            }

            connection.run(receiver, keepalive).await;
        });
    }
}

/// GEP data publisher
#[derive(Clone)]
pub struct DataPublisher {
    shared: Arc<PublisherShared>,
}

impl DataPublisher {
    /// Create a publisher with random identifiers and the built-in filter engine
    pub fn new(config: PublisherConfig) -> Result<Self> {
        Self::with_components(config, Arc::new(RandomIds), Arc::new(ExpressionEngine::new()))
    }

    pub fn with_components(
        config: PublisherConfig,
        ids: Arc<dyn IdSource>,
        filter: Arc<dyn FilterEvaluator>,
    ) -> Result<Self> {
        let node_id = config.node_id.unwrap_or_else(|| ids.new_id());
        let (shutdown, _) = watch::channel(false);

        let shared = PublisherShared {
            node_id: RwLock::new(node_id),
            security_mode: RwLock::new(config.security_mode),
            allow_metadata_refresh: AtomicBool::new(config.allow_metadata_refresh),
            allow_nan_value_filter: AtomicBool::new(config.allow_nan_value_filter),
            force_nan_value_filter: AtomicBool::new(config.force_nan_value_filter),
            cipher_key_rotation_period_ms: AtomicU64::new(config.cipher_key_rotation_period_ms),
            catalog: RwLock::new(Arc::new(Catalog::empty())),
            connections: DashMap::new(),
            next_handle: AtomicU64::new(1),
            dispatcher: CallbackDispatcher::new()?,
            ids,
            filter,
            counters: Counters::default(),
            listening: AtomicBool::new(false),
            local_addr: RwLock::new(None),
            shutdown,
            config,
        };

        Ok(Self {
            shared: Arc::new(shared),
        })
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.shared.config
    }

    /// Bind the command channel and accept subscribers until [`stop`](Self::stop)
    pub async fn serve(&self, addr: &str) -> Result<()> {
        let server = TcpServer::bind_with_config(addr, self.shared.config.tcp_config()).await?;
        self.serve_on(server).await
    }

    /// Accept subscribers from an already bound server until [`stop`](Self::stop)
    pub async fn serve_on<S>(&self, mut server: S) -> Result<()>
    where
        S: TransportServer + 'static,
    {
        let mut shutdown = self.shared.shutdown.subscribe();
        let addr = server.local_addr()?;

        *self.shared.local_addr.write() = Some(addr);
        self.shared.listening.store(true, Ordering::SeqCst);
        info!("Data publisher accepting subscribers on {}", addr);

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            tokio::select! {
                _ = shutdown.changed() => continue,
                accepted = server.accept() => match accepted {
                    Ok((sender, receiver, peer)) => {
                        debug!("Accepted subscriber connection from {}", peer);
                        self.shared.handle_connection(Arc::new(sender), receiver, peer);
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                    }
                },
            }
        }

        self.shared.listening.store(false, Ordering::SeqCst);
        server.close().await?;
        info!("Data publisher stopped accepting subscribers on {}", addr);

        Ok(())
    }

    /// Stop accepting and stop every live connection
    pub async fn stop(&self) {
        self.shared.shutdown.send_replace(true);

        for connection in self.connections() {
            connection.stop().await;
        }
    }

    /// True while the accept loop is running
    pub fn is_connected(&self) -> bool {
        self.shared.listening.load(Ordering::SeqCst)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.shared.local_addr.read()
    }

    pub fn node_id(&self) -> Uuid {
        *self.shared.node_id.read()
    }

    /// Change the node id. Only allowed before the publisher starts listening.
    pub fn set_node_id(&self, node_id: Uuid) -> Result<()> {
        if self.is_connected() {
            return Err(PublisherError::NodeIdLocked);
        }
        *self.shared.node_id.write() = node_id;
        Ok(())
    }

    pub fn security_mode(&self) -> SecurityMode {
        *self.shared.security_mode.read()
    }

    /// Change the security mode. Only allowed before the publisher starts listening.
    pub fn set_security_mode(&self, mode: SecurityMode) -> Result<()> {
        if self.is_connected() {
            return Err(PublisherError::SecurityModeLocked);
        }
        *self.shared.security_mode.write() = mode;
        Ok(())
    }

    pub fn is_metadata_refresh_allowed(&self) -> bool {
        self.shared.allow_metadata_refresh.load(Ordering::SeqCst)
    }

    pub fn set_metadata_refresh_allowed(&self, allowed: bool) {
        self.shared.allow_metadata_refresh.store(allowed, Ordering::SeqCst);
    }

    pub fn is_nan_value_filter_allowed(&self) -> bool {
        self.shared.allow_nan_value_filter.load(Ordering::SeqCst)
    }

    pub fn set_nan_value_filter_allowed(&self, allowed: bool) {
        self.shared.allow_nan_value_filter.store(allowed, Ordering::SeqCst);
    }

    pub fn is_nan_value_filter_forced(&self) -> bool {
        self.shared.force_nan_value_filter.load(Ordering::SeqCst)
    }

    pub fn set_nan_value_filter_forced(&self, forced: bool) {
        self.shared.force_nan_value_filter.store(forced, Ordering::SeqCst);
    }

    pub fn cipher_key_rotation_period(&self) -> u64 {
        self.shared.cipher_key_rotation_period_ms.load(Ordering::SeqCst)
    }

    pub fn set_cipher_key_rotation_period(&self, period_ms: u64) {
        self.shared
            .cipher_key_rotation_period_ms
            .store(period_ms, Ordering::SeqCst);
    }

    pub fn on_status_message<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.shared.dispatcher.set_status_callback(Some(Arc::new(callback)));
    }

    pub fn on_error_message<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.shared.dispatcher.set_error_callback(Some(Arc::new(callback)));
    }

    pub fn on_client_connected<F>(&self, callback: F)
    where
        F: Fn(Uuid, &str) + Send + Sync + 'static,
    {
        self.shared
            .dispatcher
            .set_client_connected_callback(Some(Arc::new(callback)));
    }

    pub fn on_client_disconnected<F>(&self, callback: F)
    where
        F: Fn(Uuid, &str) + Send + Sync + 'static,
    {
        self.shared
            .dispatcher
            .set_client_disconnected_callback(Some(Arc::new(callback)));
    }

    /// Replace the metadata catalog and rebuild the active measurements from it
    pub fn define_metadata(&self, metadata: DataSet) -> Result<()> {
        let active = build_active_measurements(&metadata, self.node_id())?;

        info!(
            "Defined {} metadata records across {} tables, {} active measurements",
            metadata.total_rows(),
            metadata.table_count(),
            active.total_rows()
        );

        *self.shared.catalog.write() = Arc::new(Catalog {
            all: metadata,
            active,
        });

        Ok(())
    }

    /// Build the catalog from typed records, then [`define_metadata`](Self::define_metadata)
    pub fn define_metadata_records(
        &self,
        devices: &[DeviceMetadata],
        measurements: &[MeasurementMetadata],
        phasors: &[PhasorMetadata],
        version: i32,
    ) -> Result<()> {
        let metadata = build_metadata(devices, measurements, phasors, self.node_id(), version)?;
        self.define_metadata(metadata)
    }

    /// Current catalog snapshot
    pub fn metadata(&self) -> Arc<Catalog> {
        self.shared.catalog()
    }

    /// Send measurements to every subscriber whose signal index cache includes them.
    /// Returns the number of measurements sent across all subscribers.
    pub async fn publish_measurements(&self, measurements: &[Measurement]) -> usize {
        let mut total = 0;

        for connection in self.connections() {
            if !connection.is_subscribed() {
                continue;
            }

            let cache = connection.signal_index_cache();
            if cache.is_empty() {
                continue;
            }

            let (format, filter_nan) = connection.packet_format();
            let Some((packet, count)) =
                encode_data_packet(measurements, &cache, format, filter_nan)
            else {
                continue;
            };

            if connection
                .send_response(
                    ServerResponse::DataPacket,
                    ServerCommand::Subscribe.as_u8(),
                    packet,
                )
                .await
            {
                self.shared.counters.record_measurements(count as u64);
                total += count;
            }
        }

        total
    }

    /// Snapshot of live connections
    pub fn connections(&self) -> Vec<Arc<ClientConnection>> {
        self.shared
            .connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn connection_count(&self) -> usize {
        self.shared.connections.len()
    }

    pub fn total_command_channel_bytes_sent(&self) -> u64 {
        self.shared.counters.command_channel_bytes()
    }

    pub fn total_data_channel_bytes_sent(&self) -> u64 {
        self.shared.counters.data_channel_bytes()
    }

    pub fn total_measurements_sent(&self) -> u64 {
        self.shared.counters.measurements()
    }
}
