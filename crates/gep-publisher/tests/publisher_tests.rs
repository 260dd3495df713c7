//! Data Publisher Tests
//!
//! End-to-end tests over loopback TCP:
//! - Connection lifecycle events
//! - Subscribe success, rejection and bounds checking
//! - Unknown commands keep the connection open
//! - Metadata refresh, filtering, compression and policy
//! - Operational modes negotiation
//! - Measurement routing through the signal index cache
//! - Keepalive and stop behavior

use bytes::{BufMut, Bytes};
use gep_core::{
    compression, compression_modes, data_packet_flags, CommandFrame, OperationalEncoding,
    OperationalModes, ResponseFrame, SecurityMode, ServerResponse, SignalIndexCache,
    PAYLOAD_HEADER_SIZE,
};
use gep_metadata::{DeviceMetadata, ExpressionEngine, MeasurementMetadata};
use gep_publisher::{DataPublisher, Measurement, PublisherConfig, SequentialIds};
use gep_transport::{TcpServer, TransportServer};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use uuid::Uuid;

// ============================================================================
// Utilities
// ============================================================================

const SUBSCRIBE: u8 = 0x02;
const METADATA_REFRESH: u8 = 0x01;
const UNSUBSCRIBE: u8 = 0x03;
const DEFINE_OPERATIONAL_MODES: u8 = 0x06;

const COMMON_FORMAT: u32 = OperationalModes::USE_COMMON_SERIALIZATION_FORMAT | OperationalEncoding::UTF8;

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Status(String),
    Error(String),
    Connected(Uuid, String),
    Disconnected(Uuid, String),
}

#[derive(Clone, Default)]
struct Events(Arc<Mutex<Vec<Event>>>);

impl Events {
    fn attach(publisher: &DataPublisher) -> Self {
        let events = Events::default();

        let sink = events.clone();
        publisher.on_status_message(move |m| sink.push(Event::Status(m.to_string())));
        let sink = events.clone();
        publisher.on_error_message(move |m| sink.push(Event::Error(m.to_string())));
        let sink = events.clone();
        publisher.on_client_connected(move |id, c| sink.push(Event::Connected(id, c.to_string())));
        let sink = events.clone();
        publisher
            .on_client_disconnected(move |id, c| sink.push(Event::Disconnected(id, c.to_string())));

        events
    }

    fn push(&self, event: Event) {
        self.0.lock().push(event);
    }

    fn snapshot(&self) -> Vec<Event> {
        self.0.lock().clone()
    }

    fn count(&self, predicate: impl Fn(&Event) -> bool) -> usize {
        self.0.lock().iter().filter(|e| predicate(e)).count()
    }

    fn has_status(&self, text: &str) -> bool {
        self.count(|e| matches!(e, Event::Status(m) if m.contains(text))) > 0
    }

    fn has_error(&self, text: &str) -> bool {
        self.count(|e| matches!(e, Event::Error(m) if m.contains(text))) > 0
    }
}

/// Poll `condition` until it holds or two seconds pass
async fn wait_for(condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);

    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    condition()
}

fn test_config() -> PublisherConfig {
    PublisherConfig {
        keepalive_interval_ms: 0,
        resolve_host_names: false,
        tcp_keepalive_secs: 0,
        ..Default::default()
    }
}

async fn start_publisher(config: PublisherConfig) -> (DataPublisher, SocketAddr, Events) {
    let publisher = DataPublisher::with_components(
        config,
        Arc::new(SequentialIds::new(1000)),
        Arc::new(ExpressionEngine::new()),
    )
    .unwrap();

    define_sample_metadata(&publisher);

    let server = TcpServer::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap();
    let events = Events::attach(&publisher);

    let serving = publisher.clone();
    tokio::spawn(async move { serving.serve_on(server).await });

    assert!(wait_for(|| publisher.is_connected()).await);
    (publisher, addr, events)
}

fn define_sample_metadata(publisher: &DataPublisher) {
    let devices = [DeviceMetadata {
        acronym: "SHELBY".to_string(),
        name: "Shelby".to_string(),
        protocol_name: "IEEE C37.118-2005".to_string(),
        frames_per_second: 30,
        ..Default::default()
    }];
    let measurements = [
        MeasurementMetadata {
            device_acronym: "SHELBY".to_string(),
            id: "PPA:1".to_string(),
            signal_id: Uuid::from_u128(100),
            point_tag: "SHELBY:FREQ".to_string(),
            reference: "SHELBY-FQ".parse().unwrap(),
            ..Default::default()
        },
        MeasurementMetadata {
            device_acronym: "SHELBY".to_string(),
            id: "PPA:2".to_string(),
            signal_id: Uuid::from_u128(101),
            point_tag: "SHELBY:DFDT".to_string(),
            reference: "SHELBY-DF".parse().unwrap(),
            ..Default::default()
        },
    ];

    publisher
        .define_metadata_records(&devices, &measurements, &[], 1)
        .unwrap();
}

async fn connect(addr: SocketAddr) -> TcpStream {
    TcpStream::connect(addr).await.unwrap()
}

async fn send(stream: &mut TcpStream, command: u8, body: impl Into<Bytes>) {
    let frame = CommandFrame::new(command, body).encode();
    stream.write_all(&frame).await.unwrap();
}

async fn read_response(stream: &mut TcpStream) -> ResponseFrame {
    read_response_within(stream, Duration::from_secs(2)).await
}

async fn read_response_within(stream: &mut TcpStream, limit: Duration) -> ResponseFrame {
    let mut header = [0u8; PAYLOAD_HEADER_SIZE];
    timeout(limit, stream.read_exact(&mut header))
        .await
        .expect("response timed out")
        .unwrap();

    let size = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
    let mut packet = vec![0u8; size];
    timeout(limit, stream.read_exact(&mut packet))
        .await
        .expect("response body timed out")
        .unwrap();

    let mut frame = header.to_vec();
    frame.extend_from_slice(&packet);
    ResponseFrame::decode(Bytes::from(frame)).unwrap()
}

fn text(frame: &ResponseFrame) -> String {
    String::from_utf8(frame.data.to_vec()).unwrap()
}

fn modes_body(modes: u32) -> Vec<u8> {
    modes.to_be_bytes().to_vec()
}

fn subscribe_body(flags: u8, connection_string: &str) -> Vec<u8> {
    let mut body = Vec::new();
    body.put_u8(flags);
    body.put_u32(connection_string.len() as u32);
    body.put_slice(connection_string.as_bytes());
    body
}

fn refresh_body(filter: &str) -> Vec<u8> {
    let mut body = Vec::new();
    body.put_u32(filter.len() as u32);
    body.put_slice(filter.as_bytes());
    body
}

/// Connect and wait until the publisher has registered the connection
async fn connected_client(publisher: &DataPublisher, addr: SocketAddr, events: &Events) -> TcpStream {
    let before = events.count(|e| matches!(e, Event::Connected(..)));
    let stream = connect(addr).await;
    assert!(wait_for(|| events.count(|e| matches!(e, Event::Connected(..))) > before).await);
    assert!(publisher.connection_count() > 0);
    stream
}

// ============================================================================
// Connection lifecycle
// ============================================================================

#[tokio::test]
async fn test_connect_and_disconnect_events() {
    let (publisher, addr, events) = start_publisher(test_config()).await;

    let stream = connected_client(&publisher, addr, &events).await;
    let connections = publisher.connections();
    assert_eq!(connections.len(), 1);

    let connection = &connections[0];
    let local = stream.local_addr().unwrap();
    assert_eq!(connection.connection_id(), format!("127.0.0.1:{}", local.port()));
    assert_eq!(connection.subscriber_id(), Uuid::from_u128(1001));

    drop(stream);

    assert!(wait_for(|| events.count(|e| matches!(e, Event::Disconnected(..))) == 1).await);
    assert_eq!(publisher.connection_count(), 0);

    let connected = events
        .snapshot()
        .into_iter()
        .find(|e| matches!(e, Event::Connected(..)))
        .unwrap();
    assert_eq!(
        connected,
        Event::Connected(Uuid::from_u128(1001), format!("127.0.0.1:{}", local.port()))
    );

    // Peer close is not an error
    assert!(!events.snapshot().iter().any(|e| matches!(e, Event::Error(_))));
}

#[tokio::test]
async fn test_stop_disconnects_each_client_once() {
    let (publisher, addr, events) = start_publisher(test_config()).await;

    let mut first = connected_client(&publisher, addr, &events).await;
    let _second = connected_client(&publisher, addr, &events).await;
    assert!(wait_for(|| publisher.connection_count() == 2).await);

    let connection = publisher.connections()[0].clone();
    tokio::join!(publisher.stop(), connection.stop());

    assert!(wait_for(|| events.count(|e| matches!(e, Event::Disconnected(..))) == 2).await);
    assert!(wait_for(|| !publisher.is_connected()).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(events.count(|e| matches!(e, Event::Disconnected(..))), 2);
    assert_eq!(publisher.connection_count(), 0);

    let mut buf = [0u8; 16];
    let read = timeout(Duration::from_secs(2), first.read(&mut buf)).await.unwrap();
    assert!(matches!(read, Ok(0) | Err(_)));
}

#[tokio::test]
async fn test_security_mode_locked_while_listening() {
    let (publisher, _addr, _events) = start_publisher(test_config()).await;

    let err = publisher.set_security_mode(SecurityMode::Tls).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Cannot change security mode once publisher has been connected"
    );
    assert_eq!(publisher.security_mode(), SecurityMode::None);
    assert!(publisher.set_node_id(Uuid::nil()).is_err());
}

#[tokio::test]
async fn test_keepalive_sends_noop() {
    let config = PublisherConfig {
        keepalive_interval_ms: 50,
        ..test_config()
    };
    let (publisher, addr, events) = start_publisher(config).await;
    let mut stream = connected_client(&publisher, addr, &events).await;

    let frame = read_response(&mut stream).await;
    assert_eq!(frame.response, ServerResponse::NoOp);
    assert_eq!(frame.command, SUBSCRIBE);
    assert!(frame.data.is_empty());
}

// ============================================================================
// Subscribe
// ============================================================================

#[tokio::test]
async fn test_subscribe_sends_signal_index_cache() {
    let (publisher, addr, events) = start_publisher(test_config()).await;
    let mut stream = connected_client(&publisher, addr, &events).await;

    let body = subscribe_body(
        data_packet_flags::COMPACT,
        "includeTime=false; inputMeasurementKeys={PPA:2; PPA:1}; assemblyInfo={source=TestClient; version=2.1.0.0; buildDate=2024-05-01}",
    );
    send(&mut stream, SUBSCRIBE, body).await;

    let update = read_response(&mut stream).await;
    assert_eq!(update.response, ServerResponse::UpdateSignalIndexCache);
    assert_eq!(update.command, SUBSCRIBE);

    let cache = SignalIndexCache::decode(&update.data, OperationalEncoding::Utf8).unwrap();
    assert_eq!(cache.subscriber_id(), Uuid::from_u128(1001));
    assert_eq!(cache.count(), 2);
    assert_eq!(cache.signal_index(&Uuid::from_u128(101)), Some(0));
    assert_eq!(cache.signal_index(&Uuid::from_u128(100)), Some(1));

    let succeeded = read_response(&mut stream).await;
    assert_eq!(succeeded.response, ServerResponse::Succeeded);
    assert_eq!(succeeded.command, SUBSCRIBE);
    assert_eq!(
        text(&succeeded),
        "Client subscribed as compact unsynchronized with 2 signals."
    );

    let connection = publisher.connections()[0].clone();
    assert!(connection.is_subscribed());
    assert!(!connection.settings().include_time);
    assert_eq!(
        connection.subscription_info(),
        "TestClient version 2.1.0.0 built on 2024-05-01"
    );
    assert!(wait_for(|| events.has_status("with 2 signals")).await);
    assert!(events.has_status("Reported client subscription info: TestClient"));

    send(&mut stream, UNSUBSCRIBE, Bytes::new()).await;
    assert!(wait_for(|| !connection.is_subscribed()).await);
}

#[tokio::test]
async fn test_subscribe_with_filter_expression() {
    let (publisher, addr, events) = start_publisher(test_config()).await;
    let mut stream = connected_client(&publisher, addr, &events).await;

    let body = subscribe_body(
        0,
        "inputMeasurementKeys={FILTER ActiveMeasurements WHERE SignalType = 'FREQ'}",
    );
    send(&mut stream, SUBSCRIBE, body).await;

    let update = read_response(&mut stream).await;
    let cache = SignalIndexCache::decode(&update.data, OperationalEncoding::Utf8).unwrap();
    assert_eq!(cache.count(), 1);
    assert_eq!(cache.signal_id(0), Some(Uuid::from_u128(100)));

    let succeeded = read_response(&mut stream).await;
    assert_eq!(
        text(&succeeded),
        "Client subscribed as non-compact unsynchronized with 1 signals."
    );
}

#[tokio::test]
async fn test_synchronized_subscribe_rejected() {
    let (publisher, addr, events) = start_publisher(test_config()).await;
    let mut stream = connected_client(&publisher, addr, &events).await;

    let body = subscribe_body(
        data_packet_flags::SYNCHRONIZED,
        "inputMeasurementKeys={PPA:1}",
    );
    send(&mut stream, SUBSCRIBE, body).await;

    let failed = read_response(&mut stream).await;
    assert_eq!(failed.response, ServerResponse::Failed);
    assert_eq!(failed.command, SUBSCRIBE);
    assert!(text(&failed).starts_with("Client request for remotely synchronized data subscription was denied."));

    let connection = publisher.connections()[0].clone();
    assert!(!connection.is_subscribed());
    assert_eq!(connection.signal_index_cache().count(), 0);
    assert!(wait_for(|| events.has_error("remotely synchronized")).await);
}

#[tokio::test]
async fn test_subscribe_bounds_leave_state_untouched() {
    let (publisher, addr, events) = start_publisher(test_config()).await;
    let mut stream = connected_client(&publisher, addr, &events).await;

    send(&mut stream, SUBSCRIBE, subscribe_body(0, "inputMeasurementKeys={PPA:1}")).await;
    read_response(&mut stream).await;
    read_response(&mut stream).await;

    let connection = publisher.connections()[0].clone();
    let cache = connection.signal_index_cache();
    assert_eq!(cache.count(), 1);

    // Shorter than the fixed subscribe header
    send(&mut stream, SUBSCRIBE, vec![0u8, 0, 0]).await;
    let failed = read_response(&mut stream).await;
    assert_eq!(failed.response, ServerResponse::Failed);
    assert_eq!(
        text(&failed),
        "Not enough buffer was provided to parse client data subscription."
    );

    // Declared connection string longer than the payload
    let mut body = vec![0u8];
    body.put_u32(100);
    body.put_slice(b"ab");
    send(&mut stream, SUBSCRIBE, body).await;
    let failed = read_response(&mut stream).await;
    assert_eq!(
        text(&failed),
        "Not enough buffer was provided to parse client data subscription."
    );

    // Zero length connection string, with and without trailing bytes
    let mut body = vec![0u8];
    body.put_u32(0);
    body.put_u8(0);
    send(&mut stream, SUBSCRIBE, body).await;
    let failed = read_response(&mut stream).await;
    assert_eq!(
        text(&failed),
        "Cannot initialize client data subscription without a connection string."
    );

    let mut body = vec![0u8];
    body.put_u32(0);
    send(&mut stream, SUBSCRIBE, body).await;
    let failed = read_response(&mut stream).await;
    assert_eq!(failed.response, ServerResponse::Failed);
    assert_eq!(
        text(&failed),
        "Cannot initialize client data subscription without a connection string."
    );

    assert!(connection.is_subscribed());
    assert!(Arc::ptr_eq(&cache, &connection.signal_index_cache()));
}

#[tokio::test]
async fn test_oversized_compact_subscription_rejected() {
    let (publisher, addr, events) = start_publisher(test_config()).await;

    let devices = [DeviceMetadata {
        acronym: "SHELBY".to_string(),
        name: "Shelby".to_string(),
        ..Default::default()
    }];
    let measurements: Vec<MeasurementMetadata> = (1..=65_537u32)
        .map(|i| MeasurementMetadata {
            device_acronym: "SHELBY".to_string(),
            id: format!("PPA:{}", i),
            signal_id: Uuid::from_u128(u128::from(i)),
            point_tag: format!("SHELBY:{}", i),
            ..Default::default()
        })
        .collect();
    publisher
        .define_metadata_records(&devices, &measurements, &[], 1)
        .unwrap();

    let mut stream = connected_client(&publisher, addr, &events).await;
    let connection = publisher.connections()[0].clone();

    let body = subscribe_body(
        data_packet_flags::COMPACT,
        "includeTime=false; inputMeasurementKeys={FILTER ActiveMeasurements WHERE Device = 'SHELBY'}",
    );
    send(&mut stream, SUBSCRIBE, body).await;

    let failed = read_response_within(&mut stream, Duration::from_secs(30)).await;
    assert_eq!(failed.response, ServerResponse::Failed);
    assert_eq!(
        text(&failed),
        "Compact measurement format supports at most 65536 signals but the subscription selected 65537."
    );

    // Rejected after the cache was built, yet nothing on the connection changed
    let settings = connection.settings();
    assert!(settings.include_time);
    assert!(!settings.is_subscribed);
    assert_eq!(connection.signal_index_cache().count(), 0);
    assert!(wait_for(|| events.has_error("Compact measurement format")).await);
}

#[tokio::test]
async fn test_bad_filter_expression_fails_subscribe() {
    let (publisher, addr, events) = start_publisher(test_config()).await;
    let mut stream = connected_client(&publisher, addr, &events).await;

    let body = subscribe_body(
        0,
        "inputMeasurementKeys={FILTER ActiveMeasurements WHERE NoSuchColumn = 1}",
    );
    send(&mut stream, SUBSCRIBE, body).await;

    let failed = read_response(&mut stream).await;
    assert_eq!(failed.response, ServerResponse::Failed);
    assert!(text(&failed).starts_with("ExpressionTree exception: "));
    assert!(!publisher.connections()[0].is_subscribed());
    assert!(wait_for(|| events.has_error("ExpressionTree exception")).await);
}

// ============================================================================
// Command dispatch
// ============================================================================

#[tokio::test]
async fn test_unknown_command_keeps_connection_open() {
    let (publisher, addr, events) = start_publisher(test_config()).await;
    let mut stream = connected_client(&publisher, addr, &events).await;

    send(&mut stream, 0xFE, vec![1, 2, 3]).await;

    let failed = read_response(&mut stream).await;
    assert_eq!(failed.response, ServerResponse::Failed);
    assert_eq!(failed.command, 0xFE);
    assert!(text(&failed).contains("sent an unrecognized server command: 0xFE"));
    assert!(wait_for(|| events.has_error("0xFE")).await);

    // Still reading
    send(&mut stream, SUBSCRIBE, subscribe_body(0, "includeTime=true")).await;
    let update = read_response(&mut stream).await;
    assert_eq!(update.response, ServerResponse::UpdateSignalIndexCache);
    let succeeded = read_response(&mut stream).await;
    assert_eq!(
        text(&succeeded),
        "Client subscribed as non-compact unsynchronized with 0 signals."
    );
    assert_eq!(publisher.connection_count(), 1);
}

#[tokio::test]
async fn test_operational_modes() {
    let (publisher, addr, events) = start_publisher(test_config()).await;
    let mut stream = connected_client(&publisher, addr, &events).await;
    let connection = publisher.connections()[0].clone();

    send(
        &mut stream,
        DEFINE_OPERATIONAL_MODES,
        modes_body(OperationalEncoding::UNICODE | OperationalModes::USE_COMMON_SERIALIZATION_FORMAT),
    )
    .await;
    assert!(wait_for(|| connection.encoding() == OperationalEncoding::Unicode).await);

    // Version bits are applied but reported
    send(&mut stream, DEFINE_OPERATIONAL_MODES, modes_body(COMMON_FORMAT | 0x01)).await;
    assert!(wait_for(|| connection.encoding() == OperationalEncoding::Utf8).await);
    assert!(wait_for(|| events.has_status("Protocol version not supported")).await);

    send(&mut stream, DEFINE_OPERATIONAL_MODES, vec![0u8, 1]).await;
    let failed = read_response(&mut stream).await;
    assert_eq!(failed.response, ServerResponse::Failed);
    assert_eq!(failed.command, DEFINE_OPERATIONAL_MODES);
    assert_eq!(connection.operational_modes(), OperationalModes(COMMON_FORMAT | 0x01));
}

// ============================================================================
// Metadata refresh
// ============================================================================

#[tokio::test]
async fn test_metadata_refresh_returns_catalog() {
    let (publisher, addr, events) = start_publisher(test_config()).await;
    let mut stream = connected_client(&publisher, addr, &events).await;

    send(&mut stream, DEFINE_OPERATIONAL_MODES, modes_body(COMMON_FORMAT)).await;
    send(&mut stream, METADATA_REFRESH, Bytes::new()).await;

    let response = read_response(&mut stream).await;
    assert_eq!(response.response, ServerResponse::Succeeded);
    assert_eq!(response.command, METADATA_REFRESH);

    let xml = text(&response);
    assert!(xml.starts_with("<?xml"));
    assert!(xml.contains("<ID>PPA:1</ID>"));
    assert!(xml.contains("<ID>PPA:2</ID>"));
    assert!(xml.contains("<Acronym>SHELBY</Acronym>"));

    assert!(wait_for(|| events.has_status("Received meta-data refresh request")).await);
    assert!(wait_for(|| events.has_status("tables of meta-data prepared in")).await);
}

#[tokio::test]
async fn test_metadata_refresh_applies_client_filter() {
    let (publisher, addr, events) = start_publisher(test_config()).await;
    let mut stream = connected_client(&publisher, addr, &events).await;

    send(&mut stream, DEFINE_OPERATIONAL_MODES, modes_body(COMMON_FORMAT)).await;
    send(
        &mut stream,
        METADATA_REFRESH,
        refresh_body("FILTER MeasurementDetail WHERE ID = 'PPA:2'"),
    )
    .await;

    let xml = text(&read_response(&mut stream).await);
    assert!(xml.contains("<ID>PPA:2</ID>"));
    assert!(!xml.contains("<ID>PPA:1</ID>"));
    assert!(xml.contains("<Acronym>SHELBY</Acronym>"));

    // The shared catalog is untouched
    let catalog = publisher.metadata();
    assert_eq!(catalog.all.table("MeasurementDetail").unwrap().row_count(), 2);
}

#[tokio::test]
async fn test_metadata_refresh_unparseable_filter_sends_everything() {
    let (publisher, addr, events) = start_publisher(test_config()).await;
    let mut stream = connected_client(&publisher, addr, &events).await;

    send(&mut stream, DEFINE_OPERATIONAL_MODES, modes_body(COMMON_FORMAT)).await;
    send(
        &mut stream,
        METADATA_REFRESH,
        refresh_body("FILTER MeasurementDetail WHERE ("),
    )
    .await;

    let response = read_response(&mut stream).await;
    assert_eq!(response.response, ServerResponse::Succeeded);
    let xml = text(&response);
    assert!(xml.contains("<ID>PPA:1</ID>"));
    assert!(xml.contains("<ID>PPA:2</ID>"));
    assert!(wait_for(|| events.has_error("Failed to parse subscriber provided meta-data filter expressions")).await);
}

#[tokio::test]
async fn test_metadata_refresh_compressed() {
    let (publisher, addr, events) = start_publisher(test_config()).await;
    let mut stream = connected_client(&publisher, addr, &events).await;

    let modes = COMMON_FORMAT | OperationalModes::COMPRESS_METADATA | compression_modes::GZIP;
    send(&mut stream, DEFINE_OPERATIONAL_MODES, modes_body(modes)).await;
    send(&mut stream, METADATA_REFRESH, Bytes::new()).await;

    let response = read_response(&mut stream).await;
    assert_eq!(response.response, ServerResponse::Succeeded);

    let xml = String::from_utf8(compression::gunzip(&response.data).unwrap()).unwrap();
    assert!(xml.contains("<ID>PPA:1</ID>"));
}

#[tokio::test]
async fn test_metadata_refresh_requires_common_format() {
    let (publisher, addr, events) = start_publisher(test_config()).await;
    let mut stream = connected_client(&publisher, addr, &events).await;

    send(&mut stream, METADATA_REFRESH, Bytes::new()).await;

    let failed = read_response(&mut stream).await;
    assert_eq!(failed.response, ServerResponse::Failed);
    assert_eq!(failed.command, METADATA_REFRESH);
    assert_eq!(
        text(&failed),
        "Failed to transfer meta-data due to exception: DataPublisher only supports common serialization format"
    );
    assert!(wait_for(|| events.has_error("Failed to transfer meta-data")).await);
}

#[tokio::test]
async fn test_metadata_refresh_disallowed() {
    let (publisher, addr, events) = start_publisher(test_config()).await;
    publisher.set_metadata_refresh_allowed(false);
    let mut stream = connected_client(&publisher, addr, &events).await;

    send(&mut stream, DEFINE_OPERATIONAL_MODES, modes_body(COMMON_FORMAT)).await;
    send(&mut stream, METADATA_REFRESH, Bytes::new()).await;

    let failed = read_response(&mut stream).await;
    assert_eq!(failed.response, ServerResponse::Failed);
    assert_eq!(
        text(&failed),
        "Meta-data refresh has been disallowed by the DataPublisher."
    );
    assert!(!events.has_status("Received meta-data refresh request"));
}

// ============================================================================
// Measurement routing
// ============================================================================

#[tokio::test]
async fn test_publish_measurements_routes_by_cache() {
    let (publisher, addr, events) = start_publisher(test_config()).await;
    let mut subscribed = connected_client(&publisher, addr, &events).await;
    let _idle = connected_client(&publisher, addr, &events).await;

    send(
        &mut subscribed,
        SUBSCRIBE,
        subscribe_body(data_packet_flags::COMPACT, "includeTime=false; inputMeasurementKeys={PPA:2}"),
    )
    .await;
    read_response(&mut subscribed).await;
    read_response(&mut subscribed).await;

    let now = chrono::Utc::now();
    let routed = publisher
        .publish_measurements(&[
            Measurement::new(Uuid::from_u128(100), 60.0, now),
            Measurement::new(Uuid::from_u128(101), 0.25, now),
        ])
        .await;
    assert_eq!(routed, 1);

    let packet = read_response(&mut subscribed).await;
    assert_eq!(packet.response, ServerResponse::DataPacket);
    assert_eq!(packet.command, SUBSCRIBE);
    assert_eq!(packet.data[0], data_packet_flags::COMPACT);
    assert_eq!(&packet.data[1..5], &[0, 0, 0, 1]);
    assert_eq!(&packet.data[6..8], &[0, 0]);
    assert_eq!(&packet.data[8..12], &0.25f32.to_be_bytes());

    assert_eq!(publisher.total_measurements_sent(), 1);
    assert!(publisher.total_data_channel_bytes_sent() > 0);
    assert!(publisher.total_command_channel_bytes_sent() > 0);
}
