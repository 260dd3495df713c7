//! GEP Core
//!
//! Wire-level building blocks for the Gateway Exchange Protocol (GEP) publisher.
//!
//! This crate provides:
//! - Command and response codes, operational mode bits ([`types`])
//! - Command and response framing ([`frame`])
//! - Client string encoding for the four negotiated text encodings ([`encoding`])
//! - Connection-string settings parsing ([`settings`])
//! - The per-subscription [`SignalIndexCache`] and its binary image

pub mod compression;
pub mod encoding;
pub mod error;
pub mod frame;
pub mod settings;
pub mod signal_index;
pub mod types;

pub use encoding::{decode_client_string, encode_client_string};
pub use error::{Error, Result};
pub use frame::{CommandFrame, ResponseFrame};
pub use settings::Settings;
pub use signal_index::{MeasurementKey, SignalIndexCache};
pub use types::*;

/// Size of the fixed header preceding every command payload
pub const PAYLOAD_HEADER_SIZE: usize = 8;

/// Offset of the little-endian payload size within the command header
pub const PACKET_SIZE_OFFSET: usize = 4;

/// Initial capacity of a connection's read buffer
pub const MAX_PACKET_SIZE: usize = 32768;

/// Deprecated alignment marker that prefixes every frame
pub const PAYLOAD_MARKER: [u8; 4] = [0xAA, 0xBB, 0xCC, 0xDD];

/// Default command channel port
pub const DEFAULT_PORT: u16 = 6165;

/// .NET ticks (100ns) between 0001-01-01 and the Unix epoch
pub const UNIX_BASE_OFFSET_TICKS: i64 = 621_355_968_000_000_000;
