//! Protocol codes and negotiated-mode bit fields

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Error, Result};

/// Commands a subscriber sends to the publisher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerCommand {
    /// Reserved for authenticated connections
    Connect,
    MetadataRefresh,
    Subscribe,
    Unsubscribe,
    RotateCipherKeys,
    UpdateProcessingInterval,
    DefineOperationalModes,
    ConfirmNotification,
    ConfirmBufferBlock,
    PublishCommandMeasurements,
    /// User command slot 0..=15
    UserCommand(u8),
}

impl ServerCommand {
    pub const USER_COMMAND_BASE: u8 = 0xD0;

    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(ServerCommand::Connect),
            0x01 => Some(ServerCommand::MetadataRefresh),
            0x02 => Some(ServerCommand::Subscribe),
            0x03 => Some(ServerCommand::Unsubscribe),
            0x04 => Some(ServerCommand::RotateCipherKeys),
            0x05 => Some(ServerCommand::UpdateProcessingInterval),
            0x06 => Some(ServerCommand::DefineOperationalModes),
            0x07 => Some(ServerCommand::ConfirmNotification),
            0x08 => Some(ServerCommand::ConfirmBufferBlock),
            0x09 => Some(ServerCommand::PublishCommandMeasurements),
            0xD0..=0xDF => Some(ServerCommand::UserCommand(code - Self::USER_COMMAND_BASE)),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            ServerCommand::Connect => 0x00,
            ServerCommand::MetadataRefresh => 0x01,
            ServerCommand::Subscribe => 0x02,
            ServerCommand::Unsubscribe => 0x03,
            ServerCommand::RotateCipherKeys => 0x04,
            ServerCommand::UpdateProcessingInterval => 0x05,
            ServerCommand::DefineOperationalModes => 0x06,
            ServerCommand::ConfirmNotification => 0x07,
            ServerCommand::ConfirmBufferBlock => 0x08,
            ServerCommand::PublishCommandMeasurements => 0x09,
            ServerCommand::UserCommand(slot) => Self::USER_COMMAND_BASE + (slot & 0x0F),
        }
    }
}

impl TryFrom<u8> for ServerCommand {
    type Error = Error;

    fn try_from(code: u8) -> Result<Self> {
        Self::from_u8(code).ok_or(Error::UnknownCommand(code))
    }
}

impl fmt::Display for ServerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerCommand::UserCommand(slot) => write!(f, "UserCommand{:02}", slot),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Responses the publisher sends to a subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerResponse {
    Succeeded,
    Failed,
    DataPacket,
    UpdateSignalIndexCache,
    UpdateBaseTimes,
    UpdateCipherKeys,
    DataStartTime,
    ProcessingComplete,
    BufferBlock,
    Notify,
    ConfigurationChanged,
    /// User response slot 0..=15
    UserResponse(u8),
    NoOp,
}

impl ServerResponse {
    pub const USER_RESPONSE_BASE: u8 = 0xE0;

    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x80 => Some(ServerResponse::Succeeded),
            0x81 => Some(ServerResponse::Failed),
            0x82 => Some(ServerResponse::DataPacket),
            0x83 => Some(ServerResponse::UpdateSignalIndexCache),
            0x84 => Some(ServerResponse::UpdateBaseTimes),
            0x85 => Some(ServerResponse::UpdateCipherKeys),
            0x86 => Some(ServerResponse::DataStartTime),
            0x87 => Some(ServerResponse::ProcessingComplete),
            0x88 => Some(ServerResponse::BufferBlock),
            0x89 => Some(ServerResponse::Notify),
            0x8A => Some(ServerResponse::ConfigurationChanged),
            0xE0..=0xEF => Some(ServerResponse::UserResponse(code - Self::USER_RESPONSE_BASE)),
            0xFF => Some(ServerResponse::NoOp),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            ServerResponse::Succeeded => 0x80,
            ServerResponse::Failed => 0x81,
            ServerResponse::DataPacket => 0x82,
            ServerResponse::UpdateSignalIndexCache => 0x83,
            ServerResponse::UpdateBaseTimes => 0x84,
            ServerResponse::UpdateCipherKeys => 0x85,
            ServerResponse::DataStartTime => 0x86,
            ServerResponse::ProcessingComplete => 0x87,
            ServerResponse::BufferBlock => 0x88,
            ServerResponse::Notify => 0x89,
            ServerResponse::ConfigurationChanged => 0x8A,
            ServerResponse::UserResponse(slot) => Self::USER_RESPONSE_BASE + (slot & 0x0F),
            ServerResponse::NoOp => 0xFF,
        }
    }

    /// Responses that belong on the data channel rather than the command channel
    pub fn is_data_channel(self) -> bool {
        matches!(self, ServerResponse::DataPacket | ServerResponse::BufferBlock)
    }
}

impl TryFrom<u8> for ServerResponse {
    type Error = Error;

    fn try_from(code: u8) -> Result<Self> {
        Self::from_u8(code).ok_or(Error::UnknownResponse(code))
    }
}

/// Data packet / subscribe flag bits
pub mod data_packet_flags {
    pub const NO_FLAGS: u8 = 0x00;
    pub const SYNCHRONIZED: u8 = 0x01;
    pub const COMPACT: u8 = 0x02;
    pub const CIPHER_INDEX: u8 = 0x04;
    pub const COMPRESSED: u8 = 0x08;
}

/// Compression mode bits carried inside the operational modes word
pub mod compression_modes {
    pub const NONE: u32 = 0x0000_0000;
    pub const GZIP: u32 = 0x0000_0020;
    pub const TSSC: u32 = 0x0000_0040;
}

/// Text encoding negotiated through the operational modes word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OperationalEncoding {
    /// UTF-16 little-endian
    Unicode,
    /// UTF-16 big-endian
    BigEndianUnicode,
    #[default]
    Utf8,
    /// Legacy mode, carried as UTF-16 little-endian
    Ansi,
}

impl OperationalEncoding {
    pub const UNICODE: u32 = 0x0000_0000;
    pub const BIG_ENDIAN_UNICODE: u32 = 0x0000_0100;
    pub const UTF8: u32 = 0x0000_0200;
    pub const ANSI: u32 = 0x0000_0300;

    pub fn from_bits(bits: u32) -> Result<Self> {
        match bits {
            Self::UNICODE => Ok(OperationalEncoding::Unicode),
            Self::BIG_ENDIAN_UNICODE => Ok(OperationalEncoding::BigEndianUnicode),
            Self::UTF8 => Ok(OperationalEncoding::Utf8),
            Self::ANSI => Ok(OperationalEncoding::Ansi),
            other => Err(Error::UnexpectedEncoding(other)),
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            OperationalEncoding::Unicode => Self::UNICODE,
            OperationalEncoding::BigEndianUnicode => Self::BIG_ENDIAN_UNICODE,
            OperationalEncoding::Utf8 => Self::UTF8,
            OperationalEncoding::Ansi => Self::ANSI,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            OperationalEncoding::Unicode => "Unicode",
            OperationalEncoding::BigEndianUnicode => "BigEndianUnicode",
            OperationalEncoding::Utf8 => "UTF8",
            OperationalEncoding::Ansi => "ANSI",
        }
    }
}

/// Operational modes word negotiated per connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OperationalModes(pub u32);

impl OperationalModes {
    pub const NO_FLAGS: u32 = 0x0000_0000;
    pub const VERSION_MASK: u32 = 0x0000_001F;
    pub const COMPRESSION_MODE_MASK: u32 = 0x0000_00E0;
    pub const ENCODING_MASK: u32 = 0x0000_0300;
    pub const USE_COMMON_SERIALIZATION_FORMAT: u32 = 0x0100_0000;
    pub const RECEIVE_EXTERNAL_METADATA: u32 = 0x0200_0000;
    pub const RECEIVE_INTERNAL_METADATA: u32 = 0x0400_0000;
    pub const COMPRESS_PAYLOAD_DATA: u32 = 0x2000_0000;
    pub const COMPRESS_SIGNAL_INDEX_CACHE: u32 = 0x4000_0000;
    pub const COMPRESS_METADATA: u32 = 0x8000_0000;

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn version(self) -> u32 {
        self.0 & Self::VERSION_MASK
    }

    pub fn compression_modes(self) -> u32 {
        self.0 & Self::COMPRESSION_MODE_MASK
    }

    pub fn encoding(self) -> Result<OperationalEncoding> {
        OperationalEncoding::from_bits(self.0 & Self::ENCODING_MASK)
    }

    pub fn uses_gzip(self) -> bool {
        self.compression_modes() & compression_modes::GZIP != 0
    }

    pub fn use_common_serialization_format(self) -> bool {
        self.0 & Self::USE_COMMON_SERIALIZATION_FORMAT != 0
    }

    pub fn compress_payload_data(self) -> bool {
        self.0 & Self::COMPRESS_PAYLOAD_DATA != 0
    }

    pub fn compress_signal_index_cache(self) -> bool {
        self.0 & Self::COMPRESS_SIGNAL_INDEX_CACHE != 0
    }

    pub fn compress_metadata(self) -> bool {
        self.0 & Self::COMPRESS_METADATA != 0
    }
}

impl From<u32> for OperationalModes {
    fn from(bits: u32) -> Self {
        OperationalModes(bits)
    }
}

/// Publisher security mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityMode {
    /// Unauthenticated, unencrypted command channel
    #[default]
    None,
    /// Mutually authenticated TLS (reserved)
    Tls,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_codes_roundtrip() {
        for code in 0u8..=0xFF {
            if let Some(command) = ServerCommand::from_u8(code) {
                assert_eq!(command.as_u8(), code);
            }
        }
        assert_eq!(ServerCommand::from_u8(0xD5), Some(ServerCommand::UserCommand(5)));
        assert_eq!(ServerCommand::from_u8(0xFE), None);
    }

    #[test]
    fn test_response_codes() {
        assert_eq!(ServerResponse::NoOp.as_u8(), 0xFF);
        assert_eq!(ServerResponse::from_u8(0x83), Some(ServerResponse::UpdateSignalIndexCache));
        assert!(ServerResponse::DataPacket.is_data_channel());
        assert!(!ServerResponse::Succeeded.is_data_channel());
    }

    #[test]
    fn test_operational_modes() {
        let modes = OperationalModes(
            OperationalModes::USE_COMMON_SERIALIZATION_FORMAT
                | OperationalModes::COMPRESS_METADATA
                | compression_modes::GZIP
                | OperationalEncoding::BIG_ENDIAN_UNICODE
                | 0x02,
        );

        assert_eq!(modes.version(), 2);
        assert!(modes.uses_gzip());
        assert!(modes.compress_metadata());
        assert!(!modes.compress_payload_data());
        assert_eq!(modes.encoding().unwrap(), OperationalEncoding::BigEndianUnicode);
    }

    #[test]
    fn test_unexpected_encoding() {
        let err = OperationalEncoding::from_bits(0x400).unwrap_err();
        assert!(err.to_string().contains("0x400"));
    }
}
