//! Error types for GEP wire handling

use thiserror::Error;

/// Result type alias for GEP wire operations
pub type Result<T> = std::result::Result<T, Error>;

/// GEP wire error types
#[derive(Error, Debug)]
pub enum Error {
    /// Buffer shorter than the structure being decoded
    #[error("buffer too small: need {needed} bytes, have {have}")]
    BufferTooSmall { needed: usize, have: usize },

    /// Frame data larger than the 32-bit length field allows
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    /// Command frame declared an empty payload
    #[error("command frame carries no command code")]
    EmptyCommand,

    /// Unrecognized server command code
    #[error("unknown server command: 0x{0:02X}")]
    UnknownCommand(u8),

    /// Unrecognized server response code
    #[error("unknown server response: 0x{0:02X}")]
    UnknownResponse(u8),

    /// Negotiated text encoding is not one of the supported values
    #[error("Encountered unexpected operational encoding 0x{0:X}")]
    UnexpectedEncoding(u32),

    /// Text could not be decoded with the negotiated encoding
    #[error("invalid {encoding} text: {reason}")]
    InvalidText {
        encoding: &'static str,
        reason: String,
    },

    /// Compression stream failure
    #[error("compression error: {0}")]
    Compression(#[from] std::io::Error),

    /// Generic protocol error
    #[error("protocol error: {0}")]
    Protocol(String),
}
