//! Client string encoding
//!
//! Strings exchanged with a subscriber use the text encoding negotiated through
//! its operational modes. UTF-16 code units are assembled with explicit byte order,
//! so the host's native endianness never leaks onto the wire.

use crate::{Error, OperationalEncoding, Result};

/// Decode subscriber-supplied bytes into a string
pub fn decode_client_string(encoding: OperationalEncoding, data: &[u8]) -> Result<String> {
    match encoding {
        OperationalEncoding::Utf8 => String::from_utf8(data.to_vec()).map_err(|e| Error::InvalidText {
            encoding: encoding.name(),
            reason: e.to_string(),
        }),
        OperationalEncoding::Unicode | OperationalEncoding::Ansi => decode_utf16(encoding, data, u16::from_le_bytes),
        OperationalEncoding::BigEndianUnicode => decode_utf16(encoding, data, u16::from_be_bytes),
    }
}

/// Encode a string for transmission to a subscriber
pub fn encode_client_string(encoding: OperationalEncoding, value: &str) -> Vec<u8> {
    match encoding {
        OperationalEncoding::Utf8 => value.as_bytes().to_vec(),
        OperationalEncoding::Unicode | OperationalEncoding::Ansi => {
            value.encode_utf16().flat_map(u16::to_le_bytes).collect()
        }
        OperationalEncoding::BigEndianUnicode => {
            value.encode_utf16().flat_map(u16::to_be_bytes).collect()
        }
    }
}

fn decode_utf16(
    encoding: OperationalEncoding,
    data: &[u8],
    unit: fn([u8; 2]) -> u16,
) -> Result<String> {
    if data.len() % 2 != 0 {
        return Err(Error::InvalidText {
            encoding: encoding.name(),
            reason: format!("odd byte length {}", data.len()),
        });
    }

    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|pair| unit([pair[0], pair[1]]))
        .collect();

    String::from_utf16(&units).map_err(|e| Error::InvalidText {
        encoding: encoding.name(),
        reason: e.to_string(),
    })
}
