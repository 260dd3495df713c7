//! Command and response framing
//!
//! Inbound command frame (subscriber to publisher):
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Bytes 0-3:  Alignment marker AA BB CC DD (deprecated)        │
//! │ Bytes 4-7:  Payload size (uint32 little-endian)              │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Byte 8:     Command code                                     │
//! │ Bytes 9..:  Command body                                     │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Outbound response frame (publisher to subscriber):
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Bytes 0-3:  Alignment marker AA BB CC DD (deprecated)        │
//! │ Bytes 4-7:  Packet size = data length + 6 (little-endian)    │
//! │ Byte 8:     Response code                                    │
//! │ Byte 9:     Echoed command code                              │
//! │ Bytes 10-13: Data length (uint32 big-endian)                 │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Data                                                         │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{Error, Result, ServerResponse, PACKET_SIZE_OFFSET, PAYLOAD_HEADER_SIZE, PAYLOAD_MARKER};

/// Response code, echoed command code and data length field
pub const RESPONSE_PREFIX_SIZE: usize = 6;

/// Total fixed bytes in front of response data
pub const RESPONSE_HEADER_SIZE: usize = PAYLOAD_HEADER_SIZE + RESPONSE_PREFIX_SIZE;

/// A frame sent from the publisher to a subscriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    pub response: ServerResponse,
    /// Command code being answered, kept raw so unknown codes can be echoed
    pub command: u8,
    pub data: Bytes,
}

impl ResponseFrame {
    pub fn new(response: ServerResponse, command: u8, data: impl Into<Bytes>) -> Self {
        Self {
            response,
            command,
            data: data.into(),
        }
    }

    /// Value written into the packet size field
    pub fn packet_size(&self) -> usize {
        self.data.len() + RESPONSE_PREFIX_SIZE
    }

    /// Total encoded size
    pub fn size(&self) -> usize {
        RESPONSE_HEADER_SIZE + self.data.len()
    }

    /// Encode frame to bytes
    pub fn encode(&self) -> Result<Bytes> {
        if self.packet_size() > u32::MAX as usize {
            return Err(Error::PayloadTooLarge(self.data.len()));
        }

        let mut buf = BytesMut::with_capacity(self.size());

        buf.extend_from_slice(&PAYLOAD_MARKER);
        buf.put_u32_le(self.packet_size() as u32);
        buf.put_u8(self.response.as_u8());
        buf.put_u8(self.command);

        // An empty body still carries an explicit zero length
        buf.put_u32(self.data.len() as u32);
        buf.extend_from_slice(&self.data);

        Ok(buf.freeze())
    }

    /// Decode frame from bytes
    pub fn decode(mut buf: impl Buf) -> Result<Self> {
        if buf.remaining() < RESPONSE_HEADER_SIZE {
            return Err(Error::BufferTooSmall {
                needed: RESPONSE_HEADER_SIZE,
                have: buf.remaining(),
            });
        }

        let mut marker = [0u8; 4];
        buf.copy_to_slice(&mut marker);
        if marker != PAYLOAD_MARKER {
            return Err(Error::Protocol(format!(
                "invalid frame marker {:02X}{:02X}{:02X}{:02X}",
                marker[0], marker[1], marker[2], marker[3]
            )));
        }

        let packet_size = buf.get_u32_le() as usize;
        let response = ServerResponse::try_from(buf.get_u8())?;
        let command = buf.get_u8();
        let data_len = buf.get_u32() as usize;

        if packet_size != data_len + RESPONSE_PREFIX_SIZE {
            return Err(Error::Protocol(format!(
                "packet size {} does not match data length {}",
                packet_size, data_len
            )));
        }

        if buf.remaining() < data_len {
            return Err(Error::BufferTooSmall {
                needed: RESPONSE_HEADER_SIZE + data_len,
                have: RESPONSE_HEADER_SIZE + buf.remaining(),
            });
        }

        let data = buf.copy_to_bytes(data_len);

        Ok(Self {
            response,
            command,
            data,
        })
    }

    /// Check if buffer contains a complete response frame
    pub fn check_complete(buf: &[u8]) -> Option<usize> {
        if buf.len() < PAYLOAD_HEADER_SIZE {
            return None;
        }

        let packet_size = read_packet_size(buf);
        let total_size = PAYLOAD_HEADER_SIZE + packet_size;

        if buf.len() >= total_size {
            Some(total_size)
        } else {
            None
        }
    }
}

/// A command received from a subscriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    /// Raw command code, unknown codes are preserved
    pub command: u8,
    pub body: Bytes,
}

impl CommandFrame {
    pub fn new(command: u8, body: impl Into<Bytes>) -> Self {
        Self {
            command,
            body: body.into(),
        }
    }

    /// Read the declared payload size from a command header
    pub fn payload_size(header: &[u8]) -> Result<usize> {
        if header.len() < PAYLOAD_HEADER_SIZE {
            return Err(Error::BufferTooSmall {
                needed: PAYLOAD_HEADER_SIZE,
                have: header.len(),
            });
        }

        Ok(read_packet_size(header))
    }

    /// Split a payload into command code and body
    pub fn decode(mut payload: Bytes) -> Result<Self> {
        if payload.is_empty() {
            return Err(Error::EmptyCommand);
        }

        let command = payload.get_u8();
        Ok(Self {
            command,
            body: payload,
        })
    }

    /// Encode as a subscriber would send it
    pub fn encode(&self) -> Bytes {
        let payload_size = 1 + self.body.len();
        let mut buf = BytesMut::with_capacity(PAYLOAD_HEADER_SIZE + payload_size);

        buf.extend_from_slice(&PAYLOAD_MARKER);
        buf.put_u32_le(payload_size as u32);
        buf.put_u8(self.command);
        buf.extend_from_slice(&self.body);

        buf.freeze()
    }
}

fn read_packet_size(header: &[u8]) -> usize {
    let mut size = [0u8; 4];
    size.copy_from_slice(&header[PACKET_SIZE_OFFSET..PACKET_SIZE_OFFSET + 4]);
    u32::from_le_bytes(size) as usize
}
