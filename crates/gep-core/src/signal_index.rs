//! Signal index cache
//!
//! Each subscription gets its own cache mapping compact wire indices to the
//! signals it selected. Indices are dense, starting at zero, in selection order.
//! A cache is immutable once built and is replaced wholesale on re-subscribe.
//!
//! Binary image:
//! ```text
//! [4B BE image length][16B subscriber id][4B BE reference count]
//! per reference: [4B BE index][16B signal id][4B BE source length][source][4B BE id]
//! [4B BE unauthorized count]
//! ```

use bytes::{Buf, BufMut, BytesMut};
use std::collections::HashMap;
use uuid::Uuid;

use crate::{decode_client_string, encode_client_string, Error, OperationalEncoding, Result};

/// The signal behind one subscription index
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MeasurementKey {
    pub signal_id: Uuid,
    pub source: String,
    pub id: u32,
}

impl MeasurementKey {
    /// Split a `SOURCE:ID` key. Anything other than two parts is all source, id 0.
    pub fn parse_key(key: &str) -> Result<(String, u32)> {
        let parts: Vec<&str> = key.split(':').collect();

        if parts.len() == 2 {
            let id = parts[1].trim().parse::<u32>().map_err(|_| {
                Error::Protocol(format!("invalid measurement key \"{}\": bad numeric id", key))
            })?;
            Ok((parts[0].to_string(), id))
        } else {
            Ok((key.to_string(), 0))
        }
    }
}

/// Ordered subscription index to signal mapping
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignalIndexCache {
    subscriber_id: Uuid,
    references: Vec<MeasurementKey>,
    indices: HashMap<Uuid, u32>,
}

impl SignalIndexCache {
    pub fn new(subscriber_id: Uuid) -> Self {
        Self {
            subscriber_id,
            references: Vec::new(),
            indices: HashMap::new(),
        }
    }

    pub fn subscriber_id(&self) -> Uuid {
        self.subscriber_id
    }

    /// Append a signal and return the index it was assigned
    pub fn add_measurement_key(&mut self, signal_id: Uuid, source: impl Into<String>, id: u32) -> u32 {
        let index = self.references.len() as u32;

        self.references.push(MeasurementKey {
            signal_id,
            source: source.into(),
            id,
        });

        // First occurrence keeps its index for reverse lookups
        self.indices.entry(signal_id).or_insert(index);
        index
    }

    pub fn count(&self) -> usize {
        self.references.len()
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }

    pub fn record(&self, index: u32) -> Option<&MeasurementKey> {
        self.references.get(index as usize)
    }

    pub fn signal_id(&self, index: u32) -> Option<Uuid> {
        self.record(index).map(|key| key.signal_id)
    }

    pub fn signal_index(&self, signal_id: &Uuid) -> Option<u32> {
        self.indices.get(signal_id).copied()
    }

    pub fn contains(&self, signal_id: &Uuid) -> bool {
        self.indices.contains_key(signal_id)
    }

    /// Iterate `(index, key)` pairs in index order
    pub fn iter(&self) -> impl Iterator<Item = (u32, &MeasurementKey)> {
        self.references.iter().enumerate().map(|(i, key)| (i as u32, key))
    }

    /// Serialize the cache, encoding sources with the subscriber's text encoding
    pub fn encode(&self, encoding: OperationalEncoding) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(28 + self.references.len() * 40);

        // Length placeholder
        buf.put_u32(0);
        buf.extend_from_slice(self.subscriber_id.as_bytes());
        buf.put_u32(self.references.len() as u32);

        for (index, key) in self.iter() {
            let source = encode_client_string(encoding, &key.source);
            buf.put_u32(index);
            buf.extend_from_slice(key.signal_id.as_bytes());
            buf.put_u32(source.len() as u32);
            buf.extend_from_slice(&source);
            buf.put_u32(key.id);
        }

        // No unauthorized signals are tracked
        buf.put_u32(0);

        let length = buf.len() as u32;
        buf[..4].copy_from_slice(&length.to_be_bytes());
        buf.to_vec()
    }

    /// Parse a binary image produced by [`SignalIndexCache::encode`]
    pub fn decode(data: &[u8], encoding: OperationalEncoding) -> Result<Self> {
        let mut buf = data;

        ensure(buf, 24)?;
        let length = buf.get_u32() as usize;
        if length > data.len() {
            return Err(Error::BufferTooSmall {
                needed: length,
                have: data.len(),
            });
        }

        let subscriber_id = read_uuid(&mut buf)?;
        let count = buf.get_u32() as usize;
        let mut cache = SignalIndexCache::new(subscriber_id);

        for expected in 0..count {
            ensure(buf, 24)?;
            let index = buf.get_u32() as usize;
            if index != expected {
                return Err(Error::Protocol(format!(
                    "signal index {} out of sequence, expected {}",
                    index, expected
                )));
            }

            let signal_id = read_uuid(&mut buf)?;
            let source_len = buf.get_u32() as usize;
            ensure(buf, source_len + 4)?;
            let source = decode_client_string(encoding, &buf[..source_len])?;
            buf.advance(source_len);
            let id = buf.get_u32();

            cache.add_measurement_key(signal_id, source, id);
        }

        Ok(cache)
    }
}

fn ensure(buf: &[u8], needed: usize) -> Result<()> {
    if buf.len() < needed {
        return Err(Error::BufferTooSmall {
            needed,
            have: buf.len(),
        });
    }
    Ok(())
}

fn read_uuid(buf: &mut &[u8]) -> Result<Uuid> {
    ensure(*buf, 16)?;
    let mut bytes = [0u8; 16];
    buf.copy_to_slice(&mut bytes);
    Ok(Uuid::from_bytes(bytes))
}
