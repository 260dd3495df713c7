//! Measurements and data packet encoding

use bytes::BufMut;
use chrono::{DateTime, Utc};
use gep_core::{data_packet_flags, SignalIndexCache, UNIX_BASE_OFFSET_TICKS};
use uuid::Uuid;

const TICKS_PER_SECOND: i64 = 10_000_000;
const TICKS_PER_MILLISECOND: i64 = 10_000;

/// Compact packets carry the signal index in 16 bits
pub const MAX_COMPACT_SIGNALS: usize = u16::MAX as usize + 1;

/// One time-series value
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub signal_id: Uuid,
    pub value: f64,
    /// 100-nanosecond ticks since 0001-01-01 UTC
    pub timestamp: i64,
    pub flags: u32,
}

impl Measurement {
    pub fn new(signal_id: Uuid, value: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            signal_id,
            value,
            timestamp: to_ticks(timestamp),
            flags: 0,
        }
    }

    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    pub fn unix_millis(&self) -> i64 {
        (self.timestamp - UNIX_BASE_OFFSET_TICKS) / TICKS_PER_MILLISECOND
    }
}

/// Convert a UTC time to ticks
pub fn to_ticks(time: DateTime<Utc>) -> i64 {
    UNIX_BASE_OFFSET_TICKS
        + time.timestamp() * TICKS_PER_SECOND
        + i64::from(time.timestamp_subsec_nanos()) / 100
}

/// Per-subscription packet layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketFormat {
    pub compact: bool,
    pub include_time: bool,
    pub use_millisecond_resolution: bool,
}

/// Encode the measurements a subscription can see into a `DataPacket` body.
/// Returns `None` when none of them are in the cache. Compact packets leave out any
/// measurement whose index does not fit in 16 bits.
pub fn encode_data_packet(
    measurements: &[Measurement],
    cache: &SignalIndexCache,
    format: PacketFormat,
    filter_nan: bool,
) -> Option<(Vec<u8>, usize)> {
    let selected: Vec<(u32, &Measurement)> = measurements
        .iter()
        .filter(|m| !(filter_nan && m.value.is_nan()))
        .filter_map(|m| cache.signal_index(&m.signal_id).map(|index| (index, m)))
        .filter(|(index, _)| !format.compact || u16::try_from(*index).is_ok())
        .collect();

    if selected.is_empty() {
        return None;
    }

    let mut buf = Vec::with_capacity(5 + selected.len() * 24);
    let flags = if format.compact {
        data_packet_flags::COMPACT
    } else {
        data_packet_flags::NO_FLAGS
    };

    buf.put_u8(flags);
    buf.put_u32(selected.len() as u32);

    for (index, measurement) in &selected {
        if format.compact {
            buf.put_u8(measurement.flags as u8);
            buf.put_u16(u16::try_from(*index).unwrap_or(u16::MAX));
            buf.put_f32(measurement.value as f32);

            if format.include_time {
                if format.use_millisecond_resolution {
                    buf.put_i64(measurement.unix_millis());
                } else {
                    buf.put_i64(measurement.timestamp);
                }
            }
        } else {
            buf.put_slice(measurement.signal_id.as_bytes());
            buf.put_f64(measurement.value);
            buf.put_i64(measurement.timestamp);
            buf.put_u32(measurement.flags);
        }
    }

    Some((buf, selected.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn cache() -> SignalIndexCache {
        let mut cache = SignalIndexCache::new(Uuid::nil());
        cache.add_measurement_key(Uuid::from_u128(1), "PPA", 1);
        cache.add_measurement_key(Uuid::from_u128(2), "PPA", 2);
        cache
    }

    #[test]
    fn test_ticks_at_unix_epoch() {
        let epoch = Utc.timestamp_opt(0, 0).unwrap();
        assert_eq!(to_ticks(epoch), UNIX_BASE_OFFSET_TICKS);

        let m = Measurement::new(Uuid::nil(), 1.0, Utc.timestamp_opt(1, 5_000_000).unwrap());
        assert_eq!(m.timestamp, UNIX_BASE_OFFSET_TICKS + 10_050_000);
        assert_eq!(m.unix_millis(), 1005);
    }

    #[test]
    fn test_compact_packet_layout() {
        let time = Utc.timestamp_opt(0, 0).unwrap();
        let measurements = [
            Measurement::new(Uuid::from_u128(2), 60.0, time).with_flags(0x1_03),
            Measurement::new(Uuid::from_u128(9), 1.0, time),
        ];
        let format = PacketFormat {
            compact: true,
            include_time: false,
            use_millisecond_resolution: false,
        };

        let (packet, count) = encode_data_packet(&measurements, &cache(), format, false).unwrap();

        assert_eq!(count, 1);
        assert_eq!(packet[0], data_packet_flags::COMPACT);
        assert_eq!(&packet[1..5], &[0, 0, 0, 1]);
        assert_eq!(packet[5], 0x03);
        assert_eq!(&packet[6..8], &[0, 1]);
        assert_eq!(&packet[8..12], &60.0f32.to_be_bytes());
        assert_eq!(packet.len(), 12);
    }

    #[test]
    fn test_compact_millisecond_timestamps() {
        let time = Utc.timestamp_opt(2, 0).unwrap();
        let measurements = [Measurement::new(Uuid::from_u128(1), 1.0, time)];
        let format = PacketFormat {
            compact: true,
            include_time: true,
            use_millisecond_resolution: true,
        };

        let (packet, _) = encode_data_packet(&measurements, &cache(), format, false).unwrap();
        assert_eq!(&packet[12..20], &2000i64.to_be_bytes());
    }

    #[test]
    fn test_full_packet_layout() {
        let time = Utc.timestamp_opt(0, 0).unwrap();
        let measurements = [Measurement::new(Uuid::from_u128(1), 2.5, time).with_flags(7)];
        let format = PacketFormat {
            compact: false,
            include_time: true,
            use_millisecond_resolution: false,
        };

        let (packet, _) = encode_data_packet(&measurements, &cache(), format, false).unwrap();

        assert_eq!(packet[0], data_packet_flags::NO_FLAGS);
        assert_eq!(&packet[5..21], Uuid::from_u128(1).as_bytes());
        assert_eq!(&packet[21..29], &2.5f64.to_be_bytes());
        assert_eq!(&packet[29..37], &UNIX_BASE_OFFSET_TICKS.to_be_bytes());
        assert_eq!(&packet[37..41], &7u32.to_be_bytes());
    }

    #[test]
    fn test_nan_filter() {
        let time = Utc.timestamp_opt(0, 0).unwrap();
        let measurements = [Measurement::new(Uuid::from_u128(1), f64::NAN, time)];
        let format = PacketFormat {
            compact: true,
            include_time: true,
            use_millisecond_resolution: false,
        };

        assert!(encode_data_packet(&measurements, &cache(), format, true).is_none());
        assert!(encode_data_packet(&measurements, &cache(), format, false).is_some());
    }

    #[test]
    fn test_compact_packet_never_wraps_large_indices() {
        let mut cache = SignalIndexCache::new(Uuid::nil());
        for i in 0..=MAX_COMPACT_SIGNALS as u128 {
            cache.add_measurement_key(Uuid::from_u128(i + 1), "PPA", (i + 1) as u32);
        }
        let last = Uuid::from_u128(MAX_COMPACT_SIGNALS as u128 + 1);
        assert_eq!(cache.signal_index(&last), Some(MAX_COMPACT_SIGNALS as u32));

        let time = Utc.timestamp_opt(0, 0).unwrap();
        let compact = PacketFormat {
            compact: true,
            include_time: false,
            use_millisecond_resolution: false,
        };

        // Out of range for a 16-bit index, so nothing is sent
        let measurements = [Measurement::new(last, 1.0, time)];
        assert!(encode_data_packet(&measurements, &cache, compact, false).is_none());

        // The highest representable index is still encoded
        let edge = Uuid::from_u128(MAX_COMPACT_SIGNALS as u128);
        let measurements = [Measurement::new(edge, 1.0, time), Measurement::new(last, 2.0, time)];
        let (packet, count) = encode_data_packet(&measurements, &cache, compact, false).unwrap();
        assert_eq!(count, 1);
        assert_eq!(&packet[1..5], &1u32.to_be_bytes());
        assert_eq!(&packet[6..8], &u16::MAX.to_be_bytes());

        // The full layout carries the signal id and is unaffected
        let full = PacketFormat {
            compact: false,
            ..compact
        };
        let measurements = [Measurement::new(last, 1.0, time)];
        let (packet, count) = encode_data_packet(&measurements, &cache, full, false).unwrap();
        assert_eq!(count, 1);
        assert_eq!(&packet[5..21], last.as_bytes());
    }
}
