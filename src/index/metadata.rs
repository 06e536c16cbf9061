//! Per-entry metadata kept by the in-memory index.
//!
//! One record per cache entry, keyed externally by the 64-bit entry hash. The
//! record is deliberately compact: the last-used time is kept at second
//! resolution as a 32-bit offset from the Unix epoch, and the entry size is
//! kept in 256-byte chunks, so the whole record packs into 16 bytes on disk.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const MICROS_PER_SECOND: i64 = 1_000_000;

/// Size chunks occupy 24 bits of the packed on-disk word.
const SIZE_CHUNK_MASK: u32 = 0x00FF_FFFF;

/// Errors from decoding a serialized [`EntryMetadata`] record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataError {
    /// Input ended before a full record was read.
    BufferTooSmall,
    /// The declared size field does not fit a 32-bit value.
    SizeOverflow,
}

impl fmt::Display for MetadataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataError::BufferTooSmall => write!(f, "metadata buffer too small"),
            MetadataError::SizeOverflow => write!(f, "metadata size field overflows u32"),
        }
    }
}

impl std::error::Error for MetadataError {}

/// Compact record of one cache entry's last-used time and size.
///
/// A zero last-used value means "unset" and round-trips as such; a legitimate
/// time that would round to zero is bumped to one second past the epoch so it
/// can never collide with the sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntryMetadata {
    /// Seconds since the Unix epoch; 0 means unset.
    last_used_seconds: u32,
    /// Entry size in 256-byte chunks, rounded up. Only 24 bits are used.
    entry_size_256b_chunks: u32,
    /// Opaque tag owned by the cache layer above; the index never interprets
    /// it.
    in_memory_data: u8,
}

impl EntryMetadata {
    /// Serialized size of one record in bytes.
    pub const ON_DISK_SIZE: usize = 16;

    /// Tolerance subtracted from range lower bounds to absorb the 1-second
    /// storage granularity.
    pub const LOWER_EPSILON_FOR_TIME_COMPARISONS: Duration = Duration::from_secs(1);

    /// Tolerance added to range upper bounds.
    pub const UPPER_EPSILON_FOR_TIME_COMPARISONS: Duration = Duration::from_secs(1);

    /// Create a record with the given last-used time and size.
    pub fn new(last_used: Option<SystemTime>, entry_size: u32) -> Self {
        let mut metadata = Self::default();
        metadata.set_entry_size(entry_size);
        metadata.set_last_used_time(last_used);
        metadata
    }

    /// The last-used time, or `None` if unset.
    pub fn last_used_time(&self) -> Option<SystemTime> {
        if self.last_used_seconds == 0 {
            return None;
        }
        Some(UNIX_EPOCH + Duration::from_secs(u64::from(self.last_used_seconds)))
    }

    /// Set the last-used time at 1-second granularity; `None` clears it.
    pub fn set_last_used_time(&mut self, last_used: Option<SystemTime>) {
        let Some(time) = last_used else {
            self.last_used_seconds = 0;
            return;
        };
        let seconds = match time.duration_since(UNIX_EPOCH) {
            Ok(elapsed) => u32::try_from(elapsed.as_secs()).unwrap_or(u32::MAX),
            // Pre-epoch times saturate to the earliest representable non-null
            // value.
            Err(_) => 0,
        };
        // Avoid accidental nullity.
        self.last_used_seconds = seconds.max(1);
    }

    /// The entry size, rounded up to a multiple of 256 bytes.
    pub fn entry_size(&self) -> u32 {
        self.entry_size_256b_chunks << 8
    }

    /// Set the entry size; stored rounded up to 256-byte chunks.
    pub fn set_entry_size(&mut self, entry_size: u32) {
        self.entry_size_256b_chunks = (((u64::from(entry_size) + 255) >> 8) as u32) & SIZE_CHUNK_MASK;
    }

    /// The opaque per-entry byte owned by the cache layer.
    pub fn in_memory_data(&self) -> u8 {
        self.in_memory_data
    }

    /// Set the opaque per-entry byte.
    pub fn set_in_memory_data(&mut self, value: u8) {
        self.in_memory_data = value;
    }

    /// Raw seconds-since-epoch value used by the eviction sort.
    pub(crate) fn raw_time_for_sorting(&self) -> u32 {
        self.last_used_seconds
    }

    /// Append the fixed 16-byte record: little-endian signed microsecond
    /// ticks, then the packed size-chunks/in-memory-data word.
    pub fn serialize(&self, out: &mut Vec<u8>) {
        let ticks: i64 = if self.last_used_seconds == 0 {
            0
        } else {
            i64::from(self.last_used_seconds) * MICROS_PER_SECOND
        };
        let packed: u64 = (u64::from(self.entry_size_256b_chunks) << 8) | u64::from(self.in_memory_data);
        out.extend_from_slice(&ticks.to_le_bytes());
        out.extend_from_slice(&packed.to_le_bytes());
    }

    /// Decode one record from the front of `input`, advancing it past the
    /// consumed bytes.
    ///
    /// `has_in_memory_data` selects the current packed layout; older index
    /// files stored the whole second word as a size, with no opaque byte.
    pub fn deserialize(
        input: &mut &[u8],
        has_in_memory_data: bool,
    ) -> Result<Self, MetadataError> {
        if input.len() < Self::ON_DISK_SIZE {
            return Err(MetadataError::BufferTooSmall);
        }
        let ticks = i64::from_le_bytes(input[0..8].try_into().expect("8-byte slice"));
        let packed = u64::from_le_bytes(input[8..16].try_into().expect("8-byte slice"));
        *input = &input[Self::ON_DISK_SIZE..];

        if packed > u64::from(u32::MAX) {
            return Err(MetadataError::SizeOverflow);
        }

        let mut metadata = Self::default();
        metadata.set_last_used_time(time_from_ticks(ticks));
        if has_in_memory_data {
            metadata.set_entry_size((packed as u32) & !0xFF);
            metadata.set_in_memory_data((packed & 0xFF) as u8);
        } else {
            metadata.set_entry_size(packed as u32);
        }
        Ok(metadata)
    }
}

fn time_from_ticks(ticks: i64) -> Option<SystemTime> {
    if ticks == 0 {
        return None;
    }
    if ticks > 0 {
        Some(UNIX_EPOCH + Duration::from_micros(ticks as u64))
    } else {
        // Pre-epoch; the setter clamps these to the earliest non-null second.
        Some(
            UNIX_EPOCH
                .checked_sub(Duration::from_micros(ticks.unsigned_abs()))
                .unwrap_or(UNIX_EPOCH),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seconds_after_epoch(seconds: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(seconds)
    }

    #[test]
    fn test_size_chunk_rounding() {
        let mut metadata = EntryMetadata::default();
        for size in [0u32, 1, 255, 256, 257, 300, 511, 512, 100_000, 1 << 30] {
            metadata.set_entry_size(size);
            let expected = ((u64::from(size) + 255) >> 8 << 8) as u32;
            assert_eq!(metadata.entry_size(), expected, "size {size}");
            assert!(metadata.entry_size() >= size);
            assert_eq!(metadata.entry_size() % 256, 0);
        }
    }

    #[test]
    fn test_time_roundtrip_second_precision() {
        let mut metadata = EntryMetadata::default();
        let time = seconds_after_epoch(1_700_000_000);
        metadata.set_last_used_time(Some(time));
        assert_eq!(metadata.last_used_time(), Some(time));
    }

    #[test]
    fn test_null_time_preserved() {
        let mut metadata = EntryMetadata::new(Some(SystemTime::now()), 100);
        metadata.set_last_used_time(None);
        assert_eq!(metadata.last_used_time(), None);
    }

    #[test]
    fn test_epoch_time_bumped_away_from_sentinel() {
        let mut metadata = EntryMetadata::default();
        metadata.set_last_used_time(Some(UNIX_EPOCH));
        // A real time never collapses to the "unset" sentinel.
        assert_eq!(metadata.last_used_time(), Some(seconds_after_epoch(1)));
    }

    #[test]
    fn test_serialize_deserialize_roundtrip() {
        let mut metadata = EntryMetadata::new(Some(seconds_after_epoch(987_654_321)), 12_345);
        metadata.set_in_memory_data(0xA5);

        let mut buf = Vec::new();
        metadata.serialize(&mut buf);
        assert_eq!(buf.len(), EntryMetadata::ON_DISK_SIZE);

        let mut input = buf.as_slice();
        let decoded = EntryMetadata::deserialize(&mut input, true).unwrap();
        assert!(input.is_empty());
        assert_eq!(decoded, metadata);
    }

    #[test]
    fn test_roundtrip_null_time() {
        let metadata = EntryMetadata::new(None, 4096);
        let mut buf = Vec::new();
        metadata.serialize(&mut buf);
        let decoded = EntryMetadata::deserialize(&mut buf.as_slice(), true).unwrap();
        assert_eq!(decoded.last_used_time(), None);
        assert_eq!(decoded.entry_size(), 4096);
    }

    #[test]
    fn test_deserialize_legacy_format() {
        // Older files stored the raw size with no packed in-memory byte.
        let mut buf = Vec::new();
        buf.extend_from_slice(&(42_i64 * MICROS_PER_SECOND).to_le_bytes());
        buf.extend_from_slice(&1000_u64.to_le_bytes());

        let decoded = EntryMetadata::deserialize(&mut buf.as_slice(), false).unwrap();
        assert_eq!(decoded.entry_size(), 1024); // 1000 rounded up
        assert_eq!(decoded.in_memory_data(), 0);
        assert_eq!(decoded.last_used_time(), Some(seconds_after_epoch(42)));
    }

    #[test]
    fn test_deserialize_short_buffer() {
        let buf = [0u8; EntryMetadata::ON_DISK_SIZE - 1];
        assert_eq!(
            EntryMetadata::deserialize(&mut buf.as_slice(), true),
            Err(MetadataError::BufferTooSmall)
        );
    }

    #[test]
    fn test_deserialize_size_overflow() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&0_i64.to_le_bytes());
        buf.extend_from_slice(&(u64::from(u32::MAX) + 1).to_le_bytes());
        assert_eq!(
            EntryMetadata::deserialize(&mut buf.as_slice(), true),
            Err(MetadataError::SizeOverflow)
        );
    }

    #[test]
    fn test_deserialize_consecutive_records() {
        let first = EntryMetadata::new(Some(seconds_after_epoch(10)), 256);
        let second = EntryMetadata::new(Some(seconds_after_epoch(20)), 512);
        let mut buf = Vec::new();
        first.serialize(&mut buf);
        second.serialize(&mut buf);

        let mut input = buf.as_slice();
        assert_eq!(EntryMetadata::deserialize(&mut input, true).unwrap(), first);
        assert_eq!(EntryMetadata::deserialize(&mut input, true).unwrap(), second);
        assert!(input.is_empty());
    }
}
