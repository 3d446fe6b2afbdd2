//! Journal metastore: the persisted journal-wide settings.

use crate::config::JournalConfig;
use crate::types::Safety;
use std::io;

/// Magic bytes for the metastore file.
pub const META_MAGIC: [u8; 4] = *b"FLMS";

/// Current metastore version.
pub const META_VERSION: u16 = 1;

/// Size of an encoded metastore, checksum included.
pub const META_SIZE: usize = 36;

/// Journal-wide settings persisted in the `metastore` file.
///
/// Layout (little-endian):
///
/// ```text
/// magic[4] | version u16 | reserved u16 | current_epoch u32 |
/// segment_size u64 | safety u8 | reserved[3] | file_mode u32 |
/// max_batch u32 | crc32 u32
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metastore {
    /// Epoch of the segment currently being written.
    pub current_epoch: u32,
    /// Segment capacity in bytes.
    pub segment_size: u64,
    /// Durability level for appends.
    pub safety: Safety,
    /// Permission bits for created files.
    pub file_mode: u32,
    /// Read batch cap.
    pub max_batch: u32,
}

impl Metastore {
    /// Creates the metastore for a freshly initialized journal.
    #[must_use]
    pub fn from_config(config: &JournalConfig) -> Self {
        Self {
            current_epoch: 0,
            segment_size: config.segment_size,
            safety: config.safety,
            file_mode: config.file_mode,
            max_batch: config.max_batch,
        }
    }

    /// Encodes the metastore to bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(META_SIZE);

        buf.extend_from_slice(&META_MAGIC);
        buf.extend_from_slice(&META_VERSION.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&self.current_epoch.to_le_bytes());
        buf.extend_from_slice(&self.segment_size.to_le_bytes());
        buf.push(self.safety.as_u8());
        buf.extend_from_slice(&[0u8; 3]);
        buf.extend_from_slice(&self.file_mode.to_le_bytes());
        buf.extend_from_slice(&self.max_batch.to_le_bytes());

        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decodes a metastore from bytes.
    ///
    /// Failures are reported as `InvalidData` I/O errors so that callers can
    /// wrap them the same way as read failures.
    pub fn decode(data: &[u8]) -> io::Result<Self> {
        if data.len() != META_SIZE {
            return Err(invalid(format!(
                "metastore must be {META_SIZE} bytes, got {}",
                data.len()
            )));
        }
        if data[0..4] != META_MAGIC {
            return Err(invalid("invalid metastore magic"));
        }

        let body = &data[..META_SIZE - 4];
        let stored = read_u32(data, META_SIZE - 4);
        if crc32fast::hash(body) != stored {
            return Err(invalid("metastore checksum mismatch"));
        }

        let version = u16::from_le_bytes([data[4], data[5]]);
        if version > META_VERSION {
            return Err(invalid(format!("unsupported metastore version: {version}")));
        }

        let safety = Safety::from_u8(data[20])
            .ok_or_else(|| invalid(format!("invalid safety level {}", data[20])))?;

        Ok(Self {
            current_epoch: read_u32(data, 8),
            segment_size: u64::from(read_u32(data, 12)) | (u64::from(read_u32(data, 16)) << 32),
            safety,
            file_mode: read_u32(data, 24),
            max_batch: read_u32(data, 28),
        })
    }
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

fn invalid(message: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Metastore {
        Metastore {
            current_epoch: 7,
            segment_size: 1 << 20,
            safety: Safety::Safe,
            file_mode: 0o600,
            max_batch: 100,
        }
    }

    #[test]
    fn encode_decode_roundtrip() {
        let meta = sample();
        let encoded = meta.encode();
        assert_eq!(encoded.len(), META_SIZE);
        assert_eq!(Metastore::decode(&encoded).unwrap(), meta);
    }

    #[test]
    fn from_config_starts_at_epoch_zero() {
        let config = JournalConfig::new().segment_size(99).max_batch(3);
        let meta = Metastore::from_config(&config);
        assert_eq!(meta.current_epoch, 0);
        assert_eq!(meta.segment_size, 99);
        assert_eq!(meta.max_batch, 3);
    }

    #[test]
    fn invalid_magic_rejected() {
        let mut encoded = sample().encode();
        encoded[0] = b'X';
        assert!(Metastore::decode(&encoded).is_err());
    }

    #[test]
    fn flipped_bit_fails_checksum() {
        let mut encoded = sample().encode();
        encoded[9] ^= 0x01;
        let err = Metastore::decode(&encoded).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn short_input_rejected() {
        assert!(Metastore::decode(b"FLMS").is_err());
    }
}
