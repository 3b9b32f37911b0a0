//! WAL record types and on-disk framing.
//!
//! ```text
//! [length u32][op u8][keylen u32][key][vallen u32][val][timestamp_ms u64][crc32 u32]
//! ```
//!
//! All integers little-endian. `length` counts everything after the length
//! field itself, so a reader can skip forward without parsing. The CRC covers
//! key bytes followed by value bytes; a mismatch terminates replay at that
//! record.

use std::io::Read;

use byteorder::{LittleEndian, ReadBytesExt};
use bytes::Bytes;

use shirokv_core::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WalOp {
    Put = 1,
    Delete = 2,
    /// Checkpoint boundary marker; skipped during replay.
    Snapshot = 3,
}

impl TryFrom<u8> for WalOp {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(WalOp::Put),
            2 => Ok(WalOp::Delete),
            3 => Ok(WalOp::Snapshot),
            _ => Err(Error::Corruption {
                details: format!("invalid WAL op: {}", value),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WalRecord {
    pub op: WalOp,
    pub key: Bytes,
    /// Empty for DELETE records.
    pub value: Bytes,
    pub timestamp_ms: u64,
}

impl WalRecord {
    pub fn put(key: Bytes, value: Bytes, timestamp_ms: u64) -> Self {
        Self {
            op: WalOp::Put,
            key,
            value,
            timestamp_ms,
        }
    }

    pub fn delete(key: Bytes, timestamp_ms: u64) -> Self {
        Self {
            op: WalOp::Delete,
            key,
            value: Bytes::new(),
            timestamp_ms,
        }
    }

    fn checksum(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.key);
        hasher.update(&self.value);
        hasher.finalize()
    }

    /// Serialized size including the length prefix.
    pub fn encoded_len(&self) -> usize {
        4 + 1 + 4 + self.key.len() + 4 + self.value.len() + 8 + 4
    }

    pub fn encode(&self) -> Vec<u8> {
        let payload_len = self.encoded_len() - 4;
        let mut buf = Vec::with_capacity(self.encoded_len());

        buf.extend_from_slice(&(payload_len as u32).to_le_bytes());
        buf.push(self.op as u8);
        buf.extend_from_slice(&(self.key.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&(self.value.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.value);
        buf.extend_from_slice(&self.timestamp_ms.to_le_bytes());
        buf.extend_from_slice(&self.checksum().to_le_bytes());

        buf
    }

    /// Decode the next record. `Ok(None)` is clean end-of-log; any framing,
    /// checksum, or short-read problem is `Corruption`, which replay treats
    /// as "stop here, keep everything before".
    pub fn decode(reader: &mut impl Read) -> Result<Option<WalRecord>> {
        let payload_len = match reader.read_u32::<LittleEndian>() {
            Ok(len) => len as usize,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        // Minimum payload: op + keylen + vallen + ts + crc
        if payload_len < 1 + 4 + 4 + 8 + 4 {
            return Err(Error::Corruption {
                details: format!("WAL record payload too short: {}", payload_len),
            });
        }

        let mut payload = vec![0u8; payload_len];
        reader.read_exact(&mut payload).map_err(|_| Error::Corruption {
            details: "truncated WAL record".to_string(),
        })?;

        let mut cursor = &payload[..];
        let op = WalOp::try_from(cursor.read_u8()?)?;

        let key_len = cursor.read_u32::<LittleEndian>()? as usize;
        if key_len > cursor.len() {
            return Err(Error::Corruption {
                details: "WAL key length exceeds record".to_string(),
            });
        }
        let key = Bytes::copy_from_slice(&cursor[..key_len]);
        cursor = &cursor[key_len..];

        let value_len = cursor.read_u32::<LittleEndian>()? as usize;
        if value_len > cursor.len() {
            return Err(Error::Corruption {
                details: "WAL value length exceeds record".to_string(),
            });
        }
        let value = Bytes::copy_from_slice(&cursor[..value_len]);
        cursor = &cursor[value_len..];

        let timestamp_ms = cursor.read_u64::<LittleEndian>()?;
        let stored_crc = cursor.read_u32::<LittleEndian>()?;

        let record = WalRecord {
            op,
            key,
            value,
            timestamp_ms,
        };
        if record.checksum() != stored_crc {
            return Err(Error::Corruption {
                details: "WAL record checksum mismatch".to_string(),
            });
        }

        Ok(Some(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let record = WalRecord::put(
            Bytes::from_static(b"user:42"),
            Bytes::from_static(b"{\"name\":\"aki\"}"),
            1_700_000_000_123,
        );

        let encoded = record.encode();
        assert_eq!(encoded.len(), record.encoded_len());

        let decoded = WalRecord::decode(&mut &encoded[..]).unwrap().unwrap();
        assert_eq!(decoded.op, WalOp::Put);
        assert_eq!(decoded.key, record.key);
        assert_eq!(decoded.value, record.value);
        assert_eq!(decoded.timestamp_ms, record.timestamp_ms);
    }

    #[test]
    fn delete_has_empty_value() {
        let record = WalRecord::delete(Bytes::from_static(b"gone"), 7);
        let encoded = record.encode();
        let decoded = WalRecord::decode(&mut &encoded[..]).unwrap().unwrap();
        assert_eq!(decoded.op, WalOp::Delete);
        assert!(decoded.value.is_empty());
    }

    #[test]
    fn zero_length_key_and_value_round_trip() {
        let record = WalRecord::put(Bytes::new(), Bytes::new(), 0);
        let encoded = record.encode();
        let decoded = WalRecord::decode(&mut &encoded[..]).unwrap().unwrap();
        assert!(decoded.key.is_empty());
        assert!(decoded.value.is_empty());
    }

    #[test]
    fn snapshot_op_decodes() {
        let record = WalRecord {
            op: WalOp::Snapshot,
            key: Bytes::new(),
            value: Bytes::new(),
            timestamp_ms: 99,
        };
        let encoded = record.encode();
        let decoded = WalRecord::decode(&mut &encoded[..]).unwrap().unwrap();
        assert_eq!(decoded.op, WalOp::Snapshot);
    }

    #[test]
    fn corrupt_checksum_detected() {
        let record = WalRecord::put(Bytes::from_static(b"k"), Bytes::from_static(b"v"), 1);
        let mut encoded = record.encode();
        let value_byte = 4 + 1 + 4 + 1 + 4; // first byte of the value
        encoded[value_byte] ^= 0xff;

        let err = WalRecord::decode(&mut &encoded[..]).unwrap_err();
        assert_eq!(err.error_code(), "CORRUPTION");
    }

    #[test]
    fn truncated_record_is_corruption_not_eof() {
        let record = WalRecord::put(Bytes::from_static(b"key"), Bytes::from_static(b"value"), 1);
        let encoded = record.encode();
        let truncated = &encoded[..encoded.len() - 3];

        let err = WalRecord::decode(&mut &truncated[..]).unwrap_err();
        assert_eq!(err.error_code(), "CORRUPTION");
    }

    #[test]
    fn empty_input_is_clean_end() {
        assert!(WalRecord::decode(&mut &[][..]).unwrap().is_none());
    }

    #[test]
    fn unknown_op_rejected() {
        let record = WalRecord::put(Bytes::from_static(b"k"), Bytes::from_static(b"v"), 1);
        let mut encoded = record.encode();
        encoded[4] = 9; // op byte
        assert!(WalRecord::decode(&mut &encoded[..]).is_err());
    }
}
