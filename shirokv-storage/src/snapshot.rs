//! Snapshot file format.
//!
//! ```text
//! [magic "MKVS"][version u32][record_count u32][wal_lsn u64]
//! [timestamp u64][header_checksum u32][reserved 32B]
//! ```
//! followed by `record_count` entries of
//! `[keylen u32][vallen u32][key][value]`, all integers little-endian.
//!
//! The header checksum XOR-folds the fixed fields (magic included); a
//! mismatch rejects the whole file and recovery falls back to an empty store
//! plus WAL replay. `wal_lsn` ties the snapshot to the log position it
//! subsumes.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use bytes::Bytes;

use shirokv_core::error::{Error, Result};

pub const SNAPSHOT_MAGIC: &[u8; 4] = b"MKVS";
pub const SNAPSHOT_VERSION: u32 = 1;
pub const SNAPSHOT_HEADER_SIZE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotHeader {
    pub version: u32,
    pub record_count: u32,
    pub wal_lsn: u64,
    pub timestamp_ms: u64,
}

impl SnapshotHeader {
    pub fn new(record_count: u32, wal_lsn: u64, timestamp_ms: u64) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            record_count,
            wal_lsn,
            timestamp_ms,
        }
    }

    /// XOR-fold of the fixed header fields.
    fn checksum(&self) -> u32 {
        let mut checksum = 0u32;
        checksum ^= self.version;
        checksum ^= self.record_count;
        checksum ^= self.wal_lsn as u32;
        checksum ^= (self.wal_lsn >> 32) as u32;
        checksum ^= self.timestamp_ms as u32;
        checksum ^= (self.timestamp_ms >> 32) as u32;
        for (i, byte) in SNAPSHOT_MAGIC.iter().enumerate() {
            checksum ^= (*byte as u32) << (i * 8);
        }
        checksum
    }

    pub fn write_to(&self, writer: &mut impl Write) -> Result<()> {
        writer.write_all(SNAPSHOT_MAGIC)?;
        writer.write_u32::<LittleEndian>(self.version)?;
        writer.write_u32::<LittleEndian>(self.record_count)?;
        writer.write_u64::<LittleEndian>(self.wal_lsn)?;
        writer.write_u64::<LittleEndian>(self.timestamp_ms)?;
        writer.write_u32::<LittleEndian>(self.checksum())?;
        writer.write_all(&[0u8; 32])?;
        Ok(())
    }

    pub fn read_from(reader: &mut impl Read) -> Result<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic).map_err(|_| Error::Snapshot {
            message: "snapshot header truncated".to_string(),
        })?;
        if &magic != SNAPSHOT_MAGIC {
            return Err(Error::Corruption {
                details: "bad snapshot magic".to_string(),
            });
        }

        let version = reader.read_u32::<LittleEndian>()?;
        if version != SNAPSHOT_VERSION {
            return Err(Error::Snapshot {
                message: format!("unsupported snapshot version: {}", version),
            });
        }

        let record_count = reader.read_u32::<LittleEndian>()?;
        let wal_lsn = reader.read_u64::<LittleEndian>()?;
        let timestamp_ms = reader.read_u64::<LittleEndian>()?;
        let stored_checksum = reader.read_u32::<LittleEndian>()?;
        reader.read_exact(&mut [0u8; 32])?;

        let header = Self {
            version,
            record_count,
            wal_lsn,
            timestamp_ms,
        };
        if header.checksum() != stored_checksum {
            return Err(Error::Corruption {
                details: "snapshot header checksum mismatch".to_string(),
            });
        }
        Ok(header)
    }
}

/// Write a full snapshot and fsync it before returning.
pub fn write_snapshot(
    path: &Path,
    data: &BTreeMap<Bytes, Bytes>,
    wal_lsn: u64,
    timestamp_ms: u64,
) -> Result<()> {
    let file = File::create(path).map_err(|e| Error::Io {
        message: format!("failed to create snapshot {:?}", path),
        source: e,
    })?;
    let mut writer = BufWriter::new(file);

    let header = SnapshotHeader::new(data.len() as u32, wal_lsn, timestamp_ms);
    header.write_to(&mut writer)?;

    for (key, value) in data {
        writer.write_u32::<LittleEndian>(key.len() as u32)?;
        writer.write_u32::<LittleEndian>(value.len() as u32)?;
        writer.write_all(key)?;
        writer.write_all(value)?;
    }

    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}

/// Read and validate a snapshot file. Any framing problem is an error; the
/// caller decides whether to fall back to an empty store.
pub fn read_snapshot(path: &Path) -> Result<(BTreeMap<Bytes, Bytes>, SnapshotHeader)> {
    let file = File::open(path).map_err(|e| Error::Io {
        message: format!("failed to open snapshot {:?}", path),
        source: e,
    })?;
    let mut reader = BufReader::new(file);

    let header = SnapshotHeader::read_from(&mut reader)?;
    let mut data = BTreeMap::new();

    for i in 0..header.record_count {
        let key_len = reader.read_u32::<LittleEndian>().map_err(|_| truncated(i))?;
        let value_len = reader.read_u32::<LittleEndian>().map_err(|_| truncated(i))?;

        let mut key = vec![0u8; key_len as usize];
        reader.read_exact(&mut key).map_err(|_| truncated(i))?;
        let mut value = vec![0u8; value_len as usize];
        reader.read_exact(&mut value).map_err(|_| truncated(i))?;

        data.insert(Bytes::from(key), Bytes::from(value));
    }

    Ok((data, header))
}

fn truncated(record: u32) -> Error {
    Error::Corruption {
        details: format!("snapshot truncated at record {}", record),
    }
}

/// `snapshot_<ms>.bin` under the snapshots directory.
pub fn snapshot_path(snapshots_dir: &Path, timestamp_ms: u64) -> PathBuf {
    snapshots_dir.join(format!("snapshot_{}.bin", timestamp_ms))
}

fn parse_timestamp(file_name: &str) -> Option<u64> {
    file_name
        .strip_prefix("snapshot_")?
        .strip_suffix(".bin")?
        .parse()
        .ok()
}

/// All snapshot files with their timestamps, newest first.
pub fn list_snapshots(snapshots_dir: &Path) -> Vec<(u64, PathBuf)> {
    let mut snapshots = Vec::new();
    let entries = match std::fs::read_dir(snapshots_dir) {
        Ok(entries) => entries,
        Err(_) => return snapshots,
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if let Some(ts) = parse_timestamp(name) {
                snapshots.push((ts, path));
            }
        }
    }
    snapshots.sort_by(|a, b| b.0.cmp(&a.0));
    snapshots
}
