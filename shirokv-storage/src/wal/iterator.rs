//! Streaming WAL reader.
//!
//! Recovery can replay a large log without materializing every record at
//! once. The iterator ends at clean EOF or at the first undecodable record;
//! the corrupt tail is reported through `stopped_at_corruption` so callers
//! can distinguish the two without treating either as fatal.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use tracing::warn;

use super::record::WalRecord;

pub struct WalRecordIterator {
    reader: Option<BufReader<File>>,
    decoded: u64,
    corrupt: bool,
}

impl WalRecordIterator {
    /// Open a WAL file for forward scanning. A missing file yields an empty
    /// iterator, matching an empty log.
    pub fn open(path: &Path) -> Self {
        Self {
            reader: File::open(path).ok().map(BufReader::new),
            decoded: 0,
            corrupt: false,
        }
    }

    /// Records yielded so far.
    pub fn decoded(&self) -> u64 {
        self.decoded
    }

    /// Whether the scan ended at a corrupt or truncated record rather than
    /// clean EOF.
    pub fn stopped_at_corruption(&self) -> bool {
        self.corrupt
    }
}

impl Iterator for WalRecordIterator {
    type Item = WalRecord;

    fn next(&mut self) -> Option<WalRecord> {
        let reader = self.reader.as_mut()?;
        match WalRecord::decode(reader) {
            Ok(Some(record)) => {
                self.decoded += 1;
                Some(record)
            }
            Ok(None) => {
                self.reader = None;
                None
            }
            Err(e) => {
                warn!(
                    decoded = self.decoded,
                    error = %e,
                    "WAL scan stopped at corrupt tail"
                );
                self.corrupt = true;
                self.reader = None;
                None
            }
        }
    }
}
