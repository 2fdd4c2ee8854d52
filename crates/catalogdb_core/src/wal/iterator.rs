//! Streaming WAL record iterator.
//!
//! Reads one record at a time from the backend, so replaying a large WAL
//! never holds more than one record in memory.

use super::record::{compute_crc32, WalPayload, WalRecordType, CRC_SIZE, HEADER_SIZE, WAL_MAGIC, WAL_VERSION};
use crate::error::{CoreError, CoreResult};
use catalogdb_storage::StorageBackend;
use parking_lot::MutexGuard;
use std::marker::PhantomData;

/// Iterator over `(offset, record)` pairs.
///
/// Holds the WAL lock for its lifetime.
pub struct WalRecordIterator<'a, R> {
    backend: MutexGuard<'a, Box<dyn StorageBackend>>,
    total_size: u64,
    offset: u64,
    finished: bool,
    _record: PhantomData<R>,
}

impl<'a, R: WalPayload> WalRecordIterator<'a, R> {
    pub(crate) fn new(backend: MutexGuard<'a, Box<dyn StorageBackend>>, offset: u64) -> CoreResult<Self> {
        let total_size = backend.size()?;
        Ok(Self {
            backend,
            total_size,
            offset,
            finished: false,
            _record: PhantomData,
        })
    }

    fn remaining(&self) -> u64 {
        self.total_size.saturating_sub(self.offset)
    }

    fn read_next(&mut self) -> CoreResult<Option<(u64, R)>> {
        let start = self.offset;
        if self.remaining() < HEADER_SIZE as u64 {
            // incomplete header: crash mid-write
            return Ok(None);
        }
        let header = self.backend.read_at(start, HEADER_SIZE)?;
        if header[0..4] != WAL_MAGIC {
            return Err(CoreError::wal_corruption(format!("invalid magic at offset {start}")));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version > WAL_VERSION {
            return Err(CoreError::wal_corruption(format!(
                "unsupported version {version} at offset {start}"
            )));
        }
        let record_type = WalRecordType::from_byte(header[6]).ok_or_else(|| {
            CoreError::wal_corruption(format!("unknown record type {} at offset {start}", header[6]))
        })?;
        let payload_len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as usize;

        let body_len = payload_len + CRC_SIZE;
        if self.remaining() < (HEADER_SIZE + body_len) as u64 {
            if self.complete_record_follows(start)? {
                return Err(CoreError::wal_corruption(format!(
                    "record at offset {start} claims {payload_len} payload bytes past later records"
                )));
            }
            // incomplete payload: crash mid-write
            return Ok(None);
        }
        let body = self.backend.read_at(start + HEADER_SIZE as u64, body_len)?;
        let (payload, crc) = body.split_at(payload_len);
        let expected = u32::from_le_bytes([crc[0], crc[1], crc[2], crc[3]]);

        let mut framed = header;
        framed.extend_from_slice(payload);
        let actual = compute_crc32(&framed);
        if expected != actual {
            return Err(CoreError::ChecksumMismatch { expected, actual });
        }

        let record = R::decode_payload(record_type, payload)?;
        self.offset = start + (HEADER_SIZE + body_len) as u64;
        Ok(Some((start, record)))
    }

    /// Whether an intact record starts anywhere after `start`. A torn write
    /// only ever leaves the last record short.
    fn complete_record_follows(&self, start: u64) -> CoreResult<bool> {
        let from = start + 1;
        let tail = self.backend.read_at(from, (self.total_size - from) as usize)?;
        Ok((0..tail.len()).any(|at| is_complete_frame(&tail[at..])))
    }

    /// Offset just past the last record returned.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

fn is_complete_frame(bytes: &[u8]) -> bool {
    if bytes.len() < HEADER_SIZE || bytes[0..4] != WAL_MAGIC || WalRecordType::from_byte(bytes[6]).is_none() {
        return false;
    }
    let payload_len = u32::from_le_bytes([bytes[7], bytes[8], bytes[9], bytes[10]]) as usize;
    let framed_len = HEADER_SIZE + payload_len;
    let Some(crc) = bytes.get(framed_len..framed_len + CRC_SIZE) else {
        return false;
    };
    u32::from_le_bytes([crc[0], crc[1], crc[2], crc[3]]) == compute_crc32(&bytes[..framed_len])
}

impl<R: WalPayload> Iterator for WalRecordIterator<'_, R> {
    type Item = CoreResult<(u64, R)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_next() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}
