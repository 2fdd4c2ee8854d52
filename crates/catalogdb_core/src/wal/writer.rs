//! WAL writer.

use super::iterator::WalRecordIterator;
use super::record::{frame, WalPayload};
use crate::error::CoreResult;
use catalogdb_storage::StorageBackend;
use parking_lot::Mutex;

/// Append-only log of framed records over a storage backend.
pub struct WalManager {
    backend: Mutex<Box<dyn StorageBackend>>,
    sync_on_write: bool,
}

impl WalManager {
    /// Creates a WAL over `backend`.
    pub fn new(backend: Box<dyn StorageBackend>, sync_on_write: bool) -> Self {
        Self {
            backend: Mutex::new(backend),
            sync_on_write,
        }
    }

    /// Appends a record and returns the offset it was written at.
    ///
    /// The record is flushed, and fsynced when the WAL was created with
    /// `sync_on_write`, before this returns.
    pub fn append<R: WalPayload>(&self, record: &R) -> CoreResult<u64> {
        let data = frame(R::RECORD_TYPE, &record.encode_payload()?)?;
        let mut backend = self.backend.lock();
        let offset = backend.append(&data)?;
        backend.flush()?;
        if self.sync_on_write {
            backend.sync()?;
        }
        Ok(offset)
    }

    /// Current size in bytes.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.lock().size()?)
    }

    /// Records from `offset` on, with the offset each record starts at.
    ///
    /// A truncated record at the end of the log ends the iteration.
    pub fn iter_from<R: WalPayload>(&self, offset: u64) -> CoreResult<WalRecordIterator<'_, R>> {
        WalRecordIterator::new(self.backend.lock(), offset)
    }

    /// Every record of the log.
    pub fn read_all<R: WalPayload>(&self) -> CoreResult<Vec<(u64, R)>> {
        self.iter_from(0)?.collect()
    }

    /// Cuts the log at `offset`.
    pub fn truncate(&self, offset: u64) -> CoreResult<()> {
        self.backend.lock().truncate(offset)?;
        Ok(())
    }
}

impl std::fmt::Debug for WalManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalManager")
            .field("sync_on_write", &self.sync_on_write)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::types::EngineVersion;
    use crate::wal::{EngineOperation, EngineRecord, TransactionRecord};
    use catalogdb_storage::InMemoryBackend;

    fn record(version: u64, name: &str) -> EngineRecord {
        EngineRecord {
            engine_version: EngineVersion::new(version),
            operation: EngineOperation::DefineCatalog { name: name.into() },
        }
    }

    #[test]
    fn records_come_back_in_order_with_offsets() {
        let wal = WalManager::new(Box::new(InMemoryBackend::new()), false);
        let first = wal.append(&record(1, "a")).unwrap();
        let second = wal.append(&record(2, "b")).unwrap();
        assert_eq!(first, 0);

        let records: Vec<(u64, EngineRecord)> = wal.read_all().unwrap();
        assert_eq!(records, vec![(first, record(1, "a")), (second, record(2, "b"))]);

        let tail: Vec<_> = wal
            .iter_from::<EngineRecord>(second)
            .unwrap()
            .collect::<CoreResult<Vec<_>>>()
            .unwrap();
        assert_eq!(tail.len(), 1);
    }

    #[test]
    fn truncated_tail_is_end_of_log() {
        let backend = InMemoryBackend::new();
        let wal = WalManager::new(Box::new(backend), false);
        wal.append(&record(1, "a")).unwrap();
        let size = wal.size().unwrap();
        wal.append(&record(2, "b")).unwrap();
        wal.truncate(size + 5).unwrap();

        let records: Vec<(u64, EngineRecord)> = wal.read_all().unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn flipped_byte_is_corruption() {
        let wal = WalManager::new(Box::new(InMemoryBackend::new()), false);
        wal.append(&record(1, "a")).unwrap();
        let mut bytes = {
            let backend = wal.backend.lock();
            backend.read_all().unwrap()
        };
        let last = bytes.len() - 6;
        bytes[last] ^= 0xFF;
        let wal = WalManager::new(Box::new(InMemoryBackend::with_data(bytes)), false);
        let err = wal.read_all::<EngineRecord>().unwrap_err();
        assert!(matches!(err, CoreError::ChecksumMismatch { .. }));
    }

    #[test]
    fn mangled_length_before_intact_records_is_corruption() {
        let wal = WalManager::new(Box::new(InMemoryBackend::new()), false);
        for (version, name) in [(1, "a"), (2, "b"), (3, "c")] {
            wal.append(&record(version, name)).unwrap();
        }
        let mut bytes = {
            let backend = wal.backend.lock();
            backend.read_all().unwrap()
        };
        // payload length of the first record
        bytes[7..11].copy_from_slice(&u32::MAX.to_le_bytes());
        let wal = WalManager::new(Box::new(InMemoryBackend::with_data(bytes)), false);

        let err = wal.read_all::<EngineRecord>().unwrap_err();
        assert!(matches!(err, CoreError::WalCorruption { .. }));
    }

    #[test]
    fn mangled_length_of_last_record_is_torn_tail() {
        let wal = WalManager::new(Box::new(InMemoryBackend::new()), false);
        wal.append(&record(1, "a")).unwrap();
        let second = wal.append(&record(2, "b")).unwrap() as usize;
        let mut bytes = {
            let backend = wal.backend.lock();
            backend.read_all().unwrap()
        };
        bytes[second + 7..second + 11].copy_from_slice(&u32::MAX.to_le_bytes());
        let wal = WalManager::new(Box::new(InMemoryBackend::with_data(bytes)), false);

        let records: Vec<(u64, EngineRecord)> = wal.read_all().unwrap();
        assert_eq!(records, vec![(0, record(1, "a"))]);
    }

    #[test]
    fn foreign_record_type_is_corruption() {
        let wal = WalManager::new(Box::new(InMemoryBackend::new()), false);
        wal.append(&record(1, "a")).unwrap();
        let err = wal.read_all::<TransactionRecord>().unwrap_err();
        assert!(err.is_corruption());
    }
}
