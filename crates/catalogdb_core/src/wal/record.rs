//! WAL record types and payloads.

use crate::data::CatalogMutation;
use crate::error::{CoreError, CoreResult};
use crate::types::{CatalogVersion, EngineVersion, TransactionId};
use catalogdb_codec::{from_cbor, to_cbor};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Magic bytes opening every WAL record.
pub const WAL_MAGIC: [u8; 4] = *b"CWAL";

/// Current WAL format version.
pub const WAL_VERSION: u16 = 1;

/// Envelope header: magic, version, type and payload length.
pub(crate) const HEADER_SIZE: usize = 11;

/// Trailing CRC32 size.
pub(crate) const CRC_SIZE: usize = 4;

/// Record type byte of the envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WalRecordType {
    /// A committed catalog transaction.
    Transaction = 1,
    /// A catalog lifecycle operation of the engine.
    EngineOperation = 2,
}

impl WalRecordType {
    /// Parses a type byte.
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Transaction),
            2 => Some(Self::EngineOperation),
            _ => None,
        }
    }

    /// Type byte written to the envelope.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A payload that can be framed into a WAL record.
pub trait WalPayload: Serialize + DeserializeOwned {
    /// Type byte of records carrying this payload.
    const RECORD_TYPE: WalRecordType;

    /// Encodes the payload.
    fn encode_payload(&self) -> CoreResult<Vec<u8>> {
        Ok(to_cbor(self)?)
    }

    /// Decodes a payload of type `record_type`.
    fn decode_payload(record_type: WalRecordType, payload: &[u8]) -> CoreResult<Self> {
        if record_type != Self::RECORD_TYPE {
            return Err(CoreError::wal_corruption(format!(
                "unexpected record type {record_type:?}, expected {:?}",
                Self::RECORD_TYPE
            )));
        }
        from_cbor(payload).map_err(|e| CoreError::wal_corruption(format!("undecodable payload: {e}")))
    }
}

/// Mutations of one committed catalog transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Transaction that produced the mutations.
    pub transaction_id: TransactionId,
    /// Catalog version the commit published.
    pub catalog_version: CatalogVersion,
    /// Mutations in application order, with primary keys resolved.
    pub mutations: Vec<CatalogMutation>,
}

impl WalPayload for TransactionRecord {
    const RECORD_TYPE: WalRecordType = WalRecordType::Transaction;
}

/// Catalog lifecycle operation recorded in the engine WAL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineOperation {
    /// A catalog was defined.
    DefineCatalog {
        /// Catalog name.
        name: String,
    },
    /// A catalog and its files were removed.
    DeleteCatalog {
        /// Catalog name.
        name: String,
    },
    /// A catalog was renamed.
    RenameCatalog {
        /// Previous name.
        from: String,
        /// New name.
        to: String,
    },
    /// A catalog took over the name of another, which was removed.
    ReplaceCatalog {
        /// Name that disappears.
        replaced_by: String,
        /// Name that is taken over.
        replaced: String,
    },
    /// A catalog was switched between read-only and read-write.
    SetReadOnly {
        /// Catalog name.
        name: String,
        /// New flag.
        read_only: bool,
    },
    /// A catalog was loaded.
    ActivateCatalog {
        /// Catalog name.
        name: String,
    },
    /// A catalog was unloaded but kept on disk.
    DeactivateCatalog {
        /// Catalog name.
        name: String,
    },
    /// A catalog finished warming up.
    GoLive {
        /// Catalog name.
        name: String,
    },
}

impl fmt::Display for EngineOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DefineCatalog { name } => write!(f, "define `{name}`"),
            Self::DeleteCatalog { name } => write!(f, "delete `{name}`"),
            Self::RenameCatalog { from, to } => write!(f, "rename `{from}` to `{to}`"),
            Self::ReplaceCatalog { replaced_by, replaced } => {
                write!(f, "replace `{replaced}` with `{replaced_by}`")
            }
            Self::SetReadOnly { name, read_only } => write!(f, "set `{name}` read-only={read_only}"),
            Self::ActivateCatalog { name } => write!(f, "activate `{name}`"),
            Self::DeactivateCatalog { name } => write!(f, "deactivate `{name}`"),
            Self::GoLive { name } => write!(f, "go live `{name}`"),
        }
    }
}

/// One engine state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineRecord {
    /// Engine version the operation produced.
    pub engine_version: EngineVersion,
    /// The operation.
    pub operation: EngineOperation,
}

impl WalPayload for EngineRecord {
    const RECORD_TYPE: WalRecordType = WalRecordType::EngineOperation;
}

/// Position in a numbered WAL file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogFileRecordReference {
    /// Index of the WAL file.
    pub file_index: u32,
    /// Byte offset within the file, `None` for its start.
    pub offset: Option<u64>,
}

impl LogFileRecordReference {
    /// Start of WAL file `file_index`.
    #[must_use]
    pub const fn new(file_index: u32) -> Self {
        Self {
            file_index,
            offset: None,
        }
    }

    /// Same file, at `offset`.
    #[must_use]
    pub const fn at(self, offset: u64) -> Self {
        Self {
            file_index: self.file_index,
            offset: Some(offset),
        }
    }

    /// Start of the following WAL file.
    #[must_use]
    pub const fn next_file(self) -> Self {
        Self::new(self.file_index + 1)
    }

    /// Name of the WAL file for `prefix`.
    #[must_use]
    pub fn file_name(&self, prefix: &str) -> String {
        format!("{prefix}_{}.wal", self.file_index)
    }

    /// Offset to start reading from.
    #[must_use]
    pub fn start(&self) -> u64 {
        self.offset.unwrap_or(0)
    }
}

impl fmt::Display for LogFileRecordReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.offset {
            Some(offset) => write!(f, "{}@{offset}", self.file_index),
            None => write!(f, "{}@0", self.file_index),
        }
    }
}

/// CRC32 of `data`.
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Frames `payload` into a full record.
pub(crate) fn frame(record_type: WalRecordType, payload: &[u8]) -> CoreResult<Vec<u8>> {
    let len = u32::try_from(payload.len())
        .map_err(|_| CoreError::invalid_operation("WAL record payload too large"))?;
    let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
    data.extend_from_slice(&WAL_MAGIC);
    data.extend_from_slice(&WAL_VERSION.to_le_bytes());
    data.push(record_type.as_byte());
    data.extend_from_slice(&len.to_le_bytes());
    data.extend_from_slice(payload);
    let crc = compute_crc32(&data);
    data.extend_from_slice(&crc.to_le_bytes());
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{EntityMutation, UpsertEntity};

    #[test]
    fn reference_names_and_display() {
        let reference = LogFileRecordReference::new(3);
        assert_eq!(reference.file_name("catalog"), "catalog_3.wal");
        assert_eq!(reference.at(120).to_string(), "3@120");
        assert_eq!(reference.next_file().file_name("engine"), "engine_4.wal");
        assert_eq!(reference.start(), 0);
    }

    #[test]
    fn crc32_known_value() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn payload_type_is_checked() {
        let record = TransactionRecord {
            transaction_id: TransactionId::new(1),
            catalog_version: CatalogVersion::new(2),
            mutations: vec![CatalogMutation::Entity(EntityMutation::Upsert(
                UpsertEntity::existing("PRODUCT", 1).attribute("code", "A"),
            ))],
        };
        let payload = record.encode_payload().unwrap();
        let decoded = TransactionRecord::decode_payload(WalRecordType::Transaction, &payload).unwrap();
        assert_eq!(decoded, record);
        assert!(EngineRecord::decode_payload(WalRecordType::Transaction, &payload).is_err());
    }

    #[test]
    fn frame_layout() {
        let framed = frame(WalRecordType::EngineOperation, &[1, 2, 3]).unwrap();
        assert_eq!(framed.len(), HEADER_SIZE + 3 + CRC_SIZE);
        assert_eq!(&framed[0..4], b"CWAL");
        assert_eq!(framed[6], 2);
        assert_eq!(u32::from_le_bytes([framed[7], framed[8], framed[9], framed[10]]), 3);
    }
}
