//! Write-ahead logs.
//!
//! Two logs share one envelope format: each live catalog keeps a WAL of
//! committed transactions, and the engine keeps a WAL of catalog lifecycle
//! operations.
//!
//! ```text
//! | magic (4) | version (2) | type (1) | length (4) | payload (N) | crc32 (4) |
//! ```
//!
//! Payloads are CBOR. A record cut short at the end of the log is a crash
//! mid-write and ends the log; a bad magic, an unknown type or a CRC mismatch
//! is corruption.

mod iterator;
mod record;
mod writer;

pub use iterator::WalRecordIterator;
pub use record::{
    compute_crc32, EngineOperation, EngineRecord, LogFileRecordReference, TransactionRecord,
    WalPayload, WalRecordType, WAL_MAGIC, WAL_VERSION,
};
pub use writer::WalManager;
