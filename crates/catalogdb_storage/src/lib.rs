//! # CatalogDB Storage
//!
//! Byte stores underneath the CatalogDB engine.
//!
//! Backends know nothing about write-ahead log envelopes, collection
//! snapshots or engine state. They hand out offsets on append, return the
//! exact bytes on read, and make appended data durable on `sync`.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - volatile engines and tests
//! - [`FileBackend`] - one OS file per log or snapshot
//!
//! ## Example
//!
//! ```rust
//! use catalogdb_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"catalog").unwrap();
//! assert_eq!(backend.read_at(offset, 7).unwrap(), b"catalog");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
