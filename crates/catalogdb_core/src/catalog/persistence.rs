//! Catalog snapshots on disk.
//!
//! A checkpoint writes one CBOR file per collection and a header that lists
//! them with their SHA-256 digests. The header is replaced last, so a crash
//! mid-checkpoint leaves the previous snapshot in effect.

use super::state::CatalogState;
use super::CatalogMode;
use crate::collection::EntityCollection;
use crate::data::Entity;
use crate::dir::{remove_file_if_exists, sync_directory, write_atomic};
use crate::error::{CoreError, CoreResult};
use crate::schema::CatalogSchema;
use crate::types::{CatalogVersion, PrimaryKey, TransactionId};
use crate::wal::LogFileRecordReference;
use catalogdb_codec::{from_cbor, to_cbor};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

/// File name of the catalog header.
pub(crate) const HEADER_FILE: &str = "catalog.header";

const COLLECTION_EXTENSION: &str = "collection";

/// Layout version of catalog headers and collection files.
pub const STORAGE_PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct CollectionFileReference {
    entity_type: String,
    file_name: String,
    sha256: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct CatalogHeader {
    storage_protocol_version: u32,
    name: String,
    version: CatalogVersion,
    mode: CatalogMode,
    schema: CatalogSchema,
    collections: Vec<CollectionFileReference>,
    sequences: BTreeMap<String, PrimaryKey>,
    last_transaction_id: TransactionId,
    wal: LogFileRecordReference,
}

#[derive(Serialize)]
struct CollectionFileView<'a> {
    entity_type: &'a str,
    entities: Vec<&'a Entity>,
}

#[derive(Deserialize)]
struct CollectionFile {
    entity_type: String,
    entities: Vec<Entity>,
}

/// What a checkpoint records next to the catalog state.
#[derive(Debug)]
pub(crate) struct SnapshotMeta {
    pub(crate) mode: CatalogMode,
    pub(crate) sequences: BTreeMap<String, PrimaryKey>,
    pub(crate) last_transaction_id: TransactionId,
    pub(crate) wal: LogFileRecordReference,
}

/// A catalog read back from its last checkpoint.
#[derive(Debug)]
pub(crate) struct LoadedSnapshot {
    pub(crate) state: CatalogState,
    pub(crate) meta: SnapshotMeta,
}

fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

fn collection_file_name(entity_type: &str) -> String {
    format!("{entity_type}.{COLLECTION_EXTENSION}")
}

/// Writes `state` as the current snapshot of `directory`.
pub(crate) fn write_snapshot(directory: &Path, state: &CatalogState, meta: &SnapshotMeta) -> CoreResult<()> {
    fs::create_dir_all(directory)?;

    let mut collections = Vec::new();
    for collection in state.collections() {
        let file_name = collection_file_name(collection.entity_type());
        let data = to_cbor(&CollectionFileView {
            entity_type: collection.entity_type(),
            entities: collection.entities().map(AsRef::as_ref).collect(),
        })?;
        write_atomic(&directory.join(&file_name), &data)?;
        collections.push(CollectionFileReference {
            entity_type: collection.entity_type().to_string(),
            file_name,
            sha256: sha256_hex(&data),
        });
    }

    let header = CatalogHeader {
        storage_protocol_version: STORAGE_PROTOCOL_VERSION,
        name: state.name().to_string(),
        version: state.version(),
        mode: meta.mode,
        schema: state.schema().clone(),
        collections,
        sequences: meta.sequences.clone(),
        last_transaction_id: meta.last_transaction_id,
        wal: meta.wal,
    };
    write_atomic(&directory.join(HEADER_FILE), &to_cbor(&header)?)?;

    // collections dropped since the previous checkpoint
    let live: BTreeSet<&str> = header.collections.iter().map(|c| c.file_name.as_str()).collect();
    for entry in fs::read_dir(directory)? {
        let path = entry?.path();
        let is_collection = path.extension().is_some_and(|e| e == COLLECTION_EXTENSION);
        let is_live = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| live.contains(n));
        if is_collection && !is_live {
            remove_file_if_exists(&path)?;
        }
    }
    sync_directory(directory)
}

/// Reads the snapshot of `directory`, verifying every collection digest.
pub(crate) fn read_snapshot(directory: &Path) -> CoreResult<LoadedSnapshot> {
    let header: CatalogHeader = from_cbor(&fs::read(directory.join(HEADER_FILE))?)?;
    if header.storage_protocol_version != STORAGE_PROTOCOL_VERSION {
        return Err(CoreError::invalid_format(format!(
            "unsupported storage protocol version {}",
            header.storage_protocol_version
        )));
    }

    let mut files: BTreeMap<String, Vec<Entity>> = BTreeMap::new();
    for reference in &header.collections {
        let data = fs::read(directory.join(&reference.file_name))?;
        let actual = sha256_hex(&data);
        if actual != reference.sha256 {
            return Err(CoreError::DigestMismatch {
                file: reference.file_name.clone(),
                expected: reference.sha256.clone(),
                actual,
            });
        }
        let file: CollectionFile = from_cbor(&data)?;
        if file.entity_type != reference.entity_type {
            return Err(CoreError::invalid_format(format!(
                "`{}` holds entities of `{}`",
                reference.file_name, file.entity_type
            )));
        }
        files.insert(file.entity_type, file.entities);
    }
    if let Some(unknown) = files.keys().find(|t| header.schema.entity(t).is_none()) {
        return Err(CoreError::invalid_format(format!(
            "collection `{unknown}` has no schema"
        )));
    }

    let mut collections = Vec::new();
    for schema in header.schema.entities() {
        let entities = files.remove(&schema.name).unwrap_or_default();
        collections.push(EntityCollection::restore(schema.clone(), &header.schema, entities)?);
    }

    Ok(LoadedSnapshot {
        state: CatalogState::from_parts(header.name, header.version, header.schema, collections),
        meta: SnapshotMeta {
            mode: header.mode,
            sequences: header.sequences,
            last_transaction_id: header.last_transaction_id,
            wal: header.wal,
        },
    })
}
