//! # CatalogDB Core
//!
//! Embedded engine for catalog-shaped data: entities with typed and
//! localized attributes, associated data, references, hierarchy placement
//! and prices.
//!
//! This crate provides:
//! - Entity indices: one global index per collection plus reduced indices
//!   scoped to referenced entities and hierarchy nodes, each holding unique,
//!   filter, sort and price sub-indices
//! - Entity collections that validate mutations against the schema and route
//!   them to the right indices
//! - Catalogs with copy-on-write snapshots, one version per commit, a
//!   write-ahead log and checkpoints
//! - The engine registry of catalogs, lifecycle operations and sessions
//!
//! ## Example
//!
//! ```rust
//! use catalogdb_core::{AttributeKey, AttributeSchema, AttributeType, Engine, EntitySchema, UpsertEntity};
//!
//! let engine = Engine::open_in_memory().unwrap();
//! engine.define_catalog("shop").unwrap();
//!
//! let session = engine.create_read_write_session("shop").unwrap();
//! session
//!     .update_entity_schema(
//!         EntitySchema::new("PRODUCT")
//!             .with_attribute(AttributeSchema::new("code", AttributeType::String).unique()),
//!     )
//!     .unwrap();
//! let product = session
//!     .upsert_entity(UpsertEntity::new("PRODUCT").attribute("code", "X-1"))
//!     .unwrap();
//! session.close().unwrap();
//!
//! let found = engine
//!     .query_catalog("shop", |s| {
//!         s.query_by_attribute_equals("PRODUCT", &AttributeKey::new("code"), &"X-1".into())
//!     })
//!     .unwrap()
//!     .unwrap();
//! assert!(found.contains(&product.primary_key));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod catalog;
mod collection;
mod config;
mod data;
mod dir;
mod engine;
mod error;
mod index;
mod schema;
mod session;
mod types;
mod wal;

pub use catalog::{
    Catalog, CatalogMode, CatalogOptions, CatalogState, CatalogTransaction, PrimaryKeySequences,
    STORAGE_PROTOCOL_VERSION,
};
pub use collection::EntityCollection;
pub use config::EngineConfig;
pub use data::{
    AttributeValue, CatalogMutation, Entity, EntityMutation, IntRange, LocalMutation, Price, PriceKey,
    Reference, ReferenceKey, SchemaMutation, UpsertEntity,
};
pub use dir::StorageDir;
pub use engine::{
    validate_catalog_name, CatalogContract, Engine, EngineState, ExpandedEngineState,
    ExpandedEngineStateBuilder, ENGINE_STORAGE_PROTOCOL_VERSION, MAX_CATALOG_NAME_LENGTH,
};
pub use error::{CardinalityViolation, CoreError, CoreResult, MissingMandatory};
pub use index::{
    AttributeKey, CompoundValue, EntityIndex, EntityIndexKey, EntityIndexType, FacetIndex, FacetKey,
    FilterIndex, HierarchyIndex, IndexProjection, IndexedAttribute, IndexedPrice, PriceIndexKey,
    PriceInnerRecordHandling, PriceListAndCurrencyIndex, RangeIndex, ScopeReference, SortElement,
    SortIndex, SortKey, SubIndex, UniqueIndex,
};
pub use schema::{
    AssociatedDataSchema, AttributeElement, AttributeIndexKind, AttributeSchema, AttributeType,
    Cardinality, CatalogSchema, EntitySchema, IndexKinds, OrderBehaviour, OrderDirection, ReferenceSchema,
    SortableAttributeCompoundSchema,
};
pub use session::Session;
pub use types::{CatalogVersion, EngineVersion, Locale, PrimaryKey, TransactionId};
pub use wal::{
    EngineOperation, EngineRecord, LogFileRecordReference, TransactionRecord, WalManager, WalRecordType,
};
