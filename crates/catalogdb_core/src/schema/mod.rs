//! Catalog, entity, attribute and reference schemas.
//!
//! Schemas decide which sub-indices an attribute is routed to, which values
//! are mandatory and how many references of each kind an entity may hold.

mod attribute;
mod catalog;
mod compound;
mod entity;
mod reference;

pub use attribute::{
    AssociatedDataSchema, AttributeIndexKind, AttributeSchema, AttributeType, IndexKinds,
};
pub use catalog::CatalogSchema;
pub use compound::{AttributeElement, OrderBehaviour, OrderDirection, SortableAttributeCompoundSchema};
pub use entity::EntitySchema;
pub use reference::{Cardinality, ReferenceSchema};
