//! Entity data and the mutations that change it.

mod entity;
mod mutation;
mod value;

pub use entity::{Entity, Price, PriceKey, Reference, ReferenceKey};
pub use mutation::{CatalogMutation, EntityMutation, LocalMutation, SchemaMutation, UpsertEntity};
pub use value::{AttributeValue, IntRange};
