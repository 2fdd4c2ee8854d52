//! Catalog schema.

use super::entity::EntitySchema;
use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Schema of a whole catalog: one [`EntitySchema`] per entity type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSchema {
    entities: BTreeMap<String, EntitySchema>,
}

impl CatalogSchema {
    /// Creates an empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up an entity schema.
    #[must_use]
    pub fn entity(&self, entity_type: &str) -> Option<&EntitySchema> {
        self.entities.get(entity_type)
    }

    /// Iterates entity schemas in name order.
    pub fn entities(&self) -> impl Iterator<Item = &EntitySchema> {
        self.entities.values()
    }

    /// Returns `true` when `entity_type` exists and is hierarchical.
    #[must_use]
    pub fn is_hierarchical(&self, entity_type: &str) -> bool {
        self.entity(entity_type).is_some_and(|s| s.with_hierarchy)
    }

    /// Entity types with at least one reference to `entity_type`.
    #[must_use]
    pub fn referencing(&self, entity_type: &str) -> Vec<String> {
        self.entities
            .values()
            .filter(|s| {
                s.references
                    .values()
                    .any(|r| r.referenced_entity_type == entity_type)
            })
            .map(|s| s.name.clone())
            .collect()
    }

    /// Validates and stores `schema`, bumping its version past the one it replaces.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SchemaViolation`] when the schema is inconsistent.
    pub fn upsert_entity(&mut self, mut schema: EntitySchema) -> CoreResult<&EntitySchema> {
        schema.validate()?;
        schema.version = self
            .entities
            .get(&schema.name)
            .map_or(1, |previous| previous.version + 1);
        let name = schema.name.clone();
        self.entities.insert(name.clone(), schema);
        self.entities
            .get(&name)
            .ok_or_else(|| CoreError::CollectionNotFound { name })
    }

    /// Removes an entity schema.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CollectionNotFound`] when no schema of that name exists.
    pub fn remove_entity(&mut self, entity_type: &str) -> CoreResult<EntitySchema> {
        self.entities
            .remove(entity_type)
            .ok_or_else(|| CoreError::CollectionNotFound {
                name: entity_type.to_string(),
            })
    }
}
