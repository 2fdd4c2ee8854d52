//! Write transactions.

use super::sequence::PrimaryKeySequences;
use super::state::CatalogState;
use crate::data::{CatalogMutation, Entity, EntityMutation, SchemaMutation, UpsertEntity};
use crate::error::{CoreError, CoreResult};
use crate::schema::EntitySchema;
use crate::types::{CatalogVersion, PrimaryKey, TransactionId};
use std::sync::Arc;

/// A write transaction over a private working copy of a catalog snapshot.
///
/// Every call applies its change to the working copy right away, so reads
/// through [`state`](Self::state) see the transaction's own writes, and
/// stages it for commit with primary keys resolved. Dropping the
/// transaction discards everything.
#[derive(Debug)]
pub struct CatalogTransaction {
    id: TransactionId,
    base_version: CatalogVersion,
    working: CatalogState,
    mutations: Vec<CatalogMutation>,
    sequences: Arc<PrimaryKeySequences>,
}

impl CatalogTransaction {
    pub(crate) fn new(id: TransactionId, base: &CatalogState, sequences: Arc<PrimaryKeySequences>) -> Self {
        Self {
            id,
            base_version: base.version(),
            working: base.clone(),
            mutations: Vec::new(),
            sequences,
        }
    }

    /// Transaction id.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Catalog version the transaction started from.
    #[must_use]
    pub fn base_version(&self) -> CatalogVersion {
        self.base_version
    }

    /// The working copy, including this transaction's changes.
    #[must_use]
    pub fn state(&self) -> &CatalogState {
        &self.working
    }

    /// Staged mutations in application order.
    #[must_use]
    pub fn mutations(&self) -> &[CatalogMutation] {
        &self.mutations
    }

    /// Returns `true` when nothing was staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    /// Creates or updates an entity and returns it as stored.
    ///
    /// Without a primary key, types with generated keys receive the next key
    /// of their sequence. Types with generated keys only accept an explicit
    /// key of an entity that already exists.
    ///
    /// # Errors
    ///
    /// Any validation error of [`crate::EntityCollection::upsert_entity`], and
    /// [`CoreError::InvalidOperation`] when the primary key is missing or not
    /// allowed.
    pub fn upsert_entity(&mut self, upsert: UpsertEntity) -> CoreResult<Arc<Entity>> {
        let primary_key = self.resolve_primary_key(&upsert)?;
        let entity = self
            .working
            .upsert_entity(&upsert.entity_type, primary_key, &upsert.mutations)?;
        self.mutations
            .push(CatalogMutation::Entity(EntityMutation::Upsert(UpsertEntity {
                primary_key: Some(primary_key),
                ..upsert
            })));
        Ok(entity)
    }

    fn resolve_primary_key(&self, upsert: &UpsertEntity) -> CoreResult<PrimaryKey> {
        let collection = self.working.collection(&upsert.entity_type)?;
        let generated = collection.schema().with_generated_primary_key;
        match upsert.primary_key {
            Some(primary_key) if generated => {
                if collection.get_entity(primary_key).is_none() {
                    return Err(CoreError::invalid_operation(format!(
                        "entity `{}` generates its primary keys, {primary_key} was not assigned",
                        upsert.entity_type
                    )));
                }
                Ok(primary_key)
            }
            Some(primary_key) => {
                self.sequences.observe(&upsert.entity_type, primary_key);
                Ok(primary_key)
            }
            None if generated => self.sequences.next(&upsert.entity_type),
            None => Err(CoreError::invalid_operation(format!(
                "entity `{}` requires an explicit primary key",
                upsert.entity_type
            ))),
        }
    }

    /// Removes an entity and the references to it. Returns `false` when it
    /// did not exist.
    pub fn delete_entity(&mut self, entity_type: &str, primary_key: PrimaryKey) -> CoreResult<bool> {
        let removed = self.working.delete_entity(entity_type, primary_key)?;
        if removed {
            self.mutations.push(CatalogMutation::Entity(EntityMutation::Delete {
                entity_type: entity_type.to_string(),
                primary_key,
            }));
        }
        Ok(removed)
    }

    /// Removes an entity, its hierarchy descendants and every reference to
    /// them. Returns the removed primary keys, the root first.
    pub fn delete_entity_and_its_hierarchy(
        &mut self,
        entity_type: &str,
        primary_key: PrimaryKey,
    ) -> CoreResult<Vec<PrimaryKey>> {
        let removed = self
            .working
            .delete_entity_and_its_hierarchy(entity_type, primary_key)?;
        if !removed.is_empty() {
            self.mutations
                .push(CatalogMutation::Entity(EntityMutation::DeleteWithHierarchy {
                    entity_type: entity_type.to_string(),
                    primary_key,
                }));
        }
        Ok(removed)
    }

    /// Creates or replaces an entity schema and returns it with its new version.
    ///
    /// # Errors
    ///
    /// [`CoreError::SchemaViolation`] for an inconsistent schema, or a unique
    /// violation when existing entities clash under the new schema.
    pub fn update_entity_schema(&mut self, schema: EntitySchema) -> CoreResult<EntitySchema> {
        let based_on = self
            .working
            .schema()
            .entity(&schema.name)
            .map_or(0, |s| s.version);
        let stored = self.working.upsert_entity_schema(schema.clone(), based_on)?;
        self.mutations
            .push(CatalogMutation::Schema(SchemaMutation::UpsertEntitySchema { schema, based_on }));
        Ok(stored)
    }

    /// Removes an entity type with all its entities.
    pub fn remove_entity_schema(&mut self, entity_type: &str) -> CoreResult<()> {
        self.working.remove_entity_schema(entity_type)?;
        self.mutations
            .push(CatalogMutation::Schema(SchemaMutation::RemoveEntitySchema {
                name: entity_type.to_string(),
            }));
        Ok(())
    }

    pub(crate) fn into_parts(self) -> (TransactionId, CatalogVersion, CatalogState, Vec<CatalogMutation>) {
        (self.id, self.base_version, self.working, self.mutations)
    }
}
