//! Catalog snapshots.

use crate::collection::EntityCollection;
use crate::data::{AttributeValue, CatalogMutation, Entity, EntityMutation, LocalMutation, SchemaMutation};
use crate::error::{CoreError, CoreResult};
use crate::index::{
    AttributeKey, EntityIndex, EntityIndexKey, FilterIndex, PriceInnerRecordHandling, PriceListAndCurrencyIndex,
    SortIndex, UniqueIndex,
};
use crate::schema::{CatalogSchema, EntitySchema, OrderDirection};
use crate::types::{CatalogVersion, Locale, PrimaryKey};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// One immutable version of a catalog: its schema and every collection.
///
/// Cloning is cheap; collections are shared until a writer touches them.
/// Readers hold an `Arc<CatalogState>` and never observe later commits.
#[derive(Debug, Clone)]
pub struct CatalogState {
    name: String,
    version: CatalogVersion,
    schema: Arc<CatalogSchema>,
    collections: BTreeMap<String, Arc<EntityCollection>>,
}

impl CatalogState {
    /// An empty catalog at version 0.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: CatalogVersion::default(),
            schema: Arc::new(CatalogSchema::new()),
            collections: BTreeMap::new(),
        }
    }

    pub(crate) fn from_parts(
        name: impl Into<String>,
        version: CatalogVersion,
        schema: CatalogSchema,
        collections: impl IntoIterator<Item = EntityCollection>,
    ) -> Self {
        Self {
            name: name.into(),
            version,
            schema: Arc::new(schema),
            collections: collections
                .into_iter()
                .map(|c| (c.entity_type().to_string(), Arc::new(c)))
                .collect(),
        }
    }

    /// Catalog name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Version of this snapshot.
    #[must_use]
    pub fn version(&self) -> CatalogVersion {
        self.version
    }

    /// Catalog schema.
    #[must_use]
    pub fn schema(&self) -> &CatalogSchema {
        &self.schema
    }

    /// Entity types in name order.
    pub fn entity_types(&self) -> impl Iterator<Item = &str> {
        self.collections.keys().map(String::as_str)
    }

    /// Collections in entity type order.
    pub fn collections(&self) -> impl Iterator<Item = &EntityCollection> {
        self.collections.values().map(Arc::as_ref)
    }

    /// Collection of `entity_type`.
    ///
    /// # Errors
    ///
    /// [`CoreError::CollectionNotFound`] when the type is not defined.
    pub fn collection(&self, entity_type: &str) -> CoreResult<&EntityCollection> {
        self.collections
            .get(entity_type)
            .map(Arc::as_ref)
            .ok_or_else(|| CoreError::CollectionNotFound {
                name: entity_type.to_string(),
            })
    }

    /// Entity of `entity_type` with `primary_key`, if it exists at this version.
    pub fn get_entity(&self, entity_type: &str, primary_key: PrimaryKey) -> CoreResult<Option<Arc<Entity>>> {
        Ok(self.collection(entity_type)?.get_entity(primary_key).cloned())
    }

    /// Number of entities of `entity_type`.
    pub fn entity_count(&self, entity_type: &str) -> CoreResult<usize> {
        Ok(self.collection(entity_type)?.len())
    }

    /// Index of `entity_type` under `key`; `None` when it does not exist.
    pub fn get_index_by_key_if_exists(
        &self,
        entity_type: &str,
        key: &EntityIndexKey,
    ) -> CoreResult<Option<&EntityIndex>> {
        Ok(self.collection(entity_type)?.get_index_by_key_if_exists(key))
    }

    /// Unique sub-index of the global index of `entity_type`.
    pub fn unique_index(&self, entity_type: &str, attribute: &AttributeKey) -> CoreResult<Option<&UniqueIndex>> {
        Ok(self.collection(entity_type)?.global_index().unique_index(attribute))
    }

    /// Filter sub-index of the global index of `entity_type`.
    pub fn filter_index(&self, entity_type: &str, attribute: &AttributeKey) -> CoreResult<Option<&FilterIndex>> {
        Ok(self.collection(entity_type)?.global_index().filter_index(attribute))
    }

    /// Sort sub-index of the global index of `entity_type`.
    pub fn sort_index(&self, entity_type: &str, attribute: &AttributeKey) -> CoreResult<Option<&SortIndex>> {
        Ok(self.collection(entity_type)?.global_index().sort_index(attribute))
    }

    /// Price sub-index of the global index of `entity_type`.
    pub fn price_index(
        &self,
        entity_type: &str,
        price_list: &str,
        currency: &str,
        handling: PriceInnerRecordHandling,
    ) -> CoreResult<Option<&PriceListAndCurrencyIndex>> {
        Ok(self
            .collection(entity_type)?
            .global_index()
            .price_index(price_list, currency, handling))
    }

    /// See [`EntityCollection::query_by_attribute_equals`].
    pub fn query_by_attribute_equals(
        &self,
        entity_type: &str,
        attribute: &AttributeKey,
        value: &AttributeValue,
    ) -> CoreResult<BTreeSet<PrimaryKey>> {
        self.collection(entity_type)?.query_by_attribute_equals(attribute, value)
    }

    /// See [`EntityCollection::query_by_attribute_range`].
    pub fn query_by_attribute_range(
        &self,
        entity_type: &str,
        attribute: &AttributeKey,
        from: i64,
        to: i64,
    ) -> CoreResult<BTreeSet<PrimaryKey>> {
        self.collection(entity_type)?.query_by_attribute_range(attribute, from, to)
    }

    /// Entities of `entity_type` carrying at least one value in `locale`.
    pub fn entity_locale_equals(&self, entity_type: &str, locale: &Locale) -> CoreResult<BTreeSet<PrimaryKey>> {
        Ok(self.collection(entity_type)?.entity_locale_equals(locale))
    }

    /// See [`EntityCollection::sorted_by`].
    pub fn sorted_by(
        &self,
        entity_type: &str,
        attribute: &AttributeKey,
        direction: OrderDirection,
    ) -> CoreResult<Vec<PrimaryKey>> {
        self.collection(entity_type)?.sorted_by(attribute, direction)
    }

    /// Entities of `entity_type` referencing `primary_key` through faceted `reference`.
    pub fn facet_entities(
        &self,
        entity_type: &str,
        reference: &str,
        primary_key: PrimaryKey,
    ) -> CoreResult<BTreeSet<PrimaryKey>> {
        Ok(self.collection(entity_type)?.facet_entities(reference, primary_key))
    }

    /// See [`EntityCollection::price_filter`].
    pub fn price_filter(
        &self,
        entity_type: &str,
        price_list: &str,
        currency: &str,
        min: i64,
        max: i64,
    ) -> CoreResult<Vec<PrimaryKey>> {
        Ok(self.collection(entity_type)?.price_filter(price_list, currency, min, max))
    }

    /// Entities of `entity_type` within the subtree of `root` in hierarchy
    /// `hierarchy_type`, leaving out the subtrees of `excluding`.
    ///
    /// For the hierarchical type itself these are the tree nodes. For any
    /// other type an entity matches when at least one hierarchy node it
    /// references is included, even if it also references excluded nodes.
    ///
    /// # Errors
    ///
    /// Fails when `hierarchy_type` is not hierarchical or `entity_type` has no
    /// indexed reference to it.
    pub fn within_hierarchy(
        &self,
        entity_type: &str,
        hierarchy_type: &str,
        root: PrimaryKey,
        excluding: &[PrimaryKey],
    ) -> CoreResult<BTreeSet<PrimaryKey>> {
        let tree = self.collection(hierarchy_type)?;
        if !tree.schema().with_hierarchy {
            return Err(CoreError::schema_violation(format!(
                "Entity `{hierarchy_type}` is not hierarchical."
            )));
        }
        let nodes = tree
            .global_index()
            .hierarchy_index()
            .map(|h| h.within(root, excluding))
            .unwrap_or_default();
        if entity_type == hierarchy_type {
            return Ok(nodes);
        }

        let collection = self.collection(entity_type)?;
        let references_tree = collection
            .schema()
            .references
            .values()
            .any(|r| r.indexed && r.referenced_entity_type == hierarchy_type);
        if !references_tree {
            return Err(CoreError::schema_violation(format!(
                "Entity `{entity_type}` has no indexed reference to hierarchy `{hierarchy_type}`."
            )));
        }
        Ok(nodes
            .into_iter()
            .filter_map(|node| {
                collection.get_index_by_key_if_exists(&EntityIndexKey::hierarchy_node(hierarchy_type, node))
            })
            .flat_map(|index| index.records().iter().copied())
            .collect())
    }

    pub(crate) fn set_version(&mut self, version: CatalogVersion) {
        self.version = version;
    }

    pub(crate) fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    fn collection_mut(&mut self, entity_type: &str) -> CoreResult<&mut EntityCollection> {
        self.collections
            .get_mut(entity_type)
            .map(Arc::make_mut)
            .ok_or_else(|| CoreError::CollectionNotFound {
                name: entity_type.to_string(),
            })
    }

    pub(crate) fn upsert_entity(
        &mut self,
        entity_type: &str,
        primary_key: PrimaryKey,
        mutations: &[LocalMutation],
    ) -> CoreResult<Arc<Entity>> {
        let schema = Arc::clone(&self.schema);
        self.collection_mut(entity_type)?
            .upsert_entity(&schema, primary_key, mutations)
    }

    pub(crate) fn delete_entity(&mut self, entity_type: &str, primary_key: PrimaryKey) -> CoreResult<bool> {
        let schema = Arc::clone(&self.schema);
        let removed = self
            .collection_mut(entity_type)?
            .delete_entity(&schema, primary_key)?
            .is_some();
        if removed {
            self.remove_references_to(entity_type, &BTreeSet::from([primary_key]))?;
        }
        Ok(removed)
    }

    pub(crate) fn delete_entity_and_its_hierarchy(
        &mut self,
        entity_type: &str,
        primary_key: PrimaryKey,
    ) -> CoreResult<Vec<PrimaryKey>> {
        let schema = Arc::clone(&self.schema);
        let removed = self
            .collection_mut(entity_type)?
            .delete_entity_and_its_hierarchy(&schema, primary_key)?;
        if !removed.is_empty() {
            self.remove_references_to(entity_type, &removed.iter().copied().collect())?;
        }
        Ok(removed)
    }

    fn remove_references_to(&mut self, entity_type: &str, primary_keys: &BTreeSet<PrimaryKey>) -> CoreResult<()> {
        let schema = Arc::clone(&self.schema);
        for referencing in schema.referencing(entity_type) {
            if let Some(collection) = self.collections.get_mut(&referencing) {
                Arc::make_mut(collection).remove_references_to(&schema, entity_type, primary_keys)?;
            }
        }
        Ok(())
    }

    /// Stores `schema` and rebuilds every collection whose indices depend on it.
    ///
    /// `based_on` is the schema version the caller saw, 0 for a new type.
    /// Nothing changes when any step fails.
    pub(crate) fn upsert_entity_schema(&mut self, schema: EntitySchema, based_on: u32) -> CoreResult<EntitySchema> {
        let previous = self.schema.entity(&schema.name);
        if previous.map_or(0, |s| s.version) != based_on {
            return Err(CoreError::ConcurrentSchemaUpdate {
                catalog: self.name.clone(),
                entity_type: schema.name,
            });
        }
        let was_hierarchical = previous.is_some_and(|s| s.with_hierarchy);

        let mut catalog = CatalogSchema::clone(&self.schema);
        let stored = catalog.upsert_entity(schema)?.clone();

        let mut changed = BTreeMap::new();
        let own = match self.collections.get(&stored.name) {
            Some(existing) => {
                let mut collection = EntityCollection::clone(existing);
                collection.update_schema(&catalog, stored.clone())?;
                collection
            }
            None => EntityCollection::new(stored.clone()),
        };
        changed.insert(stored.name.clone(), own);
        if was_hierarchical != stored.with_hierarchy {
            self.rebuild_referencing(&catalog, &stored.name, &mut changed)?;
        }

        self.schema = Arc::new(catalog);
        for (name, collection) in changed {
            self.collections.insert(name, Arc::new(collection));
        }
        Ok(stored)
    }

    /// Drops an entity type together with its collection.
    pub(crate) fn remove_entity_schema(&mut self, entity_type: &str) -> CoreResult<()> {
        let mut catalog = CatalogSchema::clone(&self.schema);
        let removed = catalog.remove_entity(entity_type)?;
        let mut changed = BTreeMap::new();
        if removed.with_hierarchy {
            self.rebuild_referencing(&catalog, entity_type, &mut changed)?;
        }
        self.schema = Arc::new(catalog);
        self.collections.remove(entity_type);
        for (name, collection) in changed {
            self.collections.insert(name, Arc::new(collection));
        }
        Ok(())
    }

    fn rebuild_referencing(
        &self,
        catalog: &CatalogSchema,
        entity_type: &str,
        changed: &mut BTreeMap<String, EntityCollection>,
    ) -> CoreResult<()> {
        for referencing in catalog.referencing(entity_type) {
            if referencing == entity_type {
                continue;
            }
            if let Some(existing) = self.collections.get(&referencing) {
                let mut collection = EntityCollection::clone(existing);
                collection.rebuild_indices(catalog)?;
                changed.insert(referencing, collection);
            }
        }
        Ok(())
    }

    /// Re-applies a staged or logged mutation whose primary keys are resolved.
    pub(crate) fn apply(&mut self, mutation: &CatalogMutation) -> CoreResult<()> {
        match mutation {
            CatalogMutation::Schema(SchemaMutation::UpsertEntitySchema { schema, based_on }) => {
                self.upsert_entity_schema(schema.clone(), *based_on).map(drop)
            }
            CatalogMutation::Schema(SchemaMutation::RemoveEntitySchema { name }) => self.remove_entity_schema(name),
            CatalogMutation::Entity(EntityMutation::Upsert(upsert)) => {
                let primary_key = upsert.primary_key.ok_or_else(|| {
                    CoreError::invalid_operation(format!(
                        "upsert of `{}` has no resolved primary key",
                        upsert.entity_type
                    ))
                })?;
                self.upsert_entity(&upsert.entity_type, primary_key, &upsert.mutations)
                    .map(drop)
            }
            CatalogMutation::Entity(EntityMutation::Delete {
                entity_type,
                primary_key,
            }) => self.delete_entity(entity_type, *primary_key).map(drop),
            CatalogMutation::Entity(EntityMutation::DeleteWithHierarchy {
                entity_type,
                primary_key,
            }) => self
                .delete_entity_and_its_hierarchy(entity_type, *primary_key)
                .map(drop),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::UpsertEntity;
    use crate::schema::{AttributeSchema, AttributeType, Cardinality, ReferenceSchema};

    fn schema_mutation(schema: EntitySchema, based_on: u32) -> CatalogMutation {
        CatalogMutation::Schema(SchemaMutation::UpsertEntitySchema { schema, based_on })
    }

    fn upsert(upsert: UpsertEntity) -> CatalogMutation {
        CatalogMutation::Entity(EntityMutation::Upsert(upsert))
    }

    fn category() -> EntitySchema {
        EntitySchema::new("CATEGORY").with_hierarchy()
    }

    fn product() -> EntitySchema {
        EntitySchema::new("PRODUCT")
            .with_attribute(AttributeSchema::new("code", AttributeType::String).unique())
            .with_reference(ReferenceSchema::new("categories", "CATEGORY", Cardinality::ZeroOrMore).indexed())
    }

    fn shop() -> CatalogState {
        let mut state = CatalogState::new("shop");
        state.apply(&schema_mutation(category(), 0)).unwrap();
        state.apply(&schema_mutation(product(), 0)).unwrap();
        // 1 ── 2 ── 4
        //  └── 3
        for (pk, parent) in [(1, None), (2, Some(1)), (3, Some(1)), (4, Some(2))] {
            let mut entity = UpsertEntity::existing("CATEGORY", pk);
            if let Some(parent) = parent {
                entity = entity.parent(parent);
            }
            state.apply(&upsert(entity)).unwrap();
        }
        for (pk, code, categories) in [(1, "A", vec![2]), (2, "B", vec![3]), (3, "C", vec![3, 4])] {
            let mut entity = UpsertEntity::existing("PRODUCT", pk).attribute("code", code);
            for category in categories {
                entity = entity.reference("categories", category);
            }
            state.apply(&upsert(entity)).unwrap();
        }
        state
    }

    #[test]
    fn within_hierarchy_keeps_entities_with_any_included_node() {
        let state = shop();
        assert_eq!(
            state.within_hierarchy("CATEGORY", "CATEGORY", 1, &[2]).unwrap(),
            BTreeSet::from([1, 3])
        );
        assert_eq!(
            state.within_hierarchy("PRODUCT", "CATEGORY", 1, &[2]).unwrap(),
            BTreeSet::from([2, 3])
        );
        assert_eq!(
            state.within_hierarchy("PRODUCT", "CATEGORY", 2, &[]).unwrap(),
            BTreeSet::from([1, 3])
        );
        assert!(state.within_hierarchy("CATEGORY", "PRODUCT", 1, &[]).is_err());
    }

    #[test]
    fn deleting_a_subtree_drops_references_and_reduced_indices() {
        let mut state = shop();
        let removed = state.delete_entity_and_its_hierarchy("CATEGORY", 2).unwrap();
        assert_eq!(removed, vec![2, 4]);
        assert_eq!(state.entity_count("CATEGORY").unwrap(), 2);

        let products = state.collection("PRODUCT").unwrap();
        assert!(products.get_entity(1).unwrap().references.is_empty());
        assert_eq!(products.get_entity(3).unwrap().references.len(), 1);
        for node in [2, 4] {
            assert!(products
                .get_index_by_key_if_exists(&EntityIndexKey::hierarchy_node("CATEGORY", node))
                .is_none());
        }
        assert!(products
            .get_index_by_key_if_exists(&EntityIndexKey::hierarchy_node("CATEGORY", 3))
            .is_some());
    }

    #[test]
    fn stale_schema_version_is_rejected() {
        let mut state = shop();
        let err = state.upsert_entity_schema(product(), 0).unwrap_err();
        assert!(matches!(err, CoreError::ConcurrentSchemaUpdate { .. }));
        let stored = state.upsert_entity_schema(product(), 1).unwrap();
        assert_eq!(stored.version, 2);
    }

    #[test]
    fn dropping_hierarchy_flag_reroutes_references() {
        let mut state = shop();
        state
            .upsert_entity_schema(EntitySchema::new("CATEGORY"), 1)
            .unwrap();
        let products = state.collection("PRODUCT").unwrap();
        assert!(products
            .get_index_by_key_if_exists(&EntityIndexKey::hierarchy_node("CATEGORY", 3))
            .is_none());
        assert!(products
            .get_index_by_key_if_exists(&EntityIndexKey::referenced_entity("CATEGORY", 3))
            .is_some());
    }

    #[test]
    fn failed_schema_change_leaves_state_untouched() {
        let mut state = shop();
        let plain_code = product().with_attribute(AttributeSchema::new("code", AttributeType::String));
        state.upsert_entity_schema(plain_code, 1).unwrap();
        state
            .upsert_entity("PRODUCT", 2, &UpsertEntity::existing("PRODUCT", 2).attribute("code", "A").mutations)
            .unwrap();

        let err = state.upsert_entity_schema(product(), 2).unwrap_err();
        assert!(matches!(err, CoreError::UniqueValueViolation { .. }));
        assert_eq!(state.schema().entity("PRODUCT").unwrap().version, 2);
        assert!(!state.collection("PRODUCT").unwrap().schema().attribute("code").unwrap().unique);
    }

    #[test]
    fn removing_a_type_drops_its_collection() {
        let mut state = shop();
        state.remove_entity_schema("PRODUCT").unwrap();
        assert!(matches!(
            state.collection("PRODUCT"),
            Err(CoreError::CollectionNotFound { .. })
        ));
        assert!(state.remove_entity_schema("PRODUCT").is_err());
    }
}
