//! Entity collections.
//!
//! A collection owns the entities of one type, its global index and the
//! reduced indices implied by the entities' references. Every field is
//! shared behind an `Arc` so a catalog snapshot can be cloned cheaply and
//! copied on first write.

mod projection;
mod query;
mod validation;

use crate::data::{Entity, LocalMutation};
use crate::error::{CoreError, CoreResult};
use crate::index::{EntityIndex, EntityIndexKey, IndexProjection};
use crate::schema::{CatalogSchema, EntitySchema};
use crate::types::PrimaryKey;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Entities of one type and their indices.
#[derive(Debug, Clone)]
pub struct EntityCollection {
    schema: Arc<EntitySchema>,
    entities: Arc<BTreeMap<PrimaryKey, Arc<Entity>>>,
    global: Arc<EntityIndex>,
    reduced: Arc<BTreeMap<EntityIndexKey, Arc<EntityIndex>>>,
}

impl EntityCollection {
    /// Creates an empty collection.
    #[must_use]
    pub fn new(schema: EntitySchema) -> Self {
        let global = EntityIndex::new(EntityIndexKey::global(), schema.name.as_str());
        Self {
            schema: Arc::new(schema),
            entities: Arc::new(BTreeMap::new()),
            global: Arc::new(global),
            reduced: Arc::new(BTreeMap::new()),
        }
    }

    /// Restores a collection from persisted entities, rebuilding every index.
    ///
    /// # Errors
    ///
    /// Fails when the entities violate a unique constraint of the schema.
    pub fn restore(
        schema: EntitySchema,
        catalog: &CatalogSchema,
        entities: impl IntoIterator<Item = Entity>,
    ) -> CoreResult<Self> {
        let mut collection = Self::new(schema);
        Arc::make_mut(&mut collection.entities)
            .extend(entities.into_iter().map(|e| (e.primary_key, Arc::new(e))));
        collection.rebuild_indices(catalog)?;
        Ok(collection)
    }

    /// Entity type of the collection.
    #[must_use]
    pub fn entity_type(&self) -> &str {
        &self.schema.name
    }

    /// Schema of the collection.
    #[must_use]
    pub fn schema(&self) -> &EntitySchema {
        &self.schema
    }

    /// Number of entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns `true` when the collection holds no entity.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Entity with `primary_key`.
    #[must_use]
    pub fn get_entity(&self, primary_key: PrimaryKey) -> Option<&Arc<Entity>> {
        self.entities.get(&primary_key)
    }

    /// Entities in primary key order.
    pub fn entities(&self) -> impl Iterator<Item = &Arc<Entity>> {
        self.entities.values()
    }

    /// Highest primary key in use.
    #[must_use]
    pub fn max_primary_key(&self) -> PrimaryKey {
        self.entities.keys().next_back().copied().unwrap_or(0)
    }

    /// The collection-wide index.
    #[must_use]
    pub fn global_index(&self) -> &EntityIndex {
        &self.global
    }

    /// Index under `key`, or `None` when nothing in the collection falls in its scope.
    #[must_use]
    pub fn get_index_by_key_if_exists(&self, key: &EntityIndexKey) -> Option<&EntityIndex> {
        if key.is_global() {
            Some(&self.global)
        } else {
            self.reduced.get(key).map(Arc::as_ref)
        }
    }

    /// Keys of the reduced indices currently alive.
    pub fn reduced_index_keys(&self) -> impl Iterator<Item = &EntityIndexKey> {
        self.reduced.keys()
    }

    /// Applies `mutations` to the entity with `primary_key`, creating it when absent.
    ///
    /// The changed entity is validated against the schema before any index
    /// is touched, so a failing call leaves the collection unchanged.
    ///
    /// # Errors
    ///
    /// Schema violations, missing mandatory values, reference cardinality
    /// violations and unique constraint violations.
    pub fn upsert_entity(
        &mut self,
        catalog: &CatalogSchema,
        primary_key: PrimaryKey,
        mutations: &[LocalMutation],
    ) -> CoreResult<Arc<Entity>> {
        let old = self.entities.get(&primary_key).cloned();
        let mut entity = match &old {
            Some(existing) => Entity::clone(existing),
            None => Entity::new(self.schema.name.as_str(), primary_key),
        };
        for mutation in mutations {
            validation::check_mutation(&self.schema, mutation)?;
            if let LocalMutation::SetParent { parent } = mutation {
                self.check_parent(primary_key, *parent)?;
            }
            entity.apply(mutation)?;
        }
        entity.recompute_locales();
        if old.is_none() {
            validation::fill_defaults(&self.schema, &mut entity);
        }
        validation::check_mandatory(&self.schema, &entity)?;
        validation::check_cardinality(&self.schema, &entity)?;
        entity.version = old.as_ref().map_or(1, |e| e.version + 1);

        let previous = old
            .as_deref()
            .map(|e| projection::project(&self.schema, catalog, e))
            .unwrap_or_default();
        let next = projection::project(&self.schema, catalog, &entity);
        self.check_unique(primary_key, &next)?;
        self.reindex(primary_key, &previous, &next)?;

        let entity = Arc::new(entity);
        Arc::make_mut(&mut self.entities).insert(primary_key, Arc::clone(&entity));
        Ok(entity)
    }

    /// Removes the entity with `primary_key`. Returns `None` when it did not exist.
    pub fn delete_entity(
        &mut self,
        catalog: &CatalogSchema,
        primary_key: PrimaryKey,
    ) -> CoreResult<Option<Arc<Entity>>> {
        let Some(old) = Arc::make_mut(&mut self.entities).remove(&primary_key) else {
            return Ok(None);
        };
        let previous = projection::project(&self.schema, catalog, &old);
        self.reindex(primary_key, &previous, &BTreeMap::new())?;
        Ok(Some(old))
    }

    /// Removes the entity with `primary_key` and every entity below it in the hierarchy.
    ///
    /// Returns the removed primary keys, the root first.
    pub fn delete_entity_and_its_hierarchy(
        &mut self,
        catalog: &CatalogSchema,
        primary_key: PrimaryKey,
    ) -> CoreResult<Vec<PrimaryKey>> {
        if !self.entities.contains_key(&primary_key) {
            return Ok(Vec::new());
        }
        let mut removed = vec![primary_key];
        if let Some(hierarchy) = self.global.hierarchy_index() {
            removed.extend(hierarchy.descendants(primary_key));
        }
        for &pk in &removed {
            self.delete_entity(catalog, pk)?;
        }
        Ok(removed)
    }

    /// Drops references to deleted `primary_keys` of `entity_type` from every entity.
    ///
    /// Returns the number of entities changed. Cardinality is not re-checked.
    pub fn remove_references_to(
        &mut self,
        catalog: &CatalogSchema,
        entity_type: &str,
        primary_keys: &BTreeSet<PrimaryKey>,
    ) -> CoreResult<usize> {
        let names: Vec<String> = self
            .schema
            .references
            .values()
            .filter(|r| r.referenced_entity_type == entity_type)
            .map(|r| r.name.clone())
            .collect();
        if names.is_empty() || primary_keys.is_empty() {
            return Ok(0);
        }
        let affected: Vec<Arc<Entity>> = self
            .entities
            .values()
            .filter(|e| {
                e.references
                    .keys()
                    .any(|k| names.contains(&k.name) && primary_keys.contains(&k.primary_key))
            })
            .cloned()
            .collect();
        for old in &affected {
            let mut entity = Entity::clone(old);
            entity
                .references
                .retain(|k, _| !(names.contains(&k.name) && primary_keys.contains(&k.primary_key)));
            entity.recompute_locales();
            entity.version += 1;
            let previous = projection::project(&self.schema, catalog, old);
            let next = projection::project(&self.schema, catalog, &entity);
            self.reindex(entity.primary_key, &previous, &next)?;
            Arc::make_mut(&mut self.entities).insert(entity.primary_key, Arc::new(entity));
        }
        Ok(affected.len())
    }

    /// Replaces the schema and rebuilds every index.
    pub fn update_schema(&mut self, catalog: &CatalogSchema, schema: EntitySchema) -> CoreResult<()> {
        self.schema = Arc::new(schema);
        self.rebuild_indices(catalog)
    }

    /// Drops and recomputes every index from the entities.
    ///
    /// # Errors
    ///
    /// Fails when two entities hold the same unique value.
    pub fn rebuild_indices(&mut self, catalog: &CatalogSchema) -> CoreResult<()> {
        self.global = Arc::new(EntityIndex::new(EntityIndexKey::global(), self.schema.name.as_str()));
        self.reduced = Arc::new(BTreeMap::new());
        let entities: Vec<Arc<Entity>> = self.entities.values().cloned().collect();
        for entity in entities {
            let next = projection::project(&self.schema, catalog, &entity);
            self.reindex(entity.primary_key, &BTreeMap::new(), &next)?;
        }
        Ok(())
    }

    fn check_parent(&self, primary_key: PrimaryKey, parent: PrimaryKey) -> CoreResult<()> {
        let Some(hierarchy) = self.global.hierarchy_index() else {
            return Ok(());
        };
        let mut ancestor = Some(parent);
        while let Some(node) = ancestor {
            if node == primary_key {
                return Err(CoreError::invalid_operation(format!(
                    "placing entity `{}` {primary_key} under {parent} would create a cycle",
                    self.schema.name
                )));
            }
            ancestor = hierarchy.parent_of(node).flatten();
        }
        Ok(())
    }

    fn check_unique(
        &self,
        primary_key: PrimaryKey,
        next: &BTreeMap<EntityIndexKey, IndexProjection>,
    ) -> CoreResult<()> {
        for (key, projection) in next {
            if let Some(index) = self.get_index_by_key_if_exists(key) {
                index.check_unique(primary_key, projection)?;
            }
        }
        Ok(())
    }

    /// Moves `primary_key` from the `previous` set of indices to `next`,
    /// creating reduced indices on first use and dropping them once empty.
    fn reindex(
        &mut self,
        primary_key: PrimaryKey,
        previous: &BTreeMap<EntityIndexKey, IndexProjection>,
        next: &BTreeMap<EntityIndexKey, IndexProjection>,
    ) -> CoreResult<()> {
        for key in previous.keys().filter(|k| !next.contains_key(*k)) {
            if key.is_global() {
                Arc::make_mut(&mut self.global).remove_record(primary_key);
                continue;
            }
            let reduced = Arc::make_mut(&mut self.reduced);
            let emptied = reduced.get_mut(key).is_some_and(|index| {
                let index = Arc::make_mut(index);
                index.remove_record(primary_key);
                index.is_empty()
            });
            if emptied {
                reduced.remove(key);
            }
        }
        for (key, projection) in next {
            let old = previous.get(key);
            let index = if key.is_global() {
                Arc::make_mut(&mut self.global)
            } else {
                let entity_type = self.schema.name.as_str();
                Arc::make_mut(
                    Arc::make_mut(&mut self.reduced)
                        .entry(key.clone())
                        .or_insert_with(|| Arc::new(EntityIndex::new(key.clone(), entity_type))),
                )
            };
            index.apply(primary_key, old, projection)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::UpsertEntity;
    use crate::index::{AttributeKey, SubIndex};
    use crate::schema::{
        AttributeElement, AttributeSchema, AttributeType, Cardinality, OrderBehaviour,
        OrderDirection, ReferenceSchema, SortableAttributeCompoundSchema,
    };

    fn catalog() -> CatalogSchema {
        let mut catalog = CatalogSchema::new();
        catalog
            .upsert_entity(EntitySchema::new("CATEGORY").with_hierarchy())
            .unwrap();
        catalog.upsert_entity(EntitySchema::new("BRAND")).unwrap();
        catalog.upsert_entity(product()).unwrap();
        catalog
    }

    fn product() -> EntitySchema {
        EntitySchema::new("PRODUCT")
            .with_attribute(AttributeSchema::new("code", AttributeType::String).unique().nullable())
            .with_attribute(AttributeSchema::new("ean", AttributeType::String).nullable())
            .with_reference(
                ReferenceSchema::new("BRAND", "BRAND", Cardinality::ZeroOrOne)
                    .indexed()
                    .faceted(),
            )
            .with_reference(
                ReferenceSchema::new("CATEGORIES", "CATEGORY", Cardinality::ZeroOrMore).indexed(),
            )
            .with_sortable_attribute_compound(SortableAttributeCompoundSchema::new(
                "codeEan",
                vec![
                    AttributeElement::new("code", OrderDirection::Desc, OrderBehaviour::NullsFirst),
                    AttributeElement::new("ean", OrderDirection::Asc, OrderBehaviour::NullsLast),
                ],
            ))
    }

    fn upsert(collection: &mut EntityCollection, pk: PrimaryKey, upsert: UpsertEntity) -> CoreResult<Arc<Entity>> {
        collection.upsert_entity(&catalog(), pk, &upsert.mutations)
    }

    #[test]
    fn reduced_index_lives_while_referenced() {
        let mut products = EntityCollection::new(product());
        let brand_1 = EntityIndexKey::referenced_entity("BRAND", 1);
        assert!(products.get_index_by_key_if_exists(&brand_1).is_none());

        upsert(&mut products, 1, UpsertEntity::new("PRODUCT").reference("BRAND", 1)).unwrap();
        upsert(&mut products, 2, UpsertEntity::new("PRODUCT").reference("BRAND", 1)).unwrap();
        assert_eq!(products.get_index_by_key_if_exists(&brand_1).unwrap().len(), 2);

        upsert(&mut products, 1, UpsertEntity::new("PRODUCT").remove_reference("BRAND", 1)).unwrap();
        assert!(products.get_index_by_key_if_exists(&brand_1).is_some());
        products.delete_entity(&catalog(), 2).unwrap();
        assert!(products.get_index_by_key_if_exists(&brand_1).is_none());
        assert_eq!(products.reduced_index_keys().count(), 0);
    }

    #[test]
    fn hierarchical_targets_get_hierarchy_node_indices() {
        let mut products = EntityCollection::new(product());
        upsert(
            &mut products,
            1,
            UpsertEntity::new("PRODUCT").reference("CATEGORIES", 10).reference("CATEGORIES", 11),
        )
        .unwrap();
        let keys: Vec<_> = products.reduced_index_keys().cloned().collect();
        assert_eq!(
            keys,
            vec![
                EntityIndexKey::hierarchy_node("CATEGORY", 10),
                EntityIndexKey::hierarchy_node("CATEGORY", 11),
            ]
        );
    }

    #[test]
    fn failed_upsert_leaves_collection_untouched() {
        let mut products = EntityCollection::new(product());
        upsert(&mut products, 1, UpsertEntity::new("PRODUCT").attribute("code", "A")).unwrap();
        let err = upsert(
            &mut products,
            2,
            UpsertEntity::new("PRODUCT").attribute("code", "A").reference("BRAND", 4),
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unique constraint violation: attribute `code` value `A` is already present for entity `PRODUCT` (existing entity PK: 1, newly inserted entity PK: 2)!"
        );
        assert!(products.get_entity(2).is_none());
        assert!(products.get_index_by_key_if_exists(&EntityIndexKey::referenced_entity("BRAND", 4)).is_none());
        assert!(!products.global_index().contains(2));
    }

    #[test]
    fn compound_follows_constituents() {
        let mut products = EntityCollection::new(product());
        let compound = AttributeKey::new("codeEan");
        upsert(&mut products, 1, UpsertEntity::new("PRODUCT")).unwrap();
        let sort = products.global_index().sort_index(&compound).unwrap();
        assert_eq!(sort.records_equal_to(&[None, None]), vec![1]);

        upsert(&mut products, 1, UpsertEntity::existing("PRODUCT", 1).attribute("ean", "123").attribute("code", "ABC")).unwrap();
        let sort = products.global_index().sort_index(&compound).unwrap();
        assert!(sort.records_equal_to(&[None, None]).is_empty());
        assert_eq!(sort.records_equal_to(&[Some("ABC".into()), Some("123".into())]), vec![1]);

        upsert(&mut products, 1, UpsertEntity::existing("PRODUCT", 1).attribute("ean", "578").attribute("code", "Whatever")).unwrap();
        let sort = products.global_index().sort_index(&compound).unwrap();
        assert!(sort.records_equal_to(&[Some("ABC".into()), Some("123".into())]).is_empty());
        assert_eq!(sort.records_equal_to(&[Some("Whatever".into()), Some("578".into())]), vec![1]);

        products.delete_entity(&catalog(), 1).unwrap();
        assert!(products.global_index().sort_index(&compound).is_none());
    }

    #[test]
    fn compound_of_missing_values_sorts_first() {
        let mut products = EntityCollection::new(product());
        let compound = AttributeKey::new("codeEan");
        upsert(&mut products, 1, UpsertEntity::new("PRODUCT")).unwrap();
        upsert(&mut products, 2, UpsertEntity::new("PRODUCT").attribute("code", "ABC").attribute("ean", "123")).unwrap();

        let sort = products.global_index().sort_index(&compound).unwrap();
        assert_eq!(sort.records_equal_to(&[None, None]), vec![1]);
        assert_eq!(sort.sorted_records(OrderDirection::Asc), vec![1, 2]);
        assert_eq!(products.sorted_by(&compound, OrderDirection::Asc).unwrap(), vec![1, 2]);
        assert_eq!(products.sorted_by(&compound, OrderDirection::Desc).unwrap(), vec![2, 1]);
    }

    #[test]
    fn hierarchy_delete_removes_descendants() {
        let mut catalog = CatalogSchema::new();
        catalog
            .upsert_entity(EntitySchema::new("CATEGORY").with_hierarchy())
            .unwrap();
        let schema = catalog.entity("CATEGORY").cloned().unwrap();
        let mut categories = EntityCollection::new(schema);
        let tree = [(1, None), (2, Some(1)), (3, Some(2)), (4, None)];
        for (pk, parent) in tree {
            let mut mutation = UpsertEntity::new("CATEGORY");
            if let Some(parent) = parent {
                mutation = mutation.parent(parent);
            }
            categories.upsert_entity(&catalog, pk, &mutation.mutations).unwrap();
        }

        let err = categories
            .upsert_entity(&catalog, 1, &UpsertEntity::existing("CATEGORY", 1).parent(3).mutations)
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidOperation { .. }));

        let removed = categories.delete_entity_and_its_hierarchy(&catalog, 1).unwrap();
        assert_eq!(removed, vec![1, 2, 3]);
        assert_eq!(categories.len(), 1);
        assert_eq!(categories.global_index().hierarchy_index().unwrap().len(), 1);
    }

    #[test]
    fn removed_references_are_cascaded() {
        let mut products = EntityCollection::new(product());
        upsert(&mut products, 1, UpsertEntity::new("PRODUCT").reference("BRAND", 7)).unwrap();
        let changed = products
            .remove_references_to(&catalog(), "BRAND", &BTreeSet::from([7]))
            .unwrap();
        assert_eq!(changed, 1);
        assert_eq!(products.get_entity(1).unwrap().reference_count("BRAND"), 0);
        assert!(products.global_index().facet_index().is_none());
        assert_eq!(products.reduced_index_keys().count(), 0);
    }

    #[test]
    fn restore_rebuilds_indices() {
        let mut products = EntityCollection::new(product());
        upsert(&mut products, 3, UpsertEntity::new("PRODUCT").attribute("code", "C").reference("BRAND", 1)).unwrap();
        let entities: Vec<Entity> = products.entities().map(|e| Entity::clone(e)).collect();

        let restored = EntityCollection::restore(product(), &catalog(), entities).unwrap();
        assert_eq!(restored.max_primary_key(), 3);
        let unique = restored.global_index().unique_index(&AttributeKey::new("code")).unwrap();
        assert_eq!(unique.record_by_value(&"C".into()), Some(3));
        assert!(restored
            .get_index_by_key_if_exists(&EntityIndexKey::referenced_entity("BRAND", 1))
            .is_some_and(|i| !i.is_empty()));
        assert!(!unique.is_empty());
    }
}
