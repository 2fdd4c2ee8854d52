//! Routing of an entity into the indices of its collection.

use crate::data::{AttributeValue, Entity};
use crate::index::{
    AttributeKey, CompoundValue, EntityIndexKey, FacetKey, IndexProjection, IndexedAttribute,
    IndexedPrice, PriceIndexKey, SortElement,
};
use crate::schema::{CatalogSchema, EntitySchema, SortableAttributeCompoundSchema};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Projections of `entity` for every index it belongs to.
///
/// The global index is always present. Every indexed reference adds the
/// reduced index of its target: a hierarchy node index when the referenced
/// entity type is hierarchical, a referenced entity index otherwise.
pub(crate) fn project(
    schema: &EntitySchema,
    catalog: &CatalogSchema,
    entity: &Entity,
) -> BTreeMap<EntityIndexKey, IndexProjection> {
    let base = base_projection(schema, entity);
    let mut targets = BTreeMap::new();

    for (reference_key, reference) in &entity.references {
        let Some(reference_schema) = schema.reference(&reference_key.name) else {
            continue;
        };
        if !reference_schema.indexed {
            continue;
        }
        let target = &reference_schema.referenced_entity_type;
        let index_key = if catalog.is_hierarchical(target) {
            EntityIndexKey::hierarchy_node(target.as_str(), reference_key.primary_key)
        } else {
            EntityIndexKey::referenced_entity(target.as_str(), reference_key.primary_key)
        };
        let projection = targets.entry(index_key).or_insert_with(|| base.clone());
        for (key, value) in &reference.attributes {
            let Some(attribute) = reference_schema.attribute(&key.name) else {
                continue;
            };
            let kinds = attribute.index_kinds();
            if kinds.is_empty() {
                continue;
            }
            // first reference to the same target wins
            projection
                .attributes
                .entry(key.clone())
                .or_insert_with(|| IndexedAttribute {
                    value: value.clone(),
                    kinds,
                });
        }
    }

    let mut global = base;
    for reference_key in entity.references.keys() {
        if schema
            .reference(&reference_key.name)
            .is_some_and(|r| r.faceted)
        {
            global
                .facets
                .insert(FacetKey::new(reference_key.name.as_str(), reference_key.primary_key));
        }
    }
    if schema.with_hierarchy {
        global.hierarchy = Some(entity.parent);
    }
    targets.insert(EntityIndexKey::global(), global);
    targets
}

fn base_projection(schema: &EntitySchema, entity: &Entity) -> IndexProjection {
    let mut projection = IndexProjection {
        locales: entity.locales().clone(),
        ..IndexProjection::default()
    };
    for (key, value) in &entity.attributes {
        let Some(attribute) = schema.attribute(&key.name) else {
            continue;
        };
        let kinds = attribute.index_kinds();
        if !kinds.is_empty() {
            projection.attributes.insert(
                key.clone(),
                IndexedAttribute {
                    value: value.clone(),
                    kinds,
                },
            );
        }
    }
    for compound in schema.sortable_attribute_compounds.values() {
        project_compound(schema, compound, entity, &mut projection);
    }
    for price in entity.prices.values().filter(|p| p.sellable) {
        projection
            .prices
            .entry(PriceIndexKey::new(
                price.price_list.as_str(),
                price.currency.as_str(),
                entity.price_inner_record_handling,
            ))
            .or_default()
            .push(IndexedPrice {
                price_id: price.price_id,
                inner_record_id: price.inner_record_id,
                price_without_tax: price.price_without_tax,
                price_with_tax: price.price_with_tax,
            });
    }
    projection
}

/// Adds the compound values of `entity`. Every entity gets a key, missing
/// values included; localized compounds get one key per entity locale.
fn project_compound(
    schema: &EntitySchema,
    compound: &SortableAttributeCompoundSchema,
    entity: &Entity,
    projection: &mut IndexProjection,
) {
    let elements: Arc<[SortElement]> = compound.elements.iter().map(SortElement::from).collect();
    let value_of = |name: &str, key: &AttributeKey| -> Option<AttributeValue> {
        let localized = schema.attribute(name).is_some_and(|a| a.localized);
        if localized {
            entity.attributes.get(key).cloned()
        } else {
            entity.attributes.get(&AttributeKey::new(name)).cloned()
        }
    };

    if schema.is_compound_localized(compound) {
        for locale in entity.locales() {
            let values: Vec<Option<AttributeValue>> = compound
                .elements
                .iter()
                .map(|e| {
                    value_of(
                        &e.attribute_name,
                        &AttributeKey::localized(e.attribute_name.as_str(), locale.clone()),
                    )
                })
                .collect();
            projection.compounds.insert(
                AttributeKey::localized(compound.name.as_str(), locale.clone()),
                CompoundValue {
                    elements: Arc::clone(&elements),
                    values,
                },
            );
        }
    } else {
        let values: Vec<Option<AttributeValue>> = compound
            .elements
            .iter()
            .map(|e| entity.attributes.get(&AttributeKey::new(e.attribute_name.as_str())).cloned())
            .collect();
        projection
            .compounds
            .insert(AttributeKey::new(compound.name.as_str()), CompoundValue { elements, values });
    }
}
