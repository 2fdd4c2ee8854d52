//! Read helpers over the global index of a collection.

use super::EntityCollection;
use crate::data::AttributeValue;
use crate::error::{CoreError, CoreResult};
use crate::index::{AttributeKey, FacetKey, PriceInnerRecordHandling, SubIndex};
use crate::schema::{AttributeSchema, AttributeType, OrderDirection};
use crate::types::{Locale, PrimaryKey};
use std::collections::BTreeSet;

impl EntityCollection {
    fn declared(&self, key: &AttributeKey) -> CoreResult<&AttributeSchema> {
        self.schema.attribute(&key.name).ok_or_else(|| {
            CoreError::schema_violation(format!(
                "Attribute `{}` is not defined in entity `{}`.",
                key.name, self.schema.name
            ))
        })
    }

    /// Entities whose attribute equals `value`.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::SchemaViolation`] when the attribute is unknown
    /// or neither filterable nor unique.
    pub fn query_by_attribute_equals(
        &self,
        key: &AttributeKey,
        value: &AttributeValue,
    ) -> CoreResult<BTreeSet<PrimaryKey>> {
        let attribute = self.declared(key)?;
        if attribute.filterable {
            return Ok(self
                .global
                .filter_index(key)
                .map(|index| index.records_equal_to(value))
                .unwrap_or_default());
        }
        if attribute.unique {
            return Ok(self
                .global
                .unique_index(key)
                .and_then(|index| index.record_by_value(value))
                .into_iter()
                .collect());
        }
        Err(CoreError::schema_violation(format!(
            "Attribute `{}` of entity `{}` is neither filterable nor unique.",
            key.name, self.schema.name
        )))
    }

    /// Entities whose attribute lies within `[from, to]`.
    ///
    /// Range-typed attributes match when their range overlaps the interval.
    ///
    /// # Errors
    ///
    /// Fails when the attribute is unknown, not filterable, or not numeric.
    pub fn query_by_attribute_range(
        &self,
        key: &AttributeKey,
        from: i64,
        to: i64,
    ) -> CoreResult<BTreeSet<PrimaryKey>> {
        let attribute = self.declared(key)?;
        if !attribute.filterable {
            return Err(CoreError::schema_violation(format!(
                "Attribute `{}` of entity `{}` is not filterable.",
                key.name, self.schema.name
            )));
        }
        let Some(index) = self.global.filter_index(key) else {
            return Ok(BTreeSet::new());
        };
        match attribute.attribute_type {
            AttributeType::IntRange => Ok(index.records_overlapping(from, to)),
            AttributeType::Int | AttributeType::IntArray => {
                Ok(index.records_between(&AttributeValue::Int(from), &AttributeValue::Int(to)))
            }
            other => Err(CoreError::schema_violation(format!(
                "Attribute `{}` of entity `{}` has type {other:?} and cannot be queried by range.",
                key.name, self.schema.name
            ))),
        }
    }

    /// Entities having at least one value localized to `locale`.
    #[must_use]
    pub fn entity_locale_equals(&self, locale: &Locale) -> BTreeSet<PrimaryKey> {
        self.global.records_in_locale(locale)
    }

    /// Entities ordered by a sortable attribute or sortable attribute compound.
    ///
    /// Entities without a value follow in primary key order.
    ///
    /// # Errors
    ///
    /// Fails when `key` names neither a sortable attribute nor a compound.
    pub fn sorted_by(&self, key: &AttributeKey, direction: OrderDirection) -> CoreResult<Vec<PrimaryKey>> {
        let sortable = self
            .schema
            .attribute(&key.name)
            .is_some_and(|a| a.sortable)
            || self.schema.sortable_attribute_compounds.contains_key(&key.name);
        if !sortable {
            return Err(CoreError::schema_violation(format!(
                "`{}` of entity `{}` is neither a sortable attribute nor a sortable attribute compound.",
                key.name, self.schema.name
            )));
        }
        let Some(index) = self.global.sort_index(key) else {
            return Ok(self.entities.keys().copied().collect());
        };
        let mut sorted = index.sorted_records(direction);
        sorted.extend(self.entities.keys().filter(|pk| !index.contains_record(**pk)));
        Ok(sorted)
    }

    /// Entities referencing `primary_key` through faceted reference `reference`.
    #[must_use]
    pub fn facet_entities(&self, reference: &str, primary_key: PrimaryKey) -> BTreeSet<PrimaryKey> {
        self.global
            .facet_index()
            .map(|index| index.records(&FacetKey::new(reference, primary_key)))
            .unwrap_or_default()
    }

    /// Entities with a sellable price in `price_list` and `currency` whose
    /// selling price lies within `[min, max]`, cheapest first.
    #[must_use]
    pub fn price_filter(&self, price_list: &str, currency: &str, min: i64, max: i64) -> Vec<PrimaryKey> {
        let mut matching: Vec<(i64, PrimaryKey)> = self
            .global
            .price_indices(price_list, currency)
            .flat_map(|index| {
                index
                    .records_with_price_between(min, max)
                    .into_iter()
                    .filter_map(move |pk| index.selling_price(pk).map(|price| (price, pk)))
            })
            .collect();
        matching.sort_unstable();
        matching.into_iter().map(|(_, pk)| pk).collect()
    }

    /// Selling price of an entity in `price_list` and `currency`.
    #[must_use]
    pub fn selling_price(&self, primary_key: PrimaryKey, price_list: &str, currency: &str) -> Option<i64> {
        let handling = self
            .entities
            .get(&primary_key)
            .map_or(PriceInnerRecordHandling::None, |e| e.price_inner_record_handling);
        self.global
            .price_index(price_list, currency, handling)
            .and_then(|index| index.selling_price(primary_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{IntRange, Price, UpsertEntity};
    use crate::schema::{CatalogSchema, EntitySchema};

    fn product() -> EntitySchema {
        EntitySchema::new("PRODUCT")
            .with_attribute(AttributeSchema::new("code", AttributeType::String).unique())
            .with_attribute(AttributeSchema::new("color", AttributeType::String).filterable().nullable())
            .with_attribute(AttributeSchema::new("priority", AttributeType::Int).sortable().filterable().nullable())
            .with_attribute(AttributeSchema::new("validity", AttributeType::IntRange).filterable().nullable())
            .with_attribute(AttributeSchema::new("name", AttributeType::String).localized().nullable())
    }

    fn collection() -> EntityCollection {
        let catalog = CatalogSchema::new();
        let mut products = EntityCollection::new(product());
        let rows = [
            (1, "A", Some(("red", 3, (0, 10))), Some("Phone")),
            (2, "B", Some(("blue", 1, (5, 20))), None),
            (3, "C", None, Some("Case")),
        ];
        for (pk, code, extra, name) in rows {
            let mut upsert = UpsertEntity::new("PRODUCT").attribute("code", code);
            if let Some((color, priority, (from, to))) = extra {
                upsert = upsert
                    .attribute("color", color)
                    .attribute("priority", priority)
                    .attribute("validity", IntRange::new(Some(from), Some(to)));
            }
            if let Some(name) = name {
                upsert = upsert.localized_attribute("name", "en", name);
            }
            upsert = upsert.price(Price::new(1, "basic", "EUR", i64::from(pk) * 100, i64::from(pk) * 121));
            products.upsert_entity(&catalog, pk, &upsert.mutations).unwrap();
        }
        products
    }

    #[test]
    fn equality_uses_filter_or_unique_index() {
        let products = collection();
        assert_eq!(
            products.query_by_attribute_equals(&AttributeKey::new("color"), &"red".into()).unwrap(),
            BTreeSet::from([1])
        );
        assert_eq!(
            products.query_by_attribute_equals(&AttributeKey::new("code"), &"C".into()).unwrap(),
            BTreeSet::from([3])
        );
        assert!(products
            .query_by_attribute_equals(&AttributeKey::localized("name", "en"), &"Case".into())
            .is_err());
    }

    #[test]
    fn ranges_match_numbers_and_intervals() {
        let products = collection();
        assert_eq!(
            products.query_by_attribute_range(&AttributeKey::new("priority"), 2, 5).unwrap(),
            BTreeSet::from([1])
        );
        assert_eq!(
            products.query_by_attribute_range(&AttributeKey::new("validity"), 12, 30).unwrap(),
            BTreeSet::from([2])
        );
        assert!(products.query_by_attribute_range(&AttributeKey::new("color"), 0, 1).is_err());
    }

    #[test]
    fn sorting_appends_entities_without_value() {
        let products = collection();
        assert_eq!(
            products.sorted_by(&AttributeKey::new("priority"), OrderDirection::Asc).unwrap(),
            vec![2, 1, 3]
        );
        assert_eq!(
            products.sorted_by(&AttributeKey::new("priority"), OrderDirection::Desc).unwrap(),
            vec![1, 2, 3]
        );
        assert!(products.sorted_by(&AttributeKey::new("color"), OrderDirection::Asc).is_err());
    }

    #[test]
    fn locale_and_price_queries() {
        let products = collection();
        assert_eq!(products.entity_locale_equals(&Locale::new("en")), BTreeSet::from([1, 3]));
        assert_eq!(products.price_filter("basic", "EUR", 200, 400), vec![2, 3]);
        assert!(products.price_filter("basic", "CZK", 0, i64::MAX).is_empty());
        assert_eq!(products.selling_price(2, "basic", "EUR"), Some(242));
    }

    #[test]
    fn entity_locales_follow_localized_values() {
        let catalog = CatalogSchema::new();
        let mut products = collection();
        let (en, de) = (Locale::new("en"), Locale::new("de"));

        let upsert = UpsertEntity::new("PRODUCT").localized_attribute("name", "de", "Hülle");
        products.upsert_entity(&catalog, 3, &upsert.mutations).unwrap();
        assert_eq!(products.entity_locale_equals(&de), BTreeSet::from([3]));

        let upsert = UpsertEntity::new("PRODUCT").remove_attribute(AttributeKey::localized("name", "en"));
        products.upsert_entity(&catalog, 3, &upsert.mutations).unwrap();
        assert_eq!(products.entity_locale_equals(&en), BTreeSet::from([1]));
        assert_eq!(products.entity_locale_equals(&de), BTreeSet::from([3]));

        let upsert = UpsertEntity::new("PRODUCT").remove_attribute(AttributeKey::localized("name", "en"));
        products.upsert_entity(&catalog, 1, &upsert.mutations).unwrap();
        assert!(products.entity_locale_equals(&en).is_empty());
    }
}
