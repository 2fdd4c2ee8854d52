//! One scope's worth of sub-indices.
//!
//! An [`EntityIndex`] is fed [`IndexProjection`]s: the part of an entity
//! that is visible in the index's scope. The collection computes projections,
//! the index diffs the old and new projection of a record and touches only the
//! sub-indices whose inputs changed.

use super::facet::{FacetIndex, FacetKey};
use super::filter::FilterIndex;
use super::hierarchy::HierarchyIndex;
use super::key::{AttributeKey, EntityIndexKey, PriceIndexKey, PriceInnerRecordHandling};
use super::price::{IndexedPrice, PriceListAndCurrencyIndex};
use super::sort::{SortElement, SortIndex};
use super::traits::{remove_from, remove_from_all, SubIndex};
use super::unique::UniqueIndex;
use crate::data::AttributeValue;
use crate::error::CoreResult;
use crate::schema::{AttributeIndexKind, IndexKinds};
use crate::types::{Locale, PrimaryKey};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// An attribute value together with the sub-index kinds it feeds.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedAttribute {
    /// Current value.
    pub value: AttributeValue,
    /// Sub-indices declared for the attribute.
    pub kinds: IndexKinds,
}

/// Values of one sortable attribute compound.
#[derive(Debug, Clone, PartialEq)]
pub struct CompoundValue {
    /// Ordering rules, shared by every record of the compound.
    pub elements: Arc<[SortElement]>,
    /// One value per element, `None` where the attribute is missing.
    pub values: Vec<Option<AttributeValue>>,
}

/// What one record contributes to one [`EntityIndex`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexProjection {
    /// Indexed attributes, localized ones under their locale-specific key.
    pub attributes: BTreeMap<AttributeKey, IndexedAttribute>,
    /// Sortable attribute compounds, localized ones once per locale.
    pub compounds: BTreeMap<AttributeKey, CompoundValue>,
    /// Entity locales.
    pub locales: BTreeSet<Locale>,
    /// Sellable prices grouped by the price index they belong to.
    pub prices: BTreeMap<PriceIndexKey, Vec<IndexedPrice>>,
    /// Faceted references.
    pub facets: BTreeSet<FacetKey>,
    /// Placement in the hierarchy; `Some` only for hierarchical collections.
    pub hierarchy: Option<Option<PrimaryKey>>,
}

/// Sub-indices of one scope of one entity collection.
///
/// Sub-indices exist only while at least one record feeds them: a lookup
/// for a key nothing was indexed under yields `None`.
#[derive(Debug, Clone)]
pub struct EntityIndex {
    key: EntityIndexKey,
    entity_type: String,
    records: BTreeSet<PrimaryKey>,
    locale_records: BTreeMap<Locale, BTreeSet<PrimaryKey>>,
    unique: BTreeMap<AttributeKey, UniqueIndex>,
    filter: BTreeMap<AttributeKey, FilterIndex>,
    sort: BTreeMap<AttributeKey, SortIndex>,
    price: BTreeMap<PriceIndexKey, PriceListAndCurrencyIndex>,
    facet: FacetIndex,
    hierarchy: Option<HierarchyIndex>,
}

impl EntityIndex {
    /// Creates an empty index.
    pub fn new(key: EntityIndexKey, entity_type: impl Into<String>) -> Self {
        Self {
            key,
            entity_type: entity_type.into(),
            records: BTreeSet::new(),
            locale_records: BTreeMap::new(),
            unique: BTreeMap::new(),
            filter: BTreeMap::new(),
            sort: BTreeMap::new(),
            price: BTreeMap::new(),
            facet: FacetIndex::default(),
            hierarchy: None,
        }
    }

    /// Identity of the index.
    #[must_use]
    pub fn key(&self) -> &EntityIndexKey {
        &self.key
    }

    /// Entity type of the owning collection.
    #[must_use]
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Every record in scope.
    #[must_use]
    pub fn records(&self) -> &BTreeSet<PrimaryKey> {
        &self.records
    }

    /// Records having at least one value in `locale`.
    #[must_use]
    pub fn records_in_locale(&self, locale: &Locale) -> BTreeSet<PrimaryKey> {
        self.locale_records.get(locale).cloned().unwrap_or_default()
    }

    /// Returns `true` when `record` is in scope.
    #[must_use]
    pub fn contains(&self, record: PrimaryKey) -> bool {
        self.records.contains(&record)
    }

    /// Number of records in scope.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` when no record is in scope.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Unique sub-index of `attribute`.
    #[must_use]
    pub fn unique_index(&self, attribute: &AttributeKey) -> Option<&UniqueIndex> {
        self.unique.get(attribute)
    }

    /// Filter sub-index of `attribute`.
    #[must_use]
    pub fn filter_index(&self, attribute: &AttributeKey) -> Option<&FilterIndex> {
        self.filter.get(attribute)
    }

    /// Sort sub-index of an attribute or a sortable attribute compound.
    #[must_use]
    pub fn sort_index(&self, attribute: &AttributeKey) -> Option<&SortIndex> {
        self.sort.get(attribute)
    }

    /// Price sub-index of a price list and currency.
    #[must_use]
    pub fn price_index(
        &self,
        price_list: &str,
        currency: &str,
        handling: PriceInnerRecordHandling,
    ) -> Option<&PriceListAndCurrencyIndex> {
        self.price
            .get(&PriceIndexKey::new(price_list, currency, handling))
    }

    /// Price sub-indices of a price list and currency, for any inner record handling.
    pub fn price_indices<'a>(
        &'a self,
        price_list: &'a str,
        currency: &'a str,
    ) -> impl Iterator<Item = &'a PriceListAndCurrencyIndex> + 'a {
        self.price
            .values()
            .filter(move |i| i.key().price_list == price_list && i.key().currency == currency)
    }

    /// Facet sub-index.
    #[must_use]
    pub fn facet_index(&self) -> Option<&FacetIndex> {
        (!self.facet.is_empty()).then_some(&self.facet)
    }

    /// Hierarchy sub-index.
    #[must_use]
    pub fn hierarchy_index(&self) -> Option<&HierarchyIndex> {
        self.hierarchy.as_ref()
    }

    /// Indexes `new` for `record` under `attribute`, replacing `old`.
    ///
    /// Kinds missing from `kinds` are left alone.
    ///
    /// # Errors
    ///
    /// Fails with [`crate::CoreError::UniqueValueViolation`] before touching
    /// any sub-index when another record holds the value.
    pub fn upsert_attribute(
        &mut self,
        attribute: &AttributeKey,
        kinds: IndexKinds,
        old: Option<&AttributeValue>,
        new: &AttributeValue,
        record: PrimaryKey,
    ) -> CoreResult<()> {
        if old == Some(new) {
            return Ok(());
        }
        if kinds.contains(AttributeIndexKind::Unique) {
            let entity_type = &self.entity_type;
            self.unique
                .entry(attribute.clone())
                .or_insert_with(|| UniqueIndex::new(entity_type.clone(), attribute.clone()))
                .insert(record, new)?;
        }
        if kinds.contains(AttributeIndexKind::Filter) {
            self.filter
                .entry(attribute.clone())
                .or_default()
                .insert(record, new)?;
        }
        if kinds.contains(AttributeIndexKind::Sort) {
            self.sort
                .entry(attribute.clone())
                .or_insert_with(SortIndex::single)
                .insert(record, &[Some(new.clone())])?;
        }
        Ok(())
    }

    /// Drops the value `record` holds under `attribute`.
    pub fn remove_attribute(&mut self, attribute: &AttributeKey, record: PrimaryKey) {
        remove_from(&mut self.unique, attribute, record);
        remove_from(&mut self.filter, attribute, record);
        remove_from(&mut self.sort, attribute, record);
    }

    /// Indexes a sortable attribute compound of `record`.
    pub fn upsert_compound(
        &mut self,
        compound: &AttributeKey,
        value: &CompoundValue,
        record: PrimaryKey,
    ) -> CoreResult<()> {
        self.sort
            .entry(compound.clone())
            .or_insert_with(|| SortIndex::compound(Arc::clone(&value.elements)))
            .insert(record, &value.values)
    }

    /// Drops a sortable attribute compound of `record`.
    pub fn remove_compound(&mut self, compound: &AttributeKey, record: PrimaryKey) {
        remove_from(&mut self.sort, compound, record);
    }

    /// Checks that `projection` does not clash with unique values of other records.
    ///
    /// # Errors
    ///
    /// Returns the first [`crate::CoreError::UniqueValueViolation`] found.
    pub fn check_unique(&self, record: PrimaryKey, projection: &IndexProjection) -> CoreResult<()> {
        for (attribute, indexed) in &projection.attributes {
            if !indexed.kinds.contains(AttributeIndexKind::Unique) {
                continue;
            }
            if let Some(index) = self.unique.get(attribute) {
                index.check(record, &indexed.value)?;
            }
        }
        Ok(())
    }

    /// Moves `record` from its `old` projection to `new`.
    ///
    /// Uniqueness is checked up front so a failing call leaves the index
    /// untouched.
    ///
    /// # Errors
    ///
    /// Fails with [`crate::CoreError::UniqueValueViolation`].
    pub fn apply(
        &mut self,
        record: PrimaryKey,
        old: Option<&IndexProjection>,
        new: &IndexProjection,
    ) -> CoreResult<()> {
        self.check_unique(record, new)?;
        let empty = IndexProjection::default();
        let old = old.filter(|_| self.records.contains(&record)).unwrap_or(&empty);

        for (attribute, indexed) in &old.attributes {
            let keep = new
                .attributes
                .get(attribute)
                .is_some_and(|n| n.kinds == indexed.kinds);
            if !keep {
                self.remove_attribute(attribute, record);
            }
        }
        for (attribute, indexed) in &new.attributes {
            let previous = old
                .attributes
                .get(attribute)
                .filter(|o| o.kinds == indexed.kinds)
                .map(|o| &o.value);
            self.upsert_attribute(attribute, indexed.kinds, previous, &indexed.value, record)?;
        }

        for compound in old.compounds.keys() {
            if !new.compounds.contains_key(compound) {
                self.remove_compound(compound, record);
            }
        }
        for (compound, value) in &new.compounds {
            if old.compounds.get(compound) != Some(value) {
                self.upsert_compound(compound, value, record)?;
            }
        }

        for locale in old.locales.difference(&new.locales) {
            self.remove_locale(locale, record);
        }
        for locale in &new.locales {
            self.locale_records.entry(locale.clone()).or_default().insert(record);
        }

        for key in old.prices.keys() {
            if !new.prices.contains_key(key) {
                remove_from(&mut self.price, key, record);
            }
        }
        for (key, prices) in &new.prices {
            if old.prices.get(key) != Some(prices) {
                self.price
                    .entry(key.clone())
                    .or_insert_with(|| PriceListAndCurrencyIndex::new(key.clone()))
                    .insert(record, prices)?;
            }
        }

        if old.facets != new.facets {
            self.facet.insert(record, &new.facets)?;
        }

        match new.hierarchy {
            Some(parent) => {
                self.hierarchy
                    .get_or_insert_with(HierarchyIndex::default)
                    .insert(record, &parent)?;
            }
            None => self.remove_from_hierarchy(record),
        }

        self.records.insert(record);
        Ok(())
    }

    /// Drops everything `record` contributed. Returns `false` when it was not in scope.
    pub fn remove_record(&mut self, record: PrimaryKey) -> bool {
        if !self.records.remove(&record) {
            return false;
        }
        remove_from_all(&mut self.unique, record);
        remove_from_all(&mut self.filter, record);
        remove_from_all(&mut self.sort, record);
        remove_from_all(&mut self.price, record);
        self.locale_records.retain(|_, records| {
            records.remove(&record);
            !records.is_empty()
        });
        self.facet.remove_record(record);
        self.remove_from_hierarchy(record);
        true
    }

    fn remove_locale(&mut self, locale: &Locale, record: PrimaryKey) {
        let emptied = self.locale_records.get_mut(locale).is_some_and(|records| {
            records.remove(&record);
            records.is_empty()
        });
        if emptied {
            self.locale_records.remove(locale);
        }
    }

    fn remove_from_hierarchy(&mut self, record: PrimaryKey) {
        if let Some(hierarchy) = &mut self.hierarchy {
            hierarchy.remove_record(record);
            if hierarchy.is_empty() {
                self.hierarchy = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;

    fn unique_filter() -> IndexKinds {
        IndexKinds::NONE
            .with(AttributeIndexKind::Unique)
            .with(AttributeIndexKind::Filter)
    }

    fn projection(code: &str) -> IndexProjection {
        let mut projection = IndexProjection::default();
        projection.attributes.insert(
            AttributeKey::new("code"),
            IndexedAttribute {
                value: code.into(),
                kinds: unique_filter(),
            },
        );
        projection
    }

    #[test]
    fn unique_value_is_bound_to_one_record() {
        let mut index = EntityIndex::new(EntityIndexKey::global(), "PRODUCT");
        index.apply(1, None, &projection("A")).unwrap();
        index.apply(1, Some(&projection("A")), &projection("A")).unwrap();

        let err = index.apply(2, None, &projection("A")).unwrap_err();
        assert!(matches!(err, CoreError::UniqueValueViolation { existing: 1, inserted: 2, .. }));
        assert!(!index.contains(2));
        assert_eq!(
            index.filter_index(&AttributeKey::new("code")).unwrap().records_equal_to(&"A".into()),
            BTreeSet::from([1])
        );
    }

    #[test]
    fn changed_value_moves_between_buckets() {
        let mut index = EntityIndex::new(EntityIndexKey::global(), "PRODUCT");
        index.apply(1, None, &projection("A")).unwrap();
        index.apply(1, Some(&projection("A")), &projection("B")).unwrap();
        index.apply(2, None, &projection("A")).unwrap();

        let unique = index.unique_index(&AttributeKey::new("code")).unwrap();
        assert_eq!(unique.record_by_value(&"A".into()), Some(2));
        assert_eq!(unique.record_by_value(&"B".into()), Some(1));
    }

    #[test]
    fn sub_indices_disappear_with_last_record() {
        let mut index = EntityIndex::new(EntityIndexKey::referenced_entity("BRAND", 1), "PRODUCT");
        let mut projection = projection("A");
        projection.locales.insert(Locale::new("en"));
        projection.prices.insert(
            PriceIndexKey::new("basic", "EUR", PriceInnerRecordHandling::None),
            vec![IndexedPrice {
                price_id: 1,
                inner_record_id: None,
                price_without_tax: 100,
                price_with_tax: 121,
            }],
        );
        index.apply(1, None, &projection).unwrap();
        assert!(index.price_index("basic", "EUR", PriceInnerRecordHandling::None).is_some());
        assert_eq!(index.records_in_locale(&Locale::new("en")), BTreeSet::from([1]));

        assert!(index.remove_record(1));
        assert!(index.is_empty());
        assert!(index.unique_index(&AttributeKey::new("code")).is_none());
        assert!(index.filter_index(&AttributeKey::new("code")).is_none());
        assert!(index.price_index("basic", "EUR", PriceInnerRecordHandling::None).is_none());
        assert!(index.records_in_locale(&Locale::new("en")).is_empty());
        assert!(!index.remove_record(1));
    }

    #[test]
    fn sort_index_ignores_undeclared_kinds() {
        let mut index = EntityIndex::new(EntityIndexKey::global(), "PRODUCT");
        let key = AttributeKey::new("priority");
        index
            .upsert_attribute(&key, IndexKinds::NONE.with(AttributeIndexKind::Sort), None, &5.into(), 1)
            .unwrap();
        assert!(index.sort_index(&key).is_some());
        assert!(index.filter_index(&key).is_none());
        assert!(index.unique_index(&key).is_none());
        index.remove_attribute(&key, 1);
        assert!(index.sort_index(&key).is_none());
    }

    #[test]
    fn hierarchy_placement_is_tracked() {
        let mut index = EntityIndex::new(EntityIndexKey::global(), "CATEGORY");
        let root = IndexProjection {
            hierarchy: Some(None),
            ..IndexProjection::default()
        };
        let child = IndexProjection {
            hierarchy: Some(Some(1)),
            ..IndexProjection::default()
        };
        index.apply(1, None, &root).unwrap();
        index.apply(2, None, &child).unwrap();
        assert_eq!(index.hierarchy_index().unwrap().descendants(1), vec![2]);
        index.remove_record(1);
        index.remove_record(2);
        assert!(index.hierarchy_index().is_none());
    }
}
