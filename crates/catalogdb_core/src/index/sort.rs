//! Sort sub-index.

use super::traits::SubIndex;
use crate::data::AttributeValue;
use crate::error::CoreResult;
use crate::schema::{AttributeElement, OrderBehaviour, OrderDirection};
use crate::types::PrimaryKey;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Ordering of one position of a sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SortElement {
    /// Direction of present values.
    pub direction: OrderDirection,
    /// Placement of missing values.
    pub behaviour: OrderBehaviour,
}

impl From<&AttributeElement> for SortElement {
    fn from(element: &AttributeElement) -> Self {
        Self {
            direction: element.direction,
            behaviour: element.behaviour,
        }
    }
}

impl SortElement {
    fn compare(self, a: Option<&AttributeValue>, b: Option<&AttributeValue>) -> Ordering {
        match (a, b) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => match self.behaviour {
                OrderBehaviour::NullsFirst => Ordering::Less,
                OrderBehaviour::NullsLast => Ordering::Greater,
            },
            (Some(_), None) => match self.behaviour {
                OrderBehaviour::NullsFirst => Ordering::Greater,
                OrderBehaviour::NullsLast => Ordering::Less,
            },
            (Some(a), Some(b)) => match self.direction {
                OrderDirection::Asc => a.cmp(b),
                OrderDirection::Desc => b.cmp(a),
            },
        }
    }
}

/// A sort key: one optional value per element, ordered by the elements' rules.
///
/// Null placement is part of the ordering, so a key with a missing first
/// value lands before or after every present value regardless of direction.
#[derive(Debug, Clone)]
pub struct SortKey {
    elements: Arc<[SortElement]>,
    values: Vec<Option<AttributeValue>>,
}

impl SortKey {
    /// Creates a key. `values` must have one entry per element.
    #[must_use]
    pub fn new(elements: Arc<[SortElement]>, values: Vec<Option<AttributeValue>>) -> Self {
        Self { elements, values }
    }

    /// Key values in element order.
    #[must_use]
    pub fn values(&self) -> &[Option<AttributeValue>] {
        &self.values
    }
}

impl PartialEq for SortKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SortKey {}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.values.len().max(other.values.len());
        for position in 0..len {
            let element = self.elements.get(position).copied().unwrap_or_default();
            let a = self.values.get(position).and_then(Option::as_ref);
            let b = other.values.get(position).and_then(Option::as_ref);
            match element.compare(a, b) {
                Ordering::Equal => continue,
                decided => return decided,
            }
        }
        Ordering::Equal
    }
}

/// Keeps records ordered by a single attribute or by a compound key.
#[derive(Debug, Clone)]
pub struct SortIndex {
    elements: Arc<[SortElement]>,
    keys: BTreeMap<SortKey, BTreeSet<PrimaryKey>>,
    record_keys: BTreeMap<PrimaryKey, SortKey>,
}

impl SortIndex {
    /// Index over one attribute, ascending.
    #[must_use]
    pub fn single() -> Self {
        Self::compound(Arc::from(vec![SortElement::default()]))
    }

    /// Index over a compound key.
    #[must_use]
    pub fn compound(elements: Arc<[SortElement]>) -> Self {
        Self {
            elements,
            keys: BTreeMap::new(),
            record_keys: BTreeMap::new(),
        }
    }

    /// Element rules of this index.
    #[must_use]
    pub fn elements(&self) -> &Arc<[SortElement]> {
        &self.elements
    }

    /// Records whose key equals `values`; empty when no record has that combination.
    #[must_use]
    pub fn records_equal_to(&self, values: &[Option<AttributeValue>]) -> Vec<PrimaryKey> {
        let lookup = SortKey::new(Arc::clone(&self.elements), values.to_vec());
        self.keys
            .get(&lookup)
            .map(|records| records.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Records in index order, or reversed for [`OrderDirection::Desc`].
    #[must_use]
    pub fn sorted_records(&self, direction: OrderDirection) -> Vec<PrimaryKey> {
        let flatten = |(_, records): (&SortKey, &BTreeSet<PrimaryKey>)| records.iter().copied().collect::<Vec<_>>();
        match direction {
            OrderDirection::Asc => self.keys.iter().flat_map(flatten).collect(),
            OrderDirection::Desc => self.keys.iter().rev().flat_map(flatten).collect(),
        }
    }

    /// Key of `record`.
    #[must_use]
    pub fn key_of(&self, record: PrimaryKey) -> Option<&SortKey> {
        self.record_keys.get(&record)
    }
}

impl SubIndex for SortIndex {
    type Value = [Option<AttributeValue>];

    fn insert(&mut self, record: PrimaryKey, values: &[Option<AttributeValue>]) -> CoreResult<()> {
        self.remove_record(record);
        let key = SortKey::new(Arc::clone(&self.elements), values.to_vec());
        self.keys.entry(key.clone()).or_default().insert(record);
        self.record_keys.insert(record, key);
        Ok(())
    }

    fn remove_record(&mut self, record: PrimaryKey) -> bool {
        let Some(key) = self.record_keys.remove(&record) else {
            return false;
        };
        if let Some(records) = self.keys.get_mut(&key) {
            records.remove(&record);
            if records.is_empty() {
                self.keys.remove(&key);
            }
        }
        true
    }

    fn contains_record(&self, record: PrimaryKey) -> bool {
        self.record_keys.contains_key(&record)
    }

    fn len(&self) -> usize {
        self.record_keys.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn code_ean() -> Arc<[SortElement]> {
        Arc::from(vec![
            SortElement {
                direction: OrderDirection::Desc,
                behaviour: OrderBehaviour::NullsFirst,
            },
            SortElement {
                direction: OrderDirection::Asc,
                behaviour: OrderBehaviour::NullsLast,
            },
        ])
    }

    fn s(v: &str) -> Option<AttributeValue> {
        Some(v.into())
    }

    #[test]
    fn nulls_first_sorts_before_present_values_under_desc() {
        let elements = code_ean();
        let empty = SortKey::new(Arc::clone(&elements), vec![None, None]);
        let filled = SortKey::new(Arc::clone(&elements), vec![s("ABC"), s("123")]);
        assert!(empty < filled);
    }

    #[test]
    fn compound_order_uses_each_elements_rules() {
        let mut index = SortIndex::compound(code_ean());
        index.insert(1, &[s("A"), s("2")]).unwrap();
        index.insert(2, &[s("B"), s("9")]).unwrap();
        index.insert(3, &[s("A"), s("1")]).unwrap();
        index.insert(4, &[None, s("5")]).unwrap();
        index.insert(5, &[s("A"), None]).unwrap();

        assert_eq!(index.sorted_records(OrderDirection::Asc), vec![4, 2, 3, 1, 5]);
        assert_eq!(index.sorted_records(OrderDirection::Desc), vec![5, 1, 3, 2, 4]);
    }

    #[test]
    fn lookup_of_stale_combination_is_empty() {
        let mut index = SortIndex::compound(code_ean());
        index.insert(1, &[s("ABC"), s("123")]).unwrap();
        index.insert(1, &[s("Whatever"), s("578")]).unwrap();

        assert!(index.records_equal_to(&[s("ABC"), s("123")]).is_empty());
        assert_eq!(index.records_equal_to(&[s("Whatever"), s("578")]), vec![1]);
        assert!(index.records_equal_to(&[s("never"), None]).is_empty());
    }

    #[test]
    fn single_attribute_order() {
        let mut index = SortIndex::single();
        index.insert(10, &[Some(3.into())]).unwrap();
        index.insert(11, &[Some(1.into())]).unwrap();
        index.insert(12, &[Some(2.into())]).unwrap();
        assert_eq!(index.sorted_records(OrderDirection::Asc), vec![11, 12, 10]);
        assert!(index.remove_record(12));
        assert_eq!(index.sorted_records(OrderDirection::Desc), vec![10, 11]);
    }

    proptest! {
        #[test]
        fn sorted_output_is_ordered_by_key(values in prop::collection::vec(prop::option::of(0i64..20), 1..40)) {
            let elements: Arc<[SortElement]> = Arc::from(vec![SortElement {
                direction: OrderDirection::Desc,
                behaviour: OrderBehaviour::NullsFirst,
            }]);
            let mut index = SortIndex::compound(elements);
            for (record, value) in values.iter().enumerate() {
                index.insert(record as PrimaryKey, &[value.map(AttributeValue::Int)]).unwrap();
            }
            let sorted = index.sorted_records(OrderDirection::Asc);
            prop_assert_eq!(sorted.len(), values.len());
            for pair in sorted.windows(2) {
                let a = index.key_of(pair[0]).unwrap();
                let b = index.key_of(pair[1]).unwrap();
                prop_assert!(a <= b);
            }
            let first_present = sorted.iter().position(|r| values[*r as usize].is_some());
            if let Some(position) = first_present {
                prop_assert!(sorted[position..].iter().all(|r| values[*r as usize].is_some()));
            }
        }
    }
}
