//! Filter sub-index.

use super::traits::SubIndex;
use crate::data::{AttributeValue, IntRange};
use crate::error::CoreResult;
use crate::types::PrimaryKey;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

/// Interval lookup over range-typed values.
///
/// Ranges are keyed by their start; an overlap query scans starts up to the
/// query end and keeps ranges whose end reaches the query start.
#[derive(Debug, Clone, Default)]
pub struct RangeIndex {
    by_start: BTreeMap<i64, BTreeMap<PrimaryKey, i64>>,
}

impl RangeIndex {
    fn insert(&mut self, record: PrimaryKey, range: IntRange) {
        self.by_start
            .entry(range.start())
            .or_default()
            .insert(record, range.end());
    }

    fn remove(&mut self, record: PrimaryKey, range: IntRange) {
        if let Some(records) = self.by_start.get_mut(&range.start()) {
            records.remove(&record);
            if records.is_empty() {
                self.by_start.remove(&range.start());
            }
        }
    }

    /// Records whose range shares a point with `[from, to]`.
    #[must_use]
    pub fn overlapping(&self, from: i64, to: i64) -> BTreeSet<PrimaryKey> {
        self.by_start
            .range(..=to)
            .flat_map(|(_, records)| records.iter())
            .filter(|(_, &end)| end >= from)
            .map(|(&record, _)| record)
            .collect()
    }
}

/// Maps attribute values to the set of records holding them.
///
/// No ordering of records is kept; use the sort index for that.
#[derive(Debug, Clone, Default)]
pub struct FilterIndex {
    values: BTreeMap<AttributeValue, BTreeSet<PrimaryKey>>,
    record_values: BTreeMap<PrimaryKey, AttributeValue>,
    ranges: RangeIndex,
}

impl FilterIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records holding `value` (or an array containing it).
    #[must_use]
    pub fn records_equal_to(&self, value: &AttributeValue) -> BTreeSet<PrimaryKey> {
        self.values.get(value).cloned().unwrap_or_default()
    }

    /// Records holding a scalar value within `[from, to]`.
    #[must_use]
    pub fn records_between(&self, from: &AttributeValue, to: &AttributeValue) -> BTreeSet<PrimaryKey> {
        if from > to {
            return BTreeSet::new();
        }
        self.values
            .range((Bound::Included(from), Bound::Included(to)))
            .flat_map(|(_, records)| records.iter().copied())
            .collect()
    }

    /// Records holding a range that overlaps `[from, to]`.
    #[must_use]
    pub fn records_overlapping(&self, from: i64, to: i64) -> BTreeSet<PrimaryKey> {
        self.ranges.overlapping(from, to)
    }

    /// Every record in the index.
    pub fn records(&self) -> impl Iterator<Item = PrimaryKey> + '_ {
        self.record_values.keys().copied()
    }

    /// Value held by `record`.
    #[must_use]
    pub fn value_of(&self, record: PrimaryKey) -> Option<&AttributeValue> {
        self.record_values.get(&record)
    }
}

impl SubIndex for FilterIndex {
    type Value = AttributeValue;

    fn insert(&mut self, record: PrimaryKey, value: &AttributeValue) -> CoreResult<()> {
        self.remove_record(record);
        for scalar in value.scalars() {
            self.values.entry(scalar.clone()).or_default().insert(record);
            if let AttributeValue::IntRange(range) = scalar {
                self.ranges.insert(record, *range);
            }
        }
        self.record_values.insert(record, value.clone());
        Ok(())
    }

    fn remove_record(&mut self, record: PrimaryKey) -> bool {
        let Some(value) = self.record_values.remove(&record) else {
            return false;
        };
        for scalar in value.scalars() {
            if let Some(records) = self.values.get_mut(scalar) {
                records.remove(&record);
                if records.is_empty() {
                    self.values.remove(scalar);
                }
            }
            if let AttributeValue::IntRange(range) = scalar {
                self.ranges.remove(record, *range);
            }
        }
        true
    }

    fn contains_record(&self, record: PrimaryKey) -> bool {
        self.record_values.contains_key(&record)
    }

    fn len(&self) -> usize {
        self.record_values.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_and_between() {
        let mut index = FilterIndex::new();
        index.insert(1, &10.into()).unwrap();
        index.insert(2, &20.into()).unwrap();
        index.insert(3, &20.into()).unwrap();

        assert_eq!(index.records_equal_to(&20.into()), BTreeSet::from([2, 3]));
        assert_eq!(
            index.records_between(&AttributeValue::Int(5), &AttributeValue::Int(15)),
            BTreeSet::from([1])
        );
        assert!(index
            .records_between(&AttributeValue::Int(15), &AttributeValue::Int(5))
            .is_empty());
    }

    #[test]
    fn update_moves_record() {
        let mut index = FilterIndex::new();
        index.insert(1, &"old".into()).unwrap();
        index.insert(1, &"new".into()).unwrap();
        assert!(index.records_equal_to(&"old".into()).is_empty());
        assert_eq!(index.records_equal_to(&"new".into()), BTreeSet::from([1]));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn arrays_index_every_element() {
        let mut index = FilterIndex::new();
        index
            .insert(7, &AttributeValue::Array(vec!["red".into(), "blue".into()]))
            .unwrap();
        assert_eq!(index.records_equal_to(&"blue".into()), BTreeSet::from([7]));
        assert!(index.remove_record(7));
        assert!(index.records_equal_to(&"red".into()).is_empty());
        assert!(index.is_empty());
    }

    #[test]
    fn range_overlap_queries() {
        let mut index = FilterIndex::new();
        index.insert(1, &IntRange::new(Some(0), Some(10)).into()).unwrap();
        index.insert(2, &IntRange::new(Some(20), None).into()).unwrap();
        index.insert(3, &IntRange::new(None, Some(-5)).into()).unwrap();

        assert_eq!(index.records_overlapping(5, 25), BTreeSet::from([1, 2]));
        assert_eq!(index.records_overlapping(-100, -6), BTreeSet::from([3]));
        assert!(index.records_overlapping(11, 19).is_empty());

        index.remove_record(2);
        assert!(index.records_overlapping(1000, 2000).is_empty());
    }
}
