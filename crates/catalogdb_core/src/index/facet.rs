//! Facet sub-index.

use super::traits::SubIndex;
use crate::error::CoreResult;
use crate::types::PrimaryKey;
use std::collections::{BTreeMap, BTreeSet};

/// A referenced entity acting as a facet.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FacetKey {
    /// Reference name.
    pub reference_name: String,
    /// Referenced primary key.
    pub primary_key: PrimaryKey,
}

impl FacetKey {
    /// Creates a facet key.
    pub fn new(reference_name: impl Into<String>, primary_key: PrimaryKey) -> Self {
        Self {
            reference_name: reference_name.into(),
            primary_key,
        }
    }
}

/// Records grouped by the faceted references they hold.
#[derive(Debug, Clone, Default)]
pub struct FacetIndex {
    facets: BTreeMap<FacetKey, BTreeSet<PrimaryKey>>,
    record_facets: BTreeMap<PrimaryKey, BTreeSet<FacetKey>>,
}

impl FacetIndex {
    /// Records referencing `facet`.
    #[must_use]
    pub fn records(&self, facet: &FacetKey) -> BTreeSet<PrimaryKey> {
        self.facets.get(facet).cloned().unwrap_or_default()
    }

    /// Number of records per facet of reference `reference_name`.
    #[must_use]
    pub fn facet_counts(&self, reference_name: &str) -> BTreeMap<PrimaryKey, usize> {
        self.facets
            .iter()
            .filter(|(facet, _)| facet.reference_name == reference_name)
            .map(|(facet, records)| (facet.primary_key, records.len()))
            .collect()
    }
}

impl SubIndex for FacetIndex {
    type Value = BTreeSet<FacetKey>;

    fn insert(&mut self, record: PrimaryKey, facets: &BTreeSet<FacetKey>) -> CoreResult<()> {
        self.remove_record(record);
        if facets.is_empty() {
            return Ok(());
        }
        for facet in facets {
            self.facets.entry(facet.clone()).or_default().insert(record);
        }
        self.record_facets.insert(record, facets.clone());
        Ok(())
    }

    fn remove_record(&mut self, record: PrimaryKey) -> bool {
        let Some(facets) = self.record_facets.remove(&record) else {
            return false;
        };
        for facet in facets {
            if let Some(records) = self.facets.get_mut(&facet) {
                records.remove(&record);
                if records.is_empty() {
                    self.facets.remove(&facet);
                }
            }
        }
        true
    }

    fn contains_record(&self, record: PrimaryKey) -> bool {
        self.record_facets.contains_key(&record)
    }

    fn len(&self) -> usize {
        self.record_facets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn facet_counts_follow_updates() {
        let mut index = FacetIndex::default();
        let brand_1 = FacetKey::new("BRAND", 1);
        let brand_2 = FacetKey::new("BRAND", 2);
        index.insert(10, &BTreeSet::from([brand_1.clone()])).unwrap();
        index.insert(11, &BTreeSet::from([brand_1.clone()])).unwrap();
        index.insert(11, &BTreeSet::from([brand_2.clone()])).unwrap();

        assert_eq!(index.records(&brand_1), BTreeSet::from([10]));
        assert_eq!(index.facet_counts("BRAND"), BTreeMap::from([(1, 1), (2, 1)]));

        index.insert(10, &BTreeSet::new()).unwrap();
        assert!(!index.contains_record(10));
        assert_eq!(index.len(), 1);
    }
}
