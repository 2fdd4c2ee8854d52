//! Unique sub-index.

use super::key::AttributeKey;
use super::traits::SubIndex;
use crate::data::AttributeValue;
use crate::error::{CoreError, CoreResult};
use crate::types::PrimaryKey;
use std::collections::BTreeMap;

/// Binds every value of one attribute to exactly one record.
///
/// Array values bind each element separately.
#[derive(Debug, Clone)]
pub struct UniqueIndex {
    entity_type: String,
    attribute: AttributeKey,
    unique_values: BTreeMap<AttributeValue, PrimaryKey>,
    record_values: BTreeMap<PrimaryKey, AttributeValue>,
}

impl UniqueIndex {
    /// Creates an empty index for `attribute` of `entity_type`.
    pub fn new(entity_type: impl Into<String>, attribute: AttributeKey) -> Self {
        Self {
            entity_type: entity_type.into(),
            attribute,
            unique_values: BTreeMap::new(),
            record_values: BTreeMap::new(),
        }
    }

    /// Record currently holding `value`.
    #[must_use]
    pub fn record_by_value(&self, value: &AttributeValue) -> Option<PrimaryKey> {
        self.unique_values.get(value).copied()
    }

    /// Checks that `record` may claim `value`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UniqueValueViolation`] when another record holds the value.
    pub fn check(&self, record: PrimaryKey, value: &AttributeValue) -> CoreResult<()> {
        for scalar in value.scalars() {
            if let Some(&existing) = self.unique_values.get(scalar) {
                if existing != record {
                    return Err(CoreError::UniqueValueViolation {
                        attribute: self.attribute.name.clone(),
                        locale: self.attribute.locale.clone(),
                        value: scalar.to_string(),
                        entity_type: self.entity_type.clone(),
                        existing,
                        inserted: record,
                    });
                }
            }
        }
        Ok(())
    }

    /// Iterates values in ascending order with their records.
    pub fn iter(&self) -> impl Iterator<Item = (&AttributeValue, PrimaryKey)> {
        self.unique_values.iter().map(|(v, pk)| (v, *pk))
    }
}

impl SubIndex for UniqueIndex {
    type Value = AttributeValue;

    fn insert(&mut self, record: PrimaryKey, value: &AttributeValue) -> CoreResult<()> {
        self.check(record, value)?;
        self.remove_record(record);
        for scalar in value.scalars() {
            self.unique_values.insert(scalar.clone(), record);
        }
        self.record_values.insert(record, value.clone());
        Ok(())
    }

    fn remove_record(&mut self, record: PrimaryKey) -> bool {
        match self.record_values.remove(&record) {
            Some(value) => {
                for scalar in value.scalars() {
                    self.unique_values.remove(scalar);
                }
                true
            }
            None => false,
        }
    }

    fn contains_record(&self, record: PrimaryKey) -> bool {
        self.record_values.contains_key(&record)
    }

    fn len(&self) -> usize {
        self.record_values.len()
    }
}
