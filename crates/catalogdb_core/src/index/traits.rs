//! Contract shared by every sub-index kind.

use crate::error::CoreResult;
use crate::types::PrimaryKey;
use std::collections::BTreeMap;

/// A sub-index of an [`super::EntityIndex`].
///
/// Every kind maps some per-record value to record ids and keeps the reverse
/// mapping, so a record can be dropped knowing only its primary key.
pub trait SubIndex: Clone {
    /// What a record contributes to the index.
    type Value: ?Sized;

    /// Registers `record` under `value`, replacing what it contributed before.
    ///
    /// # Errors
    ///
    /// Kinds with constraints (uniqueness) fail without modifying the index.
    fn insert(&mut self, record: PrimaryKey, value: &Self::Value) -> CoreResult<()>;

    /// Drops everything `record` contributed. Returns `false` when it contributed nothing.
    fn remove_record(&mut self, record: PrimaryKey) -> bool;

    /// Returns `true` when `record` contributes to the index.
    fn contains_record(&self, record: PrimaryKey) -> bool;

    /// Number of records in the index.
    fn len(&self) -> usize;

    /// Returns `true` when no record contributes to the index.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Removes `record` from every sub-index in `map`, dropping the ones left empty.
pub(crate) fn remove_from_all<K: Ord + Clone, I: SubIndex>(
    map: &mut BTreeMap<K, I>,
    record: PrimaryKey,
) {
    map.retain(|_, index| {
        index.remove_record(record);
        !index.is_empty()
    });
}

/// Removes `record` from the sub-index under `key`, dropping it when left empty.
pub(crate) fn remove_from<K: Ord, I: SubIndex>(map: &mut BTreeMap<K, I>, key: &K, record: PrimaryKey) {
    let emptied = map.get_mut(key).is_some_and(|index| {
        index.remove_record(record);
        index.is_empty()
    });
    if emptied {
        map.remove(key);
    }
}
