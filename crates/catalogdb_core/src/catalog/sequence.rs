//! Primary key sequences.

use crate::error::{CoreError, CoreResult};
use crate::types::PrimaryKey;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Last primary key handed out per entity type.
///
/// Shared by every transaction of a catalog and advanced outside the commit
/// lock, so concurrent writers never receive the same key. Keys of
/// transactions that roll back are not reused.
#[derive(Debug, Default)]
pub struct PrimaryKeySequences {
    sequences: RwLock<BTreeMap<String, Arc<AtomicU32>>>,
}

impl PrimaryKeySequences {
    /// Sequences starting after the given last keys.
    #[must_use]
    pub fn new(last_keys: BTreeMap<String, PrimaryKey>) -> Self {
        Self {
            sequences: RwLock::new(
                last_keys
                    .into_iter()
                    .map(|(entity_type, last)| (entity_type, Arc::new(AtomicU32::new(last))))
                    .collect(),
            ),
        }
    }

    fn sequence(&self, entity_type: &str) -> Arc<AtomicU32> {
        if let Some(sequence) = self.sequences.read().get(entity_type) {
            return Arc::clone(sequence);
        }
        Arc::clone(
            self.sequences
                .write()
                .entry(entity_type.to_string())
                .or_default(),
        )
    }

    /// Hands out the next key of `entity_type`.
    ///
    /// # Errors
    ///
    /// Fails once the key space of the type is exhausted.
    pub fn next(&self, entity_type: &str) -> CoreResult<PrimaryKey> {
        self.sequence(entity_type)
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| last.checked_add(1))
            .map(|last| last + 1)
            .map_err(|_| {
                CoreError::invalid_operation(format!("primary keys of `{entity_type}` are exhausted"))
            })
    }

    /// Moves the sequence of `entity_type` past a key chosen by the caller.
    pub fn observe(&self, entity_type: &str, primary_key: PrimaryKey) {
        self.sequence(entity_type).fetch_max(primary_key, Ordering::SeqCst);
    }

    /// Last key handed out or observed for `entity_type`.
    #[must_use]
    pub fn current(&self, entity_type: &str) -> PrimaryKey {
        self.sequences
            .read()
            .get(entity_type)
            .map_or(0, |s| s.load(Ordering::SeqCst))
    }

    /// Last keys of every type, for persisting.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, PrimaryKey> {
        self.sequences
            .read()
            .iter()
            .map(|(entity_type, s)| (entity_type.clone(), s.load(Ordering::SeqCst)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::thread;

    #[test]
    fn keys_continue_after_restored_and_observed_values() {
        let sequences = PrimaryKeySequences::new(BTreeMap::from([("PRODUCT".to_string(), 7)]));
        assert_eq!(sequences.next("PRODUCT").unwrap(), 8);
        assert_eq!(sequences.next("BRAND").unwrap(), 1);
        sequences.observe("BRAND", 40);
        sequences.observe("BRAND", 3);
        assert_eq!(sequences.next("BRAND").unwrap(), 41);
        assert_eq!(sequences.current("CATEGORY"), 0);
        assert_eq!(sequences.snapshot().get("PRODUCT"), Some(&8));
    }

    #[test]
    fn exhausted_sequence_fails() {
        let sequences = PrimaryKeySequences::new(BTreeMap::from([("PRODUCT".to_string(), u32::MAX)]));
        assert!(sequences.next("PRODUCT").is_err());
    }

    #[test]
    fn concurrent_callers_get_distinct_keys() {
        let sequences = Arc::new(PrimaryKeySequences::default());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let sequences = Arc::clone(&sequences);
                thread::spawn(move || {
                    (0..250)
                        .map(|_| sequences.next("PRODUCT").unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let keys: BTreeSet<PrimaryKey> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(keys, (1..=1000).collect());
    }
}
