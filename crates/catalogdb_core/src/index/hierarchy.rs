//! Hierarchy sub-index.

use super::traits::SubIndex;
use crate::error::CoreResult;
use crate::types::PrimaryKey;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Parent/child relation of a hierarchical collection.
///
/// Nodes whose parent is not (yet) present are kept as orphans: they are
/// remembered under their parent key and become reachable once it appears.
#[derive(Debug, Clone, Default)]
pub struct HierarchyIndex {
    parents: BTreeMap<PrimaryKey, Option<PrimaryKey>>,
    children: BTreeMap<PrimaryKey, BTreeSet<PrimaryKey>>,
}

impl HierarchyIndex {
    /// Parent of `node`; `Some(None)` for roots, `None` for unknown nodes.
    #[must_use]
    pub fn parent_of(&self, node: PrimaryKey) -> Option<Option<PrimaryKey>> {
        self.parents.get(&node).copied()
    }

    /// Direct children of `node`.
    #[must_use]
    pub fn children_of(&self, node: PrimaryKey) -> BTreeSet<PrimaryKey> {
        self.children.get(&node).cloned().unwrap_or_default()
    }

    /// Nodes without parent.
    #[must_use]
    pub fn roots(&self) -> BTreeSet<PrimaryKey> {
        self.parents
            .iter()
            .filter(|(_, parent)| parent.is_none())
            .map(|(&node, _)| node)
            .collect()
    }

    /// Every node below `node`, breadth-first, excluding `node` itself.
    #[must_use]
    pub fn descendants(&self, node: PrimaryKey) -> Vec<PrimaryKey> {
        self.walk(node, &BTreeSet::new()).into_iter().skip(1).collect()
    }

    /// `root` and its descendants, pruning the subtrees of `excluding`.
    ///
    /// Returns nothing when `root` is unknown or excluded itself.
    #[must_use]
    pub fn within(&self, root: PrimaryKey, excluding: &[PrimaryKey]) -> BTreeSet<PrimaryKey> {
        let excluded: BTreeSet<PrimaryKey> = excluding.iter().copied().collect();
        self.walk(root, &excluded).into_iter().collect()
    }

    fn walk(&self, root: PrimaryKey, excluded: &BTreeSet<PrimaryKey>) -> Vec<PrimaryKey> {
        if !self.parents.contains_key(&root) || excluded.contains(&root) {
            return Vec::new();
        }
        let mut visited = BTreeSet::from([root]);
        let mut order = vec![root];
        let mut queue = VecDeque::from([root]);
        while let Some(node) = queue.pop_front() {
            for &child in self.children.get(&node).into_iter().flatten() {
                if !excluded.contains(&child)
                    && self.parents.contains_key(&child)
                    && visited.insert(child)
                {
                    order.push(child);
                    queue.push_back(child);
                }
            }
        }
        order
    }
}

impl SubIndex for HierarchyIndex {
    type Value = Option<PrimaryKey>;

    fn insert(&mut self, record: PrimaryKey, parent: &Option<PrimaryKey>) -> CoreResult<()> {
        self.remove_record(record);
        if let Some(parent) = parent {
            self.children.entry(*parent).or_default().insert(record);
        }
        self.parents.insert(record, *parent);
        Ok(())
    }

    fn remove_record(&mut self, record: PrimaryKey) -> bool {
        match self.parents.remove(&record) {
            Some(parent) => {
                if let Some(parent) = parent {
                    if let Some(siblings) = self.children.get_mut(&parent) {
                        siblings.remove(&record);
                        if siblings.is_empty() {
                            self.children.remove(&parent);
                        }
                    }
                }
                true
            }
            None => false,
        }
    }

    fn contains_record(&self, record: PrimaryKey) -> bool {
        self.parents.contains_key(&record)
    }

    fn len(&self) -> usize {
        self.parents.len()
    }
}
