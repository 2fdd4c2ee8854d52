//! Keys identifying indices and attribute slots.

use crate::types::{Locale, PrimaryKey};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Scope of an [`crate::index::EntityIndex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityIndexType {
    /// Covers every entity of the collection.
    Global,
    /// Entities referencing one node of a hierarchical entity type.
    ReferencedHierarchyNode,
    /// Entities referencing one entity through an indexed reference.
    ReferencedEntity,
}

/// The referenced entity a reduced index is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ScopeReference {
    /// Referenced entity type.
    pub entity_type: String,
    /// Referenced primary key.
    pub primary_key: PrimaryKey,
}

/// Identity of one index in a collection.
///
/// At most one index per key exists in a collection at any catalog version.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityIndexKey {
    index_type: EntityIndexType,
    scope: Option<ScopeReference>,
}

impl EntityIndexKey {
    /// Key of the collection-wide index.
    #[must_use]
    pub const fn global() -> Self {
        Self {
            index_type: EntityIndexType::Global,
            scope: None,
        }
    }

    /// Key of the index for entities referencing hierarchy node `primary_key` of `entity_type`.
    pub fn hierarchy_node(entity_type: impl Into<String>, primary_key: PrimaryKey) -> Self {
        Self::scoped(EntityIndexType::ReferencedHierarchyNode, entity_type, primary_key)
    }

    /// Key of the index for entities referencing `primary_key` of `entity_type`.
    pub fn referenced_entity(entity_type: impl Into<String>, primary_key: PrimaryKey) -> Self {
        Self::scoped(EntityIndexType::ReferencedEntity, entity_type, primary_key)
    }

    fn scoped(index_type: EntityIndexType, entity_type: impl Into<String>, primary_key: PrimaryKey) -> Self {
        Self {
            index_type,
            scope: Some(ScopeReference {
                entity_type: entity_type.into(),
                primary_key,
            }),
        }
    }

    /// Index type.
    #[must_use]
    pub fn index_type(&self) -> EntityIndexType {
        self.index_type
    }

    /// Referenced entity, `None` for the global index.
    #[must_use]
    pub fn scope(&self) -> Option<&ScopeReference> {
        self.scope.as_ref()
    }

    /// Returns `true` for the global index.
    #[must_use]
    pub fn is_global(&self) -> bool {
        self.index_type == EntityIndexType::Global
    }
}

impl fmt::Display for EntityIndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            None => write!(f, "{:?}", self.index_type),
            Some(scope) => write!(f, "{:?}({}:{})", self.index_type, scope.entity_type, scope.primary_key),
        }
    }
}

/// Name of an attribute plus the locale for localized values.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AttributeKey {
    /// Attribute name.
    pub name: String,
    /// Locale of a localized value.
    pub locale: Option<Locale>,
}

impl AttributeKey {
    /// Key of a non-localized value.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            locale: None,
        }
    }

    /// Key of a value localized to `locale`.
    pub fn localized(name: impl Into<String>, locale: impl Into<Locale>) -> Self {
        Self {
            name: name.into(),
            locale: Some(locale.into()),
        }
    }

    /// Returns `true` when the key carries a locale.
    #[must_use]
    pub fn is_localized(&self) -> bool {
        self.locale.is_some()
    }
}

impl fmt::Display for AttributeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.locale {
            None => f.write_str(&self.name),
            Some(locale) => write!(f, "{}:{}", self.name, locale),
        }
    }
}

/// How an entity with prices for several inner records computes its selling price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum PriceInnerRecordHandling {
    /// One price per price list and currency.
    #[default]
    None,
    /// The cheapest inner record wins.
    LowestPrice,
    /// Inner record prices add up.
    Sum,
}

/// Identity of one price sub-index.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PriceIndexKey {
    /// Price list name.
    pub price_list: String,
    /// ISO currency code.
    pub currency: String,
    /// Selling price computation.
    pub inner_record_handling: PriceInnerRecordHandling,
}

impl PriceIndexKey {
    /// Creates a price index key.
    pub fn new(
        price_list: impl Into<String>,
        currency: impl Into<String>,
        inner_record_handling: PriceInnerRecordHandling,
    ) -> Self {
        Self {
            price_list: price_list.into(),
            currency: currency.into(),
            inner_record_handling,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_of_different_scope_differ() {
        let hierarchy = EntityIndexKey::hierarchy_node("CATEGORY", 1);
        let entity = EntityIndexKey::referenced_entity("CATEGORY", 1);
        assert_ne!(hierarchy, entity);
        assert_eq!(hierarchy, EntityIndexKey::hierarchy_node("CATEGORY", 1));
        assert!(EntityIndexKey::global().scope().is_none());
        assert!(EntityIndexKey::global() < entity);
    }

    #[test]
    fn attribute_key_display() {
        assert_eq!(AttributeKey::new("code").to_string(), "code");
        assert_eq!(AttributeKey::localized("name", "en").to_string(), "name:en");
        assert!(!AttributeKey::new("code").is_localized());
    }
}
