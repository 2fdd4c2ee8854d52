//! Entity, schema and catalog mutations.
//!
//! Mutations are what a write transaction stages, what the catalog WAL
//! records, and what recovery replays.

use super::entity::{Price, PriceKey, ReferenceKey};
use super::value::AttributeValue;
use crate::index::{AttributeKey, PriceInnerRecordHandling};
use crate::schema::EntitySchema;
use crate::types::{Locale, PrimaryKey};
use serde::{Deserialize, Serialize};

/// Change of one part of an entity body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocalMutation {
    /// Sets an attribute value.
    UpsertAttribute {
        /// Attribute slot.
        key: AttributeKey,
        /// New value.
        value: AttributeValue,
    },
    /// Clears an attribute value.
    RemoveAttribute {
        /// Attribute slot.
        key: AttributeKey,
    },
    /// Sets an associated data value.
    UpsertAssociatedData {
        /// Associated data slot.
        key: AttributeKey,
        /// New value.
        value: AttributeValue,
    },
    /// Clears an associated data value.
    RemoveAssociatedData {
        /// Associated data slot.
        key: AttributeKey,
    },
    /// Places the entity under `parent`.
    SetParent {
        /// Parent primary key.
        parent: PrimaryKey,
    },
    /// Makes the entity a hierarchy root.
    RemoveParent,
    /// Adds a reference.
    InsertReference {
        /// Reference identity.
        reference: ReferenceKey,
    },
    /// Drops a reference with its attributes.
    RemoveReference {
        /// Reference identity.
        reference: ReferenceKey,
    },
    /// Sets an attribute on an existing reference.
    UpsertReferenceAttribute {
        /// Reference identity.
        reference: ReferenceKey,
        /// Attribute slot.
        key: AttributeKey,
        /// New value.
        value: AttributeValue,
    },
    /// Clears an attribute on an existing reference.
    RemoveReferenceAttribute {
        /// Reference identity.
        reference: ReferenceKey,
        /// Attribute slot.
        key: AttributeKey,
    },
    /// Adds or replaces a price.
    UpsertPrice {
        /// The price.
        price: Price,
    },
    /// Drops a price.
    RemovePrice {
        /// Price identity.
        key: PriceKey,
    },
    /// Changes how the selling price is computed.
    SetPriceInnerRecordHandling {
        /// New handling.
        handling: PriceInnerRecordHandling,
    },
}

/// Creation or update of one entity.
///
/// ```
/// use catalogdb_core::UpsertEntity;
///
/// let upsert = UpsertEntity::new("PRODUCT")
///     .attribute("code", "ABC")
///     .localized_attribute("name", "en", "The product")
///     .reference("BRAND", 1);
/// assert_eq!(upsert.mutations.len(), 3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertEntity {
    /// Entity type.
    pub entity_type: String,
    /// Existing or caller-chosen primary key; `None` asks for a generated one.
    pub primary_key: Option<PrimaryKey>,
    /// Changes in application order.
    pub mutations: Vec<LocalMutation>,
}

impl UpsertEntity {
    /// Starts an upsert of a new entity with a generated primary key.
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            primary_key: None,
            mutations: Vec::new(),
        }
    }

    /// Starts an upsert of the entity with `primary_key`.
    pub fn existing(entity_type: impl Into<String>, primary_key: PrimaryKey) -> Self {
        Self {
            primary_key: Some(primary_key),
            ..Self::new(entity_type)
        }
    }

    /// Appends a raw local mutation.
    #[must_use]
    pub fn with(mut self, mutation: LocalMutation) -> Self {
        self.mutations.push(mutation);
        self
    }

    /// Sets a non-localized attribute.
    #[must_use]
    pub fn attribute(self, name: &str, value: impl Into<AttributeValue>) -> Self {
        self.with(LocalMutation::UpsertAttribute {
            key: AttributeKey::new(name),
            value: value.into(),
        })
    }

    /// Sets a localized attribute.
    #[must_use]
    pub fn localized_attribute(
        self,
        name: &str,
        locale: impl Into<Locale>,
        value: impl Into<AttributeValue>,
    ) -> Self {
        self.with(LocalMutation::UpsertAttribute {
            key: AttributeKey::localized(name, locale),
            value: value.into(),
        })
    }

    /// Clears an attribute.
    #[must_use]
    pub fn remove_attribute(self, key: AttributeKey) -> Self {
        self.with(LocalMutation::RemoveAttribute { key })
    }

    /// Sets a non-localized associated data value.
    #[must_use]
    pub fn associated_data(self, name: &str, value: impl Into<AttributeValue>) -> Self {
        self.with(LocalMutation::UpsertAssociatedData {
            key: AttributeKey::new(name),
            value: value.into(),
        })
    }

    /// Sets a localized associated data value.
    #[must_use]
    pub fn localized_associated_data(
        self,
        name: &str,
        locale: impl Into<Locale>,
        value: impl Into<AttributeValue>,
    ) -> Self {
        self.with(LocalMutation::UpsertAssociatedData {
            key: AttributeKey::localized(name, locale),
            value: value.into(),
        })
    }

    /// Places the entity under `parent`.
    #[must_use]
    pub fn parent(self, parent: PrimaryKey) -> Self {
        self.with(LocalMutation::SetParent { parent })
    }

    /// Adds a reference.
    #[must_use]
    pub fn reference(self, name: &str, primary_key: PrimaryKey) -> Self {
        self.with(LocalMutation::InsertReference {
            reference: ReferenceKey::new(name, primary_key),
        })
    }

    /// Drops a reference.
    #[must_use]
    pub fn remove_reference(self, name: &str, primary_key: PrimaryKey) -> Self {
        self.with(LocalMutation::RemoveReference {
            reference: ReferenceKey::new(name, primary_key),
        })
    }

    /// Sets an attribute on reference `name` to `primary_key`.
    #[must_use]
    pub fn reference_attribute(
        self,
        name: &str,
        primary_key: PrimaryKey,
        key: AttributeKey,
        value: impl Into<AttributeValue>,
    ) -> Self {
        self.with(LocalMutation::UpsertReferenceAttribute {
            reference: ReferenceKey::new(name, primary_key),
            key,
            value: value.into(),
        })
    }

    /// Adds or replaces a price.
    #[must_use]
    pub fn price(self, price: Price) -> Self {
        self.with(LocalMutation::UpsertPrice { price })
    }

    /// Changes how the selling price is computed.
    #[must_use]
    pub fn price_inner_record_handling(self, handling: PriceInnerRecordHandling) -> Self {
        self.with(LocalMutation::SetPriceInnerRecordHandling { handling })
    }
}

/// Change of one entity of a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityMutation {
    /// Creates or updates an entity.
    Upsert(UpsertEntity),
    /// Removes an entity.
    Delete {
        /// Entity type.
        entity_type: String,
        /// Primary key.
        primary_key: PrimaryKey,
    },
    /// Removes an entity and all its hierarchy descendants.
    DeleteWithHierarchy {
        /// Entity type.
        entity_type: String,
        /// Primary key of the subtree root.
        primary_key: PrimaryKey,
    },
}

impl EntityMutation {
    /// Entity type the mutation targets.
    #[must_use]
    pub fn entity_type(&self) -> &str {
        match self {
            Self::Upsert(upsert) => &upsert.entity_type,
            Self::Delete { entity_type, .. } | Self::DeleteWithHierarchy { entity_type, .. } => {
                entity_type
            }
        }
    }
}

impl From<UpsertEntity> for EntityMutation {
    fn from(upsert: UpsertEntity) -> Self {
        Self::Upsert(upsert)
    }
}

/// Change of the catalog schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchemaMutation {
    /// Creates or replaces an entity schema, creating its collection.
    UpsertEntitySchema {
        /// The new schema.
        schema: EntitySchema,
        /// Version of the schema the change was based on; `0` for new types.
        based_on: u32,
    },
    /// Removes an entity schema together with its collection.
    RemoveEntitySchema {
        /// Entity type.
        name: String,
    },
}

/// Anything a catalog transaction can stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CatalogMutation {
    /// Schema change.
    Schema(SchemaMutation),
    /// Entity change.
    Entity(EntityMutation),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_appends_in_order() {
        let upsert = UpsertEntity::existing("PRODUCT", 4)
            .attribute("code", "X")
            .remove_reference("BRAND", 1)
            .price(Price::new(1, "basic", "EUR", 100, 121));
        assert_eq!(upsert.primary_key, Some(4));
        assert!(matches!(upsert.mutations[1], LocalMutation::RemoveReference { .. }));
        assert_eq!(EntityMutation::from(upsert).entity_type(), "PRODUCT");
    }
}
