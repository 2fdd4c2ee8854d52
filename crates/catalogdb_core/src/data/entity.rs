//! Entity bodies.

use super::mutation::LocalMutation;
use super::value::AttributeValue;
use crate::error::{CoreError, CoreResult};
use crate::index::{AttributeKey, PriceInnerRecordHandling};
use crate::types::{Locale, PrimaryKey};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Identity of one reference on an entity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReferenceKey {
    /// Reference name from the schema.
    pub name: String,
    /// Primary key of the referenced entity.
    pub primary_key: PrimaryKey,
}

impl ReferenceKey {
    /// Creates a reference key.
    pub fn new(name: impl Into<String>, primary_key: PrimaryKey) -> Self {
        Self {
            name: name.into(),
            primary_key,
        }
    }
}

/// Data carried by one reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    /// Reference attributes.
    pub attributes: BTreeMap<AttributeKey, AttributeValue>,
}

/// Identity of one price on an entity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PriceKey {
    /// External price id.
    pub price_id: u32,
    /// Price list name.
    pub price_list: String,
    /// ISO currency code.
    pub currency: String,
}

/// A price of an entity. Amounts are in minor currency units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    /// External price id.
    pub price_id: u32,
    /// Price list name.
    pub price_list: String,
    /// ISO currency code.
    pub currency: String,
    /// Inner record (variant) the price belongs to.
    pub inner_record_id: Option<u32>,
    /// Amount without tax.
    pub price_without_tax: i64,
    /// Amount with tax.
    pub price_with_tax: i64,
    /// Whether the price can be used as a selling price.
    pub sellable: bool,
}

impl Price {
    /// Creates a sellable price without inner record.
    pub fn new(
        price_id: u32,
        price_list: impl Into<String>,
        currency: impl Into<String>,
        price_without_tax: i64,
        price_with_tax: i64,
    ) -> Self {
        Self {
            price_id,
            price_list: price_list.into(),
            currency: currency.into(),
            inner_record_id: None,
            price_without_tax,
            price_with_tax,
            sellable: true,
        }
    }

    /// Assigns the price to an inner record.
    #[must_use]
    pub fn for_inner_record(mut self, inner_record_id: u32) -> Self {
        self.inner_record_id = Some(inner_record_id);
        self
    }

    /// Marks the price as not sellable.
    #[must_use]
    pub fn not_sellable(mut self) -> Self {
        self.sellable = false;
        self
    }

    /// Identity of the price.
    #[must_use]
    pub fn key(&self) -> PriceKey {
        PriceKey {
            price_id: self.price_id,
            price_list: self.price_list.clone(),
            currency: self.currency.clone(),
        }
    }
}

/// One entity of a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Entity type.
    pub entity_type: String,
    /// Primary key.
    pub primary_key: PrimaryKey,
    /// Incremented on every committed change of this entity.
    pub version: u32,
    /// Parent in the hierarchy.
    pub parent: Option<PrimaryKey>,
    /// Attribute values.
    pub attributes: BTreeMap<AttributeKey, AttributeValue>,
    /// Associated data values.
    pub associated_data: BTreeMap<AttributeKey, AttributeValue>,
    /// References by name and referenced key.
    pub references: BTreeMap<ReferenceKey, Reference>,
    /// Prices.
    pub prices: BTreeMap<PriceKey, Price>,
    /// Selling price computation.
    pub price_inner_record_handling: PriceInnerRecordHandling,
    locales: BTreeSet<Locale>,
}

impl Entity {
    /// Creates an empty entity.
    pub fn new(entity_type: impl Into<String>, primary_key: PrimaryKey) -> Self {
        Self {
            entity_type: entity_type.into(),
            primary_key,
            version: 0,
            parent: None,
            attributes: BTreeMap::new(),
            associated_data: BTreeMap::new(),
            references: BTreeMap::new(),
            prices: BTreeMap::new(),
            price_inner_record_handling: PriceInnerRecordHandling::None,
            locales: BTreeSet::new(),
        }
    }

    /// Locales of every localized attribute, reference attribute and associated data value.
    #[must_use]
    pub fn locales(&self) -> &BTreeSet<Locale> {
        &self.locales
    }

    /// Non-localized attribute value.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(&AttributeKey::new(name))
    }

    /// Attribute value in `locale`.
    #[must_use]
    pub fn localized_attribute(&self, name: &str, locale: &Locale) -> Option<&AttributeValue> {
        self.attributes
            .get(&AttributeKey::localized(name, locale.clone()))
    }

    /// Primary keys referenced through reference `name`.
    pub fn referenced_keys<'a>(&'a self, name: &'a str) -> impl Iterator<Item = PrimaryKey> + 'a {
        self.references
            .keys()
            .filter(move |k| k.name == name)
            .map(|k| k.primary_key)
    }

    /// Number of references named `name`.
    #[must_use]
    pub fn reference_count(&self, name: &str) -> usize {
        self.referenced_keys(name).count()
    }

    /// Applies one local mutation to the body.
    ///
    /// Schema checks happen in the owning collection; this only fails on
    /// mutations that are structurally impossible.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] when a reference attribute
    /// targets a reference the entity does not hold.
    pub fn apply(&mut self, mutation: &LocalMutation) -> CoreResult<()> {
        match mutation {
            LocalMutation::UpsertAttribute { key, value } => {
                self.attributes.insert(key.clone(), value.clone());
            }
            LocalMutation::RemoveAttribute { key } => {
                self.attributes.remove(key);
            }
            LocalMutation::UpsertAssociatedData { key, value } => {
                self.associated_data.insert(key.clone(), value.clone());
            }
            LocalMutation::RemoveAssociatedData { key } => {
                self.associated_data.remove(key);
            }
            LocalMutation::SetParent { parent } => {
                if *parent == self.primary_key {
                    return Err(CoreError::invalid_operation(format!(
                        "entity `{}` {} cannot be its own parent",
                        self.entity_type, self.primary_key
                    )));
                }
                self.parent = Some(*parent);
            }
            LocalMutation::RemoveParent => {
                self.parent = None;
            }
            LocalMutation::InsertReference { reference } => {
                self.references.entry(reference.clone()).or_default();
            }
            LocalMutation::RemoveReference { reference } => {
                self.references.remove(reference);
            }
            LocalMutation::UpsertReferenceAttribute { reference, key, value } => {
                self.reference_mut(reference)?
                    .attributes
                    .insert(key.clone(), value.clone());
            }
            LocalMutation::RemoveReferenceAttribute { reference, key } => {
                self.reference_mut(reference)?.attributes.remove(key);
            }
            LocalMutation::UpsertPrice { price } => {
                self.prices.insert(price.key(), price.clone());
            }
            LocalMutation::RemovePrice { key } => {
                self.prices.remove(key);
            }
            LocalMutation::SetPriceInnerRecordHandling { handling } => {
                self.price_inner_record_handling = *handling;
            }
        }
        Ok(())
    }

    fn reference_mut(&mut self, reference: &ReferenceKey) -> CoreResult<&mut Reference> {
        let entity_type = &self.entity_type;
        let primary_key = self.primary_key;
        self.references.get_mut(reference).ok_or_else(|| {
            CoreError::invalid_operation(format!(
                "entity `{entity_type}` {primary_key} has no reference `{}` to {}",
                reference.name, reference.primary_key
            ))
        })
    }

    /// Recomputes the locale set from localized values.
    pub fn recompute_locales(&mut self) {
        let attributes = self.attributes.keys();
        let data = self.associated_data.keys();
        let references = self.references.values().flat_map(|r| r.attributes.keys());
        self.locales = attributes
            .chain(data)
            .chain(references)
            .filter_map(|k| k.locale.clone())
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locales_follow_localized_values() {
        let mut entity = Entity::new("PRODUCT", 1);
        entity
            .apply(&LocalMutation::UpsertAttribute {
                key: AttributeKey::localized("name", "en"),
                value: "The product".into(),
            })
            .unwrap();
        entity
            .apply(&LocalMutation::UpsertAssociatedData {
                key: AttributeKey::localized("manual", "de"),
                value: "Handbuch".into(),
            })
            .unwrap();
        entity.recompute_locales();
        assert_eq!(entity.locales().len(), 2);

        entity
            .apply(&LocalMutation::RemoveAttribute {
                key: AttributeKey::localized("name", "en"),
            })
            .unwrap();
        entity.recompute_locales();
        assert!(!entity.locales().contains(&Locale::new("en")));
        assert!(entity.locales().contains(&Locale::new("de")));
    }

    #[test]
    fn reference_attribute_needs_reference() {
        let mut entity = Entity::new("PRODUCT", 1);
        let reference = ReferenceKey::new("BRAND", 5);
        let upsert = LocalMutation::UpsertReferenceAttribute {
            reference: reference.clone(),
            key: AttributeKey::new("priority"),
            value: 1.into(),
        };
        assert!(entity.apply(&upsert).is_err());

        entity
            .apply(&LocalMutation::InsertReference { reference })
            .unwrap();
        entity.apply(&upsert).unwrap();
        assert_eq!(entity.reference_count("BRAND"), 1);
    }

    #[test]
    fn entity_cannot_parent_itself() {
        let mut entity = Entity::new("CATEGORY", 3);
        assert!(entity.apply(&LocalMutation::SetParent { parent: 3 }).is_err());
        entity.apply(&LocalMutation::SetParent { parent: 1 }).unwrap();
        assert_eq!(entity.parent, Some(1));
    }
}
