//! Entity schemas.

use super::attribute::{AssociatedDataSchema, AttributeSchema};
use super::compound::SortableAttributeCompoundSchema;
use super::reference::ReferenceSchema;
use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Schema of one entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySchema {
    /// Entity type name, also the collection name.
    pub name: String,
    /// Incremented on every accepted change.
    pub version: u32,
    /// Primary keys are assigned by the engine.
    pub with_generated_primary_key: bool,
    /// Entities form a tree through their parent.
    pub with_hierarchy: bool,
    /// Attributes by name.
    pub attributes: BTreeMap<String, AttributeSchema>,
    /// Associated data by name.
    pub associated_data: BTreeMap<String, AssociatedDataSchema>,
    /// References by name.
    pub references: BTreeMap<String, ReferenceSchema>,
    /// Sortable attribute compounds by name.
    pub sortable_attribute_compounds: BTreeMap<String, SortableAttributeCompoundSchema>,
}

impl EntitySchema {
    /// Creates an empty schema with generated primary keys.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: 0,
            with_generated_primary_key: true,
            with_hierarchy: false,
            attributes: BTreeMap::new(),
            associated_data: BTreeMap::new(),
            references: BTreeMap::new(),
            sortable_attribute_compounds: BTreeMap::new(),
        }
    }

    /// Sets whether primary keys are generated.
    #[must_use]
    pub fn with_generated_primary_key(mut self, generated: bool) -> Self {
        self.with_generated_primary_key = generated;
        self
    }

    /// Makes entities of this type hierarchical.
    #[must_use]
    pub fn with_hierarchy(mut self) -> Self {
        self.with_hierarchy = true;
        self
    }

    /// Adds or replaces an attribute.
    #[must_use]
    pub fn with_attribute(mut self, attribute: AttributeSchema) -> Self {
        self.attributes.insert(attribute.name.clone(), attribute);
        self
    }

    /// Adds or replaces an associated data entry.
    #[must_use]
    pub fn with_associated_data(mut self, data: AssociatedDataSchema) -> Self {
        self.associated_data.insert(data.name.clone(), data);
        self
    }

    /// Adds or replaces a reference.
    #[must_use]
    pub fn with_reference(mut self, reference: ReferenceSchema) -> Self {
        self.references.insert(reference.name.clone(), reference);
        self
    }

    /// Adds or replaces a sortable attribute compound.
    #[must_use]
    pub fn with_sortable_attribute_compound(mut self, compound: SortableAttributeCompoundSchema) -> Self {
        self.sortable_attribute_compounds.insert(compound.name.clone(), compound);
        self
    }

    /// Looks up an attribute.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&AttributeSchema> {
        self.attributes.get(name)
    }

    /// Looks up a reference.
    #[must_use]
    pub fn reference(&self, name: &str) -> Option<&ReferenceSchema> {
        self.references.get(name)
    }

    /// Returns `true` when any constituent of `compound` is localized.
    #[must_use]
    pub fn is_compound_localized(&self, compound: &SortableAttributeCompoundSchema) -> bool {
        compound
            .elements
            .iter()
            .any(|e| self.attribute(&e.attribute_name).is_some_and(|a| a.localized))
    }

    /// Checks the schema for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SchemaViolation`] describing the first problem found.
    pub fn validate(&self) -> CoreResult<()> {
        if self.name.is_empty() {
            return Err(CoreError::schema_violation("entity type name must not be empty"));
        }
        let owner = format!("entity `{}`", self.name);
        for attribute in self.attributes.values() {
            attribute.validate(&owner)?;
        }
        for reference in self.references.values() {
            reference.validate(&self.name)?;
            // reduced indices hold entity and reference attributes side by side
            if let Some(clash) = reference
                .attributes
                .values()
                .find(|a| a.is_indexed() && self.attributes.contains_key(&a.name))
            {
                return Err(CoreError::schema_violation(format!(
                    "Attribute `{}` of {owner} reference `{}` clashes with an entity attribute of the same name.",
                    clash.name, reference.name
                )));
            }
        }
        for compound in self.sortable_attribute_compounds.values() {
            if compound.elements.is_empty() {
                return Err(CoreError::schema_violation(format!(
                    "Sortable attribute compound `{}` of {owner} has no elements.",
                    compound.name
                )));
            }
            if self.attributes.contains_key(&compound.name) {
                return Err(CoreError::schema_violation(format!(
                    "Sortable attribute compound `{}` of {owner} clashes with an attribute of the same name.",
                    compound.name
                )));
            }
            for element in &compound.elements {
                match self.attribute(&element.attribute_name) {
                    None => {
                        return Err(CoreError::schema_violation(format!(
                            "Sortable attribute compound `{}` of {owner} refers to unknown attribute `{}`.",
                            compound.name, element.attribute_name
                        )))
                    }
                    Some(a) if a.attribute_type.is_array() => {
                        return Err(CoreError::schema_violation(format!(
                            "Sortable attribute compound `{}` of {owner} cannot use array attribute `{}`.",
                            compound.name, element.attribute_name
                        )))
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AttributeElement, AttributeType, OrderBehaviour, OrderDirection};

    fn code_ean() -> SortableAttributeCompoundSchema {
        SortableAttributeCompoundSchema::new(
            "codeEan",
            vec![
                AttributeElement::new("code", OrderDirection::Desc, OrderBehaviour::NullsFirst),
                AttributeElement::new("ean", OrderDirection::Asc, OrderBehaviour::NullsLast),
            ],
        )
    }

    #[test]
    fn compound_over_unknown_attribute_is_rejected() {
        let schema = EntitySchema::new("PRODUCT")
            .with_attribute(AttributeSchema::new("code", AttributeType::String).nullable())
            .with_sortable_attribute_compound(code_ean());
        let err = schema.validate().unwrap_err();
        assert!(err.to_string().contains("unknown attribute `ean`"));
    }

    #[test]
    fn compound_localization_follows_constituents() {
        let schema = EntitySchema::new("PRODUCT")
            .with_attribute(AttributeSchema::new("code", AttributeType::String).nullable())
            .with_attribute(AttributeSchema::new("ean", AttributeType::String).localized().nullable())
            .with_sortable_attribute_compound(code_ean());
        assert!(schema.validate().is_ok());
        assert!(schema.is_compound_localized(&code_ean()));
    }
}
