//! Reference schemas.

use super::attribute::AttributeSchema;
use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Allowed number of references of one kind on an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cardinality {
    /// None or one.
    ZeroOrOne,
    /// Exactly one.
    ExactlyOne,
    /// Any number.
    ZeroOrMore,
    /// At least one.
    OneOrMore,
}

impl Cardinality {
    /// Returns `true` when an entity with `count` references satisfies the cardinality.
    #[must_use]
    pub fn allows(self, count: usize) -> bool {
        match self {
            Self::ZeroOrOne => count <= 1,
            Self::ExactlyOne => count == 1,
            Self::ZeroOrMore => true,
            Self::OneOrMore => count >= 1,
        }
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ZeroOrOne => "ZERO_OR_ONE",
            Self::ExactlyOne => "EXACTLY_ONE",
            Self::ZeroOrMore => "ZERO_OR_MORE",
            Self::OneOrMore => "ONE_OR_MORE",
        })
    }
}

/// Schema of a named reference from one entity type to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceSchema {
    /// Reference name.
    pub name: String,
    /// Entity type on the other end.
    pub referenced_entity_type: String,
    /// Allowed reference count.
    pub cardinality: Cardinality,
    /// Referencing entities get a reduced index per referenced entity.
    pub indexed: bool,
    /// Referenced entities act as facets in the global index.
    pub faceted: bool,
    /// Attributes carried on the reference itself.
    pub attributes: BTreeMap<String, AttributeSchema>,
}

impl ReferenceSchema {
    /// Creates a non-indexed reference.
    pub fn new(
        name: impl Into<String>,
        referenced_entity_type: impl Into<String>,
        cardinality: Cardinality,
    ) -> Self {
        Self {
            name: name.into(),
            referenced_entity_type: referenced_entity_type.into(),
            cardinality,
            indexed: false,
            faceted: false,
            attributes: BTreeMap::new(),
        }
    }

    /// Marks the reference indexed.
    #[must_use]
    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    /// Marks the reference faceted.
    #[must_use]
    pub fn faceted(mut self) -> Self {
        self.faceted = true;
        self
    }

    /// Adds an attribute carried on the reference.
    #[must_use]
    pub fn with_attribute(mut self, attribute: AttributeSchema) -> Self {
        self.attributes.insert(attribute.name.clone(), attribute);
        self
    }

    /// Looks up a reference attribute.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&AttributeSchema> {
        self.attributes.get(name)
    }

    pub(crate) fn validate(&self, entity_type: &str) -> CoreResult<()> {
        if self.faceted && !self.indexed {
            return Err(CoreError::schema_violation(format!(
                "Reference `{}` of entity `{entity_type}` is faceted but not indexed.",
                self.name
            )));
        }
        let owner = format!("entity `{entity_type}` reference `{}`", self.name);
        for attribute in self.attributes.values() {
            attribute.validate(&owner)?;
            if attribute.is_indexed() && !self.indexed {
                return Err(CoreError::schema_violation(format!(
                    "Attribute `{}` of {owner} cannot be filterable, sortable or unique because the reference is not indexed.",
                    attribute.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::AttributeType;

    #[test]
    fn cardinality_bounds() {
        assert!(Cardinality::ZeroOrOne.allows(0));
        assert!(!Cardinality::ZeroOrOne.allows(2));
        assert!(!Cardinality::ExactlyOne.allows(0));
        assert!(!Cardinality::ExactlyOne.allows(2));
        assert!(Cardinality::ZeroOrMore.allows(100));
        assert!(!Cardinality::OneOrMore.allows(0));
        assert_eq!(Cardinality::OneOrMore.to_string(), "ONE_OR_MORE");
    }

    #[test]
    fn indexed_attribute_on_plain_reference_is_rejected() {
        let reference = ReferenceSchema::new("BRAND", "BRAND", Cardinality::ZeroOrOne)
            .with_attribute(AttributeSchema::new("priority", AttributeType::Int).filterable());
        let err = reference.validate("PRODUCT").unwrap_err();
        assert!(matches!(err, CoreError::SchemaViolation { .. }));
        assert!(err.to_string().contains("reference is not indexed"));

        let indexed = reference.indexed();
        assert!(indexed.validate("PRODUCT").is_ok());
    }

    #[test]
    fn faceted_requires_indexed() {
        let reference = ReferenceSchema::new("BRAND", "BRAND", Cardinality::ZeroOrOne).faceted();
        assert!(reference.validate("PRODUCT").is_err());
    }
}
