//! Attribute and associated data schemas.

use crate::data::AttributeValue;
use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};

/// Declared type of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttributeType {
    /// Text.
    String,
    /// Signed integer.
    Int,
    /// Boolean.
    Bool,
    /// Integer interval.
    IntRange,
    /// Array of texts.
    StringArray,
    /// Array of integers.
    IntArray,
}

impl AttributeType {
    /// Returns `true` when `value` has this type.
    #[must_use]
    pub fn accepts(self, value: &AttributeValue) -> bool {
        match (self, value) {
            (Self::String, AttributeValue::String(_))
            | (Self::Int, AttributeValue::Int(_))
            | (Self::Bool, AttributeValue::Bool(_))
            | (Self::IntRange, AttributeValue::IntRange(_)) => true,
            (Self::StringArray, AttributeValue::Array(items)) => {
                items.iter().all(|i| matches!(i, AttributeValue::String(_)))
            }
            (Self::IntArray, AttributeValue::Array(items)) => {
                items.iter().all(|i| matches!(i, AttributeValue::Int(_)))
            }
            _ => false,
        }
    }

    /// Returns `true` for array types.
    #[must_use]
    pub fn is_array(self) -> bool {
        matches!(self, Self::StringArray | Self::IntArray)
    }
}

/// Sub-index kinds an attribute can be routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeIndexKind {
    /// Value to single record.
    Unique,
    /// Value to record set.
    Filter,
    /// Ordered records.
    Sort,
}

/// Set of [`AttributeIndexKind`]s selected for one attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndexKinds(u8);

impl IndexKinds {
    const UNIQUE: u8 = 1;
    const FILTER: u8 = 1 << 1;
    const SORT: u8 = 1 << 2;

    /// No sub-index.
    pub const NONE: Self = Self(0);

    fn bit(kind: AttributeIndexKind) -> u8 {
        match kind {
            AttributeIndexKind::Unique => Self::UNIQUE,
            AttributeIndexKind::Filter => Self::FILTER,
            AttributeIndexKind::Sort => Self::SORT,
        }
    }

    /// Adds `kind` to the set.
    #[must_use]
    pub fn with(self, kind: AttributeIndexKind) -> Self {
        Self(self.0 | Self::bit(kind))
    }

    /// Returns `true` when `kind` is in the set.
    #[must_use]
    pub fn contains(self, kind: AttributeIndexKind) -> bool {
        self.0 & Self::bit(kind) != 0
    }

    /// Returns `true` when the attribute is not indexed at all.
    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// Schema of an entity or reference attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeSchema {
    /// Attribute name.
    pub name: String,
    /// Value type.
    pub attribute_type: AttributeType,
    /// Values must not repeat across entities.
    pub unique: bool,
    /// Values are kept in a filter index.
    pub filterable: bool,
    /// Values are kept in a sort index.
    pub sortable: bool,
    /// One value per locale instead of one value per entity.
    pub localized: bool,
    /// The attribute may be left without a value.
    pub nullable: bool,
    /// Value filled in when a new entity omits the attribute.
    pub default_value: Option<AttributeValue>,
}

impl AttributeSchema {
    /// Creates a non-indexed, non-localized, mandatory attribute.
    pub fn new(name: impl Into<String>, attribute_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            attribute_type,
            unique: false,
            filterable: false,
            sortable: false,
            localized: false,
            nullable: false,
            default_value: None,
        }
    }

    /// Marks the attribute unique.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Marks the attribute filterable.
    #[must_use]
    pub fn filterable(mut self) -> Self {
        self.filterable = true;
        self
    }

    /// Marks the attribute sortable.
    #[must_use]
    pub fn sortable(mut self) -> Self {
        self.sortable = true;
        self
    }

    /// Marks the attribute localized.
    #[must_use]
    pub fn localized(mut self) -> Self {
        self.localized = true;
        self
    }

    /// Marks the attribute nullable.
    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Sets the value used when a new entity omits the attribute.
    #[must_use]
    pub fn with_default(mut self, value: impl Into<AttributeValue>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Sub-indices this attribute is routed to.
    #[must_use]
    pub fn index_kinds(&self) -> IndexKinds {
        let mut kinds = IndexKinds::NONE;
        if self.unique {
            kinds = kinds.with(AttributeIndexKind::Unique);
        }
        if self.filterable {
            kinds = kinds.with(AttributeIndexKind::Filter);
        }
        if self.sortable {
            kinds = kinds.with(AttributeIndexKind::Sort);
        }
        kinds
    }

    /// Returns `true` when the attribute needs any sub-index.
    #[must_use]
    pub fn is_indexed(&self) -> bool {
        !self.index_kinds().is_empty()
    }

    pub(crate) fn validate(&self, owner: &str) -> CoreResult<()> {
        if self.name.is_empty() {
            return Err(CoreError::schema_violation(format!(
                "{owner} declares an attribute with an empty name"
            )));
        }
        if self.sortable && self.attribute_type.is_array() {
            return Err(CoreError::schema_violation(format!(
                "Attribute `{}` of {owner} is an array and cannot be sortable.",
                self.name
            )));
        }
        if let Some(default) = &self.default_value {
            if !self.attribute_type.accepts(default) {
                return Err(CoreError::schema_violation(format!(
                    "Default value `{default}` of attribute `{}` of {owner} does not match type {:?}.",
                    self.name, self.attribute_type
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn check_value(&self, owner: &str, value: &AttributeValue) -> CoreResult<()> {
        if self.attribute_type.accepts(value) {
            Ok(())
        } else {
            Err(CoreError::schema_violation(format!(
                "Attribute `{}` of {owner} expects {:?}, got `{value}`.",
                self.name, self.attribute_type
            )))
        }
    }
}

/// Schema of an associated data entry.
///
/// Associated data are stored with the entity but never indexed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociatedDataSchema {
    /// Name.
    pub name: String,
    /// One value per locale.
    pub localized: bool,
    /// May be left without a value.
    pub nullable: bool,
}

impl AssociatedDataSchema {
    /// Creates a non-localized, mandatory entry.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            localized: false,
            nullable: false,
        }
    }

    /// Marks the entry localized.
    #[must_use]
    pub fn localized(mut self) -> Self {
        self.localized = true;
        self
    }

    /// Marks the entry nullable.
    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}
