//! Sortable attribute compounds.

use serde::{Deserialize, Serialize};

/// Direction of one element of an ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OrderDirection {
    /// Smallest first.
    #[default]
    Asc,
    /// Largest first.
    Desc,
}

/// Position of missing values in an ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OrderBehaviour {
    /// Missing values come before every present value.
    NullsFirst,
    /// Missing values come after every present value.
    #[default]
    NullsLast,
}

/// One attribute of a compound together with its ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeElement {
    /// Constituent attribute.
    pub attribute_name: String,
    /// Direction.
    pub direction: OrderDirection,
    /// Null placement.
    pub behaviour: OrderBehaviour,
}

impl AttributeElement {
    /// Creates an element.
    pub fn new(attribute_name: impl Into<String>, direction: OrderDirection, behaviour: OrderBehaviour) -> Self {
        Self {
            attribute_name: attribute_name.into(),
            direction,
            behaviour,
        }
    }
}

/// Derived sort key composed of several attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortableAttributeCompoundSchema {
    /// Compound name, sharing the namespace of sort indices.
    pub name: String,
    /// Constituents in significance order.
    pub elements: Vec<AttributeElement>,
}

impl SortableAttributeCompoundSchema {
    /// Creates a compound.
    pub fn new(name: impl Into<String>, elements: Vec<AttributeElement>) -> Self {
        Self {
            name: name.into(),
            elements,
        }
    }
}
