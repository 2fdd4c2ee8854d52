//! Entity indices and the sub-indices they are made of.
//!
//! Every entity collection owns one global index plus reduced indices scoped
//! to a referenced entity or hierarchy node. Each index holds:
//!
//! - [`UniqueIndex`]: value to exactly one record
//! - [`FilterIndex`]: value to a set of records, with range lookups
//! - [`SortIndex`]: records ordered by a single value or a compound key
//! - [`PriceListAndCurrencyIndex`]: sellable prices of one price list and currency
//! - [`FacetIndex`] and [`HierarchyIndex`] in the global index
//!
//! Indices are derivable from entity data and are rebuilt on load.

mod entity_index;
mod facet;
mod filter;
mod hierarchy;
mod key;
mod price;
mod sort;
mod traits;
mod unique;

pub use entity_index::{CompoundValue, EntityIndex, IndexProjection, IndexedAttribute};
pub use facet::{FacetIndex, FacetKey};
pub use filter::{FilterIndex, RangeIndex};
pub use hierarchy::HierarchyIndex;
pub use key::{
    AttributeKey, EntityIndexKey, EntityIndexType, PriceIndexKey, PriceInnerRecordHandling,
    ScopeReference,
};
pub use price::{IndexedPrice, PriceListAndCurrencyIndex};
pub use sort::{SortElement, SortIndex, SortKey};
pub use traits::SubIndex;
pub use unique::UniqueIndex;
