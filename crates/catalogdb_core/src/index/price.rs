//! Price sub-index.

use super::key::{PriceIndexKey, PriceInnerRecordHandling};
use super::traits::SubIndex;
use crate::error::CoreResult;
use crate::types::PrimaryKey;
use std::collections::{BTreeMap, BTreeSet};

/// A sellable price as seen by the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexedPrice {
    /// External price id.
    pub price_id: u32,
    /// Inner record the price belongs to.
    pub inner_record_id: Option<u32>,
    /// Amount without tax.
    pub price_without_tax: i64,
    /// Amount with tax.
    pub price_with_tax: i64,
}

/// Sellable prices of one price list and currency.
///
/// Non-sellable prices never reach this index.
#[derive(Debug, Clone)]
pub struct PriceListAndCurrencyIndex {
    key: PriceIndexKey,
    prices: BTreeMap<PrimaryKey, Vec<IndexedPrice>>,
}

impl PriceListAndCurrencyIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new(key: PriceIndexKey) -> Self {
        Self {
            key,
            prices: BTreeMap::new(),
        }
    }

    /// Identity of the index.
    #[must_use]
    pub fn key(&self) -> &PriceIndexKey {
        &self.key
    }

    /// Records with at least one sellable price.
    #[must_use]
    pub fn records(&self) -> BTreeSet<PrimaryKey> {
        self.prices.keys().copied().collect()
    }

    /// Prices indexed for `record`.
    #[must_use]
    pub fn prices_of(&self, record: PrimaryKey) -> &[IndexedPrice] {
        self.prices.get(&record).map(Vec::as_slice).unwrap_or_default()
    }

    /// Selling price (with tax) of `record` according to the inner record handling.
    ///
    /// Without inner record handling the price with the lowest id wins. Summed
    /// prices take the lowest-id price of each inner record; a sum that
    /// overflows `i64` leaves the record without a selling price.
    #[must_use]
    pub fn selling_price(&self, record: PrimaryKey) -> Option<i64> {
        let prices = self.prices.get(&record)?;
        match self.key.inner_record_handling {
            PriceInnerRecordHandling::None => prices
                .iter()
                .min_by_key(|p| p.price_id)
                .map(|p| p.price_with_tax),
            PriceInnerRecordHandling::LowestPrice => prices.iter().map(|p| p.price_with_tax).min(),
            PriceInnerRecordHandling::Sum => {
                let mut per_inner: BTreeMap<Option<u32>, &IndexedPrice> = BTreeMap::new();
                for price in prices {
                    per_inner
                        .entry(price.inner_record_id)
                        .and_modify(|current| {
                            if price.price_id < current.price_id {
                                *current = price;
                            }
                        })
                        .or_insert(price);
                }
                per_inner
                    .values()
                    .try_fold(0i64, |total, p| total.checked_add(p.price_with_tax))
            }
        }
    }

    /// Records whose selling price lies within `[from, to]`, cheapest first.
    #[must_use]
    pub fn records_with_price_between(&self, from: i64, to: i64) -> Vec<PrimaryKey> {
        let mut matching: Vec<(i64, PrimaryKey)> = self
            .prices
            .keys()
            .filter_map(|&record| {
                self.selling_price(record)
                    .filter(|price| (from..=to).contains(price))
                    .map(|price| (price, record))
            })
            .collect();
        matching.sort_unstable();
        matching.into_iter().map(|(_, record)| record).collect()
    }
}

impl SubIndex for PriceListAndCurrencyIndex {
    type Value = [IndexedPrice];

    fn insert(&mut self, record: PrimaryKey, prices: &[IndexedPrice]) -> CoreResult<()> {
        if prices.is_empty() {
            self.prices.remove(&record);
        } else {
            let mut prices = prices.to_vec();
            prices.sort_by_key(|p| p.price_id);
            self.prices.insert(record, prices);
        }
        Ok(())
    }

    fn remove_record(&mut self, record: PrimaryKey) -> bool {
        self.prices.remove(&record).is_some()
    }

    fn contains_record(&self, record: PrimaryKey) -> bool {
        self.prices.contains_key(&record)
    }

    fn len(&self) -> usize {
        self.prices.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn price(price_id: u32, inner: Option<u32>, with_tax: i64) -> IndexedPrice {
        IndexedPrice {
            price_id,
            inner_record_id: inner,
            price_without_tax: with_tax / 121 * 100,
            price_with_tax: with_tax,
        }
    }

    fn index(handling: PriceInnerRecordHandling) -> PriceListAndCurrencyIndex {
        PriceListAndCurrencyIndex::new(PriceIndexKey::new("basic", "EUR", handling))
    }

    #[test]
    fn selling_price_per_handling() {
        let prices = [price(2, Some(1), 300), price(1, Some(2), 200), price(3, Some(2), 100)];

        let mut none = index(PriceInnerRecordHandling::None);
        none.insert(1, &prices).unwrap();
        assert_eq!(none.selling_price(1), Some(200));

        let mut lowest = index(PriceInnerRecordHandling::LowestPrice);
        lowest.insert(1, &prices).unwrap();
        assert_eq!(lowest.selling_price(1), Some(100));

        let mut sum = index(PriceInnerRecordHandling::Sum);
        sum.insert(1, &prices).unwrap();
        assert_eq!(sum.selling_price(1), Some(500));
    }

    #[test]
    fn overflowing_sum_has_no_selling_price() {
        let mut sum = index(PriceInnerRecordHandling::Sum);
        sum.insert(1, &[price(1, Some(1), i64::MAX), price(2, Some(2), 1)]).unwrap();
        sum.insert(2, &[price(3, Some(1), 40), price(4, Some(2), 2)]).unwrap();

        assert_eq!(sum.selling_price(1), None);
        assert_eq!(sum.selling_price(2), Some(42));
        assert_eq!(sum.records_with_price_between(i64::MIN, i64::MAX), vec![2]);
    }

    #[test]
    fn range_query_orders_by_price() {
        let mut index = index(PriceInnerRecordHandling::None);
        index.insert(1, &[price(1, None, 500)]).unwrap();
        index.insert(2, &[price(2, None, 150)]).unwrap();
        index.insert(3, &[price(3, None, 900)]).unwrap();

        assert_eq!(index.records_with_price_between(100, 600), vec![2, 1]);
        assert!(index.remove_record(2));
        assert_eq!(index.records(), BTreeSet::from([1, 3]));
    }

    #[test]
    fn empty_price_list_removes_record() {
        let mut index = index(PriceInnerRecordHandling::None);
        index.insert(1, &[price(1, None, 10)]).unwrap();
        index.insert(1, &[]).unwrap();
        assert!(index.is_empty());
    }
}
