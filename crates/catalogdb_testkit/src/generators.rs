//! Property-based test generators using proptest.
//!
//! Products generated here fit [`product_schema`](crate::fixtures::product_schema).

use crate::fixtures::PRODUCT;
use catalogdb_core::{AttributeValue, Locale, UpsertEntity};
use proptest::prelude::*;
use std::collections::BTreeMap;

/// Strategy for generating valid catalog names.
pub fn catalog_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z][a-zA-Z0-9_-]{0,31}")
        .expect("Invalid regex")
        .prop_filter("LOCK is reserved", |s| s != "LOCK")
}

/// Strategy for generating locales out of a small fixed set, so that
/// generated entities share locales.
pub fn locale_strategy() -> impl Strategy<Value = Locale> {
    prop::sample::select(vec!["en", "de", "cs", "fr"]).prop_map(Locale::from)
}

/// Strategy for scalar attribute values.
pub fn attribute_value_strategy() -> impl Strategy<Value = AttributeValue> {
    prop_oneof![
        any::<bool>().prop_map(AttributeValue::Bool),
        any::<i64>().prop_map(AttributeValue::Int),
        prop::string::string_regex("[a-z0-9 ]{0,16}")
            .expect("Invalid regex")
            .prop_map(AttributeValue::String),
    ]
}

/// Generated product contents.
#[derive(Debug, Clone)]
pub struct ProductSpec {
    /// Unique code.
    pub code: String,
    /// Optional quantity.
    pub quantity: Option<i64>,
    /// Localized names.
    pub names: BTreeMap<Locale, String>,
}

impl ProductSpec {
    /// Builds the upsert creating this product.
    pub fn to_upsert(&self) -> UpsertEntity {
        let mut upsert = UpsertEntity::new(PRODUCT).attribute("code", self.code.as_str());
        if let Some(quantity) = self.quantity {
            upsert = upsert.attribute("quantity", quantity);
        }
        for (locale, name) in &self.names {
            upsert = upsert.localized_attribute("name", locale.clone(), name.as_str());
        }
        upsert
    }
}

/// Strategy for products with the given code.
pub fn product_strategy(code: String) -> impl Strategy<Value = ProductSpec> {
    (
        prop::option::of(-1_000i64..1_000),
        prop::collection::btree_map(locale_strategy(), "[A-Z][a-z]{1,12}", 0..3),
    )
        .prop_map(move |(quantity, names)| ProductSpec {
            code: code.clone(),
            quantity,
            names,
        })
}

/// Strategy for products with pairwise distinct codes.
pub fn unique_products_strategy(max: usize) -> impl Strategy<Value = Vec<ProductSpec>> {
    prop::collection::btree_set("[A-Z]{2}-[0-9]{1,4}", 1..=max.max(1)).prop_flat_map(|codes| {
        codes
            .into_iter()
            .map(product_strategy)
            .collect::<Vec<_>>()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{define_live_shop, TestEngine};
    use catalogdb_core::{validate_catalog_name, AttributeKey, OrderDirection};

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn generated_catalog_names_are_valid(name in catalog_name_strategy()) {
            prop_assert!(validate_catalog_name(&name).is_ok());
        }

        #[test]
        fn unique_codes_resolve_to_their_product(products in unique_products_strategy(20)) {
            let engine = TestEngine::memory();
            define_live_shop(&engine, "shop").unwrap();
            let created = engine
                .update_catalog("shop", |txn| {
                    products
                        .iter()
                        .map(|p| txn.upsert_entity(p.to_upsert()).map(|e| e.primary_key))
                        .collect::<Result<Vec<_>, _>>()
                })
                .unwrap();

            let snapshot = engine.catalog("shop").unwrap().snapshot();
            prop_assert_eq!(snapshot.entity_count(PRODUCT).unwrap(), products.len());
            for (product, pk) in products.iter().zip(&created) {
                let found = snapshot
                    .query_by_attribute_equals(PRODUCT, &AttributeKey::new("code"), &product.code.as_str().into())
                    .unwrap();
                prop_assert_eq!(found.into_iter().collect::<Vec<_>>(), vec![*pk]);
                let entity = snapshot.get_entity(PRODUCT, *pk).unwrap().unwrap();
                for (locale, name) in &product.names {
                    prop_assert_eq!(
                        entity.localized_attribute("name", locale),
                        Some(&AttributeValue::String(name.clone()))
                    );
                }
            }
        }

        #[test]
        fn quantity_ordering_puts_missing_values_last(products in unique_products_strategy(20)) {
            let engine = TestEngine::memory();
            define_live_shop(&engine, "shop").unwrap();
            engine
                .update_catalog("shop", |txn| {
                    for product in &products {
                        txn.upsert_entity(product.to_upsert())?;
                    }
                    Ok(())
                })
                .unwrap();

            let snapshot = engine.catalog("shop").unwrap().snapshot();
            let sorted = snapshot
                .sorted_by(PRODUCT, &AttributeKey::new("quantity"), OrderDirection::Asc)
                .unwrap();
            prop_assert_eq!(sorted.len(), products.len());

            let quantities: Vec<Option<i64>> = sorted
                .iter()
                .map(|pk| {
                    snapshot
                        .get_entity(PRODUCT, *pk)
                        .unwrap()
                        .unwrap()
                        .attribute("quantity")
                        .and_then(AttributeValue::as_int)
                })
                .collect();
            let present = quantities.iter().take_while(|q| q.is_some()).count();
            prop_assert!(quantities[present..].iter().all(Option::is_none));
            prop_assert!(quantities[..present].windows(2).all(|w| w[0] <= w[1]));
        }
    }
}
