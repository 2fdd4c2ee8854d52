//! Integration helpers for on-disk scenarios.
//!
//! [`ShopData`] populates a shop catalog with a small but fully connected
//! data set and checks every index kind against it, so a scenario can
//! verify that a catalog came back intact after reopen, rename or replace.

use crate::fixtures::{BRAND, CATEGORY, PRODUCT};
use catalogdb_core::{
    AttributeKey, CatalogState, CoreResult, Engine, OrderDirection, PrimaryKey, UpsertEntity,
};
use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// Flips every bit of the last byte of `path`.
pub fn corrupt_last_byte(path: &Path) -> io::Result<()> {
    let mut data = fs::read(path)?;
    let Some(last) = data.last_mut() else {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "file is empty"));
    };
    *last = !*last;
    fs::write(path, data)
}

/// Appends `bytes` to `path`, as a crash in the middle of a write would.
pub fn append_garbage(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new().append(true).open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// Sorted names of the files in `dir`.
pub fn file_names(dir: &Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// Primary keys of a populated shop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShopData {
    /// Brand `ACME`.
    pub acme: PrimaryKey,
    /// Brand `GLOBEX`.
    pub globex: PrimaryKey,
    /// Root category.
    pub root: PrimaryKey,
    /// Child of `root`.
    pub phones: PrimaryKey,
    /// Child of `root`.
    pub laptops: PrimaryKey,
    /// Products in insertion order: two phones of ACME, one laptop of GLOBEX.
    pub products: Vec<PrimaryKey>,
}

impl ShopData {
    /// Fills catalog `name`, which must carry the shop schemas and be empty,
    /// in one transaction.
    pub fn populate(engine: &Engine, name: &str) -> CoreResult<Self> {
        engine.update_catalog(name, |txn| {
            let acme = txn
                .upsert_entity(UpsertEntity::new(BRAND).attribute("code", "ACME"))?
                .primary_key;
            let globex = txn
                .upsert_entity(UpsertEntity::new(BRAND).attribute("code", "GLOBEX"))?
                .primary_key;
            let root = txn
                .upsert_entity(UpsertEntity::new(CATEGORY).localized_attribute("name", "en", "All"))?
                .primary_key;
            let phones = txn
                .upsert_entity(
                    UpsertEntity::new(CATEGORY)
                        .parent(root)
                        .localized_attribute("name", "en", "Phones"),
                )?
                .primary_key;
            let laptops = txn
                .upsert_entity(
                    UpsertEntity::new(CATEGORY)
                        .parent(root)
                        .localized_attribute("name", "en", "Laptops"),
                )?
                .primary_key;

            let rows = [
                ("P-1", 7, acme, phones),
                ("P-2", 3, acme, phones),
                ("L-1", 5, globex, laptops),
            ];
            let mut products = Vec::with_capacity(rows.len());
            for (code, quantity, brand, category) in rows {
                let product = txn.upsert_entity(
                    UpsertEntity::new(PRODUCT)
                        .attribute("code", code)
                        .attribute("quantity", quantity as i64)
                        .localized_attribute("name", "en", format!("Product {code}"))
                        .reference("brand", brand)
                        .reference("categories", category),
                )?;
                products.push(product.primary_key);
            }

            Ok(Self {
                acme,
                globex,
                root,
                phones,
                laptops,
                products,
            })
        })
    }

    /// Asserts that `state` holds exactly this data and that the unique,
    /// filter, sort, facet and hierarchy indices agree with it.
    ///
    /// # Panics
    ///
    /// On the first mismatch.
    pub fn verify(&self, state: &CatalogState) {
        let [p1, p2, l1] = self.products[..] else {
            panic!("expected three products, got {:?}", self.products);
        };
        assert_eq!(state.entity_count(BRAND).expect("brands"), 2);
        assert_eq!(state.entity_count(CATEGORY).expect("categories"), 3);
        assert_eq!(state.entity_count(PRODUCT).expect("products"), 3);

        let code = AttributeKey::new("code");
        assert_eq!(
            state
                .query_by_attribute_equals(PRODUCT, &code, &"P-2".into())
                .expect("unique lookup"),
            BTreeSet::from([p2])
        );
        assert_eq!(
            state
                .query_by_attribute_equals(BRAND, &code, &"GLOBEX".into())
                .expect("filter lookup"),
            BTreeSet::from([self.globex])
        );
        assert_eq!(
            state
                .query_by_attribute_range(PRODUCT, &AttributeKey::new("quantity"), 4, 10)
                .expect("range lookup"),
            BTreeSet::from([p1, l1])
        );
        assert_eq!(
            state
                .sorted_by(PRODUCT, &AttributeKey::new("quantity"), OrderDirection::Desc)
                .expect("sort"),
            vec![p1, l1, p2]
        );
        assert_eq!(
            state.facet_entities(PRODUCT, "brand", self.acme).expect("facet"),
            BTreeSet::from([p1, p2])
        );
        assert_eq!(
            state
                .within_hierarchy(PRODUCT, CATEGORY, self.root, &[self.laptops])
                .expect("hierarchy"),
            BTreeSet::from([p1, p2])
        );
        assert_eq!(
            state
                .within_hierarchy(CATEGORY, CATEGORY, self.root, &[])
                .expect("tree"),
            BTreeSet::from([self.root, self.phones, self.laptops])
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{define_live_shop, define_shop, init_tracing, TestEngine};
    use catalogdb_core::{CatalogContract, CoreError};

    #[test]
    fn populated_shop_survives_reopen() {
        init_tracing();
        let engine = TestEngine::file();
        define_live_shop(&engine, "shop").unwrap();
        let data = ShopData::populate(&engine, "shop").unwrap();
        data.verify(&engine.catalog("shop").unwrap().snapshot());
        let version = engine.catalog("shop").unwrap().version();

        let engine = engine.reopen();
        let catalog = engine.catalog("shop").unwrap();
        assert_eq!(catalog.version(), version);
        data.verify(&catalog.snapshot());
    }

    #[test]
    fn warm_up_data_is_kept_by_going_live() {
        let engine = TestEngine::file();
        define_shop(&engine, "shop").unwrap();
        let data = ShopData::populate(&engine, "shop").unwrap();
        engine.go_live("shop").unwrap();

        let engine = engine.reopen();
        let catalog = engine.catalog("shop").unwrap();
        assert!(!catalog.is_warming_up());
        data.verify(&catalog.snapshot());
    }

    #[test]
    fn corrupted_collection_only_takes_down_its_catalog() {
        let engine = TestEngine::file();
        let mut data = Vec::new();
        for name in ["a", "b", "c"] {
            define_live_shop(&engine, name).unwrap();
            data.push(ShopData::populate(&engine, name).unwrap());
        }
        let root = engine.path().unwrap();

        // closing checkpoints every catalog, so the products sit in the collection file
        let engine = engine.reopen_after(|root| {
            corrupt_last_byte(&root.join("b").join(format!("{PRODUCT}.collection"))).unwrap();
        });

        assert_eq!(engine.catalog_names(), vec!["a", "b", "c"]);
        data[0].verify(&engine.catalog("a").unwrap().snapshot());
        data[2].verify(&engine.catalog("c").unwrap().snapshot());
        assert!(matches!(engine.catalog("b"), Err(CoreError::CatalogCorrupted { .. })));
        assert!(matches!(
            engine.engine_state().get_catalog("b"),
            Some(CatalogContract::Corrupted { .. })
        ));

        engine.delete_catalog("b").unwrap();
        assert!(!root.join("b").exists());
        define_live_shop(&engine, "b").unwrap();
        assert_eq!(engine.catalog_names(), vec!["a", "b", "c"]);
    }

    #[test]
    fn torn_catalog_wal_tail_is_cut_on_reopen() {
        let engine = TestEngine::file();
        define_live_shop(&engine, "shop").unwrap();
        let data = ShopData::populate(&engine, "shop").unwrap();
        let dir = engine.path().unwrap().join("shop");

        let mut wal = None;
        let engine = engine.reopen_after(|_| {
            let wals: Vec<_> = file_names(&dir)
                .unwrap()
                .into_iter()
                .filter(|f| f.ends_with(".wal"))
                .collect();
            assert_eq!(wals.len(), 1, "checkpoints remove the previous WAL file");
            let path = dir.join(&wals[0]);
            let size = fs::metadata(&path).unwrap().len();
            append_garbage(&path, &[0xC4, 0x7A, 0x00]).unwrap();
            wal = Some((path, size));
        });

        let (path, size) = wal.unwrap();
        data.verify(&engine.catalog("shop").unwrap().snapshot());
        assert_eq!(fs::metadata(&path).unwrap().len(), size);
    }

    #[test]
    fn renamed_catalog_moves_its_files() {
        let engine = TestEngine::file();
        define_live_shop(&engine, "shop").unwrap();
        let data = ShopData::populate(&engine, "shop").unwrap();
        let root = engine.path().unwrap();

        engine.rename_catalog("shop", "store").unwrap();
        assert!(!root.join("shop").exists());
        assert!(file_names(&root.join("store")).unwrap().iter().any(|f| f.ends_with(".collection")));
        data.verify(&engine.catalog("store").unwrap().snapshot());

        let engine = engine.reopen();
        assert_eq!(engine.catalog_names(), vec!["store"]);
        assert!(matches!(engine.catalog("shop"), Err(CoreError::CatalogNotFound { .. })));
        data.verify(&engine.catalog("store").unwrap().snapshot());
    }

    #[test]
    fn replaced_catalog_takes_the_replacement_contents() {
        let engine = TestEngine::file();
        define_live_shop(&engine, "shop").unwrap();
        define_live_shop(&engine, "staging").unwrap();
        ShopData::populate(&engine, "shop").unwrap();
        let data = ShopData::populate(&engine, "staging").unwrap();
        engine
            .update_catalog("staging", |txn| {
                txn.upsert_entity(UpsertEntity::new(BRAND).attribute("code", "INITECH"))
            })
            .unwrap();
        let root = engine.path().unwrap();

        engine.replace_catalog("staging", "shop").unwrap();
        assert!(!root.join("staging").exists());
        assert!(!root.join("shop.replacement").exists());
        let brands = |engine: &Engine| {
            engine
                .query_catalog("shop", |s| s.entity_count(BRAND))
                .unwrap()
                .unwrap()
        };
        assert_eq!(brands(&engine), 3);

        let engine = engine.reopen();
        assert_eq!(engine.catalog_names(), vec!["shop"]);
        assert_eq!(brands(&engine), 3);
        assert_eq!(
            engine
                .query_catalog("shop", |s| s.query_by_attribute_equals(
                    PRODUCT,
                    &AttributeKey::new("code"),
                    &"L-1".into()
                ))
                .unwrap()
                .unwrap(),
            BTreeSet::from([data.products[2]])
        );
    }
}
