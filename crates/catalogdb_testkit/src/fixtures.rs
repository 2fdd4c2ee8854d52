//! Test fixtures and engine helpers.
//!
//! The shop schemas model a small catalog: brands, a category tree and
//! products referencing both.

use catalogdb_core::{
    AttributeElement, AttributeSchema, AttributeType, Cardinality, Catalog, CoreResult, Engine, EngineConfig,
    EntitySchema, OrderBehaviour, OrderDirection, ReferenceSchema, SortableAttributeCompoundSchema,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

/// Entity type of brands.
pub const BRAND: &str = "BRAND";
/// Entity type of categories.
pub const CATEGORY: &str = "CATEGORY";
/// Entity type of products.
pub const PRODUCT: &str = "PRODUCT";

/// Installs a test-friendly `tracing` subscriber once; `RUST_LOG` picks the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// An engine with automatic cleanup.
pub struct TestEngine {
    /// The engine instance.
    pub engine: Engine,
    /// The temporary directory (kept alive to prevent cleanup).
    temp_dir: Option<TempDir>,
}

impl TestEngine {
    /// Creates a new in-memory engine.
    pub fn memory() -> Self {
        Self {
            engine: Engine::open_in_memory().expect("Failed to open in-memory engine"),
            temp_dir: None,
        }
    }

    /// Creates a new file-based engine in a temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = EngineConfig::new(temp_dir.path().join("store")).sync_on_commit(false);
        Self {
            engine: Engine::open(config).expect("Failed to open file engine"),
            temp_dir: Some(temp_dir),
        }
    }

    /// Storage directory if file-based, `None` if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        self.engine.path().map(Path::to_path_buf)
    }

    /// Closes the engine and opens it again on the same directory.
    ///
    /// # Panics
    ///
    /// For in-memory engines, which have nothing to reopen.
    pub fn reopen(self) -> Self {
        self.reopen_after(|_| {})
    }

    /// Like [`reopen`](Self::reopen), running `offline` on the storage
    /// directory while the engine is closed.
    pub fn reopen_after(self, offline: impl FnOnce(&Path)) -> Self {
        self.reopen_with(|config| {
            offline(&config.storage_directory);
            config
        })
    }

    /// Like [`reopen`](Self::reopen), with a changed configuration.
    /// `configure` runs after the engine is closed.
    pub fn reopen_with(self, configure: impl FnOnce(EngineConfig) -> EngineConfig) -> Self {
        let Self { engine, temp_dir } = self;
        assert!(temp_dir.is_some(), "in-memory engines cannot be reopened");
        let config = engine.config().clone();
        drop(engine);
        let config = configure(config);
        Self {
            engine: Engine::open(config).expect("Failed to reopen engine"),
            temp_dir,
        }
    }
}

impl std::ops::Deref for TestEngine {
    type Target = Engine;

    fn deref(&self) -> &Self::Target {
        &self.engine
    }
}

/// Brands: a filterable, unique `code` and a localized `name`.
pub fn brand_schema() -> EntitySchema {
    EntitySchema::new(BRAND)
        .with_attribute(AttributeSchema::new("code", AttributeType::String).unique().filterable())
        .with_attribute(AttributeSchema::new("name", AttributeType::String).localized().nullable())
}

/// Categories: a hierarchy with a localized `name`.
pub fn category_schema() -> EntitySchema {
    EntitySchema::new(CATEGORY)
        .with_hierarchy()
        .with_attribute(AttributeSchema::new("name", AttributeType::String).localized().nullable())
}

/// Products: a unique `code`, optional `ean`, localized `name`, sortable
/// `quantity`, a faceted brand, indexed categories and a `codeEan` compound.
pub fn product_schema() -> EntitySchema {
    EntitySchema::new(PRODUCT)
        .with_attribute(AttributeSchema::new("code", AttributeType::String).unique().sortable())
        .with_attribute(AttributeSchema::new("ean", AttributeType::String).sortable().nullable())
        .with_attribute(AttributeSchema::new("name", AttributeType::String).localized().nullable())
        .with_attribute(
            AttributeSchema::new("quantity", AttributeType::Int)
                .filterable()
                .sortable()
                .nullable(),
        )
        .with_reference(
            ReferenceSchema::new("brand", BRAND, Cardinality::ZeroOrOne)
                .indexed()
                .faceted(),
        )
        .with_reference(ReferenceSchema::new("categories", CATEGORY, Cardinality::ZeroOrMore).indexed())
        .with_sortable_attribute_compound(SortableAttributeCompoundSchema::new(
            "codeEan",
            vec![
                AttributeElement::new("code", OrderDirection::Desc, OrderBehaviour::NullsFirst),
                AttributeElement::new("ean", OrderDirection::Asc, OrderBehaviour::NullsLast),
            ],
        ))
}

/// Defines catalog `name` with the brand, category and product schemas.
/// The catalog stays in warm-up.
pub fn define_shop(engine: &Engine, name: &str) -> CoreResult<Arc<Catalog>> {
    let catalog = engine.define_catalog(name)?;
    engine.update_catalog(name, |txn| {
        txn.update_entity_schema(brand_schema())?;
        txn.update_entity_schema(category_schema())?;
        txn.update_entity_schema(product_schema())?;
        Ok(())
    })?;
    Ok(catalog)
}

/// Defines a shop catalog and takes it live.
pub fn define_live_shop(engine: &Engine, name: &str) -> CoreResult<Arc<Catalog>> {
    define_shop(engine, name)?;
    engine.go_live(name)?;
    engine.catalog(name)
}
