//! # CatalogDB Testkit
//!
//! Test utilities for CatalogDB.
//!
//! This crate provides:
//! - Temporary engines and the shop schemas used throughout the test-suite
//! - Property-based generators using proptest
//! - Concurrency stress scenarios
//! - Cross-crate integration helpers for on-disk scenarios
//!
//! ## Usage
//!
//! ```rust
//! use catalogdb_testkit::prelude::*;
//!
//! let engine = TestEngine::memory();
//! define_shop(&engine, "shop").unwrap();
//! assert_eq!(engine.catalog_names(), vec!["shop"]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod integration;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;
pub use stress::*;
