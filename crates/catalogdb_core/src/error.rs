//! Error types for CatalogDB core.

use crate::schema::Cardinality;
use crate::types::{Locale, PrimaryKey};
use std::io;
use thiserror::Error;
use uuid::Uuid;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Mandatory values missing on one entity, or on one of its references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingMandatory {
    /// Entity type the values belong to.
    pub entity_type: String,
    /// Reference name when the values are reference attributes.
    pub reference: Option<String>,
    /// Non-localized names with no value.
    pub missing: Vec<String>,
    /// Localized names paired with the entity locales they lack.
    pub missing_in_locales: Vec<(String, Vec<Locale>)>,
}

impl MissingMandatory {
    /// Returns `true` when nothing is missing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.missing_in_locales.is_empty()
    }
}

/// One reference whose final count falls outside its declared cardinality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardinalityViolation {
    /// Reference name.
    pub reference: String,
    /// Declared cardinality.
    pub expected: Cardinality,
    /// Number of references the entity would end up with.
    pub actual: usize,
}

fn backticked<'a>(names: impl IntoIterator<Item = &'a str>) -> String {
    names
        .into_iter()
        .map(|n| format!("`{n}`"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_missing(kind: &str, groups: &[MissingMandatory]) -> String {
    let mut lines = Vec::new();
    for group in groups {
        let prefix = match &group.reference {
            Some(reference) => format!("Entity `{}` reference `{}`", group.entity_type, reference),
            None => format!("Entity `{}`", group.entity_type),
        };
        if !group.missing.is_empty() {
            lines.push(format!(
                "{prefix} requires these {kind} to be non-null, but they are missing: {}.",
                backticked(group.missing.iter().map(String::as_str))
            ));
        }
        if !group.missing_in_locales.is_empty() {
            let gaps = group
                .missing_in_locales
                .iter()
                .map(|(name, locales)| {
                    format!(
                        "`{name}` in locales: {}",
                        backticked(locales.iter().map(Locale::as_str))
                    )
                })
                .collect::<Vec<_>>()
                .join("; ");
            lines.push(format!(
                "{prefix} requires these localized {kind} to be specified for all localized versions of the entity, but values for some locales are missing: {gaps}."
            ));
        }
    }
    lines.join("\n")
}

fn render_cardinality(violations: &[CardinalityViolation]) -> String {
    violations
        .iter()
        .map(|v| {
            format!(
                "reference `{}` is expected to be `{}` - but entity contains {} references",
                v.reference, v.expected, v.actual
            )
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn locale_suffix(locale: &Option<Locale>) -> String {
    locale
        .as_ref()
        .map(|l| format!(" in locale `{l}`"))
        .unwrap_or_default()
}

/// Errors that can occur in CatalogDB core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] catalogdb_storage::StorageError),

    /// CBOR codec error.
    #[error("codec error: {0}")]
    Codec(#[from] catalogdb_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A write-ahead log could not be read back.
    #[error("WAL corruption: {message}")]
    WalCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// A WAL record failed its CRC check.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Stored checksum.
        expected: u32,
        /// Computed checksum.
        actual: u32,
    },

    /// A collection file does not match the digest recorded in its catalog header.
    #[error("digest mismatch for `{file}`: expected {expected}, got {actual}")]
    DigestMismatch {
        /// File name.
        file: String,
        /// Digest stored in the header.
        expected: String,
        /// Digest of the bytes on disk.
        actual: String,
    },

    /// A persisted structure has an unexpected layout or version.
    #[error("invalid format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// A mutation or schema change contradicts the declared schema.
    #[error("schema violation: {message}")]
    SchemaViolation {
        /// Description of the violation.
        message: String,
    },

    /// Non-nullable attributes were left without a value.
    #[error("{}", render_missing("attributes", .missing))]
    MandatoryAttributesNotProvided {
        /// Every missing attribute, grouped by entity and reference.
        missing: Vec<MissingMandatory>,
    },

    /// Non-nullable associated data were left without a value.
    #[error("{}", render_missing("associated data", .missing))]
    MandatoryAssociatedDataNotProvided {
        /// Every missing associated data entry.
        missing: Vec<MissingMandatory>,
    },

    /// Reference counts fall outside their declared cardinality.
    #[error(
        "Expected reference cardinalities are violated in entity `{entity_type}`: {}.",
        render_cardinality(.violations)
    )]
    ReferenceCardinalityViolated {
        /// Entity type.
        entity_type: String,
        /// Every violated reference.
        violations: Vec<CardinalityViolation>,
    },

    /// A unique attribute value is already bound to another entity.
    #[error(
        "Unique constraint violation: attribute `{attribute}` value `{value}`{} is already present for entity `{entity_type}` (existing entity PK: {existing}, newly inserted entity PK: {inserted})!",
        locale_suffix(.locale)
    )]
    UniqueValueViolation {
        /// Attribute name.
        attribute: String,
        /// Locale of a localized attribute.
        locale: Option<Locale>,
        /// Rendered value.
        value: String,
        /// Entity type.
        entity_type: String,
        /// Entity currently owning the value.
        existing: PrimaryKey,
        /// Entity that tried to claim it.
        inserted: PrimaryKey,
    },

    /// A structural change hit a catalog that is still being populated.
    #[error("catalog `{catalog}` is being initialized by another session and cannot be changed structurally until it goes live")]
    CatalogWarmingUp {
        /// Catalog name.
        catalog: String,
    },

    /// The entity schema was changed by a transaction committed in the meantime.
    #[error("schema of `{entity_type}` in catalog `{catalog}` was changed concurrently")]
    ConcurrentSchemaUpdate {
        /// Catalog name.
        catalog: String,
        /// Entity type whose schema changed.
        entity_type: String,
    },

    /// The catalog could not be loaded from disk.
    #[error("catalog `{catalog}` is corrupted: {cause}")]
    CatalogCorrupted {
        /// Catalog name.
        catalog: String,
        /// Why loading failed.
        cause: String,
    },

    /// A mutating call hit a read-only engine, catalog or session.
    #[error("{target} is read-only")]
    ReadOnly {
        /// What was read-only.
        target: String,
    },

    /// Catalog not found.
    #[error("catalog not found: {name}")]
    CatalogNotFound {
        /// Catalog name.
        name: String,
    },

    /// A catalog with this name already exists.
    #[error("catalog already exists: {name}")]
    CatalogAlreadyExists {
        /// Catalog name.
        name: String,
    },

    /// The catalog is registered but not loaded.
    #[error("catalog `{name}` is inactive")]
    CatalogInactive {
        /// Catalog name.
        name: String,
    },

    /// Collection not found.
    #[error("collection not found: {name}")]
    CollectionNotFound {
        /// Entity type of the collection.
        name: String,
    },

    /// Entity not found.
    #[error("entity `{entity_type}` with primary key {primary_key} not found")]
    EntityNotFound {
        /// Entity type.
        entity_type: String,
        /// Primary key that was looked up.
        primary_key: PrimaryKey,
    },

    /// The session was closed explicitly or expired.
    #[error("session {id} is closed")]
    SessionClosed {
        /// Session identifier.
        id: Uuid,
    },

    /// The storage directory is locked by another engine.
    #[error("storage directory locked: another process has exclusive access")]
    DatabaseLocked,

    /// The engine was closed.
    #[error("engine is closed")]
    EngineClosed,
}

impl CoreError {
    /// Creates a WAL corruption error.
    pub fn wal_corruption(message: impl Into<String>) -> Self {
        Self::WalCorruption {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a schema violation error.
    pub fn schema_violation(message: impl Into<String>) -> Self {
        Self::SchemaViolation {
            message: message.into(),
        }
    }

    /// Creates a read-only error.
    pub fn read_only(target: impl Into<String>) -> Self {
        Self::ReadOnly {
            target: target.into(),
        }
    }

    /// Creates a catalog corrupted error.
    pub fn catalog_corrupted(catalog: impl Into<String>, cause: impl Into<String>) -> Self {
        Self::CatalogCorrupted {
            catalog: catalog.into(),
            cause: cause.into(),
        }
    }

    /// Returns `true` for errors caused by unreadable persisted data.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::WalCorruption { .. }
                | Self::ChecksumMismatch { .. }
                | Self::DigestMismatch { .. }
                | Self::InvalidFormat { .. }
                | Self::Codec(_)
                | Self::CatalogCorrupted { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_attributes_are_listed_in_one_message() {
        let err = CoreError::MandatoryAttributesNotProvided {
            missing: vec![
                MissingMandatory {
                    entity_type: "PRODUCT".into(),
                    reference: None,
                    missing: vec!["ean".into()],
                    missing_in_locales: vec![("name".into(), vec![Locale::new("de"), Locale::new("fr")])],
                },
                MissingMandatory {
                    entity_type: "PRODUCT".into(),
                    reference: Some("BRAND".into()),
                    missing: vec!["brandEan".into()],
                    missing_in_locales: vec![(
                        "brandName".into(),
                        vec![Locale::new("de"), Locale::new("fr")],
                    )],
                },
            ],
        };
        assert_eq!(
            err.to_string(),
            "Entity `PRODUCT` requires these attributes to be non-null, but they are missing: `ean`.\n\
             Entity `PRODUCT` requires these localized attributes to be specified for all localized versions of the entity, but values for some locales are missing: `name` in locales: `de`, `fr`.\n\
             Entity `PRODUCT` reference `BRAND` requires these attributes to be non-null, but they are missing: `brandEan`.\n\
             Entity `PRODUCT` reference `BRAND` requires these localized attributes to be specified for all localized versions of the entity, but values for some locales are missing: `brandName` in locales: `de`, `fr`."
        );
    }

    #[test]
    fn associated_data_message_uses_its_own_wording() {
        let err = CoreError::MandatoryAssociatedDataNotProvided {
            missing: vec![MissingMandatory {
                entity_type: "PRODUCT".into(),
                reference: None,
                missing: vec!["ean".into()],
                missing_in_locales: vec![],
            }],
        };
        assert_eq!(
            err.to_string(),
            "Entity `PRODUCT` requires these associated data to be non-null, but they are missing: `ean`."
        );
    }

    #[test]
    fn cardinality_message_names_expectation_and_count() {
        let err = CoreError::ReferenceCardinalityViolated {
            entity_type: "PRODUCT".into(),
            violations: vec![CardinalityViolation {
                reference: "BRAND".into(),
                expected: Cardinality::ZeroOrOne,
                actual: 2,
            }],
        };
        assert_eq!(
            err.to_string(),
            "Expected reference cardinalities are violated in entity `PRODUCT`: reference `BRAND` is expected to be `ZERO_OR_ONE` - but entity contains 2 references."
        );
    }

    #[test]
    fn unique_violation_mentions_locale_when_localized() {
        let err = CoreError::UniqueValueViolation {
            attribute: "name".into(),
            locale: Some(Locale::new("en")),
            value: "A".into(),
            entity_type: "PRODUCT".into(),
            existing: 1,
            inserted: 2,
        };
        assert_eq!(
            err.to_string(),
            "Unique constraint violation: attribute `name` value `A` in locale `en` is already present for entity `PRODUCT` (existing entity PK: 1, newly inserted entity PK: 2)!"
        );
    }

    #[test]
    fn corruption_classification() {
        assert!(CoreError::wal_corruption("bad magic").is_corruption());
        assert!(CoreError::catalog_corrupted("shop", "digest").is_corruption());
        assert!(!CoreError::read_only("engine").is_corruption());
    }
}
