//! Schema checks run before an entity change reaches any index.

use crate::data::{Entity, LocalMutation};
use crate::error::{CardinalityViolation, CoreError, CoreResult, MissingMandatory};
use crate::index::AttributeKey;
use crate::schema::{AttributeSchema, EntitySchema};
use crate::types::Locale;
use std::collections::{BTreeMap, BTreeSet};

/// Rejects local mutations that do not fit the entity schema.
pub(crate) fn check_mutation(schema: &EntitySchema, mutation: &LocalMutation) -> CoreResult<()> {
    let owner = format!("entity `{}`", schema.name);
    match mutation {
        LocalMutation::UpsertAttribute { key, value } => {
            let attribute = attribute_schema(schema.attribute(&key.name), &owner, key)?;
            attribute.check_value(&owner, value)
        }
        LocalMutation::UpsertAssociatedData { key, .. } => {
            let data = schema.associated_data.get(&key.name).ok_or_else(|| {
                CoreError::schema_violation(format!(
                    "Associated data `{}` is not defined in {owner}.",
                    key.name
                ))
            })?;
            check_localization(data.localized, &owner, key)
        }
        LocalMutation::SetParent { .. } if !schema.with_hierarchy => Err(CoreError::schema_violation(
            format!("{owner} is not hierarchical and cannot have a parent."),
        )),
        LocalMutation::InsertReference { reference } => schema
            .reference(&reference.name)
            .map(|_| ())
            .ok_or_else(|| unknown_reference(&owner, &reference.name)),
        LocalMutation::UpsertReferenceAttribute { reference, key, value } => {
            let reference_schema = schema
                .reference(&reference.name)
                .ok_or_else(|| unknown_reference(&owner, &reference.name))?;
            let owner = format!("{owner} reference `{}`", reference.name);
            let attribute = attribute_schema(reference_schema.attribute(&key.name), &owner, key)?;
            attribute.check_value(&owner, value)
        }
        _ => Ok(()),
    }
}

fn attribute_schema<'a>(
    attribute: Option<&'a AttributeSchema>,
    owner: &str,
    key: &AttributeKey,
) -> CoreResult<&'a AttributeSchema> {
    let attribute = attribute.ok_or_else(|| {
        CoreError::schema_violation(format!("Attribute `{}` is not defined in {owner}.", key.name))
    })?;
    check_localization(attribute.localized, owner, key)?;
    Ok(attribute)
}

fn check_localization(localized: bool, owner: &str, key: &AttributeKey) -> CoreResult<()> {
    match (localized, key.is_localized()) {
        (true, false) => Err(CoreError::schema_violation(format!(
            "`{}` of {owner} is localized and requires a locale.",
            key.name
        ))),
        (false, true) => Err(CoreError::schema_violation(format!(
            "`{}` of {owner} is not localized and cannot be set for locale `{}`.",
            key.name,
            key.locale.as_ref().map(Locale::as_str).unwrap_or_default()
        ))),
        _ => Ok(()),
    }
}

fn unknown_reference(owner: &str, name: &str) -> CoreError {
    CoreError::schema_violation(format!("Reference `{name}` is not defined in {owner}."))
}

/// Fills default values of a newly created entity, localized ones for every entity locale.
pub(crate) fn fill_defaults(schema: &EntitySchema, entity: &mut Entity) {
    for attribute in schema.attributes.values() {
        let Some(default) = &attribute.default_value else {
            continue;
        };
        if attribute.localized {
            for locale in entity.locales().clone() {
                entity
                    .attributes
                    .entry(AttributeKey::localized(attribute.name.as_str(), locale))
                    .or_insert_with(|| default.clone());
            }
        } else {
            entity
                .attributes
                .entry(AttributeKey::new(attribute.name.as_str()))
                .or_insert_with(|| default.clone());
        }
    }
}

/// Reports every mandatory attribute and associated data value the entity lacks.
///
/// Localized values are required in every locale of the entity.
pub(crate) fn check_mandatory(schema: &EntitySchema, entity: &Entity) -> CoreResult<()> {
    let locales = entity.locales();
    let mut attributes = Vec::new();

    let group = missing_values(
        &schema.name,
        None,
        schema
            .attributes
            .values()
            .map(|a| (a.name.as_str(), a.localized, a.nullable)),
        &entity.attributes,
        locales,
    );
    if !group.is_empty() {
        attributes.push(group);
    }

    let mut by_reference: BTreeMap<&str, MissingMandatory> = BTreeMap::new();
    for (key, reference) in &entity.references {
        let Some(reference_schema) = schema.reference(&key.name) else {
            continue;
        };
        let group = missing_values(
            &schema.name,
            Some(&key.name),
            reference_schema
                .attributes
                .values()
                .map(|a| (a.name.as_str(), a.localized, a.nullable)),
            &reference.attributes,
            locales,
        );
        if group.is_empty() {
            continue;
        }
        match by_reference.get_mut(key.name.as_str()) {
            Some(existing) => merge(existing, group),
            None => {
                by_reference.insert(key.name.as_str(), group);
            }
        }
    }
    attributes.extend(by_reference.into_values());
    if !attributes.is_empty() {
        return Err(CoreError::MandatoryAttributesNotProvided {
            missing: attributes,
        });
    }

    let data = missing_values(
        &schema.name,
        None,
        schema
            .associated_data
            .values()
            .map(|d| (d.name.as_str(), d.localized, d.nullable)),
        &entity.associated_data,
        locales,
    );
    if !data.is_empty() {
        return Err(CoreError::MandatoryAssociatedDataNotProvided { missing: vec![data] });
    }
    Ok(())
}

fn missing_values<'a, V>(
    entity_type: &str,
    reference: Option<&str>,
    declared: impl Iterator<Item = (&'a str, bool, bool)>,
    values: &BTreeMap<AttributeKey, V>,
    locales: &BTreeSet<Locale>,
) -> MissingMandatory {
    let mut group = MissingMandatory {
        entity_type: entity_type.to_string(),
        reference: reference.map(str::to_string),
        missing: Vec::new(),
        missing_in_locales: Vec::new(),
    };
    for (name, localized, nullable) in declared {
        if nullable {
            continue;
        }
        if localized {
            let gaps: Vec<Locale> = locales
                .iter()
                .filter(|l| !values.contains_key(&AttributeKey::localized(name, (*l).clone())))
                .cloned()
                .collect();
            if !gaps.is_empty() {
                group.missing_in_locales.push((name.to_string(), gaps));
            }
        } else if !values.contains_key(&AttributeKey::new(name)) {
            group.missing.push(name.to_string());
        }
    }
    group
}

fn merge(into: &mut MissingMandatory, other: MissingMandatory) {
    for name in other.missing {
        if !into.missing.contains(&name) {
            into.missing.push(name);
        }
    }
    for (name, locales) in other.missing_in_locales {
        match into.missing_in_locales.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => {
                for locale in locales {
                    if !existing.contains(&locale) {
                        existing.push(locale);
                    }
                }
                existing.sort();
            }
            None => into.missing_in_locales.push((name, locales)),
        }
    }
}

/// Reports every reference whose count falls outside its cardinality.
pub(crate) fn check_cardinality(schema: &EntitySchema, entity: &Entity) -> CoreResult<()> {
    let violations: Vec<CardinalityViolation> = schema
        .references
        .values()
        .filter_map(|r| {
            let actual = entity.reference_count(&r.name);
            (!r.cardinality.allows(actual)).then(|| CardinalityViolation {
                reference: r.name.clone(),
                expected: r.cardinality,
                actual,
            })
        })
        .collect();
    if violations.is_empty() {
        Ok(())
    } else {
        Err(CoreError::ReferenceCardinalityViolated {
            entity_type: schema.name.clone(),
            violations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::UpsertEntity;
    use crate::schema::{AttributeType, Cardinality, ReferenceSchema};

    fn product() -> EntitySchema {
        EntitySchema::new("PRODUCT")
            .with_attribute(AttributeSchema::new("ean", AttributeType::String))
            .with_attribute(AttributeSchema::new("name", AttributeType::String).localized())
            .with_attribute(
                AttributeSchema::new("description", AttributeType::String)
                    .localized()
                    .nullable(),
            )
            .with_reference(
                ReferenceSchema::new("BRAND", "BRAND", Cardinality::ExactlyOne)
                    .with_attribute(AttributeSchema::new("brandEan", AttributeType::String))
                    .with_attribute(AttributeSchema::new("brandName", AttributeType::String).localized())
                    .with_attribute(
                        AttributeSchema::new("brandDescription", AttributeType::String)
                            .localized()
                            .nullable(),
                    ),
            )
    }

    fn build(upsert: UpsertEntity) -> Entity {
        let mut entity = Entity::new("PRODUCT", 1);
        for mutation in &upsert.mutations {
            check_mutation(&product(), mutation).unwrap();
            entity.apply(mutation).unwrap();
        }
        entity.recompute_locales();
        entity
    }

    #[test]
    fn every_missing_value_is_reported_at_once() {
        let mut upsert = UpsertEntity::new("PRODUCT");
        for (locale, text) in [("en", "A"), ("de", "B"), ("fr", "C")] {
            upsert = upsert.localized_attribute("description", locale, text);
        }
        upsert = upsert.localized_attribute("name", "en", "D").reference("BRAND", 1);
        for (locale, text) in [("en", "A"), ("de", "B"), ("fr", "C")] {
            upsert = upsert.reference_attribute(
                "BRAND",
                1,
                AttributeKey::localized("brandDescription", locale),
                text,
            );
        }
        upsert = upsert.reference_attribute("BRAND", 1, AttributeKey::localized("brandName", "en"), "D");
        let entity = build(upsert);

        let err = check_mandatory(&product(), &entity).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Entity `PRODUCT` requires these attributes to be non-null, but they are missing: `ean`.\n\
             Entity `PRODUCT` requires these localized attributes to be specified for all localized versions of the entity, but values for some locales are missing: `name` in locales: `de`, `fr`.\n\
             Entity `PRODUCT` reference `BRAND` requires these attributes to be non-null, but they are missing: `brandEan`.\n\
             Entity `PRODUCT` reference `BRAND` requires these localized attributes to be specified for all localized versions of the entity, but values for some locales are missing: `brandName` in locales: `de`, `fr`."
        );
    }

    #[test]
    fn exactly_one_reports_actual_count() {
        let none = build(UpsertEntity::new("PRODUCT"));
        let err = check_cardinality(&product(), &none).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Expected reference cardinalities are violated in entity `PRODUCT`: reference `BRAND` is expected to be `EXACTLY_ONE` - but entity contains 0 references."
        );

        let two = build(UpsertEntity::new("PRODUCT").reference("BRAND", 1).reference("BRAND", 2));
        let err = check_cardinality(&product(), &two).unwrap_err();
        assert!(err.to_string().contains("`EXACTLY_ONE` - but entity contains 2 references"));

        let one = build(UpsertEntity::new("PRODUCT").reference("BRAND", 1));
        assert!(check_cardinality(&product(), &one).is_ok());
    }

    #[test]
    fn mutations_are_checked_against_schema() {
        let schema = product();
        let wrong_type = LocalMutation::UpsertAttribute {
            key: AttributeKey::new("ean"),
            value: 5.into(),
        };
        assert!(matches!(
            check_mutation(&schema, &wrong_type),
            Err(CoreError::SchemaViolation { .. })
        ));
        let missing_locale = LocalMutation::UpsertAttribute {
            key: AttributeKey::new("name"),
            value: "x".into(),
        };
        assert!(check_mutation(&schema, &missing_locale).is_err());
        let unknown = LocalMutation::UpsertAttribute {
            key: AttributeKey::new("color"),
            value: "red".into(),
        };
        assert!(check_mutation(&schema, &unknown).is_err());
        assert!(check_mutation(&schema, &LocalMutation::SetParent { parent: 2 }).is_err());
    }

    #[test]
    fn defaults_fill_missing_values() {
        let schema = EntitySchema::new("PRODUCT")
            .with_attribute(AttributeSchema::new("stock", AttributeType::Int).with_default(0))
            .with_attribute(
                AttributeSchema::new("label", AttributeType::String)
                    .localized()
                    .with_default("n/a"),
            );
        let mut entity = Entity::new("PRODUCT", 1);
        entity
            .apply(&LocalMutation::UpsertAttribute {
                key: AttributeKey::localized("label", "en"),
                value: "Label".into(),
            })
            .unwrap();
        entity
            .apply(&LocalMutation::UpsertAssociatedData {
                key: AttributeKey::localized("manual", "de"),
                value: "Handbuch".into(),
            })
            .unwrap();
        entity.recompute_locales();
        fill_defaults(&schema, &mut entity);

        assert_eq!(entity.attribute("stock"), Some(&0.into()));
        assert_eq!(entity.localized_attribute("label", &Locale::new("en")), Some(&"Label".into()));
        assert_eq!(entity.localized_attribute("label", &Locale::new("de")), Some(&"n/a".into()));
        assert!(check_mandatory(&schema, &entity).is_ok());
    }
}
