//! Pairwise checks between mapped models and attributes.

use std::collections::BTreeSet;

use objtab_core::{AttributeKind, ModelDef, Schema};

use crate::renames::RenameMaps;

/// A definition must carry the name it is registered under.
fn misnamed(side: &str, key: &str, model: &ModelDef) -> Option<String> {
    (model.name != key).then(|| {
        format!(
            "{side} model registered as '{key}' declares the name '{}'",
            model.name
        )
    })
}

/// Check every mapped model pair and every mapped attribute pair.
///
/// A mapped relationship must keep its cardinality and inverse name, and its
/// migrated target must be the counterpart of the existing target. A migrated
/// relationship whose existing target is a deleted model is an error, even
/// though existing relationships *into* deleted models simply disappear.
pub fn check_consistency(
    existing: &Schema,
    migrated: &Schema,
    maps: &RenameMaps,
    deleted_models: &BTreeSet<String>,
) -> Vec<String> {
    let mut errors = Vec::new();

    for (existing_name, migrated_name) in &maps.models {
        let Some(existing_model) = existing.model(existing_name) else {
            errors.push(format!(
                "existing model '{existing_name}' is not defined by schema '{}'",
                existing.name()
            ));
            continue;
        };
        let Some(migrated_model) = migrated.model(migrated_name) else {
            errors.push(format!(
                "migrated model '{migrated_name}' is not defined by schema '{}'",
                migrated.name()
            ));
            continue;
        };

        errors.extend(misnamed("existing", existing_name, existing_model));
        errors.extend(misnamed("migrated", migrated_name, migrated_model));

        if existing_model.category != migrated_model.category {
            errors.push(format!(
                "existing model '{existing_name}' is a {}, but its migrated model '{migrated_name}' is a {}",
                existing_model.category.name(),
                migrated_model.category.name()
            ));
            continue;
        }

        for attr in &existing_model.attributes {
            let Some((mm, ma)) = maps.mapped_attribute(migrated, existing_name, &attr.name) else {
                continue;
            };
            let Some(migrated_attr) = migrated.attribute(&mm, &ma) else {
                continue;
            };

            if attr.kind.type_name() != migrated_attr.kind.type_name() {
                errors.push(format!(
                    "type of existing attribute '{existing_name}.{}' ({}) differs from type of its migrated attribute '{mm}.{ma}' ({})",
                    attr.name,
                    attr.kind.type_name(),
                    migrated_attr.kind.type_name()
                ));
                continue;
            }

            let (AttributeKind::Related(existing_rel), AttributeKind::Related(migrated_rel)) =
                (&attr.kind, &migrated_attr.kind)
            else {
                continue;
            };

            if existing_rel.inverse != migrated_rel.inverse {
                errors.push(format!(
                    "inverse name of existing attribute '{existing_name}.{}' ({}) differs from inverse name of its migrated attribute '{mm}.{ma}' ({})",
                    attr.name,
                    existing_rel.inverse.as_deref().unwrap_or("none"),
                    migrated_rel.inverse.as_deref().unwrap_or("none")
                ));
            }

            if deleted_models.contains(&existing_rel.target) {
                errors.push(format!(
                    "existing model '{}' is not migrated, but is referenced by migrated attribute {mm}.{ma}",
                    existing_rel.target
                ));
                continue;
            }

            match maps.models.get(&existing_rel.target) {
                Some(expected) if *expected == migrated_rel.target => {}
                Some(expected) => errors.push(format!(
                    "existing attribute '{existing_name}.{}' targets '{}', which migrates to '{expected}', but migrated attribute '{mm}.{ma}' targets '{}'",
                    attr.name, existing_rel.target, migrated_rel.target
                )),
                None => errors.push(format!(
                    "target '{}' of existing attribute '{existing_name}.{}' has no migrated counterpart",
                    existing_rel.target, attr.name
                )),
            }
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renames::validate_renames;

    fn check(existing: &str, migrated: &str, renamed: &[(&str, &str)]) -> Vec<String> {
        let existing = Schema::parse(existing, None).expect("existing");
        let migrated = Schema::parse(migrated, None).expect("migrated");
        let renamed: Vec<(String, String)> = renamed
            .iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect();
        let maps = validate_renames(&existing, &migrated, &renamed, &[]).expect("renames");
        let deleted: BTreeSet<String> = existing
            .model_names()
            .filter(|m| !maps.models.contains_key(*m))
            .map(str::to_string)
            .collect();
        check_consistency(&existing, &migrated, &maps, &deleted)
    }

    #[test]
    fn renamed_target_is_followed() {
        let errors = check(
            "model Species:\n  id: string @primary\n  c: many_to_one Compartment as species\nmodel Compartment:\n  id: string @primary\n",
            "model Species:\n  id: string @primary\n  c: many_to_one Location as species\nmodel Location:\n  id: string @primary\n",
            &[("Compartment", "Location")],
        );
        assert!(errors.is_empty(), "errors={errors:?}");
    }

    #[test]
    fn deleted_target_of_a_migrated_relationship_is_an_error() {
        let errors = check(
            "model Species:\n  id: string @primary\n  c: many_to_one Compartment\nmodel Compartment:\n  id: string @primary\n",
            "model Species:\n  id: string @primary\n  c: many_to_one Species\n",
            &[],
        );
        assert_eq!(
            errors,
            vec!["existing model 'Compartment' is not migrated, but is referenced by migrated attribute Species.c".to_string()]
        );
    }

    #[test]
    fn dropped_relationship_into_deleted_model_is_fine() {
        let errors = check(
            "model Species:\n  id: string @primary\n  c: many_to_one Compartment\nmodel Compartment:\n  id: string @primary\n",
            "model Species:\n  id: string @primary\n",
            &[],
        );
        assert!(errors.is_empty(), "errors={errors:?}");
    }

    #[test]
    fn registry_key_must_match_declared_name() {
        let schema = Schema::parse("model Species:\n  id: string @primary\n", None).expect("schema");
        let species = schema.model("Species").expect("Species");
        assert_eq!(misnamed("existing", "Species", species), None);

        let mut renamed = species.clone();
        renamed.name = "Metabolite".to_string();
        assert_eq!(
            misnamed("migrated", "Species", &renamed).as_deref(),
            Some("migrated model registered as 'Species' declares the name 'Metabolite'")
        );
    }

    #[test]
    fn kind_inverse_and_category_changes_are_reported() {
        let errors = check(
            "root model M:\n  id: string @primary\nmodel S:\n  id: string @primary\n  n: int\n  m: many_to_one M as items\n",
            "model M:\n  id: string @primary\nmodel S:\n  id: string @primary\n  n: float\n  m: many_to_one M as things\n",
            &[],
        );
        assert_eq!(errors.len(), 3, "errors={errors:?}");
        assert!(errors[0].contains("'M' is a root model"), "errors={errors:?}");
        assert!(errors[1].contains("(int)") && errors[1].contains("(float)"));
        assert!(errors[2].contains("(items)") && errors[2].contains("(things)"));
    }
}
