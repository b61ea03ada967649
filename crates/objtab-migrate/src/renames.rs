//! Rename lists to model and attribute maps.
//!
//! Callers name only what changed. Every existing model that is not renamed
//! but still exists under the same name in the migrated schema maps to itself;
//! likewise for attributes of mapped models. Existing models left without a
//! counterpart are deleted by the migration.

use std::collections::{BTreeMap, BTreeSet};

use objtab_core::Schema;

/// `(existing model, migrated model)`
pub type ModelRename = (String, String);
/// `(model, attribute)`
pub type AttrPath = (String, String);
/// `(existing model.attribute, migrated model.attribute)`
pub type AttributeRename = (AttrPath, AttrPath);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenameMaps {
    /// Existing model -> migrated model, explicit and implicit. Injective.
    pub models: BTreeMap<String, String>,
    /// Explicit attribute renames only; implicit same-name mappings are
    /// resolved by `mapped_attribute`.
    pub attributes: BTreeMap<AttrPath, AttrPath>,
}

impl RenameMaps {
    /// The migrated `(model, attribute)` an existing attribute carries over to.
    ///
    /// An explicit rename wins. Otherwise the attribute maps to the same-named
    /// attribute of its model's counterpart, unless that attribute is already
    /// the target of an explicit rename.
    pub fn mapped_attribute(
        &self,
        migrated: &Schema,
        existing_model: &str,
        attribute: &str,
    ) -> Option<AttrPath> {
        let key = (existing_model.to_string(), attribute.to_string());
        if let Some(target) = self.attributes.get(&key) {
            return Some(target.clone());
        }
        let migrated_model = self.models.get(existing_model)?;
        migrated.attribute(migrated_model, attribute)?;
        let candidate = (migrated_model.clone(), attribute.to_string());
        if self.attributes.values().any(|t| *t == candidate) {
            return None;
        }
        Some(candidate)
    }
}

fn duplicates<'a>(names: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
    let mut seen = BTreeSet::new();
    let mut dups = BTreeSet::new();
    for name in names {
        if !seen.insert(name) {
            dups.insert(name);
        }
    }
    dups.into_iter().collect()
}

fn quoted(names: &[&str]) -> String {
    names
        .iter()
        .map(|n| format!("'{n}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Validate rename lists against both schemas and build the maps.
///
/// Every problem in both lists is reported together.
pub fn validate_renames(
    existing: &Schema,
    migrated: &Schema,
    renamed_models: &[ModelRename],
    renamed_attributes: &[AttributeRename],
) -> Result<RenameMaps, Vec<String>> {
    let mut errors = Vec::new();
    let mut maps = RenameMaps::default();

    // ------------------------------------------------------------------
    // Models
    // ------------------------------------------------------------------
    for (from, to) in renamed_models {
        let mut valid = true;
        if !existing.contains(from) {
            errors.push(format!("'{from}' in renamed models is not an existing model"));
            valid = false;
        }
        if !migrated.contains(to) {
            errors.push(format!("'{to}' in renamed models is not a migrated model"));
            valid = false;
        }
        if valid {
            maps.models.insert(from.clone(), to.clone());
        }
    }

    let dup_existing = duplicates(renamed_models.iter().map(|(from, _)| from.as_str()));
    if !dup_existing.is_empty() {
        errors.push(format!(
            "duplicated existing models in renamed models: {}",
            quoted(&dup_existing)
        ));
    }
    let dup_migrated = duplicates(renamed_models.iter().map(|(_, to)| to.as_str()));
    if !dup_migrated.is_empty() {
        errors.push(format!(
            "duplicated migrated models in renamed models: {}",
            quoted(&dup_migrated)
        ));
    }

    let targeted: BTreeSet<&str> = renamed_models.iter().map(|(_, to)| to.as_str()).collect();
    let renamed_from: BTreeSet<&str> = renamed_models.iter().map(|(from, _)| from.as_str()).collect();
    for model in existing.model_names() {
        if renamed_from.contains(model) || targeted.contains(model) {
            continue;
        }
        if migrated.contains(model) {
            maps.models.insert(model.to_string(), model.to_string());
        }
    }

    // ------------------------------------------------------------------
    // Attributes
    // ------------------------------------------------------------------
    for ((em, ea), (mm, ma)) in renamed_attributes {
        let existing_ok = existing.attribute(em, ea).is_some();
        if !existing_ok {
            errors.push(format!(
                "'{em}.{ea}' in renamed attributes is not an existing model.attribute"
            ));
        }
        if migrated.attribute(mm, ma).is_none() {
            errors.push(format!(
                "'{mm}.{ma}' in renamed attributes is not a migrated model.attribute"
            ));
        }
        if existing_ok && maps.models.get(em) != Some(mm) {
            let in_force = match maps.models.get(em) {
                Some(to) => format!("renamed models map '{em}' to '{to}'"),
                None => format!("model '{em}' has no migrated counterpart"),
            };
            errors.push(format!(
                "renamed attribute '{em}.{ea} -> {mm}.{ma}' is not consistent with renamed models; {in_force}"
            ));
        }
        maps.attributes
            .insert((em.clone(), ea.clone()), (mm.clone(), ma.clone()));
    }

    let existing_paths: Vec<String> = renamed_attributes
        .iter()
        .map(|((m, a), _)| format!("{m}.{a}"))
        .collect();
    let dup_existing = duplicates(existing_paths.iter().map(String::as_str));
    if !dup_existing.is_empty() {
        errors.push(format!(
            "duplicated existing attributes in renamed attributes: {}",
            quoted(&dup_existing)
        ));
    }
    let migrated_paths: Vec<String> = renamed_attributes
        .iter()
        .map(|(_, (m, a))| format!("{m}.{a}"))
        .collect();
    let dup_migrated = duplicates(migrated_paths.iter().map(String::as_str));
    if !dup_migrated.is_empty() {
        errors.push(format!(
            "duplicated migrated attributes in renamed attributes: {}",
            quoted(&dup_migrated)
        ));
    }

    if errors.is_empty() {
        Ok(maps)
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schemas() -> (Schema, Schema) {
        let existing = Schema::parse(
            "model Foo:\n  id: string @primary\n  x: int\n  old: string\nmodel Bar:\n  id: string @primary\nmodel Gone:\n  id: string @primary\n",
            None,
        )
        .expect("existing");
        let migrated = Schema::parse(
            "model Baz:\n  id: string @primary\n  x: int\n  new: string\nmodel Bar:\n  id: string @primary\nmodel Fresh:\n  id: string @primary\n",
            None,
        )
        .expect("migrated");
        (existing, migrated)
    }

    fn rename(a: &str, b: &str) -> ModelRename {
        (a.to_string(), b.to_string())
    }

    fn attr(m: &str, a: &str, n: &str, b: &str) -> AttributeRename {
        ((m.to_string(), a.to_string()), (n.to_string(), b.to_string()))
    }

    #[test]
    fn builds_explicit_and_implicit_maps() {
        let (existing, migrated) = schemas();
        let maps = validate_renames(
            &existing,
            &migrated,
            &[rename("Foo", "Baz")],
            &[attr("Foo", "old", "Baz", "new")],
        )
        .expect("valid");
        assert_eq!(maps.models.get("Foo").map(String::as_str), Some("Baz"));
        assert_eq!(maps.models.get("Bar").map(String::as_str), Some("Bar"));
        assert!(!maps.models.contains_key("Gone"));

        assert_eq!(
            maps.mapped_attribute(&migrated, "Foo", "x"),
            Some(("Baz".to_string(), "x".to_string()))
        );
        assert_eq!(
            maps.mapped_attribute(&migrated, "Foo", "old"),
            Some(("Baz".to_string(), "new".to_string()))
        );
        assert_eq!(maps.mapped_attribute(&migrated, "Gone", "id"), None);
    }

    #[test]
    fn reports_all_defects_together() {
        let (existing, migrated) = schemas();
        let errors = validate_renames(
            &existing,
            &migrated,
            &[rename("Nope", "Baz"), rename("Foo", "Baz")],
            &[attr("Foo", "x", "Bar", "id")],
        )
        .expect_err("invalid");
        assert_eq!(errors.len(), 3, "errors={errors:?}");
        assert_eq!(errors[0], "'Nope' in renamed models is not an existing model");
        assert_eq!(errors[1], "duplicated migrated models in renamed models: 'Baz'");
        assert_eq!(
            errors[2],
            "renamed attribute 'Foo.x -> Bar.id' is not consistent with renamed models; renamed models map 'Foo' to 'Baz'"
        );
    }

    #[test]
    fn renaming_onto_an_existing_name_does_not_double_map() {
        let existing = Schema::parse(
            "model A:\n  id: string @primary\nmodel B:\n  id: string @primary\n",
            None,
        )
        .expect("existing");
        let migrated = Schema::parse("model B:\n  id: string @primary\n", None).expect("migrated");
        let maps = validate_renames(&existing, &migrated, &[rename("A", "B")], &[]).expect("valid");
        assert_eq!(maps.models.len(), 1);
        assert_eq!(maps.models.get("A").map(String::as_str), Some("B"));
    }

    #[test]
    fn attribute_rename_on_a_deleted_model_names_the_gap() {
        let (existing, migrated) = schemas();
        let errors = validate_renames(
            &existing,
            &migrated,
            &[rename("Foo", "Baz")],
            &[attr("Gone", "id", "Fresh", "id")],
        )
        .expect_err("invalid");
        assert_eq!(
            errors,
            vec!["renamed attribute 'Gone.id -> Fresh.id' is not consistent with renamed models; model 'Gone' has no migrated counterpart".to_string()]
        );
    }

    #[test]
    fn unknown_attribute_paths_are_reported() {
        let (existing, migrated) = schemas();
        let errors = validate_renames(
            &existing,
            &migrated,
            &[rename("Foo", "Baz")],
            &[attr("Foo", "missing", "Baz", "absent")],
        )
        .expect_err("invalid");
        assert_eq!(
            errors,
            vec![
                "'Foo.missing' in renamed attributes is not an existing model.attribute".to_string(),
                "'Baz.absent' in renamed attributes is not a migrated model.attribute".to_string(),
            ]
        );
    }
}
