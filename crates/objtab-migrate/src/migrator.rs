//! One migration step: existing schema -> migrated schema.
//!
//! A `Migrator` only exists in the prepared state. `MigratorBuilder::prepare`
//! validates the rename lists and checks every mapped pair for consistency;
//! any failure aborts before data is touched.
//!
//! Migrating a dataset runs in two passes over a fresh output arena:
//!
//! 1. every instance of a mapped model gets a counterpart holding copies of
//!    its mapped scalar attributes, and the existing->migrated id pair is
//!    recorded in a forward table local to the call;
//! 2. relationship values are rewritten through the forward table.
//!
//! Expression attributes are rewritten between the passes, once all
//! migrated identifiers are known.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use objtab_core::expression::{ExpressionContext, ParsedExpression, TokenKind};
use objtab_core::workbook::{read_dataset, write_dataset, ReadOptions};
use objtab_core::{
    AttributeKind, Dataset, ExpressionError, Instance, InstanceId, Related, ScalarType, Schema,
    Value,
};
use tracing::{debug, info, warn};

use crate::consistency::check_consistency;
use crate::error::MigrateError;
use crate::hooks::MigrationHooks;
use crate::renames::{validate_renames, AttrPath, AttributeRename, ModelRename, RenameMaps};

/// Default suffix of migrated file names, before the extension.
pub const MIGRATE_SUFFIX: &str = "_migrated";

/// Where a migrated file goes.
#[derive(Debug, Clone, Default)]
pub struct OutputOptions {
    /// Suffix for generated file names; `MIGRATE_SUFFIX` when unset.
    pub migrate_suffix: Option<String>,
    /// Overwrite the existing file instead of writing a new one.
    pub migrate_in_place: bool,
}

pub struct MigratorBuilder {
    existing: Arc<Schema>,
    migrated: Arc<Schema>,
    renamed_models: Vec<ModelRename>,
    renamed_attributes: Vec<AttributeRename>,
    hooks: Vec<Arc<dyn MigrationHooks>>,
    read_options: ReadOptions,
}

impl MigratorBuilder {
    pub fn renamed_models(mut self, renamed: Vec<ModelRename>) -> Self {
        self.renamed_models = renamed;
        self
    }

    pub fn renamed_attributes(mut self, renamed: Vec<AttributeRename>) -> Self {
        self.renamed_attributes = renamed;
        self
    }

    /// Add a hook; hooks run in the order they were added.
    pub fn hook(mut self, hook: Arc<dyn MigrationHooks>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn ignore_extra_sheets(mut self, ignore: bool) -> Self {
        self.read_options.ignore_extra_sheets = ignore;
        self
    }

    pub fn prepare(self) -> Result<Migrator, MigrateError> {
        let maps = validate_renames(
            &self.existing,
            &self.migrated,
            &self.renamed_models,
            &self.renamed_attributes,
        )
        .map_err(MigrateError::Renames)?;

        let deleted_models: BTreeSet<String> = self
            .existing
            .model_names()
            .filter(|m| !maps.models.contains_key(*m))
            .map(str::to_string)
            .collect();

        let inconsistencies =
            check_consistency(&self.existing, &self.migrated, &maps, &deleted_models);
        if !inconsistencies.is_empty() {
            return Err(MigrateError::Inconsistent(inconsistencies));
        }

        info!(
            existing = %self.existing.origin(),
            migrated = %self.migrated.origin(),
            mapped = maps.models.len(),
            deleted = deleted_models.len(),
            "prepared migration"
        );

        Ok(Migrator {
            existing: self.existing,
            migrated: self.migrated,
            maps,
            deleted_models,
            hooks: self.hooks,
            read_options: self.read_options,
        })
    }
}

#[derive(Debug)]
pub struct Migrator {
    existing: Arc<Schema>,
    migrated: Arc<Schema>,
    maps: RenameMaps,
    deleted_models: BTreeSet<String>,
    hooks: Vec<Arc<dyn MigrationHooks>>,
    read_options: ReadOptions,
}

// ============================================================================
// Accessors
// ============================================================================

impl Migrator {
    pub fn builder(existing: Arc<Schema>, migrated: Arc<Schema>) -> MigratorBuilder {
        MigratorBuilder {
            existing,
            migrated,
            renamed_models: vec![],
            renamed_attributes: vec![],
            hooks: vec![],
            read_options: ReadOptions::default(),
        }
    }

    pub fn existing_schema(&self) -> &Schema {
        &self.existing
    }

    pub fn migrated_schema(&self) -> &Schema {
        &self.migrated
    }

    /// Existing model -> migrated model.
    pub fn models_map(&self) -> &BTreeMap<String, String> {
        &self.maps.models
    }

    pub fn deleted_models(&self) -> &BTreeSet<String> {
        &self.deleted_models
    }

    pub fn mapped_attribute(&self, existing_model: &str, attribute: &str) -> Option<AttrPath> {
        self.maps
            .mapped_attribute(&self.migrated, existing_model, attribute)
    }

    /// Path a migrated copy of `existing_file` is written to:
    /// `<dir>/<stem><suffix>.<ext>`, or `existing_file` itself in place.
    pub fn path_of_migrated_file(existing_file: &Path, options: &OutputOptions) -> PathBuf {
        if options.migrate_in_place {
            return existing_file.to_path_buf();
        }
        let suffix = options.migrate_suffix.as_deref().unwrap_or(MIGRATE_SUFFIX);
        let stem = existing_file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = match existing_file.extension() {
            Some(ext) => format!("{stem}{suffix}.{}", ext.to_string_lossy()),
            None => format!("{stem}{suffix}"),
        };
        existing_file.with_file_name(name)
    }
}

// ============================================================================
// Instance checks
// ============================================================================

impl Migrator {
    /// Advisory report of uninitialized attributes in `existing`: unset
    /// scalars and unset to-one relationships, counted per model and
    /// attribute, in order of first occurrence.
    pub fn check_instances(&self, existing: &Dataset) -> Vec<String> {
        let mut order: Vec<String> = Vec::new();
        let mut counts: HashMap<String, usize> = HashMap::new();

        for (_, inst) in existing.iter() {
            let Some(model) = self.existing.model(inst.model()) else {
                continue;
            };
            for attr in &model.attributes {
                let uninitialized = match &attr.kind {
                    AttributeKind::Scalar(_) => inst.value(&attr.name).is_none(),
                    AttributeKind::Related(rel) => {
                        !rel.cardinality.is_to_many()
                            && inst.related(&attr.name).map_or(true, Related::is_empty)
                    }
                };
                if !uninitialized {
                    continue;
                }
                let message = format!(
                    "instance(s) of existing model '{}' lack(s) '{}' non-default value",
                    model.name, attr.name
                );
                let count = counts.entry(message.clone()).or_insert(0);
                if *count == 0 {
                    order.push(message);
                }
                *count += 1;
            }
        }

        order
            .into_iter()
            .map(|message| {
                let count = counts.get(&message).copied().unwrap_or_default();
                format!("{count} {message}")
            })
            .collect()
    }
}

// ============================================================================
// Migration
// ============================================================================

impl Migrator {
    /// Migrate `existing` into a new dataset over the migrated schema.
    ///
    /// Instances of deleted models are dropped, and so are the values of
    /// relationships that have no migrated counterpart. A mapped relationship
    /// whose target has no migrated copy is an error, as is a `@required`
    /// migrated relationship left empty.
    pub fn migrate(&self, existing: &Dataset) -> Result<Dataset, MigrateError> {
        let mut errors = Vec::new();
        let mut migrated = Dataset::new();
        // existing id -> migrated id, only for the duration of this call
        let mut forward: HashMap<InstanceId, InstanceId> = HashMap::with_capacity(existing.len());

        // Pass 1: instances and scalars.
        for (id, inst) in existing.iter() {
            let Some(model) = self.existing.model(inst.model()) else {
                errors.push(format!(
                    "instance {} has model '{}', which is not defined by the existing schema",
                    id.index(),
                    inst.model()
                ));
                continue;
            };
            let Some(target_model) = self.maps.models.get(&model.name) else {
                continue;
            };

            let mut copy = Instance::new(target_model.clone());
            for attr in model.attributes.iter().filter(|a| !a.is_related()) {
                let Some((_, migrated_attr)) = self.mapped_attribute(&model.name, &attr.name)
                else {
                    continue;
                };
                if let Some(value) = inst.value(&attr.name) {
                    copy.set_value(&migrated_attr, value.copy_with(attr.copy));
                }
            }
            forward.insert(id, migrated.add(copy));
        }
        if !errors.is_empty() {
            return Err(MigrateError::Data(errors));
        }

        let duplicates = self.duplicated_ids(&migrated);
        if !duplicates.is_empty() {
            return Err(MigrateError::Data(duplicates));
        }

        self.migrate_expressions(existing, &mut migrated, &forward)?;

        // Pass 2: relationships.
        let mut rewired: BTreeSet<AttrPath> = BTreeSet::new();
        for (id, inst) in existing.iter() {
            let Some(&new_id) = forward.get(&id) else {
                continue;
            };
            let Some(model) = self.existing.model(inst.model()) else {
                continue;
            };
            for (attr, _) in model.related_attributes() {
                let Some((mm, ma)) = self.mapped_attribute(&model.name, &attr.name) else {
                    continue;
                };
                rewired.insert((mm, ma.clone()));
                let Some(related) = inst.related(&attr.name) else {
                    continue;
                };
                match related.try_map(|t| forward.get(&t).copied().ok_or(())) {
                    Ok(mapped) => migrated[new_id].set_related(&ma, mapped),
                    Err(()) => {
                        // try_map stops at the first miss; report every one.
                        for t in related.ids().into_iter().filter(|t| !forward.contains_key(t)) {
                            errors.push(format!(
                                "{}.{} of {} refers to {}, which has no migrated copy",
                                model.name,
                                attr.name,
                                existing.describe(&self.existing, id),
                                existing.describe(&self.existing, t)
                            ));
                        }
                    }
                }
            }
        }
        if !errors.is_empty() {
            return Err(MigrateError::Data(errors));
        }

        for (id, inst) in migrated.iter() {
            let Some(model) = self.migrated.model(inst.model()) else {
                continue;
            };
            for (attr, _) in model.related_attributes() {
                if !attr.required || !rewired.contains(&(model.name.clone(), attr.name.clone())) {
                    continue;
                }
                if inst.related(&attr.name).map_or(true, Related::is_empty) {
                    errors.push(format!(
                        "migrated {} lacks a value for required relationship '{}'",
                        migrated.describe(&self.migrated, id),
                        attr.name
                    ));
                }
            }
        }
        if !errors.is_empty() {
            return Err(MigrateError::Data(errors));
        }

        debug!(
            existing = existing.len(),
            migrated = migrated.len(),
            "migrated instances"
        );
        Ok(migrated)
    }

    /// Duplicate primary keys per migrated model.
    fn duplicated_ids(&self, migrated: &Dataset) -> Vec<String> {
        let mut seen: BTreeSet<(&str, &str)> = BTreeSet::new();
        let mut errors = Vec::new();
        for (id, inst) in migrated.iter() {
            let Some(key) = migrated.primary_key(&self.migrated, id) else {
                continue;
            };
            if !seen.insert((inst.model(), key)) {
                errors.push(format!(
                    "model type '{}' has duplicated id: '{key}'",
                    inst.model()
                ));
            }
        }
        errors
    }

    fn ids_by_model(dataset: &Dataset, schema: &Schema) -> BTreeMap<String, BTreeSet<String>> {
        let mut ids: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (id, inst) in dataset.iter() {
            if let Some(key) = dataset.primary_key(schema, id) {
                ids.entry(inst.model().to_string())
                    .or_default()
                    .insert(key.to_string());
            }
        }
        ids
    }

    fn expression_context(
        models: &[String],
        ids: &BTreeMap<String, BTreeSet<String>>,
    ) -> ExpressionContext {
        models.iter().fold(ExpressionContext::new(models.iter().cloned()), |ctx, m| {
            ctx.with_ids(m, ids.get(m).into_iter().flatten().cloned())
        })
    }

    /// Rewrite the type qualifiers of one expression for renamed models.
    ///
    /// Returns `None` when no referenced model was renamed, in which case the
    /// original text stays in use unchanged.
    pub fn migrate_expression(
        &self,
        text: &str,
        context: &ExpressionContext,
    ) -> Result<Option<String>, ExpressionError> {
        let parsed = ParsedExpression::tokenize(text, context)?;
        let renamed: BTreeMap<&str, &str> = parsed
            .referenced_models()
            .into_iter()
            .filter_map(|m| match self.maps.models.get(m) {
                Some(to) if to != m => Some((m, to.as_str())),
                _ => None,
            })
            .collect();
        if renamed.is_empty() {
            return Ok(None);
        }

        let strings: Vec<String> = parsed
            .tokens()
            .iter()
            .map(|token| match &token.kind {
                TokenKind::Reference {
                    model,
                    qualified: true,
                } => match renamed.get(model.as_str()) {
                    Some(to) => format!("{to}{}", &token.text[model.len()..]),
                    None => token.text.clone(),
                },
                _ => token.text.clone(),
            })
            .collect();
        let rebuilt = parsed.reconstruct(&strings)?;
        Ok((rebuilt != text).then_some(rebuilt))
    }

    fn migrate_expressions(
        &self,
        existing: &Dataset,
        migrated: &mut Dataset,
        forward: &HashMap<InstanceId, InstanceId>,
    ) -> Result<(), MigrateError> {
        let existing_ids = Self::ids_by_model(existing, &self.existing);
        let migrated_ids = Self::ids_by_model(migrated, &self.migrated);
        let mut errors = Vec::new();

        for (id, inst) in existing.iter() {
            let Some(&new_id) = forward.get(&id) else {
                continue;
            };
            let Some(model) = self.existing.model(inst.model()) else {
                continue;
            };
            for attr in &model.attributes {
                let AttributeKind::Scalar(ScalarType::Expression(existing_ctx)) = &attr.kind else {
                    continue;
                };
                let Some((mm, ma)) = self.mapped_attribute(&model.name, &attr.name) else {
                    continue;
                };
                let Some(AttributeKind::Scalar(ScalarType::Expression(migrated_ctx))) =
                    self.migrated.attribute(&mm, &ma).map(|a| &a.kind)
                else {
                    continue;
                };
                let Some(Value::Expr(text)) = inst.value(&attr.name) else {
                    continue;
                };

                let handle = existing.describe(&self.existing, id);
                let rewritten = match self
                    .migrate_expression(text, &Self::expression_context(existing_ctx, &existing_ids))
                {
                    Ok(rewritten) => rewritten,
                    Err(err) => {
                        errors.push(format!("{}.{} of {handle}: {err}", model.name, attr.name));
                        continue;
                    }
                };

                let final_text = rewritten.as_deref().unwrap_or(&**text);
                let migrated_context = Self::expression_context(migrated_ctx, &migrated_ids);
                if let Err(err) = ParsedExpression::tokenize(final_text, &migrated_context) {
                    errors.push(format!(
                        "migrated {mm}.{ma} of {handle}: {err}"
                    ));
                    continue;
                }
                if let Some(new_text) = rewritten {
                    migrated[new_id].set_value(&ma, Value::Expr(Arc::from(new_text)));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(MigrateError::Data(errors))
        }
    }

    /// Run the before hooks, the advisory check, the migration and the after
    /// hooks.
    pub fn migrate_with_transformations(
        &self,
        mut existing: Dataset,
    ) -> Result<Dataset, MigrateError> {
        for hook in &self.hooks {
            hook.prepare_existing(self, &mut existing)?;
        }
        for warning in self.check_instances(&existing) {
            warn!(schema = %self.existing.name(), "{warning}");
        }
        let mut migrated = self.migrate(&existing)?;
        for hook in &self.hooks {
            hook.modify_migrated(self, &mut migrated)?;
        }
        Ok(migrated)
    }
}

// ============================================================================
// Model (sheet) order
// ============================================================================

impl Migrator {
    /// Mapped existing models in the order their sheets appear, followed by
    /// mapped models without a sheet, sorted.
    pub fn existing_model_order(&self, sheet_names: &[String]) -> Vec<String> {
        let mut order: Vec<String> = sheet_names
            .iter()
            .filter(|name| self.maps.models.contains_key(*name))
            .cloned()
            .collect();
        let mut missing: Vec<String> = self
            .maps
            .models
            .keys()
            .filter(|m| !order.contains(m))
            .cloned()
            .collect();
        missing.sort();
        order.extend(missing);
        order
    }

    /// Map an existing model order to the migrated one, then append models
    /// new in the migrated schema, sorted by name. Deleted models drop out.
    pub fn migrate_model_order(&self, order: &[String]) -> Result<Vec<String>, MigrateError> {
        let mut migrated_order = Vec::with_capacity(order.len());
        for model in order {
            match self.maps.models.get(model) {
                Some(to) => migrated_order.push(to.clone()),
                None if self.deleted_models.contains(model) => {}
                None => {
                    return Err(MigrateError::ModelOrder(format!(
                        "model '{model}' not found in the model map"
                    )))
                }
            }
        }
        let targets: BTreeSet<&str> = self.maps.models.values().map(String::as_str).collect();
        migrated_order.extend(
            self.migrated
                .model_names()
                .filter(|m| !targets.contains(m))
                .map(str::to_string),
        );
        Ok(migrated_order)
    }
}

// ============================================================================
// Files
// ============================================================================

impl Migrator {
    /// Read a workbook written against the existing schema. Returns the
    /// dataset and the file's sheet names.
    pub fn read_existing_file(&self, path: &Path) -> Result<(Dataset, Vec<String>), MigrateError> {
        Ok(read_dataset(path, &self.existing, self.read_options)?)
    }

    /// Write a migrated dataset. Refuses to replace an existing file unless
    /// migrating in place.
    pub fn write_migrated_file(
        &self,
        migrated: &Dataset,
        model_order: &[String],
        existing_file: &Path,
        migrated_file: Option<&Path>,
        options: &OutputOptions,
    ) -> Result<PathBuf, MigrateError> {
        let target = match migrated_file {
            Some(path) if !options.migrate_in_place => path.to_path_buf(),
            _ => Self::path_of_migrated_file(existing_file, options),
        };
        if !options.migrate_in_place && target.exists() {
            return Err(MigrateError::FileExists(target));
        }
        let written = write_dataset(&target, migrated, model_order, &self.migrated)?;
        info!(path = %written.display(), "wrote migrated file");
        Ok(written)
    }

    /// Read, migrate and write one file.
    pub fn full_migrate(
        &self,
        existing_file: &Path,
        migrated_file: Option<&Path>,
        options: &OutputOptions,
    ) -> Result<PathBuf, MigrateError> {
        let (existing, sheet_names) = self.read_existing_file(existing_file)?;
        let migrated = self.migrate_with_transformations(existing)?;
        let order = self.migrate_model_order(&self.existing_model_order(&sheet_names))?;
        self.write_migrated_file(&migrated, &order, existing_file, migrated_file, options)
    }

    /// Migrate several files with this migrator.
    pub fn run(
        &self,
        existing_files: &[PathBuf],
        options: &OutputOptions,
    ) -> Result<Vec<PathBuf>, MigrateError> {
        existing_files
            .iter()
            .map(|file| self.full_migrate(file, None, options))
            .collect()
    }
}
