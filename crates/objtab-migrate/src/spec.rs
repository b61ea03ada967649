//! Declarative migration specs and their YAML config files.
//!
//! A config file maps migration names to specs:
//!
//! ```yaml
//! cells:
//!   migrator: standard
//!   existing_files: [data/cells.json]
//!   schema_files: [schemas/v1.schema, schemas/v2.schema, schemas/v3.schema]
//!   seq_of_renamed_models: [[[Species, Metabolite]], null]
//! ```
//!
//! Specs are validated as a whole before any of them runs, then
//! standardized: per-step lists are padded to one entry per step and
//! relative paths are resolved against the config file's directory.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use serde::Deserialize;

use crate::error::MigrateError;
use crate::hooks::{MigrationHooks, SingletonRootHook};
use crate::migrator::{Migrator, OutputOptions};
use crate::renames::{AttributeRename, ModelRename};

// ============================================================================
// Migrator kinds
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MigratorKind {
    #[default]
    Standard,
    /// Files hold exactly one instance of the root model; unset references to
    /// it are filled in before migrating.
    SingletonRoot,
}

impl MigratorKind {
    pub const ALL: [MigratorKind; 2] = [MigratorKind::Standard, MigratorKind::SingletonRoot];

    pub fn name(self) -> &'static str {
        match self {
            MigratorKind::Standard => "standard",
            MigratorKind::SingletonRoot => "singleton_root",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    /// Hooks every migrator of this kind runs.
    pub fn hooks(self) -> Vec<Arc<dyn MigrationHooks>> {
        match self {
            MigratorKind::Standard => vec![],
            MigratorKind::SingletonRoot => vec![Arc::new(SingletonRootHook)],
        }
    }

    fn names() -> String {
        Self::ALL.map(Self::name).join(", ")
    }
}

impl fmt::Display for MigratorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MigratorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s)
            .ok_or_else(|| format!("unknown migrator '{s}'; expected one of: {}", Self::names()))
    }
}

// ============================================================================
// MigrationSpec
// ============================================================================

type Steps<T> = Option<Vec<Option<Vec<T>>>>;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct MigrationSpec {
    #[serde(skip)]
    pub name: String,
    pub migrator: Option<String>,
    pub existing_files: Option<Vec<PathBuf>>,
    pub schema_files: Option<Vec<PathBuf>>,
    pub seq_of_renamed_models: Steps<ModelRename>,
    pub seq_of_renamed_attributes: Steps<AttributeRename>,
    /// Per step, the name of a registered hook.
    pub seq_of_transformations: Option<Vec<Option<String>>>,
    pub migrated_files: Option<Vec<PathBuf>>,
    pub migrate_suffix: Option<String>,
    pub migrate_in_place: bool,
    /// Anything else found in the config; reported by `validate`.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
    #[serde(skip)]
    pub config_file: Option<PathBuf>,
    #[serde(skip)]
    prepared: bool,
}

impl MigrationSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Number of migration steps: one less than the number of schemas.
    pub fn steps(&self) -> usize {
        self.schema_files().len().saturating_sub(1)
    }

    pub fn kind(&self) -> MigratorKind {
        self.migrator
            .as_deref()
            .and_then(MigratorKind::from_name)
            .unwrap_or_default()
    }

    pub fn existing_files(&self) -> &[PathBuf] {
        self.existing_files.as_deref().unwrap_or_default()
    }

    pub fn schema_files(&self) -> &[PathBuf] {
        self.schema_files.as_deref().unwrap_or_default()
    }

    pub fn renamed_models(&self, step: usize) -> Vec<ModelRename> {
        step_entry(&self.seq_of_renamed_models, step)
    }

    pub fn renamed_attributes(&self, step: usize) -> Vec<AttributeRename> {
        step_entry(&self.seq_of_renamed_attributes, step)
    }

    pub fn transformation(&self, step: usize) -> Option<&str> {
        self.seq_of_transformations
            .as_ref()
            .and_then(|seq| seq.get(step))
            .and_then(|t| t.as_deref())
    }

    /// Explicit output path for the `index`th existing file, if any.
    pub fn migrated_file(&self, index: usize) -> Option<&Path> {
        self.migrated_files
            .as_ref()
            .and_then(|files| files.get(index))
            .map(PathBuf::as_path)
    }

    pub fn output_options(&self) -> OutputOptions {
        OutputOptions {
            migrate_suffix: self.migrate_suffix.clone(),
            migrate_in_place: self.migrate_in_place,
        }
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    /// All problems with this spec; empty when valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if !self.extra.is_empty() {
            let names: Vec<String> = self.extra.keys().map(|k| format!("'{k}'")).collect();
            errors.push(format!("disallowed attribute(s) found: {}", names.join(", ")));
        }

        let required = [
            ("name", self.name.is_empty()),
            ("migrator", self.migrator.is_none()),
            ("existing_files", self.existing_files.is_none()),
            ("schema_files", self.schema_files.is_none()),
        ];
        for (attr, missing) in required {
            if missing {
                errors.push(format!("missing required attribute '{attr}'"));
            }
        }
        if !errors.is_empty() {
            return errors;
        }

        if let Some(Err(message)) = self.migrator.as_deref().map(MigratorKind::from_str) {
            errors.push(message);
        }

        let schemas = self.schema_files().len();
        if schemas < 2 {
            return vec![format!(
                "a migration spec must contain at least 2 schemas, but it has only {schemas}"
            )];
        }

        let steps = schemas - 1;
        let lengths = [
            ("seq_of_renamed_models", self.seq_of_renamed_models.as_ref().map(Vec::len)),
            ("seq_of_renamed_attributes", self.seq_of_renamed_attributes.as_ref().map(Vec::len)),
            ("seq_of_transformations", self.seq_of_transformations.as_ref().map(Vec::len)),
        ];
        for (list, len) in lengths {
            match len {
                Some(len) if len != steps => errors.push(format!(
                    "{list} must have 1 mapping for each of the {steps} migration(s) specified, but it has {len}"
                )),
                _ => {}
            }
        }

        if self.existing_files().is_empty() {
            errors.push("at least one existing file must be specified".to_string());
        }

        if let Some(migrated) = &self.migrated_files {
            if migrated.len() != self.existing_files().len() {
                errors.push(format!(
                    "existing_files and migrated_files must provide 1-to-1 corresponding files, but they have {} and {} entries, respectively",
                    self.existing_files().len(),
                    migrated.len()
                ));
            }
        }

        errors
    }

    /// Pad per-step lists and resolve relative paths against the config
    /// file's directory.
    pub fn standardize(&mut self) {
        let steps = self.steps();
        self.seq_of_renamed_models
            .get_or_insert_with(|| vec![None; steps]);
        self.seq_of_renamed_attributes
            .get_or_insert_with(|| vec![None; steps]);
        self.seq_of_transformations
            .get_or_insert_with(|| vec![None; steps]);

        let Some(dir) = self
            .config_file
            .as_deref()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
        else {
            return;
        };
        for files in [
            &mut self.existing_files,
            &mut self.schema_files,
            &mut self.migrated_files,
        ]
        .into_iter()
        .flatten()
        {
            for file in files.iter_mut() {
                if file.is_relative() {
                    *file = dir.join(&*file);
                }
            }
        }
    }

    /// Validate, then standardize.
    pub fn prepare(&mut self) -> Result<(), MigrateError> {
        let errors = self.validate();
        if !errors.is_empty() {
            return Err(MigrateError::Spec {
                name: self.name.clone(),
                errors,
            });
        }
        self.standardize();
        self.prepared = true;
        Ok(())
    }

    /// Paths a successful migration of this spec writes.
    pub fn expected_migrated_files(&self) -> Vec<PathBuf> {
        if let Some(files) = &self.migrated_files {
            return files.clone();
        }
        let options = self.output_options();
        self.existing_files()
            .iter()
            .map(|file| Migrator::path_of_migrated_file(file, &options))
            .collect()
    }

    /// Read every spec in a YAML config file, in file order. All specs are
    /// validated before any is standardized; problems across specs are
    /// reported together.
    pub fn load(config_file: &Path) -> Result<Vec<MigrationSpec>, MigrateError> {
        let config_err = |message: String| MigrateError::Config {
            path: config_file.to_path_buf(),
            message,
        };

        let path = fs::canonicalize(config_file).map_err(|e| config_err(e.to_string()))?;
        let text = fs::read_to_string(&path).map_err(|e| config_err(e.to_string()))?;
        let mapping: serde_yaml::Mapping =
            serde_yaml::from_str(&text).map_err(|e| config_err(e.to_string()))?;

        let mut specs = Vec::with_capacity(mapping.len());
        for (key, value) in mapping {
            let Some(name) = key.as_str().map(str::to_string) else {
                return Err(config_err(format!("migration name {key:?} is not a string")));
            };
            let mut spec: MigrationSpec = serde_yaml::from_value(value)
                .map_err(|e| config_err(format!("migration '{name}': {e}")))?;
            spec.name = name;
            spec.config_file = Some(path.clone());
            specs.push(spec);
        }

        let errors: Vec<String> = specs
            .iter()
            .flat_map(|spec| {
                spec.validate()
                    .into_iter()
                    .map(move |e| format!("{}: {e}", spec.name))
            })
            .collect();
        if !errors.is_empty() {
            return Err(MigrateError::Spec {
                name: config_file.display().to_string(),
                errors,
            });
        }

        for spec in &mut specs {
            spec.standardize();
            spec.prepared = true;
        }
        Ok(specs)
    }
}

fn step_entry<T: Clone>(seq: &Steps<T>, step: usize) -> Vec<T> {
    seq.as_ref()
        .and_then(|s| s.get(step))
        .and_then(|entry| entry.clone())
        .unwrap_or_default()
}
