//! Migrations over a sequence of schema versions.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use objtab_core::{Dataset, SchemaLoader};
use tracing::info;

use crate::error::MigrateError;
use crate::hooks::HookRegistry;
use crate::migrator::Migrator;
use crate::spec::MigrationSpec;

/// What one spec produced.
#[derive(Debug, Default)]
pub struct SequenceOutcome {
    /// Per existing file, the dataset after each step.
    pub datasets: Vec<Vec<Dataset>>,
    /// Per existing file, the file written after the last step.
    pub migrated_files: Vec<PathBuf>,
}

/// Runs migration specs. Schemas are loaded through one `SchemaLoader`, so
/// every step sharing a schema file shares its `Schema`.
#[derive(Debug, Default)]
pub struct MigrationController {
    loader: SchemaLoader,
    hooks: HookRegistry,
}

impl MigrationController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Controller resolving `seq_of_transformations` names against `hooks`.
    pub fn with_hooks(hooks: HookRegistry) -> Self {
        Self {
            loader: SchemaLoader::new(),
            hooks,
        }
    }

    pub fn loader(&self) -> &SchemaLoader {
        &self.loader
    }

    /// One prepared migrator per adjacent schema pair. All of them are built
    /// before any data is read.
    pub fn migrators_for(&self, spec: &MigrationSpec) -> Result<Vec<Migrator>, MigrateError> {
        let schemas = spec
            .schema_files()
            .iter()
            .map(|path| self.loader.load(path))
            .collect::<Result<Vec<_>, _>>()?;

        let mut migrators = Vec::with_capacity(spec.steps());
        for (step, pair) in schemas.windows(2).enumerate() {
            let mut builder = Migrator::builder(Arc::clone(&pair[0]), Arc::clone(&pair[1]))
                .renamed_models(spec.renamed_models(step))
                .renamed_attributes(spec.renamed_attributes(step));
            for hook in spec.kind().hooks() {
                builder = builder.hook(hook);
            }
            if let Some(name) = spec.transformation(step) {
                let hook = self.hooks.get(name).ok_or_else(|| MigrateError::Spec {
                    name: spec.name.clone(),
                    errors: vec![format!(
                        "transformation '{name}' of migration {} is not registered",
                        step + 1
                    )],
                })?;
                builder = builder.hook(hook);
            }
            migrators.push(builder.prepare()?);
        }
        Ok(migrators)
    }

    /// Migrate every existing file of `spec` through all its schemas.
    ///
    /// The first step reads the file; later steps work in memory on the
    /// previous step's output. Only the last step writes, using the file's
    /// sheet order carried through every step's model map.
    pub fn migrate_over_schema_sequence(
        &self,
        spec: &MigrationSpec,
    ) -> Result<SequenceOutcome, MigrateError> {
        if !spec.is_prepared() {
            return Err(MigrateError::Spec {
                name: spec.name.clone(),
                errors: vec![format!("MigrationSpec '{}' is not prepared", spec.name)],
            });
        }
        let migrators = self.migrators_for(spec)?;
        let (Some(first), Some(last)) = (migrators.first(), migrators.last()) else {
            return Err(MigrateError::Spec {
                name: spec.name.clone(),
                errors: vec!["a migration spec must contain at least 2 schemas".to_string()],
            });
        };
        let options = spec.output_options();

        let mut outcome = SequenceOutcome::default();
        for (index, existing_file) in spec.existing_files().iter().enumerate() {
            let (mut dataset, sheet_names) = first.read_existing_file(existing_file)?;
            let mut order = first.existing_model_order(&sheet_names);
            let mut steps = Vec::with_capacity(migrators.len());

            for (step, migrator) in migrators.iter().enumerate() {
                dataset = migrator.migrate_with_transformations(dataset)?;
                order = migrator.migrate_model_order(&order)?;
                info!(
                    migration = %spec.name,
                    file = %existing_file.display(),
                    step = step + 1,
                    of = migrators.len(),
                    instances = dataset.len(),
                    "migrated step"
                );
                steps.push(dataset.clone());
            }

            let written = last.write_migrated_file(
                &dataset,
                &order,
                existing_file,
                spec.migrated_file(index),
                &options,
            )?;
            outcome.datasets.push(steps);
            outcome.migrated_files.push(written);
        }
        Ok(outcome)
    }

    /// Run one prepared spec; returns the migrated files.
    pub fn migrate_from_spec(&self, spec: &MigrationSpec) -> Result<Vec<PathBuf>, MigrateError> {
        Ok(self.migrate_over_schema_sequence(spec)?.migrated_files)
    }

    /// Load every spec in a YAML config and run them in file order.
    pub fn migrate_from_config(
        &self,
        config_file: &Path,
    ) -> Result<Vec<(MigrationSpec, Vec<PathBuf>)>, MigrateError> {
        let specs = MigrationSpec::load(config_file)?;
        let mut results = Vec::with_capacity(specs.len());
        for spec in specs {
            let files = self.migrate_from_spec(&spec)?;
            results.push((spec, files));
        }
        Ok(results)
    }
}
