//! Transformation hooks run around a migration step.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use objtab_core::{Dataset, Related};
use tracing::debug;

use crate::error::MigrateError;
use crate::migrator::Migrator;

/// Caller-supplied adjustments around one migration step.
///
/// `prepare_existing` sees the existing dataset before it is checked and
/// migrated; `modify_migrated` sees the migrated dataset before it is written.
/// Both default to doing nothing.
pub trait MigrationHooks: Send + Sync {
    fn name(&self) -> &str;

    fn prepare_existing(
        &self,
        _migrator: &Migrator,
        _existing: &mut Dataset,
    ) -> Result<(), MigrateError> {
        Ok(())
    }

    fn modify_migrated(
        &self,
        _migrator: &Migrator,
        _migrated: &mut Dataset,
    ) -> Result<(), MigrateError> {
        Ok(())
    }
}

impl fmt::Debug for dyn MigrationHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MigrationHooks({})", self.name())
    }
}

/// Named hooks that migration configs can refer to.
#[derive(Debug, Clone, Default)]
pub struct HookRegistry {
    hooks: BTreeMap<String, Arc<dyn MigrationHooks>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook under its own name, replacing any previous one.
    pub fn register(&mut self, hook: Arc<dyn MigrationHooks>) {
        self.hooks.insert(hook.name().to_string(), hook);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn MigrationHooks>> {
        self.hooks.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.hooks.keys().map(String::as_str)
    }
}

/// Requires exactly one instance of the existing schema's root model and
/// points every unset to-one relationship into the root model at it.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingletonRootHook;

impl MigrationHooks for SingletonRootHook {
    fn name(&self) -> &str {
        "singleton_root"
    }

    fn prepare_existing(
        &self,
        migrator: &Migrator,
        existing: &mut Dataset,
    ) -> Result<(), MigrateError> {
        let schema = migrator.existing_schema();
        let Some(root) = schema.root_model() else {
            return Err(MigrateError::Hook {
                hook: self.name().to_string(),
                message: format!("schema '{}' declares no root model", schema.name()),
            });
        };

        let roots: Vec<_> = existing.ids_of(&root.name).collect();
        let [root_id] = roots.as_slice() else {
            return Err(MigrateError::Hook {
                hook: self.name().to_string(),
                message: format!(
                    "existing models must have 1 {} instance, but {} are present",
                    root.name,
                    roots.len()
                ),
            });
        };
        let root_id = *root_id;

        let mut linked = 0usize;
        let ids: Vec<_> = existing.ids().collect();
        for id in ids {
            let Some(model) = schema.model(existing[id].model()) else {
                continue;
            };
            for (attr, rel) in model.related_attributes() {
                if rel.target != root.name || rel.cardinality.is_to_many() {
                    continue;
                }
                let unset = existing[id]
                    .related(&attr.name)
                    .map_or(true, Related::is_empty);
                if unset {
                    existing[id].set_related(&attr.name, Related::One(Some(root_id)));
                    linked += 1;
                }
            }
        }
        debug!(root = %root.name, linked, "linked instances to the root instance");
        Ok(())
    }
}
