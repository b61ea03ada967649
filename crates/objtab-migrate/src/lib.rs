//! Schema migration for objtab workbooks.
//!
//! A migration carries a dataset written against one schema version over to
//! the next one:
//!
//! 1. `renames` turns the caller's rename lists into model and attribute maps,
//! 2. `consistency` checks that every mapped pair still has the same shape,
//! 3. `migrator` builds a fresh dataset over the migrated schema,
//! 4. `controller` chains migrators over a sequence of schema versions as
//!    described by a `spec` (usually loaded from YAML).
//!
//! `hooks` lets callers adjust the data before and after each step.

pub mod consistency;
pub mod controller;
pub mod error;
pub mod hooks;
pub mod migrator;
pub mod renames;
pub mod spec;

pub use controller::{MigrationController, SequenceOutcome};
pub use error::MigrateError;
pub use hooks::{HookRegistry, MigrationHooks, SingletonRootHook};
pub use migrator::{Migrator, MigratorBuilder, OutputOptions};
pub use renames::{AttrPath, AttributeRename, ModelRename, RenameMaps};
pub use spec::{MigrationSpec, MigratorKind};
