//! Integration tests for the complete objtab pipeline
//!
//! These tests verify end-to-end functionality across crates:
//! - schema text -> `schema_v1` module -> checked `Schema`
//! - workbook files -> datasets -> migrated datasets -> workbook files
//! - YAML migration configs over sequences of schema versions
//!
//! Run with: cargo test --test integration_tests

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use objtab_core::expression::ExpressionContext;
use objtab_core::workbook::{read_dataset, write_dataset, ReadOptions, Workbook};
use objtab_core::{Dataset, Instance, Related, ScalarType, Schema, SchemaLoader, Value};
use objtab_migrate::{MigrateError, MigrationController, MigrationHooks, Migrator, OutputOptions};
use tempfile::tempdir;

fn schema(text: &str) -> Arc<Schema> {
    Arc::new(Schema::parse(text, None).expect("schema"))
}

fn names(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn write(dir: &Path, name: &str, text: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, text).expect("write");
    path
}

// ============================================================================
// Schema text -> Schema
// ============================================================================

#[test]
fn test_schema_digest_matches_dsl_digest() {
    use objtab_dsl::digest::schema_digest_v1;

    let text = "schema Tiny\nmodel A:\n  id: string @primary\n";
    let s = Schema::parse(text, None).expect("schema");
    assert_eq!(s.name(), "Tiny");
    assert_eq!(s.digest(), schema_digest_v1(text));
}

// ============================================================================
// Round trip and no-op migrations
// ============================================================================

const FOO_BAR: &str = r#"
schema Pair
model Foo:
  id: string @primary
  x: int
  label: string
  bar: many_to_one Bar as foos
model Bar:
  id: string @primary
  tags: json
"#;

const BAZ_BAR: &str = r#"
schema Pair
model Baz:
  id: string @primary
  x: int
  name: string
  bar: many_to_one Bar as foos
model Bar:
  id: string @primary
  tags: json
"#;

fn foo_bar_dataset() -> Dataset {
    let tags = Value::parse_cell(&ScalarType::Json, r#"{"k": [1, 2]}"#)
        .expect("json")
        .expect("set");
    let mut ds = Dataset::new();
    let b = ds.add(
        Instance::new("Bar")
            .with_value("id", Value::str("b1"))
            .with_value("tags", tags),
    );
    for (id, x) in [("f1", 1), ("f2", 2)] {
        let f = ds.add(
            Instance::new("Foo")
                .with_value("id", Value::str(id))
                .with_value("x", Value::Int(x))
                .with_value("label", Value::str("hello")),
        );
        ds[f].set_related("bar", Related::One(Some(b)));
    }
    ds
}

#[test]
fn test_round_trip_through_renames_is_identity() {
    let a = schema(FOO_BAR);
    let b = schema(BAZ_BAR);

    let forward = Migrator::builder(Arc::clone(&a), Arc::clone(&b))
        .renamed_models(vec![("Foo".into(), "Baz".into())])
        .renamed_attributes(vec![(("Foo".into(), "label".into()), ("Baz".into(), "name".into()))])
        .prepare()
        .expect("forward");
    let backward = Migrator::builder(b, a)
        .renamed_models(vec![("Baz".into(), "Foo".into())])
        .renamed_attributes(vec![(("Baz".into(), "name".into()), ("Foo".into(), "label".into()))])
        .prepare()
        .expect("backward");

    let original = foo_bar_dataset();
    let migrated = forward.migrate(&original).expect("migrate");
    assert_eq!(migrated.count_of("Baz"), 2);
    assert_eq!(migrated.count_of("Foo"), 0);

    let back = backward.migrate(&migrated).expect("migrate back");
    assert_eq!(back, original);
}

#[test]
fn test_migrate_leaves_existing_dataset_untouched() {
    let a = schema(FOO_BAR);
    let migrator = Migrator::builder(Arc::clone(&a), a).prepare().expect("migrator");
    let original = foo_bar_dataset();
    let snapshot = original.clone();
    let migrated = migrator.migrate(&original).expect("migrate");
    assert_eq!(original, snapshot);
    assert_eq!(migrated, original);
}

#[test]
fn test_noop_migration_rewrites_identical_files() {
    let dir = tempdir().expect("tempdir");
    let path = write(dir.path(), "pair.schema", FOO_BAR);
    let loader = SchemaLoader::new();
    let s = loader.load(&path).expect("load");
    let order: Vec<String> = s.models().map(|m| m.name.clone()).collect();

    let migrator = Migrator::builder(Arc::clone(&s), Arc::clone(&s))
        .prepare()
        .expect("migrator");
    for name in ["pair.json", "pair.csv", "pair.tsv"] {
        let existing = dir.path().join(name);
        write_dataset(&existing, &foo_bar_dataset(), &order, &s).expect("seed");
        let migrated = migrator
            .full_migrate(&existing, None, &OutputOptions::default())
            .expect("migrate");
        assert_ne!(migrated, existing);
        assert_eq!(
            fs::read(&migrated).expect("migrated"),
            fs::read(&existing).expect("existing"),
            "{name}"
        );
    }
}

// ============================================================================
// Deleted models
// ============================================================================

const WITH_GONE: &str = r#"
model Foo:
  id: string @primary
  gone: many_to_one Gone as foos
model Gone:
  id: string @primary
"#;

#[test]
fn test_deleted_model_instances_and_references_disappear() {
    let existing = schema(WITH_GONE);
    let migrated = schema("model Foo:\n  id: string @primary\n");
    let migrator = Migrator::builder(existing, migrated).prepare().expect("migrator");
    assert!(migrator.deleted_models().contains("Gone"));

    let mut ds = Dataset::new();
    let g = ds.add(Instance::new("Gone").with_value("id", Value::str("g")));
    let f = ds.add(Instance::new("Foo").with_value("id", Value::str("f")));
    ds[f].set_related("gone", Related::One(Some(g)));

    let out = migrator.migrate(&ds).expect("migrate");
    assert_eq!(out.len(), 1);
    assert_eq!(out.count_of("Gone"), 0);
    let (_, foo) = out.iter().next().expect("foo");
    assert_eq!(foo.relations().count(), 0);
}

#[test]
fn test_migrated_reference_to_deleted_model_is_inconsistent() {
    let existing = schema(WITH_GONE);
    let migrated = schema(
        "model Foo:\n  id: string @primary\n  gone: many_to_one Other as foos\nmodel Other:\n  id: string @primary\n",
    );
    let err = Migrator::builder(existing, migrated)
        .prepare()
        .expect_err("inconsistent");
    assert!(
        err.to_string()
            .contains("existing model 'Gone' is not migrated, but is referenced by migrated attribute Foo.gone"),
        "err={err}"
    );
}

// ============================================================================
// Rename validation
// ============================================================================

#[test]
fn test_rename_validation_reports_every_defect() {
    let err = Migrator::builder(schema(FOO_BAR), schema(BAZ_BAR))
        .renamed_models(vec![
            ("Nope".into(), "Baz".into()),
            ("Foo".into(), "Baz".into()),
        ])
        .renamed_attributes(vec![(("Foo".into(), "x".into()), ("Bar".into(), "id".into()))])
        .prepare()
        .expect_err("invalid");
    let MigrateError::Renames(errors) = err else {
        panic!("expected rename errors, got {err}");
    };
    assert!(errors.len() >= 3, "errors={errors:?}");
    assert!(errors.iter().any(|e| e.contains("'Nope'")));
    assert!(errors.iter().any(|e| e.contains("duplicated migrated models")));
    assert!(errors.iter().any(|e| e.contains("not consistent with renamed models")));
}

// ============================================================================
// Expressions
// ============================================================================

#[test]
fn test_expression_rewriting_is_precise() {
    let a = schema(
        "model Foo:\n  id: string @primary\nmodel Bar:\n  id: string @primary\nmodel F:\n  id: string @primary\n  e: expression(Foo, Bar)\n",
    );
    let b = schema(
        "model Baz:\n  id: string @primary\nmodel Bar:\n  id: string @primary\nmodel F:\n  id: string @primary\n  e: expression(Baz, Bar)\n",
    );
    let migrator = Migrator::builder(a, b)
        .renamed_models(vec![("Foo".into(), "Baz".into())])
        .prepare()
        .expect("migrator");
    let ctx = ExpressionContext::new(["Foo", "Bar"]);

    assert_eq!(
        migrator.migrate_expression("Foo.x + Bar.y", &ctx).expect("rewrite"),
        Some("Baz.x + Bar.y".to_string())
    );
    assert_eq!(
        migrator.migrate_expression("max( Foo.x ,2)*Bar.y", &ctx).expect("rewrite"),
        Some("max( Baz.x ,2)*Bar.y".to_string())
    );
    assert_eq!(migrator.migrate_expression("Bar.y * 2", &ctx).expect("rewrite"), None);
}

// ============================================================================
// Duplicate identifiers
// ============================================================================

struct DuplicateFoo;

impl MigrationHooks for DuplicateFoo {
    fn name(&self) -> &str {
        "duplicate_foo"
    }

    fn prepare_existing(&self, _migrator: &Migrator, existing: &mut Dataset) -> Result<(), MigrateError> {
        existing.add(Instance::new("Foo").with_value("id", Value::str("f1")));
        Ok(())
    }
}

#[test]
fn test_duplicate_identifiers_abort_before_writing() {
    let dir = tempdir().expect("tempdir");
    let a = schema(FOO_BAR);
    let b = schema(BAZ_BAR);
    let existing = dir.path().join("pair.json");
    write_dataset(&existing, &foo_bar_dataset(), &names(&["Foo", "Bar"]), &a).expect("seed");

    let migrator = Migrator::builder(a, b)
        .renamed_models(vec![("Foo".into(), "Baz".into())])
        .hook(Arc::new(DuplicateFoo))
        .prepare()
        .expect("migrator");
    let err = migrator
        .full_migrate(&existing, None, &OutputOptions::default())
        .expect_err("duplicate");
    assert!(
        err.to_string().contains("model type 'Baz' has duplicated id: 'f1'"),
        "err={err}"
    );
    assert!(!dir.path().join("pair_migrated.json").exists());
}

// ============================================================================
// Schema sequences
// ============================================================================

const SEQ_V1: &str = r#"
schema Network
model Compartment:
  id: string @primary
model Species:
  id: string @primary
  compartment: many_to_one Compartment as species
model Reaction:
  id: string @primary
  participants: many_to_many Species as reactions
"#;

const SEQ_V2: &str = r#"
schema Network
model Compartment:
  id: string @primary
model Metabolite:
  id: string @primary
  compartment: many_to_one Compartment as species
model Reaction:
  id: string @primary
  participants: many_to_many Metabolite as reactions
model Parameter:
  id: string @primary
  value: float
"#;

const SEQ_V3: &str = r#"
schema Network
model Compartment:
  id: string @primary
model Metabolite:
  id: string @primary
  compartment: many_to_one Compartment as species
model Reaction:
  id: string @primary
  participants: many_to_many Metabolite as reactions
model Parameter:
  id: string @primary
  value: float
model Note:
  id: string @primary
model Author:
  id: string @primary
"#;

#[test]
fn test_sheet_order_is_threaded_through_a_schema_sequence() {
    let dir = tempdir().expect("tempdir");
    write(dir.path(), "v1.schema", SEQ_V1);
    write(dir.path(), "v2.schema", SEQ_V2);
    write(dir.path(), "v3.schema", SEQ_V3);

    let v1 = schema(SEQ_V1);
    let mut ds = Dataset::new();
    let c = ds.add(Instance::new("Compartment").with_value("id", Value::str("c")));
    let s1 = ds.add(Instance::new("Species").with_value("id", Value::str("atp")));
    let s2 = ds.add(Instance::new("Species").with_value("id", Value::str("adp")));
    ds[s1].set_related("compartment", Related::One(Some(c)));
    ds[s2].set_related("compartment", Related::One(Some(c)));
    let r = ds.add(Instance::new("Reaction").with_value("id", Value::str("hydrolysis")));
    ds[r].set_related("participants", Related::Many(vec![s1, s2]));
    write_dataset(
        &dir.path().join("net.json"),
        &ds,
        &names(&["Reaction", "Species", "Compartment"]),
        &v1,
    )
    .expect("seed");

    let config = write(
        dir.path(),
        "migrations.yaml",
        r#"
network:
  migrator: standard
  existing_files: [net.json]
  schema_files: [v1.schema, v2.schema, v3.schema]
  seq_of_renamed_models: [[[Species, Metabolite]], null]
"#,
    );

    let controller = MigrationController::new();
    let results = controller.migrate_from_config(&config).expect("migrate");
    let (_, files) = &results[0];
    assert_eq!(files.len(), 1);
    let written = &files[0];
    assert_eq!(written.file_name().and_then(|n| n.to_str()), Some("net_migrated.json"));

    let workbook = Workbook::load(written).expect("load");
    assert_eq!(
        workbook.sheet_names(),
        names(&["Reaction", "Metabolite", "Compartment", "Parameter", "Author", "Note"])
    );

    let v3 = controller.loader().load(&dir.path().join("v3.schema")).expect("v3");
    assert_eq!(workbook.schema_digest, v3.digest());
    let (out, _) = read_dataset(written, &v3, ReadOptions::default()).expect("read");
    let reaction = out
        .find_by_primary_key(&v3, "Reaction", "hydrolysis")
        .expect("reaction");
    assert_eq!(out[reaction].targets("participants").len(), 2);

    // Only the last step writes.
    let mut entries: Vec<String> = fs::read_dir(dir.path())
        .expect("read_dir")
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    entries.sort();
    assert_eq!(
        entries,
        names(&[
            "migrations.yaml",
            "net.json",
            "net_migrated.json",
            "v1.schema",
            "v2.schema",
            "v3.schema"
        ])
    );
}
