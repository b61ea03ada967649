use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use objtab_core::workbook::{read_dataset, write_dataset, ReadOptions};
use objtab_core::{Dataset, Instance, Related, Schema, Value};
use objtab_migrate::{
    HookRegistry, MigrateError, MigrationController, MigrationHooks, MigrationSpec, Migrator,
    OutputOptions,
};

const V1: &str = r#"
schema Cells
root model Model:
  id: string @primary
model Compartment:
  id: string @primary
  volume: float
  model: many_to_one Model as compartments
model Species:
  id: string @primary
  compartment: many_to_one Compartment as species
"#;

const V2: &str = r#"
schema Cells
root model Model:
  id: string @primary
model Location:
  id: string @primary
  size: float
  model: many_to_one Model as compartments
model Species:
  id: string @primary
  compartment: many_to_one Location as species
"#;

fn write(dir: &Path, name: &str, text: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, text).expect("write");
    path
}

fn seed(path: &Path, schema: &Schema, with_model_link: bool) {
    let mut ds = Dataset::new();
    let m = ds.add(Instance::new("Model").with_value("id", Value::str("cell")));
    let c = ds.add(
        Instance::new("Compartment")
            .with_value("id", Value::str("cyto"))
            .with_value("volume", Value::Float(2.5)),
    );
    if with_model_link {
        ds[c].set_related("model", Related::One(Some(m)));
    }
    let s = ds.add(Instance::new("Species").with_value("id", Value::str("atp")));
    ds[s].set_related("compartment", Related::One(Some(c)));
    let order: Vec<String> = ["Model", "Compartment", "Species"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    write_dataset(path, &ds, &order, schema).expect("seed");
}

fn renamed_migrator(v1: Arc<Schema>, v2: Arc<Schema>) -> Migrator {
    Migrator::builder(v1, v2)
        .renamed_models(vec![("Compartment".to_string(), "Location".to_string())])
        .renamed_attributes(vec![(
            ("Compartment".to_string(), "volume".to_string()),
            ("Location".to_string(), "size".to_string()),
        )])
        .prepare()
        .expect("migrator")
}

#[test]
fn full_migrate_writes_next_to_the_existing_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let v1 = Arc::new(Schema::parse(V1, None).expect("v1"));
    let v2 = Arc::new(Schema::parse(V2, None).expect("v2"));
    let existing = dir.path().join("cells.csv");
    seed(&existing, &v1, true);

    let migrator = renamed_migrator(v1, Arc::clone(&v2));
    let written = migrator
        .full_migrate(&existing, None, &OutputOptions::default())
        .expect("migrate");
    assert_eq!(written, dir.path().join("cells_migrated.csv"));

    let (ds, sheets) = read_dataset(&written, &v2, ReadOptions::default()).expect("read");
    assert_eq!(sheets, vec!["Model", "Location", "Species"]);
    let loc = ds.find_by_primary_key(&v2, "Location", "cyto").expect("cyto");
    assert_eq!(ds[loc].value("size"), Some(&Value::Float(2.5)));
    let atp = ds.find_by_primary_key(&v2, "Species", "atp").expect("atp");
    assert_eq!(ds[atp].related("compartment"), Some(&Related::One(Some(loc))));
}

#[test]
fn refuses_to_overwrite_unless_in_place() {
    let dir = tempfile::tempdir().expect("tempdir");
    let v1 = Arc::new(Schema::parse(V1, None).expect("v1"));
    let v2 = Arc::new(Schema::parse(V2, None).expect("v2"));
    let existing = dir.path().join("cells.json");
    seed(&existing, &v1, true);
    let taken = write(dir.path(), "cells_migrated.json", "{}");

    let migrator = renamed_migrator(v1, Arc::clone(&v2));
    let err = migrator
        .full_migrate(&existing, None, &OutputOptions::default())
        .expect_err("exists");
    assert!(matches!(&err, MigrateError::FileExists(p) if *p == taken), "err={err}");
    assert_eq!(fs::read_to_string(&taken).expect("read"), "{}");

    let in_place = OutputOptions {
        migrate_suffix: None,
        migrate_in_place: true,
    };
    let written = migrator
        .full_migrate(&existing, None, &in_place)
        .expect("in place");
    assert_eq!(written, existing);
    let (ds, _) = read_dataset(&existing, &v2, ReadOptions::default()).expect("read");
    assert_eq!(ds.count_of("Location"), 1);
}

#[test]
fn run_migrates_each_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let v1 = Arc::new(Schema::parse(V1, None).expect("v1"));
    let v2 = Arc::new(Schema::parse(V2, None).expect("v2"));
    let a = dir.path().join("a.json");
    let b = dir.path().join("b.tsv");
    seed(&a, &v1, true);
    seed(&b, &v1, false);

    let migrator = renamed_migrator(v1, v2);
    let options = OutputOptions {
        migrate_suffix: Some("_v2".to_string()),
        migrate_in_place: false,
    };
    let written = migrator.run(&[a, b], &options).expect("run");
    assert_eq!(
        written,
        vec![dir.path().join("a_v2.json"), dir.path().join("b_v2.tsv")]
    );
    assert!(written.iter().all(|p| p.exists()));
}

#[test]
fn singleton_root_config_links_orphans_to_the_root() {
    let dir = tempfile::tempdir().expect("tempdir");
    write(dir.path(), "v1.schema", V1);
    write(dir.path(), "v2.schema", V2);
    let v1 = Schema::parse(V1, None).expect("v1");
    seed(&dir.path().join("cells.json"), &v1, false);
    let config = write(
        dir.path(),
        "migrations.yaml",
        r#"
cells:
  migrator: singleton_root
  existing_files: [cells.json]
  schema_files: [v1.schema, v2.schema]
  seq_of_renamed_models: [[[Compartment, Location]]]
  seq_of_renamed_attributes: [[[[Compartment, volume], [Location, size]]]]
  migrated_files: [out/cells.json]
"#,
    );
    fs::create_dir(dir.path().join("out")).expect("mkdir");

    let controller = MigrationController::new();
    let results = controller.migrate_from_config(&config).expect("migrate");
    assert_eq!(results.len(), 1);
    let (spec, files) = &results[0];
    assert_eq!(spec.name, "cells");
    assert_eq!(files, &spec.expected_migrated_files());

    let v2 = controller
        .loader()
        .load(&dir.path().join("v2.schema"))
        .expect("v2");
    let (ds, _) = read_dataset(&files[0], &v2, ReadOptions::default()).expect("read");
    let root = ds.find_by_primary_key(&v2, "Model", "cell").expect("root");
    let loc = ds.find_by_primary_key(&v2, "Location", "cyto").expect("loc");
    assert_eq!(ds[loc].related("model"), Some(&Related::One(Some(root))));
}

struct Stamp;

impl MigrationHooks for Stamp {
    fn name(&self) -> &str {
        "stamp"
    }

    fn modify_migrated(&self, migrator: &Migrator, migrated: &mut Dataset) -> Result<(), MigrateError> {
        let schema = migrator.migrated_schema();
        let ids: Vec<_> = migrated.ids_of("Location").collect();
        for id in ids {
            if migrated.primary_key(schema, id).is_some() {
                migrated[id].set_value("size", Value::Float(9.0));
            }
        }
        Ok(())
    }
}

#[test]
fn registered_transformations_run_after_migration() {
    let dir = tempfile::tempdir().expect("tempdir");
    let v1_path = write(dir.path(), "v1.schema", V1);
    let v2_path = write(dir.path(), "v2.schema", V2);
    let v1 = Schema::parse(V1, None).expect("v1");
    let existing = dir.path().join("cells.json");
    seed(&existing, &v1, true);

    let mut spec = MigrationSpec::new("stamped");
    spec.migrator = Some("standard".to_string());
    spec.existing_files = Some(vec![existing]);
    spec.schema_files = Some(vec![v1_path, v2_path]);
    spec.seq_of_renamed_models = Some(vec![Some(vec![(
        "Compartment".to_string(),
        "Location".to_string(),
    )])]);
    spec.seq_of_transformations = Some(vec![Some("stamp".to_string())]);
    spec.prepare().expect("prepare");

    let unregistered = MigrationController::new()
        .migrate_from_spec(&spec)
        .expect_err("unregistered");
    assert!(
        unregistered.to_string().contains("transformation 'stamp' of migration 1 is not registered"),
        "err={unregistered}"
    );

    let mut hooks = HookRegistry::new();
    hooks.register(Arc::new(Stamp));
    let controller = MigrationController::with_hooks(hooks);
    let outcome = controller.migrate_over_schema_sequence(&spec).expect("migrate");
    let final_ds = &outcome.datasets[0][0];
    let v2 = controller.loader().load(&dir.path().join("v2.schema")).expect("v2");
    let loc = final_ds
        .find_by_primary_key(&v2, "Location", "cyto")
        .expect("loc");
    assert_eq!(final_ds[loc].value("size"), Some(&Value::Float(9.0)));
}

#[test]
fn unprepared_spec_is_rejected() {
    let spec = MigrationSpec::new("raw");
    let err = MigrationController::new()
        .migrate_from_spec(&spec)
        .expect_err("unprepared");
    assert!(err.to_string().contains("MigrationSpec 'raw' is not prepared"), "err={err}");
}

const V3: &str = r#"
schema Cells
root model Model:
  id: string @primary
model Location:
  id: string @primary
  size: float
  model: many_to_one Model as compartments
"#;

#[test]
fn later_step_may_delete_a_model() {
    let dir = tempfile::tempdir().expect("tempdir");
    write(dir.path(), "v1.schema", V1);
    write(dir.path(), "v2.schema", V2);
    write(dir.path(), "v3.schema", V3);
    let v1 = Schema::parse(V1, None).expect("v1");
    seed(&dir.path().join("cells.csv"), &v1, true);
    let config = write(
        dir.path(),
        "migrations.yaml",
        r#"
cells:
  migrator: standard
  existing_files: [cells.csv]
  schema_files: [v1.schema, v2.schema, v3.schema]
  seq_of_renamed_models: [[[Compartment, Location]], null]
  seq_of_renamed_attributes: [[[[Compartment, volume], [Location, size]]], null]
"#,
    );

    let controller = MigrationController::new();
    let results = controller.migrate_from_config(&config).expect("migrate");
    let (_, files) = &results[0];
    assert_eq!(files, &vec![dir.path().join("cells_migrated.csv")]);

    let v3 = controller
        .loader()
        .load(&dir.path().join("v3.schema"))
        .expect("v3");
    let (ds, sheets) = read_dataset(&files[0], &v3, ReadOptions::default()).expect("read");
    assert_eq!(sheets, vec!["Model", "Location"]);
    assert_eq!(ds.count_of("Species"), 0);
    let root = ds.find_by_primary_key(&v3, "Model", "cell").expect("root");
    let loc = ds.find_by_primary_key(&v3, "Location", "cyto").expect("loc");
    assert_eq!(ds[loc].value("size"), Some(&Value::Float(2.5)));
    assert_eq!(ds[loc].related("model"), Some(&Related::One(Some(root))));
}
