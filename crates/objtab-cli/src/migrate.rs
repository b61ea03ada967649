//! `objtab migrate ...`

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use std::path::{Path, PathBuf};

use objtab_core::SchemaLoader;
use objtab_migrate::{
    AttributeRename, MigrationController, MigrationSpec, Migrator, MigratorKind, ModelRename,
    OutputOptions,
};

use crate::ReadArgs;

#[derive(Args, Debug)]
pub(crate) struct MigrateFileArgs {
    /// Schema the files were written with.
    #[arg(long)]
    existing_schema: PathBuf,
    /// Schema to migrate the files to.
    #[arg(long)]
    migrated_schema: PathBuf,
    /// `Old=New` model rename (repeatable).
    #[arg(long = "rename-model", value_parser = parse_model_rename)]
    renamed_models: Vec<ModelRename>,
    /// `Old.attr=New.attr` attribute rename (repeatable).
    #[arg(long = "rename-attribute", value_parser = parse_attribute_rename)]
    renamed_attributes: Vec<AttributeRename>,
    /// standard | singleton_root
    #[arg(long, default_value = "standard")]
    migrator: MigratorKind,
    /// Output path (only with a single input file).
    #[arg(short, long)]
    out: Option<PathBuf>,
    /// Suffix for generated output names (default `_migrated`).
    #[arg(long)]
    suffix: Option<String>,
    /// Overwrite the input files.
    #[arg(long, conflicts_with_all = ["out", "suffix"])]
    in_place: bool,
    #[command(flatten)]
    read: ReadArgs,
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

pub(crate) fn parse_model_rename(s: &str) -> Result<ModelRename, String> {
    let (from, to) = s
        .split_once('=')
        .ok_or_else(|| format!("expected Old=New, got '{s}'"))?;
    let (from, to) = (from.trim(), to.trim());
    if from.is_empty() || to.is_empty() {
        return Err(format!("expected Old=New, got '{s}'"));
    }
    Ok((from.to_string(), to.to_string()))
}

fn parse_attr_path(s: &str) -> Option<(String, String)> {
    let (model, attr) = s.trim().split_once('.')?;
    if model.is_empty() || attr.is_empty() {
        return None;
    }
    Some((model.to_string(), attr.to_string()))
}

pub(crate) fn parse_attribute_rename(s: &str) -> Result<AttributeRename, String> {
    let err = || format!("expected Model.attr=Model.attr, got '{s}'");
    let (from, to) = s.split_once('=').ok_or_else(err)?;
    Ok((
        parse_attr_path(from).ok_or_else(err)?,
        parse_attr_path(to).ok_or_else(err)?,
    ))
}

pub(crate) fn cmd_migrate_file(args: &MigrateFileArgs) -> Result<()> {
    if args.out.is_some() && args.files.len() != 1 {
        bail!("--out needs exactly one input file, got {}", args.files.len());
    }

    let loader = SchemaLoader::new();
    let existing = loader
        .load(&args.existing_schema)
        .with_context(|| format!("loading {}", args.existing_schema.display()))?;
    let migrated = loader
        .load(&args.migrated_schema)
        .with_context(|| format!("loading {}", args.migrated_schema.display()))?;

    let mut builder = Migrator::builder(existing, migrated)
        .renamed_models(args.renamed_models.clone())
        .renamed_attributes(args.renamed_attributes.clone())
        .ignore_extra_sheets(args.read.options().ignore_extra_sheets);
    for hook in args.migrator.hooks() {
        builder = builder.hook(hook);
    }
    let migrator = builder.prepare()?;

    let options = OutputOptions {
        migrate_suffix: args.suffix.clone(),
        migrate_in_place: args.in_place,
    };
    let written = match &args.out {
        Some(out) => vec![migrator.full_migrate(&args.files[0], Some(out.as_path()), &options)?],
        None => migrator.run(&args.files, &options)?,
    };
    for (existing_file, path) in args.files.iter().zip(&written) {
        eprintln!(
            "{} {} -> {}",
            "migrated".green().bold(),
            existing_file.display(),
            path.display().to_string().bold()
        );
    }
    Ok(())
}

pub(crate) fn cmd_migrate_config(config: &Path, plan: bool) -> Result<()> {
    if plan {
        let specs = MigrationSpec::load(config)?;
        for spec in &specs {
            println!("{} ({} step(s))", spec.name.bold(), spec.steps());
            let expected = spec.expected_migrated_files();
            for (existing, migrated) in spec.existing_files().iter().zip(&expected) {
                println!("  {} -> {}", existing.display(), migrated.display());
            }
        }
        return Ok(());
    }

    let results = MigrationController::new().migrate_from_config(config)?;
    for (spec, files) in &results {
        for file in files {
            eprintln!(
                "{} {} {}",
                "migrated".green().bold(),
                spec.name,
                file.display().to_string().bold()
            );
        }
    }
    Ok(())
}
