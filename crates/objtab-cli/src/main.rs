//! objtab CLI
//!
//! - Checking schema files (`schema check`)
//! - Checking workbooks against a schema (`data check`)
//! - Migrating workbooks between schema versions (`migrate file`, `migrate config`)

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use objtab_core::workbook::{read_dataset, ReadOptions};
use objtab_core::SchemaLoader;

mod migrate;

use migrate::{cmd_migrate_config, cmd_migrate_file, MigrateFileArgs};

#[derive(Parser)]
#[command(name = "objtab")]
#[command(
    author,
    version,
    about = "objtab: schema-described workbooks and their migrations"
)]
struct Cli {
    /// Log at debug level (RUST_LOG overrides).
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Schema file commands.
    Schema {
        #[command(subcommand)]
        command: SchemaCommands,
    },

    /// Workbook commands.
    Data {
        #[command(subcommand)]
        command: DataCommands,
    },

    /// Migrate workbooks from one schema version to the next.
    ///
    /// `file` migrates over a single schema pair given on the command line;
    /// `config` runs every migration of a YAML config, each over a sequence
    /// of schema versions.
    Migrate {
        #[command(subcommand)]
        command: MigrateCommands,
    },
}

#[derive(Subcommand)]
enum SchemaCommands {
    /// Parse and check schema files.
    Check {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[derive(Subcommand)]
enum DataCommands {
    /// Read workbooks against a schema and report instance counts.
    Check {
        #[arg(short, long)]
        schema: PathBuf,
        #[command(flatten)]
        read: ReadArgs,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[derive(Subcommand)]
enum MigrateCommands {
    /// Migrate workbooks from an existing schema to a migrated schema.
    File(MigrateFileArgs),
    /// Run the migrations described by a YAML config.
    Config {
        config: PathBuf,
        /// Print the files each migration would write, without migrating.
        #[arg(long)]
        plan: bool,
    },
}

#[derive(Args, Debug, Clone, Copy)]
pub(crate) struct ReadArgs {
    /// Skip sheets that do not correspond to a model.
    #[arg(long)]
    ignore_extra_sheets: bool,
}

impl ReadArgs {
    pub(crate) fn options(self) -> ReadOptions {
        ReadOptions {
            ignore_extra_sheets: self.ignore_extra_sheets,
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Schema { command } => match command {
            SchemaCommands::Check { files } => cmd_schema_check(&files)?,
        },
        Commands::Data { command } => match command {
            DataCommands::Check {
                schema,
                read,
                files,
            } => cmd_data_check(&schema, read, &files)?,
        },
        Commands::Migrate { command } => match command {
            MigrateCommands::File(args) => cmd_migrate_file(&args)?,
            MigrateCommands::Config { config, plan } => cmd_migrate_config(&config, plan)?,
        },
    }
    Ok(())
}

fn cmd_schema_check(files: &[PathBuf]) -> Result<()> {
    let loader = SchemaLoader::new();
    for file in files {
        let schema = loader
            .load(file)
            .with_context(|| format!("checking {}", file.display()))?;
        let attributes: usize = schema.models().map(|m| m.attributes.len()).sum();
        println!(
            "{} {} schema={} models={} attributes={} digest={}",
            "ok".green().bold(),
            file.display(),
            schema.name(),
            schema.models().count(),
            attributes,
            schema.digest()
        );
    }
    Ok(())
}

fn cmd_data_check(schema_file: &PathBuf, read: ReadArgs, files: &[PathBuf]) -> Result<()> {
    let schema = SchemaLoader::new()
        .load(schema_file)
        .with_context(|| format!("loading schema {}", schema_file.display()))?;
    for file in files {
        let (dataset, sheets) = read_dataset(file, &schema, read.options())
            .with_context(|| format!("reading {}", file.display()))?;
        println!(
            "{} {} sheets={} instances={}",
            "ok".green().bold(),
            file.display(),
            sheets.len(),
            dataset.len()
        );
        for (model, count) in dataset.counts() {
            println!("  {model}: {count}");
        }
    }
    Ok(())
}
