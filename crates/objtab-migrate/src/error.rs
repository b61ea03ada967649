use std::path::PathBuf;

use objtab_core::{ExpressionError, SchemaError, WorkbookError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrateError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Workbook(#[from] WorkbookError),
    #[error(transparent)]
    Expression(#[from] ExpressionError),
    #[error("invalid renaming:\n{}", .0.join("\n"))]
    Renames(Vec<String>),
    #[error("existing and migrated schemas are inconsistent:\n{}", .0.join("\n"))]
    Inconsistent(Vec<String>),
    #[error("{}", .0.join("\n"))]
    Data(Vec<String>),
    #[error("{0}")]
    ModelOrder(String),
    #[error("migrated file '{}' already exists", .0.display())]
    FileExists(PathBuf),
    #[error("invalid migration spec '{name}':\n{}", .errors.join("\n"))]
    Spec { name: String, errors: Vec<String> },
    #[error("failed to read migration config `{}`: {message}", .path.display())]
    Config { path: PathBuf, message: String },
    #[error("transformation '{hook}' failed: {message}")]
    Hook { hook: String, message: String },
}
