use std::path::PathBuf;

use objtab_dsl::schema_v1::SchemaV1ParseError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to read schema `{}`: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("schema `{origin}`: {source}")]
    Parse {
        origin: String,
        #[source]
        source: SchemaV1ParseError,
    },
    #[error("invalid schema `{origin}`:\n{}", .errors.join("\n"))]
    Invalid { origin: String, errors: Vec<String> },
}

#[derive(Debug, Error)]
pub enum WorkbookError {
    #[error("failed to access workbook `{}`: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed JSON workbook `{}`: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("malformed delimited workbook `{}`: {source}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("unsupported workbook extension for `{}` (expected .json, .csv or .tsv)", .path.display())]
    UnsupportedFormat { path: PathBuf },
    #[error("malformed workbook `{}`: {message}", .path.display())]
    Format { path: PathBuf, message: String },
    #[error("invalid workbook data:\n{}", .errors.join("\n"))]
    Invalid { errors: Vec<String> },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExpressionError {
    #[error("invalid expression '{expression}':\n{}", .errors.join("\n"))]
    Invalid {
        expression: String,
        errors: Vec<String>,
    },
    #[error("expected {expected} token(s) to rebuild the expression, got {got}")]
    TokenCount { expected: usize, got: usize },
}
