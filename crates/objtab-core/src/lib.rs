//! objtab core model
//!
//! - `schema`: the checked type registry built from a `schema_v1` module
//! - `loader`: cached, identity-stable schema loading
//! - `value` / `dataset`: attribute values and the instance graph
//! - `expression`: tokenizer for expression attributes
//! - `workbook`: tabular files (JSON and delimited text) to and from datasets

pub mod dataset;
pub mod error;
pub mod expression;
pub mod loader;
pub mod schema;
pub mod value;
pub mod workbook;

pub use dataset::{Dataset, Instance, InstanceId, Related};
pub use error::{ExpressionError, SchemaError, WorkbookError};
pub use loader::SchemaLoader;
pub use schema::{
    AttributeDef, AttributeKind, Cardinality, CopyStrategy, ModelCategory, ModelDef,
    Relationship, ScalarType, Schema,
};
pub use value::{OntologyTerm, Value};
