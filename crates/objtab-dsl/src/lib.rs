//! objtab schema language
//!
//! Schemas are plain text files describing tabular models: their attributes,
//! scalar types and the relationships between models. This crate provides the
//! parser + typed AST for the canonical dialect (`schema_v1`) and a stable
//! digest used to tell schema versions apart.
//!
//! The AST is deliberately close to the surface syntax. Semantic checks
//! (dangling targets, duplicate names, default values) belong to the schema
//! registry in `objtab-core`.

pub mod digest;
pub mod schema_v1;
