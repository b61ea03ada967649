//! Attribute values and their single-cell text codec.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::schema::{CopyStrategy, ScalarType};

/// A term from a controlled vocabulary, e.g. `SBO:0000027 ! Michaelis constant`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OntologyTerm {
    pub ontology: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl OntologyTerm {
    pub fn parse(text: &str) -> Result<OntologyTerm, String> {
        let (curie, label) = match text.split_once('!') {
            Some((curie, label)) => (curie.trim(), Some(label.trim().to_string())),
            None => (text.trim(), None),
        };
        let Some((ontology, id)) = curie.split_once(':') else {
            return Err(format!("'{curie}' is not an ONTOLOGY:ID term"));
        };
        let (ontology, id) = (ontology.trim(), id.trim());
        if ontology.is_empty() || id.is_empty() || ontology.contains(char::is_whitespace) {
            return Err(format!("'{curie}' is not an ONTOLOGY:ID term"));
        }
        Ok(OntologyTerm {
            ontology: ontology.to_string(),
            id: id.to_string(),
            label: label.filter(|l| !l.is_empty()),
        })
    }
}

impl fmt::Display for OntologyTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ontology, self.id)?;
        if let Some(label) = &self.label {
            write!(f, " ! {label}")?;
        }
        Ok(())
    }
}

/// A scalar attribute value. Heap-backed variants sit behind `Arc` so a
/// migrated instance can either share the storage or own a structural copy.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(Arc<str>),
    Int(i64),
    Float(f64),
    Bool(bool),
    Enum(Arc<str>),
    Json(Arc<serde_json::Value>),
    Term(Arc<OntologyTerm>),
    Expr(Arc<str>),
}

impl Value {
    pub fn str(s: &str) -> Value {
        Value::Str(Arc::from(s))
    }

    /// Parse one text cell against a scalar type. An empty cell is "unset".
    pub fn parse_cell(ty: &ScalarType, cell: &str) -> Result<Option<Value>, String> {
        if cell.trim().is_empty() {
            return Ok(None);
        }
        let value = match ty {
            ScalarType::String => Value::Str(Arc::from(cell)),
            ScalarType::Expression(_) => Value::Expr(Arc::from(cell.trim())),
            ScalarType::Integer => {
                let t = cell.trim();
                Value::Int(
                    t.parse::<i64>()
                        .map_err(|_| format!("'{t}' is not an integer"))?,
                )
            }
            ScalarType::Float => {
                let t = cell.trim();
                Value::Float(t.parse::<f64>().map_err(|_| format!("'{t}' is not a float"))?)
            }
            ScalarType::Boolean => match cell.trim().to_ascii_lowercase().as_str() {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                other => return Err(format!("'{other}' is not a boolean (true/false)")),
            },
            ScalarType::Enum(members) => {
                let t = cell.trim();
                if !members.iter().any(|m| m == t) {
                    return Err(format!(
                        "'{t}' is not one of {}",
                        members.join(", ")
                    ));
                }
                Value::Enum(Arc::from(t))
            }
            ScalarType::Json => {
                let parsed: serde_json::Value = serde_json::from_str(cell)
                    .map_err(|err| format!("invalid JSON: {err}"))?;
                Value::Json(Arc::new(parsed))
            }
            ScalarType::OntologyTerm => Value::Term(Arc::new(OntologyTerm::parse(cell)?)),
        };
        Ok(Some(value))
    }

    /// Inverse of `parse_cell` for a set value.
    pub fn to_cell(&self) -> String {
        match self {
            Value::Str(s) | Value::Enum(s) | Value::Expr(s) => s.to_string(),
            Value::Int(i) => i.to_string(),
            // Debug keeps a fractional part (`1.0`) and round-trips exactly.
            Value::Float(x) => format!("{x:?}"),
            Value::Bool(b) => b.to_string(),
            Value::Json(v) => v.to_string(),
            Value::Term(t) => t.to_string(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) | Value::Enum(s) | Value::Expr(s) => Some(&**s),
            _ => None,
        }
    }

    pub fn conforms_to(&self, ty: &ScalarType) -> bool {
        match (self, ty) {
            (Value::Str(_), ScalarType::String)
            | (Value::Int(_), ScalarType::Integer)
            | (Value::Float(_), ScalarType::Float)
            | (Value::Bool(_), ScalarType::Boolean)
            | (Value::Json(_), ScalarType::Json)
            | (Value::Term(_), ScalarType::OntologyTerm)
            | (Value::Expr(_), ScalarType::Expression(_)) => true,
            (Value::Enum(v), ScalarType::Enum(members)) => members.iter().any(|m| **m == **v),
            _ => false,
        }
    }

    /// Copy a value for a migrated instance.
    pub fn copy_with(&self, strategy: CopyStrategy) -> Value {
        match (strategy, self) {
            (CopyStrategy::Share, v) => v.clone(),
            (CopyStrategy::Deep, Value::Json(v)) => Value::Json(Arc::new((**v).clone())),
            (CopyStrategy::Deep, Value::Term(t)) => Value::Term(Arc::new((**t).clone())),
            (CopyStrategy::Deep, Value::Str(s)) => Value::Str(Arc::from(&**s)),
            (CopyStrategy::Deep, Value::Enum(s)) => Value::Enum(Arc::from(&**s)),
            (CopyStrategy::Deep, Value::Expr(s)) => Value::Expr(Arc::from(&**s)),
            (CopyStrategy::Deep, v) => v.clone(),
        }
    }

    /// Whether two values point at the same heap storage.
    pub fn shares_storage_with(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Str(a), Value::Str(b))
            | (Value::Enum(a), Value::Enum(b))
            | (Value::Expr(a), Value::Expr(b)) => Arc::ptr_eq(a, b),
            (Value::Json(a), Value::Json(b)) => Arc::ptr_eq(a, b),
            (Value::Term(a), Value::Term(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}
