//! Schema dialect: `schema_v1`
//!
//! A schema file is a list of model blocks. Each block header names a model
//! and each indented line below it declares one attribute:
//!
//! ```text
//! schema Metabolism
//!
//! root model Model:
//!   id: string @primary
//!
//! model Species:
//!   id: string @primary
//!   compartment: many_to_one Compartment as species @required
//!   identifier: onto_term
//!   mass: float = 0.0
//! ```
//!
//! Notes:
//! - Indentation is not significant; a block ends at the next header.
//! - Comments start with `#` or `--` and run to the end of the line.
//! - The parser stays syntactic. Whether a relationship target exists, or a
//!   default parses for its type, is checked when a registry is built.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char as pchar, multispace0, multispace1},
    combinator::{all_consuming, map, opt, recognize, value},
    multi::separated_list1,
    sequence::{delimited, preceded, tuple},
    IResult,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Name = String;

// ============================================================================
// AST
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaV1Module {
    pub schema_name: Name,
    pub models: Vec<ModelDeclV1>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelDeclV1 {
    pub name: Name,
    /// `root model X:` marks the model whose single instance anchors a dataset.
    pub root: bool,
    pub attributes: Vec<AttributeDeclV1>,
    pub line: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttributeDeclV1 {
    pub name: Name,
    pub ty: AttrTypeV1,
    /// Default literal, unquoted. Interpreted against `ty` by the registry.
    pub default: Option<String>,
    pub annotations: Vec<AnnotationV1>,
    pub line: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "tag", rename_all = "snake_case")]
pub enum AttrTypeV1 {
    Scalar {
        ty: ScalarTypeV1,
    },
    Related {
        cardinality: CardinalityV1,
        target: Name,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        inverse: Option<Name>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScalarTypeV1 {
    String,
    Int,
    Float,
    Bool,
    Json,
    OntoTerm,
    Enum(Vec<Name>),
    /// Expression text over the listed context models.
    Expression(Vec<Name>),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CardinalityV1 {
    OneToOne,
    ManyToOne,
    OneToMany,
    ManyToMany,
}

impl CardinalityV1 {
    pub fn keyword(self) -> &'static str {
        match self {
            CardinalityV1::OneToOne => "one_to_one",
            CardinalityV1::ManyToOne => "many_to_one",
            CardinalityV1::OneToMany => "one_to_many",
            CardinalityV1::ManyToMany => "many_to_many",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationV1 {
    Primary,
    Required,
    ShareRefs,
}

impl AttributeDeclV1 {
    pub fn has(&self, annotation: AnnotationV1) -> bool {
        self.annotations.contains(&annotation)
    }
}

// ============================================================================
// Parser
// ============================================================================

#[derive(Debug, Error)]
pub enum SchemaV1ParseError {
    #[error("parse error on line {line}: {message}")]
    Line { line: usize, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    Model(usize),
}

pub fn parse_schema_v1(text: &str) -> Result<SchemaV1Module, SchemaV1ParseError> {
    let mut module = SchemaV1Module {
        schema_name: "Unnamed".to_string(),
        models: vec![],
    };

    let mut section = Section::None;
    let mut saw_schema_header = false;

    for (i, raw) in text.lines().enumerate() {
        let line_no = i + 1;
        let line = strip_comment(raw).trim();
        if line.is_empty() {
            continue;
        }

        // ------------------------------------------------------------------
        // Headers
        // ------------------------------------------------------------------
        if let Some(rest) = line.strip_prefix("schema ").map(str::trim) {
            if saw_schema_header {
                return Err(SchemaV1ParseError::Line {
                    line: line_no,
                    message: "duplicate `schema` header".to_string(),
                });
            }
            if !module.models.is_empty() {
                return Err(SchemaV1ParseError::Line {
                    line: line_no,
                    message: "`schema` header must precede all models".to_string(),
                });
            }
            let name = parse_header_name(rest, "schema header expects: `schema <Name>`")
                .map_err(|message| SchemaV1ParseError::Line {
                    line: line_no,
                    message,
                })?;
            module.schema_name = name;
            saw_schema_header = true;
            continue;
        }

        let header = line
            .strip_prefix("root model ")
            .map(|rest| (true, rest))
            .or_else(|| line.strip_prefix("model ").map(|rest| (false, rest)));
        if let Some((root, rest)) = header {
            let name = parse_header_name(rest, "model header expects: `[root] model <Name>:`")
                .map_err(|message| SchemaV1ParseError::Line {
                    line: line_no,
                    message,
                })?;
            module.models.push(ModelDeclV1 {
                name,
                root,
                attributes: vec![],
                line: line_no,
            });
            section = Section::Model(module.models.len() - 1);
            continue;
        }

        // ------------------------------------------------------------------
        // Model bodies
        // ------------------------------------------------------------------
        match section {
            Section::Model(model_index) => {
                let attribute = parse_attribute_decl(line, line_no).map_err(|message| {
                    SchemaV1ParseError::Line {
                        line: line_no,
                        message,
                    }
                })?;
                module.models[model_index].attributes.push(attribute);
            }
            Section::None => {
                return Err(SchemaV1ParseError::Line {
                    line: line_no,
                    message: "line outside any model".to_string(),
                });
            }
        }
    }

    Ok(module)
}

fn strip_comment(line: &str) -> &str {
    if let Some((before, _)) = line.split_once('#') {
        return before;
    }
    line.split_once("--").map(|(a, _)| a).unwrap_or(line)
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn parse_ident(input: &str) -> IResult<&str, &str> {
    recognize(tuple((
        take_while1(is_ident_start),
        take_while(is_ident_continue),
    )))(input)
}

fn parse_header_name(rest: &str, usage: &str) -> Result<Name, String> {
    fn parser(input: &str) -> IResult<&str, Name> {
        let (input, name) = parse_ident(input)?;
        let (input, _) = multispace0(input)?;
        let (input, _) = opt(pchar(':'))(input)?;
        let (input, _) = multispace0(input)?;
        Ok((input, name.to_string()))
    }

    all_consuming(parser)(rest.trim())
        .map(|(_, v)| v)
        .map_err(|_| usage.to_string())
}

fn parse_annotation(word: &str) -> Result<AnnotationV1, String> {
    match word {
        "primary" => Ok(AnnotationV1::Primary),
        "required" => Ok(AnnotationV1::Required),
        "share_refs" => Ok(AnnotationV1::ShareRefs),
        other => Err(format!(
            "unknown annotation `@{other}` (expected @primary, @required or @share_refs)"
        )),
    }
}

/// Split trailing ` @word` annotations off an attribute line.
fn split_annotations(line: &str) -> Result<(&str, Vec<AnnotationV1>), String> {
    let mut rest = line.trim_end();
    let mut annotations = Vec::new();
    while let Some(at) = rest.rfind('@') {
        let word = rest[at + 1..].trim();
        if word.is_empty() || !word.chars().all(is_ident_continue) {
            break;
        }
        let annotation = parse_annotation(word)?;
        if annotations.contains(&annotation) {
            return Err(format!("annotation `@{word}` given twice"));
        }
        annotations.push(annotation);
        rest = rest[..at].trim_end();
    }
    annotations.reverse();
    Ok((rest, annotations))
}

fn unquote(text: &str) -> String {
    let t = text.trim();
    if t.len() >= 2 && t.starts_with('"') && t.ends_with('"') {
        t[1..t.len() - 1].to_string()
    } else {
        t.to_string()
    }
}

fn parse_attribute_decl(line: &str, line_no: usize) -> Result<AttributeDeclV1, String> {
    let (body, annotations) = split_annotations(line)?;
    let Some((name, rest)) = body.split_once(':') else {
        return Err(format!("unrecognized model line: {line}"));
    };
    let name = name.trim();
    if all_consuming(parse_ident)(name).is_err() {
        return Err(format!("invalid attribute name `{name}`"));
    }

    let (ty_text, default) = match rest.split_once('=') {
        Some((ty, default)) => {
            let default = unquote(default);
            if default.is_empty() {
                return Err(format!("attribute `{name}` has an empty default"));
            }
            (ty, Some(default))
        }
        None => (rest, None),
    };

    let ty = parse_attr_type(ty_text)?;
    if default.is_some() && matches!(ty, AttrTypeV1::Related { .. }) {
        return Err(format!(
            "relationship attribute `{name}` cannot declare a default"
        ));
    }

    Ok(AttributeDeclV1 {
        name: name.to_string(),
        ty,
        default,
        annotations,
        line: line_no,
    })
}

fn ident_list(input: &str) -> IResult<&str, Vec<Name>> {
    delimited(
        preceded(multispace0, pchar('(')),
        separated_list1(
            preceded(multispace0, pchar(',')),
            preceded(multispace0, map(parse_ident, str::to_string)),
        ),
        preceded(multispace0, pchar(')')),
    )(input)
}

fn cardinality(input: &str) -> IResult<&str, CardinalityV1> {
    alt((
        value(CardinalityV1::OneToOne, tag("one_to_one")),
        value(CardinalityV1::ManyToOne, tag("many_to_one")),
        value(CardinalityV1::OneToMany, tag("one_to_many")),
        value(CardinalityV1::ManyToMany, tag("many_to_many")),
    ))(input)
}

pub fn parse_attr_type(text: &str) -> Result<AttrTypeV1, String> {
    fn related(input: &str) -> IResult<&str, AttrTypeV1> {
        let (input, cardinality) = cardinality(input)?;
        let (input, _) = multispace1(input)?;
        let (input, target) = parse_ident(input)?;
        let (input, inverse) =
            opt(tuple((multispace1, tag("as"), multispace1, parse_ident)))(input)?;
        let (input, _) = multispace0(input)?;
        Ok((
            input,
            AttrTypeV1::Related {
                cardinality,
                target: target.to_string(),
                inverse: inverse.map(|(_, _, _, inv)| inv.to_string()),
            },
        ))
    }

    fn scalar(input: &str) -> IResult<&str, AttrTypeV1> {
        let (input, ty) = alt((
            map(preceded(tag("enum"), ident_list), ScalarTypeV1::Enum),
            map(
                preceded(tag("expression"), ident_list),
                ScalarTypeV1::Expression,
            ),
            value(ScalarTypeV1::OntoTerm, tag("onto_term")),
            value(ScalarTypeV1::String, tag("string")),
            value(ScalarTypeV1::Float, tag("float")),
            value(ScalarTypeV1::Bool, tag("bool")),
            value(ScalarTypeV1::Json, tag("json")),
            value(ScalarTypeV1::Int, tag("int")),
        ))(input)?;
        let (input, _) = multispace0(input)?;
        Ok((input, AttrTypeV1::Scalar { ty }))
    }

    all_consuming(alt((related, scalar)))(text.trim())
        .map(|(_, v)| v)
        .map_err(|_| {
            format!(
                "attribute type expects a scalar (`string`, `int`, `float`, `bool`, `json`, \
                 `onto_term`, `enum(..)`, `expression(..)`) or `<cardinality> <Model> [as <inverse>]`, \
                 got `{}`",
                text.trim()
            )
        })
}
