//! Checked schema registry.
//!
//! A `Schema` is the type system a dataset is read, migrated and written
//! against: the set of models, their ordered attributes, and for each
//! relationship attribute its target, cardinality and inverse name.
//!
//! It is built from a parsed `schema_v1` module and is **fail-closed**: every
//! problem in the module is collected and reported at once, and a `Schema`
//! value only exists when there were none. Two schemas are fully independent
//! values, so two versions declaring same-named models never interfere.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use objtab_dsl::digest::schema_digest_v1;
use objtab_dsl::schema_v1::{
    parse_schema_v1, AnnotationV1, AttrTypeV1, CardinalityV1, ScalarTypeV1, SchemaV1Module,
};

use crate::error::SchemaError;
use crate::value::Value;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScalarType {
    String,
    Integer,
    Float,
    Boolean,
    Enum(Vec<String>),
    Json,
    OntologyTerm,
    /// Expression text; the listed models are the types its references may name.
    Expression(Vec<String>),
}

impl ScalarType {
    pub fn type_name(&self) -> &'static str {
        match self {
            ScalarType::String => "string",
            ScalarType::Integer => "int",
            ScalarType::Float => "float",
            ScalarType::Boolean => "bool",
            ScalarType::Enum(_) => "enum",
            ScalarType::Json => "json",
            ScalarType::OntologyTerm => "onto_term",
            ScalarType::Expression(_) => "expression",
        }
    }

    /// How values of this type are copied into a migrated instance when the
    /// attribute does not say otherwise.
    pub fn default_copy_strategy(&self) -> CopyStrategy {
        match self {
            ScalarType::Json | ScalarType::OntologyTerm => CopyStrategy::Deep,
            _ => CopyStrategy::Share,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cardinality {
    OneToOne,
    ManyToOne,
    OneToMany,
    ManyToMany,
}

impl Cardinality {
    pub fn keyword(self) -> &'static str {
        match self {
            Cardinality::OneToOne => "one_to_one",
            Cardinality::ManyToOne => "many_to_one",
            Cardinality::OneToMany => "one_to_many",
            Cardinality::ManyToMany => "many_to_many",
        }
    }

    /// Whether the declaring side holds a collection of targets.
    pub fn is_to_many(self) -> bool {
        matches!(self, Cardinality::OneToMany | Cardinality::ManyToMany)
    }
}

impl From<CardinalityV1> for Cardinality {
    fn from(c: CardinalityV1) -> Self {
        match c {
            CardinalityV1::OneToOne => Cardinality::OneToOne,
            CardinalityV1::ManyToOne => Cardinality::ManyToOne,
            CardinalityV1::OneToMany => Cardinality::OneToMany,
            CardinalityV1::ManyToMany => Cardinality::ManyToMany,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub target: String,
    pub cardinality: Cardinality,
    /// Name under which the target model sees this relationship.
    pub inverse: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeKind {
    Scalar(ScalarType),
    Related(Relationship),
}

impl AttributeKind {
    /// Stable name of the attribute type, used to compare attribute kinds
    /// across schema versions.
    pub fn type_name(&self) -> &'static str {
        match self {
            AttributeKind::Scalar(ty) => ty.type_name(),
            AttributeKind::Related(rel) => rel.cardinality.keyword(),
        }
    }

    pub fn relationship(&self) -> Option<&Relationship> {
        match self {
            AttributeKind::Related(rel) => Some(rel),
            AttributeKind::Scalar(_) => None,
        }
    }

    pub fn scalar(&self) -> Option<&ScalarType> {
        match self {
            AttributeKind::Scalar(ty) => Some(ty),
            AttributeKind::Related(_) => None,
        }
    }
}

/// Per-attribute policy for carrying a value into a migrated instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CopyStrategy {
    /// The migrated instance references the same value storage.
    Share,
    /// The migrated instance gets its own structural copy.
    Deep,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttributeDef {
    pub name: String,
    pub kind: AttributeKind,
    pub primary: bool,
    pub required: bool,
    pub default: Option<Value>,
    pub copy: CopyStrategy,
}

impl AttributeDef {
    pub fn is_related(&self) -> bool {
        matches!(self.kind, AttributeKind::Related(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelCategory {
    Table,
    Root,
}

impl ModelCategory {
    pub fn name(self) -> &'static str {
        match self {
            ModelCategory::Table => "model",
            ModelCategory::Root => "root model",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelDef {
    pub name: String,
    pub category: ModelCategory,
    pub attributes: Vec<AttributeDef>,
}

impl ModelDef {
    pub fn attribute(&self, name: &str) -> Option<&AttributeDef> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn primary_attribute(&self) -> Option<&AttributeDef> {
        self.attributes.iter().find(|a| a.primary)
    }

    pub fn related_attributes(&self) -> impl Iterator<Item = (&AttributeDef, &Relationship)> {
        self.attributes
            .iter()
            .filter_map(|a| a.kind.relationship().map(|rel| (a, rel)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    name: String,
    origin: String,
    path: Option<PathBuf>,
    digest: String,
    models: BTreeMap<String, ModelDef>,
    declaration_order: Vec<String>,
}

// ============================================================================
// Construction
// ============================================================================

impl Schema {
    /// Parse and check schema text. `path` is only used for reporting and for
    /// `Schema::path`.
    pub fn parse(text: &str, path: Option<&Path>) -> Result<Schema, SchemaError> {
        let origin = path
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<inline>".to_string());
        let module = parse_schema_v1(text).map_err(|source| SchemaError::Parse {
            origin: origin.clone(),
            source,
        })?;
        let mut schema = Schema::from_module(&module, &origin)?;
        schema.digest = schema_digest_v1(text);
        schema.path = path.map(Path::to_path_buf);
        Ok(schema)
    }

    pub fn from_module(module: &SchemaV1Module, origin: &str) -> Result<Schema, SchemaError> {
        let mut errors: Vec<String> = Vec::new();

        if module.models.is_empty() {
            errors.push("schema defines no models".to_string());
        }

        let mut models: BTreeMap<String, ModelDef> = BTreeMap::new();
        let mut declaration_order = Vec::new();
        let mut roots = Vec::new();

        for decl in &module.models {
            if models.contains_key(&decl.name) {
                errors.push(format!(
                    "model '{}' declared twice (line {})",
                    decl.name, decl.line
                ));
                continue;
            }
            let category = if decl.root {
                roots.push(decl.name.clone());
                ModelCategory::Root
            } else {
                ModelCategory::Table
            };

            let mut attributes: Vec<AttributeDef> = Vec::new();
            for attr in &decl.attributes {
                if attributes.iter().any(|a| a.name == attr.name) {
                    errors.push(format!(
                        "'{}.{}' is declared twice (line {})",
                        decl.name, attr.name, attr.line
                    ));
                    continue;
                }

                let kind = match &attr.ty {
                    AttrTypeV1::Scalar { ty } => AttributeKind::Scalar(scalar_type(ty)),
                    AttrTypeV1::Related {
                        cardinality,
                        target,
                        inverse,
                    } => AttributeKind::Related(Relationship {
                        target: target.clone(),
                        cardinality: (*cardinality).into(),
                        inverse: inverse.clone(),
                    }),
                };

                let default = match (&attr.default, &kind) {
                    (Some(text), AttributeKind::Scalar(ty)) => match Value::parse_cell(ty, text) {
                        Ok(v) => v,
                        Err(message) => {
                            errors.push(format!(
                                "'{}.{}' default '{}' is invalid: {message}",
                                decl.name, attr.name, text
                            ));
                            None
                        }
                    },
                    _ => None,
                };

                let share_refs = attr.has(AnnotationV1::ShareRefs);
                let copy = match &kind {
                    AttributeKind::Scalar(ty) if share_refs => {
                        if !matches!(ty, ScalarType::OntologyTerm | ScalarType::Json) {
                            errors.push(format!(
                                "'{}.{}' uses @share_refs, which only applies to onto_term and json attributes",
                                decl.name, attr.name
                            ));
                        }
                        CopyStrategy::Share
                    }
                    AttributeKind::Scalar(ty) => ty.default_copy_strategy(),
                    AttributeKind::Related(_) => {
                        if share_refs {
                            errors.push(format!(
                                "'{}.{}' uses @share_refs on a relationship",
                                decl.name, attr.name
                            ));
                        }
                        CopyStrategy::Share
                    }
                };

                let primary = attr.has(AnnotationV1::Primary);
                if primary && !matches!(kind, AttributeKind::Scalar(ScalarType::String)) {
                    errors.push(format!(
                        "'{}.{}' is marked @primary but is not a string attribute",
                        decl.name, attr.name
                    ));
                }

                attributes.push(AttributeDef {
                    name: attr.name.clone(),
                    kind,
                    primary,
                    required: attr.has(AnnotationV1::Required),
                    default,
                    copy,
                });
            }

            if attributes.iter().filter(|a| a.primary).count() > 1 {
                errors.push(format!(
                    "model '{}' declares more than one primary attribute",
                    decl.name
                ));
            }

            declaration_order.push(decl.name.clone());
            models.insert(
                decl.name.clone(),
                ModelDef {
                    name: decl.name.clone(),
                    category,
                    attributes,
                },
            );
        }

        if roots.len() > 1 {
            errors.push(format!(
                "at most one root model is allowed, but {} are declared: {}",
                roots.len(),
                roots.join(", ")
            ));
        }

        errors.extend(check_references(&models, &declaration_order));

        if !errors.is_empty() {
            return Err(SchemaError::Invalid {
                origin: origin.to_string(),
                errors,
            });
        }

        Ok(Schema {
            name: module.schema_name.clone(),
            origin: origin.to_string(),
            path: None,
            digest: String::new(),
            models,
            declaration_order,
        })
    }
}

fn scalar_type(ty: &ScalarTypeV1) -> ScalarType {
    match ty {
        ScalarTypeV1::String => ScalarType::String,
        ScalarTypeV1::Int => ScalarType::Integer,
        ScalarTypeV1::Float => ScalarType::Float,
        ScalarTypeV1::Bool => ScalarType::Boolean,
        ScalarTypeV1::Json => ScalarType::Json,
        ScalarTypeV1::OntoTerm => ScalarType::OntologyTerm,
        ScalarTypeV1::Enum(values) => ScalarType::Enum(values.clone()),
        ScalarTypeV1::Expression(models) => ScalarType::Expression(models.clone()),
    }
}

/// Cross-model checks: relationship targets, inverse names and expression
/// context models must all resolve inside this schema.
fn check_references(models: &BTreeMap<String, ModelDef>, order: &[String]) -> Vec<String> {
    let mut errors = Vec::new();
    // (target model, inverse name) -> declaring `Model.attr`
    let mut inverses: HashMap<(&str, &str), String> = HashMap::new();

    for model_name in order {
        let Some(model) = models.get(model_name) else {
            continue;
        };
        for attr in &model.attributes {
            match &attr.kind {
                AttributeKind::Related(rel) => {
                    let Some(target) = models.get(&rel.target) else {
                        errors.push(format!(
                            "'{}.{}' references undefined model '{}'",
                            model.name, attr.name, rel.target
                        ));
                        continue;
                    };
                    if target.primary_attribute().is_none() {
                        errors.push(format!(
                            "'{}.{}' references model '{}', which has no primary attribute",
                            model.name, attr.name, rel.target
                        ));
                    }
                    let Some(inverse) = rel.inverse.as_deref() else {
                        continue;
                    };
                    if target.attribute(inverse).is_some() {
                        errors.push(format!(
                            "'{}.{}' inverse name '{}' collides with attribute '{}.{}'",
                            model.name, attr.name, inverse, target.name, inverse
                        ));
                    }
                    let owner = format!("{}.{}", model.name, attr.name);
                    if let Some(previous) =
                        inverses.insert((target.name.as_str(), inverse), owner.clone())
                    {
                        errors.push(format!(
                            "'{owner}' inverse name '{inverse}' on '{}' is already used by '{previous}'",
                            target.name
                        ));
                    }
                }
                AttributeKind::Scalar(ScalarType::Expression(context)) => {
                    let mut seen = BTreeSet::new();
                    for ctx in context {
                        if !models.contains_key(ctx) {
                            errors.push(format!(
                                "'{}.{}' expression context references undefined model '{}'",
                                model.name, attr.name, ctx
                            ));
                        }
                        if !seen.insert(ctx.as_str()) {
                            errors.push(format!(
                                "'{}.{}' lists expression context model '{}' twice",
                                model.name, attr.name, ctx
                            ));
                        }
                    }
                }
                AttributeKind::Scalar(_) => {}
            }
        }
    }

    errors
}

// ============================================================================
// Queries
// ============================================================================

impl Schema {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Where the schema came from (a path, or `<inline>`).
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn model(&self, name: &str) -> Option<&ModelDef> {
        self.models.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    /// Models in declaration order.
    pub fn models(&self) -> impl Iterator<Item = &ModelDef> {
        self.declaration_order
            .iter()
            .filter_map(|name| self.models.get(name))
    }

    /// Model names in sorted order.
    pub fn model_names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    pub fn root_model(&self) -> Option<&ModelDef> {
        self.models
            .values()
            .find(|m| m.category == ModelCategory::Root)
    }

    pub fn attribute(&self, model: &str, attribute: &str) -> Option<&AttributeDef> {
        self.model(model).and_then(|m| m.attribute(attribute))
    }
}
