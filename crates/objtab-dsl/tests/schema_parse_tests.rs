use objtab_dsl::schema_v1::{
    parse_schema_v1, AnnotationV1, AttrTypeV1, CardinalityV1, ScalarTypeV1,
};

const METABOLISM: &str = r#"
-- A small reaction network.
schema Metabolism

root model Model:
  id: string @primary
  version: string = "1.0.0"

model Compartment:
  id: string @primary
  volume: float = 1.0
  kind: enum(cytosol, membrane) = cytosol
  model: many_to_one Model as compartments

model Species:
  id: string @primary
  compartment: many_to_one Compartment as species @required
  identifier: onto_term @share_refs   # shared across copies
  structure: json

model RateLaw:
  id: string @primary
  expression: expression(Species, Parameter)
  species: many_to_many Species as rate_laws

model Parameter:
  id: string @primary
  value: float
"#;

#[test]
fn parses_models_in_declaration_order() {
    let module = parse_schema_v1(METABOLISM).expect("parse");
    assert_eq!(module.schema_name, "Metabolism");
    let names: Vec<&str> = module.models.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["Model", "Compartment", "Species", "RateLaw", "Parameter"]
    );
    assert!(module.models[0].root);
    assert!(!module.models[1].root);
}

#[test]
fn parses_attribute_types_defaults_and_annotations() {
    let module = parse_schema_v1(METABOLISM).expect("parse");
    let compartment = &module.models[1];
    assert_eq!(compartment.attributes[1].default.as_deref(), Some("1.0"));
    assert_eq!(
        compartment.attributes[2].ty,
        AttrTypeV1::Scalar {
            ty: ScalarTypeV1::Enum(vec!["cytosol".to_string(), "membrane".to_string()])
        }
    );

    let species = &module.models[2];
    assert!(species.attributes[0].has(AnnotationV1::Primary));
    assert!(species.attributes[1].has(AnnotationV1::Required));
    assert!(species.attributes[2].has(AnnotationV1::ShareRefs));
    assert_eq!(
        species.attributes[1].ty,
        AttrTypeV1::Related {
            cardinality: CardinalityV1::ManyToOne,
            target: "Compartment".to_string(),
            inverse: Some("species".to_string()),
        }
    );

    let rate_law = &module.models[3];
    assert_eq!(
        rate_law.attributes[1].ty,
        AttrTypeV1::Scalar {
            ty: ScalarTypeV1::Expression(vec!["Species".to_string(), "Parameter".to_string()])
        }
    );
}

#[test]
fn schema_header_is_optional() {
    let module = parse_schema_v1("model A:\n  id: string\n").expect("parse");
    assert_eq!(module.schema_name, "Unnamed");
    assert_eq!(module.models.len(), 1);
}

#[test]
fn reports_line_numbers() {
    let err = parse_schema_v1("schema S\nmodel A:\n  id: strin\n")
        .expect_err("should fail")
        .to_string();
    assert!(err.contains("line 3"), "err={err}");
    assert!(err.contains("strin"), "err={err}");
}

#[test]
fn rejects_attribute_outside_a_model() {
    let err = parse_schema_v1("schema S\nid: string\n")
        .expect_err("should fail")
        .to_string();
    assert!(err.contains("outside any model"), "err={err}");
}

#[test]
fn rejects_default_on_relationship() {
    let err = parse_schema_v1("model A:\n  b: many_to_one B = x\n")
        .expect_err("should fail")
        .to_string();
    assert!(err.contains("cannot declare a default"), "err={err}");
}

#[test]
fn rejects_late_schema_header() {
    let err = parse_schema_v1("model A:\n  id: string\nschema S\n")
        .expect_err("should fail")
        .to_string();
    assert!(err.contains("must precede"), "err={err}");
}
