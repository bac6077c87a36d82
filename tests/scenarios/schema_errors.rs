//! Definitions rejected at load time

use ci_engine::core::{PipelineDefinition, SchemaError};

fn load_err(yaml: &str) -> SchemaError {
    match PipelineDefinition::from_yaml(yaml) {
        Ok(_) => panic!("Expected a schema error"),
        Err(e) => e,
    }
}

#[test]
fn test_step_without_action() {
    let err = load_err("name: CI\njobs:\n  build:\n    steps:\n      - name: nothing\n");
    assert!(matches!(err, SchemaError::MissingField { field: "uses", .. }));
}

#[test]
fn test_job_without_steps() {
    let err = load_err("name: CI\njobs:\n  build: {}\n");
    assert!(matches!(err, SchemaError::MissingField { field: "steps", .. }));
}

#[test]
fn test_duplicate_axis() {
    let yaml = r#"
name: CI
jobs:
  test:
    strategy:
      matrix:
        rust: [stable]
        rust: [beta]
    steps:
      - run: cargo test
"#;
    assert!(matches!(load_err(yaml), SchemaError::DuplicateAxis { ref axis, .. } if axis == "rust"));
}

#[test]
fn test_nested_variant_field() {
    let yaml = r#"
name: CI
jobs:
  test:
    strategy:
      matrix:
        features:
          - name: all
            flags: [a, b]
    steps:
      - run: cargo test
"#;
    assert!(matches!(load_err(yaml), SchemaError::MalformedMatrix { .. }));
}

#[test]
fn test_unresolved_matrix_field() {
    let yaml = r#"
name: CI
jobs:
  lint:
    strategy:
      matrix:
        features:
          - name: no_std
    steps:
      - run: cargo clippy ${{ matrix.features.flags }}
"#;
    match load_err(yaml) {
        SchemaError::UnresolvedReference { reference, .. } => {
            assert_eq!(reference, "matrix.features.flags")
        }
        other => panic!("Expected unresolved reference, got {:?}", other),
    }
}

#[test]
fn test_secret_in_job_env_rejected() {
    let yaml = r#"
name: CI
jobs:
  coverage:
    env:
      TOKEN: ${{ secrets.CODECOV_TOKEN }}
    steps:
      - run: ./upload.sh
"#;
    assert!(matches!(load_err(yaml), SchemaError::UnresolvedReference { .. }));
}

#[test]
fn test_dependency_errors() {
    let unknown = "name: CI\njobs:\n  a:\n    needs: ghost\n    steps: [{ run: x }]\n";
    assert!(matches!(load_err(unknown), SchemaError::UnknownDependency { .. }));

    let cycle = r#"
name: CI
jobs:
  a:
    needs: b
    steps: [{ run: x }]
  b:
    needs: a
    steps: [{ run: y }]
"#;
    assert!(matches!(load_err(cycle), SchemaError::DependencyCycle(_)));
}

#[test]
fn test_bad_guard_expression() {
    let yaml = "name: CI\njobs:\n  a:\n    if: \"matrix.x ==\"\n    steps: [{ run: x }]\n";
    assert!(matches!(load_err(yaml), SchemaError::InvalidExpression { .. }));
}
