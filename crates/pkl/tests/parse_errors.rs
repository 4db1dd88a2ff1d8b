//! Syntax-error reporting: spans and expected-token sets, with no silent
//! recovery.

use pkl::{ErrorKind, Evaluator, EvaluatorOptions, PklError};

fn parse_err(source: &str) -> PklError {
    let mut evaluator = Evaluator::new(EvaluatorOptions::default());
    evaluator.evaluate_text(source).unwrap_err()
}

#[test]
fn missing_expression() {
    let err = parse_err("x = ");
    assert_eq!(err.kind, ErrorKind::SyntaxError);
    assert!(err.message.contains("expected expression"), "{}", err.message);
}

#[test]
fn expected_token_set_is_reported() {
    let err = parse_err("x");
    assert_eq!(err.kind, ErrorKind::SyntaxError);
    assert!(err.message.contains("expected"), "{}", err.message);
    assert!(err.message.contains("`:`"), "{}", err.message);
    assert!(err.message.contains("`=`"), "{}", err.message);
}

#[test]
fn unterminated_string() {
    let err = parse_err("x = \"oops");
    assert_eq!(err.kind, ErrorKind::SyntaxError);
    assert!(err.message.contains("unterminated"), "{}", err.message);
}

#[test]
fn unbalanced_braces() {
    let err = parse_err("x = new Dynamic { y = 1");
    assert_eq!(err.kind, ErrorKind::SyntaxError);
}

#[test]
fn stray_character() {
    let err = parse_err("x = 1 § 2");
    assert_eq!(err.kind, ErrorKind::SyntaxError);
    assert!(err.message.contains("unexpected character"), "{}", err.message);
}

#[test]
fn error_location_points_into_the_module() {
    let err = parse_err("x = 1\ny = ");
    assert_eq!(err.kind, ErrorKind::SyntaxError);
    let location = &err.frames[0].location;
    assert!(location.starts_with("repl:"), "{location}");
    assert!(location.ends_with(":2:5") || location.contains(":2:"), "{location}");
}

#[test]
fn modifier_misuse_is_rejected() {
    let err = parse_err("x = new Dynamic { abstract y = 1 }");
    assert_eq!(err.kind, ErrorKind::SyntaxError);
    assert!(err.message.contains("abstract"), "{}", err.message);
}

#[test]
fn double_union_default_is_rejected() {
    let err = parse_err("x: *Int|*String = 1");
    assert_eq!(err.kind, ErrorKind::SyntaxError);
    assert!(err.message.contains("default"), "{}", err.message);
}

#[test]
fn abstract_property_with_value_is_rejected() {
    let err = parse_err("class C { abstract x: Int = 1 }");
    assert_eq!(err.kind, ErrorKind::SyntaxError);
}

#[test]
fn extending_a_closed_class_is_rejected() {
    let err = parse_err("class A { x: Int = 1 }\nclass B extends A { }");
    assert_eq!(err.kind, ErrorKind::SyntaxError);
    assert!(err.message.contains("open"), "{}", err.message);
}
