//! Type and constraint checking: `is`/`as`, unions with diagnostic trees,
//! defaults, and class hierarchies.

use pkl::{ErrorKind, Evaluator, EvaluatorOptions, Object, PklError};

fn eval_expr(source: &str, expr: &str) -> Object {
    let mut evaluator = Evaluator::new(EvaluatorOptions::default());
    evaluator.evaluate_expression(source, expr).unwrap()
}

fn eval_err(source: &str, expr: &str) -> PklError {
    let mut evaluator = Evaluator::new(EvaluatorOptions::default());
    evaluator.evaluate_expression(source, expr).unwrap_err()
}

#[test]
fn is_and_as_agree() {
    // v is T  ⇔  (v as T) does not raise
    for (value, ty) in [("1", "Int"), ("1.5", "Float"), ("\"x\"", "String"), ("true", "Boolean")] {
        assert_eq!(eval_expr("", &format!("{value} is {ty}")), Object::Bool(true));
        let mut evaluator = Evaluator::new(EvaluatorOptions::default());
        assert!(evaluator.evaluate_expression("", &format!("{value} as {ty}")).is_ok());
    }
    assert_eq!(eval_expr("", "1 is String"), Object::Bool(false));
    let err = eval_err("", "1 as String");
    assert_eq!(err.kind, ErrorKind::TypeMismatch);
}

#[test]
fn everything_is_any_and_nothing_is_nothing() {
    for value in ["1", "null", "\"s\"", "List(1)", "new Dynamic {}"] {
        assert_eq!(eval_expr("", &format!("{value} is Any")), Object::Bool(true));
        assert_eq!(eval_expr("", &format!("{value} is nothing")), Object::Bool(false));
    }
}

#[test]
fn null_and_nullable_types() {
    // null is T? for every T; null is T only when T includes Null
    assert_eq!(eval_expr("", "null is Int?"), Object::Bool(true));
    assert_eq!(eval_expr("", "null is String?"), Object::Bool(true));
    assert_eq!(eval_expr("", "null is Int"), Object::Bool(false));
    assert_eq!(eval_expr("", "null is Null"), Object::Bool(true));
    assert_eq!(eval_expr("", "1 is Int?"), Object::Bool(true));
}

#[test]
fn number_hierarchy() {
    assert_eq!(eval_expr("", "1 is Number"), Object::Bool(true));
    assert_eq!(eval_expr("", "1.5 is Number"), Object::Bool(true));
    assert_eq!(eval_expr("", "1 is Float"), Object::Bool(false));
}

#[test]
fn union_mismatch_carries_a_branch_tree() {
    let err = eval_err("x: String|Int(isPositive) = -1", "x");
    assert_eq!(err.kind, ErrorKind::TypeMismatch);
    assert_eq!(err.message, "expected String|Int(isPositive), got Int");
    assert_eq!(err.causes.len(), 2);
    assert_eq!(err.causes[0].kind, ErrorKind::TypeMismatch);
    assert_eq!(err.causes[0].message, "expected String, got Int");
    assert_eq!(err.causes[1].kind, ErrorKind::ConstraintViolation);
    assert_eq!(err.causes[1].message, "constraint isPositive violated");
}

#[test]
fn union_accepts_any_branch() {
    assert_eq!(eval_expr("x: String|Int = 1", "x"), Object::Int(1));
    assert_eq!(eval_expr("x: String|Int = \"s\"", "x"), Object::String("s".into()));
}

#[test]
fn constraints_run_with_this_bound_to_the_value() {
    assert_eq!(eval_expr("x: Int(this > 10) = 11", "x"), Object::Int(11));
    let err = eval_err("x: Int(this > 10) = 5", "x");
    assert_eq!(err.kind, ErrorKind::ConstraintViolation);
    assert!(err.message.contains("this > 10"), "{}", err.message);
}

#[test]
fn string_literal_types() {
    assert_eq!(eval_expr("", "\"north\" is \"north\""), Object::Bool(true));
    assert_eq!(eval_expr("", "\"south\" is \"north\""), Object::Bool(false));
    assert_eq!(
        eval_expr("dir: \"north\"|\"south\" = \"south\"", "dir"),
        Object::String("south".into())
    );
}

#[test]
fn parameterised_collections() {
    assert_eq!(eval_expr("", "List(1, 2) is List<Int>"), Object::Bool(true));
    assert_eq!(eval_expr("", "List(1, \"x\") is List<Int>"), Object::Bool(false));
    assert_eq!(
        eval_expr("", "Map(\"a\", 1) is Map<String, Int>"),
        Object::Bool(true)
    );
    assert_eq!(
        eval_expr("", "Map(\"a\", \"b\") is Map<String, Int>"),
        Object::Bool(false)
    );
}

#[test]
fn typed_property_defaults() {
    // container types default to empty; class types to their prototype
    let source = "class Bird { name: String = \"unnamed\"; tags: Listing }\nb: Bird";
    assert_eq!(eval_expr(source, "b.name"), Object::String("unnamed".into()));
    assert_eq!(eval_expr(source, "b.tags.length"), Object::Int(0));
    assert_eq!(eval_expr("xs: List", "xs.length"), Object::Int(0));
    assert_eq!(eval_expr("m: Mapping", "m.length"), Object::Int(0));
    assert_eq!(eval_expr("x: Int?", "x"), Object::Null);
}

#[test]
fn reading_an_unassigned_property_fails() {
    let err = eval_err("x: Int", "x");
    assert_eq!(err.kind, ErrorKind::UndefinedProperty);
    assert!(err.message.contains('x'), "{}", err.message);
}

#[test]
fn default_union_branch() {
    assert_eq!(eval_expr("x: *\"a\"|\"b\"", "x"), Object::String("a".into()));
}

#[test]
fn class_instances_and_inheritance() {
    let source = "open class Animal { legs: Int = 4 }\nclass Dog extends Animal { name: String = \"Rex\" }\nd = new Dog {}";
    assert_eq!(eval_expr(source, "d.legs"), Object::Int(4));
    assert_eq!(eval_expr(source, "d is Dog"), Object::Bool(true));
    assert_eq!(eval_expr(source, "d is Animal"), Object::Bool(true));
    assert_eq!(eval_expr(source, "new Animal {} is Dog"), Object::Bool(false));
}

#[test]
fn typed_objects_check_declared_types() {
    let source = "class Bird { name: String }\nb = new Bird { name = 42 }";
    let err = eval_err(source, "b.name");
    assert_eq!(err.kind, ErrorKind::TypeMismatch);
    assert_eq!(err.message, "expected String, got Int");
}

#[test]
fn abstract_classes_cannot_be_instantiated() {
    let source = "abstract class Shape { sides: Int }\ns = new Shape {}";
    let err = eval_err(source, "s");
    assert!(err.message.contains("abstract"), "{}", err.message);
}

#[test]
fn typealiases_expand() {
    let source = "typealias Port = Int(this > 0, this < 65536)\np: Port = 8080";
    assert_eq!(eval_expr(source, "p"), Object::Int(8080));
    let err = eval_err("typealias Port = Int(this > 0, this < 65536)\np: Port = -1", "p");
    assert_eq!(err.kind, ErrorKind::ConstraintViolation);
}

#[test]
fn effective_type_is_the_chain_intersection() {
    // the child level declares no type, but the parent's sticks
    let source = "a = new Dynamic { x: Int = 1 }\nb = (a) { x = \"oops\" }";
    let err = eval_err(source, "b.x");
    assert_eq!(err.kind, ErrorKind::TypeMismatch);
}

#[test]
fn fixed_properties_cannot_be_amended() {
    let source = "class C { fixed tag: String = \"c\" }\nc = new C { tag = \"d\" }";
    let err = eval_err(source, "c.tag");
    assert!(err.message.contains("fixed"), "{}", err.message);
}

#[test]
fn listing_element_types_are_enforced() {
    let source = "xs: Listing<Int> = new Listing { 1; \"two\" }";
    let err = eval_err(source, "xs");
    assert_eq!(err.kind, ErrorKind::TypeMismatch);
}
