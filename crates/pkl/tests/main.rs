use pkl::{Evaluator, EvaluatorOptions, Object};

fn eval_expr(source: &str, expr: &str) -> Object {
    let mut evaluator = Evaluator::new(EvaluatorOptions::default());
    evaluator.evaluate_expression(source, expr).unwrap()
}

/// The evaluator can be reused across modules.
#[test]
fn repeat_eval() {
    let mut evaluator = Evaluator::new(EvaluatorOptions::default());
    let first = evaluator.evaluate_text("x = 1 + 2").unwrap();
    assert_eq!(first.property("x").and_then(Object::as_int), Some(3));
    let second = evaluator.evaluate_text("x = 2 + 3").unwrap();
    assert_eq!(second.property("x").and_then(Object::as_int), Some(5));
}

#[test]
fn arithmetic() {
    assert_eq!(eval_expr("", "1 + 2 * 3"), Object::Int(7));
    assert_eq!(eval_expr("", "7 ~/ 2"), Object::Int(3));
    assert_eq!(eval_expr("", "7 % 2"), Object::Int(1));
    assert_eq!(eval_expr("", "2 ** 10"), Object::Int(1024));
    assert_eq!(eval_expr("", "1 / 2"), Object::Float(0.5));
    assert_eq!(eval_expr("", "-3"), Object::Int(-3));
}

#[test]
fn integer_float_promotion() {
    assert_eq!(eval_expr("", "1 + 0.5"), Object::Float(1.5));
    assert_eq!(eval_expr("", "2.0 * 3"), Object::Float(6.0));
}

#[test]
fn comparison_and_logic() {
    assert_eq!(eval_expr("", "1 < 2 && 2 <= 2"), Object::Bool(true));
    assert_eq!(eval_expr("", "\"a\" < \"b\""), Object::Bool(true));
    assert_eq!(eval_expr("", "1 == 1.0"), Object::Bool(true));
    assert_eq!(eval_expr("", "!false || false"), Object::Bool(true));
}

#[test]
fn string_interpolation() {
    assert_eq!(
        eval_expr("name = \"swallow\"", "\"bird: \\(name)!\""),
        Object::String("bird: swallow!".into())
    );
    assert_eq!(eval_expr("", "\"n = \\(1 + 2)\""), Object::String("n = 3".into()));
}

#[test]
fn string_methods() {
    assert_eq!(eval_expr("", "\"hello\".length"), Object::Int(5));
    assert_eq!(eval_expr("", "\"hello\".toUpperCase()"), Object::String("HELLO".into()));
    assert_eq!(eval_expr("", "\"a,b,c\".split(\",\").length"), Object::Int(3));
    assert_eq!(eval_expr("", "\"  x \".trim()"), Object::String("x".into()));
    assert_eq!(eval_expr("", "\"abc\".contains(\"b\")"), Object::Bool(true));
    assert_eq!(eval_expr("", "\"12\".toInt() + 1"), Object::Int(13));
}

#[test]
fn let_and_if() {
    assert_eq!(eval_expr("", "let (x = 3) x * x"), Object::Int(9));
    assert_eq!(eval_expr("", "if (1 < 2) \"yes\" else \"no\""), Object::String("yes".into()));
    assert_eq!(eval_expr("", "let (a = 1) let (b = a + 1) a + b"), Object::Int(3));
}

#[test]
fn lambdas_and_pipe() {
    assert_eq!(eval_expr("f = (x) -> x + 1", "f(2)"), Object::Int(3));
    assert_eq!(eval_expr("f = (x) -> x + 1", "f.apply(2)"), Object::Int(3));
    assert_eq!(eval_expr("f = (x) -> x * 2", "5 |> f"), Object::Int(10));
    assert_eq!(eval_expr("", "((a, b) -> a + b)(1, 2)"), Object::Int(3));
}

#[test]
fn collections() {
    assert_eq!(eval_expr("", "List(1, 2, 3).length"), Object::Int(3));
    assert_eq!(eval_expr("", "Set(1, 2, 2, 3).length"), Object::Int(3));
    assert_eq!(eval_expr("", "Map(\"a\", 1, \"b\", 2)[\"b\"]"), Object::Int(2));
    assert_eq!(eval_expr("", "List(1, 2, 3).map((x) -> x * 2)[1]"), Object::Int(4));
    assert_eq!(eval_expr("", "List(1, 2, 3, 4).filter((x) -> x.isEven).length"), Object::Int(2));
    assert_eq!(eval_expr("", "List(1, 2, 3).fold(0, (acc, x) -> acc + x)"), Object::Int(6));
    assert_eq!(
        eval_expr("", "List(\"a\", \"b\").join(\"-\")"),
        Object::String("a-b".into())
    );
    assert_eq!(eval_expr("", "IntSeq(1, 7).step(2).toList().length"), Object::Int(4));
}

#[test]
fn durations_and_data_sizes() {
    assert_eq!(eval_expr("", "(5.min).value"), Object::Int(5));
    assert_eq!(eval_expr("", "(5.min).unit"), Object::String("min".into()));
    assert_eq!(eval_expr("", "1.min == 60.s"), Object::Bool(true));
    assert_eq!(eval_expr("", "(1.min + 30.s).toUnit(\"s\").value"), Object::Int(90));
    assert_eq!(eval_expr("", "1.kib > 1.kb"), Object::Bool(true));
    assert_eq!(eval_expr("", "(2.kb).toUnit(\"b\").value"), Object::Int(2000));
}

#[test]
fn null_chain_operators() {
    assert_eq!(eval_expr("a = null", "a ?? 5"), Object::Int(5));
    assert_eq!(eval_expr("a = 3", "a ?? 5"), Object::Int(3));
    assert_eq!(eval_expr("a = null", "a?.anything"), Object::Null);
    assert_eq!(eval_expr("b = new Dynamic { x = 1 }", "b?.x"), Object::Int(1));
}

#[test]
fn module_level_methods() {
    let source = "function double(x) = x * 2\nfunction add(a, b) = a + b";
    assert_eq!(eval_expr(source, "double(21)"), Object::Int(42));
    assert_eq!(eval_expr(source, "add(double(1), 3)"), Object::Int(5));
}

#[test]
fn heap_stats_reports_objects() {
    let mut evaluator = Evaluator::new(EvaluatorOptions::default());
    evaluator.evaluate_text("a = new Dynamic { x = 1 }").unwrap();
    let stats = evaluator.heap_stats();
    assert!(stats.objects > 0);
    assert!(stats.objects_by_kind.contains_key("Dynamic"));
}
