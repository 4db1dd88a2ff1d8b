//! Amendment-chain semantics: overriding, late binding, element index
//! re-basing, generators, and spreads.

use pkl::{Evaluator, EvaluatorOptions, Object};

fn eval_expr(source: &str, expr: &str) -> Object {
    let mut evaluator = Evaluator::new(EvaluatorOptions::default());
    evaluator.evaluate_expression(source, expr).unwrap()
}

#[test]
fn empty_amendment_preserves_properties() {
    // ((o) {}).p == o.p
    let source = "o = new Dynamic { p = 41 }\nq = (o) {}";
    assert_eq!(eval_expr(source, "q.p"), Object::Int(41));
}

#[test]
fn amendment_overrides_and_preserves() {
    let source = "o = new Dynamic { p = 1; r = 2 }\nq = (o) { p = 99 }";
    assert_eq!(eval_expr(source, "q.p"), Object::Int(99));
    // every other property of o is preserved
    assert_eq!(eval_expr(source, "q.r"), Object::Int(2));
}

#[test]
fn this_sees_the_leaf_of_the_chain() {
    // (o) { q = this.p }.q == (o) { q = this.p; p = v }.p
    let source = "o = new Dynamic { p = 1 }\na = (o) { q = this.p }\nb = (o) { q = this.p; p = 7 }";
    assert_eq!(eval_expr(source, "a.q"), Object::Int(1));
    assert_eq!(eval_expr(source, "b.q"), Object::Int(7));
    assert_eq!(eval_expr(source, "b.p"), Object::Int(7));
}

#[test]
fn late_binding_through_implicit_references() {
    let source = "a = new Dynamic { p = 1; q = p + 1 }\nb = (a) { p = 10 }";
    assert_eq!(eval_expr(source, "a.q"), Object::Int(2));
    assert_eq!(eval_expr(source, "b.q"), Object::Int(11));
}

#[test]
fn dynamic_element_indices_across_amendment() {
    let source = "a = new Dynamic { \"one\"; \"two\" }\nb = (a) { \"three\" }";
    assert_eq!(eval_expr(source, "b.length"), Object::Int(3));
    assert_eq!(eval_expr(source, "b[0]"), Object::String("one".into()));
    assert_eq!(eval_expr(source, "b[2]"), Object::String("three".into()));
    // the base object is untouched
    assert_eq!(eval_expr(source, "a.length"), Object::Int(2));
}

#[test]
fn super_reads_skip_the_defining_level() {
    let source = "a = new Dynamic { x = 1 }\nb = (a) { x = super.x + 10 }";
    assert_eq!(eval_expr(source, "b.x"), Object::Int(11));
}

#[test]
fn super_starts_at_the_defining_level_not_the_leaf() {
    // c overrides x again; b's definition of x must still read a's x via
    // super, not c's
    let source = "a = new Dynamic { x = 1 }\nb = (a) { x = super.x + 10 }\nc = (b) { y = x }";
    assert_eq!(eval_expr(source, "c.y"), Object::Int(11));
}

#[test]
fn chained_amendment() {
    let source = "a = new Dynamic { x = 1 }\nd = (a) { y = 2 } { z = 3 }";
    assert_eq!(eval_expr(source, "d.x"), Object::Int(1));
    assert_eq!(eval_expr(source, "d.y"), Object::Int(2));
    assert_eq!(eval_expr(source, "d.z"), Object::Int(3));
}

#[test]
fn nested_amend_declarations() {
    let source = "a = new Dynamic { server { port = 80 } }\nb = (a) { server { port = 8080 } }";
    assert_eq!(eval_expr(source, "a.server.port"), Object::Int(80));
    assert_eq!(eval_expr(source, "b.server.port"), Object::Int(8080));
}

#[test]
fn entries_merge_with_leaf_wins() {
    let source = "a = new Mapping { [\"x\"] = 1; [\"y\"] = 2 }\nb = (a) { [\"y\"] = 20; [\"z\"] = 3 }";
    assert_eq!(eval_expr(source, "b[\"x\"]"), Object::Int(1));
    assert_eq!(eval_expr(source, "b[\"y\"]"), Object::Int(20));
    assert_eq!(eval_expr(source, "b[\"z\"]"), Object::Int(3));
}

#[test]
fn mapping_default_is_a_template_per_key() {
    let source = "m = new Mapping { default = (k) -> \"v-\" + k; [\"a\"] = \"explicit\" }";
    assert_eq!(eval_expr(source, "m[\"a\"]"), Object::String("explicit".into()));
    assert_eq!(eval_expr(source, "m[\"b\"]"), Object::String("v-b".into()));
}

#[test]
fn for_generator_builds_elements() {
    let source = "xs = new Listing { for (v in List(1, 2, 3)) { v * 2 } }";
    assert_eq!(eval_expr(source, "xs[0]"), Object::Int(2));
    assert_eq!(eval_expr(source, "xs[2]"), Object::Int(6));
    assert_eq!(eval_expr(source, "xs.length"), Object::Int(3));
}

#[test]
fn for_generator_with_key_and_value() {
    let source = "m = new Mapping { for (k, v in Map(\"a\", 1, \"b\", 2)) { [k] = v * 10 } }";
    assert_eq!(eval_expr(source, "m[\"a\"]"), Object::Int(10));
    assert_eq!(eval_expr(source, "m[\"b\"]"), Object::Int(20));
}

#[test]
fn when_generator_selects_members() {
    let source = "on = true\nd = new Dynamic { when (on) { x = 1 } else { x = 2 } }";
    assert_eq!(eval_expr(source, "d.x"), Object::Int(1));
    let source_off = "on = false\nd = new Dynamic { when (on) { x = 1 } else { x = 2 } }";
    assert_eq!(eval_expr(source_off, "d.x"), Object::Int(2));
}

#[test]
fn spread_rebases_element_indices() {
    let source = "a = new Listing { 1; 2 }\nb = new Listing { ...a; 3 }";
    assert_eq!(eval_expr(source, "b.length"), Object::Int(3));
    assert_eq!(eval_expr(source, "b[0]"), Object::Int(1));
    assert_eq!(eval_expr(source, "b[2]"), Object::Int(3));
}

#[test]
fn nullable_spread_skips_null() {
    let source = "a = null\nb = new Listing { ...?a; 1 }";
    assert_eq!(eval_expr(source, "b.length"), Object::Int(1));
}

#[test]
fn spread_of_collections() {
    let source = "b = new Listing { ...List(1, 2); ...IntSeq(3, 4) }";
    assert_eq!(eval_expr(source, "b.length"), Object::Int(4));
    assert_eq!(eval_expr(source, "b[3]"), Object::Int(4));
}

#[test]
fn function_amendment_wraps_the_result() {
    let source = "f = (n) -> new Dynamic { x = n }\ng = (f) { y = 2 }";
    assert_eq!(eval_expr(source, "g.apply(1).x"), Object::Int(1));
    assert_eq!(eval_expr(source, "g.apply(1).y"), Object::Int(2));
}

#[test]
fn amending_a_scalar_is_an_error() {
    let mut evaluator = Evaluator::new(EvaluatorOptions::default());
    let err = evaluator.evaluate_expression("a = 5", "(a) { x = 1 }").unwrap_err();
    assert!(err.message.contains("cannot amend"), "{}", err.message);
}

#[test]
fn local_members_stay_private() {
    let source = "a = new Dynamic { local secret = 1; open_ = secret + 1 }";
    assert_eq!(eval_expr(source, "a.open_"), Object::Int(2));
    let mut evaluator = Evaluator::new(EvaluatorOptions::default());
    let err = evaluator.evaluate_expression(source, "a.secret").unwrap_err();
    assert_eq!(err.kind, pkl::ErrorKind::UndefinedProperty);
}

#[test]
fn hidden_members_resolve_but_are_not_exported() {
    let source = "a = new Dynamic { hidden token = \"t\"; uses = token + \"!\" }";
    assert_eq!(eval_expr(source, "a.uses"), Object::String("t!".into()));
    let mut evaluator = Evaluator::new(EvaluatorOptions::default());
    let module = evaluator.evaluate_text(source).unwrap();
    let a = module.property("a").unwrap();
    assert!(a.property("token").is_none());
    assert!(a.property("uses").is_some());
}

#[test]
fn module_amends_chain_late_binds() {
    let mut evaluator = Evaluator::new(EvaluatorOptions::default());
    evaluator.add_repl_module("base", "x = 1\ny = x + 1");
    let module = evaluator.evaluate_text("amends \"repl:base\"\nx = 10").unwrap();
    assert_eq!(module.property("y").and_then(Object::as_int), Some(11));
}
