//! Failure semantics: cycles, arithmetic, throw, null assertions, stack
//! traces, cancellation, and tracing.

use std::time::Duration;

use pkl::{CancelToken, ErrorKind, Evaluator, EvaluatorOptions, Limits, Object, PklError, RecordingTracer};

fn eval_err(source: &str, expr: &str) -> PklError {
    let mut evaluator = Evaluator::new(EvaluatorOptions::default());
    evaluator.evaluate_expression(source, expr).unwrap_err()
}

#[test]
fn property_cycle_names_both_members() {
    let err = eval_err("a = b\nb = a", "a");
    assert_eq!(err.kind, ErrorKind::CycleError);
    assert!(err.message.contains("circular"), "{}", err.message);
    let members: Vec<&str> = err.frames.iter().filter_map(|f| f.member.as_deref()).collect();
    assert!(members.contains(&"a"), "frames: {members:?}");
    assert!(members.contains(&"b"), "frames: {members:?}");
}

#[test]
fn self_cycle_is_detected() {
    let err = eval_err("a = a + 1", "a");
    assert_eq!(err.kind, ErrorKind::CycleError);
}

#[test]
fn stack_frames_carry_locations() {
    let err = eval_err("a = b\nb = a", "a");
    assert!(!err.frames.is_empty());
    for frame in &err.frames {
        assert!(frame.location.contains("repl:"), "{}", frame.location);
        assert!(frame.location.rsplit(':').count() >= 2, "{}", frame.location);
    }
}

#[test]
fn division_by_zero() {
    let err = eval_err("", "1 ~/ 0");
    assert_eq!(err.kind, ErrorKind::ArithmeticError);
    assert!(err.message.contains("division by zero"), "{}", err.message);
    assert_eq!(eval_err("", "1 % 0").kind, ErrorKind::ArithmeticError);
}

#[test]
fn integer_overflow_is_checked() {
    let err = eval_err("", "9223372036854775807 + 1");
    assert_eq!(err.kind, ErrorKind::ArithmeticError);
    assert!(err.message.contains("overflow"), "{}", err.message);
    assert_eq!(eval_err("", "9223372036854775807 * 2").kind, ErrorKind::ArithmeticError);
}

#[test]
fn float_division_is_unchecked() {
    let mut evaluator = Evaluator::new(EvaluatorOptions::default());
    let value = evaluator.evaluate_expression("", "1.0 / 0.0").unwrap();
    assert_eq!(value, Object::Float(f64::INFINITY));
}

#[test]
fn throw_carries_the_message() {
    let err = eval_err("", "throw(\"boom\")");
    assert_eq!(err.kind, ErrorKind::UserError);
    assert_eq!(err.message, "boom");
}

#[test]
fn non_null_assertion_on_null() {
    let err = eval_err("a = null", "a!!");
    assert!(err.message.contains("non-null"), "{}", err.message);
}

#[test]
fn unknown_member_access() {
    let err = eval_err("a = new Dynamic { x = 1 }", "a.missing");
    assert_eq!(err.kind, ErrorKind::UndefinedProperty);
    assert!(err.message.contains("missing"), "{}", err.message);
}

#[test]
fn runaway_recursion_is_stopped() {
    let options = EvaluatorOptions {
        limits: Limits::none().with_max_recursion_depth(64),
        ..EvaluatorOptions::default()
    };
    let mut evaluator = Evaluator::new(options);
    let err = evaluator
        .evaluate_expression("function f(n) = f(n + 1)", "f(0)")
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::StackOverflow);
}

#[test]
fn cancellation_is_observed() {
    let token = CancelToken::new();
    token.cancel();
    let options = EvaluatorOptions {
        limits: Limits::none().with_cancel_token(token),
        ..EvaluatorOptions::default()
    };
    let mut evaluator = Evaluator::new(options);
    let err = evaluator.evaluate_text("x = 1").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Cancelled);
}

#[test]
fn timeout_is_observed() {
    let options = EvaluatorOptions {
        limits: Limits::none().with_timeout(Duration::ZERO),
        ..EvaluatorOptions::default()
    };
    let mut evaluator = Evaluator::new(options);
    let err = evaluator.evaluate_text("x = 1").unwrap_err();
    assert_eq!(err.kind, ErrorKind::TimedOut);
}

#[test]
fn errors_do_not_poison_other_properties() {
    let mut evaluator = Evaluator::new(EvaluatorOptions::default());
    let err = evaluator.evaluate_expression("good = 1\nbad = throw(\"no\")", "bad").unwrap_err();
    assert_eq!(err.kind, ErrorKind::UserError);
    // the same evaluator still answers for the healthy property
    let value = evaluator.evaluate_expression("good = 1\nbad = throw(\"no\")", "good").unwrap();
    assert_eq!(value, Object::Int(1));
}

#[test]
fn trace_returns_the_value_and_logs_it() {
    let mut evaluator = Evaluator::with_tracer(EvaluatorOptions::default(), RecordingTracer::new());
    let value = evaluator.evaluate_expression("", "trace(1 + 2) * 10").unwrap();
    assert_eq!(value, Object::Int(30));
    let traces = evaluator.tracer().traces();
    assert_eq!(traces, vec!["3"]);
}

#[test]
fn trace_records_the_source_text() {
    let mut evaluator = Evaluator::with_tracer(EvaluatorOptions::default(), RecordingTracer::new());
    evaluator.evaluate_expression("", "trace(1 + 2)").unwrap();
    let events = &evaluator.tracer().events;
    assert!(matches!(
        &events[0],
        pkl::TraceEvent::Trace { expression, rendered }
            if expression == "1 + 2" && rendered == "3"
    ));
}

#[test]
fn nested_error_rendering_indents_causes() {
    let err = eval_err("x: String|Int(isPositive) = -1", "x");
    let rendered = err.to_string();
    assert!(rendered.contains("expected String|Int(isPositive), got Int"), "{rendered}");
    // causes are indented beneath the summary
    assert!(rendered.contains("\n  TypeMismatch: expected String, got Int"), "{rendered}");
    assert!(
        rendered.contains("\n  ConstraintViolation: constraint isPositive violated"),
        "{rendered}"
    );
}
