//! Resource reads: `read`, `read?`, `read*`, and the env/prop schemes.

use std::{collections::HashMap, fs};

use pkl::{ErrorKind, Evaluator, EvaluatorOptions, Object, SecurityPolicy};

fn options_with_env(pairs: &[(&str, &str)]) -> EvaluatorOptions {
    let env_vars: HashMap<String, String> = pairs.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect();
    EvaluatorOptions {
        env_vars,
        ..EvaluatorOptions::default()
    }
}

#[test]
fn read_env_variable() {
    let mut evaluator = Evaluator::new(options_with_env(&[("HOME", "/home/bird")]));
    let value = evaluator.evaluate_expression("", "read(\"env:HOME\").text").unwrap();
    assert_eq!(value, Object::String("/home/bird".into()));
}

#[test]
fn read_external_property() {
    let properties: HashMap<String, String> = [("stage".to_owned(), "prod".to_owned())].into();
    let options = EvaluatorOptions {
        properties,
        ..EvaluatorOptions::default()
    };
    let mut evaluator = Evaluator::new(options);
    let value = evaluator.evaluate_expression("", "read(\"prop:stage\").text").unwrap();
    assert_eq!(value, Object::String("prod".into()));
}

#[test]
fn read_missing_fails_but_read_or_null_is_null() {
    let mut evaluator = Evaluator::new(EvaluatorOptions::default());
    let err = evaluator.evaluate_expression("", "read(\"env:NOPE\")").unwrap_err();
    assert_eq!(err.kind, ErrorKind::ResolveError);
    let value = evaluator.evaluate_expression("", "read?(\"env:NOPE\")").unwrap();
    assert_eq!(value, Object::Null);
}

#[test]
fn resource_view_exposes_uri_text_base64_bytes() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("data.txt"), "foo").unwrap();
    let source = format!("res = read(\"{}\")", pkl::path_to_file_uri(&dir.path().join("data.txt")));
    let mut evaluator = Evaluator::new(EvaluatorOptions::default());
    assert_eq!(
        evaluator.evaluate_expression(&source, "res.text").unwrap(),
        Object::String("foo".into())
    );
    assert_eq!(
        evaluator.evaluate_expression(&source, "res.base64").unwrap(),
        Object::String("Zm9v".into())
    );
    assert_eq!(
        evaluator.evaluate_expression(&source, "res.bytes.length").unwrap(),
        Object::Int(3)
    );
    let uri = evaluator.evaluate_expression(&source, "res.uri").unwrap();
    assert!(matches!(uri, Object::String(s) if s.ends_with("data.txt")));
}

#[test]
fn read_glob_returns_sorted_mapping() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("b.txt"), "B").unwrap();
    fs::write(dir.path().join("a.txt"), "A").unwrap();
    fs::write(dir.path().join("ignore.json"), "{}").unwrap();
    let main = dir.path().join("main.pkl");
    fs::write(&main, "files = read*(\"*.txt\")").unwrap();
    let uri = pkl::path_to_file_uri(&main);
    let mut evaluator = Evaluator::new(EvaluatorOptions::default());
    assert_eq!(
        evaluator.evaluate_module_expression(&uri, "files.length").unwrap(),
        Object::Int(2)
    );
    assert_eq!(
        evaluator.evaluate_module_expression(&uri, "files[\"a.txt\"].text").unwrap(),
        Object::String("A".into())
    );
    let keys = evaluator.evaluate_module_expression(&uri, "files.keys.toList()").unwrap();
    assert_eq!(keys.element(0), Some(&Object::String("a.txt".into())));
    assert_eq!(keys.element(1), Some(&Object::String("b.txt".into())));
}

#[test]
fn resource_reads_respect_the_policy() {
    let options = EvaluatorOptions {
        security: SecurityPolicy::new(&["repl:"], &["env:"]).unwrap(),
        env_vars: [("OK".to_owned(), "1".to_owned())].into(),
        ..EvaluatorOptions::default()
    };
    let mut evaluator = Evaluator::new(options);
    assert_eq!(
        evaluator.evaluate_expression("", "read(\"env:OK\").text").unwrap(),
        Object::String("1".into())
    );
    let err = evaluator
        .evaluate_expression("", "read(\"file:///etc/passwd\")")
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::ResolveError);
    assert!(err.message.contains("not allowed"), "{}", err.message);
}
