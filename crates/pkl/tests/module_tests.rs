//! Module loading: file imports, glob imports, trust levels, cycles,
//! triple-dot resolution, and the security policy.

use std::fs;

use pkl::{ErrorKind, Evaluator, EvaluatorOptions, Object, SecurityPolicy};

fn write(dir: &std::path::Path, name: &str, contents: &str) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
}

fn file_uri(dir: &std::path::Path, name: &str) -> String {
    pkl::path_to_file_uri(&dir.join(name))
}

#[test]
fn file_import() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "lib.pkl", "answer = 42");
    write(dir.path(), "main.pkl", "import \"lib.pkl\"\nx = lib.answer");
    let mut evaluator = Evaluator::new(EvaluatorOptions::default());
    let module = evaluator.evaluate_module(&file_uri(dir.path(), "main.pkl")).unwrap();
    assert_eq!(module.property("x").and_then(Object::as_int), Some(42));
}

#[test]
fn import_alias() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "very-long-name.pkl", "v = 1");
    write(dir.path(), "main.pkl", "import \"very-long-name.pkl\" as short\nx = short.v");
    let mut evaluator = Evaluator::new(EvaluatorOptions::default());
    let module = evaluator.evaluate_module(&file_uri(dir.path(), "main.pkl")).unwrap();
    assert_eq!(module.property("x").and_then(Object::as_int), Some(1));
}

#[test]
fn modules_are_cached_per_evaluator() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "lib.pkl", "v = 1");
    write(dir.path(), "a.pkl", "import \"lib.pkl\"\nx = lib.v");
    write(dir.path(), "b.pkl", "import \"a.pkl\"\nimport \"lib.pkl\"\ny = a.x + lib.v");
    let mut evaluator = Evaluator::new(EvaluatorOptions::default());
    let module = evaluator.evaluate_module(&file_uri(dir.path(), "b.pkl")).unwrap();
    assert_eq!(module.property("y").and_then(Object::as_int), Some(2));
}

#[test]
fn import_cycle_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.pkl", "import \"b.pkl\"\nx = b.y");
    write(dir.path(), "b.pkl", "import \"a.pkl\"\ny = a.x");
    let mut evaluator = Evaluator::new(EvaluatorOptions::default());
    let err = evaluator
        .evaluate_module_expression(&file_uri(dir.path(), "a.pkl"), "x")
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::ImportError);
    assert!(err.message.contains("circular"), "{}", err.message);
}

#[test]
fn glob_import_yields_a_lazy_mapping() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "d/a.pkl", "v = 1");
    write(dir.path(), "d/b.pkl", "v = 2");
    write(dir.path(), "main.pkl", "mods = import*(\"d/*.pkl\")");
    let uri = file_uri(dir.path(), "main.pkl");
    let mut evaluator = Evaluator::new(EvaluatorOptions::default());
    assert_eq!(
        evaluator.evaluate_module_expression(&uri, "mods.length").unwrap(),
        Object::Int(2)
    );
    assert_eq!(
        evaluator.evaluate_module_expression(&uri, "mods[\"a.pkl\"].v").unwrap(),
        Object::Int(1)
    );
    assert_eq!(
        evaluator.evaluate_module_expression(&uri, "mods[\"b.pkl\"].v").unwrap(),
        Object::Int(2)
    );
    // keys are sorted lexicographically
    let keys = evaluator.evaluate_module_expression(&uri, "mods.keys.toList()").unwrap();
    assert_eq!(keys.element(0), Some(&Object::String("a.pkl".into())));
    assert_eq!(keys.element(1), Some(&Object::String("b.pkl".into())));
}

#[test]
fn recursive_glob_finds_nested_modules() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "main.pkl", "mods = import*(\"**/*.pkl\")");
    write(dir.path(), "one.pkl", "v = 1");
    write(dir.path(), "sub/two.pkl", "v = 2");
    write(dir.path(), "sub/deep/three.pkl", "v = 3");
    let uri = file_uri(dir.path(), "main.pkl");
    let mut evaluator = Evaluator::new(EvaluatorOptions::default());
    // main.pkl itself also matches
    assert_eq!(
        evaluator.evaluate_module_expression(&uri, "mods.length").unwrap(),
        Object::Int(4)
    );
    assert_eq!(
        evaluator
            .evaluate_module_expression(&uri, "mods[\"sub/deep/three.pkl\"].v")
            .unwrap(),
        Object::Int(3)
    );
}

#[test]
fn glob_without_wildcards_requires_existence() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "main.pkl", "mods = import*(\"lib.pkl\")");
    write(dir.path(), "lib.pkl", "v = 1");
    let mut evaluator = Evaluator::new(EvaluatorOptions::default());
    let uri = file_uri(dir.path(), "main.pkl");
    assert_eq!(
        evaluator.evaluate_module_expression(&uri, "mods.length").unwrap(),
        Object::Int(1)
    );

    let dir2 = tempfile::tempdir().unwrap();
    write(dir2.path(), "main.pkl", "mods = import*(\"absent.pkl\")");
    let err = evaluator
        .evaluate_module_expression(&file_uri(dir2.path(), "main.pkl"), "mods")
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::ResolveError);
}

#[test]
fn trust_level_violation() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("foo.pkl");
    fs::write(&target, "v = 1").unwrap();
    let modulepath = tempfile::tempdir().unwrap();
    write(
        modulepath.path(),
        "importer.pkl",
        &format!("import \"{}\"\nx = foo.v", pkl::path_to_file_uri(&target)),
    );
    let options = EvaluatorOptions {
        module_path: vec![modulepath.path().to_path_buf()],
        ..EvaluatorOptions::default()
    };
    let mut evaluator = Evaluator::new(options);
    let err = evaluator
        .evaluate_module_expression("modulepath:/importer.pkl", "x")
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::ImportError);
    assert!(err.message.contains("trust level 20"), "{}", err.message);
    assert!(err.message.contains("trust level 30"), "{}", err.message);
}

#[test]
fn higher_trust_may_import_lower() {
    // a local file importing over modulepath is fine (30 >= 20)
    let dir = tempfile::tempdir().unwrap();
    let modulepath = tempfile::tempdir().unwrap();
    write(modulepath.path(), "lib.pkl", "v = 7");
    write(dir.path(), "main.pkl", "import \"modulepath:/lib.pkl\"\nx = lib.v");
    let options = EvaluatorOptions {
        module_path: vec![modulepath.path().to_path_buf()],
        ..EvaluatorOptions::default()
    };
    let mut evaluator = Evaluator::new(options);
    let module = evaluator.evaluate_module(&file_uri(dir.path(), "main.pkl")).unwrap();
    assert_eq!(module.property("x").and_then(Object::as_int), Some(7));
}

#[test]
fn security_policy_denies_unlisted_modules() {
    let options = EvaluatorOptions {
        security: SecurityPolicy::new(&["repl:"], &[]).unwrap(),
        ..EvaluatorOptions::default()
    };
    let mut evaluator = Evaluator::new(options);
    // repl itself is allowed
    evaluator.evaluate_text("x = 1").unwrap();
    // file modules are not
    let err = evaluator.evaluate_module("file:///etc/anything.pkl").unwrap_err();
    assert_eq!(err.kind, ErrorKind::ResolveError);
    assert!(err.message.contains("not allowed"), "{}", err.message);
}

#[test]
fn root_dir_confines_file_modules() {
    let dir = tempfile::tempdir().unwrap();
    let outside = tempfile::tempdir().unwrap();
    write(dir.path(), "main.pkl", "x = 1");
    write(outside.path(), "secret.pkl", "x = 2");
    let options = EvaluatorOptions {
        security: SecurityPolicy::unrestricted().with_root_dir(dir.path().to_path_buf()),
        ..EvaluatorOptions::default()
    };
    let mut evaluator = Evaluator::new(options);
    evaluator.evaluate_module(&file_uri(dir.path(), "main.pkl")).unwrap();
    let err = evaluator.evaluate_module(&file_uri(outside.path(), "secret.pkl")).unwrap_err();
    assert_eq!(err.kind, ErrorKind::ResolveError);
}

#[test]
fn triple_dot_resolves_upward() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "common.pkl", "v = \"shared\"");
    write(dir.path(), "nested/deep/main.pkl", "import \"...common.pkl\"\nx = common.v");
    let mut evaluator = Evaluator::new(EvaluatorOptions::default());
    let module = evaluator
        .evaluate_module(&file_uri(dir.path(), "nested/deep/main.pkl"))
        .unwrap();
    assert_eq!(module.property("x").and_then(Object::as_str), Some("shared"));
}

#[test]
fn triple_dot_finds_same_filename_for_amends() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "config.pkl", "greeting = \"hello\"\nloud = greeting + \"!\"");
    write(dir.path(), "prod/config.pkl", "amends \"...\"\ngreeting = \"HELLO\"");
    let mut evaluator = Evaluator::new(EvaluatorOptions::default());
    let module = evaluator
        .evaluate_module(&file_uri(dir.path(), "prod/config.pkl"))
        .unwrap();
    assert_eq!(module.property("loud").and_then(Object::as_str), Some("HELLO!"));
}

#[test]
fn module_extends_declares_new_members() {
    let mut evaluator = Evaluator::new(EvaluatorOptions::default());
    evaluator.add_repl_module("base", "open module base\nport = 80");
    let module = evaluator
        .evaluate_text("extends \"repl:base\"\nhost = \"localhost\"")
        .unwrap();
    assert_eq!(module.property("port").and_then(Object::as_int), Some(80));
    assert_eq!(module.property("host").and_then(Object::as_str), Some("localhost"));
}

#[test]
fn missing_module_is_a_resolve_error() {
    let mut evaluator = Evaluator::new(EvaluatorOptions::default());
    let err = evaluator.evaluate_module("file:///definitely/not/here.pkl").unwrap_err();
    assert_eq!(err.kind, ErrorKind::ResolveError);
    assert!(err.message.contains("cannot find module"), "{}", err.message);
}

#[test]
fn unknown_scheme_is_reported() {
    let mut evaluator = Evaluator::new(EvaluatorOptions::default());
    let err = evaluator.evaluate_module("warp://x/y.pkl").unwrap_err();
    assert_eq!(err.kind, ErrorKind::ResolveError);
    assert!(err.message.contains("warp"), "{}", err.message);
}

#[test]
fn package_scheme_reads_from_the_store() {
    let store = tempfile::tempdir().unwrap();
    let package_dir = store.path().join("example.com/birds@1.2.0");
    fs::create_dir_all(&package_dir).unwrap();
    fs::write(package_dir.join("Bird.pkl"), "wings = 2").unwrap();
    let options = EvaluatorOptions {
        package_store: Some(store.path().to_path_buf()),
        ..EvaluatorOptions::default()
    };
    let mut evaluator = Evaluator::new(options);
    let module = evaluator
        .evaluate_module("package://example.com/birds@1.2.0#/Bird.pkl")
        .unwrap();
    assert_eq!(module.property("wings").and_then(Object::as_int), Some(2));
}

#[test]
fn package_integrity_mismatch_is_an_error() {
    let store = tempfile::tempdir().unwrap();
    let package_dir = store.path().join("example.com/birds@1.2.0");
    fs::create_dir_all(&package_dir).unwrap();
    fs::write(package_dir.join("Bird.pkl"), "wings = 2").unwrap();
    fs::write(
        package_dir.join("package.sha256"),
        format!("{}  Bird.pkl\n", "0".repeat(64)),
    )
    .unwrap();
    let options = EvaluatorOptions {
        package_store: Some(store.path().to_path_buf()),
        ..EvaluatorOptions::default()
    };
    let mut evaluator = Evaluator::new(options);
    let err = evaluator
        .evaluate_module("package://example.com/birds@1.2.0#/Bird.pkl")
        .unwrap_err();
    assert!(err.message.contains("integrity"), "{}", err.message);
}
