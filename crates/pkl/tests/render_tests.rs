//! End-to-end rendering of evaluated modules in each output format.

use pkl::{
    Evaluator, EvaluatorOptions, Object,
    render::{OutputFormat, json, plist, properties, render, xml, yaml},
};

fn evaluate(source: &str) -> Object {
    let mut evaluator = Evaluator::new(EvaluatorOptions::default());
    evaluator.evaluate_text(source).unwrap()
}

const CONFIG: &str = "name = \"swallow\"\nairspeed = 24\nratio = 0.5\ntags = new Listing { \"bird\"; \"fast\" }\nmeta = new Mapping { [\"origin\"] = \"africa\" }";

#[test]
fn json_output() {
    let rendered = json::render(&evaluate(CONFIG)).unwrap();
    let expected = "{\n  \"name\": \"swallow\",\n  \"airspeed\": 24,\n  \"ratio\": 0.5,\n  \"tags\": [\n    \"bird\",\n    \"fast\"\n  ],\n  \"meta\": {\n    \"origin\": \"africa\"\n  }\n}\n";
    assert_eq!(rendered, expected);
}

#[test]
fn yaml_output() {
    let rendered = yaml::render(&evaluate(CONFIG), yaml::YamlFlavor::Compat).unwrap();
    let expected = "name: swallow\nairspeed: 24\nratio: 0.5\ntags:\n  - bird\n  - fast\nmeta:\n  origin: africa\n";
    assert_eq!(rendered, expected);
}

#[test]
fn xml_output() {
    let rendered = xml::render(&evaluate("x = 1")).unwrap();
    assert!(rendered.starts_with("<?xml version=\"1.0\""), "{rendered}");
    assert!(rendered.contains("<property name=\"x\">"), "{rendered}");
    assert!(rendered.contains("<int>1</int>"), "{rendered}");
}

#[test]
fn plist_output() {
    let rendered = plist::render(&evaluate("x = 1\nok = true")).unwrap();
    assert!(rendered.contains("<!DOCTYPE plist"), "{rendered}");
    assert!(rendered.contains("<key>x</key>"), "{rendered}");
    assert!(rendered.contains("<integer>1</integer>"), "{rendered}");
    assert!(rendered.contains("<true/>"), "{rendered}");
}

#[test]
fn properties_output() {
    let rendered = properties::render(&evaluate("port = 8080\ndb { host = \"localhost\" }")).unwrap();
    assert_eq!(rendered, "port = 8080\ndb.host = localhost\n");
}

#[test]
fn render_dispatch_covers_all_formats() {
    let module = evaluate("x = 1");
    for format in [
        OutputFormat::Json,
        OutputFormat::Yaml,
        OutputFormat::Xml,
        OutputFormat::Plist,
        OutputFormat::Properties,
        OutputFormat::Binary,
    ] {
        let bytes = render(format, &module, "m", "repl:text1").unwrap();
        assert!(!bytes.is_empty(), "{format} produced no output");
    }
}

#[test]
fn format_names_parse() {
    assert_eq!(OutputFormat::parse("json"), Some(OutputFormat::Json));
    assert_eq!(OutputFormat::parse("pkl-binary"), Some(OutputFormat::Binary));
    assert_eq!(OutputFormat::parse("binary"), Some(OutputFormat::Binary));
    assert_eq!(OutputFormat::parse("nope"), None);
}

#[test]
fn stdlib_typealiases_are_importable() {
    let mut evaluator = Evaluator::new(EvaluatorOptions::default());
    let source = "import \"pkl:base\"\nname: base.NonEmptyString = \"ok\"";
    let module = evaluator.evaluate_text(source).unwrap();
    assert_eq!(module.property("name").and_then(Object::as_str), Some("ok"));

    let bad = "import \"pkl:base\"\nname: base.NonEmptyString = \"\"";
    let err = evaluator.evaluate_text(bad).unwrap_err();
    assert_eq!(err.kind, pkl::ErrorKind::ConstraintViolation);
}
