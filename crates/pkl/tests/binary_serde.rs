//! The Pkl binary format: encoding evaluated modules and decoding them
//! back, including hand-written envelopes.

use pkl::{
    Evaluator, EvaluatorOptions, Object,
    render::{OutputFormat, binary, render},
};

fn evaluate(source: &str) -> Object {
    let mut evaluator = Evaluator::new(EvaluatorOptions::default());
    evaluator.evaluate_text(source).unwrap()
}

#[test]
fn round_trip_through_the_wire_format() {
    let module = evaluate(
        "name = \"swallow\"\nairspeed = 24\nratio = 0.5\nflags = List(true, false)\nlimits = Map(\"max\", 9)\nnested = new Dynamic { a = 1; \"el\" }",
    );
    let uri = match &module {
        Object::Module(body) => body.module_uri.clone(),
        other => panic!("expected a module, got {other}"),
    };
    let bytes = binary::encode(&module, "swallow", &uri).unwrap();
    let decoded = binary::decode(&bytes).unwrap();
    assert_eq!(decoded, module);
}

#[test]
fn round_trip_preserves_number_kinds() {
    let module = evaluate("i = 1\nf = 1.0");
    let bytes = binary::encode(&module, "m", "repl:text1").unwrap();
    let decoded = binary::decode(&bytes).unwrap();
    assert_eq!(decoded.property("i"), Some(&Object::Int(1)));
    assert_eq!(decoded.property("f"), Some(&Object::Float(1.0)));
}

#[test]
fn round_trip_tagged_kinds() {
    let module = evaluate(
        "d = 5.min\nsize = 2.kib\npair = Pair(1, \"a\")\nseq = IntSeq(1, 9).step(2)\nre = Regex(\"a+b\")",
    );
    let bytes = binary::encode(&module, "m", "repl:text1").unwrap();
    let decoded = binary::decode(&bytes).unwrap();
    assert_eq!(
        decoded.property("d"),
        Some(&Object::Duration {
            value: 5.0,
            unit: "min".into()
        })
    );
    assert_eq!(
        decoded.property("size"),
        Some(&Object::DataSize {
            value: 2.0,
            unit: "kib".into()
        })
    );
    assert_eq!(
        decoded.property("pair"),
        Some(&Object::Pair(Box::new((Object::Int(1), Object::String("a".into())))))
    );
    assert_eq!(
        decoded.property("seq"),
        Some(&Object::IntSeq {
            start: 1,
            end: 9,
            step: 2
        })
    );
    assert_eq!(decoded.property("re"), Some(&Object::Regex("a+b".into())));
}

#[test]
fn render_entry_point_emits_binary() {
    let module = evaluate("x = 1");
    let bytes = render(OutputFormat::Binary, &module, "m", "repl:text1").unwrap();
    let decoded = binary::decode(&bytes).unwrap();
    assert_eq!(decoded.property("x"), Some(&Object::Int(1)));
}

#[test]
fn decode_spec_envelope() {
    // [1, "test", "file:///t.pkl", [[16, "pigeon", [4, "Dynamic", "pkl:base", [[16, "age", 30]]]]]]
    // handed over as raw MessagePack bytes
    let bytes: &[u8] = &[
        0x94, // array of 4
        0x01, // 1
        0xa4, b't', b'e', b's', b't', // "test"
        0xad, b'f', b'i', b'l', b'e', b':', b'/', b'/', b'/', b't', b'.', b'p', b'k', b'l', // "file:///t.pkl"
        0x91, // members: array of 1
        0x93, // property member: array of 3
        0x10, // 16
        0xa6, b'p', b'i', b'g', b'e', b'o', b'n', // "pigeon"
        0x94, // object: array of 4
        0x04, // kind 4
        0xa7, b'D', b'y', b'n', b'a', b'm', b'i', b'c', // "Dynamic"
        0xa8, b'p', b'k', b'l', b':', b'b', b'a', b's', b'e', // "pkl:base"
        0x91, // members: array of 1
        0x93, // property member: array of 3
        0x10, // 16
        0xa3, b'a', b'g', b'e', // "age"
        0x1e, // 30
    ];
    let module = binary::decode(bytes).unwrap();
    let age = module.property("pigeon").and_then(|p| p.property("age"));
    assert_eq!(age.and_then(Object::as_int), Some(30));
    // the class name decides the structural kind
    assert!(matches!(module.property("pigeon"), Some(Object::Dynamic(_))));
}

#[test]
fn functions_do_not_serialize() {
    let module = evaluate("f = (x) -> x");
    assert!(binary::encode(&module, "m", "repl:text1").is_err());
}
