//! JSON renderer.
//!
//! Maps and mappings render as JSON objects only when every key is a
//! string; anything else is an error. Objects render their properties,
//! then entries; listings render as arrays.

use std::fmt::Write as _;

use crate::{errors::PklError, object::Object, value::fmt_float};

const INDENT: &str = "  ";

pub fn render(value: &Object) -> Result<String, PklError> {
    let mut out = String::new();
    write_value(&mut out, value, 0)?;
    out.push('\n');
    Ok(out)
}

fn write_value(out: &mut String, value: &Object, depth: usize) -> Result<(), PklError> {
    match value {
        Object::Null => out.push_str("null"),
        Object::Bool(b) => {
            let _ = write!(out, "{b}");
        }
        Object::Int(i) => {
            let _ = write!(out, "{i}");
        }
        Object::Float(f) => {
            if !f.is_finite() {
                return Err(super::unrenderable(value, "JSON"));
            }
            out.push_str(&fmt_float(*f));
        }
        Object::String(s) => write_string(out, s),
        Object::List(items) | Object::Set(items) => write_array(out, items, depth)?,
        Object::Listing(body) => write_array(out, &body.elements, depth)?,
        Object::Map(entries) => write_pairs(out, entries.iter(), depth)?,
        Object::Mapping(body) => write_pairs(out, body.entries.iter(), depth)?,
        Object::Typed(body) | Object::Dynamic(body) | Object::Module(body) => {
            if body.properties.is_empty() && body.entries.is_empty() && !body.elements.is_empty() {
                return write_array(out, &body.elements, depth);
            }
            if !body.elements.is_empty() {
                return Err(super::unrenderable(value, "JSON"));
            }
            let members = body
                .properties
                .iter()
                .map(|(k, v)| (Object::String(k.clone()), v.clone()))
                .chain(body.entries.iter().cloned())
                .collect::<Vec<_>>();
            write_pairs(out, members.iter(), depth)?;
        }
        _ => return Err(super::unrenderable(value, "JSON")),
    }
    Ok(())
}

fn write_array(out: &mut String, items: &[Object], depth: usize) -> Result<(), PklError> {
    if items.is_empty() {
        out.push_str("[]");
        return Ok(());
    }
    out.push_str("[\n");
    for (i, item) in items.iter().enumerate() {
        indent(out, depth + 1);
        write_value(out, item, depth + 1)?;
        if i + 1 < items.len() {
            out.push(',');
        }
        out.push('\n');
    }
    indent(out, depth);
    out.push(']');
    Ok(())
}

fn write_pairs<'a>(
    out: &mut String,
    entries: impl ExactSizeIterator<Item = &'a (Object, Object)>,
    depth: usize,
) -> Result<(), PklError> {
    let len = entries.len();
    if len == 0 {
        out.push_str("{}");
        return Ok(());
    }
    out.push_str("{\n");
    for (i, (key, value)) in entries.enumerate() {
        let Object::String(key) = key else {
            return Err(super::unrenderable(key, "JSON (as an object key)"));
        };
        indent(out, depth + 1);
        write_string(out, key);
        out.push_str(": ");
        write_value(out, value, depth + 1)?;
        if i + 1 < len {
            out.push(',');
        }
        out.push('\n');
    }
    indent(out, depth);
    out.push('}');
    Ok(())
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str(INDENT);
    }
}

pub(crate) fn write_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::StructBody;

    #[test]
    fn scalars_and_escapes() {
        assert_eq!(render(&Object::Int(42)).unwrap(), "42\n");
        assert_eq!(render(&Object::Float(1.5)).unwrap(), "1.5\n");
        assert_eq!(render(&Object::String("a\"b\n".into())).unwrap(), "\"a\\\"b\\n\"\n");
        assert_eq!(render(&Object::Null).unwrap(), "null\n");
    }

    #[test]
    fn integer_float_distinction_survives() {
        assert_eq!(render(&Object::Float(1.0)).unwrap(), "1.0\n");
        assert_eq!(render(&Object::Int(1)).unwrap(), "1\n");
    }

    #[test]
    fn module_renders_as_object() {
        let module = Object::Module(Box::new(StructBody {
            class_name: "m".into(),
            module_uri: "repl:x".into(),
            properties: vec![("a".into(), Object::Int(1)), ("b".into(), Object::List(vec![Object::Int(2)]))],
            elements: vec![],
            entries: vec![],
        }));
        assert_eq!(render(&module).unwrap(), "{\n  \"a\": 1,\n  \"b\": [\n    2\n  ]\n}\n");
    }

    #[test]
    fn non_string_keys_are_rejected() {
        let map = Object::Map(vec![(Object::Int(1), Object::Int(2))]);
        assert!(render(&map).is_err());
    }

    #[test]
    fn durations_are_rejected() {
        let duration = Object::Duration {
            value: 5.0,
            unit: "min".into(),
        };
        assert!(render(&duration).is_err());
    }
}
