//! Java-style `.properties` renderer.
//!
//! Nested structure flattens into dotted keys; elements use their index as
//! the key segment. Only scalar leaves are representable.

use std::fmt::Write as _;

use crate::{errors::PklError, object::Object, value::fmt_float};

pub fn render(value: &Object) -> Result<String, PklError> {
    let mut out = String::new();
    write_value(&mut out, "", value)?;
    Ok(out)
}

fn write_value(out: &mut String, prefix: &str, value: &Object) -> Result<(), PklError> {
    match value {
        Object::Null => write_line(out, prefix, ""),
        Object::Bool(b) => write_line(out, prefix, &b.to_string()),
        Object::Int(i) => write_line(out, prefix, &i.to_string()),
        Object::Float(f) => write_line(out, prefix, &fmt_float(*f)),
        Object::String(s) => write_line(out, prefix, s),
        Object::Duration { value, unit } | Object::DataSize { value, unit } => {
            write_line(out, prefix, &format!("{}.{unit}", crate::value::fmt_number(*value)));
        }
        Object::List(items) | Object::Set(items) => {
            for (index, item) in items.iter().enumerate() {
                write_value(out, &join(prefix, &index.to_string()), item)?;
            }
        }
        Object::Listing(body) => {
            for (index, item) in body.elements.iter().enumerate() {
                write_value(out, &join(prefix, &index.to_string()), item)?;
            }
        }
        Object::Map(entries) => write_entries(out, prefix, entries)?,
        Object::Mapping(body) => write_entries(out, prefix, &body.entries)?,
        Object::Typed(body) | Object::Dynamic(body) | Object::Module(body) => {
            for (name, value) in &body.properties {
                write_value(out, &join(prefix, name), value)?;
            }
            for (index, item) in body.elements.iter().enumerate() {
                write_value(out, &join(prefix, &index.to_string()), item)?;
            }
            write_entries(out, prefix, &body.entries)?;
        }
        _ => return Err(super::unrenderable(value, "properties")),
    }
    Ok(())
}

fn write_entries(out: &mut String, prefix: &str, entries: &[(Object, Object)]) -> Result<(), PklError> {
    for (key, value) in entries {
        let key = match key {
            Object::String(s) => s.clone(),
            Object::Int(i) => i.to_string(),
            Object::Bool(b) => b.to_string(),
            other => return Err(super::unrenderable(other, "properties (as a key)")),
        };
        write_value(out, &join(prefix, &key), value)?;
    }
    Ok(())
}

fn join(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_owned()
    } else {
        format!("{prefix}.{segment}")
    }
}

fn write_line(out: &mut String, key: &str, value: &str) {
    escape_key(out, if key.is_empty() { "value" } else { key });
    out.push_str(" = ");
    escape_value(out, value);
    out.push('\n');
}

fn escape_key(out: &mut String, key: &str) {
    for c in key.chars() {
        match c {
            ' ' | ':' | '=' | '\\' | '#' | '!' => {
                out.push('\\');
                out.push(c);
            }
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) > 0x7e || (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
}

fn escape_value(out: &mut String, value: &str) {
    for (i, c) in value.chars().enumerate() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            ' ' if i == 0 => out.push_str("\\ "),
            c if (c as u32) > 0x7e || (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::StructBody;

    #[test]
    fn nested_keys_flatten() {
        let module = Object::Module(Box::new(StructBody {
            class_name: "m".into(),
            module_uri: "repl:x".into(),
            properties: vec![
                ("port".into(), Object::Int(8080)),
                (
                    "db".into(),
                    Object::Dynamic(Box::new(StructBody {
                        class_name: "pkl:base#Dynamic".into(),
                        module_uri: "pkl:base".into(),
                        properties: vec![("host".into(), Object::String("localhost".into()))],
                        elements: vec![],
                        entries: vec![],
                    })),
                ),
            ],
            elements: vec![],
            entries: vec![],
        }));
        assert_eq!(render(&module).unwrap(), "port = 8080\ndb.host = localhost\n");
    }

    #[test]
    fn keys_are_escaped() {
        let module = Object::Module(Box::new(StructBody {
            class_name: "m".into(),
            module_uri: "repl:x".into(),
            properties: vec![("a key".into(), Object::Int(1))],
            elements: vec![],
            entries: vec![],
        }));
        assert_eq!(render(&module).unwrap(), "a\\ key = 1\n");
    }
}
