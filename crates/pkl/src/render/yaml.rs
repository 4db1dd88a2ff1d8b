//! YAML renderer.
//!
//! Block style throughout. Strings are quoted whenever a plain scalar would
//! be ambiguous: reserved words, number-like text, leading or trailing
//! whitespace, or YAML indicator characters. Multi-line strings use literal
//! block scalars. The flavour controls which reserved words need quoting —
//! YAML 1.1 treats `yes`/`no`/`on`/`off` as booleans, 1.2 does not, and the
//! compat flavour quotes everything either version would reinterpret.

use std::fmt::Write as _;

use crate::{errors::PklError, object::Object, value::fmt_float};

/// The YAML dialect to stay unambiguous in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum YamlFlavor {
    /// Safe under both 1.1 and 1.2 readers.
    #[default]
    Compat,
    V1_1,
    V1_2,
}

pub fn render(value: &Object, flavor: YamlFlavor) -> Result<String, PklError> {
    let mut out = String::new();
    write_value(&mut out, value, 0, false, flavor)?;
    if !out.ends_with('\n') {
        out.push('\n');
    }
    Ok(out)
}

fn write_value(out: &mut String, value: &Object, depth: usize, inline: bool, flavor: YamlFlavor) -> Result<(), PklError> {
    match value {
        Object::Null => out.push_str("null"),
        Object::Bool(b) => {
            let _ = write!(out, "{b}");
        }
        Object::Int(i) => {
            let _ = write!(out, "{i}");
        }
        Object::Float(f) => {
            if f.is_nan() {
                out.push_str(".nan");
            } else if f.is_infinite() {
                out.push_str(if *f > 0.0 { ".inf" } else { "-.inf" });
            } else {
                out.push_str(&fmt_float(*f));
            }
        }
        Object::String(s) => write_string(out, s, depth, flavor),
        Object::List(items) | Object::Set(items) => write_sequence(out, items, depth, inline, flavor)?,
        Object::Listing(body) => write_sequence(out, &body.elements, depth, inline, flavor)?,
        Object::Map(entries) => write_mapping(out, entries, depth, inline, flavor)?,
        Object::Mapping(body) => write_mapping(out, &body.entries, depth, inline, flavor)?,
        Object::Typed(body) | Object::Dynamic(body) | Object::Module(body) => {
            if body.properties.is_empty() && body.entries.is_empty() && !body.elements.is_empty() {
                return write_sequence(out, &body.elements, depth, inline, flavor);
            }
            if !body.elements.is_empty() {
                return Err(super::unrenderable(value, "YAML"));
            }
            let members: Vec<(Object, Object)> = body
                .properties
                .iter()
                .map(|(k, v)| (Object::String(k.clone()), v.clone()))
                .chain(body.entries.iter().cloned())
                .collect();
            write_mapping(out, &members, depth, inline, flavor)?;
        }
        _ => return Err(super::unrenderable(value, "YAML")),
    }
    Ok(())
}

fn write_sequence(
    out: &mut String,
    items: &[Object],
    depth: usize,
    inline: bool,
    flavor: YamlFlavor,
) -> Result<(), PklError> {
    if items.is_empty() {
        out.push_str("[]");
        return Ok(());
    }
    for (i, item) in items.iter().enumerate() {
        if i > 0 || inline {
            out.push('\n');
            indent(out, depth);
        }
        out.push_str("- ");
        write_value(out, item, depth + 1, true, flavor)?;
    }
    Ok(())
}

fn write_mapping(
    out: &mut String,
    entries: &[(Object, Object)],
    depth: usize,
    inline: bool,
    flavor: YamlFlavor,
) -> Result<(), PklError> {
    if entries.is_empty() {
        out.push_str("{}");
        return Ok(());
    }
    for (i, (key, value)) in entries.iter().enumerate() {
        if i > 0 || inline {
            out.push('\n');
            indent(out, depth);
        }
        let Object::String(key) = key else {
            return Err(super::unrenderable(key, "YAML (as a mapping key)"));
        };
        write_scalar_key(out, key, flavor);
        out.push(':');
        if is_block(value) {
            write_value(out, value, depth + 1, true, flavor)?;
        } else {
            out.push(' ');
            write_value(out, value, depth + 1, false, flavor)?;
        }
    }
    Ok(())
}

/// A value that renders as nested block lines rather than one scalar.
fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

fn is_block(value: &Object) -> bool {
    match value {
        Object::List(items) | Object::Set(items) => !items.is_empty(),
        Object::Listing(body) => !body.elements.is_empty(),
        Object::Map(entries) => !entries.is_empty(),
        Object::Mapping(body) => !body.entries.is_empty(),
        Object::Typed(body) | Object::Dynamic(body) | Object::Module(body) => {
            !(body.properties.is_empty() && body.entries.is_empty() && body.elements.is_empty())
        }
        _ => false,
    }
}

fn write_string(out: &mut String, s: &str, depth: usize, flavor: YamlFlavor) {
    if s.contains('\n') && !s.contains(|c: char| c.is_control() && c != '\n') {
        // literal block scalar, on the same line as its key or dash
        out.push('|');
        if !s.ends_with('\n') {
            out.push('-');
        }
        for line in s.trim_end_matches('\n').split('\n') {
            out.push('\n');
            indent(out, depth);
            out.push_str(line);
        }
        return;
    }
    if needs_quoting(s, flavor) {
        crate::render::json::write_string(out, s);
    } else {
        out.push_str(s);
    }
}

fn write_scalar_key(out: &mut String, key: &str, flavor: YamlFlavor) {
    if needs_quoting(key, flavor) || key.contains(':') {
        crate::render::json::write_string(out, key);
    } else {
        out.push_str(key);
    }
}

/// Quoting is chosen to avoid ambiguity with reserved words, numbers,
/// dates, and significant whitespace.
fn needs_quoting(s: &str, flavor: YamlFlavor) -> bool {
    if s.is_empty() {
        return true;
    }
    if s.trim() != s {
        return true;
    }
    let lowered = s.to_ascii_lowercase();
    let reserved_12 = matches!(lowered.as_str(), "null" | "~" | "true" | "false" | "" | ".nan" | ".inf" | "-.inf");
    let reserved_11 = matches!(lowered.as_str(), "yes" | "no" | "on" | "off" | "y" | "n");
    let reserved = match flavor {
        YamlFlavor::V1_2 => reserved_12,
        YamlFlavor::V1_1 | YamlFlavor::Compat => reserved_12 || reserved_11,
    };
    if reserved {
        return true;
    }
    // number- and date-like scalars
    if s.parse::<f64>().is_ok() || s.parse::<i64>().is_ok() {
        return true;
    }
    if looks_like_date(s) || looks_like_sexagesimal(s, flavor) {
        return true;
    }
    let first = s.chars().next().expect("non-empty");
    if matches!(
        first,
        '!' | '&' | '*' | '-' | '?' | '{' | '}' | '[' | ']' | ',' | '#' | '|' | '>' | '@' | '`' | '"' | '\'' | '%' | ' '
    ) {
        return true;
    }
    s.contains(": ") || s.ends_with(':') || s.contains(" #") || s.contains(|c: char| c.is_control())
}

fn looks_like_date(s: &str) -> bool {
    let mut parts = s.split('-');
    matches!(
        (parts.next(), parts.next(), parts.next(), parts.next()),
        (Some(y), Some(m), Some(d), None)
            if y.len() == 4 && y.bytes().all(|b| b.is_ascii_digit())
                && !m.is_empty() && m.bytes().all(|b| b.is_ascii_digit())
                && !d.is_empty() && d.bytes().all(|b| b.is_ascii_digit())
    )
}

/// YAML 1.1 reads `1:30` as sexagesimal 90.
fn looks_like_sexagesimal(s: &str, flavor: YamlFlavor) -> bool {
    if flavor == YamlFlavor::V1_2 {
        return false;
    }
    let mut saw_colon = false;
    for part in s.split(':') {
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
        saw_colon = true;
    }
    saw_colon && s.contains(':')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::StructBody;

    fn module(properties: Vec<(String, Object)>) -> Object {
        Object::Module(Box::new(StructBody {
            class_name: "m".into(),
            module_uri: "repl:x".into(),
            properties,
            elements: vec![],
            entries: vec![],
        }))
    }

    #[test]
    fn plain_scalars() {
        let m = module(vec![
            ("a".into(), Object::Int(1)),
            ("b".into(), Object::String("plain".into())),
        ]);
        assert_eq!(render(&m, YamlFlavor::Compat).unwrap(), "a: 1\nb: plain\n");
    }

    #[test]
    fn ambiguous_strings_are_quoted() {
        let m = module(vec![
            ("a".into(), Object::String("yes".into())),
            ("b".into(), Object::String("1.5".into())),
            ("c".into(), Object::String(" padded".into())),
        ]);
        assert_eq!(render(&m, YamlFlavor::Compat).unwrap(), "a: \"yes\"\nb: \"1.5\"\nc: \" padded\"\n");
    }

    #[test]
    fn yes_is_plain_in_v12() {
        let m = module(vec![("a".into(), Object::String("yes".into()))]);
        assert_eq!(render(&m, YamlFlavor::V1_2).unwrap(), "a: yes\n");
    }

    #[test]
    fn nested_sequences() {
        let m = module(vec![(
            "xs".into(),
            Object::List(vec![Object::Int(1), Object::Int(2)]),
        )]);
        assert_eq!(render(&m, YamlFlavor::Compat).unwrap(), "xs:\n  - 1\n  - 2\n");
    }

    #[test]
    fn multiline_block_literal() {
        let m = module(vec![("text".into(), Object::String("line one\nline two".into()))]);
        assert_eq!(
            render(&m, YamlFlavor::Compat).unwrap(),
            "text: |-\n  line one\n  line two\n"
        );
    }
}
