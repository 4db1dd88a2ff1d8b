//! XML renderer.
//!
//! Emits a self-describing element per value kind, conforming to the DTD in
//! the header comment: scalar kinds carry their text form, bytes are
//! base64, durations and data sizes use ISO-8601 / unit-qualified text, and
//! objects spell out properties, elements, and entries.

use std::fmt::Write as _;

use crate::{
    errors::PklError,
    object::{Object, StructBody},
    value::fmt_float,
};

const HEADER: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n";

pub fn render(value: &Object) -> Result<String, PklError> {
    let mut out = String::from(HEADER);
    write_value(&mut out, value, 0)?;
    out.push('\n');
    Ok(out)
}

fn write_value(out: &mut String, value: &Object, depth: usize) -> Result<(), PklError> {
    indent(out, depth);
    match value {
        Object::Null => out.push_str("<null/>"),
        Object::Bool(b) => {
            let _ = write!(out, "<boolean>{b}</boolean>");
        }
        Object::Int(i) => {
            let _ = write!(out, "<int>{i}</int>");
        }
        Object::Float(f) => {
            let _ = write!(out, "<float>{}</float>", fmt_float(*f));
        }
        Object::String(s) => {
            out.push_str("<string>");
            escape_into(out, s);
            out.push_str("</string>");
        }
        Object::Bytes(bytes) => {
            let _ = write!(out, "<bytes>{}</bytes>", crate::resource::base64_encode(bytes));
        }
        Object::Duration { value, unit } => {
            let duration = duration_of(*value, unit);
            let _ = write!(out, "<duration>{}</duration>", duration.iso8601());
        }
        Object::DataSize { value, unit } => {
            let _ = write!(out, "<dataSize unit=\"{unit}\">{}</dataSize>", crate::value::fmt_number(*value));
        }
        Object::Pair(pair) => {
            out.push_str("<pair>\n");
            write_value(out, &pair.0, depth + 1)?;
            out.push('\n');
            write_value(out, &pair.1, depth + 1)?;
            out.push('\n');
            indent(out, depth);
            out.push_str("</pair>");
        }
        Object::Regex(pattern) => {
            out.push_str("<regex>");
            escape_into(out, pattern);
            out.push_str("</regex>");
        }
        Object::IntSeq { start, end, step } => {
            let _ = write!(out, "<intSeq start=\"{start}\" end=\"{end}\" step=\"{step}\"/>");
        }
        Object::List(items) | Object::Set(items) => {
            let tag = if matches!(value, Object::Set(_)) { "set" } else { "list" };
            write_children(out, tag, items, depth)?;
        }
        Object::Map(entries) => {
            out.push_str("<map>\n");
            write_entries(out, entries, depth)?;
            indent(out, depth);
            out.push_str("</map>");
        }
        Object::Typed(body) | Object::Dynamic(body) | Object::Listing(body) | Object::Mapping(body)
        | Object::Module(body) => write_object(out, value, body, depth)?,
        Object::Function | Object::Class(_) | Object::TypeAlias(_) => {
            return Err(super::unrenderable(value, "XML"));
        }
    }
    Ok(())
}

fn write_object(out: &mut String, value: &Object, body: &StructBody, depth: usize) -> Result<(), PklError> {
    let kind = match value {
        Object::Typed(_) => "typed",
        Object::Dynamic(_) => "dynamic",
        Object::Listing(_) => "listing",
        Object::Mapping(_) => "mapping",
        _ => "module",
    };
    let _ = write!(out, "<object kind=\"{kind}\" class=\"");
    escape_into(out, &body.class_name);
    out.push_str("\">\n");
    for (name, value) in &body.properties {
        indent(out, depth + 1);
        out.push_str("<property name=\"");
        escape_into(out, name);
        out.push_str("\">\n");
        write_value(out, value, depth + 2)?;
        out.push('\n');
        indent(out, depth + 1);
        out.push_str("</property>\n");
    }
    for element in &body.elements {
        indent(out, depth + 1);
        out.push_str("<element>\n");
        write_value(out, element, depth + 2)?;
        out.push('\n');
        indent(out, depth + 1);
        out.push_str("</element>\n");
    }
    write_entries(out, &body.entries, depth)?;
    indent(out, depth);
    out.push_str("</object>");
    Ok(())
}

fn write_children(out: &mut String, tag: &str, items: &[Object], depth: usize) -> Result<(), PklError> {
    if items.is_empty() {
        let _ = write!(out, "<{tag}/>");
        return Ok(());
    }
    let _ = write!(out, "<{tag}>");
    out.push('\n');
    for item in items {
        write_value(out, item, depth + 1)?;
        out.push('\n');
    }
    indent(out, depth);
    let _ = write!(out, "</{tag}>");
    Ok(())
}

fn write_entries(out: &mut String, entries: &[(Object, Object)], depth: usize) -> Result<(), PklError> {
    for (key, value) in entries {
        indent(out, depth + 1);
        out.push_str("<entry>\n");
        indent(out, depth + 2);
        out.push_str("<key>\n");
        write_value(out, key, depth + 3)?;
        out.push('\n');
        indent(out, depth + 2);
        out.push_str("</key>\n");
        indent(out, depth + 2);
        out.push_str("<value>\n");
        write_value(out, value, depth + 3)?;
        out.push('\n');
        indent(out, depth + 2);
        out.push_str("</value>\n");
        indent(out, depth + 1);
        out.push_str("</entry>\n");
    }
    Ok(())
}

fn duration_of(value: f64, unit: &str) -> crate::value::Duration {
    use std::str::FromStr;
    let unit = crate::value::DurationUnit::from_str(unit).unwrap_or(crate::value::DurationUnit::Seconds);
    crate::value::Duration::new(value, unit)
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

pub(crate) fn escape_into(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars() {
        assert_eq!(render(&Object::Int(1)).unwrap(), format!("{HEADER}<int>1</int>\n"));
        assert_eq!(
            render(&Object::String("a<b".into())).unwrap(),
            format!("{HEADER}<string>a&lt;b</string>\n")
        );
    }

    #[test]
    fn duration_is_iso8601() {
        let rendered = render(&Object::Duration {
            value: 5.0,
            unit: "min".into(),
        })
        .unwrap();
        assert!(rendered.contains("<duration>PT300S</duration>"), "{rendered}");
    }
}
