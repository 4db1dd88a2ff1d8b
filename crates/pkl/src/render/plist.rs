//! Apple property-list (XML plist) renderer.
//!
//! Conforms to the PropertyList-1.0 DTD: objects and maps become `<dict>`,
//! sequences `<array>`, bytes `<data>` (base64), durations ISO-8601
//! strings. Plists have no null, so `Null` is an error.

use std::fmt::Write as _;

use crate::{errors::PklError, object::Object, value::fmt_float};

const HEADER: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
<!DOCTYPE plist PUBLIC \"-//Apple//DTD PLIST 1.0//EN\" \"http://www.apple.com/DTDs/PropertyList-1.0.dtd\">\n\
<plist version=\"1.0\">\n";

pub fn render(value: &Object) -> Result<String, PklError> {
    let mut out = String::from(HEADER);
    write_value(&mut out, value, 0)?;
    out.push_str("\n</plist>\n");
    Ok(out)
}

fn write_value(out: &mut String, value: &Object, depth: usize) -> Result<(), PklError> {
    indent(out, depth);
    match value {
        Object::Bool(b) => out.push_str(if *b { "<true/>" } else { "<false/>" }),
        Object::Int(i) => {
            let _ = write!(out, "<integer>{i}</integer>");
        }
        Object::Float(f) => {
            let _ = write!(out, "<real>{}</real>", fmt_float(*f));
        }
        Object::String(s) => {
            out.push_str("<string>");
            crate::render::xml::escape_into(out, s);
            out.push_str("</string>");
        }
        Object::Bytes(bytes) => {
            let _ = write!(out, "<data>{}</data>", crate::resource::base64_encode(bytes));
        }
        Object::Duration { value, unit } => {
            use std::str::FromStr;
            let unit = crate::value::DurationUnit::from_str(unit).unwrap_or(crate::value::DurationUnit::Seconds);
            let duration = crate::value::Duration::new(*value, unit);
            let _ = write!(out, "<string>{}</string>", duration.iso8601());
        }
        Object::List(items) | Object::Set(items) => write_array(out, items, depth)?,
        Object::Listing(body) => write_array(out, &body.elements, depth)?,
        Object::Map(entries) => write_dict(out, entries, depth)?,
        Object::Mapping(body) => write_dict(out, &body.entries, depth)?,
        Object::Typed(body) | Object::Dynamic(body) | Object::Module(body) => {
            if body.properties.is_empty() && body.entries.is_empty() && !body.elements.is_empty() {
                return write_array(out, &body.elements, depth);
            }
            if !body.elements.is_empty() {
                return Err(super::unrenderable(value, "PList"));
            }
            let members: Vec<(Object, Object)> = body
                .properties
                .iter()
                .map(|(k, v)| (Object::String(k.clone()), v.clone()))
                .chain(body.entries.iter().cloned())
                .collect();
            write_dict(out, &members, depth)?;
        }
        _ => return Err(super::unrenderable(value, "PList")),
    }
    Ok(())
}

fn write_array(out: &mut String, items: &[Object], depth: usize) -> Result<(), PklError> {
    if items.is_empty() {
        out.push_str("<array/>");
        return Ok(());
    }
    out.push_str("<array>\n");
    for item in items {
        write_value(out, item, depth + 1)?;
        out.push('\n');
    }
    indent(out, depth);
    out.push_str("</array>");
    Ok(())
}

fn write_dict(out: &mut String, entries: &[(Object, Object)], depth: usize) -> Result<(), PklError> {
    if entries.is_empty() {
        out.push_str("<dict/>");
        return Ok(());
    }
    out.push_str("<dict>\n");
    for (key, value) in entries {
        let Object::String(key) = key else {
            return Err(super::unrenderable(key, "PList (as a dict key)"));
        };
        indent(out, depth + 1);
        out.push_str("<key>");
        crate::render::xml::escape_into(out, key);
        out.push_str("</key>\n");
        write_value(out, value, depth + 1)?;
        out.push('\n');
    }
    indent(out, depth);
    out.push_str("</dict>");
    Ok(())
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push('\t');
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::StructBody;

    #[test]
    fn dict_and_scalars() {
        let module = Object::Module(Box::new(StructBody {
            class_name: "m".into(),
            module_uri: "repl:x".into(),
            properties: vec![("a".into(), Object::Int(1)), ("ok".into(), Object::Bool(true))],
            elements: vec![],
            entries: vec![],
        }));
        let rendered = render(&module).unwrap();
        assert!(rendered.contains("<key>a</key>"));
        assert!(rendered.contains("<integer>1</integer>"));
        assert!(rendered.contains("<true/>"));
        assert!(rendered.starts_with("<?xml"));
        assert!(rendered.contains("DOCTYPE plist"));
    }

    #[test]
    fn null_is_rejected() {
        assert!(render(&Object::Null).is_err());
    }
}
