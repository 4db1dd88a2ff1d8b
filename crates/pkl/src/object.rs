//! The public, fully-forced value tree.
//!
//! Evaluation produces an [`Object`]: every lazy member has been computed
//! and type-checked, so consumers (renderers, embedding callers, tests) can
//! walk it without touching the evaluator. `local` and `hidden` members are
//! not exported.

use std::fmt;

/// A fully-forced Pkl value.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Object {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    Duration { value: f64, unit: String },
    DataSize { value: f64, unit: String },
    Pair(Box<(Object, Object)>),
    Regex(String),
    IntSeq { start: i64, end: i64, step: i64 },
    List(Vec<Object>),
    Set(Vec<Object>),
    Map(Vec<(Object, Object)>),
    Typed(Box<StructBody>),
    Dynamic(Box<StructBody>),
    Listing(Box<StructBody>),
    Mapping(Box<StructBody>),
    Module(Box<StructBody>),
    /// Functions are not exportable beyond their identity.
    Function,
    Class(String),
    TypeAlias(String),
}

/// The exported shape of an object: properties, elements, and entries.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct StructBody {
    /// Qualified class name, e.g. `pkl:base#Dynamic`.
    pub class_name: String,
    /// URI of the module that declared the class.
    pub module_uri: String,
    pub properties: Vec<(String, Object)>,
    pub elements: Vec<Object>,
    pub entries: Vec<(Object, Object)>,
}

impl Object {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// The structural body, for any of the five object flavours.
    pub fn body(&self) -> Option<&StructBody> {
        match self {
            Self::Typed(b) | Self::Dynamic(b) | Self::Listing(b) | Self::Mapping(b) | Self::Module(b) => Some(b),
            _ => None,
        }
    }

    /// Looks up an exported property by name.
    pub fn property(&self, name: &str) -> Option<&Object> {
        self.body()?
            .properties
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// An element by index (objects, lists, and sets).
    pub fn element(&self, index: usize) -> Option<&Object> {
        match self {
            Self::List(items) | Self::Set(items) => items.get(index),
            _ => self.body()?.elements.get(index),
        }
    }

    /// An entry value by string key (objects and maps).
    pub fn entry(&self, key: &str) -> Option<&Object> {
        let matches = |k: &Object| matches!(k, Self::String(s) if s == key);
        match self {
            Self::Map(entries) => entries.iter().find(|(k, _)| matches(k)).map(|(_, v)| v),
            _ => self
                .body()?
                .entries
                .iter()
                .find(|(k, _)| matches(k))
                .map(|(_, v)| v),
        }
    }

    /// Element count for sequences, entry count for maps/mappings.
    pub fn len(&self) -> usize {
        match self {
            Self::List(items) | Self::Set(items) => items.len(),
            Self::Map(entries) => entries.len(),
            Self::Mapping(body) => body.entries.len(),
            Self::IntSeq { start, end, step } => {
                if *step == 0 || (*step > 0 && start > end) || (*step < 0 && start < end) {
                    0
                } else {
                    ((end - start) / step + 1).max(0) as usize
                }
            }
            _ => self.body().map_or(0, |b| b.elements.len()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn simple_class_name(body: &StructBody) -> &str {
        body.class_name.rsplit('#').next().unwrap_or(&body.class_name)
    }
}

impl fmt::Display for Object {
    /// A compact single-line rendering in source-like notation, used by
    /// `trace(x)` output and error messages.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => f.write_str(&crate::value::fmt_float(*v)),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Bytes(bytes) => {
                f.write_str("Bytes(")?;
                for (i, b) in bytes.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{b}")?;
                }
                f.write_str(")")
            }
            Self::Duration { value, unit } => write!(f, "{}.{unit}", crate::value::fmt_number(*value)),
            Self::DataSize { value, unit } => write!(f, "{}.{unit}", crate::value::fmt_number(*value)),
            Self::Pair(pair) => write!(f, "Pair({}, {})", pair.0, pair.1),
            Self::Regex(pattern) => write!(f, "Regex({pattern:?})"),
            Self::IntSeq { start, end, step } => {
                if *step == 1 {
                    write!(f, "IntSeq({start}, {end})")
                } else {
                    write!(f, "IntSeq({start}, {end}).step({step})")
                }
            }
            Self::List(items) => write_call(f, "List", items),
            Self::Set(items) => write_call(f, "Set", items),
            Self::Map(entries) => {
                f.write_str("Map(")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}, {v}")?;
                }
                f.write_str(")")
            }
            Self::Typed(body) | Self::Dynamic(body) | Self::Listing(body) | Self::Mapping(body) | Self::Module(body) => {
                write!(f, "new {} {{", Self::simple_class_name(body))?;
                let mut first = true;
                for (name, value) in &body.properties {
                    sep(f, &mut first)?;
                    write!(f, "{name} = {value}")?;
                }
                for value in &body.elements {
                    sep(f, &mut first)?;
                    write!(f, "{value}")?;
                }
                for (key, value) in &body.entries {
                    sep(f, &mut first)?;
                    write!(f, "[{key}] = {value}")?;
                }
                f.write_str(" }")
            }
            Self::Function => f.write_str("<function>"),
            Self::Class(name) => write!(f, "Class({name})"),
            Self::TypeAlias(name) => write!(f, "TypeAlias({name})"),
        }
    }
}

fn write_call(f: &mut fmt::Formatter<'_>, name: &str, items: &[Object]) -> fmt::Result {
    write!(f, "{name}(")?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    f.write_str(")")
}

fn sep(f: &mut fmt::Formatter<'_>, first: &mut bool) -> fmt::Result {
    if *first {
        *first = false;
        f.write_str(" ")
    } else {
        f.write_str("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_forms() {
        assert_eq!(Object::Null.to_string(), "null");
        assert_eq!(Object::Int(42).to_string(), "42");
        assert_eq!(Object::Float(1.5).to_string(), "1.5");
        assert_eq!(Object::String("hi".into()).to_string(), "\"hi\"");
        assert_eq!(
            Object::List(vec![Object::Int(1), Object::Int(2)]).to_string(),
            "List(1, 2)"
        );
        let dynamic = Object::Dynamic(Box::new(StructBody {
            class_name: "pkl:base#Dynamic".into(),
            module_uri: "pkl:base".into(),
            properties: vec![("age".into(), Object::Int(30))],
            elements: vec![],
            entries: vec![],
        }));
        assert_eq!(dynamic.to_string(), "new Dynamic { age = 30 }");
    }

    #[test]
    fn accessors() {
        let module = Object::Module(Box::new(StructBody {
            class_name: "m".into(),
            module_uri: "repl:x".into(),
            properties: vec![("a".into(), Object::Int(1))],
            elements: vec![Object::Int(9)],
            entries: vec![(Object::String("k".into()), Object::Bool(true))],
        }));
        assert_eq!(module.property("a").and_then(Object::as_int), Some(1));
        assert_eq!(module.element(0).and_then(Object::as_int), Some(9));
        assert_eq!(module.entry("k").and_then(Object::as_bool), Some(true));
    }
}
