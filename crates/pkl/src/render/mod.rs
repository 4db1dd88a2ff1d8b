//! Output renderers over fully-forced value trees.
//!
//! Every renderer is a pure function over [`Object`]: the evaluator has
//! already forced and type-checked every member, and the value graph is a
//! DAG, so no cycle guard is needed. Numbers keep their integer/float
//! distinction in every format.

pub mod binary;
pub mod json;
pub mod plist;
pub mod properties;
pub mod xml;
pub mod yaml;

use std::str::FromStr;

use crate::{
    errors::{ErrorKind, PklError, bundle},
    object::Object,
};

/// The output formats the engine can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum OutputFormat {
    Json,
    Yaml,
    Xml,
    Plist,
    Properties,
    /// The MessagePack-based self-describing binary form.
    #[strum(serialize = "pkl-binary", serialize = "binary")]
    Binary,
}

impl OutputFormat {
    /// All accepted format names, for CLI help output.
    pub const NAMES: &'static [&'static str] = &["json", "yaml", "xml", "plist", "properties", "pkl-binary"];

    pub fn parse(name: &str) -> Option<Self> {
        Self::from_str(name).ok()
    }
}

/// Renders a value in the chosen format.
///
/// The module identity (`name`, `uri`) is only needed by the binary format's
/// envelope; textual formats ignore it.
pub fn render(format: OutputFormat, value: &Object, module_name: &str, module_uri: &str) -> Result<Vec<u8>, PklError> {
    match format {
        OutputFormat::Json => json::render(value).map(String::into_bytes),
        OutputFormat::Yaml => yaml::render(value, yaml::YamlFlavor::Compat).map(String::into_bytes),
        OutputFormat::Xml => xml::render(value).map(String::into_bytes),
        OutputFormat::Plist => plist::render(value).map(String::into_bytes),
        OutputFormat::Properties => properties::render(value).map(String::into_bytes),
        OutputFormat::Binary => binary::encode(value, module_name, module_uri),
    }
}

/// The shared "this value cannot appear in that format" error.
pub(crate) fn unrenderable(value: &Object, format: &str) -> PklError {
    let kind_name = match value {
        Object::Null => "Null",
        Object::Bool(_) => "Boolean",
        Object::Int(_) => "Int",
        Object::Float(_) => "Float",
        Object::String(_) => "String",
        Object::Bytes(_) => "Bytes",
        Object::Duration { .. } => "Duration",
        Object::DataSize { .. } => "DataSize",
        Object::Pair(_) => "Pair",
        Object::Regex(_) => "Regex",
        Object::IntSeq { .. } => "IntSeq",
        Object::List(_) => "List",
        Object::Set(_) => "Set",
        Object::Map(_) => "Map",
        Object::Typed(_) => "Typed",
        Object::Dynamic(_) => "Dynamic",
        Object::Listing(_) => "Listing",
        Object::Mapping(_) => "Mapping",
        Object::Module(_) => "Module",
        Object::Function => "Function",
        Object::Class(_) => "Class",
        Object::TypeAlias(_) => "TypeAlias",
    };
    PklError {
        kind: ErrorKind::TypeMismatch,
        message: bundle::format_message("cannotRenderValue", &[&kind_name, &format]),
        frames: Vec::new(),
        causes: Vec::new(),
    }
}
