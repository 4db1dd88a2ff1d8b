//! The Pkl binary format: self-describing MessagePack.
//!
//! Module envelope: `[1, moduleName, moduleUri, members]`. Objects are
//! `[kind, className, moduleUri, members]` with kind 1=Typed, 2=Dynamic,
//! 3=Listing, 4=Mapping; members are tagged arrays — `[16, name, value]`
//! for properties, `[17, key, value]` for entries, `[18, value]` for
//! elements. Primitives map directly onto MessagePack; the remaining kinds
//! use tagged arrays with codes 6 through 15. The decoder additionally
//! accepts `{member: value}` maps for object members and trusts the class
//! name over the kind code when the two disagree.

use rmpv::Value as Mp;

use crate::{
    errors::{ErrorKind, PklError},
    object::{Object, StructBody},
};

const CODE_MODULE: u64 = 1;
const KIND_TYPED: u64 = 1;
const KIND_DYNAMIC: u64 = 2;
const KIND_LISTING: u64 = 3;
const KIND_MAPPING: u64 = 4;
const CODE_DURATION: u64 = 6;
const CODE_DATA_SIZE: u64 = 7;
const CODE_PAIR: u64 = 8;
const CODE_REGEX: u64 = 9;
const CODE_INT_SEQ: u64 = 10;
const CODE_LIST: u64 = 11;
const CODE_SET: u64 = 12;
const CODE_MAP: u64 = 13;
const CODE_CLASS: u64 = 14;
const CODE_TYPE_ALIAS: u64 = 15;
const MEMBER_PROPERTY: u64 = 16;
const MEMBER_ENTRY: u64 = 17;
const MEMBER_ELEMENT: u64 = 18;

fn error(message: impl Into<String>) -> PklError {
    PklError {
        kind: ErrorKind::TypeMismatch,
        message: message.into(),
        frames: Vec::new(),
        causes: Vec::new(),
    }
}

/// Encodes a module value into the binary envelope.
pub fn encode(value: &Object, module_name: &str, module_uri: &str) -> Result<Vec<u8>, PklError> {
    let body = match value {
        Object::Module(body) | Object::Typed(body) | Object::Dynamic(body) => encode_members(body)?,
        other => {
            return Err(error(format!(
                "only modules can be written as Pkl binary, got {other}"
            )));
        }
    };
    let envelope = Mp::Array(vec![
        Mp::from(CODE_MODULE),
        Mp::from(module_name),
        Mp::from(module_uri),
        Mp::Array(body),
    ]);
    let mut out = Vec::new();
    rmpv::encode::write_value(&mut out, &envelope).map_err(|err| error(format!("cannot write Pkl binary: {err}")))?;
    Ok(out)
}

fn encode_members(body: &StructBody) -> Result<Vec<Mp>, PklError> {
    let mut members = Vec::with_capacity(body.properties.len() + body.elements.len() + body.entries.len());
    for (name, value) in &body.properties {
        members.push(Mp::Array(vec![
            Mp::from(MEMBER_PROPERTY),
            Mp::from(name.as_str()),
            encode_value(value)?,
        ]));
    }
    for (key, value) in &body.entries {
        members.push(Mp::Array(vec![
            Mp::from(MEMBER_ENTRY),
            encode_value(key)?,
            encode_value(value)?,
        ]));
    }
    for element in &body.elements {
        members.push(Mp::Array(vec![Mp::from(MEMBER_ELEMENT), encode_value(element)?]));
    }
    Ok(members)
}

fn encode_object(kind: u64, body: &StructBody) -> Result<Mp, PklError> {
    Ok(Mp::Array(vec![
        Mp::from(kind),
        Mp::from(body.class_name.as_str()),
        Mp::from(body.module_uri.as_str()),
        Mp::Array(encode_members(body)?),
    ]))
}

fn encode_value(value: &Object) -> Result<Mp, PklError> {
    Ok(match value {
        Object::Null => Mp::Nil,
        Object::Bool(b) => Mp::from(*b),
        Object::Int(i) => Mp::from(*i),
        Object::Float(f) => Mp::from(*f),
        Object::String(s) => Mp::from(s.as_str()),
        Object::Bytes(bytes) => Mp::Binary(bytes.clone()),
        Object::Duration { value, unit } => Mp::Array(vec![
            Mp::from(CODE_DURATION),
            Mp::from(*value),
            Mp::from(unit.as_str()),
        ]),
        Object::DataSize { value, unit } => Mp::Array(vec![
            Mp::from(CODE_DATA_SIZE),
            Mp::from(*value),
            Mp::from(unit.as_str()),
        ]),
        Object::Pair(pair) => Mp::Array(vec![
            Mp::from(CODE_PAIR),
            encode_value(&pair.0)?,
            encode_value(&pair.1)?,
        ]),
        Object::Regex(pattern) => Mp::Array(vec![Mp::from(CODE_REGEX), Mp::from(pattern.as_str())]),
        Object::IntSeq { start, end, step } => Mp::Array(vec![
            Mp::from(CODE_INT_SEQ),
            Mp::from(*start),
            Mp::from(*end),
            Mp::from(*step),
        ]),
        Object::List(items) => tagged_items(CODE_LIST, items)?,
        Object::Set(items) => tagged_items(CODE_SET, items)?,
        Object::Map(entries) => {
            let mut encoded = Vec::with_capacity(entries.len());
            for (k, v) in entries {
                encoded.push(Mp::Array(vec![encode_value(k)?, encode_value(v)?]));
            }
            Mp::Array(vec![Mp::from(CODE_MAP), Mp::Array(encoded)])
        }
        Object::Typed(body) | Object::Module(body) => encode_object(KIND_TYPED, body)?,
        Object::Dynamic(body) => encode_object(KIND_DYNAMIC, body)?,
        Object::Listing(body) => encode_object(KIND_LISTING, body)?,
        Object::Mapping(body) => encode_object(KIND_MAPPING, body)?,
        Object::Class(name) => Mp::Array(vec![Mp::from(CODE_CLASS), Mp::from(name.as_str())]),
        Object::TypeAlias(name) => Mp::Array(vec![Mp::from(CODE_TYPE_ALIAS), Mp::from(name.as_str())]),
        Object::Function => return Err(error("functions cannot be written as Pkl binary")),
    })
}

fn tagged_items(code: u64, items: &[Object]) -> Result<Mp, PklError> {
    let encoded: Result<Vec<Mp>, PklError> = items.iter().map(encode_value).collect();
    Ok(Mp::Array(vec![Mp::from(code), Mp::Array(encoded?)]))
}

/// Decodes a binary module back into a value tree.
pub fn decode(bytes: &[u8]) -> Result<Object, PklError> {
    let mut cursor = bytes;
    let value = rmpv::decode::read_value(&mut cursor).map_err(|err| error(format!("malformed Pkl binary: {err}")))?;
    let Mp::Array(envelope) = value else {
        return Err(error("a Pkl binary document must start with an array"));
    };
    let [code, name, uri, body] = envelope.as_slice() else {
        return Err(error("a Pkl binary module envelope has four slots"));
    };
    if code.as_u64() != Some(CODE_MODULE) {
        return Err(error("not a Pkl binary module envelope"));
    }
    let name = name.as_str().ok_or_else(|| error("module name must be a string"))?;
    let uri = uri.as_str().ok_or_else(|| error("module URI must be a string"))?;
    let mut struct_body = StructBody {
        class_name: uri.to_owned(),
        module_uri: uri.to_owned(),
        properties: Vec::new(),
        elements: Vec::new(),
        entries: Vec::new(),
    };
    let _ = name;
    decode_members(body, &mut struct_body)?;
    Ok(Object::Module(Box::new(struct_body)))
}

fn decode_members(members: &Mp, body: &mut StructBody) -> Result<(), PklError> {
    match members {
        Mp::Array(items) => {
            for item in items {
                let Mp::Array(member) = item else {
                    return Err(error("an object member must be a tagged array"));
                };
                match member.first().and_then(Mp::as_u64) {
                    Some(MEMBER_PROPERTY) => {
                        let [_, name, value] = member.as_slice() else {
                            return Err(error("a property member has three slots"));
                        };
                        let name = name.as_str().ok_or_else(|| error("property name must be a string"))?;
                        body.properties.push((name.to_owned(), decode_value(value)?));
                    }
                    Some(MEMBER_ENTRY) => {
                        let [_, key, value] = member.as_slice() else {
                            return Err(error("an entry member has three slots"));
                        };
                        body.entries.push((decode_value(key)?, decode_value(value)?));
                    }
                    Some(MEMBER_ELEMENT) => {
                        let [_, value] = member.as_slice() else {
                            return Err(error("an element member has two slots"));
                        };
                        body.elements.push(decode_value(value)?);
                    }
                    _ => return Err(error("unknown object member tag")),
                }
            }
            Ok(())
        }
        Mp::Map(pairs) => {
            for (key, value) in pairs {
                match key {
                    Mp::String(_) => {
                        let name = key.as_str().ok_or_else(|| error("member name must be UTF-8"))?;
                        body.properties.push((name.to_owned(), decode_value(value)?));
                    }
                    Mp::Integer(_) => body.elements.push(decode_value(value)?),
                    other => body.entries.push((decode_value(other)?, decode_value(value)?)),
                }
            }
            Ok(())
        }
        _ => Err(error("object members must be an array or a map")),
    }
}

fn decode_value(value: &Mp) -> Result<Object, PklError> {
    Ok(match value {
        Mp::Nil => Object::Null,
        Mp::Boolean(b) => Object::Bool(*b),
        Mp::Integer(i) => Object::Int(
            i.as_i64()
                .ok_or_else(|| error("integer does not fit a signed 64-bit value"))?,
        ),
        Mp::F32(f) => Object::Float(f64::from(*f)),
        Mp::F64(f) => Object::Float(*f),
        Mp::String(_) => Object::String(
            value
                .as_str()
                .ok_or_else(|| error("string is not valid UTF-8"))?
                .to_owned(),
        ),
        Mp::Binary(bytes) => Object::Bytes(bytes.clone()),
        Mp::Array(items) => return decode_tagged(items),
        other => return Err(error(format!("unsupported MessagePack value: {other}"))),
    })
}

fn decode_tagged(items: &[Mp]) -> Result<Object, PklError> {
    let code = items
        .first()
        .and_then(Mp::as_u64)
        .ok_or_else(|| error("a tagged value must start with an integer code"))?;
    match code {
        KIND_TYPED | KIND_DYNAMIC | KIND_LISTING | KIND_MAPPING => {
            let [_, class_name, module_uri, members] = items else {
                return Err(error("an object has four slots"));
            };
            let class_name = class_name.as_str().ok_or_else(|| error("class name must be a string"))?;
            let module_uri = module_uri.as_str().ok_or_else(|| error("module URI must be a string"))?;
            let mut body = StructBody {
                class_name: class_name.to_owned(),
                module_uri: module_uri.to_owned(),
                properties: Vec::new(),
                elements: Vec::new(),
                entries: Vec::new(),
            };
            decode_members(members, &mut body)?;
            // the class name is authoritative when it names a structural kind
            let simple = class_name.rsplit('#').next().unwrap_or(class_name);
            let body = Box::new(body);
            let kind = match simple {
                "Dynamic" => KIND_DYNAMIC,
                "Listing" => KIND_LISTING,
                "Mapping" => KIND_MAPPING,
                "Typed" | "Module" => KIND_TYPED,
                _ => code,
            };
            Ok(match kind {
                KIND_DYNAMIC => Object::Dynamic(body),
                KIND_LISTING => Object::Listing(body),
                KIND_MAPPING => Object::Mapping(body),
                _ => Object::Typed(body),
            })
        }
        CODE_DURATION => {
            let [_, value, unit] = items else {
                return Err(error("a duration has three slots"));
            };
            Ok(Object::Duration {
                value: number_slot(value)?,
                unit: unit.as_str().ok_or_else(|| error("duration unit must be a string"))?.to_owned(),
            })
        }
        CODE_DATA_SIZE => {
            let [_, value, unit] = items else {
                return Err(error("a data size has three slots"));
            };
            Ok(Object::DataSize {
                value: number_slot(value)?,
                unit: unit.as_str().ok_or_else(|| error("data size unit must be a string"))?.to_owned(),
            })
        }
        CODE_PAIR => {
            let [_, first, second] = items else {
                return Err(error("a pair has three slots"));
            };
            Ok(Object::Pair(Box::new((decode_value(first)?, decode_value(second)?))))
        }
        CODE_REGEX => {
            let [_, pattern] = items else {
                return Err(error("a regex has two slots"));
            };
            Ok(Object::Regex(
                pattern.as_str().ok_or_else(|| error("regex pattern must be a string"))?.to_owned(),
            ))
        }
        CODE_INT_SEQ => {
            let [_, start, end, step] = items else {
                return Err(error("an int sequence has four slots"));
            };
            Ok(Object::IntSeq {
                start: int_slot(start)?,
                end: int_slot(end)?,
                step: int_slot(step)?,
            })
        }
        CODE_LIST | CODE_SET => {
            let [_, Mp::Array(items)] = items else {
                return Err(error("a collection has two slots"));
            };
            let decoded: Result<Vec<Object>, PklError> = items.iter().map(decode_value).collect();
            Ok(if code == CODE_SET {
                Object::Set(decoded?)
            } else {
                Object::List(decoded?)
            })
        }
        CODE_MAP => {
            let [_, Mp::Array(pairs)] = items else {
                return Err(error("a map has two slots"));
            };
            let mut entries = Vec::with_capacity(pairs.len());
            for pair in pairs {
                let Mp::Array(pair) = pair else {
                    return Err(error("a map entry must be a two-slot array"));
                };
                let [key, value] = pair.as_slice() else {
                    return Err(error("a map entry must be a two-slot array"));
                };
                entries.push((decode_value(key)?, decode_value(value)?));
            }
            Ok(Object::Map(entries))
        }
        CODE_CLASS => {
            let [_, name] = items else {
                return Err(error("a class reference has two slots"));
            };
            Ok(Object::Class(
                name.as_str().ok_or_else(|| error("class name must be a string"))?.to_owned(),
            ))
        }
        CODE_TYPE_ALIAS => {
            let [_, name] = items else {
                return Err(error("a typealias reference has two slots"));
            };
            Ok(Object::TypeAlias(
                name.as_str().ok_or_else(|| error("typealias name must be a string"))?.to_owned(),
            ))
        }
        other => Err(error(format!("unknown Pkl binary code {other}"))),
    }
}

fn number_slot(value: &Mp) -> Result<f64, PklError> {
    value
        .as_f64()
        .or_else(|| value.as_i64().map(|i| i as f64))
        .ok_or_else(|| error("expected a number"))
}

fn int_slot(value: &Mp) -> Result<i64, PklError> {
    value.as_i64().ok_or_else(|| error("expected an integer"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_module() {
        let module = Object::Module(Box::new(StructBody {
            class_name: "repl:text1".into(),
            module_uri: "repl:text1".into(),
            properties: vec![
                ("a".into(), Object::Int(1)),
                ("b".into(), Object::String("two".into())),
                ("xs".into(), Object::List(vec![Object::Int(1), Object::Float(2.5)])),
                (
                    "d".into(),
                    Object::Duration {
                        value: 5.0,
                        unit: "min".into(),
                    },
                ),
            ],
            elements: vec![],
            entries: vec![(Object::String("k".into()), Object::Bool(true))],
        }));
        let bytes = encode(&module, "text1", "repl:text1").unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, module);
    }

    #[test]
    fn decode_hand_written_envelope() {
        // [1, "test", "file:///t.pkl", [[16, "pigeon", [4, "Dynamic", "pkl:base", [[16, "age", 30]]]]]]
        let envelope = Mp::Array(vec![
            Mp::from(1u64),
            Mp::from("test"),
            Mp::from("file:///t.pkl"),
            Mp::Array(vec![Mp::Array(vec![
                Mp::from(16u64),
                Mp::from("pigeon"),
                Mp::Array(vec![
                    Mp::from(4u64),
                    Mp::from("Dynamic"),
                    Mp::from("pkl:base"),
                    Mp::Array(vec![Mp::Array(vec![Mp::from(16u64), Mp::from("age"), Mp::from(30u64)])]),
                ]),
            ])]),
        ]);
        let mut bytes = Vec::new();
        rmpv::encode::write_value(&mut bytes, &envelope).unwrap();
        let module = decode(&bytes).unwrap();
        let age = module.property("pigeon").and_then(|p| p.property("age"));
        assert_eq!(age.and_then(Object::as_int), Some(30));
    }

    #[test]
    fn functions_are_rejected() {
        let module = Object::Module(Box::new(StructBody {
            class_name: "m".into(),
            module_uri: "repl:x".into(),
            properties: vec![("f".into(), Object::Function)],
            elements: vec![],
            entries: vec![],
        }));
        assert!(encode(&module, "m", "repl:x").is_err());
    }
}
